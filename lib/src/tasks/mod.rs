// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device tasks
//!
//! A [Task] is one logical device operation. The queue calls [Task::main] to
//! obtain the first APDU, then feeds each successful (or task-accepted) response
//! to [Task::did_receive], which either issues the next APDU of a multi-step
//! exchange or completes the task.

use encdec::DecodeOwned;
use log::warn;
use strum::Display;

use remote_dongle_apdu::{
    ops::{
        firmware::FirmwareVersion, public_key::PublicKeyResp, trusted_input::TrustedInput,
    },
    Apdu, ApduError, ApduResponse, ApduStatic, Status,
};

use crate::{attestation::Attestation, Error};

mod attestation;
pub use attestation::AttestationTask;

mod coin_version;
pub use coin_version::CoinVersionTask;

mod firmware;
pub use firmware::FirmwareVersionTask;

mod pin;
pub use pin::{PinStatus, VerifyPinTask};

mod public_key;
pub use public_key::PublicKeyTask;

mod sign;
pub use sign::SignHashTask;

mod stream;

mod trusted_input;
pub use trusted_input::TrustedInputTask;

mod untrusted_hash;
pub use untrusted_hash::{FinalizeFullTask, StartUntrustedHashTask};

/// Next step of a running task
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// Send another APDU
    Send(Apdu),
    /// Task complete
    Complete(Result<TaskOutput, Error>),
}

/// Task results
#[derive(Clone, Debug, PartialEq)]
pub enum TaskOutput {
    FirmwareVersion(FirmwareVersion),
    Attestation(Attestation),
    Pin(PinStatus),
    PublicKey(PublicKeyResp),
    TrustedInput(TrustedInput),
    /// DER signature
    Signature(Vec<u8>),
    /// Completed with no result data
    Unit,
}

/// Task kinds, for logging
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum TaskKind {
    GetFirmwareVersion,
    CheckAttestation,
    VerifyPin,
    GetPublicKey,
    SetCoinVersion,
    GetTrustedInput,
    StartUntrustedHashTransactionInput,
    FinalizeFullUntrustedHashTransactionInput,
    SignUntrustedHash,
}

/// Per-operation task behaviour
pub(crate) trait Operation {
    /// Build the first APDU, `None` if the request cannot be issued
    fn main(&mut self) -> Option<Apdu>;

    /// Handle a response whose status passed the central status check
    fn did_receive(&mut self, resp: ApduResponse) -> Step;

    /// Statuses handled by the task itself rather than failing it
    fn accepts_status(&self, _status: &Status) -> bool {
        false
    }
}

/// Device operation
#[derive(Debug)]
pub enum Task {
    GetFirmwareVersion(FirmwareVersionTask),
    CheckAttestation(AttestationTask),
    VerifyPin(VerifyPinTask),
    GetPublicKey(PublicKeyTask),
    SetCoinVersion(CoinVersionTask),
    GetTrustedInput(TrustedInputTask),
    StartUntrustedHash(StartUntrustedHashTask),
    FinalizeFull(FinalizeFullTask),
    SignUntrustedHash(SignHashTask),
}

macro_rules! dispatch {
    ($self:ident, $t:ident => $e:expr) => {
        match $self {
            Task::GetFirmwareVersion($t) => $e,
            Task::CheckAttestation($t) => $e,
            Task::VerifyPin($t) => $e,
            Task::GetPublicKey($t) => $e,
            Task::SetCoinVersion($t) => $e,
            Task::GetTrustedInput($t) => $e,
            Task::StartUntrustedHash($t) => $e,
            Task::FinalizeFull($t) => $e,
            Task::SignUntrustedHash($t) => $e,
        }
    };
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::GetFirmwareVersion(_) => TaskKind::GetFirmwareVersion,
            Task::CheckAttestation(_) => TaskKind::CheckAttestation,
            Task::VerifyPin(_) => TaskKind::VerifyPin,
            Task::GetPublicKey(_) => TaskKind::GetPublicKey,
            Task::SetCoinVersion(_) => TaskKind::SetCoinVersion,
            Task::GetTrustedInput(_) => TaskKind::GetTrustedInput,
            Task::StartUntrustedHash(_) => TaskKind::StartUntrustedHashTransactionInput,
            Task::FinalizeFull(_) => TaskKind::FinalizeFullUntrustedHashTransactionInput,
            Task::SignUntrustedHash(_) => TaskKind::SignUntrustedHash,
        }
    }

    /// Build the first APDU, `None` cancels the task
    pub fn main(&mut self) -> Option<Apdu> {
        dispatch!(self, t => t.main())
    }

    /// Handle a response
    pub fn did_receive(&mut self, resp: ApduResponse) -> Step {
        dispatch!(self, t => t.did_receive(resp))
    }

    /// Check whether a non-success status is handled by the task
    pub fn accepts_status(&self, status: &Status) -> bool {
        dispatch!(self, t => t.accepts_status(status))
    }
}

/// Build an APDU from a request object, logging failures
pub(crate) fn build<R>(req: &R) -> Option<Apdu>
where
    R: ApduStatic + encdec::Encode<Error = ApduError>,
{
    match Apdu::from_req(req) {
        Ok(a) => Some(a),
        Err(e) => {
            warn!("Unable to build APDU for instruction 0x{:02x}: {e}", R::INS);
            None
        }
    }
}

/// Decode response data, mapping failures to [Error::InvalidResponse]
pub(crate) fn decode<T>(data: &[u8]) -> Result<T, Error>
where
    T: DecodeOwned<Output = T, Error = ApduError>,
{
    T::decode_owned(data)
        .map(|(v, _)| v)
        .map_err(|_| Error::InvalidResponse)
}
