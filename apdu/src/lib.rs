// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol / APDU definitions for remote dongle communication
//!
//! This crate provides the wire-level pieces shared by the host library and the
//! simulator: command / response APDUs, status word decoding, BIP32 path and
//! Bitcoin transaction encodings, the Bluetooth slice framing, and one module
//! per device operation describing its request / response encodings.
//!
//! Unlike the rest of the protocol, multi-byte integers in APDU headers and BIP32
//! paths are big-endian, while fields copied from Bitcoin transactions keep their
//! little-endian wire encoding.

use strum::Display;

pub mod apdu;
pub mod ops;
pub mod path;
pub mod slicer;
pub mod status;
pub mod tx;

mod helpers;
pub use helpers::{read_varint, varint_len, write_varint};

pub use apdu::{Apdu, ApduResponse};
pub use path::Bip32Path;
pub use status::{Status, StatusWord};

/// Dongle APDU class
pub const DONGLE_APDU_CLA: u8 = 0xe0;

/// Maximum data length for a single command APDU
pub const MAX_APDU_DATA: usize = 255;

/// Dongle APDU instruction codes
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum Instruction {
    /// Set address prefix bytes
    SetCoinVersion = 0x14,

    /// Verify user PIN
    VerifyPin = 0x22,

    /// Fetch a public key for a BIP32 path
    GetPublicKey = 0x40,

    /// Stream a previous transaction to obtain a trusted input
    GetTrustedInput = 0x42,

    /// Start hashing a transaction to be signed
    StartUntrustedHashTransactionInput = 0x44,

    /// Sign the hashed transaction input
    SignUntrustedHash = 0x48,

    /// Stream outputs and finalise the transaction hash
    FinalizeFullUntrustedHashTransactionInput = 0x4a,

    /// Request device attestation
    CheckAttestation = 0xc2,

    /// Fetch firmware version
    GetFirmwareVersion = 0xc4,
}

/// APDU encode / decode errors
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ApduError {
    /// Buffer too short for the encoded object
    #[error("invalid length")]
    InvalidLength,

    /// Malformed encoding
    #[error("invalid encoding")]
    InvalidEncoding,

    /// Invalid UTF-8 string
    #[error("invalid utf8")]
    Utf8,

    /// Data exceeds the maximum APDU payload
    #[error("data too long ({0} bytes, max {MAX_APDU_DATA})")]
    DataTooLong(usize),

    /// Invalid BIP32 path
    #[error("invalid BIP32 path")]
    InvalidPath,
}

impl From<encdec::Error> for ApduError {
    fn from(_: encdec::Error) -> Self {
        ApduError::InvalidLength
    }
}

/// Static APDU header information for request types
pub trait ApduStatic {
    /// APDU class
    const CLA: u8;

    /// APDU instruction
    const INS: u8;

    /// First parameter byte
    fn p1(&self) -> u8 {
        0
    }

    /// Second parameter byte
    fn p2(&self) -> u8 {
        0
    }

    /// Expected response length, for requests without data
    fn le(&self) -> Option<u8> {
        None
    }
}

#[cfg(test)]
pub(crate) mod test {
    use encdec::{DecodeOwned, Encode};

    use super::*;

    /// Helper for APDU encode / decode tests
    pub fn encode_decode_apdu<A>(apdu: &A) -> Vec<u8>
    where
        A: Encode<Error = ApduError> + DecodeOwned<Output = A, Error = ApduError> + PartialEq + core::fmt::Debug,
    {
        // Encode APDU
        let expected_n = apdu.encode_len().expect("get length failed");
        let mut buff = vec![0u8; expected_n];
        let n = apdu.encode(&mut buff).expect("encode failed");

        // Ensure encoded data fits maximum APDU payload
        assert!(
            n <= MAX_APDU_DATA,
            "encoded length {n} exceeds maximum APDU payload {MAX_APDU_DATA}"
        );
        assert_eq!(n, expected_n, "encode length mismatch");

        // Decode APDU
        let (decoded, decoded_n) = A::decode_owned(&buff[..n]).expect("decode failed");

        assert_eq!(apdu, &decoded);
        assert_eq!(expected_n, decoded_n);

        buff
    }
}
