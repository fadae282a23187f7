// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device attestation APDUs

use byteorder::{BigEndian, ByteOrder};
use encdec::{DecodeOwned, Encode};

use crate::{ApduError, ApduStatic, Instruction, DONGLE_APDU_CLA};

/// Attestation request, carrying a host-chosen nonce
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                        NONCE (8 bytes)                        +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct AttestationReq {
    pub nonce: [u8; 8],
}

impl AttestationReq {
    pub fn new(nonce: [u8; 8]) -> Self {
        Self { nonce }
    }
}

impl ApduStatic for AttestationReq {
    const CLA: u8 = DONGLE_APDU_CLA;
    const INS: u8 = Instruction::CheckAttestation as u8;
}

impl Encode for AttestationReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.nonce.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        if buff.len() < self.nonce.len() {
            return Err(ApduError::InvalidLength);
        }
        buff[..8].copy_from_slice(&self.nonce);
        Ok(8)
    }
}

impl DecodeOwned for AttestationReq {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() < 8 {
            return Err(ApduError::InvalidLength);
        }
        let mut nonce = [0u8; 8];
        nonce.copy_from_slice(&buff[..8]);
        Ok((Self { nonce }, 8))
    }
}

/// Attestation response
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       BATCH_ID (big-endian)                   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    DERIVATION_ID (big-endian)                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                       VERSION (8 bytes)                       +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                   SIGNATURE (DER, remaining bytes)            /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The signature covers `SHA256(VERSION ‖ NONCE)`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AttestationResp {
    pub batch_id: u32,
    pub derivation_id: u32,
    pub version: [u8; 8],
    pub signature: Vec<u8>,
}

impl AttestationResp {
    /// Signed message for the provided nonce
    pub fn signed_data(&self, nonce: &[u8; 8]) -> [u8; 16] {
        let mut d = [0u8; 16];
        d[..8].copy_from_slice(&self.version);
        d[8..].copy_from_slice(nonce);
        d
    }

    /// Signature with the device DER tag quirk (`0x31`) corrected
    pub fn der_signature(&self) -> Vec<u8> {
        let mut s = self.signature.clone();
        if s.first() == Some(&0x31) {
            s[0] = 0x30;
        }
        s
    }
}

impl Encode for AttestationResp {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(16 + self.signature.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        BigEndian::write_u32(&mut buff[0..], self.batch_id);
        BigEndian::write_u32(&mut buff[4..], self.derivation_id);
        buff[8..16].copy_from_slice(&self.version);
        buff[16..n].copy_from_slice(&self.signature);

        Ok(n)
    }
}

impl DecodeOwned for AttestationResp {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        // Header plus at least one signature byte
        if buff.len() <= 16 {
            return Err(ApduError::InvalidLength);
        }

        let mut version = [0u8; 8];
        version.copy_from_slice(&buff[8..16]);

        let r = Self {
            batch_id: BigEndian::read_u32(&buff[0..]),
            derivation_id: BigEndian::read_u32(&buff[4..]),
            version,
            signature: buff[16..].to_vec(),
        };

        Ok((r, buff.len()))
    }
}
