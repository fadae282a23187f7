// Copyright (c) 2022-2023 The MobileCoin Foundation

//! PIN verification APDUs

use encdec::{DecodeOwned, Encode};

use crate::{ApduError, ApduStatic, Instruction, DONGLE_APDU_CLA};

/// Verify PIN request
///
/// Data is the UTF-8 encoded PIN, or a single `0x00` byte to query
/// the PIN state without presenting one.
///
/// A wrong PIN is reported via the `0x63Cx` status word, with the low
/// nibble holding the remaining attempts.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct VerifyPinReq {
    pub pin: Option<String>,
}

impl VerifyPinReq {
    pub fn new(pin: Option<&str>) -> Self {
        Self {
            pin: pin.map(String::from),
        }
    }
}

impl ApduStatic for VerifyPinReq {
    const CLA: u8 = DONGLE_APDU_CLA;
    const INS: u8 = Instruction::VerifyPin as u8;
}

impl Encode for VerifyPinReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        match &self.pin {
            Some(p) if !p.is_empty() => Ok(p.len()),
            _ => Ok(1),
        }
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        match &self.pin {
            Some(p) if !p.is_empty() => buff[..n].copy_from_slice(p.as_bytes()),
            _ => buff[0] = 0x00,
        }

        Ok(n)
    }
}

impl DecodeOwned for VerifyPinReq {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let pin = match buff {
            [] => return Err(ApduError::InvalidLength),
            [0x00] => None,
            b => Some(
                std::str::from_utf8(b)
                    .map_err(|_| ApduError::Utf8)?
                    .to_string(),
            ),
        };

        Ok((Self { pin }, buff.len()))
    }
}
