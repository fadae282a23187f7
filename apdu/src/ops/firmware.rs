// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Firmware version APDUs

use encdec::{DecodeOwned, Encode};

use crate::{ApduError, ApduStatic, Instruction, DONGLE_APDU_CLA};

/// Firmware version request, no data with `LE = 8`
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct FirmwareVersionReq;

impl ApduStatic for FirmwareVersionReq {
    const CLA: u8 = DONGLE_APDU_CLA;
    const INS: u8 = Instruction::GetFirmwareVersion as u8;

    fn le(&self) -> Option<u8> {
        Some(FirmwareVersion::LEN as u8)
    }
}

impl Encode for FirmwareVersionReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(0)
    }

    fn encode(&self, _buff: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(0)
    }
}

/// Firmware version response
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   FEATURES    | ARCHITECTURE  |     MAJOR     |     MINOR     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     PATCH     | LOADER_MAJOR  | LOADER_MINOR  |  SETUP_FLAG   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct FirmwareVersion {
    pub features: u8,
    pub architecture: u8,
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub loader_major: u8,
    pub loader_minor: u8,
    pub setup: u8,
}

impl FirmwareVersion {
    pub const LEN: usize = 8;
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{} (loader {}.{})",
            self.major, self.minor, self.patch, self.loader_major, self.loader_minor
        )
    }
}

impl Encode for FirmwareVersion {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(Self::LEN)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        if buff.len() < Self::LEN {
            return Err(ApduError::InvalidLength);
        }

        buff[..Self::LEN].copy_from_slice(&[
            self.features,
            self.architecture,
            self.major,
            self.minor,
            self.patch,
            self.loader_major,
            self.loader_minor,
            self.setup,
        ]);

        Ok(Self::LEN)
    }
}

impl DecodeOwned for FirmwareVersion {
    type Output = Self;
    type Error = ApduError;

    /// Decode a firmware version, the response must be exactly 8 bytes
    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() != Self::LEN {
            return Err(ApduError::InvalidLength);
        }

        let v = Self {
            features: buff[0],
            architecture: buff[1],
            major: buff[2],
            minor: buff[3],
            patch: buff[4],
            loader_major: buff[5],
            loader_minor: buff[6],
            setup: buff[7],
        };

        Ok((v, Self::LEN))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{test::encode_decode_apdu, Apdu};

    #[test]
    fn firmware_version_req() {
        let a = Apdu::from_req(&FirmwareVersionReq).unwrap();
        assert_eq!(a.to_bytes(), [0xe0, 0xc4, 0x00, 0x00, 0x08]);
    }

    #[test]
    fn firmware_version_resp() {
        let v = FirmwareVersion {
            features: 0x01,
            architecture: 0x30,
            major: 1,
            minor: 0,
            patch: 2,
            loader_major: 3,
            loader_minor: 4,
            setup: 0x01,
        };

        let b = encode_decode_apdu(&v);
        assert_eq!(b, [0x01, 0x30, 1, 0, 2, 3, 4, 0x01]);

        assert_eq!(
            FirmwareVersion::decode_owned(&b[..7]),
            Err(ApduError::InvalidLength)
        );
    }
}
