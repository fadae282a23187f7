// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Coin version APDUs, configuring address prefixes on the device

use encdec::{DecodeOwned, Encode};

use crate::{ApduError, ApduStatic, Instruction, DONGLE_APDU_CLA};

/// Set coin version request
///
/// ## Encoding:
/// ```text
///  0                   1
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | P2PKH_PREFIX  |  P2SH_PREFIX  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The device responds with an empty success APDU.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CoinVersionReq {
    pub p2pkh_prefix: u8,
    pub p2sh_prefix: u8,
}

impl CoinVersionReq {
    pub fn new(p2pkh_prefix: u8, p2sh_prefix: u8) -> Self {
        Self {
            p2pkh_prefix,
            p2sh_prefix,
        }
    }
}

impl ApduStatic for CoinVersionReq {
    const CLA: u8 = DONGLE_APDU_CLA;
    const INS: u8 = Instruction::SetCoinVersion as u8;
}

impl Encode for CoinVersionReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(2)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        if buff.len() < 2 {
            return Err(ApduError::InvalidLength);
        }
        buff[0] = self.p2pkh_prefix;
        buff[1] = self.p2sh_prefix;
        Ok(2)
    }
}

impl DecodeOwned for CoinVersionReq {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() < 2 {
            return Err(ApduError::InvalidLength);
        }
        Ok((Self::new(buff[0], buff[1]), 2))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::encode_decode_apdu;

    #[test]
    fn coin_version_req() {
        let b = encode_decode_apdu(&CoinVersionReq::new(0x00, 0x05));
        assert_eq!(b, [0x00, 0x05]);
    }
}
