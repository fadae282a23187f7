// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Public key APDUs

use encdec::{DecodeOwned, Encode};

use crate::{ApduError, ApduStatic, Bip32Path, Instruction, DONGLE_APDU_CLA};

/// Public key request for a BIP32 path
///
/// ## Encoding:
/// ```text
/// +---------------+---------------------------------------------+
/// |     DEPTH     |        INDEXES (big-endian u32 each)        |
/// +---------------+---------------------------------------------+
/// ```
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PublicKeyReq {
    pub path: Bip32Path,
}

impl PublicKeyReq {
    pub fn new(path: Bip32Path) -> Self {
        Self { path }
    }
}

impl ApduStatic for PublicKeyReq {
    const CLA: u8 = DONGLE_APDU_CLA;
    const INS: u8 = Instruction::GetPublicKey as u8;
}

impl Encode for PublicKeyReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        self.path.encode_len()
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        self.path.encode(buff)
    }
}

impl DecodeOwned for PublicKeyReq {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let (path, n) = Bip32Path::decode_owned(buff)?;
        Ok((Self { path }, n))
    }
}

/// Public key response
///
/// ## Encoding:
/// ```text
/// +---------+--------------+----------+--------------+------------------+
/// | KEY_LEN |  PUBLIC_KEY  | ADDR_LEN | ADDRESS (UTF8)| CHAIN_CODE (32) |
/// +---------+--------------+----------+--------------+------------------+
/// ```
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PublicKeyResp {
    /// Public key, uncompressed SEC1 as returned by the device
    pub public_key: Vec<u8>,
    /// Base58 address for the key
    pub address: String,
    pub chain_code: [u8; 32],
}

impl Encode for PublicKeyResp {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(1 + self.public_key.len() + 1 + self.address.len() + 32)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;
        let key_len = u8::try_from(self.public_key.len()).map_err(|_| ApduError::InvalidLength)?;
        let addr_len = u8::try_from(self.address.len()).map_err(|_| ApduError::InvalidLength)?;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        let mut index = 0;

        buff[index] = key_len;
        buff[index + 1..][..self.public_key.len()].copy_from_slice(&self.public_key);
        index += 1 + self.public_key.len();

        buff[index] = addr_len;
        buff[index + 1..][..self.address.len()].copy_from_slice(self.address.as_bytes());
        index += 1 + self.address.len();

        buff[index..][..32].copy_from_slice(&self.chain_code);
        index += 32;

        Ok(index)
    }
}

impl DecodeOwned for PublicKeyResp {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let mut index = 0;

        // Public key
        let key_len = *buff.first().ok_or(ApduError::InvalidLength)? as usize;
        if key_len == 0 || buff.len() < 1 + key_len + 1 {
            return Err(ApduError::InvalidLength);
        }
        let public_key = buff[1..][..key_len].to_vec();
        index += 1 + key_len;

        // Address
        let addr_len = buff[index] as usize;
        if buff.len() < index + 1 + addr_len + 32 {
            return Err(ApduError::InvalidLength);
        }
        let address = std::str::from_utf8(&buff[index + 1..][..addr_len])
            .map_err(|_| ApduError::Utf8)?
            .to_string();
        index += 1 + addr_len;

        // Chain code
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&buff[index..][..32]);
        index += 32;

        Ok((
            Self {
                public_key,
                address,
                chain_code,
            },
            index,
        ))
    }
}
