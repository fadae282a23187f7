// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Untrusted hash signing APDUs

use encdec::{DecodeOwned, Encode};

use crate::{ApduError, ApduStatic, Bip32Path, Instruction, DONGLE_APDU_CLA};

/// Bitcoin `SIGHASH_ALL` flag
pub const SIGHASH_ALL: u8 = 0x01;

/// Sign untrusted hash request
///
/// ## Encoding:
/// ```text
/// +-------+------------------+---------+--------------------+---------+
/// | DEPTH | INDEXES (BE u32) | PIN_LEN | LOCK_TIME (BE u32) | SIGHASH |
/// +-------+------------------+---------+--------------------+---------+
/// ```
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SignHashReq {
    pub path: Bip32Path,
    pub lock_time: u32,
    pub sighash: u8,
}

impl SignHashReq {
    /// Create a `SIGHASH_ALL` request with a zero lock time
    pub fn new(path: Bip32Path) -> Self {
        Self {
            path,
            lock_time: 0,
            sighash: SIGHASH_ALL,
        }
    }
}

impl ApduStatic for SignHashReq {
    const CLA: u8 = DONGLE_APDU_CLA;
    const INS: u8 = Instruction::SignUntrustedHash as u8;
}

impl Encode for SignHashReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.path.encode_len()? + 1 + 4 + 1)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        let mut index = self.path.encode(buff)?;

        // No user validation PIN
        buff[index] = 0x00;
        index += 1;

        buff[index..][..4].copy_from_slice(&self.lock_time.to_be_bytes());
        index += 4;

        buff[index] = self.sighash;
        index += 1;

        Ok(index)
    }
}

impl DecodeOwned for SignHashReq {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let (path, mut index) = Bip32Path::decode_owned(buff)?;
        if buff.len() < index + 6 {
            return Err(ApduError::InvalidLength);
        }

        // PIN length, always zero for this request
        index += 1;

        let lock_time = u32::from_be_bytes([
            buff[index],
            buff[index + 1],
            buff[index + 2],
            buff[index + 3],
        ]);
        index += 4;

        let sighash = buff[index];
        index += 1;

        Ok((
            Self {
                path,
                lock_time,
                sighash,
            },
            index,
        ))
    }
}

/// Signature response, `DER_SIGNATURE ‖ SIGHASH`
///
/// Devices may report the DER sequence tag as `0x31`, this is corrected
/// to `0x30` on decode.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SignatureResp {
    /// DER encoded signature (sighash byte removed)
    pub signature: Vec<u8>,
    pub sighash: u8,
}

impl Encode for SignatureResp {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.signature.len() + 1)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }
        buff[..n - 1].copy_from_slice(&self.signature);
        buff[n - 1] = self.sighash;
        Ok(n)
    }
}

impl DecodeOwned for SignatureResp {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let (sighash, sig) = match buff.split_last() {
            Some((s, sig)) if !sig.is_empty() => (*s, sig),
            _ => return Err(ApduError::InvalidLength),
        };

        let mut signature = sig.to_vec();
        if signature[0] == 0x31 {
            signature[0] = 0x30;
        }

        Ok((Self { signature, sighash }, buff.len()))
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;
    use crate::test::encode_decode_apdu;

    #[test]
    fn sign_hash_req() {
        let req = SignHashReq::new(Bip32Path::from_str("m/44'/0'/0'/0/0").unwrap());
        let b = encode_decode_apdu(&req);

        assert_eq!(b.len(), 21 + 6);
        assert_eq!(&b[21..], &[0x00, 0x00, 0x00, 0x00, 0x00, SIGHASH_ALL]);
    }

    #[test]
    fn signature_resp_normalised() {
        let (r, _) = SignatureResp::decode_owned(&[0x31, 0x02, 0xaa, 0x01]).unwrap();

        assert_eq!(r.signature, [0x30, 0x02, 0xaa]);
        assert_eq!(r.sighash, SIGHASH_ALL);

        assert_eq!(
            SignatureResp::decode_owned(&[0x01]),
            Err(ApduError::InvalidLength)
        );
    }
}
