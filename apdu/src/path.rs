// Copyright (c) 2022-2023 The MobileCoin Foundation

//! BIP32 derivation paths
//!
//! ## Encoding
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     DEPTH     |            INDEX_0 (big-endian u32)           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |               |           INDEX_N ...                         /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::{fmt::Display, str::FromStr};

use byteorder::{BigEndian, ByteOrder};
use encdec::{DecodeOwned, Encode};

use crate::ApduError;

/// Hardened derivation flag
pub const HARDENED: u32 = 0x8000_0000;

/// Maximum supported derivation depth
pub const MAX_DEPTH: usize = 10;

/// Apply the hardened flag to an index, which must not already carry it
fn hardened(index: u32) -> Result<u32, ApduError> {
    match index & HARDENED {
        0 => Ok(index | HARDENED),
        _ => Err(ApduError::InvalidPath),
    }
}

/// BIP32 derivation path
#[derive(Clone, PartialEq, Eq, Debug, Default, Hash)]
pub struct Bip32Path(Vec<u32>);

impl Bip32Path {
    /// Create a path from raw indexes
    pub fn new(indexes: Vec<u32>) -> Result<Self, ApduError> {
        if indexes.len() > MAX_DEPTH {
            return Err(ApduError::InvalidPath);
        }
        Ok(Self(indexes))
    }

    /// BIP44 purpose / coin path, `m/44'/coin'`
    pub fn bip44_coin(coin: u32) -> Result<Self, ApduError> {
        Ok(Self(vec![44 | HARDENED, hardened(coin)?]))
    }

    /// BIP44 account path, `m/44'/coin'/account'`
    pub fn bip44_account(coin: u32, account: u32) -> Result<Self, ApduError> {
        Ok(Self(vec![44 | HARDENED, hardened(coin)?, hardened(account)?]))
    }

    pub fn depth(&self) -> u8 {
        self.0.len() as u8
    }

    pub fn indexes(&self) -> &[u32] {
        &self.0
    }

    /// Final index of the path, if any
    pub fn child_index(&self) -> Option<u32> {
        self.0.last().copied()
    }

    /// Parent of this path (or `None` for the master path)
    pub fn parent(&self) -> Option<Self> {
        match self.0.split_last() {
            Some((_, parent)) => Some(Self(parent.to_vec())),
            None => None,
        }
    }
}

impl Encode for Bip32Path {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(1 + self.0.len() * 4)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        buff[0] = self.depth();
        for (i, v) in self.0.iter().enumerate() {
            BigEndian::write_u32(&mut buff[1 + i * 4..], *v);
        }

        Ok(n)
    }
}

impl DecodeOwned for Bip32Path {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let depth = *buff.first().ok_or(ApduError::InvalidLength)? as usize;
        if depth > MAX_DEPTH {
            return Err(ApduError::InvalidPath);
        }

        let n = 1 + depth * 4;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        let indexes = buff[1..n].chunks(4).map(BigEndian::read_u32).collect();

        Ok((Self(indexes), n))
    }
}

/// Parse paths in the form `m/44'/0'/0'/0/1` (`h` is accepted for hardened)
impl FromStr for Bip32Path {
    type Err = ApduError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("m/").unwrap_or(s);

        if s.is_empty() || s == "m" {
            return Ok(Self::default());
        }

        let mut indexes = vec![];
        for part in s.split('/') {
            let (v, hardened) = match part.strip_suffix(['\'', 'h', 'H']) {
                Some(v) => (v, true),
                None => (part, false),
            };

            let v = u32::from_str(v).map_err(|_| ApduError::InvalidPath)?;
            if v & HARDENED != 0 {
                return Err(ApduError::InvalidPath);
            }

            indexes.push(if hardened { v | HARDENED } else { v });
        }

        Self::new(indexes)
    }
}

impl Display for Bip32Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m")?;
        for v in &self.0 {
            match v & HARDENED != 0 {
                true => write!(f, "/{}'", v & !HARDENED)?,
                false => write!(f, "/{v}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::encode_decode_apdu;

    #[test]
    fn parse_and_display() {
        let p = Bip32Path::from_str("m/44'/0'/0'/0/5").unwrap();
        assert_eq!(
            p.indexes(),
            &[44 | HARDENED, HARDENED, HARDENED, 0, 5]
        );
        assert_eq!(p.to_string(), "m/44'/0'/0'/0/5");

        assert_eq!(
            Bip32Path::from_str("44h/1h").unwrap(),
            Bip32Path::bip44_coin(1).unwrap()
        );
        assert_eq!(Bip32Path::from_str("m/x"), Err(ApduError::InvalidPath));
        assert_eq!(
            Bip32Path::from_str("m/2147483648"),
            Err(ApduError::InvalidPath)
        );
    }

    #[test]
    fn path_encoding() {
        let p = Bip32Path::bip44_account(0, 1).unwrap();
        let b = encode_decode_apdu(&p);

        assert_eq!(
            b,
            [
                0x03, 0x80, 0x00, 0x00, 0x2c, 0x80, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x01
            ]
        );
    }

    #[test]
    fn parent_path() {
        let p = Bip32Path::bip44_account(0, 0).unwrap();
        assert_eq!(p.parent(), Some(Bip32Path::bip44_coin(0).unwrap()));
        assert_eq!(p.child_index(), Some(HARDENED));
        assert_eq!(Bip32Path::default().parent(), None);
    }
}
