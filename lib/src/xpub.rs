// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Extended public key assembly
//!
//! Builds a BIP32 extended public key from the device-reported account key
//! and its parent, the device only ever returns raw keys and chain codes.
//!
//! ## Encoding (78 bytes, Base58Check encoded)
//! ```text
//! +---------+-------+-------------+-------------+------------+----------------+
//! | VERSION | DEPTH | FINGERPRINT | CHILD INDEX | CHAIN CODE | COMPRESSED KEY |
//! |   (4)   |  (1)  |  (4, BE)    |   (4, BE)   |    (32)    |      (33)      |
//! +---------+-------+-------------+-------------+------------+----------------+
//! ```

use k256::{elliptic_curve::sec1::ToEncodedPoint, PublicKey};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use remote_dongle_apdu::{ops::public_key::PublicKeyResp, Bip32Path};

use crate::{CoinNetwork, Error};

/// Serialised extended public key length (without checksum)
pub const XPUB_LEN: usize = 78;

/// Compress a SEC1 public key (`0x02 / 0x03 ‖ X`)
pub fn compress_public_key(key: &[u8]) -> Result<[u8; 33], Error> {
    let k = PublicKey::from_sec1_bytes(key).map_err(|_| Error::InvalidResponse)?;
    let p = k.to_encoded_point(true);

    let mut b = [0u8; 33];
    b.copy_from_slice(p.as_bytes());
    Ok(b)
}

/// `RIPEMD160(SHA256(data))`
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let h = Ripemd160::digest(Sha256::digest(data));

    let mut b = [0u8; 20];
    b.copy_from_slice(&h);
    b
}

/// BIP32 extended public key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedPublicKey {
    pub version: u32,
    pub depth: u8,
    /// First 4 bytes of the parent key's HASH160
    pub fingerprint: u32,
    pub child_index: u32,
    pub chain_code: [u8; 32],
    /// Compressed public key
    pub public_key: [u8; 33],
}

impl ExtendedPublicKey {
    /// Assemble an extended key for `path` from the device responses for
    /// the path and its parent
    pub fn from_device_keys(
        network: &CoinNetwork,
        path: &Bip32Path,
        parent: &PublicKeyResp,
        child: &PublicKeyResp,
    ) -> Result<Self, Error> {
        let child_index = path.child_index().ok_or(Error::InvalidParameters)?;

        let parent_key = compress_public_key(&parent.public_key)?;
        let h = hash160(&parent_key);

        Ok(Self {
            version: network.xpub_version,
            depth: path.depth(),
            fingerprint: u32::from_be_bytes([h[0], h[1], h[2], h[3]]),
            child_index,
            chain_code: child.chain_code,
            public_key: compress_public_key(&child.public_key)?,
        })
    }

    /// Serialise to the 78-byte pre-checksum form
    pub fn to_bytes(&self) -> [u8; XPUB_LEN] {
        let mut b = [0u8; XPUB_LEN];

        b[0..4].copy_from_slice(&self.version.to_be_bytes());
        b[4] = self.depth;
        b[5..9].copy_from_slice(&self.fingerprint.to_be_bytes());
        b[9..13].copy_from_slice(&self.child_index.to_be_bytes());
        b[13..45].copy_from_slice(&self.chain_code);
        b[45..78].copy_from_slice(&self.public_key);

        b
    }

    /// Base58Check encoded key
    pub fn to_base58(&self) -> String {
        bs58::encode(self.to_bytes()).with_check().into_string()
    }
}

impl std::fmt::Display for ExtendedPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}
