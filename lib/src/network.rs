// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Coin network parameters

use remote_dongle_apdu::Bip32Path;

use crate::Error;

/// Coin network parameters used for key derivation and address prefixes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CoinNetwork {
    pub name: &'static str,
    /// BIP44 coin type index (unhardened)
    pub bip44_index: u32,
    /// Extended public key version bytes
    pub xpub_version: u32,
    /// Pay-to-pubkey-hash address prefix
    pub p2pkh_prefix: u8,
    /// Pay-to-script-hash address prefix
    pub p2sh_prefix: u8,
}

impl CoinNetwork {
    pub const BITCOIN: CoinNetwork = CoinNetwork {
        name: "bitcoin",
        bip44_index: 0,
        xpub_version: 0x0488_b21e,
        p2pkh_prefix: 0x00,
        p2sh_prefix: 0x05,
    };

    pub const BITCOIN_TESTNET: CoinNetwork = CoinNetwork {
        name: "bitcoin-testnet",
        bip44_index: 1,
        xpub_version: 0x0435_87cf,
        p2pkh_prefix: 0x6f,
        p2sh_prefix: 0xc4,
    };

    /// `m/44'/coin'`
    pub fn coin_path(&self) -> Result<Bip32Path, Error> {
        Bip32Path::bip44_coin(self.bip44_index).map_err(|_| Error::InvalidParameters)
    }

    /// `m/44'/coin'/account'`, accounts must be below `2^31`
    pub fn account_path(&self, account: u32) -> Result<Bip32Path, Error> {
        Bip32Path::bip44_account(self.bip44_index, account).map_err(|_| Error::InvalidParameters)
    }
}

impl Default for CoinNetwork {
    fn default() -> Self {
        Self::BITCOIN
    }
}

impl std::fmt::Display for CoinNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bitcoin_paths() {
        let n = CoinNetwork::BITCOIN;

        assert_eq!(n.coin_path().unwrap().to_string(), "m/44'/0'");
        assert_eq!(n.account_path(3).unwrap().to_string(), "m/44'/0'/3'");
        assert_eq!(n.account_path(3).unwrap().parent(), n.coin_path().ok());
    }

    #[test]
    fn account_index_range() {
        let n = CoinNetwork::BITCOIN_TESTNET;

        assert_eq!(
            n.account_path(0x7fff_ffff).unwrap().to_string(),
            "m/44'/1'/2147483647'"
        );
        assert_eq!(n.account_path(0x8000_0000), Err(Error::InvalidParameters));
        assert_eq!(n.account_path(u32::MAX), Err(Error::InvalidParameters));
    }
}
