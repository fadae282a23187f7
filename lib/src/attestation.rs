// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device attestation
//!
//! On connection the host sends a random nonce, the device replies with its
//! batch / derivation identifiers, firmware version blob and a secp256k1 ECDSA
//! signature over `SHA256(version ‖ nonce)`. Signatures are checked against the
//! production key for the reported identifiers first, then the beta key.

use k256::ecdsa::{signature::hazmat::PrehashVerifier, Signature, VerifyingKey};
use log::{debug, warn};
use sha2::{Digest, Sha256};

use remote_dongle_apdu::ops::attestation::AttestationResp;

/// Provider for attestation public keys (SEC1 encoded)
pub trait AttestationKeyProvider: Send + Sync {
    /// Fetch the production key for the provided batch / derivation identifiers
    fn production_key(&self, batch_id: u32, derivation_id: u32) -> Option<Vec<u8>>;

    /// Fetch the beta key
    fn beta_key(&self) -> Vec<u8>;
}

/// Known attestation keys
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct LedgerAttestationKeys;

const BETA_KEY: &str = "04e69fd3c044865200e66f124b5ea237c918503931bee070edfcab79a00a25d6b5a09afbee902b4b763ecf1f9c25f82d6b0cf72bce3faf98523a1066948f1a395f";

/// Production keys by (batch id, derivation id)
const PRODUCTION_KEYS: &[(u32, u32, &str)] = &[
    (1, 1, "04223314cdffec8740150afe46db3575fae840362b137316c0d222a071607d61b2fd40abb2652a7fea20e3bb3e64dc6d495d59823d143c53c4fe4059c5ff16e406"),
    (2, 1, "04c370d4013107a98dfef01d6db5bb3419deb9299535f0be47f05939a78b314a3c29b51fcaa9b3d46fa382c995456af50cd57fb017c0ce05e4a31864a79b8fbfd6"),
];

impl AttestationKeyProvider for LedgerAttestationKeys {
    fn production_key(&self, batch_id: u32, derivation_id: u32) -> Option<Vec<u8>> {
        PRODUCTION_KEYS
            .iter()
            .find(|(b, d, _)| *b == batch_id && *d == derivation_id)
            .and_then(|(_, _, k)| hex::decode(k).ok())
    }

    fn beta_key(&self) -> Vec<u8> {
        hex::decode(BETA_KEY).unwrap_or_default()
    }
}

/// Attestation check result
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attestation {
    /// Signature verified against a known key
    pub authentic: bool,
    /// Verification fell back to the beta key
    pub beta: bool,
    pub batch_id: u32,
    pub derivation_id: u32,
    /// Firmware version blob reported with the attestation
    pub version: [u8; 8],
}

/// Verify an attestation response for the provided nonce
pub fn verify_attestation(
    keys: &dyn AttestationKeyProvider,
    resp: &AttestationResp,
    nonce: &[u8; 8],
) -> Attestation {
    let digest = Sha256::digest(resp.signed_data(nonce));
    let signature = resp.der_signature();

    let mut a = Attestation {
        authentic: false,
        beta: false,
        batch_id: resp.batch_id,
        derivation_id: resp.derivation_id,
        version: resp.version,
    };

    if let Some(k) = keys.production_key(resp.batch_id, resp.derivation_id) {
        if verify_signature(&k, &digest, &signature) {
            a.authentic = true;
            return a;
        }
    }

    debug!(
        "No production match for batch {} derivation {}, trying beta key",
        resp.batch_id, resp.derivation_id
    );

    a.beta = true;
    a.authentic = verify_signature(&keys.beta_key(), &digest, &signature);
    a
}

/// Check a DER signature over a SHA256 digest
fn verify_signature(key: &[u8], digest: &[u8], der: &[u8]) -> bool {
    let key = match VerifyingKey::from_sec1_bytes(key) {
        Ok(k) => k,
        Err(e) => {
            warn!("Invalid attestation key: {e}");
            return false;
        }
    };

    let sig = match Signature::from_der(der) {
        Ok(s) => s,
        Err(e) => {
            warn!("Invalid attestation signature: {e}");
            return false;
        }
    };

    // Devices may produce high-S signatures
    let sig = sig.normalize_s().unwrap_or(sig);

    key.verify_prehash(digest, &sig).is_ok()
}

#[cfg(test)]
mod test {
    use k256::ecdsa::{signature::hazmat::PrehashSigner, SigningKey};

    use super::*;

    struct TestKeys {
        production: SigningKey,
        beta: SigningKey,
    }

    impl AttestationKeyProvider for TestKeys {
        fn production_key(&self, batch_id: u32, derivation_id: u32) -> Option<Vec<u8>> {
            match (batch_id, derivation_id) {
                (1, 1) => Some(self.production.verifying_key().to_sec1_bytes().to_vec()),
                _ => None,
            }
        }

        fn beta_key(&self) -> Vec<u8> {
            self.beta.verifying_key().to_sec1_bytes().to_vec()
        }
    }

    fn sign(key: &SigningKey, batch_id: u32, nonce: &[u8; 8], quirk: bool) -> AttestationResp {
        let mut resp = AttestationResp {
            batch_id,
            derivation_id: 1,
            version: [0x00, 0x00, 0x01, 0x04, 0x03, 0x00, 0x00, 0x00],
            signature: vec![],
        };

        let digest = Sha256::digest(resp.signed_data(nonce));
        let sig: Signature = key.sign_prehash(&digest).unwrap();

        resp.signature = sig.to_der().as_bytes().to_vec();
        if quirk {
            resp.signature[0] = 0x31;
        }

        resp
    }

    fn keys() -> TestKeys {
        TestKeys {
            production: SigningKey::random(&mut rand::thread_rng()),
            beta: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    #[test]
    fn production_attestation() {
        let k = keys();
        let nonce = rand::random();

        let a = verify_attestation(&k, &sign(&k.production, 1, &nonce, false), &nonce);
        assert!(a.authentic);
        assert!(!a.beta);

        // Tag quirk is normalised
        let a = verify_attestation(&k, &sign(&k.production, 1, &nonce, true), &nonce);
        assert!(a.authentic);
    }

    #[test]
    fn beta_fallback() {
        let k = keys();
        let nonce = rand::random();

        let a = verify_attestation(&k, &sign(&k.beta, 7, &nonce, false), &nonce);
        assert!(a.authentic);
        assert!(a.beta);
    }

    #[test]
    fn unknown_signer() {
        let k = keys();
        let nonce = rand::random();
        let other = SigningKey::random(&mut rand::thread_rng());

        let a = verify_attestation(&k, &sign(&other, 1, &nonce, false), &nonce);
        assert!(!a.authentic);

        // Wrong nonce
        let a = verify_attestation(&k, &sign(&k.production, 1, &nonce, false), &[0xff; 8]);
        assert!(!a.authentic);
    }

    #[test]
    fn builtin_keys_parse() {
        let k = LedgerAttestationKeys;

        assert!(VerifyingKey::from_sec1_bytes(&k.beta_key()).is_ok());
        for (b, d, _) in PRODUCTION_KEYS {
            let key = k.production_key(*b, *d).unwrap();
            assert!(VerifyingKey::from_sec1_bytes(&key).is_ok());
        }
        assert_eq!(k.production_key(0, 1), None);
    }
}
