// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::sync::Arc;

use remote_dongle_apdu::{
    ops::attestation::{AttestationReq, AttestationResp},
    Apdu, ApduResponse,
};

use super::{build, decode, Operation, Step, TaskOutput};
use crate::attestation::{verify_attestation, AttestationKeyProvider};

/// Challenge the device with a random nonce and verify its attestation
///
/// Failing verification is not an error, the result reports `authentic: false`.
pub struct AttestationTask {
    nonce: [u8; 8],
    keys: Arc<dyn AttestationKeyProvider>,
}

impl AttestationTask {
    /// Create a task with a random nonce
    pub fn new(keys: Arc<dyn AttestationKeyProvider>) -> Self {
        Self::with_nonce(keys, rand::random())
    }

    pub fn with_nonce(keys: Arc<dyn AttestationKeyProvider>, nonce: [u8; 8]) -> Self {
        Self { nonce, keys }
    }
}

impl std::fmt::Debug for AttestationTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationTask")
            .field("nonce", &hex::encode(self.nonce))
            .finish()
    }
}

impl Operation for AttestationTask {
    fn main(&mut self) -> Option<Apdu> {
        build(&AttestationReq::new(self.nonce))
    }

    fn did_receive(&mut self, resp: ApduResponse) -> Step {
        let r = decode::<AttestationResp>(&resp.data)
            .map(|a| verify_attestation(self.keys.as_ref(), &a, &self.nonce))
            .map(TaskOutput::Attestation);

        Step::Complete(r)
    }
}

#[cfg(test)]
mod test {
    use encdec::Encode;
    use k256::ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey};
    use sha2::{Digest, Sha256};

    use super::*;
    use crate::Error;

    struct BetaOnly(SigningKey);

    impl AttestationKeyProvider for BetaOnly {
        fn production_key(&self, _: u32, _: u32) -> Option<Vec<u8>> {
            None
        }

        fn beta_key(&self) -> Vec<u8> {
            self.0.verifying_key().to_sec1_bytes().to_vec()
        }
    }

    #[test]
    fn check_attestation() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let nonce = [1, 2, 3, 4, 5, 6, 7, 8];
        let mut t = AttestationTask::with_nonce(Arc::new(BetaOnly(key.clone())), nonce);

        let a = t.main().unwrap();
        assert_eq!(&a.to_bytes()[..5], &[0xe0, 0xc2, 0x00, 0x00, 0x08]);
        assert_eq!(&a.data, &nonce);

        let mut resp = AttestationResp {
            batch_id: 0,
            derivation_id: 1,
            version: [0x00, 0x00, 0x01, 0x04, 0x03, 0x00, 0x00, 0x00],
            signature: vec![],
        };
        let sig: Signature = key
            .sign_prehash(&Sha256::digest(resp.signed_data(&nonce)))
            .unwrap();
        resp.signature = sig.to_der().as_bytes().to_vec();

        let mut data = vec![0u8; resp.encode_len().unwrap()];
        resp.encode(&mut data).unwrap();

        let r = t.did_receive(ApduResponse::ok(data));
        let Step::Complete(Ok(TaskOutput::Attestation(a))) = r else {
            panic!("unexpected step: {r:?}");
        };
        assert!(a.authentic);
        assert!(a.beta);

        assert_eq!(
            t.did_receive(ApduResponse::ok(vec![0x00; 6])),
            Step::Complete(Err(Error::InvalidResponse))
        );
    }
}
