// Copyright (c) 2022-2023 The MobileCoin Foundation

use remote_dongle_apdu::{
    ops::public_key::{PublicKeyReq, PublicKeyResp},
    Apdu, ApduResponse, Bip32Path,
};

use super::{build, decode, Operation, Step, TaskOutput};

/// Derive the public key, address and chain code for a BIP32 path
#[derive(Clone, Debug, PartialEq)]
pub struct PublicKeyTask {
    req: PublicKeyReq,
}

impl PublicKeyTask {
    pub fn new(path: Bip32Path) -> Self {
        Self {
            req: PublicKeyReq::new(path),
        }
    }
}

impl Operation for PublicKeyTask {
    fn main(&mut self) -> Option<Apdu> {
        build(&self.req)
    }

    fn did_receive(&mut self, resp: ApduResponse) -> Step {
        Step::Complete(decode::<PublicKeyResp>(&resp.data).map(TaskOutput::PublicKey))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;

    #[test]
    fn public_key() {
        let path: Bip32Path = "m/44'/0'/0'".parse().unwrap();
        let mut t = PublicKeyTask::new(path);

        let a = t.main().unwrap();
        assert_eq!(&a.to_bytes()[..6], &[0xe0, 0x40, 0x00, 0x00, 13, 3]);

        let mut data = vec![65, 0x04];
        data.extend_from_slice(&[0xaa; 64]);
        data.push(3);
        data.extend_from_slice(b"1ab");
        data.extend_from_slice(&[0xcc; 32]);

        let r = t.did_receive(ApduResponse::ok(data));
        let Step::Complete(Ok(TaskOutput::PublicKey(k))) = r else {
            panic!("unexpected step: {r:?}");
        };
        assert_eq!(k.public_key.len(), 65);
        assert_eq!(k.address, "1ab");
        assert_eq!(k.chain_code, [0xcc; 32]);

        assert_eq!(
            t.did_receive(ApduResponse::ok(vec![65, 0x04])),
            Step::Complete(Err(Error::InvalidResponse))
        );
    }
}
