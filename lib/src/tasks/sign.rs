// Copyright (c) 2022-2023 The MobileCoin Foundation

use remote_dongle_apdu::{
    ops::sign::{SignHashReq, SignatureResp, SIGHASH_ALL},
    Apdu, ApduResponse, Bip32Path,
};

use super::{build, decode, Operation, Step, TaskOutput};
use crate::Error;

/// Sign the untrusted transaction hash with the key at the input address path
#[derive(Clone, Debug, PartialEq)]
pub struct SignHashTask {
    req: SignHashReq,
}

impl SignHashTask {
    pub fn new(path: Bip32Path) -> Self {
        Self {
            req: SignHashReq::new(path),
        }
    }
}

impl Operation for SignHashTask {
    fn main(&mut self) -> Option<Apdu> {
        build(&self.req)
    }

    fn did_receive(&mut self, resp: ApduResponse) -> Step {
        let r = decode::<SignatureResp>(&resp.data).and_then(|s| match s.sighash {
            SIGHASH_ALL => Ok(TaskOutput::Signature(s.signature)),
            _ => Err(Error::InvalidResponse),
        });

        Step::Complete(r)
    }
}
