// Copyright (c) 2022-2023 The MobileCoin Foundation

use remote_dongle_apdu::{ops::coin_version::CoinVersionReq, Apdu, ApduResponse};

use super::{build, Operation, Step, TaskOutput};
use crate::Error;

/// Set the device address prefixes
#[derive(Clone, Debug, PartialEq)]
pub struct CoinVersionTask {
    req: CoinVersionReq,
}

impl CoinVersionTask {
    pub fn new(p2pkh_prefix: u8, p2sh_prefix: u8) -> Self {
        Self {
            req: CoinVersionReq::new(p2pkh_prefix, p2sh_prefix),
        }
    }
}

impl Operation for CoinVersionTask {
    fn main(&mut self) -> Option<Apdu> {
        build(&self.req)
    }

    fn did_receive(&mut self, resp: ApduResponse) -> Step {
        match resp.data.is_empty() {
            true => Step::Complete(Ok(TaskOutput::Unit)),
            false => Step::Complete(Err(Error::InvalidResponse)),
        }
    }
}
