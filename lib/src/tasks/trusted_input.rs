// Copyright (c) 2022-2023 The MobileCoin Foundation

use remote_dongle_apdu::{
    ops::trusted_input::{trusted_input_apdus, TrustedInput},
    Apdu, ApduResponse,
};

use super::{decode, stream::ApduStream, Operation, Step, TaskOutput};

/// Stream a previous transaction to obtain a trusted input for one of its outputs
#[derive(Clone, Debug, PartialEq)]
pub struct TrustedInputTask {
    raw_tx: Vec<u8>,
    output_index: u32,
    stream: ApduStream,
}

impl TrustedInputTask {
    pub fn new(raw_tx: Vec<u8>, output_index: u32) -> Self {
        Self {
            raw_tx,
            output_index,
            stream: ApduStream::default(),
        }
    }
}

impl Operation for TrustedInputTask {
    fn main(&mut self) -> Option<Apdu> {
        self.stream
            .start(trusted_input_apdus(&self.raw_tx, self.output_index))
    }

    fn did_receive(&mut self, resp: ApduResponse) -> Step {
        if let Some(next) = self.stream.next() {
            return Step::Send(next);
        }

        Step::Complete(decode::<TrustedInput>(&resp.data).map(TaskOutput::TrustedInput))
    }
}
