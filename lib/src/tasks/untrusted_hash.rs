// Copyright (c) 2022-2023 The MobileCoin Foundation

use remote_dongle_apdu::{
    ops::{
        trusted_input::TrustedInput,
        untrusted_hash::{finalize_full_apdus, start_untrusted_hash_apdus, FinalizeResp},
    },
    tx::TxOutput,
    Apdu, ApduResponse, Bip32Path,
};

use super::{decode, stream::ApduStream, Operation, Step, TaskOutput};
use crate::Error;

/// Stream the untrusted transaction header and trusted input records
#[derive(Clone, Debug, PartialEq)]
pub struct StartUntrustedHashTask {
    trusted_inputs: Vec<TrustedInput>,
    trusted_input_index: usize,
    output_script: Vec<u8>,
    stream: ApduStream,
}

impl StartUntrustedHashTask {
    /// Create a task signing the input at `trusted_input_index` with `output_script`
    pub fn new(
        trusted_inputs: Vec<TrustedInput>,
        trusted_input_index: usize,
        output_script: Vec<u8>,
    ) -> Self {
        Self {
            trusted_inputs,
            trusted_input_index,
            output_script,
            stream: ApduStream::default(),
        }
    }
}

impl Operation for StartUntrustedHashTask {
    fn main(&mut self) -> Option<Apdu> {
        self.stream.start(start_untrusted_hash_apdus(
            &self.trusted_inputs,
            self.trusted_input_index,
            &self.output_script,
        ))
    }

    fn did_receive(&mut self, _resp: ApduResponse) -> Step {
        match self.stream.next() {
            Some(next) => Step::Send(next),
            None => Step::Complete(Ok(TaskOutput::Unit)),
        }
    }
}

/// Stream the change path and spending outputs, then check the device flags
#[derive(Clone, Debug, PartialEq)]
pub struct FinalizeFullTask {
    outputs: Vec<TxOutput>,
    change_path: Option<Bip32Path>,
    stream: ApduStream,
}

impl FinalizeFullTask {
    pub fn new(outputs: Vec<TxOutput>, change_path: Option<Bip32Path>) -> Self {
        Self {
            outputs,
            change_path,
            stream: ApduStream::default(),
        }
    }
}

impl Operation for FinalizeFullTask {
    fn main(&mut self) -> Option<Apdu> {
        self.stream
            .start(finalize_full_apdus(&self.outputs, self.change_path.as_ref()))
    }

    fn did_receive(&mut self, resp: ApduResponse) -> Step {
        if let Some(next) = self.stream.next() {
            return Step::Send(next);
        }

        let r = decode::<FinalizeResp>(&resp.data).and_then(|f| match f.is_ok() {
            true => Ok(TaskOutput::Unit),
            false => Err(Error::InvalidResponse),
        });

        Step::Complete(r)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn drain<O: Operation>(t: &mut O) -> usize {
        let mut n = 0;
        while let Step::Send(_) = t.did_receive(ApduResponse::ok(vec![])) {
            n += 1;
        }
        n
    }

    #[test]
    fn start_untrusted_hash() {
        let inputs = vec![TrustedInput([0x11; 56]), TrustedInput([0x22; 56])];
        let mut t = StartUntrustedHashTask::new(inputs, 1, vec![0x76, 0xa9]);

        let first = t.main().unwrap();
        assert_eq!(first.data, vec![0x01, 0x00, 0x00, 0x00, 0x02]);

        // One record per input
        let mut rest = 0;
        loop {
            match t.did_receive(ApduResponse::ok(vec![])) {
                Step::Send(a) => {
                    assert_eq!(a.p1, 0x80);
                    rest += 1;
                }
                Step::Complete(r) => {
                    assert_eq!(r, Ok(TaskOutput::Unit));
                    break;
                }
            }
        }
        assert_eq!(rest, 2);

        let mut t = StartUntrustedHashTask::new(vec![], 0, vec![]);
        assert_eq!(t.main(), None);
    }

    #[test]
    fn finalize_full() {
        let outputs = vec![TxOutput::new(10_000, vec![0x76, 0xa9, 0x14])];
        let mut t = FinalizeFullTask::new(outputs.clone(), None);

        let first = t.main().unwrap();
        assert_eq!((first.p1, first.data.as_slice()), (0xff, &[0x00][..]));

        // Count, output header, output script
        assert_eq!(drain(&mut t), 3);

        let mut t = FinalizeFullTask::new(outputs.clone(), None);
        t.main().unwrap();
        for _ in 0..3 {
            t.did_receive(ApduResponse::ok(vec![]));
        }
        assert_eq!(
            t.did_receive(ApduResponse::ok(vec![0x00, 0x00])),
            Step::Complete(Ok(TaskOutput::Unit))
        );

        let mut t = FinalizeFullTask::new(outputs, None);
        t.main().unwrap();
        for _ in 0..3 {
            t.did_receive(ApduResponse::ok(vec![]));
        }
        assert_eq!(
            t.did_receive(ApduResponse::ok(vec![0x00, 0x01])),
            Step::Complete(Err(Error::InvalidResponse))
        );
    }
}
