// Copyright (c) 2022-2023 The MobileCoin Foundation

use remote_dongle_apdu::{
    ops::firmware::{FirmwareVersion, FirmwareVersionReq},
    Apdu, ApduResponse,
};

use super::{build, decode, Operation, Step, TaskOutput};

/// Fetch the device firmware version
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FirmwareVersionTask;

impl Operation for FirmwareVersionTask {
    fn main(&mut self) -> Option<Apdu> {
        build(&FirmwareVersionReq)
    }

    fn did_receive(&mut self, resp: ApduResponse) -> Step {
        Step::Complete(decode::<FirmwareVersion>(&resp.data).map(TaskOutput::FirmwareVersion))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;

    #[test]
    fn firmware_version() {
        let mut t = FirmwareVersionTask;

        let a = t.main().unwrap();
        assert_eq!(a.to_bytes(), vec![0xe0, 0xc4, 0x00, 0x00, 0x08]);

        let r = t.did_receive(ApduResponse::ok(vec![0x00, 0x00, 0x01, 0x04, 0x03, 0x01, 0x02, 0x00]));
        let Step::Complete(Ok(TaskOutput::FirmwareVersion(v))) = r else {
            panic!("unexpected step: {r:?}");
        };
        assert_eq!((v.major, v.minor, v.patch), (1, 4, 3));

        assert_eq!(
            t.did_receive(ApduResponse::ok(vec![0x00; 4])),
            Step::Complete(Err(Error::InvalidResponse))
        );
    }
}
