// Copyright (c) 2022-2023 The MobileCoin Foundation

use remote_dongle_apdu::{ops::pin::VerifyPinReq, Apdu, ApduResponse, Status};

use super::{build, Operation, Step, TaskOutput};
use crate::Error;

/// PIN verification outcome
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PinStatus {
    pub verified: bool,
    /// Remaining attempts, only reported on a wrong PIN
    pub remaining_attempts: u8,
}

/// Present (or query) the device PIN
///
/// A wrong PIN is not an error, it completes with the remaining attempt count.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifyPinTask {
    req: VerifyPinReq,
}

impl VerifyPinTask {
    pub fn new(pin: Option<&str>) -> Self {
        Self {
            req: VerifyPinReq::new(pin),
        }
    }
}

impl Operation for VerifyPinTask {
    fn main(&mut self) -> Option<Apdu> {
        build(&self.req)
    }

    fn did_receive(&mut self, resp: ApduResponse) -> Step {
        let r = match resp.status() {
            Status::WrongPin { remaining } => Ok(PinStatus {
                verified: false,
                remaining_attempts: remaining,
            }),
            Status::Success if !resp.data.is_empty() => Ok(PinStatus {
                verified: true,
                remaining_attempts: 0,
            }),
            _ => Err(Error::InvalidResponse),
        };

        Step::Complete(r.map(TaskOutput::Pin))
    }

    fn accepts_status(&self, status: &Status) -> bool {
        matches!(status, Status::WrongPin { .. })
    }
}

#[cfg(test)]
mod test {
    use remote_dongle_apdu::StatusWord;

    use super::*;

    #[test]
    fn verify_pin_request() {
        let mut t = VerifyPinTask::new(Some("1234"));
        assert_eq!(
            t.main().unwrap().to_bytes(),
            vec![0xe0, 0x22, 0x00, 0x00, 0x04, b'1', b'2', b'3', b'4']
        );

        let mut t = VerifyPinTask::new(None);
        assert_eq!(
            t.main().unwrap().to_bytes(),
            vec![0xe0, 0x22, 0x00, 0x00, 0x01, 0x00]
        );
    }

    #[test]
    fn wrong_pin_reports_remaining_attempts() {
        let mut t = VerifyPinTask::new(Some("0000"));
        let resp = ApduResponse::parse(&[0x63, 0xc3]).unwrap();

        assert!(t.accepts_status(&resp.status()));
        assert_eq!(
            t.did_receive(resp),
            Step::Complete(Ok(TaskOutput::Pin(PinStatus {
                verified: false,
                remaining_attempts: 3
            })))
        );
    }

    #[test]
    fn verified_pin() {
        let mut t = VerifyPinTask::new(Some("1234"));

        assert_eq!(
            t.did_receive(ApduResponse::ok(vec![0x01])),
            Step::Complete(Ok(TaskOutput::Pin(PinStatus {
                verified: true,
                remaining_attempts: 0
            })))
        );

        // Success without data is malformed
        assert_eq!(
            t.did_receive(ApduResponse::new(vec![], StatusWord::SUCCESS)),
            Step::Complete(Err(Error::InvalidResponse))
        );
    }
}
