// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Command and response APDU containers
//!
//! ## Command encoding
//!
//! ```text
//! +-------+-------+-------+-------+-------+---------------------+
//! |  CLA  |  INS  |  P1   |  P2   |  LC   |   DATA (LC bytes)   |
//! +-------+-------+-------+-------+-------+---------------------+
//! ```
//!
//! Requests without data carry a single expected-length byte (LE) in place of
//! `LC ‖ DATA`.
//!
//! ## Response encoding
//!
//! ```text
//! +---------------------------+-------+-------+
//! |       DATA (N bytes)      |  SW1  |  SW2  |
//! +---------------------------+-------+-------+
//! ```

use encdec::Encode;

use crate::{ApduError, ApduStatic, Status, StatusWord, MAX_APDU_DATA};

/// Command APDU
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Apdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    /// Request data (at most [MAX_APDU_DATA] bytes)
    pub data: Vec<u8>,
    /// Expected response length, only encoded when `data` is empty
    pub le: u8,
}

impl Apdu {
    /// Create a new command APDU, checking the data length
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Result<Self, ApduError> {
        if data.len() > MAX_APDU_DATA {
            return Err(ApduError::DataTooLong(data.len()));
        }

        Ok(Self {
            cla,
            ins,
            p1,
            p2,
            data,
            le: 0,
        })
    }

    /// Build a command APDU from a request object
    pub fn from_req<R>(req: &R) -> Result<Self, ApduError>
    where
        R: ApduStatic + Encode<Error = ApduError>,
    {
        let n = req.encode_len()?;
        let mut data = vec![0u8; n];
        let n = req.encode(&mut data)?;
        data.truncate(n);

        let mut apdu = Self::new(R::CLA, R::INS, req.p1(), req.p2(), data)?;
        if let Some(le) = req.le() {
            apdu.le = le;
        }

        Ok(apdu)
    }

    /// Encode the APDU for transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buff = Vec::with_capacity(5 + self.data.len());

        buff.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);

        match self.data.is_empty() {
            true => buff.push(self.le),
            false => {
                buff.push(self.data.len() as u8);
                buff.extend_from_slice(&self.data);
            }
        }

        buff
    }

    /// Parse an encoded command APDU
    pub fn parse(buff: &[u8]) -> Result<Self, ApduError> {
        if buff.len() < 4 {
            return Err(ApduError::InvalidLength);
        }

        let (cla, ins, p1, p2) = (buff[0], buff[1], buff[2], buff[3]);

        match buff.len() {
            4 => Self::new(cla, ins, p1, p2, vec![]),
            5 => Ok(Self {
                le: buff[4],
                ..Self::new(cla, ins, p1, p2, vec![])?
            }),
            _ => {
                let lc = buff[4] as usize;
                if buff.len() != 5 + lc {
                    return Err(ApduError::InvalidLength);
                }
                Self::new(cla, ins, p1, p2, buff[5..].to_vec())
            }
        }
    }
}

/// Response APDU
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ApduResponse {
    /// Response data (status word removed)
    pub data: Vec<u8>,
    /// Trailing status word
    pub status: StatusWord,
}

impl ApduResponse {
    /// Create a response with the provided data and status
    pub fn new(data: Vec<u8>, status: impl Into<StatusWord>) -> Self {
        Self {
            data,
            status: status.into(),
        }
    }

    /// Create a successful (`0x9000`) response
    pub fn ok(data: Vec<u8>) -> Self {
        Self::new(data, StatusWord::SUCCESS)
    }

    /// Parse a response, splitting off the trailing status word
    pub fn parse(buff: &[u8]) -> Result<Self, ApduError> {
        if buff.len() < 2 {
            return Err(ApduError::InvalidLength);
        }

        let (data, sw) = buff.split_at(buff.len() - 2);

        Ok(Self {
            data: data.to_vec(),
            status: StatusWord(u16::from_be_bytes([sw[0], sw[1]])),
        })
    }

    /// Encode the response for transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buff = self.data.clone();
        buff.extend_from_slice(&self.status.0.to_be_bytes());
        buff
    }

    /// Decode the response status word
    pub fn status(&self) -> Status {
        Status::from(self.status)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_with_data() {
        let apdu = Apdu::new(0xe0, 0x22, 0x00, 0x00, b"1234".to_vec()).unwrap();
        let b = apdu.to_bytes();

        assert_eq!(b, [0xe0, 0x22, 0x00, 0x00, 0x04, b'1', b'2', b'3', b'4']);
        assert_eq!(Apdu::parse(&b), Ok(apdu));
    }

    #[test]
    fn command_without_data_carries_le() {
        let mut apdu = Apdu::new(0xe0, 0xc4, 0x00, 0x00, vec![]).unwrap();
        apdu.le = 8;

        let b = apdu.to_bytes();
        assert_eq!(b, [0xe0, 0xc4, 0x00, 0x00, 0x08]);
        assert_eq!(Apdu::parse(&b), Ok(apdu));
    }

    #[test]
    fn command_data_limit() {
        assert!(Apdu::new(0xe0, 0x42, 0, 0, vec![0u8; 255]).is_ok());
        assert_eq!(
            Apdu::new(0xe0, 0x42, 0, 0, vec![0u8; 256]),
            Err(ApduError::DataTooLong(256))
        );
    }

    #[test]
    fn response_split() {
        let r = ApduResponse::parse(&[0x01, 0x02, 0x63, 0xc3]).unwrap();

        assert_eq!(r.data, [0x01, 0x02]);
        assert_eq!(r.status(), Status::WrongPin { remaining: 3 });
        assert_eq!(r.to_bytes(), [0x01, 0x02, 0x63, 0xc3]);

        assert_eq!(ApduResponse::parse(&[0x90]), Err(ApduError::InvalidLength));
    }
}
