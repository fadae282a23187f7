// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Response status words

use strum::Display;

/// Raw two-byte status word (`SW1 ‖ SW2`)
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub const SUCCESS: StatusWord = StatusWord(0x9000);
    pub const INVALID_LENGTH: StatusWord = StatusWord(0x6700);
    pub const INVALID_ACCESS_RIGHTS: StatusWord = StatusWord(0x6982);
    pub const INVALID_REQUEST: StatusWord = StatusWord(0x6a80);
    pub const FILE_NOT_FOUND: StatusWord = StatusWord(0x6a82);
    pub const INVALID_PARAMETERS: StatusWord = StatusWord(0x6b00);
    pub const NOT_IMPLEMENTED: StatusWord = StatusWord(0x6d00);

    /// Wrong PIN status with the remaining attempt count in the low nibble
    pub fn wrong_pin(remaining: u8) -> Self {
        StatusWord(0x63c0 | (remaining & 0x0f) as u16)
    }
}

impl From<u16> for StatusWord {
    fn from(v: u16) -> Self {
        StatusWord(v)
    }
}

impl std::fmt::Display for StatusWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Decoded status word
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
pub enum Status {
    Success,
    /// `0x63Cx`, low nibble holds the remaining PIN attempts
    WrongPin { remaining: u8 },
    InvalidLength,
    InvalidAccessRights,
    InvalidRequest,
    FileNotFound,
    InvalidParameters,
    NotImplemented,
    /// `0x6Fxx`, low byte holds the device-specific cause
    TechnicalProblem(u8),
    Unknown(u16),
}

impl From<StatusWord> for Status {
    fn from(sw: StatusWord) -> Self {
        match sw.0 {
            0x9000 => Status::Success,
            0x6700 => Status::InvalidLength,
            0x6982 => Status::InvalidAccessRights,
            0x6a80 => Status::InvalidRequest,
            0x6a82 => Status::FileNotFound,
            0x6b00 => Status::InvalidParameters,
            0x6d00 => Status::NotImplemented,
            v if v & 0xfff0 == 0x63c0 => Status::WrongPin {
                remaining: (v & 0x0f) as u8,
            },
            v if v & 0xff00 == 0x6f00 => Status::TechnicalProblem((v & 0xff) as u8),
            v => Status::Unknown(v),
        }
    }
}

impl Status {
    /// Check whether the status indicates success
    pub fn is_success(&self) -> bool {
        *self == Status::Success
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_status_words() {
        let tests = &[
            (0x9000, Status::Success),
            (0x6700, Status::InvalidLength),
            (0x6982, Status::InvalidAccessRights),
            (0x6a80, Status::InvalidRequest),
            (0x6a82, Status::FileNotFound),
            (0x6b00, Status::InvalidParameters),
            (0x6d00, Status::NotImplemented),
            (0x63c3, Status::WrongPin { remaining: 3 }),
            (0x63c0, Status::WrongPin { remaining: 0 }),
            (0x6f42, Status::TechnicalProblem(0x42)),
            (0x6e00, Status::Unknown(0x6e00)),
            (0x6985, Status::Unknown(0x6985)),
        ];

        for (sw, expected) in tests {
            assert_eq!(Status::from(StatusWord(*sw)), *expected, "sw: {sw:04x}");
        }
    }

    #[test]
    fn wrong_pin_helper() {
        assert_eq!(StatusWord::wrong_pin(2), StatusWord(0x63c2));
    }
}
