// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::collections::VecDeque;

use remote_dongle_apdu::{Apdu, ApduError};

/// Pending APDUs for a streamed (multi-APDU) operation
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ApduStream {
    pending: VecDeque<Apdu>,
}

impl ApduStream {
    /// Load the stream, returning the first APDU
    pub fn start(&mut self, apdus: Result<Vec<Apdu>, ApduError>) -> Option<Apdu> {
        match apdus {
            Ok(a) => {
                self.pending = a.into();
                self.pending.pop_front()
            }
            Err(e) => {
                log::warn!("Unable to build APDU stream: {e}");
                None
            }
        }
    }

    /// Fetch the next pending APDU
    pub fn next(&mut self) -> Option<Apdu> {
        self.pending.pop_front()
    }
}
