// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Per-operation request / response encodings

pub mod attestation;
pub mod coin_version;
pub mod firmware;
pub mod pin;
pub mod public_key;
pub mod sign;
pub mod trusted_input;
pub mod untrusted_hash;

/// P1 for the first APDU of a streamed operation
pub const P1_FIRST: u8 = 0x00;

/// P1 for subsequent APDUs of a streamed operation
pub const P1_NEXT: u8 = 0x80;

/// Split `data` into chunks of at most [crate::MAX_APDU_DATA] bytes
pub(crate) fn chunks(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    data.chunks(crate::MAX_APDU_DATA)
}
