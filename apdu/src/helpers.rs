// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Bitcoin compact-size (varint) helpers

use byteorder::{ByteOrder, LittleEndian};

use crate::ApduError;

/// Compute the encoded length of a compact-size integer
pub fn varint_len(v: u64) -> usize {
    match v {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Append a compact-size integer to the provided buffer
pub fn write_varint(buff: &mut Vec<u8>, v: u64) {
    match v {
        0..=0xfc => buff.push(v as u8),
        0xfd..=0xffff => {
            buff.push(0xfd);
            buff.extend_from_slice(&(v as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buff.push(0xfe);
            buff.extend_from_slice(&(v as u32).to_le_bytes());
        }
        _ => {
            buff.push(0xff);
            buff.extend_from_slice(&v.to_le_bytes());
        }
    }
}

/// Read a compact-size integer, returning the value and bytes consumed
pub fn read_varint(buff: &[u8]) -> Result<(u64, usize), ApduError> {
    let prefix = *buff.first().ok_or(ApduError::InvalidLength)?;

    let n = match prefix {
        0xfd => 3,
        0xfe => 5,
        0xff => 9,
        _ => return Ok((prefix as u64, 1)),
    };

    if buff.len() < n {
        return Err(ApduError::InvalidLength);
    }

    let v = match n {
        3 => LittleEndian::read_u16(&buff[1..]) as u64,
        5 => LittleEndian::read_u32(&buff[1..]) as u64,
        _ => LittleEndian::read_u64(&buff[1..]),
    };

    Ok((v, n))
}
