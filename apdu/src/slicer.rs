// Copyright (c) 2022-2023 The MobileCoin Foundation

//! APDU slicing for MTU-limited transports
//!
//! ## Bluetooth slice framing
//!
//! ```text
//! Slice 0:
//! +-------+---------------+---------------+---------------------+
//! |  TAG  |  INDEX (BE)   |  LENGTH (BE)  |      PAYLOAD...     |
//! | 0x05  |    2 bytes    |    2 bytes    |                     |
//! +-------+---------------+---------------+---------------------+
//!
//! Slice N > 0:
//! +-------+---------------+-------------------------------------+
//! |  TAG  |  INDEX (BE)   |              PAYLOAD...             |
//! +-------+---------------+-------------------------------------+
//! ```
//!
//! `LENGTH` is the total reassembled APDU length, reassembly completes once the
//! concatenated payloads of contiguous slices reach it.

/// Bluetooth APDU slice tag
pub const SLICE_TAG: u8 = 0x05;

/// Maximum reassembled APDU length
pub const MAX_APDU_LEN: usize = u16::MAX as usize;

/// A single transport slice (raw bytes including framing header)
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ApduSlice {
    pub index: u16,
    pub data: Vec<u8>,
}

/// Transport-specific APDU slicing
pub trait ApduSlicer {
    /// Split an encoded APDU into slices of at most `max_len` bytes,
    /// returning an empty list if the APDU cannot be sliced
    fn slice_apdu(&self, apdu: &[u8], max_len: usize) -> Vec<ApduSlice>;

    /// Parse a raw slice, returning `None` if malformed
    fn slice_from_data(&self, data: &[u8]) -> Option<ApduSlice>;

    /// Join accumulated slices, returning the APDU once complete
    fn join_slices(&self, slices: &[ApduSlice]) -> Option<Vec<u8>>;
}

/// Slicer for the Bluetooth GATT transport
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct BluetoothSlicer;

impl BluetoothSlicer {
    fn header_len(index: u16) -> usize {
        match index {
            0 => 5,
            _ => 3,
        }
    }

    fn payload(slice: &ApduSlice) -> Option<&[u8]> {
        let n = Self::header_len(slice.index);
        match slice.data.len() > n {
            true => Some(&slice.data[n..]),
            false => None,
        }
    }
}

impl ApduSlicer for BluetoothSlicer {
    fn slice_apdu(&self, apdu: &[u8], max_len: usize) -> Vec<ApduSlice> {
        if apdu.is_empty() || apdu.len() > MAX_APDU_LEN || max_len <= Self::header_len(0) {
            return vec![];
        }

        let mut slices = vec![];
        let mut offset = 0;

        while offset < apdu.len() {
            let index = slices.len() as u16;

            let mut data = Vec::with_capacity(max_len);
            data.push(SLICE_TAG);
            data.extend_from_slice(&index.to_be_bytes());
            if index == 0 {
                data.extend_from_slice(&(apdu.len() as u16).to_be_bytes());
            }

            let n = (max_len - data.len()).min(apdu.len() - offset);
            data.extend_from_slice(&apdu[offset..][..n]);
            offset += n;

            slices.push(ApduSlice { index, data });
        }

        slices
    }

    fn slice_from_data(&self, data: &[u8]) -> Option<ApduSlice> {
        if data.len() <= Self::header_len(1) || data[0] != SLICE_TAG {
            return None;
        }

        let index = u16::from_be_bytes([data[1], data[2]]);

        Some(ApduSlice {
            index,
            data: data.to_vec(),
        })
    }

    fn join_slices(&self, slices: &[ApduSlice]) -> Option<Vec<u8>> {
        let mut sorted: Vec<&ApduSlice> = slices.iter().collect();
        sorted.sort_by_key(|s| s.index);

        // Slices must be contiguous from zero
        if sorted.is_empty() || sorted.iter().enumerate().any(|(i, s)| s.index as usize != i) {
            return None;
        }

        // First slice declares the total length
        let first = sorted[0];
        if first.data.len() < Self::header_len(0) {
            return None;
        }
        let total = u16::from_be_bytes([first.data[3], first.data[4]]) as usize;
        if total == 0 {
            return None;
        }

        let mut apdu = Vec::with_capacity(total);
        for s in sorted {
            apdu.extend_from_slice(Self::payload(s)?);
        }

        match apdu.len() == total {
            true => Some(apdu),
            false => None,
        }
    }
}

#[cfg(test)]
mod test {
    use rand::{random, Rng};

    use super::*;

    #[test]
    fn slice_45_bytes_at_20() {
        let apdu: Vec<u8> = (0..45).collect();
        let slices = BluetoothSlicer.slice_apdu(&apdu, 20);

        assert_eq!(slices.len(), 3);
        assert_eq!(&slices[0].data[..5], &[0x05, 0x00, 0x00, 0x00, 45]);
        assert_eq!(&slices[1].data[..3], &[0x05, 0x00, 0x01]);
        assert_eq!(&slices[2].data[..3], &[0x05, 0x00, 0x02]);

        assert_eq!(slices[0].data.len(), 20);
        assert_eq!(slices[1].data.len(), 20);
        assert_eq!(slices[2].data.len(), 3 + 13);

        assert_eq!(BluetoothSlicer.join_slices(&slices), Some(apdu));
    }

    #[test]
    fn slice_join_roundtrip() {
        let mut rng = rand::thread_rng();

        for _ in 0..200 {
            let len = rng.gen_range(1..=2048);
            let max_len = rng.gen_range(6..=300);
            let apdu: Vec<u8> = (0..len).map(|_| random()).collect();

            let slices = BluetoothSlicer.slice_apdu(&apdu, max_len);
            assert!(slices.iter().all(|s| s.data.len() <= max_len));

            assert_eq!(
                BluetoothSlicer.join_slices(&slices).as_ref(),
                Some(&apdu),
                "len: {len} max_len: {max_len}"
            );
        }
    }

    #[test]
    fn join_requires_all_slices() {
        let apdu = vec![0xaa; 64];
        let mut slices = BluetoothSlicer.slice_apdu(&apdu, 20);

        // Incomplete
        assert_eq!(BluetoothSlicer.join_slices(&slices[..2]), None);

        // Missing first slice
        assert_eq!(BluetoothSlicer.join_slices(&slices[1..]), None);

        // Out of order arrival is accepted
        slices.reverse();
        assert_eq!(BluetoothSlicer.join_slices(&slices), Some(apdu));
    }

    #[test]
    fn unsliceable_inputs() {
        assert!(BluetoothSlicer.slice_apdu(&[], 20).is_empty());
        assert!(BluetoothSlicer.slice_apdu(&[0x01], 5).is_empty());
        assert!(BluetoothSlicer
            .slice_apdu(&vec![0u8; MAX_APDU_LEN + 1], 20)
            .is_empty());
    }

    #[test]
    fn slice_from_raw_data() {
        let s = BluetoothSlicer.slice_from_data(&[0x05, 0x00, 0x02, 0xff]).unwrap();
        assert_eq!(s.index, 2);

        assert_eq!(BluetoothSlicer.slice_from_data(&[0x05, 0x00, 0x02]), None);
        assert_eq!(BluetoothSlicer.slice_from_data(&[0x08, 0x00, 0x00, 0x01]), None);
    }
}
