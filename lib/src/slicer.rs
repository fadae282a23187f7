// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transport-selected APDU slicing

use strum::Display;

pub use remote_dongle_apdu::slicer::{ApduSlice, ApduSlicer, BluetoothSlicer};

use crate::TransportType;

/// Generic slicer (abstract over transport types)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
#[non_exhaustive]
pub enum Slicer {
    Bluetooth(BluetoothSlicer),
}

impl From<TransportType> for Slicer {
    fn from(t: TransportType) -> Self {
        match t {
            TransportType::Bluetooth => Slicer::Bluetooth(BluetoothSlicer),
        }
    }
}

impl ApduSlicer for Slicer {
    fn slice_apdu(&self, apdu: &[u8], max_len: usize) -> Vec<ApduSlice> {
        match self {
            Slicer::Bluetooth(s) => s.slice_apdu(apdu, max_len),
        }
    }

    fn slice_from_data(&self, data: &[u8]) -> Option<ApduSlice> {
        match self {
            Slicer::Bluetooth(s) => s.slice_from_data(data),
        }
    }

    fn join_slices(&self, slices: &[ApduSlice]) -> Option<Vec<u8>> {
        match self {
            Slicer::Bluetooth(s) => s.join_slices(slices),
        }
    }
}
