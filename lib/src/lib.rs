// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Remote dongle communication library
//!
//! Layers, bottom up:
//!
//! - [transport]: transport managers owning a radio session ([transport::BluetoothManager]
//!   over a platform [transport::Central])
//! - [coordinator]: APDU transfers sliced over the active transport, one in flight
//! - [queue] / [tasks]: single-flight execution of device operations
//! - [api]: typed device operations ([DeviceApi])
//! - [communicator]: connection state machine with the attestation gate
//!   ([DeviceCommunicator])
//!
//! Each stateful layer runs as a tokio task behind a cloneable handle.

/// Re-export `remote-dongle-apdu` for consumers
pub use remote_dongle_apdu::{self as apdu};

pub mod api;
pub use api::DeviceApi;

pub mod attestation;
pub use attestation::{Attestation, AttestationKeyProvider, LedgerAttestationKeys};

pub mod communicator;
pub use communicator::{ConnectionEvent, DeviceCommunicator, ScanEvent};

pub mod config;
pub use config::{ApiConfig, Config, CoordinatorConfig, TransportConfig};

pub mod coordinator;
pub use coordinator::{CoordinatorEvent, DevicesCoordinator};

mod device;
pub use device::{
    BluetoothDescriptor, Characteristic, CharacteristicProperties, ConnectionState, Device,
    DeviceDescriptor, TransportType,
};

mod error;
pub use error::Error;

mod network;
pub use network::CoinNetwork;

pub mod queue;

pub mod slicer;

pub mod tasks;

mod timer;

pub mod transport;

pub mod xpub;
pub use xpub::ExtendedPublicKey;
