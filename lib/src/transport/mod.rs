// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transport managers
//!
//! A [TransportManager] owns one radio session for a transport type, handling
//! discovery, connection negotiation and raw byte exchange. Results are reported
//! asynchronously as [ManagerEvent]s to the owning coordinator.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{ConnectionState, Device, Error, TransportType};

mod bluetooth;
pub use bluetooth::BluetoothManager;

mod central;
pub use central::{Central, CentralEvent, RadioState};

/// Events emitted by transport managers
#[derive(Clone, Debug, PartialEq)]
pub enum ManagerEvent {
    /// Device discovered while scanning
    DeviceFound(Arc<Device>),
    /// Device no longer advertising
    DeviceLost(Arc<Device>),
    /// Connection and GATT negotiation complete
    Connected(Arc<Device>),
    /// Connection attempt failed or timed out
    FailedToConnect(Arc<Device>),
    /// Device disconnected, with an error if not requested locally
    Disconnected(Arc<Device>, Option<Error>),
    /// Write completed
    DataSent(Arc<Device>, Vec<u8>),
    /// Write failed
    SendFailed(Arc<Device>, Error),
    /// Data notified by the device
    DataReceived(Arc<Device>, Vec<u8>),
    /// Notification carried an error
    ReceiveFailed(Arc<Device>, Error),
}

impl ManagerEvent {
    /// Device the event refers to
    pub fn device(&self) -> &Arc<Device> {
        match self {
            ManagerEvent::DeviceFound(d)
            | ManagerEvent::DeviceLost(d)
            | ManagerEvent::Connected(d)
            | ManagerEvent::FailedToConnect(d)
            | ManagerEvent::Disconnected(d, _)
            | ManagerEvent::DataSent(d, _)
            | ManagerEvent::SendFailed(d, _)
            | ManagerEvent::DataReceived(d, _)
            | ManagerEvent::ReceiveFailed(d, _) => d,
        }
    }
}

/// Transport manager interface used by the coordinator
#[async_trait]
pub trait TransportManager: Send + Sync {
    /// Transport type handled by this manager
    fn transport_type(&self) -> TransportType;

    /// Start scanning for devices
    fn start_scanning(&self);

    /// Stop scanning, forgetting discovered devices
    async fn stop_scanning(&self);

    async fn is_scanning(&self) -> bool;

    /// Connect to a device, the outcome is reported via events
    fn connect(&self, device: Arc<Device>);

    /// Disconnect the active device
    async fn disconnect(&self);

    /// Write raw data to the active device
    fn send(&self, data: Vec<u8>);

    async fn connection_state(&self) -> ConnectionState;

    async fn active_device(&self) -> Option<Arc<Device>>;
}
