// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Bluetooth central (radio) abstraction
//!
//! Platform radios are callback driven, calls on [Central] return immediately
//! and results arrive later as [CentralEvent]s on the channel supplied to the
//! [BluetoothManager](super::BluetoothManager). Platform errors are carried as
//! strings and translated to [Error](crate::Error) kinds by the manager.

use strum::Display;
use uuid::Uuid;

use crate::device::Characteristic;

/// Radio power state
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum RadioState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

/// Bluetooth central operations
pub trait Central: Send + Sync + 'static {
    /// Current radio state
    fn state(&self) -> RadioState;

    fn start_scan(&self);

    fn stop_scan(&self);

    fn connect(&self, peripheral: &str);

    fn cancel_connection(&self, peripheral: &str);

    fn discover_services(&self, peripheral: &str);

    fn discover_characteristics(&self, peripheral: &str, service: Uuid);

    fn set_notify(&self, peripheral: &str, characteristic: Uuid, enabled: bool);

    /// Write with response
    fn write(&self, peripheral: &str, characteristic: Uuid, data: &[u8]);
}

/// Radio callbacks
#[derive(Clone, Debug, PartialEq)]
pub enum CentralEvent {
    StateChanged(RadioState),
    Discovered {
        peripheral: String,
        name: Option<String>,
        local_name: Option<String>,
        connectable: bool,
    },
    Connected {
        peripheral: String,
    },
    ConnectFailed {
        peripheral: String,
        error: String,
    },
    Disconnected {
        peripheral: String,
        error: Option<String>,
    },
    ServicesDiscovered {
        peripheral: String,
        services: Result<Vec<Uuid>, String>,
    },
    CharacteristicsDiscovered {
        peripheral: String,
        service: Uuid,
        characteristics: Result<Vec<Characteristic>, String>,
    },
    NotifyStateUpdated {
        peripheral: String,
        characteristic: Uuid,
        notifying: bool,
        error: Option<String>,
    },
    WriteCompleted {
        peripheral: String,
        characteristic: Uuid,
        error: Option<String>,
    },
    ValueUpdated {
        peripheral: String,
        characteristic: Uuid,
        value: Result<Vec<u8>, String>,
    },
}
