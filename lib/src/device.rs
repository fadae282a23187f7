// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device and transport descriptors

use std::sync::Arc;

use strum::Display;
use uuid::Uuid;

/// Supported transport types
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
#[non_exhaustive]
pub enum TransportType {
    Bluetooth,
}

/// Connection state, shared by transport managers, the coordinator
/// and the communicator
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

bitflags::bitflags! {
    /// GATT characteristic properties
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
    }
}

/// GATT characteristic identity and required properties
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

impl Characteristic {
    pub fn new(uuid: Uuid, properties: CharacteristicProperties) -> Self {
        Self { uuid, properties }
    }

    /// Check a discovered characteristic matches this descriptor
    /// (same UUID and exactly the same properties)
    pub fn matches(&self, other: &Characteristic) -> bool {
        self.uuid == other.uuid && self.properties == other.properties
    }
}

/// Bluetooth product descriptor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BluetoothDescriptor {
    /// Advertised name prefix used to match peripherals
    pub name: String,
    /// Primary GATT service
    pub service: Uuid,
    /// Notify characteristic carrying device responses
    pub read_characteristic: Characteristic,
    /// Write characteristic carrying host requests
    pub write_characteristic: Characteristic,
    /// Maximum bytes per write
    pub write_byte_size: usize,
}

impl BluetoothDescriptor {
    pub const DEFAULT_WRITE_BYTE_SIZE: usize = 20;

    /// Create a descriptor with the usual notify / write properties
    pub fn new(name: &str, service: Uuid, read: Uuid, write: Uuid) -> Self {
        Self {
            name: name.to_string(),
            service,
            read_characteristic: Characteristic::new(read, CharacteristicProperties::NOTIFY),
            write_characteristic: Characteristic::new(write, CharacteristicProperties::WRITE),
            write_byte_size: Self::DEFAULT_WRITE_BYTE_SIZE,
        }
    }

    /// Check whether an advertised name belongs to this product
    pub fn matches_name(&self, name: &str) -> bool {
        name.starts_with(&self.name)
    }
}

/// Transport descriptor for a device
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceDescriptor {
    Bluetooth(BluetoothDescriptor),
}

impl DeviceDescriptor {
    pub fn transport_type(&self) -> TransportType {
        match self {
            DeviceDescriptor::Bluetooth(_) => TransportType::Bluetooth,
        }
    }

    /// Maximum bytes per transport write
    pub fn write_byte_size(&self) -> usize {
        match self {
            DeviceDescriptor::Bluetooth(d) => d.write_byte_size,
        }
    }
}

/// A discovered device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    /// Transport-specific unique identifier
    pub uid: String,
    /// Display name
    pub name: String,
    pub descriptor: Arc<DeviceDescriptor>,
}

impl Device {
    pub fn transport_type(&self) -> TransportType {
        self.descriptor.transport_type()
    }

    /// Check whether two handles refer to the same device
    pub fn same_as(&self, other: &Device) -> bool {
        self.uid == other.uid && self.transport_type() == other.transport_type()
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:16} ({}, {})", self.name, self.transport_type(), self.uid)
    }
}
