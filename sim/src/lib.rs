// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Simulated Bluetooth dongle for exercising the remote dongle stack
//!
//! [SimCentral] implements the [Central] radio abstraction over a set of
//! in-process [SimPeripheral]s, each running a [SimApplet]. Radio callbacks
//! are delivered on the channel returned by [SimCentral::new] in the order
//! the corresponding requests were made, and [Faults] can be injected per
//! peripheral to exercise negotiation and transfer failures.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{debug, trace, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use remote_dongle::{
    slicer::{ApduSlice, ApduSlicer, BluetoothSlicer},
    transport::{Central, CentralEvent, RadioState},
    BluetoothDescriptor,
};

mod applet;
pub use applet::{SimApplet, SimAttestationKeys, DEFAULT_PIN, PIN_ATTEMPTS};

/// Simulated product name prefix
pub const SIM_DEVICE_NAME: &str = "Nano X";

/// Simulated product primary service
pub const SIM_SERVICE: Uuid = Uuid::from_u128(0x13d63400_2c97_0004_0000_4c6564676572);

/// Simulated product notify characteristic
pub const SIM_READ_CHARACTERISTIC: Uuid = Uuid::from_u128(0x13d63400_2c97_0004_0001_4c6564676572);

/// Simulated product write characteristic
pub const SIM_WRITE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x13d63400_2c97_0004_0002_4c6564676572);

/// Product descriptor matching simulated peripherals
pub fn descriptor() -> BluetoothDescriptor {
    BluetoothDescriptor::new(
        SIM_DEVICE_NAME,
        SIM_SERVICE,
        SIM_READ_CHARACTERISTIC,
        SIM_WRITE_CHARACTERISTIC,
    )
}

/// Fault injection for a simulated peripheral
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Faults {
    /// Advertise an additional unexpected service
    pub extra_service: bool,
    /// Refuse notification subscriptions
    pub refuse_notify: bool,
    /// Accept writes without ever completing them
    pub silent_writes: bool,
}

/// A simulated peripheral
#[derive(Debug)]
pub struct SimPeripheral {
    pub id: String,
    pub name: String,
    pub descriptor: BluetoothDescriptor,
    pub applet: SimApplet,
    pub faults: Faults,

    connected: bool,
    slices: Vec<ApduSlice>,
}

impl SimPeripheral {
    pub fn new(id: &str, name: &str, applet: SimApplet) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            descriptor: descriptor(),
            applet,
            faults: Faults::default(),
            connected: false,
            slices: vec![],
        }
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_descriptor(mut self, descriptor: BluetoothDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn drop_connection(&mut self) {
        self.connected = false;
        self.slices.clear();
    }

    /// Handle a written slice, returning response slices once a full APDU
    /// has been received
    fn receive(&mut self, data: &[u8]) -> Vec<ApduSlice> {
        let slicer = BluetoothSlicer;

        let Some(slice) = slicer.slice_from_data(data) else {
            warn!("Sim {} received malformed slice", self.id);
            return vec![];
        };

        if slice.index == 0 {
            self.slices.clear();
        }
        self.slices.push(slice);

        let Some(apdu) = slicer.join_slices(&self.slices) else {
            return vec![];
        };
        self.slices.clear();

        trace!("Sim {} APDU: {}", self.id, hex::encode(&apdu));
        let resp = self.applet.exchange(&apdu);
        trace!("Sim {} response: {}", self.id, hex::encode(&resp));

        slicer.slice_apdu(&resp, self.descriptor.write_byte_size)
    }
}

#[derive(Debug)]
struct Inner {
    state: RadioState,
    scanning: bool,
    peripherals: HashMap<String, SimPeripheral>,
}

/// Simulated Bluetooth central
#[derive(Debug)]
pub struct SimCentral {
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<CentralEvent>,
}

impl SimCentral {
    /// Create a powered on central, returning the radio callback stream
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<CentralEvent>) {
        let (events, rx) = mpsc::unbounded_channel();

        let c = Self {
            inner: Mutex::new(Inner {
                state: RadioState::PoweredOn,
                scanning: false,
                peripherals: HashMap::new(),
            }),
            events,
        };

        (Arc::new(c), rx)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, evt: CentralEvent) {
        trace!("Sim event: {evt:?}");
        if self.events.send(evt).is_err() {
            debug!("Sim radio receiver dropped");
        }
    }

    fn discovered(&self, p: &SimPeripheral) {
        self.emit(CentralEvent::Discovered {
            peripheral: p.id.clone(),
            name: Some(p.name.clone()),
            local_name: None,
            connectable: true,
        });
    }

    /// Add a peripheral, advertising it if scanning
    pub fn add_peripheral(&self, p: SimPeripheral) {
        let mut inner = self.lock();

        if inner.scanning && inner.state == RadioState::PoweredOn {
            self.discovered(&p);
        }
        inner.peripherals.insert(p.id.clone(), p);
    }

    /// Re-send an advertisement for a peripheral
    pub fn advertise(&self, id: &str) {
        let inner = self.lock();

        if !inner.scanning || inner.state != RadioState::PoweredOn {
            return;
        }
        if let Some(p) = inner.peripherals.get(id) {
            self.discovered(p);
        }
    }

    /// Remove a peripheral, dropping any connection to it
    pub fn remove_peripheral(&self, id: &str) -> Option<SimPeripheral> {
        let p = self.lock().peripherals.remove(id)?;

        if p.connected {
            self.emit(CentralEvent::Disconnected {
                peripheral: id.to_string(),
                error: Some("peripheral removed".to_string()),
            });
        }

        Some(p)
    }

    /// Drop the connection to a peripheral from the peripheral side
    pub fn disconnect_peripheral(&self, id: &str) {
        let mut inner = self.lock();

        let Some(p) = inner.peripherals.get_mut(id) else {
            return;
        };
        if !p.connected {
            return;
        }
        p.drop_connection();

        self.emit(CentralEvent::Disconnected {
            peripheral: id.to_string(),
            error: Some("connection lost".to_string()),
        });
    }

    /// Update the radio state, dropping connections when powered off
    pub fn set_radio_state(&self, state: RadioState) {
        let mut inner = self.lock();
        inner.state = state;

        if state != RadioState::PoweredOn {
            inner
                .peripherals
                .values_mut()
                .for_each(SimPeripheral::drop_connection);
        }

        self.emit(CentralEvent::StateChanged(state));
    }

    /// Access a peripheral's applet
    pub fn with_applet<R>(&self, id: &str, f: impl FnOnce(&mut SimApplet) -> R) -> Option<R> {
        self.lock().peripherals.get_mut(id).map(|p| f(&mut p.applet))
    }

    /// Update a peripheral's fault injection
    pub fn set_faults(&self, id: &str, faults: Faults) {
        if let Some(p) = self.lock().peripherals.get_mut(id) {
            p.faults = faults;
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.lock()
            .peripherals
            .get(id)
            .map(|p| p.connected)
            .unwrap_or(false)
    }
}

impl Central for SimCentral {
    fn state(&self) -> RadioState {
        self.lock().state
    }

    fn start_scan(&self) {
        let mut inner = self.lock();
        inner.scanning = true;

        if inner.state != RadioState::PoweredOn {
            return;
        }

        let mut ids: Vec<_> = inner.peripherals.keys().cloned().collect();
        ids.sort();
        for id in ids {
            if let Some(p) = inner.peripherals.get(&id) {
                self.discovered(p);
            }
        }
    }

    fn stop_scan(&self) {
        self.lock().scanning = false;
    }

    fn connect(&self, peripheral: &str) {
        let mut inner = self.lock();
        let powered = inner.state == RadioState::PoweredOn;

        match inner.peripherals.get_mut(peripheral) {
            Some(p) if powered => {
                p.connected = true;
                self.emit(CentralEvent::Connected {
                    peripheral: peripheral.to_string(),
                });
            }
            _ => self.emit(CentralEvent::ConnectFailed {
                peripheral: peripheral.to_string(),
                error: "peripheral unavailable".to_string(),
            }),
        }
    }

    fn cancel_connection(&self, peripheral: &str) {
        let mut inner = self.lock();

        let Some(p) = inner.peripherals.get_mut(peripheral) else {
            return;
        };
        if !p.connected {
            return;
        }
        p.drop_connection();

        self.emit(CentralEvent::Disconnected {
            peripheral: peripheral.to_string(),
            error: None,
        });
    }

    fn discover_services(&self, peripheral: &str) {
        let inner = self.lock();

        let services = match inner.peripherals.get(peripheral) {
            Some(p) if p.connected => {
                let mut s = vec![p.descriptor.service];
                if p.faults.extra_service {
                    s.push(Uuid::from_u128(0x1800));
                }
                Ok(s)
            }
            _ => Err("not connected".to_string()),
        };

        self.emit(CentralEvent::ServicesDiscovered {
            peripheral: peripheral.to_string(),
            services,
        });
    }

    fn discover_characteristics(&self, peripheral: &str, service: Uuid) {
        let inner = self.lock();

        let characteristics = match inner.peripherals.get(peripheral) {
            Some(p) if p.connected && service == p.descriptor.service => Ok(vec![
                p.descriptor.read_characteristic,
                p.descriptor.write_characteristic,
            ]),
            Some(_) => Err("unknown service".to_string()),
            None => Err("not connected".to_string()),
        };

        self.emit(CentralEvent::CharacteristicsDiscovered {
            peripheral: peripheral.to_string(),
            service,
            characteristics,
        });
    }

    fn set_notify(&self, peripheral: &str, characteristic: Uuid, enabled: bool) {
        let inner = self.lock();

        let (notifying, error) = match inner.peripherals.get(peripheral) {
            Some(p) if p.faults.refuse_notify => (false, Some("notify refused".to_string())),
            Some(p) if characteristic == p.descriptor.read_characteristic.uuid => (enabled, None),
            Some(_) => (false, Some("unknown characteristic".to_string())),
            None => (false, Some("not connected".to_string())),
        };

        self.emit(CentralEvent::NotifyStateUpdated {
            peripheral: peripheral.to_string(),
            characteristic,
            notifying,
            error,
        });
    }

    fn write(&self, peripheral: &str, characteristic: Uuid, data: &[u8]) {
        let mut inner = self.lock();

        let Some(p) = inner.peripherals.get_mut(peripheral) else {
            return;
        };

        if !p.connected || characteristic != p.descriptor.write_characteristic.uuid {
            self.emit(CentralEvent::WriteCompleted {
                peripheral: peripheral.to_string(),
                characteristic,
                error: Some("write rejected".to_string()),
            });
            return;
        }

        if p.faults.silent_writes {
            debug!("Sim {peripheral} dropping write");
            return;
        }

        self.emit(CentralEvent::WriteCompleted {
            peripheral: peripheral.to_string(),
            characteristic,
            error: None,
        });

        let read = p.descriptor.read_characteristic.uuid;
        for s in p.receive(data) {
            self.emit(CentralEvent::ValueUpdated {
                peripheral: peripheral.to_string(),
                characteristic: read,
                value: Ok(s.data),
            });
        }
    }
}

#[cfg(test)]
mod test {
    use remote_dongle::apdu::{
        ops::firmware::FirmwareVersionReq, Apdu, ApduResponse, Status,
    };

    use super::*;

    #[tokio::test]
    async fn scan_and_exchange() {
        let (c, mut rx) = SimCentral::new();
        c.add_peripheral(SimPeripheral::new("p0", "Nano X 1234", SimApplet::default()));

        c.start_scan();
        assert!(matches!(
            rx.recv().await,
            Some(CentralEvent::Discovered { peripheral, .. }) if peripheral == "p0"
        ));

        c.connect("p0");
        assert_eq!(
            rx.recv().await,
            Some(CentralEvent::Connected {
                peripheral: "p0".to_string()
            })
        );

        // Slice and write a firmware version request
        let apdu = Apdu::from_req(&FirmwareVersionReq).unwrap().to_bytes();
        let slices = BluetoothSlicer.slice_apdu(&apdu, 20);
        for s in &slices {
            c.write("p0", SIM_WRITE_CHARACTERISTIC, &s.data);
        }

        let mut received = vec![];
        while let Ok(evt) = rx.try_recv() {
            if let CentralEvent::ValueUpdated { value: Ok(v), .. } = evt {
                received.push(BluetoothSlicer.slice_from_data(&v).unwrap());
            }
        }

        let resp = BluetoothSlicer.join_slices(&received).unwrap();
        let resp = ApduResponse::parse(&resp).unwrap();
        assert_eq!(resp.status(), Status::Success);
        assert_eq!(resp.data.len(), 8);
    }

    #[tokio::test]
    async fn local_and_remote_disconnect() {
        let (c, mut rx) = SimCentral::new();
        c.add_peripheral(SimPeripheral::new("p0", "Nano X 1234", SimApplet::default()));

        c.connect("p0");
        let _ = rx.recv().await;

        c.cancel_connection("p0");
        assert_eq!(
            rx.recv().await,
            Some(CentralEvent::Disconnected {
                peripheral: "p0".to_string(),
                error: None
            })
        );
        assert!(!c.is_connected("p0"));

        c.connect("p0");
        let _ = rx.recv().await;

        c.disconnect_peripheral("p0");
        assert!(matches!(
            rx.recv().await,
            Some(CentralEvent::Disconnected { error: Some(_), .. })
        ));
    }
}
