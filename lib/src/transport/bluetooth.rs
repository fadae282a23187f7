// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Bluetooth transport manager
//!
//! Runs as a task owning the radio session: scanning with per-device lost timers,
//! connection and GATT negotiation (service, characteristics, notification
//! subscription), and single-write-in-flight sends. Callers interact through the
//! cloneable [BluetoothManager] handle.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use uuid::Uuid;

use super::{Central, CentralEvent, ManagerEvent, RadioState, TransportManager};
use crate::{
    config::TransportConfig, device::BluetoothDescriptor, timer::sleep_until_opt,
    ConnectionState, Device, DeviceDescriptor, Error, TransportType,
};

/// Handle to a running bluetooth manager task
///
/// The task exits once all handles are dropped.
#[derive(Clone, Debug)]
pub struct BluetoothManager {
    tx: mpsc::UnboundedSender<Command>,
}

#[derive(Debug)]
enum Command {
    StartScanning,
    StopScanning(oneshot::Sender<()>),
    IsScanning(oneshot::Sender<bool>),
    Connect(Arc<Device>),
    Disconnect(oneshot::Sender<()>),
    Send(Vec<u8>),
    State(oneshot::Sender<ConnectionState>),
    ActiveDevice(oneshot::Sender<Option<Arc<Device>>>),
}

impl BluetoothManager {
    /// Spawn a manager for the provided central and product descriptors
    ///
    /// `radio` receives callbacks from the `central`, manager events are
    /// published on `events`.
    pub fn spawn(
        central: Arc<dyn Central>,
        radio: mpsc::UnboundedReceiver<CentralEvent>,
        descriptors: Vec<BluetoothDescriptor>,
        config: TransportConfig,
        events: mpsc::UnboundedSender<ManagerEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = Worker {
            radio_state: central.state(),
            central,
            descriptors: descriptors
                .into_iter()
                .map(|d| Arc::new(DeviceDescriptor::Bluetooth(d)))
                .collect(),
            config,
            events,
            scanning: false,
            scanned: HashMap::new(),
            state: ConnectionState::Disconnected,
            current: None,
            timeout: None,
        };

        tokio::spawn(worker.run(rx, radio));

        Self { tx }
    }

    fn command(&self, c: Command) {
        if self.tx.send(c).is_err() {
            warn!("Bluetooth manager task exited");
        }
    }

    async fn query<T: Default>(&self, f: impl FnOnce(oneshot::Sender<T>) -> Command) -> T {
        let (tx, rx) = oneshot::channel();
        self.command(f(tx));
        rx.await.unwrap_or_default()
    }
}

#[async_trait]
impl TransportManager for BluetoothManager {
    fn transport_type(&self) -> TransportType {
        TransportType::Bluetooth
    }

    fn start_scanning(&self) {
        self.command(Command::StartScanning)
    }

    async fn stop_scanning(&self) {
        self.query(Command::StopScanning).await
    }

    async fn is_scanning(&self) -> bool {
        self.query(Command::IsScanning).await
    }

    fn connect(&self, device: Arc<Device>) {
        self.command(Command::Connect(device))
    }

    async fn disconnect(&self) {
        self.query(Command::Disconnect).await
    }

    fn send(&self, data: Vec<u8>) {
        self.command(Command::Send(data))
    }

    async fn connection_state(&self) -> ConnectionState {
        self.query(Command::State).await
    }

    async fn active_device(&self) -> Option<Arc<Device>> {
        self.query(Command::ActiveDevice).await
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Timeout {
    Connect,
    Send,
}

struct Scanned {
    device: Arc<Device>,
    lost_at: Instant,
}

struct Connection {
    device: Arc<Device>,
    descriptor: BluetoothDescriptor,
    notifying: bool,
    pending_write: Option<Vec<u8>>,
}

struct Worker {
    central: Arc<dyn Central>,
    descriptors: Vec<Arc<DeviceDescriptor>>,
    config: TransportConfig,
    events: mpsc::UnboundedSender<ManagerEvent>,

    radio_state: RadioState,
    scanning: bool,
    scanned: HashMap<String, Scanned>,

    state: ConnectionState,
    current: Option<Connection>,
    timeout: Option<(Instant, Timeout)>,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut radio: mpsc::UnboundedReceiver<CentralEvent>,
    ) {
        debug!("Starting bluetooth manager");

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(c) => self.handle_command(c),
                    None => break,
                },
                Some(evt) = radio.recv() => self.handle_radio(evt),
                _ = sleep_until_opt(deadline) => self.handle_deadline(Instant::now()),
            }
        }

        debug!("Exiting bluetooth manager");

        self.stop_scanning();
        self.disconnect(None, false);
    }

    fn notify(&self, evt: ManagerEvent) {
        // Receiver closing means the coordinator is shutting down
        let _ = self.events.send(evt);
    }

    fn next_deadline(&self) -> Option<Instant> {
        let lost = self.scanned.values().map(|s| s.lost_at).min();
        let timeout = self.timeout.map(|(t, _)| t);

        match (lost, timeout) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn is_current(&self, peripheral: &str) -> bool {
        self.current
            .as_ref()
            .map(|c| c.device.uid == peripheral)
            .unwrap_or(false)
    }

    fn handle_command(&mut self, c: Command) {
        match c {
            Command::StartScanning => self.start_scanning(),
            Command::StopScanning(done) => {
                self.stop_scanning();
                let _ = done.send(());
            }
            Command::IsScanning(r) => {
                let _ = r.send(self.scanning);
            }
            Command::Connect(d) => self.connect(d),
            Command::Disconnect(done) => {
                self.disconnect(None, true);
                let _ = done.send(());
            }
            Command::Send(data) => self.send(data),
            Command::State(r) => {
                let _ = r.send(self.state);
            }
            Command::ActiveDevice(r) => {
                let _ = r.send(self.current.as_ref().map(|c| c.device.clone()));
            }
        }
    }

    fn handle_deadline(&mut self, now: Instant) {
        if let Some((t, kind)) = self.timeout {
            if t <= now {
                self.timeout = None;
                self.handle_timeout(kind);
            }
        }

        let lost: Vec<String> = self
            .scanned
            .iter()
            .filter(|(_, s)| s.lost_at <= now)
            .map(|(k, _)| k.clone())
            .collect();

        for uid in lost {
            if let Some(s) = self.scanned.remove(&uid) {
                debug!("Lost device: {}", s.device);
                self.notify(ManagerEvent::DeviceLost(s.device));
            }
        }
    }

    fn handle_timeout(&mut self, kind: Timeout) {
        match kind {
            Timeout::Connect if self.state == ConnectionState::Connecting => {
                warn!("Connection timeout");
                self.fail_connection();
            }
            Timeout::Send => {
                let Some(c) = self.current.as_mut() else {
                    return;
                };
                if c.pending_write.take().is_some() {
                    warn!("Write timeout");
                    let d = c.device.clone();
                    self.notify(ManagerEvent::SendFailed(d, Error::TransferTimeout));
                }
            }
            _ => (),
        }
    }

    fn start_scanning(&mut self) {
        if self.scanning {
            return;
        }

        info!("Start scanning");
        self.scanning = true;

        if self.radio_state == RadioState::PoweredOn {
            self.central.start_scan();
        }
    }

    /// Stop scanning, discarding scanned devices without notification
    fn stop_scanning(&mut self) {
        if !self.scanning {
            return;
        }

        info!("Stop scanning");
        self.scanning = false;
        self.scanned.clear();

        if self.radio_state == RadioState::PoweredOn {
            self.central.stop_scan();
        }
    }

    fn connect(&mut self, device: Arc<Device>) {
        if self.state != ConnectionState::Disconnected {
            warn!("Connect to {device} ignored, state: {}", self.state);
            return;
        }

        let descriptor = match device.descriptor.as_ref() {
            DeviceDescriptor::Bluetooth(d) => d.clone(),
        };

        if self.radio_state != RadioState::PoweredOn {
            warn!("Cannot connect, radio state: {}", self.radio_state);
            self.notify(ManagerEvent::FailedToConnect(device));
            return;
        }

        info!("Connecting to {device}");

        self.central.connect(&device.uid);
        self.state = ConnectionState::Connecting;
        self.current = Some(Connection {
            device,
            descriptor,
            notifying: false,
            pending_write: None,
        });
        self.timeout = Some((
            Instant::now() + self.config.connection_timeout(),
            Timeout::Connect,
        ));
    }

    /// Tear down the current connection, returning the disconnected device
    fn disconnect(&mut self, error: Option<Error>, notify: bool) -> Option<Arc<Device>> {
        if self.state == ConnectionState::Disconnected {
            return None;
        }

        let c = self.current.take()?;
        self.state = ConnectionState::Disconnected;
        self.timeout = None;

        match &error {
            Some(e) => info!("Disconnecting from {} ({e})", c.device),
            None => info!("Disconnecting from {}", c.device),
        }

        if c.notifying {
            self.central
                .set_notify(&c.device.uid, c.descriptor.read_characteristic.uuid, false);
        }
        self.central.cancel_connection(&c.device.uid);

        if notify {
            self.notify(ManagerEvent::Disconnected(c.device.clone(), error));
        }

        Some(c.device)
    }

    fn fail_connection(&mut self) {
        if let Some(d) = self.disconnect(None, false) {
            self.notify(ManagerEvent::FailedToConnect(d));
        }
    }

    fn send(&mut self, data: Vec<u8>) {
        let connected = self.state == ConnectionState::Connected;

        let Some(c) = self.current.as_mut() else {
            warn!("Send with no active device");
            return;
        };

        if !connected {
            let d = c.device.clone();
            self.notify(ManagerEvent::SendFailed(d, Error::NotConnected));
            return;
        }

        if c.pending_write.is_some() {
            warn!("Write already pending, ignoring send");
            return;
        }

        if data.len() > c.descriptor.write_byte_size {
            warn!(
                "Write of {} bytes exceeds limit of {}",
                data.len(),
                c.descriptor.write_byte_size
            );
            let d = c.device.clone();
            self.notify(ManagerEvent::SendFailed(d, Error::UnableToWrite));
            return;
        }

        debug!("Write: {}", hex::encode(&data));

        self.central.write(
            &c.device.uid,
            c.descriptor.write_characteristic.uuid,
            &data,
        );
        c.pending_write = Some(data);

        self.timeout = Some((Instant::now() + self.config.send_timeout(), Timeout::Send));
    }

    fn handle_radio(&mut self, evt: CentralEvent) {
        match evt {
            CentralEvent::StateChanged(s) => self.radio_state_changed(s),
            CentralEvent::Discovered {
                peripheral,
                name,
                local_name,
                connectable,
            } => self.discovered(peripheral, name, local_name, connectable),
            CentralEvent::Connected { peripheral } => {
                if !self.negotiating(&peripheral) {
                    return;
                }
                debug!("Connected to {peripheral}, discovering services");
                self.central.discover_services(&peripheral);
            }
            CentralEvent::ConnectFailed { peripheral, error } => {
                if !self.negotiating(&peripheral) {
                    return;
                }
                warn!("Failed to connect to {peripheral}: {error}");
                self.fail_connection();
            }
            CentralEvent::Disconnected { peripheral, error } => {
                if !self.is_current(&peripheral) {
                    return;
                }
                // Unrequested disconnection, our own requests clear `current` first
                warn!("Peripheral {peripheral} disconnected: {error:?}");
                self.disconnect(Some(Error::RemoteDisconnection), true);
            }
            CentralEvent::ServicesDiscovered {
                peripheral,
                services,
            } => self.services_discovered(&peripheral, services),
            CentralEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                characteristics,
            } => self.characteristics_discovered(&peripheral, service, characteristics),
            CentralEvent::NotifyStateUpdated {
                peripheral,
                characteristic,
                notifying,
                error,
            } => self.notify_state_updated(&peripheral, characteristic, notifying, error),
            CentralEvent::WriteCompleted {
                peripheral,
                characteristic,
                error,
            } => self.write_completed(&peripheral, characteristic, error),
            CentralEvent::ValueUpdated {
                peripheral,
                characteristic,
                value,
            } => self.value_updated(&peripheral, characteristic, value),
        }
    }

    /// Check an event refers to a connection under negotiation
    fn negotiating(&self, peripheral: &str) -> bool {
        let ok = self.is_current(peripheral) && self.state == ConnectionState::Connecting;
        if !ok {
            debug!("Ignoring stale negotiation event from {peripheral}");
        }
        ok
    }

    fn radio_state_changed(&mut self, s: RadioState) {
        debug!("Radio state: {s}");
        self.radio_state = s;

        if s == RadioState::PoweredOn {
            if self.scanning {
                self.central.start_scan();
            }
            return;
        }

        for (_, d) in self.scanned.drain().collect::<Vec<_>>() {
            self.notify(ManagerEvent::DeviceLost(d.device));
        }

        if self.state != ConnectionState::Disconnected {
            self.disconnect(Some(Error::RemoteDisconnection), true);
        }
    }

    fn discovered(
        &mut self,
        peripheral: String,
        name: Option<String>,
        local_name: Option<String>,
        connectable: bool,
    ) {
        if !self.scanning || !connectable {
            return;
        }

        let lost_at = Instant::now() + self.config.lost_device();
        if let Some(s) = self.scanned.get_mut(&peripheral) {
            s.lost_at = lost_at;
            return;
        }

        let names = [name.as_deref(), local_name.as_deref()];
        let descriptor = self.descriptors.iter().find(|d| match d.as_ref() {
            DeviceDescriptor::Bluetooth(b) => names.iter().flatten().any(|n| b.matches_name(n)),
        });
        let Some(descriptor) = descriptor else {
            return;
        };

        let device = Arc::new(Device {
            uid: peripheral.clone(),
            name: name.or(local_name).unwrap_or_default(),
            descriptor: descriptor.clone(),
        });

        info!("Found device: {device}");

        self.scanned.insert(
            peripheral,
            Scanned {
                device: device.clone(),
                lost_at,
            },
        );
        self.notify(ManagerEvent::DeviceFound(device));
    }

    fn services_discovered(&mut self, peripheral: &str, services: Result<Vec<Uuid>, String>) {
        if !self.negotiating(peripheral) {
            return;
        }
        let Some(c) = self.current.as_ref() else {
            return;
        };

        let service = c.descriptor.service;
        match services {
            Ok(s) if s.len() == 1 && s[0] == service => {
                debug!("Found service {service}, discovering characteristics");
                self.central.discover_characteristics(peripheral, service);
            }
            Ok(s) => {
                warn!("Unexpected services: {s:?}");
                self.disconnect(Some(Error::WrongDevice), true);
            }
            Err(e) => {
                warn!("Service discovery failed: {e}");
                self.disconnect(Some(Error::WrongDevice), true);
            }
        }
    }

    fn characteristics_discovered(
        &mut self,
        peripheral: &str,
        service: Uuid,
        characteristics: Result<Vec<crate::device::Characteristic>, String>,
    ) {
        if !self.negotiating(peripheral) {
            return;
        }
        let Some(c) = self.current.as_ref() else {
            return;
        };

        let d = &c.descriptor;
        let found = match characteristics {
            Ok(chars) if service == d.service => {
                let read = chars.iter().any(|c| d.read_characteristic.matches(c));
                let write = chars.iter().any(|c| d.write_characteristic.matches(c));
                read && write
            }
            Ok(_) => false,
            Err(e) => {
                warn!("Characteristic discovery failed: {e}");
                false
            }
        };

        if !found {
            self.disconnect(Some(Error::WrongDevice), true);
            return;
        }

        debug!("Found characteristics, subscribing to notifications");
        self.central
            .set_notify(peripheral, d.read_characteristic.uuid, true);
    }

    fn notify_state_updated(
        &mut self,
        peripheral: &str,
        characteristic: Uuid,
        notifying: bool,
        error: Option<String>,
    ) {
        if !self.negotiating(peripheral) {
            return;
        }
        let Some(c) = self.current.as_mut() else {
            return;
        };

        if characteristic != c.descriptor.read_characteristic.uuid || !notifying || error.is_some()
        {
            warn!("Notification subscription failed: {error:?}");
            self.disconnect(Some(Error::UnableToBind), true);
            return;
        }

        c.notifying = true;
        let device = c.device.clone();

        self.state = ConnectionState::Connected;
        self.timeout = None;

        info!("Connected to {device}");
        self.notify(ManagerEvent::Connected(device));
    }

    fn write_completed(&mut self, peripheral: &str, characteristic: Uuid, error: Option<String>) {
        if !self.is_current(peripheral) || self.state != ConnectionState::Connected {
            return;
        }
        let Some(c) = self.current.as_mut() else {
            return;
        };
        if characteristic != c.descriptor.write_characteristic.uuid {
            return;
        }

        let device = c.device.clone();
        let pending = c.pending_write.take();
        self.timeout = None;

        match (pending, error) {
            (Some(data), None) => self.notify(ManagerEvent::DataSent(device, data)),
            (_, e) => {
                warn!("Write failed: {e:?}");
                self.notify(ManagerEvent::SendFailed(device, Error::UnableToWrite))
            }
        }
    }

    fn value_updated(
        &mut self,
        peripheral: &str,
        characteristic: Uuid,
        value: Result<Vec<u8>, String>,
    ) {
        if !self.is_current(peripheral) || self.state != ConnectionState::Connected {
            return;
        }
        let Some(c) = self.current.as_ref() else {
            return;
        };
        if characteristic != c.descriptor.read_characteristic.uuid {
            return;
        }

        let device = c.device.clone();
        match value {
            Ok(v) => {
                debug!("Read: {}", hex::encode(&v));
                self.notify(ManagerEvent::DataReceived(device, v));
            }
            Err(e) => {
                warn!("Read failed: {e}");
                self.notify(ManagerEvent::ReceiveFailed(device, Error::UnableToRead));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        StartScan,
        StopScan,
        Connect(String),
        CancelConnection(String),
        DiscoverServices(String),
        DiscoverCharacteristics(String, Uuid),
        SetNotify(String, Uuid, bool),
        Write(String, Uuid, Vec<u8>),
    }

    /// Central recording calls, callbacks are injected by each test
    struct FakeCentral {
        calls: mpsc::UnboundedSender<Call>,
    }

    impl FakeCentral {
        fn record(&self, c: Call) {
            let _ = self.calls.send(c);
        }
    }

    impl Central for FakeCentral {
        fn state(&self) -> RadioState {
            RadioState::PoweredOn
        }

        fn start_scan(&self) {
            self.record(Call::StartScan)
        }

        fn stop_scan(&self) {
            self.record(Call::StopScan)
        }

        fn connect(&self, peripheral: &str) {
            self.record(Call::Connect(peripheral.to_string()))
        }

        fn cancel_connection(&self, peripheral: &str) {
            self.record(Call::CancelConnection(peripheral.to_string()))
        }

        fn discover_services(&self, peripheral: &str) {
            self.record(Call::DiscoverServices(peripheral.to_string()))
        }

        fn discover_characteristics(&self, peripheral: &str, service: Uuid) {
            self.record(Call::DiscoverCharacteristics(peripheral.to_string(), service))
        }

        fn set_notify(&self, peripheral: &str, characteristic: Uuid, enabled: bool) {
            self.record(Call::SetNotify(
                peripheral.to_string(),
                characteristic,
                enabled,
            ))
        }

        fn write(&self, peripheral: &str, characteristic: Uuid, data: &[u8]) {
            self.record(Call::Write(
                peripheral.to_string(),
                characteristic,
                data.to_vec(),
            ))
        }
    }

    struct Setup {
        manager: BluetoothManager,
        descriptor: BluetoothDescriptor,
        radio: mpsc::UnboundedSender<CentralEvent>,
        calls: mpsc::UnboundedReceiver<Call>,
        events: mpsc::UnboundedReceiver<ManagerEvent>,
    }

    impl Setup {
        fn device(&self, peripheral: &str, name: &str) -> Arc<Device> {
            Arc::new(Device {
                uid: peripheral.to_string(),
                name: name.to_string(),
                descriptor: Arc::new(DeviceDescriptor::Bluetooth(self.descriptor.clone())),
            })
        }

        fn radio(&self, evt: CentralEvent) {
            self.radio.send(evt).unwrap();
        }
    }

    fn setup() -> Setup {
        let (calls_tx, calls) = mpsc::unbounded_channel();
        let (radio, radio_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        let descriptor = BluetoothDescriptor::new(
            "Nano X",
            Uuid::from_u128(1),
            Uuid::from_u128(2),
            Uuid::from_u128(3),
        );

        let manager = BluetoothManager::spawn(
            Arc::new(FakeCentral { calls: calls_tx }),
            radio_rx,
            vec![descriptor.clone()],
            TransportConfig::default(),
            events_tx,
        );

        Setup {
            manager,
            descriptor,
            radio,
            calls,
            events,
        }
    }

    fn advertisement(peripheral: &str, name: &str) -> CentralEvent {
        CentralEvent::Discovered {
            peripheral: peripheral.to_string(),
            name: Some(name.to_string()),
            local_name: None,
            connectable: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lost_device_expiry() {
        let mut s = setup();

        s.manager.start_scanning();
        assert_eq!(s.calls.recv().await, Some(Call::StartScan));

        // Other products are not reported
        s.radio(advertisement("p1", "Keyboard"));
        s.radio(advertisement("p0", "Nano X 5A1D"));

        let d = s.device("p0", "Nano X 5A1D");
        assert_eq!(
            s.events.recv().await,
            Some(ManagerEvent::DeviceFound(d.clone()))
        );
        let found_at = Instant::now();

        assert_eq!(s.events.recv().await, Some(ManagerEvent::DeviceLost(d)));
        let elapsed = found_at.elapsed();
        assert!(elapsed >= Duration::from_secs(10), "lost after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(11), "lost after {elapsed:?}");

        assert!(s.manager.is_scanning().await);
    }

    #[tokio::test(start_paused = true)]
    async fn readvertisement_refreshes_device() {
        let mut s = setup();

        s.manager.start_scanning();
        s.radio(advertisement("p0", "Nano X 5A1D"));

        let d = s.device("p0", "Nano X 5A1D");
        assert_eq!(
            s.events.recv().await,
            Some(ManagerEvent::DeviceFound(d.clone()))
        );
        let found_at = Instant::now();

        tokio::time::sleep(Duration::from_secs(6)).await;
        s.radio(advertisement("p0", "Nano X 5A1D"));

        // No duplicate found event
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(s.events.try_recv().is_err());

        // Lost timer restarts from the second advertisement
        assert_eq!(s.events.recv().await, Some(ManagerEvent::DeviceLost(d)));
        assert!(found_at.elapsed() >= Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn connection_timeout() {
        let mut s = setup();

        let d = s.device("p0", "Nano X 5A1D");
        s.manager.connect(d.clone());

        assert_eq!(s.calls.recv().await, Some(Call::Connect("p0".to_string())));
        assert_eq!(
            s.manager.connection_state().await,
            ConnectionState::Connecting
        );
        let started = Instant::now();

        assert_eq!(
            s.events.recv().await,
            Some(ManagerEvent::FailedToConnect(d))
        );
        assert!(started.elapsed() >= Duration::from_secs(15));

        assert_eq!(
            s.calls.recv().await,
            Some(Call::CancelConnection("p0".to_string()))
        );
        assert_eq!(
            s.manager.connection_state().await,
            ConnectionState::Disconnected
        );
        assert_eq!(s.manager.active_device().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn negotiation_and_write_timeout() {
        let mut s = setup();

        let d = s.device("p0", "Nano X 5A1D");
        let p = || "p0".to_string();
        let read = s.descriptor.read_characteristic;
        let write = s.descriptor.write_characteristic;
        let service = s.descriptor.service;

        s.manager.connect(d.clone());
        assert_eq!(s.calls.recv().await, Some(Call::Connect(p())));

        s.radio(CentralEvent::Connected { peripheral: p() });
        assert_eq!(s.calls.recv().await, Some(Call::DiscoverServices(p())));

        s.radio(CentralEvent::ServicesDiscovered {
            peripheral: p(),
            services: Ok(vec![service]),
        });
        assert_eq!(
            s.calls.recv().await,
            Some(Call::DiscoverCharacteristics(p(), service))
        );

        s.radio(CentralEvent::CharacteristicsDiscovered {
            peripheral: p(),
            service,
            characteristics: Ok(vec![read, write]),
        });
        assert_eq!(
            s.calls.recv().await,
            Some(Call::SetNotify(p(), read.uuid, true))
        );

        s.radio(CentralEvent::NotifyStateUpdated {
            peripheral: p(),
            characteristic: read.uuid,
            notifying: true,
            error: None,
        });
        assert_eq!(s.events.recv().await, Some(ManagerEvent::Connected(d.clone())));

        // Writes beyond the slice size are refused
        s.manager.send(vec![0u8; 21]);
        assert_eq!(
            s.events.recv().await,
            Some(ManagerEvent::SendFailed(d.clone(), Error::UnableToWrite))
        );

        s.manager.send(vec![1, 2, 3]);
        assert_eq!(
            s.calls.recv().await,
            Some(Call::Write(p(), write.uuid, vec![1, 2, 3]))
        );
        let sent_at = Instant::now();

        assert_eq!(
            s.events.recv().await,
            Some(ManagerEvent::SendFailed(d.clone(), Error::TransferTimeout))
        );
        assert!(sent_at.elapsed() >= Duration::from_secs(5));

        // Connection survives a write timeout
        assert_eq!(
            s.manager.connection_state().await,
            ConnectionState::Connected
        );
    }
}
