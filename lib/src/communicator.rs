// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device communicator
//!
//! Composes the [DevicesCoordinator] and [DeviceApi] into the application
//! facing connection state machine. A device is only reported connected (and
//! its [DeviceApi] exposed) once it passes attestation, a failed attestation
//! forces a disconnection with [Error::UnableToAuthentify].

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::{
    api::DeviceApi,
    attestation::{Attestation, AttestationKeyProvider},
    config::{ApiConfig, Config},
    coordinator::{CoordinatorEvent, DevicesCoordinator},
    device::BluetoothDescriptor,
    queue::DeviceEvent,
    transport::{BluetoothManager, Central, CentralEvent, TransportManager},
    ConnectionState, Device, Error,
};

/// Scan results
#[derive(Clone, Debug, PartialEq)]
pub enum ScanEvent {
    Found(Arc<Device>),
    Lost(Arc<Device>),
}

/// Connection results for a [DeviceCommunicator::connect] request
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    /// Connected and attested
    Connected(Arc<Device>),
    FailedToConnect(Arc<Device>, Error),
    Disconnected(Arc<Device>, Option<Error>),
}

/// Handle to a running communicator task
#[derive(Clone, Debug)]
pub struct DeviceCommunicator {
    tx: mpsc::UnboundedSender<Command>,
}

#[derive(Debug)]
enum Command {
    StartScanning(oneshot::Sender<mpsc::UnboundedReceiver<ScanEvent>>),
    StopScanning(oneshot::Sender<()>),
    IsScanning(oneshot::Sender<bool>),
    Connect(Arc<Device>, oneshot::Sender<mpsc::UnboundedReceiver<ConnectionEvent>>),
    Disconnect(oneshot::Sender<()>),
    State(oneshot::Sender<ConnectionState>),
    ActiveDevice(oneshot::Sender<Option<Arc<Device>>>),
    Api(oneshot::Sender<Option<DeviceApi>>),
}

impl DeviceCommunicator {
    /// Spawn a communicator over a coordinator and its event stream
    pub fn spawn(
        coordinator: DevicesCoordinator,
        coordinator_events: mpsc::UnboundedReceiver<CoordinatorEvent>,
        config: ApiConfig,
        keys: Arc<dyn AttestationKeyProvider>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (attest_tx, attest_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            coordinator,
            config,
            keys,
            attest_tx,
            session: 0,
            scan_tx: None,
            conn_tx: None,
            api: None,
            passing_attestation: None,
            forced_error: None,
        };

        tokio::spawn(worker.run(rx, coordinator_events, attest_rx));

        Self { tx }
    }

    /// Build the full bluetooth stack over a radio central
    pub fn bluetooth(
        central: Arc<dyn Central>,
        radio: mpsc::UnboundedReceiver<CentralEvent>,
        descriptors: Vec<BluetoothDescriptor>,
        config: Config,
        keys: Arc<dyn AttestationKeyProvider>,
    ) -> Self {
        let (manager_tx, manager_rx) = mpsc::unbounded_channel();
        let manager =
            BluetoothManager::spawn(central, radio, descriptors, config.transport, manager_tx);

        let managers: Vec<Arc<dyn TransportManager>> = vec![Arc::new(manager)];

        let (coordinator_tx, coordinator_rx) = mpsc::unbounded_channel();
        let coordinator =
            DevicesCoordinator::spawn(managers, manager_rx, config.coordinator, coordinator_tx);

        Self::spawn(coordinator, coordinator_rx, config.api, keys)
    }

    fn command(&self, c: Command) {
        if self.tx.send(c).is_err() {
            warn!("Communicator task exited");
        }
    }

    async fn query<T: Default>(&self, f: impl FnOnce(oneshot::Sender<T>) -> Command) -> T {
        let (tx, rx) = oneshot::channel();
        self.command(f(tx));
        rx.await.unwrap_or_default()
    }

    /// Start scanning, devices are reported on the returned stream
    ///
    /// A new request while scanning replaces the previous stream.
    pub async fn start_scanning(&self) -> mpsc::UnboundedReceiver<ScanEvent> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::StartScanning(tx));

        match rx.await {
            Ok(r) => r,
            // Closed stream when the communicator has exited
            Err(_) => mpsc::unbounded_channel().1,
        }
    }

    /// Stop scanning, closing the scan stream
    pub async fn stop_scanning(&self) {
        self.query(Command::StopScanning).await
    }

    pub async fn is_scanning(&self) -> bool {
        self.query(Command::IsScanning).await
    }

    /// Connect to a device, results are reported on the returned stream
    pub async fn connect(&self, device: Arc<Device>) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Connect(device.clone(), tx));

        match rx.await {
            Ok(r) => r,
            Err(_) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let _ = tx.send(ConnectionEvent::FailedToConnect(device, Error::UnableToConnect));
                rx
            }
        }
    }

    /// Disconnect the active device
    pub async fn disconnect(&self) {
        self.query(Command::Disconnect).await
    }

    /// Connection state, [ConnectionState::Connected] only once attested
    pub async fn connection_state(&self) -> ConnectionState {
        self.query(Command::State).await
    }

    /// Active device, only once attested
    pub async fn active_device(&self) -> Option<Arc<Device>> {
        self.query(Command::ActiveDevice).await
    }

    /// Device API for the attested device
    pub async fn device_api(&self) -> Option<DeviceApi> {
        self.query(Command::Api).await
    }
}

/// Attestation outcome for a connection session
struct AttestationResult {
    session: u64,
    device: Arc<Device>,
    result: Result<Attestation, Error>,
}

struct Worker {
    coordinator: DevicesCoordinator,
    config: ApiConfig,
    keys: Arc<dyn AttestationKeyProvider>,
    attest_tx: mpsc::UnboundedSender<AttestationResult>,

    /// Incremented per connection, stale attestation results are dropped
    session: u64,
    scan_tx: Option<mpsc::UnboundedSender<ScanEvent>>,
    conn_tx: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    api: Option<DeviceApi>,
    passing_attestation: Option<bool>,
    forced_error: Option<Error>,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut coordinator_events: mpsc::UnboundedReceiver<CoordinatorEvent>,
        mut attestations: mpsc::UnboundedReceiver<AttestationResult>,
    ) {
        debug!("Starting device communicator");

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(c) => self.handle_command(c).await,
                    None => break,
                },
                Some(evt) = coordinator_events.recv() => self.handle_event(evt).await,
                Some(r) = attestations.recv() => self.attestation_complete(r).await,
            }
        }

        debug!("Exiting device communicator");

        self.coordinator.stop_scanning().await;
        self.coordinator.disconnect().await;
    }

    /// Coordinator state gated on attestation
    async fn state(&self) -> ConnectionState {
        match self.coordinator.connection_state().await {
            ConnectionState::Connected => match self.passing_attestation {
                None => ConnectionState::Connecting,
                Some(false) => ConnectionState::Disconnected,
                Some(true) => ConnectionState::Connected,
            },
            s => s,
        }
    }

    async fn handle_command(&mut self, c: Command) {
        match c {
            Command::StartScanning(tx) => {
                let (scan_tx, scan_rx) = mpsc::unbounded_channel();

                if self.scan_tx.replace(scan_tx).is_none() {
                    info!("Start scanning devices");
                    self.coordinator.start_scanning();
                }

                let _ = tx.send(scan_rx);
            }
            Command::StopScanning(tx) => {
                if self.scan_tx.take().is_some() {
                    info!("Stop scanning devices");
                    self.coordinator.stop_scanning().await;
                }
                let _ = tx.send(());
            }
            Command::IsScanning(tx) => {
                let _ = tx.send(self.coordinator.is_scanning().await);
            }
            Command::Connect(device, tx) => {
                let (conn_tx, conn_rx) = mpsc::unbounded_channel();

                if self.state().await != ConnectionState::Disconnected {
                    warn!("Connection to {} requested while busy", device.uid);
                    let _ = conn_tx.send(ConnectionEvent::FailedToConnect(
                        device,
                        Error::UnableToConnect,
                    ));
                } else {
                    info!("Connecting device {}", device.uid);
                    self.conn_tx = Some(conn_tx);
                    self.coordinator.connect(device);
                }

                let _ = tx.send(conn_rx);
            }
            Command::Disconnect(tx) => {
                self.disconnect(None).await;
                let _ = tx.send(());
            }
            Command::State(tx) => {
                let _ = tx.send(self.state().await);
            }
            Command::ActiveDevice(tx) => {
                let d = match self.passing_attestation {
                    Some(true) => self.coordinator.active_device().await,
                    _ => None,
                };
                let _ = tx.send(d);
            }
            Command::Api(tx) => {
                let a = match self.passing_attestation {
                    Some(true) => self.api.clone(),
                    _ => None,
                };
                let _ = tx.send(a);
            }
        }
    }

    async fn disconnect(&mut self, forced_error: Option<Error>) {
        let Some(device) = self.coordinator.active_device().await else {
            return;
        };

        info!("Disconnecting device {}", device.uid);
        self.forced_error = forced_error;
        self.coordinator.disconnect().await;
    }

    fn reset(&mut self) {
        self.conn_tx = None;
        self.passing_attestation = None;
        self.forced_error = None;
        self.api = None;
    }

    fn notify_scan(&self, evt: ScanEvent) {
        if let Some(tx) = &self.scan_tx {
            let _ = tx.send(evt);
        }
    }

    fn notify_connection(&self, evt: ConnectionEvent) {
        if let Some(tx) = &self.conn_tx {
            let _ = tx.send(evt);
        }
    }

    fn forward(&self, evt: DeviceEvent) {
        if let Some(api) = &self.api {
            api.handle_event(evt);
        }
    }

    async fn handle_event(&mut self, evt: CoordinatorEvent) {
        match evt {
            CoordinatorEvent::DeviceFound(d) => self.notify_scan(ScanEvent::Found(d)),
            CoordinatorEvent::DeviceLost(d) => self.notify_scan(ScanEvent::Lost(d)),
            CoordinatorEvent::Connected(d) => self.check_attestation(d).await,
            CoordinatorEvent::FailedToConnect(d) => {
                error!("Failed to connect device {}", d.uid);
                self.notify_connection(ConnectionEvent::FailedToConnect(
                    d,
                    Error::UnableToConnect,
                ));
                self.reset();
            }
            CoordinatorEvent::Disconnected(d, e) => {
                match &e {
                    Some(e) => error!("Disconnected device {} with error {e}", d.uid),
                    None => info!("Disconnected device {}", d.uid),
                }

                let reported = e.clone().or_else(|| self.forced_error.clone());
                self.notify_connection(ConnectionEvent::Disconnected(d, reported));

                self.forward(DeviceEvent::Disconnected(e));
                self.reset();
            }
            CoordinatorEvent::ApduSent(_) => self.forward(DeviceEvent::ApduSent),
            CoordinatorEvent::SendFailed(_, e) => self.forward(DeviceEvent::SendFailed(e)),
            CoordinatorEvent::ApduReceived(_, data) => {
                self.forward(DeviceEvent::ApduReceived(data))
            }
            CoordinatorEvent::ReceiveFailed(_, e) => self.forward(DeviceEvent::ReceiveFailed(e)),
        }
    }

    /// Start the attestation check for a newly connected device
    async fn check_attestation(&mut self, device: Arc<Device>) {
        if self.state().await != ConnectionState::Connecting {
            warn!("Ignoring connection of {} in unexpected state", device.uid);
            return;
        }

        info!("Checking attestation for device {}", device.uid);

        self.session += 1;

        let api = DeviceApi::spawn(
            Arc::new(self.coordinator.clone()),
            self.config.clone(),
            self.keys.clone(),
        );
        self.api = Some(api.clone());

        let session = self.session;
        let attest_tx = self.attest_tx.clone();

        // Runs outside the worker so device events keep flowing to the API
        tokio::spawn(async move {
            let result = api.check_attestation().await;
            let _ = attest_tx.send(AttestationResult {
                session,
                device,
                result,
            });
        });
    }

    async fn attestation_complete(&mut self, r: AttestationResult) {
        if r.session != self.session || self.api.is_none() {
            debug!("Dropping stale attestation result for {}", r.device.uid);
            return;
        }

        let device = r.device;
        let passed = match r.result {
            Ok(a) if a.authentic => {
                info!(
                    "Attestation passed for device {} (beta = {}), considering connected",
                    device.uid, a.beta
                );
                true
            }
            Ok(_) => {
                warn!("Attestation failed for device {}, disconnecting", device.uid);
                false
            }
            Err(e) => {
                warn!("Attestation error for device {}: {e}, disconnecting", device.uid);
                false
            }
        };

        self.passing_attestation = Some(passed);

        match passed {
            true => {
                info!("Connected device {}", device.uid);
                self.notify_connection(ConnectionEvent::Connected(device));
            }
            false => self.disconnect(Some(Error::UnableToAuthentify)).await,
        }
    }
}
