// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Devices coordinator
//!
//! Selects the transport manager for a device and drives APDU transfers over it,
//! one at a time: slices are written sequentially (each after the previous
//! write completes), then response slices are collected until the slicer can
//! reassemble the response. Each phase is guarded by its own transfer timer.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};

use crate::{
    config::CoordinatorConfig,
    queue::ApduChannel,
    slicer::{ApduSlice, ApduSlicer, Slicer},
    timer::sleep_until_opt,
    transport::{ManagerEvent, TransportManager},
    ConnectionState, Device, Error,
};

/// Events emitted by the coordinator
#[derive(Clone, Debug, PartialEq)]
pub enum CoordinatorEvent {
    DeviceFound(Arc<Device>),
    DeviceLost(Arc<Device>),
    Connected(Arc<Device>),
    FailedToConnect(Arc<Device>),
    Disconnected(Arc<Device>, Option<Error>),
    /// All slices of the current APDU were written
    ApduSent(Arc<Device>),
    SendFailed(Arc<Device>, Error),
    /// A complete response APDU was reassembled
    ApduReceived(Arc<Device>, Vec<u8>),
    ReceiveFailed(Arc<Device>, Error),
}

/// Handle to a running coordinator task
#[derive(Clone, Debug)]
pub struct DevicesCoordinator {
    tx: mpsc::UnboundedSender<Command>,
}

#[derive(Debug)]
enum Command {
    StartScanning,
    StopScanning(oneshot::Sender<()>),
    IsScanning(oneshot::Sender<bool>),
    Connect(Arc<Device>),
    Disconnect(oneshot::Sender<()>),
    Send(Vec<u8>, oneshot::Sender<Result<(), Error>>),
    CancelTransfer(oneshot::Sender<()>),
    State(oneshot::Sender<ConnectionState>),
    ActiveDevice(oneshot::Sender<Option<Arc<Device>>>),
}

impl DevicesCoordinator {
    /// Spawn a coordinator over the provided transport managers
    ///
    /// All managers publish onto the shared `manager_events` channel,
    /// coordinator events are published on `events`.
    pub fn spawn(
        managers: Vec<Arc<dyn TransportManager>>,
        manager_events: mpsc::UnboundedReceiver<ManagerEvent>,
        config: CoordinatorConfig,
        events: mpsc::UnboundedSender<CoordinatorEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = Worker {
            managers,
            config,
            events,
            manager: None,
            device: None,
            transfer: Transfer::Idle,
            deadline: None,
        };

        tokio::spawn(worker.run(rx, manager_events));

        Self { tx }
    }

    fn command(&self, c: Command) {
        if self.tx.send(c).is_err() {
            warn!("Coordinator task exited");
        }
    }

    async fn query<T: Default>(&self, f: impl FnOnce(oneshot::Sender<T>) -> Command) -> T {
        let (tx, rx) = oneshot::channel();
        self.command(f(tx));
        rx.await.unwrap_or_default()
    }

    /// Start scanning on all transports
    pub fn start_scanning(&self) {
        self.command(Command::StartScanning)
    }

    /// Stop scanning on all transports
    pub async fn stop_scanning(&self) {
        self.query(Command::StopScanning).await
    }

    pub async fn is_scanning(&self) -> bool {
        self.query(Command::IsScanning).await
    }

    /// Connect to a device, the outcome is reported via events
    pub fn connect(&self, device: Arc<Device>) {
        self.command(Command::Connect(device))
    }

    /// Disconnect the active device, cancelling any transfer
    pub async fn disconnect(&self) {
        self.query(Command::Disconnect).await
    }

    /// Start an APDU transfer
    ///
    /// Returns once the transfer is accepted, completion is reported via
    /// [CoordinatorEvent::ApduSent] and [CoordinatorEvent::ApduReceived].
    pub async fn send(&self, apdu: Vec<u8>) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Send(apdu, tx));
        rx.await.unwrap_or(Err(Error::CancelledTask))
    }

    /// Abort any in-flight transfer without notification
    pub async fn cancel_transfer(&self) {
        self.query(Command::CancelTransfer).await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.query(Command::State).await
    }

    pub async fn active_device(&self) -> Option<Arc<Device>> {
        self.query(Command::ActiveDevice).await
    }
}

#[async_trait]
impl ApduChannel for DevicesCoordinator {
    async fn connection_state(&self) -> ConnectionState {
        DevicesCoordinator::connection_state(self).await
    }

    async fn send(&self, apdu: Vec<u8>) -> Result<(), Error> {
        DevicesCoordinator::send(self, apdu).await
    }

    async fn cancel_transfer(&self) {
        DevicesCoordinator::cancel_transfer(self).await
    }
}

/// Transfer state, exactly one holds at any time
#[derive(Debug)]
enum Transfer {
    Idle,
    Writing {
        pending: VecDeque<ApduSlice>,
        slicer: Slicer,
    },
    Reading {
        slices: Vec<ApduSlice>,
        slicer: Slicer,
    },
}

struct Worker {
    managers: Vec<Arc<dyn TransportManager>>,
    config: CoordinatorConfig,
    events: mpsc::UnboundedSender<CoordinatorEvent>,

    manager: Option<Arc<dyn TransportManager>>,
    device: Option<Arc<Device>>,
    transfer: Transfer,
    deadline: Option<Instant>,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut manager_events: mpsc::UnboundedReceiver<ManagerEvent>,
    ) {
        debug!("Starting devices coordinator");

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(c) => self.handle_command(c).await,
                    None => break,
                },
                Some(evt) = manager_events.recv() => self.handle_event(evt),
                _ = sleep_until_opt(self.deadline) => self.handle_timeout(),
            }
        }

        debug!("Exiting devices coordinator");

        self.reset_transfer();
        for m in &self.managers {
            m.stop_scanning().await;
        }
        if let Some(m) = &self.manager {
            m.disconnect().await;
        }
    }

    fn notify(&self, evt: CoordinatorEvent) {
        let _ = self.events.send(evt);
    }

    fn reset_transfer(&mut self) {
        self.transfer = Transfer::Idle;
        self.deadline = None;
    }

    fn reset(&mut self) {
        self.manager = None;
        self.device = None;
        self.reset_transfer();
    }

    async fn state(&self) -> ConnectionState {
        match &self.manager {
            Some(m) => m.connection_state().await,
            None => ConnectionState::Disconnected,
        }
    }

    async fn handle_command(&mut self, c: Command) {
        match c {
            Command::StartScanning => {
                info!("Start scanning all transport types");
                self.managers.iter().for_each(|m| m.start_scanning());
            }
            Command::StopScanning(done) => {
                info!("Stop scanning all transport types");
                for m in &self.managers {
                    m.stop_scanning().await;
                }
                let _ = done.send(());
            }
            Command::IsScanning(r) => {
                let mut scanning = false;
                for m in &self.managers {
                    scanning |= m.is_scanning().await;
                }
                let _ = r.send(scanning);
            }
            Command::Connect(d) => self.connect(d).await,
            Command::Disconnect(done) => {
                self.disconnect().await;
                let _ = done.send(());
            }
            Command::Send(apdu, r) => {
                let res = self.send(apdu).await;
                let _ = r.send(res);
            }
            Command::CancelTransfer(done) => {
                if !matches!(self.transfer, Transfer::Idle) {
                    debug!("Cancelling transfer");
                }
                self.reset_transfer();
                let _ = done.send(());
            }
            Command::State(r) => {
                let _ = r.send(self.state().await);
            }
            Command::ActiveDevice(r) => {
                let d = match &self.manager {
                    Some(m) => m.active_device().await,
                    None => None,
                };
                let _ = r.send(d);
            }
        }
    }

    async fn connect(&mut self, device: Arc<Device>) {
        if self.state().await != ConnectionState::Disconnected {
            warn!("Unable to connect {device}, a device is already active");
            self.notify(CoordinatorEvent::FailedToConnect(device));
            return;
        }

        let t = device.transport_type();
        let Some(manager) = self.managers.iter().find(|m| m.transport_type() == t).cloned() else {
            error!("Unable to connect {device}, no manager for transport type {t}");
            self.notify(CoordinatorEvent::FailedToConnect(device));
            return;
        };

        info!("Connecting device {device}");

        self.reset_transfer();
        self.manager = Some(manager.clone());
        self.device = Some(device.clone());
        manager.connect(device);
    }

    async fn disconnect(&mut self) {
        let Some(manager) = self.manager.clone() else {
            return;
        };
        if self.state().await == ConnectionState::Disconnected {
            return;
        }

        if let Some(d) = &self.device {
            info!("Disconnecting device {d}");
        }

        // Manager reports the disconnection, resetting remaining state
        self.reset_transfer();
        manager.disconnect().await;
    }

    async fn send(&mut self, apdu: Vec<u8>) -> Result<(), Error> {
        let (Some(manager), Some(device)) = (self.manager.clone(), self.device.clone()) else {
            return Err(Error::NotConnected);
        };
        if manager.connection_state().await != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }

        if !matches!(self.transfer, Transfer::Idle) {
            warn!("Unable to send APDU {}, transfer pending", hex::encode(&apdu));
            return Err(Error::TransferPending);
        }

        let slicer = Slicer::from(device.transport_type());
        let slices = slicer.slice_apdu(&apdu, device.descriptor.write_byte_size());

        let Some(first) = slices.first() else {
            error!("Unable to slice APDU {}", hex::encode(&apdu));
            return Err(Error::InvalidParameters);
        };

        debug!("-> APDU {} ({} slices)", hex::encode(&apdu), slices.len());

        manager.send(first.data.clone());

        self.transfer = Transfer::Writing {
            pending: slices.into(),
            slicer,
        };
        self.deadline = Some(Instant::now() + self.config.transfer_timeout());

        Ok(())
    }

    fn is_current(&self, device: &Device) -> bool {
        self.device
            .as_ref()
            .map(|d| d.same_as(device))
            .unwrap_or(false)
    }

    fn handle_event(&mut self, evt: ManagerEvent) {
        match evt {
            ManagerEvent::DeviceFound(d) => self.notify(CoordinatorEvent::DeviceFound(d)),
            ManagerEvent::DeviceLost(d) => self.notify(CoordinatorEvent::DeviceLost(d)),
            ManagerEvent::Connected(d) => {
                if self.is_current(&d) {
                    self.notify(CoordinatorEvent::Connected(d));
                }
            }
            ManagerEvent::FailedToConnect(d) => {
                self.reset();
                self.notify(CoordinatorEvent::FailedToConnect(d));
            }
            ManagerEvent::Disconnected(d, e) => {
                self.reset();
                self.notify(CoordinatorEvent::Disconnected(d, e));
            }
            ManagerEvent::DataSent(d, data) if self.is_current(&d) => self.data_sent(d, data),
            ManagerEvent::SendFailed(d, e) if self.is_current(&d) => {
                if matches!(self.transfer, Transfer::Writing { .. }) {
                    error!("Failed to send APDU to {d}: {e}");
                    self.reset_transfer();
                    self.notify(CoordinatorEvent::SendFailed(d, e));
                }
            }
            ManagerEvent::DataReceived(d, data) if self.is_current(&d) => {
                self.data_received(d, data)
            }
            ManagerEvent::ReceiveFailed(d, e) if self.is_current(&d) => {
                if matches!(self.transfer, Transfer::Reading { .. }) {
                    error!("Failed to receive APDU from {d}: {e}");
                    self.reset_transfer();
                    self.notify(CoordinatorEvent::ReceiveFailed(d, e));
                }
            }
            evt => debug!("Ignoring event for inactive device: {evt:?}"),
        }
    }

    fn data_sent(&mut self, device: Arc<Device>, data: Vec<u8>) {
        let Transfer::Writing { pending, slicer } = &mut self.transfer else {
            return;
        };

        if pending.front().map(|s| s.data != data).unwrap_or(true) {
            error!("Sent data does not match current slice");
            self.reset_transfer();
            self.notify(CoordinatorEvent::SendFailed(device, Error::UnableToWrite));
            return;
        }

        if let Some(s) = pending.pop_front() {
            trace!("Sent slice {}: {}", s.index, hex::encode(&s.data));
        }

        let next = pending.front().map(|s| s.data.clone());
        let slicer = *slicer;

        match (next, &self.manager) {
            (Some(data), Some(manager)) => manager.send(data),
            (Some(_), None) => {
                self.reset_transfer();
                self.notify(CoordinatorEvent::SendFailed(device, Error::NotConnected));
            }
            (None, _) => {
                self.transfer = Transfer::Reading {
                    slices: vec![],
                    slicer,
                };
                // Read timer starts with the first response slice
                self.deadline = None;
                self.notify(CoordinatorEvent::ApduSent(device));
            }
        }
    }

    fn data_received(&mut self, device: Arc<Device>, data: Vec<u8>) {
        let Transfer::Reading { slices, slicer } = &mut self.transfer else {
            debug!("Ignoring data received outside of a transfer");
            return;
        };

        let Some(slice) = slicer.slice_from_data(&data) else {
            error!("Unable to parse slice: {}", hex::encode(&data));
            self.reset_transfer();
            self.notify(CoordinatorEvent::ReceiveFailed(device, Error::UnableToRead));
            return;
        };

        trace!("Received slice {}: {}", slice.index, hex::encode(&slice.data));

        let first = slice.index == 0;
        slices.push(slice);

        if let Some(apdu) = slicer.join_slices(slices) {
            debug!("<- APDU {}", hex::encode(&apdu));
            self.reset_transfer();
            self.notify(CoordinatorEvent::ApduReceived(device, apdu));
            return;
        }

        if first {
            self.deadline = Some(Instant::now() + self.config.transfer_timeout());
        }
    }

    fn handle_timeout(&mut self) {
        self.deadline = None;

        let Some(device) = self.device.clone() else {
            self.reset_transfer();
            return;
        };

        match std::mem::replace(&mut self.transfer, Transfer::Idle) {
            Transfer::Writing { .. } => {
                error!("Write transfer timed out for {device}");
                self.notify(CoordinatorEvent::SendFailed(device, Error::TransferTimeout));
            }
            Transfer::Reading { .. } => {
                error!("Read transfer timed out for {device}");
                self.notify(CoordinatorEvent::ReceiveFailed(device, Error::TransferTimeout));
            }
            Transfer::Idle => (),
        }
    }
}
