// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device API
//!
//! One method per device operation. Each builds the matching [Task], assigns
//! its timeout and enqueues it on the [TaskQueue] owned by the API task, then
//! waits for the typed result. Device events must be routed to the API with
//! [DeviceApi::handle_event] (the communicator does this).

use std::{sync::Arc, time::Duration};

use log::{debug, warn};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};

use remote_dongle_apdu::{
    ops::{firmware::FirmwareVersion, public_key::PublicKeyResp, trusted_input::TrustedInput},
    tx::TxOutput,
    Bip32Path,
};

use crate::{
    attestation::{Attestation, AttestationKeyProvider},
    config::ApiConfig,
    queue::{ApduChannel, DeviceEvent, QueuedTask, TaskQueue, TaskResult},
    tasks::*,
    timer::sleep_until_opt,
    xpub::ExtendedPublicKey,
    CoinNetwork, Error,
};

/// Handle to a running device API task
///
/// The task exits once all handles are dropped, completing any queued
/// tasks with [Error::CancelledTask].
#[derive(Clone)]
pub struct DeviceApi {
    tx: mpsc::UnboundedSender<Command>,
    config: ApiConfig,
    keys: Arc<dyn AttestationKeyProvider>,
}

impl std::fmt::Debug for DeviceApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceApi")
            .field("config", &self.config)
            .finish()
    }
}

#[derive(Debug)]
enum Command {
    Enqueue(QueuedTask),
    Event(DeviceEvent),
    CancelAll(bool, oneshot::Sender<()>),
    ActiveTask(oneshot::Sender<Option<TaskKind>>),
    CachedFirmware(oneshot::Sender<Option<FirmwareVersion>>),
    CacheFirmware(FirmwareVersion),
    CachedAttestation(oneshot::Sender<Option<Attestation>>),
    CacheAttestation(Attestation),
}

/// Take the expected variant out of a task output
macro_rules! output {
    ($r:expr, $v:pat => $e:expr) => {
        match $r? {
            $v => Ok($e),
            other => {
                warn!("Unexpected task output: {other:?}");
                Err(Error::InvalidResponse)
            }
        }
    };
}

impl DeviceApi {
    /// Spawn an API task issuing APDUs over the provided channel
    pub fn spawn(
        channel: Arc<dyn ApduChannel>,
        config: ApiConfig,
        keys: Arc<dyn AttestationKeyProvider>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = Worker {
            queue: TaskQueue::new(channel),
            firmware: None,
            attestation: None,
        };

        tokio::spawn(worker.run(rx));

        Self { tx, config, keys }
    }

    fn command(&self, c: Command) {
        if self.tx.send(c).is_err() {
            warn!("Device API task exited");
        }
    }

    async fn query<T: Default>(&self, f: impl FnOnce(oneshot::Sender<T>) -> Command) -> T {
        let (tx, rx) = oneshot::channel();
        self.command(f(tx));
        rx.await.unwrap_or_default()
    }

    /// Enqueue a task and wait for its result
    pub async fn execute(&self, task: Task, timeout: Duration) -> TaskResult {
        let (q, rx) = QueuedTask::new(task, timeout);
        self.command(Command::Enqueue(q));

        // Dropped without completion means the API was torn down
        rx.await.unwrap_or(Err(Error::CancelledTask))
    }

    /// Route a device event to the running task
    pub fn handle_event(&self, evt: DeviceEvent) {
        self.command(Command::Event(evt))
    }

    /// Drop all pending tasks, see [TaskQueue::cancel_all]
    pub async fn cancel_all(&self, cancel_pending: bool) {
        self.query(|tx| Command::CancelAll(cancel_pending, tx)).await
    }

    /// Kind of the running task, if any
    pub async fn active_task(&self) -> Option<TaskKind> {
        self.query(Command::ActiveTask).await
    }

    /// Fetch the firmware version, cached for the session
    pub async fn firmware_version(&self) -> Result<FirmwareVersion, Error> {
        if let Some(v) = self.query(Command::CachedFirmware).await {
            return Ok(v);
        }

        debug!("Requesting firmware version");

        let r = self
            .execute(
                Task::GetFirmwareVersion(FirmwareVersionTask),
                self.config.request_timeout(),
            )
            .await;
        let v = output!(r, TaskOutput::FirmwareVersion(v) => v)?;

        self.command(Command::CacheFirmware(v));
        Ok(v)
    }

    /// Check device attestation, a successful result is cached for the session
    pub async fn check_attestation(&self) -> Result<Attestation, Error> {
        if let Some(a) = self.query(Command::CachedAttestation).await {
            return Ok(a);
        }

        debug!("Requesting attestation");

        let r = self
            .execute(
                Task::CheckAttestation(AttestationTask::new(self.keys.clone())),
                self.config.attestation_timeout(),
            )
            .await;
        let a = output!(r, TaskOutput::Attestation(v) => v)?;

        if a.authentic {
            self.command(Command::CacheAttestation(a.clone()));
        }
        Ok(a)
    }

    /// Present the PIN (or `None` to query the PIN state)
    pub async fn verify_pin(&self, pin: Option<&str>) -> Result<PinStatus, Error> {
        debug!("Requesting PIN verification");

        let r = self
            .execute(
                Task::VerifyPin(VerifyPinTask::new(pin)),
                self.config.user_timeout(),
            )
            .await;
        output!(r, TaskOutput::Pin(v) => v)
    }

    /// Fetch the raw public key, address and chain code for a path
    pub async fn public_key(&self, path: Bip32Path) -> Result<PublicKeyResp, Error> {
        debug!("Requesting public key for {path}");

        let r = self
            .execute(
                Task::GetPublicKey(PublicKeyTask::new(path)),
                self.config.request_timeout(),
            )
            .await;
        output!(r, TaskOutput::PublicKey(v) => v)
    }

    /// Build the extended public key for a BIP44 account
    pub async fn extended_public_key(
        &self,
        network: &CoinNetwork,
        account: u32,
    ) -> Result<ExtendedPublicKey, Error> {
        let path = network.account_path(account)?;
        let parent_path = path.parent().ok_or(Error::InvalidParameters)?;

        let parent = self.public_key(parent_path).await?;
        let child = self.public_key(path.clone()).await?;

        ExtendedPublicKey::from_device_keys(network, &path, &parent, &child)
    }

    /// Set address prefix bytes for the network
    pub async fn set_coin_version(&self, network: &CoinNetwork) -> Result<(), Error> {
        debug!("Setting coin version for {network}");

        let r = self
            .execute(
                Task::SetCoinVersion(CoinVersionTask::new(
                    network.p2pkh_prefix,
                    network.p2sh_prefix,
                )),
                self.config.request_timeout(),
            )
            .await;
        output!(r, TaskOutput::Unit => ())
    }

    /// Obtain a trusted input for an output of a previous transaction
    pub async fn trusted_input(
        &self,
        raw_tx: Vec<u8>,
        output_index: u32,
    ) -> Result<TrustedInput, Error> {
        debug!("Requesting trusted input for output {output_index}");

        let r = self
            .execute(
                Task::GetTrustedInput(TrustedInputTask::new(raw_tx, output_index)),
                self.config.request_timeout(),
            )
            .await;
        output!(r, TaskOutput::TrustedInput(v) => v)
    }

    /// Start hashing a transaction, signing input `trusted_input_index`
    pub async fn start_untrusted_hash(
        &self,
        trusted_inputs: Vec<TrustedInput>,
        trusted_input_index: usize,
        output_script: Vec<u8>,
    ) -> Result<(), Error> {
        if trusted_input_index >= trusted_inputs.len() {
            return Err(Error::InvalidParameters);
        }

        let r = self
            .execute(
                Task::StartUntrustedHash(StartUntrustedHashTask::new(
                    trusted_inputs,
                    trusted_input_index,
                    output_script,
                )),
                self.config.request_timeout(),
            )
            .await;
        output!(r, TaskOutput::Unit => ())
    }

    /// Stream transaction outputs and finalise the hash
    pub async fn finalize_full(
        &self,
        outputs: Vec<TxOutput>,
        change_path: Option<Bip32Path>,
    ) -> Result<(), Error> {
        let r = self
            .execute(
                Task::FinalizeFull(FinalizeFullTask::new(outputs, change_path)),
                self.config.request_timeout(),
            )
            .await;
        output!(r, TaskOutput::Unit => ())
    }

    /// Sign the hashed input with the key at `path`, returning a DER signature
    pub async fn sign_untrusted_hash(&self, path: Bip32Path) -> Result<Vec<u8>, Error> {
        debug!("Requesting signature for {path}");

        let r = self
            .execute(
                Task::SignUntrustedHash(SignHashTask::new(path)),
                self.config.user_timeout(),
            )
            .await;
        output!(r, TaskOutput::Signature(v) => v)
    }
}

struct Worker {
    queue: TaskQueue,
    firmware: Option<FirmwareVersion>,
    attestation: Option<Attestation>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("Starting device API");

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(c) => self.handle_command(c).await,
                    None => break,
                },
                _ = sleep_until_opt(self.queue.deadline()) => {
                    self.queue.handle_timeout(Instant::now()).await
                }
            }
        }

        debug!("Exiting device API");
    }

    async fn handle_command(&mut self, c: Command) {
        match c {
            Command::Enqueue(q) => self.queue.enqueue(q).await,
            Command::Event(evt) => {
                if let DeviceEvent::Disconnected(_) = &evt {
                    self.firmware = None;
                    self.attestation = None;
                }
                self.queue.handle_event(evt).await
            }
            Command::CancelAll(cancel_pending, tx) => {
                self.queue.cancel_all(cancel_pending);
                let _ = tx.send(());
            }
            Command::ActiveTask(tx) => {
                let _ = tx.send(self.queue.active_task());
            }
            Command::CachedFirmware(tx) => {
                let _ = tx.send(self.firmware);
            }
            Command::CacheFirmware(v) => self.firmware = Some(v),
            Command::CachedAttestation(tx) => {
                let _ = tx.send(self.attestation.clone());
            }
            Command::CacheAttestation(a) => self.attestation = Some(a),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use remote_dongle_apdu::{ApduResponse, StatusWord};

    use super::*;
    use crate::{attestation::LedgerAttestationKeys, ConnectionState};

    /// Channel that records sent APDUs
    struct FakeChannel {
        sent: Mutex<mpsc::UnboundedSender<Vec<u8>>>,
    }

    #[async_trait]
    impl ApduChannel for FakeChannel {
        async fn connection_state(&self) -> ConnectionState {
            ConnectionState::Connected
        }

        async fn send(&self, apdu: Vec<u8>) -> Result<(), Error> {
            self.sent.lock().unwrap().send(apdu).unwrap();
            Ok(())
        }

        async fn cancel_transfer(&self) {}
    }

    fn setup() -> (DeviceApi, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let c = Arc::new(FakeChannel {
            sent: Mutex::new(tx),
        });
        let api = DeviceApi::spawn(c, ApiConfig::default(), Arc::new(LedgerAttestationKeys));
        (api, rx)
    }

    const FIRMWARE: [u8; 8] = [0x00, 0x00, 0x01, 0x04, 0x03, 0x01, 0x02, 0x00];

    #[tokio::test]
    async fn firmware_version_cached() {
        let (api, mut sent) = setup();

        let a = api.clone();
        let h = tokio::spawn(async move { a.firmware_version().await });

        let req = sent.recv().await.unwrap();
        assert_eq!(&req[..2], &[0xe0, 0xc4]);

        api.handle_event(DeviceEvent::ApduSent);
        api.handle_event(DeviceEvent::ApduReceived(
            ApduResponse::ok(FIRMWARE.to_vec()).to_bytes(),
        ));

        let v = h.await.unwrap().unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 4, 3));

        // Second request is served from the cache
        assert_eq!(api.firmware_version().await, Ok(v));
        assert!(sent.try_recv().is_err());

        // Until disconnection
        api.handle_event(DeviceEvent::Disconnected(None));
        let a = api.clone();
        let _h = tokio::spawn(async move { a.firmware_version().await });
        assert_eq!(&sent.recv().await.unwrap()[..2], &[0xe0, 0xc4]);
    }

    #[tokio::test]
    async fn failures_are_reported_once() {
        let (api, mut sent) = setup();

        let a = api.clone();
        let h = tokio::spawn(async move { a.set_coin_version(&CoinNetwork::BITCOIN).await });

        let req = sent.recv().await.unwrap();
        assert_eq!(&req[..2], &[0xe0, 0x14]);
        assert_eq!(api.active_task().await, Some(TaskKind::SetCoinVersion));

        api.handle_event(DeviceEvent::ApduReceived(
            ApduResponse::new(vec![], StatusWord::INVALID_ACCESS_RIGHTS).to_bytes(),
        ));
        assert_eq!(h.await.unwrap(), Err(Error::InvalidAccessRights));
        assert_eq!(api.active_task().await, None);
    }

    #[tokio::test]
    async fn cancel_pending_tasks() {
        let (api, mut sent) = setup();

        let a = api.clone();
        let h1 = tokio::spawn(async move { a.verify_pin(Some("1234")).await });
        let _ = sent.recv().await.unwrap();

        let a = api.clone();
        let h2 = tokio::spawn(async move { a.public_key("m/44'/0'".parse().unwrap()).await });

        // Let the second task reach the queue
        tokio::task::yield_now().await;
        assert_eq!(api.active_task().await, Some(TaskKind::VerifyPin));

        api.cancel_all(true).await;
        assert_eq!(h2.await.unwrap(), Err(Error::CancelledTask));

        // Running task is only cancelled by disconnection
        api.handle_event(DeviceEvent::Disconnected(None));
        assert_eq!(h1.await.unwrap(), Err(Error::CancelledTask));
    }

    #[tokio::test]
    async fn invalid_untrusted_hash_index() {
        let (api, _sent) = setup();

        let r = api
            .start_untrusted_hash(vec![TrustedInput([0u8; 56])], 1, vec![])
            .await;
        assert_eq!(r, Err(Error::InvalidParameters));
    }
}
