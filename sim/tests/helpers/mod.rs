// Copyright (c) 2022-2023 The MobileCoin Foundation

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use log::{debug, LevelFilter};
use tokio::{sync::mpsc, time::timeout};

use remote_dongle::{
    apdu::tx::{Transaction, TxInput, TxOutput},
    AttestationKeyProvider, Config, ConnectionEvent, Device, DeviceApi, DeviceCommunicator,
    ScanEvent,
};
use remote_dongle_sim::{descriptor, Faults, SimApplet, SimCentral, SimPeripheral};

/// Simulated peripheral identifier
pub const SIM_ID: &str = "sim-0";

/// Timeout for awaiting stack events
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Setup logging using the `LOG_LEVEL` environment variable
pub fn setup_logging() {
    let level = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Off);

    let _ = simplelog::SimpleLogger::init(level, simplelog::Config::default());
}

/// Running stack over a single simulated peripheral
pub struct Stack {
    pub central: Arc<SimCentral>,
    pub communicator: DeviceCommunicator,
    pub device: Arc<Device>,
}

/// Setup a stack trusting the applet's attestation key
pub async fn setup(applet: SimApplet) -> anyhow::Result<Stack> {
    let keys = Arc::new(applet.attestation_keys());
    setup_with(applet, keys, Faults::default(), Config::default()).await
}

/// Setup a stack and scan until the simulated peripheral is found
pub async fn setup_with(
    applet: SimApplet,
    keys: Arc<dyn AttestationKeyProvider>,
    faults: Faults,
    config: Config,
) -> anyhow::Result<Stack> {
    setup_logging();

    let (central, radio) = SimCentral::new();
    central.add_peripheral(SimPeripheral::new(SIM_ID, "Nano X 0001", applet).with_faults(faults));

    let communicator = DeviceCommunicator::bluetooth(
        central.clone(),
        radio,
        vec![descriptor()],
        config,
        keys,
    );

    let mut scan = communicator.start_scanning().await;
    let device = match next(&mut scan).await? {
        ScanEvent::Found(d) => d,
        evt => return Err(anyhow::anyhow!("Unexpected scan event: {evt:?}")),
    };
    communicator.stop_scanning().await;

    debug!("Found simulated device: {device}");

    Ok(Stack {
        central,
        communicator,
        device,
    })
}

impl Stack {
    /// Connect to the simulated device, returning the connection event stream
    pub async fn connect(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        self.communicator.connect(self.device.clone()).await
    }

    /// Connect and await attestation, returning the device API
    pub async fn connect_api(&self) -> anyhow::Result<(DeviceApi, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        let mut events = self.connect().await;

        match next(&mut events).await? {
            ConnectionEvent::Connected(_) => (),
            evt => return Err(anyhow::anyhow!("Connection failed: {evt:?}")),
        }

        let api = self
            .communicator
            .device_api()
            .await
            .ok_or_else(|| anyhow::anyhow!("No device API"))?;

        Ok((api, events))
    }
}

/// Await the next event on a stream
pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> anyhow::Result<T> {
    match timeout(EVENT_TIMEOUT, rx.recv()).await {
        Ok(Some(v)) => Ok(v),
        Ok(None) => Err(anyhow::anyhow!("Event stream closed")),
        Err(_) => Err(anyhow::anyhow!("Timeout awaiting event")),
    }
}

/// P2PKH output script for a 20-byte key hash
pub fn p2pkh_script(hash: [u8; 20]) -> Vec<u8> {
    let mut s = vec![0x76, 0xa9, 0x14];
    s.extend_from_slice(&hash);
    s.extend_from_slice(&[0x88, 0xac]);
    s
}

/// Previous transaction with a standard output and a long data output
pub fn previous_tx() -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            prev_hash: [0x11; 32],
            prev_index: 0,
            script: vec![0x51; 107],
            sequence: 0xffff_ffff,
        }],
        outputs: vec![
            TxOutput::new(50_000, p2pkh_script([0xab; 20])),
            TxOutput::new(1_000, vec![0x6a; 300]),
        ],
        lock_time: 0,
    }
}

/// Encode a transaction
pub fn encode_tx(tx: &Transaction) -> Vec<u8> {
    use encdec::Encode;

    let mut b = vec![0u8; tx.encode_len().unwrap()];
    let n = tx.encode(&mut b).unwrap();
    b.truncate(n);
    b
}
