// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Command line utility driving the remote dongle stack against a simulated device

use std::{sync::Arc, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, error, info, LevelFilter};
use tokio::time::timeout;

use remote_dongle::{
    apdu::Bip32Path, CoinNetwork, Config, ConnectionEvent, Device, DeviceApi, DeviceCommunicator,
    ScanEvent,
};
use remote_dongle_sim::{descriptor, SimApplet, SimCentral, SimPeripheral, DEFAULT_PIN};

mod helpers;
use helpers::*;

/// Interval to collect scan results for
const SCAN_WINDOW: Duration = Duration::from_secs(1);

/// Remote dongle command line utility
#[derive(Clone, PartialEq, Debug, Parser)]
struct Options {
    /// Subcommand to execute
    #[clap(subcommand)]
    cmd: Actions,

    /// Stack configuration file (JSON)
    #[clap(long)]
    config: Option<String>,

    /// PIN presented before key operations
    #[clap(long, env = "DONGLE_PIN", default_value = DEFAULT_PIN)]
    pin: String,

    /// Simulated device key seed
    #[clap(long, default_value = "4242424242424242424242424242424242424242424242424242424242424242")]
    seed: HexData<32>,

    /// Simulated device PIN
    #[clap(long, default_value = DEFAULT_PIN)]
    device_pin: String,

    /// Coin network
    #[clap(long, value_enum, default_value = "bitcoin")]
    network: Network,

    /// Enable verbose logging
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
enum Network {
    Bitcoin,
    Testnet,
}

impl From<Network> for CoinNetwork {
    fn from(n: Network) -> Self {
        match n {
            Network::Bitcoin => CoinNetwork::BITCOIN,
            Network::Testnet => CoinNetwork::BITCOIN_TESTNET,
        }
    }
}

#[derive(Clone, PartialEq, Debug, Subcommand)]
#[non_exhaustive]
enum Actions {
    /// List available devices
    List,

    /// Fetch firmware version
    Firmware,

    /// Check device attestation
    Attestation,

    /// Verify the PIN and report the device PIN state
    VerifyPin,

    /// Fetch the public key for a BIP32 path
    PublicKey {
        /// BIP32 derivation path
        #[clap(long, default_value = "m/44'/0'/0'/0/0")]
        path: Bip32Path,
    },

    /// Fetch the extended public key for a BIP44 account
    Xpub {
        /// BIP44 account index
        #[clap(long, default_value = "0")]
        account: u32,
    },

    /// Fetch a trusted input for an output of a previous transaction
    TrustedInput {
        /// Hex-encoded raw transaction
        #[clap(long)]
        tx: HexBytes,

        /// Output index
        #[clap(long, default_value = "0")]
        index: u32,
    },
}

impl Actions {
    /// Check whether the action requires a verified PIN
    fn requires_pin(&self) -> bool {
        matches!(
            self,
            Actions::PublicKey { .. } | Actions::Xpub { .. } | Actions::TrustedInput { .. }
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Options::parse();

    // Setup logging
    let _ = simplelog::SimpleLogger::init(args.log_level, simplelog::Config::default());

    // Load stack configuration
    let config: Config = match &args.config {
        Some(f) => {
            debug!("Loading configuration from '{f}'");
            let s = tokio::fs::read_to_string(f).await?;
            serde_json::from_str(&s)?
        }
        None => Config::default(),
    };

    // Setup simulated device
    let (central, radio) = SimCentral::new();
    let applet = SimApplet::new(args.seed.0, &args.device_pin);
    let keys = applet.attestation_keys();
    central.add_peripheral(SimPeripheral::new("sim-0", "Nano X 5A1D", applet));

    let c = DeviceCommunicator::bluetooth(
        central,
        radio,
        vec![descriptor()],
        config,
        Arc::new(keys),
    );

    // Scan for devices
    let devices = scan(&c).await;
    if devices.is_empty() {
        return Err(anyhow::anyhow!("No devices found"));
    }

    // Handle list command
    if args.cmd == Actions::List {
        info!("Devices:");
        for (i, d) in devices.iter().enumerate() {
            info!("  {}: {}", i, d);
        }

        return Ok(());
    }

    // Connect to the first device
    let device = devices[0].clone();
    let mut events = c.connect(device.clone()).await;

    match events.recv().await {
        Some(ConnectionEvent::Connected(d)) => debug!("Connected to {d}"),
        Some(ConnectionEvent::FailedToConnect(d, e)) | Some(ConnectionEvent::Disconnected(d, Some(e))) => {
            error!("Failed to connect to device: {d}");
            return Err(e.into());
        }
        _ => return Err(anyhow::anyhow!("Connection to {device} closed")),
    }

    let api = c
        .device_api()
        .await
        .ok_or_else(|| anyhow::anyhow!("No device API available"))?;

    // Execute command
    let r = execute(&api, &args, args.cmd.clone()).await;

    c.disconnect().await;

    r
}

/// Collect devices found within the scan window
async fn scan(c: &DeviceCommunicator) -> Vec<Arc<Device>> {
    let mut devices = vec![];
    let mut events = c.start_scanning().await;

    let _ = timeout(SCAN_WINDOW, async {
        while let Some(evt) = events.recv().await {
            match evt {
                ScanEvent::Found(d) => devices.push(d),
                ScanEvent::Lost(d) => devices.retain(|v| !v.same_as(&d)),
            }
        }
    })
    .await;

    c.stop_scanning().await;

    devices
}

/// Execute a command with the provided device API
async fn execute(api: &DeviceApi, args: &Options, cmd: Actions) -> anyhow::Result<()> {
    let network = CoinNetwork::from(args.network);

    debug!("Executing command: {:?}", cmd);

    if cmd.requires_pin() {
        let s = api.verify_pin(Some(&args.pin)).await?;
        if !s.verified {
            return Err(anyhow::anyhow!(
                "Wrong PIN ({} attempts remaining)",
                s.remaining_attempts
            ));
        }
    }

    match cmd {
        Actions::Firmware => {
            let v = api.firmware_version().await?;

            info!("firmware version: {v}");
        }
        Actions::Attestation => {
            let a = api.check_attestation().await?;

            info!(
                "attestation: authentic: {} beta: {} batch: {} derivation: {}",
                a.authentic, a.beta, a.batch_id, a.derivation_id
            );
        }
        Actions::VerifyPin => {
            let s = api.verify_pin(Some(&args.pin)).await?;

            info!(
                "pin verified: {} (remaining attempts: {})",
                s.verified, s.remaining_attempts
            );
        }
        Actions::PublicKey { path } => {
            info!("requesting public key for path: {path}");

            api.set_coin_version(&network).await?;
            let k = api.public_key(path).await?;

            info!("public key: {}", hex::encode(&k.public_key));
            info!("address: {}", k.address);
            info!("chain code: {}", hex::encode(k.chain_code));
        }
        Actions::Xpub { account } => {
            info!("requesting extended public key for {network} account: {account}");

            let x = api.extended_public_key(&network, account).await?;

            info!("xpub: {x}");
        }
        Actions::TrustedInput { tx, index } => {
            info!("requesting trusted input for output: {index}");

            let ti = api.trusted_input(tx.0, index).await?;

            info!("trusted input: {}", hex::encode(ti));
        }
        Actions::List => (),
    }

    Ok(())
}
