//! Desktop simulator for the beacon-rs bring-up sequence.
//!
//! Runs the real `beacon-core` sequencer against a software BLE controller so
//! the key handling, fault reporting and advertising setup can be exercised
//! without hardware.
//!
//! # Configuration
//!
//! Read from the environment (or a `.env` file), using the same keys as the
//! firmware build:
//!
//! | Variable        | Meaning                                   |
//! |-----------------|-------------------------------------------|
//! | `HUBBLE_KEY`    | base64 master key (32 bytes)              |
//! | `HUBBLE_TIME_S` | time-sync interval in seconds             |
//! | `DEVICE_NAME`   | advertised device name                    |
//! | `SIM_FAIL`      | inject a failure: `reset` or `advertise`  |

use core::cell::RefCell;
use std::env;
use std::process::ExitCode;

use embassy_futures::{block_on, join::join};
use log::{error, info, warn};

use beacon_core::emulator::EmulatedController;
use beacon_core::fault::LogFaultReporter;
use beacon_core::hci::{OP_LE_SET_ADV_ENABLE, OP_RESET};
use beacon_core::radio::initialize_stack;
use beacon_core::{
    AdvertisingConfig, BringUp, BringUpConfig, HciController, StackEvents, TimeSyncClient,
};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Key size compiled into the simulator
const KEY_SIZE: usize = 32;

/// Demo key, 32 bytes 0x00..=0x1f. Never use outside the simulator.
const DEMO_KEY: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";

const DEFAULT_TIME_S: u32 = 86_400;
const DEFAULT_DEVICE_NAME: &str = "beacon-sim";

/// Address reported by the emulated controller
const SIM_ADDRESS: [u8; 6] = [0x01, 0xEF, 0xCD, 0xAB, 0x89, 0x67];

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

struct SimSettings {
    key: String,
    time_sync_secs: u32,
    device_name: String,
    fail: Option<(u16, u8)>,
}

impl SimSettings {
    fn from_env() -> Self {
        let key = env::var("HUBBLE_KEY").unwrap_or_else(|_| {
            warn!("HUBBLE_KEY not set, using the demo key");
            DEMO_KEY.to_string()
        });

        let time_sync_secs = match env::var("HUBBLE_TIME_S") {
            Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
                warn!("Ignoring HUBBLE_TIME_S={:?}: {}", raw, e);
                DEFAULT_TIME_S
            }),
            Err(_) => DEFAULT_TIME_S,
        };

        let device_name =
            env::var("DEVICE_NAME").unwrap_or_else(|_| DEFAULT_DEVICE_NAME.to_string());

        // HCI "Hardware Failure" for the stack, "Command Disallowed" for advertising
        let fail = match env::var("SIM_FAIL").as_deref() {
            Ok("reset") => Some((OP_RESET, 0x03)),
            Ok("advertise") => Some((OP_LE_SET_ADV_ENABLE, 0x0C)),
            Ok(other) => {
                warn!("Unknown SIM_FAIL value {:?}, ignoring", other);
                None
            }
            Err(_) => None,
        };

        Self {
            key,
            time_sync_secs,
            device_name,
            fail,
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        // A missing .env is the common case
        if !e.not_found() {
            eprintln!("Failed to read .env: {}", e);
        }
    }
    env_logger::init();
    info!("Starting beacon-rs simulator");

    let settings = SimSettings::from_env();
    let config = BringUpConfig::new(
        settings.time_sync_secs,
        AdvertisingConfig::new(&settings.device_name),
    );
    info!(
        "Config: {} byte key, time sync every {} s, name {:?}",
        KEY_SIZE, config.time_sync_interval_secs, config.advertising.device_name
    );

    let mut emulated = EmulatedController::new(SIM_ADDRESS);
    if let Some((opcode, status)) = settings.fail {
        info!("Injecting status {:#04x} for command {:#06x}", status, opcode);
        emulated = emulated.fail_command(opcode, status);
    }

    let hci = RefCell::new(HciController::new(emulated, &config.advertising));
    let events = StackEvents::new();
    let mut client = TimeSyncClient::<KEY_SIZE>::new();
    let mut faults = LogFaultReporter;

    let mut bring_up =
        BringUp::<_, _, _, KEY_SIZE>::new(&settings.key, config, &mut client, &hci, &mut faults);

    // The "radio stack" finishes its own init and fires the one-shot event
    let stack = async {
        let mut controller = hci.borrow_mut();
        // Failures are delivered to the sequencer as a critical error event
        let _ = initialize_stack(&mut controller, &events).await;
    };
    let ((), result) = block_on(join(stack, bring_up.run(&events)));
    let state = bring_up.state();
    drop(bring_up);

    let controller = hci.into_inner().release();
    info!("Final state: {:?}", state);
    info!(
        "Controller: advertising={}, {} commands",
        controller.is_advertising(),
        controller.commands_seen()
    );

    match result {
        Ok(()) => {
            info!("Advertising payload: {}", hex(controller.advertising_data()));
            info!(
                "Time-sync client: interval {:?} ms",
                client.time_sync_interval_ms()
            );
            info!("Simulator exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Bring-up failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
