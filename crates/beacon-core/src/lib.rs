//! Hardware-independent core library for beacon-rs
//!
//! This crate contains all platform-agnostic logic for the secure beacon
//! bring-up: master key decoding, the time-sync client, the HCI advertising
//! controller (plus a software controller for hosts), radio stack events,
//! fault reporting and the bring-up sequencer that ties them together.
//!
//! It is `#![no_std]` and allocation free so it compiles on both embedded
//! targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![no_std]

pub mod bringup;
pub mod client;
pub mod config;
pub mod emulator;
pub mod fault;
pub mod hci;
pub mod key;
pub mod radio;

pub use bringup::{BringUp, BringUpError, BringUpState};
pub use client::{ClientError, SecureClient, TimeSyncClient};
pub use config::{AddressMode, AdvertisingConfig, BringUpConfig};
pub use fault::{FaultCode, FaultRecord, FaultReporter};
pub use hci::{HciController, HciError};
pub use key::{KeyError, MasterKey};
pub use radio::{
    AdvertisingError, Advertiser, BdAddr, CriticalError, DeviceInitInfo, StackEvent, StackEvents,
};
