//! Build-time provisioning
//!
//! Values come from the environment or `.env` when the firmware is built,
//! see `build.rs` and `.env.example`.

use beacon_core::{AdvertisingConfig, BringUpConfig};

include!(concat!(env!("OUT_DIR"), "/provisioning.rs"));

/// Base64 master key embedded in the image
pub const ENCODED_KEY: &str = env!("HUBBLE_KEY");

pub const fn bring_up_config() -> BringUpConfig<'static> {
    BringUpConfig::new(TIME_SYNC_INTERVAL_S, AdvertisingConfig::new(DEVICE_NAME))
}
