use std::env;
use std::fs;
use std::path::PathBuf;

const DEFAULT_KEY_SIZE: usize = 32;
const DEFAULT_TIME_S: u32 = 86_400;
const DEFAULT_DEVICE_NAME: &str = "hubble-node";

fn var(name: &str) -> Option<String> {
    println!("cargo:rerun-if-env-changed={name}");
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Same rule as `beacon_core::key::decoded_size`
fn decoded_size(encoded: &str) -> usize {
    let padding = encoded.bytes().rev().take_while(|&b| b == b'=').count();
    (encoded.len() / 4 * 3).saturating_sub(padding)
}

fn main() {
    println!("cargo:rerun-if-changed=.env");
    // Provisioning may come from the environment alone
    let _ = dotenvy::dotenv();

    let key = var("HUBBLE_KEY").expect("HUBBLE_KEY must be set (see .env.example)");

    let key_size: usize = var("HUBBLE_KEY_SIZE")
        .map(|v| v.trim().parse().expect("HUBBLE_KEY_SIZE must be a byte count"))
        .unwrap_or(DEFAULT_KEY_SIZE);
    assert!(key_size > 0, "HUBBLE_KEY_SIZE must be non-zero");

    let time_s: u32 = var("HUBBLE_TIME_S")
        .map(|v| v.trim().parse().expect("HUBBLE_TIME_S must be a number of seconds"))
        .unwrap_or(DEFAULT_TIME_S);

    let device_name = var("DEVICE_NAME").unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string());

    // The device still boots and reports the fault, but flag it early
    if decoded_size(&key) != key_size {
        println!(
            "cargo:warning=HUBBLE_KEY decodes to {} bytes but HUBBLE_KEY_SIZE is {}",
            decoded_size(&key),
            key_size
        );
    }

    println!("cargo:rustc-env=HUBBLE_KEY={key}");

    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let generated = format!(
        "pub const KEY_SIZE: usize = {key_size};\n\
         pub const TIME_SYNC_INTERVAL_S: u32 = {time_s};\n\
         pub const DEVICE_NAME: &str = {device_name:?};\n"
    );
    fs::write(out.join("provisioning.rs"), generated).expect("failed to write provisioning.rs");

    println!("cargo:rustc-link-arg=-Tlinkall.x");
}
