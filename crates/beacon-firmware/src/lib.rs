//! ESP32-S3 firmware-specific modules for beacon-rs
//!
//! This crate contains the pieces that only make sense on the device:
//! build-time provisioning constants and the fault record kept in RTC memory
//! across resets.

#![no_std]

pub mod fault_store;
pub mod provisioning;
