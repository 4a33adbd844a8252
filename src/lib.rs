#![cfg_attr(not(test), no_std)]
//! Panda Touch board support: USB mass-storage host
//!
//! This crate provides the hot-plug layer that mounts USB drives plugged
//! into the Panda Touch (ESP32-S3) USB-A port and tells the UI about it.
//! Display, backlight and touch bring-up live elsewhere.

/// USB MSC host: hot-plug queue, host pump, application task and facade.
pub mod usb;

#[cfg(test)]
mod mocks;

pub use usb::{Error, UsbMsc, UsbMscConfig, MOUNT_PATH};
