//! USB mass-storage host for the Panda Touch USB-A OTG port
//!
//! Hot-plugged drives are mounted at [`MOUNT_PATH`]. Three contexts cooperate:
//!
//! - **host pump** ([`UsbMsc::run_host_task`]): services the host library
//! - **MSC driver context**: owned by the driver, calls the registered
//!   [`MscEventHandler`] which only enqueues a [`HotplugEvent`]
//! - **application task** ([`UsbMsc::run_msc_task`]): installs, mounts,
//!   unmounts and re-arms, one event at a time
//!
//! The [`HotplugQueue`] is the only thing shared between the driver context
//! and the application task.

pub mod callback;
pub mod config;
pub mod error;
pub mod hal;
pub mod host_task;
pub mod msc;
pub mod msc_task;
pub mod queue;
pub mod snapshot;

/// VFS path the mounted drive appears under
pub const MOUNT_PATH: &str = "/usb";

/// USB D+ on the OTG port
pub const USB_DP_GPIO: u8 = 20;
/// USB D- on the OTG port
pub const USB_DM_GPIO: u8 = 19;

pub use callback::MscEventHandler;
pub use config::{HostConfig, MountConfig, MscDriverConfig, UsbMscConfig};
pub use error::{DriverError, Error};
pub use hal::{
    DeviceHandle, HostEventFlags, MscDriver, MscHostEvent, UsbHost, VfsHandle, VfsMount,
};
pub use msc::UsbMsc;
pub use msc_task::{MscSession, SlotState, UsbEventCallback};
pub use queue::{HotplugEvent, HotplugQueue, HOTPLUG_QUEUE_DEPTH};
pub use snapshot::{DirEntry, DirectoryReader, SnapshotStatus, UsbSnapshot};
