//! Contracts of the external USB components this subsystem drives.
//!
//! All three collaborators are internally synchronized (as the ESP-IDF
//! components they model are), so every method takes `&self` and the same
//! instance can be shared between the host pump, the application task and
//! the public facade.

use bitflags::bitflags;

use super::callback::MscEventHandler;
use super::config::{HostConfig, MountConfig, MscDriverConfig};
use super::error::DriverError;

/// Handle of a mass-storage device installed by the MSC driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceHandle(pub u32);

/// Handle of a filesystem registered with the VFS layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VfsHandle(pub u32);

/// Raw notification raised by the MSC driver on its background context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MscHostEvent {
    /// A mass-storage device finished bus enumeration at `address`
    ConnectionReceived { address: u8 },
    /// A previously installed device left the bus
    DisconnectionReceived { handle: DeviceHandle },
}

bitflags! {
    /// Flags returned by one round of host library event processing
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HostEventFlags: u32 {
        /// Every client has deregistered from the host library
        const NO_CLIENTS = 0x01;
        /// Every device has been freed
        const ALL_FREE = 0x02;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for HostEventFlags {
    fn format(&self, f: defmt::Formatter) {
        self.iter_names().for_each(|name| {
            defmt::write!(f, "{} ", name.0);
        });
    }
}

/// Low-level USB host library (bus enumeration, device bookkeeping)
#[allow(async_fn_in_trait)]
pub trait UsbHost {
    fn install(&self, config: &HostConfig) -> Result<(), DriverError>;

    fn uninstall(&self) -> Result<(), DriverError>;

    /// Services pending library events, waiting without timeout until at
    /// least one is available.
    async fn handle_events(&self) -> HostEventFlags;

    /// Marks every device for release.
    ///
    /// `Ok` means no device was left and no `ALL_FREE` follows.
    /// [`DriverError::NOT_FINISHED`] means devices are still being released
    /// and `ALL_FREE` is reported through `handle_events` once they are.
    fn device_free_all(&self) -> Result<(), DriverError>;
}

/// Mass-storage class driver layered on the host library.
///
/// `'a` bounds the event handler the driver keeps between `install` and
/// `uninstall`.
#[allow(async_fn_in_trait)]
pub trait MscDriver<'a> {
    /// Registers the driver as a host library client. The driver keeps
    /// `handler` and calls it from its own background context; a fresh
    /// connection is only reported once per registration.
    fn install(
        &self,
        config: &MscDriverConfig,
        handler: &'a dyn MscEventHandler,
    ) -> Result<(), DriverError>;

    /// Deregisters the client and drops the stored handler
    fn uninstall(&self) -> Result<(), DriverError>;

    /// Claims the device at `address`. May block on the driver's
    /// background context, so it must never be called from the handler.
    async fn install_device(&self, address: u8) -> Result<DeviceHandle, DriverError>;

    fn uninstall_device(&self, device: DeviceHandle) -> Result<(), DriverError>;
}

/// FAT-over-MSC registration with the virtual filesystem
pub trait VfsMount {
    fn register(
        &self,
        device: DeviceHandle,
        mount_path: &'static str,
        config: &MountConfig,
    ) -> Result<VfsHandle, DriverError>;

    fn unregister(&self, vfs: VfsHandle) -> Result<(), DriverError>;
}
