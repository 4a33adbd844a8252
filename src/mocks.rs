//! Test doubles for the USB collaborators.
//!
//! [`FakeUsbBus`] plays the host library, the MSC driver and the VFS layer
//! at once, keeping enough bookkeeping to check that every handle is
//! released in the right order.

use core::cell::RefCell;
use std::vec::Vec;

use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;

use crate::usb::{
    DeviceHandle, DriverError, HostConfig, HostEventFlags, MountConfig, MscDriver,
    MscDriverConfig, MscEventHandler, MscHostEvent, UsbHost, VfsHandle, VfsMount,
};

#[derive(Default)]
struct BusState<'a> {
    host_installed: bool,
    msc_installed: bool,
    /// The driver reports one connection per registration
    armed: bool,
    handler: Option<&'a dyn MscEventHandler>,
    attached: Option<u8>,
    devices: Vec<(DeviceHandle, u8)>,
    volumes: Vec<(VfsHandle, DeviceHandle)>,
    next_handle: u32,
    fail_host_install: bool,
    fail_msc_install: bool,
    fail_device_install: bool,
    fail_mount: bool,
    msc_installs: usize,
    free_all_calls: usize,
    /// `device_free_all` ran while devices were still installed
    free_pending: bool,
}

pub struct FakeUsbBus<'a> {
    state: Mutex<CriticalSectionRawMutex, RefCell<BusState<'a>>>,
    host_events: Channel<CriticalSectionRawMutex, HostEventFlags, 16>,
}

impl<'a> FakeUsbBus<'a> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(BusState::default())),
            host_events: Channel::new(),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut BusState<'a>) -> R) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }

    /// Puts a device on the bus without the driver noticing
    pub fn attach(&self, address: u8) {
        self.with(|s| s.attached = Some(address));
    }

    /// Puts a device on the bus and, if the driver is armed, reports it
    pub fn plug(&self, address: u8) {
        let handler = self.with(|s| {
            s.attached = Some(address);
            if s.msc_installed && s.armed {
                s.armed = false;
                s.handler
            } else {
                None
            }
        });
        if let Some(handler) = handler {
            handler.on_event(MscHostEvent::ConnectionReceived { address });
        }
    }

    /// Removes the device; an installed device is reported as disconnected
    pub fn unplug(&self) {
        let report = self.with(|s| {
            let address = s.attached.take()?;
            let (handle, _) = s.devices.iter().find(|(_, a)| *a == address)?;
            Some((s.handler?, *handle))
        });
        if let Some((handler, handle)) = report {
            handler.on_event(MscHostEvent::DisconnectionReceived { handle });
        }
    }

    /// Calls the registered driver callback directly
    pub fn inject(&self, event: MscHostEvent) {
        if let Some(handler) = self.with(|s| s.handler) {
            handler.on_event(event);
        }
    }

    pub fn raise_host_events(&self, flags: HostEventFlags) {
        let _ = self.host_events.try_send(flags);
    }

    pub fn fail_next_host_install(&self) {
        self.with(|s| s.fail_host_install = true);
    }

    pub fn fail_next_msc_install(&self) {
        self.with(|s| s.fail_msc_install = true);
    }

    pub fn fail_next_device_install(&self) {
        self.with(|s| s.fail_device_install = true);
    }

    pub fn fail_next_mount(&self) {
        self.with(|s| s.fail_mount = true);
    }

    pub fn is_host_installed(&self) -> bool {
        self.with(|s| s.host_installed)
    }

    pub fn is_msc_installed(&self) -> bool {
        self.with(|s| s.msc_installed)
    }

    pub fn installed_devices(&self) -> usize {
        self.with(|s| s.devices.len())
    }

    pub fn mounted_volumes(&self) -> usize {
        self.with(|s| s.volumes.len())
    }

    /// Number of successful MSC driver registrations so far
    pub fn msc_installs(&self) -> usize {
        self.with(|s| s.msc_installs)
    }

    pub fn free_all_calls(&self) -> usize {
        self.with(|s| s.free_all_calls)
    }
}

impl UsbHost for FakeUsbBus<'_> {
    fn install(&self, _config: &HostConfig) -> Result<(), DriverError> {
        self.with(|s| {
            if core::mem::take(&mut s.fail_host_install) {
                return Err(DriverError::NO_MEM);
            }
            if s.host_installed {
                return Err(DriverError::INVALID_STATE);
            }
            s.host_installed = true;
            Ok(())
        })
    }

    fn uninstall(&self) -> Result<(), DriverError> {
        self.with(|s| {
            if !s.host_installed || s.msc_installed || !s.devices.is_empty() {
                return Err(DriverError::INVALID_STATE);
            }
            s.host_installed = false;
            Ok(())
        })?;
        while self.host_events.try_receive().is_ok() {}
        Ok(())
    }

    async fn handle_events(&self) -> HostEventFlags {
        self.host_events.receive().await
    }

    /// Like the IDF host library: nothing to free is `Ok` with no event,
    /// otherwise `ALL_FREE` follows once the last device is uninstalled
    fn device_free_all(&self) -> Result<(), DriverError> {
        self.with(|s| {
            s.free_all_calls += 1;
            if s.devices.is_empty() {
                Ok(())
            } else {
                s.free_pending = true;
                Err(DriverError::NOT_FINISHED)
            }
        })
    }
}

impl<'a> MscDriver<'a> for FakeUsbBus<'a> {
    fn install(
        &self,
        _config: &MscDriverConfig,
        handler: &'a dyn MscEventHandler,
    ) -> Result<(), DriverError> {
        self.with(|s| {
            if core::mem::take(&mut s.fail_msc_install) {
                return Err(DriverError::FAIL);
            }
            if s.msc_installed || !s.host_installed {
                return Err(DriverError::INVALID_STATE);
            }
            s.msc_installed = true;
            s.armed = true;
            s.handler = Some(handler);
            s.msc_installs += 1;
            Ok(())
        })
    }

    fn uninstall(&self) -> Result<(), DriverError> {
        self.with(|s| {
            if !s.msc_installed || !s.devices.is_empty() {
                return Err(DriverError::INVALID_STATE);
            }
            s.msc_installed = false;
            s.armed = false;
            s.handler = None;
            Ok(())
        })?;
        self.raise_host_events(HostEventFlags::NO_CLIENTS);
        Ok(())
    }

    async fn install_device(&self, address: u8) -> Result<DeviceHandle, DriverError> {
        // enumeration takes a while; let the other contexts run
        yield_now().await;
        self.with(|s| {
            if core::mem::take(&mut s.fail_device_install) {
                return Err(DriverError::FAIL);
            }
            if !s.msc_installed {
                return Err(DriverError::INVALID_STATE);
            }
            if s.attached != Some(address) {
                return Err(DriverError::NOT_FOUND);
            }
            s.next_handle += 1;
            let handle = DeviceHandle(s.next_handle);
            s.devices.push((handle, address));
            Ok(handle)
        })
    }

    fn uninstall_device(&self, device: DeviceHandle) -> Result<(), DriverError> {
        let all_free = self.with(|s| {
            if s.volumes.iter().any(|(_, d)| *d == device) {
                return Err(DriverError::INVALID_STATE);
            }
            let index = s
                .devices
                .iter()
                .position(|(d, _)| *d == device)
                .ok_or(DriverError::INVALID_ARG)?;
            s.devices.remove(index);
            let all_free = s.free_pending && s.devices.is_empty();
            if all_free {
                s.free_pending = false;
            }
            Ok(all_free)
        })?;
        if all_free {
            self.raise_host_events(HostEventFlags::ALL_FREE);
        }
        Ok(())
    }
}

impl VfsMount for FakeUsbBus<'_> {
    fn register(
        &self,
        device: DeviceHandle,
        _mount_path: &'static str,
        _config: &MountConfig,
    ) -> Result<VfsHandle, DriverError> {
        self.with(|s| {
            if core::mem::take(&mut s.fail_mount) {
                return Err(DriverError::FAIL);
            }
            if !s.devices.iter().any(|(d, _)| *d == device) {
                return Err(DriverError::INVALID_ARG);
            }
            s.next_handle += 1;
            let vfs = VfsHandle(s.next_handle);
            s.volumes.push((vfs, device));
            Ok(vfs)
        })
    }

    fn unregister(&self, vfs: VfsHandle) -> Result<(), DriverError> {
        self.with(|s| {
            let index = s
                .volumes
                .iter()
                .position(|(v, _)| *v == vfs)
                .ok_or(DriverError::INVALID_ARG)?;
            s.volumes.remove(index);
            Ok(())
        })
    }
}

/// Gives every parked future a few polls
pub async fn settle() {
    for _ in 0..32 {
        yield_now().await;
    }
}

/// Yields until `condition` holds
pub async fn settle_until(condition: impl Fn() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        yield_now().await;
    }
    panic!("condition not reached");
}
