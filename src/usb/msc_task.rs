//! The application task: sole owner of the mounted-device slot.
//!
//! Every install, mount, unmount and uninstall runs here, one event at a
//! time, so no locking is needed around the session.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use log::{debug, error, info, warn};

use super::config::UsbMscConfig;
use super::error::Error;
use super::hal::{DeviceHandle, MscDriver, VfsHandle, VfsMount};
use super::queue::{HotplugEvent, HotplugQueue};
use super::MOUNT_PATH;

/// Mount/unmount observer. Runs on the application task.
pub type UsbEventCallback<'a> = &'a (dyn Fn() + Sync);

/// Process-wide "a drive is mounted" indicator. Readable from anywhere;
/// only the application task (and `stop()` once it has exited) writes it.
#[derive(Debug, Default)]
pub struct MountedFlag(AtomicBool);

impl MountedFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, mounted: bool) {
        self.0.store(mounted, Ordering::Release);
    }
}

/// `onMount` / `onUnmount` observers; the last registration wins
pub struct CallbackRegistry<'a, M: RawMutex> {
    on_mount: Mutex<M, Cell<Option<UsbEventCallback<'a>>>>,
    on_unmount: Mutex<M, Cell<Option<UsbEventCallback<'a>>>>,
}

impl<'a, M: RawMutex> CallbackRegistry<'a, M> {
    pub const fn new() -> Self {
        Self {
            on_mount: Mutex::new(Cell::new(None)),
            on_unmount: Mutex::new(Cell::new(None)),
        }
    }

    pub fn set_on_mount(&self, callback: UsbEventCallback<'a>) {
        self.on_mount.lock(|cb| cb.set(Some(callback)));
    }

    pub fn set_on_unmount(&self, callback: UsbEventCallback<'a>) {
        self.on_unmount.lock(|cb| cb.set(Some(callback)));
    }

    pub(crate) fn notify_mount(&self) {
        // copy the reference out so the observer runs without the lock held
        if let Some(callback) = self.on_mount.lock(Cell::get) {
            callback();
        }
    }

    pub(crate) fn notify_unmount(&self) {
        if let Some(callback) = self.on_unmount.lock(Cell::get) {
            callback();
        }
    }
}

impl<M: RawMutex> Default for CallbackRegistry<'_, M> {
    fn default() -> Self {
        Self::new()
    }
}

/// The single mounted mass-storage device. Holding one means the device is
/// installed, its filesystem registered, and [`MountedFlag`] set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MscSession {
    pub device: DeviceHandle,
    pub vfs: VfsHandle,
    pub mount_path: &'static str,
}

/// Observable state of the device slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotState {
    Idle,
    Installing { address: u8 },
    Mounting { device: DeviceHandle },
    Mounted(MscSession),
}

pub struct MscTask<'a, M, D, V, const N: usize>
where
    M: RawMutex + Sync,
    D: MscDriver<'a>,
    V: VfsMount,
{
    queue: &'a HotplugQueue<M, N>,
    msc: &'a D,
    vfs: &'a V,
    config: &'a UsbMscConfig,
    mounted: &'a MountedFlag,
    /// Cleared while the driver registration is missing after a failed
    /// re-arm; no connection can be reported then
    armed: &'a AtomicBool,
    callbacks: &'a CallbackRegistry<'a, M>,
    state: SlotState,
}

impl<'a, M, D, V, const N: usize> MscTask<'a, M, D, V, N>
where
    M: RawMutex + Sync,
    D: MscDriver<'a>,
    V: VfsMount,
{
    pub fn new(
        queue: &'a HotplugQueue<M, N>,
        msc: &'a D,
        vfs: &'a V,
        config: &'a UsbMscConfig,
        mounted: &'a MountedFlag,
        armed: &'a AtomicBool,
        callbacks: &'a CallbackRegistry<'a, M>,
    ) -> Self {
        Self {
            queue,
            msc,
            vfs,
            config,
            mounted,
            armed,
            callbacks,
            state: SlotState::Idle,
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Consumes events until the queue is closed, then releases whatever
    /// is still mounted.
    pub async fn run(&mut self) {
        info!("USB MSC task running");
        while let Some(event) = self.queue.receive().await {
            self.handle(event).await;
        }
        self.shutdown();
        info!("USB MSC task stopped");
    }

    /// Processes one event. Returns with the slot either idle or mounted.
    pub async fn handle(&mut self, event: HotplugEvent) {
        debug!("USB MSC event {event:?}");
        match event {
            HotplugEvent::Connected { address } => self.on_connected(address).await,
            HotplugEvent::Disconnected { handle } => self.on_disconnected(handle),
        }
    }

    async fn on_connected(&mut self, address: u8) {
        if let SlotState::Mounted(session) = self.state {
            warn!(
                "USB device at address {address} ignored, {:?} already mounted",
                session.device
            );
            return;
        }

        match self.attach(address).await {
            Ok(session) => {
                info!("USB drive mounted at {}", session.mount_path);
                self.state = SlotState::Mounted(session);
                self.mounted.set(true);
                self.callbacks.notify_mount();
            }
            Err(e) => {
                error!("USB device at address {address} not mounted: {e}");
                self.state = SlotState::Idle;
                // no disconnect is reported for a device that was never
                // installed, so re-arm here or the next plug goes unseen
                self.rearm();
            }
        }
    }

    async fn attach(&mut self, address: u8) -> Result<MscSession, Error> {
        self.state = SlotState::Installing { address };
        let device = self
            .msc
            .install_device(address)
            .await
            .map_err(Error::DriverInstallFailed)?;

        self.state = SlotState::Mounting { device };
        match self.vfs.register(device, MOUNT_PATH, &self.config.mount) {
            Ok(vfs) => Ok(MscSession {
                device,
                vfs,
                mount_path: MOUNT_PATH,
            }),
            Err(e) => {
                if let Err(e) = self.msc.uninstall_device(device) {
                    warn!("USB uninstall of {device:?} after failed mount: {e}");
                }
                Err(Error::MountFailed(e))
            }
        }
    }

    fn on_disconnected(&mut self, handle: DeviceHandle) {
        match self.state {
            SlotState::Mounted(session) if session.device == handle => {
                self.release(session);
                self.rearm();
            }
            SlotState::Mounted(session) => {
                warn!(
                    "USB disconnect for {handle:?} ignored, {:?} still mounted",
                    session.device
                );
            }
            _ => {
                debug!("USB disconnect for {handle:?} without a mounted session");
                self.rearm();
            }
        }
    }

    /// Observers hear about the unmount while the mount still exists
    fn release(&mut self, session: MscSession) {
        self.mounted.set(false);
        self.callbacks.notify_unmount();
        if let Err(e) = self.vfs.unregister(session.vfs) {
            warn!("USB VFS unregister failed: {e}");
        }
        if let Err(e) = self.msc.uninstall_device(session.device) {
            warn!("USB uninstall of {:?} failed: {e}", session.device);
        }
        self.state = SlotState::Idle;
        info!("USB drive unmounted from {}", session.mount_path);
    }

    /// The driver only reports a fresh connection after it has been
    /// reinstalled.
    fn rearm(&self) {
        self.armed.store(false, Ordering::Release);
        if let Err(e) = self.msc.uninstall() {
            warn!("USB MSC driver uninstall for re-arm failed: {e}");
        }
        match self.msc.install(&self.config.msc, self.queue) {
            Ok(()) => self.armed.store(true, Ordering::Release),
            Err(e) => {
                error!("USB MSC driver re-arm failed, hot-plug disabled until restart: {e}")
            }
        }
    }

    fn shutdown(&mut self) {
        if let SlotState::Mounted(session) = self.state {
            self.release(session);
        }
        self.state = SlotState::Idle;
    }
}
