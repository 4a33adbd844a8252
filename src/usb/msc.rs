//! Public entry point of the USB mass-storage subsystem.
//!
//! Embassy tasks are allocated statically and live forever, so the host pump
//! and the application task are not created by [`UsbMsc::start`]. The
//! firmware spawns [`UsbMsc::run_host_task`] and [`UsbMsc::run_msc_task`]
//! once at boot; both park until `start()` launches them and report back to
//! `stop()` when their run is over.
//!
//! ```ignore
//! static USB: StaticCell<UsbMsc<'static, CriticalSectionRawMutex, Host, Msc, Vfs>> =
//!     StaticCell::new();
//!
//! #[embassy_executor::task]
//! async fn usb_host_task(usb: &'static UsbMsc<'static, CriticalSectionRawMutex, Host, Msc, Vfs>) {
//!     usb.run_host_task().await
//! }
//!
//! #[embassy_executor::task]
//! async fn usb_msc_task(usb: &'static UsbMsc<'static, CriticalSectionRawMutex, Host, Msc, Vfs>) {
//!     usb.run_msc_task().await
//! }
//!
//! let usb = USB.init(UsbMsc::new(host, msc, vfs, UsbMscConfig::default()));
//! spawner.spawn(usb_host_task(usb)).ok();
//! spawner.spawn(usb_msc_task(usb)).ok();
//! usb.on_mount(&refresh_file_list);
//! usb.start().await?;
//! ```

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use log::{debug, error, info, warn};

use super::config::UsbMscConfig;
use super::error::{DriverError, Error};
use super::hal::{MscDriver, UsbHost, VfsMount};
use super::host_task::pump_host_events;
use super::msc_task::{CallbackRegistry, MountedFlag, MscTask, UsbEventCallback};
use super::queue::{HotplugQueue, HOTPLUG_QUEUE_DEPTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Lifecycle {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// A statically spawned task that runs one session per launch
struct Worker<M: RawMutex> {
    idle: AtomicBool,
    go: Signal<M, ()>,
    done: Signal<M, ()>,
}

impl<M: RawMutex> Worker<M> {
    const fn new() -> Self {
        Self {
            idle: AtomicBool::new(false),
            go: Signal::new(),
            done: Signal::new(),
        }
    }

    /// Marks a freshly spawned worker as available
    fn ready(&self) {
        self.idle.store(true, Ordering::Release);
    }

    async fn wait_launch(&self) {
        self.go.wait().await;
    }

    /// Reserves an idle worker for the next run
    fn claim(&self) -> bool {
        self.idle.swap(false, Ordering::AcqRel)
    }

    /// Hands a claimed but never launched worker back
    fn release(&self) {
        self.idle.store(true, Ordering::Release);
    }

    /// Starts the run of a claimed worker
    fn launch(&self) {
        self.done.reset();
        self.go.signal(());
    }

    fn finish(&self) {
        self.idle.store(true, Ordering::Release);
        self.done.signal(());
    }

    async fn join(&self) {
        self.done.wait().await;
    }
}

/// USB mass-storage host: mounts one hot-plugged drive at
/// [`MOUNT_PATH`](super::MOUNT_PATH).
pub struct UsbMsc<'a, M, H, D, V>
where
    M: RawMutex + Sync,
    H: UsbHost,
    D: MscDriver<'a>,
    V: VfsMount,
{
    host: &'a H,
    msc: &'a D,
    vfs: &'a V,
    config: UsbMscConfig,
    queue: HotplugQueue<M, HOTPLUG_QUEUE_DEPTH>,
    mounted: MountedFlag,
    callbacks: CallbackRegistry<'a, M>,
    lifecycle: Mutex<M, Cell<Lifecycle>>,
    /// Lets the host pump end on `ALL_FREE`
    shutdown: AtomicBool,
    /// Ends the host pump when no `ALL_FREE` is coming
    pump_stop: Signal<M, ()>,
    hotplug_armed: AtomicBool,
    host_worker: Worker<M>,
    msc_worker: Worker<M>,
}

impl<'a, M, H, D, V> UsbMsc<'a, M, H, D, V>
where
    M: RawMutex + Sync,
    H: UsbHost,
    D: MscDriver<'a>,
    V: VfsMount,
{
    pub fn new(host: &'a H, msc: &'a D, vfs: &'a V, config: UsbMscConfig) -> Self {
        Self {
            host,
            msc,
            vfs,
            config,
            queue: HotplugQueue::new(),
            mounted: MountedFlag::new(),
            callbacks: CallbackRegistry::new(),
            lifecycle: Mutex::new(Cell::new(Lifecycle::Stopped)),
            shutdown: AtomicBool::new(false),
            pump_stop: Signal::new(),
            hotplug_armed: AtomicBool::new(false),
            host_worker: Worker::new(),
            msc_worker: Worker::new(),
        }
    }

    /// Host event pump. Spawn once; runs forever.
    pub async fn run_host_task(&'a self) {
        self.host_worker.ready();
        loop {
            self.host_worker.wait_launch().await;
            pump_host_events(self.host, &self.shutdown, &self.pump_stop).await;
            self.host_worker.finish();
        }
    }

    /// Application task owning the mounted device. Spawn once; runs forever.
    pub async fn run_msc_task(&'a self) {
        self.msc_worker.ready();
        loop {
            self.msc_worker.wait_launch().await;
            let mut task = MscTask::new(
                &self.queue,
                self.msc,
                self.vfs,
                &self.config,
                &self.mounted,
                &self.hotplug_armed,
                &self.callbacks,
            );
            task.run().await;
            self.msc_worker.finish();
        }
    }

    /// Installs the host stack and the MSC driver and launches both tasks.
    /// Every completed step is rolled back if a later one fails.
    pub async fn start(&'a self) -> Result<(), Error> {
        let claimed = self.lifecycle.lock(|state| {
            if state.get() == Lifecycle::Stopped {
                state.set(Lifecycle::Starting);
                true
            } else {
                false
            }
        });
        if !claimed {
            warn!("USB MSC host already started");
            return Err(Error::AlreadyStarted);
        }

        let result = self.bring_up().await;
        let next = match result {
            Ok(()) => Lifecycle::Running,
            Err(_) => Lifecycle::Stopped,
        };
        self.lifecycle.lock(|state| state.set(next));
        result
    }

    async fn bring_up(&'a self) -> Result<(), Error> {
        if !self.host_worker.claim() {
            error!("USB host task is not available");
            return Err(Error::ResourceExhausted);
        }
        if !self.msc_worker.claim() {
            self.host_worker.release();
            error!("USB MSC task is not available");
            return Err(Error::ResourceExhausted);
        }
        self.queue.reopen();
        self.shutdown.store(false, Ordering::Release);
        self.pump_stop.reset();

        if let Err(e) = self.host.install(&self.config.host) {
            error!("USB host install failed: {e}");
            self.host_worker.release();
            self.msc_worker.release();
            return Err(Error::DriverInstallFailed(e));
        }
        self.host_worker.launch();

        if let Err(e) = self.msc.install(&self.config.msc, &self.queue) {
            error!("USB MSC driver install failed: {e}");
            self.msc_worker.release();
            self.shutdown_host().await;
            return Err(Error::DriverInstallFailed(e));
        }
        self.hotplug_armed.store(true, Ordering::Release);
        self.msc_worker.launch();

        info!("USB MSC host started");
        Ok(())
    }

    /// Stops the host pump once every device is released, then uninstalls
    /// the host stack
    async fn shutdown_host(&self) {
        self.shutdown.store(true, Ordering::Release);
        match self.host.device_free_all() {
            Err(DriverError::NOT_FINISHED) => {
                debug!("USB host: waiting for devices to be freed")
            }
            Ok(()) => self.pump_stop.signal(()),
            Err(e) => {
                warn!("USB device_free_all failed: {e}");
                self.pump_stop.signal(());
            }
        }
        self.host_worker.join().await;
        if let Err(e) = self.host.uninstall() {
            warn!("USB host uninstall failed: {e}");
        }
    }

    /// Releases any mounted drive and tears down the driver stack. Returns
    /// once both tasks have finished. Does nothing if not running.
    pub async fn stop(&self) {
        let running = self.lifecycle.lock(|state| {
            if state.get() == Lifecycle::Running {
                state.set(Lifecycle::Stopping);
                true
            } else {
                false
            }
        });
        if !running {
            debug!("USB MSC host not running, nothing to stop");
            return;
        }

        // the application task unmounts and uninstalls its device on close
        self.queue.close();
        self.msc_worker.join().await;

        self.shutdown.store(true, Ordering::Release);
        self.hotplug_armed.store(false, Ordering::Release);
        if let Err(e) = self.msc.uninstall() {
            warn!("USB MSC driver uninstall failed: {e}");
        }
        self.shutdown_host().await;

        self.mounted.set(false);
        self.queue.reopen();
        self.lifecycle.lock(|state| state.set(Lifecycle::Stopped));
        info!("USB MSC host stopped");
    }

    /// Whether a drive is currently mounted. Never blocks.
    pub fn is_mounted(&self) -> bool {
        self.mounted.get()
    }

    /// Whether a newly plugged drive will be detected. Turns false while
    /// running only if re-registering the MSC driver after an unplug or a
    /// failed attach was refused; `stop()` then `start()` recovers.
    pub fn is_hotplug_armed(&self) -> bool {
        self.hotplug_armed.load(Ordering::Acquire)
    }

    /// Observer run on the application task after a drive is mounted
    pub fn on_mount(&self, callback: UsbEventCallback<'a>) {
        self.callbacks.set_on_mount(callback);
    }

    /// Observer run on the application task before a drive's filesystem is
    /// unregistered. I/O on the mount may already fail at that point.
    pub fn on_unmount(&self, callback: UsbEventCallback<'a>) {
        self.callbacks.set_on_unmount(callback);
    }
}
