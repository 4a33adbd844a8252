//! Host event pump: keeps the USB host library serviced while the
//! subsystem runs and reports when every device has been released.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use log::{debug, info, warn};

use super::error::DriverError;
use super::hal::{HostEventFlags, UsbHost};

/// Pumps the host library until every device has been released after a
/// shutdown request.
///
/// `NO_CLIENTS` always triggers `device_free_all`. `ALL_FREE` ends the pump
/// only while `shutdown` is set: re-arming the MSC driver deregisters its
/// client in normal operation, and the pump has to survive that. `stop`
/// ends the pump at once; it is raised when `device_free_all` found nothing
/// left to free, since no `ALL_FREE` will follow then.
///
/// Never calls into the mass-storage layer.
pub async fn pump_host_events<M: RawMutex, H: UsbHost>(
    host: &H,
    shutdown: &AtomicBool,
    stop: &Signal<M, ()>,
) {
    debug!("USB host event pump running");
    loop {
        let flags = match select(stop.wait(), host.handle_events()).await {
            Either::First(()) => break,
            Either::Second(flags) => flags,
        };

        if flags.contains(HostEventFlags::NO_CLIENTS) {
            debug!("USB host: no clients, freeing devices");
            match host.device_free_all() {
                Ok(()) => debug!("USB host: no devices left"),
                Err(DriverError::NOT_FINISHED) => debug!("USB host: waiting for ALL_FREE"),
                Err(e) => warn!("USB host: device_free_all failed: {e}"),
            }
        }

        if flags.contains(HostEventFlags::ALL_FREE) {
            if shutdown.load(Ordering::Acquire) {
                break;
            }
            debug!("USB host: all devices free, no shutdown pending");
        }
    }
    info!("USB host event pump terminated");
}
