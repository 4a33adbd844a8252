//! Entry point the MSC driver calls from its own background context.
//!
//! The handler only translates and enqueues. Installing devices or
//! registering filesystems from here would deadlock: those calls wait on the
//! very context that is running the handler.

use embassy_sync::blocking_mutex::raw::RawMutex;
use log::{debug, error};

use super::hal::MscHostEvent;
use super::queue::{HotplugEvent, HotplugQueue, QueueError};

/// Receiver of raw MSC driver notifications. Implementations must return
/// in bounded time without blocking.
pub trait MscEventHandler: Sync {
    fn on_event(&self, event: MscHostEvent);
}

impl<M, const N: usize> MscEventHandler for HotplugQueue<M, N>
where
    M: RawMutex + Sync,
{
    fn on_event(&self, event: MscHostEvent) {
        let event = HotplugEvent::from(event);
        match self.send(event) {
            Ok(()) => debug!("queued {event:?}"),
            // the driver re-reports attached devices after the next re-arm
            Err(QueueError::Full(event)) => error!("hot-plug queue full, dropped {event:?}"),
            Err(QueueError::Closed(event)) => debug!("hot-plug queue closed, dropped {event:?}"),
        }
    }
}
