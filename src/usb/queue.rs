//! Bounded hand-off between the MSC driver's context and the application task.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::signal::Signal;

use super::hal::{DeviceHandle, MscHostEvent};

/// Number of pending hot-plug events before new ones are dropped
pub const HOTPLUG_QUEUE_DEPTH: usize = 5;

/// Hot-plug notification consumed by the application task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HotplugEvent {
    Connected { address: u8 },
    Disconnected { handle: DeviceHandle },
}

impl From<MscHostEvent> for HotplugEvent {
    fn from(event: MscHostEvent) -> Self {
        match event {
            MscHostEvent::ConnectionReceived { address } => HotplugEvent::Connected { address },
            MscHostEvent::DisconnectionReceived { handle } => {
                HotplugEvent::Disconnected { handle }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QueueError {
    /// Queue at capacity, the event was not stored
    Full(HotplugEvent),
    /// Queue torn down by `stop()`
    Closed(HotplugEvent),
}

/// Strict FIFO of [`HotplugEvent`]s with a non-blocking producer side and
/// a consumer that waits until an event arrives or the queue is closed.
pub struct HotplugQueue<M: RawMutex, const N: usize> {
    channel: Channel<M, HotplugEvent, N>,
    closed: AtomicBool,
    shutdown: Signal<M, ()>,
}

impl<M: RawMutex, const N: usize> HotplugQueue<M, N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            closed: AtomicBool::new(false),
            shutdown: Signal::new(),
        }
    }

    /// Enqueues `event` without waiting. Never blocks the caller.
    pub fn send(&self, event: HotplugEvent) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed(event));
        }
        self.channel.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) => QueueError::Full(event),
        })
    }

    /// Waits for the next event. Returns `None` once the queue is closed,
    /// even if events are still pending.
    pub async fn receive(&self) -> Option<HotplugEvent> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        match select(self.shutdown.wait(), self.channel.receive()).await {
            Either::First(()) => None,
            Either::Second(event) => Some(event),
        }
    }

    /// Wakes the consumer with `None` and rejects further sends
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.signal(());
    }

    /// Discards pending events and accepts sends again
    pub fn reopen(&self) {
        while self.channel.try_receive().is_ok() {}
        self.shutdown.reset();
        self.closed.store(false, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of events waiting for the consumer
    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }
}

impl<M: RawMutex, const N: usize> Default for HotplugQueue<M, N> {
    fn default() -> Self {
        Self::new()
    }
}
