//! Listing of the mounted drive, taken outside any UI lock.
//!
//! Reading the directory can block on USB transfers, so UI code captures a
//! fixed-size snapshot first and renders from it afterwards.

use core::ops::ControlFlow;

use heapless::{String, Vec};
use log::warn;

use super::error::DriverError;
use super::MOUNT_PATH;

/// Entries kept per snapshot; the rest of a larger directory is skipped
pub const SNAPSHOT_MAX_ENTRIES: usize = 128;
/// Longest stored file name in bytes (FAT long names top out at 255)
pub const ENTRY_NAME_MAX: usize = 255;

/// Directory access on the mounted filesystem
pub trait DirectoryReader {
    /// Calls `visit(name, is_dir)` for each entry of `path` until it
    /// returns `Break`. `Err` means the directory could not be opened.
    fn read_dir(
        &self,
        path: &str,
        visit: &mut dyn FnMut(&str, bool) -> ControlFlow<()>,
    ) -> Result<(), DriverError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String<ENTRY_NAME_MAX>,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SnapshotStatus {
    /// No drive mounted, nothing was read
    NotMounted,
    /// Drive mounted but the mount point could not be opened
    OpenFailed,
    Listed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbSnapshot {
    pub status: SnapshotStatus,
    pub entries: Vec<DirEntry, SNAPSHOT_MAX_ENTRIES>,
}

impl UsbSnapshot {
    /// Lists [`MOUNT_PATH`] if `mounted`, skipping hidden (`.`-prefixed)
    /// entries
    pub fn read<R: DirectoryReader + ?Sized>(mounted: bool, reader: &R) -> Self {
        let mut snapshot = UsbSnapshot {
            status: SnapshotStatus::NotMounted,
            entries: Vec::new(),
        };
        if !mounted {
            return snapshot;
        }

        let entries = &mut snapshot.entries;
        let result = reader.read_dir(MOUNT_PATH, &mut |name, is_dir| {
            if name.starts_with('.') {
                return ControlFlow::Continue(());
            }
            let entry = DirEntry {
                name: truncated(name),
                is_dir,
            };
            match entries.push(entry) {
                Ok(()) => ControlFlow::Continue(()),
                Err(_) => ControlFlow::Break(()),
            }
        });

        snapshot.status = match result {
            Ok(()) => SnapshotStatus::Listed,
            Err(e) => {
                warn!("failed to open {MOUNT_PATH}: {e}");
                snapshot.entries.clear();
                SnapshotStatus::OpenFailed
            }
        };
        snapshot
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Copies `name`, cutting it at the last char boundary that fits
fn truncated(name: &str) -> String<ENTRY_NAME_MAX> {
    let mut out = String::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
