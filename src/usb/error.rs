use core::fmt::{self, Display, Formatter};

/// Status code reported by one of the USB collaborators (host library,
/// mass-storage driver or VFS layer).
///
/// The numeric values follow the `esp_err_t` convention of the ESP-IDF
/// components these collaborators wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverError(pub i32);

impl DriverError {
    /// Generic failure
    pub const FAIL: DriverError = DriverError(-1);
    /// Out of memory
    pub const NO_MEM: DriverError = DriverError(0x101);
    /// Invalid argument (unknown handle, bad path)
    pub const INVALID_ARG: DriverError = DriverError(0x102);
    /// Component not installed, or installed twice
    pub const INVALID_STATE: DriverError = DriverError(0x103);
    /// Requested device is no longer on the bus
    pub const NOT_FOUND: DriverError = DriverError(0x105);
    /// Operation accepted but still in progress
    pub const NOT_FINISHED: DriverError = DriverError(0x10C);

    pub fn code(&self) -> i32 {
        self.0
    }
}

impl Display for DriverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            DriverError::FAIL => write!(f, "ESP_FAIL"),
            DriverError::NO_MEM => write!(f, "ESP_ERR_NO_MEM"),
            DriverError::INVALID_ARG => write!(f, "ESP_ERR_INVALID_ARG"),
            DriverError::INVALID_STATE => write!(f, "ESP_ERR_INVALID_STATE"),
            DriverError::NOT_FOUND => write!(f, "ESP_ERR_NOT_FOUND"),
            DriverError::NOT_FINISHED => write!(f, "ESP_ERR_NOT_FINISHED"),
            DriverError(code) => write!(f, "driver error 0x{code:x}"),
        }
    }
}

/// Errors surfaced by the USB mass-storage subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No worker available to run the host pump or the application task
    ResourceExhausted,
    /// `start()` called while the subsystem is already running
    AlreadyStarted,
    /// Host stack, mass-storage driver or device installation failed
    DriverInstallFailed(DriverError),
    /// Filesystem registration of an installed device failed
    MountFailed(DriverError),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::ResourceExhausted => write!(f, "USB worker tasks unavailable"),
            Error::AlreadyStarted => write!(f, "USB MSC host already started"),
            Error::DriverInstallFailed(e) => write!(f, "USB driver install failed: {e}"),
            Error::MountFailed(e) => write!(f, "USB mount failed: {e}"),
        }
    }
}
