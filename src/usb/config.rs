//! Configuration for the USB host stack, the mass-storage driver and the
//! FAT mount that backs `/usb`.

/// Low-level host stack installation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HostConfig {
    /// Leave the internal PHY untouched (an external PHY is already set up)
    pub skip_phy_setup: bool,
    /// Interrupt priority level of the host controller ISR
    pub intr_level: u8,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            skip_phy_setup: false,
            intr_level: 1,
        }
    }
}

/// Mass-storage class driver parameters.
///
/// The driver runs its own background task which invokes the hot-plug
/// callback; these values size that task.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MscDriverConfig {
    pub create_background_task: bool,
    pub task_priority: u8,
    pub stack_size: usize,
    pub core_id: u8,
}

impl Default for MscDriverConfig {
    fn default() -> Self {
        Self {
            create_background_task: true,
            task_priority: 5,
            stack_size: 4096,
            core_id: 0,
        }
    }
}

/// FAT filesystem mount options passed to the VFS layer
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MountConfig {
    /// Never reformat a user's drive just because it failed to mount
    pub format_if_mount_failed: bool,
    /// Maximum number of simultaneously open files
    pub max_files: u8,
    pub allocation_unit_size: usize,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            format_if_mount_failed: false,
            max_files: 3,
            allocation_unit_size: 8192,
        }
    }
}

/// Complete configuration of the USB mass-storage subsystem
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsbMscConfig {
    pub host: HostConfig,
    pub msc: MscDriverConfig,
    pub mount: MountConfig,
}

impl UsbMscConfig {
    pub fn with_host(mut self, host: HostConfig) -> Self {
        self.host = host;
        self
    }

    pub fn with_msc(mut self, msc: MscDriverConfig) -> Self {
        self.msc = msc;
        self
    }

    pub fn with_mount(mut self, mount: MountConfig) -> Self {
        self.mount = mount;
        self
    }
}
