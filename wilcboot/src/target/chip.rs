//! Chip families and bring-up configuration.
//!
//! The controller identifies itself only through the configured chip name;
//! the family derived from it decides how long the firmware needs to settle
//! after a download before the host may talk to it.

use {
    crate::{
        image::DEFAULT_LOAD_ADDRESS,
        port::baud::LineCaps,
        protocol::DeviceAddress,
    },
    std::{fmt, path::PathBuf, time::Duration},
};

/// Chip name assumed when none is configured.
pub const DEFAULT_CHIP_NAME: &str = "AT-WILC3000";

/// Rate the boot ROM listens at after reset.
pub const DEFAULT_BOOTROM_BAUD: u32 = 115_200;

/// Rate used while downloading the firmware.
pub const DEFAULT_DOWNLOAD_BAUD: u32 = 921_600;

/// Rate used once the firmware runs.
pub const DEFAULT_OPERATIONAL_BAUD: u32 = 921_600;

/// Firmware file looked up when none is configured.
pub const DEFAULT_FIRMWARE_FILE: &str = "wilc3000_bt_firmware.bin";

/// Known chip families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ChipFamily {
    /// Microchip (Atmel) WILC3000.
    #[default]
    Wilc3000,
    /// Broadcom BCM43241.
    Bcm43241,
    /// Any other controller.
    Generic,
}

impl ChipFamily {
    /// Identify the family from a chip name such as `AT-WILC3000`.
    ///
    /// Matching is case-insensitive and by substring, so vendor prefixes and
    /// revision suffixes are accepted. Unknown names map to
    /// [`ChipFamily::Generic`].
    pub fn from_name(name: &str) -> Self {
        let name = name.to_ascii_uppercase();
        if name.contains("WILC3000") {
            Self::Wilc3000
        } else if name.contains("BCM43241") {
            Self::Bcm43241
        } else {
            Self::Generic
        }
    }

    /// Time the firmware needs after download before it accepts commands.
    #[must_use]
    pub fn settlement_delay(&self) -> Duration {
        match self {
            Self::Wilc3000 | Self::Bcm43241 => Duration::from_millis(200),
            Self::Generic => Duration::from_millis(100),
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wilc3000 => write!(f, "WILC3000"),
            Self::Bcm43241 => write!(f, "BCM43241"),
            Self::Generic => write!(f, "Generic"),
        }
    }
}

/// Everything one bring-up session needs to know.
#[derive(Debug, Clone)]
pub struct BringupConfig {
    /// Firmware image to download.
    pub firmware_path: PathBuf,
    /// Download the firmware over the HCI link. When false the firmware was
    /// placed by another path and only the post-download steps run.
    pub download_over_uart: bool,
    /// Boot ROM rate.
    pub bootrom_baud: u32,
    /// Rate during download.
    pub download_baud: u32,
    /// Rate once the firmware runs.
    pub operational_baud: u32,
    /// RTS/CTS flow control at the operational rate.
    pub flow_control: bool,
    /// Host line limits used for baud matching.
    pub line: LineCaps,
    /// Address to program into the controller.
    pub device_address: Option<DeviceAddress>,
    /// Read and log the controller's own address at the end.
    pub read_controller_address: bool,
    /// Override for the family's settlement delay.
    pub settlement_delay: Option<Duration>,
    /// Controller address the image is loaded at.
    pub load_address: u32,
    /// Chip name, used to look up the family.
    pub chip_name: String,
}

impl BringupConfig {
    /// Create a configuration for the given image with default rates.
    pub fn new(firmware_path: impl Into<PathBuf>) -> Self {
        Self {
            firmware_path: firmware_path.into(),
            download_over_uart: true,
            bootrom_baud: DEFAULT_BOOTROM_BAUD,
            download_baud: DEFAULT_DOWNLOAD_BAUD,
            operational_baud: DEFAULT_OPERATIONAL_BAUD,
            flow_control: false,
            line: LineCaps::default(),
            device_address: None,
            read_controller_address: false,
            settlement_delay: None,
            load_address: DEFAULT_LOAD_ADDRESS,
            chip_name: DEFAULT_CHIP_NAME.to_string(),
        }
    }

    /// Set the boot ROM rate.
    #[must_use]
    pub fn with_bootrom_baud(mut self, baud: u32) -> Self {
        self.bootrom_baud = baud;
        self
    }

    /// Set the download rate.
    #[must_use]
    pub fn with_download_baud(mut self, baud: u32) -> Self {
        self.download_baud = baud;
        self
    }

    /// Set the operational rate.
    #[must_use]
    pub fn with_operational_baud(mut self, baud: u32) -> Self {
        self.operational_baud = baud;
        self
    }

    /// Enable flow control at the operational rate.
    #[must_use]
    pub fn with_flow_control(mut self, enabled: bool) -> Self {
        self.flow_control = enabled;
        self
    }

    /// Set the host line limits.
    #[must_use]
    pub fn with_line_caps(mut self, line: LineCaps) -> Self {
        self.line = line;
        self
    }

    /// Program this address once the firmware runs.
    #[must_use]
    pub fn with_device_address(mut self, address: Option<DeviceAddress>) -> Self {
        self.device_address = address;
        self
    }

    /// Read back the controller's address at the end.
    #[must_use]
    pub fn with_read_controller_address(mut self, enabled: bool) -> Self {
        self.read_controller_address = enabled;
        self
    }

    /// Skip the download; the firmware was placed by another path.
    #[must_use]
    pub fn with_external_download(mut self, external: bool) -> Self {
        self.download_over_uart = !external;
        self
    }

    /// Override the settlement delay.
    #[must_use]
    pub fn with_settlement_delay(mut self, delay: Option<Duration>) -> Self {
        self.settlement_delay = delay;
        self
    }

    /// Set the load address.
    #[must_use]
    pub fn with_load_address(mut self, address: u32) -> Self {
        self.load_address = address;
        self
    }

    /// Set the chip name.
    #[must_use]
    pub fn with_chip_name(mut self, name: impl Into<String>) -> Self {
        self.chip_name = name.into();
        self
    }

    /// Family derived from the chip name.
    pub fn family(&self) -> ChipFamily {
        ChipFamily::from_name(&self.chip_name)
    }

    /// Configured settlement delay, or the family's.
    pub fn effective_settlement_delay(&self) -> Duration {
        self.settlement_delay
            .unwrap_or_else(|| {
                self.family()
                    .settlement_delay()
            })
    }
}

impl Default for BringupConfig {
    fn default() -> Self {
        Self::new(DEFAULT_FIRMWARE_FILE)
    }
}
