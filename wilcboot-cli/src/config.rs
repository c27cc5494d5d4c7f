//! Configuration file support for wilcboot.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (WILCBOOT_*)
//! 3. Local config file (./wilcboot.toml)
//! 4. Global config file (~/.config/wilcboot/config.toml)
//!
//! `--config PATH` replaces both files.

use {
    crate::CliError,
    directories::ProjectDirs,
    log::{debug, warn},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
    },
    wilcboot::{
        DeviceAddress,
        target::{DEFAULT_BOOTROM_BAUD, DEFAULT_DOWNLOAD_BAUD, DEFAULT_OPERATIONAL_BAUD},
    },
};

/// Rates at or above this are rejected in favour of the defaults.
pub const MAX_BAUD: u32 = 4_000_000;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "wilcboot.toml";

/// Serial line settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Serial port (e.g., "/dev/ttyS1" or "COM3").
    pub port: Option<String>,
    /// Boot ROM rate.
    pub bootrom_baud: Option<u32>,
    /// Rate during the download.
    pub download_baud: Option<u32>,
    /// Rate once the firmware runs.
    pub operational_baud: Option<u32>,
    /// RTS/CTS flow control at the operational rate.
    pub flow_control: Option<bool>,
    /// Highest native rate of the host UART.
    pub line_max: Option<u32>,
    /// Base clock of the host UART.
    pub base_clock: Option<u32>,
}

/// Firmware settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirmwareSettings {
    /// Firmware image.
    pub path: Option<PathBuf>,
    /// Settlement delay after download, in milliseconds.
    pub settle_ms: Option<u64>,
    /// Firmware is placed by another path; skip the download.
    pub external_download: Option<bool>,
}

/// Controller settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Device address to program, 12 hex digits.
    pub address: Option<String>,
    /// Read back the controller's own address.
    pub read_address: Option<bool>,
    /// Chip name.
    pub chip: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Serial line configuration.
    #[serde(default)]
    pub serial: SerialSettings,
    /// Firmware configuration.
    #[serde(default)]
    pub firmware: FirmwareSettings,
    /// Controller configuration.
    #[serde(default)]
    pub device: DeviceSettings,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "wilcboot").map(|dirs| {
            dirs.config_dir()
                .to_path_buf()
        })
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; values set in `other` win.
    fn merge(&mut self, other: Self) {
        let Self {
            serial,
            firmware,
            device,
        } = other;

        merge_option(&mut self.serial.port, serial.port);
        merge_option(&mut self.serial.bootrom_baud, serial.bootrom_baud);
        merge_option(&mut self.serial.download_baud, serial.download_baud);
        merge_option(&mut self.serial.operational_baud, serial.operational_baud);
        merge_option(&mut self.serial.flow_control, serial.flow_control);
        merge_option(&mut self.serial.line_max, serial.line_max);
        merge_option(&mut self.serial.base_clock, serial.base_clock);

        merge_option(&mut self.firmware.path, firmware.path);
        merge_option(&mut self.firmware.settle_ms, firmware.settle_ms);
        merge_option(
            &mut self.firmware.external_download,
            firmware.external_download,
        );

        merge_option(&mut self.device.address, device.address);
        merge_option(&mut self.device.read_address, device.read_address);
        merge_option(&mut self.device.chip, device.chip);
    }

    /// Configured device address.
    pub fn device_address(&self) -> anyhow::Result<Option<DeviceAddress>> {
        self.device
            .address
            .as_deref()
            .map(parse_address)
            .transpose()
    }
}

fn merge_option<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Parse a device address, reporting failures as configuration errors.
pub fn parse_address(text: &str) -> anyhow::Result<DeviceAddress> {
    text.parse()
        .map_err(|e| CliError::Config(format!("invalid device address '{text}': {e}")).into())
}

/// Boot ROM rate, or its default when unset or out of range.
pub fn bootrom_baud(value: Option<u32>) -> u32 {
    clamp_baud("boot ROM", value, DEFAULT_BOOTROM_BAUD)
}

/// Download rate, or its default when unset or out of range.
pub fn download_baud(value: Option<u32>) -> u32 {
    clamp_baud("download", value, DEFAULT_DOWNLOAD_BAUD)
}

/// Operational rate, or its default when unset or out of range.
pub fn operational_baud(value: Option<u32>) -> u32 {
    clamp_baud("operational", value, DEFAULT_OPERATIONAL_BAUD)
}

fn clamp_baud(what: &str, value: Option<u32>, default: u32) -> u32 {
    match value {
        Some(rate) if rate >= MAX_BAUD => {
            warn!("{what} rate {rate} is out of range, using {default}");
            default
        },
        Some(0) => {
            warn!("{what} rate 0 is invalid, using {default}");
            default
        },
        Some(rate) => rate,
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use {super::*, tempfile::tempdir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.serial.port.is_none());
        assert!(config.serial.operational_baud.is_none());
        assert!(config.firmware.path.is_none());
        assert!(config.device.address.is_none());
        assert!(config.device.chip.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[serial]
port = "/dev/ttyS1"
bootrom_baud = 115200
operational_baud = 3000000
flow_control = true
line_max = 921600
base_clock = 5500000

[firmware]
path = "/lib/firmware/mchp/wilc3000_bt_firmware.bin"
settle_ms = 250

[device]
address = "F8:F0:05:AB:CD:EF"
read_address = true
chip = "AT-WILC3000"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyS1"));
        assert_eq!(config.serial.operational_baud, Some(3_000_000));
        assert_eq!(config.serial.flow_control, Some(true));
        assert_eq!(config.firmware.settle_ms, Some(250));
        assert_eq!(config.firmware.external_download, None);
        assert_eq!(config.device.read_address, Some(true));
        assert_eq!(
            config.device_address().unwrap().unwrap().to_string(),
            "F8:F0:05:AB:CD:EF"
        );
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.serial.port.is_none());
        assert!(config.device_address().unwrap().is_none());
    }

    #[test]
    fn test_config_merge_overrides_set_values_only() {
        let mut base = Config::default();
        base.serial.port = Some("/dev/ttyS1".to_string());
        base.serial.download_baud = Some(460_800);
        base.device.chip = Some("AT-WILC3000".to_string());

        let mut other = Config::default();
        other.serial.download_baud = Some(921_600);
        other.firmware.external_download = Some(true);

        base.merge(other);
        assert_eq!(base.serial.port.as_deref(), Some("/dev/ttyS1"));
        assert_eq!(base.serial.download_baud, Some(921_600));
        assert_eq!(base.firmware.external_download, Some(true));
        assert_eq!(base.device.chip.as_deref(), Some("AT-WILC3000"));
    }

    #[test]
    fn test_invalid_address_is_config_error() {
        let mut config = Config::default();
        config.device.address = Some("not-an-address".to_string());
        let err = config.device_address().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Config(_))
        ));
    }

    #[test]
    fn test_rates_fall_back_to_defaults() {
        assert_eq!(bootrom_baud(None), 115_200);
        assert_eq!(bootrom_baud(Some(4_000_000)), 115_200);
        assert_eq!(download_baud(Some(12_000_000)), 921_600);
        assert_eq!(operational_baud(Some(0)), 921_600);
        assert_eq!(operational_baud(Some(3_999_999)), 3_999_999);
        assert_eq!(download_baud(Some(460_800)), 460_800);
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test_config.toml");
        fs::write(
            &path,
            r#"
[serial]
port = "/dev/ttyUSB1"
[device]
chip = "BCM43241"
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.device.chip.as_deref(), Some("BCM43241"));
    }

    #[test]
    fn test_load_from_path_invalid_toml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "invalid toml [[[").unwrap();
        let config = Config::load_from_path(&path);
        assert!(config.serial.port.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.serial.port.is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_str().unwrap().contains("wilcboot"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}
