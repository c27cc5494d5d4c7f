//! Bring-up command implementation.

use {
    crate::{
        Cli, CliError,
        config::{self, Config},
        serial::select_serial_port,
        use_fancy_output,
    },
    anyhow::{Context, Result},
    clap::Args,
    console::style,
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    log::debug,
    std::{path::PathBuf, time::Duration},
    wilcboot::{
        BringUp, BringupConfig, LineCaps, NativePort, SerialConfig, UartHost,
        port::baud::{DEFAULT_BASE_CLOCK, DEFAULT_LINE_MAX},
        target::{DEFAULT_CHIP_NAME, DEFAULT_FIRMWARE_FILE},
    },
};

/// Options of the `bringup` subcommand.
#[derive(Debug, Args)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct BringupArgs {
    /// Firmware image to download.
    #[arg(env = "WILCBOOT_FIRMWARE")]
    pub firmware: Option<PathBuf>,

    /// Rate the boot ROM listens at.
    #[arg(long, value_name = "BAUD")]
    pub bootrom_baud: Option<u32>,

    /// Rate used while downloading.
    #[arg(long, value_name = "BAUD")]
    pub download_baud: Option<u32>,

    /// Rate once the firmware runs.
    #[arg(long, value_name = "BAUD", env = "WILCBOOT_BAUD")]
    pub operational_baud: Option<u32>,

    /// Enable RTS/CTS flow control at the operational rate.
    #[arg(long)]
    pub flow_control: bool,

    /// Device address to program (12 hex digits, ':' separators allowed).
    #[arg(long, value_name = "HEX", env = "WILCBOOT_ADDRESS")]
    pub address: Option<String>,

    /// Read and print the controller's own address.
    #[arg(long)]
    pub read_address: bool,

    /// Firmware was placed by another path; only switch rates.
    #[arg(long)]
    pub external_download: bool,

    /// Override the chip's settlement delay after download.
    #[arg(long, value_name = "MS")]
    pub settle_ms: Option<u64>,

    /// Chip name (e.g. AT-WILC3000, BCM43241).
    #[arg(long, value_name = "NAME", env = "WILCBOOT_CHIP")]
    pub chip: Option<String>,

    /// Highest native rate of the host UART.
    #[arg(long, value_name = "BAUD")]
    pub line_max: Option<u32>,

    /// Base clock of the host UART in Hz.
    #[arg(long, value_name = "HZ")]
    pub base_clock: Option<u32>,
}

/// Combine arguments, configuration and defaults.
pub(crate) fn resolve(args: &BringupArgs, config: &Config) -> Result<BringupConfig> {
    let serial = &config.serial;
    let firmware = &config.firmware;
    let device = &config.device;

    let firmware_path = args
        .firmware
        .clone()
        .or_else(|| {
            firmware
                .path
                .clone()
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FIRMWARE_FILE));

    let device_address = match &args.address {
        Some(text) => Some(config::parse_address(text)?),
        None => config.device_address()?,
    };

    let line = LineCaps {
        line_max: args
            .line_max
            .or(serial.line_max)
            .unwrap_or(DEFAULT_LINE_MAX),
        base_clock: args
            .base_clock
            .or(serial.base_clock)
            .unwrap_or(DEFAULT_BASE_CLOCK),
    };

    let chip = args
        .chip
        .clone()
        .or_else(|| {
            device
                .chip
                .clone()
        })
        .unwrap_or_else(|| DEFAULT_CHIP_NAME.to_string());

    Ok(BringupConfig::new(firmware_path)
        .with_bootrom_baud(config::bootrom_baud(
            args.bootrom_baud
                .or(serial.bootrom_baud),
        ))
        .with_download_baud(config::download_baud(
            args.download_baud
                .or(serial.download_baud),
        ))
        .with_operational_baud(config::operational_baud(
            args.operational_baud
                .or(serial.operational_baud),
        ))
        .with_flow_control(args.flow_control || serial.flow_control == Some(true))
        .with_line_caps(line)
        .with_device_address(device_address)
        .with_read_controller_address(args.read_address || device.read_address == Some(true))
        .with_external_download(
            args.external_download || firmware.external_download == Some(true),
        )
        .with_settlement_delay(
            args.settle_ms
                .or(firmware.settle_ms)
                .map(Duration::from_millis),
        )
        .with_chip_name(chip))
}

/// Bring-up command implementation.
pub(crate) fn cmd_bringup(cli: &Cli, config: &Config, args: &BringupArgs) -> Result<()> {
    let bringup = resolve(args, config)?;

    if bringup.download_over_uart && !bringup.firmware_path.is_file() {
        return Err(CliError::Usage(format!(
            "Firmware image {} not found",
            bringup
                .firmware_path
                .display()
        ))
        .into());
    }

    let port_name = select_serial_port(cli.port.as_deref(), config)?;
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&port_name).green(),
            bringup.bootrom_baud
        );
        if bringup.download_over_uart {
            eprintln!(
                "{} Firmware {}",
                style("📦").cyan(),
                bringup
                    .firmware_path
                    .display()
            );
        }
    }

    let port = NativePort::open(&SerialConfig::new(&port_name, bringup.bootrom_baud))
        .map_err(|e| CliError::Device(format!("Failed to open {port_name}: {e}")))?;

    let pb = if cli.quiet || !use_fancy_output() || !bringup.download_over_uart {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(0);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(ProgressDrawTarget::stderr());
        pb.set_message("Downloading");
        pb
    };

    let progress = pb.clone();
    let host = UartHost::new(port).with_progress(move |transferred, total| {
        progress.set_length(total);
        progress.set_position(transferred);
    });

    let chip = bringup
        .chip_name
        .clone();
    debug!("Bring-up configuration: {bringup:?}");

    let mut engine = BringUp::new(host);
    let result = engine.run(bringup);
    pb.finish_and_clear();
    result.with_context(|| format!("Bring-up of {chip} on {port_name} failed"))?;

    if !cli.quiet {
        eprintln!(
            "\n{} {chip} is up at {} baud",
            style("🎉").green().bold(),
            engine
                .platform()
                .line_rate()
        );
    }

    Ok(())
}
