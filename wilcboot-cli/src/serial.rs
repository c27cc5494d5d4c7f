//! Serial port selection.
//!
//! The port comes from `--port`/`WILCBOOT_PORT`, then the configuration
//! file. Without either, a single enumerated port is used; zero or several
//! candidates are a usage error, never a prompt.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    log::debug,
    std::cmp::Ordering,
    wilcboot::{NativePortEnumerator, PortEnumerator, PortInfo},
};

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn select_single_port(ports: Vec<PortInfo>) -> Result<String> {
    match ports
        .len()
        .cmp(&1)
    {
        Ordering::Equal => ports
            .into_iter()
            .next()
            .map(|port| port.name)
            .ok_or_else(|| usage_err("No serial ports found")),
        Ordering::Greater => {
            let names: Vec<&str> = ports
                .iter()
                .map(|p| p.name.as_str())
                .collect();
            Err(usage_err(&format!(
                "Found multiple serial ports ({}); choose one with --port",
                names.join(", ")
            )))
        },
        Ordering::Less => Err(usage_err(
            "No serial ports found; specify one with --port",
        )),
    }
}

/// Pick the serial port to use.
pub fn select_serial_port(port: Option<&str>, config: &Config) -> Result<String> {
    if let Some(port_name) = port {
        return Ok(port_name.to_string());
    }

    if let Some(port_name) = &config
        .serial
        .port
    {
        debug!("Using port from config: {port_name}");
        return Ok(port_name.clone());
    }

    let ports = NativePortEnumerator::list_ports()?;
    debug!("Found {} serial port(s)", ports.len());
    select_single_port(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }

    #[test]
    fn test_explicit_port_wins() {
        let mut config = Config::default();
        config.serial.port = Some("/dev/ttyS1".to_string());
        assert_eq!(
            select_serial_port(Some("/dev/ttyUSB0"), &config).unwrap(),
            "/dev/ttyUSB0"
        );
    }

    #[test]
    fn test_config_port_used() {
        let mut config = Config::default();
        config.serial.port = Some("/dev/ttyS1".to_string());
        assert_eq!(select_serial_port(None, &config).unwrap(), "/dev/ttyS1");
    }

    #[test]
    fn test_single_port_selected() {
        assert_eq!(
            select_single_port(vec![port("/dev/ttyUSB0")]).unwrap(),
            "/dev/ttyUSB0"
        );
    }

    #[test]
    fn test_multiple_ports_is_usage_error() {
        let err = select_single_port(vec![port("/dev/ttyUSB0"), port("/dev/ttyUSB1")])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
        assert!(err.to_string().contains("/dev/ttyUSB1"));
    }

    #[test]
    fn test_no_ports_is_usage_error() {
        let err = select_single_port(vec![]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }
}
