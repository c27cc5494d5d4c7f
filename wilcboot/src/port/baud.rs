//! Closest-achievable baud rate calculation.
//!
//! The host UART only supports a fixed table of rates natively, and only up
//! to a line-specific maximum. Anything else is approximated by dividing the
//! UART base clock by an integer divisor, with the port programmed at a
//! nominal sentinel rate so the driver applies the divisor instead.
//!
//! ```text
//! target in table && target <= line_max   ->  Native(code)
//! target < base_clock                      ->  Custom(divisor = round(base / target), min 2)
//! otherwise                                ->  RateUnachievable
//! ```
//!
//! This module is pure calculation; applying a [`BaudPlan`] is the job of
//! the serial control capability.

use crate::error::{Error, Result};
use std::fmt;

/// Highest rate the host UART drives natively.
pub const DEFAULT_LINE_MAX: u32 = 921_600;

/// UART base clock used for custom divisors.
pub const DEFAULT_BASE_CLOCK: u32 = 5_500_000;

/// Nominal rate the port is programmed at when a custom divisor is active.
pub const CUSTOM_SENTINEL_RATE: u32 = 38_400;

/// Divisor 1 would run the line at the full base clock, which the
/// controller cannot follow.
pub const MIN_CUSTOM_DIVISOR: u32 = 2;

/// Accepted deviation of a custom rate from its target, in percent.
pub const TOLERANCE_PERCENT: u64 = 2;

/// Standard UART rate codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum UartRate {
    /// 600 baud.
    B600,
    /// 1200 baud.
    B1200,
    /// 9600 baud.
    B9600,
    /// 19200 baud.
    B19200,
    /// 57600 baud.
    B57600,
    /// 115200 baud.
    B115200,
    /// 230400 baud.
    B230400,
    /// 460800 baud.
    B460800,
    /// 921600 baud.
    B921600,
    /// 1 Mbaud.
    B1000000,
    /// 1.5 Mbaud.
    B1500000,
    /// 2 Mbaud.
    B2000000,
    /// 3 Mbaud.
    B3000000,
    /// 4 Mbaud.
    B4000000,
}

impl UartRate {
    /// All standard rates, ascending.
    pub const ALL: [Self; 14] = [
        Self::B600,
        Self::B1200,
        Self::B9600,
        Self::B19200,
        Self::B57600,
        Self::B115200,
        Self::B230400,
        Self::B460800,
        Self::B921600,
        Self::B1000000,
        Self::B1500000,
        Self::B2000000,
        Self::B3000000,
        Self::B4000000,
    ];

    /// Look up the code for a line speed.
    pub fn from_rate(rate: u32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|code| code.rate() == rate)
    }

    /// Line speed in bits per second.
    pub fn rate(self) -> u32 {
        match self {
            Self::B600 => 600,
            Self::B1200 => 1_200,
            Self::B9600 => 9_600,
            Self::B19200 => 19_200,
            Self::B57600 => 57_600,
            Self::B115200 => 115_200,
            Self::B230400 => 230_400,
            Self::B460800 => 460_800,
            Self::B921600 => 921_600,
            Self::B1000000 => 1_000_000,
            Self::B1500000 => 1_500_000,
            Self::B2000000 => 2_000_000,
            Self::B3000000 => 3_000_000,
            Self::B4000000 => 4_000_000,
        }
    }
}

impl fmt::Display for UartRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.rate())
    }
}

/// How the host line is to be programmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum BaudSetting {
    /// Use a standard rate code.
    Native {
        /// Rate code.
        code: UartRate,
    },
    /// Divide the base clock.
    Custom {
        /// Clock divisor (at least [`MIN_CUSTOM_DIVISOR`]).
        divisor: u32,
        /// UART base clock.
        base_clock: u32,
        /// Rate the port is nominally set to while the divisor is active.
        sentinel: u32,
    },
}

/// Result of matching a target rate against the line's capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BaudPlan {
    /// Requested rate.
    pub target: u32,
    /// Native code or custom divisor.
    pub setting: BaudSetting,
    /// Rate the line actually runs at.
    pub achieved: u32,
    /// Achieved rate deviates from target by more than [`TOLERANCE_PERCENT`].
    pub out_of_tolerance: bool,
}

impl BaudPlan {
    /// Whether a custom divisor is needed.
    pub fn is_custom(&self) -> bool {
        matches!(self.setting, BaudSetting::Custom { .. })
    }

    /// Deviation of the achieved rate from the target, in percent.
    #[allow(clippy::cast_precision_loss)]
    pub fn deviation_percent(&self) -> f64 {
        if self.target == 0 {
            return 0.0;
        }
        (f64::from(self.achieved) - f64::from(self.target)).abs() * 100.0
            / f64::from(self.target)
    }
}

impl fmt::Display for BaudPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.setting {
            BaudSetting::Native { code } => write!(f, "{} (native {code})", self.achieved),
            BaudSetting::Custom {
                divisor,
                base_clock,
                ..
            } => write!(
                f,
                "{} (custom {base_clock}/{divisor}, target {})",
                self.achieved, self.target
            ),
        }
    }
}

/// Physical limits of the host serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LineCaps {
    /// Highest natively driven rate.
    pub line_max: u32,
    /// UART base clock.
    pub base_clock: u32,
}

impl Default for LineCaps {
    fn default() -> Self {
        Self {
            line_max: DEFAULT_LINE_MAX,
            base_clock: DEFAULT_BASE_CLOCK,
        }
    }
}

impl LineCaps {
    /// Match a rate against these limits.
    pub fn plan(&self, target: u32) -> Result<BaudPlan> {
        match_rate(target, self.line_max, self.base_clock)
    }
}

/// Find the closest rate the line can produce for `target`.
///
/// A custom plan outside the tolerance window is still returned, with
/// `out_of_tolerance` set; callers log it and carry on.
pub fn match_rate(target: u32, line_max: u32, base_clock: u32) -> Result<BaudPlan> {
    if target <= line_max {
        if let Some(code) = UartRate::from_rate(target) {
            return Ok(BaudPlan {
                target,
                setting: BaudSetting::Native { code },
                achieved: target,
                out_of_tolerance: false,
            });
        }
    }

    if target == 0 || target >= base_clock {
        return Err(Error::RateUnachievable { target, base_clock });
    }

    let target64 = u64::from(target);
    let base64 = u64::from(base_clock);

    // round(base / target) for positive integers
    let divisor = ((base64 + target64 / 2) / target64).max(u64::from(MIN_CUSTOM_DIVISOR));
    let achieved = base64 / divisor;

    let low = target64 * (100 - TOLERANCE_PERCENT) / 100;
    let high = target64 * (100 + TOLERANCE_PERCENT) / 100;
    let out_of_tolerance = achieved < low || achieved > high;

    // divisor <= base_clock and achieved <= base_clock, both fit in u32
    #[allow(clippy::cast_possible_truncation)]
    Ok(BaudPlan {
        target,
        setting: BaudSetting::Custom {
            divisor: divisor as u32,
            base_clock,
            sentinel: CUSTOM_SENTINEL_RATE,
        },
        achieved: achieved as u32,
        out_of_tolerance,
    })
}
