//! Bring-up states and the per-attempt session.

use {
    crate::{
        image::FirmwareImage,
        port::baud::BaudPlan,
        target::chip::BringupConfig,
    },
    std::fmt,
};

/// Bring-up state machine states.
///
/// `ReadLocalName`, `DlMinidriver` and `CheckBtClkSrc` are entered and left
/// within one callback turn; they never wait for a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum State {
    /// Waiting for Read Local Version.
    CheckBootrom,
    /// Waiting for the HCI reset.
    Start,
    /// About to read the clock source register.
    CheckBtClkSrc,
    /// Waiting for the clock source read.
    SetUartClock,
    /// Controller switched to the download rate; host follows.
    SetUartBaud1,
    /// Opening the firmware image.
    ReadLocalName,
    /// Giving the boot ROM time to enter download mode.
    DlMinidriver,
    /// Streaming firmware chunks.
    DlFwPatch,
    /// Second controller rate switch done; host follows.
    SetUartBaud2,
    /// Device address step.
    SetBdAddr,
    /// Waiting for the controller's own address.
    ReadBdAddr,
    /// Waiting for the switch to the operational rate.
    SetBaudRate,
}

impl State {
    /// Whether the state waits for a completion rather than falling through.
    pub fn awaits_completion(&self) -> bool {
        !matches!(
            self,
            Self::CheckBtClkSrc | Self::ReadLocalName | Self::DlMinidriver
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CheckBootrom => "CHECK_BOOTROM",
            Self::Start => "START",
            Self::CheckBtClkSrc => "CHECK_BT_CLK_SRC",
            Self::SetUartClock => "SET_UART_CLOCK",
            Self::SetUartBaud1 => "SET_UART_BAUD_1",
            Self::ReadLocalName => "READ_LOCAL_NAME",
            Self::DlMinidriver => "DL_MINIDRIVER",
            Self::DlFwPatch => "DL_FW_PATCH",
            Self::SetUartBaud2 => "SET_UART_BAUD_2",
            Self::SetBdAddr => "SET_BD_ADDR",
            Self::ReadBdAddr => "READ_BD_ADDR",
            Self::SetBaudRate => "SET_BAUD_RATE",
        };
        f.write_str(name)
    }
}

/// Mutable context of one bring-up attempt.
///
/// Created by [`BringUp::start`](super::BringUp::start) and dropped when the
/// attempt ends, which also closes any open image.
#[derive(Debug)]
pub struct Session {
    pub(crate) config: BringupConfig,
    pub(crate) state: State,
    pub(crate) image: Option<FirmwareImage>,
    pub(crate) image_size: u64,
    pub(crate) transferred: u64,
    pub(crate) second_baud_switch: bool,
    pub(crate) controller_baud: Option<u32>,
    pub(crate) operational_plan: Option<BaudPlan>,
    pub(crate) awaiting: Option<u16>,
}

impl Session {
    pub(crate) fn new(config: BringupConfig, state: State) -> Self {
        Self {
            config,
            state,
            image: None,
            image_size: 0,
            transferred: 0,
            second_baud_switch: false,
            controller_baud: None,
            operational_plan: None,
            awaiting: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Configuration the session runs with.
    pub fn config(&self) -> &BringupConfig {
        &self.config
    }

    /// Chip name the session was started for.
    pub fn chip_name(&self) -> &str {
        &self.config.chip_name
    }

    /// Size of the image, once opened.
    pub fn image_size(&self) -> u64 {
        self.image_size
    }

    /// Firmware bytes handed to the transport so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Whether the firmware image is currently open.
    pub fn image_open(&self) -> bool {
        self.image
            .is_some()
    }

    /// Whether a second controller rate switch has been scheduled.
    pub fn second_baud_switch(&self) -> bool {
        self.second_baud_switch
    }

    /// Rate last sent to the controller in an update-baudrate command.
    pub fn controller_baud(&self) -> Option<u32> {
        self.controller_baud
    }

    /// Opcode whose completion is outstanding.
    pub fn awaiting(&self) -> Option<u16> {
        self.awaiting
    }
}
