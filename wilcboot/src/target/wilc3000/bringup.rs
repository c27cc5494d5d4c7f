//! WILC3000 bring-up state machine.
//!
//! ```text
//! start ──► CHECK_BOOTROM ──(HCI v6: firmware resident)──────────────┐
//!               │ reset                                             │
//!               ▼                                                   │
//!             START ─► CHECK_BT_CLK_SRC ─► SET_UART_CLOCK           │
//!                                              │ update baud        │
//!                                              ▼                    │
//!                     SET_UART_BAUD_1 ─► READ_LOCAL_NAME            │
//!                                              │ open image         │
//!                                              ▼                    │
//!                       DL_MINIDRIVER ─► DL_FW_PATCH ◄─┐ chunk      │
//!                                              │ ──────┘            │
//!                                              │ cpu reset          ▼
//!                                              └──► SET_BAUD_RATE / SET_BD_ADDR / finish
//! ```
//!
//! When the controller address is wanted, READ_BD_ADDR is sent in place of
//! every successful finish.
//!
//! Each completion event advances the machine by one command. Every exit
//! path, successful or not, drops the session, emits
//! [`LifecycleEvent::AllowSleepAfterDownload`] and then reports exactly one
//! [`Outcome`].

use {
    super::{
        protocol::{
            self, CLOCK_SOURCE_PARAM_INDEX, CLOCK_SOURCE_PLL_LOCKED, FIRMWARE_HCI_VERSION,
            VERSION_PARAM_INDEX,
        },
        session::{Session, State},
    },
    crate::{
        error::{Error, Result},
        host::{LifecycleEvent, Outcome, Platform},
        image::FirmwareImage,
        port::baud::{BaudPlan, LineCaps},
        protocol::{Command, CompletionEvent, DeviceAddress},
        target::chip::BringupConfig,
    },
    log::{debug, error, info, warn},
    std::time::Duration,
};

/// Pause after finding the firmware already running.
const RESIDENT_FIRMWARE_SETTLE: Duration = Duration::from_millis(10);

/// Pause for the boot ROM to enter download mode.
const DOWNLOAD_MODE_SETTLE: Duration = Duration::from_millis(50);

/// Pause after the CPU reset so the new firmware is up before the host
/// changes its rate.
const CPU_RESET_SETTLE: Duration = Duration::from_millis(300);

/// Pause before talking to externally placed firmware.
const EXTERNAL_DOWNLOAD_SETTLE: Duration = Duration::from_millis(5);

/// What a state handler wants done next.
#[derive(Debug)]
enum Step {
    /// Transmit `command` and wait in `next` for its completion.
    Send {
        /// Command to transmit.
        command: Command,
        /// State that receives the completion.
        next: State,
    },
    /// Enter `State` now, without a round trip.
    Advance(State),
    /// The controller is up.
    Finish,
}

/// Bring-up engine for one controller.
///
/// Owns its [`Platform`]; at most one session runs at a time.
pub struct BringUp<P: Platform> {
    platform: P,
    session: Option<Session>,
    last_error: Option<Error>,
}

impl<P: Platform> BringUp<P> {
    /// Create an idle engine.
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            session: None,
            last_error: None,
        }
    }

    /// The platform collaborators.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Mutable access to the platform collaborators.
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Give back the platform.
    pub fn into_platform(self) -> P {
        self.platform
    }

    /// Whether a session is in progress.
    pub fn is_active(&self) -> bool {
        self.session
            .is_some()
    }

    /// The running session, if any.
    pub fn session(&self) -> Option<&Session> {
        self.session
            .as_ref()
    }

    /// Current state, if a session is running.
    pub fn state(&self) -> Option<State> {
        self.session
            .as_ref()
            .map(Session::state)
    }

    /// Error that ended the last failed session.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error
            .as_ref()
    }

    /// Take the error that ended the last failed session.
    pub fn take_last_error(&mut self) -> Option<Error> {
        self.last_error
            .take()
    }

    /// Begin a session.
    ///
    /// Returns [`Error::SessionActive`] without side effects if one is
    /// already running. Any other failure is reported through the result
    /// sink like every later failure, so `Ok(())` only means the session
    /// was accepted.
    pub fn start(&mut self, config: BringupConfig) -> Result<()> {
        if self.session.is_some() {
            warn!("Bring-up already in progress, not interrupting it");
            return Err(Error::SessionActive);
        }

        self.last_error = None;
        info!(
            "Starting bring-up of {} ({})",
            config.chip_name,
            config.family()
        );

        let external = !config.download_over_uart;
        self.session = Some(Session::new(config, State::CheckBootrom));

        let result = if external {
            self.begin_external()
        } else {
            self.begin_download()
        };
        if let Err(e) = result {
            self.abort(e);
        }
        Ok(())
    }

    /// Feed the completion of the outstanding command.
    pub fn on_command_complete(&mut self, event: &CompletionEvent) {
        let Some(session) = self.session.as_mut() else {
            warn!(
                "Completion for {:#06x} with no bring-up in progress, ignoring",
                event.opcode
            );
            return;
        };

        let state = session.state;
        let awaiting = session
            .awaiting
            .take();
        debug!(
            "{state}: completion for {:#06x}, status {:#04x}",
            event.opcode, event.status
        );

        let result = Self::check_completion(awaiting, event)
            .and_then(|()| self.handle(state, Some(event)))
            .and_then(|step| self.drive(step));
        if let Err(e) = result {
            self.abort(e);
        }
    }

    /// Report that the outstanding completion will never arrive.
    pub fn on_transport_error(&mut self, err: Error) {
        if self.session.is_none() {
            warn!("Transport error with no bring-up in progress: {err}");
            return;
        }
        self.abort(err);
    }

    fn check_completion(awaiting: Option<u16>, event: &CompletionEvent) -> Result<()> {
        match awaiting {
            None => {
                return Err(Error::Protocol(format!(
                    "completion for {:#06x} while no command is outstanding",
                    event.opcode
                )));
            }
            Some(expected) if expected != event.opcode => {
                return Err(Error::Protocol(format!(
                    "completion for {:#06x} while waiting for {expected:#06x}",
                    event.opcode
                )));
            }
            Some(_) => {}
        }
        if !event.is_success() {
            return Err(Error::CompletionStatus {
                opcode: event.opcode,
                status: event.status,
            });
        }
        Ok(())
    }

    fn begin_download(&mut self) -> Result<()> {
        self.platform
            .notify(LifecycleEvent::WakeForDownload)
            .map_err(|e| match e {
                Error::WakeFailed(_) => e,
                other => Error::WakeFailed(other.to_string()),
            })?;
        self.ensure_line_open()?;

        info!("Checking for resident firmware");
        self.drive(Step::Send {
            command: protocol::read_local_version(),
            next: State::CheckBootrom,
        })
    }

    fn begin_external(&mut self) -> Result<()> {
        self.ensure_line_open()?;
        self.platform
            .delay(EXTERNAL_DOWNLOAD_SETTLE);
        info!("Firmware was placed externally, skipping download");

        let config = &self
            .active_session()?
            .config;
        let raise = config.operational_baud != config.bootrom_baud || config.flow_control;
        let step = self.post_firmware(raise)?;
        self.drive(step)
    }

    fn ensure_line_open(&self) -> Result<()> {
        if self
            .platform
            .is_line_open()
        {
            Ok(())
        } else {
            Err(Error::TransportUnavailable("serial line is not open".into()))
        }
    }

    fn active_session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| Error::Protocol("no bring-up in progress".into()))
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::Protocol("no bring-up in progress".into()))
    }

    fn drive(&mut self, mut step: Step) -> Result<()> {
        loop {
            match step {
                Step::Send { command, next } => {
                    debug_assert!(next.awaits_completion(), "{next} cannot take a completion");
                    self.enter(next)?;
                    return self.send(command);
                }
                Step::Advance(next) => {
                    self.enter(next)?;
                    step = self.handle(next, None)?;
                }
                Step::Finish if self.wants_address_read()? => {
                    step = Step::Send {
                        command: protocol::read_bd_addr(),
                        next: State::ReadBdAddr,
                    };
                }
                Step::Finish => {
                    self.finish();
                    return Ok(());
                }
            }
        }
    }

    /// The controller address is read once, as the last command of a
    /// successful session.
    fn wants_address_read(&self) -> Result<bool> {
        let session = self.active_session()?;
        Ok(session
            .config
            .read_controller_address
            && session.state != State::ReadBdAddr)
    }

    fn enter(&mut self, state: State) -> Result<()> {
        debug!("Bring-up state -> {state}");
        self.session_mut()?
            .state = state;
        Ok(())
    }

    fn send(&mut self, command: Command) -> Result<()> {
        let opcode = command.opcode();
        let size = protocol::buffer_size(&command);

        let mut buffer = self
            .platform
            .allocate(size)
            .ok_or_else(|| {
                Error::TransportUnavailable(format!(
                    "no {size}-byte buffer for command {opcode:#06x}"
                ))
            })?;

        if let Err(e) = command.encode_into(&mut buffer) {
            self.platform
                .free(buffer);
            return Err(e);
        }

        if let Err(buffer) = self
            .platform
            .transmit(opcode, buffer)
        {
            self.platform
                .free(buffer);
            return Err(Error::TransportUnavailable(format!(
                "transport refused command {opcode:#06x}"
            )));
        }

        let session = self.session_mut()?;
        session.awaiting = Some(opcode);
        if session.state == State::DlFwPatch {
            let (transferred, total) = (session.transferred, session.image_size);
            self.platform
                .on_progress(transferred, total);
        }
        Ok(())
    }

    fn handle(&mut self, state: State, event: Option<&CompletionEvent>) -> Result<Step> {
        match state {
            State::CheckBootrom => {
                let version = return_param(event, VERSION_PARAM_INDEX, state)?;
                if version == FIRMWARE_HCI_VERSION {
                    info!("Firmware already running, skipping download");
                    self.platform
                        .delay(RESIDENT_FIRMWARE_SETTLE);
                    let config = &self
                        .active_session()?
                        .config;
                    let raise = config.operational_baud != config.bootrom_baud;
                    self.post_firmware(raise)
                } else {
                    info!("Boot ROM answered (HCI version {version}), resetting controller");
                    Ok(Step::Send {
                        command: protocol::reset(),
                        next: State::Start,
                    })
                }
            }

            State::Start => Ok(Step::Advance(State::CheckBtClkSrc)),

            State::CheckBtClkSrc => Ok(Step::Send {
                command: protocol::read_clock_source(),
                next: State::SetUartClock,
            }),

            State::SetUartClock => {
                let clock_source = return_param(event, CLOCK_SOURCE_PARAM_INDEX, state)?;
                let session = self.session_mut()?;
                let download = session
                    .config
                    .download_baud;
                let baud = if clock_source == CLOCK_SOURCE_PLL_LOCKED {
                    debug!("Clock source {clock_source}: PLL locked, controller UART runs doubled");
                    download / 2
                } else {
                    debug!("Clock source {clock_source}: no PLL");
                    download
                };
                session.controller_baud = Some(baud);
                let next = if session.second_baud_switch {
                    State::SetUartBaud2
                } else {
                    State::SetUartBaud1
                };
                info!("Setting controller UART to {download} baud");
                Ok(Step::Send {
                    command: protocol::update_baudrate(baud, false),
                    next,
                })
            }

            State::SetUartBaud1 => {
                let download = self
                    .active_session()?
                    .config
                    .download_baud;
                self.switch_host_baud(download, false)?;
                Ok(Step::Advance(State::ReadLocalName))
            }

            State::ReadLocalName => {
                let session = self.session_mut()?;
                let image = FirmwareImage::open(
                    &session
                        .config
                        .firmware_path,
                    session
                        .config
                        .load_address,
                )?;
                info!(
                    "Downloading {} ({} bytes) to {:#010x}",
                    image
                        .path()
                        .display(),
                    image.size(),
                    image.base()
                );
                session.image_size = image.size();
                session.transferred = 0;
                session.image = Some(image);
                Ok(Step::Advance(State::DlMinidriver))
            }

            State::DlMinidriver => {
                self.platform
                    .delay(DOWNLOAD_MODE_SETTLE);
                Ok(Step::Advance(State::DlFwPatch))
            }

            State::DlFwPatch => self.download_next(),

            State::SetUartBaud2 => {
                let download = self
                    .active_session()?
                    .config
                    .download_baud;
                self.switch_host_baud(download, false)?;
                Ok(Step::Advance(State::SetBdAddr))
            }

            State::SetBdAddr => {
                let address = self
                    .active_session()?
                    .config
                    .device_address;
                match (event, address) {
                    (Some(_), Some(address)) => {
                        info!("Device address set to {address}");
                        Ok(Step::Finish)
                    }
                    (None, Some(address)) => Ok(Step::Send {
                        command: protocol::write_bd_addr(address),
                        next: State::SetBdAddr,
                    }),
                    (_, None) => Ok(Step::Finish),
                }
            }

            State::ReadBdAddr => {
                let bytes: [u8; DeviceAddress::LEN] = event
                    .and_then(|e| {
                        e.params
                            .get(..DeviceAddress::LEN)
                    })
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| {
                        Error::Protocol(format!("{state}: address missing from completion"))
                    })?;
                let address = DeviceAddress::from_wire(bytes);
                if address.is_zero() {
                    info!("Controller has no OTP device address");
                } else {
                    info!("Controller OTP device address {address}");
                }
                Ok(Step::Finish)
            }

            State::SetBaudRate => {
                let session = self.session_mut()?;
                let flow_control = session
                    .config
                    .flow_control;
                let address = session
                    .config
                    .device_address;
                let plan = match session
                    .operational_plan
                    .take()
                {
                    Some(plan) => plan,
                    None => plan_rate(
                        &session
                            .config
                            .line,
                        session
                            .config
                            .operational_baud,
                    )?,
                };
                self.platform
                    .set_baud(&plan, flow_control)?;
                info!("Host and controller running at {plan}");

                Ok(match address {
                    Some(address) => Step::Send {
                        command: protocol::write_bd_addr(address),
                        next: State::SetBdAddr,
                    },
                    None => Step::Finish,
                })
            }
        }
    }

    fn download_next(&mut self) -> Result<Step> {
        let session = self.session_mut()?;
        let image = session
            .image
            .as_mut()
            .ok_or_else(|| Error::Protocol("firmware image is not open".into()))?;

        if let Some(chunk) = image.next_chunk()? {
            session.transferred = image.transferred();
            return Ok(Step::Send {
                command: protocol::write_memory(chunk),
                next: State::DlFwPatch,
            });
        }

        image.verify_complete()?;
        session.image = None;
        let total = session.transferred;
        let (bootrom, operational) = (
            session
                .config
                .bootrom_baud,
            session
                .config
                .operational_baud,
        );

        info!("Firmware downloaded ({total} bytes), restarting controller CPU");
        let packet = protocol::cpu_reset().to_h4_packet()?;
        self.platform
            .write_raw(&packet)?;
        self.platform
            .delay(CPU_RESET_SETTLE);
        self.switch_host_baud(bootrom, false)?;

        match self.post_firmware(operational != bootrom)? {
            Step::Finish => {
                let session = self.session_mut()?;
                session.second_baud_switch = true;
                let settle = session
                    .config
                    .effective_settlement_delay();
                debug!("Waiting {settle:?} for the firmware to settle");
                self.platform
                    .delay(settle);
                Ok(Step::Finish)
            }
            step => Ok(step),
        }
    }

    /// Next step once firmware runs: raise the rate, program the address,
    /// or finish.
    fn post_firmware(&mut self, raise: bool) -> Result<Step> {
        let session = self.session_mut()?;
        if raise {
            let plan = plan_rate(
                &session
                    .config
                    .line,
                session
                    .config
                    .operational_baud,
            )?;
            info!("Raising host and controller to {plan}");
            session.controller_baud = Some(plan.achieved);
            session.operational_plan = Some(plan);
            return Ok(Step::Send {
                command: protocol::update_baudrate(
                    plan.achieved,
                    session
                        .config
                        .flow_control,
                ),
                next: State::SetBaudRate,
            });
        }

        Ok(match session
            .config
            .device_address
        {
            Some(address) => Step::Send {
                command: protocol::write_bd_addr(address),
                next: State::SetBdAddr,
            },
            None => Step::Finish,
        })
    }

    fn switch_host_baud(&mut self, target: u32, flow_control: bool) -> Result<BaudPlan> {
        let line = self
            .active_session()?
            .config
            .line;
        let plan = plan_rate(&line, target)?;
        self.platform
            .set_baud(&plan, flow_control)?;
        debug!("Host UART set to {plan}");
        Ok(plan)
    }

    fn finish(&mut self) {
        if let Some(session) = self
            .session
            .take()
        {
            info!(
                "Bring-up of {} complete{}",
                session.chip_name(),
                session
                    .controller_baud
                    .map(|b| format!(" at {b} baud"))
                    .unwrap_or_default()
            );
        }
        self.conclude(Outcome::Success);
    }

    fn abort(&mut self, err: Error) {
        let Some(session) = self
            .session
            .take()
        else {
            return;
        };
        error!("Bring-up aborted in {}: {err}", session.state);
        drop(session);
        self.last_error = Some(err);
        self.conclude(Outcome::Fail);
    }

    fn conclude(&mut self, outcome: Outcome) {
        if let Err(e) = self
            .platform
            .notify(LifecycleEvent::AllowSleepAfterDownload)
        {
            warn!("Failed to allow chip sleep: {e}");
        }
        self.platform
            .on_result(outcome);
    }
}

fn return_param(event: Option<&CompletionEvent>, index: usize, state: State) -> Result<u8> {
    event
        .and_then(|e| e.param(index))
        .ok_or_else(|| Error::Protocol(format!("{state}: return parameter {index} missing")))
}

fn plan_rate(line: &LineCaps, target: u32) -> Result<BaudPlan> {
    let plan = line.plan(target)?;
    if plan.out_of_tolerance {
        warn!(
            "{target} baud approximated as {} ({:.1}% off)",
            plan.achieved,
            plan.deviation_percent()
        );
    }
    Ok(plan)
}
