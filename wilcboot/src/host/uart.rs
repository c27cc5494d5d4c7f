//! HCI over a UART (H4 framing).
//!
//! [`UartHost`] implements [`Platform`] on top of any [`Port`]: commands go
//! out as `0x01 | opcode | len | params`, completions come back as
//! `0x04 | event code | len | body`. [`BringUp::run`] drives a whole session
//! synchronously on the calling thread.

use {
    super::{
        LifecycleEvent, LifecycleNotifier, Outcome, Platform, ResultSink, SerialControl,
        Transport,
    },
    crate::{
        error::{Error, Result},
        port::{
            FlowControl, Port,
            baud::{BaudPlan, BaudSetting},
        },
        protocol::{
            CommandBuffer, CompletionEvent, EventKind,
            hci::{H4_COMMAND, H4_EVENT},
        },
        target::{BringUp, BringupConfig},
    },
    log::{debug, trace, warn},
    std::{
        io::{ErrorKind, Read},
        time::{Duration, Instant},
    },
};

/// How long to wait for the completion of a command.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

type ProgressHook = Box<dyn FnMut(u64, u64) + Send>;
type LifecycleHook = Box<dyn FnMut(LifecycleEvent) -> Result<()> + Send>;

/// Bring-up platform speaking H4 over a serial port.
pub struct UartHost<P: Port> {
    port: P,
    pending: Option<u16>,
    response_timeout: Duration,
    outcome: Option<Outcome>,
    progress: Option<ProgressHook>,
    lifecycle: Option<LifecycleHook>,
}

impl<P: Port> UartHost<P> {
    /// Wrap an open port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            pending: None,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            outcome: None,
            progress: None,
            lifecycle: None,
        }
    }

    /// Set how long to wait for each completion.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Call `hook(transferred, total)` as firmware chunks go out.
    #[must_use]
    pub fn with_progress<F>(mut self, hook: F) -> Self
    where
        F: FnMut(u64, u64) + Send + 'static,
    {
        self.progress = Some(Box::new(hook));
        self
    }

    /// Route wake/sleep events to `hook` instead of just logging them.
    ///
    /// This is where a board would toggle the chip's power or wake GPIO.
    #[must_use]
    pub fn with_lifecycle<F>(mut self, hook: F) -> Self
    where
        F: FnMut(LifecycleEvent) -> Result<()> + Send + 'static,
    {
        self.lifecycle = Some(Box::new(hook));
        self
    }

    /// The underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Mutable access to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Give back the port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Rate the host side of the line currently runs at.
    pub fn line_rate(&self) -> u32 {
        self.port
            .baud_rate()
    }

    /// Opcode whose completion is still expected.
    pub fn pending(&self) -> Option<u16> {
        self.pending
    }

    /// Outcome reported by the last session.
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Block until the completion of the outstanding command arrives.
    ///
    /// Events that are not completions, completions for other opcodes and
    /// successful Command Status events are skipped. On timeout or a read
    /// error the command is no longer considered outstanding.
    pub fn wait_completion(&mut self) -> Result<CompletionEvent> {
        let Some(expected) = self.pending else {
            return Err(Error::Protocol("no command is outstanding".into()));
        };

        let result = self.read_completion(expected);
        self.pending = None;
        result
    }

    fn read_completion(&mut self, expected: u16) -> Result<CompletionEvent> {
        let deadline = Instant::now() + self.response_timeout;

        loop {
            let packet = self.read_event(expected, deadline)?;
            match CompletionEvent::parse(&packet)? {
                Some(event) if event.opcode != expected => {
                    debug!(
                        "Skipping completion for {:#06x} while waiting for {expected:#06x}",
                        event.opcode
                    );
                }
                Some(event) if event.kind == EventKind::CommandStatus && event.is_success() => {
                    trace!("Command {expected:#06x} accepted, waiting for completion");
                }
                Some(event) => {
                    trace!(
                        "Completion for {expected:#06x}: status {:#04x}, {} bytes",
                        event.status,
                        event
                            .params
                            .len()
                    );
                    return Ok(event);
                }
                None => trace!("Skipping event {:#04x}", packet[0]),
            }
        }
    }

    /// Read one H4 event packet, returned without its indicator byte.
    fn read_event(&mut self, expected: u16, deadline: Instant) -> Result<Vec<u8>> {
        let mut indicator = [0u8; 1];
        loop {
            self.read_exact_by(&mut indicator, expected, deadline)?;
            if indicator[0] == H4_EVENT {
                break;
            }
            trace!("Discarding byte {:#04x} before event", indicator[0]);
        }

        let mut header = [0u8; 2];
        self.read_exact_by(&mut header, expected, deadline)?;

        let mut packet = vec![0u8; 2 + usize::from(header[1])];
        packet[..2].copy_from_slice(&header);
        self.read_exact_by(&mut packet[2..], expected, deadline)?;
        Ok(packet)
    }

    fn read_exact_by(&mut self, buf: &mut [u8], expected: u16, deadline: Instant) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "no completion for {expected:#06x} within {} ms",
                    self.response_timeout
                        .as_millis()
                )));
            }
            match self
                .port
                .read(&mut buf[filled..])
            {
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => {},
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl<P: Port> Transport for UartHost<P> {
    fn allocate(&mut self, size: usize) -> Option<CommandBuffer> {
        self.port
            .is_open()
            .then(|| CommandBuffer::with_capacity(size))
    }

    fn free(&mut self, buffer: CommandBuffer) {
        trace!("Releasing unsent {}-byte command buffer", buffer.len());
    }

    fn transmit(
        &mut self,
        opcode: u16,
        buffer: CommandBuffer,
    ) -> std::result::Result<(), CommandBuffer> {
        if let Some(pending) = self.pending {
            warn!("Refusing {opcode:#06x}: completion for {pending:#06x} still pending");
            return Err(buffer);
        }

        let mut packet = Vec::with_capacity(1 + buffer.len());
        packet.push(H4_COMMAND);
        packet.extend_from_slice(buffer.as_bytes());

        if let Err(e) = self
            .port
            .write_all_bytes(&packet)
        {
            warn!("Failed to send {opcode:#06x}: {e}");
            return Err(buffer);
        }
        trace!("Sent {opcode:#06x} ({} bytes)", packet.len());
        self.pending = Some(opcode);
        Ok(())
    }
}

impl<P: Port> SerialControl for UartHost<P> {
    fn is_line_open(&self) -> bool {
        self.port
            .is_open()
    }

    fn set_baud(&mut self, plan: &BaudPlan, flow_control: bool) -> Result<()> {
        // The OS driver takes the rate itself and derives its own divisor
        let rate = match plan.setting {
            BaudSetting::Native { code } => code.rate(),
            BaudSetting::Custom { .. } => plan.achieved,
        };
        self.port
            .set_baud_rate(rate)?;
        self.port
            .set_flow_control(FlowControl::from(flow_control))?;
        debug!(
            "{} now at {rate} baud, flow control {}",
            self.port
                .name(),
            if flow_control { "on" } else { "off" }
        );
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.port
            .write_all_bytes(bytes)
    }

    fn open_line(&mut self) -> Result<()> {
        if self
            .port
            .is_open()
        {
            Ok(())
        } else {
            Err(Error::TransportUnavailable(format!(
                "{} was closed and cannot be reopened",
                self.port
                    .name()
            )))
        }
    }

    fn close_line(&mut self) -> Result<()> {
        self.pending = None;
        self.port
            .close()
    }
}

impl<P: Port> LifecycleNotifier for UartHost<P> {
    fn notify(&mut self, event: LifecycleEvent) -> Result<()> {
        match self.lifecycle.as_mut() {
            Some(hook) => hook(event),
            None => {
                debug!("Lifecycle: {event}");
                Ok(())
            }
        }
    }
}

impl<P: Port> ResultSink for UartHost<P> {
    fn on_result(&mut self, outcome: Outcome) {
        debug!("Bring-up result: {outcome}");
        self.outcome = Some(outcome);
    }

    fn on_progress(&mut self, transferred: u64, total: u64) {
        if let Some(hook) = self.progress.as_mut() {
            hook(transferred, total);
        }
    }
}

impl<P: Port> Platform for UartHost<P> {}

impl<P: Port> BringUp<UartHost<P>> {
    /// Run one complete session on the calling thread.
    ///
    /// Returns once the session has reported its outcome; a failure comes
    /// back as the error that aborted it.
    pub fn run(&mut self, config: BringupConfig) -> Result<()> {
        self.platform_mut()
            .outcome = None;
        self.start(config)?;

        while self.is_active() {
            match self
                .platform_mut()
                .wait_completion()
            {
                Ok(event) => self.on_command_complete(&event),
                Err(e) => self.on_transport_error(e),
            }
        }

        match self
            .platform()
            .outcome()
        {
            Some(Outcome::Success) => Ok(()),
            _ => Err(self
                .take_last_error()
                .unwrap_or_else(|| Error::Protocol("bring-up ended without a result".into()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            port::baud::{LineCaps, UartRate},
            protocol::{Command, hci::opcode},
            target::wilc3000::protocol::{UPDATE_BAUDRATE, WRITE_MEM},
        },
        std::{
            collections::VecDeque,
            io::Write,
            sync::{Arc, Mutex},
        },
    };

    /// Serial port double with independent read and write sides.
    struct MockPort {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
        baud: u32,
        flow: FlowControl,
        open: bool,
        timeout: Duration,
    }

    impl MockPort {
        fn new() -> Self {
            Self {
                rx: VecDeque::new(),
                tx: Vec::new(),
                baud: 115_200,
                flow: FlowControl::None,
                open: true,
                timeout: Duration::from_millis(10),
            }
        }

        fn queue(&mut self, bytes: &[u8]) {
            self.rx
                .extend(bytes);
        }

        fn queue_complete(&mut self, opcode: u16, status: u8, params: &[u8]) {
            let [lo, hi] = opcode.to_le_bytes();
            let len = u8::try_from(4 + params.len()).unwrap();
            self.queue(&[H4_EVENT, 0x0E, len, 0x01, lo, hi, status]);
            self.queue(params);
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.rx.is_empty() {
                return Err(std::io::Error::new(ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(self.rx.len());
            for b in buf.iter_mut().take(n) {
                *b = self.rx.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.open {
                return Err(std::io::Error::new(ErrorKind::NotConnected, "closed"));
            }
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for MockPort {
        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeout = timeout;
            Ok(())
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
            self.baud = baud_rate;
            Ok(())
        }

        fn baud_rate(&self) -> u32 {
            self.baud
        }

        fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<()> {
            self.flow = flow_control;
            Ok(())
        }

        fn clear_buffers(&mut self) -> Result<()> {
            self.rx.clear();
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }
    }

    fn host() -> UartHost<MockPort> {
        UartHost::new(MockPort::new()).with_response_timeout(Duration::from_millis(50))
    }

    fn encoded(command: &Command) -> CommandBuffer {
        let mut buffer = CommandBuffer::with_capacity(258);
        command.encode_into(&mut buffer).unwrap();
        buffer
    }

    const FIRMWARE_VERSION: [u8; 8] = [0x06, 0x00, 0x00, 0x06, 0x0D, 0x00, 0x00, 0x00];

    #[test]
    fn test_transmit_adds_h4_indicator() {
        let mut host = host();
        let cmd = Command::new(opcode::RESET);
        host.transmit(opcode::RESET, encoded(&cmd)).unwrap();
        assert_eq!(host.port().tx, vec![0x01, 0x03, 0x0C, 0x00]);
        assert_eq!(host.pending(), Some(opcode::RESET));
    }

    #[test]
    fn test_transmit_refused_while_pending() {
        let mut host = host();
        let cmd = Command::new(opcode::RESET);
        host.transmit(opcode::RESET, encoded(&cmd)).unwrap();

        let second = Command::new(opcode::READ_BD_ADDR);
        let buffer = host.transmit(opcode::READ_BD_ADDR, encoded(&second)).unwrap_err();
        assert_eq!(buffer.as_bytes(), &[0x09, 0x10, 0x00]);
        assert_eq!(host.port().tx.len(), 4);
    }

    #[test]
    fn test_transmit_refused_when_write_fails() {
        let mut host = host();
        host.port_mut().open = false;
        let cmd = Command::new(opcode::RESET);
        assert!(host.transmit(opcode::RESET, encoded(&cmd)).is_err());
        assert_eq!(host.pending(), None);
        assert!(host.allocate(258).is_none());
    }

    #[test]
    fn test_wait_completion_skips_noise() {
        let mut host = host();
        host.transmit(opcode::RESET, encoded(&Command::new(opcode::RESET))).unwrap();

        let port = host.port_mut();
        // line noise, a vendor event, a stale completion, a command status
        port.queue(&[0x00, 0xFF]);
        port.queue(&[H4_EVENT, 0xFF, 0x02, 0xAA, 0xBB]);
        port.queue_complete(opcode::READ_BD_ADDR, 0, &[]);
        port.queue(&[H4_EVENT, 0x0F, 0x04, 0x00, 0x01, 0x03, 0x0C]);
        port.queue_complete(opcode::RESET, 0, &[0x42]);

        let event = host.wait_completion().unwrap();
        assert_eq!(event.opcode, opcode::RESET);
        assert_eq!(event.kind, EventKind::CommandComplete);
        assert_eq!(event.params, vec![0x42]);
        assert_eq!(host.pending(), None);
    }

    #[test]
    fn test_wait_completion_failed_command_status() {
        let mut host = host();
        host.transmit(opcode::RESET, encoded(&Command::new(opcode::RESET))).unwrap();
        host.port_mut().queue(&[H4_EVENT, 0x0F, 0x04, 0x0C, 0x01, 0x03, 0x0C]);

        let event = host.wait_completion().unwrap();
        assert_eq!(event.kind, EventKind::CommandStatus);
        assert_eq!(event.status, 0x0C);
    }

    #[test]
    fn test_wait_completion_times_out() {
        let mut host = host();
        host.transmit(opcode::RESET, encoded(&Command::new(opcode::RESET))).unwrap();
        // Header arrives, body never does
        host.port_mut().queue(&[H4_EVENT, 0x0E, 0x04, 0x01]);

        assert!(matches!(host.wait_completion(), Err(Error::Timeout(_))));
        assert_eq!(host.pending(), None);
    }

    #[test]
    fn test_wait_completion_without_command() {
        let mut host = host();
        assert!(matches!(host.wait_completion(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_set_baud_native_and_custom() {
        let mut host = host();
        let caps = LineCaps::default();

        host.set_baud(&caps.plan(921_600).unwrap(), false).unwrap();
        assert_eq!(host.port().baud, UartRate::B921600.rate());
        assert_eq!(host.port().flow, FlowControl::None);

        host.set_baud(&caps.plan(3_000_000).unwrap(), true).unwrap();
        assert_eq!(host.port().baud, 2_750_000);
        assert_eq!(host.port().flow, FlowControl::Hardware);
    }

    #[test]
    fn test_open_and_close_line() {
        let mut host = host();
        assert!(host.open_line().is_ok());
        host.close_line().unwrap();
        assert!(!host.is_line_open());
        assert!(matches!(
            host.open_line(),
            Err(Error::TransportUnavailable(_))
        ));
    }

    #[test]
    fn test_run_resident_firmware() {
        let mut port = MockPort::new();
        port.queue_complete(opcode::READ_LOCAL_VERSION, 0, &FIRMWARE_VERSION);
        port.queue_complete(UPDATE_BAUDRATE, 0, &[]);

        let mut engine = BringUp::new(
            UartHost::new(port).with_response_timeout(Duration::from_millis(50)),
        );
        engine.run(BringupConfig::new("unused.bin")).unwrap();

        let host = engine.platform();
        assert_eq!(host.outcome(), Some(Outcome::Success));
        assert_eq!(host.port().baud, 921_600);
        assert!(host.port().tx.starts_with(&[0x01, 0x01, 0x10, 0x00]));
        assert!(host.port().rx.is_empty());
    }

    #[test]
    fn test_run_custom_rate_reports_achieved_line_rate() {
        let mut port = MockPort::new();
        port.queue_complete(opcode::READ_LOCAL_VERSION, 0, &FIRMWARE_VERSION);
        port.queue_complete(UPDATE_BAUDRATE, 0, &[]);

        let mut engine = BringUp::new(
            UartHost::new(port).with_response_timeout(Duration::from_millis(50)),
        );
        engine
            .run(BringupConfig::new("unused.bin").with_operational_baud(3_000_000))
            .unwrap();

        // 5.5 MHz / 2, the controller is told the same rate
        assert_eq!(engine.platform().line_rate(), 2_750_000);
        let tx = &engine.platform().port().tx;
        let rate = 2_750_000u32.to_le_bytes();
        assert!(tx.windows(rate.len()).any(|w| w == rate));
    }

    #[test]
    fn test_run_reads_controller_address() {
        let mut port = MockPort::new();
        port.queue_complete(opcode::READ_LOCAL_VERSION, 0, &FIRMWARE_VERSION);
        port.queue_complete(opcode::READ_BD_ADDR, 0, &[0xEF, 0xCD, 0xAB, 0x05, 0xF0, 0xF8]);

        let mut engine = BringUp::new(
            UartHost::new(port).with_response_timeout(Duration::from_millis(50)),
        );
        engine
            .run(
                BringupConfig::new("unused.bin")
                    .with_operational_baud(115_200)
                    .with_read_controller_address(true),
            )
            .unwrap();

        let host = engine.platform();
        assert_eq!(host.outcome(), Some(Outcome::Success));
        assert!(host.port().tx.ends_with(&[0x01, 0x09, 0x10, 0x00]));
        assert!(host.port().rx.is_empty());
    }

    #[test]
    fn test_run_downloads_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        std::fs::write(&path, [0xA5u8; 10]).unwrap();

        let mut port = MockPort::new();
        port.queue_complete(opcode::READ_LOCAL_VERSION, 0, &[0x04, 0, 0, 0x04, 0, 0, 0, 0]);
        port.queue_complete(opcode::RESET, 0, &[]);
        port.queue_complete(0xFC01, 0, &[0x00, 0x02, 0x00, 0x00]);
        port.queue_complete(UPDATE_BAUDRATE, 0, &[]);
        port.queue_complete(WRITE_MEM, 0, &[]);
        port.queue_complete(UPDATE_BAUDRATE, 0, &[]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&events);

        let host = UartHost::new(port)
            .with_response_timeout(Duration::from_millis(50))
            .with_progress(move |done, total| sink.lock().unwrap().push((done, total)))
            .with_lifecycle(move |event| {
                recorder.lock().unwrap().push(event);
                Ok(())
            });
        let mut engine = BringUp::new(host);
        engine.run(BringupConfig::new(&path)).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(10, 10)]);
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                LifecycleEvent::WakeForDownload,
                LifecycleEvent::AllowSleepAfterDownload
            ]
        );

        let tx = &engine.platform().port().tx;
        let reset = [0x01, 0x55, 0xFC, 0x00];
        assert!(tx.windows(reset.len()).any(|w| w == reset));
        assert_eq!(engine.platform().port().baud, 921_600);
    }

    #[test]
    fn test_run_reports_failing_status() {
        let mut port = MockPort::new();
        port.queue_complete(opcode::READ_LOCAL_VERSION, 0x01, &[]);

        let mut engine = BringUp::new(
            UartHost::new(port).with_response_timeout(Duration::from_millis(50)),
        );
        let err = engine.run(BringupConfig::new("unused.bin")).unwrap_err();
        assert!(matches!(
            err,
            Error::CompletionStatus {
                opcode: opcode::READ_LOCAL_VERSION,
                status: 0x01
            }
        ));
        assert_eq!(engine.platform().outcome(), Some(Outcome::Fail));
    }

    #[test]
    fn test_run_times_out_on_silent_controller() {
        let mut engine = BringUp::new(host());
        let err = engine.run(BringupConfig::new("unused.bin")).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(!engine.is_active());
    }

    #[test]
    fn test_run_on_closed_port() {
        let mut engine = BringUp::new(host());
        engine.platform_mut().close_line().unwrap();
        let err = engine.run(BringupConfig::new("unused.bin")).unwrap_err();
        assert!(matches!(err, Error::TransportUnavailable(_)));
    }

    #[test]
    fn test_run_wake_failure() {
        let host = host().with_lifecycle(|event| match event {
            LifecycleEvent::WakeForDownload => Err(Error::WakeFailed("gpio busy".into())),
            LifecycleEvent::AllowSleepAfterDownload => Ok(()),
        });
        let mut engine = BringUp::new(host);
        let err = engine.run(BringupConfig::new("unused.bin")).unwrap_err();
        assert!(matches!(err, Error::WakeFailed(_)));
        assert!(engine.platform().port().tx.is_empty());
    }
}
