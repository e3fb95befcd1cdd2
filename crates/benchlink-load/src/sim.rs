//! In-process stand-in for a programmable load.
//!
//! [`SimulatedLoad`] implements [`SerialChannel`], so it can be handed to a
//! [`TransactionEngine`](crate::TransactionEngine) in place of a serial port.
//! Frames written to it are executed against a small register model and the
//! reply is queued for reading. The input is modelled as a solar panel with
//! a configurable open-circuit voltage and short-circuit current.
//!
//! A cloned [`SimHandle`] stays usable after the simulator has been moved
//! into an engine. It scripts faults for upcoming exchanges and inspects the
//! frames the host sent.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use benchlink_frame::{encode_frame, Frame, Payload, FRAME_LEN, PAYLOAD_LEN};
use benchlink_transport::serial::DEFAULT_READ_TIMEOUT;
use benchlink_transport::{ArrivalProbe, SerialChannel, TransportError};
use bytes::{Buf, BufMut};

use crate::command::{byte_payload, flag_payload, u32_payload, Command, Direction, Mode};
use crate::status::StatusCode;

/// A scripted misbehaviour applied to the reply to one host frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Do not answer.
    Silence,
    /// Answer with a wrong trailing checksum.
    CorruptChecksum,
    /// Send these bytes ahead of the reply.
    LeadingGarbage(Vec<u8>),
    /// Answer with this status instead of executing the command.
    Status(StatusCode),
    /// Deliver the first `first` bytes now and the rest after `delay`.
    Split { first: usize, delay: Duration },
    /// Answer with a frame-length run of bytes containing no start marker.
    NoMarker,
    /// Answer with a well-formed reply carrying this command code.
    Echo(u8),
}

const NO_MARKER_FILL: u8 = 0x55;

/// Host frames kept for inspection. Older frames are dropped but still
/// counted by [`SimHandle::frames_received`].
pub const FRAME_HISTORY: usize = 256;

// Operation-state register bits.
const OP_REMOTE: u8 = 1 << 2;
const OP_INPUT_ON: u8 = 1 << 3;
const OP_REMOTE_SENSE: u8 = 1 << 5;

#[derive(Debug, Clone)]
struct Registers {
    remote: bool,
    load_on: bool,
    local_control: bool,
    remote_sense: bool,
    max_voltage: u32,
    max_current: u32,
    max_power: u32,
    mode: Mode,
    current: u32,
    voltage: u32,
    power: u32,
    resistance: u32,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            remote: false,
            load_on: false,
            local_control: true,
            remote_sense: false,
            max_voltage: 120_000,
            max_current: 300_000,
            max_power: 300_000,
            mode: Mode::ConstantCurrent,
            current: 0,
            voltage: 100,
            power: 0,
            resistance: 1_000,
        }
    }
}

/// Source attached to the load input.
#[derive(Debug, Clone, Copy)]
struct Panel {
    voc: f64,
    isc: f64,
}

impl Panel {
    const SHAPE: i32 = 8;

    fn current_at(&self, volts: f64) -> f64 {
        if volts >= self.voc {
            return 0.0;
        }
        let ratio = volts.max(0.0) / self.voc;
        self.isc * (1.0 - ratio.powi(Self::SHAPE))
    }

    fn voltage_at(&self, amps: f64) -> f64 {
        let ratio = (1.0 - amps / self.isc).clamp(0.0, 1.0);
        self.voc * ratio.powf(1.0 / f64::from(Self::SHAPE))
    }

    fn max_power_voltage(&self) -> f64 {
        let steps = 500;
        (0..=steps)
            .map(|n| self.voc * f64::from(n) / f64::from(steps))
            .fold((0.0, 0.0), |best, v| {
                let p = v * self.current_at(v);
                if p > best.1 {
                    (v, p)
                } else {
                    best
                }
            })
            .0
    }

    /// Operating point (volts, amps) for the load's regulation setting.
    fn operating_point(&self, regs: &Registers) -> (f64, f64) {
        if !regs.load_on || self.voc <= 0.0 || self.isc <= 0.0 {
            return (self.voc.max(0.0), 0.0);
        }
        match regs.mode {
            Mode::ConstantVoltage => {
                let v = (f64::from(regs.voltage) / 1_000.0).min(self.voc);
                (v, self.current_at(v))
            }
            Mode::ConstantCurrent => {
                let i = (f64::from(regs.current) / 10_000.0).min(self.isc);
                (self.voltage_at(i), i)
            }
            Mode::ConstantResistance => {
                let ohms = f64::from(regs.resistance) / 1_000.0;
                if ohms <= 0.0 {
                    return (0.0, self.isc);
                }
                let v = bisect(0.0, self.voc, |v| self.current_at(v) - v / ohms);
                (v, v / ohms)
            }
            Mode::ConstantPower => {
                let watts = f64::from(regs.power) / 1_000.0;
                let vmp = self.max_power_voltage();
                let v = if watts >= vmp * self.current_at(vmp) {
                    vmp
                } else {
                    bisect(vmp, self.voc, |v| v * self.current_at(v) - watts)
                };
                (v, self.current_at(v))
            }
        }
    }
}

/// Root of a function that is positive at `lo` and negative at `hi`.
fn bisect(mut lo: f64, mut hi: f64, f: impl Fn(f64) -> f64) -> f64 {
    for _ in 0..60 {
        let mid = (lo + hi) / 2.0;
        if f(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (lo + hi) / 2.0
}

fn to_wire(value: f64, factor: f64) -> u32 {
    (value.max(0.0) * factor).round().min(f64::from(u32::MAX)) as u32
}

#[derive(Debug)]
struct SimState {
    address: u8,
    open: bool,
    regs: Registers,
    panel: Panel,
    fault_bits: u16,
    from_host: Vec<u8>,
    inbound: VecDeque<u8>,
    pending: VecDeque<(Instant, Vec<u8>)>,
    faults: VecDeque<Fault>,
    frames: VecDeque<Frame>,
    frames_received: usize,
}

impl SimState {
    fn release_due(&mut self, now: Instant) {
        while let Some((at, _)) = self.pending.front() {
            if *at > now {
                break;
            }
            if let Some((_, chunk)) = self.pending.pop_front() {
                self.inbound.extend(chunk);
            }
        }
    }

    fn accept(&mut self, bytes: &[u8]) {
        self.from_host.extend_from_slice(bytes);
        while self.from_host.len() >= FRAME_LEN {
            let mut raw = [0u8; FRAME_LEN];
            raw.copy_from_slice(&self.from_host[..FRAME_LEN]);
            self.from_host.drain(..FRAME_LEN);
            self.handle_frame(Frame::from_bytes(raw));
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        self.record(frame);
        let fault = self.faults.pop_front();

        if frame.address() != self.address {
            tracing::trace!(address = frame.address(), "simulated load: not addressed to us");
            return;
        }

        let reply = if !frame.is_valid() {
            self.status(StatusCode::ChecksumIncorrect)
        } else if let Some(Fault::Status(code)) = &fault {
            self.status(*code)
        } else {
            self.execute(&frame)
        };

        self.deliver(reply, fault);
    }

    fn record(&mut self, frame: Frame) {
        self.frames_received = self.frames_received.saturating_add(1);
        if self.frames.len() == FRAME_HISTORY {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    fn deliver(&mut self, reply: Frame, fault: Option<Fault>) {
        let mut bytes = reply.as_bytes().to_vec();
        match fault {
            Some(Fault::Silence) => return,
            Some(Fault::CorruptChecksum) => {
                bytes[FRAME_LEN - 1] = bytes[FRAME_LEN - 1].wrapping_add(1);
            }
            Some(Fault::LeadingGarbage(mut garbage)) => {
                garbage.extend_from_slice(&bytes);
                bytes = garbage;
            }
            Some(Fault::NoMarker) => bytes = vec![NO_MARKER_FILL; FRAME_LEN],
            Some(Fault::Echo(code)) => {
                bytes = encode_frame(self.address, code, &reply.payload())
                    .as_bytes()
                    .to_vec();
            }
            Some(Fault::Split { first, delay }) => {
                let rest = bytes.split_off(first.min(bytes.len()));
                self.pending.push_back((Instant::now() + delay, rest));
            }
            Some(Fault::Status(_)) | None => {}
        }
        self.inbound.extend(bytes);
    }

    fn status(&self, code: StatusCode) -> Frame {
        encode_frame(
            self.address,
            Command::StatusReply.code(),
            &byte_payload(code.to_byte()),
        )
    }

    fn reply(&self, command: Command, payload: &Payload) -> Frame {
        encode_frame(self.address, command.code(), payload)
    }

    fn execute(&mut self, frame: &Frame) -> Frame {
        let Some(command) = Command::from_code(frame.command()) else {
            return self.status(StatusCode::UnrecognizedCommand);
        };
        let payload = frame.payload();
        let raw = (&payload[..]).get_u32_le();
        let flag = payload[0] != 0;
        let regs = &mut self.regs;

        let value = match command {
            Command::StatusReply => return self.status(StatusCode::UnrecognizedCommand),
            Command::RemoteOperation => {
                regs.remote = flag;
                None
            }
            Command::LoadOnOff => {
                regs.load_on = flag;
                None
            }
            Command::MaxVoltageSet => {
                regs.max_voltage = raw;
                None
            }
            Command::MaxCurrentSet => {
                regs.max_current = raw;
                None
            }
            Command::MaxPowerSet => {
                regs.max_power = raw;
                None
            }
            Command::ModeSet => match Mode::from_byte(payload[0]) {
                Some(mode) => {
                    regs.mode = mode;
                    None
                }
                None => return self.status(StatusCode::ParameterIncorrect),
            },
            Command::CurrentSet if raw > regs.max_current => {
                return self.status(StatusCode::ParameterIncorrect)
            }
            Command::CurrentSet => {
                regs.current = raw;
                None
            }
            Command::VoltageSet if raw > regs.max_voltage => {
                return self.status(StatusCode::ParameterIncorrect)
            }
            Command::VoltageSet => {
                regs.voltage = raw;
                None
            }
            Command::PowerSet if raw > regs.max_power => {
                return self.status(StatusCode::ParameterIncorrect)
            }
            Command::PowerSet => {
                regs.power = raw;
                None
            }
            Command::ResistanceSet => {
                regs.resistance = raw;
                None
            }
            Command::AddressSet => {
                self.address = payload[0];
                None
            }
            Command::LocalControlSet => {
                regs.local_control = flag;
                None
            }
            Command::RemoteSenseSet => {
                regs.remote_sense = flag;
                None
            }
            Command::MaxVoltageRead => Some(u32_payload(regs.max_voltage)),
            Command::MaxCurrentRead => Some(u32_payload(regs.max_current)),
            Command::MaxPowerRead => Some(u32_payload(regs.max_power)),
            Command::ModeRead => Some(byte_payload(regs.mode.to_byte())),
            Command::CurrentRead => Some(u32_payload(regs.current)),
            Command::VoltageRead => Some(u32_payload(regs.voltage)),
            Command::PowerRead => Some(u32_payload(regs.power)),
            Command::ResistanceRead => Some(u32_payload(regs.resistance)),
            Command::RemoteSenseRead => Some(flag_payload(regs.remote_sense)),
            Command::ValuesRead => Some(self.values()),
            Command::ProductInfo => Some(product_info()),
        };

        debug_assert_eq!(value.is_some(), command.direction() == Direction::Get);
        match value {
            Some(payload) => self.reply(command, &payload),
            None => self.status(StatusCode::CommandOk),
        }
    }

    fn values(&self) -> Payload {
        let regs = &self.regs;
        let (volts, amps) = self.panel.operating_point(regs);

        let mut op_state = 0u8;
        if regs.remote {
            op_state |= OP_REMOTE;
        }
        if regs.load_on {
            op_state |= OP_INPUT_ON;
        }
        if regs.remote_sense {
            op_state |= OP_REMOTE_SENSE;
        }

        let mut demand = self.fault_bits & 0x1F;
        if regs.load_on {
            demand |= 1 << (5 + u16::from(regs.mode.to_byte()));
        }

        let mut payload = [0u8; PAYLOAD_LEN];
        let mut dst = &mut payload[..];
        dst.put_u32_le(to_wire(volts, 1_000.0));
        dst.put_u32_le(to_wire(amps, 10_000.0));
        dst.put_u32_le(to_wire(volts * amps, 1_000.0));
        dst.put_u8(op_state);
        dst.put_u16_le(demand);
        payload
    }
}

fn product_info() -> Payload {
    let mut payload = [0u8; PAYLOAD_LEN];
    payload[..5].copy_from_slice(b"8500 ");
    payload[8] = 1;
    payload[9] = 23;
    payload[10..20].copy_from_slice(b"SIM0000001");
    payload
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn closed_io_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "simulated load closed")
}

/// Simulated programmable load reachable through [`SerialChannel`].
#[derive(Debug)]
pub struct SimulatedLoad {
    state: Arc<Mutex<SimState>>,
    read_timeout: Duration,
}

impl SimulatedLoad {
    /// A simulator answering at `address`, attached to a 21 V / 5 A panel.
    pub fn new(address: u8) -> Self {
        let state = SimState {
            address,
            open: true,
            regs: Registers::default(),
            panel: Panel { voc: 21.0, isc: 5.0 },
            fault_bits: 0,
            from_host: Vec::new(),
            inbound: VecDeque::new(),
            pending: VecDeque::new(),
            faults: VecDeque::new(),
            frames: VecDeque::with_capacity(FRAME_HISTORY),
            frames_received: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Override how long a read waits for a byte.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// A handle for scripting and inspecting this simulator.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Read for SimulatedLoad {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = Instant::now() + self.read_timeout;

        loop {
            let wait = {
                let mut state = lock(&self.state);
                if !state.open {
                    return Err(closed_io_error());
                }
                let now = Instant::now();
                state.release_due(now);

                if !state.inbound.is_empty() {
                    let n = buf.len().min(state.inbound.len());
                    for (dst, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
                        *dst = byte;
                    }
                    return Ok(n);
                }
                if now >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "simulated load read timed out",
                    ));
                }
                let next = state
                    .pending
                    .front()
                    .map_or(deadline, |(at, _)| *at)
                    .min(deadline);
                next.saturating_duration_since(now)
            };
            thread::sleep(wait.max(Duration::from_micros(100)));
        }
    }
}

impl Write for SimulatedLoad {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(closed_io_error());
        }
        state.accept(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if lock(&self.state).open {
            Ok(())
        } else {
            Err(closed_io_error())
        }
    }
}

impl SerialChannel for SimulatedLoad {
    fn bytes_available(&self) -> benchlink_transport::Result<usize> {
        available(&self.state)
    }

    fn discard_input(&mut self) -> benchlink_transport::Result<()> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(TransportError::Closed);
        }
        state.release_due(Instant::now());
        state.inbound.clear();
        Ok(())
    }

    fn discard_output(&mut self) -> benchlink_transport::Result<()> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(TransportError::Closed);
        }
        state.from_host.clear();
        Ok(())
    }

    fn arrival_probe(&self) -> benchlink_transport::Result<Box<dyn ArrivalProbe>> {
        Ok(Box::new(SimProbe {
            state: Arc::clone(&self.state),
        }))
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    fn close(&mut self) -> benchlink_transport::Result<()> {
        let mut state = lock(&self.state);
        state.open = false;
        state.from_host.clear();
        state.inbound.clear();
        state.pending.clear();
        Ok(())
    }

    fn reopen(&mut self) -> benchlink_transport::Result<()> {
        lock(&self.state).open = true;
        Ok(())
    }
}

fn available(state: &Mutex<SimState>) -> benchlink_transport::Result<usize> {
    let mut state = lock(state);
    if !state.open {
        return Err(TransportError::Closed);
    }
    state.release_due(Instant::now());
    Ok(state.inbound.len())
}

struct SimProbe {
    state: Arc<Mutex<SimState>>,
}

impl ArrivalProbe for SimProbe {
    fn bytes_available(&mut self) -> benchlink_transport::Result<usize> {
        available(&self.state)
    }
}

/// Scripting and inspection handle for a [`SimulatedLoad`].
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Apply `fault` to the reply to the next host frame. Faults queue up
    /// and are consumed one per frame.
    pub fn inject(&self, fault: Fault) {
        lock(&self.state).faults.push_back(fault);
    }

    /// Number of complete frames the host has written.
    pub fn frames_received(&self) -> usize {
        lock(&self.state).frames_received
    }

    pub fn last_frame(&self) -> Option<Frame> {
        lock(&self.state).frames.back().copied()
    }

    /// Commands among the last [`FRAME_HISTORY`] host frames, oldest first.
    /// Unknown codes are skipped.
    pub fn commands(&self) -> Vec<Command> {
        lock(&self.state)
            .frames
            .iter()
            .filter_map(|frame| Command::from_code(frame.command()))
            .collect()
    }

    /// Attach a panel with the given open-circuit voltage and short-circuit
    /// current.
    pub fn set_source(&self, voc: f64, isc: f64) {
        lock(&self.state).panel = Panel { voc, isc };
    }

    /// Raise fault conditions (the low five demand-state bits).
    pub fn set_demand_faults(&self, bits: u16) {
        lock(&self.state).fault_bits = bits & 0x1F;
    }

    /// Queue bytes the host did not ask for.
    pub fn push_unsolicited(&self, bytes: &[u8]) {
        lock(&self.state).inbound.extend(bytes.iter().copied());
    }

    pub fn is_remote(&self) -> bool {
        lock(&self.state).regs.remote
    }

    pub fn is_load_on(&self) -> bool {
        lock(&self.state).regs.load_on
    }

    pub fn mode(&self) -> Mode {
        lock(&self.state).regs.mode
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }
}

#[cfg(test)]
mod tests {
    use benchlink_frame::{decode_frame, FrameReader, FrameWriter};

    use super::*;

    fn exchange(sim: &mut SimulatedLoad, command: Command, payload: &Payload) -> Frame {
        FrameWriter::new(&mut *sim)
            .send(0x01, command.code(), payload)
            .unwrap();
        FrameReader::new(&mut *sim).read_frame().unwrap()
    }

    #[test]
    fn set_command_answers_status_ok() {
        let mut sim = SimulatedLoad::new(0x01);
        let reply = exchange(&mut sim, Command::LoadOnOff, &flag_payload(true));
        let decoded = decode_frame(&reply);

        assert!(decoded.checksum_ok);
        assert_eq!(decoded.command, 0x12);
        assert_eq!(decoded.payload[0], 0x80);
        assert!(sim.handle().is_load_on());
    }

    #[test]
    fn get_command_echoes_code_and_value() {
        let mut sim = SimulatedLoad::new(0x01);
        exchange(&mut sim, Command::MaxPowerSet, &u32_payload(150_000));
        let reply = exchange(&mut sim, Command::MaxPowerRead, &[0; PAYLOAD_LEN]);

        assert_eq!(reply.command(), Command::MaxPowerRead.code());
        assert_eq!(reply.payload()[..4], 150_000u32.to_le_bytes());
    }

    #[test]
    fn bad_host_checksum_gets_checksum_incorrect() {
        let mut sim = SimulatedLoad::new(0x01);
        let mut bytes = *encode_frame(0x01, 0x21, &[0; PAYLOAD_LEN]).as_bytes();
        bytes[FRAME_LEN - 1] ^= 0xFF;
        sim.write_all(&bytes).unwrap();

        let reply = FrameReader::new(&mut sim).read_frame().unwrap();
        assert_eq!(reply.payload()[0], StatusCode::ChecksumIncorrect.to_byte());
    }

    #[test]
    fn unknown_command_is_unrecognized() {
        let mut sim = SimulatedLoad::new(0x01);
        FrameWriter::new(&mut sim)
            .send(0x01, 0x99, &[0; PAYLOAD_LEN])
            .unwrap();
        let reply = FrameReader::new(&mut sim).read_frame().unwrap();
        assert_eq!(reply.payload()[0], StatusCode::UnrecognizedCommand.to_byte());
    }

    #[test]
    fn other_address_is_ignored() {
        let mut sim = SimulatedLoad::new(0x01).with_read_timeout(Duration::from_millis(10));
        FrameWriter::new(&mut sim)
            .send(0x02, 0x21, &[0; PAYLOAD_LEN])
            .unwrap();
        assert_eq!(sim.bytes_available().unwrap(), 0);
        assert!(FrameReader::new(&mut sim).read_frame().unwrap_err().is_timeout());
        assert_eq!(sim.handle().frames_received(), 1);
    }

    #[test]
    fn split_reply_arrives_in_two_parts() {
        let mut sim = SimulatedLoad::new(0x01);
        sim.handle().inject(Fault::Split {
            first: 10,
            delay: Duration::from_millis(20),
        });
        FrameWriter::new(&mut sim)
            .send(0x01, 0x21, &[0; PAYLOAD_LEN])
            .unwrap();

        assert_eq!(sim.bytes_available().unwrap(), 10);
        let reply = FrameReader::new(&mut sim).read_frame().unwrap();
        assert!(reply.is_valid());
    }

    #[test]
    fn mode_out_of_range_is_parameter_incorrect() {
        let mut sim = SimulatedLoad::new(0x01);
        let reply = exchange(&mut sim, Command::ModeSet, &byte_payload(7));
        assert_eq!(reply.payload()[0], StatusCode::ParameterIncorrect.to_byte());
    }

    #[test]
    fn values_follow_panel_in_cv_mode() {
        let mut sim = SimulatedLoad::new(0x01);
        let handle = sim.handle();
        handle.set_source(20.0, 4.0);

        let open = exchange(&mut sim, Command::ValuesRead, &[0; PAYLOAD_LEN]).payload();
        assert_eq!(open[..4], 20_000u32.to_le_bytes());
        assert_eq!(open[4..8], 0u32.to_le_bytes());

        exchange(&mut sim, Command::ModeSet, &byte_payload(Mode::ConstantVoltage.to_byte()));
        exchange(&mut sim, Command::VoltageSet, &u32_payload(10_000));
        exchange(&mut sim, Command::LoadOnOff, &flag_payload(true));
        let loaded = exchange(&mut sim, Command::ValuesRead, &[0; PAYLOAD_LEN]).payload();

        let mut src = &loaded[..];
        assert_eq!(src.get_u32_le(), 10_000);
        let current = src.get_u32_le();
        assert!(current > 39_000 && current <= 40_000, "current {current}");
        src.get_u32_le();
        assert_eq!(src.get_u8() & OP_INPUT_ON, OP_INPUT_ON);
        assert_eq!(src.get_u16_le(), 1 << 6);
    }

    #[test]
    fn echo_fault_rewrites_command_with_valid_checksum() {
        let mut sim = SimulatedLoad::new(0x01);
        sim.handle().inject(Fault::Echo(Command::ValuesRead.code()));
        let reply = exchange(&mut sim, Command::MaxPowerRead, &[0; PAYLOAD_LEN]);
        let decoded = decode_frame(&reply);

        assert!(decoded.checksum_ok);
        assert_eq!(decoded.command, Command::ValuesRead.code());
    }

    #[test]
    fn frame_history_is_bounded() {
        let mut sim = SimulatedLoad::new(0x01);
        let total = FRAME_HISTORY + 44;
        for n in 0..total {
            let frame = encode_frame(0x02, 0x21, &u32_payload(n as u32));
            sim.write_all(frame.as_bytes()).unwrap();
        }

        let handle = sim.handle();
        assert_eq!(handle.frames_received(), total);
        assert_eq!(lock(&handle.state).frames.len(), FRAME_HISTORY);
        assert_eq!(handle.commands().len(), FRAME_HISTORY);
        let last = handle.last_frame().unwrap();
        assert_eq!(last.payload()[..4], ((total - 1) as u32).to_le_bytes());
    }

    #[test]
    fn closed_simulator_refuses_io() {
        let mut sim = SimulatedLoad::new(0x01);
        sim.close().unwrap();
        sim.close().unwrap();
        assert!(!sim.is_open());
        assert!(sim.write(&[0xAA]).is_err());
        assert!(sim.bytes_available().is_err());

        sim.reopen().unwrap();
        assert!(sim.handle().is_open());
    }
}
