use std::sync::Arc;
use std::thread;
use std::time::Duration;

use benchlink_frame::{
    decode_frame, encode_frame, Frame, FrameError, FrameReader, FrameWriter, Payload, FRAME_LEN,
};
use benchlink_transport::{SerialChannel, TransportError};

use crate::command::Command;
use crate::error::{LoadError, Result, RetryCause};
use crate::signal::{ArrivalObserver, ArrivalSignal};
use crate::stats::TransactionStats;
use crate::status::StatusCode;

/// Timing and retry policy for the transaction engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long one attempt waits for a full reply frame.
    pub reply_timeout: Duration,
    /// Additional attempts allowed after the first one fails.
    pub retry_budget: u32,
    /// Pause before retrying an attempt that timed out.
    pub retry_delay: Duration,
    /// How often the arrival observer polls the channel.
    pub poll_interval: Duration,
    /// Name used in error messages.
    pub device_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(2),
            retry_budget: 3,
            retry_delay: Duration::from_millis(100),
            poll_interval: Duration::from_millis(2),
            device_name: "programmable load".to_string(),
        }
    }
}

enum Outcome {
    Verified(Payload),
    Retry(RetryCause),
}

/// Runs request/reply exchanges with one load over an owned channel.
///
/// Only one request is ever outstanding: [`send`](Self::send) takes
/// `&mut self` and returns only once the exchange has succeeded or failed.
pub struct TransactionEngine<C: SerialChannel> {
    channel: C,
    address: u8,
    config: EngineConfig,
    stats: Arc<TransactionStats>,
    signal: Arc<ArrivalSignal>,
    observer: Option<ArrivalObserver>,
}

impl<C: SerialChannel> TransactionEngine<C> {
    /// Take ownership of `channel` and start the arrival observer.
    pub fn new(channel: C, address: u8, config: EngineConfig) -> Result<Self> {
        let stats = Arc::new(TransactionStats::default());
        let signal = Arc::new(ArrivalSignal::new(FRAME_LEN, Arc::clone(&stats)));
        let probe = channel.arrival_probe()?;
        let observer = ArrivalObserver::spawn(probe, Arc::clone(&signal), config.poll_interval)
            .map_err(TransportError::Io)?;

        Ok(Self {
            channel,
            address,
            config,
            stats,
            signal,
            observer: Some(observer),
        })
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> &TransactionStats {
        &self.stats
    }

    /// Borrow the underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Send `command` and return the 20-byte reply payload.
    ///
    /// Timeouts, corrupted or unaligned replies, replies echoing another
    /// command, and device-reported checksum errors are retried up to `retry_budget` times. A device
    /// status other than OK or checksum-incorrect fails immediately.
    pub fn send(&mut self, command: Command, payload: &Payload) -> Result<Payload> {
        let frame = encode_frame(self.address, command.code(), payload);
        let mut retries = 0u32;

        loop {
            match self.attempt(command, &frame)? {
                Outcome::Verified(reply) => return Ok(reply),
                Outcome::Retry(cause) => {
                    if retries >= self.config.retry_budget {
                        tracing::error!(
                            %command,
                            attempts = retries + 1,
                            last = %cause,
                            "retry budget exhausted"
                        );
                        return Err(LoadError::RetryBudgetExhausted {
                            device: self.config.device_name.clone(),
                            attempts: retries + 1,
                            last: cause,
                        });
                    }

                    retries += 1;
                    self.stats.record_retry();
                    tracing::warn!(%command, retry = retries, cause = %cause, "retrying transaction");

                    if cause == RetryCause::TimedOut && !self.config.retry_delay.is_zero() {
                        thread::sleep(self.config.retry_delay);
                    }
                }
            }
        }
    }

    fn attempt(&mut self, command: Command, frame: &Frame) -> Result<Outcome> {
        if !self.channel.is_open() {
            return Err(TransportError::Closed.into());
        }

        self.channel.discard_input()?;
        self.signal.reset();
        FrameWriter::new(&mut self.channel).write_frame(frame)?;
        self.stats.record_sent();
        tracing::debug!(%command, address = self.address, "frame sent");

        if !self.signal.wait(self.config.reply_timeout) {
            tracing::debug!(%command, timeout = ?self.config.reply_timeout, "no reply");
            return Ok(Outcome::Retry(RetryCause::TimedOut));
        }
        self.stats.record_reply();

        let reply = match FrameReader::new(&mut self.channel).read_frame() {
            Ok(reply) => reply,
            Err(FrameError::MarkerNotFound { .. }) => {
                self.stats.record_framing_failure();
                return Ok(Outcome::Retry(RetryCause::FramingFailed));
            }
            Err(err) if err.is_timeout() => {
                tracing::debug!(%command, "reply stalled mid-frame");
                return Ok(Outcome::Retry(RetryCause::TimedOut));
            }
            Err(err) => return Err(err.into()),
        };

        let decoded = decode_frame(&reply);
        if !decoded.checksum_ok {
            self.stats.record_checksum_failure();
            tracing::debug!(%command, reply = ?reply, "reply checksum mismatch");
            return Ok(Outcome::Retry(RetryCause::ChecksumFailed));
        }

        if decoded.command == Command::StatusReply.code() {
            match StatusCode::from_byte(decoded.payload[0]) {
                StatusCode::CommandOk => {}
                StatusCode::ChecksumIncorrect => {
                    return Ok(Outcome::Retry(RetryCause::DeviceChecksum));
                }
                status => {
                    tracing::warn!(%command, %status, "command rejected by device");
                    return Err(LoadError::DeviceRejected { command, status });
                }
            }
        } else if decoded.command != command.code() {
            tracing::debug!(
                %command,
                echoed = decoded.command,
                "reply echoes a different command"
            );
            return Ok(Outcome::Retry(RetryCause::UnexpectedEcho));
        }

        Ok(Outcome::Verified(decoded.payload))
    }

    /// Stop the observer and close the channel. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut observer) = self.observer.take() {
            observer.stop();
        }
        self.channel.close()?;
        Ok(())
    }
}

impl<C: SerialChannel> Drop for TransactionEngine<C> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::debug!(error = %err, "close on drop failed");
        }
    }
}

impl<C: SerialChannel> std::fmt::Debug for TransactionEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEngine")
            .field("address", &self.address)
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .field("open", &self.channel.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use benchlink_frame::{CHECKSUM_OFFSET, PAYLOAD_LEN, START_MARKER};

    use super::*;
    use crate::command::u32_payload;
    use crate::sim::{Fault, SimulatedLoad};

    fn fast_config() -> EngineConfig {
        EngineConfig {
            reply_timeout: Duration::from_millis(60),
            retry_budget: 3,
            retry_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
            ..EngineConfig::default()
        }
    }

    fn engine() -> (TransactionEngine<SimulatedLoad>, crate::sim::SimHandle) {
        let sim = SimulatedLoad::new(0x01);
        let handle = sim.handle();
        let engine = TransactionEngine::new(sim, 0x01, fast_config()).unwrap();
        (engine, handle)
    }

    #[test]
    fn set_command_is_acknowledged() {
        let (mut engine, handle) = engine();
        let reply = engine
            .send(Command::MaxVoltageSet, &u32_payload(12_345))
            .unwrap();

        assert_eq!(reply[0], StatusCode::CommandOk.to_byte());
        assert_eq!(handle.frames_received(), 1);
        assert_eq!(handle.last_frame().unwrap().payload()[..4], 12_345u32.to_le_bytes());
        assert_eq!(engine.stats().messages_sent(), 1);
        assert_eq!(engine.stats().received_replies(), 1);
        assert_eq!(engine.stats().retries(), 0);
    }

    #[test]
    fn written_frame_matches_wire_format() {
        let (mut engine, handle) = engine();
        engine
            .send(Command::MaxVoltageSet, &u32_payload(12_345))
            .unwrap();

        let frame = handle.last_frame().unwrap();
        let bytes = frame.as_bytes();
        assert_eq!(bytes[0], START_MARKER);
        assert_eq!(bytes[1], 0x01);
        assert_eq!(bytes[2], 0x22);
        assert_eq!(&bytes[3..7], &[0x39, 0x30, 0x00, 0x00]);
        assert!(bytes[7..CHECKSUM_OFFSET].iter().all(|b| *b == 0));
        assert!(frame.is_valid());
    }

    #[test]
    fn get_command_returns_device_payload() {
        let (mut engine, _) = engine();
        engine
            .send(Command::MaxVoltageSet, &u32_payload(30_000))
            .unwrap();
        let reply = engine
            .send(Command::MaxVoltageRead, &[0u8; PAYLOAD_LEN])
            .unwrap();
        assert_eq!(reply[..4], 30_000u32.to_le_bytes());
    }

    #[test]
    fn checksum_failure_is_retried() {
        let (mut engine, handle) = engine();
        handle.inject(Fault::CorruptChecksum);

        engine
            .send(Command::RemoteOperation, &[1u8; PAYLOAD_LEN])
            .unwrap();
        assert_eq!(handle.frames_received(), 2);
        assert_eq!(engine.stats().checksum_failures(), 1);
        assert_eq!(engine.stats().retries(), 1);
    }

    #[test]
    fn timeout_is_retried() {
        let (mut engine, handle) = engine();
        handle.inject(Fault::Silence);

        engine.send(Command::LoadOnOff, &[0u8; PAYLOAD_LEN]).unwrap();
        assert_eq!(handle.frames_received(), 2);
        assert_eq!(engine.stats().retries(), 1);
        assert_eq!(engine.stats().expected_replies(), 2);
        assert_eq!(engine.stats().received_replies(), 1);
    }

    #[test]
    fn leading_garbage_is_realigned_without_retry() {
        let (mut engine, handle) = engine();
        handle.inject(Fault::LeadingGarbage(vec![0x01, 0x02, 0x03, 0x04, 0x05]));

        engine.send(Command::LoadOnOff, &[0u8; PAYLOAD_LEN]).unwrap();
        assert_eq!(handle.frames_received(), 1);
        assert_eq!(engine.stats().retries(), 0);
    }

    #[test]
    fn missing_marker_is_a_framing_failure_and_retried() {
        let (mut engine, handle) = engine();
        handle.inject(Fault::NoMarker);

        engine.send(Command::LoadOnOff, &[0u8; PAYLOAD_LEN]).unwrap();
        assert_eq!(engine.stats().framing_failures(), 1);
        assert_eq!(engine.stats().retries(), 1);
        assert_eq!(handle.frames_received(), 2);
    }

    #[test]
    fn device_checksum_report_is_retried() {
        let (mut engine, handle) = engine();
        handle.inject(Fault::Status(StatusCode::ChecksumIncorrect));

        engine.send(Command::LoadOnOff, &[0u8; PAYLOAD_LEN]).unwrap();
        assert_eq!(handle.frames_received(), 2);
        assert_eq!(engine.stats().retries(), 1);
    }

    #[test]
    fn parameter_incorrect_fails_without_retry() {
        let (mut engine, handle) = engine();
        handle.inject(Fault::Status(StatusCode::ParameterIncorrect));

        let err = engine
            .send(Command::MaxVoltageSet, &u32_payload(1))
            .unwrap_err();
        assert!(matches!(
            err,
            LoadError::DeviceRejected {
                command: Command::MaxVoltageSet,
                status: StatusCode::ParameterIncorrect,
            }
        ));
        assert!(err.to_string().contains("parameter incorrect"));
        assert_eq!(handle.frames_received(), 1);
        assert_eq!(engine.stats().retries(), 0);
    }

    #[test]
    fn unknown_status_is_rejected() {
        let (mut engine, handle) = engine();
        handle.inject(Fault::Status(StatusCode::Unknown(0x42)));

        let err = engine.send(Command::LoadOnOff, &[0u8; PAYLOAD_LEN]).unwrap_err();
        assert!(matches!(
            err,
            LoadError::DeviceRejected {
                status: StatusCode::Unknown(0x42),
                ..
            }
        ));
    }

    #[test]
    fn retry_budget_bounds_attempts() {
        let (mut engine, handle) = engine();
        for _ in 0..10 {
            handle.inject(Fault::CorruptChecksum);
        }

        let err = engine.send(Command::LoadOnOff, &[0u8; PAYLOAD_LEN]).unwrap_err();
        match &err {
            LoadError::RetryBudgetExhausted {
                device,
                attempts,
                last,
            } => {
                assert_eq!(device, "programmable load");
                assert_eq!(*attempts, 4);
                assert_eq!(*last, RetryCause::ChecksumFailed);
            }
            other => panic!("expected exhausted budget, got {other:?}"),
        }
        assert!(err.to_string().contains("check all connections"));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(handle.frames_received(), 4);
        assert_eq!(engine.stats().retries(), 3);
        assert_eq!(engine.stats().checksum_failures(), 4);
    }

    #[test]
    fn timeouts_and_checksum_failures_share_one_budget() {
        let (mut engine, handle) = engine();
        handle.inject(Fault::Silence);
        handle.inject(Fault::CorruptChecksum);
        handle.inject(Fault::Silence);
        handle.inject(Fault::CorruptChecksum);

        let err = engine.send(Command::LoadOnOff, &[0u8; PAYLOAD_LEN]).unwrap_err();
        assert!(matches!(
            err,
            LoadError::RetryBudgetExhausted {
                attempts: 4,
                last: RetryCause::ChecksumFailed,
                ..
            }
        ));
        assert_eq!(handle.frames_received(), 4);
    }

    #[test]
    fn zero_budget_fails_after_first_attempt() {
        let sim = SimulatedLoad::new(0x01);
        let handle = sim.handle();
        let config = EngineConfig {
            retry_budget: 0,
            ..fast_config()
        };
        let mut engine = TransactionEngine::new(sim, 0x01, config).unwrap();
        handle.inject(Fault::Silence);

        let err = engine.send(Command::LoadOnOff, &[0u8; PAYLOAD_LEN]).unwrap_err();
        assert!(matches!(
            err,
            LoadError::RetryBudgetExhausted {
                attempts: 1,
                last: RetryCause::TimedOut,
                ..
            }
        ));
        assert_eq!(handle.frames_received(), 1);
    }

    #[test]
    fn reply_for_another_command_is_retried() {
        let (mut engine, handle) = engine();
        engine
            .send(Command::MaxVoltageSet, &u32_payload(30_000))
            .unwrap();
        handle.inject(Fault::Echo(Command::ValuesRead.code()));

        let reply = engine
            .send(Command::MaxVoltageRead, &[0u8; PAYLOAD_LEN])
            .unwrap();
        assert_eq!(reply[..4], 30_000u32.to_le_bytes());
        assert_eq!(handle.frames_received(), 3);
        assert_eq!(engine.stats().retries(), 1);
    }

    #[test]
    fn persistent_wrong_echo_exhausts_budget() {
        let (mut engine, handle) = engine();
        for _ in 0..4 {
            handle.inject(Fault::Echo(Command::ValuesRead.code()));
        }

        let err = engine
            .send(Command::MaxVoltageRead, &[0u8; PAYLOAD_LEN])
            .unwrap_err();
        assert!(matches!(
            err,
            LoadError::RetryBudgetExhausted {
                last: RetryCause::UnexpectedEcho,
                ..
            }
        ));
        assert_eq!(handle.frames_received(), 4);
    }

    #[test]
    fn partial_arrival_is_counted_as_spurious() {
        let (mut engine, handle) = engine();
        handle.inject(Fault::Split {
            first: 10,
            delay: Duration::from_millis(15),
        });

        engine.send(Command::LoadOnOff, &[0u8; PAYLOAD_LEN]).unwrap();
        assert!(engine.stats().spurious_arrivals() >= 1);
        assert_eq!(engine.stats().retries(), 0);
    }

    #[test]
    fn close_is_idempotent_and_blocks_further_sends() {
        let (mut engine, _) = engine();
        engine.close().unwrap();
        engine.close().unwrap();
        assert!(!engine.is_open());

        let err = engine.send(Command::LoadOnOff, &[0u8; PAYLOAD_LEN]).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Transport(TransportError::Closed)
        ));
    }

    #[test]
    fn stale_input_is_discarded_before_write() {
        let (mut engine, handle) = engine();
        handle.push_unsolicited(&[START_MARKER; 7]);

        engine.send(Command::LoadOnOff, &[0u8; PAYLOAD_LEN]).unwrap();
        assert_eq!(engine.stats().retries(), 0);
    }

    #[test]
    fn stale_full_frame_does_not_satisfy_next_send() {
        let (mut engine, handle) = engine();
        engine
            .send(Command::MaxVoltageSet, &u32_payload(30_000))
            .unwrap();

        let stale = encode_frame(0x01, Command::ValuesRead.code(), &[0u8; PAYLOAD_LEN]);
        handle.push_unsolicited(stale.as_bytes());
        // Let the observer see it and set the signal.
        thread::sleep(Duration::from_millis(10));

        let reply = engine
            .send(Command::MaxVoltageRead, &[0u8; PAYLOAD_LEN])
            .unwrap();
        assert_eq!(reply[..4], 30_000u32.to_le_bytes());
        assert_eq!(engine.stats().retries(), 0);
    }
}
