use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use crate::config::{SERIAL_TIMEOUT_MS, SerialConfig};
use crate::error::TransportError;

/// Result of one bounded line read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// A complete line, trimmed of whitespace.
    Line(String),
    /// A terminator with nothing but whitespace before it.
    Blank,
    TimedOut,
}

/// Line-oriented duplex link to the module.
pub trait Transport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Return the next buffered or incoming line, waiting at most `timeout`.
    fn read_line(&mut self, timeout: Duration) -> io::Result<LineRead>;
}

/// RN2483 on a serial port: 8N1, no flow control, DTR low.
///
/// The port is closed when this value is dropped.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: String,
    pending: Vec<u8>,
    serial_buf: Vec<u8>,
}

impl SerialTransport {
    pub fn open(config: &SerialConfig) -> Result<Self, TransportError> {
        let open_error = |source| TransportError::Open {
            path: config.path.clone(),
            source,
        };

        let mut port = serialport::new(&config.path, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
            .open()
            .map_err(open_error)?;

        port.write_data_terminal_ready(false).map_err(open_error)?;
        // Drop whatever the module printed before we attached
        port.clear(ClearBuffer::All).map_err(open_error)?;

        info!(
            "Opened serial port {} at {} baud",
            config.path, config.baud_rate
        );

        Ok(Self {
            port,
            path: config.path.clone(),
            pending: Vec::new(),
            serial_buf: vec![0u8; 256],
        })
    }

    fn take_line(&mut self) -> Option<LineRead> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw).trim().to_string();

        if line.is_empty() {
            Some(LineRead::Blank)
        } else {
            Some(LineRead::Line(line))
        }
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        trace!(?bytes, "serial write");
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<LineRead> {
        let deadline = Instant::now() + timeout;
        let mut attempted = false;

        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }

            if attempted && Instant::now() >= deadline {
                return Ok(LineRead::TimedOut);
            }
            if timeout.is_zero() && self.port.bytes_to_read().map_err(io::Error::from)? == 0 {
                return Ok(LineRead::TimedOut);
            }
            attempted = true;

            match self.port.read(&mut self.serial_buf) {
                Ok(0) => thread::sleep(Duration::from_millis(10)),
                Ok(n) => {
                    trace!(bytes = ?&self.serial_buf[..n], "serial read");
                    self.pending.extend_from_slice(&self.serial_buf[..n]);
                }
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        debug!("Closing serial port {}", self.path);
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;

    type Responder = Box<dyn FnMut(&str) -> Vec<String>>;

    /// Scripted line standing for one read that times out.
    pub const SILENCE: &str = "<silence>";

    /// Scripted stand-in for the module.
    ///
    /// Every written frame is recorded; the responder turns each command into
    /// the lines the module would print afterwards. An empty string queues a
    /// blank line and [`SILENCE`] queues one read that times out. Reads with
    /// nothing queued time out immediately.
    pub struct MockTransport {
        frames: Vec<String>,
        queued: VecDeque<LineRead>,
        responder: Responder,
    }

    impl MockTransport {
        pub fn new(responder: impl FnMut(&str) -> Vec<String> + 'static) -> Self {
            Self {
                frames: Vec::new(),
                queued: VecDeque::new(),
                responder: Box::new(responder),
            }
        }

        /// Answers `ok` to everything.
        pub fn agreeable() -> Self {
            Self::new(|_| vec!["ok".to_string()])
        }

        pub fn queue_line(&mut self, line: &str) {
            self.queued.push_back(to_read(line));
        }

        /// Raw frames as written, terminators included.
        pub fn frames(&self) -> &[String] {
            &self.frames
        }

        /// Written commands without terminators.
        pub fn commands(&self) -> Vec<String> {
            self.frames
                .iter()
                .map(|f| f.trim_end_matches("\r\n").to_string())
                .collect()
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.commands()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .count()
        }
    }

    fn to_read(line: &str) -> LineRead {
        if line == SILENCE {
            LineRead::TimedOut
        } else if line.trim().is_empty() {
            LineRead::Blank
        } else {
            LineRead::Line(line.trim().to_string())
        }
    }

    impl Transport for MockTransport {
        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            let frame = String::from_utf8_lossy(bytes).to_string();
            let command = frame.trim_end_matches("\r\n").to_string();
            self.frames.push(frame);
            for line in (self.responder)(&command) {
                self.queued.push_back(to_read(&line));
            }
            Ok(())
        }

        fn read_line(&mut self, _timeout: Duration) -> io::Result<LineRead> {
            Ok(self.queued.pop_front().unwrap_or(LineRead::TimedOut))
        }
    }

    pub fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }
}
