use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::config::TimingConfig;
use crate::error::{ChannelError, TransportError};
use crate::parser::parse_version;
use crate::protocol::Command;
use crate::uart::{LineRead, Transport};

const LINE_TERMINATOR: &str = "\r\n";
// Upper bound on leftover lines discarded before a command
const MAX_STALE_LINES: usize = 32;

/// Append exactly one CRLF, whatever trailing whitespace `command` carries.
pub fn frame(command: &str) -> String {
    format!("{}{}", command.trim_end(), LINE_TERMINATOR)
}

/// One-command-at-a-time request/response exchange with the module.
pub struct CommandChannel<T: Transport> {
    transport: T,
    settle_delay: Duration,
    response_timeout: Duration,
}

impl<T: Transport> CommandChannel<T> {
    pub fn new(transport: T, timing: &TimingConfig) -> Self {
        Self {
            transport,
            settle_delay: timing.settle_delay(),
            response_timeout: timing.response_timeout(),
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Write `command` and return the first non-empty line the module prints.
    ///
    /// Lines still buffered from an earlier exchange are discarded first, so a
    /// late `mac_rx` cannot be taken as the answer. Device error strings come
    /// back as ordinary responses.
    pub fn send(&mut self, command: &str) -> Result<String, ChannelError> {
        self.discard_stale()?;
        self.transport.write_all(frame(command).as_bytes())?;
        std::thread::sleep(self.settle_delay);

        let response = self.await_line(self.response_timeout)?;
        debug!("Decoded response : {response}");
        Ok(response)
    }

    pub fn execute(&mut self, command: &Command) -> Result<String, ChannelError> {
        debug!("Sending \"{}\"", command.to_log_string());
        self.send(&command.to_ascii())
    }

    /// Wait for a line the module prints on its own, e.g. `accepted`.
    pub fn read_unsolicited(&mut self, timeout: Duration) -> Result<String, ChannelError> {
        self.await_line(timeout)
    }

    /// Up to `polls` reads of `spacing` each. `None` if all of them came up
    /// empty.
    pub fn poll_unsolicited(
        &mut self,
        polls: u32,
        spacing: Duration,
    ) -> Result<Option<String>, TransportError> {
        for poll in 1..=polls {
            match self.await_line(spacing) {
                Ok(line) => return Ok(Some(line)),
                Err(ChannelError::Timeout(_)) => trace!("poll {poll}/{polls}: nothing yet"),
                Err(ChannelError::Transport(e)) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Ask the module for its firmware string. A missing or odd answer is only
    /// logged; the join sequence will tell whether the module is usable.
    pub fn firmware_version(&mut self) -> Result<Option<String>, TransportError> {
        match self.execute(&Command::GetVersion) {
            Ok(line) => {
                if parse_version(&line).is_none() {
                    warn!("Unexpected firmware string '{line}', is this an RN2483?");
                }
                Ok(Some(line))
            }
            Err(ChannelError::Timeout(timeout)) => {
                warn!("No answer to sys get ver within {timeout:?}");
                Ok(None)
            }
            Err(ChannelError::Transport(e)) => Err(e),
        }
    }

    fn discard_stale(&mut self) -> Result<(), TransportError> {
        for _ in 0..MAX_STALE_LINES {
            match self.transport.read_line(Duration::ZERO)? {
                LineRead::Line(line) => warn!("Discarding stale line '{line}'"),
                LineRead::Blank => {}
                LineRead::TimedOut => return Ok(()),
            }
        }
        warn!("Module keeps printing, sending anyway");
        Ok(())
    }

    fn await_line(&mut self, timeout: Duration) -> Result<String, ChannelError> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.transport.read_line(remaining)? {
                LineRead::Line(line) => return Ok(line),
                LineRead::Blank => {
                    trace!("skipping blank line");
                    if Instant::now() >= deadline {
                        return Err(ChannelError::Timeout(timeout));
                    }
                }
                LineRead::TimedOut => return Err(ChannelError::Timeout(timeout)),
            }
        }
    }
}
