use tracing::{debug, error, info, warn};

use crate::channel::CommandChannel;
use crate::config::Configuration;
use crate::downlink::DownlinkSink;
use crate::error::{ChannelError, TransportError};
use crate::join::{JoinOutcome, JoinSession};
use crate::parser::{DownlinkFrame, Response, parse_response};
use crate::protocol::Command;
use crate::shutdown::CancelToken;
use crate::uart::Transport;

/// One transmission cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkAttempt {
    pub payload: Vec<u8>,
    pub port: u8,
    pub confirmed: bool,
    pub downlink: Option<DownlinkFrame>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    /// The module confirmed the uplink, possibly with a downlink attached.
    Delivered,
    /// `mac tx` was not answered with `ok`.
    NotSent(Response),
    /// `mac tx` was taken but nothing followed within the poll window.
    NoFollowUp,
    /// Something other than `mac_tx_ok`/`mac_rx` followed, e.g. `mac_err`.
    Unsettled(Response),
}

impl AttemptResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, AttemptResult::NotSent(_) | AttemptResult::NoFollowUp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Too many failures since the join; the module must be provisioned again.
    FailureLimit,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub uplinks: u32,
    pub delivered: u32,
    pub failures: u32,
    pub downlinks: u32,
}

/// Join, then transmit on a fixed interval until the link degrades, then
/// join again from scratch.
pub struct UplinkLoop<'a, S: DownlinkSink> {
    config: &'a Configuration,
    cancel: &'a CancelToken,
    sink: S,
    payload: Vec<u8>,
    sessions: u32,
}

impl<'a, S: DownlinkSink> UplinkLoop<'a, S> {
    pub fn new(config: &'a Configuration, cancel: &'a CancelToken, sink: S) -> Self {
        Self {
            config,
            cancel,
            sink,
            payload: config.uplink_message().into_bytes(),
            sessions: 0,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Number of sessions that reached the joined state.
    pub fn sessions(&self) -> u32 {
        self.sessions
    }

    /// Runs until cancelled. Only transport failures end it early.
    pub fn run<T: Transport>(
        &mut self,
        channel: &mut CommandChannel<T>,
    ) -> Result<(), TransportError> {
        loop {
            if !self.join(channel)? {
                return Ok(());
            }
            self.sessions += 1;

            match self.run_session(channel)? {
                SessionEnd::Cancelled => return Ok(()),
                SessionEnd::FailureLimit => {
                    warn!("Too many failed uplinks, provisioning the module again");
                }
            }
        }
    }

    /// Run join sessions until one succeeds. `false` when cancelled.
    pub fn join<T: Transport>(
        &mut self,
        channel: &mut CommandChannel<T>,
    ) -> Result<bool, TransportError> {
        let backoff = self.config.timing.rejoin_backoff();

        loop {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }

            let mut session = JoinSession::new(self.config, self.cancel);
            match session.run(channel)? {
                JoinOutcome::Joined => {
                    info!(
                        "Connected to LoRa network after {} join attempt(s)",
                        session.attempts()
                    );
                    return Ok(true);
                }
                JoinOutcome::Cancelled => return Ok(false),
                JoinOutcome::Failed(reason) => {
                    error!("Failed to connect ({reason:?}), retrying in {backoff:?}");
                    if !self.cancel.sleep(backoff) {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Transmit until the failure limit is passed or cancellation.
    pub fn run_session<T: Transport>(
        &mut self,
        channel: &mut CommandChannel<T>,
    ) -> Result<SessionEnd, TransportError> {
        let config = self.config;
        let timing = &config.timing;
        let limit = config.uplink.max_session_failures;
        let mut error_count = 0u32;
        let mut stats = SessionStats::default();

        let end = loop {
            if error_count > limit {
                break SessionEnd::FailureLimit;
            }

            debug!("Waiting {:?} before sending", timing.tx_interval());
            if !self.cancel.sleep(timing.tx_interval()) {
                break SessionEnd::Cancelled;
            }

            let mut attempt = UplinkAttempt {
                payload: self.payload.clone(),
                port: config.uplink.fport,
                confirmed: config.uplink.confirmed,
                downlink: None,
            };
            let result = self.transmit(channel, &mut attempt)?;
            stats.uplinks += 1;

            match &result {
                AttemptResult::Delivered => stats.delivered += 1,
                AttemptResult::NotSent(response) => {
                    error_count += 1;
                    error!(
                        "Could not send the uplink ({response:?}), failure {error_count}/{}",
                        limit + 1
                    );
                }
                AttemptResult::NoFollowUp => {
                    error_count += 1;
                    error!(
                        "No response, maybe collision or message lost, failure {error_count}/{}",
                        limit + 1
                    );
                }
                AttemptResult::Unsettled(response) => {
                    warn!("Uplink ended with {response:?}, continuing");
                }
            }
            if result.is_failure() {
                stats.failures += 1;
            }

            if let Some(frame) = attempt.downlink.take() {
                stats.downlinks += 1;
                self.sink.deliver(frame.into());
            }
        };

        info!(
            "Session ended ({end:?}): {} uplinks, {} delivered, {} failed, {} downlinks",
            stats.uplinks, stats.delivered, stats.failures, stats.downlinks
        );
        Ok(end)
    }

    fn transmit<T: Transport>(
        &self,
        channel: &mut CommandChannel<T>,
        attempt: &mut UplinkAttempt,
    ) -> Result<AttemptResult, TransportError> {
        let command = Command::transmit(attempt.confirmed, attempt.port, &attempt.payload);
        info!("Sending command \"{}\"", command.to_ascii());

        let response = match channel.execute(&command) {
            Ok(line) => parse_response(&line),
            Err(ChannelError::Timeout(timeout)) => {
                warn!("No answer to mac tx within {timeout:?}");
                Response::Empty
            }
            Err(ChannelError::Transport(e)) => return Err(e),
        };
        if !response.is_affirmative() {
            return Ok(AttemptResult::NotSent(response));
        }
        debug!("Message successfully handed to the module");

        let timing = &self.config.timing;
        let Some(line) =
            channel.poll_unsolicited(timing.followup_polls, timing.followup_poll_interval())?
        else {
            return Ok(AttemptResult::NoFollowUp);
        };
        info!("Got response {line}");

        match parse_response(&line) {
            Response::Downlink(frame) => {
                info!("Got a mac_rx (downlink), payload {}", frame.payload);
                attempt.downlink = Some(frame);
                Ok(AttemptResult::Delivered)
            }
            Response::Affirmative => {
                info!("No mac_rx in response, continuing");
                Ok(AttemptResult::Delivered)
            }
            other => Ok(AttemptResult::Unsettled(other)),
        }
    }
}
