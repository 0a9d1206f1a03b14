use tracing::{debug, error, info, warn};

use crate::channel::CommandChannel;
use crate::config::Configuration;
use crate::error::{ChannelError, TransportError};
use crate::parser::{Response, parse_response};
use crate::protocol::Command;
use crate::shutdown::CancelToken;
use crate::uart::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Idle,
    Resetting,
    Provisioning,
    SettingDataRate,
    ConfiguringChannels,
    Saving,
    Joining,
    AwaitingAccept,
    Joined,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinFailure {
    /// A provisioning command got no answer.
    NoResponse { state: JoinState },
    /// `mac join otaa` never answered `ok`.
    AttemptsExhausted(u32),
    /// Nothing arrived after the join request was taken.
    NoAcceptance,
    /// The join-status line was something other than `accepted`.
    Rejected(Response),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Failed(JoinFailure),
    Cancelled,
}

impl JoinOutcome {
    #[cfg(test)]
    pub fn is_joined(&self) -> bool {
        matches!(self, JoinOutcome::Joined)
    }
}

/// One pass through reset, provisioning, channel setup, save and OTAA join.
///
/// Responses to the provisioning commands are logged, not checked; only the
/// join request (`ok`) and the join status (`accepted`) gate progress.
pub struct JoinSession<'a> {
    config: &'a Configuration,
    cancel: &'a CancelToken,
    state: JoinState,
    attempts: u32,
}

impl<'a> JoinSession<'a> {
    pub fn new(config: &'a Configuration, cancel: &'a CancelToken) -> Self {
        Self {
            config,
            cancel,
            state: JoinState::Idle,
            attempts: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> JoinState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn run<T: Transport>(
        &mut self,
        channel: &mut CommandChannel<T>,
    ) -> Result<JoinOutcome, TransportError> {
        match self.drive(channel) {
            Ok(outcome) => Ok(outcome),
            Err(ChannelError::Timeout(timeout)) => {
                warn!("No response within {timeout:?} while {:?}", self.state);
                Ok(self.fail(JoinFailure::NoResponse { state: self.state }))
            }
            Err(ChannelError::Transport(e)) => Err(e),
        }
    }

    fn drive<T: Transport>(
        &mut self,
        channel: &mut CommandChannel<T>,
    ) -> Result<JoinOutcome, ChannelError> {
        let config = self.config;
        let identity = &config.identity;

        self.transition(JoinState::Resetting);
        let reset = if config.radio.factory_reset {
            info!("Factory resetting device");
            Command::FactoryReset
        } else {
            info!("Resetting device");
            Command::Reset
        };
        self.step(channel, &reset)?;

        if self.cancel.is_cancelled() {
            return Ok(JoinOutcome::Cancelled);
        }

        self.transition(JoinState::Provisioning);
        info!("Setting APPKEY : {}", identity.app_key.redacted());
        self.step(channel, &Command::SetAppKey(identity.app_key.clone()))?;
        info!("Setting JOINEUI : {}", identity.join_eui);
        self.step(channel, &Command::SetAppEui(identity.join_eui.clone()))?;
        info!("Setting DEVEUI : {}", identity.dev_eui);
        self.step(channel, &Command::SetDevEui(identity.dev_eui.clone()))?;

        self.transition(JoinState::SettingDataRate);
        let data_rate = config.data_rate();
        info!(
            "Setting the data rate : {data_rate} (SF{})",
            config.radio.spreading_factor.value()
        );
        self.step(channel, &Command::SetDataRate(data_rate))?;

        if self.cancel.is_cancelled() {
            return Ok(JoinOutcome::Cancelled);
        }

        self.transition(JoinState::ConfiguringChannels);
        for (index, settings) in config.radio.channels.iter().enumerate() {
            let channel_id = index as u8;
            info!(
                "Setting channel {channel_id} duty cycle to {}",
                settings.duty_cycle
            );
            self.step(
                channel,
                &Command::SetDutyCycle {
                    channel: channel_id,
                    duty_cycle: settings.duty_cycle,
                },
            )?;
            info!(
                "Setting channel {channel_id} {}",
                if settings.enabled { "on" } else { "off" }
            );
            self.step(
                channel,
                &Command::SetChannelStatus {
                    channel: channel_id,
                    enabled: settings.enabled,
                },
            )?;
        }

        self.transition(JoinState::Saving);
        info!("Saving MAC settings");
        self.step(channel, &Command::Save)?;

        if self.cancel.is_cancelled() {
            return Ok(JoinOutcome::Cancelled);
        }

        self.transition(JoinState::Joining);
        if let Some(outcome) = self.request_join(channel)? {
            return Ok(outcome);
        }

        self.transition(JoinState::AwaitingAccept);
        info!("Waiting for the join status");
        if !self.cancel.sleep(config.timing.join_accept_delay()) {
            return Ok(JoinOutcome::Cancelled);
        }

        let line = match channel.read_unsolicited(config.timing.join_accept_timeout()) {
            Ok(line) => line,
            Err(ChannelError::Timeout(timeout)) => {
                warn!("No join status within {timeout:?}");
                return Ok(self.fail(JoinFailure::NoAcceptance));
            }
            Err(e) => return Err(e),
        };
        info!("Status of the join request : {line}");

        match parse_response(&line) {
            Response::Accepted => {
                self.transition(JoinState::Joined);
                Ok(JoinOutcome::Joined)
            }
            other => Ok(self.fail(JoinFailure::Rejected(other))),
        }
    }

    /// Repeat `mac join otaa` until the module takes it. Returns an outcome
    /// only when the session ends here.
    fn request_join<T: Transport>(
        &mut self,
        channel: &mut CommandChannel<T>,
    ) -> Result<Option<JoinOutcome>, ChannelError> {
        let config = self.config;
        let policy = &config.join_retry;

        loop {
            self.attempts += 1;
            info!("Preparing to join the network (attempt {})", self.attempts);

            let response = match channel.execute(&Command::JoinOtaa) {
                Ok(line) => {
                    info!("Mac join otaa response : {line}");
                    parse_response(&line)
                }
                Err(ChannelError::Timeout(timeout)) => {
                    warn!("No answer to mac join otaa within {timeout:?}");
                    Response::Empty
                }
                Err(e) => return Err(e),
            };

            let taken = response.is_affirmative();
            if !taken {
                match &response {
                    Response::Negative(code) => warn!("Join request refused: {code}"),
                    Response::Unrecognized(text) => warn!("Unrecognized join answer '{text}'"),
                    _ => warn!("Join request not taken: {response:?}"),
                }

                if policy.is_exhausted(self.attempts) {
                    error!("Giving up after {} join attempts", self.attempts);
                    return Ok(Some(
                        self.fail(JoinFailure::AttemptsExhausted(self.attempts)),
                    ));
                }
            }

            let pause = policy.delay_after(self.attempts);
            debug!("Pausing {pause:?} after join attempt {}", self.attempts);
            if !self.cancel.sleep(pause) {
                return Ok(Some(JoinOutcome::Cancelled));
            }

            if taken {
                return Ok(None);
            }
        }
    }

    fn step<T: Transport>(
        &self,
        channel: &mut CommandChannel<T>,
        command: &Command,
    ) -> Result<Response, ChannelError> {
        let line = channel.execute(command)?;
        let response = parse_response(&line);

        match &response {
            Response::Negative(code) => {
                warn!("'{}' answered {code}", command.to_log_string())
            }
            Response::Unrecognized(text) => {
                warn!("'{}' answered '{text}'", command.to_log_string())
            }
            _ => info!("{:?} response : {line}", self.state),
        }

        Ok(response)
    }

    fn transition(&mut self, next: JoinState) {
        debug!("Join state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, failure: JoinFailure) -> JoinOutcome {
        self.transition(JoinState::Failed);
        JoinOutcome::Failed(failure)
    }
}
