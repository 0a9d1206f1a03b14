use chrono::{DateTime, Local};
use std::collections::VecDeque;
use tracing::info;

use crate::parser::DownlinkFrame;

pub const MAX_DOWNLINK_HISTORY: usize = 100;

/// A downlink as handed to the application; the payload stays hex.
#[derive(Debug, Clone)]
pub struct Downlink {
    pub port: Option<u8>,
    pub payload: String,
    pub received_at: DateTime<Local>,
}

impl From<DownlinkFrame> for Downlink {
    fn from(frame: DownlinkFrame) -> Self {
        Self {
            port: frame.port,
            payload: frame.payload,
            received_at: Local::now(),
        }
    }
}

/// Consumer of raw downlink payloads.
pub trait DownlinkSink {
    fn deliver(&mut self, downlink: Downlink);
}

/// Logs every downlink and keeps the most recent ones.
pub struct DownlinkLog {
    history: VecDeque<Downlink>,
    total: u64,
}

impl DownlinkLog {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(MAX_DOWNLINK_HISTORY),
            total: 0,
        }
    }

    #[cfg(test)]
    pub fn history(&self) -> &VecDeque<Downlink> {
        &self.history
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Default for DownlinkLog {
    fn default() -> Self {
        Self::new()
    }
}

impl DownlinkSink for DownlinkLog {
    fn deliver(&mut self, downlink: Downlink) {
        info!(
            port = ?downlink.port,
            "Downlink payload {} at {}",
            downlink.payload,
            downlink.received_at.format("%H:%M:%S%.3f")
        );

        if self.history.len() >= MAX_DOWNLINK_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(downlink);
        self.total += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &str) -> DownlinkFrame {
        DownlinkFrame {
            port: Some(1),
            payload: payload.to_string(),
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut log = DownlinkLog::new();
        for i in 0..(MAX_DOWNLINK_HISTORY + 5) {
            log.deliver(frame(&format!("{i:02x}")).into());
        }
        assert_eq!(log.history().len(), MAX_DOWNLINK_HISTORY);
        assert_eq!(log.total(), (MAX_DOWNLINK_HISTORY + 5) as u64);
        assert_eq!(log.history().front().unwrap().payload, "05");
    }

    #[test]
    fn test_payload_is_not_decoded() {
        let mut log = DownlinkLog::new();
        log.deliver(frame("a1b2c3").into());
        let downlink = log.history().back().unwrap();
        assert_eq!(downlink.payload, "a1b2c3");
        assert_eq!(downlink.port, Some(1));
    }
}
