use std::fmt;

const AFFIRMATIVE_MARKER: &str = "ok";
const DOWNLINK_MARKER: &str = "mac_rx";
const JOIN_ACCEPTED: &str = "accepted";
const JOIN_DENIED: &str = "denied";

/// Error codes the RN2483 answers with instead of `ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidParam,
    NotJoined,
    NoFreeChannel,
    Silent,
    FrameCounterRejoinNeeded,
    Busy,
    MacPaused,
    InvalidDataLen,
    KeysNotInit,
    MacErr,
}

impl ErrorCode {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "invalid_param" => Some(ErrorCode::InvalidParam),
            "not_joined" => Some(ErrorCode::NotJoined),
            "no_free_ch" => Some(ErrorCode::NoFreeChannel),
            "silent" => Some(ErrorCode::Silent),
            "frame_counter_err_rejoin_needed" => Some(ErrorCode::FrameCounterRejoinNeeded),
            "busy" => Some(ErrorCode::Busy),
            "mac_paused" => Some(ErrorCode::MacPaused),
            "invalid_data_len" => Some(ErrorCode::InvalidDataLen),
            "keys_not_init" => Some(ErrorCode::KeysNotInit),
            "mac_err" => Some(ErrorCode::MacErr),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidParam => "invalid_param",
            ErrorCode::NotJoined => "not_joined",
            ErrorCode::NoFreeChannel => "no_free_ch",
            ErrorCode::Silent => "silent",
            ErrorCode::FrameCounterRejoinNeeded => "frame_counter_err_rejoin_needed",
            ErrorCode::Busy => "busy",
            ErrorCode::MacPaused => "mac_paused",
            ErrorCode::InvalidDataLen => "invalid_data_len",
            ErrorCode::KeysNotInit => "keys_not_init",
            ErrorCode::MacErr => "mac_err",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw downlink notification: `mac_rx <port> <hex>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkFrame {
    pub port: Option<u8>,
    /// Last whitespace-delimited token, left undecoded.
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Affirmative,
    Negative(ErrorCode),
    Accepted,
    Rejected,
    Downlink(DownlinkFrame),
    Empty,
    Unrecognized(String),
}

impl Response {
    pub fn is_affirmative(&self) -> bool {
        matches!(self, Response::Affirmative)
    }
}

/// Classify one line from the module.
///
/// `accepted`/`denied` must match exactly; `ok` and `mac_rx` are substring
/// markers, so `mac_tx_ok` counts as affirmative.
pub fn parse_response(line: &str) -> Response {
    let line = line.trim();

    if line.is_empty() {
        return Response::Empty;
    }
    if line == JOIN_ACCEPTED {
        return Response::Accepted;
    }
    if line == JOIN_DENIED {
        return Response::Rejected;
    }
    if line.contains(DOWNLINK_MARKER) {
        return parse_downlink(line)
            .map(Response::Downlink)
            .unwrap_or_else(|| Response::Unrecognized(line.to_string()));
    }
    if line.contains(AFFIRMATIVE_MARKER) {
        return Response::Affirmative;
    }

    match ErrorCode::from_token(line) {
        Some(code) => Response::Negative(code),
        None => Response::Unrecognized(line.to_string()),
    }
}

pub fn parse_downlink(line: &str) -> Option<DownlinkFrame> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 {
        return None;
    }

    let payload = parts[parts.len() - 1].to_string();
    let port = if parts.len() >= 3 {
        parts[1].parse().ok()
    } else {
        None
    };

    Some(DownlinkFrame { port, payload })
}

/// `sys get ver` answers e.g. `RN2483 1.0.4 Oct 12 2017 14:59:25`.
pub fn parse_version(line: &str) -> Option<&str> {
    let model = line.split_whitespace().next()?;
    (model.starts_with("RN2483") || model.starts_with("RN2903")).then_some(model)
}
