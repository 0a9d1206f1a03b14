use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

// Serial port configuration
pub const DEFAULT_PORT_PATH: &str = "/dev/ttyACM0";
pub const DEFAULT_BAUD_RATE: u32 = 57_600;
pub const SERIAL_TIMEOUT_MS: u64 = 100;

// LoRa configuration
pub const CHANNEL_COUNT: usize = 3;
pub const DEFAULT_SPREADING_FACTOR: u8 = 7;
// EU868 sub-band limit
pub const DEFAULT_DUTY_CYCLE: f64 = 0.01;
pub const DEFAULT_FPORT: u8 = 220;
pub const MAX_FPORT: u8 = 223;

// Pacing
pub const SETTLE_DELAY_MS: u64 = 200;
pub const RESPONSE_TIMEOUT_MS: u64 = 10_000;
pub const JOIN_ACCEPT_DELAY_MS: u64 = 2_000;
pub const JOIN_ACCEPT_TIMEOUT_MS: u64 = 20_000;
pub const TX_INTERVAL_MS: u64 = 10_000;
pub const FOLLOWUP_POLLS: u32 = 5;
pub const FOLLOWUP_POLL_INTERVAL_MS: u64 = 1_000;
pub const REJOIN_BACKOFF_MS: u64 = 3_000;
pub const MAX_SESSION_FAILURES: u32 = 5;

const APP_DIR: &str = "rn2483-otaa";
const CONFIG_FILE: &str = "config.json";

/// Fixed-length hex identifier. The device treats these as opaque strings,
/// so only length and charset are checked.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexId<const LEN: usize>(String);

pub type AppKey = HexId<32>;
pub type Eui = HexId<16>;

impl<const LEN: usize> HexId<LEN> {
    /// Short form for log lines.
    pub fn redacted(&self) -> String {
        format!("{}****", &self.0[..4])
    }
}

impl<const LEN: usize> TryFrom<String> for HexId<LEN> {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.len() != LEN {
            return Err(ConfigError::Invalid(format!(
                "expected {LEN} hex characters, got {} in '{value}'",
                value.len()
            )));
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::Invalid(format!(
                "'{value}' contains non-hex characters"
            )));
        }
        Ok(Self(value))
    }
}

impl<const LEN: usize> TryFrom<&str> for HexId<LEN> {
    type Error = ConfigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl<const LEN: usize> From<HexId<LEN>> for String {
    fn from(id: HexId<LEN>) -> Self {
        id.0
    }
}

impl<const LEN: usize> fmt::Display for HexId<LEN> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Keys end up in Debug output of the whole config
impl<const LEN: usize> fmt::Debug for HexId<LEN> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexId({})", self.redacted())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub app_key: AppKey,
    /// Called AppEUI by the RN2483 command set.
    pub join_eui: Eui,
    pub dev_eui: Eui,
}

/// LoRa spreading factor, 7 to 12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SpreadingFactor(u8);

impl SpreadingFactor {
    pub const MIN: u8 = 7;
    pub const MAX: u8 = 12;

    pub fn value(self) -> u8 {
        self.0
    }

    /// RN2483 EU868 data rate index at 125 kHz:
    /// DR0 = SF12 ... DR5 = SF7.
    pub fn data_rate(self) -> u8 {
        (i16::from(self.0) - 12).unsigned_abs() as u8
    }
}

impl TryFrom<u8> for SpreadingFactor {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ConfigError::Invalid(format!(
                "spreading factor {value} outside {}..={}",
                Self::MIN,
                Self::MAX
            )))
        }
    }
}

impl From<SpreadingFactor> for u8 {
    fn from(sf: SpreadingFactor) -> Self {
        sf.0
    }
}

impl Default for SpreadingFactor {
    fn default() -> Self {
        Self(DEFAULT_SPREADING_FACTOR)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Fraction of airtime the channel may use, 0.0 to 1.0.
    pub duty_cycle: f64,
    pub enabled: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            duty_cycle: DEFAULT_DUTY_CYCLE,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RadioConfig {
    #[serde(default)]
    pub spreading_factor: SpreadingFactor,
    #[serde(default)]
    pub channels: [ChannelConfig; CHANNEL_COUNT],
    /// Send `sys factoryRESET` instead of `sys reset` before provisioning.
    #[serde(default)]
    pub factory_reset: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub path: String,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_PORT_PATH.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    pub fport: u8,
    /// Defaults to "Hello from <DevEUI>" when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub confirmed: bool,
    /// Failures tolerated per joined session before it is torn down.
    pub max_session_failures: u32,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            fport: DEFAULT_FPORT,
            message: None,
            confirmed: true,
            max_session_failures: MAX_SESSION_FAILURES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub settle_delay_ms: u64,
    pub response_timeout_ms: u64,
    pub join_accept_delay_ms: u64,
    pub join_accept_timeout_ms: u64,
    pub tx_interval_ms: u64,
    pub followup_polls: u32,
    pub followup_poll_interval_ms: u64,
    pub rejoin_backoff_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: SETTLE_DELAY_MS,
            response_timeout_ms: RESPONSE_TIMEOUT_MS,
            join_accept_delay_ms: JOIN_ACCEPT_DELAY_MS,
            join_accept_timeout_ms: JOIN_ACCEPT_TIMEOUT_MS,
            tx_interval_ms: TX_INTERVAL_MS,
            followup_polls: FOLLOWUP_POLLS,
            followup_poll_interval_ms: FOLLOWUP_POLL_INTERVAL_MS,
            rejoin_backoff_ms: REJOIN_BACKOFF_MS,
        }
    }
}

impl TimingConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn join_accept_delay(&self) -> Duration {
        Duration::from_millis(self.join_accept_delay_ms)
    }

    pub fn join_accept_timeout(&self) -> Duration {
        Duration::from_millis(self.join_accept_timeout_ms)
    }

    pub fn tx_interval(&self) -> Duration {
        Duration::from_millis(self.tx_interval_ms)
    }

    pub fn followup_poll_interval(&self) -> Duration {
        Duration::from_millis(self.followup_poll_interval_ms)
    }

    pub fn rejoin_backoff(&self) -> Duration {
        Duration::from_millis(self.rejoin_backoff_ms)
    }

    /// Every pause zeroed; used by tests driving the state machines. The
    /// scripted transport answers at once, so the timeouts never elapse.
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            settle_delay_ms: 0,
            response_timeout_ms: 1_000,
            join_accept_delay_ms: 0,
            join_accept_timeout_ms: 1_000,
            tx_interval_ms: 0,
            followup_polls: FOLLOWUP_POLLS,
            followup_poll_interval_ms: 0,
            rejoin_backoff_ms: 0,
        }
    }
}

/// Everything the join and uplink machinery needs, built once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub identity: Identity,
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub uplink: UplinkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub join_retry: RetryPolicy,
}

impl Configuration {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            radio: RadioConfig::default(),
            serial: SerialConfig::default(),
            uplink: UplinkConfig::default(),
            timing: TimingConfig::default(),
            join_retry: RetryPolicy::default(),
        }
    }

    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join(APP_DIR).join(CONFIG_FILE)
    }

    /// Load configuration from JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: Configuration = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to JSON file, creating the parent directory
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, channel) in self.radio.channels.iter().enumerate() {
            if !(0.0..=1.0).contains(&channel.duty_cycle) {
                return Err(ConfigError::Invalid(format!(
                    "channel {index} duty cycle {} outside 0.0..=1.0",
                    channel.duty_cycle
                )));
            }
        }

        if !(1..=MAX_FPORT).contains(&self.uplink.fport) {
            return Err(ConfigError::Invalid(format!(
                "uplink port {} outside 1..={MAX_FPORT}",
                self.uplink.fport
            )));
        }

        if self.uplink.message.as_deref() == Some("") {
            return Err(ConfigError::Invalid("uplink message is empty".into()));
        }

        if self.serial.path.is_empty() || self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid(format!(
                "serial link '{}' at {} baud is not usable",
                self.serial.path, self.serial.baud_rate
            )));
        }

        if self.timing.followup_polls == 0 {
            return Err(ConfigError::Invalid("followup_polls must be at least 1".into()));
        }

        self.join_retry.validate()
    }

    pub fn data_rate(&self) -> u8 {
        self.radio.spreading_factor.data_rate()
    }

    pub fn uplink_message(&self) -> String {
        self.uplink
            .message
            .clone()
            .unwrap_or_else(|| format!("Hello from {}", self.identity.dev_eui))
    }

    /// Channels configured above the regulatory default
    pub fn aggressive_channels(&self) -> impl Iterator<Item = usize> + '_ {
        self.radio
            .channels
            .iter()
            .enumerate()
            .filter(|(_, channel)| channel.enabled && channel.duty_cycle > DEFAULT_DUTY_CYCLE)
            .map(|(index, _)| index)
    }

    /// Configuration with every pause zeroed.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        let mut config = Self::new(Identity {
            app_key: AppKey::try_from("0123456789ABCDEF0123456789ABCDEF").unwrap(),
            join_eui: Eui::try_from("DEAD25DEAD25DEAD").unwrap(),
            dev_eui: Eui::try_from("DEADDEAD00090002").unwrap(),
        });
        config.timing = TimingConfig::immediate();
        config.join_retry = RetryPolicy::immediate(10);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_rate_covers_every_spreading_factor() {
        for sf in SpreadingFactor::MIN..=SpreadingFactor::MAX {
            let dr = SpreadingFactor::try_from(sf).unwrap().data_rate();
            assert_eq!(dr, 12 - sf);
            assert!(dr <= 5);
        }
        assert_eq!(SpreadingFactor::try_from(7).unwrap().data_rate(), 5);
        assert_eq!(SpreadingFactor::try_from(12).unwrap().data_rate(), 0);
    }

    #[test]
    fn test_spreading_factor_out_of_range() {
        assert!(SpreadingFactor::try_from(6).is_err());
        assert!(SpreadingFactor::try_from(13).is_err());
    }

    #[test]
    fn test_hex_id_length_and_charset() {
        assert!(Eui::try_from("DEAD25DEAD25DEAD").is_ok());
        assert!(Eui::try_from("dead25dead25dead").is_ok());
        assert!(Eui::try_from("DEAD25DEAD25DEA").is_err());
        assert!(Eui::try_from("DEAD25DEAD25DEAG").is_err());
        assert!(AppKey::try_from("DEAD25DEAD25DEAD").is_err());
    }

    #[test]
    fn test_app_key_is_redacted_in_debug() {
        let config = Configuration::for_tests();
        let debug = format!("{:?}", config.identity);
        assert!(!debug.contains("0123456789ABCDEF0123456789ABCDEF"));
        assert!(debug.contains("0123****"));
    }

    #[test]
    fn test_minimal_json_fills_defaults() {
        let json = r#"{
            "identity": {
                "app_key": "0123456789ABCDEF0123456789ABCDEF",
                "join_eui": "DEAD25DEAD25DEAD",
                "dev_eui": "DEADDEAD00090002"
            }
        }"#;
        let config = Configuration::from_json(json).unwrap();
        assert_eq!(config.serial.path, DEFAULT_PORT_PATH);
        assert_eq!(config.serial.baud_rate, 57_600);
        assert_eq!(config.radio.spreading_factor.value(), 7);
        assert_eq!(config.uplink.fport, 220);
        assert!(config.uplink.confirmed);
        assert_eq!(config.timing.settle_delay(), Duration::from_millis(200));
        for channel in &config.radio.channels {
            assert_eq!(channel.duty_cycle, DEFAULT_DUTY_CYCLE);
            assert!(channel.enabled);
        }
        assert_eq!(config.aggressive_channels().count(), 0);
    }

    #[test]
    fn test_missing_identity_is_rejected() {
        assert!(matches!(
            Configuration::from_json("{}"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_bad_identity_in_json_is_rejected() {
        let json = r#"{
            "identity": {
                "app_key": "0123",
                "join_eui": "DEAD25DEAD25DEAD",
                "dev_eui": "DEADDEAD00090002"
            }
        }"#;
        assert!(Configuration::from_json(json).is_err());
    }

    #[test]
    fn test_duty_cycle_out_of_range() {
        let mut config = Configuration::for_tests();
        config.radio.channels[1].duty_cycle = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_full_duty_cycle_is_allowed_but_flagged() {
        let mut config = Configuration::for_tests();
        config.radio.channels[2].duty_cycle = 1.0;
        assert!(config.validate().is_ok());
        assert_eq!(config.aggressive_channels().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_fport_bounds() {
        let mut config = Configuration::for_tests();
        config.uplink.fport = 0;
        assert!(config.validate().is_err());
        config.uplink.fport = 224;
        assert!(config.validate().is_err());
        config.uplink.fport = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_message_uses_dev_eui() {
        let config = Configuration::for_tests();
        assert_eq!(config.uplink_message(), "Hello from DEADDEAD00090002");
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = std::env::temp_dir().join(format!("rn2483-otaa-test-{}", std::process::id()));
        let path = dir.join("nested").join("config.json");

        let mut config = Configuration::for_tests();
        config.uplink.message = Some("Hello".into());
        config.radio.channels[0].enabled = false;
        config.save_to_file(&path).unwrap();

        let loaded = Configuration::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Configuration::load_from_file("/nonexistent/rn2483/config.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
