use crate::config::{AppKey, Eui};

/// RN2483 command set used by the join and uplink loops.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Reset,
    FactoryReset,
    GetVersion,
    SetAppKey(AppKey),
    SetAppEui(Eui),
    SetDevEui(Eui),
    SetDataRate(u8),
    SetDutyCycle { channel: u8, duty_cycle: f64 },
    SetChannelStatus { channel: u8, enabled: bool },
    Save,
    JoinOtaa,
    Transmit {
        confirmed: bool,
        port: u8,
        payload: String,
    },
}

impl Command {
    /// Confirmed or unconfirmed uplink carrying `message` hex-encoded.
    pub fn transmit(confirmed: bool, port: u8, message: &[u8]) -> Self {
        Command::Transmit {
            confirmed,
            port,
            payload: encode_payload(message),
        }
    }

    pub fn to_ascii(&self) -> String {
        match self {
            Command::Reset => "sys reset".to_string(),
            Command::FactoryReset => "sys factoryRESET".to_string(),
            Command::GetVersion => "sys get ver".to_string(),
            Command::SetAppKey(key) => format!("mac set appkey {}", key),
            Command::SetAppEui(eui) => format!("mac set appeui {}", eui),
            Command::SetDevEui(eui) => format!("mac set deveui {}", eui),
            Command::SetDataRate(dr) => format!("mac set dr {}", dr),
            Command::SetDutyCycle {
                channel,
                duty_cycle,
            } => format!("mac set ch dcycle {} {}", channel, duty_cycle),
            Command::SetChannelStatus { channel, enabled } => format!(
                "mac set ch status {} {}",
                channel,
                if *enabled { "on" } else { "off" }
            ),
            Command::Save => "mac save".to_string(),
            Command::JoinOtaa => "mac join otaa".to_string(),
            Command::Transmit {
                confirmed,
                port,
                payload,
            } => format!(
                "mac tx {} {} {}",
                if *confirmed { "cnf" } else { "uncnf" },
                port,
                payload
            ),
        }
    }

    /// Text safe to log: the AppKey is shortened.
    pub fn to_log_string(&self) -> String {
        match self {
            Command::SetAppKey(key) => format!("mac set appkey {}", key.redacted()),
            _ => self.to_ascii(),
        }
    }
}

/// Lowercase hex, as `mac tx` expects.
pub fn encode_payload(message: &[u8]) -> String {
    hex::encode(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioning_vocabulary() {
        let key = AppKey::try_from("0123456789ABCDEF0123456789ABCDEF").unwrap();
        let eui = Eui::try_from("DEAD25DEAD25DEAD").unwrap();

        assert_eq!(Command::Reset.to_ascii(), "sys reset");
        assert_eq!(Command::FactoryReset.to_ascii(), "sys factoryRESET");
        assert_eq!(Command::GetVersion.to_ascii(), "sys get ver");
        assert_eq!(
            Command::SetAppKey(key).to_ascii(),
            "mac set appkey 0123456789ABCDEF0123456789ABCDEF"
        );
        assert_eq!(
            Command::SetAppEui(eui.clone()).to_ascii(),
            "mac set appeui DEAD25DEAD25DEAD"
        );
        assert_eq!(
            Command::SetDevEui(eui).to_ascii(),
            "mac set deveui DEAD25DEAD25DEAD"
        );
        assert_eq!(Command::SetDataRate(5).to_ascii(), "mac set dr 5");
        assert_eq!(Command::Save.to_ascii(), "mac save");
        assert_eq!(Command::JoinOtaa.to_ascii(), "mac join otaa");
    }

    #[test]
    fn test_channel_commands() {
        assert_eq!(
            Command::SetDutyCycle {
                channel: 0,
                duty_cycle: 1.0
            }
            .to_ascii(),
            "mac set ch dcycle 0 1"
        );
        assert_eq!(
            Command::SetDutyCycle {
                channel: 2,
                duty_cycle: 0.01
            }
            .to_ascii(),
            "mac set ch dcycle 2 0.01"
        );
        assert_eq!(
            Command::SetChannelStatus {
                channel: 1,
                enabled: true
            }
            .to_ascii(),
            "mac set ch status 1 on"
        );
        assert_eq!(
            Command::SetChannelStatus {
                channel: 2,
                enabled: false
            }
            .to_ascii(),
            "mac set ch status 2 off"
        );
    }

    #[test]
    fn test_hello_becomes_confirmed_tx() {
        assert_eq!(encode_payload(b"Hello"), "48656c6c6f");
        assert_eq!(
            Command::transmit(true, 220, b"Hello").to_ascii(),
            "mac tx cnf 220 48656c6c6f"
        );
        assert_eq!(
            Command::transmit(false, 1, b"Hello").to_ascii(),
            "mac tx uncnf 1 48656c6c6f"
        );
    }

    #[test]
    fn test_app_key_not_logged() {
        let key = AppKey::try_from("0123456789ABCDEF0123456789ABCDEF").unwrap();
        let logged = Command::SetAppKey(key).to_log_string();
        assert_eq!(logged, "mac set appkey 0123****");
    }
}
