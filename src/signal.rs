//! Control-window signal protocol.
//!
//! External processes (`kdesk -r`, `-i`, `-a`, `-b`) talk to a running kdesk by
//! sending a ClientMessage to the hidden control window. The message type is
//! the interned signal atom; the 8-bit data area carries an optional icon name,
//! NUL padded to 16 bytes.

use std::fmt;
use thiserror::Error;

pub const CONTROL_WINDOW_NAME: &str = "KdeskControlWindow";

pub const KSIG_FINISH: &str = "KSIG_FINISH";
pub const KSIG_RELOAD: &str = "KSIG_RELOAD";
pub const KSIG_RELOAD_ICONS: &str = "KSIG_RELOAD_ICONS";
pub const KSIG_ICON_ALERT: &str = "KSIG_ICON_ALERT";
pub const KSIG_BLUR: &str = "KSIG_BLUR";

pub const SIGNAL_NAMES: [&str; 5] = [
    KSIG_FINISH,
    KSIG_RELOAD,
    KSIG_RELOAD_ICONS,
    KSIG_ICON_ALERT,
    KSIG_BLUR,
];

pub const ICON_NAME_MAX: usize = 16;
/// Size of a format-8 ClientMessage data area.
pub const PAYLOAD_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("unknown signal {0:?}")]
    Unknown(String),
    #[error("icon name is empty")]
    EmptyName,
    #[error("icon name is {0} bytes, at most {ICON_NAME_MAX} fit in a signal")]
    NameTooLong(usize),
    #[error("icon name contains a NUL byte")]
    NameHasNul,
    #[error("icon name is not valid UTF-8")]
    NameNotUtf8,
}

/// Icon name that fits the wire payload: 1..=16 bytes, no NUL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IconName(String);

impl IconName {
    pub fn new(name: &str) -> Result<Self, SignalError> {
        if name.is_empty() {
            return Err(SignalError::EmptyName);
        }
        if name.len() > ICON_NAME_MAX {
            return Err(SignalError::NameTooLong(name.len()));
        }
        if name.as_bytes().contains(&0) {
            return Err(SignalError::NameHasNul);
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IconName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Finish,
    Reload,
    ReloadIcons,
    IconAlert(IconName),
    Blur,
}

impl Signal {
    pub fn atom_name(&self) -> &'static str {
        match self {
            Signal::Finish => KSIG_FINISH,
            Signal::Reload => KSIG_RELOAD,
            Signal::ReloadIcons => KSIG_RELOAD_ICONS,
            Signal::IconAlert(_) => KSIG_ICON_ALERT,
            Signal::Blur => KSIG_BLUR,
        }
    }

    pub fn payload(&self) -> [u8; PAYLOAD_LEN] {
        let mut data = [0u8; PAYLOAD_LEN];
        if let Signal::IconAlert(name) = self {
            let bytes = name.as_str().as_bytes();
            data[..bytes.len()].copy_from_slice(bytes);
        }
        data
    }

    pub fn decode(atom_name: &str, payload: &[u8]) -> Result<Self, SignalError> {
        match atom_name {
            KSIG_FINISH => Ok(Signal::Finish),
            KSIG_RELOAD => Ok(Signal::Reload),
            KSIG_RELOAD_ICONS => Ok(Signal::ReloadIcons),
            KSIG_BLUR => Ok(Signal::Blur),
            KSIG_ICON_ALERT => {
                let field = &payload[..payload.len().min(ICON_NAME_MAX)];
                let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
                let name =
                    std::str::from_utf8(&field[..end]).map_err(|_| SignalError::NameNotUtf8)?;
                Ok(Signal::IconAlert(IconName::new(name)?))
            }
            other => Err(SignalError::Unknown(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icon_name_length_limits() {
        assert_eq!(IconName::new(""), Err(SignalError::EmptyName));
        assert!(IconName::new("sixteen-chars-ok").is_ok());
        assert_eq!(
            IconName::new("seventeen-chars-x"),
            Err(SignalError::NameTooLong(17))
        );
        assert_eq!(IconName::new("a\0b"), Err(SignalError::NameHasNul));
    }

    #[test]
    fn icon_alert_payload_is_nul_padded() {
        let sig = Signal::IconAlert(IconName::new("chromium").unwrap());
        let data = sig.payload();
        assert_eq!(&data[..8], b"chromium");
        assert!(data[8..].iter().all(|b| *b == 0));
        assert_eq!(sig.atom_name(), KSIG_ICON_ALERT);
    }

    #[test]
    fn decode_reads_name_up_to_nul() {
        let mut data = [0u8; PAYLOAD_LEN];
        data[..4].copy_from_slice(b"apps");
        assert_eq!(
            Signal::decode(KSIG_ICON_ALERT, &data),
            Ok(Signal::IconAlert(IconName::new("apps").unwrap()))
        );
    }

    #[test]
    fn decode_ignores_bytes_past_name_field() {
        let mut data = [b'x'; PAYLOAD_LEN];
        data[16..].copy_from_slice(b"junk");
        let Ok(Signal::IconAlert(name)) = Signal::decode(KSIG_ICON_ALERT, &data) else {
            panic!("expected icon alert");
        };
        assert_eq!(name.as_str().len(), ICON_NAME_MAX);
    }

    #[test]
    fn decode_plain_signals_ignore_payload() {
        let data = [0u8; PAYLOAD_LEN];
        assert_eq!(Signal::decode(KSIG_RELOAD, &data), Ok(Signal::Reload));
        assert_eq!(Signal::decode(KSIG_FINISH, &data), Ok(Signal::Finish));
        assert_eq!(Signal::decode(KSIG_RELOAD_ICONS, &data), Ok(Signal::ReloadIcons));
        assert_eq!(Signal::decode(KSIG_BLUR, &data), Ok(Signal::Blur));
    }

    #[test]
    fn decode_rejects_unknown_and_empty() {
        let data = [0u8; PAYLOAD_LEN];
        assert_eq!(
            Signal::decode("WM_PROTOCOLS", &data),
            Err(SignalError::Unknown("WM_PROTOCOLS".into()))
        );
        assert_eq!(
            Signal::decode(KSIG_ICON_ALERT, &data),
            Err(SignalError::EmptyName)
        );
    }
}
