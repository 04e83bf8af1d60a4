use std::fmt::Display;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum security accepted when associating with an access point
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Open,
    #[default]
    Wpa2Psk,
    Wpa3Psk,
}

#[derive(Debug, Error)]
#[error("unknown auth mode '{0}', expected one of: open, wpa2-psk, wpa3-psk")]
pub struct InvalidAuthMode(String);

impl FromStr for AuthMode {
    type Err = InvalidAuthMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "wpa2-psk" | "wpa2" => Ok(Self::Wpa2Psk),
            "wpa3-psk" | "wpa3" => Ok(Self::Wpa3Psk),
            _ => Err(InvalidAuthMode(s.to_owned())),
        }
    }
}

/// Network credentials handed to the network stack on every connection
/// request
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
    pub auth_threshold: AuthMode,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .field("auth_threshold", &self.auth_threshold)
            .finish()
    }
}

/// Reason code reported by the network stack when the link is lost.
///
/// Codes below 200 follow IEEE 802.11 reason codes, higher values are
/// reported by the stack itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisconnectReason(pub u16);

impl DisconnectReason {
    pub const UNSPECIFIED: Self = Self(1);
    pub const AUTH_EXPIRE: Self = Self(2);
    pub const ASSOC_LEAVE: Self = Self(8);
    pub const BEACON_TIMEOUT: Self = Self(200);
    pub const NO_AP_FOUND: Self = Self(201);
    pub const AUTH_FAIL: Self = Self(202);
    pub const ASSOC_FAIL: Self = Self(203);
    pub const HANDSHAKE_TIMEOUT: Self = Self(204);
    pub const CONNECTION_FAIL: Self = Self(205);
    pub const CONNECT_ATTEMPT_TIMEOUT: Self = Self(252);
    pub const REQUEST_FAILED: Self = Self(254);

    fn name(&self) -> Option<&'static str> {
        let name = match *self {
            Self::UNSPECIFIED => "unspecified",
            Self::AUTH_EXPIRE => "auth expired",
            Self::ASSOC_LEAVE => "association left",
            Self::BEACON_TIMEOUT => "beacon timeout",
            Self::NO_AP_FOUND => "no access point found",
            Self::AUTH_FAIL => "authentication failed",
            Self::ASSOC_FAIL => "association failed",
            Self::HANDSHAKE_TIMEOUT => "handshake timeout",
            Self::CONNECTION_FAIL => "connection failed",
            Self::CONNECT_ATTEMPT_TIMEOUT => "connect attempt timed out",
            Self::REQUEST_FAILED => "connect request failed",
            _ => return None,
        };
        Some(name)
    }
}

impl Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({name})", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Events emitted by the network stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Credentials accepted and the link layer is associated
    LinkUp,
    /// The link was lost or could not be established
    LinkDown(DisconnectReason),
    /// An address was assigned to the interface
    AddressAcquired(IpAddr),
}

#[derive(Debug, Error)]
pub enum StackError {
    #[error("network stack is no longer running")]
    Closed,

    #[error("request rejected by the network stack: {0}")]
    Rejected(String),
}

/// The underlying network stack.
///
/// Requests are non-blocking, their results are reported back as
/// [`LinkEvent`]s on the channel the stack was created with.
pub trait NetworkStack {
    /// Ask the stack to associate using the given credentials
    fn request_connect(&self, credentials: &Credentials) -> Result<(), StackError>;

    /// Ask the stack to acquire an address for the associated link.
    ///
    /// Stacks that run address acquisition on their own can keep the default.
    fn request_address(&self) -> Result<(), StackError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_formats_known_reasons() {
        assert_eq!(
            DisconnectReason::AUTH_FAIL.to_string(),
            "202 (authentication failed)"
        );
        assert_eq!(DisconnectReason(77).to_string(), "77");
    }

    #[test]
    fn it_parses_auth_modes() {
        assert_eq!("wpa2-psk".parse::<AuthMode>().unwrap(), AuthMode::Wpa2Psk);
        assert_eq!("OPEN".parse::<AuthMode>().unwrap(), AuthMode::Open);
        assert!("wep".parse::<AuthMode>().is_err());
    }

    #[test]
    fn it_redacts_the_password() {
        let creds = Credentials {
            ssid: "SBC".into(),
            password: "secret".into(),
            auth_threshold: AuthMode::Wpa2Psk,
        };
        let debug = format!("{creds:?}");
        assert!(debug.contains("SBC"));
        assert!(!debug.contains("secret"));
    }
}
