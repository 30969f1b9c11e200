use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::CoreError;

/// Free-form entity tags.
pub type Tags = BTreeMap<String, String>;

/// Binding used for terminators addressed with a `udp:` prefix.
pub const BINDING_UDP: &str = "udp";
/// Binding used for every other terminator address.
pub const BINDING_TRANSPORT: &str = "transport";

/// Milliseconds since the UNIX epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Priority class of a terminator, consulted by routing strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Precedence {
    /// Normal selection.
    #[default]
    Default,
    /// Always preferred over default and failed terminators.
    Required,
    /// Only used when nothing better exists.
    Failed,
}

impl Precedence {
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }

    pub fn is_required(&self) -> bool {
        matches!(self, Self::Required)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Selection rank: lower ranks win.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Required => 0,
            Self::Default => 1,
            Self::Failed => 2,
        }
    }

    /// Wire value: 0 default, 1 failed, 2 required.
    pub fn to_wire(self) -> u32 {
        match self {
            Self::Default => 0,
            Self::Failed => 1,
            Self::Required => 2,
        }
    }

    /// Unknown values decode as [`Precedence::Default`].
    pub fn from_wire(value: u32) -> Self {
        match value {
            1 => Self::Failed,
            2 => Self::Required,
            _ => Self::Default,
        }
    }

    /// Wire value of an optional saved precedence. Zero means nothing was
    /// saved, so an explicitly saved default is carried as 3.
    pub fn saved_to_wire(saved: Option<Precedence>) -> u32 {
        match saved {
            None => 0,
            Some(Self::Failed) => 1,
            Some(Self::Required) => 2,
            Some(Self::Default) => 3,
        }
    }

    /// Non-zero values that are not known decode as a saved
    /// [`Precedence::Default`].
    pub fn saved_from_wire(value: u32) -> Option<Self> {
        match value {
            0 => None,
            1 => Some(Self::Failed),
            2 => Some(Self::Required),
            _ => Some(Self::Default),
        }
    }
}

impl fmt::Display for Precedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Required => write!(f, "required"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A link listener advertised by a router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    /// Dialable address, e.g. `tls:10.0.0.1:6000`.
    pub address: String,
    /// Link protocol, e.g. `tls`.
    pub protocol: String,
    #[serde(default)]
    pub cost_tags: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Listener {
    pub fn new(address: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            protocol: protocol.into(),
            cost_tags: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Builds a listener from an address, taking the protocol from the scheme
    /// prefix (`tls:host:port` → `tls`).
    pub fn from_address(address: impl Into<String>) -> Result<Self, CoreError> {
        let address = address.into();
        let protocol = match address.split_once(':') {
            Some((protocol, rest)) if !protocol.is_empty() && !rest.is_empty() => {
                protocol.to_string()
            }
            _ => {
                return Err(CoreError::validation(
                    "address",
                    format!("missing protocol prefix in {address}"),
                ))
            }
        };
        Ok(Self::new(address, protocol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_wire_values() {
        assert_eq!(Precedence::Default.to_wire(), 0);
        assert_eq!(Precedence::Failed.to_wire(), 1);
        assert_eq!(Precedence::Required.to_wire(), 2);

        for p in [Precedence::Default, Precedence::Failed, Precedence::Required] {
            assert_eq!(Precedence::from_wire(p.to_wire()), p);
        }
        assert_eq!(Precedence::from_wire(7), Precedence::Default);
    }

    #[test]
    fn test_saved_precedence_distinguishes_none_from_default() {
        assert_eq!(Precedence::saved_to_wire(None), 0);
        assert_eq!(Precedence::saved_to_wire(Some(Precedence::Default)), 3);
        assert_eq!(Precedence::saved_from_wire(0), None);
        assert_eq!(Precedence::saved_from_wire(3), Some(Precedence::Default));
        assert_eq!(Precedence::saved_from_wire(1), Some(Precedence::Failed));
        assert_eq!(Precedence::saved_from_wire(42), Some(Precedence::Default));
    }

    #[test]
    fn test_precedence_rank() {
        assert!(Precedence::Required.rank() < Precedence::Default.rank());
        assert!(Precedence::Default.rank() < Precedence::Failed.rank());
    }

    #[test]
    fn test_listener_from_address() {
        let l = Listener::from_address("tls:10.0.0.1:6000").unwrap();
        assert_eq!(l.protocol, "tls");
        assert_eq!(l.address, "tls:10.0.0.1:6000");

        assert!(Listener::from_address("no-protocol").is_err());
        assert!(Listener::from_address(":1234").is_err());
    }
}
