use std::collections::BTreeMap;
use std::fmt;

use fabric_command::Entity;
use fabric_core::types::{BINDING_TRANSPORT, BINDING_UDP};
use fabric_core::{proto, CoreError, Precedence, Tags};
use prost::Message;
use serde::Serialize;

use crate::db::{ReadTx, BUCKET_TERMINATORS};
use crate::error::StoreError;

pub const FIELD_TERMINATOR_SERVICE: &str = "service";
pub const FIELD_TERMINATOR_ROUTER: &str = "router";
pub const FIELD_TERMINATOR_BINDING: &str = "binding";
pub const FIELD_TERMINATOR_ADDRESS: &str = "address";
pub const FIELD_TERMINATOR_INSTANCE_ID: &str = "instanceId";
pub const FIELD_TERMINATOR_INSTANCE_SECRET: &str = "instanceSecret";
pub const FIELD_TERMINATOR_COST: &str = "cost";
pub const FIELD_TERMINATOR_PRECEDENCE: &str = "precedence";
pub const FIELD_TERMINATOR_PEER_DATA: &str = "peerData";
pub const FIELD_TERMINATOR_TAGS: &str = "tags";
pub const FIELD_TERMINATOR_HOST_ID: &str = "hostId";

/// Value reported when a related entity's name can't be resolved.
pub const UNKNOWN_NAME: &str = "unable to retrieve";

/// An endpoint where a service's traffic leaves the fabric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminator {
    pub id: String,
    pub service_id: String,
    /// Router hosting this terminator.
    pub router_id: String,
    /// How the router connects to `address`. Inferred when empty.
    pub binding: String,
    pub address: String,
    pub instance_id: String,
    pub instance_secret: Vec<u8>,
    pub cost: u16,
    pub precedence: Precedence,
    /// Precedence to restore once a failed terminator recovers.
    pub saved_precedence: Option<Precedence>,
    pub peer_data: BTreeMap<u32, Vec<u8>>,
    pub tags: Tags,
    pub host_id: String,
    pub is_system: bool,
    /// Controller that created the terminator.
    pub source_ctrl: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Terminator {
    pub fn new(
        id: impl Into<String>,
        service_id: impl Into<String>,
        router_id: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            service_id: service_id.into(),
            router_id: router_id.into(),
            binding: String::new(),
            address: address.into(),
            instance_id: String::new(),
            instance_secret: Vec::new(),
            cost: 0,
            precedence: Precedence::Default,
            saved_precedence: None,
            peer_data: BTreeMap::new(),
            tags: Tags::new(),
            host_id: String::new(),
            is_system: false,
            source_ctrl: String::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn with_binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = binding.into();
        self
    }

    pub fn with_cost(mut self, cost: u16) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_precedence(mut self, precedence: Precedence) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn with_host_id(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = host_id.into();
        self
    }

    /// Fills in an empty binding from the address scheme.
    pub fn check_binding(&mut self) {
        if self.binding.is_empty() {
            self.binding = if self.address.starts_with("udp:") {
                BINDING_UDP.to_string()
            } else {
                BINDING_TRANSPORT.to_string()
            };
        }
    }

    pub fn to_proto(&self) -> proto::Terminator {
        proto::Terminator {
            id: self.id.clone(),
            service_id: self.service_id.clone(),
            router_id: self.router_id.clone(),
            binding: self.binding.clone(),
            address: self.address.clone(),
            instance_id: self.instance_id.clone(),
            instance_secret: self.instance_secret.clone(),
            cost: u32::from(self.cost),
            precedence: self.precedence.to_wire(),
            peer_data: self
                .peer_data
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            tags: self
                .tags
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            host_id: self.host_id.clone(),
            is_system: self.is_system,
            saved_precedence: Precedence::saved_to_wire(self.saved_precedence),
            source_ctrl: self.source_ctrl.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn from_proto(msg: proto::Terminator) -> Result<Self, CoreError> {
        let cost = u16::try_from(msg.cost).map_err(|_| {
            CoreError::validation(FIELD_TERMINATOR_COST, format!("{} exceeds 65535", msg.cost))
        })?;
        Ok(Self {
            id: msg.id,
            service_id: msg.service_id,
            router_id: msg.router_id,
            binding: msg.binding,
            address: msg.address,
            instance_id: msg.instance_id,
            instance_secret: msg.instance_secret,
            cost,
            precedence: Precedence::from_wire(msg.precedence),
            saved_precedence: Precedence::saved_from_wire(msg.saved_precedence),
            peer_data: msg.peer_data.into_iter().collect(),
            tags: msg.tags.into_iter().collect(),
            host_id: msg.host_id,
            is_system: msg.is_system,
            source_ctrl: msg.source_ctrl,
            created_at: msg.created_at,
            updated_at: msg.updated_at,
        })
    }

    pub fn marshal(&self) -> Vec<u8> {
        self.to_proto().encode_to_vec()
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self, CoreError> {
        Self::from_proto(proto::Terminator::decode(data)?)
    }

    pub(crate) fn load(tx: &impl ReadTx, id: &str) -> Result<Option<Self>, StoreError> {
        let Some(data) = tx.get(BUCKET_TERMINATORS, id) else {
            return Ok(None);
        };
        Self::unmarshal(&data)
            .map(Some)
            .map_err(|err| StoreError::Corrupt {
                bucket: BUCKET_TERMINATORS.into(),
                key: id.into(),
                reason: err.to_string(),
            })
    }
}

impl Entity for Terminator {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Selects terminators by attribute. Unset criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct TerminatorFilter {
    pub service_id: Option<String>,
    pub router_id: Option<String>,
    pub binding: Option<String>,
    pub host_id: Option<String>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl TerminatorFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_service(service_id: impl Into<String>) -> Self {
        Self {
            service_id: Some(service_id.into()),
            ..Self::default()
        }
    }

    pub fn for_router(router_id: impl Into<String>) -> Self {
        Self {
            router_id: Some(router_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, terminator: &Terminator) -> bool {
        fn check(expected: &Option<String>, actual: &str) -> bool {
            expected.as_deref().map_or(true, |e| e == actual)
        }
        check(&self.service_id, &terminator.service_id)
            && check(&self.router_id, &terminator.router_id)
            && check(&self.binding, &terminator.binding)
            && check(&self.host_id, &terminator.host_id)
    }
}

/// Outcome of validating one terminator against its router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminatorState {
    Valid,
    InvalidUnknownBinding,
    InvalidUnknownTerminator,
    InvalidBadState,
    /// The router couldn't be asked or didn't answer.
    Unknown,
}

impl TerminatorState {
    pub fn from_reason(reason: proto::TerminatorInvalidReason) -> Self {
        match reason {
            proto::TerminatorInvalidReason::UnknownBinding => Self::InvalidUnknownBinding,
            proto::TerminatorInvalidReason::UnknownTerminator => Self::InvalidUnknownTerminator,
            proto::TerminatorInvalidReason::BadState => Self::InvalidBadState,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(
            self,
            Self::InvalidUnknownBinding | Self::InvalidUnknownTerminator | Self::InvalidBadState
        )
    }
}

impl fmt::Display for TerminatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Valid => "valid",
            Self::InvalidUnknownBinding => "invalid_unknown_binding",
            Self::InvalidUnknownTerminator => "invalid_unknown_terminator",
            Self::InvalidBadState => "invalid_bad_state",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Per-terminator validation report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminatorDetail {
    pub terminator_id: String,
    pub service_id: String,
    pub service_name: String,
    pub router_id: String,
    pub router_name: String,
    pub binding: String,
    pub address: String,
    pub host_id: String,
    /// RFC 3339 creation time.
    pub create_date: String,
    pub state: TerminatorState,
    /// Whether an invalid terminator was removed.
    pub fixed: bool,
    pub detail: String,
}

impl TerminatorDetail {
    pub(crate) fn new(terminator: &Terminator) -> Self {
        let create_date =
            chrono::DateTime::<chrono::Utc>::from_timestamp_millis(terminator.created_at)
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_default();
        Self {
            terminator_id: terminator.id.clone(),
            service_id: terminator.service_id.clone(),
            service_name: UNKNOWN_NAME.to_string(),
            router_id: terminator.router_id.clone(),
            router_name: UNKNOWN_NAME.to_string(),
            binding: terminator.binding.clone(),
            address: terminator.address.clone(),
            host_id: terminator.host_id.clone(),
            create_date,
            state: TerminatorState::Unknown,
            fixed: false,
            detail: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_binding() {
        let mut t = Terminator::new("t1", "s1", "r1", "udp:10.0.0.1:53");
        t.check_binding();
        assert_eq!(t.binding, "udp");

        let mut t = Terminator::new("t2", "s1", "r1", "tcp:10.0.0.1:80");
        t.check_binding();
        assert_eq!(t.binding, "transport");

        let mut t = Terminator::new("t3", "s1", "r1", "udp:10.0.0.1:53").with_binding("edge");
        t.check_binding();
        assert_eq!(t.binding, "edge");
    }

    #[test]
    fn test_marshal_preserves_every_field() {
        let mut t = Terminator::new("t1", "s1", "r1", "tcp:localhost:8080")
            .with_binding("transport")
            .with_cost(250)
            .with_precedence(Precedence::Failed)
            .with_host_id("h1");
        t.instance_id = "i1".into();
        t.instance_secret = vec![1, 2, 3];
        t.saved_precedence = Some(Precedence::Required);
        t.peer_data.insert(7, b"peer".to_vec());
        t.tags.insert("env".into(), "prod".into());
        t.is_system = true;
        t.source_ctrl = "ctrl-1".into();
        t.created_at = 1_700_000_000_000;
        t.updated_at = 1_700_000_000_500;

        let decoded = Terminator::unmarshal(&t.marshal()).unwrap();
        assert_eq!(decoded, t);
    }

    #[test]
    fn test_precedence_encodes_on_the_wire() {
        let t = Terminator::new("t1", "s1", "r1", "a").with_precedence(Precedence::Required);
        assert_eq!(t.to_proto().precedence, 2);
        let t = t.with_precedence(Precedence::Failed);
        assert_eq!(t.to_proto().precedence, 1);
        let t = t.with_precedence(Precedence::Default);
        assert_eq!(t.to_proto().precedence, 0);
    }

    #[test]
    fn test_unknown_precedence_decodes_as_default() {
        let mut msg = Terminator::new("t1", "s1", "r1", "a")
            .with_precedence(Precedence::Required)
            .to_proto();
        msg.precedence = 9;
        let t = Terminator::from_proto(msg).unwrap();
        assert_eq!(t.precedence, Precedence::Default);
        assert_eq!(t.saved_precedence, None);
    }

    #[test]
    fn test_filter_matches() {
        let t = Terminator::new("t1", "s1", "r1", "a")
            .with_binding("transport")
            .with_host_id("h1");
        assert!(TerminatorFilter::all().matches(&t));
        assert!(TerminatorFilter::for_service("s1").matches(&t));
        assert!(!TerminatorFilter::for_service("s2").matches(&t));
        assert!(TerminatorFilter::for_router("r1").matches(&t));

        let filter = TerminatorFilter {
            binding: Some("udp".into()),
            ..TerminatorFilter::default()
        };
        assert!(!filter.matches(&t));
    }

    #[test]
    fn test_detail_defaults_names() {
        let mut t = Terminator::new("t1", "s1", "r1", "a");
        t.created_at = 0;
        let detail = TerminatorDetail::new(&t);
        assert_eq!(detail.service_name, UNKNOWN_NAME);
        assert_eq!(detail.router_name, UNKNOWN_NAME);
        assert_eq!(detail.state, TerminatorState::Unknown);
        assert!(detail.create_date.starts_with("1970-01-01T00:00:00"));
    }
}
