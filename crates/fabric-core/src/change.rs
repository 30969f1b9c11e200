//! Change context: who and what initiated a mutation.
//!
//! Every replicated command carries a [`ChangeContext`] so that each replica
//! can attribute the change the same way the originating controller did.

use std::collections::BTreeMap;
use std::fmt;

use crate::proto;

const ATTR_AUTHOR_ID: &str = "author.id";
const ATTR_AUTHOR_NAME: &str = "author.name";
const ATTR_AUTHOR_TYPE: &str = "author.type";
const ATTR_SOURCE_TYPE: &str = "src.type";
const ATTR_SOURCE_AUTH: &str = "src.auth";
const ATTR_SOURCE_LOCAL: &str = "src.local";
const ATTR_SOURCE_REMOTE: &str = "src.remote";
const ATTR_SOURCE_METHOD: &str = "src.method";
const ATTR_CHANGE_ID: &str = "changeId";

/// Kind of actor that authored a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorType {
    Identity,
    Router,
    Controller,
    Unattributed,
}

impl AuthorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Router => "router",
            Self::Controller => "controller",
            Self::Unattributed => "unattributed",
        }
    }
}

/// Channel through which a change entered the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Rest,
    WebSocket,
    ControlChannel,
    Xt,
    Raft,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::WebSocket => "websocket",
            Self::ControlChannel => "ctrl.channel",
            Self::Xt => "xt",
            Self::Raft => "raft",
        }
    }
}

/// Actor and source metadata for a single change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeContext {
    attributes: BTreeMap<String, String>,
}

impl ChangeContext {
    /// Create a context with a fresh change id.
    pub fn new() -> Self {
        let mut ctx = Self::default();
        ctx.set(ATTR_CHANGE_ID, uuid::Uuid::now_v7().to_string());
        ctx
    }

    fn set(&mut self, key: &str, value: impl Into<String>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    pub fn with_author_id(mut self, id: impl Into<String>) -> Self {
        self.set(ATTR_AUTHOR_ID, id);
        self
    }

    pub fn with_author_name(mut self, name: impl Into<String>) -> Self {
        self.set(ATTR_AUTHOR_NAME, name);
        self
    }

    pub fn with_author_type(mut self, author_type: AuthorType) -> Self {
        self.set(ATTR_AUTHOR_TYPE, author_type.as_str());
        self
    }

    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.set(ATTR_SOURCE_TYPE, source_type.as_str());
        self
    }

    pub fn with_source_auth(mut self, auth: impl Into<String>) -> Self {
        self.set(ATTR_SOURCE_AUTH, auth);
        self
    }

    pub fn with_source_local(mut self, addr: impl Into<String>) -> Self {
        self.set(ATTR_SOURCE_LOCAL, addr);
        self
    }

    pub fn with_source_remote(mut self, addr: impl Into<String>) -> Self {
        self.set(ATTR_SOURCE_REMOTE, addr);
        self
    }

    pub fn with_source_method(mut self, method: impl Into<String>) -> Self {
        self.set(ATTR_SOURCE_METHOD, method);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn change_id(&self) -> Option<&str> {
        self.get(ATTR_CHANGE_ID)
    }

    pub fn author_id(&self) -> Option<&str> {
        self.get(ATTR_AUTHOR_ID)
    }

    pub fn author_type(&self) -> Option<&str> {
        self.get(ATTR_AUTHOR_TYPE)
    }

    pub fn source_type(&self) -> Option<&str> {
        self.get(ATTR_SOURCE_TYPE)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn to_proto(&self) -> proto::ChangeContext {
        proto::ChangeContext {
            attributes: self
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// A missing context on the wire decodes to an empty one.
    pub fn from_proto(msg: Option<&proto::ChangeContext>) -> Self {
        match msg {
            Some(msg) => Self {
                attributes: msg
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            },
            None => Self::default(),
        }
    }
}

impl fmt::Display for ChangeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.attributes {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}
