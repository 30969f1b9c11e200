//! Binary wire messages.
//!
//! Command envelopes and entity payloads are replicated between controllers;
//! the validation messages travel over a router's control channel. Field tags
//! are part of the wire contract and must never be reused.

use std::collections::HashMap;

/// Control channel content type of a terminator validation request.
pub const CONTENT_TYPE_VALIDATE_TERMINATORS_REQUEST: u32 = 1100;
/// Control channel content type of a terminator validation response.
pub const CONTENT_TYPE_VALIDATE_TERMINATORS_RESPONSE: u32 = 1101;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChangeContext {
    #[prost(map = "string, string", tag = "1")]
    pub attributes: HashMap<String, String>,
}

/// Outer frame of every replicated command. `entity_type` and `operation`
/// select the decoder for `payload`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandEnvelope {
    #[prost(string, tag = "1")]
    pub entity_type: String,
    #[prost(string, tag = "2")]
    pub operation: String,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateEntityCommand {
    #[prost(message, optional, tag = "1")]
    pub ctx: Option<ChangeContext>,
    #[prost(bytes = "vec", tag = "2")]
    pub entity_data: Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub flags: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateEntityCommand {
    #[prost(message, optional, tag = "1")]
    pub ctx: Option<ChangeContext>,
    #[prost(bytes = "vec", tag = "2")]
    pub entity_data: Vec<u8>,
    #[prost(string, repeated, tag = "3")]
    pub updated_fields: Vec<String>,
    /// When set, `updated_fields` is ignored and every field is written.
    #[prost(bool, tag = "4")]
    pub all_fields: bool,
    #[prost(uint32, tag = "5")]
    pub flags: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteEntityCommand {
    #[prost(message, optional, tag = "1")]
    pub ctx: Option<ChangeContext>,
    #[prost(string, tag = "2")]
    pub entity_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteTerminatorsBatchCommand {
    #[prost(message, optional, tag = "1")]
    pub ctx: Option<ChangeContext>,
    #[prost(string, repeated, tag = "2")]
    pub entity_ids: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Terminator {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub service_id: String,
    #[prost(string, tag = "3")]
    pub router_id: String,
    #[prost(string, tag = "4")]
    pub binding: String,
    #[prost(string, tag = "5")]
    pub address: String,
    #[prost(string, tag = "6")]
    pub instance_id: String,
    #[prost(bytes = "vec", tag = "7")]
    pub instance_secret: Vec<u8>,
    #[prost(uint32, tag = "8")]
    pub cost: u32,
    #[prost(uint32, tag = "9")]
    pub precedence: u32,
    #[prost(map = "uint32, bytes", tag = "10")]
    pub peer_data: HashMap<u32, Vec<u8>>,
    #[prost(map = "string, string", tag = "11")]
    pub tags: HashMap<String, String>,
    #[prost(string, tag = "12")]
    pub host_id: String,
    #[prost(bool, tag = "13")]
    pub is_system: bool,
    #[prost(uint32, tag = "14")]
    pub saved_precedence: u32,
    #[prost(string, tag = "15")]
    pub source_ctrl: String,
    #[prost(int64, tag = "16")]
    pub created_at: i64,
    #[prost(int64, tag = "17")]
    pub updated_at: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Service {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub terminator_strategy: String,
    #[prost(map = "string, string", tag = "4")]
    pub tags: HashMap<String, String>,
    #[prost(int64, tag = "5")]
    pub created_at: i64,
    #[prost(int64, tag = "6")]
    pub updated_at: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TerminatorInvalidReason {
    UnknownBinding = 0,
    UnknownTerminator = 1,
    BadState = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TerminatorRef {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub binding: String,
    #[prost(string, tag = "3")]
    pub address: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateTerminatorsRequest {
    #[prost(message, repeated, tag = "1")]
    pub terminators: Vec<TerminatorRef>,
    #[prost(bool, tag = "2")]
    pub fix_invalid: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouterTerminatorState {
    #[prost(bool, tag = "1")]
    pub valid: bool,
    #[prost(enumeration = "TerminatorInvalidReason", tag = "2")]
    pub reason: i32,
    #[prost(string, tag = "3")]
    pub detail: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateTerminatorsResponse {
    #[prost(map = "string, message", tag = "1")]
    pub states: HashMap<String, RouterTerminatorState>,
}
