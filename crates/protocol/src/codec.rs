//! The seam between the request pipeline and the wire format.

use crate::{
    bindings::{PROTOCOL_BINDINGS, SERVICE_BINDINGS},
    error::Result,
    messages::Message,
    status::StatusError,
};

/// Parses and serializes protocol messages for one or more message bindings.
pub trait MessageCodec: Send + Sync {
    /// Message bindings (`X-TAXII-Content-Type` values) this codec handles.
    fn message_bindings(&self) -> &'static [&'static str];

    fn protocol_bindings(&self) -> &'static [&'static str] {
        PROTOCOL_BINDINGS
    }

    fn service_bindings(&self) -> &'static [&'static str] {
        SERVICE_BINDINGS
    }

    /// Decode `body` declared as `content_type`. Every failure is a
    /// `BadMessage` status without correlation.
    fn parse(&self, content_type: &str, body: &[u8]) -> std::result::Result<Message, StatusError>;

    fn serialize(&self, message: &Message) -> Result<Vec<u8>>;
}
