//! TAXII 1.1 protocol definitions.
//!
//! - binding identifiers and the sets this server negotiates (`bindings`)
//! - the typed message model (`messages`)
//! - the status taxonomy every failure collapses into (`status`)
//! - HTTP header negotiation before and after parsing (`negotiation`)
//! - the codec seam and its XML implementation (`codec`, `xml`)

pub mod bindings;
pub mod codec;
pub mod error;
pub mod messages;
pub mod negotiation;
pub mod status;
pub mod xml;

pub use {
    bindings::SupportedBindings,
    codec::MessageCodec,
    error::{Error, Result},
    messages::{Message, MessageType, generate_message_id},
    status::{StatusError, StatusKind, StatusType},
    xml::XmlCodec,
};
