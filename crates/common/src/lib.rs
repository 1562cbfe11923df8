//! Domain entities, content-binding matching, and the shared error type used
//! across all ctigate crates.

pub mod content_binding;
pub mod entities;
pub mod error;

pub use {
    content_binding::{ContentBinding, is_content_supported, match_bindings},
    error::{CtigateError, Error, FromMessage, Result},
};
