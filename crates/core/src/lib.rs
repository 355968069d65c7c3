//! Pure building blocks of the RESP conformance harness: the wire codec,
//! the static source inspector, and the stage/outcome domain types.

pub mod codec;
pub mod domain;
pub mod error;
pub mod inspector;

pub use domain::*;
pub use error::{CoreError, Result};
pub use inspector::SourceInspector;
