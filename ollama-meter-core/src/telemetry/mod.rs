//! Usage telemetry: record building and background submission.
//!
//! A record is built once per completed call (once per stream, at its end)
//! and handed to a [`DispatchHandle`], which submits it off the caller's path.

pub mod dispatch;
pub mod keys;
pub mod record;
#[cfg(test)]
pub mod test_span;

pub use dispatch::{DispatchHandle, ShutdownSignal};
pub use keys::*;
pub use record::*;
