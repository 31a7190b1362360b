//! Scheme-dispatched sinks for the `gojob` engine.
//!
//! A [`Sink`] is a write-closable destination selected by a small scheme
//! table (`-`, ``, `s3://...`, or a bare filesystem path) and a matching
//! read-side (`open_read`) used by the host's own input-reading code.
//! [`recorder::spawn_recorder`] drains a typed channel into a `Sink` as
//! newline-delimited JSON.

mod object_store;
mod recorder;
mod sink;

pub use object_store::ObjectStoreUrl;
pub use recorder::spawn_recorder;
pub use sink::{Sink, SinkError};
