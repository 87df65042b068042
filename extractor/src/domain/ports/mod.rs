//! Driven ports at the fetch boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod mirror_transport;
mod response_sink;
mod staging_store;

pub use mirror_transport::{MirrorAttemptError, MirrorRequest, MirrorTransport, TransferSummary};
pub use response_sink::{ResponseSink, SinkError};
pub use staging_store::{StagedArtifact, StagingError, StagingStore};
