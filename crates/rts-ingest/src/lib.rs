//! Framed TCP ingest server: connection state machine, pending-command
//! dispatch, and the accept loop — C4 of the collector.

pub mod codec;
pub mod connection;
pub mod pending;
pub mod server;

pub use codec::{Frame, FrameCodec, FrameType};
pub use connection::{ConnectionHandle, ConnectionState, ConnectionTable};
pub use pending::PendingCommandTable;
pub use server::IngestServer;
