//! Query & Stream Facade (C5): the loopback HTTP API, the live
//! WebSocket relay, and command pass-through to the ingest server.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use error::ApiError;
pub use state::AppState;
