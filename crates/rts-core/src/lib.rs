//! Domain types, wire format, and error taxonomy shared by every
//! RuntimeScope collector crate.

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod normalize;
pub mod project;
pub mod session;

pub use command::{Command, CommandOutcome, PendingCommand};
pub use config::{current_env_map, interpolate_env, CollectorConfig};
pub use error::{CollectorError, ErrorKind, Result};
pub use event::{
    BuildMeta, ConsoleEvent, ConsoleLevel, DatabaseEvent, DbOperation, DbSource, DomSnapshotEvent,
    Event, EventBody, EventKind, NetworkEvent, PerformanceEvent, RenderEvent, RenderProfile,
    ScrollPosition, SessionEvent, StateEvent, StatePhase, VitalRating, Viewport,
};
pub use project::{GlobalConfig, InfrastructureConfig, Project, ProjectConfig, ProjectSettings};
pub use session::{Session, SessionInfo};
