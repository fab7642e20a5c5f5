//! Client-side product analytics.
//!
//! A [`Reporter`] turns page signals and explicit tracking calls into
//! [`EventRecord`]s and hands them to a [`Transport`] without ever making
//! the caller wait. Besides plain interaction events it derives a few
//! frustration signals on its own:
//!
//! - rage clicks (three clicks close together within two seconds)
//! - dropdown thrashing (opening the sort menu without picking anything)
//! - quick bounces versus ordinary session ends at teardown
//!
//! Hosts with more than one thread run the reporter behind
//! [`spawn_reporter`] and talk to it through a [`ReporterHandle`].

pub mod actor;
pub mod error;
pub mod event;
pub mod frustration;
pub mod reporter;
pub mod session;
pub mod transport;

pub use actor::{spawn_reporter, spawn_reporter_with_interval, ReporterHandle, ReporterStats};
pub use error::TelemetryError;
pub use event::{EventRecord, EventType, PageContext};
pub use reporter::{ClickSignal, Reporter, Signal, SignalKind, UserAction};
pub use session::{
    resolve_session_id, FileSessionStorage, MemorySessionStorage, SessionStorage, SESSION_KEY,
};
pub use transport::{HttpTransport, TelemetrySettings, Transport};
