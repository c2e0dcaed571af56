//! Real-time appointment sync for the services marketplace client.
//!
//! - Fetches a viewer's appointments from the REST backend
//! - Merges live status/value pushes from the Socket.IO channel
//! - Ranks and filters the local set by urgency and status

pub mod backend;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod live;
pub mod notify;
pub mod session;
pub mod sync;

// Re-exports for convenience
pub use config::{AgendaConfig, ReconnectPolicy, Viewer, ViewerRole};
pub use domain::{AppointmentRecord, ServiceStatus, UrgencyBucket};
pub use error::{AgendaError, Result};
pub use session::{AgendaSession, AgendaSessionBuilder};
pub use sync::{Interest, Patch, ViewFilter};
