//! Domain Module
//!
//! Appointment records plus the pure urgency and ranking rules applied on
//! every read of the local set.

pub mod ranking;
pub mod record;
pub mod urgency;

pub use ranking::{rank, rank_key, ranked, status_priority};
pub use record::{parse_calendar_day, parse_time_of_day, AppointmentRecord, ServiceStatus};
pub use urgency::{classify, days_until, Clock, FixedClock, SystemClock, UrgencyBucket};
