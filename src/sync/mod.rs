//! Sync Module
//!
//! Event normalisation, the reconciliation store, and patch subscriptions.

pub mod hub;
pub mod normalizer;
pub mod store;

pub use hub::{PatchHub, Subscription};
pub use normalizer::{
    EventNormalizer, Inbound, Interest, Patch, PatchFields, EVENT_NEW_APPOINTMENT,
    EVENT_STATUS_CHANGED, EVENT_VALUE_CHANGED,
};
pub use store::{
    FetchTicket, PatchOutcome, ReconciliationStore, ReplaceOutcome, StatusFilter, UrgencyFilter,
    ViewFilter,
};
