//! Reconciliation Store
//!
//! Local copy of the viewer's appointment set. Two writers feed it: full
//! replacements from fetches and patches from the live channel. Fetches are
//! tagged with a sequence number so a slow, stale response can never wipe out
//! newer data, and patches that land while a fetch is outstanding are
//! replayed on top of that fetch's result.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::NaiveDate;
use tracing::debug;

use crate::domain::{classify, ranked, AppointmentRecord, ServiceStatus, UrgencyBucket};
use crate::error::AgendaError;

use super::normalizer::{Patch, PatchFields};

/// Handle for one issued fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FetchTicket(u64);

impl FetchTicket {
    pub fn seq(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Applied { replayed: usize },
    /// A newer fetch was already applied.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    /// Record not in the local set (yet).
    NotFound,
}

/// Status filter; `All` matches everything ("todos").
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Only(ServiceStatus),
}

impl StatusFilter {
    fn matches(&self, status: &ServiceStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(wanted) => wanted == status,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = AgendaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "todos" | "all" | "" => Ok(StatusFilter::All),
            _ => Ok(StatusFilter::Only(ServiceStatus::parse(s.trim()))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UrgencyFilter {
    #[default]
    All,
    Only(UrgencyBucket),
}

impl UrgencyFilter {
    fn matches(&self, bucket: UrgencyBucket) -> bool {
        match self {
            UrgencyFilter::All => true,
            UrgencyFilter::Only(wanted) => *wanted == bucket,
        }
    }
}

impl FromStr for UrgencyFilter {
    type Err = AgendaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "todos" | "all" | "" => Ok(UrgencyFilter::All),
            other => other.parse().map(UrgencyFilter::Only),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewFilter {
    pub status: StatusFilter,
    pub urgency: UrgencyFilter,
}

impl ViewFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse the two filter selectors, e.g. `("todos", "urgente")`.
    pub fn parse(status: &str, urgency: &str) -> Result<Self, AgendaError> {
        Ok(Self {
            status: status.parse()?,
            urgency: urgency.parse()?,
        })
    }
}

#[derive(Debug, Clone)]
struct JournalEntry {
    /// Highest ticket issued when the patch arrived.
    issued_at_arrival: u64,
    patch: Patch,
}

#[derive(Debug, Default)]
pub struct ReconciliationStore {
    records: Vec<AppointmentRecord>,
    next_seq: u64,
    last_applied: Option<u64>,
    in_flight: BTreeSet<u64>,
    journal: Vec<JournalEntry>,
}

impl ReconciliationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.next_seq += 1;
        self.in_flight.insert(self.next_seq);
        debug!("Fetch #{} issued", self.next_seq);
        FetchTicket(self.next_seq)
    }

    /// Forget a fetch that failed; its patches stay journalled for any
    /// older fetch still outstanding.
    pub fn abandon_fetch(&mut self, ticket: FetchTicket) {
        self.in_flight.remove(&ticket.0);
        self.prune_journal();
    }

    pub fn replace_all(&mut self, ticket: FetchTicket, records: Vec<AppointmentRecord>) -> ReplaceOutcome {
        self.in_flight.remove(&ticket.0);

        if self.last_applied.is_some_and(|last| ticket.0 <= last) {
            debug!("Discarding stale fetch #{} (last applied #{:?})", ticket.0, self.last_applied);
            self.prune_journal();
            return ReplaceOutcome::Discarded;
        }

        let mut fresh: Vec<AppointmentRecord> = Vec::with_capacity(records.len());
        for record in records {
            match fresh.iter_mut().find(|r| r.service_id == record.service_id) {
                Some(existing) => *existing = record,
                None => fresh.push(record),
            }
        }
        self.records = fresh;
        self.last_applied = Some(ticket.0);

        // Patches that arrived after this fetch was issued may be missing
        // from its response.
        let replay: Vec<Patch> = self
            .journal
            .iter()
            .filter(|e| e.issued_at_arrival >= ticket.0)
            .map(|e| e.patch.clone())
            .collect();
        for patch in &replay {
            self.merge(patch);
        }

        self.prune_journal();
        debug!("Fetch #{} applied ({} records, {} replayed)", ticket.0, self.records.len(), replay.len());
        ReplaceOutcome::Applied {
            replayed: replay.len(),
        }
    }

    pub fn apply_patch(&mut self, patch: &Patch) -> PatchOutcome {
        if !self.in_flight.is_empty() {
            self.journal.push(JournalEntry {
                issued_at_arrival: self.next_seq,
                patch: patch.clone(),
            });
        }
        if self.merge(patch) {
            PatchOutcome::Applied
        } else {
            debug!("Patch for unknown service {} left for next fetch", patch.service_id);
            PatchOutcome::NotFound
        }
    }

    pub fn get(&self, service_id: &str) -> Option<&AppointmentRecord> {
        self.records.iter().find(|r| r.service_id == service_id)
    }

    /// Records in storage order.
    pub fn records(&self) -> &[AppointmentRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_fetch_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Filtered and ranked snapshot for presentation.
    pub fn view(&self, filter: &ViewFilter, today: NaiveDate) -> Vec<AppointmentRecord> {
        let visible = self
            .records
            .iter()
            .filter(|r| filter.status.matches(&r.status))
            .filter(|r| filter.urgency.matches(classify(r.date, today)))
            .cloned()
            .collect();
        ranked(visible, today)
    }

    fn merge(&mut self, patch: &Patch) -> bool {
        let Some(record) = self.records.iter_mut().find(|r| r.service_id == patch.service_id) else {
            return false;
        };
        let PatchFields { status, value, rated } = &patch.fields;
        if let Some(status) = status {
            record.status = status.clone();
        }
        if let Some(value) = value {
            record.value = Some(*value);
        }
        if let Some(rated) = rated {
            record.rated = *rated;
        }
        true
    }

    /// Drop journal entries no outstanding or future fetch can need.
    fn prune_journal(&mut self) {
        match self.in_flight.iter().next().copied() {
            None => self.journal.clear(),
            Some(oldest) => self.journal.retain(|e| e.issued_at_arrival >= oldest),
        }
    }
}
