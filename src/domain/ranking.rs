//! Display ordering for appointment lists.

use chrono::NaiveDate;

use super::record::{AppointmentRecord, ServiceStatus};
use super::urgency::days_until;

/// Tie-break priority for records on the same day. Lower sorts first.
///
/// The table is kept exactly as the backend's clients have always ranked
/// statuses: "Aguardando pagamento" sits between "Em Andamento" and
/// "concluido", and refused or unrecognised statuses share the last slot.
pub fn status_priority(status: &ServiceStatus) -> u8 {
    match status {
        ServiceStatus::Pending => 1,
        ServiceStatus::ConfirmValue => 2,
        ServiceStatus::Confirmed => 3,
        ServiceStatus::InProgress => 4,
        ServiceStatus::AwaitingPayment => 5,
        ServiceStatus::Completed => 6,
        ServiceStatus::Cancelled => 7,
        ServiceStatus::Refused | ServiceStatus::Unrecognized(_) => 8,
    }
}

pub fn rank_key(record: &AppointmentRecord, today: NaiveDate) -> (i64, u8) {
    (days_until(record.date, today), status_priority(&record.status))
}

/// Sort in place: nearest day first, then by status priority. Stable.
pub fn rank(records: &mut [AppointmentRecord], today: NaiveDate) {
    records.sort_by_cached_key(|r| rank_key(r, today));
}

pub fn ranked(mut records: Vec<AppointmentRecord>, today: NaiveDate) -> Vec<AppointmentRecord> {
    rank(&mut records, today);
    records
}
