//! Diff between freshly extracted appointments and the persisted checksum cache.
//!
//! Planning is pure: it decides what to create and delete without touching the network.
//! The sync service executes the plan and hands the outcome back to [`next_cache`].

use crate::domain::models::{Appointment, EventOptions};
use crate::infrastructure::checksum_cache::CacheEntry;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::appointment_checksum;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedAppointment {
    pub checksum: String,
    pub appointment: Appointment,
}

/// Cache entry whose appointment no longer appears in the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleEntry {
    pub checksum: String,
    pub entry: CacheEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Appointments already on the calendar, bound to their cached remote id.
    pub unchanged: Vec<TrackedAppointment>,
    pub to_create: Vec<TrackedAppointment>,
    pub to_delete: Vec<StaleEntry>,
    pub skipped_historic: usize,
    pub retained_historic: usize,
    pub duplicates: usize,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Computes checksums for extracted appointments.
pub fn track_appointments(
    appointments: Vec<Appointment>,
    options: &EventOptions,
) -> Result<Vec<TrackedAppointment>, InfraError> {
    appointments
        .into_iter()
        .map(|appointment| {
            Ok(TrackedAppointment {
                checksum: appointment_checksum(&appointment, options)?,
                appointment,
            })
        })
        .collect()
}

pub fn local_today(time_zone: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&time_zone).date_naive()
}

pub fn plan_reconciliation(
    extracted: Vec<TrackedAppointment>,
    mut cache: HashMap<String, CacheEntry>,
    time_zone: Tz,
    now: DateTime<Utc>,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let mut seen = HashSet::new();

    for mut tracked in extracted {
        if !seen.insert(tracked.checksum.clone()) {
            debug!(checksum = %tracked.checksum, title = %tracked.appointment.title, "duplicate appointment in schedule");
            plan.duplicates += 1;
            continue;
        }

        if let Some(entry) = cache.remove(&tracked.checksum) {
            tracked.appointment.remote_event_id = Some(entry.remote_event_id);
            plan.unchanged.push(tracked);
        } else if tracked.appointment.is_historic(time_zone, now) {
            plan.skipped_historic += 1;
        } else {
            plan.to_create.push(tracked);
        }
    }

    let mut stale: Vec<StaleEntry> = cache
        .into_iter()
        .filter_map(|(checksum, entry)| {
            if entry.historic {
                plan.retained_historic += 1;
                None
            } else {
                Some(StaleEntry { checksum, entry })
            }
        })
        .collect();
    stale.sort_by(|left, right| left.checksum.cmp(&right.checksum));
    plan.to_delete = stale;
    plan
}

/// Cache contents after a run: every non-historic appointment bound to a remote id, plus
/// entries whose delete failed so the next run retries them.
pub fn next_cache<'a, I>(
    bound: I,
    failed_deletes: &[StaleEntry],
    time_zone: Tz,
    now: DateTime<Utc>,
) -> BTreeMap<String, CacheEntry>
where
    I: IntoIterator<Item = &'a TrackedAppointment>,
{
    let today = local_today(time_zone, now);
    let mut entries = BTreeMap::new();

    for tracked in bound {
        let appointment = &tracked.appointment;
        let Some(remote_event_id) = appointment.remote_event_id.as_deref() else {
            continue;
        };
        if appointment.is_historic(time_zone, now) {
            continue;
        }
        entries.insert(
            tracked.checksum.clone(),
            CacheEntry::new(remote_event_id, Some(appointment.end_date()), today),
        );
    }
    for stale in failed_deletes {
        entries
            .entry(stale.checksum.clone())
            .or_insert_with(|| stale.entry.clone());
    }
    entries
}
