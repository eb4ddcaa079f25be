use crate::application::reconcile::{
    local_today, next_cache, plan_reconciliation, track_appointments, ReconcilePlan, StaleEntry,
    TrackedAppointment,
};
use crate::domain::models::{Appointment, EventOptions};
use crate::infrastructure::checksum_cache::ChecksumCacheStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::encode_appointment_event;
use crate::infrastructure::google_calendar_client::GoogleCalendarClient;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{debug, error, info, warn};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub create_failed: usize,
    pub deleted: usize,
    pub delete_failed: usize,
    pub unchanged: usize,
    pub skipped_historic: usize,
    pub retained_historic: usize,
    pub dry_run: bool,
}

pub struct ScheduleSyncService<C, K>
where
    C: GoogleCalendarClient,
    K: ChecksumCacheStore,
{
    calendar_client: Arc<C>,
    cache_store: Arc<K>,
    event_options: EventOptions,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
}

impl<C, K> ScheduleSyncService<C, K>
where
    C: GoogleCalendarClient,
    K: ChecksumCacheStore,
{
    pub fn new(calendar_client: Arc<C>, cache_store: Arc<K>, event_options: EventOptions) -> Self {
        Self {
            calendar_client,
            cache_store,
            event_options,
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Loads the cache and diffs it against `appointments`.
    pub fn plan(&self, appointments: Vec<Appointment>) -> Result<ReconcilePlan, InfraError> {
        let now = (self.now_provider)();
        let time_zone = self.event_options.time_zone;
        let cache = self.cache_store.load(local_today(time_zone, now))?;
        let tracked = track_appointments(appointments, &self.event_options)?;
        let plan = plan_reconciliation(tracked, cache, time_zone, now);
        debug!(
            unchanged = plan.unchanged.len(),
            to_create = plan.to_create.len(),
            to_delete = plan.to_delete.len(),
            duplicates = plan.duplicates,
            "reconciliation planned"
        );
        Ok(plan)
    }

    /// Logs what `apply` would do. Nothing is sent and the cache is left untouched.
    pub fn dry_run(&self, plan: &ReconcilePlan) -> SyncReport {
        for tracked in &plan.to_create {
            debug!(
                title = %tracked.appointment.title,
                begin = %tracked.appointment.begin_time,
                checksum = %tracked.checksum,
                "would create"
            );
        }
        for stale in &plan.to_delete {
            debug!(remote_event_id = %stale.entry.remote_event_id, checksum = %stale.checksum, "would delete");
        }
        info!("would create {}", plan.to_create.len());
        info!("would delete {}", plan.to_delete.len());

        SyncReport {
            created: plan.to_create.len(),
            deleted: plan.to_delete.len(),
            unchanged: plan.unchanged.len(),
            skipped_historic: plan.skipped_historic,
            retained_historic: plan.retained_historic,
            dry_run: true,
            ..SyncReport::default()
        }
    }

    /// Executes the plan against the calendar and persists the resulting cache. Individual
    /// create or delete failures are logged and counted, never propagated.
    pub async fn apply(
        &self,
        access_token: &str,
        calendar_id: &str,
        plan: ReconcilePlan,
    ) -> Result<SyncReport, InfraError> {
        let mut report = SyncReport {
            unchanged: plan.unchanged.len(),
            skipped_historic: plan.skipped_historic,
            retained_historic: plan.retained_historic,
            ..SyncReport::default()
        };

        let mut created: Vec<TrackedAppointment> = Vec::with_capacity(plan.to_create.len());
        for mut tracked in plan.to_create {
            let event = encode_appointment_event(&tracked.appointment, &self.event_options);
            let result = self
                .with_retry(|| self.calendar_client.create_event(access_token, calendar_id, &event))
                .await;
            match result {
                Ok(remote_event_id) => {
                    info!(
                        title = %tracked.appointment.title,
                        begin = %tracked.appointment.begin_time,
                        %remote_event_id,
                        "created appointment"
                    );
                    tracked.appointment.remote_event_id = Some(remote_event_id);
                    created.push(tracked);
                    report.created += 1;
                }
                Err(error) => {
                    error!(
                        checksum = %tracked.checksum,
                        title = %tracked.appointment.title,
                        begin = %tracked.appointment.begin_time,
                        %error,
                        "failed to create appointment"
                    );
                    report.create_failed += 1;
                }
            }
        }

        let mut failed_deletes: Vec<StaleEntry> = Vec::new();
        for stale in plan.to_delete {
            let remote_event_id = stale.entry.remote_event_id.as_str();
            let result = self
                .with_retry(|| self.calendar_client.delete_event(access_token, calendar_id, remote_event_id))
                .await;
            match result {
                Ok(()) => {
                    info!(%remote_event_id, "deleted appointment");
                    report.deleted += 1;
                }
                Err(InfraError::NotFound) => {
                    info!(%remote_event_id, "appointment already deleted remotely");
                    report.deleted += 1;
                }
                Err(error) => {
                    warn!(checksum = %stale.checksum, %remote_event_id, %error, "failed to delete appointment; keeping it for the next run");
                    report.delete_failed += 1;
                    failed_deletes.push(stale);
                }
            }
        }

        let now = (self.now_provider)();
        let cache = next_cache(
            plan.unchanged.iter().chain(created.iter()),
            &failed_deletes,
            self.event_options.time_zone,
            now,
        );
        self.cache_store.save(&cache)?;
        info!(entries = cache.len(), "saved appointment cache");

        Ok(report)
    }

    async fn with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T, InfraError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InfraError>>,
    {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    debug!(attempt = attempt + 1, delay_ms = delay, %error, "retrying calendar request");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AppointmentType;
    use crate::infrastructure::checksum_cache::{CacheEntry, InMemoryChecksumCacheStore};
    use crate::infrastructure::google_calendar_client::tests::FakeGoogleCalendarClient;
    use chrono::{NaiveDate, NaiveDateTime, TimeZone};
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 1, 12, 0, 0).single().expect("valid now")
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 1).expect("valid date")
    }

    fn options() -> EventOptions {
        EventOptions {
            time_zone: chrono_tz::Europe::Amsterdam,
            exams_all_day: true,
            campus_location: "Niels Bohrweg 1, Leiden".to_string(),
        }
    }

    fn at(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M").expect("valid datetime")
    }

    fn schedule() -> Vec<Appointment> {
        vec![
            Appointment::new("Algorithms", AppointmentType::Campus, at("2024-10-07T09:00"), at("2024-10-07T10:45")),
            Appointment::new("Logic", AppointmentType::Exam, at("2024-10-09T09:15"), at("2024-10-09T12:00")),
            Appointment::new("Old lecture", AppointmentType::Online, at("2024-09-02T09:15"), at("2024-09-02T10:00")),
        ]
    }

    fn service(
        client: &Arc<FakeGoogleCalendarClient>,
        store: &Arc<InMemoryChecksumCacheStore>,
    ) -> ScheduleSyncService<FakeGoogleCalendarClient, InMemoryChecksumCacheStore> {
        ScheduleSyncService::new(Arc::clone(client), Arc::clone(store), options())
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
            })
            .with_now_provider(Arc::new(fixed_now))
    }

    async fn run(
        service: &ScheduleSyncService<FakeGoogleCalendarClient, InMemoryChecksumCacheStore>,
        appointments: Vec<Appointment>,
    ) -> SyncReport {
        let plan = service.plan(appointments).expect("plan");
        service.apply("token", "primary", plan).await.expect("apply")
    }

    #[tokio::test]
    async fn first_run_creates_future_appointments_and_second_run_is_a_noop() {
        let client = Arc::new(FakeGoogleCalendarClient::default());
        let store = Arc::new(InMemoryChecksumCacheStore::default());
        let service = service(&client, &store);

        let report = run(&service, schedule()).await;
        assert_eq!(report.created, 2);
        assert_eq!(report.skipped_historic, 1);
        assert_eq!(client.created_summaries(), vec!["Algorithms", "Logic"]);
        assert_eq!(store.load(today()).expect("load cache").len(), 2);

        let report = run(&service, schedule()).await;
        assert_eq!(report.created, 0);
        assert_eq!(report.deleted, 0);
        assert_eq!(report.unchanged, 2);
        assert_eq!(client.create_calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.delete_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn changed_appointment_is_replaced() {
        let client = Arc::new(FakeGoogleCalendarClient::default());
        let store = Arc::new(InMemoryChecksumCacheStore::default());
        let service = service(&client, &store);
        run(&service, schedule()).await;

        let mut changed = schedule();
        changed[0].end_time = at("2024-10-07T11:45");
        let report = run(&service, changed).await;

        assert_eq!(report.created, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(client.deleted_ids(), vec!["evt-1"]);
        let cache = store.load(today()).expect("load cache");
        assert!(cache.values().any(|entry| entry.remote_event_id == "evt-3"));
        assert!(!cache.values().any(|entry| entry.remote_event_id == "evt-1"));
    }

    #[tokio::test]
    async fn transient_create_failures_are_retried() {
        let client = Arc::new(FakeGoogleCalendarClient::default());
        client.queue_create(Err(InfraError::CalendarApi {
            status: 503,
            body: "backend error".to_string(),
        }));
        client.queue_create(Err(InfraError::OAuth("network error while creating event: reset".to_string())));
        let store = Arc::new(InMemoryChecksumCacheStore::default());

        let report = run(&service(&client, &store), schedule()[..1].to_vec()).await;

        assert_eq!(report.created, 1);
        assert_eq!(client.create_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_create_failure_is_left_out_of_the_cache() {
        let client = Arc::new(FakeGoogleCalendarClient::default());
        client.queue_create(Err(InfraError::CalendarApi {
            status: 400,
            body: "invalid".to_string(),
        }));
        let store = Arc::new(InMemoryChecksumCacheStore::default());

        let report = run(&service(&client, &store), schedule()).await;

        assert_eq!(report.create_failed, 1);
        assert_eq!(report.created, 1);
        assert_eq!(client.create_calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.load(today()).expect("load cache").len(), 1);
    }

    #[tokio::test]
    async fn deletes_treat_missing_events_as_done_and_keep_failures() {
        let client = Arc::new(FakeGoogleCalendarClient::default());
        client.queue_delete(Err(InfraError::NotFound));
        client.queue_delete(Err(InfraError::CalendarApi {
            status: 403,
            body: "forbidden".to_string(),
        }));
        let store = Arc::new(InMemoryChecksumCacheStore::default());
        let mut seeded = BTreeMap::new();
        seeded.insert("aaa".to_string(), CacheEntry::new("evt-gone", NaiveDate::from_ymd_opt(2024, 10, 20), today()));
        seeded.insert("bbb".to_string(), CacheEntry::new("evt-stuck", NaiveDate::from_ymd_opt(2024, 10, 21), today()));
        seeded.insert("ccc".to_string(), CacheEntry::new("evt-past", NaiveDate::from_ymd_opt(2024, 9, 1), today()));
        store.save(&seeded).expect("seed cache");

        let report = run(&service(&client, &store), Vec::new()).await;

        assert_eq!(report.deleted, 1);
        assert_eq!(report.delete_failed, 1);
        assert_eq!(report.retained_historic, 1);
        let cache = store.load(today()).expect("load cache");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache["bbb"].remote_event_id, "evt-stuck");
    }

    #[tokio::test]
    async fn dry_run_touches_neither_calendar_nor_cache() {
        let client = Arc::new(FakeGoogleCalendarClient::default());
        let store = Arc::new(InMemoryChecksumCacheStore::default());
        let service = service(&client, &store);

        let plan = service.plan(schedule()).expect("plan");
        let report = service.dry_run(&plan);

        assert!(report.dry_run);
        assert_eq!(report.created, 2);
        assert_eq!(client.create_calls.load(Ordering::SeqCst), 0);
        assert!(store.load(today()).expect("load cache").is_empty());
    }
}
