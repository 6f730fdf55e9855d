//! Shared test utilities for the ledger.
//!
//! In-memory databases, a fixed academy clock, and fixtures for sessions,
//! subscriptions and earnings with sensible defaults.

use crate::{
    config::academy::CompensationPolicy,
    core::{
        clock::{AcademyClock, FixedClock},
        meeting::{MeetingProvider, MeetingRoom},
        notification::PayoutNotifier,
        rates::{DbRateStore, RateStore, TeacherRates},
        refs::TeacherRef,
        session::{self as lifecycle, Completion, NewSession},
        subscription::{self as quota, NewSubscription},
    },
    entities::{
        earning,
        enums::{
            CalculationMethod, PayoutStatus, SessionDomain, SessionKind, SessionStatus,
            TeacherKind,
        },
        payout, session, subscription,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::json;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Academy clock at UTC+3, frozen at 2025-03-01 09:00 local time.
#[allow(clippy::unwrap_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap(),
        FixedOffset::east_opt(3 * 3600).unwrap(),
    )
}

/// First day of March 2025.
#[allow(clippy::unwrap_used)]
pub fn march() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
}

/// An unsaved session taught by teacher 7, for pure pricing tests.
pub fn session_fixture(
    domain: SessionDomain,
    kind: SessionKind,
    students: &[i64],
) -> session::Model {
    let now = test_clock().now();
    session::Model {
        id: 1,
        domain,
        kind,
        teacher_id: 7,
        student_ids: json!(students),
        circle_id: (kind == SessionKind::Group).then_some(3),
        scheduled_at: Some(now),
        duration_minutes: Some(45),
        status: SessionStatus::Completed,
        started_at: Some(now),
        ended_at: Some(now + Duration::minutes(45)),
        actual_duration_minutes: Some(45),
        meeting_room: None,
        meeting_link: None,
        meeting_error: None,
        cancellation_reason: None,
        cancelled_by: None,
        cancelled_at: None,
        subscription_id: None,
        counts_toward_quota: false,
        attendee_count: None,
        teacher_attendance_percent: None,
        fixed_amount_override: None,
        created_at: now,
        updated_at: now,
    }
}

/// Unscheduled individual Quran session with teacher 7.
pub fn individual_session(student_id: i64) -> NewSession {
    NewSession {
        domain: SessionDomain::Quran,
        kind: SessionKind::Individual,
        teacher_id: 7,
        student_ids: vec![student_id],
        circle_id: None,
        subscription_id: None,
        scheduled_at: None,
        duration_minutes: None,
    }
}

/// Creates `new` scheduled at `starts_at`, then starts it on time and completes it
/// `minutes` later, pricing with the rates stored in `db` and the default policy.
/// Leaves the clock at the completion instant.
pub async fn complete_session_at(
    db: &DatabaseConnection,
    clock: &FixedClock,
    mut new: NewSession,
    starts_at: DateTime<Utc>,
    minutes: i64,
) -> Result<Completion> {
    clock.set(starts_at - Duration::days(1));
    new.scheduled_at = Some(starts_at);
    new.duration_minutes = new
        .duration_minutes
        .or_else(|| i32::try_from(minutes).ok());
    let created = lifecycle::create_session(db, clock, new).await?;

    clock.set(starts_at);
    lifecycle::start(db, clock, created.id).await?;
    clock.advance(Duration::minutes(minutes));
    lifecycle::complete(
        db,
        clock,
        &DbRateStore::new(db),
        &CompensationPolicy::default(),
        created.id,
    )
    .await
}

/// Creates and activates a subscription for March 2025.
pub async fn create_active_subscription(
    db: &DatabaseConnection,
    clock: &FixedClock,
    student_id: i64,
    teacher: TeacherRef,
    total_sessions: i32,
) -> Result<subscription::Model> {
    let created = quota::create_subscription(
        db,
        clock,
        NewSubscription {
            student_id,
            teacher,
            total_sessions,
            starts_on: march(),
            ends_on: march() + Duration::days(30),
        },
    )
    .await?;
    quota::activate_subscription(db, clock, created.id).await
}

/// Inserts an earning directly, bypassing the session lifecycle.
///
/// The session type follows the teacher kind, so `session_id` only has to be
/// unique per teacher kind.
pub async fn seed_earning(
    db: &DatabaseConnection,
    teacher: TeacherRef,
    session_id: i64,
    method: CalculationMethod,
    amount: f64,
    month: NaiveDate,
) -> Result<earning::Model> {
    let session_type = match teacher.kind {
        TeacherKind::QuranTeacher => SessionDomain::Quran,
        TeacherKind::AcademicTeacher => SessionDomain::Academic,
    };
    let completed_at = month
        .and_hms_opt(10, 0, 0)
        .map_or_else(Utc::now, |naive| naive.and_utc());

    let earning = earning::ActiveModel {
        teacher_type: Set(teacher.kind),
        teacher_id: Set(teacher.id),
        session_type: Set(session_type),
        session_id: Set(session_id),
        amount: Set(amount),
        calculation_method: Set(method),
        rate_snapshot: Set(json!({ "method": method, "rate": amount, "source": "rate_store" })),
        calculation_metadata: Set(json!({ "subject": session_type })),
        earning_month: Set(month),
        session_completed_at: Set(completed_at),
        calculated_at: Set(completed_at),
        is_finalized: Set(false),
        is_disputed: Set(false),
        dispute_notes: Set(None),
        payout_id: Set(None),
        updated_at: Set(completed_at),
        ..Default::default()
    };
    Ok(earning.insert(db).await?)
}

/// Rate store returning the same rates for every teacher.
#[derive(Debug, Clone, Default)]
pub struct FixedRates(pub TeacherRates);

impl RateStore for FixedRates {
    async fn rates_for(&self, _teacher: TeacherRef) -> Result<TeacherRates> {
        Ok(self.0.clone())
    }
}

/// Meeting provider that hands out numbered rooms, or always fails.
#[derive(Debug, Default)]
pub struct StubMeetings {
    calls: AtomicUsize,
    failure: Option<String>,
}

impl StubMeetings {
    /// A provider whose every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failure: Some(message.to_string()),
        }
    }

    /// Number of provisioning calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MeetingProvider for StubMeetings {
    async fn provision(&self, session_id: i64) -> Result<MeetingRoom> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = &self.failure {
            return Err(Error::MeetingProvisioning {
                session_id,
                message: message.clone(),
            });
        }
        Ok(MeetingRoom {
            room: format!("room-{n}"),
            link: format!("https://meet.example.test/room-{n}"),
        })
    }
}

/// Payout notifier that records every delivery, or always fails.
#[derive(Debug, Default)]
pub struct StubNotifier {
    sent: Mutex<Vec<(i64, PayoutStatus)>>,
    failure: Option<String>,
}

impl StubNotifier {
    /// A notifier whose every delivery fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure: Some(message.to_string()),
        }
    }

    /// Payout id and status of each attempted delivery, in order.
    #[allow(clippy::unwrap_used)]
    pub fn sent(&self) -> Vec<(i64, PayoutStatus)> {
        self.sent.lock().unwrap().clone()
    }

    #[allow(clippy::unwrap_used)]
    fn deliver(&self, payout: &payout::Model) -> Result<()> {
        self.sent.lock().unwrap().push((payout.id, payout.status));
        match &self.failure {
            Some(message) => Err(Error::Notification {
                payout_id: payout.id,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl PayoutNotifier for StubNotifier {
    async fn payout_approved(&self, payout: &payout::Model) -> Result<()> {
        self.deliver(payout)
    }

    async fn payout_rejected(&self, payout: &payout::Model) -> Result<()> {
        self.deliver(payout)
    }
}
