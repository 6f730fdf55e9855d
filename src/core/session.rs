//! Session lifecycle - the state machine for a bookable unit of instruction.
//!
//! Every transition is a single guarded `UPDATE ... WHERE id = ? AND status = ?`,
//! so an edge that is not permitted, or one that lost a race, leaves the row exactly
//! as it was. Transitions that touch a subscription's quota or record an earning run
//! in one transaction with the status change.

use crate::{
    config::academy::CompensationPolicy,
    core::{
        clock::AcademyClock,
        earning::{EarningOutcome, record_earning},
        meeting::MeetingProvider,
        rates::RateStore,
        subscription::{SlotOutcome, consume_slot, release_slot, reserve_slot},
    },
    entities::{
        Session,
        enums::{SessionDomain, SessionKind, SessionStatus},
        session,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{Set, TransactionTrait, prelude::*};
use tracing::{info, instrument, warn};

/// Input for [`create_session`].
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Subject domain
    pub domain: SessionDomain,
    /// Individual, group or trial
    pub kind: SessionKind,
    /// Teacher profile id
    pub teacher_id: i64,
    /// Enrolled students
    pub student_ids: Vec<i64>,
    /// Circle or room for group sessions
    pub circle_id: Option<i64>,
    /// Subscription whose quota the session draws on
    pub subscription_id: Option<i64>,
    /// Start time; `None` creates an unscheduled slot
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Planned length in minutes
    pub duration_minutes: Option<i32>,
}

/// A completed session and what the calculator did with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// The session in its completed state
    pub session: session::Model,
    /// The earning, or why there isn't one
    pub earning: EarningOutcome,
}

/// Finds a session by id.
pub async fn get_session<C>(conn: &C, session_id: i64) -> Result<session::Model>
where
    C: ConnectionTrait,
{
    Session::find_by_id(session_id)
        .one(conn)
        .await?
        .ok_or(Error::SessionNotFound { id: session_id })
}

/// Creates a session, unscheduled or directly scheduled.
///
/// A scheduled session linked to a subscription takes a quota slot in the same
/// transaction; if the subscription has none left nothing is written.
#[instrument(skip(db, clock, new), fields(domain = new.domain.as_str(), teacher_id = new.teacher_id))]
pub async fn create_session(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    new: NewSession,
) -> Result<session::Model> {
    if new.student_ids.is_empty() {
        return Err(Error::Validation {
            message: "a session needs at least one student".to_string(),
        });
    }
    if new.kind != SessionKind::Group && new.student_ids.len() > 1 {
        return Err(Error::Validation {
            message: format!(
                "{} sessions take exactly one student, got {}",
                new.kind.as_str(),
                new.student_ids.len()
            ),
        });
    }

    let now = clock.now();
    if let Some(at) = new.scheduled_at {
        check_schedule(clock, 0, at, new.duration_minutes)?;
    }

    let status = if new.scheduled_at.is_some() {
        SessionStatus::Scheduled
    } else {
        SessionStatus::Unscheduled
    };
    let holds_slot = status == SessionStatus::Scheduled && new.subscription_id.is_some();

    let txn = db.begin().await?;
    // The session has no id yet, so a quota failure names session 0.
    if let (true, Some(subscription_id)) = (holds_slot, new.subscription_id) {
        reserve_slot(&txn, subscription_id, 0).await?;
    }
    let created = session::ActiveModel {
        domain: Set(new.domain),
        kind: Set(new.kind),
        teacher_id: Set(new.teacher_id),
        student_ids: Set(serde_json::to_value(&new.student_ids)?),
        circle_id: Set(new.circle_id),
        scheduled_at: Set(new.scheduled_at),
        duration_minutes: Set(new.duration_minutes),
        status: Set(status),
        started_at: Set(None),
        ended_at: Set(None),
        actual_duration_minutes: Set(None),
        meeting_room: Set(None),
        meeting_link: Set(None),
        meeting_error: Set(None),
        cancellation_reason: Set(None),
        cancelled_by: Set(None),
        cancelled_at: Set(None),
        subscription_id: Set(new.subscription_id),
        counts_toward_quota: Set(holds_slot),
        attendee_count: Set(None),
        teacher_attendance_percent: Set(None),
        fixed_amount_override: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    info!(session = %created.session_ref(), status = status.as_str(), "session created");
    Ok(created)
}

/// Hard administrative deletion. A held quota slot is returned to the subscription;
/// earnings already recorded for the session are kept.
pub async fn delete_session(db: &DatabaseConnection, session_id: i64) -> Result<()> {
    let txn = db.begin().await?;
    let session = get_session(&txn, session_id).await?;

    if let (true, Some(subscription_id)) = (session.counts_toward_quota, session.subscription_id) {
        release_slot(&txn, subscription_id).await?;
    }
    Session::delete_by_id(session_id).exec(&txn).await?;
    txn.commit().await?;

    warn!(session = %session.session_ref(), "session deleted");
    Ok(())
}

/// Stores attendance figures used by earning eligibility and per-student pricing.
pub async fn record_attendance(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    session_id: i64,
    attendee_count: i32,
    teacher_attendance_percent: Option<f64>,
) -> Result<session::Model> {
    if attendee_count < 0 {
        return Err(Error::Validation {
            message: format!("attendee count for session {session_id} cannot be negative"),
        });
    }
    if let Some(percent) = teacher_attendance_percent {
        if !(0.0..=100.0).contains(&percent) {
            return Err(Error::Validation {
                message: format!(
                    "teacher attendance for session {session_id} must be within 0-100, got {percent}"
                ),
            });
        }
    }

    let session = get_session(db, session_id).await?;
    let mut active_model: session::ActiveModel = session.into();
    active_model.attendee_count = Set(Some(attendee_count));
    active_model.teacher_attendance_percent = Set(teacher_attendance_percent);
    active_model.updated_at = Set(clock.now());
    Ok(active_model.update(db).await?)
}

/// Sets or clears the administrative flat amount that replaces rate-based pricing.
/// Earnings already recorded keep their amount.
pub async fn set_fixed_amount_override(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    session_id: i64,
    amount: Option<f64>,
) -> Result<session::Model> {
    if let Some(amount) = amount {
        if !amount.is_finite() || amount < 0.0 {
            return Err(Error::InvalidAmount { amount });
        }
    }

    let session = get_session(db, session_id).await?;
    let mut active_model: session::ActiveModel = session.into();
    active_model.fixed_amount_override = Set(amount);
    active_model.updated_at = Set(clock.now());
    Ok(active_model.update(db).await?)
}

/// UNSCHEDULED -> SCHEDULED.
///
/// The time must be in the future and, for subscription sessions, a quota slot must
/// be free. Either failure is [`Error::InvalidSchedule`] with nothing written.
#[instrument(skip(db, clock))]
pub async fn schedule(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    session_id: i64,
    at: DateTime<Utc>,
    duration_minutes: i32,
) -> Result<session::Model> {
    let session = get_session(db, session_id).await?;
    ensure_transition(&session, SessionStatus::Scheduled)?;
    check_schedule(clock, session_id, at, Some(duration_minutes))?;

    let holds_slot = session.subscription_id.is_some();
    let changes = session::ActiveModel {
        scheduled_at: Set(Some(at)),
        duration_minutes: Set(Some(duration_minutes)),
        counts_toward_quota: Set(holds_slot),
        ..Default::default()
    };

    let txn = db.begin().await?;
    let updated = apply_transition(&txn, &session, SessionStatus::Scheduled, changes, clock.now())
        .await?;
    if let (true, Some(subscription_id)) = (holds_slot, session.subscription_id) {
        reserve_slot(&txn, subscription_id, session_id).await?;
    }
    txn.commit().await?;

    info!(
        session = %updated.session_ref(),
        at = %at.with_timezone(&clock.timezone()),
        "session scheduled"
    );
    Ok(updated)
}

/// SCHEDULED -> READY, provisioning the meeting room.
///
/// Calling it again on a READY session that already has a room returns the session
/// unchanged. A provider failure is recorded on the session, which stays SCHEDULED
/// so the call can be retried.
#[instrument(skip(db, clock, meetings))]
pub async fn mark_ready<M>(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    meetings: &M,
    session_id: i64,
) -> Result<session::Model>
where
    M: MeetingProvider,
{
    let session = get_session(db, session_id).await?;
    if session.status == SessionStatus::Ready && session.meeting_room.is_some() {
        return Ok(session);
    }
    ensure_transition(&session, SessionStatus::Ready)?;

    let room = match meetings.provision(session_id).await {
        Ok(room) => room,
        Err(e) => {
            let message = match e {
                Error::MeetingProvisioning { message, .. } => message,
                other => other.to_string(),
            };
            warn!(session = %session.session_ref(), %message, "meeting provisioning failed");
            Session::update_many()
                .set(session::ActiveModel {
                    meeting_error: Set(Some(message.clone())),
                    updated_at: Set(clock.now()),
                    ..Default::default()
                })
                .filter(session::Column::Id.eq(session_id))
                .filter(session::Column::Status.eq(session.status))
                .exec(db)
                .await?;
            return Err(Error::MeetingProvisioning {
                session_id,
                message,
            });
        }
    };

    let changes = session::ActiveModel {
        meeting_room: Set(Some(room.room)),
        meeting_link: Set(Some(room.link)),
        meeting_error: Set(None),
        ..Default::default()
    };
    let updated = apply_transition(db, &session, SessionStatus::Ready, changes, clock.now()).await?;
    info!(session = %updated.session_ref(), "session ready");
    Ok(updated)
}

/// SCHEDULED or READY -> ONGOING.
#[instrument(skip(db, clock))]
pub async fn start(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    session_id: i64,
) -> Result<session::Model> {
    let session = get_session(db, session_id).await?;
    let now = clock.now();
    let changes = session::ActiveModel {
        started_at: Set(Some(now)),
        ..Default::default()
    };
    let updated = apply_transition(db, &session, SessionStatus::Ongoing, changes, now).await?;
    info!(session = %updated.session_ref(), "session started");
    Ok(updated)
}

/// ONGOING -> COMPLETED.
///
/// In one transaction: stamps the end time and actual duration, moves the held
/// quota slot to `completed`, and records the earning. A session that cannot be
/// priced still completes; it is queued for remediation instead.
#[instrument(skip(db, clock, rates, policy))]
pub async fn complete<R>(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    rates: &R,
    policy: &CompensationPolicy,
    session_id: i64,
) -> Result<Completion>
where
    R: RateStore,
{
    let session = get_session(db, session_id).await?;
    ensure_transition(&session, SessionStatus::Completed)?;

    let teacher_rates = rates.rates_for(session.teacher()).await?;

    let now = clock.now();
    let started_at = session.started_at.unwrap_or(now);
    let actual_minutes = i32::try_from((now - started_at).num_minutes().max(0)).unwrap_or(i32::MAX);
    let changes = session::ActiveModel {
        started_at: Set(Some(started_at)),
        ended_at: Set(Some(now)),
        actual_duration_minutes: Set(Some(actual_minutes)),
        counts_toward_quota: Set(false),
        ..Default::default()
    };

    let txn = db.begin().await?;
    let completed = apply_transition(&txn, &session, SessionStatus::Completed, changes, now).await?;
    if let (true, Some(subscription_id)) = (session.counts_toward_quota, session.subscription_id) {
        consume_slot(&txn, subscription_id, SlotOutcome::Completed).await?;
    }
    let earning = record_earning(&txn, clock, &completed, &teacher_rates, policy).await?;
    txn.commit().await?;

    info!(
        session = %completed.session_ref(),
        actual_minutes,
        "session completed"
    );
    Ok(Completion {
        session: completed,
        earning,
    })
}

/// SCHEDULED or READY -> CANCELLED. The held quota slot goes back to `remaining`.
#[instrument(skip(db, clock, reason))]
pub async fn cancel(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    session_id: i64,
    reason: &str,
    cancelled_by: i64,
) -> Result<session::Model> {
    let session = get_session(db, session_id).await?;
    ensure_transition(&session, SessionStatus::Cancelled)?;
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(Error::Validation {
            message: format!(
                "cancelling session {} requires a reason",
                session.session_ref()
            ),
        });
    }

    let now = clock.now();
    let changes = session::ActiveModel {
        cancellation_reason: Set(Some(reason.to_string())),
        cancelled_by: Set(Some(cancelled_by)),
        cancelled_at: Set(Some(now)),
        counts_toward_quota: Set(false),
        ..Default::default()
    };

    let txn = db.begin().await?;
    let cancelled = apply_transition(&txn, &session, SessionStatus::Cancelled, changes, now).await?;
    if let (true, Some(subscription_id)) = (session.counts_toward_quota, session.subscription_id) {
        release_slot(&txn, subscription_id).await?;
    }
    txn.commit().await?;

    info!(session = %cancelled.session_ref(), cancelled_by, "session cancelled");
    Ok(cancelled)
}

/// SCHEDULED, READY or ONGOING -> ABSENT. No earning; the held slot counts as missed.
#[instrument(skip(db, clock))]
pub async fn mark_absent(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    session_id: i64,
) -> Result<session::Model> {
    let session = get_session(db, session_id).await?;
    ensure_transition(&session, SessionStatus::Absent)?;

    let now = clock.now();
    let changes = session::ActiveModel {
        started_at: Set(Some(session.started_at.unwrap_or(now))),
        ended_at: Set(Some(now)),
        counts_toward_quota: Set(false),
        ..Default::default()
    };

    let txn = db.begin().await?;
    let absent = apply_transition(&txn, &session, SessionStatus::Absent, changes, now).await?;
    if let (true, Some(subscription_id)) = (session.counts_toward_quota, session.subscription_id) {
        consume_slot(&txn, subscription_id, SlotOutcome::Missed).await?;
    }
    txn.commit().await?;

    info!(session = %absent.session_ref(), "student absent");
    Ok(absent)
}

fn ensure_transition(session: &session::Model, to: SessionStatus) -> Result<()> {
    if session.status.permits(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            session: session.session_ref(),
            from: session.status,
            to,
        })
    }
}

fn check_schedule(
    clock: &impl AcademyClock,
    session_id: i64,
    at: DateTime<Utc>,
    duration_minutes: Option<i32>,
) -> Result<()> {
    let now = clock.now();
    if at <= now {
        let tz = clock.timezone();
        return Err(Error::InvalidSchedule {
            session_id,
            reason: format!(
                "start {} is not after the current academy time {}",
                at.with_timezone(&tz),
                now.with_timezone(&tz)
            ),
        });
    }
    if duration_minutes.is_some_and(|minutes| minutes <= 0) {
        return Err(Error::InvalidSchedule {
            session_id,
            reason: "duration must be a positive number of minutes".to_string(),
        });
    }
    Ok(())
}

/// Writes `changes` plus the new status, guarded on the status the caller read.
async fn apply_transition<C>(
    conn: &C,
    session: &session::Model,
    to: SessionStatus,
    mut changes: session::ActiveModel,
    now: DateTime<Utc>,
) -> Result<session::Model>
where
    C: ConnectionTrait,
{
    ensure_transition(session, to)?;
    changes.status = Set(to);
    changes.updated_at = Set(now);

    let result = Session::update_many()
        .set(changes)
        .filter(session::Column::Id.eq(session.id))
        .filter(session::Column::Status.eq(session.status))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        // Someone else moved the session first
        let current = get_session(conn, session.id).await?;
        return Err(Error::InvalidTransition {
            session: current.session_ref(),
            from: current.status,
            to,
        });
    }
    get_session(conn, session.id).await
}
