//! Subscription quota business logic.
//!
//! Sessions linked to a subscription move slots between the counters:
//! scheduling takes a slot from `remaining` into `scheduled`; completion moves it to
//! `completed`; absence moves it to `missed`; cancellation returns it to `remaining`.
//! Every move is a single `UPDATE` that adjusts two counters by the same amount, so
//! `scheduled + completed + missed + remaining == total` holds after each statement.

use crate::{
    core::{clock::AcademyClock, refs::TeacherRef},
    entities::{Subscription, enums::SubscriptionStatus, subscription},
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::{Set, sea_query::Expr, prelude::*};
use std::future::Future;
use tracing::{info, warn};

/// Read-only check for a saved payment method, provided by the payment side.
pub trait PaymentMethodCheck {
    /// Whether `student_id` has a saved payment method.
    fn has_saved_payment_method(
        &self,
        student_id: i64,
    ) -> impl Future<Output = Result<bool>> + Send;
}

/// Input for [`create_subscription`].
#[derive(Debug, Clone)]
pub struct NewSubscription {
    /// Subscribed student
    pub student_id: i64,
    /// Teacher the sessions are with
    pub teacher: TeacherRef,
    /// Sessions bought
    pub total_sessions: i32,
    /// First day of the billing period
    pub starts_on: NaiveDate,
    /// Last day of the billing period
    pub ends_on: NaiveDate,
}

/// Where a scheduled slot ends up when its session finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    /// The session was held
    Completed,
    /// The student did not show up; the slot is still consumed
    Missed,
}

/// Whether the counters add up to the total.
#[must_use]
pub const fn counters_balanced(sub: &subscription::Model) -> bool {
    sub.sessions_scheduled + sub.sessions_completed + sub.sessions_missed + sub.sessions_remaining
        == sub.total_sessions
        && sub.sessions_remaining >= 0
}

/// Creates a pending subscription with all sessions remaining.
pub async fn create_subscription(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    new: NewSubscription,
) -> Result<subscription::Model> {
    if new.total_sessions <= 0 {
        return Err(Error::Validation {
            message: format!(
                "subscription for student {} needs a positive session count, got {}",
                new.student_id, new.total_sessions
            ),
        });
    }
    if new.ends_on < new.starts_on {
        return Err(Error::Validation {
            message: format!(
                "subscription period ends ({}) before it starts ({})",
                new.ends_on, new.starts_on
            ),
        });
    }

    let now = clock.now();
    let model = subscription::ActiveModel {
        student_id: Set(new.student_id),
        teacher_type: Set(new.teacher.kind),
        teacher_id: Set(new.teacher.id),
        status: Set(SubscriptionStatus::Pending),
        total_sessions: Set(new.total_sessions),
        sessions_scheduled: Set(0),
        sessions_completed: Set(0),
        sessions_missed: Set(0),
        sessions_remaining: Set(new.total_sessions),
        starts_on: Set(new.starts_on),
        ends_on: Set(new.ends_on),
        auto_renew: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    Ok(model.insert(db).await?)
}

/// Finds a subscription by id.
pub async fn get_subscription<C>(db: &C, subscription_id: i64) -> Result<subscription::Model>
where
    C: ConnectionTrait,
{
    Subscription::find_by_id(subscription_id)
        .one(db)
        .await?
        .ok_or(Error::SubscriptionNotFound {
            id: subscription_id,
        })
}

async fn change_status(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    subscription_id: i64,
    allowed_from: &[SubscriptionStatus],
    to: SubscriptionStatus,
) -> Result<subscription::Model> {
    let sub = get_subscription(db, subscription_id).await?;
    if !allowed_from.contains(&sub.status) {
        return Err(Error::Validation {
            message: format!(
                "subscription {subscription_id} cannot become {} from {}",
                to.as_str(),
                sub.status.as_str()
            ),
        });
    }

    let mut active_model: subscription::ActiveModel = sub.into();
    active_model.status = Set(to);
    active_model.updated_at = Set(clock.now());
    let updated = active_model.update(db).await?;
    info!(subscription_id, status = to.as_str(), "subscription status changed");
    Ok(updated)
}

/// Pending or paused subscription becomes active.
pub async fn activate_subscription(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    subscription_id: i64,
) -> Result<subscription::Model> {
    change_status(
        db,
        clock,
        subscription_id,
        &[SubscriptionStatus::Pending, SubscriptionStatus::Paused],
        SubscriptionStatus::Active,
    )
    .await
}

/// Active subscription is frozen; no new sessions can be scheduled against it.
pub async fn pause_subscription(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    subscription_id: i64,
) -> Result<subscription::Model> {
    change_status(
        db,
        clock,
        subscription_id,
        &[SubscriptionStatus::Active],
        SubscriptionStatus::Paused,
    )
    .await
}

/// Ends a subscription. Already scheduled sessions keep their slots.
pub async fn cancel_subscription(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    subscription_id: i64,
) -> Result<subscription::Model> {
    change_status(
        db,
        clock,
        subscription_id,
        &[
            SubscriptionStatus::Pending,
            SubscriptionStatus::Active,
            SubscriptionStatus::Paused,
        ],
        SubscriptionStatus::Cancelled,
    )
    .await
}

/// Extends the quota by `count` sessions.
pub async fn add_sessions(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    subscription_id: i64,
    count: i32,
) -> Result<subscription::Model> {
    if count <= 0 {
        return Err(Error::Validation {
            message: format!("cannot add {count} sessions to subscription {subscription_id}"),
        });
    }

    let result = Subscription::update_many()
        .col_expr(
            subscription::Column::TotalSessions,
            Expr::col(subscription::Column::TotalSessions).add(count),
        )
        .col_expr(
            subscription::Column::SessionsRemaining,
            Expr::col(subscription::Column::SessionsRemaining).add(count),
        )
        .col_expr(subscription::Column::UpdatedAt, Expr::value(clock.now()))
        .filter(subscription::Column::Id.eq(subscription_id))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::SubscriptionNotFound {
            id: subscription_id,
        });
    }

    info!(subscription_id, count, "sessions added to subscription");
    get_subscription(db, subscription_id).await
}

/// Turns auto-renew on or off. Turning it on requires a saved payment method.
pub async fn set_auto_renew<P>(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    payments: &P,
    subscription_id: i64,
    enabled: bool,
) -> Result<subscription::Model>
where
    P: PaymentMethodCheck,
{
    let sub = get_subscription(db, subscription_id).await?;
    if enabled && !payments.has_saved_payment_method(sub.student_id).await? {
        return Err(Error::PaymentMethodMissing {
            student_id: sub.student_id,
        });
    }

    let mut active_model: subscription::ActiveModel = sub.into();
    active_model.auto_renew = Set(enabled);
    active_model.updated_at = Set(clock.now());
    Ok(active_model.update(db).await?)
}

/// Moves one slot from `remaining` to `scheduled`.
///
/// Fails with [`Error::InvalidSchedule`] when the subscription is not active or has
/// no remaining quota. Nothing is written in that case.
pub(crate) async fn reserve_slot<C>(
    conn: &C,
    subscription_id: i64,
    session_id: i64,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let result = Subscription::update_many()
        .col_expr(
            subscription::Column::SessionsScheduled,
            Expr::col(subscription::Column::SessionsScheduled).add(1),
        )
        .col_expr(
            subscription::Column::SessionsRemaining,
            Expr::col(subscription::Column::SessionsRemaining).sub(1),
        )
        .filter(subscription::Column::Id.eq(subscription_id))
        .filter(subscription::Column::Status.eq(SubscriptionStatus::Active))
        .filter(subscription::Column::SessionsRemaining.gt(0))
        .exec(conn)
        .await?;

    if result.rows_affected == 1 {
        return Ok(());
    }

    let sub = get_subscription(conn, subscription_id).await?;
    let reason = if sub.status == SubscriptionStatus::Active {
        format!(
            "subscription {subscription_id} has no remaining sessions ({} of {} used or booked)",
            sub.total_sessions - sub.sessions_remaining,
            sub.total_sessions
        )
    } else {
        format!(
            "subscription {subscription_id} is {}, not active",
            sub.status.as_str()
        )
    };
    Err(Error::InvalidSchedule { session_id, reason })
}

/// Returns a scheduled slot to `remaining`.
pub(crate) async fn release_slot<C>(conn: &C, subscription_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    move_scheduled_slot(conn, subscription_id, subscription::Column::SessionsRemaining).await
}

/// Moves a scheduled slot to `completed` or `missed`.
pub(crate) async fn consume_slot<C>(
    conn: &C,
    subscription_id: i64,
    outcome: SlotOutcome,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let target = match outcome {
        SlotOutcome::Completed => subscription::Column::SessionsCompleted,
        SlotOutcome::Missed => subscription::Column::SessionsMissed,
    };
    move_scheduled_slot(conn, subscription_id, target).await
}

async fn move_scheduled_slot<C>(
    conn: &C,
    subscription_id: i64,
    target: subscription::Column,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let result = Subscription::update_many()
        .col_expr(
            subscription::Column::SessionsScheduled,
            Expr::col(subscription::Column::SessionsScheduled).sub(1),
        )
        .col_expr(target, Expr::col(target).add(1))
        .filter(subscription::Column::Id.eq(subscription_id))
        .filter(subscription::Column::SessionsScheduled.gt(0))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let sub = get_subscription(conn, subscription_id).await?;
        warn!(
            subscription_id,
            scheduled = sub.sessions_scheduled,
            "no scheduled slot to move"
        );
        return Err(Error::Validation {
            message: format!("subscription {subscription_id} has no scheduled session slot"),
        });
    }
    Ok(())
}
