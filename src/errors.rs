//! Unified error type for the ledger.
//!
//! Every variant names the entity involved and the constraint that was violated so
//! operators can remediate without digging through logs.

use crate::core::refs::{SessionRef, TeacherRef};
use crate::entities::enums::{CalculationMethod, PayoutStatus, SessionStatus};
use chrono::NaiveDate;
use thiserror::Error;

/// Errors returned by every ledger operation.
#[derive(Debug, Error)]
pub enum Error {
    /// A lifecycle edge that the session state machine does not permit.
    #[error("invalid transition for session {session}: {} -> {}", .from.as_str(), .to.as_str())]
    InvalidTransition {
        /// Session the transition was attempted on
        session: SessionRef,
        /// Status the session was in
        from: SessionStatus,
        /// Status that was requested
        to: SessionStatus,
    },

    /// Scheduling was rejected before any write (bad time, bad duration, no quota).
    #[error("cannot schedule session {session_id}: {reason}")]
    InvalidSchedule {
        /// Session being scheduled
        session_id: i64,
        /// Which constraint failed
        reason: String,
    },

    /// The rate store has nothing that can price this earning.
    #[error("no rate configured for teacher {teacher}, method {}", .method.as_str())]
    NoRateConfigured {
        /// Teacher that could not be priced
        teacher: TeacherRef,
        /// Method the policy selected for the session
        method: CalculationMethod,
    },

    /// Re-aggregation attempted on a period whose payout is already closed.
    #[error("payout {payout_id} for teacher {teacher}, month {month} is already {}", .status.as_str())]
    PayoutAlreadyFinalized {
        /// Existing payout
        payout_id: i64,
        /// Teacher the payout belongs to
        teacher: TeacherRef,
        /// Payout month
        month: NaiveDate,
        /// Status that blocks re-aggregation
        status: PayoutStatus,
    },

    /// Dispute raised twice or resolved when not disputed.
    #[error("earning {earning_id}: {message}")]
    DisputeState {
        /// Earning the dispute operation targeted
        earning_id: i64,
        /// Which dispute constraint failed
        message: String,
    },

    /// Direct finalization attempted on a disputed or already final earning.
    #[error("earning {earning_id} cannot be finalized: {reason}")]
    EarningLocked {
        /// Earning that was targeted
        earning_id: i64,
        /// Which flag blocked finalization
        reason: String,
    },

    /// Approve/reject attempted on a payout that is no longer pending.
    #[error("payout {payout_id} cannot be {action}: status is {}", .status.as_str())]
    PayoutState {
        /// Payout that was targeted
        payout_id: i64,
        /// Current status
        status: PayoutStatus,
        /// Attempted action ("approved" or "rejected")
        action: &'static str,
    },

    /// Approval found the aggregation snapshot out of date; re-aggregate first.
    #[error("payout {payout_id} must be re-aggregated before approval: {}", .problems.join("; "))]
    PayoutStale {
        /// Payout that failed validation
        payout_id: i64,
        /// Human-readable list of problems
        problems: Vec<String>,
    },

    /// An optimistic version check lost against a concurrent writer.
    #[error("{entity} {id} was modified concurrently, retry the operation")]
    ConcurrentModification {
        /// Table/entity name
        entity: &'static str,
        /// Row id, 0 when the row was being created
        id: i64,
    },

    /// The meeting provider failed; the session stays scheduled and can be retried.
    #[error("meeting provisioning failed for session {session_id}: {message}")]
    MeetingProvisioning {
        /// Session whose room could not be provisioned
        session_id: i64,
        /// Provider error
        message: String,
    },

    /// Auto-renew requires a saved payment method.
    #[error("student {student_id} has no saved payment method, auto-renew cannot be enabled")]
    PaymentMethodMissing {
        /// Student without a payment method
        student_id: i64,
    },

    /// A payout notification could not be delivered.
    #[error("notification for payout {payout_id} failed: {message}")]
    Notification {
        /// Payout the teacher was being told about
        payout_id: i64,
        /// Delivery error
        message: String,
    },

    /// Session not found.
    #[error("session {id} not found")]
    SessionNotFound {
        /// Requested id
        id: i64,
    },

    /// Subscription not found.
    #[error("subscription {id} not found")]
    SubscriptionNotFound {
        /// Requested id
        id: i64,
    },

    /// Earning not found.
    #[error("earning {id} not found")]
    EarningNotFound {
        /// Requested id
        id: i64,
    },

    /// Payout not found.
    #[error("payout {id} not found")]
    PayoutNotFound {
        /// Requested id
        id: i64,
    },

    /// A monetary amount was negative, NaN or infinite.
    #[error("invalid amount: {amount}")]
    InvalidAmount {
        /// Offending amount
        amount: f64,
    },

    /// Generic input validation failure.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong
        message: String,
    },

    /// Configuration could not be loaded or parsed.
    #[error("configuration error: {message}")]
    Config {
        /// What was wrong
        message: String,
    },

    /// Database error from `SeaORM`.
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// JSON column could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
