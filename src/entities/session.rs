//! Session entity - a scheduled unit of instruction.
//!
//! The `domain` column is the polymorphic session tag carried into earnings.
//! `ended_at` is set exactly when the status is completed or absent, and
//! `started_at` is set once the session is ongoing, completed or absent.

use super::enums::{SessionDomain, SessionKind, SessionStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Session database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    /// Unique identifier for the session
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Subject domain (quran, academic, interactive course)
    pub domain: SessionDomain,
    /// Individual, group or trial
    pub kind: SessionKind,
    /// Teacher profile id; the teacher kind follows from `domain`
    pub teacher_id: i64,
    /// Enrolled student ids as a JSON array
    pub student_ids: Json,
    /// Circle or room id for group sessions
    pub circle_id: Option<i64>,
    /// Start time, None while unscheduled
    pub scheduled_at: Option<DateTimeUtc>,
    /// Planned duration in minutes
    pub duration_minutes: Option<i32>,
    /// Lifecycle state
    pub status: SessionStatus,
    /// When the session went ongoing
    pub started_at: Option<DateTimeUtc>,
    /// When the session completed or was marked absent
    pub ended_at: Option<DateTimeUtc>,
    /// Minutes between start and completion
    pub actual_duration_minutes: Option<i32>,
    /// Provisioned meeting room name
    pub meeting_room: Option<String>,
    /// Joinable meeting link
    pub meeting_link: Option<String>,
    /// Last meeting provisioning failure, cleared on success
    pub meeting_error: Option<String>,
    /// Why the session was cancelled
    pub cancellation_reason: Option<String>,
    /// Who cancelled it
    pub cancelled_by: Option<i64>,
    /// When it was cancelled
    pub cancelled_at: Option<DateTimeUtc>,
    /// Subscription whose quota this session draws on
    pub subscription_id: Option<i64>,
    /// Whether this session currently holds a `scheduled` slot on its subscription
    pub counts_toward_quota: bool,
    /// Students that actually attended, when attendance was recorded
    pub attendee_count: Option<i32>,
    /// Teacher's attendance percentage, when attendance was recorded
    pub teacher_attendance_percent: Option<f64>,
    /// Administrative flat amount that replaces rate-based pricing
    pub fixed_amount_override: Option<f64>,
    /// Row creation time
    pub created_at: DateTimeUtc,
    /// Last modification time
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Session and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each session optionally draws on one subscription
    #[sea_orm(
        belongs_to = "super::subscription::Entity",
        from = "Column::SubscriptionId",
        to = "super::subscription::Column::Id"
    )]
    Subscription,
}

impl Related<super::subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscription.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
