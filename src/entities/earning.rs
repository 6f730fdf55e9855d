//! Earning entity - one teacher's monetary claim for one completed session.
//!
//! `(session_type, session_id)` is unique. `rate_snapshot` is written once at
//! creation and never updated. Only dispute handling and payout approval mutate
//! a row after it is created.

use super::enums::{CalculationMethod, SessionDomain, TeacherKind};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Earning database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "earnings")]
pub struct Model {
    /// Unique identifier for the earning
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Teacher kind
    pub teacher_type: TeacherKind,
    /// Teacher profile id
    pub teacher_id: i64,
    /// Session domain tag
    pub session_type: SessionDomain,
    /// Session id
    pub session_id: i64,
    /// Amount owed, rounded to cents
    pub amount: f64,
    /// Pricing rule that produced `amount`
    pub calculation_method: CalculationMethod,
    /// Rate figures frozen at calculation time
    pub rate_snapshot: Json,
    /// Free-form context: subject, duration, session kind
    pub calculation_metadata: Json,
    /// First day of the academy-local month the session completed in
    pub earning_month: Date,
    /// When the session ended
    pub session_completed_at: DateTimeUtc,
    /// When this earning was computed
    pub calculated_at: DateTimeUtc,
    /// Locked by payout approval or dispute resolution
    pub is_finalized: bool,
    /// Excluded from aggregation while true
    pub is_disputed: bool,
    /// Append-only dispute audit trail
    pub dispute_notes: Option<String>,
    /// Approved payout this earning was paid through
    pub payout_id: Option<i64>,
    /// Last modification time
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Earning and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each earning is paid through at most one payout
    #[sea_orm(
        belongs_to = "super::payout::Entity",
        from = "Column::PayoutId",
        to = "super::payout::Column::Id"
    )]
    Payout,
}

impl Related<super::payout::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payout.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
