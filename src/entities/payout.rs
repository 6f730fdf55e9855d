//! Payout entity - a monthly compensation batch for one teacher.
//!
//! `included_earning_ids` records the aggregation snapshot; earnings are only linked
//! (their `payout_id` set) when the payout is approved. `version` is bumped by every
//! write so concurrent recompute/approve calls cannot clobber each other.

use super::enums::{PayoutStatus, TeacherKind};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Payout database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payouts")]
pub struct Model {
    /// Unique identifier for the payout
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Teacher kind
    pub teacher_type: TeacherKind,
    /// Teacher profile id
    pub teacher_id: i64,
    /// First day of the payout month
    pub payout_month: Date,
    /// Earnings total plus bonus minus deductions
    pub total_amount: f64,
    /// Number of earnings in the batch
    pub sessions_count: i32,
    /// Per-method counts and amounts plus bonus/deductions lines
    pub breakdown: Json,
    /// Earning ids selected by the last aggregation run
    pub included_earning_ids: Json,
    /// Approval state
    pub status: PayoutStatus,
    /// Approving user
    pub approved_by: Option<i64>,
    /// Approval time
    pub approved_at: Option<DateTimeUtc>,
    /// Approver's notes
    pub approval_notes: Option<String>,
    /// Rejecting user
    pub rejected_by: Option<i64>,
    /// Rejection time
    pub rejected_at: Option<DateTimeUtc>,
    /// Why it was rejected
    pub rejection_reason: Option<String>,
    /// Optimistic concurrency version
    pub version: i32,
    /// Row creation time
    pub created_at: DateTimeUtc,
    /// Last modification time
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Payout and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One approved payout links many earnings
    #[sea_orm(has_many = "super::earning::Entity")]
    Earnings,
}

impl Related<super::earning::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Earnings.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
