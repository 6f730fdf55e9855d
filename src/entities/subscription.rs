//! Subscription entity - a session quota contract between a student and a teacher.
//!
//! Counters always satisfy
//! `sessions_scheduled + sessions_completed + sessions_missed + sessions_remaining == total_sessions`.

use super::enums::{SubscriptionStatus, TeacherKind};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Subscription database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
    /// Unique identifier for the subscription
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Subscribed student
    pub student_id: i64,
    /// Teacher kind
    pub teacher_type: TeacherKind,
    /// Teacher profile id
    pub teacher_id: i64,
    /// Contract state
    pub status: SubscriptionStatus,
    /// Sessions bought
    pub total_sessions: i32,
    /// Sessions currently booked but not yet finished
    pub sessions_scheduled: i32,
    /// Sessions completed
    pub sessions_completed: i32,
    /// Sessions the student missed
    pub sessions_missed: i32,
    /// Sessions still available to schedule
    pub sessions_remaining: i32,
    /// First day of the billing period
    pub starts_on: Date,
    /// Last day of the billing period
    pub ends_on: Date,
    /// Renew automatically at period end
    pub auto_renew: bool,
    /// Row creation time
    pub created_at: DateTimeUtc,
    /// Last modification time
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Subscription and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One subscription has many sessions
    #[sea_orm(has_many = "super::session::Entity")]
    Sessions,
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sessions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
