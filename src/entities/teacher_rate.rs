//! Teacher rate entity - the live rate configuration per teacher and method.
//!
//! Earnings copy the figures they use into their own `rate_snapshot`, so rows here
//! can be edited freely without touching history.

use super::enums::{CalculationMethod, TeacherKind};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Teacher rate database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "teacher_rates")]
pub struct Model {
    /// Unique identifier for the rate row
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Teacher kind
    pub teacher_type: TeacherKind,
    /// Teacher profile id
    pub teacher_id: i64,
    /// Method this rate prices
    pub method: CalculationMethod,
    /// Rate amount (per session, per student, or the fixed total)
    pub amount: f64,
    /// For `fixed`: number of sessions the amount is spread over
    pub spread_over_sessions: Option<i32>,
    /// Last modification time
    pub updated_at: DateTimeUtc,
}

/// Teacher rates have no relations to other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
