//! Remediation item entity - the operator queue for earnings that could not be priced.

use super::enums::{CalculationMethod, SessionDomain, TeacherKind};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Remediation item database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "remediation_items")]
pub struct Model {
    /// Unique identifier for the item
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Session domain tag
    pub session_type: SessionDomain,
    /// Session id
    pub session_id: i64,
    /// Teacher kind
    pub teacher_type: TeacherKind,
    /// Teacher profile id
    pub teacher_id: i64,
    /// Method the policy wanted but could not price
    pub method: CalculationMethod,
    /// Operator-facing message
    pub reason: String,
    /// When the problem was recorded
    pub created_at: DateTimeUtc,
    /// When an earning was finally computed for the session
    pub resolved_at: Option<DateTimeUtc>,
}

/// Remediation items have no relations to other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
