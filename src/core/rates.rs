//! Rate configuration store and method selection.
//!
//! [`RateStore`] is the seam to whatever holds teachers' live rates; [`DbRateStore`]
//! reads the `teacher_rates` table. [`price_session`] turns a completed session and a
//! teacher's rates into a method, an amount and the [`RateSnapshot`] that gets frozen
//! into the earning.

use crate::{
    core::{clock::AcademyClock, refs::TeacherRef},
    entities::{
        TeacherRate,
        enums::{CalculationMethod, SessionKind},
        session, teacher_rate,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{Set, prelude::*, sea_query::OnConflict};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, info};

/// One configured rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    /// Amount per session, per student, or the fixed total
    pub amount: f64,
    /// For `fixed`: sessions the amount is spread over
    pub spread_over_sessions: Option<i32>,
}

impl Rate {
    /// A plain per-session or per-student rate.
    #[must_use]
    pub const fn flat(amount: f64) -> Self {
        Self {
            amount,
            spread_over_sessions: None,
        }
    }
}

/// All rates currently configured for one teacher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeacherRates {
    rates: HashMap<CalculationMethod, Rate>,
}

impl TeacherRates {
    /// Adds or replaces the rate for `method`.
    #[must_use]
    pub fn with(mut self, method: CalculationMethod, rate: Rate) -> Self {
        self.rates.insert(method, rate);
        self
    }

    /// Rate for `method`, if configured.
    #[must_use]
    pub fn get(&self, method: CalculationMethod) -> Option<Rate> {
        self.rates.get(&method).copied()
    }

    /// True when nothing is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Source of teachers' live rates.
pub trait RateStore {
    /// Current rates for `teacher`; an empty set when none are configured.
    fn rates_for(&self, teacher: TeacherRef) -> impl Future<Output = Result<TeacherRates>> + Send;
}

/// [`RateStore`] backed by the `teacher_rates` table.
#[derive(Debug, Clone, Copy)]
pub struct DbRateStore<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> DbRateStore<'a> {
    /// Wraps a connection.
    #[must_use]
    pub const fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }
}

impl RateStore for DbRateStore<'_> {
    async fn rates_for(&self, teacher: TeacherRef) -> Result<TeacherRates> {
        let rows = TeacherRate::find()
            .filter(teacher_rate::Column::TeacherType.eq(teacher.kind))
            .filter(teacher_rate::Column::TeacherId.eq(teacher.id))
            .all(self.db)
            .await?;

        Ok(rows.into_iter().fold(TeacherRates::default(), |rates, row| {
            rates.with(
                row.method,
                Rate {
                    amount: row.amount,
                    spread_over_sessions: row.spread_over_sessions,
                },
            )
        }))
    }
}

/// Creates or replaces a teacher's rate for one method.
///
/// Existing earnings are unaffected; they carry their own snapshot.
pub async fn set_rate(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    teacher: TeacherRef,
    method: CalculationMethod,
    rate: Rate,
) -> Result<teacher_rate::Model> {
    if !rate.amount.is_finite() || rate.amount < 0.0 {
        return Err(Error::InvalidAmount {
            amount: rate.amount,
        });
    }
    if rate.spread_over_sessions.is_some_and(|n| n <= 0) {
        return Err(Error::Validation {
            message: format!("spread_over_sessions must be positive for teacher {teacher}"),
        });
    }

    let row = teacher_rate::ActiveModel {
        teacher_type: Set(teacher.kind),
        teacher_id: Set(teacher.id),
        method: Set(method),
        amount: Set(rate.amount),
        spread_over_sessions: Set(rate.spread_over_sessions),
        updated_at: Set(clock.now()),
        ..Default::default()
    };
    TeacherRate::insert(row)
        .on_conflict(
            OnConflict::columns([
                teacher_rate::Column::TeacherType,
                teacher_rate::Column::TeacherId,
                teacher_rate::Column::Method,
            ])
            .update_columns([
                teacher_rate::Column::Amount,
                teacher_rate::Column::SpreadOverSessions,
                teacher_rate::Column::UpdatedAt,
            ])
            .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    let saved = TeacherRate::find()
        .filter(teacher_rate::Column::TeacherType.eq(teacher.kind))
        .filter(teacher_rate::Column::TeacherId.eq(teacher.id))
        .filter(teacher_rate::Column::Method.eq(method))
        .one(db)
        .await?
        .ok_or_else(|| Error::Validation {
            message: format!(
                "rate {} for teacher {teacher} vanished after upsert",
                method.as_str()
            ),
        })?;

    info!(%teacher, method = method.as_str(), amount = rate.amount, "rate configured");
    Ok(saved)
}

/// Removes a teacher's rate for one method. Returns whether a row was deleted.
pub async fn remove_rate(
    db: &DatabaseConnection,
    teacher: TeacherRef,
    method: CalculationMethod,
) -> Result<bool> {
    let result = TeacherRate::delete_many()
        .filter(teacher_rate::Column::TeacherType.eq(teacher.kind))
        .filter(teacher_rate::Column::TeacherId.eq(teacher.id))
        .filter(teacher_rate::Column::Method.eq(method))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Where the priced figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    /// The teacher's configured rate
    RateStore,
    /// An administrative per-session override
    Override,
}

/// Rate figures frozen into an earning at calculation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    /// Method the figures price
    pub method: CalculationMethod,
    /// Configured rate amount
    pub rate: f64,
    /// For spread fixed amounts: the divisor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread_over_sessions: Option<i32>,
    /// For per-student pricing: the multiplier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendees: Option<i32>,
    /// Where the rate came from
    pub source: RateSource,
    /// When the figures were read
    pub captured_at: DateTime<Utc>,
}

/// Outcome of pricing one session.
#[derive(Debug, Clone, PartialEq)]
pub struct Pricing {
    /// Selected method
    pub method: CalculationMethod,
    /// Amount owed, rounded to cents
    pub amount: f64,
    /// Figures to freeze into the earning
    pub snapshot: RateSnapshot,
}

/// Rounds a monetary amount to cents.
#[must_use]
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Students that count for pricing: recorded attendance, else enrolment.
#[must_use]
pub fn served_students(session: &session::Model) -> i32 {
    session
        .attendee_count
        .unwrap_or_else(|| i32::try_from(session.students().len()).unwrap_or(i32::MAX))
}

/// Whether a session is priced as a group.
#[must_use]
pub fn is_group_session(session: &session::Model) -> bool {
    session.kind == SessionKind::Group || session.students().len() > 1
}

/// Selects the calculation method and amount for a session.
///
/// Selection order:
/// 1. an administrative fixed override on the session,
/// 2. a `per_session` contract rate,
/// 3. group sessions: `per_student`, then `group_rate`;
///    individual sessions: `individual_rate`,
/// 4. a `fixed` rate, spread over its session count.
///
/// # Errors
/// [`Error::NoRateConfigured`] naming the method the session would normally use.
pub fn price_session(
    session: &session::Model,
    rates: &TeacherRates,
    captured_at: DateTime<Utc>,
) -> Result<Pricing> {
    let snapshot = |method, rate: f64, spread, attendees, source| RateSnapshot {
        method,
        rate,
        spread_over_sessions: spread,
        attendees,
        source,
        captured_at,
    };

    if let Some(amount) = session.fixed_amount_override {
        return Ok(Pricing {
            method: CalculationMethod::Fixed,
            amount: round_cents(amount),
            snapshot: snapshot(
                CalculationMethod::Fixed,
                amount,
                None,
                None,
                RateSource::Override,
            ),
        });
    }

    if let Some(rate) = rates.get(CalculationMethod::PerSession) {
        return Ok(Pricing {
            method: CalculationMethod::PerSession,
            amount: round_cents(rate.amount),
            snapshot: snapshot(
                CalculationMethod::PerSession,
                rate.amount,
                None,
                None,
                RateSource::RateStore,
            ),
        });
    }

    let group = is_group_session(session);
    if group {
        if let Some(rate) = rates.get(CalculationMethod::PerStudent) {
            let attendees = served_students(session);
            return Ok(Pricing {
                method: CalculationMethod::PerStudent,
                amount: round_cents(rate.amount * f64::from(attendees)),
                snapshot: snapshot(
                    CalculationMethod::PerStudent,
                    rate.amount,
                    None,
                    Some(attendees),
                    RateSource::RateStore,
                ),
            });
        }
    }

    let primary = if group {
        CalculationMethod::GroupRate
    } else {
        CalculationMethod::IndividualRate
    };
    if let Some(rate) = rates.get(primary) {
        return Ok(Pricing {
            method: primary,
            amount: round_cents(rate.amount),
            snapshot: snapshot(primary, rate.amount, None, None, RateSource::RateStore),
        });
    }

    if let Some(rate) = rates.get(CalculationMethod::Fixed) {
        let sessions = rate.spread_over_sessions.filter(|n| *n > 0).unwrap_or(1);
        return Ok(Pricing {
            method: CalculationMethod::Fixed,
            amount: round_cents(rate.amount / f64::from(sessions)),
            snapshot: snapshot(
                CalculationMethod::Fixed,
                rate.amount,
                rate.spread_over_sessions,
                None,
                RateSource::RateStore,
            ),
        });
    }

    debug!(session = %session.session_ref(), "no applicable rate");
    Err(Error::NoRateConfigured {
        teacher: session.teacher(),
        method: primary,
    })
}
