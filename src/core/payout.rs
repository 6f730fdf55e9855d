//! Monthly payout aggregation.
//!
//! A payout batches one teacher's undisputed, unpaid earnings for one month. The
//! earning ids picked by the run are stored on the payout so approval can check that
//! nothing moved underneath it. Re-running the aggregation on a pending payout
//! recomputes it in place. An approved payout closes the period; after a rejection
//! the next run starts a new pending payout from the still-unlinked earnings.

use crate::{
    core::{
        clock::{AcademyClock, normalize_month},
        rates::round_cents,
        refs::TeacherRef,
    },
    entities::{
        Earning, Payout, earning,
        enums::{CalculationMethod, PayoutStatus, TeacherKind},
        payout,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait, prelude::*, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info, instrument, warn};

/// A manual bonus or deduction line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    /// Positive amount; deductions are subtracted from the total
    pub amount: f64,
    /// Why the adjustment was made
    pub reason: String,
}

/// Administrative adjustments applied on top of the earnings total.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayoutAdjustments {
    /// Added to the total
    pub bonus: Option<Adjustment>,
    /// Subtracted from the total
    pub deductions: Option<Adjustment>,
}

/// Count and amount for one calculation method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodTotals {
    /// Earnings priced with the method
    pub count: i32,
    /// Their summed amount
    pub amount: f64,
}

/// The JSON stored in `payouts.breakdown`: one entry per method, plus the reserved
/// `bonus` and `deductions` keys when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayoutBreakdown {
    /// Per-method totals
    #[serde(flatten)]
    pub methods: BTreeMap<CalculationMethod, MethodTotals>,
    /// Bonus line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bonus: Option<Adjustment>,
    /// Deduction line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deductions: Option<Adjustment>,
}

impl PayoutBreakdown {
    /// Groups earnings by method and attaches the adjustments.
    #[must_use]
    pub fn from_earnings(earnings: &[earning::Model], adjustments: &PayoutAdjustments) -> Self {
        let mut methods: BTreeMap<CalculationMethod, MethodTotals> = BTreeMap::new();
        for earning in earnings {
            let totals = methods.entry(earning.calculation_method).or_default();
            totals.count += 1;
            totals.amount = round_cents(totals.amount + earning.amount);
        }

        Self {
            methods,
            bonus: adjustments.bonus.clone(),
            deductions: adjustments.deductions.clone(),
        }
    }

    /// Decodes a stored breakdown.
    pub fn from_json(value: &Json) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// The adjustments carried by this breakdown.
    #[must_use]
    pub fn adjustments(&self) -> PayoutAdjustments {
        PayoutAdjustments {
            bonus: self.bonus.clone(),
            deductions: self.deductions.clone(),
        }
    }

    /// Sum of the per-method amounts.
    #[must_use]
    pub fn earnings_total(&self) -> f64 {
        round_cents(self.methods.values().map(|t| t.amount).sum())
    }

    /// Number of earnings across all methods.
    #[must_use]
    pub fn sessions_count(&self) -> i32 {
        self.methods.values().map(|t| t.count).sum()
    }

    /// Earnings plus bonus minus deductions.
    #[must_use]
    pub fn total(&self) -> f64 {
        let bonus = self.bonus.as_ref().map_or(0.0, |b| b.amount);
        let deductions = self.deductions.as_ref().map_or(0.0, |d| d.amount);
        round_cents(self.earnings_total() + bonus - deductions)
    }
}

/// Outcome of [`generate_payouts_for_month`].
#[derive(Debug, Clone, Default)]
pub struct PayoutRun {
    /// Month aggregated
    pub month: NaiveDate,
    /// Payouts created or recomputed
    pub generated: Vec<payout::Model>,
    /// Teachers whose period is already closed
    pub skipped: Vec<(TeacherRef, String)>,
    /// Teachers whose aggregation failed
    pub failed: Vec<(TeacherRef, String)>,
}

/// Filter for [`list_payouts`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PayoutFilter {
    /// Only this teacher
    pub teacher: Option<TeacherRef>,
    /// Only this month (first day)
    pub month: Option<NaiveDate>,
    /// Only this status
    pub status: Option<PayoutStatus>,
}

/// Summary of one teacher's payout history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayoutStats {
    /// All payouts, any status
    pub total_payouts: usize,
    /// Pending payouts
    pub pending_count: usize,
    /// Approved payouts
    pub approved_count: usize,
    /// Rejected payouts
    pub rejected_count: usize,
    /// Sum awaiting approval
    pub pending_amount: f64,
    /// Sum approved
    pub approved_amount: f64,
    /// Most recent payout month
    pub last_payout: Option<payout::Model>,
}

fn check_adjustments(adjustments: &PayoutAdjustments) -> Result<()> {
    for adjustment in [&adjustments.bonus, &adjustments.deductions]
        .into_iter()
        .flatten()
    {
        if !adjustment.amount.is_finite() || adjustment.amount < 0.0 {
            return Err(Error::InvalidAmount {
                amount: adjustment.amount,
            });
        }
        if adjustment.reason.trim().is_empty() {
            return Err(Error::Validation {
                message: "payout adjustments need a reason".to_string(),
            });
        }
    }
    Ok(())
}

/// Earnings a new aggregation would pick up: the teacher's month, not disputed,
/// not paid through a payout yet.
pub(crate) async fn eligible_earnings<C>(
    conn: &C,
    teacher: TeacherRef,
    month: NaiveDate,
) -> Result<Vec<earning::Model>>
where
    C: ConnectionTrait,
{
    Earning::find()
        .filter(earning::Column::TeacherType.eq(teacher.kind))
        .filter(earning::Column::TeacherId.eq(teacher.id))
        .filter(earning::Column::EarningMonth.eq(month))
        .filter(earning::Column::IsDisputed.eq(false))
        .filter(earning::Column::PayoutId.is_null())
        .order_by_asc(earning::Column::Id)
        .all(conn)
        .await
        .map_err(Into::into)
}

/// The newest payout for a teacher and month, any status.
pub async fn find_payout<C>(
    conn: &C,
    teacher: TeacherRef,
    month: NaiveDate,
) -> Result<Option<payout::Model>>
where
    C: ConnectionTrait,
{
    Payout::find()
        .filter(payout::Column::TeacherType.eq(teacher.kind))
        .filter(payout::Column::TeacherId.eq(teacher.id))
        .filter(payout::Column::PayoutMonth.eq(normalize_month(month)))
        .order_by_desc(payout::Column::Id)
        .one(conn)
        .await
        .map_err(Into::into)
}

/// Inserts the first pending payout of a month.
///
/// A unique violation means another aggregation inserted the month's payout after
/// this one looked, reported as [`Error::ConcurrentModification`].
pub(crate) async fn insert_pending<C>(
    conn: &C,
    teacher: TeacherRef,
    month: NaiveDate,
    breakdown: &PayoutBreakdown,
    included: &[i64],
    now: DateTime<Utc>,
) -> Result<payout::Model>
where
    C: ConnectionTrait,
{
    let inserted = payout::ActiveModel {
        teacher_type: Set(teacher.kind),
        teacher_id: Set(teacher.id),
        payout_month: Set(month),
        total_amount: Set(breakdown.total()),
        sessions_count: Set(breakdown.sessions_count()),
        breakdown: Set(serde_json::to_value(breakdown)?),
        included_earning_ids: Set(serde_json::to_value(included)?),
        status: Set(PayoutStatus::Pending),
        approved_by: Set(None),
        approved_at: Set(None),
        approval_notes: Set(None),
        rejected_by: Set(None),
        rejected_at: Set(None),
        rejection_reason: Set(None),
        version: Set(1),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await;

    match inserted {
        Ok(model) => Ok(model),
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            warn!(%teacher, %month, "payout inserted concurrently");
            Err(Error::ConcurrentModification {
                entity: "payout",
                id: 0,
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Aggregates a teacher's month into a pending payout.
///
/// A pending payout for the month is recomputed in place; `adjustments` of `None`
/// keeps the adjustments it already carries. Returns `None` when there is nothing
/// to pay and no pending payout exists.
///
/// # Errors
/// [`Error::PayoutAlreadyFinalized`] when the month's payout was approved;
/// [`Error::ConcurrentModification`] when an approval or another
/// aggregation changed the payout while this one ran.
#[instrument(skip(db, clock, adjustments), fields(teacher = %teacher))]
pub async fn aggregate(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    teacher: TeacherRef,
    month: NaiveDate,
    adjustments: Option<&PayoutAdjustments>,
) -> Result<Option<payout::Model>> {
    if let Some(adjustments) = adjustments {
        check_adjustments(adjustments)?;
    }
    let month = normalize_month(month);
    let now = clock.now();

    let txn = db.begin().await?;
    // A rejected payout leaves the month open; the next run starts a fresh row.
    let existing = match find_payout(&txn, teacher, month).await? {
        Some(closed) if closed.status == PayoutStatus::Approved => {
            return Err(Error::PayoutAlreadyFinalized {
                payout_id: closed.id,
                teacher,
                month,
                status: closed.status,
            });
        }
        Some(pending) if pending.status == PayoutStatus::Pending => Some(pending),
        _ => None,
    };

    let earnings = eligible_earnings(&txn, teacher, month).await?;
    if earnings.is_empty() && existing.is_none() {
        return Ok(None);
    }

    let adjustments = match (adjustments, &existing) {
        (Some(given), _) => given.clone(),
        (None, Some(previous)) => PayoutBreakdown::from_json(&previous.breakdown)?.adjustments(),
        (None, None) => PayoutAdjustments::default(),
    };
    let breakdown = PayoutBreakdown::from_earnings(&earnings, &adjustments);
    let included: Vec<i64> = earnings.iter().map(|e| e.id).collect();

    let saved = if let Some(pending) = existing {
        let result = Payout::update_many()
            .set(payout::ActiveModel {
                total_amount: Set(breakdown.total()),
                sessions_count: Set(breakdown.sessions_count()),
                breakdown: Set(serde_json::to_value(&breakdown)?),
                included_earning_ids: Set(serde_json::to_value(&included)?),
                updated_at: Set(now),
                ..Default::default()
            })
            .col_expr(
                payout::Column::Version,
                Expr::col(payout::Column::Version).add(1),
            )
            .filter(payout::Column::Id.eq(pending.id))
            .filter(payout::Column::Version.eq(pending.version))
            .filter(payout::Column::Status.eq(PayoutStatus::Pending))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(Error::ConcurrentModification {
                entity: "payout",
                id: pending.id,
            });
        }
        get_payout(&txn, pending.id).await?
    } else {
        insert_pending(&txn, teacher, month, &breakdown, &included, now).await?
    };
    txn.commit().await?;

    info!(
        payout_id = saved.id,
        %month,
        sessions = saved.sessions_count,
        total = saved.total_amount,
        version = saved.version,
        "payout aggregated"
    );
    Ok(Some(saved))
}

/// Aggregates every teacher with unpaid earnings in `month`.
///
/// Closed periods are skipped and other failures are collected, so one teacher
/// cannot stop the run for the rest.
pub async fn generate_payouts_for_month(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    month: NaiveDate,
) -> Result<PayoutRun> {
    let month = normalize_month(month);
    let teachers: Vec<(TeacherKind, i64)> = Earning::find()
        .select_only()
        .column(earning::Column::TeacherType)
        .column(earning::Column::TeacherId)
        .filter(earning::Column::EarningMonth.eq(month))
        .filter(earning::Column::IsDisputed.eq(false))
        .filter(earning::Column::PayoutId.is_null())
        .distinct()
        .order_by_asc(earning::Column::TeacherType)
        .order_by_asc(earning::Column::TeacherId)
        .into_tuple()
        .all(db)
        .await?;

    let mut run = PayoutRun {
        month,
        ..PayoutRun::default()
    };
    for (kind, id) in teachers {
        let teacher = TeacherRef { kind, id };
        match aggregate(db, clock, teacher, month, None).await {
            Ok(Some(payout)) => run.generated.push(payout),
            Ok(None) => {}
            Err(e @ Error::PayoutAlreadyFinalized { .. }) => {
                warn!(%teacher, %month, error = %e, "payout period closed");
                run.skipped.push((teacher, e.to_string()));
            }
            Err(e) => {
                error!(%teacher, %month, error = %e, "payout aggregation failed");
                run.failed.push((teacher, e.to_string()));
            }
        }
    }

    info!(
        %month,
        generated = run.generated.len(),
        skipped = run.skipped.len(),
        failed = run.failed.len(),
        "monthly payout run finished"
    );
    Ok(run)
}

/// Renders a payout run for logs and operator output.
#[must_use]
pub fn format_payout_summary(run: &PayoutRun, currency: &str) -> String {
    let mut lines = vec![format!("Payouts for {}", run.month.format("%Y-%m"))];
    let mut grand_total = 0.0;
    for payout in &run.generated {
        grand_total += payout.total_amount;
        lines.push(format!(
            "  {} | {} sessions | {:.2} {currency} | {}",
            payout.teacher(),
            payout.sessions_count,
            payout.total_amount,
            payout.status.as_str()
        ));
    }
    for (teacher, reason) in &run.skipped {
        lines.push(format!("  {teacher} | skipped: {reason}"));
    }
    for (teacher, reason) in &run.failed {
        lines.push(format!("  {teacher} | FAILED: {reason}"));
    }
    lines.push(format!(
        "Total: {:.2} {currency} across {} payouts",
        round_cents(grand_total),
        run.generated.len()
    ));
    lines.join("\n")
}

/// Finds a payout by id.
pub async fn get_payout<C>(conn: &C, payout_id: i64) -> Result<payout::Model>
where
    C: ConnectionTrait,
{
    Payout::find_by_id(payout_id)
        .one(conn)
        .await?
        .ok_or(Error::PayoutNotFound { id: payout_id })
}

/// Lists payouts matching `filter`, newest month first.
pub async fn list_payouts(
    db: &DatabaseConnection,
    filter: &PayoutFilter,
) -> Result<Vec<payout::Model>> {
    let mut query = Payout::find();
    if let Some(teacher) = filter.teacher {
        query = query
            .filter(payout::Column::TeacherType.eq(teacher.kind))
            .filter(payout::Column::TeacherId.eq(teacher.id));
    }
    if let Some(month) = filter.month {
        query = query.filter(payout::Column::PayoutMonth.eq(normalize_month(month)));
    }
    if let Some(status) = filter.status {
        query = query.filter(payout::Column::Status.eq(status));
    }

    query
        .order_by_desc(payout::Column::PayoutMonth)
        .order_by_desc(payout::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Counts and sums a teacher's payouts by status.
pub async fn teacher_payout_stats(
    db: &DatabaseConnection,
    teacher: TeacherRef,
) -> Result<PayoutStats> {
    let payouts = list_payouts(
        db,
        &PayoutFilter {
            teacher: Some(teacher),
            ..PayoutFilter::default()
        },
    )
    .await?;

    let mut stats = PayoutStats {
        total_payouts: payouts.len(),
        ..PayoutStats::default()
    };
    for payout in &payouts {
        match payout.status {
            PayoutStatus::Pending => {
                stats.pending_count += 1;
                stats.pending_amount += payout.total_amount;
            }
            PayoutStatus::Approved => {
                stats.approved_count += 1;
                stats.approved_amount += payout.total_amount;
            }
            PayoutStatus::Rejected => stats.rejected_count += 1,
        }
    }
    stats.pending_amount = round_cents(stats.pending_amount);
    stats.approved_amount = round_cents(stats.approved_amount);
    stats.last_payout = payouts.into_iter().next();
    Ok(stats)
}
