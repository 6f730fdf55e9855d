//! Payout approval workflow.
//!
//! Approval is the single point at which earnings become final: in one transaction
//! the payout moves PENDING -> APPROVED and every earning the aggregation picked is
//! finalized and linked. If any of those earnings was disputed, paid elsewhere, or
//! joined by new unpaid earnings since aggregation, nothing is written and the
//! payout has to be re-aggregated first.

use crate::{
    core::{
        clock::AcademyClock,
        notification::{Decision, PayoutNotifier, notify_teacher},
        payout::{PayoutBreakdown, eligible_earnings, get_payout},
        rates::round_cents,
    },
    entities::{Earning, Payout, earning, enums::PayoutStatus, payout},
    errors::{Error, Result},
};
use sea_orm::{Set, TransactionTrait, prelude::*, sea_query::Expr};
use std::collections::HashSet;
use tracing::{info, instrument, warn};

/// Problems that would make approving `payout` inconsistent with its earnings.
/// An empty list means the aggregation snapshot is still current.
pub async fn validate_for_approval<C>(conn: &C, payout: &payout::Model) -> Result<Vec<String>>
where
    C: ConnectionTrait,
{
    let mut problems = Vec::new();
    let included: Vec<i64> = serde_json::from_value(payout.included_earning_ids.clone())?;
    let breakdown = PayoutBreakdown::from_json(&payout.breakdown)?;

    let earnings = Earning::find()
        .filter(earning::Column::Id.is_in(included.clone()))
        .all(conn)
        .await?;

    if earnings.len() != included.len() {
        problems.push(format!(
            "{} included earnings no longer exist",
            included.len() - earnings.len()
        ));
    }

    let disputed = earnings.iter().filter(|e| e.is_disputed).count();
    if disputed > 0 {
        problems.push(format!("has {disputed} disputed earnings"));
    }

    for linked in earnings
        .iter()
        .filter(|e| e.payout_id.is_some_and(|id| id != payout.id))
    {
        problems.push(format!(
            "earning {} already paid through payout {}",
            linked.id,
            linked.payout_id.unwrap_or_default()
        ));
    }

    let earnings_total: f64 = earnings.iter().map(|e| e.amount).sum();
    let bonus = breakdown.bonus.as_ref().map_or(0.0, |b| b.amount);
    let deductions = breakdown.deductions.as_ref().map_or(0.0, |d| d.amount);
    let expected = round_cents(earnings_total + bonus - deductions);
    if (expected - payout.total_amount).abs() > 0.005 {
        problems.push(format!(
            "total mismatch: expected {expected:.2}, got {:.2}",
            payout.total_amount
        ));
    }

    let count = i32::try_from(earnings.len()).unwrap_or(i32::MAX);
    if count != payout.sessions_count {
        problems.push(format!(
            "sessions count mismatch: expected {count}, got {}",
            payout.sessions_count
        ));
    }

    let known: HashSet<i64> = included.into_iter().collect();
    let newcomers = eligible_earnings(conn, payout.teacher(), payout.payout_month)
        .await?
        .into_iter()
        .filter(|e| !known.contains(&e.id))
        .count();
    if newcomers > 0 {
        problems.push(format!("{newcomers} unpaid earnings added since aggregation"));
    }

    Ok(problems)
}

/// Approves a pending payout and finalizes its earnings, then notifies the teacher.
///
/// # Errors
/// [`Error::PayoutState`] if the payout is not pending, [`Error::PayoutStale`] if
/// its earnings changed since aggregation, [`Error::ConcurrentModification`] if
/// another writer got to the payout first.
#[instrument(skip(db, clock, notifier, notes))]
pub async fn approve(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    notifier: &impl PayoutNotifier,
    payout_id: i64,
    approver: i64,
    notes: Option<&str>,
) -> Result<payout::Model> {
    let now = clock.now();
    let txn = db.begin().await?;

    let payout = get_payout(&txn, payout_id).await?;
    if payout.status != PayoutStatus::Pending {
        return Err(Error::PayoutState {
            payout_id,
            status: payout.status,
            action: "approved",
        });
    }

    let problems = validate_for_approval(&txn, &payout).await?;
    if !problems.is_empty() {
        warn!(payout_id, ?problems, "payout is stale");
        return Err(Error::PayoutStale {
            payout_id,
            problems,
        });
    }

    let result = Payout::update_many()
        .set(payout::ActiveModel {
            status: Set(PayoutStatus::Approved),
            approved_by: Set(Some(approver)),
            approved_at: Set(Some(now)),
            approval_notes: Set(notes.map(str::to_string)),
            updated_at: Set(now),
            ..Default::default()
        })
        .col_expr(
            payout::Column::Version,
            Expr::col(payout::Column::Version).add(1),
        )
        .filter(payout::Column::Id.eq(payout_id))
        .filter(payout::Column::Version.eq(payout.version))
        .filter(payout::Column::Status.eq(PayoutStatus::Pending))
        .exec(&txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::ConcurrentModification {
            entity: "payout",
            id: payout_id,
        });
    }

    let included: Vec<i64> = serde_json::from_value(payout.included_earning_ids.clone())?;
    let linked = Earning::update_many()
        .set(earning::ActiveModel {
            is_finalized: Set(true),
            payout_id: Set(Some(payout_id)),
            updated_at: Set(now),
            ..Default::default()
        })
        .filter(earning::Column::Id.is_in(included.clone()))
        .filter(earning::Column::IsDisputed.eq(false))
        .filter(earning::Column::PayoutId.is_null())
        .exec(&txn)
        .await?;
    if usize::try_from(linked.rows_affected).unwrap_or(usize::MAX) != included.len() {
        // Dropping the transaction rolls the status change back
        return Err(Error::PayoutStale {
            payout_id,
            problems: vec![format!(
                "linked {} of {} earnings",
                linked.rows_affected,
                included.len()
            )],
        });
    }

    let approved = get_payout(&txn, payout_id).await?;
    txn.commit().await?;

    info!(
        payout_id,
        approver,
        teacher = %approved.teacher(),
        month = %approved.payout_month,
        earnings = included.len(),
        total = approved.total_amount,
        "payout approved"
    );
    notify_teacher(notifier, &approved, Decision::Approved).await;
    Ok(approved)
}

/// Rejects a pending payout and notifies the teacher. Its earnings stay unlinked and
/// unfinalized, ready for the next aggregation of the month.
#[instrument(skip(db, clock, notifier, reason))]
pub async fn reject(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    notifier: &impl PayoutNotifier,
    payout_id: i64,
    rejector: i64,
    reason: &str,
) -> Result<payout::Model> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(Error::Validation {
            message: format!("rejecting payout {payout_id} requires a reason"),
        });
    }

    let payout = get_payout(db, payout_id).await?;
    if payout.status != PayoutStatus::Pending {
        return Err(Error::PayoutState {
            payout_id,
            status: payout.status,
            action: "rejected",
        });
    }

    let now = clock.now();
    let result = Payout::update_many()
        .set(payout::ActiveModel {
            status: Set(PayoutStatus::Rejected),
            rejected_by: Set(Some(rejector)),
            rejected_at: Set(Some(now)),
            rejection_reason: Set(Some(reason.to_string())),
            updated_at: Set(now),
            ..Default::default()
        })
        .col_expr(
            payout::Column::Version,
            Expr::col(payout::Column::Version).add(1),
        )
        .filter(payout::Column::Id.eq(payout_id))
        .filter(payout::Column::Version.eq(payout.version))
        .filter(payout::Column::Status.eq(PayoutStatus::Pending))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::ConcurrentModification {
            entity: "payout",
            id: payout_id,
        });
    }

    info!(payout_id, rejector, %reason, "payout rejected");
    let rejected = get_payout(db, payout_id).await?;
    notify_teacher(notifier, &rejected, Decision::Rejected).await;
    Ok(rejected)
}
