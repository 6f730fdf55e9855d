//! Earning calculation - turns one completed session into one earning record.
//!
//! The calculator is keyed on `(session_type, session_id)`. Recording is an
//! insert-if-absent against the unique index, so repeated or concurrent completion
//! events converge on the same row. When no rate can price the session the
//! problem is written to the remediation queue instead of defaulting to zero.

use crate::{
    config::academy::CompensationPolicy,
    core::{
        clock::AcademyClock,
        rates::{RateStore, TeacherRates, price_session},
        refs::TeacherRef,
        session::get_session,
    },
    entities::{
        Earning, RemediationItem, earning,
        enums::{CalculationMethod, SessionKind, SessionStatus},
        remediation_item, session,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    QueryOrder, Set, TransactionTrait, prelude::*, sea_query::OnConflict,
};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

/// What happened when a completed session was handed to the calculator.
#[derive(Debug, Clone, PartialEq)]
pub enum EarningOutcome {
    /// The session's earning, freshly created or already present
    Recorded(earning::Model),
    /// Policy says this session earns nothing
    Ineligible {
        /// Why the session does not pay
        reason: String,
    },
    /// No rate could price the session; an operator has to configure one
    Unpriced(remediation_item::Model),
}

impl EarningOutcome {
    /// The earning, when one was recorded.
    #[must_use]
    pub const fn earning(&self) -> Option<&earning::Model> {
        match self {
            Self::Recorded(earning) => Some(earning),
            Self::Ineligible { .. } | Self::Unpriced(_) => None,
        }
    }
}

/// Filter for [`list_earnings`]. `None` fields do not constrain the query.
#[derive(Debug, Clone, Copy, Default)]
pub struct EarningFilter {
    /// Only this teacher's earnings
    pub teacher: Option<TeacherRef>,
    /// Only earnings bucketed in this month (first day)
    pub month: Option<NaiveDate>,
    /// Only disputed (true) or undisputed (false)
    pub disputed: Option<bool>,
    /// Only finalized (true) or open (false)
    pub finalized: Option<bool>,
    /// Only earnings linked to this payout
    pub payout_id: Option<i64>,
}

/// Why a completed session earns nothing, if it doesn't.
///
/// Trial sessions are unpaid unless the policy says otherwise. A recorded teacher
/// attendance strictly below the threshold is unpaid; no record counts as attended.
#[must_use]
pub fn ineligibility(session: &session::Model, policy: &CompensationPolicy) -> Option<String> {
    if session.kind == SessionKind::Trial && !policy.pay_trial_sessions {
        return Some("trial sessions are not paid".to_string());
    }

    match session.teacher_attendance_percent {
        Some(percent) if percent < policy.min_teacher_attendance_percent => Some(format!(
            "teacher attended {percent:.1}% of the session, below the {:.1}% minimum",
            policy.min_teacher_attendance_percent
        )),
        _ => None,
    }
}

/// Computes the earning for a completed session.
///
/// Returns the existing earning unchanged when one is already recorded, `None` when
/// the session is not eligible for pay, and [`Error::NoRateConfigured`] (after queueing
/// the session for remediation) when nothing can price it.
#[instrument(skip(db, clock, rates, policy))]
pub async fn compute_earning<R>(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    rates: &R,
    policy: &CompensationPolicy,
    session_id: i64,
) -> Result<Option<earning::Model>>
where
    R: RateStore,
{
    let session = get_session(db, session_id).await?;
    if session.status != SessionStatus::Completed {
        return Err(Error::Validation {
            message: format!(
                "session {} is {}, earnings are only computed for completed sessions",
                session.session_ref(),
                session.status.as_str()
            ),
        });
    }

    if let Some(existing) = find_for_session(db, &session).await? {
        debug!(earning_id = existing.id, "earning already recorded");
        return Ok(Some(existing));
    }

    // Rates are read before the transaction opens
    let teacher_rates = rates.rates_for(session.teacher()).await?;

    let txn = db.begin().await?;
    let outcome = record_earning(&txn, clock, &session, &teacher_rates, policy).await?;
    txn.commit().await?;

    match outcome {
        EarningOutcome::Recorded(earning) => Ok(Some(earning)),
        EarningOutcome::Ineligible { .. } => Ok(None),
        EarningOutcome::Unpriced(item) => Err(Error::NoRateConfigured {
            teacher: TeacherRef {
                kind: item.teacher_type,
                id: item.teacher_id,
            },
            method: item.method,
        }),
    }
}

/// Records the earning for `session` on `conn`, which is normally the completion
/// transaction.
pub(crate) async fn record_earning<C>(
    conn: &C,
    clock: &impl AcademyClock,
    session: &session::Model,
    rates: &TeacherRates,
    policy: &CompensationPolicy,
) -> Result<EarningOutcome>
where
    C: ConnectionTrait,
{
    if let Some(existing) = find_for_session(conn, session).await? {
        return Ok(EarningOutcome::Recorded(existing));
    }

    if let Some(reason) = ineligibility(session, policy) {
        info!(session = %session.session_ref(), %reason, "session earns nothing");
        return Ok(EarningOutcome::Ineligible { reason });
    }

    let now = clock.now();
    let pricing = match price_session(session, rates, now) {
        Ok(pricing) => pricing,
        Err(Error::NoRateConfigured { teacher, method }) => {
            let item = open_remediation(conn, session, teacher, method, now).await?;
            return Ok(EarningOutcome::Unpriced(item));
        }
        Err(e) => return Err(e),
    };

    let completed_at = completion_instant(session, now);
    let earning = earning::ActiveModel {
        teacher_type: Set(session.teacher().kind),
        teacher_id: Set(session.teacher_id),
        session_type: Set(session.domain),
        session_id: Set(session.id),
        amount: Set(pricing.amount),
        calculation_method: Set(pricing.method),
        rate_snapshot: Set(serde_json::to_value(&pricing.snapshot)?),
        calculation_metadata: Set(calculation_metadata(session)),
        earning_month: Set(clock.month_of(completed_at)),
        session_completed_at: Set(completed_at),
        calculated_at: Set(now),
        is_finalized: Set(false),
        is_disputed: Set(false),
        dispute_notes: Set(None),
        payout_id: Set(None),
        updated_at: Set(now),
        ..Default::default()
    };

    let inserted = match Earning::insert(earning)
        .on_conflict(
            OnConflict::columns([earning::Column::SessionType, earning::Column::SessionId])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await
    {
        Ok(rows) => rows > 0,
        Err(DbErr::RecordNotInserted) => false,
        Err(e) => return Err(e.into()),
    };

    let recorded = find_for_session(conn, session)
        .await?
        .ok_or_else(|| Error::Validation {
            message: format!(
                "earning for session {} missing after insert",
                session.session_ref()
            ),
        })?;

    if inserted {
        info!(
            earning_id = recorded.id,
            session = %session.session_ref(),
            teacher = %session.teacher(),
            method = recorded.calculation_method.as_str(),
            amount = recorded.amount,
            month = %recorded.earning_month,
            "earning recorded"
        );
    } else {
        debug!(earning_id = recorded.id, "concurrent completion already recorded the earning");
    }

    resolve_remediations(conn, session, now).await?;
    Ok(EarningOutcome::Recorded(recorded))
}

/// The session's end, falling back to its scheduled start.
fn completion_instant(session: &session::Model, now: DateTime<Utc>) -> DateTime<Utc> {
    session.ended_at.or(session.scheduled_at).unwrap_or(now)
}

fn calculation_metadata(session: &session::Model) -> Json {
    json!({
        "subject": session.domain.as_str(),
        "session_type": session.kind.as_str(),
        "duration_minutes": session.actual_duration_minutes.or(session.duration_minutes),
        "scheduled_minutes": session.duration_minutes,
        "enrolled_students": session.students().len(),
        "attendee_count": session.attendee_count,
        "teacher_attendance_percent": session.teacher_attendance_percent,
        "circle_id": session.circle_id,
    })
}

async fn open_remediation<C>(
    conn: &C,
    session: &session::Model,
    teacher: TeacherRef,
    method: CalculationMethod,
    now: DateTime<Utc>,
) -> Result<remediation_item::Model>
where
    C: ConnectionTrait,
{
    let open = RemediationItem::find()
        .filter(remediation_item::Column::SessionType.eq(session.domain))
        .filter(remediation_item::Column::SessionId.eq(session.id))
        .filter(remediation_item::Column::ResolvedAt.is_null())
        .one(conn)
        .await?;
    if let Some(item) = open {
        return Ok(item);
    }

    let reason = Error::NoRateConfigured { teacher, method }.to_string();
    warn!(session = %session.session_ref(), %reason, "earning queued for remediation");

    let item = remediation_item::ActiveModel {
        session_type: Set(session.domain),
        session_id: Set(session.id),
        teacher_type: Set(teacher.kind),
        teacher_id: Set(teacher.id),
        method: Set(method),
        reason: Set(reason),
        created_at: Set(now),
        resolved_at: Set(None),
        ..Default::default()
    };
    Ok(item.insert(conn).await?)
}

async fn resolve_remediations<C>(
    conn: &C,
    session: &session::Model,
    now: DateTime<Utc>,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let result = RemediationItem::update_many()
        .col_expr(remediation_item::Column::ResolvedAt, Expr::value(now))
        .filter(remediation_item::Column::SessionType.eq(session.domain))
        .filter(remediation_item::Column::SessionId.eq(session.id))
        .filter(remediation_item::Column::ResolvedAt.is_null())
        .exec(conn)
        .await?;
    if result.rows_affected > 0 {
        info!(session = %session.session_ref(), "remediation resolved");
    }
    Ok(())
}

/// The earning recorded for a session, if any.
pub async fn find_for_session<C>(
    conn: &C,
    session: &session::Model,
) -> Result<Option<earning::Model>>
where
    C: ConnectionTrait,
{
    Earning::find()
        .filter(earning::Column::SessionType.eq(session.domain))
        .filter(earning::Column::SessionId.eq(session.id))
        .one(conn)
        .await
        .map_err(Into::into)
}

/// Finds an earning by id.
pub async fn get_earning<C>(conn: &C, earning_id: i64) -> Result<earning::Model>
where
    C: ConnectionTrait,
{
    Earning::find_by_id(earning_id)
        .one(conn)
        .await?
        .ok_or(Error::EarningNotFound { id: earning_id })
}

/// Lists earnings matching `filter`, oldest completion first.
pub async fn list_earnings(
    db: &DatabaseConnection,
    filter: &EarningFilter,
) -> Result<Vec<earning::Model>> {
    let mut query = Earning::find();
    if let Some(teacher) = filter.teacher {
        query = query
            .filter(earning::Column::TeacherType.eq(teacher.kind))
            .filter(earning::Column::TeacherId.eq(teacher.id));
    }
    if let Some(month) = filter.month {
        query = query.filter(earning::Column::EarningMonth.eq(month));
    }
    if let Some(disputed) = filter.disputed {
        query = query.filter(earning::Column::IsDisputed.eq(disputed));
    }
    if let Some(finalized) = filter.finalized {
        query = query.filter(earning::Column::IsFinalized.eq(finalized));
    }
    if let Some(payout_id) = filter.payout_id {
        query = query.filter(earning::Column::PayoutId.eq(payout_id));
    }

    query
        .order_by_asc(earning::Column::SessionCompletedAt)
        .order_by_asc(earning::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Sessions waiting for an operator to configure a rate, oldest first.
pub async fn list_open_remediations(
    db: &DatabaseConnection,
) -> Result<Vec<remediation_item::Model>> {
    RemediationItem::find()
        .filter(remediation_item::Column::ResolvedAt.is_null())
        .order_by_asc(remediation_item::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::core::rates::{DbRateStore, Rate, RateSnapshot, set_rate};
    use crate::core::session::{Completion, record_attendance};
    use crate::entities::enums::SessionDomain;
    use crate::test_utils::*;
    use chrono::{Duration, TimeZone};

    fn march_10() -> DateTime<Utc> {
        // 10:00 academy time (+03:00)
        Utc.with_ymd_and_hms(2025, 3, 10, 7, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_completed_individual_session_earns_individual_rate() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        set_rate(
            &db,
            &clock,
            TeacherRef::quran(7),
            CalculationMethod::IndividualRate,
            Rate::flat(120.0),
        )
        .await?;

        let Completion { session, earning } =
            complete_session_at(&db, &clock, individual_session(501), march_10(), 45).await?;
        let earning = earning.earning().cloned().unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.actual_duration_minutes, Some(45));
        assert_eq!(earning.amount, 120.0);
        assert_eq!(earning.calculation_method, CalculationMethod::IndividualRate);
        assert_eq!(earning.earning_month, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(earning.session_completed_at, march_10() + Duration::minutes(45));
        assert_eq!(earning.teacher(), TeacherRef::quran(7));
        assert!(!earning.is_finalized);
        assert!(!earning.is_disputed);
        assert_eq!(earning.calculation_metadata["subject"], "quran");
        assert_eq!(earning.calculation_metadata["duration_minutes"], 45);
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_computation_returns_the_same_earning() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        set_rate(
            &db,
            &clock,
            TeacherRef::quran(7),
            CalculationMethod::IndividualRate,
            Rate::flat(120.0),
        )
        .await?;
        let completion =
            complete_session_at(&db, &clock, individual_session(501), march_10(), 45).await?;
        let first = completion.earning.earning().cloned().unwrap();

        let policy = CompensationPolicy::default();
        for _ in 0..3 {
            let again = compute_earning(
                &db,
                &clock,
                &DbRateStore::new(&db),
                &policy,
                completion.session.id,
            )
            .await?
            .unwrap();
            assert_eq!(again, first);
        }

        let all = list_earnings(&db, &EarningFilter::default()).await?;
        assert_eq!(all.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_absorbed() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        set_rate(
            &db,
            &clock,
            TeacherRef::quran(7),
            CalculationMethod::IndividualRate,
            Rate::flat(120.0),
        )
        .await?;
        let completion =
            complete_session_at(&db, &clock, individual_session(501), march_10(), 45).await?;
        let first = completion.earning.earning().cloned().unwrap();

        // A late duplicate delivery sees different live rates
        let rates = TeacherRates::default()
            .with(CalculationMethod::IndividualRate, Rate::flat(999.0));
        let outcome = record_earning(
            &db,
            &clock,
            &completion.session,
            &rates,
            &CompensationPolicy::default(),
        )
        .await?;
        assert_eq!(outcome, EarningOutcome::Recorded(first));
        Ok(())
    }

    #[tokio::test]
    async fn test_rate_change_never_touches_recorded_snapshot() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        let teacher = TeacherRef::quran(7);
        set_rate(&db, &clock, teacher, CalculationMethod::IndividualRate, Rate::flat(120.0)).await?;
        let completion =
            complete_session_at(&db, &clock, individual_session(501), march_10(), 45).await?;
        let before = completion.earning.earning().cloned().unwrap();

        set_rate(&db, &clock, teacher, CalculationMethod::IndividualRate, Rate::flat(200.0)).await?;
        let after = compute_earning(
            &db,
            &clock,
            &DbRateStore::new(&db),
            &CompensationPolicy::default(),
            completion.session.id,
        )
        .await?
        .unwrap();

        assert_eq!(after.amount, 120.0);
        assert_eq!(after.rate_snapshot, before.rate_snapshot);
        let snapshot: RateSnapshot = serde_json::from_value(after.rate_snapshot).unwrap();
        assert_eq!(snapshot.rate, 120.0);

        // A session completed after the change picks up the new rate
        let later = complete_session_at(
            &db,
            &clock,
            individual_session(502),
            march_10() + Duration::days(1),
            45,
        )
        .await?;
        assert_eq!(later.earning.earning().unwrap().amount, 200.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_earning_month_follows_academy_offset() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        set_rate(
            &db,
            &clock,
            TeacherRef::quran(7),
            CalculationMethod::IndividualRate,
            Rate::flat(120.0),
        )
        .await?;

        // Ends 22:15 UTC on March 31st, which is April 1st 01:15 at +03:00
        let start = Utc.with_ymd_and_hms(2025, 3, 31, 21, 30, 0).unwrap();
        let completion =
            complete_session_at(&db, &clock, individual_session(501), start, 45).await?;
        assert_eq!(
            completion.earning.earning().unwrap().earning_month,
            NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_trial_sessions_are_unpaid_by_default() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        set_rate(
            &db,
            &clock,
            TeacherRef::quran(7),
            CalculationMethod::IndividualRate,
            Rate::flat(120.0),
        )
        .await?;

        let mut trial = individual_session(501);
        trial.kind = SessionKind::Trial;
        let completion = complete_session_at(&db, &clock, trial, march_10(), 30).await?;
        assert!(matches!(completion.earning, EarningOutcome::Ineligible { .. }));
        assert!(list_earnings(&db, &EarningFilter::default()).await?.is_empty());

        let paying = CompensationPolicy {
            pay_trial_sessions: true,
            ..CompensationPolicy::default()
        };
        let earning = compute_earning(
            &db,
            &clock,
            &DbRateStore::new(&db),
            &paying,
            completion.session.id,
        )
        .await?;
        assert_eq!(earning.unwrap().amount, 120.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_low_teacher_attendance_is_unpaid() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        set_rate(
            &db,
            &clock,
            TeacherRef::quran(7),
            CalculationMethod::IndividualRate,
            Rate::flat(120.0),
        )
        .await?;
        let policy = CompensationPolicy::default();

        let completion =
            complete_session_at(&db, &clock, individual_session(501), march_10(), 45).await?;
        let session_id = completion.session.id;
        assert!(completion.earning.earning().is_some());

        let mut low = session_fixture(SessionDomain::Quran, SessionKind::Individual, &[1]);
        low.teacher_attendance_percent = Some(49.9);
        assert!(ineligibility(&low, &policy).is_some());
        low.teacher_attendance_percent = Some(50.0);
        assert!(ineligibility(&low, &policy).is_none());
        low.teacher_attendance_percent = None;
        assert!(ineligibility(&low, &policy).is_none());

        // Attendance recorded after the earning does not change it
        record_attendance(&db, &clock, session_id, 1, Some(10.0)).await?;
        let earning =
            compute_earning(&db, &clock, &DbRateStore::new(&db), &policy, session_id).await?;
        assert_eq!(earning.unwrap().amount, 120.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_rate_goes_to_remediation_queue() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        let policy = CompensationPolicy::default();

        let completion =
            complete_session_at(&db, &clock, individual_session(501), march_10(), 45).await?;
        assert_eq!(completion.session.status, SessionStatus::Completed);
        let EarningOutcome::Unpriced(item) = &completion.earning else {
            panic!("expected remediation, got {:?}", completion.earning);
        };
        assert_eq!(item.method, CalculationMethod::IndividualRate);
        assert_eq!(
            item.reason,
            "no rate configured for teacher quran_teacher#7, method individual_rate"
        );

        // Retrying without a rate keeps a single open item
        let err = compute_earning(
            &db,
            &clock,
            &DbRateStore::new(&db),
            &policy,
            completion.session.id,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NoRateConfigured { .. }));
        assert_eq!(list_open_remediations(&db).await?.len(), 1);

        set_rate(
            &db,
            &clock,
            TeacherRef::quran(7),
            CalculationMethod::IndividualRate,
            Rate::flat(120.0),
        )
        .await?;
        let earning = compute_earning(
            &db,
            &clock,
            &DbRateStore::new(&db),
            &policy,
            completion.session.id,
        )
        .await?
        .unwrap();
        assert_eq!(earning.amount, 120.0);
        assert!(list_open_remediations(&db).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_compute_requires_completed_session() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        let session = crate::core::session::create_session(&db, &clock, individual_session(501))
            .await?;

        let result = compute_earning(
            &db,
            &clock,
            &DbRateStore::new(&db),
            &CompensationPolicy::default(),
            session.id,
        )
        .await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_earnings_filters() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        set_rate(
            &db,
            &clock,
            TeacherRef::quran(7),
            CalculationMethod::IndividualRate,
            Rate::flat(120.0),
        )
        .await?;
        complete_session_at(&db, &clock, individual_session(501), march_10(), 45).await?;
        complete_session_at(
            &db,
            &clock,
            individual_session(502),
            Utc.with_ymd_and_hms(2025, 4, 2, 7, 0, 0).unwrap(),
            45,
        )
        .await?;

        let march = EarningFilter {
            teacher: Some(TeacherRef::quran(7)),
            month: Some(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()),
            ..EarningFilter::default()
        };
        assert_eq!(list_earnings(&db, &march).await?.len(), 1);

        let other_teacher = EarningFilter {
            teacher: Some(TeacherRef::academic(7)),
            ..EarningFilter::default()
        };
        assert!(list_earnings(&db, &other_teacher).await?.is_empty());

        let open = EarningFilter {
            finalized: Some(false),
            disputed: Some(false),
            ..EarningFilter::default()
        };
        assert_eq!(list_earnings(&db, &open).await?.len(), 2);
        Ok(())
    }
}
