//! Earning disputes and direct finalization.
//!
//! Disputed earnings are left out of payout aggregation until resolved. The
//! `dispute_notes` column is an append-only audit trail: entries are only ever
//! added, and when the trail outgrows its character budget the oldest text is
//! dropped first.

use crate::{
    config::academy::DisputeConfig,
    core::{clock::AcademyClock, earning::get_earning},
    entities::{Earning, earning},
    errors::{Error, Result},
};
use sea_orm::{Set, prelude::*};
use tracing::info;

/// Appends `entry` to an existing trail, keeping at most `limit` characters.
#[must_use]
pub fn append_note(existing: Option<&str>, entry: &str, limit: usize) -> String {
    let combined = match existing {
        Some(previous) if !previous.is_empty() => format!("{previous}\n{entry}"),
        _ => entry.to_string(),
    };

    let excess = combined.chars().count().saturating_sub(limit);
    if excess == 0 {
        combined
    } else {
        combined.chars().skip(excess).collect()
    }
}

fn stamped(clock: &impl AcademyClock, label: &str, notes: &str) -> String {
    let at = clock.now().with_timezone(&clock.timezone());
    format!("[{}] {label}: {}", at.format("%Y-%m-%d %H:%M %:z"), notes.trim())
}

fn require_notes(earning_id: i64, notes: &str) -> Result<()> {
    if notes.trim().is_empty() {
        return Err(Error::Validation {
            message: format!("notes are required to change the dispute on earning {earning_id}"),
        });
    }
    Ok(())
}

/// Flags an earning as disputed. Finalized earnings can be disputed too.
pub async fn raise_dispute(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    config: &DisputeConfig,
    earning_id: i64,
    notes: &str,
) -> Result<earning::Model> {
    require_notes(earning_id, notes)?;
    let current = get_earning(db, earning_id).await?;
    if current.is_disputed {
        return Err(Error::DisputeState {
            earning_id,
            message: "already disputed".to_string(),
        });
    }

    let trail = append_note(
        current.dispute_notes.as_deref(),
        &stamped(clock, "disputed", notes),
        config.notes_char_limit,
    );
    let result = Earning::update_many()
        .set(earning::ActiveModel {
            is_disputed: Set(true),
            dispute_notes: Set(Some(trail)),
            updated_at: Set(clock.now()),
            ..Default::default()
        })
        .filter(earning::Column::Id.eq(earning_id))
        .filter(earning::Column::IsDisputed.eq(false))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::DisputeState {
            earning_id,
            message: "disputed concurrently".to_string(),
        });
    }

    info!(earning_id, finalized = current.is_finalized, "dispute raised");
    get_earning(db, earning_id).await
}

/// Clears a dispute and finalizes the earning.
pub async fn resolve_dispute(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    config: &DisputeConfig,
    earning_id: i64,
    resolution_notes: &str,
) -> Result<earning::Model> {
    require_notes(earning_id, resolution_notes)?;
    let current = get_earning(db, earning_id).await?;
    if !current.is_disputed {
        return Err(Error::DisputeState {
            earning_id,
            message: "not disputed, nothing to resolve".to_string(),
        });
    }

    let trail = append_note(
        current.dispute_notes.as_deref(),
        &stamped(clock, "resolved", resolution_notes),
        config.notes_char_limit,
    );
    let result = Earning::update_many()
        .set(earning::ActiveModel {
            is_disputed: Set(false),
            is_finalized: Set(true),
            dispute_notes: Set(Some(trail)),
            updated_at: Set(clock.now()),
            ..Default::default()
        })
        .filter(earning::Column::Id.eq(earning_id))
        .filter(earning::Column::IsDisputed.eq(true))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::DisputeState {
            earning_id,
            message: "resolved concurrently".to_string(),
        });
    }

    info!(earning_id, "dispute resolved");
    get_earning(db, earning_id).await
}

/// Finalizes an earning outside the payout flow.
pub async fn finalize_earning(
    db: &DatabaseConnection,
    clock: &impl AcademyClock,
    earning_id: i64,
) -> Result<earning::Model> {
    let current = get_earning(db, earning_id).await?;
    if current.is_disputed {
        return Err(Error::EarningLocked {
            earning_id,
            reason: "it is disputed".to_string(),
        });
    }
    if current.is_finalized {
        return Err(Error::EarningLocked {
            earning_id,
            reason: "it is already finalized".to_string(),
        });
    }

    let result = Earning::update_many()
        .set(earning::ActiveModel {
            is_finalized: Set(true),
            updated_at: Set(clock.now()),
            ..Default::default()
        })
        .filter(earning::Column::Id.eq(earning_id))
        .filter(earning::Column::IsDisputed.eq(false))
        .filter(earning::Column::IsFinalized.eq(false))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::ConcurrentModification {
            entity: "earning",
            id: earning_id,
        });
    }

    info!(earning_id, "earning finalized");
    get_earning(db, earning_id).await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::refs::TeacherRef;
    use crate::entities::enums::CalculationMethod;
    use crate::test_utils::*;
    use chrono::Duration;

    #[test]
    fn test_append_note_keeps_history() {
        let first = append_note(None, "a", 100);
        let second = append_note(Some(&first), "b", 100);
        assert_eq!(second, "a\nb");
    }

    #[test]
    fn test_append_note_drops_oldest_text_first() {
        let trail = append_note(Some("0123456789"), "abcde", 8);
        assert_eq!(trail, "89\nabcde");
        assert_eq!(trail.chars().count(), 8);

        // Character based, never splits a multi-byte character
        let arabic = append_note(Some("مراجعة"), "تم", 4);
        assert_eq!(arabic, "ة\nتم");
    }

    #[tokio::test]
    async fn test_raise_then_resolve() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        let config = DisputeConfig::default();
        let earning = seed_earning(
            &db,
            TeacherRef::quran(7),
            1,
            CalculationMethod::IndividualRate,
            120.0,
            march(),
        )
        .await?;

        let disputed = raise_dispute(&db, &clock, &config, earning.id, "student says 30 minutes")
            .await?;
        assert!(disputed.is_disputed);
        assert!(!disputed.is_finalized);

        let again = raise_dispute(&db, &clock, &config, earning.id, "again").await;
        assert!(matches!(again, Err(Error::DisputeState { .. })));

        clock.advance(Duration::hours(2));
        let resolved = resolve_dispute(&db, &clock, &config, earning.id, "recording confirms 45")
            .await?;
        assert!(!resolved.is_disputed);
        assert!(resolved.is_finalized);

        let notes = resolved.dispute_notes.unwrap();
        let lines: Vec<&str> = notes.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("disputed: student says 30 minutes"));
        assert!(lines[1].ends_with("resolved: recording confirms 45"));
        assert!(lines[0].contains("+03:00"));
        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_requires_open_dispute() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        let earning = seed_earning(
            &db,
            TeacherRef::quran(7),
            1,
            CalculationMethod::IndividualRate,
            120.0,
            march(),
        )
        .await?;

        let result =
            resolve_dispute(&db, &clock, &DisputeConfig::default(), earning.id, "fine").await;
        assert!(matches!(result, Err(Error::DisputeState { .. })));
        assert_eq!(get_earning(&db, earning.id).await?, earning);
        Ok(())
    }

    #[tokio::test]
    async fn test_finalized_earning_can_still_be_disputed() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        let earning = seed_earning(
            &db,
            TeacherRef::quran(7),
            1,
            CalculationMethod::IndividualRate,
            120.0,
            march(),
        )
        .await?;

        finalize_earning(&db, &clock, earning.id).await?;
        let disputed =
            raise_dispute(&db, &clock, &DisputeConfig::default(), earning.id, "overpaid").await?;
        assert!(disputed.is_finalized);
        assert!(disputed.is_disputed);
        Ok(())
    }

    #[tokio::test]
    async fn test_finalize_blocked_by_dispute_or_prior_finalization() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        let config = DisputeConfig::default();
        let disputed = seed_earning(
            &db,
            TeacherRef::quran(7),
            1,
            CalculationMethod::IndividualRate,
            120.0,
            march(),
        )
        .await?;
        raise_dispute(&db, &clock, &config, disputed.id, "check").await?;
        assert!(matches!(
            finalize_earning(&db, &clock, disputed.id).await,
            Err(Error::EarningLocked { .. })
        ));

        let plain = seed_earning(
            &db,
            TeacherRef::quran(7),
            2,
            CalculationMethod::IndividualRate,
            120.0,
            march(),
        )
        .await?;
        finalize_earning(&db, &clock, plain.id).await?;
        let err = finalize_earning(&db, &clock, plain.id).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("earning {} cannot be finalized: it is already finalized", plain.id)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_dispute_requires_notes() -> Result<()> {
        let db = setup_test_db().await?;
        let clock = test_clock();
        let earning = seed_earning(
            &db,
            TeacherRef::quran(7),
            1,
            CalculationMethod::IndividualRate,
            120.0,
            march(),
        )
        .await?;

        let result = raise_dispute(&db, &clock, &DisputeConfig::default(), earning.id, " ").await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }
}
