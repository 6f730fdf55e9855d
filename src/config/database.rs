//! Database configuration module for the ledger.
//!
//! This module handles `SQLite` database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs. Composite and partial unique indexes,
//! which the entity derive cannot express, are created with plain SQL afterwards.

use crate::entities::{Earning, Payout, RemediationItem, Session, Subscription, TeacherRate};
use crate::errors::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info, instrument};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/tutor_ledger.sqlite?mode=rwc";

/// Unique indexes backing the idempotency and one-payout-per-month guarantees.
const UNIQUE_INDEXES: [&str; 3] = [
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_earnings_session
        ON earnings (session_type, session_id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_teacher_rates_teacher_method
        ON teacher_rates (teacher_type, teacher_id, method)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_payouts_teacher_month
        ON payouts (teacher_type, teacher_id, payout_month)
        WHERE status <> 'rejected'",
];

/// Gets the database URL from the `DATABASE_URL` environment variable, falling back
/// to a local `SQLite` file.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by [`get_database_url`].
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    debug!("Connecting to database at {}", database_url);
    Database::connect(&database_url).await.map_err(Into::into)
}

async fn create_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

/// Creates all ledger tables and their unique indexes. Safe to run on every start.
#[instrument(skip(db))]
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, Subscription).await?;
    create_table(db, &schema, Session).await?;
    create_table(db, &schema, Payout).await?;
    create_table(db, &schema, Earning).await?;
    create_table(db, &schema, TeacherRate).await?;
    create_table(db, &schema, RemediationItem).await?;

    for index in UNIQUE_INDEXES {
        db.execute_unprepared(index).await?;
    }

    info!("Database tables and unique indexes ensured");
    Ok(())
}
