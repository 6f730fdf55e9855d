#![allow(clippy::result_large_err)]

use dotenvy::dotenv;
use std::env;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tutor_ledger::{
    config::{academy, database},
    core::{
        clock::{AcademyClock, SystemClock, parse_month, previous_month},
        earning::list_open_remediations,
        payout::{format_payout_summary, generate_payouts_for_month},
    },
    errors::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file, env vars can also be set externally
    dotenv().ok();

    // 3. Academy configuration and clock
    let config = academy::load_default_config()
        .inspect_err(|e| error!("Failed to load configuration: {}", e))?;
    let clock = SystemClock::new(config.academy.timezone()?);
    info!(
        academy = %config.academy.name,
        offset = %config.academy.utc_offset,
        "Configuration loaded"
    );

    // 4. Database
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db).await?;
    info!("Database initialized successfully.");

    // 5. Monthly payout run, previous academy month unless PAYOUT_MONTH is set
    let month = match env::var("PAYOUT_MONTH") {
        Ok(value) => parse_month(&value)?,
        Err(_) => previous_month(clock.current_month()),
    };
    let run = generate_payouts_for_month(&db, &clock, month).await?;
    info!(
        "\n{}",
        format_payout_summary(&run, &config.academy.currency)
    );

    let open = list_open_remediations(&db).await?;
    if !open.is_empty() {
        warn!(count = open.len(), "Sessions waiting for a rate to be configured");
        for item in &open {
            warn!(session_id = item.session_id, "{}", item.reason);
        }
    }

    Ok(())
}
