//! Demo binary: connects to the database, hydrates the engine, seeds
//! configured envelopes, runs this month's piggybank contributions, and
//! prints the month summary.

use chrono::Utc;
use dotenvy::dotenv;
use envelope_ledger::config;
use envelope_ledger::core::piggybank::format_contribution_summary;
use envelope_ledger::core::report::format_month_summary;
use envelope_ledger::engine::{BudgetEngine, EnvelopeDraft, SystemClock};
use envelope_ledger::errors::Result;
use envelope_ledger::model::{MonthKey, Money, PiggybankConfig};
use envelope_ledger::store::OrmStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Load the application configuration
    let app_config = config::load_default_config()?;

    // 4. Connect and make sure the tables exist
    let store = OrmStore::connect(&app_config.database_url()).await?;
    store.create_tables().await?;
    info!("database initialized");

    // 5. Build the engine and hydrate from the store
    let engine = BudgetEngine::new(
        store.clone(),
        store.clone(),
        SystemClock,
        app_config.confirm_timeout(),
    );
    engine.hydrate().await?;

    // 6. Seed configured envelopes that do not exist yet
    let this_month = MonthKey::from_datetime(&Utc::now());
    let existing: Vec<String> = engine
        .envelopes()
        .into_iter()
        .map(|envelope| envelope.name)
        .collect();
    for seed in &app_config.envelopes {
        if existing.contains(&seed.name) {
            continue;
        }
        let piggybank = match seed.monthly_contribution {
            Some(contribution) => Some(PiggybankConfig {
                target_amount: seed.target_amount.map(Money::from_dollars).transpose()?,
                monthly_contribution: Money::from_dollars(contribution)?,
                color: "#9e9e9e".to_string(),
                paused: false,
                created_month: this_month,
            }),
            None => None,
        };
        let draft = EnvelopeDraft {
            name: seed.name.clone(),
            order_index: seed.order_index,
            category_id: seed.category.clone(),
            piggybank,
        };
        if let Err(err) = engine.create_envelope(draft).await {
            warn!(name = %seed.name, error = %err, "failed to seed envelope");
        }
    }

    // 7. Run this month's piggybank contributions
    let contributions = engine.run_contributions(this_month).await;
    println!("{}", format_contribution_summary(this_month, &contributions));

    // 8. Print the month summary
    println!("{}", format_month_summary(&engine.month_summary(this_month)));
    Ok(())
}
