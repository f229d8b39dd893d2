use anyhow::Context;
use cadenza_core::config::Config;
use cadenza_core::db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    println!("Running database migrations against {}...", config.database_url);

    let pool = db::connect(&config.database_url).await?;
    db::migrate(&pool).await?;

    println!("✓ Migrations completed successfully!");
    Ok(())
}
