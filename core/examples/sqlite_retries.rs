//! A durable workflow on SQLite: a flaky step retried with `RetryableError`,
//! a delay, and a poll that waits for an external condition.
//!
//! Uses the database from `cadenza.toml` / `CADENZA_DATABASE_URL`, falling back
//! to `sqlite://cadenza.db`.

use cadenza_core::config::Config;
use cadenza_core::scheduler::SqliteScheduler;
use cadenza_core::{
    cli, db, PollOptions, RetryableError, SqlitePersister, Step, StepPersister, TriggerOptions,
    Workflow, WorkflowEngine, WorkflowRouter,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    cli::init_tracing(&config.log_level);

    let pool = db::connect_and_migrate(&config.database_url).await?;
    let persister = Arc::new(SqlitePersister::new(pool.clone()));
    let scheduler = SqliteScheduler::new(pool);
    let waker = scheduler
        .waker(config.poll_interval())
        .with_visibility_timeout(config.visibility_timeout());

    let dice = Arc::new(AtomicU32::new(0));
    let checkout = {
        let dice = dice.clone();
        Workflow::new(move |step: Step| {
            let dice = dice.clone();
            async move {
                let order: serde_json::Value = step.params_as()?;

                let charged: i64 = step
                    .run_keyed("charge", || async move {
                        let roll = dice.fetch_add(1, Ordering::SeqCst);
                        println!("Charging card, attempt {}", roll + 1);
                        if roll < 2 {
                            println!("Unlucky! Payment provider is busy");
                            return Err(
                                RetryableError::new("Unlucky", 10, Duration::from_millis(200)).into()
                            );
                        }
                        anyhow::Ok(order["amount"].as_i64().unwrap_or_default())
                    })
                    .await?;

                step.delay(Duration::from_millis(500)).await?;

                let started = step.run(|| async { anyhow::Ok(cadenza_core::now_millis()) }).await?;
                step.poll(PollOptions::new(20, Duration::from_millis(100)), || async move {
                    anyhow::Ok(cadenza_core::now_millis() - started >= 300)
                })
                .await?;

                anyhow::Ok(json!({ "charged": charged, "status": "shipped" }))
            }
        })
    };

    let engine = Arc::new(
        WorkflowEngine::new(
            WorkflowRouter::new().with("checkout", checkout),
            persister.clone(),
            Arc::new(scheduler),
        )
        .with_trigger_timeout(config.trigger_timeout()),
    );
    let handle = engine.clone().spawn(waker);

    let execution_id = uuid::Uuid::new_v4().to_string();
    let result = engine
        .trigger_and_wait(
            "checkout",
            TriggerOptions::new()
                .execution_id(execution_id.clone())
                .params(json!({ "amount": 4200 })),
        )
        .await?;
    println!("\nWorkflow Result: {}\n", result);

    for record in persister.list_steps(&execution_id).await? {
        println!(
            "  {} | attempt {} | done {}",
            record.step_key, record.attempt, record.done
        );
    }

    handle.stop().await?;
    Ok(())
}
