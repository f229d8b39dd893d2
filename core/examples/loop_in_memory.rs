//! A loop of steps with a short delay between each, run on the in-process
//! scheduler. Every delay ends a pass, so the program is replayed ten times
//! while each step body still runs exactly once.

use cadenza_core::{
    cli, local_scheduler, MemoryPersister, Step, TriggerOptions, Workflow, WorkflowEngine,
    WorkflowRouter,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::init_tracing("info");

    let numbers = Workflow::new(|step: Step| async move {
        let mut numbers = Vec::new();
        for i in 0..10_i64 {
            let num: i64 = step.run(|| async move { anyhow::Ok(i * 2) }).await?;
            step.delay(Duration::from_millis(10)).await?;
            numbers.push(num);
        }
        anyhow::Ok(numbers)
    });

    let (scheduler, waker) = local_scheduler();
    let engine = Arc::new(WorkflowEngine::new(
        WorkflowRouter::new().with("numbers", numbers),
        Arc::new(MemoryPersister::new()),
        Arc::new(scheduler),
    ));
    let handle = engine.clone().spawn(waker);

    let result = engine.trigger_and_wait("numbers", TriggerOptions::new()).await?;
    println!("\nWorkflow Result: {}\n", result);

    handle.stop().await?;
    Ok(())
}
