//! Protocol-level tests: the interpreter side is played by hand over the channel.

use super::*;
use crate::types::now_millis;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn step_with_channel() -> (Step, mpsc::UnboundedReceiver<Yield>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Step::new("exec-1", Some(json!({ "user": "ada" })), tx), rx)
}

async fn expect(rx: &mut mpsc::UnboundedReceiver<Yield>, expected: StepResponse) -> oneshot::Sender<Resume> {
    let Yield { response, reply } = rx.recv().await.expect("primitive should yield");
    assert_eq!(response, expected);
    reply
}

#[tokio::test]
async fn test_run_replays_cached_result_without_invoking_body() {
    let (step, mut rx) = step_with_channel();
    let invoked = Arc::new(AtomicBool::new(false));
    let flag = invoked.clone();

    let program = tokio::spawn(async move {
        step.run(|| async move {
            flag.store(true, Ordering::SeqCst);
            anyhow::Ok(1_i64)
        })
        .await
    });

    expect(&mut rx, StepResponse::StepKey { key: None })
        .await
        .send(Resume::Next(None))
        .unwrap();
    expect(&mut rx, StepResponse::CacheCheck)
        .await
        .send(Resume::Next(Some(StepResponse::result(json!(42)))))
        .unwrap();
    expect(&mut rx, StepResponse::result(json!(42)))
        .await
        .send(Resume::Next(None))
        .unwrap();

    assert_eq!(program.await.unwrap().unwrap(), 42);
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_run_keyed_reports_fresh_result() {
    let (step, mut rx) = step_with_channel();

    let program = tokio::spawn(async move {
        step.run_keyed("fetch-user", || async { anyhow::Ok("ada".to_string()) })
            .await
    });

    expect(&mut rx, StepResponse::StepKey { key: Some("fetch-user".into()) })
        .await
        .send(Resume::Next(None))
        .unwrap();
    expect(&mut rx, StepResponse::CacheCheck)
        .await
        .send(Resume::Next(None))
        .unwrap();
    expect(&mut rx, StepResponse::result(json!("ada")))
        .await
        .send(Resume::Next(None))
        .unwrap();

    assert_eq!(program.await.unwrap().unwrap(), "ada");
}

#[tokio::test]
async fn test_thrown_error_reaches_the_program() {
    let (step, mut rx) = step_with_channel();

    let program = tokio::spawn(async move {
        step.run(|| async { Err::<(), _>(anyhow::anyhow!("Step error")) })
            .await
    });

    expect(&mut rx, StepResponse::StepKey { key: None })
        .await
        .send(Resume::Next(None))
        .unwrap();
    expect(&mut rx, StepResponse::CacheCheck)
        .await
        .send(Resume::Next(None))
        .unwrap();

    let Yield { response, reply } = rx.recv().await.unwrap();
    let err = match response {
        StepResponse::Error { err, max_attempts, .. } => {
            assert_eq!(max_attempts, 1);
            err
        }
        other => panic!("expected step-error, got {:?}", other),
    };
    assert_eq!(err.message, "Step error");
    reply.send(Resume::Throw(err.clone())).unwrap();

    assert_eq!(program.await.unwrap().unwrap_err(), err);
}

#[tokio::test]
async fn test_delay_schedules_from_now() {
    let (step, mut rx) = step_with_channel();
    let before = now_millis();

    let program = tokio::spawn(async move { step.delay(Duration::from_millis(250)).await });

    expect(&mut rx, StepResponse::StepKey { key: None })
        .await
        .send(Resume::Next(None))
        .unwrap();
    expect(&mut rx, StepResponse::CacheCheck)
        .await
        .send(Resume::Next(None))
        .unwrap();

    let Yield { response, reply } = rx.recv().await.unwrap();
    match response {
        StepResponse::Delay { resume_at } => {
            assert!(resume_at >= before + 250);
            assert!(resume_at <= now_millis() + 250);
        }
        other => panic!("expected step-delay, got {:?}", other),
    }
    reply.send(Resume::Next(None)).unwrap();

    program.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_step_outside_of_a_pass_is_detached() {
    let (step, rx) = step_with_channel();
    drop(rx);

    let err = step
        .run(|| async { anyhow::Ok(1) })
        .await
        .unwrap_err();

    assert_eq!(err.name, "DetachedStep");
}

#[test]
fn test_params_as() {
    #[derive(serde::Deserialize)]
    struct Params {
        user: String,
    }

    let (step, _rx) = step_with_channel();
    let params: Params = step.params_as().unwrap();

    assert_eq!(params.user, "ada");
    assert_eq!(step.execution_id(), "exec-1");
    assert!(step.params_as::<Vec<u8>>().is_err());
}
