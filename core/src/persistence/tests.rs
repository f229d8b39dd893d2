use super::*;
use crate::db;

async fn sqlite_persister() -> SqlitePersister {
    let pool = db::connect_and_migrate("sqlite::memory:").await.unwrap();
    SqlitePersister::new(pool)
}

/// Behaviour every persister must share.
async fn check_latest_attempt_wins(persister: &dyn StepPersister) {
    assert!(persister.read_step("exec-1", "$$step-index-0$$").await.unwrap().is_none());

    persister
        .write_step("exec-1", "$$step-index-0$$", 0, false, r#"{"type":"step-error"}"#)
        .await
        .unwrap();
    persister
        .write_step("exec-1", "$$step-index-0$$", 1, true, r#"{"type":"step-result","result":7}"#)
        .await
        .unwrap();
    persister
        .write_step("exec-2", "$$step-index-0$$", 0, true, r#"{"type":"step-result","result":1}"#)
        .await
        .unwrap();

    let record = persister
        .read_step("exec-1", "$$step-index-0$$")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.meta.attempt, 1);
    assert!(record.meta.done);
    assert_eq!(record.payload, r#"{"type":"step-result","result":7}"#);

    assert!(persister.read_step("exec-1", "other").await.unwrap().is_none());
}

async fn check_duplicate_attempt_rejected(persister: &dyn StepPersister) {
    persister.write_step("exec-1", "charge", 0, true, "{}").await.unwrap();

    let err = persister
        .write_step("exec-1", "charge", 0, true, "{}")
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::DuplicateAttempt { attempt: 0, .. }));
}

async fn check_list_and_delete(persister: &dyn StepPersister) {
    persister.write_step("exec-1", "b", 0, true, "first").await.unwrap();
    persister.write_step("exec-1", "a", 0, false, "second").await.unwrap();
    persister.write_step("exec-1", "a", 1, true, "third").await.unwrap();
    persister.write_step("exec-9", "a", 0, true, "elsewhere").await.unwrap();

    let records = persister.list_steps("exec-1").await.unwrap();
    let payloads: Vec<&str> = records.iter().map(|r| r.payload.as_str()).collect();
    assert_eq!(payloads, vec!["first", "second", "third"]);
    assert_eq!(records[2].attempt, 1);
    assert!(!records[1].done);

    assert_eq!(persister.delete_all().await.unwrap(), 4);
    assert!(persister.list_steps("exec-1").await.unwrap().is_empty());
    assert!(persister.read_step("exec-9", "a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_memory_latest_attempt_wins() {
    check_latest_attempt_wins(&MemoryPersister::new()).await;
}

#[tokio::test]
async fn test_sqlite_latest_attempt_wins() {
    check_latest_attempt_wins(&sqlite_persister().await).await;
}

#[tokio::test]
async fn test_memory_duplicate_attempt_rejected() {
    check_duplicate_attempt_rejected(&MemoryPersister::new()).await;
}

#[tokio::test]
async fn test_sqlite_duplicate_attempt_rejected() {
    check_duplicate_attempt_rejected(&sqlite_persister().await).await;
}

#[tokio::test]
async fn test_memory_list_and_delete() {
    check_list_and_delete(&MemoryPersister::new()).await;
}

#[tokio::test]
async fn test_sqlite_list_and_delete() {
    check_list_and_delete(&sqlite_persister().await).await;
}

#[tokio::test]
async fn test_memory_clones_share_storage() {
    let persister = MemoryPersister::new();
    let clone = persister.clone();

    persister.write_step("exec-1", "k", 0, true, "v").await.unwrap();

    assert!(clone.read_step("exec-1", "k").await.unwrap().is_some());
}
