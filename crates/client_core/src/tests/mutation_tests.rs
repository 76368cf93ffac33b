use super::*;

use std::collections::VecDeque;

use anyhow::anyhow;
use serde_json::{json, Value};

enum WriteBehavior {
    /// Return this canonical value.
    Succeed(Value),
    /// Return the input unchanged.
    Echo,
    Fail(&'static str),
    /// Never resolve; the caller's timeout or a superseding mutate ends it.
    Hang,
}

#[derive(Default)]
struct ScriptedWriter {
    script: Mutex<VecDeque<WriteBehavior>>,
}

impl ScriptedWriter {
    fn with(script: impl IntoIterator<Item = WriteBehavior>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
        })
    }
}

#[async_trait]
impl ResourceWriter<Value> for ScriptedWriter {
    async fn write(&self, value: &Value) -> anyhow::Result<Value> {
        let behavior = self.script.lock().pop_front().unwrap_or(WriteBehavior::Echo);
        match behavior {
            WriteBehavior::Succeed(canonical) => Ok(canonical),
            WriteBehavior::Echo => Ok(value.clone()),
            WriteBehavior::Fail(message) => Err(anyhow!(message)),
            WriteBehavior::Hang => std::future::pending().await,
        }
    }
}

fn theme(name: &str) -> Value {
    json!({ "theme": name })
}

#[tokio::test]
async fn successful_mutation_adopts_the_server_value() {
    let writer = ScriptedWriter::with([WriteBehavior::Succeed(json!({
        "theme": "dark",
        "version": 2,
    }))]);
    let store = OptimisticStore::new(theme("light"), writer as _);

    let result = store.mutate(theme("dark")).await.expect("write succeeds");

    // the server may normalize; its value wins over what was sent
    assert_eq!(result, json!({ "theme": "dark", "version": 2 }));
    assert_eq!(store.value(), json!({ "theme": "dark", "version": 2 }));
    assert!(!store.is_pending());
}

#[tokio::test]
async fn failed_mutation_restores_the_exact_snapshot() {
    let writer = ScriptedWriter::with([WriteBehavior::Fail("500 from server")]);
    let store = OptimisticStore::new(theme("light"), writer as _);

    let err = store
        .mutate(theme("dark"))
        .await
        .expect_err("write fails");
    assert!(matches!(err, ClientError::MutationFailed(_)));
    assert_eq!(store.value(), theme("light"));
    assert!(!store.is_pending());
}

#[tokio::test]
async fn timed_out_mutation_rolls_back() {
    let writer = ScriptedWriter::with([WriteBehavior::Hang]);
    let store = OptimisticStore::with_timeout(
        theme("light"),
        writer as _,
        Duration::from_millis(50),
    );

    let err = store
        .mutate(theme("dark"))
        .await
        .expect_err("write times out");
    assert!(matches!(err, ClientError::MutationTimeout(_)));
    assert_eq!(store.value(), theme("light"));
}

#[tokio::test]
async fn optimistic_value_is_visible_while_in_flight() {
    let writer = ScriptedWriter::with([WriteBehavior::Hang]);
    let store = Arc::new(OptimisticStore::with_timeout(
        theme("light"),
        writer as _,
        Duration::from_millis(200),
    ));

    let in_flight = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.mutate(theme("dark")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(store.is_pending());
    assert_eq!(store.value(), theme("dark"));

    // push-channel updates must not clobber the optimistic value
    store.sync_canonical(theme("server-pushed"));
    assert_eq!(store.value(), theme("dark"));

    let err = in_flight
        .await
        .expect("task completes")
        .expect_err("write times out");
    assert!(matches!(err, ClientError::MutationTimeout(_)));
}

#[tokio::test]
async fn newer_mutation_supersedes_the_in_flight_one() {
    let writer = ScriptedWriter::with([WriteBehavior::Hang, WriteBehavior::Echo]);
    let store = Arc::new(OptimisticStore::with_timeout(
        theme("light"),
        writer as _,
        Duration::from_millis(200),
    ));

    let first = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.mutate(theme("dark")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = store.mutate(theme("blue")).await.expect("newer wins");
    assert_eq!(second, theme("blue"));
    assert_eq!(store.value(), theme("blue"));

    let err = first
        .await
        .expect("task completes")
        .expect_err("superseded outcome is discarded");
    assert!(matches!(err, ClientError::MutationConflict));
    assert_eq!(store.value(), theme("blue"));
}

#[tokio::test]
async fn superseding_mutation_that_fails_restores_the_original_snapshot() {
    let writer = ScriptedWriter::with([WriteBehavior::Hang, WriteBehavior::Fail("rejected")]);
    let store = Arc::new(OptimisticStore::with_timeout(
        theme("light"),
        writer as _,
        Duration::from_millis(200),
    ));

    let first = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.mutate(theme("dark")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = store
        .mutate(theme("blue"))
        .await
        .expect_err("superseding write fails");
    assert!(matches!(err, ClientError::MutationFailed(_)));
    // rollback goes to the value before the whole chain, not to "dark"
    assert_eq!(store.value(), theme("light"));

    let err = first.await.expect("task completes").expect_err("superseded");
    assert!(matches!(err, ClientError::MutationConflict));
    assert_eq!(store.value(), theme("light"));
}

#[tokio::test]
async fn canonical_sync_applies_when_idle() {
    let writer = ScriptedWriter::with([]);
    let store = OptimisticStore::new(theme("light"), writer as _);

    store.sync_canonical(theme("server"));
    assert_eq!(store.value(), theme("server"));
}
