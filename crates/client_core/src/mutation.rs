use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::ClientError;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Issues the server round trip for a mutated resource. On success the
/// server returns the canonical value, which may differ from what was sent
/// (the server may normalize fields).
#[async_trait]
pub trait ResourceWriter<T>: Send + Sync {
    async fn write(&self, value: &T) -> anyhow::Result<T>;
}

struct Pending<T> {
    /// Rollback point: the canonical value before the first mutation in the
    /// current in-flight chain. Superseding mutations inherit it.
    snapshot: T,
    generation: u64,
}

struct StoreState<T> {
    canonical: T,
    visible: T,
    pending: Option<Pending<T>>,
}

/// Optimistic-mutation coordinator for one user-editable resource. The
/// visible value updates before the round trip; a failure restores the exact
/// pre-mutation snapshot. A `mutate` while one is in flight supersedes it:
/// the superseded call's outcome is discarded.
pub struct OptimisticStore<T> {
    state: Mutex<StoreState<T>>,
    generation: AtomicU64,
    writer: Arc<dyn ResourceWriter<T>>,
    request_timeout: Duration,
}

impl<T: Clone + Send> OptimisticStore<T> {
    pub fn new(initial: T, writer: Arc<dyn ResourceWriter<T>>) -> Self {
        Self::with_timeout(initial, writer, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        initial: T,
        writer: Arc<dyn ResourceWriter<T>>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(StoreState {
                canonical: initial.clone(),
                visible: initial,
                pending: None,
            }),
            generation: AtomicU64::new(0),
            writer,
            request_timeout,
        }
    }

    /// The value a view should render right now: the outstanding optimistic
    /// value while a mutation is pending, the canonical value otherwise.
    pub fn value(&self) -> T {
        self.state.lock().visible.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Replaces the canonical value from a push-channel update. Ignored
    /// while a mutation is pending so the optimistic value stays visible.
    pub fn sync_canonical(&self, value: T) {
        let mut state = self.state.lock();
        state.canonical = value.clone();
        if state.pending.is_none() {
            state.visible = value;
        }
    }

    pub async fn mutate(&self, new_value: T) -> Result<T, ClientError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.state.lock();
            let snapshot = match state.pending.take() {
                Some(previous) => {
                    debug!("superseding in-flight mutation");
                    previous.snapshot
                }
                None => state.canonical.clone(),
            };
            state.visible = new_value.clone();
            state.pending = Some(Pending {
                snapshot,
                generation,
            });
        }

        let outcome =
            tokio::time::timeout(self.request_timeout, self.writer.write(&new_value)).await;

        let mut state = self.state.lock();
        let pending = match state.pending.take() {
            Some(pending) if pending.generation == generation => pending,
            other => {
                // a newer mutate superseded this one; its outcome is void
                state.pending = other;
                return Err(ClientError::MutationConflict);
            }
        };
        match outcome {
            Ok(Ok(server_value)) => {
                state.canonical = server_value.clone();
                state.visible = server_value.clone();
                Ok(server_value)
            }
            Ok(Err(err)) => {
                state.canonical = pending.snapshot.clone();
                state.visible = pending.snapshot;
                Err(ClientError::MutationFailed(format!("{err:#}")))
            }
            Err(_) => {
                state.canonical = pending.snapshot.clone();
                state.visible = pending.snapshot;
                Err(ClientError::MutationTimeout(self.request_timeout))
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/mutation_tests.rs"]
mod tests;
