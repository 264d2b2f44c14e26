//! Lazy single-flight initialization for stateful backends
//!
//! The embedding model, the vector index and the generation backend all load
//! heavyweight resources on first use. [`InitGuard`] collapses arbitrarily many
//! concurrent callers into exactly one initialization attempt: the first
//! caller runs the attempt, everyone else blocks on it and shares its outcome.
//! A failed attempt resets the state so a later call can retry; success is
//! permanent for the process lifetime.

use std::future::Future;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::watch;

/// Lifecycle of a lazily initialized backend
///
/// `Uninitialized -> Initializing -> Ready` on success. A failed attempt
/// transitions `Initializing -> Uninitialized`; there is no `Ready ->
/// Uninitialized` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Uninitialized,
    Initializing,
    Ready,
}

impl BackendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendState::Uninitialized => "uninitialized",
            BackendState::Initializing => "initializing",
            BackendState::Ready => "ready",
        }
    }
}

/// Initialization failure, shared by every caller collapsed into the attempt
#[derive(Error, Debug, Clone)]
#[error("{backend} initialization failed: {message}")]
pub struct InitError {
    pub backend: &'static str,
    pub message: String,
}

type Outcome = Option<Result<(), InitError>>;

enum Slot {
    Idle,
    Running(watch::Receiver<Outcome>),
    Ready,
}

enum Role {
    Done,
    Lead(watch::Sender<Outcome>),
    Wait(watch::Receiver<Outcome>),
}

/// Single-flight initialization guard for one backend
///
/// The mutex protects only the state transition, never the initialization
/// work itself; once `Ready`, callers proceed without taking any lock.
pub struct InitGuard {
    name: &'static str,
    slot: Mutex<Slot>,
}

impl InitGuard {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(Slot::Idle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> BackendState {
        match *self.slot.lock().unwrap() {
            Slot::Idle => BackendState::Uninitialized,
            Slot::Running(_) => BackendState::Initializing,
            Slot::Ready => BackendState::Ready,
        }
    }

    /// Run `init` exactly once across all concurrent callers
    ///
    /// Idempotent: returns immediately once an attempt has succeeded. Callers
    /// arriving while an attempt is in flight block until it resolves and
    /// receive that attempt's outcome. On failure the guard resets so the next
    /// caller starts a fresh attempt.
    pub async fn ensure_ready<F, Fut>(&self, init: F) -> Result<(), InitError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        loop {
            let role = {
                let mut slot = self.slot.lock().unwrap();
                match &*slot {
                    Slot::Ready => Role::Done,
                    Slot::Idle => {
                        let (tx, rx) = watch::channel(None);
                        *slot = Slot::Running(rx);
                        Role::Lead(tx)
                    }
                    Slot::Running(rx) => Role::Wait(rx.clone()),
                }
            };

            match role {
                Role::Done => return Ok(()),
                Role::Lead(tx) => return self.run_attempt(init(), tx).await,
                Role::Wait(mut rx) => loop {
                    if let Some(outcome) = rx.borrow_and_update().clone() {
                        return outcome;
                    }
                    if rx.changed().await.is_err() {
                        // Leader was dropped before resolving; re-examine state
                        break;
                    }
                },
            }
        }
    }

    async fn run_attempt<Fut>(
        &self,
        fut: Fut,
        tx: watch::Sender<Outcome>,
    ) -> Result<(), InitError>
    where
        Fut: Future<Output = anyhow::Result<()>>,
    {
        tracing::info!(backend = self.name, "initializing backend");

        // If this future is cancelled mid-attempt, put the guard back to
        // Uninitialized so waiters can take over as leader.
        let reset = ResetOnDrop {
            guard: self,
            armed: true,
        };

        let result = match fut.await {
            Ok(()) => Ok(()),
            Err(e) => Err(InitError {
                backend: self.name,
                message: e.to_string(),
            }),
        };

        {
            let mut slot = self.slot.lock().unwrap();
            *slot = match &result {
                Ok(()) => Slot::Ready,
                Err(_) => Slot::Idle,
            };
        }
        reset.disarm();

        match &result {
            Ok(()) => tracing::info!(backend = self.name, "backend initialized"),
            Err(e) => {
                tracing::error!(backend = self.name, error = %e.message, "backend initialization failed")
            }
        }

        let _ = tx.send(Some(result.clone()));
        result
    }
}

struct ResetOnDrop<'a> {
    guard: &'a InitGuard,
    armed: bool,
}

impl ResetOnDrop<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut slot = self.guard.slot.lock().unwrap();
            if matches!(*slot, Slot::Running(_)) {
                *slot = Slot::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_single_flight_many_callers() {
        let guard = Arc::new(InitGuard::new("test"));
        let attempts = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let guard = guard.clone();
            let attempts = attempts.clone();
            handles.push(tokio::spawn(async move {
                guard
                    .ensure_ready(|| {
                        let attempts = attempts.clone();
                        async move {
                            attempts.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(())
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(guard.state(), BackendState::Ready);
    }

    #[tokio::test]
    async fn test_failure_resets_for_retry() {
        let guard = InitGuard::new("test");
        let attempts = Arc::new(AtomicUsize::new(0));

        let result = guard
            .ensure_ready(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("model file missing")
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(guard.state(), BackendState::Uninitialized);

        // Failure is not cached; the next call re-attempts
        let result = guard
            .ensure_ready(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(guard.state(), BackendState::Ready);
    }

    #[tokio::test]
    async fn test_waiters_share_the_attempt_failure() {
        let guard = Arc::new(InitGuard::new("test"));
        let attempts = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let guard = guard.clone();
            let attempts = attempts.clone();
            handles.push(tokio::spawn(async move {
                guard
                    .ensure_ready(|| {
                        let attempts = attempts.clone();
                        async move {
                            attempts.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            anyhow::bail!("disk contention")
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(err.message.contains("disk contention"));
        }

        // All ten callers collapsed into one attempt
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_never_reattempts() {
        let guard = InitGuard::new("test");
        let attempts = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let result = guard
                .ensure_ready(|| {
                    let attempts = attempts.clone();
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await;
            assert!(result.is_ok());
        }

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
