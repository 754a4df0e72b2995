use std::{
    fmt,
    future::Future,
    sync::atomic::{AtomicU8, Ordering},
};

use tokio::sync::Mutex;

/// Where a [`CreationGuard`] is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum GuardState {
    /// No creation has succeeded yet
    Unused,
    /// A creation is currently running
    InProgress,
    /// A creation has succeeded
    Used,
}

impl GuardState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unused,
            1 => Self::InProgress,
            _ => Self::Used,
        }
    }
}

/// An error returned by [`CreationGuard::run`]
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// The guarded object has already been created
    #[error("object has already been created")]
    AlreadyUsed,
    /// The creation itself failed; the guard may be used again
    #[error(transparent)]
    Action(E),
}

/// Ensures an object is created at most once
///
/// Creations are serialized: a caller arriving while another creation is in
/// progress waits for it. If that creation succeeds, the waiting caller gets
/// [`GuardError::AlreadyUsed`]; if it fails or is cancelled, the guard returns
/// to [`GuardState::Unused`] and the waiting caller runs its own creation.
pub struct CreationGuard {
    state: AtomicU8,
    turn: Mutex<()>,
}

impl fmt::Debug for CreationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreationGuard")
            .field("state", &self.state())
            .finish()
    }
}

impl Default for CreationGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl CreationGuard {
    /// Constructs an unused guard
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(GuardState::Unused as u8),
            turn: Mutex::new(()),
        }
    }

    /// The current state of the guard
    ///
    /// Reading the state never waits on a creation in progress.
    pub fn state(&self) -> GuardState {
        GuardState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: GuardState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Runs `create` unless a previous creation already succeeded
    pub async fn run<F, Fut, T, E>(&self, create: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _turn = self.turn.lock().await;
        if self.state() == GuardState::Used {
            return Err(GuardError::AlreadyUsed);
        }

        let reservation = Reservation(&self.state);
        self.set_state(GuardState::InProgress);

        match create().await {
            Ok(created) => {
                self.set_state(GuardState::Used);
                drop(reservation);
                Ok(created)
            }
            Err(err) => {
                tracing::debug!("guarded creation failed, guard released");
                Err(GuardError::Action(err))
            }
        }
    }
}

/// Rolls an in-progress creation back to unused when dropped
struct Reservation<'a>(&'a AtomicU8);

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let _ = self.0.compare_exchange(
            GuardState::InProgress as u8,
            GuardState::Unused as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct Boom;

    #[tokio::test]
    async fn first_success_marks_guard_used() {
        let guard = CreationGuard::new();
        let created = guard.run(|| async { Ok::<_, Boom>(7) }).await.unwrap();

        assert_eq!(created, 7);
        assert_eq!(guard.state(), GuardState::Used);
    }

    #[tokio::test]
    async fn second_creation_is_refused_without_running() {
        let guard = CreationGuard::new();
        guard.run(|| async { Ok::<_, Boom>(()) }).await.unwrap();

        let mut ran = false;
        let result = guard
            .run(|| {
                ran = true;
                async { Ok::<_, Boom>(()) }
            })
            .await;

        assert!(matches!(result, Err(GuardError::AlreadyUsed)));
        assert!(!ran);
    }

    #[tokio::test]
    async fn used_guard_reports_used_while_a_caller_is_checking() {
        let guard = CreationGuard::new();
        guard.run(|| async { Ok::<_, Boom>(()) }).await.unwrap();

        let _turn = guard.turn.lock().await;
        assert_eq!(guard.state(), GuardState::Used);
    }

    #[tokio::test]
    async fn failure_releases_guard() {
        let guard = CreationGuard::new();
        let result = guard.run(|| async { Err::<(), _>(Boom) }).await;

        assert!(matches!(result, Err(GuardError::Action(Boom))));
        assert_eq!(guard.state(), GuardState::Unused);

        guard.run(|| async { Ok::<_, Boom>(()) }).await.unwrap();
        assert_eq!(guard.state(), GuardState::Used);
    }

    #[tokio::test]
    async fn cancelled_creation_releases_guard() {
        let guard = CreationGuard::new();
        let timed_out = tokio::time::timeout(
            Duration::from_millis(10),
            guard.run(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, Boom>(())
            }),
        )
        .await;

        assert!(timed_out.is_err());
        assert_eq!(guard.state(), GuardState::Unused);
    }

    #[tokio::test]
    async fn concurrent_creations_run_once() {
        let guard = Arc::new(CreationGuard::new());

        let first = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .run(|| async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, Boom>(())
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(guard.state(), GuardState::InProgress);

        let second = guard.run(|| async { Ok::<_, Boom>(()) }).await;

        assert!(first.await.unwrap().is_ok());
        assert!(matches!(second, Err(GuardError::AlreadyUsed)));
    }
}
