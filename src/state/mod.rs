pub mod hub;
pub mod round;
pub mod session;
pub mod state_machine;

use std::{
    future::Future,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use dashmap::DashMap;
use rand::{SeedableRng, rngs::StdRng};
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    time::timeout,
};
use tracing::warn;

use crate::{
    config::AppConfig,
    content::QuestionCatalog,
    dao::{models::ParticipantId, room_store::RoomStore},
    error::ServiceError,
};

pub use self::hub::{ConnectionHandle, ConnectionReceiver, Hub};
pub use self::session::{Session, SessionRegistry};

pub type SharedState = Arc<AppState>;
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// Central application state: configuration, content, storage, live connections and sessions.
pub struct AppState {
    config: AppConfig,
    catalog: QuestionCatalog,
    store: Arc<dyn RoomStore>,
    hub: Hub,
    sessions: SessionRegistry,
    room_gates: DashMap<String, Arc<Mutex<()>>>,
    participant_gates: DashMap<ParticipantId, Arc<Mutex<()>>>,
    rng: StdMutex<StdRng>,
    transition_timeout: Option<Duration>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(
        config: AppConfig,
        catalog: QuestionCatalog,
        store: Arc<dyn RoomStore>,
    ) -> SharedState {
        Self::with_rng_source(config, catalog, store, StdRng::from_os_rng())
    }

    /// Same as [`AppState::new`] with an explicit random source, for deterministic draws.
    pub fn with_rng_source(
        config: AppConfig,
        catalog: QuestionCatalog,
        store: Arc<dyn RoomStore>,
        rng: StdRng,
    ) -> SharedState {
        Arc::new(Self {
            config,
            catalog,
            store,
            hub: Hub::new(),
            sessions: SessionRegistry::new(),
            room_gates: DashMap::new(),
            participant_gates: DashMap::new(),
            rng: StdMutex::new(rng),
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn catalog(&self) -> &QuestionCatalog {
        &self.catalog
    }

    /// Storage backend holding rooms, members and answers.
    pub fn store(&self) -> Arc<dyn RoomStore> {
        self.store.clone()
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Run `f` with exclusive access to the shared random source.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }

    fn room_gate(&self, code: &str) -> Arc<Mutex<()>> {
        self.room_gates
            .entry(code.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the gate of a deleted room.
    pub fn forget_room(&self, code: &str) {
        self.room_gates.remove(code);
    }

    /// Run `work` while holding the room's write gate.
    ///
    /// Every write path of a room (client actions and scheduled transitions) goes through here,
    /// so a phase read inside `work` cannot be invalidated before `work` completes.
    pub async fn run_room_transition<F, Fut, T>(&self, code: &str, work: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let gate = self.room_gate(code);
        let _guard = gate.lock().await;
        self.timed(code, work()).await
    }

    /// Like [`AppState::run_room_transition`], then run `effects` with the result under the same gate.
    ///
    /// Only `work` is subject to the timeout: once the store accepted the change, the
    /// notifications describing it always go out, in gate order.
    pub async fn run_room_transition_then<F, Fut, T, E, EFut, U>(
        &self,
        code: &str,
        work: F,
        effects: E,
    ) -> Result<U, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
        E: FnOnce(T) -> EFut,
        EFut: Future<Output = U>,
    {
        let gate = self.room_gate(code);
        let _guard = gate.lock().await;
        let value = self.timed(code, work()).await?;
        Ok(effects(value).await)
    }

    async fn timed<T>(
        &self,
        code: &str,
        work: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        match self.transition_timeout {
            Some(limit) => match timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(room = %code, "room transition timed out");
                    Err(ServiceError::Timeout)
                }
            },
            None => work.await,
        }
    }

    /// Serialize the membership changes of one participant across rooms.
    ///
    /// Taken before any room gate, never after one.
    pub async fn lock_participant(&self, participant: ParticipantId) -> OwnedMutexGuard<()> {
        let gate = self
            .participant_gates
            .entry(participant)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        gate.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::dao::room_store::InMemoryRoomStore;

    fn state() -> SharedState {
        AppState::with_rng_source(
            AppConfig::default(),
            QuestionCatalog::default(),
            Arc::new(InMemoryRoomStore::new()),
            StdRng::seed_from_u64(1),
        )
    }

    #[tokio::test]
    async fn room_transitions_do_not_interleave() {
        let state = state();
        let active = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let state = state.clone();
                let active = active.clone();
                tokio::spawn(async move {
                    state
                        .run_room_transition("ABCD", || async {
                            assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                            tokio::task::yield_now().await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_transition_times_out() {
        let state = state();
        let result = state
            .run_room_transition("ABCD", || async {
                tokio::time::sleep(DEFAULT_TRANSITION_TIMEOUT * 2).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ServiceError::Timeout)));
    }

    #[tokio::test]
    async fn work_errors_are_returned() {
        let state = state();
        let result: Result<(), _> = state
            .run_room_transition("ABCD", || async {
                Err(ServiceError::InvalidInput("nope".into()))
            })
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidInput(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn effects_run_past_the_timeout_once_work_is_done() {
        let state = state();
        let result = state
            .run_room_transition_then(
                "ABCD",
                || async { Ok(2) },
                |value| async move {
                    tokio::time::sleep(DEFAULT_TRANSITION_TIMEOUT * 2).await;
                    value * 10
                },
            )
            .await;
        assert_eq!(result.unwrap(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn effects_are_skipped_when_work_times_out() {
        let state = state();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let result = state
            .run_room_transition_then(
                "ABCD",
                || async {
                    tokio::time::sleep(DEFAULT_TRANSITION_TIMEOUT * 2).await;
                    Ok(())
                },
                |()| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;
        assert!(matches!(result, Err(ServiceError::Timeout)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn participant_lock_is_exclusive() {
        let state = state();
        let participant = uuid::Uuid::new_v4();
        let guard = state.lock_participant(participant).await;

        let blocked = tokio::time::timeout(
            Duration::from_millis(20),
            state.lock_participant(participant),
        )
        .await;
        assert!(blocked.is_err());
        assert!(
            tokio::time::timeout(
                Duration::from_millis(20),
                state.lock_participant(uuid::Uuid::new_v4())
            )
            .await
            .is_ok()
        );

        drop(guard);
        let _again = state.lock_participant(participant).await;
    }
}
