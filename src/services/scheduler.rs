//! Periodic driver closing the answering and voting phases once their deadline elapsed.

use std::{sync::Arc, time::SystemTime};

use dashmap::DashSet;
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::{
    dao::models::RoomCode,
    services::round_service::{self, TransitionOutcome},
    state::SharedState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deadline {
    Answers,
    Voting,
}

/// Scans the store for elapsed deadlines and applies the matching transition once per room.
#[derive(Clone)]
pub struct PhaseScheduler {
    state: SharedState,
    in_flight: Arc<DashSet<RoomCode>>,
}

impl PhaseScheduler {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Run the scheduler on its own task until the runtime shuts down.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let period = self.state.config().scheduler_interval;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = period.as_millis() as u64, "phase scheduler started");

        loop {
            ticker.tick().await;
            self.tick(SystemTime::now()).await;
        }
    }

    /// Evaluate deadlines against `now` and spawn one transition task per due room.
    ///
    /// Rooms whose previous transition is still running are skipped until it completes.
    /// Returns the spawned tasks so callers can wait for them.
    pub async fn tick(&self, now: SystemTime) -> Vec<JoinHandle<()>> {
        let store = self.state.store();
        let mut tasks = Vec::new();

        match store.find_rooms_past_answer_deadline(now).await {
            Ok(codes) => tasks.extend(
                codes
                    .into_iter()
                    .filter_map(|code| self.dispatch(code, Deadline::Answers, now)),
            ),
            Err(err) => warn!(error = %err, "failed to query answer deadlines"),
        }

        match store.find_rooms_past_voting_deadline(now).await {
            Ok(codes) => tasks.extend(
                codes
                    .into_iter()
                    .filter_map(|code| self.dispatch(code, Deadline::Voting, now)),
            ),
            Err(err) => warn!(error = %err, "failed to query voting deadlines"),
        }

        tasks
    }

    fn dispatch(&self, code: RoomCode, deadline: Deadline, now: SystemTime) -> Option<JoinHandle<()>> {
        let Some(guard) = InFlight::acquire(&self.in_flight, &code) else {
            debug!(room = %code, ?deadline, "transition already in flight; skipping");
            return None;
        };

        let state = self.state.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            let result = match deadline {
                Deadline::Answers => round_service::close_answers(&state, &code, now).await,
                Deadline::Voting => round_service::close_voting(&state, &code, now).await,
            };
            match result {
                Ok(TransitionOutcome::Applied) => {
                    debug!(room = %code, ?deadline, "deadline transition applied")
                }
                Ok(TransitionOutcome::Skipped) => {
                    debug!(room = %code, ?deadline, "deadline transition no longer due")
                }
                Err(err) => {
                    warn!(room = %code, ?deadline, error = %err, "deadline transition failed; retrying next tick")
                }
            }
        }))
    }
}

/// Marks a room as having a transition in flight until dropped.
struct InFlight {
    set: Arc<DashSet<RoomCode>>,
    code: RoomCode,
}

impl InFlight {
    fn acquire(set: &Arc<DashSet<RoomCode>>, code: &str) -> Option<Self> {
        set.insert(code.to_owned()).then(|| Self {
            set: set.clone(),
            code: code.to_owned(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.remove(&self.code);
    }
}
