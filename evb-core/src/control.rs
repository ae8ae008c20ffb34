//! Control-surface verbs and their dispatch against a [`FragmentHandler`].
//!
//! Kept as a plain command enum rather than letting `evbd`'s HTTP layer
//! poke the engine directly, so a future scripting front end can reuse
//! the exact same verb set without duplicating semantics (see the
//! lifecycle variants below, which replace the original's "throw to
//! signal an invalid transition" pattern with an explicit
//! Acquire/Release/Pause/Resume/End command instead).

use crate::handler::{ConnId, FragmentHandler};
use crate::source_queue::InputStatistics;
use crate::stats::OutOfOrderStatistics;

#[derive(Debug, Clone)]
pub enum Command {
    RegisterSource { source_id: u32, conn: ConnId },
    MarkSourceFailed { source_id: u32 },
    MarkSocketFailed { conn: ConnId },
    ReviveSocket { conn: ConnId },
    Flush,
    AbortBarrier,
    Statistics,
    OutOfOrderStatistics,
    /// Begin accepting data for a new run.
    Acquire,
    /// Stop accepting data; equivalent to a complete flush followed by a
    /// timestamp reset.
    Release,
    /// Temporarily stop draining queues (data still queues, nothing
    /// drains) without tearing the run down.
    Pause,
    /// Resume draining after `Pause`.
    Resume,
    /// Shut the engine down: complete flush, then no further commands
    /// are meaningful.
    End,
}

#[derive(Debug, Clone)]
pub enum Response {
    Ack,
    Statistics(InputStatistics),
    OutOfOrderStatistics(OutOfOrderStatistics),
}

/// Lifecycle state gating whether the engine is currently draining
/// queues. `Paused` is the only state in which `flush_queues` is not
/// driven by `add_fragments`/`idle_poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Acquiring,
    Paused,
    Ended,
}

pub struct Engine {
    pub handler: FragmentHandler,
    pub state: RunState,
}

impl Engine {
    pub fn new(handler: FragmentHandler) -> Self {
        Engine {
            handler,
            state: RunState::Idle,
        }
    }

    pub fn apply(&mut self, command: Command) -> Response {
        match command {
            Command::RegisterSource { source_id, conn } => {
                self.handler.register_source_on_socket(source_id, conn);
                Response::Ack
            }
            Command::MarkSourceFailed { source_id } => {
                self.handler.mark_source_failed(source_id);
                Response::Ack
            }
            Command::MarkSocketFailed { conn } => {
                self.handler.mark_socket_failed(conn);
                Response::Ack
            }
            Command::ReviveSocket { conn } => {
                self.handler.revive_socket(conn);
                Response::Ack
            }
            Command::Flush => {
                self.handler.flush();
                Response::Ack
            }
            Command::AbortBarrier => {
                self.handler.abort_barrier();
                Response::Ack
            }
            Command::Statistics => Response::Statistics(self.handler.statistics()),
            Command::OutOfOrderStatistics => {
                Response::OutOfOrderStatistics(self.handler.out_of_order_statistics())
            }
            Command::Acquire => {
                self.state = RunState::Acquiring;
                Response::Ack
            }
            Command::Release => {
                self.handler.flush();
                self.handler.reset_timestamps();
                self.state = RunState::Idle;
                Response::Ack
            }
            Command::Pause => {
                self.state = RunState::Paused;
                Response::Ack
            }
            Command::Resume => {
                self.state = RunState::Acquiring;
                Response::Ack
            }
            Command::End => {
                self.handler.flush();
                self.state = RunState::Ended;
                Response::Ack
            }
        }
    }

    /// Whether the engine should keep draining queues as data arrives.
    /// `add_fragments` should still accept and enqueue data while
    /// paused — only draining stops — matching the original's "pause
    /// stops output, not ingestion" behavior.
    pub fn is_draining(&self) -> bool {
        self.state != RunState::Paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::observer::ObserverRegistry;
    use crate::stats::EngineStats;
    use std::sync::mpsc::sync_channel;
    use std::sync::Arc;

    fn engine() -> Engine {
        let (tx, _rx) = sync_channel(16);
        let handler = FragmentHandler::new(
            EngineConfig::default(),
            Arc::new(ObserverRegistry::new()),
            Arc::new(EngineStats::new()),
            tx,
        );
        Engine::new(handler)
    }

    #[test]
    fn lifecycle_transitions_update_state() {
        let mut engine = engine();
        assert_eq!(engine.state, RunState::Idle);

        engine.apply(Command::Acquire);
        assert_eq!(engine.state, RunState::Acquiring);
        assert!(engine.is_draining());

        engine.apply(Command::Pause);
        assert!(!engine.is_draining());

        engine.apply(Command::Resume);
        assert!(engine.is_draining());

        engine.apply(Command::End);
        assert_eq!(engine.state, RunState::Ended);
    }

    #[test]
    fn statistics_command_returns_a_snapshot() {
        let mut engine = engine();
        match engine.apply(Command::Statistics) {
            Response::Statistics(stats) => assert_eq!(stats.total_fragments_queued, 0),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn register_source_then_mark_failed_is_idempotent() {
        let mut engine = engine();
        engine.apply(Command::RegisterSource { source_id: 1, conn: 7 });
        engine.apply(Command::MarkSocketFailed { conn: 7 });
        engine.apply(Command::MarkSocketFailed { conn: 7 });
    }
}
