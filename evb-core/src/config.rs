use std::time::Duration;

/// Build-window policy controlling when a source queue's head fragments
/// are safe to dequeue and forward to the sort thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildWindowMode {
    /// Dequeue up to the lowest "stamp mark" present across all queues:
    /// the newest timestamp of the queue that has received the *least*
    /// data, which is the newest point before which every source is
    /// guaranteed to have delivered everything it ever will.
    StampMark,
    /// Dequeue anything older than `now - build_window`, regardless of
    /// what other queues contain. Used when sources can't be trusted to
    /// converge on a common stamp mark (e.g. a free-running clock source).
    WallClock,
}

/// Tunables for [`crate::handler::FragmentHandler`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub build_window_mode: BuildWindowMode,
    /// Width of the build window. Interpreted as a timestamp-tick delta
    /// under `StampMark` and as a wall-clock delta under `WallClock`.
    pub build_window: Duration,
    /// Grace period after engine start during which flushes run in
    /// `WallClock` mode regardless of `build_window_mode`, giving every
    /// source a chance to register before the stamp mark is trusted.
    pub startup_timeout: Duration,
    /// Global in-flight fragment count at which Xoff fires.
    pub xoff_frags: usize,
    /// Global in-flight fragment count at which Xon fires, after Xoff.
    pub xon_frags: usize,
    /// Per-queue depth at which that queue's Xoff fires.
    pub per_queue_xoff_frags: usize,
    /// Per-queue depth at which that queue's Xon fires, after Xoff.
    pub per_queue_xon_frags: usize,
    /// Idle-timer period driving periodic flush + Xon recheck when no
    /// fragments are arriving to drive it directly.
    pub idle_poll_period: Duration,
    /// A barrier is declared malformed if it's been pending longer than
    /// `build_window * malformed_barrier_window_multiplier`.
    pub malformed_barrier_window_multiplier: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            build_window_mode: BuildWindowMode::StampMark,
            build_window: Duration::from_millis(100),
            startup_timeout: Duration::from_secs(2),
            xoff_frags: 4_000_000,
            xon_frags: 3_000_000,
            per_queue_xoff_frags: 2_000,
            per_queue_xon_frags: 1_000,
            idle_poll_period: Duration::from_secs(1),
            malformed_barrier_window_multiplier: 4,
        }
    }
}
