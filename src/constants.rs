//! System-wide tuning values for the coordination hub.

/// Capacity of the in-memory event ring buffer (`crate::events`).
pub const EVENT_RING_CAPACITY: usize = 1000;

/// Interval between liveness sweeps over the agent registry.
pub const LIVENESS_SWEEP_INTERVAL_SECS: u64 = 60;

/// An agent with no heartbeat for longer than this is marked `Offline`.
pub const STALE_AGENT_THRESHOLD_SECS: i64 = 300;

/// Clamp bounds for `Agent::performance_score`.
pub const MIN_PERFORMANCE_SCORE: f64 = 0.1;
pub const MAX_PERFORMANCE_SCORE: f64 = 2.0;

/// Reference duration (ms) against which task efficiency is measured.
/// A task completed in this long scores an efficiency of exactly 1.0.
pub const EFFICIENCY_REFERENCE_DURATION_MS: f64 = 60_000.0;

/// Weights in the agent selection score. Must sum to 1.0.
pub const CAPABILITY_WEIGHT: f64 = 0.6;
pub const PERFORMANCE_WEIGHT: f64 = 0.3;
pub const WORKLOAD_WEIGHT: f64 = 0.1;

/// Simulated remediation delay range for detected conflicts, in seconds.
pub const CONFLICT_RESOLUTION_DELAY_MIN_SECS: u64 = 2;
pub const CONFLICT_RESOLUTION_DELAY_MAX_SECS: u64 = 3;

/// Default bind port when `HUB_PORT` is not set.
pub const DEFAULT_PORT: u16 = 8080;
