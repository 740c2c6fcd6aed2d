//! The enumerated limit table: every named quota with its kind, bound
//! and scope. Caps were derived from load measurements against the
//! public surface (25% of measured stable throughput for client-facing
//! rates).

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Keys
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKey {
    RunCreation,
    SpawnSubrun,
    Snapshot,
    RunTick,
    ConcurrentParentRuns,
    ConcurrentTotalRuns,
    ConcurrentToolCallsWorkspace,
    ConcurrentToolCallsRun,
    WsConnectionsWorkspace,
    WsConnectionsUser,
}

impl LimitKey {
    /// Stable key fragment used in KV key paths.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RunCreation => "run_creation",
            Self::SpawnSubrun => "spawn_subrun",
            Self::Snapshot => "snapshot",
            Self::RunTick => "run_tick",
            Self::ConcurrentParentRuns => "concurrent_parent_runs",
            Self::ConcurrentTotalRuns => "concurrent_total_runs",
            Self::ConcurrentToolCallsWorkspace => "concurrent_tool_calls_workspace",
            Self::ConcurrentToolCallsRun => "concurrent_tool_calls_per_run",
            Self::WsConnectionsWorkspace => "ws_connections_workspace",
            Self::WsConnectionsUser => "ws_connections_user",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Rate,
    Concurrency,
}

#[derive(Debug, Clone, Copy)]
pub struct LimitConfig {
    pub key: LimitKey,
    /// Human-readable name used in error messages.
    pub name: &'static str,
    pub kind: LimitKind,
    pub requests_per_second: f64,
    pub window_seconds: u64,
    pub concurrency_limit: u64,
}

impl LimitConfig {
    /// Request budget per window for rate limits: `ceil(rps * window)`,
    /// never below 1.
    pub fn max_requests(&self) -> u64 {
        match self.kind {
            LimitKind::Rate => {
                ((self.requests_per_second * self.window_seconds as f64).ceil() as u64).max(1)
            }
            LimitKind::Concurrency => 0,
        }
    }

    pub fn max_concurrency(&self) -> u64 {
        match self.kind {
            LimitKind::Concurrency => self.concurrency_limit.max(1),
            LimitKind::Rate => 0,
        }
    }
}

const fn rate(key: LimitKey, name: &'static str, rps: f64) -> LimitConfig {
    LimitConfig {
        key,
        name,
        kind: LimitKind::Rate,
        requests_per_second: rps,
        window_seconds: 1,
        concurrency_limit: 0,
    }
}

const fn concurrency(key: LimitKey, name: &'static str, limit: u64) -> LimitConfig {
    LimitConfig {
        key,
        name,
        kind: LimitKind::Concurrency,
        requests_per_second: 0.0,
        // Concurrency sets are refreshed with this TTL on acquisition so
        // crashed holders cannot pin slots forever.
        window_seconds: 60,
        concurrency_limit: limit,
    }
}

const LIMITS: &[LimitConfig] = &[
    rate(LimitKey::RunCreation, "run creation (POST /api/runs/)", 10.29),
    rate(
        LimitKey::SpawnSubrun,
        "spawn subrun (POST /api/runs/<run_id>/spawn_subrun/)",
        2.14,
    ),
    rate(
        LimitKey::Snapshot,
        "snapshot poll (GET /api/runs/<run_id>/snapshot/)",
        18.49,
    ),
    rate(LimitKey::RunTick, "run tick worker", 41.0),
    concurrency(LimitKey::ConcurrentParentRuns, "concurrent parent runs", 5),
    concurrency(LimitKey::ConcurrentTotalRuns, "concurrent total runs", 12),
    concurrency(
        LimitKey::ConcurrentToolCallsWorkspace,
        "concurrent tool calls (workspace)",
        6,
    ),
    concurrency(
        LimitKey::ConcurrentToolCallsRun,
        "concurrent tool calls (run)",
        1,
    ),
    concurrency(
        LimitKey::WsConnectionsWorkspace,
        "WebSocket connections (workspace)",
        20,
    ),
    concurrency(LimitKey::WsConnectionsUser, "WebSocket connections (user)", 5),
];

/// Look up the static configuration for a limit key.
pub fn limit_config(key: LimitKey) -> &'static LimitConfig {
    LIMITS
        .iter()
        .find(|c| c.key == key)
        .expect("every LimitKey has a config entry")
}
