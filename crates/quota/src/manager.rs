//! The quota manager: admits or rejects attempts to consume a named
//! resource tied to a workspace, run or user.

use std::sync::Arc;

use am_domain::{Error, Result};

use crate::kv::QuotaKv;
use crate::limits::{limit_config, LimitConfig, LimitKey, LimitKind};

/// Per-scope rate and concurrency admission over the shared KV.
///
/// Rate limits are fixed-window counters; concurrency limits are member
/// sets whose cardinality may never exceed the bound. Releases are
/// idempotent. The rate bypass flag never bypasses concurrency limits.
pub struct QuotaManager {
    kv: Arc<dyn QuotaKv>,
    namespace: String,
    bypass_rate_limits: bool,
}

impl QuotaManager {
    pub fn new(kv: Arc<dyn QuotaKv>, namespace: impl Into<String>, bypass_rate_limits: bool) -> Self {
        Self {
            kv,
            namespace: namespace.into(),
            bypass_rate_limits,
        }
    }

    fn rate_key(&self, scope_id: &str, key: LimitKey) -> String {
        format!("{}:{}:{}", self.namespace, scope_id, key.as_str())
    }

    fn concurrency_key(&self, scope_id: &str, key: LimitKey) -> String {
        format!("{}:concurrent:{}:{}", self.namespace, scope_id, key.as_str())
    }

    fn exceeded(limit: &LimitConfig, current: u64) -> Error {
        let allowed = match limit.kind {
            LimitKind::Rate => limit.max_requests(),
            LimitKind::Concurrency => limit.max_concurrency(),
        };
        Error::LimitExceeded {
            name: limit.name.to_string(),
            current,
            allowed,
        }
    }

    // ── Rate limits ──────────────────────────────────────────────────

    /// Record one request against a fixed-window rate limit.
    ///
    /// Increments the window counter, arming the TTL on first set; when
    /// the post-increment count exceeds the cap the attempt fails unless
    /// the global rate bypass is set.
    pub fn record_request(&self, scope_id: &str, key: LimitKey) -> Result<u64> {
        let limit = limit_config(key);
        debug_assert_eq!(limit.kind, LimitKind::Rate, "{key:?} is not a rate limit");
        let kv_key = self.rate_key(scope_id, key);
        let count = self.kv.incr(&kv_key);
        if count == 1 {
            self.kv.expire(&kv_key, limit.window_seconds);
        }
        if count > limit.max_requests() {
            if self.bypass_rate_limits {
                return Ok(count);
            }
            return Err(Self::exceeded(limit, count));
        }
        Ok(count)
    }

    /// Current counter for a rate limit (observability only).
    pub fn current_usage(&self, scope_id: &str, key: LimitKey) -> u64 {
        self.kv.get_count(&self.rate_key(scope_id, key))
    }

    /// Drop a rate window (test and admin tooling).
    pub fn reset(&self, scope_id: &str, key: LimitKey) {
        self.kv.delete(&self.rate_key(scope_id, key));
    }

    // ── Concurrency limits ───────────────────────────────────────────

    /// Acquire one concurrency slot for `member` under `scope_id`.
    pub fn acquire_concurrency(&self, scope_id: &str, key: LimitKey, member: &str) -> Result<u64> {
        let limit = limit_config(key);
        debug_assert_eq!(
            limit.kind,
            LimitKind::Concurrency,
            "{key:?} is not a concurrency limit"
        );
        let kv_key = self.concurrency_key(scope_id, key);
        let current = self.kv.scard(&kv_key);
        if current >= limit.max_concurrency() {
            return Err(Self::exceeded(limit, current));
        }
        if self.kv.sadd(&kv_key, member) {
            self.kv.expire(&kv_key, limit.window_seconds);
        }
        Ok(self.kv.scard(&kv_key))
    }

    /// Release a concurrency slot. Idempotent.
    pub fn release_concurrency(&self, scope_id: &str, key: LimitKey, member: &str) -> u64 {
        let kv_key = self.concurrency_key(scope_id, key);
        self.kv.srem(&kv_key, member);
        self.kv.scard(&kv_key)
    }

    // ── Composite operations ─────────────────────────────────────────

    /// Acquire the run slots for a new run: total-runs always, plus the
    /// parent-runs slot for top-level runs. If the second acquisition
    /// fails the first is released before the error propagates.
    pub fn acquire_run_slots(&self, workspace_id: &str, run_id: &str, include_parent: bool) -> Result<()> {
        self.acquire_concurrency(workspace_id, LimitKey::ConcurrentTotalRuns, run_id)?;
        if include_parent {
            if let Err(err) =
                self.acquire_concurrency(workspace_id, LimitKey::ConcurrentParentRuns, run_id)
            {
                self.release_concurrency(workspace_id, LimitKey::ConcurrentTotalRuns, run_id);
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn release_run_slots(&self, workspace_id: &str, run_id: &str, include_parent: bool) {
        self.release_concurrency(workspace_id, LimitKey::ConcurrentTotalRuns, run_id);
        if include_parent {
            self.release_concurrency(workspace_id, LimitKey::ConcurrentParentRuns, run_id);
        }
    }

    /// Acquire the tool-call slot pair: workspace-wide and per-run.
    pub fn acquire_tool_call_slots(&self, workspace_id: &str, run_id: &str, member: &str) -> Result<()> {
        self.acquire_concurrency(workspace_id, LimitKey::ConcurrentToolCallsWorkspace, member)?;
        if let Err(err) = self.acquire_concurrency(run_id, LimitKey::ConcurrentToolCallsRun, member) {
            self.release_concurrency(workspace_id, LimitKey::ConcurrentToolCallsWorkspace, member);
            return Err(err);
        }
        Ok(())
    }

    pub fn release_tool_call_slots(&self, workspace_id: &str, run_id: &str, member: &str) {
        self.release_concurrency(workspace_id, LimitKey::ConcurrentToolCallsWorkspace, member);
        self.release_concurrency(run_id, LimitKey::ConcurrentToolCallsRun, member);
    }
}
