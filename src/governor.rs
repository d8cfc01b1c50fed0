use crate::clock::MonotonicClock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MS_PER_MINUTE: u64 = 60_000;

/// Per-invocation resource ceilings. Defaults are deliberately generous; a
/// cascade definition tightens them per workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeCeilings {
    /// Wall-clock ceiling for one invocation.
    pub max_execution_ms: u64,
    /// How deep guarded recursion may nest.
    pub max_recursion_depth: u32,
    /// How many guarded operations may be in flight at once.
    pub max_concurrent_ops: u32,
    /// Call-rate ceiling; implies a minimum spacing between limit checks.
    pub max_requests_per_minute: u32,
}

impl Default for CascadeCeilings {
    fn default() -> Self {
        Self {
            max_execution_ms: 60_000,
            max_recursion_depth: 3,
            max_concurrent_ops: 8,
            max_requests_per_minute: 120_000,
        }
    }
}

impl CascadeCeilings {
    /// Minimum spacing between two limit checks implied by the request-rate
    /// ceiling, in milliseconds. Zero when the ceiling permits more than one
    /// call per millisecond.
    pub fn min_call_spacing_ms(&self) -> u64 {
        if self.max_requests_per_minute == 0 {
            return u64::MAX;
        }
        MS_PER_MINUTE / u64::from(self.max_requests_per_minute)
    }
}

/// Ceiling breaches raised by [`SafetyGovernor::check_limits`]. The first
/// breach latches into the execution context, so every later check repeats it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GovernorError {
    #[error("execution time ceiling breached: {elapsed_ms} ms elapsed, limit {limit_ms} ms")]
    ExecutionTimeExceeded { elapsed_ms: u64, limit_ms: u64 },
    #[error("recursion ceiling breached: depth {depth}, limit {limit}")]
    RecursionDepthExceeded { depth: u32, limit: u32 },
    #[error("concurrency ceiling breached: {in_flight} ops in flight, limit {limit}")]
    ConcurrencyExceeded { in_flight: u32, limit: u32 },
    #[error("call rate ceiling breached: {spacing_ms} ms since last check, minimum {min_spacing_ms} ms")]
    CallRateExceeded { spacing_ms: u64, min_spacing_ms: u64 },
}

/// Per-invocation counters. Created at invocation start, threaded explicitly
/// through every guarded call, and discarded at invocation end; never shared
/// across invocations.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    started_at_ms: u64,
    recursion_count: u32,
    concurrent_ops: u32,
    last_check_ms: Option<u64>,
    tripped: Option<GovernorError>,
}

impl ExecutionContext {
    /// Starts a fresh context. Runs exactly once per invocation.
    pub fn start(clock: &mut dyn MonotonicClock) -> Self {
        Self {
            started_at_ms: clock.now_ms(),
            recursion_count: 0,
            concurrent_ops: 0,
            last_check_ms: None,
            tripped: None,
        }
    }

    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    pub fn recursion_count(&self) -> u32 {
        self.recursion_count
    }

    pub fn concurrent_ops(&self) -> u32 {
        self.concurrent_ops
    }

    /// The latched breach, when a ceiling has already tripped.
    pub fn tripped(&self) -> Option<&GovernorError> {
        self.tripped.as_ref()
    }
}

/// Enforces the configured ceilings against an execution context. Stateless
/// itself; all mutable state lives in the per-invocation context.
#[derive(Debug, Clone)]
pub struct SafetyGovernor {
    ceilings: CascadeCeilings,
}

impl SafetyGovernor {
    pub fn new(ceilings: CascadeCeilings) -> Self {
        Self { ceilings }
    }

    pub fn ceilings(&self) -> &CascadeCeilings {
        &self.ceilings
    }

    /// Checks every ceiling. Callable at any point; guarded I/O calls it
    /// before each operation and after each suspension point, since wall-clock
    /// time advances while suspended.
    pub fn check_limits(
        &self,
        ctx: &mut ExecutionContext,
        clock: &mut dyn MonotonicClock,
    ) -> Result<(), GovernorError> {
        if let Some(breach) = &ctx.tripped {
            return Err(breach.clone());
        }
        let now_ms = clock.now_ms();
        let verdict = self.evaluate(ctx, now_ms);
        if let Err(breach) = &verdict {
            ctx.tripped = Some(breach.clone());
        }
        ctx.last_check_ms = Some(now_ms);
        verdict
    }

    /// Records one level of guarded recursion.
    pub fn enter_recursion(&self, ctx: &mut ExecutionContext) {
        ctx.recursion_count = ctx.recursion_count.saturating_add(1);
    }

    /// Marks a guarded operation in flight.
    pub fn enter_operation(&self, ctx: &mut ExecutionContext) {
        ctx.concurrent_ops = ctx.concurrent_ops.saturating_add(1);
    }

    /// Marks a guarded operation complete.
    pub fn exit_operation(&self, ctx: &mut ExecutionContext) {
        ctx.concurrent_ops = ctx.concurrent_ops.saturating_sub(1);
    }

    fn evaluate(&self, ctx: &ExecutionContext, now_ms: u64) -> Result<(), GovernorError> {
        let elapsed_ms = now_ms.saturating_sub(ctx.started_at_ms);
        if elapsed_ms > self.ceilings.max_execution_ms {
            return Err(GovernorError::ExecutionTimeExceeded {
                elapsed_ms,
                limit_ms: self.ceilings.max_execution_ms,
            });
        }
        if ctx.recursion_count > self.ceilings.max_recursion_depth {
            return Err(GovernorError::RecursionDepthExceeded {
                depth: ctx.recursion_count,
                limit: self.ceilings.max_recursion_depth,
            });
        }
        if ctx.concurrent_ops > self.ceilings.max_concurrent_ops {
            return Err(GovernorError::ConcurrencyExceeded {
                in_flight: ctx.concurrent_ops,
                limit: self.ceilings.max_concurrent_ops,
            });
        }
        if let Some(last_check_ms) = ctx.last_check_ms {
            let spacing_ms = now_ms.saturating_sub(last_check_ms);
            let min_spacing_ms = self.ceilings.min_call_spacing_ms();
            if spacing_ms < min_spacing_ms {
                return Err(GovernorError::CallRateExceeded {
                    spacing_ms,
                    min_spacing_ms,
                });
            }
        }
        Ok(())
    }
}
