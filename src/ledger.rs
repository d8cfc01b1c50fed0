use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Priced operation families reported to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    PointRead,
    QueryResult,
    DocumentWrite,
    BatchCommit,
}

impl OperationKind {
    /// Canonical label used in diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::PointRead => "point_read",
            OperationKind::QueryResult => "query_result",
            OperationKind::DocumentWrite => "document_write",
            OperationKind::BatchCommit => "batch_commit",
        }
    }
}

/// Unit costs per operation kind. Values are abstract cost units, tuned per
/// deployment through the settings surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostTable {
    pub point_read: u64,
    pub query_result: u64,
    pub document_write: u64,
    pub batch_commit: u64,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            point_read: 1,
            query_result: 1,
            document_write: 5,
            batch_commit: 2,
        }
    }
}

impl CostTable {
    /// Unit cost for one operation of the given kind.
    pub fn cost_of(&self, kind: OperationKind) -> u64 {
        match kind {
            OperationKind::PointRead => self.point_read,
            OperationKind::QueryResult => self.query_result,
            OperationKind::DocumentWrite => self.document_write,
            OperationKind::BatchCommit => self.batch_commit,
        }
    }
}

/// How a cascade reacts when its cost budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    /// Log a warning on first overrun, keep going.
    WarnOnly,
    /// Refuse new guarded work; the invocation finishes with what it has.
    SoftStop,
    /// Abort the invocation.
    HardAbort,
}

/// Per-cascade cost budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBudget {
    pub max_cost: u64,
    pub mode: BudgetMode,
}

impl Default for CostBudget {
    fn default() -> Self {
        Self {
            max_cost: 10_000,
            mode: BudgetMode::WarnOnly,
        }
    }
}

/// One priced operation recorded against the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub operation: OperationKind,
    pub units: u64,
    pub cost: u64,
}

/// Per-invocation cost summary emitted with every dispatch outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CostSummary {
    pub operation_count: u64,
    pub estimated_cost: u64,
    pub elapsed_ms: u64,
}

/// Transition signalled by [`CostLedger::record`] when the budget threshold
/// is first crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetSignal {
    None,
    /// Warn-only overrun; emitted exactly once per invocation.
    WarnOverrun { estimated_cost: u64, budget: u64 },
    /// Soft stop engaged; emitted exactly once per invocation.
    StopNewWork { estimated_cost: u64, budget: u64 },
}

/// Budget failures raised by the ledger.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("cost budget exhausted: {estimated_cost} units spent, budget {budget}")]
    BudgetExceeded { estimated_cost: u64, budget: u64 },
    #[error("cost budget soft stop: {estimated_cost} units spent, budget {budget}")]
    BudgetStopRequested { estimated_cost: u64, budget: u64 },
}

/// Accumulates priced operations for one invocation. Created by the
/// dispatcher alongside the execution context and discarded with it.
#[derive(Debug, Clone)]
pub struct CostLedger {
    table: CostTable,
    budget: CostBudget,
    entries: Vec<LedgerEntry>,
    operation_count: u64,
    estimated_cost: u64,
    started_at_ms: u64,
    warned: bool,
    stopped: bool,
}

impl CostLedger {
    pub fn new(table: CostTable, budget: CostBudget, started_at_ms: u64) -> Self {
        Self {
            table,
            budget,
            entries: Vec::new(),
            operation_count: 0,
            estimated_cost: 0,
            started_at_ms,
            warned: false,
            stopped: false,
        }
    }

    /// Gate consulted before starting new guarded work. Fails only once a
    /// soft stop has engaged.
    pub fn admit_new_work(&self) -> Result<(), LedgerError> {
        if self.stopped {
            return Err(LedgerError::BudgetStopRequested {
                estimated_cost: self.estimated_cost,
                budget: self.budget.max_cost,
            });
        }
        Ok(())
    }

    /// Records `units` operations of the given kind and applies the budget
    /// policy. Hard-abort budgets fail here the moment the threshold is
    /// crossed; the other modes report a one-shot transition signal.
    pub fn record(&mut self, kind: OperationKind, units: u64) -> Result<BudgetSignal, LedgerError> {
        let cost = self.table.cost_of(kind).saturating_mul(units);
        self.entries.push(LedgerEntry {
            operation: kind,
            units,
            cost,
        });
        self.operation_count = self.operation_count.saturating_add(units);
        self.estimated_cost = self.estimated_cost.saturating_add(cost);
        if self.estimated_cost <= self.budget.max_cost {
            return Ok(BudgetSignal::None);
        }
        match self.budget.mode {
            BudgetMode::WarnOnly => {
                if self.warned {
                    Ok(BudgetSignal::None)
                } else {
                    self.warned = true;
                    Ok(BudgetSignal::WarnOverrun {
                        estimated_cost: self.estimated_cost,
                        budget: self.budget.max_cost,
                    })
                }
            }
            BudgetMode::SoftStop => {
                if self.stopped {
                    Ok(BudgetSignal::None)
                } else {
                    self.stopped = true;
                    Ok(BudgetSignal::StopNewWork {
                        estimated_cost: self.estimated_cost,
                        budget: self.budget.max_cost,
                    })
                }
            }
            BudgetMode::HardAbort => Err(LedgerError::BudgetExceeded {
                estimated_cost: self.estimated_cost,
                budget: self.budget.max_cost,
            }),
        }
    }

    /// Summary for the invocation as of `now_ms`.
    pub fn summary(&self, now_ms: u64) -> CostSummary {
        CostSummary {
            operation_count: self.operation_count,
            estimated_cost: self.estimated_cost,
            elapsed_ms: now_ms.saturating_sub(self.started_at_ms),
        }
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn estimated_cost(&self) -> u64 {
        self.estimated_cost
    }

    pub fn operation_count(&self) -> u64 {
        self.operation_count
    }

    /// True once a soft stop has engaged.
    pub fn soft_stopped(&self) -> bool {
        self.stopped
    }
}
