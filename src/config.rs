use crate::governor::CascadeCeilings;
use crate::ledger::{CostBudget, CostTable};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

type SettingsMap = Map<String, Value>;

/// Typed settings governing one cascade. The JSON blob held by the
/// [`SettingsService`] deserializes into this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeSettings {
    pub ceilings: CascadeCeilings,
    pub cost_table: CostTable,
    pub budget: CostBudget,
    /// Hard cap applied on top of any query's own limit.
    pub max_query_results: usize,
    /// Chunk size for batched writes; never above the store's atomic limit.
    pub max_batch_size: usize,
    /// Fixed backoff between write chunks.
    pub backoff_ms: u64,
    /// Manual kill switch; checked before any work on every dispatch.
    pub breaker_engaged: bool,
}

impl Default for CascadeSettings {
    fn default() -> Self {
        Self {
            ceilings: CascadeCeilings::default(),
            cost_table: CostTable::default(),
            budget: CostBudget::default(),
            max_query_results: 1_000,
            max_batch_size: crate::store::MAX_ATOMIC_BATCH_OPS,
            backoff_ms: 50,
            breaker_engaged: false,
        }
    }
}

impl CascadeSettings {
    /// Validates cross-field constraints the type system cannot express.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_batch_size == 0 || self.max_batch_size > crate::store::MAX_ATOMIC_BATCH_OPS {
            return Err(SettingsError::InvalidSetting {
                key: "max_batch_size".into(),
                detail: format!(
                    "must be between 1 and {}",
                    crate::store::MAX_ATOMIC_BATCH_OPS
                ),
            });
        }
        if self.max_query_results == 0 {
            return Err(SettingsError::InvalidSetting {
                key: "max_query_results".into(),
                detail: "must be at least 1".into(),
            });
        }
        if self.ceilings.max_requests_per_minute == 0 {
            return Err(SettingsError::InvalidSetting {
                key: "ceilings.max_requests_per_minute".into(),
                detail: "must be at least 1".into(),
            });
        }
        if self.ceilings.max_execution_ms == 0 {
            return Err(SettingsError::InvalidSetting {
                key: "ceilings.max_execution_ms".into(),
                detail: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Shared kill switch. Operations toggles it from outside the dispatch path;
/// every dispatch re-reads it before doing any work.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    engaged: Arc<AtomicBool>,
}

impl CircuitBreaker {
    /// Creates a breaker in the given initial position.
    pub fn new(engaged: bool) -> Self {
        Self {
            engaged: Arc::new(AtomicBool::new(engaged)),
        }
    }

    pub fn engage(&self) {
        self.engaged.store(true, Ordering::SeqCst);
    }

    pub fn disengage(&self) {
        self.engaged.store(false, Ordering::SeqCst);
    }

    pub fn engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }
}

/// Change-impact class of a settings knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, PartialOrd, Ord)]
pub enum SettingsKnobClass {
    Hot = 0,
    Reconfigure = 1,
    Restart = 2,
}

/// Result of applying a patch or rollback.
#[derive(Debug, Clone, Serialize)]
pub struct SettingsPatchResult {
    pub version: u64,
    pub impact: SettingsKnobClass,
    pub changed_keys: Vec<String>,
    pub duration_ms: u64,
}

impl SettingsPatchResult {
    fn no_change(version: u64) -> Self {
        Self {
            version,
            impact: SettingsKnobClass::Hot,
            changed_keys: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// Telemetry counters for the settings surface.
#[derive(Debug, Clone, Default)]
pub struct SettingsTelemetry {
    pub version: u64,
    pub last_reload_duration_ms: u64,
    pub validation_failures_total: u64,
}

/// Errors surfaced by the settings service.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings patch: {0}")]
    InvalidPatch(String),
    #[error("settings rejected: {detail}")]
    Rejected { detail: String },
    #[error("invalid setting '{key}': {detail}")]
    InvalidSetting { key: String, detail: String },
    #[error("unknown settings version {0}")]
    UnknownVersion(u64),
}

/// Versioned settings blob with patch/rollback semantics. Every committed
/// version must deserialize into valid [`CascadeSettings`]; rejected patches
/// leave the active version untouched and bump the failure counter.
#[derive(Debug, Clone)]
pub struct SettingsService {
    current_version: u64,
    current: SettingsMap,
    snapshots: BTreeMap<u64, SettingsMap>,
    knob_catalog: BTreeMap<String, SettingsKnobClass>,
    telemetry: SettingsTelemetry,
}

impl SettingsService {
    /// Creates a service seeded with the given settings.
    pub fn new(initial: &CascadeSettings) -> Result<Self, SettingsError> {
        initial.validate()?;
        let blob = serde_json::to_value(initial)
            .map_err(|err| SettingsError::InvalidPatch(err.to_string()))?;
        let map = blob
            .as_object()
            .cloned()
            .ok_or_else(|| SettingsError::InvalidPatch("settings must be a JSON object".into()))?;
        let mut snapshots = BTreeMap::new();
        snapshots.insert(1, map.clone());
        Ok(Self {
            current_version: 1,
            current: map,
            snapshots,
            knob_catalog: default_knob_catalog(),
            telemetry: SettingsTelemetry {
                version: 1,
                ..SettingsTelemetry::default()
            },
        })
    }

    /// Returns the active settings version.
    pub fn version(&self) -> u64 {
        self.current_version
    }

    /// Parses the active blob into typed settings.
    pub fn settings(&self) -> Result<CascadeSettings, SettingsError> {
        parse_settings(&self.current)
    }

    /// Telemetry counters for observability.
    pub fn telemetry(&self) -> &SettingsTelemetry {
        &self.telemetry
    }

    /// Applies a JSON patch. Top-level keys in the patch replace their
    /// counterparts; the merged blob must validate before it is committed.
    pub fn patch(&mut self, patch: Value) -> Result<SettingsPatchResult, SettingsError> {
        let start = Instant::now();
        let patch_map = match patch.as_object() {
            Some(map) => map.clone(),
            None => {
                self.validation_failure();
                return Err(SettingsError::InvalidPatch(
                    "patch must be a JSON object".into(),
                ));
            }
        };
        let mut next = self.current.clone();
        let mut changed = Vec::new();
        for (key, value) in &patch_map {
            let entry = next.entry(key.clone()).or_insert(Value::Null);
            if entry != value {
                *entry = value.clone();
                changed.push(key.clone());
            }
        }
        if changed.is_empty() {
            return Ok(SettingsPatchResult::no_change(self.current_version));
        }
        if let Err(err) = parse_settings(&next).and_then(|settings| settings.validate()) {
            self.validation_failure();
            return Err(SettingsError::Rejected {
                detail: err.to_string(),
            });
        }
        Ok(self.commit(next, changed, start.elapsed()))
    }

    /// Rolls the settings back to a previous version and records a new
    /// snapshot, mirroring patch semantics.
    pub fn rollback(&mut self, to_version: u64) -> Result<SettingsPatchResult, SettingsError> {
        if to_version == self.current_version {
            self.validation_failure();
            return Err(SettingsError::UnknownVersion(to_version));
        }
        let snapshot = match self.snapshots.get(&to_version).cloned() {
            Some(snapshot) => snapshot,
            None => {
                self.validation_failure();
                return Err(SettingsError::UnknownVersion(to_version));
            }
        };
        let start = Instant::now();
        let changed = diff_keys(&self.current, &snapshot);
        Ok(self.commit(snapshot, changed, start.elapsed()))
    }

    fn commit(
        &mut self,
        next: SettingsMap,
        mut changed_keys: Vec<String>,
        elapsed: std::time::Duration,
    ) -> SettingsPatchResult {
        self.current_version += 1;
        let impact = classify_change(&self.knob_catalog, &changed_keys);
        self.current = next.clone();
        self.snapshots.insert(self.current_version, next);
        changed_keys.sort();
        self.telemetry.version = self.current_version;
        self.telemetry.last_reload_duration_ms = millis(elapsed);
        SettingsPatchResult {
            version: self.current_version,
            impact,
            changed_keys,
            duration_ms: self.telemetry.last_reload_duration_ms,
        }
    }

    fn validation_failure(&mut self) {
        self.telemetry.validation_failures_total =
            self.telemetry.validation_failures_total.saturating_add(1);
    }
}

fn parse_settings(map: &SettingsMap) -> Result<CascadeSettings, SettingsError> {
    serde_json::from_value(Value::Object(map.clone()))
        .map_err(|err| SettingsError::InvalidPatch(err.to_string()))
}

fn diff_keys(current: &SettingsMap, snapshot: &SettingsMap) -> Vec<String> {
    let mut keys: Vec<String> = current.keys().chain(snapshot.keys()).cloned().collect();
    keys.sort();
    keys.dedup();
    keys.into_iter()
        .filter(|key| current.get(key) != snapshot.get(key))
        .collect()
}

fn classify_change(
    catalog: &BTreeMap<String, SettingsKnobClass>,
    changed_keys: &[String],
) -> SettingsKnobClass {
    let mut impact = SettingsKnobClass::Hot;
    for key in changed_keys {
        let class = catalog.get(key).copied().unwrap_or(SettingsKnobClass::Hot);
        impact = impact.max(class);
    }
    impact
}

fn default_knob_catalog() -> BTreeMap<String, SettingsKnobClass> {
    [
        ("breaker_engaged".to_string(), SettingsKnobClass::Hot),
        ("budget".to_string(), SettingsKnobClass::Hot),
        ("backoff_ms".to_string(), SettingsKnobClass::Hot),
        ("cost_table".to_string(), SettingsKnobClass::Reconfigure),
        ("ceilings".to_string(), SettingsKnobClass::Reconfigure),
        (
            "max_query_results".to_string(),
            SettingsKnobClass::Reconfigure,
        ),
        ("max_batch_size".to_string(), SettingsKnobClass::Restart),
    ]
    .into_iter()
    .collect()
}

fn millis(duration: std::time::Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}
