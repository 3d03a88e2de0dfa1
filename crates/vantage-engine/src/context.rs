// Run Context and Context Store
// Per-invocation shared state: the frozen trigger event, the write-once map
// of check results, and the append-only issue list. Shared by reference with
// every runner; expression evaluation and templating read through immutable
// snapshots.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use vantage_types::{CheckResult, Issue, TriggerEvent};

use crate::control::RunSignals;

/// Backs `RunContext.outputs`. Result slots are write-once: a second put for
/// the same id is a programming error (panics in debug builds, is logged and
/// ignored in release builds).
#[derive(Default)]
pub struct ContextStore {
    slots: RwLock<BTreeMap<String, CheckResult>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, check_id: &str, result: CheckResult) {
        let mut slots = self.slots.write().expect("context store lock poisoned");
        if slots.contains_key(check_id) {
            debug_assert!(false, "result slot `{check_id}` written twice");
            tracing::error!(check_id, "result slot written twice, keeping first value");
            return;
        }
        slots.insert(check_id.to_string(), result);
    }

    pub fn get(&self, check_id: &str) -> Option<CheckResult> {
        self.slots
            .read()
            .expect("context store lock poisoned")
            .get(check_id)
            .cloned()
    }

    pub fn contains(&self, check_id: &str) -> bool {
        self.slots
            .read()
            .expect("context store lock poisoned")
            .contains_key(check_id)
    }

    pub fn len(&self) -> usize {
        self.slots.read().expect("context store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Immutable JSON view of all committed results, keyed by check id, for
    /// expression evaluation and templating. This is a snapshot: results
    /// committed after the call are not visible through it.
    pub fn read_view(&self) -> Value {
        let slots = self.slots.read().expect("context store lock poisoned");
        let mut view = Map::new();
        for (id, result) in slots.iter() {
            if let Ok(value) = serde_json::to_value(result) {
                view.insert(id.clone(), value);
            }
        }
        Value::Object(view)
    }

    pub fn snapshot(&self) -> BTreeMap<String, CheckResult> {
        self.slots
            .read()
            .expect("context store lock poisoned")
            .clone()
    }
}

/// Per-run shared state, created on engine entry and dropped on return.
pub struct RunContext {
    pub run_id: String,
    pub event: TriggerEvent,
    pub started_at: DateTime<Utc>,
    pub outputs: ContextStore,
    issues: Mutex<Vec<Issue>>,
    pub signals: RunSignals,
}

impl RunContext {
    pub fn new(event: TriggerEvent, signals: RunSignals) -> Arc<Self> {
        Arc::new(Self {
            run_id: Uuid::new_v4().to_string(),
            event,
            started_at: Utc::now(),
            outputs: ContextStore::new(),
            issues: Mutex::new(Vec::new()),
            signals,
        })
    }

    /// Append findings to the global issue list, stamping the owning check.
    pub fn append_issues(&self, check_id: &str, findings: &[Issue]) {
        if findings.is_empty() {
            return;
        }
        let mut issues = self.issues.lock().expect("issue list lock poisoned");
        for finding in findings {
            let mut issue = finding.clone();
            issue.check_id = check_id.to_string();
            issues.push(issue);
        }
    }

    pub fn issues(&self) -> Vec<Issue> {
        self.issues.lock().expect("issue list lock poisoned").clone()
    }

    /// Root scope for expression evaluation: the frozen event, a snapshot of
    /// outputs, the run id and the frozen clock.
    pub fn scope(&self) -> Value {
        let mut root = Map::new();
        root.insert(
            "event".to_string(),
            serde_json::to_value(&self.event).unwrap_or(Value::Null),
        );
        root.insert("outputs".to_string(), self.outputs.read_view());
        root.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        root.insert(
            "now".to_string(),
            Value::String(self.started_at.to_rfc3339()),
        );
        Value::Object(root)
    }
}
