// Scheduler Work Graph
// Owns the worklist: dependency counts, the FIFO ready queue (seeded in
// declaration order, so execution is deterministic modulo provider timing),
// the running set and completion bookkeeping, plus failure propagation to
// successors.

use std::collections::{HashMap, HashSet, VecDeque};

use vantage_expr::{parse, Expr};
use vantage_types::{CheckDefinition, CheckStatus, RunOptions, SkipReason, WorkflowConfig};

use crate::error::ConfigError;

/// A successor that became ineligible when its dependency finished: it must
/// be committed as skipped without dispatching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoSkip {
    pub check_id: String,
    pub reason: SkipReason,
}

/// How a gate expression opted in to observing upstream failures: the set of
/// `outputs.<dep>` references, plus whether it calls `always()`.
struct GateOptIn {
    refs: HashSet<String>,
    always: bool,
}

impl GateOptIn {
    fn tolerates(&self, dep: &str) -> bool {
        self.always || self.refs.contains(dep)
    }
}

pub struct WorkGraph {
    /// Selected checks, keyed by id.
    checks: HashMap<String, CheckDefinition>,
    /// Remaining unfinished dependency count per pending check.
    pending: HashMap<String, usize>,
    ready: VecDeque<String>,
    running: HashSet<String>,
    /// Terminal outcome per finished check.
    done: HashMap<String, (CheckStatus, Option<SkipReason>)>,
    /// Dependents within the selection, in declaration order.
    successors: HashMap<String, Vec<String>>,
    gate_opt_in: HashMap<String, GateOptIn>,
    selected: usize,
}

impl WorkGraph {
    /// Validate the whole workflow (duplicates, unknown dependencies,
    /// cycles), then build the worklist for the checks `options` selects.
    /// Dependency edges to unselected checks are dropped.
    pub fn build(workflow: &WorkflowConfig, options: &RunOptions) -> Result<Self, ConfigError> {
        validate_workflow(workflow)?;

        let selected: Vec<&CheckDefinition> = workflow
            .checks
            .iter()
            .filter(|c| options.selects(c))
            .collect();
        let selected_ids: HashSet<&str> = selected.iter().map(|c| c.id.as_str()).collect();

        let mut checks = HashMap::new();
        let mut pending = HashMap::new();
        let mut ready = VecDeque::new();
        let mut successors: HashMap<String, Vec<String>> = HashMap::new();
        let mut gate_opt_in = HashMap::new();

        for check in &selected {
            let deps: Vec<&str> = check
                .depends_on
                .iter()
                .map(String::as_str)
                .filter(|d| selected_ids.contains(d))
                .collect();
            for dep in &deps {
                successors
                    .entry(dep.to_string())
                    .or_default()
                    .push(check.id.clone());
            }
            if deps.is_empty() {
                ready.push_back(check.id.clone());
            } else {
                pending.insert(check.id.clone(), deps.len());
            }
            gate_opt_in.insert(check.id.clone(), gate_opt_in_for(check));
            checks.insert(check.id.clone(), (*check).clone());
        }

        Ok(Self {
            selected: selected.len(),
            checks,
            pending,
            ready,
            running: HashSet::new(),
            done: HashMap::new(),
            successors,
            gate_opt_in,
        })
    }

    pub fn check(&self, id: &str) -> Option<&CheckDefinition> {
        self.checks.get(id)
    }

    pub fn selected_checks(&self) -> impl Iterator<Item = &CheckDefinition> {
        self.checks.values()
    }

    pub fn selected_len(&self) -> usize {
        self.selected
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Pop the next ready check and move it to the running set.
    pub fn next_ready(&mut self) -> Option<String> {
        let id = self.ready.pop_front()?;
        self.running.insert(id.clone());
        Some(id)
    }

    /// All selected checks have a terminal outcome.
    pub fn is_drained(&self) -> bool {
        self.done.len() == self.selected
    }

    /// Record a terminal outcome and release successors. Successors whose
    /// last dependency just finished either join the ready queue or, when a
    /// dependency failed (or was skipped in a propagating way) and their gate
    /// did not opt in to observing it, come back as `AutoSkip`s the caller
    /// must commit.
    pub fn complete(
        &mut self,
        check_id: &str,
        status: CheckStatus,
        skip_reason: Option<SkipReason>,
    ) -> Vec<AutoSkip> {
        self.running.remove(check_id);
        if self
            .done
            .insert(check_id.to_string(), (status, skip_reason))
            .is_some()
        {
            tracing::error!(check_id, "check completed twice");
        }

        let mut skips = Vec::new();
        let Some(successors) = self.successors.get(check_id).cloned() else {
            return skips;
        };
        for successor in successors {
            let Some(remaining) = self.pending.get_mut(&successor) else {
                continue;
            };
            *remaining -= 1;
            if *remaining > 0 {
                continue;
            }
            self.pending.remove(&successor);
            match self.blocking_reason(&successor) {
                Some(reason) => skips.push(AutoSkip {
                    check_id: successor,
                    reason,
                }),
                None => self.ready.push_back(successor),
            }
        }
        skips
    }

    /// Why `check_id` must be auto-skipped now that its dependencies are all
    /// terminal, or `None` if it is eligible to run.
    fn blocking_reason(&self, check_id: &str) -> Option<SkipReason> {
        let check = self.checks.get(check_id)?;
        let opt_in = self.gate_opt_in.get(check_id);
        let mut reason = None;
        for dep in &check.depends_on {
            let Some((status, skip_reason)) = self.done.get(dep) else {
                continue; // dep outside the selection
            };
            let propagated = match status {
                CheckStatus::Failed | CheckStatus::Error | CheckStatus::TimedOut => {
                    Some(SkipReason::UpstreamFailed)
                }
                CheckStatus::Skipped => match skip_reason {
                    Some(SkipReason::EventNotMatched) | Some(SkipReason::UpstreamSkipped) => {
                        Some(SkipReason::UpstreamSkipped)
                    }
                    Some(SkipReason::UpstreamFailed) => Some(SkipReason::UpstreamFailed),
                    _ => None, // condition_false does not propagate
                },
                CheckStatus::Ok => None,
            };
            let Some(propagated) = propagated else {
                continue;
            };
            if opt_in.map(|o| o.tolerates(dep)).unwrap_or(false) {
                continue; // the gate observes this upstream and decides itself
            }
            // upstream_failed wins over upstream_skipped when both apply.
            if propagated == SkipReason::UpstreamFailed {
                return Some(propagated);
            }
            reason.get_or_insert(propagated);
        }
        reason
    }
}

fn gate_opt_in_for(check: &CheckDefinition) -> GateOptIn {
    let mut refs = HashSet::new();
    let mut always = false;
    if let Some(gate) = check.gate.as_deref() {
        // An unparseable gate fails at evaluation time; no opt-in here.
        if let Ok(expr) = parse(gate) {
            always = expr.calls("always");
            refs = referenced_outputs(&expr, check);
        }
    }
    GateOptIn { refs, always }
}

fn referenced_outputs(expr: &Expr, check: &CheckDefinition) -> HashSet<String> {
    check
        .depends_on
        .iter()
        .filter(|dep| expr.references("outputs", dep))
        .cloned()
        .collect()
}

/// Reject duplicate ids, unknown dependency ids and dependency cycles.
/// Runs over the full workflow, before selection filters.
pub fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for check in &workflow.checks {
        if !seen.insert(check.id.as_str()) {
            return Err(ConfigError::DuplicateCheckId(check.id.clone()));
        }
    }
    for check in &workflow.checks {
        for dep in &check.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(ConfigError::UnknownDependency {
                    check_id: check.id.clone(),
                    dependency_id: dep.clone(),
                });
            }
        }
    }
    if let Some(path) = detect_cycle(&workflow.checks) {
        return Err(ConfigError::CycleDetected { path });
    }
    Ok(())
}

/// DFS cycle detection; returns the offending path when one exists.
fn detect_cycle(checks: &[CheckDefinition]) -> Option<Vec<String>> {
    let by_id: HashMap<&str, &CheckDefinition> =
        checks.iter().map(|c| (c.id.as_str(), c)).collect();
    let mut visited = HashSet::new();

    for check in checks {
        let mut path = Vec::new();
        if dfs_cycle(&check.id, &by_id, &mut visited, &mut path) {
            return Some(path);
        }
    }
    None
}

fn dfs_cycle(
    check_id: &str,
    by_id: &HashMap<&str, &CheckDefinition>,
    visited: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> bool {
    if path.iter().any(|p| p == check_id) {
        path.push(check_id.to_string());
        return true;
    }
    if visited.contains(check_id) {
        return false;
    }
    visited.insert(check_id.to_string());
    path.push(check_id.to_string());

    if let Some(check) = by_id.get(check_id) {
        for dep in &check.depends_on {
            if dfs_cycle(dep, by_id, visited, path) {
                return true;
            }
        }
    }
    path.pop();
    false
}
