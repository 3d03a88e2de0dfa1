// Execution Statistics

use serde::{Deserialize, Serialize};

use crate::result::CheckStatus;

/// Per-check timing, recorded at commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckTiming {
    pub check_id: String,
    pub status: CheckStatus,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Aggregate counters for a finished run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStatistics {
    pub total_checks: usize,
    pub ok_checks: usize,
    pub skipped_checks: usize,
    pub failed_checks: usize,
    pub error_checks: usize,
    pub timed_out_checks: usize,
    pub total_issues: usize,
    pub total_attempts: u32,
    pub wall_time_ms: u64,
    #[serde(default)]
    pub checks: Vec<CheckTiming>,
}

impl ExecutionStatistics {
    pub fn record(&mut self, timing: CheckTiming) {
        self.total_checks += 1;
        self.total_attempts += timing.attempts;
        match timing.status {
            CheckStatus::Ok => self.ok_checks += 1,
            CheckStatus::Skipped => self.skipped_checks += 1,
            CheckStatus::Failed => self.failed_checks += 1,
            CheckStatus::Error => self.error_checks += 1,
            CheckStatus::TimedOut => self.timed_out_checks += 1,
        }
        self.checks.push(timing);
    }
}
