//! Per-instance cleanup outcome.
//!
//! Cleanup never stops at the first failed step. Each failure is recorded
//! here and logged; callers treat the report as informational.

use std::fmt;

use serde::Serialize;

use berth_state::InstanceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStep {
    RemoteTeardown,
    DeleteRecord,
    RemoveHostRelation,
    RemoveFromPool,
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CleanupStep::RemoteTeardown => "remote teardown",
            CleanupStep::DeleteRecord => "delete instance record",
            CleanupStep::RemoveHostRelation => "remove host relation",
            CleanupStep::RemoveFromPool => "remove from routing pool",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub instance: InstanceId,
    pub step: CleanupStep,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Instances whose records are gone.
    pub cleaned: Vec<InstanceId>,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn fail(&mut self, instance: &str, step: CleanupStep, error: impl fmt::Display) {
        self.failures.push(CleanupFailure {
            instance: instance.to_string(),
            step,
            error: error.to_string(),
        });
    }

    pub fn failures_for(&self, instance: &str) -> Vec<CleanupStep> {
        self.failures
            .iter()
            .filter(|f| f.instance == instance)
            .map(|f| f.step)
            .collect()
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cleaned {} instances", self.cleaned.len())?;
        if !self.failures.is_empty() {
            write!(f, ", {} cleanup steps failed", self.failures.len())?;
        }
        Ok(())
    }
}
