//! The external health-check collaborator.
//!
//! The configured command prints `{"issues":[...]}` on stdout. Its worst
//! severity decides the exit code: critical 2, high 1, anything else 0.

use crate::config::HealthConfig;
use handoff_core::{HandoffError, HandoffResult};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum Severity {
    Ignorable,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Ignorable => "ignorable",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthIssue {
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub component: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HealthReport {
    #[serde(default)]
    pub issues: Vec<HealthIssue>,
}

impl HealthReport {
    pub fn worst(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }

    pub fn exit_code(&self) -> u8 {
        match self.worst() {
            Some(Severity::Critical) => 2,
            Some(Severity::High) => 1,
            _ => 0,
        }
    }

    fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return writeln!(f, "Healthy: no issues reported.");
        }
        let mut issues: Vec<&HealthIssue> = self.issues.iter().collect();
        issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        for issue in issues {
            match &issue.component {
                Some(component) => {
                    writeln!(f, "[{}] {component}: {}", issue.severity, issue.message)?;
                }
                None => writeln!(f, "[{}] {}", issue.severity, issue.message)?,
            }
        }
        writeln!(
            f,
            "{} issues: {} critical, {} high, {} medium, {} low",
            self.issues.len(),
            self.count(Severity::Critical),
            self.count(Severity::High),
            self.count(Severity::Medium),
            self.count(Severity::Low),
        )
    }
}

/// What the collaborator produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    Report(HealthReport),
    /// Output was not a report; the child's own exit code stands.
    Raw { code: u8, output: String },
}

impl HealthOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            HealthOutcome::Report(report) => report.exit_code(),
            HealthOutcome::Raw { code, .. } => *code,
        }
    }
}

/// Interpret the child's stdout and exit status.
pub fn interpret(stdout: &str, status: Option<i32>) -> HandoffResult<HealthOutcome> {
    match serde_json::from_str::<HealthReport>(stdout) {
        Ok(report) => Ok(HealthOutcome::Report(report)),
        Err(e) => {
            debug!(error = %e, "Health output is not a JSON report");
            match status {
                Some(code @ 0..=2) => Ok(HealthOutcome::Raw {
                    code: code as u8,
                    output: stdout.to_string(),
                }),
                other => Err(HandoffError::Health(format!(
                    "Health command produced no JSON report and exited with {}",
                    other.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"))
                ))),
            }
        }
    }
}

/// Run the configured health command in `workspace`.
pub async fn run(config: &HealthConfig, workspace: &Path) -> HandoffResult<HealthOutcome> {
    let Some((program, args)) = config.command.split_first() else {
        return Err(HandoffError::Health(
            "No health command configured; set [health] command in handoff.toml".into(),
        ));
    };
    info!(command = %config.command.join(" "), "Running health check");

    let child = Command::new(program)
        .args(args)
        .current_dir(workspace)
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(Duration::from_secs(config.timeout_secs), child)
        .await
        .map_err(|_| {
            HandoffError::Health(format!(
                "Health command '{program}' timed out after {}s",
                config.timeout_secs
            ))
        })?
        .map_err(|e| HandoffError::Health(format!("Failed to run '{program}': {e}")))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        warn!(stderr = %stderr.trim(), "Health command wrote to stderr");
    }
    interpret(&String::from_utf8_lossy(&output.stdout), output.status.code())
}
