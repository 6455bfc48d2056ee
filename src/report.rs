//! Error reporting collaborator.
//!
//! Check failures are never fatal; they are tagged with target context and
//! handed to an [`ErrorReporter`]. The default reporter writes a structured
//! `tracing` event; other sinks plug in behind the same trait.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    Warning,
    #[default]
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportOptions {
    pub tags: BTreeMap<String, String>,
    pub extra: BTreeMap<String, String>,
    pub severity: Severity,
}

impl ReportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

pub trait ErrorReporter: Send + Sync {
    fn report(&self, err: &anyhow::Error, options: &ReportOptions);
}

/// Emits every report as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, err: &anyhow::Error, options: &ReportOptions) {
        let tags = format!("{:?}", options.tags);
        let extra = format!("{:?}", options.extra);
        match options.severity {
            Severity::Warning => warn!(error = format!("{err:#}"), tags, extra, "Reported warning"),
            Severity::Error | Severity::Fatal => error!(
                error = format!("{err:#}"),
                severity = options.severity.as_str(),
                tags,
                extra,
                "Reported error"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedReport {
    pub message: String,
    pub options: ReportOptions,
}

/// Keeps every report in memory. Meant for tests.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<RecordedReport>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<RecordedReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, err: &anyhow::Error, options: &ReportOptions) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedReport {
                message: format!("{err:#}"),
                options: options.clone(),
            });
    }
}
