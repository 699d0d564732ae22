//! Audit log
//!
//! Append-only record of every match / install / block decision. Records are
//! emitted to `tracing` (target `audit`) as they are appended and kept in
//! insertion order for post-hoc inspection. Nothing here is ever rewritten.

use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Upper bound on frames kept per record
pub const MAX_STACK_FRAMES: usize = 13;

/// `   4: crate::module::function` lines of a rendered backtrace
static FRAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\d+:\s+(\S.*)$").unwrap()
});

/// Frame that enters the capture; everything above it is capture machinery
const CAPTURE_FRAME: &str = "audit::capture_stack";

/// Frames from the capture machinery itself
const SKIPPED_FRAME_MARKERS: &[&str] = &[
    "std::backtrace",
    "audit::capture_stack",
    "audit::AuditLog",
    "core::ops::function::FnOnce::call_once",
    "AssertUnwindSafe",
    "std::panicking::",
    "std::panic::catch_unwind",
    "__rust_try",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub seq: usize,
    pub at: DateTime<Utc>,
    pub phase: String,
    pub class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub decision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<String>>,
}

#[derive(Debug, Default)]
pub struct AuditLog {
    records: Mutex<Vec<AuditRecord>>,
    capture_stacks: bool,
}

impl AuditLog {
    pub fn new(capture_stacks: bool) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            capture_stacks,
        }
    }

    pub fn record(&self, phase: &str, class: &str, method: Option<&str>, decision: impl Into<String>) {
        self.append(phase, class, method, decision.into(), None);
    }

    /// Same as `record`, with a short call stack when capture is enabled
    pub fn record_with_stack(
        &self,
        phase: &str,
        class: &str,
        method: Option<&str>,
        decision: impl Into<String>,
    ) {
        let stack = if self.capture_stacks { capture_stack() } else { None };
        self.append(phase, class, method, decision.into(), stack);
    }

    fn append(
        &self,
        phase: &str,
        class: &str,
        method: Option<&str>,
        decision: String,
        stack: Option<Vec<String>>,
    ) {
        match method {
            Some(m) => tracing::info!(target: "audit", "{}: {}#{} {}", phase, class, m, decision),
            None => tracing::info!(target: "audit", "{}: {} {}", phase, class, decision),
        }
        if let Some(frames) = &stack {
            tracing::debug!(target: "audit", "callstack:\n  at {}", frames.join("\n  at "));
        }

        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let seq = records.len();
        records.push(AuditRecord {
            seq,
            at: Utc::now(),
            phase: phase.to_string(),
            class: class.to_string(),
            method: method.map(str::to_string),
            decision,
            stack,
        });
    }

    /// Copy of all records in insertion order
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn phase(&self, phase: &str) -> Vec<AuditRecord> {
        self.records().into_iter().filter(|r| r.phase == phase).collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Capture a bounded call stack, or `None` if capturing fails in any way
pub fn capture_stack() -> Option<Vec<String>> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        let rendered = Backtrace::force_capture().to_string();
        parse_frames(&rendered)
    }))
    .ok()
}

/// Frame names of a rendered backtrace, capture frames dropped, bounded
pub fn parse_frames(rendered: &str) -> Vec<String> {
    let frames: Vec<String> = rendered
        .lines()
        .filter_map(|line| FRAME_REGEX.captures(line))
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .collect();

    // innermost first: drop up to and including the last capture frame
    let start = frames
        .iter()
        .rposition(|frame| frame.contains(CAPTURE_FRAME))
        .map_or(0, |i| i + 1);

    frames
        .into_iter()
        .skip(start)
        .filter(|frame| !SKIPPED_FRAME_MARKERS.iter().any(|m| frame.contains(m)))
        .take(MAX_STACK_FRAMES)
        .collect()
}
