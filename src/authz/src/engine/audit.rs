//! Audit trail for explanations and fail-closed decisions
//!
//! Entries live in a bounded in-memory ring; the oldest entry is dropped
//! once the capacity is reached.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::error::ResolutionWarning;
use crate::resolution::ContributingRule;
use crate::scope::ScopeRef;
use crate::types::PrincipalId;

/// Why an entry was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// An `explain` call
    Explain,
    /// An internal error turned into DENY
    FailClosed,
}

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Unique entry ID
    pub id: Uuid,

    pub timestamp: DateTime<Utc>,

    pub kind: AuditKind,

    /// Principal who made the request
    pub principal: PrincipalId,

    /// Requested scope context
    pub scope: ScopeRef,

    /// Resource and action; empty for whole-map queries
    pub resource: String,
    pub action: String,

    /// Final result
    pub allowed: bool,

    /// Rule that produced the decision
    pub rule: ContributingRule,

    #[serde(default)]
    pub warnings: Vec<ResolutionWarning>,

    /// Configuration version the decision was computed from
    pub version: u64,
}

impl AuditEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: AuditKind,
        principal: &str,
        scope: &ScopeRef,
        resource: &str,
        action: &str,
        allowed: bool,
        rule: ContributingRule,
        version: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            principal: principal.to_string(),
            scope: scope.clone(),
            resource: resource.to_string(),
            action: action.to_string(),
            allowed,
            rule,
            warnings: Vec::new(),
            version,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<ResolutionWarning>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Bounded in-memory audit log
pub struct AuditLog {
    buffer: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(1_024))),
            capacity,
        }
    }

    pub fn record(&self, entry: AuditEntry) {
        let mut buffer = self.buffer.lock();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }

    /// Most recent entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.buffer.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Query audit entries by principal, newest first
    pub fn query_by_principal(&self, principal: &str, limit: usize) -> Vec<AuditEntry> {
        self.buffer
            .lock()
            .iter()
            .rev()
            .filter(|e| e.principal == principal)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Get audit statistics
    pub fn stats(&self) -> AuditStats {
        let buffer = self.buffer.lock();
        AuditStats {
            total: buffer.len(),
            allowed: buffer.iter().filter(|e| e.allowed).count(),
            denied: buffer.iter().filter(|e| !e.allowed).count(),
            fail_closed: buffer.iter().filter(|e| e.kind == AuditKind::FailClosed).count(),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Audit statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub total: usize,
    pub allowed: usize,
    pub denied: usize,
    pub fail_closed: usize,
}
