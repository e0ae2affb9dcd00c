use std::collections::{HashMap, VecDeque};
use std::fmt;

use storefront_core::{OpId, RecordId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Fetch,
    Add,
    Update,
    Remove,
    Images,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Add => "add",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::Images => "images",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Idle,
    Pending,
    Succeeded,
    Failed,
}

impl OpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked operation.
///
/// An operation can wait on several remote calls (its own, plus follow-ups
/// sent once a pending create lands). It settles when the last one reports;
/// any failure makes the whole operation fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpRecord {
    pub op_id: OpId,
    pub kind: OpKind,
    pub targets: Vec<RecordId>,
    pub status: OpStatus,
    pub error: Option<String>,
    /// Every status the operation has been in, oldest first.
    pub transitions: Vec<OpStatus>,
    outstanding: u32,
}

pub struct StatusTracker {
    ops: HashMap<OpId, OpRecord>,
    order: VecDeque<OpId>,
    latest: HashMap<OpKind, OpId>,
    max_settled: usize,
}

impl StatusTracker {
    pub fn new(max_settled: usize) -> Self {
        Self {
            ops: HashMap::new(),
            order: VecDeque::new(),
            latest: HashMap::new(),
            max_settled: max_settled.max(1),
        }
    }

    /// Start tracking an operation that still has `parts` remote results to
    /// wait for. With zero parts it settles as succeeded right away.
    pub fn begin(&mut self, kind: OpKind, targets: Vec<RecordId>, parts: u32) -> OpId {
        let op_id = OpId::new();
        let mut record = OpRecord {
            op_id,
            kind,
            targets,
            status: OpStatus::Idle,
            error: None,
            transitions: vec![OpStatus::Idle],
            outstanding: parts,
        };
        Self::transition(&mut record, OpStatus::Pending);
        if parts == 0 {
            Self::transition(&mut record, OpStatus::Succeeded);
        }
        self.ops.insert(op_id, record);
        self.order.push_back(op_id);
        self.latest.insert(kind, op_id);
        self.evict();
        op_id
    }

    /// Report one remote result. Returns the status after applying it.
    pub fn complete_part(&mut self, op_id: OpId, result: Result<(), String>) -> Option<OpStatus> {
        let record = self.ops.get_mut(&op_id)?;
        if record.status.is_settled() {
            return Some(record.status);
        }
        if let Err(message) = result {
            record.error.get_or_insert(message);
        }
        record.outstanding = record.outstanding.saturating_sub(1);
        if record.outstanding == 0 {
            let settled = if record.error.is_some() {
                OpStatus::Failed
            } else {
                OpStatus::Succeeded
            };
            Self::transition(record, settled);
        }
        let status = record.status;
        self.evict();
        Some(status)
    }

    pub fn retarget(&mut self, op_id: OpId, from: RecordId, to: RecordId) {
        if let Some(record) = self.ops.get_mut(&op_id) {
            for target in record.targets.iter_mut().filter(|t| **t == from) {
                *target = to;
            }
        }
    }

    pub fn get(&self, op_id: OpId) -> Option<&OpRecord> {
        self.ops.get(&op_id)
    }

    /// Status of the most recent operation of a kind, `Idle` if none ran yet.
    pub fn latest_status(&self, kind: OpKind) -> OpStatus {
        self.latest
            .get(&kind)
            .and_then(|id| self.ops.get(id))
            .map(|r| r.status)
            .unwrap_or(OpStatus::Idle)
    }

    pub fn latest_error(&self, kind: OpKind) -> Option<&str> {
        self.latest
            .get(&kind)
            .and_then(|id| self.ops.get(id))
            .and_then(|r| r.error.as_deref())
    }

    pub fn pending_count(&self) -> usize {
        self.ops
            .values()
            .filter(|r| r.status == OpStatus::Pending)
            .count()
    }

    fn transition(record: &mut OpRecord, status: OpStatus) {
        record.status = status;
        record.transitions.push(status);
    }

    /// Drop the oldest settled records beyond the history limit. Pending
    /// records and the latest record per kind are kept.
    fn evict(&mut self) {
        let settled = self.ops.values().filter(|r| r.status.is_settled()).count();
        let mut excess = settled.saturating_sub(self.max_settled);
        if excess == 0 {
            return;
        }
        let latest: Vec<OpId> = self.latest.values().copied().collect();
        let ops = &mut self.ops;
        self.order.retain(|op_id| {
            if excess == 0 || latest.contains(op_id) {
                return true;
            }
            match ops.get(op_id).map(|r| r.status.is_settled()) {
                Some(true) => {
                    ops.remove(op_id);
                    excess -= 1;
                    false
                }
                Some(false) => true,
                None => false,
            }
        });
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_STATUS_HISTORY)
    }
}
