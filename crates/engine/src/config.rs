use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::status::OpKind;

pub const DEFAULT_STATUS_HISTORY: usize = 256;

/// Which operation kinds undo their optimistic change when the backend
/// rejects them. Off by default: local edits stay visible after a failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackPolicy {
    pub add: bool,
    pub update: bool,
    pub remove: bool,
    pub images: bool,
}

impl RollbackPolicy {
    pub fn all() -> Self {
        Self {
            add: true,
            update: true,
            remove: true,
            images: true,
        }
    }

    pub fn applies(&self, kind: OpKind) -> bool {
        match kind {
            OpKind::Add => self.add,
            OpKind::Update => self.update,
            OpKind::Remove => self.remove,
            OpKind::Images => self.images,
            OpKind::Fetch => false,
        }
    }
}

/// What an update does when its target is not in the local collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    #[default]
    Error,
    /// Skip the local change silently and still send the update.
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub rollback: RollbackPolicy,
    pub missing: MissingPolicy,
    /// Re-fetch linked collections after a successful add.
    pub refresh_dependents: bool,
    pub status_history: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rollback: RollbackPolicy::default(),
            missing: MissingPolicy::default(),
            refresh_dependents: true,
            status_history: DEFAULT_STATUS_HISTORY,
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        if config.status_history == 0 {
            return Err(EngineError::Config("status_history must be at least 1".into()));
        }
        Ok(config)
    }
}
