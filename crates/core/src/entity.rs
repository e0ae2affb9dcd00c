use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::RecordId;
use crate::image::ImageRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Product,
    Category,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Category => "category",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The field set of one entity type. Stores and controllers never look inside
/// it beyond equality and the image accessors.
pub trait EntityBody: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    const KIND: EntityKind;

    /// Images in persisted order.
    fn images(&self) -> Vec<ImageRef>;

    fn set_images(&mut self, images: Vec<ImageRef>);
}

/// Input to an add: either a draft that still needs an id, or a record that
/// already has one.
#[derive(Debug, Clone, PartialEq)]
pub enum Record<T> {
    Draft(T),
    Persisted { id: RecordId, body: T },
}

impl<T> Record<T> {
    pub fn id(&self) -> Option<RecordId> {
        match self {
            Self::Draft(_) => None,
            Self::Persisted { id, .. } => Some(*id),
        }
    }

    pub fn into_body(self) -> T {
        match self {
            Self::Draft(body) | Self::Persisted { body, .. } => body,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistState {
    /// Id was generated locally; the backend has not confirmed the row yet.
    Local,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity<T> {
    pub id: RecordId,
    pub body: T,
    pub state: PersistState,
}

impl<T> Entity<T> {
    pub fn confirmed(id: RecordId, body: T) -> Self {
        Self {
            id,
            body,
            state: PersistState::Confirmed,
        }
    }

    pub fn local(id: RecordId, body: T) -> Self {
        Self {
            id,
            body,
            state: PersistState::Local,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == PersistState::Confirmed
    }
}
