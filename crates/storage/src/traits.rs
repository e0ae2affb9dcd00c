use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use storefront_core::{Entity, EntityBody, ImageRef, ListParams, RecordId};

use crate::error::StorageError;

/// Replacement image list for one row, used by bulk image updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpdate {
    pub id: RecordId,
    pub images: Vec<ImageRef>,
}

impl ImageUpdate {
    pub fn new(id: RecordId, images: Vec<ImageRef>) -> Self {
        Self { id, images }
    }
}

/// Persistence backend for one entity type.
///
/// Every call either applies completely or not at all. `fetch_all` validates
/// its parameters before touching the backend.
#[async_trait]
pub trait Gateway<T: EntityBody>: Send + Sync {
    async fn fetch_all(&self, params: &ListParams) -> Result<Vec<Entity<T>>, StorageError>;

    /// Persist a new row and return the id the backend assigned.
    async fn create(&self, body: &T) -> Result<RecordId, StorageError>;

    /// Replace the row's fields. Fails with `NotFound` if the id is unknown.
    async fn update(&self, id: RecordId, body: &T) -> Result<(), StorageError>;

    /// Delete every listed row together with its join rows. Unknown ids are
    /// skipped.
    async fn delete_many(&self, ids: &[RecordId]) -> Result<(), StorageError>;

    /// Replace the image lists of several rows at once.
    async fn update_images(&self, updates: &[ImageUpdate]) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub written: u64,
    pub total: u64,
}

impl UploadProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.written.min(self.total) * 100) / self.total) as u8
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Temporary uploads are not served permanently until confirmed.
    pub temporary: bool,
    /// File to replace once the new upload is stored. The delete hook must
    /// allow removing it.
    pub replace_url: Option<String>,
}

pub type ProgressFn<'a> = &'a (dyn Fn(UploadProgress) + Send + Sync);

/// Decides whether a stored file may be deleted.
pub type BeforeDelete = Box<dyn Fn(&ImageRef) -> bool + Send + Sync>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        name: &str,
        bytes: &[u8],
        options: UploadOptions,
        progress: Option<ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> Result<ImageRef, StorageError>;

    /// Turn a temporary upload into a permanent one.
    async fn confirm_upload(&self, url: &str) -> Result<(), StorageError>;

    /// Delete a stored file. Fails with `Rejected` when the delete hook says no.
    async fn delete(&self, url: &str) -> Result<(), StorageError>;
}
