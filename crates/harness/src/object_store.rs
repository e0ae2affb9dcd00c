use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use storefront_core::ImageRef;
use storefront_storage::{
    BeforeDelete, ObjectStore, ProgressFn, StorageError, UploadOptions, UploadProgress,
};

const CHUNK: usize = 16 * 1024;

struct StoredObject {
    bytes: Vec<u8>,
    temporary: bool,
}

/// Object store that keeps files in memory, keyed by URL.
pub struct MemoryObjectStore {
    base_url: String,
    objects: Mutex<HashMap<String, StoredObject>>,
    before_delete: Option<BeforeDelete>,
}

impl MemoryObjectStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            objects: Mutex::new(HashMap::new()),
            before_delete: None,
        }
    }

    pub fn with_before_delete(mut self, hook: BeforeDelete) -> Self {
        self.before_delete = Some(hook);
        self
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.objects().contains_key(url)
    }

    pub fn is_temporary(&self, url: &str) -> Option<bool> {
        self.objects().get(url).map(|o| o.temporary)
    }

    pub fn bytes(&self, url: &str) -> Option<Vec<u8>> {
        self.objects().get(url).map(|o| o.bytes.clone())
    }

    fn check_delete(&self, url: &str) -> Result<(), StorageError> {
        if let Some(hook) = &self.before_delete {
            let key = url
                .rsplit('/')
                .next()
                .and_then(|file| file.split('-').next())
                .unwrap_or(url);
            if !hook(&ImageRef::new(key, url)) {
                return Err(StorageError::Rejected(format!("delete of {url} denied")));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        name: &str,
        bytes: &[u8],
        options: UploadOptions,
        progress: Option<ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> Result<ImageRef, StorageError> {
        let key = blake3::hash(bytes).to_hex().as_str()[..32].to_string();
        let url = format!("{}/{key}-{name}", self.base_url);
        let replaced = options
            .replace_url
            .as_deref()
            .filter(|old| *old != url && self.contains(old));
        if let Some(old) = replaced {
            self.check_delete(old)?;
        }

        let total = bytes.len() as u64;
        let mut written = 0u64;
        for chunk in bytes.chunks(CHUNK) {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            written += chunk.len() as u64;
            if let Some(report) = progress {
                report(UploadProgress { written, total });
            }
            tokio::task::yield_now().await;
        }
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let mut objects = self.objects();
        if let Some(old) = replaced {
            objects.remove(old);
        }
        objects.insert(
            url.clone(),
            StoredObject {
                bytes: bytes.to_vec(),
                temporary: options.temporary,
            },
        );
        Ok(ImageRef::new(key, url))
    }

    async fn confirm_upload(&self, url: &str) -> Result<(), StorageError> {
        let mut objects = self.objects();
        let object = objects
            .get_mut(url)
            .ok_or_else(|| StorageError::NotFound(url.to_string()))?;
        object.temporary = false;
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        if !self.contains(url) {
            return Err(StorageError::NotFound(url.to_string()));
        }
        self.check_delete(url)?;
        self.objects().remove(url);
        Ok(())
    }
}
