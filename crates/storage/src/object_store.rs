use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use storefront_core::{ImageRef, OpId};

use crate::error::StorageError;
use crate::traits::{BeforeDelete, ObjectStore, ProgressFn, UploadOptions, UploadProgress};

pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

const TEMP_DIR: &str = "temp";
const FILES_DIR: &str = "files";

/// Object store on the local filesystem.
///
/// Keys are content hashes, so uploading the same bytes twice yields the same
/// key. Temporary uploads live under `temp/` until confirmed.
pub struct LocalObjectStore {
    root: PathBuf,
    base_url: String,
    before_delete: Option<BeforeDelete>,
}

impl LocalObjectStore {
    pub async fn open(root: impl Into<PathBuf>, base_url: &str) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(TEMP_DIR)).await?;
        tokio::fs::create_dir_all(root.join(FILES_DIR)).await?;
        Ok(Self {
            root,
            base_url: base_url.trim_end_matches('/').to_string(),
            before_delete: None,
        })
    }

    pub fn with_before_delete(mut self, hook: BeforeDelete) -> Self {
        self.before_delete = Some(hook);
        self
    }

    fn file_name_from_url<'a>(&self, url: &'a str) -> Result<&'a str, StorageError> {
        let name = url
            .strip_prefix(&self.base_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| StorageError::NotFound(format!("url not served by this store: {url}")))?;
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return Err(StorageError::NotFound(format!("malformed object url: {url}")));
        }
        Ok(name)
    }

    /// Locate a stored object, permanent area first.
    async fn locate(&self, file_name: &str) -> Result<PathBuf, StorageError> {
        for dir in [FILES_DIR, TEMP_DIR] {
            let path = self.root.join(dir).join(file_name);
            if tokio::fs::try_exists(&path).await? {
                return Ok(path);
            }
        }
        Err(StorageError::NotFound(file_name.to_string()))
    }

    fn check_delete(&self, file_name: &str, url: &str) -> Result<(), StorageError> {
        if let Some(hook) = &self.before_delete {
            let key = file_name.split('.').next().unwrap_or(file_name);
            if !hook(&ImageRef::new(key, url)) {
                warn!(url, "delete denied by hook");
                return Err(StorageError::Rejected(format!("delete of {url} denied")));
            }
        }
        Ok(())
    }

    /// Resolve the file an upload replaces. The delete hook is asked before
    /// anything is written.
    async fn replaced_file(&self, old_url: &str) -> Result<Option<PathBuf>, StorageError> {
        let file_name = self.file_name_from_url(old_url)?;
        match self.locate(file_name).await {
            Ok(path) => {
                self.check_delete(file_name, old_url)?;
                Ok(Some(path))
            }
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Write `bytes` to `path` chunk by chunk, checking for cancellation between
/// chunks.
async fn write_part(
    path: &Path,
    bytes: &[u8],
    progress: Option<ProgressFn<'_>>,
    cancel: &CancellationToken,
) -> Result<(), StorageError> {
    let total = bytes.len() as u64;
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    for chunk in bytes.chunks(UPLOAD_CHUNK_SIZE) {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        file.write_all(chunk).await?;
        written += chunk.len() as u64;
        if let Some(report) = progress {
            report(UploadProgress { written, total });
        }
        tokio::task::yield_now().await;
    }
    file.flush().await?;
    if cancel.is_cancelled() {
        return Err(StorageError::Cancelled);
    }
    Ok(())
}

fn extension_of(name: &str) -> Option<&str> {
    let ext = Path::new(name).extension()?.to_str()?;
    if ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(ext)
    } else {
        None
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(
        &self,
        name: &str,
        bytes: &[u8],
        options: UploadOptions,
        progress: Option<ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> Result<ImageRef, StorageError> {
        let hash = blake3::hash(bytes).to_hex();
        let key = hash.as_str()[..32].to_string();
        let file_name = match extension_of(name) {
            Some(ext) => format!("{key}.{}", ext.to_ascii_lowercase()),
            None => key.clone(),
        };
        let url = format!("{}/{file_name}", self.base_url);
        let replaced = match options.replace_url.as_deref() {
            Some(old_url) if old_url != url => self.replaced_file(old_url).await?,
            _ => None,
        };

        let dir = if options.temporary { TEMP_DIR } else { FILES_DIR };
        let final_path = self.root.join(dir).join(&file_name);
        // one part file per call; concurrent uploads of the same bytes must not share it
        let part_path = self
            .root
            .join(TEMP_DIR)
            .join(format!("{file_name}.{}.part", OpId::new()));

        let committed = match write_part(&part_path, bytes, progress, cancel).await {
            Ok(()) => tokio::fs::rename(&part_path, &final_path)
                .await
                .map_err(StorageError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = committed {
            if let Err(cleanup) = tokio::fs::remove_file(&part_path).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(path = %part_path.display(), error = %cleanup, "could not remove part file");
                }
            }
            match &e {
                StorageError::Cancelled => info!(name, "upload cancelled"),
                _ => warn!(name, error = %e, "upload failed"),
            }
            return Err(e);
        }
        if bytes.is_empty() {
            if let Some(report) = progress {
                report(UploadProgress { written: 0, total: 0 });
            }
        }

        if let Some(old) = replaced {
            match tokio::fs::remove_file(&old).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(name, %url, temporary = options.temporary, "stored upload");
        Ok(ImageRef::new(key, url))
    }

    async fn confirm_upload(&self, url: &str) -> Result<(), StorageError> {
        let file_name = self.file_name_from_url(url)?;
        let temp = self.root.join(TEMP_DIR).join(file_name);
        if tokio::fs::try_exists(&temp).await? {
            tokio::fs::rename(&temp, self.root.join(FILES_DIR).join(file_name)).await?;
            debug!(url, "confirmed upload");
            return Ok(());
        }
        if tokio::fs::try_exists(self.root.join(FILES_DIR).join(file_name)).await? {
            return Ok(());
        }
        Err(StorageError::NotFound(url.to_string()))
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        let file_name = self.file_name_from_url(url)?;
        let path = self.locate(file_name).await?;
        self.check_delete(file_name, url)?;
        tokio::fs::remove_file(path).await?;
        debug!(url, "deleted object");
        Ok(())
    }
}
