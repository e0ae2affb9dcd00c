use serde::{Deserialize, Serialize};

use crate::CoreError;

/// A file in external object storage. `key` is what the storage provider
/// needs to confirm or delete it, `url` is where it is served from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub key: String,
    pub url: String,
}

impl ImageRef {
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
        }
    }
}

/// Product images as the UI sees them. Persisted as a flat array where the
/// first element is the primary image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductImages {
    pub primary: Option<ImageRef>,
    pub snapshots: Vec<ImageRef>,
}

impl ProductImages {
    pub fn from_array(images: Vec<ImageRef>) -> Self {
        let mut iter = images.into_iter();
        let primary = iter.next();
        Self {
            primary,
            snapshots: iter.collect(),
        }
    }

    /// A product without a primary image has no snapshots either.
    pub fn to_array(&self) -> Vec<ImageRef> {
        match &self.primary {
            Some(primary) => std::iter::once(primary.clone())
                .chain(self.snapshots.iter().cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn all_urls(&self) -> Vec<&str> {
        self.primary
            .iter()
            .chain(self.snapshots.iter())
            .map(|img| img.url.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.snapshots.is_empty()
    }
}

pub fn images_to_json(images: &[ImageRef]) -> Result<String, CoreError> {
    serde_json::to_string(images).map_err(|e| CoreError::Serialization(e.to_string()))
}

pub fn images_from_json(json: &str) -> Result<Vec<ImageRef>, CoreError> {
    serde_json::from_str(json).map_err(|e| CoreError::Serialization(e.to_string()))
}
