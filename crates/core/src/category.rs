use serde::{Deserialize, Serialize};

use crate::entity::{EntityBody, EntityKind};
use crate::image::ImageRef;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub image: Option<ImageRef>,
    /// Filled in by the backend on fetch; ignored on write.
    #[serde(default)]
    pub product_count: u32,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn effective_slug(&self) -> String {
        if self.slug.trim().is_empty() {
            slugify(&self.name)
        } else {
            self.slug.clone()
        }
    }
}

impl EntityBody for Category {
    const KIND: EntityKind = EntityKind::Category;

    fn images(&self) -> Vec<ImageRef> {
        self.image.iter().cloned().collect()
    }

    /// Categories hold a single image; extra entries are dropped.
    fn set_images(&mut self, images: Vec<ImageRef>) {
        self.image = images.into_iter().next();
    }
}

/// Lowercase ASCII alphanumerics joined by single dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}
