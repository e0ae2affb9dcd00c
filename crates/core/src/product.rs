use serde::{Deserialize, Serialize};

use crate::category::slugify;
use crate::entity::{EntityBody, EntityKind};
use crate::ids::RecordId;
use crate::image::{ImageRef, ProductImages};

/// The category a product is filed under, denormalized for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRef {
    pub id: RecordId,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    pub discounted_price: f64,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub avg_rating: f64,
    #[serde(default)]
    pub reviews_count: i64,
    #[serde(default)]
    pub category: Option<CategoryRef>,
    #[serde(default)]
    pub images: ProductImages,
}

impl Product {
    pub fn new(title: impl Into<String>, price: f64, discounted_price: f64) -> Self {
        Self {
            title: title.into(),
            price,
            discounted_price,
            ..Default::default()
        }
    }

    /// Slug as stored: the explicit one, or one derived from the title.
    pub fn effective_slug(&self) -> String {
        if self.slug.trim().is_empty() {
            slugify(&self.title)
        } else {
            self.slug.clone()
        }
    }
}

impl EntityBody for Product {
    const KIND: EntityKind = EntityKind::Product;

    fn images(&self) -> Vec<ImageRef> {
        self.images.to_array()
    }

    fn set_images(&mut self, images: Vec<ImageRef>) {
        self.images = ProductImages::from_array(images);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_falls_back_to_title() {
        let mut cup = Product::new("Ceramic Cup", 19.99, 15.99);
        assert_eq!(cup.effective_slug(), "ceramic-cup");
        cup.slug = "cup-01".into();
        assert_eq!(cup.effective_slug(), "cup-01");
    }

    #[test]
    fn set_images_splits_primary() {
        let mut cup = Product::new("Cup", 19.99, 15.99);
        cup.set_images(vec![
            ImageRef::new("a", "/a.png"),
            ImageRef::new("b", "/b.png"),
        ]);
        assert_eq!(cup.images.primary, Some(ImageRef::new("a", "/a.png")));
        assert_eq!(cup.images.snapshots.len(), 1);
        assert_eq!(cup.images().len(), 2);
    }
}
