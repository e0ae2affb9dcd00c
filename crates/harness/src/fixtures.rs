//! Catalog rows used across the integration tests.

use storefront_core::{Category, CategoryRef, ImageRef, Product, ProductImages, RecordId};

pub fn image(n: u32) -> ImageRef {
    ImageRef::new(format!("key{n}"), format!("https://cdn.test/img/{n}.png"))
}

pub fn category_ref(id: RecordId, name: &str) -> CategoryRef {
    CategoryRef {
        id,
        name: name.to_string(),
    }
}

/// The cup from the admin's "add product" walkthrough.
pub fn cup(kitchen: RecordId) -> Product {
    Product {
        stock: 18,
        category: Some(category_ref(kitchen, "Kitchen")),
        ..Product::new("Cup", 19.99, 15.99)
    }
}

pub fn t_shirt(apparel: RecordId) -> Product {
    Product {
        description: "Plain cotton tee".into(),
        stock: 120,
        avg_rating: 4.2,
        reviews_count: 31,
        category: Some(category_ref(apparel, "Apparel")),
        images: ProductImages::from_array(vec![image(1), image(2)]),
        ..Product::new("T-Shirt", 12.5, 9.99)
    }
}

pub fn sofa(living: RecordId) -> Product {
    Product {
        stock: 2,
        category: Some(category_ref(living, "Living Room")),
        ..Product::new("Sofa", 899.0, 749.0)
    }
}

pub fn category_names() -> [&'static str; 4] {
    ["Kitchen", "Apparel", "Living Room", "Garden"]
}

pub fn categories() -> Vec<Category> {
    category_names().into_iter().map(Category::new).collect()
}

pub fn id(n: i64) -> RecordId {
    match RecordId::new(n) {
        Ok(id) => id,
        Err(e) => panic!("fixture id {n}: {e}"),
    }
}
