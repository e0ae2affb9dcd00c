use std::sync::Mutex;

use pretty_assertions::assert_eq;
use storefront_core::{ImageRef, ListParams, Record};
use storefront_engine::OpStatus;
use storefront_harness::fixtures::{cup, t_shirt};
use storefront_harness::{MemoryObjectStore, TestCatalog, init_tracing};
use storefront_storage::{
    ImageUpdate, LocalObjectStore, ObjectStore, StorageError, UploadOptions, UploadProgress,
};
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn std::error::Error>>;

// ============================================================================
// Controllers over SQLite
// ============================================================================

#[tokio::test]
async fn adding_a_product_updates_category_counts() -> TestResult {
    init_tracing();
    let catalog = TestCatalog::new()?;
    let kitchen = catalog.seed_category("Kitchen").await?;
    catalog.seed_category("Apparel").await?;
    catalog.categories.fetch(ListParams::default()).await?;
    let count_of = |name: &str| {
        catalog
            .categories
            .list()
            .into_iter()
            .find(|c| c.body.name == name)
            .map(|c| c.body.product_count)
    };
    assert_eq!(count_of("Kitchen"), Some(0));

    let report = catalog.products.add(Record::Draft(cup(kitchen))).await?;
    assert_eq!(report.status, OpStatus::Succeeded);
    assert_eq!(count_of("Kitchen"), Some(1));
    assert_eq!(count_of("Apparel"), Some(0));

    let id = report.id.ok_or("no id")?;
    let stored = catalog.db.product(id)?.ok_or("not persisted")?;
    assert_eq!(stored.body.title, "Cup");
    assert_eq!(catalog.db.product_category_ids(id)?, vec![kitchen]);
    Ok(())
}

#[tokio::test]
async fn remove_through_the_controller_clears_join_rows() -> TestResult {
    init_tracing();
    let catalog = TestCatalog::new()?;
    let kitchen = catalog.seed_category("Kitchen").await?;
    let apparel = catalog.seed_category("Apparel").await?;
    let cup_id = catalog.seed_product(&cup(kitchen)).await?;
    catalog.seed_product(&t_shirt(apparel)).await?;
    catalog.products.fetch(ListParams::default()).await?;

    let report = catalog.products.remove(&[cup_id]).await?;
    assert!(report.succeeded());
    assert_eq!(catalog.products.len(), 1);
    assert!(catalog.db.product(cup_id)?.is_none());
    assert_eq!(catalog.db.join_row_count()?, 1);
    Ok(())
}

#[tokio::test]
async fn backend_rejection_surfaces_as_a_failed_operation() -> TestResult {
    init_tracing();
    let catalog = TestCatalog::new()?;
    let kitchen = catalog.seed_category("Kitchen").await?;
    catalog.seed_product(&cup(kitchen)).await?;

    // same slug as the seeded row
    let report = catalog.products.add(Record::Draft(cup(kitchen))).await?;
    assert_eq!(report.status, OpStatus::Failed);
    assert!(
        report
            .error
            .as_deref()
            .is_some_and(|e| e.contains("constraint"))
    );
    Ok(())
}

// ============================================================================
// Upload then attach
// ============================================================================

#[tokio::test]
async fn uploaded_images_are_attached_in_one_bulk_update() -> TestResult {
    init_tracing();
    let catalog = TestCatalog::new()?;
    let kitchen = catalog.seed_category("Kitchen").await?;
    let cup_id = catalog.seed_product(&cup(kitchen)).await?;
    catalog.products.fetch(ListParams::default()).await?;

    let dir = tempfile::tempdir()?;
    let store = LocalObjectStore::open(dir.path(), "https://cdn.test/files").await?;
    let cancel = CancellationToken::new();
    let temporary = UploadOptions {
        temporary: true,
        replace_url: None,
    };
    let front = store
        .upload("front.jpg", b"front", temporary.clone(), None, &cancel)
        .await?;
    let side = store
        .upload("side.jpg", b"side", temporary, None, &cancel)
        .await?;

    let report = catalog
        .products
        .update_images(vec![ImageUpdate::new(cup_id, vec![front.clone(), side.clone()])])
        .await?;
    assert!(report.succeeded());
    for image in [&front, &side] {
        store.confirm_upload(&image.url).await?;
    }

    let stored = catalog.db.product(cup_id)?.ok_or("cup")?;
    assert_eq!(
        stored.body.images.all_urls(),
        vec![front.url.as_str(), side.url.as_str()]
    );
    Ok(())
}

// ============================================================================
// In-memory object store
// ============================================================================

#[tokio::test]
async fn memory_store_reports_progress_and_confirms() -> TestResult {
    let store = MemoryObjectStore::new("mem://bucket/");
    let seen = Mutex::new(Vec::new());
    let report = |p: UploadProgress| {
        if let Ok(mut seen) = seen.lock() {
            seen.push(p.percent());
        }
    };
    let bytes = vec![1u8; 40 * 1024];
    let image = store
        .upload(
            "photo.png",
            &bytes,
            UploadOptions {
                temporary: true,
                replace_url: None,
            },
            Some(&report),
            &CancellationToken::new(),
        )
        .await?;

    assert!(image.url.starts_with("mem://bucket/"));
    assert_eq!(seen.into_inner()?.last(), Some(&100));
    assert_eq!(store.is_temporary(&image.url), Some(true));
    store.confirm_upload(&image.url).await?;
    assert_eq!(store.is_temporary(&image.url), Some(false));
    assert_eq!(store.bytes(&image.url), Some(bytes));
    Ok(())
}

#[tokio::test]
async fn memory_store_honours_cancel_replace_and_hook() -> TestResult {
    let store = MemoryObjectStore::new("mem://bucket")
        .with_before_delete(Box::new(|image: &ImageRef| !image.url.ends_with("keep.png")));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = store
        .upload("x.png", b"x", UploadOptions::default(), None, &cancel)
        .await;
    assert!(matches!(result, Err(StorageError::Cancelled)));
    assert!(store.is_empty());

    let live = CancellationToken::new();
    let old = store
        .upload("v1.png", b"v1", UploadOptions::default(), None, &live)
        .await?;
    let new = store
        .upload(
            "v2.png",
            b"v2",
            UploadOptions {
                temporary: false,
                replace_url: Some(old.url.clone()),
            },
            None,
            &live,
        )
        .await?;
    assert!(!store.contains(&old.url));
    assert!(store.contains(&new.url));

    let kept = store
        .upload("keep.png", b"keep", UploadOptions::default(), None, &live)
        .await?;
    assert!(matches!(
        store.delete(&kept.url).await,
        Err(StorageError::Rejected(_))
    ));
    let replace_kept = store
        .upload(
            "v3.png",
            b"v3",
            UploadOptions {
                temporary: false,
                replace_url: Some(kept.url.clone()),
            },
            None,
            &live,
        )
        .await;
    assert!(matches!(replace_kept, Err(StorageError::Rejected(_))));
    assert!(store.contains(&kept.url));
    assert_eq!(store.len(), 2);
    store.delete(&new.url).await?;
    assert_eq!(store.len(), 1);
    Ok(())
}
