use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use storefront_core::{
    Category, Entity, EntityBody, ListParams, PersistState, Product, Record,
};
use storefront_engine::{
    EngineError, OpStatus, Refresh, RollbackPolicy, SyncConfig, SyncController,
};
use storefront_harness::fixtures::{categories, cup, id, image, sofa, t_shirt};
use storefront_harness::{CallKind, GatewayCall, MockGateway, init_tracing};
use storefront_storage::ImageUpdate;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn setup(config: SyncConfig) -> (Arc<MockGateway<Product>>, SyncController<Product>) {
    init_tracing();
    let gateway = Arc::new(MockGateway::new());
    let controller = SyncController::new(gateway.clone(), config);
    (gateway, controller)
}

fn rollback(policy: RollbackPolicy) -> SyncConfig {
    SyncConfig {
        rollback: policy,
        ..SyncConfig::default()
    }
}

// ============================================================================
// Rollback policies
// ============================================================================

#[tokio::test]
async fn failed_add_stays_visible_by_default() -> TestResult {
    let (gateway, products) = setup(SyncConfig::default());
    gateway.fail_next(CallKind::Create, "disk full");

    let report = products.add(Record::Draft(cup(id(1)))).await?;
    assert_eq!(report.status, OpStatus::Failed);
    let list = products.list();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].state, PersistState::Local);
    assert_eq!(Some(list[0].id), report.id);
    Ok(())
}

#[tokio::test]
async fn failed_add_is_undone_with_rollback() -> TestResult {
    let (gateway, products) = setup(rollback(RollbackPolicy {
        add: true,
        ..Default::default()
    }));
    gateway.fail_next(CallKind::Create, "disk full");

    let report = products.add(Record::Draft(cup(id(1)))).await?;
    assert_eq!(report.status, OpStatus::Failed);
    assert!(products.is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_update_restores_previous_body_with_rollback() -> TestResult {
    let (gateway, products) = setup(rollback(RollbackPolicy {
        update: true,
        ..Default::default()
    }));
    products.replace_local(vec![Entity::confirmed(id(7), cup(id(1)))]);
    gateway.fail_next(CallKind::Update, "conflict");

    let report = products.update(id(7), sofa(id(1))).await?;
    assert_eq!(report.status, OpStatus::Failed);
    assert_eq!(products.get(id(7)).map(|e| e.body), Some(cup(id(1))));
    Ok(())
}

#[tokio::test]
async fn rollback_never_clobbers_a_later_update() -> TestResult {
    let (gateway, products) = setup(rollback(RollbackPolicy::all()));
    products.replace_local(vec![Entity::confirmed(id(7), cup(id(1)))]);
    gateway.hold(CallKind::Update);
    gateway.fail_next(CallKind::Update, "first write lost");

    let mut first = cup(id(1));
    first.stock = 1;
    let mut second = cup(id(1));
    second.stock = 2;

    let release = async {
        tokio::task::yield_now().await;
        gateway.release(CallKind::Update, 2);
    };
    let (a, b, ()) = tokio::join!(
        products.update(id(7), first),
        products.update(id(7), second.clone()),
        release
    );
    assert_eq!(a?.status, OpStatus::Failed);
    assert_eq!(b?.status, OpStatus::Succeeded);
    assert_eq!(products.get(id(7)).map(|e| e.body), Some(second));
    Ok(())
}

#[tokio::test]
async fn failed_remove_restores_order_with_rollback() -> TestResult {
    let (gateway, products) = setup(rollback(RollbackPolicy {
        remove: true,
        ..Default::default()
    }));
    products.replace_local(vec![
        Entity::confirmed(id(3), sofa(id(1))),
        Entity::confirmed(id(2), t_shirt(id(1))),
        Entity::confirmed(id(1), cup(id(1))),
    ]);
    let before = products.list();
    gateway.fail_next(CallKind::DeleteMany, "locked");

    let report = products.remove(&[id(2), id(1)]).await?;
    assert_eq!(report.status, OpStatus::Failed);
    assert_eq!(products.list(), before);
    Ok(())
}

#[tokio::test]
async fn failed_remove_without_rollback_stays_removed() -> TestResult {
    let (gateway, products) = setup(SyncConfig::default());
    products.replace_local(vec![Entity::confirmed(id(1), cup(id(1)))]);
    gateway.fail_next(CallKind::DeleteMany, "locked");

    let report = products.remove(&[id(1)]).await?;
    assert_eq!(report.status, OpStatus::Failed);
    assert!(products.is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_image_update_restores_images_with_rollback() -> TestResult {
    let (gateway, products) = setup(rollback(RollbackPolicy {
        images: true,
        ..Default::default()
    }));
    products.replace_local(vec![Entity::confirmed(id(4), t_shirt(id(2)))]);
    gateway.fail_next(CallKind::UpdateImages, "bucket gone");

    let report = products
        .update_images(vec![ImageUpdate::new(id(4), vec![image(9)])])
        .await?;
    assert_eq!(report.status, OpStatus::Failed);
    let shirt = products.get(id(4)).ok_or("shirt")?;
    assert_eq!(shirt.body.images, t_shirt(id(2)).images);
    Ok(())
}

#[tokio::test]
async fn repeated_id_in_failed_image_update_restores_the_original() -> TestResult {
    let (gateway, products) = setup(rollback(RollbackPolicy {
        images: true,
        ..Default::default()
    }));
    products.replace_local(vec![Entity::confirmed(id(4), t_shirt(id(2)))]);
    gateway.fail_next(CallKind::UpdateImages, "bucket gone");

    let report = products
        .update_images(vec![
            ImageUpdate::new(id(4), vec![image(8)]),
            ImageUpdate::new(id(4), vec![image(9)]),
        ])
        .await?;
    assert_eq!(report.status, OpStatus::Failed);
    assert_eq!(report.id, Some(id(4)));
    let shirt = products.get(id(4)).ok_or("shirt")?;
    assert_eq!(shirt.body.images, t_shirt(id(2)).images);
    Ok(())
}

#[tokio::test]
async fn repeated_id_in_image_update_keeps_the_last_entry() -> TestResult {
    let (gateway, products) = setup(SyncConfig::default());
    let shirt = gateway.seed(t_shirt(id(2)));
    products.fetch(ListParams::default()).await?;

    let report = products
        .update_images(vec![
            ImageUpdate::new(shirt, vec![image(8)]),
            ImageUpdate::new(shirt, vec![image(9)]),
        ])
        .await?;
    assert!(report.succeeded());
    assert_eq!(
        gateway.calls_of(CallKind::UpdateImages),
        vec![GatewayCall::UpdateImages(vec![ImageUpdate::new(
            shirt,
            vec![image(9)]
        )])]
    );
    let local = products.get(shirt).ok_or("shirt")?;
    assert_eq!(local.body.images(), vec![image(9)]);
    Ok(())
}

// ============================================================================
// Operations on an entity whose create is still in flight
// ============================================================================

#[tokio::test]
async fn update_during_create_is_sent_once_the_id_is_known() -> TestResult {
    let (gateway, products) = setup(SyncConfig::default());
    gateway.hold(CallKind::Create);

    let mut edited = cup(id(1));
    edited.title = "Espresso Cup".into();

    let edit = async {
        tokio::task::yield_now().await;
        let local = products.list()[0].clone();
        assert_eq!(local.state, PersistState::Local);
        let report = products.update(local.id, edited.clone()).await?;
        assert_eq!(report.status, OpStatus::Pending);
        gateway.release(CallKind::Create, 1);
        Ok::<_, EngineError>(report)
    };
    let (added, edit) = tokio::join!(products.add(Record::Draft(cup(id(1)))), edit);
    let added = added?;
    let edit = edit?;

    let server = added.id.ok_or("add has no id")?;
    assert!(added.succeeded());
    let record = products.status(edit.op_id).ok_or("edit not tracked")?;
    assert_eq!(record.status, OpStatus::Succeeded);
    assert_eq!(record.targets, vec![server]);

    assert_eq!(
        gateway.calls(),
        vec![
            GatewayCall::Create(cup(id(1))),
            GatewayCall::Update(server, edited.clone()),
        ]
    );
    let entity = products.get(server).ok_or("entity missing")?;
    assert_eq!(entity.state, PersistState::Confirmed);
    assert_eq!(entity.body, edited);
    assert_eq!(products.len(), 1);
    Ok(())
}

#[tokio::test]
async fn remove_during_create_sends_a_compensating_delete() -> TestResult {
    let (gateway, products) = setup(SyncConfig::default());
    gateway.hold(CallKind::Create);

    let drop_it = async {
        tokio::task::yield_now().await;
        let local = products.list()[0].id;
        let report = products.remove(&[local]).await?;
        assert_eq!(report.status, OpStatus::Pending);
        assert!(products.is_empty());
        gateway.release(CallKind::Create, 1);
        Ok::<_, EngineError>(report)
    };
    let (added, removed) = tokio::join!(products.add(Record::Draft(cup(id(1)))), drop_it);
    let server = added?.id.ok_or("add has no id")?;
    let removed = removed?;

    assert_eq!(
        gateway.calls_of(CallKind::DeleteMany),
        vec![GatewayCall::DeleteMany(vec![server])]
    );
    assert!(gateway.rows().is_empty());
    assert!(products.is_empty());
    assert_eq!(
        products.status(removed.op_id).map(|r| r.status),
        Some(OpStatus::Succeeded)
    );
    Ok(())
}

#[tokio::test]
async fn failed_create_fails_the_deferred_operations() -> TestResult {
    let (gateway, products) = setup(SyncConfig::default());
    gateway.hold(CallKind::Create);
    gateway.fail_next(CallKind::Create, "quota exceeded");

    let edit = async {
        tokio::task::yield_now().await;
        let local = products.list()[0].id;
        let report = products.update(local, sofa(id(1))).await?;
        gateway.release(CallKind::Create, 1);
        Ok::<_, EngineError>(report)
    };
    let (added, edit) = tokio::join!(products.add(Record::Draft(cup(id(1)))), edit);
    let added = added?;
    let edit = edit?;
    assert_eq!(added.status, OpStatus::Failed);

    let record = products.status(edit.op_id).ok_or("edit not tracked")?;
    assert_eq!(record.status, OpStatus::Failed);
    assert!(record.error.is_some_and(|e| e.contains("quota exceeded")));

    // the entity was never persisted, so later edits cannot reach the backend
    let local = added.id.ok_or("no local id")?;
    let later = products.update(local, cup(id(1))).await?;
    assert_eq!(later.status, OpStatus::Failed);
    assert_eq!(gateway.calls_of(CallKind::Update), Vec::new());
    Ok(())
}

#[tokio::test]
async fn image_update_during_create_is_sent_once_the_id_is_known() -> TestResult {
    let (gateway, products) = setup(SyncConfig::default());
    gateway.hold(CallKind::Create);

    let attach = async {
        tokio::task::yield_now().await;
        let local = products.list()[0].id;
        let report = products
            .update_images(vec![ImageUpdate::new(local, vec![image(5)])])
            .await?;
        assert_eq!(report.status, OpStatus::Pending);
        assert_eq!(products.pending_ops(), 2);
        gateway.release(CallKind::Create, 1);
        Ok::<_, EngineError>(report)
    };
    let (added, attached) = tokio::join!(products.add(Record::Draft(cup(id(1)))), attach);
    let server = added?.id.ok_or("add has no id")?;
    let attached = attached?;

    let mut with_photo = cup(id(1));
    with_photo.set_images(vec![image(5)]);
    assert_eq!(
        gateway.calls(),
        vec![
            GatewayCall::Create(cup(id(1))),
            GatewayCall::Update(server, with_photo.clone()),
        ]
    );
    assert_eq!(gateway.calls_of(CallKind::UpdateImages), Vec::new());
    let record = products.status(attached.op_id).ok_or("image op not tracked")?;
    assert_eq!(record.status, OpStatus::Succeeded);
    assert_eq!(record.targets, vec![server]);
    assert_eq!(products.pending_ops(), 0);
    assert_eq!(gateway.row(server).map(|e| e.body), Some(with_photo));
    Ok(())
}

#[tokio::test]
async fn image_update_on_an_unpersisted_entity_fails_without_a_call() -> TestResult {
    let (gateway, products) = setup(SyncConfig::default());
    gateway.fail_next(CallKind::Create, "quota exceeded");
    let added = products.add(Record::Draft(cup(id(1)))).await?;
    assert_eq!(added.status, OpStatus::Failed);
    let local = added.id.ok_or("no local id")?;

    let report = products
        .update_images(vec![ImageUpdate::new(local, vec![image(5)])])
        .await?;
    assert_eq!(report.status, OpStatus::Failed);
    assert!(
        report
            .error
            .as_deref()
            .is_some_and(|e| e.contains("never persisted"))
    );
    assert_eq!(gateway.calls_of(CallKind::UpdateImages), Vec::new());
    assert_eq!(products.pending_ops(), 0);
    Ok(())
}

#[tokio::test]
async fn fetch_during_create_keeps_the_pending_entity() -> TestResult {
    let (gateway, products) = setup(SyncConfig::default());
    let existing = gateway.seed(sofa(id(3)));
    gateway.hold(CallKind::Create);

    let refetch = async {
        tokio::task::yield_now().await;
        let report = products.fetch(ListParams::default()).await?;
        let states: Vec<_> = products.list().iter().map(|e| e.state).collect();
        assert_eq!(states, vec![PersistState::Local, PersistState::Confirmed]);
        gateway.release(CallKind::Create, 1);
        Ok::<_, EngineError>(report)
    };
    let (added, fetched) = tokio::join!(products.add(Record::Draft(cup(id(1)))), refetch);
    let server = added?.id.ok_or("add has no id")?;
    assert!(fetched?.succeeded());

    let ids: Vec<_> = products.list().iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![server, existing]);
    assert!(products.list().iter().all(Entity::is_confirmed));
    Ok(())
}

// ============================================================================
// Dependent refresh
// ============================================================================

fn linked(
    config: SyncConfig,
) -> (
    Arc<MockGateway<Product>>,
    SyncController<Product>,
    Arc<MockGateway<Category>>,
    Arc<SyncController<Category>>,
) {
    let (product_gateway, products) = setup(config.clone());
    let category_gateway = Arc::new(MockGateway::new());
    for category in categories() {
        category_gateway.seed(category);
    }
    let categories = Arc::new(SyncController::new(category_gateway.clone(), config));
    products.link_dependent(categories.clone());
    (product_gateway, products, category_gateway, categories)
}

#[tokio::test]
async fn successful_add_refreshes_linked_categories() -> TestResult {
    let (_, products, category_gateway, categories) = linked(SyncConfig::default());
    products.add(Record::Draft(cup(id(1)))).await?;

    assert_eq!(
        category_gateway.calls(),
        vec![GatewayCall::FetchAll(ListParams::default())]
    );
    assert_eq!(categories.len(), 4);
    Ok(())
}

#[tokio::test]
async fn failed_add_does_not_refresh() -> TestResult {
    let (product_gateway, products, category_gateway, _) = linked(SyncConfig::default());
    product_gateway.fail_next(CallKind::Create, "nope");
    products.add(Record::Draft(cup(id(1)))).await?;
    assert!(category_gateway.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn refresh_can_be_switched_off() -> TestResult {
    let config = SyncConfig {
        refresh_dependents: false,
        ..SyncConfig::default()
    };
    let (_, products, category_gateway, _) = linked(config);
    products.add(Record::Draft(cup(id(1)))).await?;
    assert!(category_gateway.calls().is_empty());
    Ok(())
}

struct FailingRefresh;

#[async_trait]
impl Refresh for FailingRefresh {
    async fn refresh(&self) -> Result<(), EngineError> {
        Err(EngineError::Validation("cannot refresh".into()))
    }
}

#[tokio::test]
async fn dependent_failure_does_not_fail_the_add() -> TestResult {
    let (_, products) = setup(SyncConfig::default());
    products.link_dependent(Arc::new(FailingRefresh));
    let report = products.add(Record::Draft(cup(id(1)))).await?;
    assert!(report.succeeded());
    Ok(())
}

#[tokio::test]
async fn refresh_reuses_the_last_fetch_parameters() -> TestResult {
    let (_, _, category_gateway, categories) = linked(SyncConfig::default());
    let params = ListParams::page(2, 1);
    categories.fetch(params.clone()).await?;
    categories.refresh().await?;
    assert_eq!(
        category_gateway.calls(),
        vec![GatewayCall::FetchAll(params.clone()), GatewayCall::FetchAll(params)]
    );
    assert_eq!(categories.len(), 2);
    Ok(())
}
