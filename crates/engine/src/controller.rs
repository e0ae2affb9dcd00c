use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use storefront_core::{
    Entity, EntityBody, ImageRef, ListParams, OpId, PersistState, Record, RecordId,
};
use storefront_storage::{Gateway, ImageUpdate, StorageError};

use crate::config::{MissingPolicy, SyncConfig};
use crate::error::EngineError;
use crate::status::{OpKind, OpRecord, OpStatus, StatusTracker};
use crate::store::{EntityStore, Removed};

/// Outcome of one controller operation as seen by the caller.
///
/// `status` is `Pending` when part of the operation waits on a create that
/// has not landed yet; poll [`SyncController::status`] with `op_id` for the
/// final result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpReport {
    pub op_id: OpId,
    pub kind: OpKind,
    pub status: OpStatus,
    /// The entity the operation created or touched, if there is exactly one.
    pub id: Option<RecordId>,
    pub error: Option<String>,
}

impl OpReport {
    pub fn succeeded(&self) -> bool {
        self.status == OpStatus::Succeeded
    }
}

/// Something that can reload itself from the backend, such as another
/// controller whose derived fields depend on this one.
#[async_trait]
pub trait Refresh: Send + Sync {
    async fn refresh(&self) -> Result<(), EngineError>;
}

/// Operations waiting on a create that is still in flight.
#[derive(Debug, Default)]
struct PendingCreate {
    waiting: Vec<OpId>,
    removed: bool,
}

/// Where a mutation of one entity has to go.
enum Route {
    /// The backend knows the id (or might): call it now.
    Remote,
    /// The entity's create is in flight: settle after it lands.
    Deferred,
    /// Local entity whose create already failed: nothing to persist to.
    Orphan,
}

enum FollowUp<T> {
    Update(RecordId, T),
    Delete(RecordId),
}

struct Inner<T: EntityBody> {
    store: EntityStore<T>,
    tracker: StatusTracker,
    pending: HashMap<RecordId, PendingCreate>,
    last_params: ListParams,
}

impl<T: EntityBody> Inner<T> {
    fn route(&self, id: RecordId) -> Route {
        match self.store.get(id) {
            Some(entity) if entity.state == PersistState::Local => {
                if self.pending.contains_key(&id) {
                    Route::Deferred
                } else {
                    Route::Orphan
                }
            }
            _ => Route::Remote,
        }
    }

    fn defer(&mut self, id: RecordId, op_id: OpId) {
        if let Some(pending) = self.pending.get_mut(&id) {
            pending.waiting.push(op_id);
        }
    }

    fn report(&self, op_id: OpId, kind: OpKind, id: Option<RecordId>) -> OpReport {
        let record = self.tracker.get(op_id);
        OpReport {
            op_id,
            kind,
            status: record.map(|r| r.status).unwrap_or(OpStatus::Idle),
            id,
            error: record.and_then(|r| r.error.clone()),
        }
    }
}

fn orphan_error(id: RecordId) -> String {
    format!("record {id} was never persisted")
}

/// Optimistic CRUD over one entity type.
///
/// Every mutation changes the local store first, then calls the gateway and
/// reconciles when it answers. State sits behind one short-lived lock that is
/// never held across a gateway call, so operations may overlap freely; local
/// changes follow call order while remote answers arrive in any order.
pub struct SyncController<T: EntityBody> {
    inner: Mutex<Inner<T>>,
    gateway: Arc<dyn Gateway<T>>,
    config: SyncConfig,
    dependents: Mutex<Vec<Arc<dyn Refresh>>>,
}

impl<T: EntityBody> SyncController<T> {
    pub fn new(gateway: Arc<dyn Gateway<T>>, config: SyncConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                store: EntityStore::new(config.missing),
                tracker: StatusTracker::new(config.status_history),
                pending: HashMap::new(),
                last_params: ListParams::default(),
            }),
            gateway,
            config,
            dependents: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refresh `dependent` after every successful add.
    pub fn link_dependent(&self, dependent: Arc<dyn Refresh>) {
        self.dependents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(dependent);
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub async fn add(&self, record: Record<T>) -> Result<OpReport, EngineError> {
        if let Some(id) = record.id() {
            warn!(kind = %T::KIND, %id, "add ignores the supplied id; the backend assigns one");
        }
        let body = record.into_body();

        let (op_id, local_id) = {
            let mut inner = self.lock();
            let local_id = inner.store.insert(Record::Draft(body.clone()))?;
            let op_id = inner.tracker.begin(OpKind::Add, vec![local_id], 1);
            inner.pending.insert(local_id, PendingCreate::default());
            (op_id, local_id)
        };
        debug!(%op_id, kind = %T::KIND, %local_id, "add pending");

        match self.gateway.create(&body).await {
            Ok(server_id) => {
                let (follow_up, waiting) = {
                    let mut inner = self.lock();
                    let pending = inner.pending.remove(&local_id).unwrap_or_default();
                    let present = inner.store.confirm(local_id, server_id);
                    inner.tracker.retarget(op_id, local_id, server_id);
                    for waiting in &pending.waiting {
                        inner.tracker.retarget(*waiting, local_id, server_id);
                    }
                    inner.tracker.complete_part(op_id, Ok(()));

                    let follow_up = if pending.waiting.is_empty() {
                        None
                    } else if present {
                        inner
                            .store
                            .get(server_id)
                            .filter(|e| e.body != body)
                            .map(|e| FollowUp::Update(server_id, e.body.clone()))
                    } else if pending.removed {
                        Some(FollowUp::Delete(server_id))
                    } else {
                        None
                    };
                    if follow_up.is_none() {
                        for waiting in &pending.waiting {
                            inner.tracker.complete_part(*waiting, Ok(()));
                        }
                    }
                    (follow_up, pending.waiting)
                };
                info!(%op_id, kind = %T::KIND, %local_id, %server_id, "add confirmed");

                if let Some(follow_up) = follow_up {
                    self.reconcile(follow_up, &waiting).await;
                }
                if self.config.refresh_dependents {
                    self.refresh_dependents().await;
                }
                Ok(self.lock().report(op_id, OpKind::Add, Some(server_id)))
            }
            Err(e) => {
                let message = e.to_string();
                let mut inner = self.lock();
                let pending = inner.pending.remove(&local_id).unwrap_or_default();
                inner.tracker.complete_part(op_id, Err(message.clone()));
                for waiting in &pending.waiting {
                    inner
                        .tracker
                        .complete_part(*waiting, Err(format!("create of {local_id} failed: {message}")));
                }
                if self.config.rollback.add && inner.store.remove(local_id).is_some() {
                    debug!(%op_id, %local_id, "rolled back add");
                }
                warn!(%op_id, kind = %T::KIND, %local_id, error = %message, "add failed");
                Ok(inner.report(op_id, OpKind::Add, Some(local_id)))
            }
        }
    }

    pub async fn update(&self, id: RecordId, body: T) -> Result<OpReport, EngineError> {
        let (op_id, previous) = {
            let mut inner = self.lock();
            let route = inner.route(id);
            let previous = inner.store.update(id, body.clone())?;
            let op_id = inner.tracker.begin(OpKind::Update, vec![id], 1);
            match route {
                Route::Remote => (op_id, previous),
                Route::Deferred => {
                    inner.defer(id, op_id);
                    debug!(%op_id, %id, "update deferred until create lands");
                    return Ok(inner.report(op_id, OpKind::Update, Some(id)));
                }
                Route::Orphan => {
                    inner.tracker.complete_part(op_id, Err(orphan_error(id)));
                    return Ok(inner.report(op_id, OpKind::Update, Some(id)));
                }
            }
        };
        if previous.is_none() {
            debug!(%op_id, %id, "update target not held locally");
        }
        debug!(%op_id, kind = %T::KIND, %id, "update pending");

        let result = self.gateway.update(id, &body).await;

        let mut inner = self.lock();
        match result {
            Ok(()) => {
                inner.tracker.complete_part(op_id, Ok(()));
                info!(%op_id, kind = %T::KIND, %id, "update confirmed");
            }
            Err(e) => {
                inner.tracker.complete_part(op_id, Err(e.to_string()));
                if self.config.rollback.update {
                    if let Some(previous) = previous {
                        // only if nothing overwrote this op's body meanwhile
                        if inner.store.get(id).is_some_and(|cur| cur.body == body) {
                            inner.store.update(id, previous)?;
                            debug!(%op_id, %id, "rolled back update");
                        }
                    }
                }
                warn!(%op_id, kind = %T::KIND, %id, error = %e, "update failed");
            }
        }
        Ok(inner.report(op_id, OpKind::Update, Some(id)))
    }

    pub async fn remove(&self, ids: &[RecordId]) -> Result<OpReport, EngineError> {
        let mut seen = BTreeSet::new();
        let ids: Vec<RecordId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let (op_id, remote, removed) = {
            let mut inner = self.lock();
            let mut remote = Vec::new();
            let mut deferred = Vec::new();
            let mut removed = Vec::new();
            for &id in &ids {
                match inner.route(id) {
                    Route::Remote => remote.push(id),
                    Route::Deferred => deferred.push(id),
                    Route::Orphan => {}
                }
                if let Some(entry) = inner.store.remove(id) {
                    if entry.entity.is_confirmed() {
                        removed.push(entry);
                    }
                }
            }
            let parts = deferred.len() as u32 + u32::from(!remote.is_empty());
            let op_id = inner.tracker.begin(OpKind::Remove, ids.clone(), parts);
            for id in deferred {
                inner.defer(id, op_id);
                if let Some(pending) = inner.pending.get_mut(&id) {
                    pending.removed = true;
                }
            }
            if remote.is_empty() {
                return Ok(inner.report(op_id, OpKind::Remove, single(&ids)));
            }
            (op_id, remote, removed)
        };
        debug!(%op_id, kind = %T::KIND, count = remote.len(), "remove pending");

        let result = self.gateway.delete_many(&remote).await;

        let mut inner = self.lock();
        match result {
            Ok(()) => {
                inner.tracker.complete_part(op_id, Ok(()));
                info!(%op_id, kind = %T::KIND, count = remote.len(), "remove confirmed");
            }
            Err(e) => {
                inner.tracker.complete_part(op_id, Err(e.to_string()));
                if self.config.rollback.remove {
                    restore_all(&mut inner.store, removed);
                    debug!(%op_id, "rolled back remove");
                }
                warn!(%op_id, kind = %T::KIND, error = %e, "remove failed");
            }
        }
        Ok(inner.report(op_id, OpKind::Remove, single(&ids)))
    }

    /// Load a page from the backend and make it the local collection.
    ///
    /// Entities whose create is still in flight stay at the front.
    pub async fn fetch(&self, params: ListParams) -> Result<OpReport, EngineError> {
        params.validate()?;
        let op_id = {
            let mut inner = self.lock();
            inner.last_params = params.clone();
            inner.tracker.begin(OpKind::Fetch, Vec::new(), 1)
        };
        debug!(%op_id, kind = %T::KIND, limit = params.limit, offset = params.offset, sort = params.sort.as_str(), "fetch pending");

        let result = self.gateway.fetch_all(&params).await;

        let mut inner = self.lock();
        match result {
            Ok(fetched) => {
                let count = fetched.len();
                let mut merged: Vec<Entity<T>> = inner
                    .store
                    .list()
                    .iter()
                    .filter(|e| !e.is_confirmed() && inner.pending.contains_key(&e.id))
                    .cloned()
                    .collect();
                merged.extend(fetched.into_iter().filter(|e| !inner.pending.contains_key(&e.id)));
                inner.store.replace_all(merged);
                inner.tracker.complete_part(op_id, Ok(()));
                info!(%op_id, kind = %T::KIND, count, "fetch completed");
            }
            Err(e) => {
                inner.tracker.complete_part(op_id, Err(e.to_string()));
                warn!(%op_id, kind = %T::KIND, error = %e, "fetch failed");
            }
        }
        Ok(inner.report(op_id, OpKind::Fetch, None))
    }

    /// Replace the images of several entities in one backend call.
    ///
    /// An id listed more than once takes the images of its last entry.
    pub async fn update_images(&self, updates: Vec<ImageUpdate>) -> Result<OpReport, EngineError> {
        let updates = merge_by_id(updates);
        let ids: Vec<RecordId> = updates.iter().map(|u| u.id).collect();
        let (op_id, remote, previous) = {
            let mut inner = self.lock();
            if self.config.missing == MissingPolicy::Error {
                if let Some(missing) = ids.iter().find(|id| !inner.store.contains(**id)) {
                    return Err(EngineError::NotFound(*missing));
                }
            }
            let mut remote = Vec::new();
            let mut deferred = Vec::new();
            let mut orphans = Vec::new();
            let mut previous: Vec<(RecordId, Vec<ImageRef>, Vec<ImageRef>)> = Vec::new();
            for update in updates {
                let route = inner.route(update.id);
                let old = inner.store.set_images(update.id, update.images.clone());
                if let (Some(old), Route::Remote) = (old, &route) {
                    // bodies may normalize the list, so compare against what was stored
                    let written = inner
                        .store
                        .get(update.id)
                        .map(|e| e.body.images())
                        .unwrap_or_default();
                    previous.push((update.id, old, written));
                }
                match route {
                    Route::Remote => remote.push(update),
                    Route::Deferred => deferred.push(update.id),
                    Route::Orphan => orphans.push(update.id),
                }
            }
            let parts = (deferred.len() + orphans.len()) as u32 + u32::from(!remote.is_empty());
            let op_id = inner.tracker.begin(OpKind::Images, ids.clone(), parts);
            for id in deferred {
                inner.defer(id, op_id);
            }
            for id in orphans {
                inner.tracker.complete_part(op_id, Err(orphan_error(id)));
            }
            if remote.is_empty() {
                return Ok(inner.report(op_id, OpKind::Images, single(&ids)));
            }
            (op_id, remote, previous)
        };
        debug!(%op_id, kind = %T::KIND, count = remote.len(), "image update pending");

        let result = self.gateway.update_images(&remote).await;

        let mut inner = self.lock();
        match result {
            Ok(()) => {
                inner.tracker.complete_part(op_id, Ok(()));
                info!(%op_id, kind = %T::KIND, count = remote.len(), "image update confirmed");
            }
            Err(e) => {
                inner.tracker.complete_part(op_id, Err(e.to_string()));
                if self.config.rollback.images {
                    for (id, old, written) in previous {
                        let unchanged = inner
                            .store
                            .get(id)
                            .is_some_and(|cur| cur.body.images() == written);
                        if unchanged {
                            inner.store.set_images(id, old);
                        }
                    }
                    debug!(%op_id, "rolled back image update");
                }
                warn!(%op_id, kind = %T::KIND, error = %e, "image update failed");
            }
        }
        Ok(inner.report(op_id, OpKind::Images, single(&ids)))
    }

    /// Send the call a confirmed create owes for operations deferred on it,
    /// then settle those operations with its result.
    async fn reconcile(&self, follow_up: FollowUp<T>, waiting: &[OpId]) {
        let (result, id) = match &follow_up {
            FollowUp::Update(id, body) => (self.gateway.update(*id, body).await, *id),
            FollowUp::Delete(id) => (self.gateway.delete_many(&[*id]).await, *id),
        };
        let outcome = result.map_err(|e: StorageError| e.to_string());
        match &outcome {
            Ok(()) => debug!(%id, count = waiting.len(), "deferred operations reconciled"),
            Err(e) => warn!(%id, error = %e, "reconciling deferred operations failed"),
        }
        let mut inner = self.lock();
        for op_id in waiting {
            inner.tracker.complete_part(*op_id, outcome.clone());
        }
    }

    async fn refresh_dependents(&self) {
        let dependents: Vec<Arc<dyn Refresh>> = self
            .dependents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for dependent in dependents {
            if let Err(e) = dependent.refresh().await {
                warn!(kind = %T::KIND, error = %e, "dependent refresh failed");
            }
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn list(&self) -> Vec<Entity<T>> {
        self.lock().store.list().to_vec()
    }

    pub fn get(&self, id: RecordId) -> Option<Entity<T>> {
        self.lock().store.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().store.is_empty()
    }

    pub fn status(&self, op_id: OpId) -> Option<OpRecord> {
        self.lock().tracker.get(op_id).cloned()
    }

    pub fn latest_status(&self, kind: OpKind) -> OpStatus {
        self.lock().tracker.latest_status(kind)
    }

    pub fn last_error(&self, kind: OpKind) -> Option<String> {
        self.lock().tracker.latest_error(kind).map(str::to_string)
    }

    pub fn is_loading(&self) -> bool {
        self.latest_status(OpKind::Fetch) == OpStatus::Pending
    }

    pub fn pending_ops(&self) -> usize {
        self.lock().tracker.pending_count()
    }

    /// Seed the local collection without touching the backend.
    pub fn replace_local(&self, entities: Vec<Entity<T>>) {
        self.lock().store.replace_all(entities);
    }
}

#[async_trait]
impl<T: EntityBody> Refresh for SyncController<T> {
    async fn refresh(&self) -> Result<(), EngineError> {
        let params = self.lock().last_params.clone();
        let report = self.fetch(params).await?;
        match report.error {
            Some(message) => Err(EngineError::Remote(StorageError::Unavailable(format!(
                "refresh of {} failed: {message}",
                T::KIND
            )))),
            None => Ok(()),
        }
    }
}

/// Collapse repeated ids. The first entry keeps its position and the last
/// entry's images win.
fn merge_by_id(updates: Vec<ImageUpdate>) -> Vec<ImageUpdate> {
    let mut merged: Vec<ImageUpdate> = Vec::with_capacity(updates.len());
    for update in updates {
        match merged.iter_mut().find(|m| m.id == update.id) {
            Some(existing) => existing.images = update.images,
            None => merged.push(update),
        }
    }
    merged
}

fn single(ids: &[RecordId]) -> Option<RecordId> {
    match ids {
        [id] => Some(*id),
        _ => None,
    }
}

/// Put removed entities back, last removed first, so earlier positions are
/// still valid when later ones are restored.
fn restore_all<T: EntityBody>(store: &mut EntityStore<T>, removed: Vec<Removed<T>>) {
    for entry in removed.into_iter().rev() {
        store.restore(entry);
    }
}
