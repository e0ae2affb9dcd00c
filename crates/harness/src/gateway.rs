use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use storefront_core::{Entity, EntityBody, ListParams, RecordId, SortOrder};
use storefront_storage::{Gateway, ImageUpdate, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    FetchAll,
    Create,
    Update,
    DeleteMany,
    UpdateImages,
}

/// One call the mock received, with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall<T> {
    FetchAll(ListParams),
    Create(T),
    Update(RecordId, T),
    DeleteMany(Vec<RecordId>),
    UpdateImages(Vec<ImageUpdate>),
}

impl<T> GatewayCall<T> {
    pub fn kind(&self) -> CallKind {
        match self {
            Self::FetchAll(_) => CallKind::FetchAll,
            Self::Create(_) => CallKind::Create,
            Self::Update(..) => CallKind::Update,
            Self::DeleteMany(_) => CallKind::DeleteMany,
            Self::UpdateImages(_) => CallKind::UpdateImages,
        }
    }
}

struct MockState<T> {
    /// Newest first, like the real backend's default order.
    rows: Vec<Entity<T>>,
    next_id: i64,
    calls: Vec<GatewayCall<T>>,
    failures: HashMap<CallKind, VecDeque<String>>,
    always_fail: HashMap<CallKind, String>,
}

/// In-memory gateway for controller tests.
///
/// Records every call, fails on demand, and can hold calls of one kind until
/// the test releases them, which lets tests order remote answers. Rows are
/// ordered by id only; price sorts fall back to newest first.
pub struct MockGateway<T> {
    state: Mutex<MockState<T>>,
    gates: Mutex<HashMap<CallKind, Arc<Semaphore>>>,
}

impl<T: EntityBody> Default for MockGateway<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: EntityBody> MockGateway<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                rows: Vec::new(),
                next_id: 1,
                calls: Vec::new(),
                failures: HashMap::new(),
                always_fail: HashMap::new(),
            }),
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a row directly, bypassing the call log.
    pub fn seed(&self, body: T) -> RecordId {
        let mut state = self.state();
        let id = Self::allocate(&mut state);
        state.rows.insert(0, Entity::confirmed(id, body));
        id
    }

    /// Fail the next call of `kind` with `message`.
    pub fn fail_next(&self, kind: CallKind, message: &str) {
        self.state()
            .failures
            .entry(kind)
            .or_default()
            .push_back(message.to_string());
    }

    /// Fail every call of `kind` until [`MockGateway::recover`].
    pub fn fail_always(&self, kind: CallKind, message: &str) {
        self.state().always_fail.insert(kind, message.to_string());
    }

    pub fn recover(&self, kind: CallKind) {
        let mut state = self.state();
        state.always_fail.remove(&kind);
        state.failures.remove(&kind);
    }

    /// Make calls of `kind` wait until released.
    pub fn hold(&self, kind: CallKind) {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held calls of `kind` proceed.
    pub fn release(&self, kind: CallKind, n: usize) {
        if let Some(gate) = self
            .gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
        {
            gate.add_permits(n);
        }
    }

    pub fn calls(&self) -> Vec<GatewayCall<T>> {
        self.state().calls.clone()
    }

    pub fn calls_of(&self, kind: CallKind) -> Vec<GatewayCall<T>> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn rows(&self) -> Vec<Entity<T>> {
        self.state().rows.clone()
    }

    pub fn row(&self, id: RecordId) -> Option<Entity<T>> {
        self.state().rows.iter().find(|e| e.id == id).cloned()
    }

    fn allocate(state: &mut MockState<T>) -> RecordId {
        let mut raw = state.next_id;
        loop {
            state.next_id = raw + 1;
            match RecordId::new(raw) {
                Ok(id) if !state.rows.iter().any(|e| e.id == id) => return id,
                _ => raw += 1,
            }
        }
    }

    /// Log the call, wait at the gate if one is set, then report any injected
    /// failure.
    async fn enter(&self, call: GatewayCall<T>) -> Result<(), StorageError> {
        let kind = call.kind();
        self.state().calls.push(call);
        let gate = self
            .gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned();
        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            permit.forget();
        }
        let mut state = self.state();
        if let Some(message) = state.failures.get_mut(&kind).and_then(VecDeque::pop_front) {
            return Err(StorageError::Unavailable(message));
        }
        if let Some(message) = state.always_fail.get(&kind) {
            return Err(StorageError::Unavailable(message.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl<T: EntityBody> Gateway<T> for MockGateway<T> {
    async fn fetch_all(&self, params: &ListParams) -> Result<Vec<Entity<T>>, StorageError> {
        params.validate()?;
        self.enter(GatewayCall::FetchAll(params.clone())).await?;
        let state = self.state();
        let mut rows = state.rows.clone();
        rows.sort_by_key(|e| std::cmp::Reverse(e.id));
        if params.sort == SortOrder::Oldest {
            rows.reverse();
        }
        let offset = usize::try_from(params.offset).unwrap_or(0);
        let limit = usize::try_from(params.limit).unwrap_or(0);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn create(&self, body: &T) -> Result<RecordId, StorageError> {
        self.enter(GatewayCall::Create(body.clone())).await?;
        let mut state = self.state();
        let id = Self::allocate(&mut state);
        state.rows.insert(0, Entity::confirmed(id, body.clone()));
        Ok(id)
    }

    async fn update(&self, id: RecordId, body: &T) -> Result<(), StorageError> {
        self.enter(GatewayCall::Update(id, body.clone())).await?;
        let mut state = self.state();
        let row = state
            .rows
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("{} {id}", T::KIND)))?;
        row.body = body.clone();
        Ok(())
    }

    async fn delete_many(&self, ids: &[RecordId]) -> Result<(), StorageError> {
        self.enter(GatewayCall::DeleteMany(ids.to_vec())).await?;
        let doomed: HashSet<RecordId> = ids.iter().copied().collect();
        self.state().rows.retain(|e| !doomed.contains(&e.id));
        Ok(())
    }

    async fn update_images(&self, updates: &[ImageUpdate]) -> Result<(), StorageError> {
        self.enter(GatewayCall::UpdateImages(updates.to_vec())).await?;
        let mut state = self.state();
        if let Some(missing) = updates
            .iter()
            .find(|u| !state.rows.iter().any(|e| e.id == u.id))
        {
            return Err(StorageError::NotFound(format!("{} {}", T::KIND, missing.id)));
        }
        for update in updates {
            if let Some(row) = state.rows.iter_mut().find(|e| e.id == update.id) {
                row.body.set_images(update.images.clone());
            }
        }
        Ok(())
    }
}
