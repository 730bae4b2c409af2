//! Module: db::cursor
//! Responsibility: directional iteration over the merged local/remote
//! record universe of a store or index, plus in-place update and delete.
//! Does not own: record storage or masking state (see `db::store`).
//! Boundary: each step asks the local cache and the remote for the first
//! record past the current position and keeps the one that comes first in
//! the cursor's direction; exact ties go to the local record.

use crate::{
    db::{
        CursorDirection, Index, ObjectStore, Request, RequestResult, RequestSource, Transaction,
        index::IndexState,
        remote::CursorQuery,
        request::WeakRequest,
        store::StoreState,
        transaction::Operation,
    },
    error::DomError,
    key::{Key, KeyRange},
    obs::sink::{self, MetricsEvent},
    proto::CursorRecord,
    value::Value,
};
use futures_util::FutureExt;
use std::{
    cell::RefCell,
    cmp::Ordering,
    fmt,
    num::NonZeroU32,
    rc::Rc,
};
use tracing::trace;

///
/// CursorSource
///

#[derive(Clone, Debug)]
pub(crate) enum CursorSource {
    Store(Rc<StoreState>),
    Index {
        store: Rc<StoreState>,
        index: Rc<IndexState>,
    },
}

impl CursorSource {
    const fn store(&self) -> &Rc<StoreState> {
        match self {
            Self::Store(store) | Self::Index { store, .. } => store,
        }
    }

    const fn index(&self) -> Option<&Rc<IndexState>> {
        match self {
            Self::Store(_) => None,
            Self::Index { index, .. } => Some(index),
        }
    }

    fn is_deleted(&self) -> bool {
        self.store().is_deleted() || self.index().is_some_and(|index| index.is_deleted())
    }
}

///
/// PkFilter
///
/// Primary-key constraint applied only at the boundary key of an index
/// step, in the cursor's direction.
///

#[derive(Clone, Debug, Eq, PartialEq)]
enum PkFilter {
    None,
    /// Strictly past this primary key.
    After(Key),
    /// At or past this primary key.
    From(Key),
}

impl PkFilter {
    const fn rank(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::After(_) => 1,
            Self::From(_) => 2,
        }
    }

    fn admits(&self, primary_key: &Key, forward: bool) -> bool {
        let (pk, inclusive) = match self {
            Self::None => return true,
            Self::After(pk) => (pk, false),
            Self::From(pk) => (pk, true),
        };
        let ord = if forward {
            primary_key.cmp(pk)
        } else {
            pk.cmp(primary_key)
        };

        ord == Ordering::Greater || (inclusive && ord == Ordering::Equal)
    }
}

///
/// Boundary
///
/// The tightest starting point of the next step.
///

#[derive(Clone, Debug)]
struct Boundary {
    key: Key,
    open: bool,
    filter: PkFilter,
}

impl Boundary {
    /// Whether `self` starts later than `other` in the given direction.
    fn tighter_than(&self, other: &Self, forward: bool) -> bool {
        let ord = if forward {
            self.key.cmp(&other.key)
        } else {
            other.key.cmp(&self.key)
        };

        match ord {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => {
                (self.open, self.filter.rank()) > (other.open, other.filter.rank())
            }
        }
    }
}

///
/// CursorState
///

#[derive(Debug, Default)]
struct CursorState {
    got_value: bool,
    position: Option<Key>,
    object_store_position: Option<Key>,
    key: Option<Key>,
    primary_key: Option<Key>,
    value: Option<Value>,
}

///
/// Cursor
///

#[derive(Clone)]
pub struct Cursor {
    inner: Rc<CursorInner>,
}

struct CursorInner {
    source: CursorSource,
    tx: Transaction,
    request: RefCell<WeakRequest>,
    range: KeyRange,
    direction: CursorDirection,
    key_only: bool,
    state: RefCell<CursorState>,
}

impl Cursor {
    /// Queue the first step of a new cursor and return its request.
    pub(crate) fn open(
        source: CursorSource,
        tx: &Transaction,
        range: KeyRange,
        direction: CursorDirection,
        key_only: bool,
    ) -> Result<Request, DomError> {
        let cursor = Self {
            inner: Rc::new(CursorInner {
                source,
                tx: tx.clone(),
                request: RefCell::new(WeakRequest::default()),
                range,
                direction,
                key_only,
                state: RefCell::new(CursorState::default()),
            }),
        };
        let request = Request::new(Some(cursor.source()), Some(tx.clone()));
        *cursor.inner.request.borrow_mut() = request.downgrade();

        tx.queue_request(request, cursor.step(None, None, 1))
    }

    ///
    /// ACCESSORS
    ///

    #[must_use]
    pub fn direction(&self) -> CursorDirection {
        self.inner.direction
    }

    #[must_use]
    pub fn key(&self) -> Option<Key> {
        self.inner.state.borrow().key.clone()
    }

    #[must_use]
    pub fn primary_key(&self) -> Option<Key> {
        self.inner.state.borrow().primary_key.clone()
    }

    /// The current record's value; always `None` for key cursors.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.inner.state.borrow().value.clone()
    }

    #[must_use]
    pub fn source(&self) -> RequestSource {
        let tx = self.inner.tx.clone();
        match &self.inner.source {
            CursorSource::Store(store) => RequestSource::Store(ObjectStore::new(Rc::clone(store), tx)),
            CursorSource::Index { store, index } => {
                RequestSource::Index(Index::new(Rc::clone(store), Rc::clone(index), tx))
            }
        }
    }

    /// The request the cursor reports through, while anyone still holds it.
    #[must_use]
    pub fn request(&self) -> Option<Request> {
        self.inner.request.borrow().upgrade()
    }

    ///
    /// MOVEMENT
    ///

    /// Move to the next record, or to the first record at or past `key`.
    pub fn continue_(&self, key: Option<Key>) -> Result<Request, DomError> {
        self.ensure_movable()?;

        if let Some(key) = &key {
            key.validate()?;
            let state = self.inner.state.borrow();
            if let Some(position) = &state.position {
                let backwards = if self.inner.direction.is_next() {
                    key <= position
                } else {
                    key >= position
                };
                if backwards {
                    return Err(DomError::data(
                        "the key does not move the cursor in its direction",
                    ));
                }
            }
        }

        self.requeue(self.step(key, None, 1))
    }

    /// Move to the record at `key` whose primary key is `primary_key` or
    /// the first one after it. Index cursors in `next`/`prev` only.
    pub fn continue_primary_key(&self, key: Key, primary_key: Key) -> Result<Request, DomError> {
        if self.inner.source.index().is_none() || self.inner.direction.is_unique() {
            return Err(DomError::invalid_access(
                "continuePrimaryKey needs an index cursor in next or prev direction",
            ));
        }
        self.ensure_movable()?;
        key.validate()?;
        primary_key.validate()?;

        {
            let state = self.inner.state.borrow();
            if let (Some(position), Some(osp)) = (&state.position, &state.object_store_position) {
                let target = key.cmp(position).then_with(|| primary_key.cmp(osp));
                let backwards = if self.inner.direction.is_next() {
                    target != Ordering::Greater
                } else {
                    target != Ordering::Less
                };
                if backwards {
                    return Err(DomError::data(
                        "the key pair does not move the cursor in its direction",
                    ));
                }
            }
        }

        self.requeue(self.step(Some(key), Some(primary_key), 1))
    }

    /// Skip `count` records.
    pub fn advance(&self, count: NonZeroU32) -> Result<Request, DomError> {
        self.ensure_movable()?;

        self.requeue(self.step(None, None, count.get()))
    }

    fn ensure_movable(&self) -> Result<(), DomError> {
        self.inner.tx.ensure_active()?;
        if self.inner.source.is_deleted() {
            return Err(DomError::invalid_state("the cursor's source was deleted"));
        }
        if !self.inner.state.borrow().got_value {
            return Err(DomError::invalid_state("the cursor is not positioned on a record"));
        }

        Ok(())
    }

    fn requeue(&self, operation: Operation) -> Result<Request, DomError> {
        let request = self.request().unwrap_or_else(|| {
            let request = Request::new(Some(self.source()), Some(self.inner.tx.clone()));
            *self.inner.request.borrow_mut() = request.downgrade();
            request
        });
        request.reset();
        self.inner.state.borrow_mut().got_value = false;

        self.inner.tx.queue_request(request, operation)
    }

    fn step(&self, key: Option<Key>, primary_key: Option<Key>, count: u32) -> Operation {
        let cursor = self.clone();

        Box::new(move || {
            async move {
                let (mut key, mut primary_key) = (key, primary_key);
                for _ in 0..count {
                    if !cursor.iterate(key.take(), primary_key.take()).await? {
                        return Ok(RequestResult::Cursor(None));
                    }
                }

                Ok(RequestResult::Cursor(Some(cursor)))
            }
            .boxed_local()
        })
    }

    ///
    /// ITERATION
    ///

    /// One step. Returns false once the cursor runs off the end.
    async fn iterate(&self, key: Option<Key>, primary_key: Option<Key>) -> Result<bool, DomError> {
        let inner = &self.inner;
        let forward = inner.direction.is_next();
        let boundary = self.boundary(key, primary_key);
        let range = match &boundary {
            Some(b) if forward => inner.range.clone().with_lower(b.key.clone(), b.open),
            Some(b) => inner.range.clone().with_upper(b.key.clone(), b.open),
            None => inner.range.clone(),
        };
        let (boundary_key, filter) = match boundary {
            Some(Boundary { key, open: false, filter }) => (Some(key), filter),
            _ => (None, PkFilter::None),
        };

        let remote = self.remote_candidate(range.clone(), filter.clone());
        let local = self.local_candidate(&range, boundary_key.as_ref(), &filter);
        let remote = match remote {
            Some(fut) => fut.await?,
            None => None,
        };
        inner.tx.ensure_running()?;

        let picked = self.pick(local, remote);
        let mut state = inner.state.borrow_mut();
        match picked {
            Some((record, from_remote)) => {
                sink::record(MetricsEvent::CursorStep { from_remote });
                trace!(key = ?record.key, from_remote, "cursor step");

                state.got_value = true;
                state.position = Some(record.key.clone());
                state.object_store_position = Some(record.primary_key.clone());
                state.key = Some(record.key);
                state.primary_key = Some(record.primary_key);
                state.value = if inner.key_only { None } else { record.value };

                Ok(true)
            }
            None => {
                *state = CursorState::default();

                Ok(false)
            }
        }
    }

    /// Tightest of the range bound, the continuation key, and the current
    /// position.
    fn boundary(&self, key: Option<Key>, primary_key: Option<Key>) -> Option<Boundary> {
        let inner = &self.inner;
        let forward = inner.direction.is_next();
        let state = inner.state.borrow();
        let mut candidates = Vec::with_capacity(3);

        let range_bound = if forward {
            inner.range.lower.clone().map(|k| (k, inner.range.lower_open))
        } else {
            inner.range.upper.clone().map(|k| (k, inner.range.upper_open))
        };
        if let Some((key, open)) = range_bound {
            candidates.push(Boundary {
                key,
                open,
                filter: PkFilter::None,
            });
        }

        if let Some(position) = &state.position {
            let per_record = inner.source.index().is_some() && !inner.direction.is_unique();
            candidates.push(match (&state.object_store_position, per_record) {
                (Some(osp), true) => Boundary {
                    key: position.clone(),
                    open: false,
                    filter: PkFilter::After(osp.clone()),
                },
                _ => Boundary {
                    key: position.clone(),
                    open: true,
                    filter: PkFilter::None,
                },
            });
        }

        if let Some(key) = key {
            candidates.push(Boundary {
                key,
                open: false,
                filter: primary_key.map_or(PkFilter::None, PkFilter::From),
            });
        }

        candidates
            .into_iter()
            .reduce(|best, b| if b.tighter_than(&best, forward) { b } else { best })
    }

    fn local_candidate(
        &self,
        range: &KeyRange,
        boundary_key: Option<&Key>,
        filter: &PkFilter,
    ) -> Option<CursorRecord> {
        let inner = &self.inner;
        let direction = inner.direction;
        let forward = direction.is_next();

        match &inner.source {
            CursorSource::Store(store) => {
                let records = store.records.borrow();
                records
                    .values(range, direction.scan())
                    .next()
                    .map(|record| CursorRecord {
                        key: record.key.clone(),
                        primary_key: record.key.clone(),
                        value: (!inner.key_only).then(|| record.value.clone()),
                    })
            }
            CursorSource::Index { store, index } => {
                let entries = index.records.borrow();
                let mut entry = entries
                    .values(range, direction.scan())
                    .find(|e| Some(&e.key) != boundary_key || filter.admits(&e.value, forward))?;
                if direction == CursorDirection::PrevUnique {
                    entry = entries.get(&KeyRange::only(entry.key.clone()))?;
                }

                let value = if inner.key_only {
                    None
                } else {
                    store
                        .records
                        .borrow()
                        .get(&KeyRange::only(entry.value.clone()))
                        .map(|r| r.value.clone())
                };

                Some(CursorRecord {
                    key: entry.key.clone(),
                    primary_key: entry.value.clone(),
                    value,
                })
            }
        }
    }

    /// The first unmasked remote record, when the remote holds the source.
    fn remote_candidate(
        &self,
        range: KeyRange,
        filter: PkFilter,
    ) -> Option<impl Future<Output = Result<Option<CursorRecord>, DomError>> + use<>> {
        let inner = &self.inner;
        let store = Rc::clone(inner.source.store());
        let store_name = store.remote_name()?;
        let index_name = match inner.source.index() {
            Some(index) => Some(index.remote_name()?),
            None => None,
        };

        let (prev_primary_key, curr_primary_key) = match filter {
            PkFilter::None => (None, None),
            PkFilter::After(pk) => (Some(pk), None),
            PkFilter::From(pk) => (None, Some(pk)),
        };
        let query = CursorQuery {
            range,
            direction: inner.direction,
            index_name,
            prev_primary_key,
            curr_primary_key,
            just_keys: inner.key_only,
        };
        let first = store.remote().next_from_cursor(&store_name, query.clone());
        let forward = inner.direction.is_next();

        Some(async move {
            let mut reply = first.await?;
            loop {
                let Some(record) = reply else {
                    return Ok(None);
                };
                let masked_key = if query.index_name.is_some() {
                    &record.primary_key
                } else {
                    &record.key
                };
                if !store.records.borrow().modified(masked_key) {
                    return Ok(Some(record));
                }

                let mut next = query.clone();
                next.curr_primary_key = None;
                if next.index_name.is_some() && query.direction == CursorDirection::PrevUnique {
                    // Unique prev reports the lowest primary key of a key, so
                    // the replacement is the next one up at the same key.
                    let same_key = CursorQuery {
                        range: KeyRange::only(record.key.clone()),
                        direction: CursorDirection::Next,
                        prev_primary_key: Some(record.primary_key.clone()),
                        curr_primary_key: None,
                        ..query.clone()
                    };
                    let found = store.remote().next_from_cursor(&store_name, same_key).await?;
                    if found.is_some() {
                        reply = found;
                        continue;
                    }
                    next.range = resume(next.range, &record.key, true, forward);
                    next.prev_primary_key = None;
                } else if next.index_name.is_some() {
                    next.range = resume(next.range, &record.key, false, forward);
                    next.prev_primary_key = Some(record.primary_key);
                } else {
                    next.range = resume(next.range, &record.key, true, forward);
                    next.prev_primary_key = None;
                }
                reply = store.remote().next_from_cursor(&store_name, next).await?;
            }
        })
    }

    /// The candidate that comes first in the cursor's direction. Ties go to
    /// the local record.
    fn pick(
        &self,
        local: Option<CursorRecord>,
        remote: Option<CursorRecord>,
    ) -> Option<(CursorRecord, bool)> {
        let (local, remote) = match (local, remote) {
            (Some(local), Some(remote)) => (local, remote),
            (Some(local), None) => return Some((local, false)),
            (None, Some(remote)) => return Some((remote, true)),
            (None, None) => return None,
        };

        let direction = self.inner.direction;
        let by_key = remote.key.cmp(&local.key);
        let ord = match &self.inner.source {
            CursorSource::Store(_) => by_key,
            CursorSource::Index { .. } if direction.is_unique() => {
                if by_key == Ordering::Equal {
                    // Same key: the lower primary key represents it.
                    return if remote.primary_key < local.primary_key {
                        Some((remote, true))
                    } else {
                        Some((local, false))
                    };
                }
                by_key
            }
            CursorSource::Index { .. } => {
                by_key.then_with(|| remote.primary_key.cmp(&local.primary_key))
            }
        };

        let remote_first = if direction.is_next() {
            ord == Ordering::Less
        } else {
            ord == Ordering::Greater
        };
        if remote_first {
            Some((remote, true))
        } else {
            Some((local, false))
        }
    }

    ///
    /// WRITES
    ///

    fn ensure_writable_record(&self) -> Result<Key, DomError> {
        let tx = &self.inner.tx;
        tx.ensure_active()?;
        tx.ensure_writable()?;
        if self.inner.source.is_deleted() {
            return Err(DomError::invalid_state("the cursor's source was deleted"));
        }

        let state = self.inner.state.borrow();
        if !state.got_value || self.inner.key_only {
            return Err(DomError::invalid_state(
                "the cursor holds no value to update or delete",
            ));
        }

        state
            .primary_key
            .clone()
            .ok_or_else(|| DomError::invalid_state("the cursor is not positioned on a record"))
    }

    /// Replace the current record's value.
    pub fn update(&self, value: Value) -> Result<Request, DomError> {
        let primary_key = self.ensure_writable_record()?;
        let store = Rc::clone(self.inner.source.store());

        let key = match &store.key_path {
            Some(path) => {
                if path.extract_key(&value)?.as_ref() != Some(&primary_key) {
                    return Err(DomError::data("the update changes the record's in-line key"));
                }
                None
            }
            None => Some(primary_key),
        };

        let tx = self.inner.tx.clone();
        let request = Request::new(Some(self.source()), Some(tx.clone()));
        tx.clone().queue_request(
            request,
            Box::new(move || {
                async move {
                    let key = store.store_record(&tx, value, key, false).await?;
                    Ok(RequestResult::Key(Some(key)))
                }
                .boxed_local()
            }),
        )
    }

    /// Delete the current record.
    pub fn delete(&self) -> Result<Request, DomError> {
        let primary_key = self.ensure_writable_record()?;
        let store = Rc::clone(self.inner.source.store());

        let tx = self.inner.tx.clone();
        let request = Request::new(Some(self.source()), Some(tx.clone()));
        tx.clone().queue_request(
            request,
            Box::new(move || {
                async move {
                    store.delete(&tx, &KeyRange::only(primary_key));
                    Ok(RequestResult::Undefined)
                }
                .boxed_local()
            }),
        )
    }
}

/// Narrow `range` to start just past (or at, when `!open`) `key` in the
/// direction of travel.
fn resume(range: KeyRange, key: &Key, open: bool, forward: bool) -> KeyRange {
    if forward {
        range.with_lower(key.clone(), open)
    } else {
        range.with_upper(key.clone(), open)
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Cursor")
            .field("direction", &self.inner.direction)
            .field("key", &state.key)
            .field("primary_key", &state.primary_key)
            .finish_non_exhaustive()
    }
}

///
/// TESTS
///
