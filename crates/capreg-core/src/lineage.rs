//! Parent/child derivation links.
//!
//! Links are stored on the child (`parent_ids`). Validation runs before a
//! child is written; walks read the store lazily, one record per step.

use std::collections::{HashMap, HashSet, VecDeque};

use capreg_state::{CapabilityRecord, RecordId, RecordStore};
use chrono::{DateTime, Duration, Utc};
use futures::Stream;

use crate::domain::{LineageViolation, RegistryError, Result};

/// Outcome of a successful lineage check.
#[derive(Debug, Clone)]
pub struct LineagePlan {
    pub child: RecordId,
    /// Resolved parents, in the order given.
    pub parents: Vec<CapabilityRecord>,
    /// `max(parent.generation) + 1`, or 0 without parents.
    pub generation: u32,
}

impl LineagePlan {
    /// Earliest `created_at` a new child may carry: strictly after every
    /// parent, and no earlier than `now`.
    pub fn child_created_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.parents
            .iter()
            .map(|p| p.created_at + Duration::microseconds(1))
            .fold(now, |acc, t| acc.max(t))
    }
}

fn violation(child: &RecordId, violation: LineageViolation) -> RegistryError {
    RegistryError::InvalidLineage {
        child: child.to_string(),
        violation,
    }
}

/// Validate that `child` may name `parent_ids` as its parents.
///
/// If `child` is already stored its `created_at` bounds the parents and the
/// link must not close a cycle. Otherwise the child is treated as new:
/// parents must be live.
pub async fn validate<S>(store: &S, child: &RecordId, parent_ids: &[RecordId]) -> Result<LineagePlan>
where
    S: RecordStore + ?Sized,
{
    let mut seen = HashSet::new();
    for parent in parent_ids {
        if parent == child {
            return Err(violation(child, LineageViolation::SelfReference));
        }
        if !seen.insert(parent) {
            return Err(violation(
                child,
                LineageViolation::DuplicateParent(parent.to_string()),
            ));
        }
    }

    let existing = store.load(child).await?;

    let mut parents = Vec::with_capacity(parent_ids.len());
    for parent_id in parent_ids {
        let parent = store.load(parent_id).await?.ok_or_else(|| {
            violation(child, LineageViolation::UnknownParent(parent_id.to_string()))
        })?;
        match &existing {
            Some(child_record) => {
                if parent.created_at >= child_record.created_at {
                    return Err(violation(
                        child,
                        LineageViolation::ParentNotOlder {
                            parent: parent_id.to_string(),
                        },
                    ));
                }
            }
            None => {
                if parent.is_deleted() {
                    return Err(violation(
                        child,
                        LineageViolation::DeletedParent(parent_id.to_string()),
                    ));
                }
            }
        }
        parents.push(parent);
    }

    if existing.is_some() {
        for parent in &parents {
            let mut walk = Ancestors::new(store, parent.id.clone(), None);
            while let Some(ancestor) = walk.next().await? {
                if ancestor.id == *child {
                    return Err(violation(
                        child,
                        LineageViolation::Cycle {
                            parent: parent.id.to_string(),
                        },
                    ));
                }
            }
        }
    }

    let generation = parents
        .iter()
        .map(|p| p.generation + 1)
        .max()
        .unwrap_or(0);

    Ok(LineagePlan {
        child: child.clone(),
        parents,
        generation,
    })
}

/// Breadth-first walk over a record's ancestors.
///
/// Each ancestor is yielded once even when reachable along several paths.
/// Soft-deleted ancestors are included. Call [`Ancestors::restart`] to walk
/// again from the start with fresh reads.
pub struct Ancestors<'a, S: ?Sized> {
    store: &'a S,
    start: RecordId,
    max_depth: Option<usize>,
    queue: VecDeque<(RecordId, usize)>,
    seen: HashSet<RecordId>,
    started: bool,
    done: bool,
}

impl<'a, S> Ancestors<'a, S>
where
    S: RecordStore + ?Sized,
{
    /// `max_depth = None` walks to the roots; `Some(1)` yields parents only.
    pub fn new(store: &'a S, start: RecordId, max_depth: Option<usize>) -> Self {
        Self {
            store,
            start,
            max_depth,
            queue: VecDeque::new(),
            seen: HashSet::new(),
            started: false,
            done: false,
        }
    }

    pub fn restart(&mut self) {
        self.queue.clear();
        self.seen.clear();
        self.started = false;
        self.done = false;
    }

    fn within_depth(&self, depth: usize) -> bool {
        self.max_depth.map_or(true, |max| depth <= max)
    }

    fn enqueue_parents(&mut self, record: &CapabilityRecord, depth: usize) {
        if !self.within_depth(depth) {
            return;
        }
        for parent in &record.parent_ids {
            if self.seen.insert(parent.clone()) {
                self.queue.push_back((parent.clone(), depth));
            }
        }
    }

    /// Next ancestor, or `None` once the walk is exhausted.
    pub async fn next(&mut self) -> Result<Option<CapabilityRecord>> {
        if self.done {
            return Ok(None);
        }
        match self.step().await {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Err(err) => {
                self.done = true;
                Err(err)
            }
        }
    }

    async fn step(&mut self) -> Result<Option<CapabilityRecord>> {
        if !self.started {
            self.started = true;
            let start = self
                .store
                .load(&self.start)
                .await?
                .ok_or_else(|| RegistryError::NotFound(self.start.to_string()))?;
            self.seen.insert(start.id.clone());
            self.enqueue_parents(&start, 1);
        }

        while let Some((id, depth)) = self.queue.pop_front() {
            match self.store.load(&id).await? {
                Some(record) => {
                    self.enqueue_parents(&record, depth + 1);
                    return Ok(Some(record));
                }
                None => {
                    tracing::warn!(ancestor = %id, start = %self.start, "ancestor missing from store");
                }
            }
        }
        Ok(None)
    }

    /// Drain the remaining walk into a vector.
    pub async fn collect_all(&mut self) -> Result<Vec<CapabilityRecord>> {
        let mut out = Vec::new();
        while let Some(record) = self.next().await? {
            out.push(record);
        }
        Ok(out)
    }

    /// Adapt the walk into a `Stream`. Ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<CapabilityRecord>> + 'a
    where
        S: 'a,
    {
        futures::stream::unfold(self, |mut walk| async move {
            match walk.next().await {
                Ok(Some(record)) => Some((Ok(record), walk)),
                Ok(None) => None,
                Err(err) => Some((Err(err), walk)),
            }
        })
    }
}

/// Every record naming `id` transitively as a parent, breadth-first.
///
/// Reads one snapshot of the store; soft-deleted descendants are included.
pub fn descendants_in(records: &[CapabilityRecord], id: &RecordId) -> Vec<CapabilityRecord> {
    let mut children: HashMap<&RecordId, Vec<&CapabilityRecord>> = HashMap::new();
    for record in records {
        for parent in &record.parent_ids {
            children.entry(parent).or_default().push(record);
        }
    }

    let mut out = Vec::new();
    let mut seen: HashSet<&RecordId> = HashSet::from([id]);
    let mut queue: VecDeque<&RecordId> = VecDeque::from([id]);
    while let Some(current) = queue.pop_front() {
        for &child in children.get(current).into_iter().flatten() {
            if seen.insert(&child.id) {
                out.push(child.clone());
                queue.push_back(&child.id);
            }
        }
    }
    out
}
