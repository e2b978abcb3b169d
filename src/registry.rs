//! Bookkeeping of deferreds that have not settled yet and of the ones that
//! settled most recently. Purely diagnostic: nothing in the settlement path
//! depends on it.
use crate::{DeferredId, Status};
use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    fmt,
    panic::Location,
};

/// Default number of settled deferreds kept in the recent log.
pub const DEFAULT_RECENT_CAPACITY: usize = 20;

/// What the registry knows about one deferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: DeferredId,
    pub trace: Option<String>,
    pub created_at: &'static Location<'static>,
    pub chained_from: Option<DeferredId>,
    pub status: Status,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} created at {}", self.id, self.status, self.created_at)?;
        if let Some(source) = self.chained_from {
            write!(f, ", chained from {source}")?;
        }
        if let Some(trace) = &self.trace {
            write!(f, ", trace: {trace}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Inner {
    outstanding: BTreeMap<DeferredId, Record>,
    recent: VecDeque<Record>,
}

/// Outstanding set plus a bounded log of recently settled deferreds.
///
/// A registry is attached to a [`Context`](crate::Context); separate contexts
/// keep separate books.
#[derive(Debug)]
pub struct DebugRegistry {
    capacity: usize,
    inner: RefCell<Inner>,
}

impl Default for DebugRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RECENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RefCell::new(Inner {
                outstanding: BTreeMap::new(),
                recent: VecDeque::with_capacity(capacity),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn register(&self, record: Record) {
        self.inner.borrow_mut().outstanding.insert(record.id, record);
    }

    pub(crate) fn settle(&self, id: DeferredId, status: Status) {
        let mut inner = self.inner.borrow_mut();
        let Some(mut record) = inner.outstanding.remove(&id) else {
            return;
        };
        record.status = status;
        if self.capacity == 0 {
            return;
        }
        while inner.recent.len() >= self.capacity {
            if let Some(evicted) = inner.recent.pop_front() {
                tracing::debug!(deferred = %evicted.id, "evicted from recent log");
            }
        }
        inner.recent.push_back(record);
    }

    /// Deferreds still pending, in id order.
    pub fn outstanding(&self) -> Vec<Record> {
        self.inner.borrow().outstanding.values().cloned().collect()
    }

    pub fn outstanding_len(&self) -> usize {
        self.inner.borrow().outstanding.len()
    }

    /// Recently settled deferreds, oldest first.
    pub fn recent(&self) -> Vec<Record> {
        self.inner.borrow().recent.iter().cloned().collect()
    }

    /// Finds a record among the outstanding, then the recent ones.
    pub fn lookup(&self, id: DeferredId) -> Option<Record> {
        let inner = self.inner.borrow();
        inner
            .outstanding
            .get(&id)
            .or_else(|| inner.recent.iter().rev().find(|record| record.id == id))
            .cloned()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            outstanding: self.outstanding(),
            recent: self.recent(),
        }
    }
}

/// A point-in-time copy of a [`DebugRegistry`], printable as a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub outstanding: Vec<Record>,
    pub recent: Vec<Record>,
}

impl fmt::Display for RegistrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "outstanding ({}):", self.outstanding.len())?;
        for record in &self.outstanding {
            writeln!(f, "  {record}")?;
        }
        writeln!(f, "recent ({}):", self.recent.len())?;
        for record in &self.recent {
            writeln!(f, "  {record}")?;
        }
        Ok(())
    }
}
