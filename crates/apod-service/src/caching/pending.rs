use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;

use crate::types::CalendarDay;
use crate::utils::defer::defer;

use super::FetchResult;

/// The three independently fetchable pieces of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PayloadKind {
    Metadata,
    Thumbnail,
    Image,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Metadata => "metadata",
            PayloadKind::Thumbnail => "thumbnail",
            PayloadKind::Image => "image",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Operation<T> = BoxFuture<'static, FetchResult<T>>;

/// A handle to a pending operation, resolving to its shared outcome.
///
/// Dropping the handle leaves the operation; it keeps running for the remaining handles.
pub type PendingFuture<T> = Shared<Operation<T>>;

/// A registry entry pointing at an in-flight operation.
///
/// Only a weak handle is kept here. The callers awaiting the operation own it, so once all of
/// them are gone the operation is dropped, which cancels the underlying fetch.
struct PendingEntry<T> {
    generation: u64,
    operation: WeakShared<Operation<T>>,
}

struct Inner<T> {
    entries: Mutex<BTreeMap<CalendarDay, PendingEntry<T>>>,
    next_generation: AtomicU64,
}

impl<T> Inner<T> {
    /// Removes the entry for `date`, unless it was replaced by a newer operation meanwhile.
    fn remove(&self, date: CalendarDay, generation: u64) {
        let mut entries = self.entries.lock();
        if entries
            .get(&date)
            .is_some_and(|entry| entry.generation == generation)
        {
            entries.remove(&date);
        }
    }
}

/// In-flight fetches of one [`PayloadKind`], keyed by day.
///
/// For a given day at most one operation is running at a time. Concurrent callers of
/// [`join_or_start`](Self::join_or_start) for the same day share that operation and all observe
/// its outcome. Different days never wait on each other: the internal lock only covers the
/// lookup-or-insert and the removal, and is never held across an `.await`.
pub struct PendingOperations<T> {
    kind: PayloadKind,
    inner: Arc<Inner<T>>,
}

impl<T> Clone for PendingOperations<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for PendingOperations<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self
            .inner
            .entries
            .try_lock()
            .map(|entries| entries.len())
            .unwrap_or_default();
        f.debug_struct("PendingOperations")
            .field("kind", &self.kind)
            .field("pending", &pending)
            .finish()
    }
}

impl<T> PendingOperations<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(kind: PayloadKind) -> Self {
        Self {
            kind,
            inner: Arc::new(Inner {
                entries: Mutex::new(BTreeMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Awaits the operation running for `date`, or starts one with `start`.
    ///
    /// The lookup and the publication of a new operation happen in a single critical section, so
    /// two callers can never both believe they are first. `start` is invoked while that section is
    /// held and must only construct the future, not poll it.
    ///
    /// The entry is removed as soon as the operation completes, successfully or not. Any writes
    /// that should be visible to later callers must therefore happen inside the future returned by
    /// `start`.
    ///
    /// NOTE: This function itself is *not* `async`. The operation is looked up or registered
    /// eagerly, so the returned future is already joined even before it is first polled.
    pub fn join_or_start<F, Fut>(&self, date: CalendarDay, start: F) -> PendingFuture<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<T>> + Send + 'static,
    {
        let kind = self.kind.as_str();
        let mut entries = self.inner.entries.lock();

        if let Some(operation) = entries
            .get(&date)
            .and_then(|entry| entry.operation.upgrade())
        {
            tracing::trace!(%date, kind, "Joining pending operation");
            metric!(counter("pending.joined") += 1, "kind" => kind);
            return operation;
        }

        tracing::trace!(%date, kind, "Starting new operation");
        metric!(counter("pending.started") += 1, "kind" => kind);

        // Must run before the removal guard exists: dropping the guard takes the lock held here.
        let future = start();

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        // Runs when the operation finishes, or when it is dropped because nobody awaits it anymore.
        let remove_token = defer(move || inner.remove(date, generation));
        let operation = async move {
            let result = future.await;
            remove_token.run();
            result
        }
        .boxed()
        .shared();

        // A freshly created `Shared` has not completed, so `downgrade` always succeeds here.
        if let Some(weak) = operation.downgrade() {
            entries.insert(
                date,
                PendingEntry {
                    generation,
                    operation: weak,
                },
            );
        }

        operation
    }

    /// Whether an operation for `date` is currently in flight.
    pub fn is_pending(&self, date: CalendarDay) -> bool {
        // The upgraded handle is dropped only after the lock is released, as dropping the last
        // handle runs the removal, which takes the lock again.
        let operation = self
            .inner
            .entries
            .lock()
            .get(&date)
            .and_then(|entry| entry.operation.upgrade());
        operation.is_some()
    }

    /// The number of registered operations.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
