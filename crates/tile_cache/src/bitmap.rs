//! The bitmap-cache procurement façade: spec §4.D.3. Wraps the generic
//! [`Cache`] with placeholder bookkeeping and a worker pool, so that a
//! miss triggers exactly one background fetch and the caller always
//! gets back the best bitmap already on hand.

use std::sync::{Arc, Mutex};

use tile_address::TileAddress;
use worker_pool::{RepaintNotifier, WorkerPool};

use crate::core::Cache;

/// A decoded 256x256 RGB tile. `Arc`-wrapped so a lookup can hand the
/// caller a cheap clone and release the cache mutex before any
/// expensive downstream work (a GPU upload) runs.
pub type Bitmap = Arc<[u8; 196_608]>;

/// One cache slot: either a live bitmap, or a placeholder marking that a
/// worker is already procuring this address. The destructor-on-null
/// special case from the source disappears: a placeholder simply has no
/// payload to drop.
#[derive(Clone)]
pub enum Entry {
    Placeholder,
    Value(Bitmap),
}

impl Entry {
    fn as_bitmap(&self) -> Option<Bitmap> {
        match self {
            Entry::Value(bitmap) => Some(Arc::clone(bitmap)),
            Entry::Placeholder => None,
        }
    }
}

/// Fetches and decodes the bytes for an address, or fails silently.
/// Bound once at [`BitmapCache::new`]; it is `slippy_core`'s job to wire
/// this to `tile_store::FsTileStore::open` + `tile_codec::decode_tile`.
/// Kept as a plain closure type here so this crate stays free of a
/// dependency on either of those crates.
pub trait TileFetch: Fn(TileAddress) -> Option<Bitmap> + Send + Sync + 'static {}
impl<F: Fn(TileAddress) -> Option<Bitmap> + Send + Sync + 'static> TileFetch for F {}

struct Shared {
    cache: Mutex<Cache<Entry>>,
    repaint: Mutex<RepaintNotifier>,
}

/// The bitmap cache. Shared by the render thread (readers and the
/// occasional direct writer) and every worker thread (writer at job
/// completion); a single mutex serializes every public operation.
pub struct BitmapCache {
    shared: Arc<Shared>,
    pool: WorkerPool<TileAddress>,
}

impl BitmapCache {
    pub fn new<F>(capacity: usize, num_workers: usize, queue_capacity: usize, fetch: F) -> Self
    where
        F: TileFetch,
    {
        let shared = Arc::new(Shared {
            cache: Mutex::new(Cache::new(capacity)),
            repaint: Mutex::new(RepaintNotifier::default()),
        });

        let worker_shared = Arc::clone(&shared);
        let pool = WorkerPool::new(num_workers, queue_capacity, move |addr: TileAddress| {
            let Some(bitmap) = fetch(addr) else {
                log::debug!("tile_cache: fetch failed for {addr:?}, placeholder left in place");
                return;
            };
            {
                let mut cache = worker_shared.cache.lock().expect("bitmap cache lock poisoned");
                cache.insert(addr, Entry::Value(bitmap));
            }
            worker_shared
                .repaint
                .lock()
                .expect("repaint notifier lock poisoned")
                .notify();
        });

        BitmapCache { shared, pool }
    }

    pub fn set_repaint_notifier(&self, notifier: impl Fn() + Send + Sync + 'static) {
        *self.shared.repaint.lock().expect("repaint notifier lock poisoned") =
            RepaintNotifier::new(notifier);
    }

    /// spec §4.D.3's `lookup_bitmap`. Returns the best bitmap already on
    /// hand (possibly an ancestor, possibly none) and the address it was
    /// found at; as a side effect, enqueues exactly one worker job for
    /// `in_addr` when nothing is already in flight for it.
    pub fn lookup(&self, in_addr: TileAddress) -> (Option<Bitmap>, TileAddress) {
        let mut cache = self.shared.cache.lock().expect("bitmap cache lock poisoned");
        self.lookup_locked(&mut cache, in_addr)
    }

    fn lookup_locked(&self, cache: &mut Cache<Entry>, in_addr: TileAddress) -> (Option<Bitmap>, TileAddress) {
        let (entry, out) = cache.search(in_addr);

        if let Some(Entry::Value(bitmap)) = &entry {
            if out.z == in_addr.z {
                return (Some(Arc::clone(bitmap)), out);
            }
        }

        if entry.is_none() || out.z != in_addr.z {
            self.procure(cache, in_addr);
        }

        match entry {
            None => (None, in_addr),
            Some(Entry::Value(bitmap)) => (Some(bitmap), out),
            Some(Entry::Placeholder) => {
                // Resolved Open Question (spec §9): recurse from the
                // original request, not from the level the placeholder
                // was found at, so a chain of in-flight ancestors cannot
                // mask a real bitmap further up.
                match in_addr.ascend() {
                    Some(parent) => self.lookup_locked(cache, parent),
                    None => (None, out),
                }
            }
        }
    }

    /// Enqueues a worker job for `addr` and installs a placeholder, but
    /// only if the enqueue actually succeeded — a full queue leaves no
    /// trace, so the next lookup retries on its own.
    fn procure(&self, cache: &mut Cache<Entry>, addr: TileAddress) {
        if self.pool.try_enqueue(addr) {
            cache.insert(addr, Entry::Placeholder);
        } else {
            log::debug!("tile_cache: worker queue full, dropping procurement for {addr:?}");
        }
    }

    /// A raw read that walks past placeholders to the best real bitmap,
    /// with no enqueueing side effect. Used by [`crate::texture::TextureCache`]'s
    /// resolution walk, which must never start new work on the render
    /// thread.
    pub(crate) fn best_real_locked(cache: &mut Cache<Entry>, in_addr: TileAddress) -> (Option<Bitmap>, TileAddress) {
        let mut current = in_addr;
        loop {
            let (entry, out) = cache.search(current);
            match entry.as_ref().and_then(Entry::as_bitmap) {
                Some(bitmap) => return (Some(bitmap), out),
                None => match entry {
                    Some(Entry::Placeholder) => match current.ascend() {
                        Some(parent) => current = parent,
                        None => return (None, out),
                    },
                    _ => return (None, out),
                },
            }
        }
    }

    pub(crate) fn raw_cache(&self) -> &Mutex<Cache<Entry>> {
        &self.shared.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn addr(z: u8, x: u32, y: u32) -> TileAddress {
        TileAddress::new(z, x, y)
    }

    fn synthesized_bitmap() -> Bitmap {
        Arc::new([7u8; 196_608])
    }

    /// Scenario 1 — cold cache, exact hit.
    #[test]
    fn cold_cache_exact_hit_after_worker_runs() {
        let (repaint_tx, repaint_rx) = mpsc::channel();
        let cache = BitmapCache::new(4, 1, 4, |_addr| Some(synthesized_bitmap()));
        cache.set_repaint_notifier(move || {
            let _ = repaint_tx.send(());
        });

        let (bitmap, out) = cache.lookup(addr(2, 1, 1));
        assert_eq!(bitmap, None);
        assert_eq!(out, addr(2, 1, 1));

        repaint_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let (bitmap, out) = cache.lookup(addr(2, 1, 1));
        assert!(bitmap.is_some());
        assert_eq!(out, addr(2, 1, 1));
        assert_eq!(cache.shared.cache.lock().unwrap().used(), 1);
    }

    /// Scenario 2 — ancestor fallback, plus scenario 3 — placeholder
    /// suppresses duplicate work.
    #[test]
    fn ancestor_fallback_then_placeholder_suppresses_duplicate_enqueue() {
        let enqueued = Arc::new(AtomicUsize::new(0));
        let enqueued_counter = Arc::clone(&enqueued);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);

        let cache = BitmapCache::new(4, 1, 4, move |_addr| {
            enqueued_counter.fetch_add(1, Ordering::SeqCst);
            // block the sole worker so the placeholder for {3,2,2}
            // stays in place for the duration of this test
            release_rx.lock().unwrap().recv().ok();
            Some(synthesized_bitmap())
        });

        // seed a real ancestor bitmap directly, bypassing procurement
        cache
            .shared
            .cache
            .lock()
            .unwrap()
            .insert(addr(2, 1, 1), Entry::Value(synthesized_bitmap()));

        let (bitmap, out) = cache.lookup(addr(3, 2, 2));
        assert!(bitmap.is_some());
        assert_eq!(out, addr(2, 1, 1));
        assert_eq!(cache.shared.cache.lock().unwrap().used(), 2);

        let (bitmap, out) = cache.lookup(addr(3, 2, 2));
        assert!(bitmap.is_some());
        assert_eq!(out, addr(2, 1, 1));
        assert_eq!(cache.shared.cache.lock().unwrap().used(), 2);

        release_tx.send(()).unwrap();
        assert_eq!(enqueued.load(Ordering::SeqCst), 1);
    }

    /// Scenario 4 — eviction.
    #[test]
    fn eviction_picks_stalest_node_across_levels() {
        let cache = BitmapCache::new(2, 1, 1, |_addr| None);
        let mut guard = cache.shared.cache.lock().unwrap();
        guard.insert(addr(0, 0, 0), Entry::Value(synthesized_bitmap()));
        guard.insert(addr(1, 0, 0), Entry::Value(synthesized_bitmap()));
        guard.search(addr(0, 0, 0));
        guard.insert(addr(1, 1, 1), Entry::Value(synthesized_bitmap()));

        assert_eq!(guard.used(), 2);
        assert!(guard.search(addr(1, 0, 0)).0.is_none());
        assert!(guard.search(addr(0, 0, 0)).0.is_some());
    }

    /// Scenario 5 — queue-full backpressure. The sole worker is tied up
    /// with an unrelated job (confirmed via a "started" handshake, so
    /// there is no race on whether it has been dequeued yet) before
    /// either of the scenario's own two lookups runs.
    #[test]
    fn queue_full_backpressure_leaves_no_placeholder() {
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let started_tx = std::sync::Mutex::new(started_tx);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        let cache = BitmapCache::new(4, 1, 1, move |_addr| {
            started_tx.lock().unwrap().send(()).ok();
            release_rx.lock().unwrap().recv().ok();
            Some(synthesized_bitmap())
        });

        // occupy the sole worker with an unrelated address
        cache.lookup(addr(9, 0, 0));
        started_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        // the queue is now confirmed empty (job drained into the busy
        // worker) and the worker confirmed unable to drain anything else
        assert!(cache.lookup(addr(5, 0, 0)).0.is_none()); // fills the one queue slot
        let (bitmap, out) = cache.lookup(addr(5, 0, 1)); // queue full, enqueue fails
        assert_eq!(bitmap, None);
        assert_eq!(out, addr(5, 0, 1));
        assert!(!cache.shared.cache.lock().unwrap().contains_exact(addr(5, 0, 1)));

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
    }

    /// Scenario 6 — decode failure leaves the placeholder in place.
    #[test]
    fn fetch_failure_leaves_placeholder_until_evicted() {
        let (done_tx, done_rx) = mpsc::channel();
        let cache = BitmapCache::new(4, 1, 4, move |_addr| {
            let _ = done_tx.send(());
            None
        });

        let (bitmap, _) = cache.lookup(addr(5, 0, 0));
        assert_eq!(bitmap, None);
        done_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        // worker ran, found nothing, insert was never called: the
        // placeholder installed at procurement time is still there
        assert!(cache.shared.cache.lock().unwrap().contains_exact(addr(5, 0, 0)));
    }

    #[test]
    fn procurement_recurses_from_original_request_not_from_placeholder_level() {
        // {4,1,1} holds a placeholder (some other worker already on it);
        // {2,0,0} (an ancestor two levels up) holds a real bitmap. A
        // lookup for a descendant of both must recurse using ascend of
        // the *original* request, landing on {3,0,0} then {2,0,0}, and
        // must find the real ancestor rather than stopping short.
        let cache = BitmapCache::new(8, 1, 1, |_addr| None);
        {
            let mut guard = cache.shared.cache.lock().unwrap();
            guard.insert(addr(4, 1, 1), Entry::Placeholder);
            guard.insert(addr(2, 0, 0), Entry::Value(synthesized_bitmap()));
        }

        let (bitmap, out) = cache.lookup(addr(5, 2, 2));
        assert!(bitmap.is_some());
        assert_eq!(out, addr(2, 0, 0));
    }
}
