//! Mark-sweep garbage collector
//!
//! Marks from the root set and every strong handle, sweeps unmarked
//! objects, then frees the weak handles whose targets were swept and
//! notifies the [`WeakCallback`] once per freed handle.

use super::handle::WeakCallback;
use super::heap::Heap;
use super::value::Value;
use std::time::{Duration, Instant};

/// Garbage collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed
    pub objects_freed: usize,

    /// Total weak handles cleared by collection
    pub weak_handles_cleared: usize,

    /// Total pause time across all collections
    pub total_pause_time: Duration,

    /// Last collection duration
    pub last_pause_time: Duration,

    /// Maximum pause time
    pub max_pause_time: Duration,

    /// Objects marked in last collection
    pub last_marked_count: usize,

    /// Objects freed in last collection
    pub last_freed_count: usize,

    /// Weak handles cleared in last collection
    pub last_weak_cleared: usize,

    /// Live objects after last collection
    pub live_objects: usize,
}

impl GcStats {
    /// Update statistics after a collection
    fn update(&mut self, pause_time: Duration, marked: usize, freed: usize, weak_cleared: usize, live: usize) {
        self.collections += 1;
        self.objects_freed += freed;
        self.weak_handles_cleared += weak_cleared;
        self.total_pause_time += pause_time;
        self.last_pause_time = pause_time;
        if pause_time > self.max_pause_time {
            self.max_pause_time = pause_time;
        }

        self.last_marked_count = marked;
        self.last_freed_count = freed;
        self.last_weak_cleared = weak_cleared;
        self.live_objects = live;
    }

    /// Average pause time
    pub fn avg_pause_time(&self) -> Duration {
        if self.collections == 0 {
            return Duration::ZERO;
        }
        self.total_pause_time.div_f64(self.collections as f64)
    }
}

impl Heap {
    /// Run a full collection
    ///
    /// Returns the number of objects freed. `callback` observes every weak
    /// handle emptied by this collection, after all sweeping is done.
    pub fn collect(&mut self, callback: &mut dyn WeakCallback) -> usize {
        let start = Instant::now();

        let marked = self.mark();
        let freed = self.sweep();
        let tokens = {
            let objects = &self.objects;
            self.handles.sweep_weak(|value| {
                objects
                    .get(value.index() as usize)
                    .map(|slot| slot.generation == value.generation() && slot.object.is_some())
                    .unwrap_or(false)
            })
        };

        let pause = start.elapsed();
        self.stats
            .update(pause, marked, freed, tokens.len(), self.live_objects);

        tracing::trace!(
            marked,
            freed,
            weak_cleared = tokens.len(),
            pause_us = pause.as_micros() as u64,
            "gc cycle complete"
        );

        for token in tokens {
            callback.on_collected(token);
        }
        freed
    }

    /// Mark phase: flag everything reachable from roots and strong handles
    fn mark(&mut self) -> usize {
        let mut worklist: Vec<Value> = self.roots.iter().collect();
        worklist.extend(self.handles.strong_targets());

        let mut marked = 0;
        while let Some(value) = worklist.pop() {
            let Some(slot) = self.objects.get_mut(value.index() as usize) else {
                continue;
            };
            if slot.generation != value.generation() {
                continue;
            }
            let Some(object) = slot.object.as_mut() else {
                continue;
            };
            if object.marked {
                continue;
            }
            object.marked = true;
            marked += 1;
            worklist.extend(object.fields.iter().copied());
        }
        marked
    }

    /// Sweep phase: free unmarked objects and clear marks on survivors
    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (index, slot) in self.objects.iter_mut().enumerate() {
            let Some(object) = slot.object.as_mut() else {
                continue;
            };
            if object.marked {
                object.marked = false;
                continue;
            }
            slot.object = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free_objects.push(index as u32);
            freed += 1;
        }
        self.live_objects -= freed;
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineId;
    use crate::gc::{HandleKind, WeakToken};

    #[derive(Default)]
    struct Recorder(Vec<WeakToken>);

    impl WeakCallback for Recorder {
        fn on_collected(&mut self, token: WeakToken) {
            self.0.push(token);
        }
    }

    #[test]
    fn test_unreachable_objects_are_freed() {
        let mut heap = Heap::new(EngineId::allocate());
        let root = heap.allocate();
        let child = heap.allocate();
        let garbage = heap.allocate();
        heap.roots_mut().add_persistent_root(root);
        heap.link(root, child).unwrap();

        let freed = heap.collect(&mut Recorder::default());

        assert_eq!(freed, 1);
        assert!(heap.is_alive(root));
        assert!(heap.is_alive(child));
        assert!(!heap.is_alive(garbage));
        assert_eq!(heap.gc_stats().collections, 1);
        assert_eq!(heap.gc_stats().live_objects, 2);
    }

    #[test]
    fn test_strong_handle_is_a_root() {
        let mut heap = Heap::new(EngineId::allocate());
        let obj = heap.allocate();
        let child = heap.allocate();
        heap.link(obj, child).unwrap();
        let h = heap.create_handle(obj, HandleKind::Local).unwrap();

        heap.collect(&mut Recorder::default());

        assert!(heap.is_alive(obj));
        assert!(heap.is_alive(child));
        assert_eq!(heap.resolve(h), Some(obj));
    }

    #[test]
    fn test_weak_handle_cleared_and_reported() {
        let mut heap = Heap::new(EngineId::allocate());
        let obj = heap.allocate();
        let h = heap.create_handle(obj, HandleKind::Local).unwrap();
        heap.make_weak(h, WeakToken(42)).unwrap();

        let mut recorder = Recorder::default();
        heap.collect(&mut recorder);

        assert!(!heap.is_alive(obj));
        assert!(heap.is_empty(h));
        assert_eq!(recorder.0, vec![WeakToken(42)]);
        assert_eq!(heap.gc_stats().last_weak_cleared, 1);
    }

    #[test]
    fn test_weak_handle_survives_while_reachable() {
        let mut heap = Heap::new(EngineId::allocate());
        let obj = heap.allocate();
        heap.roots_mut().add_persistent_root(obj);
        let h = heap.create_handle(obj, HandleKind::Local).unwrap();
        heap.make_weak(h, WeakToken(1)).unwrap();

        let mut recorder = Recorder::default();
        heap.collect(&mut recorder);

        assert!(recorder.0.is_empty());
        assert_eq!(heap.resolve(h), Some(obj));
    }

    #[test]
    fn test_stale_value_does_not_resurrect_reused_slot() {
        let mut heap = Heap::new(EngineId::allocate());
        let old = heap.allocate();
        heap.collect(&mut Recorder::default());

        let new = heap.allocate();
        assert_eq!(old.index(), new.index());
        assert!(!heap.is_alive(old));
        assert!(heap.is_alive(new));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_avg_pause_time_survives_large_collection_counts() {
        let stats = GcStats {
            collections: (1usize << 32) + 2,
            total_pause_time: Duration::from_secs(1 << 33),
            ..GcStats::default()
        };
        let avg = stats.avg_pause_time();
        assert!(avg > Duration::from_millis(1999) && avg <= Duration::from_secs(2));

        assert_eq!(GcStats::default().avg_pause_time(), Duration::ZERO);
    }
}
