//! Object storage and global handles

use super::collector::GcStats;
use super::handle::{GlobalHandle, HandleKind, HandleMode, HandleTable, WeakToken};
use super::roots::RootSet;
use super::value::Value;
use super::HeapError;
use crate::engine::EngineId;
use crate::finalizer::NativePtr;

/// A heap object: outgoing edges plus an internal native slot
#[derive(Debug, Default)]
pub(super) struct HeapObject {
    pub(super) fields: Vec<Value>,
    pub(super) native: Option<NativePtr>,
    pub(super) marked: bool,
}

#[derive(Debug)]
pub(super) struct ObjectSlot {
    pub(super) generation: u32,
    pub(super) object: Option<HeapObject>,
}

/// Heap statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of live objects
    pub object_count: usize,
    /// Number of live global handles
    pub handle_count: usize,
    /// Native memory reported against this heap, in bytes
    pub external_memory: i64,
}

/// Garbage-collected heap
///
/// Every heap belongs to one engine; values allocated elsewhere never
/// resolve here.
#[derive(Debug)]
pub struct Heap {
    owner: EngineId,
    pub(super) objects: Vec<ObjectSlot>,
    pub(super) free_objects: Vec<u32>,
    pub(super) live_objects: usize,
    pub(super) handles: HandleTable,
    pub(super) roots: RootSet,
    pub(super) stats: GcStats,
    external_memory: i64,
}

impl Heap {
    /// Create an empty heap owned by `owner`
    pub fn new(owner: EngineId) -> Self {
        Self {
            owner,
            objects: Vec::new(),
            free_objects: Vec::new(),
            live_objects: 0,
            handles: HandleTable::default(),
            roots: RootSet::new(),
            stats: GcStats::default(),
            external_memory: 0,
        }
    }

    /// Engine this heap belongs to
    pub fn owner(&self) -> EngineId {
        self.owner
    }

    /// Whether `value` was allocated by this heap
    pub fn owns(&self, value: Value) -> bool {
        value.owner() == self.owner
    }

    /// Allocate a new object with no fields
    pub fn allocate(&mut self) -> Value {
        self.live_objects += 1;
        if let Some(index) = self.free_objects.pop() {
            let slot = &mut self.objects[index as usize];
            slot.object = Some(HeapObject::default());
            return Value::new(self.owner, index, slot.generation);
        }

        let index = self.objects.len() as u32;
        self.objects.push(ObjectSlot {
            generation: 0,
            object: Some(HeapObject::default()),
        });
        Value::new(self.owner, index, 0)
    }

    /// Check whether a value still names a live object
    pub fn is_alive(&self, value: Value) -> bool {
        self.object(value).is_some()
    }

    pub(super) fn object(&self, value: Value) -> Option<&HeapObject> {
        if !self.owns(value) {
            return None;
        }
        self.objects
            .get(value.index() as usize)
            .filter(|slot| slot.generation == value.generation())
            .and_then(|slot| slot.object.as_ref())
    }

    fn object_mut(&mut self, value: Value) -> Result<&mut HeapObject, HeapError> {
        if !self.owns(value) {
            return Err(HeapError::DeadObject(value));
        }
        self.objects
            .get_mut(value.index() as usize)
            .filter(|slot| slot.generation == value.generation())
            .and_then(|slot| slot.object.as_mut())
            .ok_or(HeapError::DeadObject(value))
    }

    /// Add an edge from `object` to `child`
    pub fn link(&mut self, object: Value, child: Value) -> Result<(), HeapError> {
        if !self.is_alive(child) {
            return Err(HeapError::DeadObject(child));
        }
        self.object_mut(object)?.fields.push(child);
        Ok(())
    }

    /// Remove one edge from `object` to `child`
    pub fn unlink(&mut self, object: Value, child: Value) -> Result<bool, HeapError> {
        let fields = &mut self.object_mut(object)?.fields;
        match fields.iter().position(|v| *v == child) {
            Some(pos) => {
                fields.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Read the object's native slot
    pub fn native_slot(&self, object: Value) -> Result<Option<NativePtr>, HeapError> {
        self.object(object)
            .map(|o| o.native)
            .ok_or(HeapError::DeadObject(object))
    }

    /// Replace the object's native slot, returning the previous contents
    pub fn set_native_slot(
        &mut self,
        object: Value,
        native: Option<NativePtr>,
    ) -> Result<Option<NativePtr>, HeapError> {
        let obj = self.object_mut(object)?;
        Ok(std::mem::replace(&mut obj.native, native))
    }

    /// Root set of this heap
    pub fn roots(&self) -> &RootSet {
        &self.roots
    }

    /// Mutable root set of this heap
    pub fn roots_mut(&mut self) -> &mut RootSet {
        &mut self.roots
    }

    // ===== Global handles =====

    /// Create a strong handle through the path matching `kind`
    pub fn create_handle(&mut self, value: Value, kind: HandleKind) -> Result<GlobalHandle, HeapError> {
        if !self.is_alive(value) {
            return Err(HeapError::DeadObject(value));
        }
        Ok(self.handles.insert(value, kind))
    }

    /// Convert a handle to weak; `token` is reported if the target is swept
    pub fn make_weak(&mut self, handle: GlobalHandle, token: WeakToken) -> Result<(), HeapError> {
        let entry = self
            .handles
            .get_mut(handle)
            .ok_or(HeapError::EmptyHandle(handle))?;
        entry.mode = HandleMode::Weak(token);
        Ok(())
    }

    /// Convert a handle back to strong, dropping its collection callback
    pub fn make_strong(&mut self, handle: GlobalHandle) -> Result<(), HeapError> {
        let entry = self
            .handles
            .get_mut(handle)
            .ok_or(HeapError::EmptyHandle(handle))?;
        entry.mode = HandleMode::Strong;
        Ok(())
    }

    /// Free a handle created through the local path
    pub fn free_handle(&mut self, handle: GlobalHandle) -> Result<(), HeapError> {
        self.free_with(handle, HandleKind::Local)
    }

    /// Free a handle created through the cross-runtime path
    pub fn free_cross_handle(&mut self, handle: GlobalHandle) -> Result<(), HeapError> {
        self.free_with(handle, HandleKind::CrossRuntime)
    }

    fn free_with(&mut self, handle: GlobalHandle, path: HandleKind) -> Result<(), HeapError> {
        if handle.kind() != path {
            return Err(HeapError::HandleKindMismatch {
                handle,
                expected: handle.kind(),
            });
        }
        self.handles
            .remove(handle)
            .map(|_| ())
            .ok_or(HeapError::EmptyHandle(handle))
    }

    /// Check whether a handle has been freed or emptied by collection
    pub fn is_empty(&self, handle: GlobalHandle) -> bool {
        self.handles.get(handle).is_none()
    }

    /// Current strength of a handle, `None` if empty
    pub fn handle_mode(&self, handle: GlobalHandle) -> Option<HandleMode> {
        self.handles.get(handle).map(|e| e.mode)
    }

    /// Resolve a handle to its target, `None` if empty
    pub fn resolve(&self, handle: GlobalHandle) -> Option<Value> {
        self.handles.get(handle).map(|e| e.target)
    }

    // ===== Accounting =====

    /// Adjust the native memory reported against this heap
    pub fn adjust_external_memory(&mut self, delta: i64) -> i64 {
        self.external_memory += delta;
        self.external_memory
    }

    /// Native memory reported against this heap, in bytes
    pub fn external_memory(&self) -> i64 {
        self.external_memory
    }

    /// Current heap statistics
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            object_count: self.live_objects,
            handle_count: self.handles.len(),
            external_memory: self.external_memory,
        }
    }

    /// Collection statistics
    pub fn gc_stats(&self) -> &GcStats {
        &self.stats
    }
}
