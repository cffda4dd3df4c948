//! Boundary operations
//!
//! Free functions mirroring the native-API surface embedders call. Each one
//! takes the engine it runs against explicitly; references created by one
//! engine are rejected by every other.
//!
//! # Wrapping
//!
//! `wrap` associates a native pointer with a heap object and creates a weak
//! reference (refcount 0) whose finalizer receives that pointer when the
//! object dies. Without [`WrapOptions::keep_reference`] the reference is
//! runtime-owned and frees itself; with it the caller gets a user-owned
//! reference back and must delete it.

use crate::engine::Engine;
use crate::error::{RefResult, ReferenceError};
use crate::finalizer::{FinalizeCallback, Finalizer, NativePtr};
use crate::gc::Value;
use crate::reference::{NativeRef, Ownership, ReferenceOptions};

/// Create a user-owned reference
pub fn create_reference(engine: &Engine, value: Value, initial_refcount: u32) -> RefResult<NativeRef> {
    engine.new_reference(value, ReferenceOptions::new(initial_refcount))
}

/// Create a user-owned reference over a cross-runtime handle
pub fn create_xref(engine: &Engine, value: Value, initial_refcount: u32) -> RefResult<NativeRef> {
    engine.new_reference(value, ReferenceOptions::new(initial_refcount).cross_runtime())
}

/// Destroy a reference
pub fn delete_reference(engine: &Engine, reference: NativeRef) -> RefResult<()> {
    engine.delete_reference(reference)
}

/// Increment a reference's refcount, returning the new count
pub fn reference_ref(engine: &Engine, reference: NativeRef) -> RefResult<u32> {
    engine.reference_ref(reference)
}

/// Decrement a reference's refcount, returning the new count
pub fn reference_unref(engine: &Engine, reference: NativeRef) -> RefResult<u32> {
    engine.reference_unref(reference)
}

/// Current value of a reference, `None` once collected
pub fn get_reference_value(engine: &Engine, reference: NativeRef) -> RefResult<Option<Value>> {
    engine.get_reference_value(reference)
}

/// Options for the wrap family
#[derive(Debug)]
pub struct WrapOptions {
    native: NativePtr,
    finalizer: Option<FinalizeCallback>,
    hint: NativePtr,
    native_binding_size: usize,
    keep_reference: bool,
}

impl WrapOptions {
    /// Wrap `native` with no finalizer
    pub fn new(native: NativePtr) -> Self {
        Self {
            native,
            finalizer: None,
            hint: NativePtr::null(),
            native_binding_size: 0,
            keep_reference: false,
        }
    }

    /// Run `f` on the engine's thread once the object dies
    pub fn on_finalize(mut self, f: impl FnOnce(&Engine, NativePtr, NativePtr) + 'static) -> Self {
        self.finalizer = Some(FinalizeCallback::sync(f));
        self
    }

    /// Run `f` from the root's async queue once the object is collected
    pub fn on_finalize_async(mut self, f: impl FnOnce(NativePtr, NativePtr) + Send + 'static) -> Self {
        self.finalizer = Some(FinalizeCallback::asynchronous(f));
        self
    }

    /// Hint pointer passed to the finalizer
    pub fn hint(mut self, hint: NativePtr) -> Self {
        self.hint = hint;
        self
    }

    /// Bytes of native memory to report against the heap
    pub fn native_binding_size(mut self, size: usize) -> Self {
        self.native_binding_size = size;
        self
    }

    /// Return a user-owned reference instead of a self-freeing one
    pub fn keep_reference(mut self) -> Self {
        self.keep_reference = true;
        self
    }
}

/// Associate a native pointer with `object`
pub fn wrap(engine: &Engine, object: Value, options: WrapOptions) -> RefResult<Option<NativeRef>> {
    ensure_unwrapped(engine, object)?;
    attach(engine, object, options, true)
}

/// Like [`wrap`], but the finalizer must be asynchronous
pub fn wrap_async_finalizer(
    engine: &Engine,
    object: Value,
    options: WrapOptions,
) -> RefResult<Option<NativeRef>> {
    if !options.finalizer.as_ref().is_some_and(FinalizeCallback::is_async) {
        return Err(ReferenceError::InvalidWrap(
            "wrap_async_finalizer requires an async finalize callback",
        ));
    }
    ensure_unwrapped(engine, object)?;
    attach(engine, object, options, true)
}

/// Tie a finalizer to `object`'s lifetime without wrapping it
///
/// Any number of finalizers can be added to one object.
pub fn add_finalizer(engine: &Engine, object: Value, options: WrapOptions) -> RefResult<Option<NativeRef>> {
    engine.check_value(object)?;
    if options.finalizer.is_none() {
        return Err(ReferenceError::InvalidWrap(
            "add_finalizer requires a finalize callback",
        ));
    }
    attach(engine, object, options, false)
}

/// Native pointer wrapped by `object`
pub fn unwrap(engine: &Engine, object: Value) -> RefResult<NativePtr> {
    engine.check_value(object)?;
    engine
        .inner
        .state
        .borrow()
        .heap
        .native_slot(object)?
        .ok_or(ReferenceError::NotWrapped)
}

/// Detach the native pointer from `object`
///
/// The wrap's finalizer will not run. A self-freeing wrap reference is
/// destroyed; a kept one stays valid and must still be deleted.
pub fn remove_wrap(engine: &Engine, object: Value) -> RefResult<NativePtr> {
    engine.check_value(object)?;
    let (native, reference) = {
        let mut state = engine.inner.state.borrow_mut();
        let native = state
            .heap
            .set_native_slot(object, None)?
            .ok_or(ReferenceError::NotWrapped)?;
        (native, state.wraps.remove(&object))
    };

    if let Some(reference) = reference {
        engine.disarm_finalizer(reference.key());
    }
    tracing::trace!(engine = %engine.id(), ?native, "wrap removed");
    Ok(native)
}

fn ensure_unwrapped(engine: &Engine, object: Value) -> RefResult<()> {
    engine.check_value(object)?;
    match engine.inner.state.borrow().heap.native_slot(object)? {
        Some(_) => Err(ReferenceError::AlreadyWrapped),
        None => Ok(()),
    }
}

fn attach(
    engine: &Engine,
    object: Value,
    options: WrapOptions,
    set_native: bool,
) -> RefResult<Option<NativeRef>> {
    let WrapOptions {
        native,
        finalizer,
        hint,
        native_binding_size,
        keep_reference,
    } = options;

    let ownership = if keep_reference {
        Ownership::User
    } else {
        Ownership::Runtime
    };
    let mut reference_options = ReferenceOptions::new(0)
        .ownership(ownership)
        .native_binding_size(native_binding_size);
    if let Some(callback) = finalizer {
        reference_options = reference_options.finalizer(Finalizer::new(callback, native, hint));
    }

    let reference = engine.new_reference(object, reference_options)?;

    if set_native {
        let mut state = engine.inner.state.borrow_mut();
        state.heap.set_native_slot(object, Some(native))?;
        state.wraps.insert(object, reference);
    }

    Ok(keep_reference.then_some(reference))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap() {
        let engine = Engine::new();
        let obj = engine.create_object();
        let ptr = NativePtr::from_addr(0x42);

        assert_eq!(wrap(&engine, obj, WrapOptions::new(ptr)).unwrap(), None);
        assert_eq!(unwrap(&engine, obj).unwrap(), ptr);
        assert_eq!(engine.runtime_reference_count(), 1);
    }

    #[test]
    fn test_double_wrap_rejected() {
        let engine = Engine::new();
        let obj = engine.create_object();
        wrap(&engine, obj, WrapOptions::new(NativePtr::from_addr(1))).unwrap();

        assert_eq!(
            wrap(&engine, obj, WrapOptions::new(NativePtr::from_addr(2))),
            Err(ReferenceError::AlreadyWrapped)
        );
    }

    #[test]
    fn test_unwrap_plain_object() {
        let engine = Engine::new();
        let obj = engine.create_object();
        assert_eq!(unwrap(&engine, obj), Err(ReferenceError::NotWrapped));
        assert_eq!(remove_wrap(&engine, obj), Err(ReferenceError::NotWrapped));
    }

    #[test]
    fn test_add_finalizer_requires_callback() {
        let engine = Engine::new();
        let obj = engine.create_object();
        assert!(matches!(
            add_finalizer(&engine, obj, WrapOptions::new(NativePtr::null())),
            Err(ReferenceError::InvalidWrap(_))
        ));
    }

    #[test]
    fn test_wrap_async_requires_async_callback() {
        let engine = Engine::new();
        let obj = engine.create_object();
        let options = WrapOptions::new(NativePtr::null()).on_finalize(|_, _, _| {});
        assert!(matches!(
            wrap_async_finalizer(&engine, obj, options),
            Err(ReferenceError::InvalidWrap(_))
        ));
        assert_eq!(engine.reference_count(), 0);
    }
}
