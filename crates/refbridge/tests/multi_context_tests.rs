//! Multi-Context Tests
//!
//! Validates finalizer routing between a root engine and its secondary
//! contexts:
//! - Synchronous finalizers posted to the parent's batch
//! - Counter settlement against the originating context
//! - Deferred release of a torn-down context
//! - Async finalizers delivered through the shared root queue
//! - Runtime reference sweep during teardown
//! - Values from one engine rejected by another
//!
//! # Running Tests
//! ```bash
//! cargo test --test multi_context_tests
//! ```

use refbridge::api::{self, WrapOptions};
use refbridge::{
    Engine, EngineId, FinalizeCallback, Finalizer, NativePtr, NativeRef, Ownership,
    ReferenceError, ReferenceOptions,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Runtime-owned reference with a synchronous finalizer recording the
/// engine it ran against
fn runtime_ref(
    engine: &Engine,
    refcount: u32,
    seen: &Rc<RefCell<Vec<EngineId>>>,
) -> NativeRef {
    let obj = engine.create_object();
    let seen = Rc::clone(seen);
    let finalizer = Finalizer::new(
        FinalizeCallback::sync(move |env, _, _| seen.borrow_mut().push(env.id())),
        NativePtr::null(),
        NativePtr::null(),
    );
    engine
        .new_reference(
            obj,
            ReferenceOptions::new(refcount)
                .ownership(Ownership::Runtime)
                .finalizer(finalizer),
        )
        .unwrap()
}

// ===== Parent Batch Routing Tests =====

#[test]
fn test_context_finalizer_runs_from_parent_batch() {
    let main = Engine::new();
    let context = main.create_context().unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let r = runtime_ref(&context, 1, &seen);
    let counters = context.counters().snapshot();
    assert_eq!(counters.callbackable, 1);
    assert_eq!(counters.runtime_owned, 1);

    context.reference_unref(r).unwrap();
    context.collect_garbage();

    // The reference freed itself, the finalizer waits in the parent
    assert_eq!(context.reference_count(), 0);
    assert_eq!(context.pending_finalizers(), 0);
    assert_eq!(main.pending_finalizers(), 1);
    assert_eq!(context.counters().callbackable(), 1);
    assert_eq!(context.counters().runtime_owned(), 1);
    assert!(seen.borrow().is_empty());

    assert_eq!(main.run_pending_finalizers(), 1);

    // Ran against the context, and settled the context's counters
    assert_eq!(*seen.borrow(), vec![context.id()]);
    assert_eq!(context.counters().callbackable(), 0);
    assert_eq!(context.counters().runtime_owned(), 0);
    assert!(main.counters().is_zero());
}

#[test]
fn test_context_cannot_drain_its_own_finalizers() {
    let main = Engine::new();
    let context = main.create_context().unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));

    runtime_ref(&context, 0, &seen);
    context.collect_garbage();

    assert_eq!(context.run_pending_finalizers(), 0);
    assert!(seen.borrow().is_empty());
    assert_eq!(main.run_pending_finalizers(), 1);
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn test_user_reference_in_context_is_not_runtime_owned() {
    let main = Engine::new();
    let context = main.create_context().unwrap();
    let obj = context.create_object();
    let finalizer = Finalizer::new(
        FinalizeCallback::sync(|_, _, _| {}),
        NativePtr::null(),
        NativePtr::null(),
    );
    let r = context
        .new_reference(obj, ReferenceOptions::new(1).finalizer(finalizer))
        .unwrap();

    let counters = context.counters().snapshot();
    assert_eq!(counters.callbackable, 1);
    assert_eq!(counters.runtime_owned, 0);

    context.delete_reference(r).unwrap();
    assert!(context.counters().is_zero());
}

#[test]
fn test_runtime_owned_only_counted_for_contexts() {
    let main = Engine::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    runtime_ref(&main, 1, &seen);

    assert_eq!(main.counters().callbackable(), 1);
    assert_eq!(main.counters().runtime_owned(), 0);
}

#[test]
fn test_parent_drain_threshold_covers_context_entries() {
    let main = Engine::with_options(refbridge::EngineOptions {
        finalizer_drain_threshold: 100,
        ..Default::default()
    });
    let context = main.create_context().unwrap();
    let calls = Rc::new(Cell::new(0));

    let obj = context.create_object();
    let calls_in_cb = Rc::clone(&calls);
    let finalizer = Finalizer::new(
        FinalizeCallback::sync(move |_, _, _| calls_in_cb.set(calls_in_cb.get() + 1)),
        NativePtr::null(),
        NativePtr::null(),
    );
    context
        .new_reference(
            obj,
            ReferenceOptions::new(0)
                .finalizer(finalizer)
                .native_binding_size(512),
        )
        .unwrap();

    context.collect_garbage();

    assert_eq!(calls.get(), 1);
    assert_eq!(main.pending_finalizers(), 0);
    assert!(context.counters().is_zero());
}

// ===== Deferred Release Tests =====

#[test]
fn test_torn_down_context_released_after_last_proxy() {
    init_tracing();
    let main = Engine::new();
    let context = main.create_context().unwrap();
    let handle = context.clone();
    let id = context.id();
    let seen = Rc::new(RefCell::new(Vec::new()));

    runtime_ref(&context, 0, &seen);
    runtime_ref(&context, 0, &seen);
    context.collect_garbage();
    assert_eq!(main.pending_finalizers(), 2);

    context.destroy();

    // Still waiting on the parent batch
    assert!(handle.is_in_destructor());
    assert!(!handle.is_released());
    assert!(id.is_live());
    assert!(!handle.is_ready_to_delete());

    main.run_pending_finalizers();

    assert_eq!(*seen.borrow(), vec![id, id]);
    assert!(handle.is_released());
    assert!(!id.is_live());
}

#[test]
fn test_context_without_pending_work_released_immediately() {
    let main = Engine::new();
    let context = main.create_context().unwrap();
    let handle = context.clone();
    let seen = Rc::new(RefCell::new(Vec::new()));
    runtime_ref(&context, 1, &seen);

    context.destroy();

    // Swept inline during teardown
    assert_eq!(*seen.borrow(), vec![handle.id()]);
    assert!(handle.is_released());
    assert!(!handle.id().is_live());
    assert_eq!(main.pending_finalizers(), 0);
}

#[test]
fn test_context_user_reference_holds_release() {
    let main = Engine::new();
    let context = main.create_context().unwrap();
    let handle = context.clone();
    let obj = context.create_object();
    let r = context.new_reference(obj, ReferenceOptions::new(1)).unwrap();

    context.destroy();
    assert!(!handle.is_released());

    handle.delete_reference(r).unwrap();
    assert!(handle.is_released());
    drop(main);
}

#[test]
fn test_parent_teardown_abandons_context_entries() {
    let main = Engine::new();
    let context = main.create_context().unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));

    runtime_ref(&context, 0, &seen);
    context.collect_garbage();
    assert_eq!(context.counters().callbackable(), 1);

    main.destroy();

    // Dropped without running, the context's counters still settle
    assert!(seen.borrow().is_empty());
    assert!(context.counters().is_zero());
    assert!(!context.is_released());
}

#[test]
fn test_parent_teardown_releases_deferred_context() {
    init_tracing();
    let main = Engine::new();
    let context = main.create_context().unwrap();
    let handle = context.clone();
    let seen = Rc::new(RefCell::new(Vec::new()));

    runtime_ref(&context, 0, &seen);
    context.collect_garbage();
    context.destroy();
    assert!(!handle.is_released());

    main.destroy();

    assert!(seen.borrow().is_empty());
    assert!(handle.is_released());
}

#[test]
fn test_finalizer_dropped_once_parent_is_gone() {
    init_tracing();
    let main = Engine::new();
    let context = main.create_context().unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    runtime_ref(&context, 0, &seen);

    drop(main);
    assert!(context.parent().is_none());

    context.collect_garbage();

    assert!(seen.borrow().is_empty());
    assert_eq!(context.reference_count(), 0);
    assert!(context.counters().is_zero());
}

// ===== Async Queue Tests =====

#[test]
fn test_context_async_finalizer_outlives_context() {
    let main = Engine::new();
    let context = main.create_context().unwrap();
    let handle = context.clone();
    let calls = Arc::new(AtomicUsize::new(0));

    let obj = context.create_object();
    let calls_in_cb = Arc::clone(&calls);
    let finalizer = Finalizer::new(
        FinalizeCallback::asynchronous(move |data, _| {
            assert_eq!(data.addr(), 0xabc);
            calls_in_cb.fetch_add(1, Ordering::SeqCst);
        }),
        NativePtr::from_addr(0xabc),
        NativePtr::null(),
    );
    context
        .new_reference(
            obj,
            ReferenceOptions::new(0)
                .ownership(Ownership::Runtime)
                .finalizer(finalizer),
        )
        .unwrap();

    context.collect_garbage();
    context.destroy();

    // Async references never hold a context back
    assert!(handle.is_released());

    let queue = main.async_finalizer_queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.drain(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ===== Engine Ownership Tests =====

#[test]
fn test_main_value_rejected_by_context() {
    let main = Engine::new();
    let context = main.create_context().unwrap();
    let main_obj = main.create_object();
    let ctx_obj = context.create_object();

    // Same slot in two different heaps
    assert_eq!(main_obj.index(), ctx_obj.index());
    assert_eq!(main_obj.generation(), ctx_obj.generation());
    assert_ne!(main_obj, ctx_obj);

    let foreign = ReferenceError::ForeignEngine {
        owner: main.id(),
        engine: context.id(),
    };
    assert_eq!(
        context
            .new_reference(main_obj, ReferenceOptions::new(1))
            .unwrap_err(),
        foreign
    );
    assert_eq!(context.link(ctx_obj, main_obj).unwrap_err(), foreign);
    assert_eq!(context.add_root(main_obj).unwrap_err(), foreign);
    assert_eq!(
        api::wrap(&context, main_obj, WrapOptions::new(NativePtr::from_addr(1))).unwrap_err(),
        foreign
    );
    assert_eq!(api::unwrap(&context, main_obj).unwrap_err(), foreign);
    assert_eq!(context.reference_count(), 0);

    // Nothing leaked onto the context's own object
    assert_eq!(api::unwrap(&context, ctx_obj), Err(ReferenceError::NotWrapped));
    let r = context
        .new_reference(ctx_obj, ReferenceOptions::new(0))
        .unwrap();
    context.collect_garbage();
    assert_eq!(context.get_reference_value(r).unwrap(), None);

    // The main engine's object was never touched
    assert!(main.is_alive(main_obj));
    assert_eq!(api::unwrap(&main, main_obj), Err(ReferenceError::NotWrapped));
}

// ===== Teardown Sweep Tests =====

#[test]
fn test_teardown_sweeps_runtime_references() {
    let engine = Engine::new();
    let remaining = Rc::new(RefCell::new(Vec::new()));

    for _ in 0..3 {
        let obj = engine.create_object();
        let remaining = Rc::clone(&remaining);
        let finalizer = Finalizer::new(
            FinalizeCallback::sync(move |env, _, _| {
                remaining.borrow_mut().push(env.runtime_reference_count());
            }),
            NativePtr::null(),
            NativePtr::null(),
        );
        engine
            .new_reference(
                obj,
                ReferenceOptions::new(1)
                    .ownership(Ownership::Runtime)
                    .finalizer(finalizer),
            )
            .unwrap();
    }
    // User references are left alone by the sweep
    let user_obj = engine.create_object();
    engine
        .new_reference(user_obj, ReferenceOptions::new(1))
        .unwrap();

    engine.destroy();

    assert_eq!(*remaining.borrow(), vec![2, 1, 0]);
}

#[test]
fn test_teardown_drops_pending_batch() {
    let engine = Engine::new();
    let handle = engine.clone();
    let seen = Rc::new(RefCell::new(Vec::new()));

    runtime_ref(&engine, 0, &seen);
    engine.collect_garbage();
    assert_eq!(handle.pending_finalizers(), 1);

    engine.destroy();

    assert!(seen.borrow().is_empty());
    assert!(handle.is_released());
    assert!(handle.counters().is_zero());
}
