use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use refbridge::{
    Engine, FinalizeCallback, Finalizer, NativePtr, Ownership, ReferenceOptions,
};

fn bench_create_delete(c: &mut Criterion) {
    let engine = Engine::new();
    let obj = engine.create_object();
    engine.add_root(obj).unwrap();

    c.bench_function("create_delete_reference", |b| {
        b.iter(|| {
            let r = engine
                .new_reference(black_box(obj), ReferenceOptions::new(1))
                .unwrap();
            engine.delete_reference(r).unwrap();
        });
    });
}

fn bench_ref_unref(c: &mut Criterion) {
    let engine = Engine::new();
    let obj = engine.create_object();
    let r = engine.new_reference(obj, ReferenceOptions::new(0)).unwrap();

    c.bench_function("ref_unref_transition", |b| {
        b.iter(|| {
            engine.reference_ref(black_box(r)).unwrap();
            engine.reference_unref(black_box(r)).unwrap();
        });
    });
}

fn bench_collect_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("collect_and_drain");

    for count in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("runtime_refs", count), &count, |b, &count| {
            b.iter(|| {
                let engine = Engine::new();
                for _ in 0..count {
                    let obj = engine.create_object();
                    let finalizer = Finalizer::new(
                        FinalizeCallback::sync(|_, data, _| {
                            black_box(data);
                        }),
                        NativePtr::null(),
                        NativePtr::null(),
                    );
                    engine
                        .new_reference(
                            obj,
                            ReferenceOptions::new(0)
                                .ownership(Ownership::Runtime)
                                .finalizer(finalizer),
                        )
                        .unwrap();
                }
                engine.collect_garbage();
                engine.run_pending_finalizers()
            });
        });
    }

    group.finish();
}

fn bench_teardown_sweep(c: &mut Criterion) {
    c.bench_function("teardown_sweep_1000", |b| {
        b.iter(|| {
            let engine = Engine::new();
            for _ in 0..1_000 {
                let obj = engine.create_object();
                engine
                    .new_reference(obj, ReferenceOptions::new(1).ownership(Ownership::Runtime))
                    .unwrap();
            }
            engine.destroy();
        });
    });
}

criterion_group!(
    benches,
    bench_create_delete,
    bench_ref_unref,
    bench_collect_and_drain,
    bench_teardown_sweep
);
criterion_main!(benches);
