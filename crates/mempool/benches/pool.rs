use criterion::{criterion_group, criterion_main, Criterion};
use mempool::{Pool, PoolConfig};

fn bench_alloc_free(c: &mut Criterion) {
    let pool = Pool::new(PoolConfig::new(64, 4096)).unwrap();

    c.bench_function("pool_alloc_free", |b| {
        b.iter(|| {
            let ptr = pool.allocate().unwrap();
            unsafe { pool.deallocate(ptr) };
        })
    });

    c.bench_function("pool_alloc_free_batch_64", |b| {
        b.iter(|| {
            let ptrs: Vec<_> = (0..64).map(|_| pool.allocate().unwrap()).collect();
            for ptr in ptrs {
                unsafe { pool.deallocate(ptr) };
            }
        })
    });
}

criterion_group!(benches, bench_alloc_free);
criterion_main!(benches);
