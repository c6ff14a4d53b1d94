//! Profiling hot-path benchmarks.
//!
//! The interpreter calls into a profile on every profiled invoke and every
//! block entry, so both paths must stay close to a handful of atomic loads.
//!
//! # Benchmark Categories
//!
//! 1. **Inline cache hits**: receiver already cached, by slot position
//! 2. **Inline cache misses**: megamorphic site, all slots scanned
//! 3. **Block counters**: lookup plus increment, by block count
//! 4. **Analysis**: one-time call-site and block discovery

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use prism_bytecode::{CodeBuilder, CodeItem, IfCond, InvokeKind};
use prism_jit::gc::NoopWriteBarrier;
use prism_jit::profile::{BlockAnalyzer, MethodProfile};
use prism_jit::runtime::{
    ClassRef, CodeCacheConfig, CopiedMethodTable, JitCodeCache, MethodId, MethodInfo,
};
use std::sync::Arc;

// =============================================================================
// Benchmark Helpers
// =============================================================================

/// Method with `sites` virtual calls, each followed by a conditional branch.
fn method_with_sites(sites: usize) -> Arc<CodeItem> {
    let mut b = CodeBuilder::new(2);
    for i in 0..sites {
        let skip = b.create_label();
        b.invoke(InvokeKind::Virtual, i as u16, &[0]);
        b.if_testz(IfCond::Eq, 1, skip);
        b.nop();
        b.bind_label(skip);
    }
    b.return_void();
    Arc::new(b.finish().expect("benchmark method assembles"))
}

fn profile_for(sites: usize) -> Arc<MethodProfile> {
    let cache = JitCodeCache::new(CodeCacheConfig::production());
    let method = MethodInfo::new(MethodId(1), class(1), method_with_sites(sites));
    MethodProfile::create(&cache, &CopiedMethodTable::new(), &method, false)
        .expect("profile allocates")
}

fn class(raw: u32) -> ClassRef {
    ClassRef::new(raw).expect("non-zero class id")
}

// =============================================================================
// Inline Cache Benchmarks
// =============================================================================

fn bench_inline_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("inline_cache");
    group.throughput(Throughput::Elements(1));

    let profile = profile_for(1);
    let site = profile.inline_caches()[0].dex_pc();
    for raw in 1..=4 {
        profile.add_invoke_info(site, class(raw), &NoopWriteBarrier);
    }

    for slot in [0u32, 3] {
        group.bench_with_input(BenchmarkId::new("hit", slot), &slot, |b, &slot| {
            let receiver = class(slot + 1);
            b.iter(|| {
                profile.add_invoke_info(black_box(site), black_box(receiver), &NoopWriteBarrier)
            })
        });
    }

    group.bench_function("megamorphic_miss", |b| {
        b.iter(|| profile.add_invoke_info(black_box(site), black_box(class(99)), &NoopWriteBarrier))
    });

    group.finish();
}

// =============================================================================
// Block Counter Benchmarks
// =============================================================================

fn bench_block_counts(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_count");
    group.throughput(Throughput::Elements(1));

    for sites in [1usize, 16, 64] {
        let profile = profile_for(sites);
        let last = profile.block_counts().last().map(|b| b.dex_pc()).unwrap_or(0);
        let id = BenchmarkId::new("increment_last", profile.block_counts().len());
        group.bench_with_input(id, &last, |b, &pc| {
            b.iter(|| profile.increment_block_count(black_box(pc)))
        });
    }

    group.finish();
}

// =============================================================================
// Analysis Benchmarks
// =============================================================================

fn bench_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("analysis");

    for sites in [4usize, 64] {
        let code = method_with_sites(sites);
        group.throughput(Throughput::Elements(code.insns_size_in_code_units() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(sites), &code, |b, code| {
            b.iter(|| BlockAnalyzer::analyze(black_box(code)))
        });
    }

    group.finish();
}

// =============================================================================
// Criterion Groups
// =============================================================================

criterion_group!(profiling_benches, bench_inline_cache, bench_block_counts, bench_analysis);

criterion_main!(profiling_benches);
