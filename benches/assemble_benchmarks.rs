//! Performance benchmarks for module assembly.
//!
//! Measures the two hot paths a front-end leans on: instruction encoding
//! inside one large method body, and whole-module export with many
//! methods, signatures, and interned names.

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use ingot::prelude::*;

/// Emit a method body of `ops` arithmetic instructions over a few locals.
fn emit_body(asm: &mut MethodAssembler, ops: usize) {
    let a = asm.push_local(TypeId::I32);
    let b = asm.push_local(TypeId::I32);
    asm.set(a, ConstValue::I32(1)).unwrap();
    asm.set(b, ConstValue::I32(2)).unwrap();
    for i in 0..ops {
        match i % 4 {
            0 => asm.add(a, b).unwrap(),
            1 => asm.mul(a, ConstValue::I32(3)).unwrap(),
            2 => asm.sub(b, a).unwrap(),
            _ => asm.xor(a, b).unwrap(),
        }
    }
    asm.retv(a).unwrap();
}

fn build_module(methods: usize, ops_per_method: usize) -> Vec<u8> {
    let mut builder = ModuleBuilder::new(Some("bench.src"));
    let sig = builder.make_signature(TypeId::I32, &[]).unwrap();
    for i in 0..methods {
        let mut asm = builder
            .define_method_named(&format!("method_{i}"), sig)
            .unwrap();
        emit_body(&mut asm, ops_per_method);
        builder.finish_method(asm).unwrap();
    }
    builder.export().unwrap()
}

fn bench_instruction_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for ops in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(ops as u64));
        group.bench_function(format!("ops_{ops}"), |bencher| {
            bencher.iter(|| {
                let mut builder = ModuleBuilder::new(None);
                let sig = builder.make_signature(TypeId::I32, &[]).unwrap();
                let mut asm = builder.define_method_named("body", sig).unwrap();
                emit_body(&mut asm, black_box(ops));
                builder.finish_method(asm).unwrap();
                black_box(builder)
            });
        });
    }
    group.finish();
}

fn bench_module_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");
    for methods in [10usize, 100] {
        group.bench_function(format!("methods_{methods}"), |bencher| {
            bencher.iter(|| black_box(build_module(black_box(methods), 200)));
        });
    }
    group.finish();
}

fn bench_branch_resolution(c: &mut Criterion) {
    c.bench_function("branch_resolution_1000", |bencher| {
        bencher.iter(|| {
            let mut builder = ModuleBuilder::new(None);
            let sig = builder.make_signature(TypeId::VOID, &[]).unwrap();
            let mut asm = builder.define_method_named("hops", sig).unwrap();
            let local = asm.push_local(TypeId::I32);
            let labels: Vec<_> = (0..1_000).map(|_| asm.declare_label()).collect();
            for &label in &labels {
                asm.bnz(label, local).unwrap();
            }
            for &label in &labels {
                asm.bind_label(label).unwrap();
                asm.noop();
            }
            asm.ret().unwrap();
            builder.finish_method(asm).unwrap();
            black_box(builder.export().unwrap())
        });
    });
}

fn bench_signature_dedup(c: &mut Criterion) {
    c.bench_function("signature_dedup_10000", |bencher| {
        let shapes: Vec<Vec<TypeId>> = (0..32u32)
            .map(|i| vec![TypeId::new(i % 10); (i % 7) as usize])
            .collect();
        bencher.iter(|| {
            let mut builder = ModuleBuilder::new(None);
            for i in 0..10_000usize {
                let params = &shapes[i % shapes.len()];
                black_box(builder.make_signature(TypeId::I32, params).unwrap());
            }
            black_box(builder)
        });
    });
}

criterion_group!(
    benches,
    bench_instruction_encoding,
    bench_module_export,
    bench_branch_resolution,
    bench_signature_dedup
);
criterion_main!(benches);
