//! Benchmarks for class dispatch.
//!
//! Measures the paths a host pays for on every class load:
//! - Rejecting a class no patch targets
//! - Parsing and re-serializing a class unchanged
//! - Rewriting `JndiLookup` with the log4j patch
//! - Dispatching a batch of classes in parallel

extern crate hotpatch;

use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, Criterion};
use hotpatch::{
    assembly::{Instruction, JumpKind, MethodBody, ReturnKind},
    classfile::MethodAccessFlags,
    config::HotPatchConfig,
    dispatcher::Dispatcher,
    logger::NullLogger,
    registry::PatchRegistry,
    ClassBinary,
};

const JNDI_LOOKUP: &str = "org/apache/logging/log4j/core/lookup/JndiLookup";

/// `JndiLookup` with a null-checking `lookup` that delegates to `JndiManager`.
fn jndi_lookup_class() -> Vec<u8> {
    let mut class = ClassBinary::new(JNDI_LOOKUP, Some("java/lang/Object"), 52).unwrap();

    let mut body = MethodBody::new(3);
    let delegate = body.labels.allocate();
    body.instructions = vec![
        Instruction::aload(2),
        Instruction::Jump(JumpKind::IfNonNull, delegate),
        Instruction::LoadConstant(hotpatch::assembly::ConstantValue::Null),
        Instruction::Return(ReturnKind::Reference),
        Instruction::Label(delegate),
        Instruction::aload(2),
        Instruction::MethodCall {
            kind: hotpatch::assembly::InvokeKind::Static,
            owner: "org/apache/logging/log4j/core/net/JndiManager".to_string(),
            name: "lookup".to_string(),
            descriptor: "(Ljava/lang/String;)Ljava/lang/String;".to_string(),
            interface: false,
        },
        Instruction::Return(ReturnKind::Reference),
    ];
    class
        .add_method(
            MethodAccessFlags::PUBLIC,
            "lookup",
            "(Lorg/apache/logging/log4j/core/LogEvent;Ljava/lang/String;)Ljava/lang/String;",
            Some(&body),
        )
        .unwrap();
    class.to_bytes().unwrap()
}

fn dispatcher() -> Dispatcher {
    let patches = HotPatchConfig::default()
        .enabled_patches(&PatchRegistry::builtin())
        .unwrap();
    Dispatcher::new(patches, Arc::new(NullLogger))
}

/// Benchmark a class that no patch targets.
fn bench_untargeted(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let bytes = jndi_lookup_class();

    c.bench_function("dispatch_untargeted", |b| {
        b.iter(|| black_box(dispatcher.apply(black_box("com/example/Main"), &bytes).unwrap()));
    });
}

/// Benchmark parsing and re-serializing without changes.
fn bench_roundtrip(c: &mut Criterion) {
    let bytes = jndi_lookup_class();

    c.bench_function("classfile_roundtrip", |b| {
        b.iter(|| {
            let class = ClassBinary::parse(black_box(&bytes)).unwrap();
            black_box(class.to_bytes().unwrap())
        });
    });
}

/// Benchmark the full log4j rewrite.
fn bench_rewrite(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let bytes = jndi_lookup_class();

    c.bench_function("dispatch_jndi_lookup", |b| {
        b.iter(|| black_box(dispatcher.apply(JNDI_LOOKUP, black_box(&bytes)).unwrap()));
    });
}

/// Benchmark a batch mixing targets and bystanders.
fn bench_batch(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let bytes = jndi_lookup_class();
    let classes: Vec<(String, Vec<u8>)> = (0..64)
        .map(|i| {
            let name = if i % 8 == 0 {
                JNDI_LOOKUP.to_string()
            } else {
                format!("com/example/Class{i}")
            };
            (name, bytes.clone())
        })
        .collect();

    c.bench_function("dispatch_batch_64", |b| {
        b.iter(|| black_box(dispatcher.apply_batch(black_box(&classes))));
    });
}

criterion_group!(
    benches,
    bench_untargeted,
    bench_roundtrip,
    bench_rewrite,
    bench_batch
);
criterion_main!(benches);
