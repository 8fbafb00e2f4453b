use criterion::{criterion_group, criterion_main, Criterion};
use teecrypt_core::tee::{Algorithm, CipherContext, KeySize, Mode, SecureSession, SimulatedTrustedApp, SERVICE_UUID};
use teecrypt_core::{CipherPipeline, TransformKind};

fn bench_transform(c: &mut Criterion) {
    let mut session = SecureSession::open(SimulatedTrustedApp::new(), SERVICE_UUID).unwrap();
    let mut ctx = CipherContext::new();
    ctx.prepare(&mut session, Algorithm::Ctr, KeySize::Aes128, Mode::Encode)
        .unwrap();
    ctx.set_key(&mut session, &[0xa5; 16]).unwrap();
    ctx.set_iv(&mut session, &[0u8; 16]).unwrap();
    let pipeline = CipherPipeline::new(TransformKind::Data);

    let block = vec![0x5au8; 128];
    c.bench_function("transform_128b", |b| {
        b.iter(|| pipeline.transform(&mut session, &ctx, &block).unwrap())
    });

    let large = vec![0x5au8; 64 * 1024];
    c.bench_function("transform_64k", |b| {
        b.iter(|| pipeline.transform(&mut session, &ctx, &large).unwrap())
    });

    c.bench_function("prepare_key_iv", |b| {
        b.iter(|| {
            let mut ctx = CipherContext::new();
            ctx.prepare(&mut session, Algorithm::Ctr, KeySize::Aes128, Mode::Decode)
                .unwrap();
            ctx.set_key(&mut session, &[0xa5; 16]).unwrap();
            ctx.set_iv(&mut session, &[0u8; 16]).unwrap();
        })
    });
}

criterion_group!(benches, bench_transform);
criterion_main!(benches);
