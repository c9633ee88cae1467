#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
#[cfg(not(target_arch = "wasm32"))]
use d3dfx_shader::{decode_u8_le_bytes, parse, Profile, ShaderCache, TranslateOptions};

#[cfg(not(target_arch = "wasm32"))]
fn to_bytes(tokens: &[u32]) -> Vec<u8> {
    tokens.iter().flat_map(|t| t.to_le_bytes()).collect()
}

#[cfg(not(target_arch = "wasm32"))]
fn reg(regtype: u32, index: u32) -> u32 {
    0x8000_0000 | ((regtype & 7) << 28) | ((regtype & 0x18) << 8) | index
}

/// vs_2_0 transform: m4x4 oPos, v0, c0 ; mov oT0, v1 ; mov oD0, c4
#[cfg(not(target_arch = "wasm32"))]
fn vertex_shader() -> Vec<u8> {
    to_bytes(&[
        0xFFFE_0200,
        0x0200_001F,
        0x8000_0000,
        reg(1, 0) | 0x000F_0000,
        0x0200_001F,
        0x8000_0005,
        reg(1, 1) | 0x000F_0000,
        0x0300_0014,
        reg(4, 0) | 0x000F_0000,
        reg(1, 0) | 0x00E4_0000,
        reg(2, 0) | 0x00E4_0000,
        0x0200_0001,
        reg(6, 0) | 0x000F_0000,
        reg(1, 1) | 0x00E4_0000,
        0x0200_0001,
        reg(5, 0) | 0x000F_0000,
        reg(2, 4) | 0x00E4_0000,
        0x0000_FFFF,
    ])
}

/// ps_2_0: texld r0, t0, s0 ; mad r0, r0, c0, c1 ; mov oC0, r0
#[cfg(not(target_arch = "wasm32"))]
fn pixel_shader() -> Vec<u8> {
    to_bytes(&[
        0xFFFF_0200,
        0x0200_001F,
        0x8000_0000,
        reg(3, 0) | 0x0003_0000,
        0x0200_001F,
        0x9000_0000,
        reg(10, 0) | 0x000F_0000,
        0x0300_0042,
        reg(0, 0) | 0x000F_0000,
        reg(3, 0) | 0x00E4_0000,
        reg(10, 0) | 0x00E4_0000,
        0x0400_0004,
        reg(0, 0) | 0x000F_0000,
        reg(0, 0) | 0x00E4_0000,
        reg(2, 0) | 0x00E4_0000,
        reg(2, 1) | 0x00E4_0000,
        0x0200_0001,
        reg(8, 0) | 0x000F_0000,
        reg(0, 0) | 0x00E4_0000,
        0x0000_FFFF,
    ])
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_translation(c: &mut Criterion) {
    let vs = vertex_shader();
    let ps = pixel_shader();
    let options = TranslateOptions::default();

    let mut group = c.benchmark_group("d3d9_shader_translation");

    for (name, bytes) in [("vs_2_0", &vs), ("ps_2_0", &ps)] {
        group.bench_with_input(BenchmarkId::new("decode", name), bytes, |b, bytes| {
            b.iter(|| {
                let decoded = decode_u8_le_bytes(black_box(bytes)).unwrap();
                black_box(decoded.instructions.len());
            })
        });
    }

    for profile in [Profile::Glsl, Profile::Arb1] {
        group.bench_function(BenchmarkId::new("translate", profile.name()), |b| {
            b.iter(|| {
                let vs = parse(profile, black_box(&vs), &options);
                let ps = parse(profile, black_box(&ps), &options);
                black_box(vs.output.len());
                black_box(ps.output.len());
            })
        });
    }

    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_shader_cache(c: &mut Criterion) {
    let ps = pixel_shader();
    let options = TranslateOptions::default();

    let mut group = c.benchmark_group("d3d9_shader_cache");

    let mut cache = ShaderCache::default();
    cache.get_or_translate(Profile::Glsl, &ps, &options);
    group.bench_function("lookup_hit", |b| {
        b.iter(|| {
            let lookup = cache.get_or_translate(Profile::Glsl, black_box(&ps), &options);
            black_box(lookup.source);
            black_box(lookup.output.len());
        })
    });

    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
criterion_group!(benches, bench_translation, bench_shader_cache);
#[cfg(not(target_arch = "wasm32"))]
criterion_main!(benches);
