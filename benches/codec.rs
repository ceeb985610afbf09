use criterion::{Criterion, black_box, criterion_group, criterion_main};
use regolith::codec::{self, Profile};
use regolith::{Module, parse_bytes};

fn module(n: usize) -> Module {
    let mut source = String::from("package bench\nimport data.limits\n");
    for i in 0..n {
        source.push_str(&format!(
            "r{i}[x] {{\n    x := input.items[_]\n    x.size > limits.min\n    not x.hidden\n}}\n"
        ));
    }
    parse_bytes("bench.rego", source.as_bytes()).unwrap()
}

fn profiles() -> Vec<Profile> {
    let mut profiles = vec![Profile::Portable];
    if cfg!(feature = "binary-codec") {
        profiles.push(Profile::FullFidelity);
    }
    profiles
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for &n in &[10, 100] {
        let module = module(n);
        for profile in profiles() {
            group.bench_function(format!("{profile}_{n}_rules"), |b| {
                b.iter(|| codec::encode(black_box(&module), profile).unwrap());
            });
        }
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for &n in &[10, 100] {
        let module = module(n);
        for profile in profiles() {
            let bytes = codec::encode(&module, profile).unwrap();
            group.bench_function(format!("{profile}_{n}_rules"), |b| {
                b.iter(|| codec::decode(black_box(&bytes), profile).unwrap());
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
