use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array1;
use tgp::kernels::KernelSpec;
use tgp::mean_models::MeanSpec;
use tgp::{Hypers, ProcessParams, Request};

fn params(n: usize) -> ProcessParams {
    ProcessParams::new(
        MeanSpec::Constant,
        KernelSpec::Matern52 { dim: 1, ard: false },
    )
    .space(Array1::linspace(0., 10., n))
    .seed(0)
}

fn observations(n: usize) -> (Array1<f64>, Array1<f64>) {
    let x = Array1::linspace(0.5, 9.5, n);
    let y = x.mapv(|v| (v * 0.7).sin() + 0.1 * v);
    (x, y)
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    group.sample_size(20);
    group.bench_function("gaussian", |b| {
        b.iter(|| black_box(params(50).build().unwrap()));
    });
    group.finish();
}

fn bench_predict(c: &mut Criterion) {
    let mut group = c.benchmark_group("predict");
    for size in [10, 50, 100] {
        let mut gp = params(size).build().unwrap();
        let (x, y) = observations(size / 2);
        gp.observed(x, y).unwrap();
        let request = Request::new().quantiles(true);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(gp.predict(None, None, &request).unwrap()));
        });
    }
    group.finish();
}

fn bench_logp(c: &mut Criterion) {
    let mut group = c.benchmark_group("logp");
    let mut gp = params(10).build().unwrap();
    let (x, y) = observations(40);
    gp.observed(x, y).unwrap();
    let hypers = Hypers::new().with("gp_matern52_ls", 2.);
    group.bench_function("40 points", |b| {
        b.iter(|| black_box(gp.logp(Some(&hypers)).unwrap()));
    });
    group.finish();
}

criterion_group!(benches, bench_compile, bench_predict, bench_logp);
criterion_main!(benches);
