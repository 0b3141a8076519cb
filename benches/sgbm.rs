extern crate image;
use disparity_filter::core::*;
use disparity_filter::{PipelineOption, StereoPipeline, StereoSgbm};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use image::{Rgb, RgbImage};

fn texture(x: i64, y: i64) -> u8 {
    let mut h = (x.wrapping_mul(374761393) ^ y.wrapping_mul(668265263)) as u64;
    h = (h ^ (h >> 13)).wrapping_mul(1274126177);
    (h >> 24) as u8
}

fn synthetic_pair(width: u32, height: u32, shift: i64) -> (RgbImage, RgbImage) {
    let left = RgbImage::from_fn(width, height, |x, y| {
        let v = texture(x as i64 / 2, y as i64 / 2);
        Rgb([v, v / 2 + 64, 255 - v])
    });
    let right = RgbImage::from_fn(width, height, |x, y| {
        let v = texture((x as i64 + shift) / 2, y as i64 / 2);
        Rgb([v, v / 2 + 64, 255 - v])
    });
    (left, right)
}

pub fn sgbm_matching_bench(c: &mut Criterion) {
    let (limg, rimg) = synthetic_pair(320, 240, 12);
    let option = SgbmOption::new(0, 64, 3)
        .set_paths(AggregationPaths::Four)
        .build();
    let stereo = StereoSgbm::new(option).unwrap();
    c.bench_function("sgbm match bench", |b| {
        b.iter(|| stereo.compute(black_box(&limg), black_box(&rimg)).unwrap())
    });
}

pub fn pipeline_bench(c: &mut Criterion) {
    let (limg, rimg) = synthetic_pair(320, 240, 12);
    let pipeline = StereoPipeline::new(PipelineOption::new(FilterMode::WlsConf));
    c.bench_function("wls_conf pipeline bench", |b| {
        b.iter(|| pipeline.run(black_box(&limg), black_box(&rimg)).unwrap())
    });
}

criterion_group!(benches, sgbm_matching_bench, pipeline_bench);
criterion_main!(benches);
