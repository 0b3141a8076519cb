use image::{GrayImage, RgbImage};
use log::LevelFilter;
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};
use ndarray::{parallel::prelude::*, prelude::*, Zip};

use ndarray_stats::QuantileExt;
use nshare::ToNdarray3;

/// 初始化控制台日志, level: "trace" | "debug" | 其他(info)
pub fn init_log(level: &str) {
    let stdout: ConsoleAppender = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} [{h({l})}] - {m}{n}",
        )))
        .build();
    let log_config = log4rs::config::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(
            Root::builder()
                .appender("stdout")
                .build(if level == "trace" {
                    LevelFilter::Trace
                } else if level == "debug" {
                    LevelFilter::Debug
                } else {
                    LevelFilter::Info
                }),
        );
    // 重复初始化时忽略
    if let Ok(config) = log_config {
        let _ = log4rs::init_config(config);
    }
}

/// 将彩色图转换为 (H x W x C) 三维数组
pub fn to_ndarray(source: &RgbImage) -> Array3<u8> {
    let mut source_nd = source.clone().into_ndarray3();
    source_nd.swap_axes(0, 1);
    source_nd.swap_axes(1, 2);
    source_nd.as_standard_layout().into_owned()
}

/// 将彩色数组(H x W x C)转换为灰度二维数组
pub fn to_grayimage(source: &ArrayView3<u8>) -> Array2<u8> {
    let (height, width, _) = source.dim();
    let mut ret = Array2::<u8>::zeros((height, width));
    Zip::indexed(&mut ret).par_for_each(|(y, x), val| {
        // pixel[0] = r, pixel[1] = g, pixel[2] = b
        let pixel = source.slice(s![y, x, ..]);
        let v = (pixel[0] as f32 * 0.299f32
            + pixel[1] as f32 * 0.587f32
            + pixel[2] as f32 * 0.114f32)
            .round() as u8;
        *val = v
    });
    ret
}

/// 像素距离(各通道差值绝对值的最大值)
pub fn pixel_distance(p1: &ArrayView1<u8>, p2: &ArrayView1<u8>) -> i32 {
    p1.iter()
        .zip(p2.iter())
        .map(|(a, b)| (*a as i32 - *b as i32).abs())
        .max()
        .unwrap_or(0)
}

/// 像素颜色欧氏距离
pub fn color_distance(p1: &ArrayView1<u8>, p2: &ArrayView1<u8>) -> f32 {
    p1.iter()
        .zip(p2.iter())
        .map(|(a, b)| {
            let d = *a as f32 - *b as f32;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

/// 将浮点二维数组按最小值-最大值线性拉伸为灰度图, NaN 记为 0
pub fn to_disparity_image(source: &ArrayView2<f32>) -> Option<GrayImage> {
    let (height, width) = source.dim();
    let mut abs_source = Array2::<f32>::zeros((height, width));

    par_azip!((
    r in &mut abs_source, s in source){
        if s.is_nan() {
            *r = 0f32;
        } else {
            *r = s.abs();
        }
    });
    let disparity_min = *abs_source.min().ok()?;
    let d = *abs_source.max().ok()? - disparity_min;
    let mut ret = Array2::<u8>::zeros((height, width));
    if d > 0f32 {
        par_azip!((
        r in &mut ret, s in abs_source.view()){
            let val = (s - disparity_min) / d * 255f32;
            *r = val as u8;
        });
    }
    GrayImage::from_raw(width as u32, height as u32, ret.into_raw_vec())
}
