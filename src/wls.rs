//! # 视差图加权最小二乘(WLS)滤波
//!
//! 求解: min_u  Σ c_p (u_p - d_p)^2 + λ Σ w_pq (u_p - u_q)^2
//! 其中 c 为置信度, w 为引导图颜色相似度权重 exp(-‖g_p - g_q‖ / σ).
//! 不直接求解全局线性方程, 而是使用快速全局平滑(FGS): 交替进行水平/竖直方向的一维三对角求解,
//! 结果 = FGS(c * d) / FGS(c).

extern crate image;

use image::RgbImage;

use crate::core::{
    to_fixed, ConfidenceMap, DisparityMap, DisparityResult, FilterMode, Rect, WlsOption,
    DISP_SCALE, INVALID_DISP,
};
use crate::error::{self, Error, Result};
use crate::utils::{color_distance, to_ndarray};

use getset::{CopyGetters, Getters, MutGetters, Setters};
use ndarray::{parallel::prelude::*, prelude::*, Zip};

use log::{debug, trace};

/// FGS 分母小于该值时视为没有可信的邻域, 结果记为无效
const MIN_WEIGHT: f32 = 1e-4;

/// ## 左右一致性置信度
/// 左视差 dl 在右图中的对应像素 xr = x - dl, 右视差为 dr (不大于0):
///     conf = clamp(1 - |dl + dr| / threshold, 0, 1)
/// 左视差无效, 对应像素越界或右视差无效时置信度为 0
pub fn lrc_confidence(left: &DisparityMap, right: &DisparityMap, threshold: f32) -> Array2<f32> {
    let (height, width) = left.dim();
    let mut ret = Array2::<f32>::zeros((height, width));
    let (left_view, right_view) = (left.view(), right.view());
    let scale = DISP_SCALE as f32;
    Zip::indexed(&mut ret).par_for_each(|(y, x), conf| {
        let dl = left_view[[y, x]];
        if dl == INVALID_DISP {
            return;
        }
        let dl = dl as f32 / scale;
        let xr = (x as f32 - dl).round();
        if xr < 0f32 || xr >= width as f32 {
            return;
        }
        let dr = right_view[[y, xr as usize]];
        if dr == INVALID_DISP {
            return;
        }
        let dist = (dl + dr as f32 / scale).abs();
        *conf = if threshold > 0f32 {
            (1f32 - dist / threshold).max(0f32).min(1f32)
        } else if dist == 0f32 {
            1f32
        } else {
            0f32
        };
    });
    ret
}

/// ## 合并置信度
/// ```text
/// conf = 255 * lrc * ((1 - weight) + weight * sharpness)
/// ```
pub fn merge_confidence(
    lrc: &ArrayView2<f32>,
    sharpness: &ArrayView2<f32>,
    weight: f32,
) -> ConfidenceMap {
    let mut ret = Array2::<u8>::zeros(lrc.dim());
    par_azip!((c in &mut ret, l in lrc, s in sharpness) {
        let v = 255f32 * l * ((1f32 - weight) + weight * s.max(0f32).min(1f32));
        *c = v.round().max(0f32).min(255f32) as u8;
    });
    ConfidenceMap::from_array(ret)
}

/// ## 无置信度模式下的置信度
/// ROI 内有效视差为 255; 在 radius 邻域内视差极差超过 threshold(像素)的深度不连续区置为 0,
/// 由颜色相近的邻域像素填充
pub fn discontinuity_confidence(
    disparity: &DisparityMap,
    roi: &Rect,
    radius: usize,
    threshold: f32,
) -> ConfidenceMap {
    let (height, width) = disparity.dim();
    let data = disparity.view();
    let mut ret = Array2::<u8>::zeros((height, width));
    let threshold = threshold * DISP_SCALE as f32;
    Zip::indexed(&mut ret).par_for_each(|(y, x), conf| {
        if !roi.contains(x, y) || data[[y, x]] == INVALID_DISP {
            return;
        }
        if radius > 0 {
            let window = data.slice(s![
                y.saturating_sub(radius)..(y + radius + 1).min(height),
                x.saturating_sub(radius)..(x + radius + 1).min(width)
            ]);
            let (lo, hi) = window
                .iter()
                .filter(|v| **v != INVALID_DISP)
                .fold((i16::MAX, i16::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
            if (hi as f32 - lo as f32) > threshold {
                return;
            }
        }
        *conf = 255u8;
    });
    ConfidenceMap::from_array(ret)
}

/// 一维三对角求解 (I + λL) u = f, 结果写回 values
/// weights[i] 为 i 与 i+1 之间的权重
fn solve_tridiagonal(values: &mut ArrayViewMut1<f32>, weights: &ArrayView1<f32>, lambda: f32) {
    let n = values.len();
    if n < 2 {
        return;
    }
    let mut c_prime = vec![0f32; n];
    let mut d_prime = vec![0f32; n];
    let lower = |i: usize| if i > 0 { -lambda * weights[i - 1] } else { 0f32 };
    let upper = |i: usize| if i + 1 < n { -lambda * weights[i] } else { 0f32 };
    let diag = |i: usize| 1f32 - lower(i) - upper(i);

    c_prime[0] = upper(0) / diag(0);
    d_prime[0] = values[0] / diag(0);
    for i in 1..n {
        let m = diag(i) - lower(i) * c_prime[i - 1];
        c_prime[i] = upper(i) / m;
        d_prime[i] = (values[i] - lower(i) * d_prime[i - 1]) / m;
    }
    values[n - 1] = d_prime[n - 1];
    for i in (0..n - 1).rev() {
        values[i] = d_prime[i] - c_prime[i] * values[i + 1];
    }
}

/// 快速全局平滑
#[derive(Getters, Setters, MutGetters, CopyGetters, Copy, Clone, Debug)]
pub struct FastGlobalSmoother {
    #[getset(get = "pub", set = "pub")]
    lambda: f32,
    #[getset(get = "pub", set = "pub")]
    sigma_color: f32,
    #[getset(get = "pub", set = "pub")]
    num_iter: usize,
}

impl FastGlobalSmoother {
    pub fn new(lambda: f32, sigma_color: f32, num_iter: usize) -> Self {
        Self {
            lambda,
            sigma_color,
            num_iter: num_iter.max(1),
        }
    }
    /// 相邻像素颜色相似度权重: 水平 (H x W, 第 x 列为 x 与 x+1 之间), 竖直 (H x W, 第 y 行为 y 与 y+1 之间)
    fn edge_weights(&self, guide: &ArrayView3<u8>) -> (Array2<f32>, Array2<f32>) {
        let (height, width, _) = guide.dim();
        let sigma = self.sigma_color;
        let mut horizontal = Array2::<f32>::zeros((height, width));
        let mut vertical = Array2::<f32>::zeros((height, width));
        Zip::indexed(&mut horizontal)
            .and(&mut vertical)
            .par_for_each(|(y, x), h, v| {
                let pixel = guide.slice(s![y, x, ..]);
                if x + 1 < width {
                    let next = guide.slice(s![y, x + 1, ..]);
                    *h = (-color_distance(&pixel, &next) / sigma).exp();
                }
                if y + 1 < height {
                    let next = guide.slice(s![y + 1, x, ..]);
                    *v = (-color_distance(&pixel, &next) / sigma).exp();
                }
            });
        (horizontal, vertical)
    }
    /// 第 t 次迭代(从1开始)的 λ: 1.5 * λ * 4^(N-t) / (4^N - 1)
    fn lambda_at(&self, t: usize) -> f32 {
        let n = self.num_iter as i32;
        1.5f32 * self.lambda * 4f32.powi(n - t as i32) / (4f32.powi(n) - 1f32)
    }
    /// ## 平滑
    /// ### 参数
    /// * guide: 引导图 (H x W x C)
    /// * sources: 待平滑的若干张二维数组, 共用同一组权重
    pub fn filter(&self, guide: &ArrayView3<u8>, sources: &mut [Array2<f32>]) {
        let (horizontal, vertical) = self.edge_weights(guide);
        for t in 1..=self.num_iter {
            let lambda = self.lambda_at(t);
            for source in sources.iter_mut() {
                // 水平方向
                Zip::from(source.axis_iter_mut(Axis(0)))
                    .and(horizontal.axis_iter(Axis(0)))
                    .par_for_each(|mut row, w| solve_tridiagonal(&mut row, &w, lambda));
                // 竖直方向: x/y 轴交换后按行求解
                let mut transposed = source.view_mut();
                transposed.swap_axes(0, 1);
                let mut weights = vertical.view();
                weights.swap_axes(0, 1);
                Zip::from(transposed.axis_iter_mut(Axis(0)))
                    .and(weights.axis_iter(Axis(0)))
                    .par_for_each(|mut col, w| solve_tridiagonal(&mut col, &w, lambda));
            }
            trace!("    [fgs] iteration {} end. lambda: {}", t, lambda);
        }
    }
}

/// 滤波输入
#[derive(Clone, Copy, Debug)]
pub enum FilterInput<'a> {
    /// 左视差(含代价尖锐度)与右视差, 用于置信度引导模式
    Pair {
        left: &'a DisparityResult,
        right: &'a DisparityMap,
        roi: Rect,
    },
    /// 单张视差图, 用于无置信度模式
    Single { disparity: &'a DisparityMap, roi: Rect },
}

/// 滤波输出
#[derive(Getters, Setters, MutGetters, CopyGetters, Clone, Debug)]
pub struct FilterOutput {
    /// 平滑后的视差图, ROI 外为无效值
    #[getset(get = "pub")]
    disparity: DisparityMap,
    /// 置信度引导模式下使用的置信度图
    #[getset(get = "pub")]
    confidence: Option<ConfidenceMap>,
}

impl FilterOutput {
    pub fn into_parts(self) -> (DisparityMap, Option<ConfidenceMap>) {
        (self.disparity, self.confidence)
    }
}

/// 视差图 WLS 滤波器, 模式在构造时确定
#[derive(Getters, Setters, MutGetters, CopyGetters, Clone, Debug)]
pub struct DisparityWlsFilter {
    #[getset(get = "pub")]
    mode: FilterMode,
    #[getset(get = "pub", set = "pub")]
    option: WlsOption,
}

impl DisparityWlsFilter {
    pub fn new(mode: FilterMode, option: WlsOption) -> Result<Self> {
        option.validate()?;
        Ok(Self { mode, option })
    }
    /// ## 滤波
    /// ### 参数
    /// * input: 与滤波模式对应的输入
    /// * guide: 彩色引导图(左图), 尺寸必须与视差图一致
    pub fn filter(&self, input: FilterInput, guide: &RgbImage) -> Result<FilterOutput> {
        self.option.validate()?;
        if guide.width() == 0 || guide.height() == 0 {
            return Err(Error::empty_input(1001, error::ERROR_1001));
        }
        let guide_dim = (guide.height() as usize, guide.width() as usize);
        let mut sw = stopwatch::Stopwatch::start_new();
        let (disparity, confidence, roi) = match (self.mode, input) {
            (FilterMode::WlsConf, FilterInput::Pair { left, right, roi }) => {
                if left.disparity().dim() != guide_dim
                    || right.dim() != guide_dim
                    || left.sharpness().dim() != guide_dim
                {
                    return Err(Error::invalid_parameter(1006, error::ERROR_1006));
                }
                let lrc = lrc_confidence(left.disparity(), right, *self.option.lrc_threshold());
                let confidence = merge_confidence(
                    &lrc.view(),
                    &left.sharpness().view(),
                    *self.option.sharpness_weight(),
                );
                (left.disparity(), confidence, roi)
            }
            (FilterMode::WlsNoConf, FilterInput::Single { disparity, roi }) => {
                if disparity.dim() != guide_dim {
                    return Err(Error::invalid_parameter(1006, error::ERROR_1006));
                }
                let confidence = discontinuity_confidence(
                    disparity,
                    &roi,
                    *self.option.depth_discontinuity_radius(),
                    *self.option.depth_discontinuity_threshold(),
                );
                (disparity, confidence, roi)
            }
            _ => return Err(Error::invalid_parameter(1009, error::ERROR_1009)),
        };
        debug!(
            "[wls] confidence end. mode: {:?}, roi: {:?}, elapse time: {}ms",
            self.mode,
            roi,
            sw.elapsed_ms()
        );

        sw.restart();
        let filtered = self.smooth(disparity, &confidence, &roi, guide);
        debug!(
            "[wls] smoothing end. valid: {}, elapse time: {}ms",
            filtered.valid_count(),
            sw.elapsed_ms()
        );
        Ok(FilterOutput {
            disparity: filtered,
            confidence: match self.mode {
                FilterMode::WlsConf => Some(confidence),
                FilterMode::WlsNoConf => None,
            },
        })
    }
    /// ROI 内置信度加权平滑, ROI 外为无效值
    fn smooth(
        &self,
        disparity: &DisparityMap,
        confidence: &ConfidenceMap,
        roi: &Rect,
        guide: &RgbImage,
    ) -> DisparityMap {
        let (height, width) = disparity.dim();
        let mut ret = DisparityMap::new(width, height);
        let (rows, cols) = match roi.clip(width as u32, height as u32).ranges() {
            Some(v) => v,
            None => {
                debug!("[wls] empty roi: {:?}", roi);
                return ret;
            }
        };

        let guide_nd = to_ndarray(guide);
        let guide_roi = guide_nd.slice(s![rows.clone(), cols.clone(), ..]);
        let weights = confidence
            .to_weights()
            .slice(s![rows.clone(), cols.clone()])
            .to_owned();
        let pixels = disparity.to_pixels();
        let mut numerator = Array2::<f32>::zeros(weights.dim());
        par_azip!((n in &mut numerator, w in &weights, d in &pixels.slice(s![rows.clone(), cols.clone()])) {
            *n = if d.is_nan() { 0f32 } else { w * d };
        });
        let mut sources = [numerator, weights];
        FastGlobalSmoother::new(
            *self.option.lambda(),
            *self.option.sigma_color(),
            *self.option.num_iter(),
        )
        .filter(&guide_roi, &mut sources);

        let [numerator, denominator] = sources;
        let mut target = ret.data_mut().slice_mut(s![rows, cols]);
        par_azip!((t in &mut target, n in &numerator, w in &denominator) {
            *t = if *w > MIN_WEIGHT { to_fixed(n / w) } else { INVALID_DISP };
        });
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn constant_map(width: usize, height: usize, d: f32) -> DisparityMap {
        DisparityMap::from_pixels(&Array2::<f32>::from_elem((height, width), d).view())
    }

    /// 相邻像素差值的均方
    fn gradient_energy(map: &DisparityMap) -> f32 {
        let px = map.to_pixels();
        let (height, width) = px.dim();
        let mut total = 0f32;
        let mut count = 0f32;
        for y in 0..height {
            for x in 0..width {
                if x + 1 < width {
                    total += (px[[y, x + 1]] - px[[y, x]]).powi(2);
                    count += 1f32;
                }
                if y + 1 < height {
                    total += (px[[y + 1, x]] - px[[y, x]]).powi(2);
                    count += 1f32;
                }
            }
        }
        total / count
    }

    #[test]
    fn test_solve_tridiagonal_constant() {
        let mut values = Array1::<f32>::from_elem(6, 3f32);
        let weights = Array1::<f32>::from_elem(6, 1f32);
        solve_tridiagonal(&mut values.view_mut(), &weights.view(), 100f32);
        assert!(values.iter().all(|v| (v - 3f32).abs() < 1e-4));
    }

    #[test]
    fn test_solve_tridiagonal_edge() {
        // 权重为 0 处两侧互不影响
        let mut values = arr1(&[1f32, 1f32, 1f32, 9f32, 9f32]);
        let weights = arr1(&[1f32, 1f32, 0f32, 1f32, 0f32]);
        solve_tridiagonal(&mut values.view_mut(), &weights.view(), 50f32);
        assert!((values[0] - 1f32).abs() < 1e-4);
        assert!((values[3] - 9f32).abs() < 1e-4);
    }

    #[test]
    fn test_lambda_schedule() {
        let fgs = FastGlobalSmoother::new(630f32, 1.5, 3);
        assert!((fgs.lambda_at(1) - 240f32).abs() < 1e-3);
        assert!((fgs.lambda_at(2) - 60f32).abs() < 1e-3);
        assert!((fgs.lambda_at(3) - 15f32).abs() < 1e-3);
    }

    #[test]
    fn test_lrc_confidence() {
        let mut left = constant_map(8, 1, 2f32);
        let mut right = constant_map(8, 1, -2f32);
        // x = 5 -> xr = 3, 右视差差 3 像素
        right.data_mut()[[0, 3]] = -16 * 5;
        left.data_mut()[[0, 7]] = INVALID_DISP;
        let conf = lrc_confidence(&left, &right, 1.5);
        assert_eq!(conf[[0, 4]], 1f32);
        assert_eq!(conf[[0, 5]], 0f32);
        // xr = -1 越界
        assert_eq!(conf[[0, 1]], 0f32);
        assert_eq!(conf[[0, 7]], 0f32);
    }

    #[test]
    fn test_merge_confidence() {
        let lrc = arr2(&[[1f32, 1f32, 0f32, 0.5f32]]);
        let sharpness = arr2(&[[1f32, 0f32, 1f32, 1f32]]);
        let conf = merge_confidence(&lrc.view(), &sharpness.view(), 0.5);
        assert_eq!(conf.data(), &arr2(&[[255u8, 128, 0, 128]]));
    }

    #[test]
    fn test_discontinuity_confidence() {
        let mut map = constant_map(6, 4, 5f32);
        for y in 0..4 {
            map.data_mut()[[y, 5]] = 16 * 20;
        }
        let conf = discontinuity_confidence(&map, &Rect::new(1, 0, 5, 4), 1, 4.0);
        assert_eq!(conf.get(0, 0), Some(0));
        assert_eq!(conf.get(2, 1), Some(255));
        assert_eq!(conf.get(4, 1), Some(0));
        assert_eq!(conf.get(5, 1), Some(0));
        let conf = discontinuity_confidence(&map, &Rect::full(6, 4), 0, 4.0);
        assert_eq!(conf.get(4, 1), Some(255));
    }

    #[test]
    fn test_mode_mismatch() {
        let guide = RgbImage::new(8, 4);
        let map = constant_map(8, 4, 1f32);
        let filter = DisparityWlsFilter::new(FilterMode::WlsConf, WlsOption::default()).unwrap();
        let err = filter
            .filter(
                FilterInput::Single {
                    disparity: &map,
                    roi: Rect::full(8, 4),
                },
                &guide,
            )
            .unwrap_err();
        assert_eq!(err.code, 1009);

        // 尺寸与引导图不一致
        let left = DisparityResult::new(constant_map(7, 4, 1f32), Array2::<f32>::zeros((4, 7)));
        let right = constant_map(7, 4, -1f32);
        let err = filter
            .filter(
                FilterInput::Pair {
                    left: &left,
                    right: &right,
                    roi: Rect::full(8, 4),
                },
                &guide,
            )
            .unwrap_err();
        assert!(err.is_invalid_parameter());
        assert_eq!(err.code, 1006);
    }

    #[test]
    fn test_confidence_ordering() {
        let (width, height) = (16, 8);
        let guide = RgbImage::from_pixel(width as u32, height as u32, Rgb([90, 90, 90]));
        let mut left = constant_map(width, height, 3f32);
        let right = constant_map(width, height, -3f32);
        // 右侧一半左视差为 8, 与右视差相差 5 像素
        for y in 0..height {
            for x in 8..width {
                left.data_mut()[[y, x]] = 16 * 8;
            }
        }
        let input = DisparityResult::new(left, Array2::<f32>::zeros((height, width)));
        let filter = DisparityWlsFilter::new(FilterMode::WlsConf, WlsOption::default()).unwrap();
        let output = filter
            .filter(
                FilterInput::Pair {
                    left: &input,
                    right: &right,
                    roi: Rect::full(width as u32, height as u32),
                },
                &guide,
            )
            .unwrap();
        let conf = output.confidence().as_ref().unwrap();
        for y in 0..height {
            for x in 3..8 {
                for xb in 8..width {
                    assert!(conf.get(x, y).unwrap() > conf.get(xb, y).unwrap());
                }
            }
        }
    }

    #[test]
    fn test_roi_restriction() {
        let guide = RgbImage::from_pixel(10, 6, Rgb([50, 60, 70]));
        let map = constant_map(10, 6, 4f32);
        let filter = DisparityWlsFilter::new(FilterMode::WlsNoConf, WlsOption::default()).unwrap();
        let roi = Rect::new(3, 1, 5, 4);
        let output = filter
            .filter(FilterInput::Single { disparity: &map, roi }, &guide)
            .unwrap();
        assert!(output.confidence().is_none());
        let disparity = output.disparity();
        for y in 0..6 {
            for x in 0..10 {
                if roi.contains(x, y) {
                    assert!((disparity.get(x, y).unwrap() - 4f32).abs() < 0.1);
                } else {
                    assert!(!disparity.is_valid(x, y));
                }
            }
        }
        // 空 ROI 不报错, 输出全部无效
        let output = filter
            .filter(
                FilterInput::Single {
                    disparity: &map,
                    roi: Rect::new(12, 0, -2, 6),
                },
                &guide,
            )
            .unwrap();
        assert_eq!(output.disparity().valid_count(), 0);
    }

    #[test]
    fn test_round_trip_piecewise() {
        // 引导图左右两半颜色不同, 视差图在同一位置分段常数
        let (width, height) = (20usize, 10usize);
        let guide = RgbImage::from_fn(width as u32, height as u32, |x, _| {
            if x < 10 {
                Rgb([20, 30, 40])
            } else {
                Rgb([220, 200, 180])
            }
        });
        let mut px = Array2::<f32>::from_elem((height, width), 12f32);
        px.slice_mut(s![.., 10..]).fill(30f32);
        let map = DisparityMap::from_pixels(&px.view());
        let filter = DisparityWlsFilter::new(FilterMode::WlsNoConf, WlsOption::default()).unwrap();
        let output = filter
            .filter(
                FilterInput::Single {
                    disparity: &map,
                    roi: Rect::full(width as u32, height as u32),
                },
                &guide,
            )
            .unwrap();
        let filtered = output.disparity().to_pixels();
        for (a, b) in filtered.iter().zip(px.iter()) {
            assert!((a - b).abs() <= 0.125, "{} vs {}", a, b);
        }
    }

    /// 相邻像素差值的均方(浮点, 不经定点量化)
    fn grid_energy(px: &Array2<f32>) -> f64 {
        let horizontal = &px.slice(s![.., 1..]) - &px.slice(s![.., ..-1]);
        let vertical = &px.slice(s![1.., ..]) - &px.slice(s![..-1, ..]);
        let total: f64 = horizontal
            .iter()
            .chain(vertical.iter())
            .map(|d| (*d as f64).powi(2))
            .sum();
        total / (horizontal.len() + vertical.len()) as f64
    }

    #[test]
    fn test_lambda_monotonic() {
        let (width, height) = (24usize, 16usize);
        let guide = Array3::<u8>::from_elem((height, width, 3), 128);
        let px = Array2::from_shape_fn((height, width), |(y, x)| {
            let h = ((x * 7 + y * 13) * 2654435761usize) % 1000;
            20f32 + h as f32 / 1000f32 * 3f32 - 1.5f32
        });
        let mut last = grid_energy(&px);
        for lambda in &[0.5f32, 5f32, 50f32, 500f32] {
            let mut sources = [px.clone()];
            FastGlobalSmoother::new(*lambda, 1.5, 3).filter(&guide.view(), &mut sources);
            let energy = grid_energy(&sources[0]);
            assert!(energy <= last + 1e-6, "lambda {}: {} > {}", lambda, energy, last);
            last = energy;
        }
    }

    #[test]
    fn test_lambda_smooths_filter_output() {
        let (width, height) = (24usize, 16usize);
        let guide = RgbImage::from_pixel(width as u32, height as u32, Rgb([128, 128, 128]));
        let px = Array2::from_shape_fn((height, width), |(y, x)| {
            let h = ((x * 7 + y * 13) * 2654435761usize) % 1000;
            20f32 + h as f32 / 1000f32 * 3f32 - 1.5f32
        });
        let map = DisparityMap::from_pixels(&px.view());
        let option = WlsOption::new(50f32, 1.5)
            .set_depth_discontinuity_radius(0)
            .build();
        let filter = DisparityWlsFilter::new(FilterMode::WlsNoConf, option).unwrap();
        let output = filter
            .filter(
                FilterInput::Single {
                    disparity: &map,
                    roi: Rect::full(width as u32, height as u32),
                },
                &guide,
            )
            .unwrap();
        assert!(gradient_energy(output.disparity()) < gradient_energy(&map));
    }
}
