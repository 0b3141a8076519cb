extern crate image;

use image::RgbImage;

use crate::core::{DisparityMap, DisparityResult, Point, SgbmOption, DISP_SCALE, DISP_SHIFT, INVALID_DISP};
use crate::error::{self, Error, Result};
use crate::scanline::{aggregate_cost, Penalties};
use crate::utils::{to_grayimage, to_ndarray};

use getset::{CopyGetters, Getters, MutGetters, Setters};
use ndarray::{parallel::prelude::*, prelude::*, Zip};
use ndarray_stats::QuantileExt;

use log::{debug, trace};

/// 定点视差饱和到 i16 有效范围, 不与 INVALID_DISP 重合
fn saturate_disparity(v: i64) -> i16 {
    v.max(INVALID_DISP as i64 + 1).min(i16::MAX as i64) as i16
}

fn clamp_index(i: isize, len: usize) -> usize {
    if i < 0 {
        0
    } else if i as usize >= len {
        len - 1
    } else {
        i as usize
    }
}

/// ## 预处理: 水平 Sobel 梯度截断
/// 梯度截断到 [-cap, cap] 后平移到 [0, 2 * cap], 降低光照变化的影响
///      p1      p2      p3
///      p4      p5      p6
///      p7      p8      p9
/// 公式:
///      gx = (p3 + 2*p6 + p9) - (p1 + 2*p4 + p7)
fn prefilter_xgrad(source: &ArrayView2<u8>, cap: i32) -> Array2<u8> {
    let (height, width) = source.dim();
    let mut ret = Array2::<u8>::zeros((height, width));
    Zip::indexed(&mut ret).par_for_each(|(y, x), val| {
        let ym = clamp_index(y as isize - 1, height);
        let yp = clamp_index(y as isize + 1, height);
        let xm = clamp_index(x as isize - 1, width);
        let xp = clamp_index(x as isize + 1, width);
        let p = |yy: usize, xx: usize| source[[yy, xx]] as i32;
        let gx = (p(ym, xp) + 2 * p(y, xp) + p(yp, xp)) - (p(ym, xm) + 2 * p(y, xm) + p(yp, xm));
        *val = (gx.max(-cap).min(cap) + cap) as u8;
    });
    ret
}

/// 行方向半像素插值范围 (min, max), 用于 Birchfield-Tomasi 代价
fn half_pixel_range(source: &ArrayView2<u8>) -> (Array2<u8>, Array2<u8>) {
    let (height, width) = source.dim();
    let mut lo = Array2::<u8>::zeros((height, width));
    let mut hi = Array2::<u8>::zeros((height, width));
    Zip::indexed(&mut lo)
        .and(&mut hi)
        .par_for_each(|(y, x), lo_val, hi_val| {
            let v = source[[y, x]] as i32;
            let left = if x > 0 {
                (v + source[[y, x - 1]] as i32) / 2
            } else {
                v
            };
            let right = if x + 1 < width {
                (v + source[[y, x + 1]] as i32) / 2
            } else {
                v
            };
            *lo_val = v.min(left).min(right) as u8;
            *hi_val = v.max(left).max(right) as u8;
        });
    (lo, hi)
}

/// 参与匹配的单通道数据及其半像素插值范围
struct Channel {
    value: Array2<u8>,
    lo: Array2<u8>,
    hi: Array2<u8>,
}

impl Channel {
    fn new(value: Array2<u8>) -> Self {
        let (lo, hi) = half_pixel_range(&value.view());
        Self { value, lo, hi }
    }
}

/// 匹配用图像: 截断梯度 + 灰度
struct MatchingImage {
    grad: Channel,
    gray: Channel,
}

impl MatchingImage {
    fn new(source: &ArrayView3<u8>, pre_filter_cap: i32) -> Self {
        let gray = to_grayimage(source);
        let grad = prefilter_xgrad(&gray.view(), pre_filter_cap);
        Self {
            grad: Channel::new(grad),
            gray: Channel::new(gray),
        }
    }
}

/// Birchfield-Tomasi 像素不相似度 (左像素 xl, 右像素 xr)
fn bt_cost(l: &Channel, r: &Channel, y: usize, xl: usize, xr: usize) -> i32 {
    let lv = l.value[[y, xl]] as i32;
    let rv = r.value[[y, xr]] as i32;
    let d_lr = 0i32.max(lv - r.hi[[y, xr]] as i32).max(r.lo[[y, xr]] as i32 - lv);
    let d_rl = 0i32.max(rv - l.hi[[y, xl]] as i32).max(l.lo[[y, xl]] as i32 - rv);
    d_lr.min(d_rl)
}

/// ## 窗口代价累加
/// 对每个视差在 (2 * half + 1) x (2 * half + 1) 窗口内求和, 边界重复
fn box_filter(cost: &ArrayView3<u16>, half: usize) -> Array3<u16> {
    if half == 0 {
        return cost.to_owned();
    }
    let (height, width, _) = cost.dim();
    let half = half as isize;
    let mut horizontal = Array3::<u32>::zeros(cost.dim());
    Zip::indexed(&mut horizontal).par_for_each(|(y, x, d), val| {
        *val = (-half..=half)
            .map(|k| cost[[y, clamp_index(x as isize + k, width), d]] as u32)
            .sum();
    });
    let mut ret = Array3::<u16>::zeros(cost.dim());
    Zip::indexed(&mut ret).par_for_each(|(y, x, d), val| {
        let total: u32 = (-half..=half)
            .map(|k| horizontal[[clamp_index(y as isize + k, height), x, d]])
            .sum();
        *val = total.min(u16::MAX as u32) as u16;
    });
    ret
}

/// ## 斑点过滤
/// 四邻域内视差差值不超过 max_diff 的像素视为连通, 面积不超过 max_speckle_size 的连通区域置为无效
fn filter_speckles(disparity: &mut Array2<i16>, max_speckle_size: usize, max_diff: i32) {
    let (height, width) = disparity.dim();
    let mut labels = Array2::<u32>::zeros((height, width));
    // 下标为区域编号, 0 号不使用
    let mut is_speckle: Vec<bool> = vec![false];
    let mut stack: Vec<Point> = Vec::new();
    for y in 0..height {
        for x in 0..width {
            if disparity[[y, x]] == INVALID_DISP {
                continue;
            }
            let label = labels[[y, x]] as usize;
            if label != 0 {
                if is_speckle[label] {
                    disparity[[y, x]] = INVALID_DISP;
                }
                continue;
            }
            let new_label = is_speckle.len() as u32;
            labels[[y, x]] = new_label;
            stack.push(Point::new(x, y));
            let mut count = 0usize;
            while let Some(p) = stack.pop() {
                count += 1;
                let dp = disparity[[*p.y(), *p.x()]] as i32;
                for n in p.neighbors4(width, height) {
                    let (nx, ny) = (*n.x(), *n.y());
                    let dn = disparity[[ny, nx]];
                    if labels[[ny, nx]] == 0
                        && dn != INVALID_DISP
                        && (dp - dn as i32).abs() <= max_diff
                    {
                        labels[[ny, nx]] = new_label;
                        stack.push(n);
                    }
                }
            }
            let speckle = count <= max_speckle_size;
            is_speckle.push(speckle);
            if speckle {
                disparity[[y, x]] = INVALID_DISP;
            }
        }
    }
}

/// 半全局块匹配
#[derive(Getters, Setters, MutGetters, CopyGetters, Clone, Debug)]
pub struct StereoSgbm {
    /// 算法参数
    #[getset(get = "pub", set = "pub")]
    option: SgbmOption,
}

impl Default for StereoSgbm {
    fn default() -> Self {
        Self {
            option: SgbmOption::default(),
        }
    }
}

impl StereoSgbm {
    pub fn new(option: SgbmOption) -> Result<Self> {
        option.validate()?;
        Ok(Self { option })
    }
    /// 以右图为参考图的匹配器, 搜索方向相反:
    ///     min_disparity' = 1 - (min_disparity + num_disparities)
    /// 调用方式: right_matcher.compute(right, left), 得到的视差不大于 0
    pub fn right_matcher(&self) -> Self {
        let option = self
            .option
            .build()
            .set_min_disparity(1 - (self.option.min_disparity() + self.option.num_disparities()))
            .build();
        Self { option }
    }
    /// 视差范围完整的列区间 [begin, end)
    fn valid_columns(&self, width: usize) -> Option<(usize, usize)> {
        let min_d = *self.option.min_disparity();
        let max_d = self.option.max_disparity();
        let begin = max_d.max(0) as i64;
        let end = width as i64 + min_d.min(0) as i64;
        if begin >= end {
            None
        } else {
            Some((begin as usize, end as usize))
        }
    }
    /// ## 计算代价
    /// C(y, x, d) = BT(截断梯度) + BT(灰度) / 4, x 限定在 [begin, end)
    fn compute_cost(
        &self,
        reference: &MatchingImage,
        target: &MatchingImage,
        columns: (usize, usize),
    ) -> Array3<u16> {
        let (height, _) = reference.gray.value.dim();
        let depth = *self.option.num_disparities() as usize;
        let min_d = *self.option.min_disparity() as isize;
        let (begin, end) = columns;
        let mut ret = Array3::<u16>::zeros((height, end - begin, depth));
        Zip::indexed(&mut ret).par_for_each(|(y, i, d), cost| {
            let x = i + begin;
            // 列区间保证 xr 位于图像内
            let xr = (x as isize - min_d - d as isize) as usize;
            let grad_cost = bt_cost(&reference.grad, &target.grad, y, x, xr);
            let gray_cost = bt_cost(&reference.gray, &target.gray, y, x, xr);
            *cost = (grad_cost + (gray_cost >> 2)) as u16;
        });
        ret
    }
    /// ## 计算视差
    /// 1. 赢家通吃选择最小代价视差
    /// 2. 唯一性约束: 非相邻视差代价 S(d) * (100 - ratio) < S_min * 100 时剔除
    /// 3. 抛物线拟合得到亚像素视差(1/16)
    /// 4. 代价曲线尖锐度: (S(d-1) + S(d+1) - 2 * S_min) / (2 * P1 * 路径数)
    /// 5. 左右一致性检查: 右视差由同一代价数组按右图像素取最小代价得到
    fn select_disparity(
        &self,
        sum: &ArrayView3<u32>,
        begin: usize,
        width: usize,
    ) -> (Array2<i16>, Array2<f32>) {
        let (height, _, depth) = sum.dim();
        let min_d = *self.option.min_disparity();
        let uniqueness = *self.option.uniqueness_ratio() as u64;
        let do_lr_check = *self.option.do_lr_check();
        let max_diff = (*self.option.disp12_max_diff()).max(0);
        let p1 = (*self.option.p1()).max(1);
        let curvature_norm = (2 * p1 * self.option.paths().count() as u32) as f32;

        let mut disparity = Array2::<i16>::from_elem((height, width), INVALID_DISP);
        let mut sharpness = Array2::<f32>::zeros((height, width));
        Zip::from(disparity.axis_iter_mut(Axis(0)))
            .and(sharpness.axis_iter_mut(Axis(0)))
            .and(sum.axis_iter(Axis(0)))
            .par_for_each(|mut disp_row, mut sharp_row, sum_row| {
                // 右视图视差及其代价
                let mut disp2 = vec![i32::MIN; width];
                let mut disp2_cost = vec![u32::MAX; width];
                for (i, costs) in sum_row.axis_iter(Axis(0)).enumerate() {
                    let best = match costs.argmin() {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    let min_cost = costs[best];
                    if uniqueness > 0 {
                        let unique = costs.iter().enumerate().all(|(d, c)| {
                            (d as i64 - best as i64).abs() <= 1
                                || *c as u64 * (100 - uniqueness) >= min_cost as u64 * 100
                        });
                        if !unique {
                            continue;
                        }
                    }
                    let x = i + begin;
                    let xr = x as i64 - (min_d as i64 + best as i64);
                    if xr >= 0 && (xr as usize) < width && disp2_cost[xr as usize] > min_cost {
                        disp2_cost[xr as usize] = min_cost;
                        disp2[xr as usize] = min_d + best as i32;
                    }
                    let mut d16 = best as i64 * DISP_SCALE as i64;
                    let curvature = if best > 0 && best + 1 < depth {
                        let (cm, cp) = (costs[best - 1] as i64, costs[best + 1] as i64);
                        let denom2 = (cm + cp - 2 * min_cost as i64).max(1);
                        d16 += ((cm - cp) * DISP_SCALE as i64 + denom2) / (denom2 * 2);
                        (cm + cp - 2 * min_cost as i64) as f32
                    } else if depth > 1 {
                        // 最优视差位于视差范围边界, 取单侧差值
                        let neighbor = if best == 0 { costs[1] } else { costs[best - 1] };
                        2f32 * (neighbor as f32 - min_cost as f32)
                    } else {
                        0f32
                    };
                    disp_row[x] = saturate_disparity(min_d as i64 * DISP_SCALE as i64 + d16);
                    sharp_row[x] = (curvature / curvature_norm).max(0f32).min(1f32);
                }
                if !do_lr_check {
                    return;
                }
                for x in begin..begin + sum_row.len_of(Axis(0)) {
                    let d1 = disp_row[x];
                    if d1 == INVALID_DISP {
                        continue;
                    }
                    let d_floor = (d1 as i32) >> DISP_SHIFT;
                    let d_ceil = (d1 as i32 + DISP_SCALE - 1) >> DISP_SHIFT;
                    let x_floor = x as i64 - d_floor as i64;
                    let x_ceil = x as i64 - d_ceil as i64;
                    let disagree = |xx: i64, d: i32| -> bool {
                        xx >= 0
                            && (xx as usize) < width
                            && disp2[xx as usize] != i32::MIN
                            && (disp2[xx as usize] - d).abs() > max_diff
                    };
                    if disagree(x_floor, d_floor) && disagree(x_ceil, d_ceil) {
                        disp_row[x] = INVALID_DISP;
                    }
                }
            });
        (disparity, sharpness)
    }
    /// ## 立体匹配
    /// ### 参数
    /// * reference: 参考图(左匹配器为左图, 右匹配器为右图)
    /// * target: 目标图
    /// ### 返回
    /// 与参考图同尺寸的视差图(1/16 像素, 无效值为 INVALID_DISP)及代价尖锐度
    pub fn compute(&self, reference: &RgbImage, target: &RgbImage) -> Result<DisparityResult> {
        self.option.validate()?;
        if reference.width() == 0 || reference.height() == 0 || target.width() == 0 || target.height() == 0 {
            return Err(Error::empty_input(1001, error::ERROR_1001));
        }
        if reference.dimensions() != target.dimensions() {
            return Err(Error::invalid_parameter(1004, error::ERROR_1004));
        }
        let (width, height) = (reference.width() as usize, reference.height() as usize);
        let mut sw = stopwatch::Stopwatch::start_new();
        let reference_nd = to_ndarray(reference);
        let target_nd = to_ndarray(target);
        let cap = *self.option.pre_filter_cap();
        let reference_img = MatchingImage::new(&reference_nd.view(), cap);
        let target_img = MatchingImage::new(&target_nd.view(), cap);
        debug!(
            "[sgbm] prefilter end. image(H x W): {:?}, disparity: [{}, {}], elapse time: {}ms",
            (height, width),
            self.option.min_disparity(),
            self.option.max_disparity(),
            sw.elapsed_ms()
        );

        // 视差范围放不下时没有可匹配的列
        let columns = match self.valid_columns(width) {
            Some(v) => v,
            None => {
                debug!("[sgbm] disparity range exceeds image width, no valid columns.");
                return Ok(DisparityResult::new(
                    DisparityMap::new(width, height),
                    Array2::<f32>::zeros((height, width)),
                ));
            }
        };

        // 1. 代价计算
        sw.restart();
        let cost = self.compute_cost(&reference_img, &target_img, columns);
        let cost = box_filter(&cost.view(), (*self.option.block_size() / 2) as usize);
        debug!(
            "[sgbm] compute cost end. columns: {:?}, value: {} - {}. elapse time: {}ms",
            columns,
            cost.min().map(|v| *v).unwrap_or(0),
            cost.max().map(|v| *v).unwrap_or(0),
            sw.elapsed_ms()
        );

        // 2. 多路径代价聚合
        sw.restart();
        let penalties = Penalties::new(
            *self.option.p1(),
            *self.option.p2(),
            *self.option.gradient_threshold(),
        );
        let guide = reference_nd.slice(s![.., columns.0..columns.1, ..]);
        let sum = aggregate_cost(&cost.view(), &guide, *self.option.paths(), &penalties);
        debug!(
            "[sgbm] aggregate cost end. paths: {:?}, elapse time: {}ms",
            self.option.paths(),
            sw.elapsed_ms()
        );

        // 3. 视差计算
        sw.restart();
        let (mut disparity, sharpness) = self.select_disparity(&sum.view(), columns.0, width);
        trace!(
            "    [select_disparity] valid after uniqueness/lr-check: {}",
            disparity.iter().filter(|v| **v != INVALID_DISP).count()
        );

        // 4. 斑点过滤
        if *self.option.speckle_window_size() > 0 {
            filter_speckles(
                &mut disparity,
                *self.option.speckle_window_size() as usize,
                *self.option.speckle_range() * DISP_SCALE,
            );
        }
        let mut ret = DisparityResult::new(DisparityMap::from_array(disparity), sharpness);
        ret.invalidate_sharpness();
        debug!(
            "[sgbm] compute disparity end. valid: {}, elapse time: {}ms",
            ret.disparity().valid_count(),
            sw.elapsed_ms()
        );
        Ok(ret)
    }
}
