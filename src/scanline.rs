//! 多路径扫描线代价聚合
//!
//! 每条路径的递推:
//!     Lr(p,d) = C(p,d)
//!        + min( Lr(p-r,d), Lr(p-r,d-1) + P1, Lr(p-r,d+1) + P1, min(Lr(p-r)) + P2 )
//!        - min(Lr(p-r))
//! 所有路径的 Lr 逐元素求和得到最终代价 S(p,d).
//!
//! 只实现了"自上而下"一种扫描, 其它方向通过对代价数组做 x/y 轴交换和翻转得到,
//! 结果再以同样的变换累加回总代价.

use ndarray::{parallel::prelude::*, prelude::*, Zip};

use crate::core::AggregationPaths;
use crate::utils::pixel_distance;

use log::trace;

/// 扫描路径
/// 1. transpose: 交换 x/y 轴
/// 2. reverse: 上下翻转
/// 3. 在变换后的视图上自上而下扫描, 当前像素的前一个像素为上一行 x - dx 处的像素
#[derive(Copy, Clone, Debug)]
struct ScanPath {
    transpose: bool,
    reverse: bool,
    dx: isize,
}

impl ScanPath {
    const fn new(transpose: bool, reverse: bool, dx: isize) -> Self {
        Self {
            transpose,
            reverse,
            dx,
        }
    }
}

/// 从上往下, 从下往上, 从左往右, 从右往左
const AXIS_PATHS: [ScanPath; 4] = [
    ScanPath::new(false, false, 0),
    ScanPath::new(false, true, 0),
    ScanPath::new(true, false, 0),
    ScanPath::new(true, true, 0),
];

/// 左上->右下, 右上->左下, 左下->右上, 右下->左上
const DIAGONAL_PATHS: [ScanPath; 4] = [
    ScanPath::new(false, false, 1),
    ScanPath::new(false, false, -1),
    ScanPath::new(false, true, 1),
    ScanPath::new(false, true, -1),
];

fn scan_paths(paths: AggregationPaths) -> Vec<ScanPath> {
    match paths {
        AggregationPaths::Four => AXIS_PATHS.to_vec(),
        AggregationPaths::Eight => AXIS_PATHS
            .iter()
            .chain(DIAGONAL_PATHS.iter())
            .copied()
            .collect(),
    }
}

fn orient<'a, A, D: Dimension>(mut view: ArrayView<'a, A, D>, path: &ScanPath) -> ArrayView<'a, A, D> {
    if path.transpose {
        view.swap_axes(0, 1);
    }
    if path.reverse {
        view.invert_axis(Axis(0));
    }
    view
}

fn orient_mut<'a, A, D: Dimension>(
    mut view: ArrayViewMut<'a, A, D>,
    path: &ScanPath,
) -> ArrayViewMut<'a, A, D> {
    if path.transpose {
        view.swap_axes(0, 1);
    }
    if path.reverse {
        view.invert_axis(Axis(0));
    }
    view
}

/// 平滑惩罚项
#[derive(Copy, Clone, Debug)]
pub struct Penalties {
    pub p1: u32,
    pub p2: u32,
    /// 路径上相邻像素色差达到该值时, p2 降为 p2/4 (不小于 p1)
    pub gradient_threshold: i32,
}

impl Penalties {
    pub fn new(p1: u32, p2: u32, gradient_threshold: i32) -> Self {
        Self {
            p1,
            p2: p2.max(p1 + 1),
            gradient_threshold,
        }
    }

    fn p2_for(&self, gradient: i32) -> u32 {
        if gradient >= self.gradient_threshold {
            (self.p2 / 4).max(self.p1)
        } else {
            self.p2
        }
    }
}

/// ## 多路径代价聚合
/// ### 参数
/// * cost: 匹配代价 (H x W x D)
/// * guide: 参考图像 (H x W x C), 用于在颜色边缘处降低 p2
/// * paths: 聚合路径数量
/// * penalties: 平滑惩罚项
/// ### 返回
/// 所有路径聚合代价之和 (H x W x D)
pub fn aggregate_cost(
    cost: &ArrayView3<u16>,
    guide: &ArrayView3<u8>,
    paths: AggregationPaths,
    penalties: &Penalties,
) -> Array3<u32> {
    let mut sum = Array3::<u32>::zeros(cost.dim());
    for path in scan_paths(paths) {
        let path_cost = orient(cost.view(), &path);
        let path_guide = orient(guide.view(), &path);
        let lr = aggregate_path(&path_cost, &path_guide, path.dx, penalties);
        let target = orient_mut(sum.view_mut(), &path);
        Zip::from(target).and(&lr).par_for_each(|s, v| *s += *v);
        trace!("    [aggregate_cost] path {:?} end.", path);
    }
    sum
}

/// 自上而下单路径聚合, 行与行之间顺序执行, 行内像素并行
fn aggregate_path(
    cost: &ArrayView3<u16>,
    guide: &ArrayView3<u8>,
    dx: isize,
    penalties: &Penalties,
) -> Array3<u32> {
    let (height, width, _) = cost.dim();
    let mut ret = Array3::<u32>::zeros(cost.dim());
    for y in 0..height {
        let (prev_rows, mut cur_rows) = ret.view_mut().split_at(Axis(0), y);
        let mut current = cur_rows.index_axis_mut(Axis(0), 0);
        let cost_row = cost.index_axis(Axis(0), y);
        // 首行 Lr = C
        if y == 0 {
            Zip::from(&mut current)
                .and(&cost_row)
                .par_for_each(|l, c| *l = *c as u32);
            continue;
        }
        let prev = prev_rows.index_axis(Axis(0), y - 1);
        let guide_row = guide.index_axis(Axis(0), y);
        let guide_prev = guide.index_axis(Axis(0), y - 1);
        Zip::indexed(current.axis_iter_mut(Axis(0)))
            .and(cost_row.axis_iter(Axis(0)))
            .par_for_each(|x, mut lr, c| {
                let px = x as isize - dx;
                // 路径起点
                if px < 0 || px >= width as isize {
                    Zip::from(&mut lr).and(&c).for_each(|l, c| *l = *c as u32);
                    return;
                }
                let px = px as usize;
                let gradient = pixel_distance(
                    &guide_row.index_axis(Axis(0), x),
                    &guide_prev.index_axis(Axis(0), px),
                );
                aggregate_step(
                    &prev.index_axis(Axis(0), px),
                    &c,
                    &mut lr,
                    penalties.p1,
                    penalties.p2_for(gradient),
                );
            });
    }
    ret
}

/// 单像素所有视差下的递推
fn aggregate_step(
    prev: &ArrayView1<u32>,
    cost: &ArrayView1<u16>,
    out: &mut ArrayViewMut1<u32>,
    p1: u32,
    p2: u32,
) {
    let depth = cost.len();
    // 方向上上一个像素所有视差下的最小聚合代价
    let min_prev = prev.iter().copied().min().unwrap_or(0);
    let jump = min_prev + p2;
    for d in 0..depth {
        let mut best = prev[d];
        if d > 0 {
            best = best.min(prev[d - 1] + p1);
        }
        if d + 1 < depth {
            best = best.min(prev[d + 1] + p1);
        }
        best = best.min(jump);
        out[d] = cost[d] as u32 + best - min_prev;
    }
}
