use getset::{CopyGetters, Getters, MutGetters, Setters};

use crate::core::SgbmOption;

/// 轴对齐矩形 (x, y, width, height), 宽或高不大于0时表示空区域
#[derive(Getters, Setters, MutGetters, CopyGetters, Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    #[getset(get = "pub", set = "pub")]
    x: i32,
    #[getset(get = "pub", set = "pub")]
    y: i32,
    #[getset(get = "pub", set = "pub")]
    width: i32,
    #[getset(get = "pub", set = "pub")]
    height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
    /// 整幅图像
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
    pub fn contains(&self, x: usize, y: usize) -> bool {
        let (x, y) = (x as i32, y as i32);
        !self.is_empty()
            && x >= self.x
            && x < self.x + self.width
            && y >= self.y
            && y < self.y + self.height
    }
    /// 按比例缩放, 用于把降采样图像上的 ROI 还原到原图尺寸
    pub fn scale(&self, factor: f64) -> Self {
        let x0 = (self.x as f64 * factor).round() as i32;
        let y0 = (self.y as f64 * factor).round() as i32;
        let x1 = ((self.x + self.width) as f64 * factor).round() as i32;
        let y1 = ((self.y + self.height) as f64 * factor).round() as i32;
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }
    /// 裁剪到图像范围 [0, width) x [0, height)
    pub fn clip(&self, width: u32, height: u32) -> Self {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = (self.x + self.width).min(width as i32);
        let y1 = (self.y + self.height).min(height as i32);
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }
    /// 以 (行范围, 列范围) 返回非空区域, 空区域返回 None
    pub fn ranges(&self) -> Option<(std::ops::Range<usize>, std::ops::Range<usize>)> {
        if self.is_empty() {
            return None;
        }
        let (x, y) = (self.x as usize, self.y as usize);
        Some((
            y..y + self.height as usize,
            x..x + self.width as usize,
        ))
    }
}

/// ## 计算有效区域
/// 完整匹配窗口和完整视差范围都能放下的区域:
///     xmin = maxD + bs/2, ymin = bs/2, xmax = W + minD - bs/2, ymax = H - bs/2
/// 结果会裁剪到图像范围内; 视差范围超过图像宽度时宽度不大于0, 表示无有效区域
pub fn compute_roi(width: u32, height: u32, option: &SgbmOption) -> Rect {
    let bs2 = *option.block_size() / 2;
    let min_d = *option.min_disparity();
    let max_d = option.max_disparity();

    let xmin = (max_d + bs2).max(0);
    let xmax = (width as i32 + min_d - bs2).min(width as i32);
    let ymin = bs2.max(0);
    let ymax = (height as i32 - bs2).min(height as i32);

    Rect::new(xmin, ymin, xmax - xmin, ymax - ymin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_roi() {
        let option = SgbmOption::new(0, 16, 5);
        let roi = compute_roi(100, 50, &option);
        assert_eq!(roi, Rect::new(17, 2, 81, 46));
        assert!(roi.contains(17, 2));
        assert!(!roi.contains(16, 2));
        assert!(!roi.contains(98, 2));
    }

    #[test]
    fn test_compute_roi_contained() {
        for &(w, h) in &[(1u32, 1u32), (20, 10), (64, 48), (100, 7)] {
            for &min_d in &[-20, -3, 0, 5] {
                for &num_d in &[16, 32, 64] {
                    for &bs in &[1, 3, 5, 9] {
                        let option = SgbmOption::new(min_d, num_d, bs);
                        let roi = compute_roi(w, h, &option);
                        if roi.is_empty() {
                            continue;
                        }
                        assert!(*roi.x() >= 0 && *roi.y() >= 0);
                        assert!(roi.x() + roi.width() <= w as i32);
                        assert!(roi.y() + roi.height() <= h as i32);
                    }
                }
            }
        }
    }

    #[test]
    fn test_compute_roi_degenerate() {
        // 视差范围超过图像宽度
        let option = SgbmOption::new(0, 64, 3);
        let roi = compute_roi(40, 30, &option);
        assert!(*roi.width() <= 0);
        assert!(roi.is_empty());
        assert!(roi.ranges().is_none());
    }

    #[test]
    fn test_scale() {
        let roi = Rect::new(10, 4, 20, 8).scale(2.0);
        assert_eq!(roi, Rect::new(20, 8, 40, 16));
        let (rows, cols) = roi.ranges().unwrap();
        assert_eq!(rows, 8..24);
        assert_eq!(cols, 20..60);
    }

    #[test]
    fn test_clip() {
        assert_eq!(Rect::new(-3, 2, 10, 10).clip(5, 8), Rect::new(0, 2, 5, 6));
        assert!(Rect::new(12, 0, 4, 4).clip(10, 10).is_empty());
    }
}
