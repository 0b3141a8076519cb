use getset::{CopyGetters, Getters, MutGetters, Setters};
use image::GrayImage;
use ndarray::{parallel::prelude::*, prelude::*, Zip};

/// 亚像素精度位数, 视差单位为 1/16 像素
pub const DISP_SHIFT: i32 = 4;
pub const DISP_SCALE: i32 = 1 << DISP_SHIFT;
/// 无效视差(未匹配/被剔除)
pub const INVALID_DISP: i16 = i16::MIN;

/// 定点视差图 (H x W), 每个值为视差 * 16
#[derive(Getters, Setters, MutGetters, CopyGetters, Clone, Debug, PartialEq)]
pub struct DisparityMap {
    #[getset(get = "pub", get_mut = "pub")]
    data: Array2<i16>,
}

impl DisparityMap {
    /// 创建全部为无效值的视差图
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            data: Array2::<i16>::from_elem((height, width), INVALID_DISP),
        }
    }
    pub fn from_array(data: Array2<i16>) -> Self {
        Self { data }
    }
    /// 由浮点像素视差构造, NaN 记为无效
    pub fn from_pixels(source: &ArrayView2<f32>) -> Self {
        let mut data = Array2::<i16>::zeros(source.dim());
        par_azip!((r in &mut data, s in source) {
            *r = to_fixed(*s);
        });
        Self { data }
    }
    pub fn width(&self) -> usize {
        self.data.ncols()
    }
    pub fn height(&self) -> usize {
        self.data.nrows()
    }
    /// (height, width)
    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }
    pub fn view(&self) -> ArrayView2<i16> {
        self.data.view()
    }
    /// 获取像素视差, 无效或越界返回 None
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        match self.data.get((y, x)) {
            Some(v) if *v != INVALID_DISP => Some(*v as f32 / DISP_SCALE as f32),
            _ => None,
        }
    }
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        self.get(x, y).is_some()
    }
    /// 有效视差像素数量
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| **v != INVALID_DISP).count()
    }
    /// 转换为浮点像素视差, 无效值为 NaN
    pub fn to_pixels(&self) -> Array2<f32> {
        let mut ret = Array2::<f32>::zeros(self.data.dim());
        par_azip!((r in &mut ret, s in &self.data) {
            *r = if *s == INVALID_DISP {
                f32::NAN
            } else {
                *s as f32 / DISP_SCALE as f32
            };
        });
        ret
    }
    /// 视差可视化: saturate(d / 16 * scale), 无效值为 0
    pub fn to_visualization(&self, scale: f32) -> GrayImage {
        let (height, width) = self.data.dim();
        let mut ret = Array2::<u8>::zeros((height, width));
        par_azip!((r in &mut ret, s in &self.data) {
            if *s != INVALID_DISP {
                let v = (*s as f32 * scale / DISP_SCALE as f32).round();
                *r = v.max(0f32).min(255f32) as u8;
            }
        });
        GrayImage::from_raw(width as u32, height as u32, ret.into_raw_vec())
            .unwrap_or_else(|| GrayImage::new(width as u32, height as u32))
    }
}

/// 浮点像素视差转换为定点值
pub fn to_fixed(d: f32) -> i16 {
    if d.is_nan() {
        return INVALID_DISP;
    }
    let v = (d * DISP_SCALE as f32).round();
    v.max(INVALID_DISP as f32 + 1f32).min(i16::MAX as f32) as i16
}

/// 置信度图 (H x W), 255 完全可信, 0 丢弃
#[derive(Getters, Setters, MutGetters, CopyGetters, Clone, Debug, PartialEq)]
pub struct ConfidenceMap {
    #[getset(get = "pub")]
    data: Array2<u8>,
}

impl ConfidenceMap {
    pub fn from_array(data: Array2<u8>) -> Self {
        Self { data }
    }
    /// 全部可信
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            data: Array2::<u8>::from_elem((height, width), 255u8),
        }
    }
    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        self.data.get((y, x)).copied()
    }
    /// 归一化到 [0, 1]
    pub fn to_weights(&self) -> Array2<f32> {
        self.data.mapv(|v| v as f32 / 255f32)
    }
    pub fn to_image(&self) -> GrayImage {
        let (height, width) = self.data.dim();
        GrayImage::from_raw(
            width as u32,
            height as u32,
            self.data.as_standard_layout().iter().copied().collect(),
        )
        .unwrap_or_else(|| GrayImage::new(width as u32, height as u32))
    }
}

/// 单次立体匹配的输出: 视差图 + 代价曲线在最优视差处的尖锐度 [0, 1]
#[derive(Getters, Setters, MutGetters, CopyGetters, Clone, Debug)]
pub struct DisparityResult {
    #[getset(get = "pub")]
    disparity: DisparityMap,
    #[getset(get = "pub")]
    sharpness: Array2<f32>,
}

impl DisparityResult {
    pub fn new(disparity: DisparityMap, sharpness: Array2<f32>) -> Self {
        Self {
            disparity,
            sharpness,
        }
    }
    /// 无效像素的尖锐度置为 0
    pub fn invalidate_sharpness(&mut self) {
        let disparity = &self.disparity.data;
        Zip::from(&mut self.sharpness)
            .and(disparity)
            .par_for_each(|s, d| {
                if *d == INVALID_DISP {
                    *s = 0f32;
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_point() {
        assert_eq!(to_fixed(1.5), 24);
        assert_eq!(to_fixed(-2.0), -32);
        assert_eq!(to_fixed(f32::NAN), INVALID_DISP);
        assert_eq!(to_fixed(-1e9), INVALID_DISP + 1);
    }

    #[test]
    fn test_get_and_visualization() {
        let mut map = DisparityMap::new(3, 2);
        assert_eq!(map.valid_count(), 0);
        map.data_mut()[[0, 1]] = 16 * 10;
        map.data_mut()[[1, 2]] = 16 * 100;
        assert_eq!(map.get(1, 0), Some(10f32));
        assert_eq!(map.get(0, 0), None);
        assert_eq!(map.get(5, 0), None);
        let vis = map.to_visualization(4.0);
        assert_eq!(vis.get_pixel(1, 0)[0], 40);
        assert_eq!(vis.get_pixel(2, 1)[0], 255);
        assert_eq!(vis.get_pixel(0, 0)[0], 0);
        let px = map.to_pixels();
        assert!(px[[0, 0]].is_nan());
        assert_eq!(DisparityMap::from_pixels(&px.view()), map);
    }

    #[test]
    fn test_invalidate_sharpness() {
        let mut map = DisparityMap::new(2, 1);
        map.data_mut()[[0, 0]] = 32;
        let mut result = DisparityResult::new(map, Array2::<f32>::from_elem((1, 2), 0.8));
        result.invalidate_sharpness();
        assert_eq!(result.sharpness()[[0, 0]], 0.8);
        assert_eq!(result.sharpness()[[0, 1]], 0f32);
    }
}
