//! 降采样预处理与视差图还原

use image::{imageops::FilterType, RgbImage};

use crate::core::{DisparityMap, DisparityResult, INVALID_DISP};
use crate::error::{self, Error, Result};

use getset::{CopyGetters, Getters, MutGetters, Setters};
use ndarray::{parallel::prelude::*, prelude::*, Zip};

use log::debug;

/// 最近邻采样时目标坐标对应的源坐标
fn nearest_index(dst: usize, dst_len: usize, src_len: usize) -> usize {
    let v = ((dst as f64 + 0.5) * src_len as f64 / dst_len as f64).floor() as usize;
    v.min(src_len - 1)
}

/// 降采样预处理器, factor = 1 时不做任何处理
#[derive(Getters, Setters, MutGetters, CopyGetters, Copy, Clone, Debug)]
pub struct Preprocessor {
    /// 缩放比例 (0, 1]
    #[getset(get = "pub")]
    factor: f64,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self { factor: 1.0 }
    }
}

impl Preprocessor {
    pub fn new(factor: f64) -> Result<Self> {
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(Error::invalid_parameter(1007, error::ERROR_1007));
        }
        Ok(Self { factor })
    }

    pub fn is_identity(&self) -> bool {
        self.factor == 1.0
    }

    /// 降采样后的视差数量: ceil(nominal * factor), 向上取整到16的倍数
    pub fn num_disparities(&self, nominal: i32) -> i32 {
        let n = (nominal as f64 * self.factor).ceil() as i32;
        if n % 16 != 0 {
            n + 16 - n % 16
        } else {
            n
        }
    }

    fn resize(&self, source: &RgbImage) -> RgbImage {
        let width = ((source.width() as f64 * self.factor).round() as u32).max(1);
        let height = ((source.height() as f64 * self.factor).round() as u32).max(1);
        image::imageops::resize(source, width, height, FilterType::Triangle)
    }

    /// 左右图降采样
    pub fn prepare(&self, left: &RgbImage, right: &RgbImage) -> Result<(RgbImage, RgbImage)> {
        if left.dimensions() != right.dimensions() {
            return Err(Error::invalid_parameter(1004, error::ERROR_1004));
        }
        if self.is_identity() {
            return Ok((left.clone(), right.clone()));
        }
        let ret = (self.resize(left), self.resize(right));
        debug!(
            "[preprocess] downscale {:?} -> {:?}, factor: {}",
            left.dimensions(),
            ret.0.dimensions(),
            self.factor
        );
        Ok(ret)
    }

    /// ## 视差图还原到原图尺寸
    /// 最近邻插值(不会混合无效值), 视差值除以 factor, 单位仍为原图像素
    pub fn restore_disparity(&self, source: &DisparityMap, width: usize, height: usize) -> DisparityMap {
        let (src_height, src_width) = source.dim();
        if self.is_identity() && (src_width, src_height) == (width, height) {
            return source.clone();
        }
        let factor = self.factor;
        let data = source.view();
        let mut ret = Array2::<i16>::from_elem((height, width), INVALID_DISP);
        if src_width == 0 || src_height == 0 {
            return DisparityMap::from_array(ret);
        }
        Zip::indexed(&mut ret).par_for_each(|(y, x), val| {
            let v = data[[
                nearest_index(y, height, src_height),
                nearest_index(x, width, src_width),
            ]];
            if v != INVALID_DISP {
                let scaled = (v as f64 / factor).round();
                *val = scaled.max(INVALID_DISP as f64 + 1.0).min(i16::MAX as f64) as i16;
            }
        });
        DisparityMap::from_array(ret)
    }

    /// 匹配结果还原到原图尺寸(视差与尖锐度)
    pub fn restore(&self, source: &DisparityResult, width: usize, height: usize) -> DisparityResult {
        let disparity = self.restore_disparity(source.disparity(), width, height);
        let sharp = source.sharpness();
        let (src_height, src_width) = sharp.dim();
        let mut sharpness = Array2::<f32>::zeros((height, width));
        if src_width > 0 && src_height > 0 {
            Zip::indexed(&mut sharpness).par_for_each(|(y, x), val| {
                *val = sharp[[
                    nearest_index(y, height, src_height),
                    nearest_index(x, width, src_width),
                ]];
            });
        }
        DisparityResult::new(disparity, sharpness)
    }
}
