use std::str::FromStr;

use getset::{CopyGetters, Getters, MutGetters, Setters};

use crate::error::{self, Error, Result};

/// 视差后处理滤波模式
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FilterMode {
    /// 左右视差图 + 置信度引导的 WLS 滤波
    WlsConf,
    /// 单视差图, 置信度在 ROI 内均匀分布
    WlsNoConf,
}

impl FromStr for FilterMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "wls_conf" => Ok(FilterMode::WlsConf),
            "wls_no_conf" => Ok(FilterMode::WlsNoConf),
            _ => Err(Error::invalid_parameter(1005, error::ERROR_1005)),
        }
    }
}

/// WLS 滤波参数设置
#[derive(Getters, Setters, MutGetters, CopyGetters, Copy, Clone, Debug)]
pub struct WlsOption {
    /// 平滑强度 λ
    #[getset(get = "pub", set = "pub")]
    lambda: f32,
    /// 引导图颜色相似度带宽 σ
    #[getset(get = "pub", set = "pub")]
    sigma_color: f32,
    /// 快速全局平滑迭代次数
    #[getset(get = "pub", set = "pub")]
    num_iter: usize,
    /// 左右一致性置信度阈值(像素), 差值达到该值时置信度为0
    #[getset(get = "pub", set = "pub")]
    lrc_threshold: f32,
    /// 代价曲率在置信度中所占权重 [0, 1)
    #[getset(get = "pub", set = "pub")]
    sharpness_weight: f32,
    /// 深度不连续区检测半径
    #[getset(get = "pub", set = "pub")]
    depth_discontinuity_radius: usize,
    /// 半径内视差极差超过该值(像素)时视为深度不连续
    #[getset(get = "pub", set = "pub")]
    depth_discontinuity_threshold: f32,
}

impl Default for WlsOption {
    fn default() -> Self {
        Self {
            lambda: 8000.0,
            sigma_color: 1.5,
            num_iter: 3,
            lrc_threshold: 1.5,
            sharpness_weight: 0.5,
            depth_discontinuity_radius: 1,
            depth_discontinuity_threshold: 4.0,
        }
    }
}

impl WlsOption {
    pub fn new(lambda: f32, sigma_color: f32) -> Self {
        let mut r = WlsOption::default();
        r.lambda = lambda;
        r.sigma_color = sigma_color;
        r
    }
    ///
    pub fn build(&self) -> Self {
        *self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.lambda > 0f32) || !(self.sigma_color > 0f32) {
            return Err(Error::invalid_parameter(1011, error::ERROR_1011));
        }
        if !(self.sharpness_weight >= 0f32 && self.sharpness_weight < 1f32) {
            return Err(Error::invalid_parameter(1012, error::ERROR_1012));
        }
        Ok(())
    }
}
