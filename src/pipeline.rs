//! # 立体匹配 + 视差滤波流程
//! wls_conf: (降采样) 左右匹配 -> 还原到原图尺寸 -> 带置信度的 WLS 滤波
//! wls_no_conf: 原图匹配(关闭唯一性/左右一致性/斑点滤波) -> 无置信度 WLS 滤波

use image::RgbImage;

use crate::core::{
    compute_roi, ConfidenceMap, DisparityMap, DisparityResult, FilterMode, Rect, SgbmOption,
    WlsOption,
};
use crate::error::{self, Error, Result};
use crate::preprocess::Preprocessor;
use crate::sgbm::StereoSgbm;
use crate::wls::{DisparityWlsFilter, FilterInput};

use getset::{CopyGetters, Getters, MutGetters, Setters};

use log::{debug, info};

/// 流程参数
#[derive(Getters, Setters, MutGetters, CopyGetters, Copy, Clone, Debug)]
pub struct PipelineOption {
    /// 滤波模式
    #[getset(get = "pub", set = "pub")]
    filter: FilterMode,
    /// 置信度模式下匹配前的降采样比例
    #[getset(get = "pub", set = "pub")]
    downscale: f64,
    /// 为 true 时在原图上匹配
    #[getset(get = "pub", set = "pub")]
    no_downscale: bool,
    /// 原图尺寸下的最大视差
    #[getset(get = "pub", set = "pub")]
    max_disparity: i32,
    /// 匹配窗口大小
    #[getset(get = "pub", set = "pub")]
    block_size: i32,
    /// 平滑系数 k: P1 = 24 * bs^2 * k, P2 = 96 * bs^2 * k
    #[getset(get = "pub", set = "pub")]
    smoothing_factor: u32,
    /// 水平梯度截断
    #[getset(get = "pub", set = "pub")]
    max_x_grad: i32,
    #[getset(get = "pub", set = "pub")]
    lambda: f32,
    #[getset(get = "pub", set = "pub")]
    sigma: f32,
    /// 可视化时视差的放大倍数
    #[getset(get = "pub", set = "pub")]
    vis_mult: f32,
}

impl Default for PipelineOption {
    fn default() -> Self {
        Self {
            filter: FilterMode::WlsConf,
            downscale: 0.5,
            no_downscale: false,
            max_disparity: 80,
            block_size: 1,
            smoothing_factor: 4,
            max_x_grad: 25,
            lambda: 8000.0,
            sigma: 1.5,
            vis_mult: 4.0,
        }
    }
}

impl PipelineOption {
    pub fn new(filter: FilterMode) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }
    pub fn build(&self) -> Self {
        *self
    }
    /// 参数检查: 原图尺寸下的最大视差必须为16的正整数倍
    pub fn validate(&self) -> Result<()> {
        if self.max_disparity <= 0 || self.max_disparity % 16 != 0 {
            return Err(Error::invalid_parameter(1002, error::ERROR_1002));
        }
        Ok(())
    }
    /// 匹配参数, num_disparities 由调用方按匹配分辨率给出
    fn sgbm_option(&self, num_disparities: i32) -> SgbmOption {
        let bs = self.block_size;
        let area = (bs * bs) as u32;
        SgbmOption::new(0, num_disparities, bs)
            .set_p1(24 * area * self.smoothing_factor)
            .set_p2(96 * area * self.smoothing_factor)
            .set_pre_filter_cap(self.max_x_grad)
            .build()
    }
    fn wls_option(&self) -> WlsOption {
        WlsOption::new(self.lambda, self.sigma)
    }
}

/// 流程输出
#[derive(Getters, Setters, MutGetters, CopyGetters, Clone, Debug)]
pub struct PipelineOutput {
    /// 原图尺寸下的匹配结果
    #[getset(get = "pub")]
    raw: DisparityResult,
    /// 滤波后的视差图
    #[getset(get = "pub")]
    filtered: DisparityMap,
    /// 置信度图, 无置信度模式下全部为 255
    #[getset(get = "pub")]
    confidence: ConfidenceMap,
    /// 滤波区域
    #[getset(get = "pub")]
    roi: Rect,
    #[getset(get = "pub")]
    matching_ms: i64,
    #[getset(get = "pub")]
    filtering_ms: i64,
}

/// 立体匹配 + 滤波
#[derive(Getters, Setters, MutGetters, CopyGetters, Clone, Debug, Default)]
pub struct StereoPipeline {
    #[getset(get = "pub", set = "pub")]
    option: PipelineOption,
}

impl StereoPipeline {
    pub fn new(option: PipelineOption) -> Self {
        Self { option }
    }
    /// ## 执行
    /// ### 参数
    /// * left: 左图
    /// * right: 右图, 尺寸与左图一致
    pub fn run(&self, left: &RgbImage, right: &RgbImage) -> Result<PipelineOutput> {
        self.option.validate()?;
        if left.width() == 0 || left.height() == 0 {
            return Err(Error::empty_input(1001, error::ERROR_1001));
        }
        if left.dimensions() != right.dimensions() {
            return Err(Error::invalid_parameter(1004, error::ERROR_1004));
        }
        let ret = match self.option.filter {
            FilterMode::WlsConf => self.run_conf(left, right),
            FilterMode::WlsNoConf => self.run_no_conf(left, right),
        }?;
        info!(
            "[pipeline] {:?} end. matching: {}ms, filtering: {}ms",
            self.option.filter, ret.matching_ms, ret.filtering_ms
        );
        Ok(ret)
    }

    fn run_conf(&self, left: &RgbImage, right: &RgbImage) -> Result<PipelineOutput> {
        let pre = if self.option.no_downscale {
            Preprocessor::default()
        } else {
            Preprocessor::new(self.option.downscale)?
        };
        let (left_small, right_small) = pre.prepare(left, right)?;
        let option = self.option.sgbm_option(pre.num_disparities(self.option.max_disparity));
        let matcher = StereoSgbm::new(option)?;
        let right_matcher = matcher.right_matcher();
        debug!("[pipeline] matcher option: {:?}", option);

        let mut sw = stopwatch::Stopwatch::start_new();
        let left_result = matcher.compute(&left_small, &right_small)?;
        let right_result = right_matcher.compute(&right_small, &left_small)?;
        let matching_ms = sw.elapsed_ms();

        let (width, height) = (left.width() as usize, left.height() as usize);
        let raw = pre.restore(&left_result, width, height);
        let right_disparity = pre.restore_disparity(right_result.disparity(), width, height);
        let roi = compute_roi(left_small.width(), left_small.height(), &option)
            .scale(1.0 / pre.factor())
            .clip(left.width(), left.height());

        sw.restart();
        let filter = DisparityWlsFilter::new(FilterMode::WlsConf, self.option.wls_option())?;
        let (filtered, confidence) = filter
            .filter(
                FilterInput::Pair {
                    left: &raw,
                    right: &right_disparity,
                    roi,
                },
                left,
            )?
            .into_parts();
        let filtering_ms = sw.elapsed_ms();

        Ok(PipelineOutput {
            raw,
            filtered,
            confidence: confidence.unwrap_or_else(|| ConfidenceMap::full(width, height)),
            roi,
            matching_ms,
            filtering_ms,
        })
    }

    fn run_no_conf(&self, left: &RgbImage, right: &RgbImage) -> Result<PipelineOutput> {
        let num_disparities = Preprocessor::default().num_disparities(self.option.max_disparity);
        let option = self
            .option
            .sgbm_option(num_disparities)
            .set_uniqueness_ratio(0)
            .set_do_lr_check(false)
            .set_speckle_window_size(0)
            .build();
        let matcher = StereoSgbm::new(option)?;
        let roi = compute_roi(left.width(), left.height(), &option);
        let wls_option = self
            .option
            .wls_option()
            .set_depth_discontinuity_radius((0.5 * self.option.block_size as f64).ceil() as usize)
            .build();
        debug!("[pipeline] matcher option: {:?}", option);

        let mut sw = stopwatch::Stopwatch::start_new();
        let raw = matcher.compute(left, right)?;
        let matching_ms = sw.elapsed_ms();

        sw.restart();
        let filter = DisparityWlsFilter::new(FilterMode::WlsNoConf, wls_option)?;
        let (filtered, _) = filter
            .filter(
                FilterInput::Single {
                    disparity: raw.disparity(),
                    roi,
                },
                left,
            )?
            .into_parts();
        let filtering_ms = sw.elapsed_ms();

        Ok(PipelineOutput {
            raw,
            filtered,
            confidence: ConfidenceMap::full(left.width() as usize, left.height() as usize),
            roi,
            matching_ms,
            filtering_ms,
        })
    }
}
