use getset::{CopyGetters, Getters, MutGetters, Setters};

use crate::error::{self, Error, Result};

/// 代价聚合路径数量
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AggregationPaths {
    /// 左右, 上下共4条路径
    Four,
    /// 4条水平/竖直路径 + 4条对角线路径
    Eight,
}

impl AggregationPaths {
    pub fn count(&self) -> usize {
        match self {
            AggregationPaths::Four => 4,
            AggregationPaths::Eight => 8,
        }
    }
}

/// SGBM参数设置
#[derive(Getters, Setters, MutGetters, CopyGetters, Copy, Clone, Debug)]
pub struct SgbmOption {
    /// 最小视差
    #[getset(get = "pub", set = "pub")]
    min_disparity: i32,
    /// 视差数量, 必须为16的倍数
    #[getset(get = "pub", set = "pub")]
    num_disparities: i32,
    /// 匹配窗口大小, 必须为正奇数
    #[getset(get = "pub", set = "pub")]
    block_size: i32,
    /// 扫描线优化参数p1: 相邻像素视差变化1时的惩罚
    #[getset(get = "pub", set = "pub")]
    p1: u32,
    /// 扫描线优化参数p2: 相邻像素视差跳变的惩罚
    #[getset(get = "pub", set = "pub")]
    p2: u32,
    /// 路径上相邻像素色差超过该阈值时降低p2
    #[getset(get = "pub", set = "pub")]
    gradient_threshold: i32,
    /// 预处理水平梯度截断值 [1, 63]
    #[getset(get = "pub", set = "pub")]
    pre_filter_cap: i32,
    /// 唯一性约束(百分比), 0 表示不检查
    #[getset(get = "pub", set = "pub")]
    uniqueness_ratio: i32,
    /// 左右一致性约束阈值(像素)
    #[getset(get = "pub", set = "pub")]
    disp12_max_diff: i32,
    /// 是否检查左右一致性
    #[getset(get = "pub", set = "pub")]
    do_lr_check: bool,
    /// 连通区域面积小于等于该值时视为斑点, 0 表示不做斑点过滤
    #[getset(get = "pub", set = "pub")]
    speckle_window_size: i32,
    /// 连通区域内相邻像素允许的最大视差差值(像素)
    #[getset(get = "pub", set = "pub")]
    speckle_range: i32,
    /// 代价聚合路径
    #[getset(get = "pub", set = "pub")]
    paths: AggregationPaths,
}

impl Default for SgbmOption {
    fn default() -> Self {
        Self {
            min_disparity: 0,
            num_disparities: 64,
            block_size: 3,
            p1: 216,
            p2: 864,
            gradient_threshold: 15,
            pre_filter_cap: 63,
            uniqueness_ratio: 10,
            disp12_max_diff: 1,
            do_lr_check: true,
            speckle_window_size: 100,
            speckle_range: 2,
            paths: AggregationPaths::Four,
        }
    }
}

impl SgbmOption {
    pub fn new(min_disparity: i32, num_disparities: i32, block_size: i32) -> Self {
        let mut r = SgbmOption::default();
        r.min_disparity = min_disparity;
        r.num_disparities = num_disparities;
        r.block_size = block_size;
        r
    }
    ///
    pub fn build(&self) -> Self {
        *self
    }
    /// 最大视差(包含)
    pub fn max_disparity(&self) -> i32 {
        self.min_disparity + self.num_disparities - 1
    }
    /// 参数检查, 在任何计算之前调用
    pub fn validate(&self) -> Result<()> {
        if self.num_disparities <= 0 || self.num_disparities % 16 != 0 {
            return Err(Error::invalid_parameter(1002, error::ERROR_1002));
        }
        if self.block_size <= 0 || self.block_size % 2 != 1 {
            return Err(Error::invalid_parameter(1003, error::ERROR_1003));
        }
        if self.pre_filter_cap < 1 || self.pre_filter_cap > 63 {
            return Err(Error::invalid_parameter(1008, error::ERROR_1008));
        }
        if self.uniqueness_ratio < 0 || self.uniqueness_ratio > 100 {
            return Err(Error::invalid_parameter(1013, error::ERROR_1013));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let option = SgbmOption::new(0, 32, 5)
            .set_uniqueness_ratio(0)
            .set_paths(AggregationPaths::Eight)
            .build();
        assert_eq!(*option.num_disparities(), 32);
        assert_eq!(*option.block_size(), 5);
        assert_eq!(*option.uniqueness_ratio(), 0);
        assert_eq!(option.paths().count(), 8);
        assert_eq!(option.max_disparity(), 31);
    }

    #[test]
    fn test_validate() {
        assert!(SgbmOption::default().validate().is_ok());
        for n in &[0, -16, 15, 40] {
            let err = SgbmOption::new(0, *n, 3).validate().unwrap_err();
            assert!(err.is_invalid_parameter());
            assert_eq!(err.code, 1002);
        }
        for b in &[0, -1, 2, 8] {
            let err = SgbmOption::new(0, 16, *b).validate().unwrap_err();
            assert!(err.is_invalid_parameter());
            assert_eq!(err.code, 1003);
        }
        let err = SgbmOption::new(0, 16, 3)
            .set_pre_filter_cap(64)
            .build()
            .validate()
            .unwrap_err();
        assert_eq!(err.code, 1008);
    }

    #[test]
    fn test_validate_uniqueness_ratio() {
        for r in &[0, 10, 100] {
            assert!(SgbmOption::new(0, 16, 3).set_uniqueness_ratio(*r).build().validate().is_ok());
        }
        for r in &[150, 101, -1] {
            let err = SgbmOption::new(0, 16, 3)
                .set_uniqueness_ratio(*r)
                .build()
                .validate()
                .unwrap_err();
            assert!(err.is_invalid_parameter());
            assert_eq!(err.code, 1013);
        }
    }
}
