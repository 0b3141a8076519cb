use std::fmt;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 参数不合法, 在计算开始前检测
    InvalidParameter,
    /// 输入图像为空或者无法解码
    EmptyInput,
    /// 结果无法写出
    Output,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: i32,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, code: i32, message: &str) -> Self {
        Self {
            kind,
            code,
            message: message.to_string(),
        }
    }

    pub fn invalid_parameter(code: i32, message: &str) -> Self {
        Self::new(ErrorKind::InvalidParameter, code, message)
    }

    pub fn empty_input(code: i32, message: &str) -> Self {
        Self::new(ErrorKind::EmptyInput, code, message)
    }

    pub fn is_invalid_parameter(&self) -> bool {
        self.kind == ErrorKind::InvalidParameter
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Self::empty_input(1010, &format!("{}: {}", ERROR_1010, e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Output, 1014, &format!("{}: {}", ERROR_1014, e))
    }
}

impl std::error::Error for Error {}

pub type Result<T, E = Error> = ::std::result::Result<T, E>;

pub static ERROR_1001: &'static str = "Image width or height can not be less than 1";
pub static ERROR_1002: &'static str =
    "Incorrect num_disparities value: it should be positive and divisible by 16";
pub static ERROR_1003: &'static str = "Incorrect block_size value: it should be positive and odd";
pub static ERROR_1004: &'static str = "Left and right images must have the same dimensions";
pub static ERROR_1005: &'static str = "Unsupported filter (use wls_conf or wls_no_conf)";
pub static ERROR_1006: &'static str = "Disparity maps must have the same size as the guide image";
pub static ERROR_1007: &'static str = "Downscale factor must be in (0, 1]";
pub static ERROR_1008: &'static str = "Pre-filter cap must be in [1, 63]";
pub static ERROR_1009: &'static str = "Filter input does not match the configured filter mode";
pub static ERROR_1010: &'static str = "Cannot read image file";
pub static ERROR_1011: &'static str = "Lambda and sigma_color must be positive";
pub static ERROR_1012: &'static str = "Sharpness weight must be in [0, 1)";
pub static ERROR_1013: &'static str = "Incorrect uniqueness_ratio value: it should be in [0, 100]";
pub static ERROR_1014: &'static str = "Cannot write output";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::invalid_parameter(1002, ERROR_1002);
        assert_eq!(err.to_string(), format!("{} (code: 1002)", ERROR_1002));
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert_eq!(err.kind, ErrorKind::Output);
        assert_eq!(err.code, 1014);
        assert!(!err.is_invalid_parameter());
    }

    #[test]
    fn test_create_dir_failure_propagates() {
        // 在普通文件下创建目录必然失败
        let file = std::env::temp_dir().join(format!("disparity-filter-{}", std::process::id()));
        std::fs::write(&file, b"x").unwrap();
        let create = || -> Result<()> {
            std::fs::create_dir_all(file.join("out"))?;
            Ok(())
        };
        let err = create().unwrap_err();
        let _ = std::fs::remove_file(&file);
        assert_eq!(err.kind, ErrorKind::Output);
    }
}
