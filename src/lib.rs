pub mod core;
pub mod error;
pub mod pipeline;
pub mod preprocess;
pub mod scanline;
pub mod sgbm;
pub mod utils;
pub mod wls;

pub use pipeline::{PipelineOption, PipelineOutput, StereoPipeline};
pub use preprocess::Preprocessor;
pub use sgbm::StereoSgbm;
pub use wls::{DisparityWlsFilter, FastGlobalSmoother, FilterInput, FilterOutput};
