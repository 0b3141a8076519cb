mod disparity;
mod option;
mod point;
mod rect;
mod wls_option;

pub use disparity::{
    to_fixed, ConfidenceMap, DisparityMap, DisparityResult, DISP_SCALE, DISP_SHIFT, INVALID_DISP,
};
pub use option::{AggregationPaths, SgbmOption};
pub use point::Point;
pub use rect::{compute_roi, Rect};
pub use wls_option::{FilterMode, WlsOption};
