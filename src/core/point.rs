use getset::{CopyGetters, Getters, MutGetters, Setters};

/// 像素坐标
#[derive(Getters, Setters, MutGetters, CopyGetters, Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Point {
    #[getset(get = "pub", set = "pub")]
    x: usize,
    #[getset(get = "pub", set = "pub")]
    y: usize,
}
impl Point {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
    /// 四邻域内位于 width x height 图像范围内的像素
    pub fn neighbors4(&self, width: usize, height: usize) -> impl Iterator<Item = Point> {
        let (x, y) = (self.x, self.y);
        let left = if x > 0 { Some(Point::new(x - 1, y)) } else { None };
        let right = if x + 1 < width { Some(Point::new(x + 1, y)) } else { None };
        let top = if y > 0 { Some(Point::new(x, y - 1)) } else { None };
        let bottom = if y + 1 < height { Some(Point::new(x, y + 1)) } else { None };
        left.into_iter().chain(right).chain(top).chain(bottom)
    }
}
