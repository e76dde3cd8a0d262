#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// 脏矩形, `min`/`max` 都是包含的
///
/// `min.x > max.x` (或 y) 时为空. 发给设备时远角就是 `max`,
/// 即半开区间 `[min, max + 1)` 的 `max + 1 - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub min: Point,
    pub max: Point,
}

impl Rect {
    pub const EMPTY: Self = Self {
        min: Point::new(i32::MAX, i32::MAX),
        max: Point::new(i32::MIN, i32::MIN),
    };

    pub const fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min: Point::new(min_x, min_y),
            max: Point::new(max_x, max_y),
        }
    }

    /// From an origin and a size; zero-sized input gives an empty rect.
    pub const fn from_size(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self::new(x, y, x + width - 1, y + height - 1)
    }

    pub const fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    pub const fn width(&self) -> i32 {
        if self.is_empty() { 0 } else { self.max.x - self.min.x + 1 }
    }

    pub const fn height(&self) -> i32 {
        if self.is_empty() { 0 } else { self.max.y - self.min.y + 1 }
    }

    pub const fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub const fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.min.x && x <= self.max.x && y >= self.min.y && y <= self.max.y
    }

    /// 扩展到包含 `(x, y)`
    pub fn include(&mut self, x: i32, y: i32) {
        self.min.x = self.min.x.min(x);
        self.min.y = self.min.y.min(y);
        self.max.x = self.max.x.max(x);
        self.max.y = self.max.y.max(y);
    }

    /// Grows every edge by `by`, clamped to `[0, width) x [0, height)`.
    pub fn padded(&self, by: i32, width: i32, height: i32) -> Self {
        if self.is_empty() {
            return *self;
        }
        Self::new(
            (self.min.x - by).max(0),
            (self.min.y - by).max(0),
            (self.max.x + by).min(width - 1),
            (self.max.y + by).min(height - 1),
        )
    }

    /// 与 `[0, width) x [0, height)` 求交
    pub fn clamped(&self, width: i32, height: i32) -> Self {
        Self::new(
            self.min.x.max(0),
            self.min.y.max(0),
            self.max.x.min(width - 1),
            self.max.y.min(height - 1),
        )
    }

    pub const fn intersects(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }
}

impl Default for Rect {
    fn default() -> Self {
        Self::EMPTY
    }
}
