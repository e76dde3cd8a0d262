use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 面板的四种固定旋转, 只影响像素坐标的换算, 不影响缓冲区布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Orientation {
    #[default]
    Rotate0 = 0,
    Rotate90 = 1,
    Rotate180 = 2,
    Rotate270 = 3,
}

impl Orientation {
    pub const ALL: [Self; 4] = [Self::Rotate0, Self::Rotate90, Self::Rotate180, Self::Rotate270];

    pub const fn angle(self) -> u16 {
        match self {
            Self::Rotate0 => 0,
            Self::Rotate90 => 90,
            Self::Rotate180 => 180,
            Self::Rotate270 => 270,
        }
    }

    /// 转了 90 或 270 度, 与 [`Orientation::is_portrait`] 相同
    pub const fn is_upside_down(self) -> bool {
        self.is_portrait()
    }

    pub const fn is_flipped(self) -> bool {
        matches!(self, Self::Rotate180 | Self::Rotate270)
    }

    /// Width and height trade places.
    pub const fn is_portrait(self) -> bool {
        matches!(self, Self::Rotate90 | Self::Rotate270)
    }

    /// 物理尺寸 -> 逻辑尺寸 (旋转后)
    pub const fn logical_size(self, physical: (usize, usize)) -> (usize, usize) {
        if self.is_portrait() {
            (physical.1, physical.0)
        } else {
            physical
        }
    }

    /// Maps a logical point to physical buffer coordinates.
    ///
    /// `width` and `height` are the logical (post-rotation) dimensions. The
    /// result may fall outside the buffer; bounds are checked by the caller.
    pub const fn to_physical(self, x: i32, y: i32, width: i32, height: i32) -> (i32, i32) {
        match self {
            Self::Rotate0 => (x, y),
            Self::Rotate90 => (y, width - 1 - x),
            Self::Rotate180 => (width - 1 - x, height - 1 - y),
            Self::Rotate270 => (height - 1 - y, x),
        }
    }

    pub const fn to_logical(self, px: i32, py: i32, width: i32, height: i32) -> (i32, i32) {
        match self {
            Self::Rotate0 => (px, py),
            Self::Rotate90 => (width - 1 - py, px),
            Self::Rotate180 => (width - 1 - px, height - 1 - py),
            Self::Rotate270 => (py, height - 1 - px),
        }
    }
}
