use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColorError {
    #[error("hex color string is empty")]
    Empty,
    #[error("hex color string length not acceptable: {0}")]
    Length(String),
    #[error("hex color contains letters outside of hex range (0123456789abcdef): {0}")]
    Digits(String),
}

/// 8 位 RGBA 颜色
///
/// `a == 0` 表示完全透明, 此时 RGB 在混合时无意义, 但比较时仍然逐通道比较
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Self = Self::new(0x00, 0x00, 0x00, 0x00);
    pub const BLACK: Self = Self::opaque(0x00, 0x00, 0x00);
    pub const WHITE: Self = Self::opaque(0xff, 0xff, 0xff);
    pub const RED: Self = Self::opaque(0xff, 0x00, 0x00);
    pub const GREEN: Self = Self::opaque(0x00, 0xff, 0x00);
    pub const BLUE: Self = Self::opaque(0x00, 0x00, 0xff);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 0xff)
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    pub const fn is_transparent(&self) -> bool {
        self.a == 0x00
    }

    pub const fn is_opaque(&self) -> bool {
        self.a == 0xff
    }

    /// "over" 运算: 把 `self` 叠加到 `dst` 上, 结果总是不透明
    pub fn over(self, dst: Self) -> Self {
        let a = u32::from(self.a);
        let mix = |s: u8, d: u8| ((u32::from(s) * a + u32::from(d) * (0xff - a)) / 0xff) as u8;
        Self::opaque(mix(self.r, dst.r), mix(self.g, dst.g), mix(self.b, dst.b))
    }

    /// RGB565, 高字节在前. 面板没有 alpha 通道, alpha 被丢弃
    pub const fn rgb565(&self) -> [u8; 2] {
        [
            (self.r & 0xf8) | ((self.g & 0xe0) >> 5),
            ((self.g & 0x1c) << 3) | ((self.b & 0xf8) >> 3),
        ]
    }

    /// [`Rgba::rgb565`] 的逆运算, 被截断的低位补零
    pub const fn from_rgb565(bytes: [u8; 2]) -> Self {
        Self::opaque(
            bytes[0] & 0xf8,
            ((bytes[0] & 0x07) << 5) | ((bytes[1] & 0xe0) >> 3),
            (bytes[1] & 0x1f) << 3,
        )
    }
}

/// Expands short forms (`rgb`, `rgba`, `rgbaa`) and validates digits.
fn normalize_hex(hex: &str) -> Result<String, ColorError> {
    let input = hex.trim().trim_start_matches('#').to_ascii_lowercase();
    let chars: Vec<char> = input.chars().collect();

    let out: String = match chars.len() {
        0 => return Err(ColorError::Empty),
        3 | 4 => chars.iter().flat_map(|&c| [c, c]).collect(),
        5 => chars[..3]
            .iter()
            .flat_map(|&c| [c, c])
            .chain(chars[3..].iter().copied())
            .collect(),
        6 | 8 => input.clone(),
        _ => return Err(ColorError::Length(hex.to_string())),
    };

    if !out.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ColorError::Digits(hex.to_string()));
    }
    Ok(out)
}

impl FromStr for Rgba {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = normalize_hex(s)?;
        let value = u32::from_str_radix(&hex, 16).map_err(|_| ColorError::Digits(s.to_string()))?;
        Ok(if hex.len() == 8 {
            let [r, g, b, a] = value.to_be_bytes();
            Self::new(r, g, b, a)
        } else {
            let [_, r, g, b] = value.to_be_bytes();
            Self::opaque(r, g, b)
        })
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
    }
}

impl<'de> Deserialize<'de> for Rgba {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 由配置决定的命名颜色, 启动后只读
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub foreground: Rgba,
    pub background: Rgba,
    /// 所有图层都透明时露出来的底色
    pub basecolor: Rgba,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            foreground: Rgba::WHITE,
            background: Rgba::BLACK,
            basecolor: Rgba::BLACK,
        }
    }
}
