//! Bitmap producing widgets.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use crate::{color::Rgba, plugin::Values};

/// 行优先的 RGBA 位图
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitmap {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<Rgba>,
}

impl Bitmap {
    pub fn filled(width: usize, height: usize, color: Rgba) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width * height],
        }
    }

    pub fn get(&self, x: usize, y: usize) -> Rgba {
        self.pixels[y * self.width + x]
    }

    /// `(x, y, color)` for every pixel, row by row.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, Rgba)> + '_ {
        let w = self.width.max(1);
        self.pixels.iter().enumerate().map(move |(i, &c)| (i % w, i / w, c))
    }
}

pub trait Widget: Send {
    /// 重新计算内容, 返回是否有变化
    fn update(&mut self) -> bool;

    fn bitmap(&self) -> &Bitmap;

    fn width(&self) -> usize {
        self.bitmap().width
    }

    fn height(&self) -> usize {
        self.bitmap().height
    }

    /// Size of the bitmap before the last change, used to erase the old footprint.
    fn previous_width(&self) -> usize;

    fn previous_height(&self) -> usize;
}

/// A rectangle of one color, optionally blinking.
#[derive(Debug)]
pub struct Solid {
    color: Rgba,
    size: (usize, usize),
    previous: (usize, usize),
    blink: Option<Duration>,
    visible: bool,
    toggled: Option<Instant>,
    bitmap: Bitmap,
}

impl Solid {
    pub fn new(width: usize, height: usize, color: Rgba) -> Self {
        Self {
            color,
            size: (width, height),
            previous: (0, 0),
            blink: None,
            visible: true,
            toggled: None,
            bitmap: Bitmap::default(),
        }
    }

    pub fn with_blink(mut self, interval: Duration) -> Self {
        self.blink = (!interval.is_zero()).then_some(interval);
        self
    }

    pub fn update_at(&mut self, now: Instant) -> bool {
        let Some(last) = self.toggled else {
            self.toggled = Some(now);
            self.render();
            return true;
        };

        match self.blink {
            Some(interval) if now.duration_since(last) >= interval => {
                self.visible = !self.visible;
                self.toggled = Some(now);
                self.render();
                true
            }
            _ => false,
        }
    }

    fn render(&mut self) {
        self.previous = (self.bitmap.width, self.bitmap.height);
        let color = if self.visible { self.color } else { Rgba::TRANSPARENT };
        self.bitmap = Bitmap::filled(self.size.0, self.size.1, color);
    }
}

impl Widget for Solid {
    fn update(&mut self) -> bool {
        self.update_at(Instant::now())
    }

    fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    fn previous_width(&self) -> usize {
        self.previous.0
    }

    fn previous_height(&self) -> usize {
        self.previous.1
    }
}

/// 横向进度条, 填充比例为 `key` 的当前值除以 `max`
#[derive(Debug)]
pub struct Bar {
    values: Values,
    key: String,
    max: f64,
    color: Rgba,
    size: (usize, usize),
    previous: (usize, usize),
    filled: Option<usize>,
    bitmap: Bitmap,
}

impl Bar {
    pub fn new(values: Values, key: impl Into<String>, max: f64, width: usize, height: usize, color: Rgba) -> Self {
        Self {
            values,
            key: key.into(),
            max,
            color,
            size: (width, height),
            previous: (0, 0),
            filled: None,
            bitmap: Bitmap::default(),
        }
    }

    /// 已填充的列数, 值缺失时为 0
    fn columns(&self) -> usize {
        let value = self.values.get(&self.key).unwrap_or(0.0);
        let fraction = if self.max > 0.0 { (value / self.max).clamp(0.0, 1.0) } else { 0.0 };
        (fraction * self.size.0 as f64).round() as usize
    }
}

impl Widget for Bar {
    fn update(&mut self) -> bool {
        let columns = self.columns();
        if self.filled == Some(columns) {
            return false;
        }
        self.filled = Some(columns);
        self.previous = (self.bitmap.width, self.bitmap.height);
        let (w, h) = self.size;
        let pixels = (0..w * h)
            .map(|i| if i % w < columns { self.color } else { Rgba::TRANSPARENT })
            .collect();
        self.bitmap = Bitmap {
            width: w,
            height: h,
            pixels,
        };
        true
    }

    fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    fn previous_width(&self) -> usize {
        self.previous.0
    }

    fn previous_height(&self) -> usize {
        self.previous.1
    }
}

/// 按名字索引的全部 widget
#[derive(Default)]
pub struct WidgetSet {
    widgets: BTreeMap<String, Box<dyn Widget>>,
}

impl WidgetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, widget: Box<dyn Widget>) {
        self.widgets.insert(name.into(), widget);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Widget> {
        self.widgets.get(name).map(|w| w.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.widgets.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.widgets.keys().map(String::as_str)
    }

    /// Updates every named widget once (duplicates ignored), returns whether any changed.
    pub fn update<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) -> bool {
        let mut seen = Vec::new();
        let mut changed = false;
        for name in names {
            if seen.contains(&name) {
                continue;
            }
            seen.push(name);
            if let Some(widget) = self.widgets.get_mut(name) {
                changed |= widget.update();
            }
        }
        changed
    }
}

impl std::fmt::Debug for WidgetSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}
