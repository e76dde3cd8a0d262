//! Per-page, per-layer pixel planes and the compositor that flattens them.
//!
//! Planes are always stored unrotated in physical (panel) coordinates.
//! Writers address pixels logically through [`Canvas::add_pixel`], which
//! applies the [`Orientation`] first; the driver reads the physical result
//! of [`Canvas::flatten`].

pub mod dirty;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::{color::Rgba, orientation::Orientation, rect::Rect};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanvasError {
    /// 旋转后仍在物理画布外, 这个像素被丢弃
    #[error("pixel ({x}, {y}) -> ({px}, {py}) is outside of the {width}x{height} canvas")]
    OutOfBounds {
        x: i32,
        y: i32,
        px: i32,
        py: i32,
        width: usize,
        height: usize,
    },
    /// 画布和布局不一致, 属于内部逻辑错误
    #[error("canvas desync: {}", describe_desync(.page, .layer))]
    Desync { page: i32, layer: Option<i32> },
}

fn describe_desync(page: &i32, layer: &Option<i32>) -> String {
    let page = crate::layout::page_name(*page);
    match *layer {
        Some(layer) => format!("{page} does not have layer {layer} initialized"),
        None => format!("{page} is not initialized or has no layers"),
    }
}

impl CanvasError {
    pub const fn is_desync(&self) -> bool {
        matches!(self, Self::Desync { .. })
    }
}

/// 一帧合成后的物理图像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: usize,
    height: usize,
    pixels: Vec<Rgba>,
}

impl Frame {
    pub fn filled(width: usize, height: usize, color: Rgba) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width * height],
        }
    }

    pub fn from_pixels(width: usize, height: usize, pixels: Vec<Rgba>) -> Option<Self> {
        (pixels.len() == width * height).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    pub const fn width(&self) -> usize {
        self.width
    }

    pub const fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[Rgba] {
        &self.pixels
    }

    pub fn get(&self, x: usize, y: usize) -> Rgba {
        self.pixels[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, color: Rgba) {
        self.pixels[y * self.width + x] = color;
    }

    pub fn fill(&mut self, color: Rgba) {
        self.pixels.fill(color);
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(0, 0, self.width as i32, self.height as i32)
    }

    /// Row-major copy of `rect`, which must lie inside the frame.
    pub fn region(&self, rect: Rect) -> Vec<Rgba> {
        let mut out = Vec::with_capacity(rect.area());
        for y in rect.min.y..=rect.max.y {
            let row = y as usize * self.width;
            out.extend_from_slice(&self.pixels[row + rect.min.x as usize..=row + rect.max.x as usize]);
        }
        out
    }
}

type Plane = Vec<Rgba>;

#[derive(Debug)]
pub struct Canvas {
    width: usize,
    height: usize,
    orientation: Orientation,
    basecolor: Rgba,
    pages: BTreeMap<i32, BTreeMap<i32, Plane>>,
    /// 每个页面自上次 [`Canvas::take_damage`] 以来写过的物理区域
    damage: BTreeMap<i32, Rect>,
}

impl Canvas {
    /// `width`/`height` 是设备报告的物理尺寸
    pub fn new(width: usize, height: usize, orientation: Orientation, basecolor: Rgba) -> Self {
        Self {
            width,
            height,
            orientation,
            basecolor,
            pages: BTreeMap::new(),
            damage: BTreeMap::new(),
        }
    }

    pub fn add_layer(&mut self, page: i32, layer: i32) {
        let size = self.width * self.height;
        self.pages
            .entry(page)
            .or_default()
            .entry(layer)
            .or_insert_with(|| vec![Rgba::TRANSPARENT; size]);
    }

    pub const fn physical_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub const fn logical_size(&self) -> (usize, usize) {
        self.orientation.logical_size((self.width, self.height))
    }

    pub const fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub const fn basecolor(&self) -> Rgba {
        self.basecolor
    }

    pub fn has_page(&self, page: i32) -> bool {
        self.pages.contains_key(&page)
    }

    pub fn layers(&self, page: i32) -> impl Iterator<Item = i32> + '_ {
        self.pages.get(&page).into_iter().flat_map(|l| l.keys().copied())
    }

    /// 所有图层重置为透明
    pub fn clear(&mut self) {
        for plane in self.pages.values_mut().flat_map(|p| p.values_mut()) {
            plane.fill(Rgba::TRANSPARENT);
        }
        self.damage.clear();
    }

    /// Bounding box of every physical pixel written to `page` since the last call.
    pub fn take_damage(&mut self, page: i32) -> Rect {
        self.damage.remove(&page).unwrap_or_default()
    }

    pub fn add_pixel(
        &mut self,
        x: i32,
        y: i32,
        page: i32,
        layer: i32,
        color: Rgba,
    ) -> Result<(), CanvasError> {
        let (lw, lh) = self.logical_size();
        let (px, py) = self.orientation.to_physical(x, y, lw as i32, lh as i32);

        if px < 0 || py < 0 || px as usize >= self.width || py as usize >= self.height {
            return Err(CanvasError::OutOfBounds {
                x,
                y,
                px,
                py,
                width: self.width,
                height: self.height,
            });
        }

        let plane = self
            .pages
            .get_mut(&page)
            .ok_or(CanvasError::Desync { page, layer: None })?
            .get_mut(&layer)
            .ok_or(CanvasError::Desync {
                page,
                layer: Some(layer),
            })?;
        plane[py as usize * self.width + px as usize] = color;
        self.damage.entry(page).or_default().include(px, py);
        Ok(())
    }

    fn page_layers(&self, page: i32) -> Result<&BTreeMap<i32, Plane>, CanvasError> {
        match self.pages.get(&page) {
            Some(layers) if !layers.is_empty() => Ok(layers),
            _ => Err(CanvasError::Desync { page, layer: None }),
        }
    }

    /// 物理坐标 `(x, y)` 处 `page` 的可见颜色
    pub fn blend(&self, page: i32, x: usize, y: usize) -> Result<Rgba, CanvasError> {
        let layers = self.page_layers(page)?;
        Ok(blend_at(layers, y * self.width + x, self.basecolor))
    }

    pub fn flatten(&self, page: i32) -> Result<Frame, CanvasError> {
        let layers = self.page_layers(page)?;
        let pixels = (0..self.width * self.height)
            .map(|i| blend_at(layers, i, self.basecolor))
            .collect();
        Ok(Frame {
            width: self.width,
            height: self.height,
            pixels,
        })
    }

    /// Recomposites only `rect` into `into`, leaving other pixels untouched.
    pub fn flatten_region(&self, page: i32, rect: Rect, into: &mut Frame) -> Result<(), CanvasError> {
        let layers = self.page_layers(page)?;
        let rect = rect.clamped(self.width as i32, self.height as i32);
        if rect.is_empty() {
            return Ok(());
        }
        for y in rect.min.y as usize..=rect.max.y as usize {
            for x in rect.min.x as usize..=rect.max.x as usize {
                let i = y * self.width + x;
                into.pixels[i] = blend_at(layers, i, self.basecolor);
            }
        }
        Ok(())
    }
}

/// 图层按编号升序从下往上合成.
///
/// 从最低的一层完全不透明像素开始 (没有的话从最底层开始), 在底色之上依次做
/// "over". 全透明像素直接跳过, 完全不透明像素直接替换.
fn blend_at(layers: &BTreeMap<i32, Plane>, index: usize, basecolor: Rgba) -> Rgba {
    let start = layers
        .iter()
        .find(|(_, plane)| plane[index].is_opaque())
        .map_or(i32::MIN, |(&layer, _)| layer);

    let mut out = basecolor.with_alpha(0x00);
    for plane in layers.range(start..).map(|(_, plane)| plane) {
        let p = plane[index];
        match p.a {
            0x00 => {}
            0xff => out = p,
            _ => out = p.over(out),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn canvas(layers: &[i32]) -> Canvas {
        let mut c = Canvas::new(4, 3, Orientation::Rotate0, Rgba::BLACK);
        for &l in layers {
            c.add_layer(0, l);
        }
        c
    }

    fn fill(c: &mut Canvas, layer: i32, color: Rgba) {
        let (w, h) = c.logical_size();
        for y in 0..h as i32 {
            for x in 0..w as i32 {
                c.add_pixel(x, y, 0, layer, color).unwrap();
            }
        }
    }

    #[test]
    fn opaque_red_under_transparent_layer() {
        let mut c = canvas(&[0, 1]);
        fill(&mut c, 0, Rgba::RED);
        fill(&mut c, 1, Rgba::TRANSPARENT);
        let frame = c.flatten(0).unwrap();
        assert!(frame.pixels().iter().all(|&p| p == Rgba::RED));
    }

    #[test]
    fn empty_stack_shows_transparent_basecolor() {
        let c = canvas(&[0, 1]);
        assert_eq!(c.blend(0, 1, 1), Ok(Rgba::BLACK.with_alpha(0)));
    }

    #[test]
    fn upper_layer_blends_over_lower() {
        let mut c = canvas(&[0, 5]);
        c.add_pixel(1, 1, 0, 0, Rgba::BLACK).unwrap();
        c.add_pixel(1, 1, 0, 5, Rgba::new(0xff, 0xff, 0xff, 0x80)).unwrap();
        assert_eq!(c.blend(0, 1, 1), Ok(Rgba::opaque(0x80, 0x80, 0x80)));
    }

    #[test]
    fn partial_layers_below_first_opaque_are_skipped() {
        let mut c = canvas(&[0, 1, 2]);
        c.add_pixel(0, 0, 0, 0, Rgba::new(0, 0, 0xff, 0x40)).unwrap();
        c.add_pixel(0, 0, 0, 1, Rgba::GREEN).unwrap();
        assert_eq!(c.blend(0, 0, 0), Ok(Rgba::GREEN));
    }

    #[test]
    fn topmost_opaque_layer_wins() {
        let mut c = canvas(&[0, 1]);
        c.add_pixel(2, 0, 0, 0, Rgba::GREEN).unwrap();
        c.add_pixel(2, 0, 0, 1, Rgba::BLUE).unwrap();
        assert_eq!(c.blend(0, 2, 0), Ok(Rgba::BLUE));
    }

    #[test]
    fn out_of_bounds_is_dropped() {
        let mut c = canvas(&[0]);
        let err = c.add_pixel(4, 0, 0, 0, Rgba::RED).unwrap_err();
        assert!(matches!(err, CanvasError::OutOfBounds { px: 4, .. }));
        assert!(!err.is_desync());
        let err = c.add_pixel(-1, 0, 0, 0, Rgba::RED).unwrap_err();
        assert!(matches!(err, CanvasError::OutOfBounds { .. }));
    }

    #[test]
    fn unknown_page_or_layer_is_desync() {
        let mut c = canvas(&[0]);
        assert_eq!(
            c.add_pixel(0, 0, 3, 0, Rgba::RED),
            Err(CanvasError::Desync { page: 3, layer: None })
        );
        assert_eq!(
            c.add_pixel(0, 0, 0, 7, Rgba::RED),
            Err(CanvasError::Desync { page: 0, layer: Some(7) })
        );
        assert!(c.flatten(1).unwrap_err().is_desync());
    }

    #[test]
    fn rotated_writes_land_unrotated() {
        // 物理 32x64, 旋转 90 度后逻辑 64x32
        let mut c = Canvas::new(32, 64, Orientation::Rotate90, Rgba::BLACK);
        c.add_layer(0, 0);
        assert_eq!(c.logical_size(), (64, 32));
        c.add_pixel(0, 0, 0, 0, Rgba::RED).unwrap();
        assert_eq!(c.blend(0, 0, 63), Ok(Rgba::RED));
    }

    #[test]
    fn clear_resets_all_planes() {
        let mut c = canvas(&[0, 1]);
        fill(&mut c, 0, Rgba::RED);
        c.clear();
        assert_eq!(c.blend(0, 0, 0), Ok(Rgba::BLACK.with_alpha(0)));
    }

    #[test]
    fn damage_is_tracked_in_physical_coordinates() {
        let mut c = Canvas::new(32, 64, Orientation::Rotate90, Rgba::BLACK);
        c.add_layer(0, 0);
        c.add_layer(1, 0);
        c.add_pixel(0, 0, 0, 0, Rgba::RED).unwrap();
        c.add_pixel(3, 2, 0, 0, Rgba::RED).unwrap();
        let _ = c.add_pixel(99, 0, 0, 0, Rgba::RED);
        assert_eq!(c.take_damage(0), Rect::new(0, 60, 2, 63));
        assert!(c.take_damage(0).is_empty());
        assert!(c.take_damage(1).is_empty());

        c.add_pixel(1, 1, 1, 0, Rgba::RED).unwrap();
        c.clear();
        assert!(c.take_damage(1).is_empty());
    }

    #[test]
    fn region_flatten_leaves_other_pixels() {
        let mut c = canvas(&[0]);
        fill(&mut c, 0, Rgba::RED);
        let mut frame = Frame::filled(4, 3, Rgba::WHITE);
        c.flatten_region(0, Rect::new(1, 1, 2, 1), &mut frame).unwrap();
        assert_eq!(frame.region(Rect::new(0, 1, 3, 1)), vec![Rgba::WHITE, Rgba::RED, Rgba::RED, Rgba::WHITE]);
        assert_eq!(frame.get(1, 0), Rgba::WHITE);
        assert!(c.flatten_region(2, frame.bounds(), &mut frame).unwrap_err().is_desync());
    }

    #[test]
    fn region_copy_is_row_major() {
        let mut f = Frame::filled(4, 3, Rgba::BLACK);
        f.set(1, 1, Rgba::RED);
        f.set(2, 2, Rgba::BLUE);
        let region = f.region(Rect::new(1, 1, 2, 2));
        assert_eq!(region, vec![Rgba::RED, Rgba::BLACK, Rgba::BLACK, Rgba::BLUE]);
    }

    proptest! {
        #[test]
        fn transparent_layers_do_not_change_opaque_color(
            r: u8, g: u8, b: u8, tr: u8, tg: u8, tb: u8, above in 1usize..4,
        ) {
            let mut c = Canvas::new(2, 2, Orientation::Rotate0, Rgba::WHITE);
            c.add_layer(0, 0);
            c.add_pixel(0, 0, 0, 0, Rgba::opaque(r, g, b)).unwrap();
            for l in 1..=above as i32 {
                c.add_layer(0, l);
                c.add_pixel(0, 0, 0, l, Rgba::new(tr, tg, tb, 0)).unwrap();
            }
            prop_assert_eq!(c.blend(0, 0, 0), Ok(Rgba::opaque(r, g, b)));
        }
    }
}
