//! Which widget goes where: pages, layers and widget placements.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
    canvas::{Canvas, CanvasError},
    color::Rgba,
    widget::{Widget, WidgetSet},
};

/// 关闭时显示的可选页面
pub const GOODBYE_PAGE: i32 = -1;

pub fn page_name(page: i32) -> String {
    if page == GOODBYE_PAGE {
        "goodbye page".to_string()
    } else {
        format!("page {page}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("layout has no pages with widgets")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub name: String,
    pub x: i32,
    pub y: i32,
}

impl Placement {
    pub fn new(name: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            name: name.into(),
            x,
            y,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Layer {
    pub number: i32,
    pub widgets: Vec<Placement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Page {
    pub number: i32,
    pub layers: BTreeMap<i32, Layer>,
}

impl Page {
    pub fn new(number: i32) -> Self {
        Self {
            number,
            layers: BTreeMap::new(),
        }
    }

    pub fn with_layer(mut self, number: i32, widgets: Vec<Placement>) -> Self {
        self.layers.insert(number, Layer { number, widgets });
        self
    }

    /// 页面上所有 widget 的名字, 可能重复
    pub fn widget_names(&self) -> impl Iterator<Item = &str> {
        self.layers
            .values()
            .flat_map(|l| l.widgets.iter().map(|p| p.name.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Layout {
    pages: BTreeMap<i32, Page>,
    default_page: Option<i32>,
    sequence: Vec<i32>,
}

impl Layout {
    pub fn new(pages: impl IntoIterator<Item = Page>, default_page: Option<i32>, sequence: Vec<i32>) -> Self {
        Self {
            pages: pages.into_iter().map(|p| (p.number, p)).collect(),
            default_page,
            sequence,
        }
    }

    pub fn pages(&self) -> &BTreeMap<i32, Page> {
        &self.pages
    }

    pub fn page(&self, page: i32) -> Option<&Page> {
        self.pages.get(&page)
    }

    pub fn has_page(&self, page: i32) -> bool {
        self.pages.contains_key(&page)
    }

    pub fn has_goodbye(&self) -> bool {
        self.has_page(GOODBYE_PAGE)
    }

    /// 去掉引用不存在 widget 的放置和空图层, 然后去掉空页面
    pub fn prune(&mut self, widgets: &WidgetSet) -> Result<(), LayoutError> {
        for page in self.pages.values_mut() {
            let number = page.number;
            for layer in page.layers.values_mut() {
                let layer_number = layer.number;
                let mut missing: Vec<String> = Vec::new();
                layer.widgets.retain(|p| {
                    let known = widgets.contains(&p.name);
                    if !known && !missing.contains(&p.name) {
                        error!(
                            widget = %p.name,
                            layer = layer_number,
                            "layout: widget on {} is not declared, ignored",
                            page_name(number)
                        );
                        missing.push(p.name.clone());
                    }
                    known
                });
            }

            let before = page.layers.len();
            page.layers.retain(|_, l| !l.widgets.is_empty());
            if page.layers.len() != before {
                debug!("layout: removed {} empty layer(s) from {}", before - page.layers.len(), page_name(page.number));
            }
        }

        self.pages.retain(|&number, page| {
            let keep = !page.layers.is_empty();
            if !keep {
                warn!("layout: {} has no widgets, removed", page_name(number));
            }
            keep
        });

        if self.pages.keys().all(|&p| p == GOODBYE_PAGE) {
            return Err(LayoutError::Empty);
        }

        let pages = &self.pages;
        self.sequence.retain(|&p| {
            let keep = p != GOODBYE_PAGE && pages.contains_key(&p);
            if !keep {
                warn!("layout: {} in page sequence does not exist, ignored", page_name(p));
            }
            keep
        });
        Ok(())
    }

    pub fn initial_page(&self) -> i32 {
        if let Some(page) = self.default_page {
            if self.has_page(page) && page != GOODBYE_PAGE {
                return page;
            }
            warn!("layout: default {} does not exist", page_name(page));
        }
        if self.has_page(0) {
            return 0;
        }
        self.pages
            .keys()
            .copied()
            .find(|&p| p != GOODBYE_PAGE)
            .unwrap_or(0)
    }

    /// 翻页顺序, 未配置时为所有普通页面升序
    pub fn sequence(&self) -> Vec<i32> {
        if !self.sequence.is_empty() {
            return self.sequence.clone();
        }
        self.pages.keys().copied().filter(|&p| p != GOODBYE_PAGE).collect()
    }

    fn step(&self, current: i32, forward: bool) -> Option<i32> {
        let sequence = self.sequence();
        if sequence.is_empty() {
            return None;
        }
        let len = sequence.len();
        let next = match sequence.iter().position(|&p| p == current) {
            Some(i) if forward => (i + 1) % len,
            Some(i) => (i + len - 1) % len,
            None if forward => 0,
            None => len - 1,
        };
        Some(sequence[next])
    }

    pub fn next_page(&self, current: i32) -> Option<i32> {
        self.step(current, true)
    }

    pub fn prev_page(&self, current: i32) -> Option<i32> {
        self.step(current, false)
    }

    /// 为每个页面的每个图层分配画布平面
    pub fn init_canvas(&self, canvas: &mut Canvas) {
        for page in self.pages.values() {
            for &layer in page.layers.keys() {
                canvas.add_layer(page.number, layer);
            }
        }
    }

    /// Draws every widget of `page` onto the canvas.
    ///
    /// The previous footprint of each widget is erased first, because its
    /// size might have changed. Pixels that land outside the panel are
    /// dropped and reported once per placement; a desync is returned.
    pub fn compose(&self, page: i32, canvas: &mut Canvas, widgets: &WidgetSet) -> Result<(), CanvasError> {
        let Some(p) = self.pages.get(&page) else {
            return Err(CanvasError::Desync { page, layer: None });
        };

        for layer in p.layers.values() {
            for placement in &layer.widgets {
                let Some(widget) = widgets.get(&placement.name) else {
                    continue;
                };
                let dropped = draw(canvas, page, layer.number, placement, widget)?;
                if dropped > 0 {
                    warn!(
                        widget = %placement.name,
                        layer = layer.number,
                        x = placement.x,
                        y = placement.y,
                        dropped,
                        "layout: pixels outside of the panel on {}",
                        page_name(page)
                    );
                }
            }
        }
        Ok(())
    }
}

/// 返回因越界被丢弃的像素数
fn draw(
    canvas: &mut Canvas,
    page: i32,
    layer: i32,
    at: &Placement,
    widget: &dyn Widget,
) -> Result<usize, CanvasError> {
    let mut dropped = 0;
    let mut put = |x: usize, y: usize, color: Rgba| -> Result<(), CanvasError> {
        match canvas.add_pixel(at.x + x as i32, at.y + y as i32, page, layer, color) {
            Err(CanvasError::OutOfBounds { .. }) => {
                dropped += 1;
                Ok(())
            }
            other => other,
        }
    };

    for y in 0..widget.previous_height() {
        for x in 0..widget.previous_width() {
            put(x, y, Rgba::TRANSPARENT)?;
        }
    }
    for (x, y, color) in widget.bitmap().iter() {
        put(x, y, color)?;
    }
    Ok(dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{orientation::Orientation, widget::Solid};

    fn widgets() -> WidgetSet {
        let mut set = WidgetSet::new();
        set.insert("box", Box::new(Solid::new(2, 2, Rgba::RED)));
        set.insert("dot", Box::new(Solid::new(1, 1, Rgba::BLUE)));
        set
    }

    fn layout() -> Layout {
        Layout::new(
            [
                Page::new(0)
                    .with_layer(0, vec![Placement::new("box", 0, 0)])
                    .with_layer(1, vec![Placement::new("dot", 1, 1), Placement::new("ghost", 0, 0)]),
                Page::new(1).with_layer(0, vec![Placement::new("ghost", 0, 0)]),
                Page::new(2).with_layer(3, vec![Placement::new("dot", 7, 7)]),
                Page::new(GOODBYE_PAGE).with_layer(0, vec![Placement::new("box", 0, 0)]),
            ],
            None,
            vec![],
        )
    }

    #[test]
    fn names() {
        assert_eq!(page_name(-1), "goodbye page");
        assert_eq!(page_name(3), "page 3");
    }

    #[test]
    fn prune_drops_unknown_widgets_and_empty_pages() {
        let mut layout = layout();
        layout.prune(&widgets()).unwrap();
        assert!(!layout.has_page(1));
        let page0 = layout.page(0).unwrap();
        assert_eq!(page0.widget_names().collect::<Vec<_>>(), vec!["box", "dot"]);
        assert!(layout.has_goodbye());
        assert_eq!(layout.sequence(), vec![0, 2]);
    }

    #[test]
    fn prune_fails_without_pages() {
        let mut layout = Layout::new([Page::new(0).with_layer(0, vec![Placement::new("x", 0, 0)])], None, vec![]);
        assert_eq!(layout.prune(&widgets()), Err(LayoutError::Empty));
    }

    #[test]
    fn initial_page_fallbacks() {
        let mut layout = layout();
        assert_eq!(layout.initial_page(), 0);
        layout.default_page = Some(2);
        assert_eq!(layout.initial_page(), 2);
        layout.default_page = Some(9);
        assert_eq!(layout.initial_page(), 0);
        let only = Layout::new([Page::new(GOODBYE_PAGE), Page::new(4), Page::new(6)], Some(-1), vec![]);
        assert_eq!(only.initial_page(), 4);
    }

    #[test]
    fn page_sequence_wraps() {
        let layout = Layout::new([Page::new(0), Page::new(1), Page::new(5)], None, vec![5, 0]);
        assert_eq!(layout.next_page(5), Some(0));
        assert_eq!(layout.next_page(0), Some(5));
        assert_eq!(layout.prev_page(5), Some(0));
        assert_eq!(layout.next_page(1), Some(5));
        let layout = Layout::new([Page::new(0), Page::new(1), Page::new(5)], None, vec![]);
        assert_eq!(layout.prev_page(0), Some(5));
        assert_eq!(layout.next_page(5), Some(0));
    }

    #[test]
    fn compose_draws_and_erases() {
        let mut layout = layout();
        let mut set = widgets();
        layout.prune(&set).unwrap();
        let mut canvas = Canvas::new(4, 4, Orientation::Rotate0, Rgba::BLACK);
        layout.init_canvas(&mut canvas);

        set.update(["box", "dot"]);
        layout.compose(0, &mut canvas, &set).unwrap();
        assert_eq!(canvas.blend(0, 0, 0).unwrap(), Rgba::RED);
        assert_eq!(canvas.blend(0, 1, 1).unwrap(), Rgba::BLUE);
        assert_eq!(canvas.blend(0, 3, 3).unwrap(), Rgba::BLACK.with_alpha(0));
    }

    #[test]
    fn compose_tolerates_out_of_bounds() {
        let mut layout = layout();
        let mut set = widgets();
        layout.prune(&set).unwrap();
        let mut canvas = Canvas::new(4, 4, Orientation::Rotate0, Rgba::BLACK);
        layout.init_canvas(&mut canvas);
        set.update(["dot"]);
        // dot 在 (7, 7), 完全在面板外
        assert!(layout.compose(2, &mut canvas, &set).is_ok());
    }

    #[test]
    fn compose_reports_desync() {
        let layout = layout();
        let mut set = widgets();
        set.update(["box"]);
        let mut canvas = Canvas::new(4, 4, Orientation::Rotate0, Rgba::BLACK);
        let err = layout.compose(0, &mut canvas, &set).unwrap_err();
        assert!(err.is_desync());
        assert!(layout.compose(42, &mut canvas, &set).unwrap_err().is_desync());
    }
}
