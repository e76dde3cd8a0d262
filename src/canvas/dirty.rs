//! Dirty-rectangle tracking against the last transmitted frame.

use crate::{canvas::Frame, color::Rgba, rect::Rect};

/// 每条边外扩的像素, 容忍抗锯齿边缘渗到相邻的未变化像素
pub const PADDING: i32 = 5;

/// 连续这么多行没有变化时, 当前扫描带结束
pub const BAND_GAP: usize = 5;

/// Holds a copy of what the panel currently shows.
///
/// `known[i]` 为假的像素内容未知 (刚打开或传输失败), 不管新帧是什么颜色都算作变化.
#[derive(Debug, Clone)]
pub struct DirtyTracker {
    shadow: Frame,
    known: Vec<bool>,
}

impl DirtyTracker {
    /// 初始时面板内容未知, 所以第一次比较一定会发送整屏
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            shadow: Frame::filled(width, height, Rgba::TRANSPARENT),
            known: vec![false; width * height],
        }
    }

    pub fn shadow(&self) -> &Frame {
        &self.shadow
    }

    /// Whether the tracker knows every pixel the panel shows.
    pub fn is_synced(&self) -> bool {
        self.known.iter().all(|&k| k)
    }

    /// Forget what the panel shows; the next diff covers every pixel.
    pub fn reset(&mut self) {
        self.known.fill(false);
    }

    /// 面板已经被整屏填充为 `color`
    pub fn assume_filled(&mut self, color: Rgba) {
        self.shadow.fill(color);
        self.known.fill(true);
    }

    fn changed_columns<'a>(&'a self, frame: &'a Frame, y: usize) -> impl Iterator<Item = usize> + 'a {
        let w = frame.width();
        let row = y * w..(y + 1) * w;
        let new = &frame.pixels()[row.clone()];
        let old = &self.shadow.pixels()[row.clone()];
        let known = &self.known[row];
        new.iter()
            .zip(old)
            .zip(known)
            .enumerate()
            .filter(|(_, ((n, o), k))| !**k || n != o)
            .map(|(x, _)| x)
    }

    /// Grows `rect` by the changed pixels of row `y`, returns whether there were any.
    fn include_row(&self, frame: &Frame, y: usize, rect: &mut Rect) -> bool {
        let mut any = false;
        for x in self.changed_columns(frame, y) {
            rect.include(x as i32, y as i32);
            any = true;
        }
        any
    }

    fn commit(&mut self, frame: &Frame, rect: Rect) {
        let w = frame.width();
        for y in rect.min.y as usize..=rect.max.y as usize {
            for x in rect.min.x as usize..=rect.max.x as usize {
                self.shadow.set(x, y, frame.get(x, y));
                self.known[y * w + x] = true;
            }
        }
    }

    /// 整帧扫描, 返回互不重叠的脏矩形 (按 y 升序), 并更新影子帧.
    ///
    /// 从上往下找到第一条有变化的行, 向下延伸直到连续 [`BAND_GAP`] 行没有变化,
    /// 然后四边各外扩 [`PADDING`] 像素. 没有变化时返回空列表.
    pub fn diff_full(&mut self, frame: &Frame) -> Vec<Rect> {
        debug_assert_eq!(
            (frame.width(), frame.height()),
            (self.shadow.width(), self.shadow.height()),
            "frame and shadow sizes differ"
        );
        let (w, h) = (frame.width() as i32, frame.height() as i32);
        let mut rects: Vec<Rect> = Vec::new();
        let mut y = 0usize;

        while y < frame.height() {
            let mut rect = Rect::EMPTY;
            let Some(first) = (y..frame.height()).find(|&r| self.include_row(frame, r, &mut rect)) else {
                break;
            };

            let mut gap = 0;
            let mut row = first + 1;
            while row < frame.height() && gap < BAND_GAP {
                if self.include_row(frame, row, &mut rect) {
                    gap = 0;
                } else {
                    gap += 1;
                }
                row += 1;
            }

            let mut rect = rect.padded(PADDING, w, h);
            if let Some(prev) = rects.last() {
                rect.min.y = rect.min.y.max(prev.max.y + 1);
            }

            self.commit(frame, rect);
            rects.push(rect);
            y = rect.max.y as usize + 1;
        }
        rects
    }

    /// 只在 `area` 内比较, 返回实际变化像素的紧包围盒 (可能为空), 并更新影子帧
    pub fn diff_region(&mut self, frame: &Frame, area: Rect) -> Rect {
        let area = area.clamped(frame.width() as i32, frame.height() as i32);
        let mut rect = Rect::EMPTY;
        if area.is_empty() {
            return rect;
        }
        for y in area.min.y as usize..=area.max.y as usize {
            for x in self.changed_columns(frame, y) {
                if area.contains(x as i32, y as i32) {
                    rect.include(x as i32, y as i32);
                }
            }
        }
        if !rect.is_empty() {
            self.commit(frame, rect);
        }
        rect
    }
}
