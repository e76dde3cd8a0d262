use tracing::{debug, info, warn};

use crate::{
    layout::{GOODBYE_PAGE, Layout, page_name},
    timer::Action,
};

/// The page timers and widgets work on.
///
/// A switch is remembered until the widgets stage takes it, so the new page
/// gets a forced update and recompose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageControl {
    current: i32,
    switched: bool,
}

impl PageControl {
    /// 第一轮总是强制刷新
    pub fn new(page: i32) -> Self {
        Self {
            current: page,
            switched: true,
        }
    }

    pub fn current(&self) -> i32 {
        self.current
    }

    pub fn take_switch(&mut self) -> bool {
        std::mem::take(&mut self.switched)
    }

    /// 切换到 `page`, 不存在或已经是当前页时只打警告
    pub fn set(&mut self, page: i32, layout: &Layout) -> bool {
        if !layout.has_page(page) {
            warn!("cannot switch to {}, page does not exist in layout", page_name(page));
            return false;
        }
        if page == self.current {
            warn!("cannot switch to {}, page is already active", page_name(page));
            return false;
        }
        debug!(from = self.current, to = page, "switching to {}", page_name(page));
        self.current = page;
        self.switched = true;
        true
    }

    pub fn apply(&mut self, action: &Action, layout: &Layout) {
        match action {
            Action::NextPage | Action::PrevPage => {
                let target = match action {
                    Action::NextPage => layout.next_page(self.current),
                    _ => layout.prev_page(self.current),
                };
                match target {
                    Some(page) if page != self.current => {
                        self.set(page, layout);
                    }
                    Some(_) => {}
                    None => warn!("{action} is not available, layout page sequence is empty"),
                }
            }
            Action::SetPage(GOODBYE_PAGE) => {
                warn!("the goodbye page is only shown on exit, {action} ignored");
            }
            Action::SetPage(page) => {
                self.set(*page, layout);
            }
            Action::Log(text) => info!(target: "dpfd::action", "{text}"),
        }
    }
}
