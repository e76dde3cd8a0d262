//! Ties layout, canvas, widgets and the panel driver into a [`Pipeline`].

use std::{sync::Mutex, time::Instant};

use tracing::{debug, error, info, warn};

use crate::{
    Error,
    canvas::{Canvas, Frame},
    color::{Palette, Rgba},
    layout::Layout,
    orientation::Orientation,
    plugin::{Plugin, Values},
    rect::Rect,
    scheduler::{ExitSignal, Pipeline, lock},
    timer::{Action, Timer},
    transport::Driver,
    widget::WidgetSet,
};

/// 上一次成功发到面板的帧. `page` 为 `None` 时下一次必须整屏刷新
#[derive(Debug)]
struct Shown {
    page: Option<i32>,
    frame: Frame,
}

pub struct Daemon<D: Driver> {
    layout: Layout,
    values: Values,
    canvas: Mutex<Canvas>,
    shown: Mutex<Shown>,
    widgets: Mutex<WidgetSet>,
    plugins: Mutex<Vec<Box<dyn Plugin>>>,
    timers: Mutex<Vec<Box<dyn Timer>>>,
    driver: Mutex<D>,
}

impl<D: Driver> Daemon<D> {
    /// 画布尺寸取自驱动报告的物理尺寸.
    ///
    /// `layout` 先按 `widgets` 修剪, 之后每个页面图层都在画布上分配好平面.
    /// `values` 是插件写入、widget 读取的同一张表.
    pub fn new(
        driver: D,
        mut layout: Layout,
        widgets: WidgetSet,
        values: Values,
        palette: &Palette,
        orientation: Orientation,
    ) -> Result<Self, Error> {
        layout.prune(&widgets).map_err(crate::config::ConfigError::from)?;

        let (width, height) = driver.size();
        let mut canvas = Canvas::new(width, height, orientation, palette.basecolor);
        layout.init_canvas(&mut canvas);
        let (lw, lh) = canvas.logical_size();
        info!(
            driver = driver.name(),
            device = driver.device(),
            width = lw,
            height = lh,
            orientation = orientation.angle(),
            pages = layout.pages().len(),
            "display initialized"
        );

        Ok(Self {
            layout,
            values,
            canvas: Mutex::new(canvas),
            shown: Mutex::new(Shown {
                page: None,
                frame: Frame::filled(width, height, Rgba::TRANSPARENT),
            }),
            widgets: Mutex::new(widgets),
            plugins: Mutex::new(Vec::new()),
            timers: Mutex::new(Vec::new()),
            driver: Mutex::new(driver),
        })
    }

    pub fn with_plugin(self, plugin: Box<dyn Plugin>) -> Self {
        lock(&self.plugins).push(plugin);
        self
    }

    pub fn with_timer(self, timer: Box<dyn Timer>) -> Self {
        lock(&self.timers).push(timer);
        self
    }

    /// Runs `f` with exclusive access to the driver.
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut *lock(&self.driver))
    }

    /// 关闭驱动: 没有显示告别页时关背光并刷黑
    pub fn finish(self, goodbye_shown: bool) -> D {
        let mut driver = self.driver.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner);
        driver.shutdown(goodbye_shown);
        driver
    }

    /// 换页或传输失败之后整帧合成; 否则只重新合成 layout 写过的区域
    fn recomposite(&self, page: i32, shown: &mut Shown) -> Result<Option<Rect>, Error> {
        let mut canvas = lock(&self.canvas);
        let damage = canvas.take_damage(page);
        if shown.page != Some(page) {
            shown.frame = canvas.flatten(page)?;
            return Ok(Some(shown.frame.bounds()));
        }
        if damage.is_empty() {
            return Ok(None);
        }
        canvas.flatten_region(page, damage, &mut shown.frame)?;
        Ok(Some(damage))
    }
}

impl<D: Driver> Pipeline for Daemon<D> {
    fn layout(&self) -> &Layout {
        &self.layout
    }

    fn clear(&self) -> Result<(), Error> {
        lock(&self.canvas).clear();
        lock(&self.shown).page = None;
        let mut driver = lock(&self.driver);
        if let Err(e) = driver.clear(Rgba::BLACK) {
            warn!(error = %e, "failed to clear panel");
        }
        Ok(())
    }

    fn refresh_plugins(&self, exit: &ExitSignal) {
        let mut plugins = lock(&self.plugins);
        for plugin in plugins.iter_mut() {
            if exit.is_raised() {
                return;
            }
            if plugin.update(&self.values) {
                debug!(plugin = plugin.name(), "plugin updated");
            }
        }
    }

    fn run_timers(&self, page: i32, now: Instant) -> Vec<Action> {
        let mut timers = lock(&self.timers);
        timers
            .iter_mut()
            .filter(|t| t.is_global() || t.on_page(page))
            .filter_map(|t| {
                let action = t.update(now)?;
                debug!(timer = t.name(), %action, "timer fired");
                Some(action)
            })
            .collect()
    }

    fn update_widgets(&self, page: i32, force: bool) -> bool {
        let Some(p) = self.layout.page(page) else {
            return false;
        };
        let changed = lock(&self.widgets).update(p.widget_names());
        changed || force
    }

    fn compose(&self, page: i32) -> Result<(), Error> {
        let widgets = lock(&self.widgets);
        let mut canvas = lock(&self.canvas);
        self.layout.compose(page, &mut canvas, &widgets).map_err(|e| {
            error!(page, error = %e, "layout: compose failed");
            Error::from(e)
        })
    }

    /// 拷贝画布时持有画布锁, 传输时不持有
    fn flush(&self, page: i32) -> Result<(), Error> {
        let mut shown = lock(&self.shown);
        let full = shown.page != Some(page);
        let Some(rect) = self.recomposite(page, &mut shown)? else {
            return Ok(());
        };

        let mut driver = lock(&self.driver);
        let sent = if full {
            driver.blit_fullscreen(&shown.frame)
        } else {
            driver
                .blit(&shown.frame, rect.min.x, rect.min.y, rect.width(), rect.height())
                .map(|()| 1)
        };
        match sent {
            Ok(commands) => {
                shown.page = Some(page);
                if commands > 0 {
                    debug!(page, commands, full, "display: flushed");
                }
            }
            Err(e) => {
                shown.page = None;
                error!(page, error = %e, "display: blit failed, retrying next cycle");
            }
        }
        Ok(())
    }
}
