//! TOML configuration.
//!
//! ```toml
//! [display]
//! driver = "dpf"
//! device = "usb0"
//! orientation = 1
//! backlight = 5
//!
//! [widget.clock_bg]
//! class = "solid"
//! width = 64
//! height = 16
//! color = "202020"
//!
//! [widget.uptime_bar]
//! class = "bar"
//! width = 64
//! height = 4
//! value = "uptime.seconds"
//! max = 3600
//!
//! [[timer]]
//! name = "rotate"
//! interval = 10000
//! action = "nextpage"
//!
//! [layout]
//! default_page = 0
//!
//! [[layout.page]]
//! number = 0
//!
//! [[layout.page.layer]]
//! number = 0
//! widgets = [{ name = "clock_bg", x = 0, y = 0 }]
//! ```

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::{
    color::{Palette, Rgba},
    layout::{Layer, Layout, LayoutError, Page, Placement, page_name},
    orientation::Orientation,
    scheduler::Mode,
    timer::{Action, IntervalTimer, Timer},
    plugin::Values,
    widget::{Bar, Solid, Widget, WidgetSet},
};

pub const DEFAULT_BACKLIGHT: i32 = 5;
/// 配置允许的背光上限, 驱动会再限制到面板支持的范围
pub const CONFIG_BACKLIGHT_MAX: i64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("syntax error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("display driver is not configured")]
    MissingDriver,
    #[error("unknown display driver '{0}', only 'dpf' is supported")]
    UnknownDriver(String),
    #[error("display device is not configured")]
    MissingDevice,
    #[error("layout is not configured")]
    MissingLayout,
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    display: Option<RawDisplay>,
    #[serde(default)]
    scheduler: SchedulerConfig,
    #[serde(default)]
    widget: BTreeMap<String, WidgetConfig>,
    #[serde(default)]
    timer: Vec<TimerConfig>,
    layout: Option<RawLayout>,
}

/// 颜色和数值先按原样读取, 校验失败时打警告并使用默认值
#[derive(Debug, Default, Deserialize)]
struct RawDisplay {
    driver: Option<String>,
    device: Option<String>,
    foreground: Option<String>,
    background: Option<String>,
    basecolor: Option<String>,
    orientation: Option<i64>,
    backlight: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub threading: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { threading: true }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "class", rename_all = "lowercase")]
pub enum WidgetConfig {
    Solid {
        width: usize,
        height: usize,
        /// 未设置时使用前景色
        color: Option<Rgba>,
        /// Blink period in milliseconds, 0 disables blinking.
        #[serde(default)]
        blink: u64,
    },
    Bar {
        width: usize,
        height: usize,
        color: Option<Rgba>,
        /// 插件发布的数值名, 例如 `uptime.seconds`
        value: String,
        max: f64,
    },
}

impl WidgetConfig {
    pub fn build(&self, palette: &Palette, values: &Values) -> Box<dyn Widget> {
        match self {
            &Self::Solid {
                width,
                height,
                color,
                blink,
            } => Box::new(
                Solid::new(width, height, color.unwrap_or(palette.foreground))
                    .with_blink(Duration::from_millis(blink)),
            ),
            Self::Bar {
                width,
                height,
                color,
                value,
                max,
            } => Box::new(Bar::new(
                values.clone(),
                value.clone(),
                *max,
                *width,
                *height,
                color.unwrap_or(palette.foreground),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimerConfig {
    pub name: String,
    /// 毫秒
    pub interval: u64,
    /// Pages the timer runs on, empty for a global timer.
    #[serde(default)]
    pub pages: Vec<i32>,
    pub action: Action,
}

impl TimerConfig {
    pub fn build(&self, now: Instant) -> Box<dyn Timer> {
        Box::new(IntervalTimer::new(
            self.name.clone(),
            Duration::from_millis(self.interval),
            self.pages.clone(),
            self.action.clone(),
            now,
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawLayout {
    #[serde(alias = "default")]
    default_page: Option<i32>,
    #[serde(default)]
    sequence: Vec<i32>,
    #[serde(default)]
    page: Vec<RawPage>,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    number: i32,
    #[serde(default)]
    layer: Vec<RawLayer>,
}

#[derive(Debug, Deserialize)]
struct RawLayer {
    number: i32,
    #[serde(default)]
    widgets: Vec<RawPlacement>,
}

#[derive(Debug, Deserialize)]
struct RawPlacement {
    name: String,
    #[serde(default)]
    x: i32,
    #[serde(default)]
    y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayConfig {
    pub driver: String,
    pub device: String,
    pub palette: Palette,
    pub orientation: Orientation,
    pub backlight: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub display: DisplayConfig,
    pub mode: Mode,
    pub widgets: BTreeMap<String, WidgetConfig>,
    pub timers: Vec<TimerConfig>,
    pub layout: Layout,
}

fn color_or(key: &str, value: Option<&str>, default: Rgba) -> Rgba {
    let Some(value) = value else {
        return default;
    };
    value.parse().unwrap_or_else(|e| {
        warn!(key, value, error = %e, "config: invalid color, using {default}");
        default
    })
}

fn orientation_or_default(value: Option<i64>) -> Orientation {
    let Some(value) = value else {
        return Orientation::default();
    };
    u8::try_from(value)
        .ok()
        .and_then(|v| Orientation::try_from(v).ok())
        .unwrap_or_else(|| {
            warn!(value, "config: orientation must be 0-3, using 0");
            Orientation::default()
        })
}

fn backlight_or_default(value: Option<i64>) -> i32 {
    match value {
        None => DEFAULT_BACKLIGHT,
        Some(v) if (0..=CONFIG_BACKLIGHT_MAX).contains(&v) => v as i32,
        Some(v) => {
            warn!(value = v, "config: backlight must be 0-{CONFIG_BACKLIGHT_MAX}, using {DEFAULT_BACKLIGHT}");
            DEFAULT_BACKLIGHT
        }
    }
}

impl RawDisplay {
    fn validate(self) -> Result<DisplayConfig, ConfigError> {
        let driver = self
            .driver
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .ok_or(ConfigError::MissingDriver)?;
        if driver != "dpf" {
            return Err(ConfigError::UnknownDriver(driver));
        }
        let device = self
            .device
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .ok_or(ConfigError::MissingDevice)?;

        let defaults = Palette::default();
        let palette = Palette {
            foreground: color_or("foreground", self.foreground.as_deref(), defaults.foreground),
            background: color_or("background", self.background.as_deref(), defaults.background),
            basecolor: color_or("basecolor", self.basecolor.as_deref(), defaults.basecolor),
        };

        Ok(DisplayConfig {
            driver,
            device,
            palette,
            orientation: orientation_or_default(self.orientation),
            backlight: backlight_or_default(self.backlight),
        })
    }
}

impl RawLayout {
    fn into_layout(self) -> Layout {
        let mut pages: BTreeMap<i32, Page> = BTreeMap::new();
        for raw in self.page {
            let page = pages.entry(raw.number).or_insert_with(|| Page::new(raw.number));
            for layer in raw.layer {
                let number = layer.number;
                let placements = layer
                    .widgets
                    .into_iter()
                    .map(|w| Placement::new(w.name.trim().to_ascii_lowercase(), w.x, w.y));
                page.layers
                    .entry(number)
                    .or_insert_with(|| Layer {
                        number,
                        widgets: Vec::new(),
                    })
                    .widgets
                    .extend(placements);
            }
        }
        Layout::new(pages.into_values(), self.default_page, self.sequence)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;
        let display = raw.display.ok_or(ConfigError::MissingDriver)?.validate()?;
        let layout = raw.layout.ok_or(ConfigError::MissingLayout)?.into_layout();
        if layout.pages().is_empty() {
            return Err(ConfigError::MissingLayout);
        }

        let widgets = raw
            .widget
            .into_iter()
            .map(|(name, w)| (name.trim().to_ascii_lowercase(), w))
            .collect();

        Ok(Self {
            display,
            mode: if raw.scheduler.threading {
                Mode::Pipelined
            } else {
                Mode::Cooperative
            },
            widgets,
            timers: raw.timer,
            layout,
        })
    }

    /// 所有 widget 从同一张 `values` 表读取插件数据
    pub fn widget_set(&self, values: &Values) -> WidgetSet {
        let mut set = WidgetSet::new();
        for (name, config) in &self.widgets {
            set.insert(name.clone(), config.build(&self.display.palette, values));
        }
        set
    }

    pub fn timers(&self, now: Instant) -> Vec<Box<dyn Timer>> {
        self.timers.iter().map(|t| t.build(now)).collect()
    }

    /// `--check` 打印的布局摘要
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "display: {} on {}, orientation {}, backlight {}",
            self.display.driver,
            self.display.device,
            self.display.orientation.angle(),
            self.display.backlight
        );
        let _ = writeln!(out, "scheduler: {:?}", self.mode);
        let _ = writeln!(out, "widgets: {}, timers: {}", self.widgets.len(), self.timers.len());
        for page in self.layout.pages().values() {
            let widgets: usize = page.layers.values().map(|l| l.widgets.len()).sum();
            let _ = writeln!(
                out,
                "{}: {} layer(s), {} widget(s)",
                page_name(page.number),
                page.layers.len(),
                widgets
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r##"
        [display]
        driver = "DPF"
        device = "usb0"
        foreground = "#0f0"
        basecolor = "not a color"
        orientation = 1
        backlight = 12

        [scheduler]
        threading = false

        [widget.Box]
        class = "solid"
        width = 4
        height = 2
        blink = 500

        [widget.bg]
        class = "solid"
        width = 10
        height = 10
        color = "000080"

        [widget.load]
        class = "bar"
        width = 10
        height = 1
        value = "uptime.seconds"
        max = 10

        [[timer]]
        name = "rotate"
        interval = 5000
        action = "nextpage"

        [[timer]]
        name = "back"
        interval = 1000
        pages = [1]
        action = "setpage:0"

        [layout]
        default_page = 1
        sequence = [1, 0]

        [[layout.page]]
        number = 0

        [[layout.page.layer]]
        number = 0
        widgets = [{ name = "bg", x = 0, y = 0 }]

        [[layout.page.layer]]
        number = 2
        widgets = [{ name = "box", x = 3, y = 4 }, { name = "bg" }]

        [[layout.page]]
        number = 1

        [[layout.page.layer]]
        number = 0
        widgets = [{ name = "box", x = 1, y = 1 }]

        [[layout.page]]
        number = -1

        [[layout.page.layer]]
        number = 0
        widgets = [{ name = "bg" }]
    "##;

    #[test]
    fn parses_full_configuration() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.display.driver, "dpf");
        assert_eq!(config.display.device, "usb0");
        assert_eq!(config.display.palette.foreground, Rgba::GREEN);
        assert_eq!(config.display.palette.basecolor, Rgba::BLACK);
        assert_eq!(config.display.orientation, Orientation::Rotate90);
        assert_eq!(config.display.backlight, DEFAULT_BACKLIGHT);
        assert_eq!(config.mode, Mode::Cooperative);
        assert_eq!(config.timers[1].action, Action::SetPage(0));
        assert_eq!(config.timers[1].pages, vec![1]);

        let layout = &config.layout;
        assert_eq!(layout.initial_page(), 1);
        assert_eq!(layout.sequence(), vec![1, 0]);
        assert!(layout.has_goodbye());
        let page0 = layout.page(0).unwrap();
        assert_eq!(page0.widget_names().collect::<Vec<_>>(), vec!["bg", "box", "bg"]);
    }

    #[test]
    fn widgets_use_palette_defaults() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let values = Values::new();
        values.set("uptime.seconds", 3.0);
        let mut set = config.widget_set(&values);
        assert!(set.contains("box"));
        set.update(["box", "bg", "load"]);
        assert_eq!(set.get("box").unwrap().bitmap().get(0, 0), Rgba::GREEN);
        assert_eq!(set.get("bg").unwrap().bitmap().get(9, 9), Rgba::opaque(0, 0, 0x80));
        let load = set.get("load").unwrap().bitmap();
        assert_eq!((load.get(2, 0), load.get(3, 0)), (Rgba::GREEN, Rgba::TRANSPARENT));
        assert_eq!(config.timers(Instant::now()).len(), 2);
    }

    #[test]
    fn defaults_when_optional_keys_missing() {
        let config = Config::from_toml(
            r#"
            [display]
            driver = "dpf"
            device = "dpf1"
            [[layout.page]]
            number = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.display.palette, Palette::default());
        assert_eq!(config.display.orientation, Orientation::Rotate0);
        assert_eq!(config.display.backlight, 5);
        assert_eq!(config.mode, Mode::Pipelined);
    }

    #[test]
    fn invalid_orientation_falls_back() {
        let config = Config::from_toml(
            r#"
            [display]
            driver = "dpf"
            device = "usb0"
            orientation = 7
            [[layout.page]]
            number = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.display.orientation, Orientation::Rotate0);
    }

    #[test]
    fn fatal_errors() {
        let missing_driver = "[display]\ndevice = \"usb0\"\n[[layout.page]]\nnumber = 0\n";
        assert!(matches!(Config::from_toml(missing_driver), Err(ConfigError::MissingDriver)));

        let unknown = "[display]\ndriver = \"hid\"\ndevice = \"usb0\"\n[[layout.page]]\nnumber = 0\n";
        assert!(matches!(Config::from_toml(unknown), Err(ConfigError::UnknownDriver(d)) if d == "hid"));

        let no_device = "[display]\ndriver = \"dpf\"\n[[layout.page]]\nnumber = 0\n";
        assert!(matches!(Config::from_toml(no_device), Err(ConfigError::MissingDevice)));

        let no_layout = "[display]\ndriver = \"dpf\"\ndevice = \"usb0\"\n";
        assert!(matches!(Config::from_toml(no_layout), Err(ConfigError::MissingLayout)));

        assert!(matches!(Config::from_toml("[display"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn bad_action_is_a_parse_error() {
        let text = format!("{SAMPLE}\n[[timer]]\nname = \"x\"\ninterval = 1\naction = \"explode\"\n");
        assert!(matches!(Config::from_toml(&text), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert!(config.summary().contains("goodbye page: 1 layer(s), 1 widget(s)"));

        let missing = Config::load("/nonexistent/dpfd.toml").unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
