//! Timers and the actions they fire.

use std::{
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("unknown action '{0}'")]
    Unknown(String),
    #[error("setpage needs a page number, got '{0}'")]
    PageNumber(String),
    #[error("action '{0}' does not take arguments")]
    Arguments(String),
}

/// 定时器触发的动作, 由调度器执行
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    NextPage,
    PrevPage,
    SetPage(i32),
    Log(String),
}

impl FromStr for Action {
    type Err = ActionError;

    /// `nextpage`, `prevpage`, `setpage:N`, `log:text`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name.trim().to_ascii_lowercase(), Some(arg)),
            None => (s.to_ascii_lowercase(), None),
        };

        match (name.as_str(), arg) {
            ("nextpage", None) => Ok(Self::NextPage),
            ("prevpage", None) => Ok(Self::PrevPage),
            ("nextpage" | "prevpage", Some(_)) => Err(ActionError::Arguments(name)),
            ("setpage", Some(arg)) => arg
                .trim()
                .parse()
                .map(Self::SetPage)
                .map_err(|_| ActionError::PageNumber(arg.to_string())),
            ("setpage", None) => Err(ActionError::PageNumber(String::new())),
            ("log", arg) => Ok(Self::Log(arg.unwrap_or_default().to_string())),
            _ => Err(ActionError::Unknown(s.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NextPage => write!(f, "nextpage"),
            Self::PrevPage => write!(f, "prevpage"),
            Self::SetPage(page) => write!(f, "setpage:{page}"),
            Self::Log(text) => write!(f, "log:{text}"),
        }
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

pub trait Timer: Send {
    fn name(&self) -> &str;

    /// 全局定时器每一轮都运行, 否则只在所属页面激活时运行
    fn is_global(&self) -> bool;

    fn on_page(&self, page: i32) -> bool;

    fn update(&mut self, now: Instant) -> Option<Action>;
}

/// Fires its action once every `interval`.
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    name: String,
    interval: Duration,
    pages: Vec<i32>,
    action: Action,
    next: Instant,
}

impl IntervalTimer {
    /// `pages` 为空表示全局定时器. 第一次触发在 `now + interval`
    pub fn new(name: impl Into<String>, interval: Duration, pages: Vec<i32>, action: Action, now: Instant) -> Self {
        Self {
            name: name.into(),
            interval,
            pages,
            action,
            next: now + interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn action(&self) -> &Action {
        &self.action
    }
}

impl Timer for IntervalTimer {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_global(&self) -> bool {
        self.pages.is_empty()
    }

    fn on_page(&self, page: i32) -> bool {
        self.pages.contains(&page)
    }

    fn update(&mut self, now: Instant) -> Option<Action> {
        if now < self.next {
            return None;
        }
        // 跳过错过的周期, 每次最多触发一次. 下一次仍对齐到原来的节拍
        let period = self.interval.max(Duration::from_millis(1));
        let behind = (now - self.next).as_nanos() % period.as_nanos();
        self.next = now + period - Duration::from_nanos(behind as u64);
        Some(self.action.clone())
    }
}
