//! External value sources refreshed by the plugins stage.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use crate::scheduler::lock;

/// 插件发布、widget 读取的数值表, 按 `插件.键` 命名
#[derive(Debug, Clone, Default)]
pub struct Values {
    inner: Arc<Mutex<BTreeMap<String, f64>>>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the stored value changed.
    pub fn set(&self, key: impl Into<String>, value: f64) -> bool {
        lock(&self.inner).insert(key.into(), value) != Some(value)
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        lock(&self.inner).get(key).copied()
    }
}

pub trait Plugin: Send {
    fn name(&self) -> &str;

    /// 刷新数据并写入 `values`, 返回是否有变化
    fn update(&mut self, values: &Values) -> bool;
}

/// Seconds since the daemon started, published as `uptime.seconds`.
#[derive(Debug)]
pub struct Uptime {
    started: Instant,
}

impl Uptime {
    pub const KEY: &'static str = "uptime.seconds";

    pub fn new() -> Self {
        Self { started: Instant::now() }
    }

    pub fn seconds(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.started).as_secs()
    }
}

impl Default for Uptime {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for Uptime {
    fn name(&self) -> &str {
        "uptime"
    }

    fn update(&mut self, values: &Values) -> bool {
        values.set(Self::KEY, self.seconds(Instant::now()) as f64)
    }
}
