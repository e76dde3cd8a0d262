//! Per-stage request/completion counters shared by the coordinator and the workers.

use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use super::Stage;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct GateState {
    /// 协调者要求完成到的轮次
    requested: u64,
    completed: u64,
}

#[derive(Debug, Default)]
struct Shared {
    stages: [GateState; Stage::COUNT],
    closed: bool,
}

/// 五个阶段共用一把锁和一个条件变量.
///
/// 请求只会增大不会丢失: 下游还在处理上一轮时, 新一轮的请求只是被推迟.
#[derive(Debug, Default)]
pub struct Gates {
    state: Mutex<Shared>,
    changed: Condvar,
}

impl Gates {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn requested(&self, stage: Stage) -> u64 {
        self.lock().stages[stage.index()].requested
    }

    pub fn completed_all(&self) -> [u64; Stage::COUNT] {
        let stages = self.lock().stages;
        stages.map(|s| s.completed)
    }

    /// 要求 `stage` 完成第 `cycle` 轮. Returns whether this raised the request.
    pub fn request(&self, stage: Stage, cycle: u64) -> bool {
        let mut state = self.lock();
        let gate = &mut state.stages[stage.index()];
        if gate.requested >= cycle {
            return false;
        }
        gate.requested = cycle;
        drop(state);
        self.changed.notify_all();
        true
    }

    /// Worker side: waits up to `timeout` for pending work.
    ///
    /// Returns the requested cycle, which stays pending until [`Gates::finish`].
    /// Returns `None` at once after [`Gates::close`].
    pub fn begin(&self, stage: Stage, timeout: Duration) -> Option<u64> {
        let i = stage.index();
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| {
                !s.closed && s.stages[i].requested <= s.stages[i].completed
            })
            .unwrap_or_else(PoisonError::into_inner);

        if state.closed {
            return None;
        }
        let gate = &state.stages[i];
        if gate.requested <= gate.completed {
            return None;
        }
        Some(gate.requested)
    }

    pub fn finish(&self, stage: Stage, cycle: u64) {
        let mut state = self.lock();
        let gate = &mut state.stages[stage.index()];
        gate.completed = gate.completed.max(cycle);
        drop(state);
        self.changed.notify_all();
    }

    /// 不再接受新的工作, 唤醒所有等待的 worker
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, time::Instant};

    #[test]
    fn begin_without_request_times_out() {
        let gates = Gates::new();
        let start = Instant::now();
        assert_eq!(gates.begin(Stage::Widgets, Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(gates.completed_all(), [0; Stage::COUNT]);
    }

    #[test]
    fn request_is_never_lowered() {
        let gates = Gates::new();
        assert!(gates.request(Stage::Layout, 3));
        assert!(!gates.request(Stage::Layout, 2));
        assert!(!gates.request(Stage::Layout, 3));
        assert_eq!(gates.requested(Stage::Layout), 3);
    }

    #[test]
    fn begin_and_finish() {
        let gates = Gates::new();
        gates.request(Stage::Display, 1);
        assert_eq!(gates.begin(Stage::Display, Duration::ZERO), Some(1));
        assert_eq!(gates.completed_all()[Stage::Display.index()], 0);
        gates.finish(Stage::Display, 1);
        assert_eq!(gates.completed_all()[Stage::Display.index()], 1);
        assert_eq!(gates.begin(Stage::Display, Duration::ZERO), None);
    }

    #[test]
    fn request_while_busy_is_kept() {
        let gates = Gates::new();
        gates.request(Stage::Plugins, 1);
        let cycle = gates.begin(Stage::Plugins, Duration::ZERO).unwrap();
        gates.request(Stage::Plugins, 2);
        gates.finish(Stage::Plugins, cycle);
        assert_eq!(gates.begin(Stage::Plugins, Duration::ZERO), Some(2));
    }

    #[test]
    fn close_releases_waiting_worker() {
        let gates = Arc::new(Gates::new());
        let worker = {
            let gates = gates.clone();
            thread::spawn(move || gates.begin(Stage::Plugins, Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        gates.close();
        assert_eq!(worker.join().unwrap(), None);
        assert!(start.elapsed() < Duration::from_secs(5));
        gates.request(Stage::Plugins, 1);
        assert_eq!(gates.begin(Stage::Plugins, Duration::ZERO), None);
    }

    #[test]
    fn request_wakes_waiting_worker() {
        let gates = Arc::new(Gates::new());
        let worker = {
            let gates = gates.clone();
            thread::spawn(move || gates.begin(Stage::Timers, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        gates.request(Stage::Timers, 1);
        assert_eq!(worker.join().unwrap(), Some(1));
    }
}
