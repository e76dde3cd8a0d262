//! The five stage update cycle: plugins, timers, widgets, layout, display.
//!
//! Cooperative mode runs all of them in order on the calling thread.
//! Pipelined mode gives every stage its own worker thread; a coordinator
//! raises per-stage requests through [`gate::Gates`] so that a stage never
//! reads the output of a stage that has not finished the same cycle.

pub mod gate;
pub mod page;

use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, error, info, trace, warn};

use self::{gate::Gates, page::PageControl};
use crate::{
    Error,
    layout::{GOODBYE_PAGE, Layout, page_name},
    timer::Action,
};

/// 协作模式下一轮的目标时长
const CYCLE_TARGET: Duration = Duration::from_millis(600);
/// 超过这个时长就认为这一轮超时
const CYCLE_OVERRUN: Duration = Duration::from_millis(550);
const OVERRUN_SLEEP: Duration = Duration::from_millis(250);
/// 流水线模式下协调者两次发出请求之间的间隔
const PACING: Duration = Duration::from_millis(40);

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Work of one cycle, implemented by [`crate::daemon::Daemon`].
pub trait Pipeline: Sync {
    fn layout(&self) -> &Layout;

    /// 清空画布和面板, 启动和预热时调用
    fn clear(&self) -> Result<(), Error>;

    fn refresh_plugins(&self, exit: &ExitSignal);

    /// Runs the timers active on `page`, returns the actions they fired.
    fn run_timers(&self, page: i32, now: Instant) -> Vec<Action>;

    /// `force` 为真时即使内容没变也算作有变化. 返回是否有变化
    fn update_widgets(&self, page: i32, force: bool) -> bool;

    fn compose(&self, page: i32) -> Result<(), Error>;

    /// 每轮都会调用, 即使这一轮没有重新合成; 上一轮传输失败的内容在这里重发
    fn flush(&self, page: i32) -> Result<(), Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// 单线程, 五个阶段按顺序执行
    Cooperative,
    #[default]
    Pipelined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Plugins,
    Timers,
    Widgets,
    Layout,
    Display,
}

impl Stage {
    pub const COUNT: usize = 5;
    pub const ALL: [Self; Self::COUNT] = [Self::Plugins, Self::Timers, Self::Widgets, Self::Layout, Self::Display];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Plugins => "plugins",
            Self::Timers => "timers",
            Self::Widgets => "widgets",
            Self::Layout => "layout",
            Self::Display => "display",
        }
    }

    /// 没有待处理请求时的轮询间隔, 同时也是观察退出信号的最长延迟
    pub const fn idle_interval(self) -> Duration {
        Duration::from_millis(match self {
            Self::Plugins => 250,
            Self::Timers => 120,
            Self::Widgets | Self::Layout | Self::Display => 30,
        })
    }

    /// Pause after finishing a cycle before looking for the next one.
    pub const fn busy_interval(self) -> Duration {
        Duration::from_millis(match self {
            Self::Plugins => 140,
            Self::Timers => 80,
            Self::Widgets | Self::Layout | Self::Display => 10,
        })
    }

    /// Whether this stage may start cycle `cycle` given the completed cycles of all stages.
    pub fn ready(self, cycle: u64, completed: &[u64; Self::COUNT]) -> bool {
        let done = |stage: Self| completed[stage.index()];
        let prev = cycle.saturating_sub(1);
        match self {
            Self::Plugins | Self::Timers => done(Self::Widgets) >= prev,
            Self::Widgets => {
                done(Self::Plugins) >= cycle && done(Self::Timers) >= cycle && done(Self::Layout) >= prev
            }
            Self::Layout => done(Self::Widgets) >= cycle && done(Self::Display) >= prev,
            Self::Display => done(Self::Layout) >= cycle,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 协作式的退出标志, 所有等待点都能被它打断
#[derive(Debug, Clone, Default)]
pub struct ExitSignal(Arc<(Mutex<bool>, Condvar)>);

impl ExitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        let (flag, cond) = &*self.0;
        *lock(flag) = true;
        cond.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        *lock(&self.0.0)
    }

    /// Sleeps for `duration` or until the signal is raised. Returns whether it was raised.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, cond) = &*self.0;
        let guard = lock(flag);
        let (guard, _) = cond
            .wait_timeout_while(guard, duration, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// 从 widgets 传到 layout, 再从 layout 传到 display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Handoff {
    page: i32,
    changed: bool,
}

#[derive(Debug)]
struct CycleState {
    pages: PageControl,
    widgets: Option<Handoff>,
    composed: Option<Handoff>,
}

impl CycleState {
    fn new(page: i32) -> Self {
        Self {
            pages: PageControl::new(page),
            widgets: None,
            composed: None,
        }
    }
}

fn run_stage<P: Pipeline>(
    stage: Stage,
    pipeline: &P,
    state: &Mutex<CycleState>,
    exit: &ExitSignal,
) -> Result<(), Error> {
    match stage {
        Stage::Plugins => pipeline.refresh_plugins(exit),
        Stage::Timers => {
            let page = lock(state).pages.current();
            let actions = pipeline.run_timers(page, Instant::now());
            let mut state = lock(state);
            for action in &actions {
                state.pages.apply(action, pipeline.layout());
            }
        }
        Stage::Widgets => {
            let (page, force) = {
                let mut state = lock(state);
                (state.pages.current(), state.pages.take_switch())
            };
            let changed = pipeline.update_widgets(page, force) || force;
            lock(state).widgets = Some(Handoff { page, changed });
        }
        Stage::Layout => {
            let Some(handoff) = lock(state).widgets.take() else {
                return Ok(());
            };
            if handoff.changed {
                pipeline.compose(handoff.page)?;
            }
            lock(state).composed = Some(handoff);
        }
        Stage::Display => {
            let handoff = lock(state).composed.take();
            if let Some(Handoff { page, .. }) = handoff {
                pipeline.flush(page)?;
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    mode: Mode,
    exit: ExitSignal,
}

impl Scheduler {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            exit: ExitSignal::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn exit_signal(&self) -> ExitSignal {
        self.exit.clone()
    }

    pub fn exit_loop(&self) -> bool {
        self.exit.is_raised()
    }

    /// Runs until the exit signal is raised, then shows the goodbye page if
    /// the layout has one. Returns whether it was shown.
    pub fn run<P: Pipeline>(&self, pipeline: &P) -> Result<bool, Error> {
        let state = Mutex::new(CycleState::new(pipeline.layout().initial_page()));

        info!(mode = ?self.mode, "scheduler: warming up");
        pipeline.clear()?;
        for stage in Stage::ALL {
            run_stage(stage, pipeline, &state, &self.exit)?;
        }

        match self.mode {
            Mode::Cooperative => self.run_cooperative(pipeline, &state)?,
            Mode::Pipelined => self.run_pipelined(pipeline, &state)?,
        }
        info!("scheduler: main loop exited");

        self.goodbye(pipeline)
    }

    fn run_cooperative<P: Pipeline>(&self, pipeline: &P, state: &Mutex<CycleState>) -> Result<(), Error> {
        let mut cycle: u64 = 0;
        while !self.exit.is_raised() {
            cycle += 1;
            let start = Instant::now();
            let mut timings = [Duration::ZERO; Stage::COUNT];

            for stage in Stage::ALL {
                if self.exit.is_raised() {
                    return Ok(());
                }
                let begin = Instant::now();
                run_stage(stage, pipeline, state, &self.exit)?;
                timings[stage.index()] = begin.elapsed();
            }

            let elapsed = start.elapsed();
            let sleep = if elapsed < CYCLE_OVERRUN {
                CYCLE_TARGET - elapsed
            } else {
                OVERRUN_SLEEP
            };
            debug!(
                cycle,
                plugins = timings[0].as_millis() as u64,
                timers = timings[1].as_millis() as u64,
                widgets = timings[2].as_millis() as u64,
                layout = timings[3].as_millis() as u64,
                display = timings[4].as_millis() as u64,
                sleep = sleep.as_millis() as u64,
                "scheduler: cycle took {}ms",
                elapsed.as_millis()
            );
            self.exit.sleep(sleep);
        }
        Ok(())
    }

    fn run_pipelined<P: Pipeline>(&self, pipeline: &P, state: &Mutex<CycleState>) -> Result<(), Error> {
        let gates = Gates::new();
        let failure: Mutex<Option<Error>> = Mutex::new(None);

        thread::scope(|scope| {
            let mut workers = Vec::with_capacity(Stage::COUNT);
            for stage in Stage::ALL {
                let (gates, failure) = (&gates, &failure);
                let spawned = thread::Builder::new()
                    .name(format!("dpfd-{stage}"))
                    .spawn_scoped(scope, move || self.worker(stage, pipeline, state, gates, failure));
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(source) => {
                        error!(%stage, error = %source, "scheduler: failed to start worker");
                        lock(&failure).get_or_insert(Error::Spawn { stage, source });
                        self.exit.raise();
                        break;
                    }
                }
            }

            self.coordinate(&gates);
            gates.close();

            for worker in workers {
                if worker.join().is_err() {
                    error!("scheduler: a worker thread panicked");
                }
            }
        });

        match failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn worker<P: Pipeline>(
        &self,
        stage: Stage,
        pipeline: &P,
        state: &Mutex<CycleState>,
        gates: &Gates,
        failure: &Mutex<Option<Error>>,
    ) {
        debug!(%stage, "scheduler: worker started");
        while !self.exit.is_raised() {
            let Some(cycle) = gates.begin(stage, stage.idle_interval()) else {
                continue;
            };
            if self.exit.is_raised() {
                gates.finish(stage, cycle);
                break;
            }

            trace!(%stage, cycle, "scheduler: stage running");
            let result = run_stage(stage, pipeline, state, &self.exit);
            gates.finish(stage, cycle);

            if let Err(e) = result {
                error!(%stage, cycle, error = %e, "scheduler: fatal error");
                lock(failure).get_or_insert(e);
                self.exit.raise();
                break;
            }
            self.exit.sleep(stage.busy_interval());
        }
        debug!(%stage, "scheduler: worker exiting");
    }

    /// 按依赖关系发出请求, 直到退出信号
    fn coordinate(&self, gates: &Gates) {
        let mut shown = 0;
        while !self.exit.is_raised() {
            let round = Instant::now();
            let completed = gates.completed_all();

            for stage in Stage::ALL {
                let next = completed[stage.index()] + 1;
                if gates.requested(stage) < next && stage.ready(next, &completed) {
                    gates.request(stage, next);
                }
            }

            let cycle = completed[Stage::Display.index()];
            if cycle != shown {
                shown = cycle;
                trace!(cycle, "scheduler: cycle completed");
            }

            self.exit.sleep(PACING.saturating_sub(round.elapsed()));
        }
    }

    /// 退出后切换到告别页, 强制更新、合成并刷新, 不再检查退出信号
    fn goodbye<P: Pipeline>(&self, pipeline: &P) -> Result<bool, Error> {
        if !pipeline.layout().has_goodbye() {
            return Ok(false);
        }
        info!("scheduler: switching to {}", page_name(GOODBYE_PAGE));
        pipeline.update_widgets(GOODBYE_PAGE, true);
        pipeline.compose(GOODBYE_PAGE)?;
        if let Err(e) = pipeline.flush(GOODBYE_PAGE) {
            warn!(error = %e, "scheduler: failed to show {}", page_name(GOODBYE_PAGE));
            return Ok(false);
        }
        Ok(true)
    }
}
