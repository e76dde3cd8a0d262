use std::{
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use dpfd::{
    Error,
    canvas::CanvasError,
    layout::{GOODBYE_PAGE, Layout, Page},
    scheduler::{ExitSignal, Mode, Pipeline, Scheduler, Stage},
    timer::Action,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Clear,
    Stage(Stage),
    Widgets { page: i32, force: bool, generation: u64 },
    Compose { page: i32, generation: u64 },
    Flush { page: i32 },
}

/// 记录每个阶段的调用顺序, 并检查阶段之间有没有重叠
struct Instrumented {
    layout: Layout,
    events: Mutex<Vec<Event>>,
    generation: AtomicU64,
    widgets_busy: AtomicBool,
    compose_busy: AtomicBool,
    timer_calls: AtomicU64,
    violations: Mutex<Vec<String>>,
    fail_compose_at: Option<u64>,
    next_page_at: Option<u64>,
}

impl Instrumented {
    fn new(pages: &[i32]) -> Self {
        Self {
            layout: Layout::new(pages.iter().map(|&p| Page::new(p)), None, vec![]),
            events: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            widgets_busy: AtomicBool::new(false),
            compose_busy: AtomicBool::new(false),
            timer_calls: AtomicU64::new(0),
            violations: Mutex::new(Vec::new()),
            fail_compose_at: None,
            next_page_at: None,
        }
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn violation(&self, what: String) {
        self.violations.lock().unwrap().push(what);
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn composed(&self) -> Vec<(i32, u64)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Compose { page, generation } => Some((page, generation)),
                _ => None,
            })
            .collect()
    }
}

impl Pipeline for Instrumented {
    fn layout(&self) -> &Layout {
        &self.layout
    }

    fn clear(&self) -> Result<(), Error> {
        self.record(Event::Clear);
        Ok(())
    }

    fn refresh_plugins(&self, _: &ExitSignal) {
        self.record(Event::Stage(Stage::Plugins));
    }

    fn run_timers(&self, _: i32, _: Instant) -> Vec<Action> {
        self.record(Event::Stage(Stage::Timers));
        let call = self.timer_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.next_page_at {
            Some(at) if at == call => vec![Action::NextPage],
            _ => vec![],
        }
    }

    fn update_widgets(&self, page: i32, force: bool) -> bool {
        if self.compose_busy.load(Ordering::SeqCst) {
            self.violation("widgets ran while layout was composing".into());
        }
        self.widgets_busy.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.widgets_busy.store(false, Ordering::SeqCst);
        self.record(Event::Stage(Stage::Widgets));
        self.record(Event::Widgets { page, force, generation });
        true
    }

    fn compose(&self, page: i32) -> Result<(), Error> {
        if self.widgets_busy.load(Ordering::SeqCst) {
            self.violation("layout read bitmaps while widgets were updating".into());
        }
        self.compose_busy.store(true, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        self.compose_busy.store(false, Ordering::SeqCst);
        self.record(Event::Stage(Stage::Layout));
        self.record(Event::Compose { page, generation });

        if self.fail_compose_at == Some(generation) {
            return Err(CanvasError::Desync { page, layer: None }.into());
        }
        Ok(())
    }

    fn flush(&self, page: i32) -> Result<(), Error> {
        if self.compose_busy.load(Ordering::SeqCst) {
            self.violation("display flushed while layout was composing".into());
        }
        self.record(Event::Stage(Stage::Display));
        self.record(Event::Flush { page });
        Ok(())
    }
}

fn run_for(pipeline: &Instrumented, mode: Mode, duration: Duration) -> Result<bool, Error> {
    let scheduler = Scheduler::new(mode);
    let exit = scheduler.exit_signal();
    thread::scope(|s| {
        s.spawn(|| {
            exit.sleep(duration);
            exit.raise();
        });
        let result = scheduler.run(pipeline);
        exit.raise();
        result
    })
}

fn stages(events: &[Event]) -> Vec<Stage> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Stage(stage) => Some(*stage),
            _ => None,
        })
        .collect()
}

#[test]
fn cooperative_runs_stages_in_order() {
    let pipeline = Instrumented::new(&[0]);
    let shown = run_for(&pipeline, Mode::Cooperative, Duration::from_millis(700)).unwrap();
    assert!(!shown);

    let events = pipeline.events();
    assert_eq!(events[0], Event::Clear);
    let stages = stages(&events);
    // 预热一轮, 之后至少还有一个完整的循环
    assert!(stages.len() >= 2 * Stage::COUNT, "{stages:?}");
    for (i, stage) in stages.iter().enumerate() {
        assert_eq!(*stage, Stage::ALL[i % Stage::COUNT], "{stages:?}");
    }
    assert!(pipeline.violations.lock().unwrap().is_empty());
}

#[test]
fn warm_up_is_forced() {
    let pipeline = Instrumented::new(&[0]);
    run_for(&pipeline, Mode::Cooperative, Duration::ZERO).unwrap();
    let events = pipeline.events();
    assert!(events.contains(&Event::Widgets {
        page: 0,
        force: true,
        generation: 1
    }));
    assert!(events.contains(&Event::Flush { page: 0 }));
}

#[test]
fn pipelined_layout_never_reads_a_partial_cycle() {
    let pipeline = Instrumented::new(&[0]);
    run_for(&pipeline, Mode::Pipelined, Duration::from_millis(800)).unwrap();

    let violations = pipeline.violations.lock().unwrap().clone();
    assert!(violations.is_empty(), "{violations:?}");

    // 每一轮 layout 看到的正好是该轮 widgets 的结果
    let composed: Vec<u64> = pipeline.composed().into_iter().map(|(_, g)| g).collect();
    assert!(composed.len() >= 3, "{composed:?}");
    for (i, generation) in composed.iter().enumerate() {
        assert_eq!(*generation, i as u64 + 1, "{composed:?}");
    }

    let flushes = pipeline
        .events()
        .iter()
        .filter(|e| matches!(e, Event::Flush { .. }))
        .count();
    assert!(flushes + 1 >= composed.len());
}

#[test]
fn pipelined_exit_is_prompt() {
    let pipeline = Instrumented::new(&[0]);
    let start = Instant::now();
    run_for(&pipeline, Mode::Pipelined, Duration::from_millis(100)).unwrap();
    assert!(start.elapsed() < Duration::from_secs(2), "{:?}", start.elapsed());
}

#[test]
fn goodbye_page_is_shown_after_exit() {
    let pipeline = Instrumented::new(&[0, GOODBYE_PAGE]);
    let shown = run_for(&pipeline, Mode::Pipelined, Duration::from_millis(150)).unwrap();
    assert!(shown);

    let events = pipeline.events();
    let tail = &events[events.len() - 4..];
    assert_eq!(
        tail,
        &[
            Event::Stage(Stage::Layout),
            Event::Compose {
                page: GOODBYE_PAGE,
                generation: pipeline.generation.load(Ordering::SeqCst)
            },
            Event::Stage(Stage::Display),
            Event::Flush { page: GOODBYE_PAGE },
        ]
    );
}

#[test]
fn desync_stops_the_pipeline() {
    let mut pipeline = Instrumented::new(&[0, GOODBYE_PAGE]);
    pipeline.fail_compose_at = Some(3);
    let result = run_for(&pipeline, Mode::Pipelined, Duration::from_secs(5));
    assert!(matches!(result, Err(Error::Canvas(e)) if e.is_desync()));
    // 出错后不再显示告别页
    assert!(!pipeline.composed().iter().any(|&(page, _)| page == GOODBYE_PAGE));
}

#[test]
fn timer_action_switches_page_with_forced_update() {
    let mut pipeline = Instrumented::new(&[0, 1]);
    pipeline.next_page_at = Some(2);
    run_for(&pipeline, Mode::Cooperative, Duration::from_millis(100)).unwrap();

    let events = pipeline.events();
    assert!(events.contains(&Event::Widgets {
        page: 1,
        force: true,
        generation: 2
    }));
    assert!(pipeline.composed().contains(&(1, 2)));
    assert!(events.contains(&Event::Flush { page: 1 }));
}
