use std::{path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{Level, error, info};

use dpfd::{
    config::Config,
    daemon::Daemon,
    plugin::{Uptime, Values},
    scheduler::{ExitSignal, Mode, Scheduler},
    transport::{dpf::Dpf, usb::UsbLink},
};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(default_value = "dpfd.toml")]
    config: PathBuf,

    /// 更多日志, 可重复
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// 强制单线程模式
    #[arg(long)]
    cooperative: bool,

    /// Validate the configuration and print the layout, without opening the device
    #[arg(long)]
    check: bool,
}

impl Args {
    fn level(&self) -> Level {
        match (self.quiet, self.verbose) {
            (true, _) => Level::WARN,
            (false, 0) => Level::INFO,
            (false, 1) => Level::DEBUG,
            (false, _) => Level::TRACE,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt().with_max_level(args.level()).init();

    let config = Config::load(&args.config).with_context(|| format!("failed to load {}", args.config.display()))?;
    if args.check {
        print!("{}", config.summary());
        return Ok(());
    }

    let mode = if args.cooperative { Mode::Cooperative } else { config.mode };
    let scheduler = Scheduler::new(mode);
    let exit = scheduler.exit_signal();

    tokio::spawn({
        let exit = exit.clone();
        async move {
            if let Err(e) = watch_signals(exit).await {
                error!(error = %e, "failed to install signal handlers");
            }
        }
    });

    let result = tokio::task::spawn_blocking(move || run(&config, &scheduler))
        .await
        .context("display thread panicked")?;
    exit.raise();
    result
}

fn run(config: &Config, scheduler: &Scheduler) -> Result<()> {
    let display = &config.display;
    let link = UsbLink::open(&display.device).context("failed to open display")?;
    let dpf = Dpf::open(display.device.clone(), link, display.backlight).context("failed to initialize display")?;

    let values = Values::new();
    let daemon = Daemon::new(
        dpf,
        config.layout.clone(),
        config.widget_set(&values),
        values,
        &display.palette,
        display.orientation,
    )?
    .with_plugin(Box::new(Uptime::new()));
    let daemon = config
        .timers(Instant::now())
        .into_iter()
        .fold(daemon, Daemon::with_timer);

    let result = scheduler.run(&daemon);
    daemon.finish(matches!(result, Ok(true)));
    result.map(drop).context("display loop failed")
}

async fn watch_signals(exit: ExitSignal) -> std::io::Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = hup.recv() => "SIGHUP",
        _ = int.recv() => "SIGINT",
        _ = quit.recv() => "SIGQUIT",
    };
    info!(signal = name, "exit requested");
    exit.raise();
    Ok(())
}
