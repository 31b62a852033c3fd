use crate::config::{Action, Config};
use crate::dispatch::Dispatcher;
use crate::error::{EResult, Error};
use crate::player::Player;
use crate::poll::PollLoop;
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use std::env;
use std::panic;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

pub mod comm;
pub mod config;
pub mod dispatch;
pub mod edge;
pub mod error;
pub mod interval;
pub mod io;
pub mod player;
pub mod poll;
pub mod server;

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static HOSTNAME: OnceCell<String> = OnceCell::new();

/// Interval argument, parsed with [`interval::parse_interval`]
#[derive(Debug, Copy, Clone)]
pub struct Interval(pub Duration);

impl From<Interval> for Duration {
    fn from(v: Interval) -> Self {
        v.0
    }
}

#[inline]
pub fn hostname() -> &'static str {
    HOSTNAME.get_or_init(|| {
        hostname::get().map_or_else(|_| "unknown".to_owned(), |h| h.to_string_lossy().to_string())
    })
}

/// Sets up the panic hook and the logger
///
/// `SYSLOG=1` logs to the local syslog instead of stdout, `VERBOSE=1` turns
/// on trace level same as `verbose`.
pub fn init(verbose: bool) -> EResult<()> {
    panic::set_hook(Box::new(|s| {
        println!("PANIC: {}", s);
        std::process::exit(error::EXIT_FAILURE);
    }));
    let verbose = verbose || env::var("VERBOSE").ok().map_or(false, |v| v == "1");
    let syslog: bool = env::var("SYSLOG").ok().map_or(false, |v| v == "1");
    let level = if verbose {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Info
    };
    if syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_USER,
            hostname: None,
            process: NAME.to_owned(),
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter)
            .map_err(|e| Error::connection(format!("unable to connect to syslog: {}", e)))?;
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map_err(|e| Error::configuration(format!("logger: {}", e)))?;
        log::set_max_level(level);
    } else {
        env_logger::Builder::new()
            .target(env_logger::Target::Stdout)
            .filter_level(level)
            .try_init()
            .map_err(|e| Error::configuration(format!("logger: {}", e)))?;
    }
    debug!("log initialization completed");
    Ok(())
}

/// SIGTERM/SIGINT set the returned flag
pub fn register_signals() -> EResult<Arc<AtomicBool>> {
    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;
    Ok(term)
}

/// Runs the control loop until `stop` is set
///
/// Fails only before the loop is entered: on a source which can not be
/// opened or a worker which can not be started. Read and playback failures
/// inside the loop are logged and survived.
pub fn run(config: &Config, dry_run: bool, stop: &AtomicBool) -> EResult<()> {
    run_with_player(config, player::create(&config.player, dry_run), stop)
}

/// Same as [`run`] with a custom playback controller
pub fn run_with_player(
    config: &Config,
    player: Box<dyn Player>,
    stop: &AtomicBool,
) -> EResult<()> {
    info!("{} {}, system: {}", NAME, VERSION, hostname());
    config.warn_unmapped()?;
    let actions = config.actions();
    let failed = player::check_videos(actions.iter().filter_map(|(name, action)| match action {
        Action::Play(path) => Some((name.as_str(), path.as_path())),
        Action::Stop => None,
    }));
    if failed > 0 {
        warn!("{} video(s) can not be played", failed);
    }
    let source = io::open(config)?;
    let dispatcher = Dispatcher::start(actions, player)?;
    if let Some(ref name) = config.startup {
        info!("startup video: {}", name);
        dispatcher.play(name);
    }
    let mut poll = PollLoop::new(source, config.cooldown, config.poll);
    poll.run(&dispatcher, stop);
    dispatcher.shutdown()?;
    info!("{} stopped", NAME);
    Ok(())
}
