use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use vidplc::config::{Action, Config, SourceConfig, DEFAULT_TIMEOUT};
use vidplc::error::{EResult, Error};
use vidplc::interval::Loop;
use vidplc::io::modbus::{CoilSource, DEFAULT_PORT, DEFAULT_UNIT};
use vidplc::io::TriggerSource;
use vidplc::player::{check_video, VideoStatus};
use vidplc::server::modbus::{Simulator, DEFAULT_MAXCONN, DEFAULT_STEP};
use vidplc::Interval;

#[macro_use]
extern crate prettytable;

#[derive(Parser)]
#[clap(version, about = "PLC-triggered video playback")]
struct Args {
    #[clap(long = "color")]
    color: Option<Color>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::ValueEnum, Copy, Clone)]
enum Color {
    Always,
    Never,
}

impl Color {
    fn ovrride(self) {
        colored::control::set_override(match self {
            Color::Always => true,
            Color::Never => false,
        });
    }
}

#[derive(Parser)]
enum Command {
    #[clap(about = "run the trigger loop")]
    Run(RunParams),
    #[clap(about = "validate the configuration")]
    Check(ConfigParams),
    #[clap(about = "read the configured coils")]
    Coils(CoilsParams),
    #[clap(about = "start the coil simulator")]
    Sim(SimParams),
}

#[derive(Parser)]
struct RunParams {
    config: PathBuf,
    #[clap(long = "dry-run", help = "log playback requests instead of playing")]
    dry_run: bool,
    #[clap(short = 'v', long = "verbose")]
    verbose: bool,
}

#[derive(Parser)]
struct ConfigParams {
    config: PathBuf,
}

#[derive(Parser)]
struct CoilsParams {
    config: PathBuf,
    #[clap(short = 'w', long = "watch", help = "repeat every interval, e.g. 500ms")]
    watch: Option<Interval>,
}

#[derive(Parser)]
struct SimParams {
    #[clap(short = 'l', long = "listen", default_value_t = format!("0.0.0.0:{}", DEFAULT_PORT))]
    listen: String,
    #[clap(short = 'u', long = "unit", default_value_t = DEFAULT_UNIT)]
    unit: u8,
    #[clap(long = "step", help = "sequence step, e.g. 2s")]
    step: Option<Interval>,
    #[clap(long = "no-sequence", help = "keep all coils off")]
    no_sequence: bool,
}

fn ctable(titles: &[&str]) -> prettytable::Table {
    let mut table = prettytable::Table::new();
    let format = prettytable::format::FormatBuilder::new()
        .column_separator(' ')
        .borders(' ')
        .separators(
            &[prettytable::format::LinePosition::Title],
            prettytable::format::LineSeparator::new('-', '-', '-', '-'),
        )
        .padding(0, 1)
        .build();
    table.set_format(format);
    let mut titlevec: Vec<prettytable::Cell> = Vec::new();
    for t in titles {
        titlevec.push(cell!(t.blue()));
    }
    table.set_titles(prettytable::Row::new(titlevec));
    table
}

trait StatusColored {
    fn as_colored_string(&self) -> colored::ColoredString;
}

impl StatusColored for VideoStatus {
    fn as_colored_string(&self) -> colored::ColoredString {
        match self {
            VideoStatus::Ok => self.to_string().green(),
            VideoStatus::Missing => self.to_string().red(),
            VideoStatus::Unreadable => self.to_string().yellow(),
        }
    }
}

fn handle_run(p: RunParams) -> EResult<()> {
    let config = Config::load(&p.config)?;
    vidplc::init(p.verbose)?;
    let term = vidplc::register_signals()?;
    vidplc::run(&config, p.dry_run, &term)
}

fn handle_check(p: ConfigParams) -> EResult<()> {
    let config = Config::load(&p.config)?;
    let actions = config.actions();
    let mut table = ctable(&["input", "address", "action", "video"]);
    for input in config.source.inputs()? {
        let (action, status) = match actions.get(&input.name) {
            Some(Action::Play(path)) => (
                path.display().to_string().normal(),
                check_video(path).as_colored_string(),
            ),
            Some(Action::Stop) => ("stop".cyan(), "".normal()),
            None => ("-".dimmed(), "".normal()),
        };
        table.add_row(row![input.name, input.address, action, status]);
    }
    table.printstd();
    println!(
        "{} source, poll {:?}, cooldown {:?}",
        config.source.kind(),
        config.poll,
        config.cooldown
    );
    println!("{}", "OK".green().bold());
    Ok(())
}

fn print_coils(source: &mut CoilSource) -> EResult<()> {
    let levels = source.read()?;
    let mut table = ctable(&["coil", "address", "value"]);
    for (input, level) in source.inputs().iter().zip(levels) {
        table.add_row(row![
            input.name,
            input.address,
            if level { "on".green() } else { "off".normal() }
        ]);
    }
    table.printstd();
    Ok(())
}

fn handle_coils(p: CoilsParams) -> EResult<()> {
    let config = Config::load(&p.config)?;
    let SourceConfig::Modbus(ref modbus) = config.source else {
        return Err(Error::configuration(format!(
            "coils can be read from a modbus source only, configured: {}",
            config.source.kind()
        )));
    };
    let mut source = CoilSource::create(modbus)?;
    if let Some(watch) = p.watch {
        let term = vidplc::register_signals()?;
        let mut int = Loop::prepare("watch", watch.0);
        while !term.load(Ordering::SeqCst) {
            if let Err(e) = print_coils(&mut source) {
                eprintln!("{}", e.to_string().red());
            }
            println!();
            int.tick();
        }
        source.close();
        Ok(())
    } else {
        print_coils(&mut source)
    }
}

fn handle_sim(p: SimParams) -> EResult<()> {
    vidplc::init(false)?;
    let sim = Simulator::bind(&p.listen, p.unit, DEFAULT_TIMEOUT)?;
    if !p.no_sequence {
        let bank = sim.bank();
        let step = p.step.map_or(DEFAULT_STEP, |s| s.0);
        thread::Builder::new()
            .name("sequence".to_owned())
            .spawn(move || {
                // runs until the process is killed
                if let Err(e) = bank.run_sequence(step, &AtomicBool::new(false)) {
                    log::error!("coil sequence: {}", e);
                }
            })?;
    }
    sim.serve(DEFAULT_MAXCONN)
}

fn main() {
    let args = Args::parse();
    if let Some(color) = args.color {
        color.ovrride();
    }
    let result = match args.command {
        Command::Run(p) => handle_run(p),
        Command::Check(p) => handle_check(p),
        Command::Coils(p) => handle_coils(p),
        Command::Sim(p) => handle_sim(p),
    };
    if let Err(e) = result {
        eprintln!("{} {}", format!("{}:", e.kind()).red().bold(), e);
        std::process::exit(e.exit_code());
    }
}
