use log::info;
use structopt::StructOpt;

use std::{io, path, result};

mod discover;
mod start;

/// Broker node for chunked posts.
#[derive(Clone, StructOpt)]
pub struct Opt {
    #[structopt(long = "config")]
    config_loc: Option<path::PathBuf>,

    #[structopt(short = "v")]
    v: bool,

    #[structopt(long = "vv")]
    vv: bool,

    #[structopt(long = "log-mod", default_value = "")]
    log_mod: String,

    #[structopt(subcommand)]
    subcmd: SubCommand,
}

#[derive(Clone, StructOpt)]
pub enum SubCommand {
    /// Start a broker node, stop with ctrl-c.
    Start(start::Start),
    /// Ask a broker for the owner of a topic.
    Discover(discover::Discover),
}

pub type Result<T> = result::Result<T, String>;

fn main() {
    let opts = parse_cmd_line();

    setup_logging(&opts);
    info!("verbosity level {:?}", opts.to_verbosity());

    let res = match &opts.subcmd {
        SubCommand::Start(_) => start::run(opts),
        SubCommand::Discover(_) => discover::run(opts),
    };

    if let Err(err) = res {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn parse_cmd_line() -> Opt {
    Opt::from_args()
}

use env_logger::{fmt::Target, Builder, WriteStyle};
use log::Level;
use std::io::Write;
fn setup_logging(opts: &Opt) {
    let level = match opts.to_verbosity() {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let log_mod = opts.log_mod.clone();

    Builder::from_default_env()
        .filter_level(level)
        .parse_default_env()
        .target(Target::Stdout)
        .format(move |f, r| match r.module_path() {
            Some(m) if !m.contains(&log_mod) => Ok(()),
            _ => log_format(f, r),
        })
        .write_style(WriteStyle::Auto)
        .init();
}

use env_logger::fmt::{Color, Formatter};
fn log_format(f: &mut Formatter, r: &log::Record<'_>) -> io::Result<()> {
    let mut level_style = f.style();
    match r.level() {
        Level::Error => level_style.set_color(Color::Red).set_bold(false),
        Level::Warn => level_style.set_color(Color::Yellow).set_bold(false),
        Level::Info => level_style.set_color(Color::Blue).set_bold(false),
        Level::Debug => level_style.set_color(Color::Magenta).set_bold(false),
        Level::Trace => level_style.set_color(Color::Cyan).set_bold(false),
    };
    let mut mod_style = f.style();
    mod_style.set_color(Color::Green).set_bold(false);

    let file = r
        .file()
        .and_then(|file| path::Path::new(file).file_stem())
        .and_then(|stem| stem.to_str())
        .unwrap_or("-");
    let loc = mod_style.value(format!("{}:{}", file, r.line().unwrap_or(0)));
    writeln!(
        f,
        "{} [{:5}] [{:>13}] {}",
        chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%Z"),
        level_style.value(r.level()),
        loc,
        r.args()
    )
}

impl Opt {
    fn to_verbosity(&self) -> usize {
        match (self.v, self.vv) {
            (_, true) => 2,
            (true, false) => 1,
            (false, false) => 0,
        }
    }
}
