mod summary;

use std::fs::File;
use std::io::stderr;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use ccsds_router::spacepacket::TimestampField;
use ccsds_router::{start_route, Apid, EndpointConfig, PrimaryHeader, RouteConfig, TimingPolicy};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a route until its source is exhausted, or until stopped.
    ///
    /// File sources end at end of file and TCP client sources when the server closes the
    /// connection. UDP and TCP server sources run until --duration elapses or the
    /// process is interrupted.
    Run {
        /// Route configuration file (JSON).
        config: PathBuf,

        /// Override the configured timing policy.
        ///
        /// One of forward, replay, delay:<secs>, or throttle:<secs>. Replay uses the
        /// default timestamp field: 4 byte seconds and 2 byte 1/65536 subseconds directly
        /// after the primary header.
        #[arg(short, long, value_parser = parse_timing, value_name = "policy")]
        timing: Option<TimingPolicy>,

        /// Only route these apids or apid ranges, replacing any configured list.
        ///
        /// This accepts a CSV of APIDs as well as ranges of the format <start>-<end>
        /// where start and end are inclusive. For example, --apids 0-5,10,20
        #[arg(short, long, value_name = "csv", value_delimiter = ',')]
        apids: Vec<String>,

        /// Stop the route after this many seconds.
        #[arg(short, long, value_name = "secs")]
        duration: Option<f64>,

        /// Run summary format.
        #[arg(short, long, default_value = "text")]
        format: summary::Format,
    },
    /// Validate a route configuration file without opening any endpoints.
    Check {
        /// Route configuration file (JSON).
        config: PathBuf,
    },
    /// Write an example route configuration.
    Init {
        /// Delete output file if it already exists
        #[arg(long, action)]
        clobber: bool,

        /// Output file path.
        #[arg(short, long, default_value = "route.json", value_name = "path")]
        output: PathBuf,
    },
}

fn parse_number_ranges(list: Vec<String>) -> Result<Vec<Apid>> {
    let rx = regex::Regex::new(r"^(?:(\d+)|(\d+)-(\d+))$").context("compiling range regex")?;
    let mut values = Vec::default();
    for (i, s) in list.into_iter().enumerate() {
        let Some(cap) = rx.captures(s.trim()) else {
            bail!("invalid apid or range {s:?}");
        };

        if cap.get(1).is_some() {
            let x = cap[1]
                .parse::<Apid>()
                .map_err(|_| anyhow!("invalid apid value at {i}"))?;
            values.push(x);
        } else {
            let start = cap[2]
                .parse::<Apid>()
                .map_err(|_| anyhow!("invalid range value at {i}"))?;
            let end = cap[3]
                .parse::<Apid>()
                .map_err(|_| anyhow!("invalid range value at {i}"))?;
            if start > end {
                bail!("invalid range {s:?}")
            }
            values.extend(start..=end);
        }
    }
    if let Some(apid) = values.iter().find(|a| **a > PrimaryHeader::APID_MAX) {
        bail!("apid {apid} is out of range");
    }

    Ok(values)
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs = s
        .parse::<f64>()
        .map_err(|_| format!("{s:?} is not a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|err| format!("invalid duration {s:?}: {err}"))
}

fn parse_timing(s: &str) -> Result<TimingPolicy, String> {
    let (name, arg) = match s.split_once(':') {
        Some((name, arg)) => (name, Some(arg)),
        None => (s, None),
    };
    match (name, arg) {
        ("forward", None) => Ok(TimingPolicy::ForwardThrough),
        ("replay", None) => Ok(TimingPolicy::Replay(TimestampField::default())),
        ("delay", Some(secs)) => Ok(TimingPolicy::Delay {
            duration: parse_secs(secs)?,
        }),
        ("throttle", Some(secs)) => Ok(TimingPolicy::Throttle {
            interval: parse_secs(secs)?,
        }),
        _ => Err(format!(
            "{s:?} is not one of forward, replay, delay:<secs>, throttle:<secs>"
        )),
    }
}

fn load_config(path: &Path) -> Result<RouteConfig> {
    let file = File::open(path).with_context(|| format!("opening config {path:?}"))?;
    let config: RouteConfig = serde_json::from_reader(file)
        .with_context(|| format!("parsing config {path:?}"))?;
    config.validate().context("validating config")?;
    Ok(config)
}

fn example_config() -> RouteConfig {
    RouteConfig::builder()
        .source(EndpointConfig::File {
            path: "packets.dat".into(),
        })
        .sink(EndpointConfig::Udp {
            address: "127.0.0.1:9000".into(),
        })
        .timing(TimingPolicy::Throttle {
            interval: Duration::from_millis(100),
        })
        .build()
}

fn run(
    config: &Path,
    timing: Option<&TimingPolicy>,
    apids: Vec<String>,
    duration: Option<f64>,
    format: &summary::Format,
) -> Result<()> {
    let mut config = load_config(config)?;
    if let Some(timing) = timing {
        config.timing = timing.clone();
    }
    if !apids.is_empty() {
        config.allowed_apids = parse_number_ranges(apids)?.into_iter().collect();
    }
    let duration = duration
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("invalid --duration")?;

    info!(
        "routing {} to {} ({})",
        config.source,
        config.sink,
        config.timing.name()
    );
    let handle = start_route(config.clone()).context("starting route")?;

    if let Some(duration) = duration {
        let deadline = Instant::now() + duration;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        if !handle.is_finished() {
            debug!("run duration elapsed; stopping");
            handle.stop();
        }
    }

    let summary = handle.join().context("route failed")?;
    summary::report(&config, &summary, format)
}

fn check(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    println!(
        "{}: {} -> {} ({}) ok",
        path.display(),
        config.source,
        config.sink,
        config.timing.name()
    );
    Ok(())
}

fn init(output: &Path, clobber: bool) -> Result<()> {
    if !clobber && output.exists() {
        bail!("{output:?} exists; use --clobber");
    }
    let file =
        File::create(output).with_context(|| format!("failed to create output {output:?}"))?;
    serde_json::to_writer_pretty(file, &example_config()).context("writing config")?;
    info!("wrote example route to {output:?}");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("CCSDS_ROUTER_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run {
            config,
            timing,
            apids,
            duration,
            format,
        } => run(&config, timing.as_ref(), apids, duration, &format),
        Commands::Check { config } => check(&config),
        Commands::Init { clobber, output } => init(&output, clobber),
    }
}
