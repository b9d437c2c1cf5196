use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cmd::read::Target;
use crate::cmd::BenchArgs;
use crate::exit::{device_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_fields, print_json, OutputFormat};

/// Upper bound on samples reserved up front; longer runs grow as they go.
const MAX_RESERVED_SAMPLES: usize = 100_000;

/// Round-trip statistics in microseconds.
#[derive(Debug, Serialize, PartialEq)]
pub struct BenchStats {
    pub count: usize,
    pub mean_us: f64,
    pub std_dev_us: f64,
    pub min_us: f64,
    pub max_us: f64,
}

impl BenchStats {
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let us: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1e6).collect();
        let count = us.len();
        let mean = us.iter().sum::<f64>() / count as f64;
        let variance = us.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        Some(Self {
            count,
            mean_us: mean,
            std_dev_us: variance.sqrt(),
            min_us: us.iter().copied().fold(f64::INFINITY, f64::min),
            max_us: us.iter().copied().fold(0.0, f64::max),
        })
    }
}

pub fn run(args: BenchArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be greater than zero"));
    }
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let device = args.connect.open()?;
    let target = Target::resolve(device.registers(), &args.register, None)?;

    let mut samples = Vec::with_capacity(reserved_samples(args.count));
    for _ in 0..args.count {
        if !running.load(Ordering::SeqCst) {
            tracing::info!(completed = samples.len(), "interrupted");
            break;
        }
        let reply = device
            .read_register(target.address, target.payload_type)
            .map_err(|err| device_error(&format!("read {} failed", target.label()), err))?;
        samples.push(reply.round_trip());
    }
    device
        .disconnect()
        .map_err(|err| device_error("disconnect failed", err))?;

    let Some(stats) = BenchStats::from_samples(&samples) else {
        return Err(CliError::new(crate::exit::FAILURE, "no requests completed"));
    };
    match format {
        OutputFormat::Json => print_json(&stats),
        OutputFormat::Table => print_fields(&[
            ("Requests", stats.count.to_string()),
            ("Mean (us)", format!("{:.1}", stats.mean_us)),
            ("Std dev (us)", format!("{:.1}", stats.std_dev_us)),
            ("Min (us)", format!("{:.1}", stats.min_us)),
            ("Max (us)", format!("{:.1}", stats.max_us)),
        ]),
        OutputFormat::Pretty | OutputFormat::Raw => println!(
            "{} requests: mean {:.1} us, std dev {:.1} us, max {:.1} us",
            stats.count, stats.mean_us, stats.std_dev_us, stats.max_us
        ),
    }
    Ok(SUCCESS)
}

fn reserved_samples(count: u32) -> usize {
    usize::try_from(count).map_or(MAX_RESERVED_SAMPLES, |count| count.min(MAX_RESERVED_SAMPLES))
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
