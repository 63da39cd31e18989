use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use logutil::LogFormat;
use rayfold_core::cancel::CancellationToken;
use rayfold_core::config::AggregationConfig;
use rayfold_core::execution::merge::MergedEnumerator;
use rayfold_core::execution::orchestrator::AggregationOrchestrator;
use rayfold_core::functions::AggregateFunction;
use rayfold_core::functions::builtin::{AvgFloat, Count, Max, Min, SumChecked, SumFloat};
use rayfold_core::partition::{PartitionEnumerator, split_into_partitions};
use rayfold_core::runtime::TaskScheduler;
use rayfold_core::runtime::threaded::ThreadedScheduler;
use rayfold_error::Result;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AggregateKind {
    /// Floating point sum.
    Sum,
    /// Integer sum, errors on overflow.
    SumInt,
    Count,
    Min,
    Max,
    /// Floating point average.
    Avg,
}

#[derive(Debug, Parser)]
#[clap(name = "rayfold")]
#[clap(version)]
#[clap(about = "Run a partitioned parallel aggregate over generated data", long_about = None)]
struct Arguments {
    /// Aggregate to compute.
    #[clap(value_enum, default_value_t = AggregateKind::Sum)]
    aggregate: AggregateKind,

    /// Number of generated input rows.
    #[clap(long, default_value_t = 1_000_000)]
    rows: usize,

    /// Number of partitions to split the input into. Defaults to the number of
    /// CPUs.
    #[clap(long, env = "RAYFOLD_PARTITIONS")]
    partitions: Option<usize>,

    /// Number of worker threads. Defaults to the number of CPUs.
    #[clap(long, env = "RAYFOLD_THREADS")]
    threads: Option<usize>,

    /// Print every partition's intermediate result in the order produced by
    /// the `merge` setting instead of the final result.
    #[clap(long)]
    per_partition: bool,

    /// Override an aggregation setting, e.g. `--set poll_interval=255`.
    #[clap(long = "set", value_parser = parse_setting)]
    settings: Vec<(String, String)>,

    /// Print available settings and exit.
    #[clap(long)]
    list_settings: bool,

    /// Default log level. RUST_LOG takes precedence.
    #[clap(long, default_value_t = tracing::Level::WARN)]
    log_level: tracing::Level,

    /// Log output format.
    #[clap(long, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn parse_setting(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("Expected setting as 'name=value', got '{s}'")),
    }
}

fn main() {
    let args = Arguments::parse();
    logutil::configure_global_logger(args.log_level, args.log_format);

    if let Err(e) = inner(args) {
        eprintln!("ERROR: {e}");
        std::process::exit(1);
    }
}

fn inner(args: Arguments) -> Result<()> {
    if args.list_settings {
        for (name, description) in AggregationConfig::describe_settings() {
            println!("{name:<20} {description}");
        }
        return Ok(());
    }

    let mut config = AggregationConfig::default();
    for (name, value) in &args.settings {
        config.set_from_str(name, value)?;
    }

    let threads = args.threads.unwrap_or_else(num_cpus::get);
    let scheduler: Arc<dyn TaskScheduler> = Arc::new(ThreadedScheduler::try_new(threads)?);

    let runner = Runner {
        args: &args,
        config,
        scheduler,
    };

    match args.aggregate {
        AggregateKind::Sum => runner.run(SumFloat::<f64>::new(), generate_floats(args.rows)),
        AggregateKind::SumInt => runner.run(SumChecked::<i64>::new(), generate_ints(args.rows)),
        AggregateKind::Count => runner.run(Count::<i64>::new(), generate_ints(args.rows)),
        AggregateKind::Min => runner.run(Min::<i64>::new(), generate_ints(args.rows)),
        AggregateKind::Max => runner.run(Max::<i64>::new(), generate_ints(args.rows)),
        AggregateKind::Avg => runner.run(AvgFloat::<f64>::new(), generate_floats(args.rows)),
    }
}

/// Deterministic input, values cycle through `-500..500`.
fn generate_ints(rows: usize) -> Vec<i64> {
    (0..rows)
        .map(|idx| ((idx as u64).wrapping_mul(7919) % 1000) as i64 - 500)
        .collect()
}

fn generate_floats(rows: usize) -> Vec<f64> {
    generate_ints(rows)
        .into_iter()
        .map(|v| v as f64 / 4.0)
        .collect()
}

struct Runner<'a> {
    args: &'a Arguments,
    config: AggregationConfig,
    scheduler: Arc<dyn TaskScheduler>,
}

impl Runner<'_> {
    fn run<A>(&self, function: A, input: Vec<A::Input>) -> Result<()>
    where
        A: AggregateFunction,
        A::Output: Display,
    {
        let partition_count = self.args.partitions.unwrap_or_else(num_cpus::get);
        let partitions = split_into_partitions(input, partition_count)?;

        let orchestrator =
            AggregationOrchestrator::new(function, self.scheduler.clone(), CancellationToken::new())
                .with_config(self.config.clone());

        info!(
            function = orchestrator.function().name(),
            rows = self.args.rows,
            partitions = partition_count,
            threads = self.scheduler.num_threads(),
            "running aggregate"
        );

        let start = Instant::now();

        if self.args.per_partition {
            let mut merged = orchestrator.spawn_merged(partitions, self.config.merge);
            print_partials(merged.get_mut())?;
            merged.release()?;
        } else {
            let output = orchestrator.run(partitions)?;
            println!("{output}");
        }

        info!(elapsed_ms = start.elapsed().as_millis() as u64, "aggregate complete");

        Ok(())
    }
}

fn print_partials<A, E>(merged: &mut MergedEnumerator<A, E>) -> Result<()>
where
    A: AggregateFunction,
    E: PartitionEnumerator<Item = A::Input>,
{
    let mut count = 0;
    while let Some(state) = merged.advance()? {
        println!("{count}\t{state:?}");
        count += 1;
    }
    println!("policy={} partials={count}", merged.policy());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_setting_pairs() {
        assert_eq!(
            ("poll_interval".to_string(), "255".to_string()),
            parse_setting("poll_interval=255").unwrap()
        );
        assert_eq!(
            ("merge".to_string(), "not_buffered".to_string()),
            parse_setting(" merge = not_buffered ").unwrap()
        );
        parse_setting("poll_interval").unwrap_err();
        parse_setting("=4").unwrap_err();
    }

    #[test]
    fn generated_input_is_bounded() {
        let ints = generate_ints(5000);
        assert_eq!(5000, ints.len());
        assert!(ints.iter().all(|v| (-500..500).contains(v)));
        assert_eq!(ints, generate_ints(5000));
    }

    #[test]
    fn arguments_parse() {
        let args = Arguments::try_parse_from([
            "rayfold",
            "sum-int",
            "--rows",
            "10",
            "--partitions",
            "3",
            "--set",
            "poll_interval=255",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(AggregateKind::SumInt, args.aggregate);
        assert_eq!(10, args.rows);
        assert_eq!(Some(3), args.partitions);
        assert_eq!(
            vec![("poll_interval".to_string(), "255".to_string())],
            args.settings
        );
        assert_eq!(LogFormat::Json, args.log_format);
    }
}
