mod calc;

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use keymux_core::{DispatchCounts, DispatchError, Dispatcher, DispatcherConfig};

use crate::calc::{Calc, CalcHandler, Op};

/// Run a calculator workload through the key-sharded dispatcher.
#[derive(Debug, Parser)]
#[command(name = "keymux", version)]
struct Args {
    /// Number of shards (overrides KEYMUX_WORKERS).
    #[arg(long)]
    workers: Option<usize>,

    /// Per-shard queue capacity (overrides KEYMUX_BUFFER_SIZE).
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Handler latency per request, in milliseconds.
    #[arg(long, default_value_t = 10)]
    delay_ms: u64,

    /// Requests submitted per key.
    #[arg(long, default_value_t = 3)]
    rounds: u32,

    /// Also submit a division by zero to show crash containment.
    #[arg(long)]
    crash: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Outcome {
    Ok { value: f64 },
    Rejected { reason: String },
    Failed { reason: String },
    Crashed,
}

#[derive(Debug, Serialize)]
struct Line {
    key: String,
    calc: Calc,
    #[serde(flatten)]
    outcome: Outcome,
}

#[derive(Debug, Serialize)]
struct Report {
    config: DispatcherConfig,
    elapsed_ms: u128,
    results: Vec<Line>,
    counts: DispatchCounts,
}

const KEYS: [&str; 4] = ["add", "sub", "mul", "div"];

fn op_for(key: &str) -> Op {
    match key {
        "add" => Op::Add,
        "sub" => Op::Sub,
        "mul" => Op::Mul,
        _ => Op::Div,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = DispatcherConfig::from_env()?;
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(buffer_size) = args.buffer_size {
        config.buffer_size = buffer_size;
    }
    config.validate()?;

    let handler = Arc::new(CalcHandler::new(Duration::from_millis(args.delay_ms)));
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.try_start(handler, config).await?;

    // (A) key ごとに rounds 件ずつ投入。同じ key は直列、別の key は並列に走る
    let mut jobs = Vec::new();
    for round in 0..args.rounds {
        for key in KEYS {
            let calc = Calc::new(op_for(key), f64::from(round) + 3.0, 2.0);
            jobs.push((key.to_string(), calc));
        }
    }
    if args.crash {
        jobs.push(("div".to_string(), Calc::new(Op::Div, 1.0, 0.0)));
    }

    let started = Instant::now();
    let mut tasks = Vec::with_capacity(jobs.len());
    for (key, calc) in jobs {
        let dispatcher = Arc::clone(&dispatcher);
        let task_key = key.clone();
        let task = tokio::spawn(async move { dispatcher.submit(task_key, calc).await });
        tasks.push((key, calc, task));
    }

    // (B) 結果を集める。handler の panic は submit した task の panic として見える
    let mut results = Vec::with_capacity(tasks.len());
    for (key, calc, task) in tasks {
        let outcome = match task.await {
            Ok(Ok(value)) => Outcome::Ok { value },
            Ok(Err(err @ (DispatchError::Stopped | DispatchError::BufferFull))) => {
                warn!(key = %key, error = %err, "request rejected");
                Outcome::Rejected {
                    reason: err.to_string(),
                }
            }
            Ok(Err(err)) => Outcome::Failed {
                reason: err.to_string(),
            },
            Err(join_err) if join_err.is_panic() => Outcome::Crashed,
            Err(join_err) => Outcome::Failed {
                reason: join_err.to_string(),
            },
        };
        results.push(Line { key, calc, outcome });
    }
    let elapsed = started.elapsed();

    // (C) graceful shutdown: 受け付け済みの分を処理しきってから止まる
    dispatcher.stop().await;
    info!(elapsed_ms = elapsed.as_millis() as u64, "workload finished");

    let report = Report {
        config,
        elapsed_ms: elapsed.as_millis(),
        results,
        counts: dispatcher.counts(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn unset_flags_leave_env_config_alone() {
        // 環境変数は DispatcherConfig::from_env が読む。clap 側は上書き値だけ持つ
        let args = Args::try_parse_from(["keymux", "--buffer-size", "0"]).unwrap();
        assert_eq!(args.workers, None);
        assert_eq!(args.buffer_size, Some(0));
        assert_eq!(args.delay_ms, 10);
        assert_eq!(args.rounds, 3);
        assert!(!args.crash);
    }
}
