use anyhow::{bail, Context};
use bytes::{Buf, BytesMut};
use clap::{Parser, Subcommand, ValueEnum};
use cqdam_server::model::{self, ThroughputSample};
use cqdam_server::protocol::command::parse_info;
use cqdam_server::protocol::resp::{decode_value, encode_request, RespValue};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Barrier;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Pipelined load generator and throughput model fit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Measure throughput at each pipeline depth and fit the model
    Run {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 6379)]
        port: u16,

        /// Concurrent client connections
        #[arg(short, long, default_value_t = 50)]
        clients: usize,

        /// Comma-separated pipeline depths
        #[arg(short, long, value_delimiter = ',', default_value = "1,2,4,8,16,32,64,128")]
        depths: Vec<u32>,

        /// Requests per depth, spread across all clients
        #[arg(short = 'n', long, default_value_t = 200_000)]
        requests: usize,

        /// Value size in bytes for SET
        #[arg(long, default_value_t = 3)]
        value_size: usize,

        #[arg(long, value_enum, default_value_t = Workload::Set)]
        workload: Workload,

        /// Write the measurements to a TOML report
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Refit a saved report
    Fit {
        report: PathBuf,
    },
}

#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
enum Workload {
    Set,
    Get,
}

#[derive(Serialize, Deserialize, Debug)]
struct BenchReport {
    host: String,
    port: u16,
    clients: usize,
    requests: usize,
    workload: Workload,
    samples: Vec<ThroughputSample>,
}

struct ClientResult {
    ops: usize,
    latencies: Vec<Duration>,
}

/// Server counters read through INFO
#[derive(Debug, Default, Clone, Copy)]
struct ServerCounters {
    commands: u64,
    syscalls: u64,
}

fn connect(addr: &str) -> anyhow::Result<TcpStream> {
    let stream = TcpStream::connect(addr).with_context(|| format!("connecting to {}", addr))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Read until `expected` replies are decoded, failing on any error reply
fn read_replies(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    mut expected: usize,
) -> anyhow::Result<Vec<RespValue>> {
    let mut replies = Vec::with_capacity(expected);
    let mut chunk = [0u8; 64 * 1024];

    loop {
        while expected > 0 {
            match decode_value(&buf[..])? {
                Some((RespValue::Error(e), _)) => bail!("server replied with error: {}", e),
                Some((value, used)) => {
                    buf.advance(used);
                    replies.push(value);
                    expected -= 1;
                }
                None => break,
            }
        }
        if expected == 0 {
            return Ok(replies);
        }

        let n = stream.read(&mut chunk)?;
        if n == 0 {
            bail!("server closed the connection");
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn server_counters(addr: &str) -> anyhow::Result<ServerCounters> {
    let mut stream = connect(addr)?;
    let mut request = BytesMut::new();
    encode_request(&mut request, &[b"INFO".as_slice(), b"stats".as_slice()]);
    stream.write_all(&request)?;

    let mut buf = BytesMut::new();
    let reply = read_replies(&mut stream, &mut buf, 1)?;
    let text = match reply.first() {
        Some(RespValue::BulkString(Some(body))) => String::from_utf8_lossy(body).into_owned(),
        other => bail!("unexpected INFO reply: {:?}", other),
    };

    let fields = parse_info(&text);
    let field = |name: &str| -> u64 {
        fields
            .get(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    };
    Ok(ServerCounters {
        commands: field("total_commands_processed"),
        syscalls: field("total_read_calls") + field("total_write_calls"),
    })
}

/// Connect and build the batch one client sends repeatedly
fn prepare_client(
    addr: &str,
    client: usize,
    depth: usize,
    workload: Workload,
    value: &[u8],
) -> anyhow::Result<(TcpStream, BytesMut, BytesMut)> {
    let mut stream = connect(addr)?;
    let mut buf = BytesMut::new();

    let keys: Vec<Vec<u8>> = (0..depth)
        .map(|i| format!("key:{}:{}", client, i).into_bytes())
        .collect();

    let mut set_batch = BytesMut::new();
    for key in &keys {
        encode_request(&mut set_batch, &[b"SET".as_slice(), key.as_slice(), value]);
    }
    let batch = match workload {
        Workload::Set => set_batch,
        Workload::Get => {
            // Reads need the keys in place first
            stream.write_all(&set_batch)?;
            read_replies(&mut stream, &mut buf, depth)?;
            let mut get_batch = BytesMut::new();
            for key in &keys {
                encode_request(&mut get_batch, &[b"GET".as_slice(), key.as_slice()]);
            }
            get_batch
        }
    };

    Ok((stream, buf, batch))
}

fn run_client(
    (mut stream, mut buf, batch): (TcpStream, BytesMut, BytesMut),
    depth: usize,
    batches: usize,
) -> anyhow::Result<ClientResult> {
    let mut latencies = Vec::with_capacity(batches);
    for _ in 0..batches {
        let start = Instant::now();
        stream.write_all(&batch)?;
        read_replies(&mut stream, &mut buf, depth)?;
        latencies.push(start.elapsed());
    }

    Ok(ClientResult {
        ops: batches * depth,
        latencies,
    })
}

fn run_depth(
    addr: &str,
    clients: usize,
    depth: u32,
    requests: usize,
    workload: Workload,
    value: &[u8],
) -> anyhow::Result<ThroughputSample> {
    let depth_usize = depth as usize;
    let batches = (requests / (clients * depth_usize)).max(1);
    let before = server_counters(addr)?;

    // The extra party is this thread, so timing starts once every client is connected
    let barrier = Barrier::new(clients + 1);
    let (results, elapsed) = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..clients)
            .map(|client| {
                let barrier = &barrier;
                scope.spawn(move || {
                    let prepared = prepare_client(addr, client, depth_usize, workload, value);
                    barrier.wait();
                    run_client(prepared?, depth_usize, batches)
                })
            })
            .collect();

        barrier.wait();
        let start = Instant::now();
        let results: Vec<_> = handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("client thread panicked")),
            })
            .collect();
        (results, start.elapsed())
    });

    let mut ops = 0;
    let mut latencies = Vec::new();
    for result in results {
        let result = result?;
        ops += result.ops;
        latencies.extend(result.latencies);
    }
    latencies.sort_unstable();
    let p50 = latencies
        .get(latencies.len() / 2)
        .map(|d| d.as_secs_f64() * 1000.0);

    let after = server_counters(addr)?;
    let commands = after.commands.saturating_sub(before.commands);
    let syscalls_per_op =
        (commands > 0).then(|| after.syscalls.saturating_sub(before.syscalls) as f64 / commands as f64);

    Ok(ThroughputSample {
        depth,
        ops_per_sec: ops as f64 / elapsed.as_secs_f64(),
        p50_latency_ms: p50,
        syscalls_per_op,
    })
}

fn print_samples(samples: &[ThroughputSample]) {
    println!(
        "{:>6} {:>14} {:>10} {:>14} {:>14}",
        "depth", "ops/s", "p50 ms", "syscalls/op", "expected"
    );
    for s in samples {
        println!(
            "{:>6} {:>14.0} {:>10} {:>14} {:>14.4}",
            s.depth,
            s.ops_per_sec,
            s.p50_latency_ms
                .map(|v| format!("{:.3}", v))
                .unwrap_or_else(|| "-".into()),
            s.syscalls_per_op
                .map(|v| format!("{:.4}", v))
                .unwrap_or_else(|| "-".into()),
            model::expected_syscalls_per_op(s.depth)
        );
    }
}

fn print_fit(report: &BenchReport) -> anyhow::Result<()> {
    print_samples(&report.samples);

    let cmp = model::compare(&report.samples)?;
    let fit = &cmp.batched;
    println!();
    println!("Batched-service model T(p) = p / (t0 + t1*p)");
    match fit.t0_confidence_interval {
        Some((lo, hi)) => println!(
            "  t0 = {:.2} us/batch [{:.2}, {:.2}]",
            fit.t0_us_per_batch, lo, hi
        ),
        None => println!("  t0 = {:.2} us/batch", fit.t0_us_per_batch),
    }
    match fit.t1_confidence_interval {
        Some((lo, hi)) => println!("  t1 = {:.1} ns/op [{:.1}, {:.1}]", fit.t1_ns_per_op, lo, hi),
        None => println!("  t1 = {:.1} ns/op", fit.t1_ns_per_op),
    }
    println!("  R^2 (linearized)  = {:.6}", fit.r_squared);
    println!("  R^2 (throughput)  = {:.6}", cmp.batched_r_squared);
    if let Some(t_max) = fit.t_max_ops_per_sec {
        println!("  Tmax = {:.2} Mops/s", t_max / 1e6);
    }
    if let Some(knee) = fit.knee_depth {
        println!("  knee at p = {:.1}", knee);
    }
    println!(
        "Linear model T = a + b*p: R^2 = {:.6} ({})",
        cmp.linear.r_squared,
        if cmp.batched_preferred {
            "batched model preferred"
        } else {
            "linear model fits better"
        }
    );

    let checks = model::check_pipeline_closure(&report.samples, report.clients);
    let violations: Vec<_> = checks.iter().filter(|c| !c.holds).collect();
    println!(
        "Pipeline closure T*p50 <= {}*p: {} of {} samples hold",
        report.clients,
        checks.len() - violations.len(),
        checks.len()
    );
    for v in violations {
        warn!(
            "closure violated at p={}: {:.1} > {:.1}",
            v.depth, v.in_flight, v.bound
        );
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("cqdam_bench={}", log_level))
        .init();

    match cli.command {
        Commands::Run {
            host,
            port,
            clients,
            depths,
            requests,
            value_size,
            workload,
            output,
        } => {
            if clients == 0 {
                bail!("--clients must be > 0");
            }
            if depths.iter().any(|&d| d == 0) {
                bail!("pipeline depths must be >= 1");
            }

            let addr = format!("{}:{}", host, port);
            let value = vec![b'x'; value_size];
            info!(
                "Benchmarking {} with {} clients, {:?} workload, depths {:?}",
                addr, clients, workload, depths
            );

            let mut samples = Vec::with_capacity(depths.len());
            for &depth in &depths {
                let sample = run_depth(&addr, clients, depth, requests, workload, &value)?;
                debug!("depth {}: {:.0} ops/s", depth, sample.ops_per_sec);
                samples.push(sample);
            }

            let report = BenchReport {
                host,
                port,
                clients,
                requests,
                workload,
                samples,
            };
            if let Some(path) = output {
                std::fs::write(&path, toml::to_string_pretty(&report)?)?;
                info!("Report written to {}", path.display());
            }
            print_fit(&report)
        }

        Commands::Fit { report } => {
            let contents = std::fs::read_to_string(&report)
                .with_context(|| format!("reading {}", report.display()))?;
            let report: BenchReport = toml::from_str(&contents)?;
            print_fit(&report)
        }
    }
}
