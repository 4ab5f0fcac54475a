//! blackboxd - blackbox event recorder daemon
//!
//! This daemon:
//! 1. Loads configuration (file + `BLACKBOX_*` overrides)
//! 2. Pulls synchronized frames from the synthetic rig at the ingest rate
//! 3. Buffers them in the recorder's ring buffer
//! 4. Arms events from stdin (`trigger [tag]`) or `--trigger-after`
//! 5. Drains pending writes on `quit`, Ctrl-C or `--seconds` expiry

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

use blackbox_recorder::{EventRecorder, PushOutcome, RecorderConfig, RigConfig, SyntheticRig};

const STATS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-camera blackbox event recorder")]
struct Args {
    /// JSON or TOML configuration file.
    #[arg(long, env = "BLACKBOX_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after this many seconds (0 runs until Ctrl-C or `quit`).
    #[arg(long, default_value_t = 0)]
    seconds: u64,
    /// Fire a trigger automatically this many seconds after start.
    #[arg(long)]
    trigger_after: Option<f64>,
    /// Tag for the automatic trigger.
    #[arg(long, default_value = "auto")]
    tag: String,
}

#[derive(Debug, PartialEq)]
enum Command {
    Trigger(String),
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "trigger" | "t" => Some(Command::Trigger(parts.next().unwrap_or("").to_string())),
        "quit" | "q" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

fn spawn_stdin_reader(tx: Sender<Command>) -> Result<()> {
    std::thread::Builder::new()
        .name("blackbox-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Some(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => log::warn!(
                        "unknown command '{}' (expected: trigger [tag] | quit)",
                        line.trim()
                    ),
                }
            }
        })?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = RecorderConfig::load_from(args.config.as_deref())?;
    let recorder = EventRecorder::from_config(&config)?;

    let mut rig = SyntheticRig::new(RigConfig {
        url: config.ingest.url.clone(),
        cameras: config.cameras,
        width: config.frame.width,
        height: config.frame.height,
        fps: config.ingest.fps,
    })?;
    rig.connect()?;

    let (tx, rx) = mpsc::channel();
    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Command::Quit);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    spawn_stdin_reader(tx)?;

    log::info!(
        "blackboxd running. {} cameras @ {} fps, writing to {}",
        config.cameras,
        config.ingest.fps,
        config.output_dir.display()
    );
    log::info!("commands: 'trigger [tag]' arms an event, 'quit' stops");

    let result = run(&args, &config, &recorder, &mut rig, &rx);

    let drained = recorder.close(config.shutdown_wait);
    let stats = recorder.persist_stats();
    log::info!(
        "blackboxd stopped (drained={}, enqueued={}, written={}, dropped={}, failed={})",
        drained,
        stats.enqueued,
        stats.written,
        stats.dropped,
        stats.failed
    );
    result
}

fn run(
    args: &Args,
    config: &RecorderConfig,
    recorder: &EventRecorder,
    rig: &mut SyntheticRig,
    commands: &Receiver<Command>,
) -> Result<()> {
    let tick = Duration::from_secs_f64(1.0 / config.ingest.fps as f64);
    let started = Instant::now();
    let deadline = (args.seconds > 0).then(|| started + Duration::from_secs(args.seconds));
    let mut auto_trigger = args
        .trigger_after
        .map(|secs| started + Duration::from_secs_f64(secs.max(0.0)));
    let mut last_stats = Instant::now();
    let mut next_tick = Instant::now();

    loop {
        loop {
            match commands.try_recv() {
                Ok(Command::Trigger(tag)) => arm(recorder, &tag),
                Ok(Command::Quit) => {
                    log::info!("shutdown requested");
                    return Ok(());
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        let now = Instant::now();
        if deadline.is_some_and(|d| now >= d) {
            log::info!("run time of {}s elapsed", args.seconds);
            return Ok(());
        }
        if auto_trigger.is_some_and(|at| now >= at) {
            auto_trigger = None;
            arm(recorder, &args.tag);
        }

        let frames = rig.next_batch()?;
        match recorder.push_batch(frames, None) {
            PushOutcome::QueueFull { event_id } => {
                log::warn!("event {} dropped: persist queue full", event_id)
            }
            PushOutcome::Dropped(reason) => log::warn!("batch dropped: {:?}", reason),
            _ => {}
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            last_stats = Instant::now();
            let rig_stats = rig.stats();
            log::debug!(
                "ticks={} buffered={} ({} bytes) armed={} pending={}",
                rig_stats.ticks,
                recorder.buffered_len(),
                recorder.buffered_bytes(),
                recorder.is_armed(),
                recorder.pending_jobs()
            );
        }

        next_tick += tick;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }
}

fn arm(recorder: &EventRecorder, tag: &str) {
    match recorder.trigger(tag) {
        Some(event_id) => log::info!("trigger accepted: {}", event_id),
        None => log::info!("trigger ignored: an event is already being recorded"),
    }
}
