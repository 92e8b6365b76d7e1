use anyhow::Context;
use clap::{Parser, Subcommand};
use hound::{SampleFormat, WavSpec, WavWriter};
use lean_mixer::audio_io::StreamGraph;
use lean_mixer::config::{EngineConfig, CONFIG};
use lean_mixer::graph::{GraphCommand, OfflineGraph};
use lean_mixer::models::Catalog;
use lean_mixer::session::SessionEngine;
use lean_mixer::Stage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lean_mixer_cli", about = "Gauge-driven stem synchronization and mixing engine")]
struct Cli {
    /// TOML file overriding the engine defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Master output gain (0.0 - 1.0)
    #[arg(long, default_value_t = 1.0)]
    master_gain: f32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive a scripted session offline and write the mix to a WAV file
    Render {
        /// JSON catalog naming the clock asset and the track sets
        #[arg(long)]
        catalog: PathBuf,
        /// Index of the track set to play
        #[arg(long, default_value_t = 0)]
        set: usize,
        #[arg(long)]
        out: PathBuf,
        /// Seconds to run before the stop fade begins
        #[arg(long, default_value_t = 60.0)]
        seconds: f64,
        /// Seconds of leaning per on/off cycle
        #[arg(long, default_value_t = 20.0)]
        lean_on: f64,
        /// Seconds of rest per on/off cycle
        #[arg(long, default_value_t = 4.0)]
        lean_off: f64,
        #[arg(long, default_value_t = 44_100)]
        sample_rate: u32,
    },
    /// Play a session on the default output device until ctrl-c
    Play {
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long, default_value_t = 0)]
        set: usize,
        /// Seconds of leaning per on/off cycle; rest comes from --lean-off
        #[arg(long, default_value_t = 20.0)]
        lean_on: f64,
        #[arg(long, default_value_t = 0.0)]
        lean_off: f64,
    },
}

fn load_catalog(path: &Path) -> anyhow::Result<Catalog> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read catalog {}", path.display()))?;
    let catalog: Catalog =
        serde_json::from_str(&text).with_context(|| format!("parse catalog {}", path.display()))?;
    Ok(catalog)
}

fn lean_at(t: f64, lean_on: f64, lean_off: f64) -> bool {
    let period = lean_on + lean_off;
    if period <= 0.0 {
        return true;
    }
    t % period < lean_on
}

#[allow(clippy::too_many_arguments)]
fn render(
    cfg: EngineConfig,
    master_gain: f32,
    catalog: PathBuf,
    set: usize,
    out: PathBuf,
    seconds: f64,
    lean_on: f64,
    lean_off: f64,
    sample_rate: u32,
) -> anyhow::Result<()> {
    let catalog = load_catalog(&catalog)?;
    let tick_rate = cfg.tick_rate;
    let tick_interval = cfg.tick_interval();
    let fade_out_time = cfg.fade_out_time;

    let graph = OfflineGraph::new(sample_rate, &cfg);
    let mut engine = SessionEngine::new(graph, catalog, cfg);
    engine.graph_mut().send(GraphCommand::SetMasterGain(master_gain));
    engine.select_set(set)?;
    engine.connect()?;

    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output directory {}", parent.display()))?;
    }
    let mut writer =
        WavWriter::create(&out, spec).with_context(|| format!("create {}", out.display()))?;

    let frames_per_tick = (sample_rate as f64 * tick_interval).round() as usize;
    let mut buffer = vec![0.0f32; frames_per_tick * 2];

    let mut write_tick = |engine: &mut SessionEngine<OfflineGraph>,
                          writer: &mut WavWriter<std::io::BufWriter<std::fs::File>>|
     -> anyhow::Result<()> {
        engine.graph_mut().render_block(&mut buffer);
        for sample in &buffer {
            let s = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(s).context("write sample")?;
        }
        Ok(())
    };

    let total_ticks = (seconds * tick_rate as f64).ceil() as u64;
    for tick in 0..total_ticks {
        let t = tick as f64 * tick_interval;
        let frame = engine.tick(lean_at(t, lean_on, lean_off));
        if let Some(e) = engine.take_last_error() {
            log::warn!("render: {e}");
        }
        // The mix-start flip rides a wall timer while the render runs much
        // faster than real time. Pacing the short released window keeps the
        // flip within a tick of its computed instant.
        if frame.stage == Stage::Syncing && engine.is_released() {
            std::thread::sleep(std::time::Duration::from_secs_f64(tick_interval));
        }
        write_tick(&mut engine, &mut writer)?;
    }

    // The fade ramp is frame-accurate on the graph, so the tail can be
    // rendered without waiting for the wall-clock teardown.
    engine.stop();
    let fade_ticks = (fade_out_time * tick_rate as f64).ceil() as u64;
    for _ in 0..fade_ticks {
        engine.tick(false);
        write_tick(&mut engine, &mut writer)?;
    }

    writer.finalize().context("finalize WAV file")?;
    log::info!("wrote {}", out.display());
    Ok(())
}

fn play(
    cfg: EngineConfig,
    master_gain: f32,
    catalog: PathBuf,
    set: usize,
    lean_on: f64,
    lean_off: f64,
) -> anyhow::Result<()> {
    let catalog = load_catalog(&catalog)?;
    let tick_interval = cfg.tick_interval();

    let graph = StreamGraph::start(&cfg)?;
    let mut engine = SessionEngine::new(graph, catalog, cfg);
    engine.graph_mut().send(GraphCommand::SetMasterGain(master_gain));
    engine.select_set(set)?;
    engine.connect()?;

    let stop_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = stop_flag.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("install ctrl-c handler")?;

    log::info!("playing; lean pattern {lean_on}s on / {lean_off}s off; ctrl-c to stop");

    let started = std::time::Instant::now();
    loop {
        let t = started.elapsed().as_secs_f64();
        engine.tick(lean_at(t, lean_on, lean_off));
        if let Some(e) = engine.take_last_error() {
            log::warn!("{e}");
        }

        if stop_flag.load(Ordering::SeqCst) && engine.is_connected() && !engine.is_stopping() {
            engine.stop();
        }
        if !engine.is_connected() && engine.stage() == Stage::Idle && stop_flag.load(Ordering::SeqCst)
        {
            break;
        }

        std::thread::sleep(std::time::Duration::from_secs_f64(tick_interval));
    }

    engine.graph_mut().shutdown();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    lean_mixer::logging::init_logging();
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => CONFIG.clone(),
    };

    match cli.command {
        Command::Render {
            catalog,
            set,
            out,
            seconds,
            lean_on,
            lean_off,
            sample_rate,
        } => render(
            cfg,
            cli.master_gain,
            catalog,
            set,
            out,
            seconds,
            lean_on,
            lean_off,
            sample_rate,
        ),
        Command::Play {
            catalog,
            set,
            lean_on,
            lean_off,
        } => play(cfg, cli.master_gain, catalog, set, lean_on, lean_off),
    }
}
