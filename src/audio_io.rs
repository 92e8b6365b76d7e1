use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam::channel::{unbounded, Receiver, Sender};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::graph::{AudioGraph, GraphCommand, GraphState};

/// Live audio output: a `GraphState` rendered inside the cpal callback on a
/// dedicated thread. The tick loop talks to it through a lock-free command
/// queue; the frame clock comes back through a shared atomic.
pub struct StreamGraph {
    command_producer: ringbuf::HeapProd<GraphCommand>,
    stop_tx: Sender<()>,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl StreamGraph {
    /// Open the default output device and start rendering silence until
    /// sources are bound.
    pub fn start(cfg: &EngineConfig) -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no output device available"))?;
        let supported = device
            .default_output_config()
            .map_err(|e| anyhow::anyhow!("failed to get default output config: {e}"))?;
        let sample_rate = supported.sample_rate().0;

        let state = GraphState::new(sample_rate, cfg);

        let rb = HeapRb::<GraphCommand>::new(1024);
        let (prod, cons) = rb.split();
        let (stop_tx, stop_rx) = unbounded();

        let frames = Arc::new(AtomicU64::new(0));
        let frames_for_thread = frames.clone();

        std::thread::spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                run_audio_stream(state, cons, stop_rx, frames_for_thread);
            }));
            if let Err(e) = result {
                if let Some(s) = e.downcast_ref::<&str>() {
                    log::error!("audio thread panicked: {s}");
                } else if let Some(s) = e.downcast_ref::<String>() {
                    log::error!("audio thread panicked: {s}");
                } else {
                    log::error!("audio thread panicked with unknown error");
                }
            }
        });

        log::info!("audio stream started at {sample_rate} Hz");

        Ok(Self {
            command_producer: prod,
            stop_tx,
            frames,
            sample_rate,
        })
    }

    pub fn shutdown(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl AudioGraph for StreamGraph {
    fn send(&mut self, cmd: GraphCommand) {
        if self.command_producer.try_push(cmd).is_err() {
            log::warn!("graph command queue full, dropping command");
        }
    }

    fn now_frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for StreamGraph {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

fn run_audio_stream<C>(
    graph: GraphState,
    cmd_rx: C,
    stop_rx: Receiver<()>,
    frames: Arc<AtomicU64>,
) where
    C: Consumer<Item = GraphCommand> + Send + 'static,
{
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .expect("no output device available");
    let supported_config = device.default_output_config().expect("no default config");
    let sample_format = supported_config.sample_format();
    let config: StreamConfig = supported_config.into();

    let mut graph = graph;
    let mut cmds = cmd_rx;
    let audio_callback = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        while let Some(cmd) = cmds.try_pop() {
            graph.handle_command(cmd);
        }
        graph.process_block(data);
        frames.store(graph.frame(), Ordering::Relaxed);
    };

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_output_stream(
                &config,
                audio_callback,
                |err| log::error!("stream error: {err}"),
                None,
            )
            .expect("failed to build output stream"),
        _ => panic!("Unsupported sample format"),
    };
    stream.play().expect("failed to start output stream");

    // Keep the stream alive until a stop signal is received.
    while stop_rx
        .recv_timeout(std::time::Duration::from_millis(100))
        .is_err()
    {}
}
