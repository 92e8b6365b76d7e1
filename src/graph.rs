use crate::config::EngineConfig;
use crate::models::{AudioBuffer, TrackRole};
use std::sync::Arc;

/// Commands applied to the graph at the top of each rendered block. The tick
/// loop never touches graph state directly; everything crosses this seam.
#[derive(Debug)]
pub enum GraphCommand {
    /// Bind a decoded buffer to a channel, first audible at `start_frame` on
    /// the graph timeline. `start_frame` may lie in the past, in which case
    /// playback begins mid-buffer so the source stays phase-aligned, or in
    /// the future, in which case the channel is silent until it arrives.
    BindSource {
        role: TrackRole,
        buffer: Arc<AudioBuffer>,
        start_frame: u64,
        /// Loop window in frames, measured from the start of the buffer.
        loop_frames: Option<u64>,
    },
    /// Disable a looping source's loop flag. The source plays the in-flight
    /// iteration to its boundary and then runs straight into whatever the
    /// buffer holds past the loop window.
    ReleaseLoop { role: TrackRole },
    ClearSource { role: TrackRole },
    ClearAllSources,
    SetGain { role: TrackRole, gain: f32 },
    /// Exponentially approach `target` with the graph's smoothing constant.
    SmoothGain { role: TrackRole, target: f32 },
    /// Linearly reach `target` after `duration_frames`.
    RampGain {
        role: TrackRole,
        target: f32,
        duration_frames: u64,
    },
    SetPaused(bool),
    SetMasterGain(f32),
}

#[derive(Debug, Clone, Copy)]
enum GainMode {
    Hold,
    Smooth { target: f32 },
    Ramp { target: f32, remaining: u64, step: f32 },
}

/// Per-channel gain with smoothed-target and linear-ramp automation,
/// advanced once per sample.
#[derive(Debug)]
pub struct GainAutomation {
    gain: f32,
    mode: GainMode,
}

impl GainAutomation {
    fn new() -> Self {
        Self {
            gain: 0.0,
            mode: GainMode::Hold,
        }
    }

    fn set(&mut self, gain: f32) {
        self.gain = gain;
        self.mode = GainMode::Hold;
    }

    fn smooth_to(&mut self, target: f32) {
        self.mode = GainMode::Smooth { target };
    }

    fn ramp_to(&mut self, target: f32, duration_frames: u64) {
        if duration_frames == 0 {
            self.set(target);
        } else {
            self.mode = GainMode::Ramp {
                target,
                remaining: duration_frames,
                step: (target - self.gain) / duration_frames as f32,
            };
        }
    }

    #[inline]
    fn advance(&mut self, smooth_coeff: f32) -> f32 {
        match self.mode {
            GainMode::Hold => {}
            GainMode::Smooth { target } => {
                self.gain += (target - self.gain) * smooth_coeff;
                if (target - self.gain).abs() < 1e-6 {
                    self.gain = target;
                    self.mode = GainMode::Hold;
                }
            }
            GainMode::Ramp {
                target,
                remaining,
                step,
            } => {
                self.gain += step;
                let remaining = remaining - 1;
                if remaining == 0 {
                    self.gain = target;
                    self.mode = GainMode::Hold;
                } else {
                    self.mode = GainMode::Ramp {
                        target,
                        remaining,
                        step,
                    };
                }
            }
        }
        self.gain
    }

    pub fn current(&self) -> f32 {
        self.gain
    }
}

/// A buffer bound to a channel with its position on the graph timeline.
#[derive(Debug)]
struct SourceState {
    buffer: Arc<AudioBuffer>,
    start_frame: u64,
    loop_frames: Option<u64>,
    /// Boundary computed when the loop flag was cleared. Before it, positions
    /// wrap over the loop window; from it on they run linearly past the
    /// window to the end of the buffer.
    release_frame: Option<u64>,
}

impl SourceState {
    fn frame_at(&self, frame: u64) -> Option<(f32, f32)> {
        if frame < self.start_frame {
            return None;
        }
        let pos = frame - self.start_frame;
        let idx = match (self.loop_frames, self.release_frame) {
            (Some(lf), None) => pos % lf,
            (Some(lf), Some(release)) => {
                if frame < release {
                    pos % lf
                } else {
                    lf + (frame - release)
                }
            }
            (None, _) => pos,
        };
        if idx >= self.buffer.frames() {
            return None;
        }
        let i = (idx * 2) as usize;
        Some((self.buffer.samples[i], self.buffer.samples[i + 1]))
    }

    fn release(&mut self, now: u64) {
        if let (Some(lf), None) = (self.loop_frames, self.release_frame) {
            let elapsed = now.saturating_sub(self.start_frame);
            let iterations = elapsed.div_ceil(lf);
            self.release_frame = Some(self.start_frame + iterations * lf);
        }
    }
}

struct Channel {
    source: Option<SourceState>,
    gain: GainAutomation,
}

impl Channel {
    fn new() -> Self {
        Self {
            source: None,
            gain: GainAutomation::new(),
        }
    }
}

/// Engine-agnostic render core: five gain channels mixed into interleaved
/// stereo, one frame counter, pause freezing the counter. The live cpal path
/// and the offline render path both drive this block-by-block.
pub struct GraphState {
    channels: [Channel; 5],
    frame: u64,
    paused: bool,
    master_gain: f32,
    smooth_coeff: f32,
    sample_rate: u32,
}

impl GraphState {
    pub fn new(sample_rate: u32, cfg: &EngineConfig) -> Self {
        let tau = cfg.gain_smoothing.max(1e-4);
        let smooth_coeff = 1.0 - (-1.0 / (tau * sample_rate as f64)).exp();
        Self {
            channels: [
                Channel::new(),
                Channel::new(),
                Channel::new(),
                Channel::new(),
                Channel::new(),
            ],
            frame: 0,
            paused: false,
            master_gain: 1.0,
            smooth_coeff: smooth_coeff as f32,
            sample_rate,
        }
    }

    pub fn handle_command(&mut self, cmd: GraphCommand) {
        match cmd {
            GraphCommand::BindSource {
                role,
                buffer,
                start_frame,
                loop_frames,
            } => {
                self.channels[role.index()].source = Some(SourceState {
                    buffer,
                    start_frame,
                    loop_frames,
                    release_frame: None,
                });
            }
            GraphCommand::ReleaseLoop { role } => {
                let now = self.frame;
                if let Some(src) = &mut self.channels[role.index()].source {
                    src.release(now);
                }
            }
            GraphCommand::ClearSource { role } => {
                self.channels[role.index()].source = None;
            }
            GraphCommand::ClearAllSources => {
                for ch in &mut self.channels {
                    ch.source = None;
                }
            }
            GraphCommand::SetGain { role, gain } => {
                self.channels[role.index()].gain.set(gain);
            }
            GraphCommand::SmoothGain { role, target } => {
                self.channels[role.index()].gain.smooth_to(target);
            }
            GraphCommand::RampGain {
                role,
                target,
                duration_frames,
            } => {
                self.channels[role.index()]
                    .gain
                    .ramp_to(target, duration_frames);
            }
            GraphCommand::SetPaused(p) => {
                self.paused = p;
            }
            GraphCommand::SetMasterGain(gain) => {
                self.master_gain = gain.clamp(0.0, 1.0);
            }
        }
    }

    /// Render one interleaved stereo block. While paused the block is silent
    /// and the frame counter does not advance, so graph time stands still.
    pub fn process_block(&mut self, buffer: &mut [f32]) {
        let frames = buffer.len() / 2;
        buffer.fill(0.0);

        if self.paused {
            return;
        }

        for i in 0..frames {
            let frame = self.frame + i as u64;
            let mut l = 0.0f32;
            let mut r = 0.0f32;
            for ch in &mut self.channels {
                let g = ch.gain.advance(self.smooth_coeff);
                if let Some(src) = &ch.source {
                    if let Some((sl, sr)) = src.frame_at(frame) {
                        l += sl * g;
                        r += sr * g;
                    }
                }
            }
            buffer[i * 2] = l * self.master_gain;
            buffer[i * 2 + 1] = r * self.master_gain;
        }

        self.frame += frames as u64;
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn channel_gain(&self, role: TrackRole) -> f32 {
        self.channels[role.index()].gain.current()
    }

    pub fn has_source(&self, role: TrackRole) -> bool {
        self.channels[role.index()].source.is_some()
    }
}

/// Seam between the tick loop and whatever renders the graph. Commands are
/// applied at the start of the next block; `now_frames` is the frame clock
/// the scheduler's timeline arithmetic anchors to.
pub trait AudioGraph {
    fn send(&mut self, cmd: GraphCommand);
    fn now_frames(&self) -> u64;
    fn sample_rate(&self) -> u32;

    fn now_secs(&self) -> f64 {
        self.now_frames() as f64 / self.sample_rate() as f64
    }
}

/// Non-realtime graph driver for tests and file rendering. Queued commands
/// are drained at the top of each rendered block, mirroring the live audio
/// callback.
pub struct OfflineGraph {
    state: GraphState,
    pending: Vec<GraphCommand>,
}

impl OfflineGraph {
    pub fn new(sample_rate: u32, cfg: &EngineConfig) -> Self {
        Self {
            state: GraphState::new(sample_rate, cfg),
            pending: Vec::new(),
        }
    }

    pub fn render_block(&mut self, buffer: &mut [f32]) {
        for cmd in self.pending.drain(..) {
            self.state.handle_command(cmd);
        }
        self.state.process_block(buffer);
    }

    pub fn state(&self) -> &GraphState {
        &self.state
    }
}

impl AudioGraph for OfflineGraph {
    fn send(&mut self, cmd: GraphCommand) {
        self.pending.push(cmd);
    }

    fn now_frames(&self) -> u64 {
        self.state.frame()
    }

    fn sample_rate(&self) -> u32 {
        self.state.sample_rate()
    }
}
