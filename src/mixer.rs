use crate::config::EngineConfig;
use crate::graph::{AudioGraph, GraphCommand};
use crate::models::{Stage, TrackRole, GAUGE_MAX};

/// Per-stem gain bands over the gauge. The bands tile [0, 100] without
/// overlap: bass saturates at 20 where drums begin rising, drums saturate at
/// 40 where vocals begin rising, vocals saturate at 100.
pub fn bass_level(gauge: f32) -> f32 {
    (gauge / 20.0).clamp(0.0, 1.0)
}

pub fn drum_level(gauge: f32) -> f32 {
    ((gauge - 20.0) / 20.0).clamp(0.0, 1.0)
}

pub fn vocal_level(gauge: f32) -> f32 {
    ((gauge - 40.0) / 60.0).clamp(0.0, 1.0)
}

/// Maps gauge and stage to smoothed per-channel gain targets, and keeps the
/// renderer-facing level. Targets are pushed to the graph only when they
/// change; the graph's own smoothing turns each step into a click-free
/// approach.
pub struct Mixer {
    targets: [f32; 5],
    visual: f32,
    visual_smoothing: f32,
}

impl Mixer {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            targets: [0.0; 5],
            visual: 0.0,
            visual_smoothing: cfg.visual_smoothing,
        }
    }

    /// Apply gains for this tick. `released` is the loop-release latch inside
    /// `Syncing`; `stems_held` suppresses stem updates while a switch fade
    /// owns those channels.
    pub fn apply<G: AudioGraph>(
        &mut self,
        graph: &mut G,
        stage: Stage,
        released: bool,
        gauge: f32,
        stems_held: bool,
    ) {
        let desired = match stage {
            Stage::Idle => [0.0; 5],
            Stage::Syncing => {
                let clock = if released { 1.0 } else { gauge / GAUGE_MAX };
                [clock, 0.0, 0.0, 0.0, 0.0]
            }
            Stage::MixActive => [
                1.0,
                1.0,
                bass_level(gauge),
                drum_level(gauge),
                vocal_level(gauge),
            ],
        };

        for role in TrackRole::ALL {
            if stems_held && role.stem_index().is_some() {
                continue;
            }
            let idx = role.index();
            if (desired[idx] - self.targets[idx]).abs() > 1e-4 {
                self.targets[idx] = desired[idx];
                graph.send(GraphCommand::SmoothGain {
                    role,
                    target: desired[idx],
                });
            }
        }

        let visual_target = match stage {
            Stage::Idle => 0.0,
            Stage::Syncing if released => 1.0,
            _ => gauge / GAUGE_MAX,
        };
        self.tick_visual(visual_target);
    }

    /// First-order low-pass toward `target`, independent of the audio-side
    /// smoothing.
    pub fn tick_visual(&mut self, target: f32) {
        self.visual += (target - self.visual) * self.visual_smoothing;
    }

    pub fn visual_level(&self) -> f32 {
        self.visual
    }

    pub fn reset(&mut self) {
        self.targets = [0.0; 5];
        self.visual = 0.0;
    }

    /// Forget the stored stem targets so the next `apply` re-emits them.
    /// Needed after a swap rebinds the stem channels at zero gain while the
    /// remembered targets still describe the faded-out bank.
    pub fn invalidate_stems(&mut self) {
        for role in TrackRole::STEMS {
            self.targets[role.index()] = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OfflineGraph;

    fn mixer() -> Mixer {
        Mixer::new(&EngineConfig::default())
    }

    #[test]
    fn bands_are_continuous_at_boundaries() {
        assert_eq!(bass_level(20.0), 1.0);
        assert_eq!(drum_level(20.0), 0.0);
        assert_eq!(drum_level(40.0), 1.0);
        assert_eq!(vocal_level(40.0), 0.0);
        assert_eq!(vocal_level(100.0), 1.0);
    }

    #[test]
    fn bands_clamp_outside_their_range() {
        assert_eq!(bass_level(0.0), 0.0);
        assert_eq!(bass_level(55.0), 1.0);
        assert_eq!(drum_level(10.0), 0.0);
        assert_eq!(vocal_level(30.0), 0.0);
        assert_eq!(vocal_level(150.0), 1.0);
    }

    #[test]
    fn bands_are_idempotent() {
        for g in [0.0f32, 13.0, 20.0, 33.3, 40.0, 77.0, 100.0] {
            assert_eq!(bass_level(g), bass_level(bass_level(g) * 20.0));
            assert!((0.0..=1.0).contains(&drum_level(g)));
            assert!((0.0..=1.0).contains(&vocal_level(g)));
        }
    }

    #[test]
    fn syncing_drives_the_clock_from_the_gauge() {
        let cfg = EngineConfig::default();
        let mut graph = OfflineGraph::new(48_000, &cfg);
        let mut mixer = mixer();
        mixer.apply(&mut graph, Stage::Syncing, false, 50.0, false);
        let mut buf = vec![0.0f32; 4800 * 2];
        graph.render_block(&mut buf);
        let clock = graph.state().channel_gain(TrackRole::Clock);
        assert!(clock > 0.3 && clock <= 0.5, "clock gain {clock}");
        assert_eq!(graph.state().channel_gain(TrackRole::Vocals), 0.0);
    }

    #[test]
    fn released_holds_the_clock_at_full() {
        let cfg = EngineConfig::default();
        let mut graph = OfflineGraph::new(48_000, &cfg);
        let mut mixer = mixer();
        mixer.apply(&mut graph, Stage::Syncing, true, 100.0, false);
        let mut buf = vec![0.0f32; 48_000 * 2];
        graph.render_block(&mut buf);
        let clock = graph.state().channel_gain(TrackRole::Clock);
        assert!((clock - 1.0).abs() < 1e-3, "clock gain {clock}");
    }

    #[test]
    fn mix_active_applies_the_band_curves() {
        let cfg = EngineConfig::default();
        let mut graph = OfflineGraph::new(48_000, &cfg);
        let mut mixer = mixer();
        // Gauge 30: bass saturated, drums halfway, vocals silent.
        mixer.apply(&mut graph, Stage::MixActive, false, 30.0, false);
        let mut buf = vec![0.0f32; 48_000 * 2];
        graph.render_block(&mut buf);
        let state = graph.state();
        assert!((state.channel_gain(TrackRole::Bass) - 1.0).abs() < 1e-3);
        assert!((state.channel_gain(TrackRole::Drums) - 0.5).abs() < 1e-2);
        assert_eq!(state.channel_gain(TrackRole::Vocals), 0.0);
        assert!((state.channel_gain(TrackRole::Accompaniment) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn held_stems_are_left_alone() {
        let cfg = EngineConfig::default();
        let mut graph = OfflineGraph::new(48_000, &cfg);
        let mut mixer = mixer();
        mixer.apply(&mut graph, Stage::MixActive, false, 80.0, true);
        let mut buf = vec![0.0f32; 4800 * 2];
        graph.render_block(&mut buf);
        // Only the clock was touched; every stem still sits at zero.
        for role in TrackRole::STEMS {
            assert_eq!(graph.state().channel_gain(role), 0.0);
        }
        assert!(graph.state().channel_gain(TrackRole::Clock) > 0.0);
    }

    #[test]
    fn visual_level_follows_its_own_low_pass() {
        let mut mixer = mixer();
        mixer.tick_visual(1.0);
        assert!((mixer.visual_level() - 0.1).abs() < 1e-6);
        mixer.tick_visual(1.0);
        assert!((mixer.visual_level() - 0.19).abs() < 1e-6);
        for _ in 0..200 {
            mixer.tick_visual(1.0);
        }
        assert!(mixer.visual_level() > 0.99);
    }
}
