use crate::config::EngineConfig;
use crate::models::{Stage, GAUGE_MAX};

/// Bounded scalar driven by the lean input. Charges while the input is held,
/// decays otherwise, and never leaves [0, GAUGE_MAX]. The charge rate depends
/// on the stage; decay does not.
#[derive(Debug)]
pub struct GaugeEngine {
    value: f32,
    gauge_speed: f32,
    vocal_gauge_speed: f32,
    decay: f32,
}

impl GaugeEngine {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            value: 0.0,
            gauge_speed: cfg.gauge_speed,
            vocal_gauge_speed: cfg.vocal_gauge_speed,
            decay: cfg.gauge_decay,
        }
    }

    /// Advance one tick. Runs unconditionally every tick, whether or not the
    /// input changed since the last one.
    pub fn tick(&mut self, input_active: bool, stage: Stage) -> f32 {
        let charge = match stage {
            Stage::MixActive => self.vocal_gauge_speed,
            _ => self.gauge_speed,
        };
        let delta = if input_active { charge } else { -self.decay };
        self.value = (self.value + delta).clamp(0.0, GAUGE_MAX);
        self.value
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn is_saturated(&self) -> bool {
        self.value >= GAUGE_MAX
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}
