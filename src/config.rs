use lazy_static::lazy_static;
use serde::Deserialize;
use std::path::Path;

/// Tunable engine constants. Every field has a default so a config file only
/// needs to name the values it overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Gauge units gained per tick while leaning during `Syncing`.
    pub gauge_speed: f32,
    /// Gauge units gained per tick while leaning during `MixActive`.
    pub vocal_gauge_speed: f32,
    /// Gauge units lost per tick while not leaning, in every stage.
    pub gauge_decay: f32,
    /// Length of the clock loop window in seconds.
    pub loop_end_time: f64,
    /// Delay between the loop-release boundary and the stem start, seconds.
    pub vocal_start_delay: f64,
    /// Linear fade applied to all channels by `stop()`, seconds.
    pub fade_out_time: f64,
    /// Shorter fade used when swapping stem banks mid-mix, seconds.
    pub switch_fade_time: f64,
    /// Time constant of the exponential gain smoothing, seconds.
    pub gain_smoothing: f64,
    /// Per-tick low-pass factor for the renderer-facing level.
    pub visual_smoothing: f32,
    /// Nominal tick loop rate in Hz. The offline render path derives its
    /// block size from this.
    pub tick_rate: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gauge_speed: 0.15,
            vocal_gauge_speed: 0.3,
            gauge_decay: 0.2,
            loop_end_time: 7.2,
            vocal_start_delay: 0.165,
            fade_out_time: 10.0,
            switch_fade_time: 0.8,
            gain_smoothing: 0.05,
            visual_smoothing: 0.1,
            tick_rate: 60,
        }
    }
}

impl EngineConfig {
    /// Load overrides from a TOML file, falling back to defaults for any
    /// field the file does not mention.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg = toml::from_str(&text)?;
        Ok(cfg)
    }

    fn from_env() -> Self {
        if let Ok(path) = std::env::var("LEAN_MIXER_CONFIG") {
            match Self::load(Path::new(&path)) {
                Ok(cfg) => return cfg,
                Err(e) => log::warn!("failed to load config from {path}: {e}"),
            }
        }
        Self::default()
    }

    /// Seconds of audio per tick at the configured tick rate.
    pub fn tick_interval(&self) -> f64 {
        1.0 / self.tick_rate as f64
    }
}

lazy_static! {
    /// Process-wide defaults, honouring `LEAN_MIXER_CONFIG` when set. Session
    /// engines take their own copy so tests can run with divergent values.
    pub static ref CONFIG: EngineConfig = EngineConfig::from_env();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_rates() {
        let cfg = EngineConfig::default();
        assert!((cfg.gauge_speed - 0.15).abs() < 1e-6);
        assert!((cfg.vocal_gauge_speed - 0.3).abs() < 1e-6);
        assert!((cfg.loop_end_time - 7.2).abs() < 1e-9);
        assert_eq!(cfg.tick_rate, 60);
    }

    #[test]
    fn toml_overrides_partial_fields() {
        let cfg: EngineConfig = toml::from_str("gauge_speed = 0.5\nfade_out_time = 2.0\n").unwrap();
        assert!((cfg.gauge_speed - 0.5).abs() < 1e-6);
        assert!((cfg.fade_out_time - 2.0).abs() < 1e-9);
        // Unnamed fields keep their defaults.
        assert!((cfg.gauge_decay - 0.2).abs() < 1e-6);
        assert!((cfg.vocal_start_delay - 0.165).abs() < 1e-9);
    }
}
