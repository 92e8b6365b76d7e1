use crate::assets::{self, AssetStore};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::gauge::GaugeEngine;
use crate::graph::{AudioGraph, GraphCommand};
use crate::loader::{spawn_stem_loader, LoadRequest, LoadResponse};
use crate::mixer::Mixer;
use crate::models::{Catalog, Stage, TrackRole};
use crate::timeline::{schedule, ClockAnchor, TimerHandle};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::time::Duration;

/// What the renderer gets each tick. Read-only presentation state; the
/// renderer has no way back into the audio side.
#[derive(Debug, Clone, Copy)]
pub struct RendererFrame {
    pub stage: Stage,
    pub visual_level: f32,
    pub bubble_spawn_hint: bool,
}

#[derive(Debug)]
enum DeferredAction {
    /// Flip Syncing to MixActive, binding stems at the carried instant.
    MixStart { at: f64 },
    /// A switch fade finished; swap stem banks.
    SwitchDone,
    /// A stop fade finished; tear the session down.
    StopDone,
}

/// Timer payload. The generation is checked against the session's current
/// one at drain time, so an event fired for a superseded session is a no-op.
#[derive(Debug)]
struct DeferredEvent {
    generation: u64,
    action: DeferredAction,
}

/// Owns one playback session end to end: the controller surface
/// (connect/pause/resume/stop/switch), the timeline scheduler, and the
/// per-tick wiring of gauge, mixer, loader, and deferred events. All shared
/// state lives here rather than in process-wide globals; deferred timers only
/// post events into a channel this object drains between ticks, so a
/// callback never observes a tick halfway through.
pub struct SessionEngine<G: AudioGraph> {
    cfg: EngineConfig,
    graph: G,
    catalog: Catalog,
    store: AssetStore,
    loader_tx: Option<Sender<LoadRequest>>,
    loader_rx: Option<Receiver<LoadResponse>>,
    gauge: GaugeEngine,
    mixer: Mixer,
    stage: Stage,
    connected: bool,
    paused: bool,
    stopping: bool,
    /// Loop-release latch inside Syncing. Saturation is observed on many
    /// consecutive ticks; only the first one schedules the mix start.
    released: bool,
    selected: Option<usize>,
    anchor: Option<ClockAnchor>,
    generation: u64,
    events_tx: Sender<DeferredEvent>,
    events_rx: Receiver<DeferredEvent>,
    pending: Option<TimerHandle>,
    /// Mix activation that fired but found its bank unbuffered. Holds the
    /// originally computed start instant so a later retry still binds the
    /// stems phase-aligned to the clock.
    mix_due: Option<f64>,
    /// Target index of an in-flight switch fade.
    switch_due: Option<usize>,
    last_error: Option<EngineError>,
}

impl<G: AudioGraph> SessionEngine<G> {
    pub fn new(graph: G, catalog: Catalog, cfg: EngineConfig) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            gauge: GaugeEngine::new(&cfg),
            mixer: Mixer::new(&cfg),
            cfg,
            graph,
            catalog,
            store: AssetStore::default(),
            loader_tx: None,
            loader_rx: None,
            stage: Stage::Idle,
            connected: false,
            paused: false,
            stopping: false,
            released: false,
            selected: None,
            anchor: None,
            generation: 0,
            events_tx,
            events_rx,
            pending: None,
            mix_due: None,
            switch_due: None,
            last_error: None,
        }
    }

    /// Choose a track set. Before the mix is active this only records the
    /// selection; during `MixActive` it starts a lateral swap, fading the
    /// current stems out and binding the new bank at the current instant.
    pub fn select_set(&mut self, index: usize) -> Result<(), EngineError> {
        let set_id = match self.catalog.set(index) {
            Some(set) => set.id.clone(),
            None => {
                return Err(EngineError::InvalidStateTransition(
                    "track set index outside the catalog",
                ))
            }
        };

        if self.connected && self.stage == Stage::MixActive && !self.stopping {
            if self.selected == Some(index) && self.switch_due.is_none() {
                return Ok(());
            }
            if !self.store.has_bank(&set_id) {
                return Err(EngineError::TrackNotLoaded(set_id));
            }

            self.cancel_pending();
            self.generation += 1;

            let fade_frames =
                (self.cfg.switch_fade_time * self.graph.sample_rate() as f64).round() as u64;
            for role in TrackRole::STEMS {
                self.graph.send(GraphCommand::RampGain {
                    role,
                    target: 0.0,
                    duration_frames: fade_frames,
                });
            }
            self.pending = Some(schedule(
                Duration::from_secs_f64(self.cfg.switch_fade_time),
                DeferredEvent {
                    generation: self.generation,
                    action: DeferredAction::SwitchDone,
                },
                self.events_tx.clone(),
            ));
            self.switch_due = Some(index);
            self.selected = Some(index);
            log::info!("switching to track set '{set_id}'");
            return Ok(());
        }

        self.selected = Some(index);
        Ok(())
    }

    /// Allocate the session: decode the clock and the selected bank (unless
    /// already pre-fetched), bind the clock loop, and queue background loads
    /// for the rest of the catalog.
    pub fn connect(&mut self) -> Result<(), EngineError> {
        if self.connected {
            return Err(EngineError::InvalidStateTransition(
                "connect while already connected",
            ));
        }
        let Some(sel) = self.selected else {
            return Err(EngineError::NoSelection);
        };
        let set = self
            .catalog
            .set(sel)
            .ok_or(EngineError::InvalidStateTransition(
                "track set index outside the catalog",
            ))?
            .clone();

        let rate = self.graph.sample_rate();

        if self.store.clock().is_none() {
            let path = self.catalog.clock.clone();
            let buffer = assets::decode_file(&path, rate).map_err(|e| EngineError::AssetLoad {
                path: path.clone(),
                reason: format!("{e:#}"),
            })?;
            self.store.set_clock(std::sync::Arc::new(buffer));
        }
        if !self.store.has_bank(&set.id) {
            let bank = assets::load_stem_bank(&set.dir, rate)?;
            self.store.insert_bank(set.id.clone(), bank);
        }

        for role in TrackRole::ALL {
            self.graph.send(GraphCommand::SetGain { role, gain: 0.0 });
        }
        self.gauge.reset();
        self.mixer.reset();

        let clock = self.store.clock().expect("clock decoded above").clone();
        let start_frame = self.graph.now_frames();
        let loop_frames = ((self.cfg.loop_end_time * rate as f64).round() as u64).max(1);
        self.graph.send(GraphCommand::BindSource {
            role: TrackRole::Clock,
            buffer: clock,
            start_frame,
            loop_frames: Some(loop_frames),
        });

        self.anchor = Some(ClockAnchor::new(
            start_frame as f64 / rate as f64,
            self.cfg.loop_end_time,
        ));
        self.stage = Stage::Syncing;
        self.connected = true;
        self.released = false;
        self.stopping = false;
        self.mix_due = None;
        self.switch_due = None;

        if self.loader_tx.is_none() {
            let (tx, rx) = spawn_stem_loader();
            self.loader_tx = Some(tx);
            self.loader_rx = Some(rx);
        }
        if let Some(tx) = &self.loader_tx {
            for other in self.catalog.sets.iter() {
                if other.id != set.id && !self.store.has_bank(&other.id) {
                    let _ = tx.send(LoadRequest {
                        set: other.clone(),
                        sample_rate: rate,
                    });
                }
            }
        }

        log::info!("session connected, clock looping over {:.2}s", self.cfg.loop_end_time);
        Ok(())
    }

    /// Suspend the shared audio clock. Ignored while disconnected.
    pub fn pause(&mut self) {
        if !self.connected || self.paused {
            log::debug!("pause ignored");
            return;
        }
        self.paused = true;
        self.graph.send(GraphCommand::SetPaused(true));
        log::info!("playback paused");
    }

    pub fn resume(&mut self) {
        if !self.connected || !self.paused {
            log::debug!("resume ignored");
            return;
        }
        self.paused = false;
        self.graph.send(GraphCommand::SetPaused(false));
        log::info!("playback resumed");
    }

    /// Begin the stop fade. Safe from any stage, including while an earlier
    /// stop fade is still running. The pending deferred event, if any, is
    /// superseded immediately; teardown happens once the fade elapses.
    pub fn stop(&mut self) {
        if self.stopping || !self.connected {
            return;
        }
        self.cancel_pending();
        self.generation += 1;
        self.mix_due = None;
        self.switch_due = None;

        let fade_frames =
            (self.cfg.fade_out_time * self.graph.sample_rate() as f64).round() as u64;
        for role in TrackRole::ALL {
            self.graph.send(GraphCommand::RampGain {
                role,
                target: 0.0,
                duration_frames: fade_frames,
            });
        }
        self.pending = Some(schedule(
            Duration::from_secs_f64(self.cfg.fade_out_time),
            DeferredEvent {
                generation: self.generation,
                action: DeferredAction::StopDone,
            },
            self.events_tx.clone(),
        ));
        self.stopping = true;
        log::info!("stopping, fading out over {:.1}s", self.cfg.fade_out_time);
    }

    /// Advance one tick of the cooperative loop: apply finished background
    /// loads, drain fired deferred events, update the gauge, check for
    /// saturation, and push gain targets to the graph.
    pub fn tick(&mut self, lean_active: bool) -> RendererFrame {
        self.drain_loader();
        self.drain_events();

        if self.stopping {
            self.mixer.tick_visual(0.0);
            return self.make_frame(lean_active);
        }
        if !self.connected {
            self.mixer.tick_visual(0.0);
            return self.make_frame(lean_active);
        }
        if self.paused {
            return self.make_frame(lean_active);
        }

        // A mix activation that fired while its bank was still loading stays
        // armed; pick it up as soon as the bank lands.
        if let Some(at) = self.mix_due {
            let ready = self
                .current_set_id()
                .map(|id| self.store.has_bank(&id))
                .unwrap_or(false);
            if ready {
                self.activate_mix(at);
            }
        }

        self.gauge.tick(lean_active, self.stage);

        if self.stage == Stage::Syncing && !self.released && self.gauge.is_saturated() {
            self.on_gauge_saturated();
        }

        self.mixer.apply(
            &mut self.graph,
            self.stage,
            self.released,
            self.gauge.value(),
            self.switch_due.is_some(),
        );

        self.make_frame(lean_active)
    }

    /// Error surfaced by the most recent failed deferred action, if any.
    pub fn take_last_error(&mut self) -> Option<EngineError> {
        self.last_error.take()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn gauge_value(&self) -> f32 {
        self.gauge.value()
    }

    pub fn visual_level(&self) -> f32 {
        self.mixer.visual_level()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// True between gauge saturation and the deferred mix start.
    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn graph_mut(&mut self) -> &mut G {
        &mut self.graph
    }

    /// Pre-fetch surface: decoded buffers can be placed here ahead of
    /// `connect()` to skip the synchronous decode.
    pub fn store_mut(&mut self) -> &mut AssetStore {
        &mut self.store
    }

    fn current_set_id(&self) -> Option<String> {
        self.selected
            .and_then(|i| self.catalog.set(i))
            .map(|s| s.id.clone())
    }

    fn make_frame(&self, lean_active: bool) -> RendererFrame {
        RendererFrame {
            stage: self.stage,
            visual_level: self.mixer.visual_level(),
            bubble_spawn_hint: lean_active && self.connected && !self.paused && !self.stopping,
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.cancel();
        }
    }

    fn drain_loader(&mut self) {
        let Some(rx) = &self.loader_rx else {
            return;
        };
        let mut done = Vec::new();
        while let Ok(resp) = rx.try_recv() {
            done.push(resp);
        }
        for LoadResponse { set_id, result } in done {
            match result {
                Ok(bank) => {
                    log::info!("stem bank '{}' buffered ({} stems)", set_id, bank.loaded_count());
                    self.store.insert_bank(set_id, bank);
                }
                Err(e) => log::warn!("background load of '{set_id}' failed: {e}"),
            }
        }
    }

    fn drain_events(&mut self) {
        while let Ok(ev) = self.events_rx.try_recv() {
            if ev.generation != self.generation {
                log::debug!(
                    "dropping deferred event from superseded generation {}",
                    ev.generation
                );
                continue;
            }
            self.pending = None;
            match ev.action {
                DeferredAction::MixStart { at } => self.activate_mix(at),
                DeferredAction::SwitchDone => self.finish_switch(),
                DeferredAction::StopDone => self.finish_stop(),
            }
        }
    }

    fn on_gauge_saturated(&mut self) {
        self.released = true;
        self.graph.send(GraphCommand::ReleaseLoop {
            role: TrackRole::Clock,
        });

        let anchor = self.anchor.expect("anchor set on connect");
        let now = self.graph.now_secs();
        let mix_start = anchor.mix_start_instant(now, self.cfg.vocal_start_delay);
        let delay = (mix_start - now).max(0.0);

        self.pending = Some(schedule(
            Duration::from_secs_f64(delay),
            DeferredEvent {
                generation: self.generation,
                action: DeferredAction::MixStart { at: mix_start },
            },
            self.events_tx.clone(),
        ));
        log::info!(
            "gauge saturated at t={now:.3}s, mix starts at t={mix_start:.3}s"
        );
    }

    /// Bind the selected bank's stems with a sample-accurate start at the
    /// originally computed instant, even when this runs later than that.
    fn activate_mix(&mut self, at: f64) {
        let Some(set_id) = self.current_set_id() else {
            return;
        };
        if !self.store.has_bank(&set_id) {
            log::warn!("mix start reached but '{set_id}' is not buffered yet");
            self.last_error = Some(EngineError::TrackNotLoaded(set_id));
            self.mix_due = Some(at);
            return;
        }

        let start_frame = (at * self.graph.sample_rate() as f64).round() as u64;
        self.bind_stems(&set_id, start_frame);
        self.graph.send(GraphCommand::SetGain {
            role: TrackRole::Accompaniment,
            gain: 1.0,
        });

        self.gauge.reset();
        self.stage = Stage::MixActive;
        self.released = false;
        self.mix_due = None;
        log::info!("mix active, stems start at t={at:.3}s");
    }

    fn finish_switch(&mut self) {
        if self.switch_due.take().is_none() {
            return;
        }
        let Some(set_id) = self.current_set_id() else {
            return;
        };
        if !self.store.has_bank(&set_id) {
            self.last_error = Some(EngineError::TrackNotLoaded(set_id));
            return;
        }

        // The swap is lateral: the new stems begin at the current instant
        // rather than re-synchronizing to the session's clock epoch.
        let start_frame = self.graph.now_frames();
        self.bind_stems(&set_id, start_frame);
        self.graph.send(GraphCommand::SetGain {
            role: TrackRole::Accompaniment,
            gain: 1.0,
        });
        self.mixer.invalidate_stems();
        log::info!("switched to track set '{set_id}'");
    }

    fn bind_stems(&mut self, set_id: &str, start_frame: u64) {
        let bank = self.store.bank(set_id).expect("caller checked bank").clone();
        for role in TrackRole::STEMS {
            match bank.get(role) {
                Some(buffer) => self.graph.send(GraphCommand::BindSource {
                    role,
                    buffer: buffer.clone(),
                    start_frame,
                    loop_frames: None,
                }),
                None => self.graph.send(GraphCommand::ClearSource { role }),
            }
        }
    }

    fn finish_stop(&mut self) {
        self.graph.send(GraphCommand::ClearAllSources);
        for role in TrackRole::ALL {
            self.graph.send(GraphCommand::SetGain { role, gain: 0.0 });
        }
        if self.paused {
            self.graph.send(GraphCommand::SetPaused(false));
            self.paused = false;
        }
        self.gauge.reset();
        self.mixer.reset();
        self.stage = Stage::Idle;
        self.connected = false;
        self.stopping = false;
        self.released = false;
        self.anchor = None;
        log::info!("session torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OfflineGraph;
    use crate::models::{AudioBuffer, StemBank, TrackSet};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread::sleep;

    const RATE: u32 = 10;

    fn test_cfg() -> EngineConfig {
        EngineConfig {
            gauge_speed: 50.0,
            vocal_gauge_speed: 50.0,
            gauge_decay: 10.0,
            loop_end_time: 0.4,
            vocal_start_delay: 0.1,
            fade_out_time: 0.2,
            switch_fade_time: 0.1,
            tick_rate: RATE,
            ..EngineConfig::default()
        }
    }

    fn catalog() -> Catalog {
        Catalog {
            clock: PathBuf::from("/assets/clock.wav"),
            sets: vec![
                TrackSet {
                    id: "first".into(),
                    dir: PathBuf::from("/assets/first"),
                },
                TrackSet {
                    id: "second".into(),
                    dir: PathBuf::from("/assets/second"),
                },
            ],
        }
    }

    fn buffer(frames: usize, value: f32) -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::new(vec![value; frames * 2], RATE))
    }

    fn bank() -> StemBank {
        let mut bank = StemBank::default();
        for role in TrackRole::STEMS {
            bank.set(role, buffer(40, 0.5));
        }
        bank
    }

    fn engine() -> SessionEngine<OfflineGraph> {
        let cfg = test_cfg();
        let graph = OfflineGraph::new(RATE, &cfg);
        SessionEngine::new(graph, catalog(), cfg)
    }

    /// Engine with clock and first bank pre-fetched, selected, connected.
    fn connected_engine() -> SessionEngine<OfflineGraph> {
        let mut engine = engine();
        engine.store_mut().set_clock(buffer(4, 1.0));
        engine.store_mut().insert_bank("first", bank());
        engine.select_set(0).unwrap();
        engine.connect().unwrap();
        engine
    }

    fn render(engine: &mut SessionEngine<OfflineGraph>, frames: usize) {
        let mut buf = vec![0.0f32; frames * 2];
        engine.graph_mut().render_block(&mut buf);
    }

    /// Lean until saturation, wait out the deferred mix start, and tick it in.
    fn drive_to_mix_active(engine: &mut SessionEngine<OfflineGraph>) {
        while !engine.gauge_value().eq(&100.0) {
            engine.tick(true);
        }
        sleep(Duration::from_millis(300));
        engine.tick(true);
        assert_eq!(engine.stage(), Stage::MixActive);
    }

    #[test]
    fn connect_without_selection_fails() {
        let mut engine = engine();
        match engine.connect() {
            Err(EngineError::NoSelection) => {}
            other => panic!("expected NoSelection, got {other:?}"),
        }
        assert_eq!(engine.stage(), Stage::Idle);
    }

    #[test]
    fn connect_enters_syncing_with_a_looping_clock() {
        let mut engine = connected_engine();
        assert_eq!(engine.stage(), Stage::Syncing);
        assert!(engine.is_connected());
        render(&mut engine, 1);
        assert!(engine.graph_mut().state().has_source(TrackRole::Clock));
        assert!(!engine.graph_mut().state().has_source(TrackRole::Bass));
    }

    #[test]
    fn connect_twice_is_rejected() {
        let mut engine = connected_engine();
        match engine.connect() {
            Err(EngineError::InvalidStateTransition(_)) => {}
            other => panic!("expected InvalidStateTransition, got {other:?}"),
        }
    }

    #[test]
    fn saturation_schedules_mix_start_once() {
        let mut engine = connected_engine();
        engine.tick(true);
        engine.tick(true);
        assert_eq!(engine.gauge_value(), 100.0);
        // Saturation reads 100 on every further tick; the release latch must
        // keep those from scheduling again.
        engine.tick(true);
        engine.tick(true);

        sleep(Duration::from_millis(300));
        engine.tick(true);
        assert_eq!(engine.stage(), Stage::MixActive);
        // Gauge was consumed by the activation.
        assert!(engine.gauge_value() < 100.0);

        // Exactly one activation: stems bound once, stage stays put.
        engine.tick(true);
        assert_eq!(engine.stage(), Stage::MixActive);
    }

    #[test]
    fn activation_binds_stems_at_the_computed_instant() {
        let mut engine = connected_engine();
        drive_to_mix_active(&mut engine);
        render(&mut engine, 2);
        let state = engine.graph_mut().state();
        for role in TrackRole::STEMS {
            assert!(state.has_source(role), "{role:?} missing");
        }
        // Accompaniment comes up at full immediately.
        assert_eq!(state.channel_gain(TrackRole::Accompaniment), 1.0);
    }

    #[test]
    fn missing_bank_surfaces_and_activation_stays_armed() {
        let mut engine = connected_engine();
        // Redirect the selection to a bank that is not buffered.
        engine.select_set(1).unwrap();
        engine.tick(true);
        engine.tick(true);
        sleep(Duration::from_millis(300));
        engine.tick(true);

        assert_eq!(engine.stage(), Stage::Syncing);
        match engine.take_last_error() {
            Some(EngineError::TrackNotLoaded(id)) => assert_eq!(id, "second"),
            other => panic!("expected TrackNotLoaded, got {other:?}"),
        }
        // Gauge untouched by the failed activation.
        assert_eq!(engine.gauge_value(), 100.0);

        // The background load lands; the armed activation retries and wins.
        engine.store_mut().insert_bank("second", bank());
        engine.tick(true);
        assert_eq!(engine.stage(), Stage::MixActive);
    }

    #[test]
    fn stop_fades_then_resets_to_idle() {
        let mut engine = connected_engine();
        drive_to_mix_active(&mut engine);
        engine.stop();
        assert!(engine.is_stopping());
        // Mid-fade the stage has not collapsed yet.
        engine.tick(false);
        assert_eq!(engine.stage(), Stage::MixActive);

        sleep(Duration::from_millis(400));
        engine.tick(false);
        assert_eq!(engine.stage(), Stage::Idle);
        assert!(!engine.is_connected());
        assert_eq!(engine.gauge_value(), 0.0);

        render(&mut engine, 2);
        for role in TrackRole::ALL {
            assert!(!engine.graph_mut().state().has_source(role));
            assert_eq!(engine.graph_mut().state().channel_gain(role), 0.0);
        }
    }

    #[test]
    fn stop_is_idempotent_mid_fade() {
        let mut engine = connected_engine();
        drive_to_mix_active(&mut engine);
        engine.stop();
        engine.stop();
        engine.stop();
        sleep(Duration::from_millis(400));
        engine.tick(false);
        assert_eq!(engine.stage(), Stage::Idle);
        // A stop after teardown is a no-op too.
        engine.stop();
        assert!(!engine.is_stopping());
    }

    #[test]
    fn stop_cancels_a_pending_mix_start() {
        let mut engine = connected_engine();
        engine.tick(true);
        engine.tick(true);
        // Let the mix-start fire into the queue, then supersede it.
        sleep(Duration::from_millis(300));
        engine.stop();
        engine.tick(false);
        // The stale event was dropped: never MixActive.
        assert_ne!(engine.stage(), Stage::MixActive);
        sleep(Duration::from_millis(400));
        engine.tick(false);
        assert_eq!(engine.stage(), Stage::Idle);
        // Nothing else fires afterwards.
        sleep(Duration::from_millis(200));
        engine.tick(false);
        assert_eq!(engine.stage(), Stage::Idle);
    }

    #[test]
    fn switch_with_unloaded_target_changes_nothing() {
        let mut engine = connected_engine();
        drive_to_mix_active(&mut engine);
        let gauge_before = engine.gauge_value();

        match engine.select_set(1) {
            Err(EngineError::TrackNotLoaded(id)) => assert_eq!(id, "second"),
            other => panic!("expected TrackNotLoaded, got {other:?}"),
        }
        assert_eq!(engine.selected(), Some(0));
        assert_eq!(engine.stage(), Stage::MixActive);
        assert_eq!(engine.gauge_value(), gauge_before);

        // Retry succeeds once the bank is buffered.
        engine.store_mut().insert_bank("second", bank());
        engine.select_set(1).unwrap();
        assert_eq!(engine.selected(), Some(1));
        sleep(Duration::from_millis(250));
        engine.tick(true);
        assert_eq!(engine.stage(), Stage::MixActive);
        render(&mut engine, 1);
        assert!(engine.graph_mut().state().has_source(TrackRole::Drums));
    }

    #[test]
    fn switch_preserves_gauge_and_stage() {
        let mut engine = connected_engine();
        engine.store_mut().insert_bank("second", bank());
        drive_to_mix_active(&mut engine);
        for _ in 0..40 {
            engine.tick(true);
        }
        let gauge_before = engine.gauge_value();

        engine.select_set(1).unwrap();
        sleep(Duration::from_millis(250));
        engine.tick(true);
        assert_eq!(engine.stage(), Stage::MixActive);
        // Still leaning against a saturated gauge: the swap did not reset it.
        assert!((engine.gauge_value() - gauge_before).abs() < 1e-6);
    }

    #[test]
    fn pause_freezes_gauge_and_clock() {
        let mut engine = connected_engine();
        engine.tick(true);
        let gauge_before = engine.gauge_value();
        engine.pause();
        assert!(engine.is_paused());
        engine.tick(true);
        engine.tick(true);
        assert_eq!(engine.gauge_value(), gauge_before);

        render(&mut engine, 4);
        assert_eq!(engine.graph_mut().now_frames(), 0);

        engine.resume();
        engine.tick(true);
        assert!(engine.gauge_value() > gauge_before);
    }

    #[test]
    fn pause_while_disconnected_is_ignored() {
        let mut engine = engine();
        engine.pause();
        assert!(!engine.is_paused());
        engine.resume();
        assert!(!engine.is_paused());
    }

    #[test]
    fn visual_level_tracks_the_gauge_while_syncing() {
        let mut engine = connected_engine();
        let mut last = 0.0;
        for _ in 0..2 {
            let frame = engine.tick(true);
            assert!(frame.visual_level >= last);
            last = frame.visual_level;
            assert_eq!(frame.stage, Stage::Syncing);
            assert!(frame.bubble_spawn_hint);
        }
        let frame = engine.tick(false);
        assert!(!frame.bubble_spawn_hint);
    }
}
