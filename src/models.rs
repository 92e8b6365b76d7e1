use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Upper bound of the gauge range. The gauge engine clamps to [0, GAUGE_MAX].
pub const GAUGE_MAX: f32 = 100.0;

/// Discrete phase of a playback session. `Idle` means nothing is bound to the
/// audio graph, `Syncing` means the clock track loops while the gauge charges
/// its volume, `MixActive` means the full stem timeline is playing. Within a
/// session the stage only moves forward; a stop resets it to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Syncing,
    MixActive,
}

/// Roles a gain channel can be bound to. `Clock` is the looping sync track;
/// the remaining four are the stems of the currently selected song.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackRole {
    Clock,
    Accompaniment,
    Bass,
    Drums,
    Vocals,
}

impl TrackRole {
    pub const ALL: [TrackRole; 5] = [
        TrackRole::Clock,
        TrackRole::Accompaniment,
        TrackRole::Bass,
        TrackRole::Drums,
        TrackRole::Vocals,
    ];

    pub const STEMS: [TrackRole; 4] = [
        TrackRole::Accompaniment,
        TrackRole::Bass,
        TrackRole::Drums,
        TrackRole::Vocals,
    ];

    /// Dense index used by the gain-channel array on the audio graph.
    pub fn index(self) -> usize {
        match self {
            TrackRole::Clock => 0,
            TrackRole::Accompaniment => 1,
            TrackRole::Bass => 2,
            TrackRole::Drums => 3,
            TrackRole::Vocals => 4,
        }
    }

    /// Conventional file stem under a track-set directory.
    pub fn file_stem(self) -> &'static str {
        match self {
            TrackRole::Clock => "clock",
            TrackRole::Accompaniment => "accompaniment",
            TrackRole::Bass => "bass",
            TrackRole::Drums => "drums",
            TrackRole::Vocals => "vocals",
        }
    }

    /// Position within `STEMS`, or None for the clock.
    pub fn stem_index(self) -> Option<usize> {
        match self {
            TrackRole::Clock => None,
            other => Some(other.index() - 1),
        }
    }
}

/// Decoded interleaved stereo audio at the graph's sample rate.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn frames(&self) -> u64 {
        (self.samples.len() / 2) as u64
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// One song's decoded stems. Missing entries play as silent channels.
#[derive(Debug, Clone, Default)]
pub struct StemBank {
    stems: [Option<Arc<AudioBuffer>>; 4],
}

impl StemBank {
    pub fn set(&mut self, role: TrackRole, buffer: Arc<AudioBuffer>) {
        if let Some(idx) = role.stem_index() {
            self.stems[idx] = Some(buffer);
        }
    }

    pub fn get(&self, role: TrackRole) -> Option<&Arc<AudioBuffer>> {
        role.stem_index().and_then(|idx| self.stems[idx].as_ref())
    }

    pub fn loaded_count(&self) -> usize {
        self.stems.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded_count() == 0
    }
}

/// One selectable song: an id plus a directory holding its stem files
/// (`accompaniment.*`, `bass.*`, `drums.*`, `vocals.*`).
#[derive(Debug, Clone, Deserialize)]
pub struct TrackSet {
    pub id: String,
    pub dir: PathBuf,
}

/// External, read-only input at session start: the clock asset and the
/// ordered list of selectable track sets.
#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    pub clock: PathBuf,
    pub sets: Vec<TrackSet>,
}

impl Catalog {
    pub fn set(&self, index: usize) -> Option<&TrackSet> {
        self.sets.get(index)
    }
}
