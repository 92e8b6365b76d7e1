use crate::assets;
use crate::models::{StemBank, TrackSet};
use crossbeam::channel::{unbounded, Receiver, Sender};

/// Request to decode one track set's stems off the tick loop.
#[derive(Debug)]
pub struct LoadRequest {
    pub set: TrackSet,
    pub sample_rate: u32,
}

/// Outcome of a background load. Failures carry a message rather than a
/// typed error because the tick loop only logs them.
pub struct LoadResponse {
    pub set_id: String,
    pub result: Result<StemBank, String>,
}

/// Spawn the stem loader thread. Requests are served in order; the thread
/// drains its queue and exits when the request sender is dropped. Responses
/// are consumed by the tick loop, which resolves what to do with a finished
/// bank against the selection current at that moment, never the one captured
/// when the request was queued.
pub fn spawn_stem_loader() -> (Sender<LoadRequest>, Receiver<LoadResponse>) {
    let (req_tx, req_rx) = unbounded::<LoadRequest>();
    let (resp_tx, resp_rx) = unbounded::<LoadResponse>();

    std::thread::Builder::new()
        .name("stem-loader".to_string())
        .spawn(move || {
            log::debug!("stem loader thread started");
            while let Ok(req) = req_rx.recv() {
                let LoadRequest { set, sample_rate } = req;
                log::debug!("loading stem bank '{}' from {}", set.id, set.dir.display());
                let result = assets::load_stem_bank(&set.dir, sample_rate)
                    .map_err(|e| e.to_string());
                let _ = resp_tx.send(LoadResponse {
                    set_id: set.id,
                    result,
                });
            }
            log::debug!("stem loader thread shutting down");
        })
        .expect("failed to spawn stem loader thread");

    (req_tx, resp_rx)
}
