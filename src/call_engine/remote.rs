//! Remote media stream handed to the UI

use parking_lot::RwLock;
use std::sync::Arc;
use webrtc::track::track_remote::TrackRemote;

/// Tracks the remote peer sent under one stream id.
///
/// Cloning is cheap and every clone sees tracks that arrive later.
#[derive(Clone)]
pub struct RemoteStream {
    id: String,
    tracks: Arc<RwLock<Vec<Arc<TrackRemote>>>>,
}

impl RemoteStream {
    pub(crate) fn new(id: String) -> Self {
        Self {
            id,
            tracks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub(crate) fn add_track(&self, track: Arc<TrackRemote>) {
        self.tracks.write().push(track);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.tracks.read().clone()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.read().len()
    }
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("id", &self.id)
            .field("tracks", &self.track_count())
            .finish()
    }
}
