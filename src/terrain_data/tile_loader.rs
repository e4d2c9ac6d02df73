use crate::math::QuadKey;
use async_channel::{Receiver, Sender};
use bevy::tasks::{futures_lite::future, TaskPool, TaskPoolBuilder};
use slab::Slab;
use std::sync::{Mutex, PoisonError};

/// The outcome of a background load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadEvent {
    Loaded(QuadKey),
    /// The tile has no data or could not be read, it may be requested again.
    Failed(QuadKey),
}

impl LoadEvent {
    pub fn key(&self) -> &QuadKey {
        match self {
            LoadEvent::Loaded(key) | LoadEvent::Failed(key) => key,
        }
    }
}

/// Runs tile loads on a fixed number of worker threads.
///
/// Loads are never cancelled. Their outcomes are reported over a channel, which the
/// interactive thread polls without blocking.
pub struct TileLoader {
    pool: TaskPool,
    loading: Mutex<Slab<QuadKey>>,
    sender: Sender<(usize, LoadEvent)>,
    receiver: Receiver<(usize, LoadEvent)>,
}

impl TileLoader {
    pub fn new(worker_count: usize) -> Self {
        let pool = TaskPoolBuilder::new()
            .num_threads(worker_count.max(1))
            .thread_name("Terrain Tile Loader".to_string())
            .build();
        let (sender, receiver) = async_channel::unbounded();

        Self {
            pool,
            loading: Mutex::new(Slab::with_capacity(16)),
            sender,
            receiver,
        }
    }

    /// Starts loading a tile, `load` returns whether the tile was loaded successfully.
    pub fn start_loading<F>(&self, key: QuadKey, load: F)
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        let slot = self
            .loading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        let sender = self.sender.clone();

        self.pool
            .spawn(async move {
                let event = if load() {
                    LoadEvent::Loaded(key)
                } else {
                    LoadEvent::Failed(key)
                };

                // the receiver lives as long as the loader
                let _ = sender.send((slot, event)).await;
            })
            .detach();
    }

    fn finish_loading(&self, slot: usize) {
        let mut loading = self.loading.lock().unwrap_or_else(PoisonError::into_inner);

        if loading.contains(slot) {
            loading.remove(slot);
        }
    }

    /// Returns the outcomes of all loads finished since the last call.
    pub fn poll(&self) -> Vec<LoadEvent> {
        let mut events = Vec::new();

        while let Ok((slot, event)) = self.receiver.try_recv() {
            self.finish_loading(slot);
            events.push(event);
        }

        events
    }

    /// Blocks until the next load finishes, `None` if nothing is loading.
    pub fn wait_next(&self) -> Option<LoadEvent> {
        if self.in_flight() == 0 && self.receiver.is_empty() {
            return None;
        }

        let (slot, event) = future::block_on(self.receiver.recv()).ok()?;
        self.finish_loading(slot);

        Some(event)
    }

    /// The number of loads that have not been polled yet.
    pub fn in_flight(&self) -> usize {
        self.loading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the tile is currently being loaded in the background.
    pub fn is_loading(&self, key: &QuadKey) -> bool {
        self.loading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(_, loading)| loading == key)
    }
}
