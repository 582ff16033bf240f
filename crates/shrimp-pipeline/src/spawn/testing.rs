//! Test utilities for the spawn module.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{RunningProcess, SpawnRequest, Spawner, SystemSpawner};

/// Spawner that counts spawn calls and then delegates to [`SystemSpawner`].
/// Used to verify that skipped commands never start a process.
#[derive(Debug, Clone)]
pub struct CountingSpawner {
    pub spawn_count: Arc<AtomicUsize>,
}

impl CountingSpawner {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        (Self { spawn_count: count.clone() }, count)
    }

    /// Get the current spawn count.
    pub fn spawns(&self) -> usize {
        self.spawn_count.load(Ordering::SeqCst)
    }
}

impl Default for CountingSpawner {
    fn default() -> Self {
        Self {
            spawn_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Spawner for CountingSpawner {
    fn spawn(&self, request: SpawnRequest) -> io::Result<Box<dyn RunningProcess>> {
        self.spawn_count.fetch_add(1, Ordering::SeqCst);
        SystemSpawner.spawn(request)
    }
}
