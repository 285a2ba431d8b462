//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod nodes;

use std::time::{Duration, Instant};

/// Upper bound for anything that waits on background threads
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Poll `condition` until it holds or the timeout expires
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Expected recording timestamps of a frame source
pub fn frame_timestamps(fps: f64, frames: u64) -> Vec<u64> {
    (0..frames)
        .map(|i| (i as f64 * 1000.0 / fps).round() as u64)
        .collect()
}
