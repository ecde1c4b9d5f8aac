//! Run statistics shared between the capture task, housekeeping and the terminal
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Counters published by the application tasks.
#[derive(Debug, Default)]
pub struct Status {
    detections: AtomicU32,
    undelivered: AtomicU32,
    dropped: AtomicU32,
    connected: AtomicBool,
}

impl Status {
    pub const fn new() -> Self {
        Self {
            detections: AtomicU32::new(0),
            undelivered: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
            connected: AtomicBool::new(false),
        }
    }

    /// Publish the detection cycle statistics.
    pub fn set_cycle(&self, statistics: capture::Statistics) {
        self.detections
            .store(statistics.detections, Ordering::Relaxed);
        self.undelivered
            .store(statistics.undelivered, Ordering::Relaxed);
    }

    pub fn set_dropped(&self, dropped: u32) {
        self.dropped.store(dropped, Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            detections: self.detections.load(Ordering::Relaxed),
            undelivered: self.undelivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            connected: self.connected(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub detections: u32,
    pub undelivered: u32,
    pub dropped: u32,
    pub connected: bool,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<20}: {}", "Detections", self.detections)?;
        writeln!(f, "{:<20}: {}", "Undelivered", self.undelivered)?;
        writeln!(f, "{:<20}: {}", "Dropped samples", self.dropped)?;
        write!(f, "{:<20}: {}", "Peer connected", self.connected)
    }
}
