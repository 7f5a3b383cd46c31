//! Registry of open wires, swept periodically for throughput and reaping.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::wire::{Direction, Wire};

/// Live wires of one or more tunnels.
#[derive(Debug, Default)]
pub struct Liveness {
    wires: Mutex<Vec<Arc<Wire>>>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, wire: Arc<Wire>) {
        self.wires.lock().push(wire);
    }

    /// Number of wires not yet reaped.
    pub fn len(&self) -> usize {
        self.wires.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.wires.lock().is_empty()
    }

    /// Sweep the registry and collect the bytes moved since the previous
    /// sweep.
    ///
    /// A wire is dropped from the registry only once both of its direction
    /// tasks have returned. It is still drained this time, so its final bytes
    /// are reported exactly once; a closed wire whose tasks are still
    /// unwinding stays for the next sweep.
    pub fn measure(&self, period: Duration) -> Measure {
        let snapshot = {
            let mut wires = self.wires.lock();
            let snapshot = wires.clone();
            wires.retain(|w| !w.is_finished());
            snapshot
        };

        let mut measure = Measure {
            wires: snapshot.len(),
            forward: 0,
            backward: 0,
            period,
        };
        for wire in &snapshot {
            let (_, sent) = wire.meter(Direction::Forward).consume();
            measure.forward += sent;
            let (_, sent) = wire.meter(Direction::Backward).consume();
            measure.backward += sent;
        }
        measure
    }

    /// Close every registered wire.
    pub fn close_all(&self) -> usize {
        let wires = self.wires.lock().clone();
        wires.iter().filter(|w| w.close()).count()
    }
}

/// Result of one [`Liveness::measure`] sweep.
#[derive(Debug, Clone, Copy)]
pub struct Measure {
    /// Wires seen by the sweep, including ones reaped by it.
    pub wires: usize,
    /// Bytes written source -> destination.
    pub forward: u64,
    /// Bytes written destination -> source.
    pub backward: u64,
    period: Duration,
}

impl Measure {
    /// Nothing open and nothing moved.
    pub fn is_idle(&self) -> bool {
        self.wires == 0 && self.forward == 0 && self.backward == 0
    }
}

// 上报时只比较数值，周期不参与
impl PartialEq for Measure {
    fn eq(&self, other: &Self) -> bool {
        self.wires == other.wires && self.forward == other.forward && self.backward == other.backward
    }
}

impl Eq for Measure {}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} wires, forward: {}, backward: {}",
            self.wires,
            Throughput::new(self.forward, self.period),
            Throughput::new(self.backward, self.period)
        )
    }
}

/// Byte count over a time span, rendered as `"<amount> KB <rate> KB/s"`
/// (MB from 1 MiB up).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throughput {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl Throughput {
    pub fn new(bytes: u64, elapsed: Duration) -> Self {
        Self { bytes, elapsed }
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MB: u64 = 1024 * 1024;
        let secs = self.elapsed.as_secs_f64();
        let (amount, unit) = if self.bytes >= MB {
            (self.bytes as f64 / MB as f64, "MB")
        } else {
            (self.bytes as f64 / 1024.0, "KB")
        };
        let rate = if secs > 0.0 { amount / secs } else { 0.0 };
        write!(f, "{:.2} {} {:.2} {}/s", amount, unit, rate, unit)
    }
}
