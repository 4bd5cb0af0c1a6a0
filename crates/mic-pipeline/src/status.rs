//! Running stream status for the periodic log line and the final run summary.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::gain::ChunkStats;

/// Chunks kept for the rolling volume average.
const HISTORY_LEN: usize = 100;
/// Cells in the volume bar.
const BAR_CELLS: usize = 20;
/// Average volume, as a fraction of the overload threshold, that earns a warning marker.
const WARN_FRACTION: f64 = 0.7;

/// Counters and recent levels, owned by the driver thread.
#[derive(Debug)]
pub struct StreamStatus {
    started: Instant,
    volume_threshold_percent: f64,
    history: VecDeque<f64>,
    pub chunks: u64,
    pub samples: u64,
    pub bytes: u64,
    pub peak_db: f64,
    pub current_volume: f64,
    pub reconnects: u64,
    pub resyncs: u64,
    pub sink_errors: u64,
}

impl StreamStatus {
    pub fn new(volume_threshold_percent: f64) -> Self {
        Self {
            started: Instant::now(),
            volume_threshold_percent,
            history: VecDeque::with_capacity(HISTORY_LEN),
            chunks: 0,
            samples: 0,
            bytes: 0,
            peak_db: f64::NEG_INFINITY,
            current_volume: 0.0,
            reconnects: 0,
            resyncs: 0,
            sink_errors: 0,
        }
    }

    /// Record one emitted chunk.
    pub fn record_chunk(&mut self, raw_bytes: usize, stats: &ChunkStats) {
        self.chunks += 1;
        self.samples += stats.samples as u64;
        self.bytes += raw_bytes as u64;
        self.current_volume = stats.volume_percent;
        self.peak_db = self.peak_db.max(stats.peak_db);
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(stats.volume_percent);
    }

    pub fn average_volume(&self) -> f64 {
        if self.history.is_empty() {
            0.0
        } else {
            self.history.iter().sum::<f64>() / self.history.len() as f64
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn kilobytes_per_second(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.bytes as f64 / 1024.0 / secs
        }
    }

    /// Whether the rolling average is creeping towards the overload threshold.
    pub fn is_running_hot(&self) -> bool {
        self.average_volume() > self.volume_threshold_percent * WARN_FRACTION
    }

    /// One-line summary, e.g. `chunks=120 rate=93.8KB/s vol=[####----...] 21.3% avg=18.0% reconnects=0`.
    pub fn status_line(&self) -> String {
        let mut line = format!(
            "chunks={} rate={:.1}KB/s vol=[{}] {:5.1}% avg={:.1}% resyncs={} reconnects={}",
            self.chunks,
            self.kilobytes_per_second(),
            volume_bar(self.current_volume),
            self.current_volume,
            self.average_volume(),
            self.resyncs,
            self.reconnects,
        );
        if self.is_running_hot() {
            line.push_str(" ⚠ near overload threshold");
        }
        line
    }
}

/// A fixed-width bar where each full cell is 5 % of full scale.
pub fn volume_bar(volume_percent: f64) -> String {
    let filled = ((volume_percent.max(0.0) / 100.0 * BAR_CELLS as f64) as usize).min(BAR_CELLS);
    let mut bar = "#".repeat(filled);
    bar.push_str(&"-".repeat(BAR_CELLS - filled));
    bar
}

/// Rate-limits the status line.
#[derive(Debug)]
pub struct StatusTicker {
    interval: Duration,
    last: Instant,
}

impl StatusTicker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    /// `true` at most once per interval.
    pub fn due(&mut self) -> bool {
        if self.last.elapsed() >= self.interval {
            self.last = Instant::now();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(volume_percent: f64) -> ChunkStats {
        ChunkStats {
            samples: 1024,
            volume_percent,
            peak_db: -6.0,
            ..ChunkStats::default()
        }
    }

    #[test]
    fn volume_bar_has_fixed_width() {
        assert_eq!(volume_bar(0.0), "-".repeat(20));
        assert_eq!(volume_bar(25.0), format!("{}{}", "#".repeat(5), "-".repeat(15)));
        assert_eq!(volume_bar(250.0), "#".repeat(20));
    }

    #[test]
    fn history_is_bounded() {
        let mut status = StreamStatus::new(15.0);
        for _ in 0..150 {
            status.record_chunk(2048, &stats(30.0));
        }
        for _ in 0..100 {
            status.record_chunk(2048, &stats(10.0));
        }
        assert_eq!(status.chunks, 250);
        assert_eq!(status.samples, 250 * 1024);
        assert!((status.average_volume() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn status_line_warns_near_threshold() {
        let mut status = StreamStatus::new(15.0);
        status.record_chunk(2048, &stats(5.0));
        assert!(!status.status_line().contains('⚠'));

        status.record_chunk(2048, &stats(30.0));
        let line = status.status_line();
        assert!(line.contains('⚠'), "{line}");
        assert!(line.contains("chunks=2"));
    }

    #[test]
    fn ticker_fires_once_per_interval() {
        let mut ticker = StatusTicker::new(Duration::from_secs(3600));
        assert!(!ticker.due());
        let mut instant = StatusTicker::new(Duration::ZERO);
        assert!(instant.due());
    }
}
