//! Per-session results and their aggregate.

use chrono::{DateTime, Local};
use human_repr::HumanCount;
use std::fmt;
use std::iter::Sum;
use std::ops::Add;

/// Outcome of one replay session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobResult {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_duration_ms: u64,
    pub receive_duration_ms: u64,
}

/// Elementwise sum of every [`JobResult`] in a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_duration_ms: u64,
    pub receive_duration_ms: u64,
}

impl AggregateStats {
    /// Fold one result into a new aggregate.
    pub fn fold(self, result: &JobResult) -> AggregateStats {
        AggregateStats {
            bytes_sent: self.bytes_sent + result.bytes_sent,
            bytes_received: self.bytes_received + result.bytes_received,
            send_duration_ms: self.send_duration_ms + result.send_duration_ms,
            receive_duration_ms: self.receive_duration_ms + result.receive_duration_ms,
        }
    }

    pub fn from_results<'a, I>(results: I) -> AggregateStats
    where
        I: IntoIterator<Item = &'a JobResult>,
    {
        results
            .into_iter()
            .fold(AggregateStats::default(), AggregateStats::fold)
    }
}

impl Add for AggregateStats {
    type Output = AggregateStats;

    fn add(self, other: AggregateStats) -> AggregateStats {
        AggregateStats {
            bytes_sent: self.bytes_sent + other.bytes_sent,
            bytes_received: self.bytes_received + other.bytes_received,
            send_duration_ms: self.send_duration_ms + other.send_duration_ms,
            receive_duration_ms: self.receive_duration_ms + other.receive_duration_ms,
        }
    }
}

impl Sum for AggregateStats {
    fn sum<I: Iterator<Item = AggregateStats>>(iter: I) -> AggregateStats {
        iter.fold(AggregateStats::default(), Add::add)
    }
}

impl From<JobResult> for AggregateStats {
    fn from(result: JobResult) -> Self {
        AggregateStats::default().fold(&result)
    }
}

/// Summary printed at the end of a run.
#[derive(Debug, Clone)]
pub struct Report {
    pub started_at: DateTime<Local>,
    pub iterations: usize,
    pub max_concurrency: usize,
    pub stats: AggregateStats,
}

/// Bytes per second over `millis`, or `None` for an empty interval.
fn per_second(bytes: u64, millis: u64) -> Option<u64> {
    if millis == 0 {
        return None;
    }
    Some(((bytes as u128 * 1000) / millis as u128) as u64)
}

fn throughput(bytes: u64, millis: u64) -> String {
    match per_second(bytes, millis) {
        Some(rate) => format!("{}/s", rate.human_count_bytes()),
        None => "n/a".to_string(),
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        writeln!(
            f,
            "Run started {} ({} iterations, concurrency {})",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.iterations,
            self.max_concurrency
        )?;
        writeln!(
            f,
            "  sent:     {} in {} ms ({})",
            s.bytes_sent.human_count_bytes(),
            s.send_duration_ms,
            throughput(s.bytes_sent, s.send_duration_ms)
        )?;
        write!(
            f,
            "  received: {} in {} ms ({})",
            s.bytes_received.human_count_bytes(),
            s.receive_duration_ms,
            throughput(s.bytes_received, s.receive_duration_ms)
        )
    }
}
