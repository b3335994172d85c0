//! Per-task aggregation of frame results.

use std::collections::BTreeSet;

use crowd_models::{AnalysisSummary, CountRange, CrowdLevel, PeakFrame, TimelineEntry};

/// Accumulates the timeline and the running maximum of one analysis.
///
/// Frames must be observed in frame order. The first frame always becomes
/// the peak; later frames replace it only with a strictly greater count, so
/// ties keep the earliest timestamp.
#[derive(Debug, Default)]
pub struct AggregationTracker {
    timeline: Vec<TimelineEntry>,
    peak: Option<PeakFrame>,
    distinct_counts: BTreeSet<u32>,
}

impl AggregationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one classified frame. Returns true if it became the new peak.
    pub fn observe(&mut self, timestamp: f64, count: u32, level: CrowdLevel) -> bool {
        let entry = TimelineEntry::new(timestamp, count, level);
        let is_peak = match self.peak {
            None => true,
            Some(peak) => count > peak.count,
        };
        if is_peak {
            self.peak = Some(PeakFrame {
                count,
                level,
                timestamp: entry.timestamp,
            });
        }
        self.distinct_counts.insert(count);
        self.timeline.push(entry);
        is_peak
    }

    pub fn peak(&self) -> Option<PeakFrame> {
        self.peak
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    pub fn last(&self) -> Option<&TimelineEntry> {
        self.timeline.last()
    }

    pub fn frames_observed(&self) -> usize {
        self.timeline.len()
    }

    /// Number of distinct count values seen.
    pub fn unique_count_values(&self) -> usize {
        self.distinct_counts.len()
    }

    pub fn count_range(&self) -> CountRange {
        CountRange {
            min: self.distinct_counts.first().copied().unwrap_or(0),
            max: self.distinct_counts.last().copied().unwrap_or(0),
        }
    }

    /// True when more than one frame was seen and all had the same count.
    /// Usually a sign that the frames or the detector are broken.
    pub fn is_degenerate(&self) -> bool {
        self.timeline.len() > 1 && self.distinct_counts.len() == 1
    }

    /// Distinct counts in ascending order, for diagnostics.
    pub fn distinct_counts(&self) -> impl Iterator<Item = u32> + '_ {
        self.distinct_counts.iter().copied()
    }

    pub fn into_summary(self) -> AnalysisSummary {
        AnalysisSummary {
            frames_processed: self.timeline.len(),
            unique_count_values: self.distinct_counts.len(),
            count_range: self.count_range(),
            peak: self.peak,
            timeline: self.timeline,
        }
    }
}
