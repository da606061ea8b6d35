//! A labelled chain of in-memory segments.

use crate::storage::segment::Segment;
use crate::storage::{Label, StorageError, TimeDomain, Value, MAX_SEGMENT_CAPACITY};

/// An ordered collection of equal-capacity segments sharing one label.
///
/// Appends always land in the last segment; a new segment is allocated when
/// the last one fills. Timestamps are strictly increasing across the whole
/// chain, so the cached domain covers exactly the stored observations.
pub struct Series<T: Value> {
    label: Label,
    segments: Vec<Segment<T>>,
    domain: TimeDomain,
    segment_capacity: usize,
    max_segments: usize,
}

impl<T: Value> Series<T> {
    pub fn new(
        label: Label,
        segment_capacity: usize,
        max_segments: usize,
    ) -> Result<Self, StorageError> {
        // Validate the capacity up front so append never hits it.
        if segment_capacity == 0 || segment_capacity > MAX_SEGMENT_CAPACITY {
            return Err(StorageError::InvalidCapacity(segment_capacity));
        }
        Ok(Series {
            label,
            segments: Vec::new(),
            domain: TimeDomain::empty(),
            segment_capacity,
            max_segments: max_segments.max(1),
        })
    }

    /// Appends an observation, allocating a fresh segment when the chain is
    /// empty or its last segment is full.
    pub fn append(&mut self, ts: i64, value: T) -> Result<(), StorageError> {
        if !self.domain.is_empty() && ts <= self.domain.end {
            return Err(StorageError::OutOfOrder);
        }
        let needs_segment = self.segments.last().map_or(true, Segment::is_full);
        if needs_segment {
            if self.segments.len() == self.max_segments {
                return Err(StorageError::SeriesFull);
            }
            self.segments.push(Segment::with_capacity(self.segment_capacity)?);
        }
        self.segments
            .last_mut()
            .expect("segment allocated above")
            .append(ts, value)?;
        self.domain.extend(ts);
        Ok(())
    }

    /// Returns the value stored at exactly `ts`, if any. Short-circuits on
    /// the cached domain, then routes to the segment covering `ts`.
    pub fn at(&self, ts: i64) -> Option<T> {
        if !self.domain.contains(ts) {
            return None;
        }
        self.segments
            .iter()
            .find(|seg| seg.contains(ts))
            .and_then(|seg| seg.at(ts))
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn domain(&self) -> TimeDomain {
        self.domain
    }

    /// Total observations across all segments.
    pub fn count(&self) -> usize {
        self.segments.iter().map(Segment::count).sum()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl<T: Value> std::fmt::Debug for Series<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Series")
            .field("label", &self.label)
            .field("segments", &self.segments.len())
            .field("count", &self.count())
            .field("domain", &self.domain)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(capacity: usize) -> Series<f64> {
        Series::new(Label::from_name("test").unwrap(), capacity, 64).unwrap()
    }

    #[test]
    fn append_crosses_segments() {
        let mut s = series(4);
        for i in 0..10 {
            s.append(i, i as f64 * 0.5).unwrap();
        }
        assert_eq!(s.count(), 10);
        assert_eq!(s.segment_count(), 3);
        for i in 0..10 {
            assert_eq!(s.at(i), Some(i as f64 * 0.5));
        }
        assert_eq!(s.domain(), TimeDomain::new(0, 9));
    }

    #[test]
    fn lookup_misses() {
        let mut s = series(4);
        s.append(100, 1.0).unwrap();
        s.append(300, 3.0).unwrap();

        assert_eq!(s.at(99), None);
        assert_eq!(s.at(200), None);
        assert_eq!(s.at(301), None);
    }

    #[test]
    fn out_of_order_rejected_across_segments() {
        let mut s = series(2);
        for ts in [10, 20, 30] {
            s.append(ts, 0.0).unwrap();
        }
        assert_eq!(s.segment_count(), 2);
        // A timestamp inside an earlier, already-full segment is still
        // out of order for the series.
        assert!(matches!(s.append(15, 0.0), Err(StorageError::OutOfOrder)));
        assert!(matches!(s.append(30, 0.0), Err(StorageError::OutOfOrder)));
        assert_eq!(s.count(), 3);
    }

    #[test]
    fn segment_cap_bounds_growth() {
        let mut s = Series::<f64>::new(Label::from_name("bounded").unwrap(), 2, 2).unwrap();
        for ts in 0..4 {
            s.append(ts, 0.0).unwrap();
        }
        assert!(matches!(s.append(4, 0.0), Err(StorageError::SeriesFull)));
        assert_eq!(s.count(), 4);
    }

    #[test]
    fn empty_series_has_empty_domain() {
        let s = series(4);
        assert!(s.domain().is_empty());
        assert_eq!(s.at(0), None);
        assert_eq!(s.count(), 0);
        assert_eq!(s.segment_count(), 0);
    }
}
