//! Fixed-capacity in-memory columnar block.

use crate::storage::{StorageError, Value, MAX_SEGMENT_CAPACITY};

/// An append-only block of parallel timestamp/value columns.
///
/// Timestamps are strictly increasing; the capacity is fixed at construction
/// and the columns never reallocate. Point lookup is a binary search over the
/// live prefix.
pub struct Segment<T: Value> {
    timestamps: Vec<i64>,
    values: Vec<T>,
    // Vec::with_capacity may round up; the logical capacity is this field.
    capacity: usize,
}

impl<T: Value> Segment<T> {
    /// Allocates an empty segment. Capacity must be in
    /// `1..=MAX_SEGMENT_CAPACITY`.
    pub fn with_capacity(capacity: usize) -> Result<Self, StorageError> {
        if capacity == 0 || capacity > MAX_SEGMENT_CAPACITY {
            return Err(StorageError::InvalidCapacity(capacity));
        }
        Ok(Segment {
            timestamps: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            capacity,
        })
    }

    /// Appends an observation. The timestamp must be strictly greater than
    /// the last stored one.
    pub fn append(&mut self, ts: i64, value: T) -> Result<(), StorageError> {
        if self.is_full() {
            return Err(StorageError::SegmentFull);
        }
        if let Some(&last) = self.timestamps.last() {
            if ts <= last {
                return Err(StorageError::OutOfOrder);
            }
        }
        self.timestamps.push(ts);
        self.values.push(value);
        Ok(())
    }

    /// Returns the value stored at exactly `ts`, if any.
    pub fn at(&self, ts: i64) -> Option<T> {
        match self.timestamps.binary_search(&ts) {
            Ok(idx) => Some(self.values[idx]),
            Err(_) => None,
        }
    }

    /// Whether `ts` falls inside the stored `[min, max]` range.
    pub fn contains(&self, ts: i64) -> bool {
        match (self.min_timestamp(), self.max_timestamp()) {
            (Some(min), Some(max)) => min <= ts && ts <= max,
            _ => false,
        }
    }

    pub fn min_timestamp(&self) -> Option<i64> {
        self.timestamps.first().copied()
    }

    pub fn max_timestamp(&self) -> Option<i64> {
        self.timestamps.last().copied()
    }

    pub fn count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.timestamps.len() == self.capacity
    }

    /// Live columns, timestamps and values in step.
    pub fn columns(&self) -> (&[i64], &[T]) {
        (&self.timestamps, &self.values)
    }
}

impl<T: Value> std::fmt::Debug for Segment<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("capacity", &self.capacity)
            .field("count", &self.count())
            .field("min_timestamp", &self.min_timestamp())
            .field("max_timestamp", &self.max_timestamp())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_lookup() {
        let mut seg = Segment::<f64>::with_capacity(8).unwrap();
        seg.append(1000, 22.5).unwrap();
        seg.append(2000, 23.1).unwrap();

        assert_eq!(seg.at(1000), Some(22.5));
        assert_eq!(seg.at(2000), Some(23.1));
        assert_eq!(seg.at(1500), None);
        assert_eq!(seg.at(999), None);
        assert_eq!(seg.count(), 2);
        assert_eq!(seg.min_timestamp(), Some(1000));
        assert_eq!(seg.max_timestamp(), Some(2000));
        assert!(seg.contains(1500));
        assert!(!seg.contains(2001));
    }

    #[test]
    fn rejects_out_of_order() {
        let mut seg = Segment::<f64>::with_capacity(8).unwrap();
        seg.append(2000, 23.1).unwrap();

        assert!(matches!(
            seg.append(1500, 1.0),
            Err(StorageError::OutOfOrder)
        ));
        // Duplicate timestamps are out of order too.
        assert!(matches!(
            seg.append(2000, 1.0),
            Err(StorageError::OutOfOrder)
        ));
        // State is unchanged by the failed appends.
        assert_eq!(seg.count(), 1);
        assert_eq!(seg.at(1500), None);
        assert_eq!(seg.at(2000), Some(23.1));
    }

    #[test]
    fn fills_to_capacity() {
        let mut seg = Segment::<i64>::with_capacity(4).unwrap();
        for i in 0..4 {
            seg.append(i, i * 10).unwrap();
        }
        assert!(seg.is_full());
        assert!(matches!(seg.append(4, 40), Err(StorageError::SegmentFull)));
        assert_eq!(seg.count(), 4);
        assert_eq!(seg.capacity(), 4);
    }

    #[test]
    fn rejects_bad_capacity() {
        assert!(matches!(
            Segment::<f64>::with_capacity(0),
            Err(StorageError::InvalidCapacity(0))
        ));
        assert!(Segment::<f64>::with_capacity(MAX_SEGMENT_CAPACITY).is_ok());
        assert!(matches!(
            Segment::<f64>::with_capacity(MAX_SEGMENT_CAPACITY + 1),
            Err(StorageError::InvalidCapacity(_))
        ));
    }

    #[test]
    fn negative_timestamps() {
        let mut seg = Segment::<f64>::with_capacity(8).unwrap();
        seg.append(-100, 1.0).unwrap();
        seg.append(-50, 2.0).unwrap();
        seg.append(0, 3.0).unwrap();
        assert_eq!(seg.at(-100), Some(1.0));
        assert_eq!(seg.at(-50), Some(2.0));
        assert_eq!(seg.at(0), Some(3.0));
        assert_eq!(seg.min_timestamp(), Some(-100));
    }
}
