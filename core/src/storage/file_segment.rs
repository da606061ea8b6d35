//! File-backed columnar segment.
//!
//! Same contract as [`Segment`](crate::storage::segment::Segment), but the
//! columns live in a memory-mapped file behind a checksummed 4 KiB header, and
//! every successful append is made durable before it is acknowledged.
//!
//! On-disk layout:
//!
//! ```text
//! [0, 4096)                        header (little-endian)
//! [4096, 4096 + 8*cap)             timestamp column, i64
//! [4096 + 8*cap, .. + size(T)*cap) value column
//! ```
//!
//! Header fields: magic `TAUFILE\0`, version, `capacity_max`, live `count`,
//! `min_timestamp`, `max_timestamp`, and an FNV-1a 64 checksum computed over
//! the whole header with the checksum slot zeroed.

use std::fs::{File, OpenOptions};
use std::hash::Hasher;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use fnv::FnvHasher;
use memmap2::MmapMut;

use crate::storage::{StorageError, Value, MAX_SEGMENT_CAPACITY};

pub(crate) const HEADER_LEN: usize = 4096;
const MAGIC: [u8; 8] = *b"TAUFILE\0";
const FORMAT_VERSION: u32 = 1;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 8;
const CAPACITY_OFFSET: usize = 12;
const COUNT_OFFSET: usize = 16;
const MIN_TS_OFFSET: usize = 20;
const MAX_TS_OFFSET: usize = 28;
const CHECKSUM_OFFSET: usize = 36;

/// A memory-mapped, append-only segment with a durable header.
pub struct FileSegment<T: Value> {
    path: PathBuf,
    map: MmapMut,
    capacity: usize,
    count: usize,
    min_ts: i64,
    max_ts: i64,
    _file: File,
    _value: PhantomData<T>,
}

impl<T: Value> FileSegment<T> {
    /// Creates a fresh segment file sized for `capacity` observations,
    /// truncating anything already at `path`.
    pub fn create<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, StorageError> {
        if capacity == 0 || capacity > MAX_SEGMENT_CAPACITY {
            return Err(StorageError::InvalidCapacity(capacity));
        }
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(Self::file_len(capacity) as u64)?;
        // Safety: the mapping is exclusively owned by this segment and the
        // file has just been sized to cover it.
        let mut map = unsafe { MmapMut::map_mut(&file)? };

        map[MAGIC_OFFSET..MAGIC_OFFSET + 8].copy_from_slice(&MAGIC);
        LittleEndian::write_u32(&mut map[VERSION_OFFSET..VERSION_OFFSET + 4], FORMAT_VERSION);
        LittleEndian::write_u32(&mut map[CAPACITY_OFFSET..CAPACITY_OFFSET + 4], capacity as u32);
        LittleEndian::write_u32(&mut map[COUNT_OFFSET..COUNT_OFFSET + 4], 0);
        LittleEndian::write_i64(&mut map[MIN_TS_OFFSET..MIN_TS_OFFSET + 8], 0);
        LittleEndian::write_i64(&mut map[MAX_TS_OFFSET..MAX_TS_OFFSET + 8], 0);
        let checksum = header_checksum(&map[..HEADER_LEN]);
        LittleEndian::write_u64(&mut map[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 8], checksum);
        map.flush_range(0, HEADER_LEN)?;

        Ok(FileSegment {
            path,
            map,
            capacity,
            count: 0,
            min_ts: 0,
            max_ts: 0,
            _file: file,
            _value: PhantomData,
        })
    }

    /// Opens an existing segment file, validating size, magic, version and
    /// header checksum. `count`, `min_timestamp` and `max_timestamp` are
    /// restored from the header; the columns are read through the mapping.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len() as usize;
        if len < HEADER_LEN {
            return Err(StorageError::Corrupt("file shorter than header"));
        }
        // Safety: exclusive ownership, as in create().
        let map = unsafe { MmapMut::map_mut(&file)? };

        if map[MAGIC_OFFSET..MAGIC_OFFSET + 8] != MAGIC {
            return Err(StorageError::Corrupt("bad magic"));
        }
        if LittleEndian::read_u32(&map[VERSION_OFFSET..VERSION_OFFSET + 4]) != FORMAT_VERSION {
            return Err(StorageError::Corrupt("unsupported format version"));
        }
        let stored = LittleEndian::read_u64(&map[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 8]);
        if stored != header_checksum(&map[..HEADER_LEN]) {
            return Err(StorageError::Corrupt("header checksum mismatch"));
        }

        let capacity = LittleEndian::read_u32(&map[CAPACITY_OFFSET..CAPACITY_OFFSET + 4]) as usize;
        if capacity == 0 || capacity > MAX_SEGMENT_CAPACITY {
            return Err(StorageError::Corrupt("capacity out of range"));
        }
        if len < Self::file_len(capacity) {
            return Err(StorageError::Corrupt("file shorter than columns"));
        }
        let count = LittleEndian::read_u32(&map[COUNT_OFFSET..COUNT_OFFSET + 4]) as usize;
        if count > capacity {
            return Err(StorageError::Corrupt("count exceeds capacity"));
        }

        Ok(FileSegment {
            path,
            capacity,
            count,
            min_ts: LittleEndian::read_i64(&map[MIN_TS_OFFSET..MIN_TS_OFFSET + 8]),
            max_ts: LittleEndian::read_i64(&map[MAX_TS_OFFSET..MAX_TS_OFFSET + 8]),
            map,
            _file: file,
            _value: PhantomData,
        })
    }

    /// Appends an observation and makes it durable. The logical `count` only
    /// advances once both column slots and the refreshed header have been
    /// flushed; a failed flush leaves the segment at its previous state.
    pub fn append(&mut self, ts: i64, value: T) -> Result<(), StorageError> {
        if self.count == self.capacity {
            return Err(StorageError::SegmentFull);
        }
        if self.count > 0 && ts <= self.max_ts {
            return Err(StorageError::OutOfOrder);
        }

        let ts_off = self.ts_offset(self.count);
        let val_off = self.val_offset(self.count);
        LittleEndian::write_i64(&mut self.map[ts_off..ts_off + 8], ts);
        value.write_le(&mut self.map[val_off..val_off + T::SIZE]);

        let min_ts = if self.count == 0 { ts } else { self.min_ts };
        self.write_header(self.count + 1, min_ts, ts);

        if let Err(err) = self.flush_append(ts_off, val_off) {
            // Roll the header back so a reopen never sees the half-committed
            // observation.
            self.write_header(self.count, self.min_ts, self.max_ts);
            return Err(StorageError::Io(err));
        }

        self.count += 1;
        self.min_ts = min_ts;
        self.max_ts = ts;
        Ok(())
    }

    /// Returns the value stored at exactly `ts`, if any. Binary search over
    /// the mapped timestamp column.
    pub fn at(&self, ts: i64) -> Option<T> {
        if !self.contains(ts) {
            return None;
        }
        let mut lo = 0usize;
        let mut hi = self.count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let mid_ts = self.timestamp_at(mid);
            if mid_ts == ts {
                return Some(self.value_at(mid));
            } else if mid_ts < ts {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        None
    }

    pub fn contains(&self, ts: i64) -> bool {
        self.count > 0 && self.min_ts <= ts && ts <= self.max_ts
    }

    pub fn min_timestamp(&self) -> Option<i64> {
        (self.count > 0).then_some(self.min_ts)
    }

    pub fn max_timestamp(&self) -> Option<i64> {
        (self.count > 0).then_some(self.max_ts)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total file length for a given capacity.
    fn file_len(capacity: usize) -> usize {
        HEADER_LEN + capacity * 8 + capacity * T::SIZE
    }

    fn ts_offset(&self, index: usize) -> usize {
        HEADER_LEN + index * 8
    }

    fn val_offset(&self, index: usize) -> usize {
        HEADER_LEN + self.capacity * 8 + index * T::SIZE
    }

    fn timestamp_at(&self, index: usize) -> i64 {
        let off = self.ts_offset(index);
        LittleEndian::read_i64(&self.map[off..off + 8])
    }

    fn value_at(&self, index: usize) -> T {
        let off = self.val_offset(index);
        T::read_le(&self.map[off..off + T::SIZE])
    }

    /// Rewrites the mutable header fields and refreshes the checksum.
    fn write_header(&mut self, count: usize, min_ts: i64, max_ts: i64) {
        LittleEndian::write_u32(&mut self.map[COUNT_OFFSET..COUNT_OFFSET + 4], count as u32);
        LittleEndian::write_i64(&mut self.map[MIN_TS_OFFSET..MIN_TS_OFFSET + 8], min_ts);
        LittleEndian::write_i64(&mut self.map[MAX_TS_OFFSET..MAX_TS_OFFSET + 8], max_ts);
        let checksum = header_checksum(&self.map[..HEADER_LEN]);
        LittleEndian::write_u64(&mut self.map[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 8], checksum);
    }

    /// Pushes the appended column slots and the header to stable storage.
    /// The async flush is preferred; when it is unavailable the synchronous
    /// path is taken instead.
    fn flush_append(&self, ts_off: usize, val_off: usize) -> std::io::Result<()> {
        let sync_all = |map: &MmapMut| -> std::io::Result<()> {
            map.flush_range(ts_off, 8)?;
            map.flush_range(val_off, T::SIZE)?;
            map.flush_range(0, HEADER_LEN)
        };
        let async_all = |map: &MmapMut| -> std::io::Result<()> {
            map.flush_async_range(ts_off, 8)?;
            map.flush_async_range(val_off, T::SIZE)?;
            map.flush_async_range(0, HEADER_LEN)
        };
        if async_all(&self.map).is_err() {
            return sync_all(&self.map);
        }
        Ok(())
    }
}

impl<T: Value> std::fmt::Debug for FileSegment<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSegment")
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .field("count", &self.count)
            .field("min_timestamp", &self.min_timestamp())
            .field("max_timestamp", &self.max_timestamp())
            .finish()
    }
}

/// FNV-1a 64 over the header bytes with the checksum slot zeroed.
fn header_checksum(header: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(&header[..CHECKSUM_OFFSET]);
    hasher.write(&[0u8; 8]);
    hasher.write(&header[CHECKSUM_OFFSET + 8..HEADER_LEN]);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> tempfile::TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    #[test]
    fn create_append_lookup() {
        let dir = scratch();
        let path = dir.path().join("temps.tau");
        let mut seg = FileSegment::<f64>::create(&path, 16).unwrap();

        seg.append(10, 1.5).unwrap();
        seg.append(20, 2.5).unwrap();
        seg.append(30, 3.5).unwrap();

        assert_eq!(seg.count(), 3);
        assert_eq!(seg.at(10), Some(1.5));
        assert_eq!(seg.at(20), Some(2.5));
        assert_eq!(seg.at(30), Some(3.5));
        assert_eq!(seg.at(15), None);
        assert!(matches!(seg.append(20, 9.0), Err(StorageError::OutOfOrder)));
    }

    #[test]
    fn reopen_round_trip() {
        let dir = scratch();
        let path = dir.path().join("durable.tau");
        {
            let mut seg = FileSegment::<f64>::create(&path, 8).unwrap();
            seg.append(10, 1.5).unwrap();
            seg.append(20, 2.5).unwrap();
            seg.append(30, 3.5).unwrap();
        }

        let seg = FileSegment::<f64>::open(&path).unwrap();
        assert_eq!(seg.count(), 3);
        assert_eq!(seg.capacity(), 8);
        assert_eq!(seg.min_timestamp(), Some(10));
        assert_eq!(seg.max_timestamp(), Some(30));
        for (ts, expect) in [(10, 1.5), (20, 2.5), (30, 3.5)] {
            assert_eq!(seg.at(ts), Some(expect));
        }
        assert_eq!(seg.at(15), None);
    }

    #[test]
    fn reopen_continues_appending() {
        let dir = scratch();
        let path = dir.path().join("resume.tau");
        {
            let mut seg = FileSegment::<f64>::create(&path, 4).unwrap();
            seg.append(1, 0.1).unwrap();
        }
        {
            let mut seg = FileSegment::<f64>::open(&path).unwrap();
            assert!(matches!(seg.append(1, 0.2), Err(StorageError::OutOfOrder)));
            seg.append(2, 0.2).unwrap();
        }
        let seg = FileSegment::<f64>::open(&path).unwrap();
        assert_eq!(seg.count(), 2);
        assert_eq!(seg.at(2), Some(0.2));
    }

    #[test]
    fn open_rejects_short_file() {
        let dir = scratch();
        let path = dir.path().join("short.tau");
        std::fs::write(&path, vec![0u8; 100]).unwrap();
        assert!(matches!(
            FileSegment::<f64>::open(&path),
            Err(StorageError::Corrupt("file shorter than header"))
        ));
    }

    #[test]
    fn open_rejects_bad_magic() {
        let dir = scratch();
        let path = dir.path().join("magic.tau");
        FileSegment::<f64>::create(&path, 4).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            FileSegment::<f64>::open(&path),
            Err(StorageError::Corrupt("bad magic"))
        ));
    }

    #[test]
    fn open_detects_header_corruption() {
        let dir = scratch();
        let path = dir.path().join("corrupt.tau");
        {
            let mut seg = FileSegment::<f64>::create(&path, 4).unwrap();
            seg.append(100, 9.0).unwrap();
        }

        // Flip one byte in the count field, outside the checksum slot.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[COUNT_OFFSET] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            FileSegment::<f64>::open(&path),
            Err(StorageError::Corrupt("header checksum mismatch"))
        ));
    }

    #[test]
    fn fills_to_capacity() {
        let dir = scratch();
        let path = dir.path().join("full.tau");
        let mut seg = FileSegment::<i64>::create(&path, 3).unwrap();
        for i in 0..3 {
            seg.append(i, i).unwrap();
        }
        assert!(seg.is_full());
        assert!(matches!(seg.append(3, 3), Err(StorageError::SegmentFull)));
    }
}
