//! The append-only segmented log.
//!
//! The log is a dense 64-bit address space split across fixed-size segment
//! files named by the global address of their first byte
//! (`000000000000a000.tph`). Records never span segments: an append that
//! does not fit pads the remainder of the segment with zero bytes and rolls
//! to a new file, so every address inside a record resolves within one
//! file.
//!
//! `high_address` is the next free offset. A failed commit rolls it back
//! with [`Log::set_high_address`], which truncates files and purges the
//! read cache so stale tail bytes can never be served.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tephra_error::{Result, TephraError};
use tephra_types::{read_varint, write_varint, Address};
use tracing::{debug, info, warn};

use crate::cache::{BlockCache, BLOCK_SIZE};
use crate::config::{LogConfig, LogRuntime};
use crate::loggable::{Loggable, PADDING_TYPE};

/// Extension of log segment files.
pub const LOG_FILE_EXTENSION: &str = ".tph";

/// Longest possible record header: type byte plus a ten-byte varint.
const MAX_HEADER_LEN: u64 = 11;

struct Segment {
    /// Global address of the segment's first byte.
    start: u64,
    /// Current length in bytes.
    len: u64,
    file: File,
}

struct LogInner {
    segments: Vec<Segment>,
    high_address: u64,
    last_sync: Instant,
    closed: bool,
}

#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Default)]
struct FaultSwitches {
    fail_next_append: std::sync::atomic::AtomicBool,
    fail_next_set_high_address: std::sync::atomic::AtomicBool,
}

/// The append-only log. Shared by all transactions of an environment:
/// readers resolve addresses concurrently while a single writer appends
/// under the environment's commit lock.
pub struct Log {
    location: PathBuf,
    segment_max: u64,
    runtime: LogRuntime,
    created_ms: u64,
    cache: BlockCache,
    inner: RwLock<LogInner>,
    #[cfg(any(test, feature = "testing"))]
    faults: FaultSwitches,
}

impl Log {
    /// Open (or create) the log at `config.location`, recovering the high
    /// address and truncating any torn tail.
    pub fn open(config: &LogConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.location)?;
        // Segment boundaries must fall on cache block boundaries so a block
        // never spans two files.
        let segment_max = config.segment_max_bytes.max(BLOCK_SIZE).next_multiple_of(BLOCK_SIZE);

        let mut starts = Vec::new();
        for entry in std::fs::read_dir(&config.location)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(LOG_FILE_EXTENSION)) else {
                continue;
            };
            let Ok(start) = u64::from_str_radix(stem, 16) else {
                return Err(TephraError::log_corrupt(format!(
                    "unparseable segment file name: {name:?}"
                )));
            };
            starts.push(start);
        }
        starts.sort_unstable();

        let mut segments = Vec::with_capacity(starts.len().max(1));
        for (i, &start) in starts.iter().enumerate() {
            let expected = u64::try_from(i).unwrap_or(u64::MAX) * segment_max;
            if start != expected {
                return Err(TephraError::log_corrupt(format!(
                    "segment gap: expected segment at 0x{expected:x}, found 0x{start:x}"
                )));
            }
            let path = segment_path(&config.location, start);
            let file = open_segment(&path)?;
            let len = file.metadata()?.len();
            let last = i + 1 == starts.len();
            if !last && len != segment_max {
                return Err(TephraError::log_corrupt(format!(
                    "non-tail segment 0x{start:x} has length {len}, expected {segment_max}"
                )));
            }
            if len > segment_max {
                return Err(TephraError::log_corrupt(format!(
                    "segment 0x{start:x} exceeds maximum size: {len} > {segment_max}"
                )));
            }
            segments.push(Segment { start, len, file });
        }
        if segments.is_empty() {
            let path = segment_path(&config.location, 0);
            segments.push(Segment {
                start: 0,
                len: 0,
                file: open_segment(&path)?,
            });
        }

        let created_ms = segments
            .first()
            .and_then(|seg| seg.file.metadata().ok())
            .and_then(|meta| meta.created().or_else(|_| meta.modified()).ok())
            .unwrap_or_else(SystemTime::now)
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);

        let log = Self {
            location: config.location.clone(),
            segment_max,
            runtime: LogRuntime::new(config),
            created_ms,
            cache: BlockCache::new(config.read_cache_blocks),
            inner: RwLock::new(LogInner {
                segments,
                high_address: 0,
                last_sync: Instant::now(),
                closed: false,
            }),
            #[cfg(any(test, feature = "testing"))]
            faults: FaultSwitches::default(),
        };
        log.recover_tail()?;
        let high = log.high_address();
        debug!(location = %config.location.display(), high_address = high.get(), "log opened");
        Ok(log)
    }

    /// Scan the tail segment for a torn record and truncate it away.
    fn recover_tail(&self) -> Result<()> {
        let mut inner = self.inner.write();
        let segment_max = self.segment_max;
        let tail = inner.segments.last_mut().expect("log always has a tail segment");
        let mut pos = 0u64;
        let mut header = [0u8; MAX_HEADER_LEN as usize];
        while pos < tail.len {
            let avail = tail.len - pos;
            let hdr_len = usize::try_from(avail.min(MAX_HEADER_LEN)).unwrap_or(0);
            tail.file.read_exact_at(&mut header[..hdr_len], pos)?;
            if header[0] == PADDING_TYPE {
                // Padding runs to the segment boundary. A shorter run is a
                // torn pad from an interrupted roll; cut it off.
                if tail.len != segment_max {
                    warn!(segment = tail.start, at = pos, "truncating torn padding");
                    tail.file.set_len(pos)?;
                    tail.len = pos;
                }
                break;
            }
            let Some((payload_len, vlen)) = read_varint(&header[1..hdr_len]) else {
                warn!(segment = tail.start, at = pos, "truncating torn record header");
                tail.file.set_len(pos)?;
                tail.len = pos;
                break;
            };
            let record_len = 1u64
                .saturating_add(u64::try_from(vlen).unwrap_or(u64::MAX))
                .saturating_add(payload_len);
            if record_len > avail {
                warn!(segment = tail.start, at = pos, "truncating torn record payload");
                tail.file.set_len(pos)?;
                tail.len = pos;
                break;
            }
            pos += record_len;
        }
        inner.high_address = {
            let tail = inner.segments.last().expect("log always has a tail segment");
            tail.start + tail.len
        };
        Ok(())
    }

    /// Directory the segment files live in.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Creation timestamp, milliseconds since the epoch.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.created_ms
    }

    /// The runtime-adjustable knobs.
    #[must_use]
    pub fn config(&self) -> &LogRuntime {
        &self.runtime
    }

    /// Segment size in effect, block-aligned.
    #[must_use]
    pub fn segment_size(&self) -> u64 {
        self.segment_max
    }

    /// The next free offset.
    #[must_use]
    pub fn high_address(&self) -> Address {
        Address::new(self.inner.read().high_address)
    }

    /// Read-cache hit rate in `[0, 1]`.
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        self.cache.hit_rate()
    }

    /// Total size of the segment files on disk.
    pub fn disk_usage(&self) -> Result<u64> {
        let mut total = 0u64;
        for entry in std::fs::read_dir(&self.location)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_str().is_some_and(|n| n.ends_with(LOG_FILE_EXTENSION)) {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    /// Append a record, returning its address.
    ///
    /// `type_id` must not be the padding type.
    pub fn append(&self, type_id: u8, payload: &[u8]) -> Result<Address> {
        assert_ne!(type_id, PADDING_TYPE, "padding type is reserved");
        #[cfg(any(test, feature = "testing"))]
        if self
            .faults
            .fail_next_append
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(TephraError::Io(injected_fault("append")));
        }

        let mut record = Vec::with_capacity(payload.len() + MAX_HEADER_LEN as usize);
        record.push(type_id);
        write_varint(&mut record, payload.len() as u64);
        record.extend_from_slice(payload);
        let record_len = record.len() as u64;
        if record_len > self.segment_max {
            return Err(TephraError::Io(io::Error::other(format!(
                "record of {record_len} bytes exceeds segment size {}",
                self.segment_max
            ))));
        }

        let mut inner = self.inner.write();
        self.check_open(&inner)?;

        let tail_len = inner.segments.last().expect("tail segment").len;
        if tail_len + record_len > self.segment_max {
            self.pad_and_roll(&mut inner)?;
        }
        let tail = inner.segments.last_mut().expect("tail segment");
        let address = tail.start + tail.len;
        tail.file.write_all_at(&record, tail.len)?;
        tail.len += record_len;
        let new_high = tail.start + tail.len;
        inner.high_address = new_high;

        let durable = self.runtime.durable_write();
        let period = self.runtime.sync_period_ms();
        if durable {
            inner.segments.last().expect("tail segment").file.sync_data()?;
        } else if inner.last_sync.elapsed().as_millis() >= u128::from(period) {
            inner.segments.last().expect("tail segment").file.sync_data()?;
            inner.last_sync = Instant::now();
        }
        Ok(Address::new(address))
    }

    /// Fill the tail segment with padding and open the next segment file.
    fn pad_and_roll(&self, inner: &mut LogInner) -> Result<()> {
        let tail = inner.segments.last_mut().expect("tail segment");
        let pad_len = self.segment_max - tail.len;
        if pad_len > 0 {
            let padding = vec![PADDING_TYPE; usize::try_from(pad_len).unwrap_or(0)];
            tail.file.write_all_at(&padding, tail.len)?;
            tail.len = self.segment_max;
        }
        tail.file.sync_data()?;
        let next_start = tail.start + self.segment_max;
        let path = segment_path(&self.location, next_start);
        let file = open_segment(&path)?;
        debug!(start = next_start, "rolled log segment");
        inner.segments.push(Segment {
            start: next_start,
            len: 0,
            file,
        });
        inner.high_address = next_start;
        Ok(())
    }

    /// Read the record at `address`.
    pub fn read(&self, address: Address) -> Result<Loggable> {
        let inner = self.inner.read();
        self.check_open(&inner)?;
        self.read_record_at(&inner, address.get())
    }

    /// Visit every record from `from` (address order), skipping padding.
    /// Stops early when `visit` returns `false`.
    pub fn scan<F>(&self, from: Address, mut visit: F) -> Result<()>
    where
        F: FnMut(&Loggable) -> bool,
    {
        let inner = self.inner.read();
        self.check_open(&inner)?;
        let mut addr = from.get();
        while addr < inner.high_address {
            let seg = self.segment_for(&inner, addr)?;
            let seg_end = seg.start + seg.len;
            let mut type_byte = [0u8; 1];
            self.read_bytes(&inner, addr, &mut type_byte)?;
            if type_byte[0] == PADDING_TYPE {
                addr = seg_end;
                continue;
            }
            let record = self.read_record_at(&inner, addr)?;
            let end = record.end().get();
            if !visit(&record) {
                break;
            }
            addr = end;
        }
        Ok(())
    }

    /// Roll the high address back to `address`, truncating everything past
    /// it. Used to undo a failed commit; when this itself fails, the
    /// environment becomes permanently inoperative.
    pub fn set_high_address(&self, address: Address) -> Result<()> {
        #[cfg(any(test, feature = "testing"))]
        if self
            .faults
            .fail_next_set_high_address
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(TephraError::Io(injected_fault("set_high_address")));
        }

        let target = address.get();
        let mut inner = self.inner.write();
        self.check_open(&inner)?;
        if target > inner.high_address {
            return Err(TephraError::InvalidAddress { address: target });
        }
        if target == inner.high_address {
            return Ok(());
        }
        while inner
            .segments
            .last()
            .is_some_and(|seg| seg.start >= target && seg.start != 0)
        {
            let seg = inner.segments.pop().expect("checked non-empty");
            std::fs::remove_file(segment_path(&self.location, seg.start))?;
        }
        let tail = inner.segments.last_mut().expect("segment zero is never removed");
        let new_len = target - tail.start;
        tail.file.set_len(new_len)?;
        tail.len = new_len;
        inner.high_address = target;
        self.cache.purge_from(target / BLOCK_SIZE);
        debug!(high_address = target, "log high address rolled back");
        Ok(())
    }

    /// Delete every record. The log stays usable with a fresh, empty
    /// address space.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write();
        self.check_open(&inner)?;
        while let Some(seg) = inner.segments.pop() {
            drop(seg.file);
            std::fs::remove_file(segment_path(&self.location, seg.start))?;
        }
        inner.segments.push(Segment {
            start: 0,
            len: 0,
            file: open_segment(&segment_path(&self.location, 0))?,
        });
        inner.high_address = 0;
        self.cache.clear();
        info!(location = %self.location.display(), "log cleared");
        Ok(())
    }

    /// Sync and close the log. Further operations fail.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Ok(());
        }
        for seg in &inner.segments {
            seg.file.sync_all()?;
        }
        inner.closed = true;
        Ok(())
    }

    #[cfg(any(test, feature = "testing"))]
    /// Make the next [`Log::append`] fail with an injected I/O error.
    pub fn inject_append_failure(&self) {
        self.faults
            .fail_next_append
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(any(test, feature = "testing"))]
    /// Make the next [`Log::set_high_address`] fail with an injected I/O
    /// error.
    pub fn inject_set_high_address_failure(&self) {
        self.faults
            .fail_next_set_high_address
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_open(&self, inner: &LogInner) -> Result<()> {
        if inner.closed {
            return Err(TephraError::Io(io::Error::other("log is closed")));
        }
        Ok(())
    }

    fn segment_for<'a>(&self, inner: &'a LogInner, address: u64) -> Result<&'a Segment> {
        let idx = inner.segments.partition_point(|seg| seg.start <= address);
        idx.checked_sub(1)
            .and_then(|i| inner.segments.get(i))
            .filter(|seg| address < seg.start + seg.len)
            .ok_or(TephraError::InvalidAddress { address })
    }

    fn read_record_at(&self, inner: &LogInner, address: u64) -> Result<Loggable> {
        if address >= inner.high_address {
            return Err(TephraError::InvalidAddress { address });
        }
        let seg = self.segment_for(inner, address)?;
        let seg_end = seg.start + seg.len;
        let avail = seg_end - address;
        let hdr_len = usize::try_from(avail.min(MAX_HEADER_LEN)).unwrap_or(0);
        let mut header = [0u8; MAX_HEADER_LEN as usize];
        self.read_bytes(inner, address, &mut header[..hdr_len])?;
        let type_id = header[0];
        if type_id == PADDING_TYPE {
            return Err(TephraError::InvalidAddress { address });
        }
        let (payload_len, vlen) = read_varint(&header[1..hdr_len]).ok_or_else(|| {
            TephraError::log_corrupt(format!("truncated record header at 0x{address:x}"))
        })?;
        let header_len = 1 + u64::try_from(vlen).unwrap_or(u64::MAX);
        let record_len = header_len.saturating_add(payload_len);
        if record_len > avail {
            return Err(TephraError::log_corrupt(format!(
                "record at 0x{address:x} overruns its segment"
            )));
        }
        let mut data = vec![0u8; usize::try_from(payload_len).unwrap_or(usize::MAX)];
        self.read_bytes(inner, address + header_len, &mut data)?;
        Ok(Loggable {
            address: Address::new(address),
            type_id,
            data,
            length: record_len,
        })
    }

    /// Fill `buf` from the log starting at `address`, going through the
    /// block cache. Only full blocks are cached, so the growing tail is
    /// always read from disk.
    fn read_bytes(&self, inner: &LogInner, address: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            let addr = address + filled as u64;
            let block_no = addr / BLOCK_SIZE;
            let block_start = block_no * BLOCK_SIZE;
            let offset = usize::try_from(addr - block_start).unwrap_or(usize::MAX);
            let block = if let Some(cached) = self.cache.get(block_no) {
                cached
            } else {
                let seg = self.segment_for(inner, addr)?;
                let seg_off = block_start - seg.start;
                let block_avail = seg.len.saturating_sub(seg_off).min(BLOCK_SIZE);
                let mut data = vec![0u8; usize::try_from(block_avail).unwrap_or(0)];
                seg.file.read_exact_at(&mut data, seg_off)?;
                let block: std::sync::Arc<[u8]> = data.into();
                self.cache.insert(block_no, std::sync::Arc::clone(&block));
                block
            };
            if offset >= block.len() {
                return Err(TephraError::InvalidAddress { address: addr });
            }
            let n = (block.len() - offset).min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&block[offset..offset + n]);
            filled += n;
        }
        Ok(())
    }
}

fn segment_path(location: &Path, start: u64) -> PathBuf {
    location.join(format!("{start:016x}{LOG_FILE_EXTENSION}"))
}

fn open_segment(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

#[cfg(any(test, feature = "testing"))]
fn injected_fault(op: &str) -> io::Error {
    io::Error::other(format!("injected {op} fault"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_log(dir: &Path) -> Log {
        let config = LogConfig::new(dir).with_segment_max_bytes(BLOCK_SIZE);
        Log::open(&config).expect("log should open")
    }

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempdir().expect("tempdir");
        let log = small_log(dir.path());
        let addr = log.append(7, b"hello").expect("append should succeed");
        let record = log.read(addr).expect("read should succeed");
        assert_eq!(record.type_id, 7);
        assert_eq!(record.data, b"hello");
        assert_eq!(record.end(), log.high_address());
    }

    #[test]
    fn records_roll_across_segments_with_padding() {
        let dir = tempdir().expect("tempdir");
        let log = small_log(dir.path());
        let payload = vec![0xabu8; (BLOCK_SIZE as usize) / 2];
        let first = log.append(2, &payload).expect("append");
        let second = log.append(2, &payload).expect("append");
        assert_eq!(first.get(), 0);
        // The second record did not fit; it starts at the next segment.
        assert_eq!(second.get(), BLOCK_SIZE);
        assert_eq!(log.read(second).expect("read").data, payload);
        let mut seen = Vec::new();
        log.scan(Address::ZERO, |record| {
            seen.push(record.address);
            true
        })
        .expect("scan");
        assert_eq!(seen, vec![first, second]);
    }

    #[test]
    fn reopen_recovers_high_address() {
        let dir = tempdir().expect("tempdir");
        let high = {
            let log = small_log(dir.path());
            log.append(3, b"a").expect("append");
            log.append(3, b"bc").expect("append");
            let high = log.high_address();
            log.close().expect("close");
            high
        };
        let log = small_log(dir.path());
        assert_eq!(log.high_address(), high);
    }

    #[test]
    fn reopen_truncates_torn_tail() {
        let dir = tempdir().expect("tempdir");
        let (addr, high) = {
            let log = small_log(dir.path());
            let addr = log.append(3, b"keep").expect("append");
            let high = log.high_address();
            log.append(3, b"torn-away").expect("append");
            log.close().expect("close");
            (addr, high)
        };
        // Chop the second record in half.
        let seg = dir.path().join(format!("{:016x}{LOG_FILE_EXTENSION}", 0));
        let file = OpenOptions::new().write(true).open(seg).expect("open segment");
        file.set_len(high.get() + 3).expect("truncate");
        drop(file);

        let log = small_log(dir.path());
        assert_eq!(log.high_address(), high);
        assert_eq!(log.read(addr).expect("read").data, b"keep");
    }

    #[test]
    fn set_high_address_rolls_back_appends() {
        let dir = tempdir().expect("tempdir");
        let log = small_log(dir.path());
        let keep = log.append(4, b"keep").expect("append");
        let mark = log.high_address();
        let gone = log.append(4, b"gone").expect("append");
        log.set_high_address(mark).expect("rollback should succeed");
        assert_eq!(log.high_address(), mark);
        assert_eq!(log.read(keep).expect("read").data, b"keep");
        assert!(matches!(
            log.read(gone),
            Err(TephraError::InvalidAddress { .. })
        ));
        // The address space is reused after rollback.
        let again = log.append(4, b"again").expect("append");
        assert_eq!(again, mark);
    }

    #[test]
    fn set_high_address_removes_whole_segments() {
        let dir = tempdir().expect("tempdir");
        let log = small_log(dir.path());
        let payload = vec![1u8; (BLOCK_SIZE as usize) - 64];
        log.append(5, &payload).expect("append");
        log.append(5, &payload).expect("append");
        log.append(5, &payload).expect("append");
        assert!(log.disk_usage().expect("disk usage") > 2 * BLOCK_SIZE);
        log.set_high_address(Address::ZERO).expect("rollback");
        assert_eq!(log.high_address(), Address::ZERO);
        assert_eq!(log.disk_usage().expect("disk usage"), 0);
    }

    #[test]
    fn clear_resets_address_space() {
        let dir = tempdir().expect("tempdir");
        let log = small_log(dir.path());
        log.append(6, b"x").expect("append");
        log.clear().expect("clear");
        assert_eq!(log.high_address(), Address::ZERO);
        let addr = log.append(6, b"y").expect("append");
        assert_eq!(addr, Address::ZERO);
    }

    #[test]
    fn injected_faults_fire_once() {
        let dir = tempdir().expect("tempdir");
        let log = small_log(dir.path());
        log.inject_append_failure();
        assert!(log.append(7, b"z").is_err());
        let addr = log.append(7, b"z").expect("second append should succeed");
        log.inject_set_high_address_failure();
        assert!(log.set_high_address(addr).is_err());
        log.set_high_address(addr).expect("second rollback should succeed");
    }

    #[test]
    fn padding_is_not_addressable() {
        let dir = tempdir().expect("tempdir");
        let log = small_log(dir.path());
        let payload = vec![9u8; (BLOCK_SIZE as usize) / 2];
        log.append(2, &payload).expect("append");
        log.append(2, &payload).expect("append rolls segment");
        // An address inside the padding run resolves to no record.
        let inside_padding = Address::new(BLOCK_SIZE - 10);
        assert!(matches!(
            log.read(inside_padding),
            Err(TephraError::InvalidAddress { .. })
        ));
    }
}
