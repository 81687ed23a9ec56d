//! Durable record of the latest subspace
//!
//! Only the single most advanced subspace survives a restart; branch
//! timelines are not recoverable.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use warpsync_core::{ClockTicks, Subspace, SubspaceId, WarpError, WarpResult};

/// File name of the record inside a universe directory
pub const SUBSPACE_FILE: &str = "subspace.txt";

const HEADER: &str = "\
#Incorrectly editing this file will cause weirdness. If there is any errors, the universe time will be reset.
#This file can only be edited if the server is stopped.
#Each variable is on a new line. They are subspace id, server clock (100 ns ticks since the Unix epoch), universe time, and subspace rate.
";

/// The persisted subspace
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubspaceSnapshot {
    pub id: SubspaceId,
    pub epoch: Subspace,
}

/// Single-slot durable storage
pub trait SubspaceStore: Send + Sync {
    fn load(&self) -> WarpResult<SubspaceSnapshot>;

    /// Replace the record
    fn save(&self, snapshot: &SubspaceSnapshot) -> WarpResult<()>;
}

/// Render a snapshot in the on-disk text format
pub fn render_snapshot(snapshot: &SubspaceSnapshot) -> String {
    format!(
        "{HEADER}{}\n{}\n{}\n{}\n",
        snapshot.id,
        snapshot.epoch.epoch_clock.as_ticks(),
        snapshot.epoch.epoch_time,
        snapshot.epoch.rate
    )
}

/// Parse the on-disk text format; comment and blank lines are skipped
pub fn parse_snapshot(text: &str) -> WarpResult<SubspaceSnapshot> {
    let mut values = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'));

    let mut next = |what: &str| {
        values
            .next()
            .ok_or_else(|| WarpError::MalformedRecord(format!("missing {what}")))
    };

    let id = next("subspace id")?;
    let id: u32 = id
        .parse()
        .map_err(|e| WarpError::MalformedRecord(format!("subspace id {id:?}: {e}")))?;
    if id > SubspaceId::MAX.0 {
        return Err(WarpError::MalformedRecord(format!("subspace id {id} out of range")));
    }
    let clock = next("server clock")?;
    let clock: i64 = clock
        .parse()
        .map_err(|e| WarpError::MalformedRecord(format!("server clock {clock:?}: {e}")))?;
    let time = next("universe time")?;
    let time: f64 = time
        .parse()
        .map_err(|e| WarpError::MalformedRecord(format!("universe time {time:?}: {e}")))?;
    let rate = next("subspace rate")?;
    let rate: f32 = rate
        .parse()
        .map_err(|e| WarpError::MalformedRecord(format!("subspace rate {rate:?}: {e}")))?;

    if !time.is_finite() || !rate.is_finite() {
        return Err(WarpError::MalformedRecord(
            "non-finite universe time or rate".into(),
        ));
    }

    Ok(SubspaceSnapshot {
        id: SubspaceId::new(id),
        epoch: Subspace::new(ClockTicks::new(clock), time, rate),
    })
}

/// Text file store; writes go to a temporary file that replaces the record
#[derive(Debug, Clone)]
pub struct FileSubspaceStore {
    path: PathBuf,
}

impl FileSubspaceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSubspaceStore { path: path.into() }
    }

    /// Store at `<universe_dir>/subspace.txt`
    pub fn in_dir(universe_dir: impl AsRef<Path>) -> Self {
        Self::new(universe_dir.as_ref().join(SUBSPACE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SubspaceStore for FileSubspaceStore {
    fn load(&self) -> WarpResult<SubspaceSnapshot> {
        let text = fs::read_to_string(&self.path)?;
        parse_snapshot(&text)
    }

    fn save(&self, snapshot: &SubspaceSnapshot) -> WarpResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("txt.tmp");
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            f.write_all(render_snapshot(snapshot).as_bytes())?;
            f.sync_data()?;
        }
        fs::rename(&tmp, &self.path)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                File::open(parent)?.sync_all()?;
            }
        }
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemorySubspaceStore {
    record: Mutex<Option<SubspaceSnapshot>>,
    saves: Mutex<usize>,
}

impl MemorySubspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(snapshot: SubspaceSnapshot) -> Self {
        MemorySubspaceStore {
            record: Mutex::new(Some(snapshot)),
            saves: Mutex::new(0),
        }
    }

    pub fn record(&self) -> Option<SubspaceSnapshot> {
        *self.record.lock()
    }

    /// Number of writes since creation
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl SubspaceStore for MemorySubspaceStore {
    fn load(&self) -> WarpResult<SubspaceSnapshot> {
        self.record()
            .ok_or_else(|| WarpError::MalformedRecord("no record stored".into()))
    }

    fn save(&self, snapshot: &SubspaceSnapshot) -> WarpResult<()> {
        *self.record.lock() = Some(*snapshot);
        *self.saves.lock() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SubspaceSnapshot {
        SubspaceSnapshot {
            id: SubspaceId::new(3),
            epoch: Subspace::new(ClockTicks::new(638_000_000_000_000_000), 500.25, 0.8),
        }
    }

    #[test]
    fn test_render_has_comment_header() {
        let text = render_snapshot(&sample());
        assert!(text.starts_with('#'));
        assert_eq!(parse_snapshot(&text).unwrap(), sample());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_snapshot("").is_err());
        assert!(parse_snapshot("#only a comment\n").is_err());
        assert!(parse_snapshot("3\n100\nabc\n1.0\n").is_err());
        assert!(parse_snapshot("-1\n100\n5.0\n1.0\n").is_err());
        assert!(parse_snapshot("3\n100\nNaN\n1.0\n").is_err());
    }

    #[test]
    fn test_parse_rejects_id_beyond_wire_range() {
        assert!(parse_snapshot("2147483648\n100\n5.0\n1.0\n").is_err());
        let top = parse_snapshot("2147483647\n100\n5.0\n1.0\n").unwrap();
        assert_eq!(top.id, SubspaceId::MAX);
    }

    #[test]
    fn test_file_store_replaces_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSubspaceStore::in_dir(dir.path());
        assert!(store.load().is_err());

        store.save(&sample()).unwrap();
        let mut newer = sample();
        newer.id = SubspaceId::new(9);
        store.save(&newer).unwrap();

        assert_eq!(store.load().unwrap(), newer);
        assert!(!store.path().with_extension("txt.tmp").exists());
    }

    #[test]
    fn test_file_store_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSubspaceStore::in_dir(dir.path());
        fs::write(store.path(), "#header\n12\nnot-a-clock\n").unwrap();
        assert!(matches!(store.load(), Err(WarpError::MalformedRecord(_))));
    }

    #[test]
    fn test_memory_store_counts_saves() {
        let store = MemorySubspaceStore::new();
        assert!(store.load().is_err());
        store.save(&sample()).unwrap();
        store.save(&sample()).unwrap();
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.load().unwrap(), sample());
    }
}
