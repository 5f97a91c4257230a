use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::model::*;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to resume after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub schedules: Vec<DaySnapshot>,
    #[serde(default)]
    pub appointments: Vec<Appointment>,
    #[serde(default)]
    pub requests: Vec<Request>,
    #[serde(default)]
    pub next_appointment_id: u64,
    #[serde(default)]
    pub next_request_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySnapshot {
    pub company_id: CompanyId,
    pub date: DateKey,
    pub slots: Vec<SlotStatus>,
}

pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &Snapshot) -> io::Result<()>;

    /// `Ok(None)` when nothing was ever saved.
    fn load(&self) -> io::Result<Option<Snapshot>>;
}

/// Encode a snapshot as one `[len][json][crc32]` frame.
fn encode_frame(writer: &mut impl Write, snapshot: &Snapshot) -> io::Result<()> {
    let payload =
        serde_json::to_vec(snapshot).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "snapshot larger than 4 GiB"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

fn decode_frame(bytes: &[u8]) -> io::Result<Snapshot> {
    let invalid = |msg: &str| io::Error::new(io::ErrorKind::InvalidData, msg.to_string());
    let (len_buf, rest) = bytes
        .split_first_chunk::<4>()
        .ok_or_else(|| invalid("snapshot truncated before length"))?;
    let len = u32::from_le_bytes(*len_buf) as usize;
    if rest.len() != len + 4 {
        return Err(invalid("snapshot length does not match frame"));
    }
    let (payload, crc_buf) = rest.split_at(len);
    let stored_crc = u32::from_le_bytes([crc_buf[0], crc_buf[1], crc_buf[2], crc_buf[3]]);
    if stored_crc != crc32fast::hash(payload) {
        return Err(invalid("snapshot checksum mismatch"));
    }
    serde_json::from_slice(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Single-file store. Saves go to a temp file which is fsynced and renamed over the live
/// file, so a crash leaves either the old or the new snapshot.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, snapshot: &Snapshot) -> io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp_path = self.path.with_extension("snapshot.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        encode_frame(&mut writer, snapshot)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp_path, &self.path)
    }

    fn load(&self) -> io::Result<Option<Snapshot>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        decode_frame(&bytes).map(Some)
    }
}

/// In-process store for tests.
#[derive(Default)]
pub struct MemorySnapshotStore {
    saved: Mutex<Option<Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, snapshot: &Snapshot) -> io::Result<()> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|_| io::Error::other("snapshot store poisoned"))?;
        *saved = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> io::Result<Option<Snapshot>> {
        let saved = self
            .saved
            .lock()
            .map_err(|_| io::Error::other("snapshot store poisoned"))?;
        Ok(saved.clone())
    }
}
