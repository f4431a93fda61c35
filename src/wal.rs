use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Change;

/// Frame one change as `[len][bincode][crc32]`.
fn write_frame(writer: &mut impl Write, change: &Change) -> io::Result<()> {
    let payload =
        bincode::serialize(change).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// `Ok(None)` at a clean end of file or a truncated tail.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Option<()>> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(Some(())),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Next valid change, or `None` where the log stops being trustworthy.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Change>> {
    let mut word = [0u8; 4];
    if read_exact_or_eof(reader, &mut word)?.is_none() {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if read_exact_or_eof(reader, &mut payload)?.is_none() {
        return Ok(None);
    }
    if read_exact_or_eof(reader, &mut word)?.is_none() {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Change>(&payload).ok())
}

/// Append-only change log of one tenant.
///
/// Entry format: `[u32 len][bincode Change][u32 crc32]`, little endian.
/// A torn or corrupt entry ends replay; everything before it is kept.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, change: &Change) -> io::Result<()> {
        self.append_buffered(change)?;
        self.flush_sync()
    }

    /// Buffer one change. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, change: &Change) -> io::Result<()> {
        write_frame(&mut self.writer, change)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a snapshot next to the log and fsync it.
    pub fn write_compact_file(path: &Path, changes: &[Change]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for change in changes {
            write_frame(&mut writer, change)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the log and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, changes: &[Change]) -> io::Result<()> {
        Self::write_compact_file(&self.path, changes)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every valid change from disk. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Change>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut changes = Vec::new();
        while let Some(change) = read_frame(&mut reader)? {
            changes.push(change);
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, Payment, Room};
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("herberge_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn event(year: i32) -> Event {
        Event {
            id: Ulid::new(),
            name: "Winterfreizeit".into(),
            year,
            start_date: NaiveDate::from_ymd_opt(year, 12, 22).unwrap(),
            end_date: NaiveDate::from_ymd_opt(year, 12, 28).unwrap(),
            location: "Jugendherberge".into(),
            fee_cents: Some(15_000),
        }
    }

    fn room(event_id: Ulid, name: &str) -> Room {
        Room {
            id: Ulid::new(),
            event_id,
            name: name.into(),
            floor: None,
            capacity: 4,
            description: None,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let ev = event(2025);
        let changes = vec![
            Change::EventCreated(ev.clone()),
            Change::RoomCreated(room(ev.id, "101")),
            Change::PaymentRecorded {
                participant_id: Ulid::new(),
                payment: Payment {
                    has_paid: true,
                    amount_cents: Some(15_000),
                    method: None,
                    paid_at: Some(1),
                },
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for c in &changes {
                wal.append(c).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), changes);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = tmp_path("torn_tail.wal");
        let change = Change::EventCreated(event(2024));
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&change).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![change]);
    }

    #[test]
    fn missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn bad_crc_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let good = Change::EventDeleted { id: Ulid::new() };
        let bad = Change::RoomDeleted { id: Ulid::new() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&bad).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn compact_replaces_history() {
        let path = tmp_path("compact.wal");
        let ev = event(2025);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&Change::EventCreated(ev.clone())).unwrap();
            for i in 0..10 {
                let r = room(ev.id, &format!("Zimmer {i}"));
                wal.append(&Change::RoomCreated(r.clone())).unwrap();
                wal.append(&Change::RoomDeleted { id: r.id }).unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let snapshot = vec![Change::EventCreated(ev)];
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&snapshot).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should shrink: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), snapshot);
    }

    #[test]
    fn append_after_compact_lands_in_new_file() {
        let path = tmp_path("compact_then_append.wal");
        let ev = event(2026);
        let later = Change::RoomCreated(room(ev.id, "Dachboden"));
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&Change::EventCreated(ev.clone())).unwrap();
            wal.compact(&[Change::EventCreated(ev.clone())]).unwrap();
            wal.append(&later).unwrap();
            assert_eq!(wal.appends_since_compact(), 1);
        }

        assert_eq!(
            Wal::replay(&path).unwrap(),
            vec![Change::EventCreated(ev), later]
        );
    }

    #[test]
    fn buffered_appends_count_and_survive_flush() {
        let path = tmp_path("buffered.wal");
        let changes: Vec<Change> = (2020..2025).map(|y| Change::EventCreated(event(y))).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for c in &changes {
                wal.append_buffered(c).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), changes);
    }
}
