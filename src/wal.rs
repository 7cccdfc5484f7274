use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Write one `[len][bincode][crc32]` record.
fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on a clean or torn end of file.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

enum Record {
    Intact(Vec<u8>),
    Corrupt,
}

/// Read the next record. `None` at end of file, including a torn tail.
fn read_record(reader: &mut impl Read) -> io::Result<Option<Record>> {
    let mut len_buf = [0u8; 4];
    if !read_or_eof(reader, &mut len_buf)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    let mut crc_buf = [0u8; 4];
    if !read_or_eof(reader, &mut payload)? || !read_or_eof(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Some(Record::Corrupt));
    }
    Ok(Some(Record::Intact(payload)))
}

/// Append-only write-ahead log.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A torn last entry (crash mid-write) is discarded via length-prefix + CRC check.
///
/// Every append lands at `len`, the end of the last acknowledged entry, and
/// trims whatever lies past it. A failed append is rolled back, so bytes it
/// left behind never strand the entries written after it.
pub struct Wal {
    file: File,
    path: PathBuf,
    len: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log at `path`. Appends start at its current end;
    /// run [`Wal::recover`] first to drop a torn tail.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
            appends_since_compact: 0,
        })
    }

    /// Append one event and fsync before returning. On error nothing of the
    /// event survives in the log.
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        let mut record = Vec::new();
        write_record(&mut record, event)?;
        let end = self.len + record.len() as u64;

        match self.write_at_end(&record, end) {
            Ok(()) => {
                self.len = end;
                self.appends_since_compact += 1;
                Ok(())
            }
            Err(e) => {
                self.roll_back();
                Err(e)
            }
        }
    }

    fn write_at_end(&mut self, record: &[u8], end: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(self.len))?;
        self.file.write_all(record)?;
        self.file.set_len(end)?;
        self.file.sync_all()
    }

    /// Cut the log back to the last acknowledged entry. If this fails too,
    /// the next append overwrites the leftovers anyway.
    fn roll_back(&mut self) {
        let result = self.file.set_len(self.len).and_then(|()| self.file.sync_all());
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "journal rollback failed");
        }
    }

    /// Replace the log with a minimal set of events that recreates current
    /// state: write a temp file, fsync it, rename it over the log, then fsync
    /// the directory so the rename survives a crash.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp = self.path.with_extension("wal.tmp");
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&tmp)?;
        {
            let mut writer = BufWriter::new(&file);
            for event in events {
                write_record(&mut writer, event)?;
            }
            writer.flush()?;
        }
        file.sync_all()?;
        let len = file.metadata()?.len();

        // The handle follows the rename, so it becomes the live log.
        fs::rename(&tmp, &self.path)?;
        self.file = file;
        self.len = len;
        self.appends_since_compact = 0;
        sync_parent_dir(&self.path)
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the log, then cut any discarded tail off the file so later
    /// appends are not stranded behind it.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let (events, valid_len) = Self::scan(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > valid_len
        {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = meta.len() - valid_len,
                "truncating journal tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(events)
    }

    /// Valid events and the byte length they occupy. Truncated/corrupt
    /// trailing entries are discarded.
    fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;
        while let Some(record) = read_record(&mut reader)? {
            let payload = match record {
                Record::Intact(payload) => payload,
                Record::Corrupt => {
                    tracing::warn!(path = %path.display(), replayed = events.len(), "corrupt journal entry, stopping replay");
                    break;
                }
            };
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "undecodable journal entry, stopping replay");
                    break;
                }
            }
            valid_len += 8 + payload.len() as u64;
        }
        Ok((events, valid_len))
    }
}

/// Fsync the directory holding `path` so a rename inside it is durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Claim, Policy, Reservation, Span};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("reserva_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn replay(path: &Path) -> Vec<Event> {
        Wal::scan(path).unwrap().0
    }

    fn created(id: Ulid) -> Event {
        Event::ResourceCreated {
            id,
            name: Some("Room 101".into()),
            policy: Policy::Window,
        }
    }

    fn confirmed(resource_id: Ulid, start: i64, end: i64) -> Event {
        let mut reservation =
            Reservation::pending(resource_id, "carol".into(), Claim::Window(Span::new(start, end)), 0);
        reservation.confirm();
        Event::ReservationConfirmed { reservation }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let rid = Ulid::new();
        let events = vec![
            created(rid),
            confirmed(rid, 1000, 2000),
            Event::ResourceCreated {
                id: Ulid::new(),
                name: None,
                policy: Policy::Pool { capacity: 40 },
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(replay(&path), events);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let event = created(Ulid::new());

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }

        // Half of a second entry, as if the process died mid-write.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0x20, 0, 0, 0, 1, 2]).unwrap();
        }

        assert_eq!(replay(&path), vec![event]);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(replay(&path).is_empty());
    }

    #[test]
    fn replay_stops_at_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let good = created(Ulid::new());
        let bad = Event::ResourceDeleted { id: Ulid::new() };

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&bad).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(replay(&path), vec![good]);
    }

    #[test]
    fn compact_shrinks_log_and_accepts_appends() {
        let path = tmp_path("compact.wal");
        let rid = Ulid::new();

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&created(rid)).unwrap();
        for i in 0..10 {
            let e = confirmed(rid, i * 100, i * 100 + 50);
            let id = match &e {
                Event::ReservationConfirmed { reservation } => reservation.id,
                _ => unreachable!(),
            };
            wal.append(&e).unwrap();
            wal.append(&Event::ReservationCancelled { id, resource_id: rid, at: 1 }).unwrap();
        }
        assert_eq!(wal.appends_since_compact(), 21);
        let before = fs::metadata(&path).unwrap().len();

        let compacted = vec![created(rid)];
        wal.compact(&compacted).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should be smaller: {after} < {before}");
        assert!(!path.with_extension("wal.tmp").exists());

        let late = confirmed(rid, 5000, 6000);
        wal.append(&late).unwrap();
        drop(wal);

        assert_eq!(replay(&path), vec![compacted[0].clone(), late]);
    }

    #[test]
    fn recover_truncates_torn_tail() {
        let path = tmp_path("recover.wal");
        let first = created(Ulid::new());
        let second = created(Ulid::new());

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        let clean_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0x20, 0, 0]).unwrap();
        }

        assert_eq!(Wal::recover(&path).unwrap(), vec![first.clone()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), clean_len);

        // Appends after recovery are readable again.
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }
        assert_eq!(replay(&path), vec![first, second]);
    }

    #[test]
    fn torn_bytes_mid_log_do_not_strand_later_appends() {
        let path = tmp_path("torn_middle.wal");
        let first = created(Ulid::new());
        let second = confirmed(Ulid::new(), 100, 200);
        let third = created(Ulid::new());

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&first).unwrap();
        let acknowledged = fs::metadata(&path).unwrap().len();

        // Leftovers of an append that failed halfway through.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0x40, 0, 0, 0, 9, 9, 9]).unwrap();
        }
        assert!(fs::metadata(&path).unwrap().len() > acknowledged);

        wal.append(&second).unwrap();
        wal.append(&third).unwrap();
        drop(wal);

        let expected = vec![first, second, third];
        assert_eq!(Wal::recover(&path).unwrap(), expected);
        assert_eq!(replay(&path), expected);
    }

    #[test]
    fn short_append_over_longer_leftovers_trims_them() {
        let path = tmp_path("trim_leftovers.wal");
        let first = created(Ulid::new());
        let small = Event::ResourceDeleted { id: Ulid::new() };

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&first).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0xAB; 512]).unwrap();
        }
        wal.append(&small).unwrap();
        let expected_len = fs::metadata(&path).unwrap().len();
        drop(wal);

        assert_eq!(Wal::recover(&path).unwrap(), vec![first, small]);
        assert_eq!(fs::metadata(&path).unwrap().len(), expected_len);
    }
}
