use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Append-only write-ahead log for booking events.
///
/// Entry layout: `[u32: len][bincode: Event][u32: crc32]` where `len`
/// covers only the bincode payload. A crash mid-write leaves a truncated
/// or CRC-mismatched tail, which replay silently drops.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_snapshot: u64,
}

fn write_entry(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_snapshot: 0,
        })
    }

    /// Buffer one event without flushing. Durable only after `flush_sync`;
    /// the store's writer task batches appends for group commit.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_entry(&mut self.writer, event)?;
        self.appends_since_snapshot += 1;
        Ok(())
    }

    /// Flush buffered entries and fsync.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Append a single event durably. Test convenience — production goes
    /// through `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_snapshot(&self) -> u64 {
        self.appends_since_snapshot
    }

    /// Phase 1 of snapshotting: write the replacement log to a temp file
    /// and fsync it. Slow I/O — run outside the writer's append path.
    pub fn write_snapshot_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp)?);
        for event in events {
            write_entry(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Phase 2: atomically rename the temp file over the live WAL and
    /// reopen for appending.
    pub fn swap_snapshot_file(&mut self) -> io::Result<()> {
        let tmp = self.path.with_extension("wal.tmp");
        fs::rename(&tmp, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_snapshot = 0;
        Ok(())
    }

    /// Both snapshot phases in one call. Test convenience.
    #[cfg(test)]
    pub fn snapshot(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_snapshot_file(&self.path, events)?;
        self.swap_snapshot_file()
    }

    /// Read back every valid event. Stops at the first truncated or
    /// corrupt entry; a missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }

            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, Span};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomlock_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn created(start: i64, end: i64) -> Event {
        Event::BookingCreated {
            booking: Booking {
                id: Ulid::new(),
                room_id: Ulid::new(),
                user_id: Ulid::new(),
                span: Span::new(start, end),
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![
            created(1000, 2000),
            Event::BookingCancelled { id: Ulid::new(), room_id: Ulid::new() },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_drops_truncated_tail() {
        let path = tmp_path("truncated.wal");
        let event = created(1000, 2000);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            // Partial length prefix plus stray bytes, as after a crash.
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        let payload = bincode::serialize(&created(0, 100)).unwrap();
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn snapshot_shrinks_log_and_resets_counter() {
        let path = tmp_path("snapshot.wal");
        let keep = created(0, 1000);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&keep).unwrap();
            // Churn: create and cancel repeatedly.
            for _ in 0..10 {
                let e = created(2000, 3000);
                let (id, room_id) = match &e {
                    Event::BookingCreated { booking } => (booking.id, booking.room_id),
                    _ => unreachable!(),
                };
                wal.append(&e).unwrap();
                wal.append(&Event::BookingCancelled { id, room_id }).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();

            wal.snapshot(std::slice::from_ref(&keep)).unwrap();
            assert_eq!(wal.appends_since_snapshot(), 0);

            let after = fs::metadata(&path).unwrap().len();
            assert!(after < before, "snapshot should shrink the log: {after} < {before}");
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![keep]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_after_snapshot() {
        let path = tmp_path("snapshot_append.wal");
        let base = created(0, 1000);
        let extra = created(5000, 6000);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&base).unwrap();
            wal.snapshot(std::slice::from_ref(&base)).unwrap();
            wal.append(&extra).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![base, extra]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_visible_after_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..5).map(|i| created(i * 100, i * 100 + 50)).collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_snapshot(), 5);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }
}
