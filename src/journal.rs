use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::model::Event;
use crate::wal::Wal;

/// Durable record of ledger events.
///
/// The ledger appends while holding the affected resource's lock and applies
/// the change only after `append` returns `Ok`. `compact` is never called
/// concurrently with `append`.
pub trait Journal: Send + Sync {
    fn append(&self, event: &Event) -> io::Result<()>;

    /// Replace the journal with `events`, which recreate the current state.
    fn compact(&self, events: &[Event]) -> io::Result<()>;

    fn appends_since_compact(&self) -> u64;
}

/// Journal for purely in-memory ledgers.
#[derive(Debug, Default)]
pub struct NullJournal {
    appends: AtomicU64,
}

impl Journal for NullJournal {
    fn append(&self, _event: &Event) -> io::Result<()> {
        self.appends.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn compact(&self, _events: &[Event]) -> io::Result<()> {
        self.appends.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn appends_since_compact(&self) -> u64 {
        self.appends.load(Ordering::Relaxed)
    }
}

/// Journal backed by an fsynced [`Wal`] file.
pub struct FileJournal {
    wal: Mutex<Wal>,
}

impl FileJournal {
    /// Replay the log at `path`, then open it for appending.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let events = Wal::recover(path)?;
        let wal = Wal::open(path)?;
        Ok((
            Self {
                wal: Mutex::new(wal),
            },
            events,
        ))
    }

    fn wal(&self) -> std::sync::MutexGuard<'_, Wal> {
        // Wal state is only replaced after the I/O it depends on succeeded.
        self.wal.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Journal for FileJournal {
    fn append(&self, event: &Event) -> io::Result<()> {
        let start = Instant::now();
        let result = self.wal().append(event);
        metrics::histogram!(crate::observability::JOURNAL_APPEND_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        result
    }

    fn compact(&self, events: &[Event]) -> io::Result<()> {
        self.wal().compact(events)
    }

    fn appends_since_compact(&self) -> u64 {
        self.wal().appends_since_compact()
    }
}
