//! Open datafile handles, shared between reads and closed when idle.
//!
//! There is at most one handle per (dataset, subdirectory, filename). Each slot has its own
//! async lock which a read holds for its whole duration, so a handle can never be closed
//! under a reader. Idle slots are dropped from the table by one periodic sweep, which closes
//! their handles and skips any slot a reader still holds.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt as _;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

use crate::exchange::{DescriptorSource, ExchangeError};

/// How long a handle may sit unused before it is closed.
pub const IDLE_WINDOW: Duration = Duration::from_secs(30);

/// Identifies a handle slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandleKey {
    /// Dataset the file lives in.
    pub dataset_id: u64,
    /// Slash-joined subdirectory inside the dataset, empty for the top level.
    pub subdirectory: String,
    /// File name.
    pub filename: String,
}

/// Everything needed to open the file behind a [`HandleKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleTarget {
    /// The slot.
    pub key: HandleKey,
    /// Experiment the file is reached through.
    pub experiment_id: u64,
    /// The datafile.
    pub datafile_id: u64,
}

/// Failures reading through a handle.
#[derive(Debug, Error)]
pub enum HandleError {
    /// No descriptor could be obtained.
    #[error(transparent)]
    Open(#[from] ExchangeError),

    /// The descriptor was obtained but reading from it failed.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
}

/// An open datafile.
#[derive(Debug)]
struct RemoteFileHandle {
    datafile_id: u64,
    file: Arc<File>,
}

#[derive(Debug)]
struct Slot {
    handle: Mutex<Option<RemoteFileHandle>>,
    last_used: parking_lot::Mutex<Instant>,
}

impl Slot {
    fn new() -> Self {
        Self {
            handle: Mutex::new(None),
            last_used: parking_lot::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }
}

/// The table of open handles.
pub struct HandleTable<S: DescriptorSource> {
    source: S,
    slots: scc::HashMap<HandleKey, Arc<Slot>>,
    idle_window: Duration,
}

impl<S: DescriptorSource> HandleTable<S> {
    /// An empty table opening files through `source`.
    #[must_use]
    pub fn new(source: S) -> Self {
        Self::with_idle_window(source, IDLE_WINDOW)
    }

    /// An empty table with a non-default idle window.
    #[must_use]
    pub fn with_idle_window(source: S, idle_window: Duration) -> Self {
        Self {
            source,
            slots: scc::HashMap::new(),
            idle_window,
        }
    }

    /// Where descriptors come from.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The idle window in force.
    #[must_use]
    pub fn idle_window(&self) -> Duration {
        self.idle_window
    }

    async fn slot(&self, key: &HandleKey) -> Arc<Slot> {
        if let Some(slot) = self.slots.read_async(key, |_, s| Arc::clone(s)).await {
            return slot;
        }
        Arc::clone(
            self.slots
                .entry_async(key.clone())
                .await
                .or_insert_with(|| Arc::new(Slot::new()))
                .get(),
        )
    }

    /// Read up to `len` bytes at `offset`, opening the file if needed.
    ///
    /// Fewer bytes are returned only at end of file.
    #[instrument(name = "HandleTable::read", skip(self), fields(datafile_id = target.datafile_id))]
    pub async fn read(
        &self,
        target: &HandleTarget,
        offset: u64,
        len: usize,
    ) -> Result<Bytes, HandleError> {
        let slot = self.slot(&target.key).await;
        let mut guard = slot.handle.lock().await;

        if guard.is_some() && slot.idle_for() > self.idle_window {
            debug!("handle went idle; reopening");
            *guard = None;
        }
        if guard
            .as_ref()
            .is_some_and(|h| h.datafile_id != target.datafile_id)
        {
            debug!("datafile behind this path changed; reopening");
            *guard = None;
        }

        let file = match guard.as_ref() {
            Some(handle) => Arc::clone(&handle.file),
            None => {
                let fd = self
                    .source
                    .open(target.experiment_id, target.datafile_id)
                    .await?;
                let file = Arc::new(File::from(fd));
                *guard = Some(RemoteFileHandle {
                    datafile_id: target.datafile_id,
                    file: Arc::clone(&file),
                });
                file
            }
        };

        let data = tokio::task::spawn_blocking(move || read_at_most(&file, offset, len))
            .await
            .map_err(|e| HandleError::Read(io::Error::other(e)))?
            .map_err(HandleError::Read)?;
        slot.touch();
        drop(guard);

        trace!(bytes = data.len(), "read complete");
        Ok(data)
    }

    /// Close and forget every slot idle for longer than the window. Slots a reader holds are
    /// skipped.
    ///
    /// Returns how many open handles were closed.
    pub fn sweep_idle(&self) -> usize {
        let mut keys = Vec::new();
        self.slots.iter_sync(|key, _| {
            keys.push(key.clone());
            true
        });

        let mut closed = 0;
        for key in keys {
            // The map's own reference is the only one, so no reader can be inside or waiting.
            let removed = self.slots.remove_if_sync(&key, |slot| {
                Arc::strong_count(slot) == 1 && slot.idle_for() > self.idle_window
            });
            if let Some((_, slot)) = removed
                && slot.handle.try_lock().is_ok_and(|h| h.is_some())
            {
                closed += 1;
            }
        }
        if closed > 0 {
            debug!(closed, "closed idle handles");
        }
        closed
    }

    /// Number of paths the table keeps a slot for, open or not.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.slots.len()
    }

    /// Number of handles currently open. Slots being read are counted as open.
    #[must_use]
    pub fn open_count(&self) -> usize {
        let mut count = 0;
        self.slots.iter_sync(|_, slot| {
            if slot.handle.try_lock().map_or(true, |h| h.is_some()) {
                count += 1;
            }
            true
        });
        count
    }
}

impl<S: DescriptorSource> HandleTable<S> {
    /// Sweep every `period` until the table is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let table: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(table) = table.upgrade() else {
                    break;
                };
                table.sweep_idle();
            }
        })
    }
}

fn read_at_most(file: &File, offset: u64, len: usize) -> io::Result<Bytes> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}
