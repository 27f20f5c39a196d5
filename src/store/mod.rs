mod error;
mod locks;
mod tables;
#[cfg(test)]
mod tests;
mod tx;
mod writer;

pub use error::StoreError;
pub use locks::LockKey;
pub use tx::{NewBooking, NewPayment, Transaction};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use locks::LockRegistry;
use tables::Tables;
#[cfg(test)]
use writer::TestHooks;
use writer::{WalCommand, WalWriter};

// ── Sequences ────────────────────────────────────────────

#[derive(Default)]
struct Sequences {
    schedule: AtomicI64,
    booking: AtomicI64,
    addon: AtomicI64,
    payment: AtomicI64,
    notification: AtomicI64,
}

fn next(seq: &AtomicI64) -> Id {
    seq.fetch_add(1, Ordering::Relaxed) + 1
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long `begin` waits for each advisory lock.
    pub lock_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Transactional in-memory store backed by a write-ahead log.
///
/// Committed state lives behind one `RwLock`. Writers stage rows in a
/// [`Transaction`] and hand them to the WAL writer task as a single record; the
/// writer checks, persists and applies whole records in group commits, so
/// readers never observe part of a write-set. Conflicting writers are
/// serialized earlier, at `begin`, by advisory locks.
pub struct Store {
    tables: Arc<RwLock<Tables>>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    locks: LockRegistry,
    sequences: Sequences,
    lock_timeout: Duration,
    #[cfg(test)]
    hooks: Arc<TestHooks>,
}

impl Store {
    /// Replay the WAL at `wal_path` and start the group-commit writer. Must run
    /// inside a Tokio runtime.
    pub fn open(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        options: StoreOptions,
    ) -> io::Result<Self> {
        let records = Wal::replay(&wal_path)?;
        let mut tables = Tables::default();
        let mut events = 0usize;
        for record in &records {
            for event in record {
                tables.apply(event);
                events += 1;
            }
        }
        tracing::info!(
            "replayed {} WAL records ({events} events) from {}",
            records.len(),
            wal_path.display()
        );

        let sequences = Sequences::default();
        let max = tables.max_ids();
        sequences.schedule.store(max.schedule, Ordering::Relaxed);
        sequences.booking.store(max.booking, Ordering::Relaxed);
        sequences.addon.store(max.addon, Ordering::Relaxed);
        sequences.payment.store(max.payment, Ordering::Relaxed);
        sequences.notification.store(max.notification, Ordering::Relaxed);

        let wal = Wal::open(&wal_path)?;
        let tables = Arc::new(RwLock::new(tables));
        let writer = WalWriter::new(wal, tables.clone(), notify.clone());
        #[cfg(test)]
        let hooks = writer.hooks.clone();
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(writer.run(wal_rx));

        Ok(Self {
            tables,
            wal_tx,
            notify,
            locks: LockRegistry::new(),
            sequences,
            lock_timeout: options.lock_timeout,
            #[cfg(test)]
            hooks,
        })
    }

    /// Check, persist, apply and publish one write-set through the group-commit
    /// writer. Nothing becomes visible unless the whole record is durable; once
    /// this returns Ok the rows are readable.
    pub(crate) async fn commit_events(&self, events: Vec<Event>) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { record: events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
    }

    /// Make the next group commit fail after its records are buffered.
    #[cfg(test)]
    pub(crate) fn fail_next_flush(&self) {
        self.hooks.fail_next_flush.store(true, Ordering::SeqCst);
    }

    /// Group commits that reached the WAL so far.
    #[cfg(test)]
    pub(crate) fn group_commits(&self) -> usize {
        self.hooks.group_commits.load(Ordering::SeqCst)
    }

    /// Open a transaction holding the given advisory locks until it ends.
    pub async fn begin(&self, keys: Vec<LockKey>) -> Result<Transaction<'_>, StoreError> {
        let wait_start = Instant::now();
        let guards = self.locks.acquire_all(keys, self.lock_timeout).await;
        metrics::histogram!(crate::observability::LOCK_WAIT_SECONDS)
            .record(wait_start.elapsed().as_secs_f64());
        let guards = guards?;
        Ok(Transaction::new(self, guards))
    }

    pub(crate) fn next_schedule_id(&self) -> Id {
        next(&self.sequences.schedule)
    }

    pub(crate) fn next_booking_id(&self) -> Id {
        next(&self.sequences.booking)
    }

    pub(crate) fn next_addon_id(&self) -> Id {
        next(&self.sequences.addon)
    }

    pub(crate) fn next_payment_id(&self) -> Id {
        next(&self.sequences.payment)
    }

    pub(crate) fn next_notification_id(&self) -> Id {
        next(&self.sequences.notification)
    }

    pub(crate) async fn read_tables(&self) -> tokio::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().await
    }

    // ── Admin operations ─────────────────────────────────

    pub async fn create_studio(
        &self,
        id: Id,
        owner_id: Option<Id>,
        name: String,
    ) -> Result<(), StoreError> {
        if id <= 0 {
            return Err(StoreError::InvalidValue("studio id must be positive".into()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(StoreError::InvalidValue("studio name too long".into()));
        }
        self.commit_events(vec![Event::StudioCreated(Studio { id, owner_id, name })])
            .await
    }

    pub async fn create_instrument(&self, instrument: Instrument) -> Result<(), StoreError> {
        if instrument.id <= 0 {
            return Err(StoreError::InvalidValue("instrument id must be positive".into()));
        }
        if instrument.name.len() > MAX_NAME_LEN {
            return Err(StoreError::InvalidValue("instrument name too long".into()));
        }
        if instrument.total_quantity > MAX_INSTRUMENT_QUANTITY {
            return Err(StoreError::InvalidValue("instrument quantity too large".into()));
        }
        if !instrument.price_per_hour.is_finite() || instrument.price_per_hour < 0.0 {
            return Err(StoreError::InvalidValue(
                "instrument price must be a non-negative number".into(),
            ));
        }
        self.commit_events(vec![Event::InstrumentCreated(instrument)]).await
    }

    pub async fn set_instrument_active(&self, id: Id, active: bool) -> Result<(), StoreError> {
        self.commit_events(vec![Event::InstrumentActivation { id, active }])
            .await
    }

    /// Status transition hook for downstream workflows. Cancelling releases the
    /// booking's schedule slot, instrument quantity and pending payments.
    pub async fn set_booking_status(&self, id: Id, status: BookingStatus) -> Result<(), StoreError> {
        self.commit_events(vec![Event::BookingStatusChanged { id, status }])
            .await?;
        tracing::info!(booking_id = id, %status, "booking status changed");
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────

    pub async fn studio(&self, id: Id) -> Option<Studio> {
        self.tables.read().await.studios.get(&id).cloned()
    }

    pub async fn instrument(&self, id: Id) -> Option<Instrument> {
        self.tables.read().await.instruments.get(&id).cloned()
    }

    pub async fn booking(&self, id: Id) -> Option<Booking> {
        self.tables.read().await.bookings.get(&id).cloned()
    }

    pub async fn studios(&self) -> Vec<Studio> {
        self.tables.read().await.studios.values().cloned().collect()
    }

    pub async fn instruments(&self) -> Vec<Instrument> {
        self.tables.read().await.instruments.values().cloned().collect()
    }

    pub async fn schedules(&self) -> Vec<Schedule> {
        self.tables.read().await.schedules.values().cloned().collect()
    }

    pub async fn bookings(&self) -> Vec<Booking> {
        self.tables.read().await.bookings.values().cloned().collect()
    }

    pub async fn addons(&self) -> Vec<BookingAddon> {
        self.tables.read().await.addons.values().cloned().collect()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.tables.read().await.payments.values().cloned().collect()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.tables.read().await.notifications.values().cloned().collect()
    }

    /// Reservations held by active bookings on one instrument and date.
    pub async fn instrument_reservations(&self, instrument_id: Id, date: NaiveDate) -> Vec<Reservation> {
        let whole_day = Span::new(Ms::MIN, Ms::MAX);
        self.tables
            .read()
            .await
            .active_reservations(instrument_id, date, &whole_day)
            .copied()
            .collect()
    }

    // ── Maintenance ──────────────────────────────────────

    /// Rewrite the WAL as a snapshot of the current tables. The writer task takes
    /// the snapshot itself, between group commits.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Drop idle advisory lock entries.
    pub fn prune_locks(&self) {
        self.locks.prune();
    }
}
