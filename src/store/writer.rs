//! Group-commit WAL writer. The only task that mutates committed tables once
//! the store is open.

use std::io;
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, RwLock};

use crate::model::Event;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use super::StoreError;
use super::tables::{CommitBatch, Tables};

pub(super) enum WalCommand {
    Append {
        record: Vec<Event>,
        response: oneshot::Sender<Result<(), StoreError>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Failure injection and counters for store tests.
#[cfg(test)]
#[derive(Default)]
pub(super) struct TestHooks {
    pub(super) fail_next_flush: AtomicBool,
    pub(super) group_commits: AtomicUsize,
}

type PendingAppend = (Vec<Event>, oneshot::Sender<Result<(), StoreError>>);

pub(super) struct WalWriter {
    wal: Wal,
    tables: Arc<RwLock<Tables>>,
    notify: Arc<NotifyHub>,
    #[cfg(test)]
    pub(super) hooks: Arc<TestHooks>,
}

impl WalWriter {
    pub(super) fn new(wal: Wal, tables: Arc<RwLock<Tables>>, notify: Arc<NotifyHub>) -> Self {
        Self {
            wal,
            tables,
            notify,
            #[cfg(test)]
            hooks: Arc::default(),
        }
    }

    /// Batches appends for group commit.
    /// 1. Block until the first Append arrives.
    /// 2. Drain all immediately available Appends (the batch window).
    /// 3. Check each record against committed state and the records accepted
    ///    before it; rejected records are answered and never written.
    /// 4. Buffer the accepted records and flush_sync once for the whole batch.
    /// 5. Apply, publish notifications, respond to all senders.
    pub(super) async fn run(mut self, mut rx: mpsc::Receiver<WalCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WalCommand::Append { record, response } => {
                    let mut batch = vec![(record, response)];
                    let mut deferred = None;

                    loop {
                        match rx.try_recv() {
                            Ok(WalCommand::Append { record, response }) => {
                                batch.push((record, response));
                            }
                            Ok(other) => {
                                deferred = Some(other);
                                break;
                            }
                            Err(_) => break,
                        }
                    }

                    self.commit_batch(batch).await;
                    if let Some(other) = deferred {
                        self.handle_other(other).await;
                    }
                }
                other => self.handle_other(other).await,
            }
        }
    }

    async fn commit_batch(&mut self, batch: Vec<PendingAppend>) {
        let mut accepted = Vec::with_capacity(batch.len());
        {
            let tables = self.tables.read().await;
            let mut checked = CommitBatch::default();
            for (record, response) in batch {
                match tables.check_commit(&record, &mut checked) {
                    Ok(()) => accepted.push((record, response)),
                    Err(e) => {
                        let _ = response.send(Err(e));
                    }
                }
            }
        }
        if accepted.is_empty() {
            return;
        }
        #[cfg(test)]
        self.hooks.group_commits.fetch_add(1, Ordering::SeqCst);

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
            .record(accepted.len() as f64);
        let flush_start = Instant::now();
        let result = self.write_batch(&accepted);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        if let Err(e) = result {
            tracing::error!("WAL flush of {} records failed: {e}", accepted.len());
            for (_, response) in accepted {
                let _ = response.send(Err(StoreError::Wal(e.to_string())));
            }
            return;
        }

        {
            let mut tables = self.tables.write().await;
            for (record, _) in &accepted {
                for event in record {
                    tables.apply(event);
                }
            }
        }
        for (record, response) in accepted {
            for event in &record {
                if let Event::NotificationInserted(notification) = event {
                    self.notify.send(notification);
                }
            }
            let _ = response.send(Ok(()));
        }
    }

    /// Append and fsync the batch. On any error the log is cut back to where it
    /// was, so a failed batch leaves no bytes ahead of the next record.
    fn write_batch(&mut self, batch: &[PendingAppend]) -> io::Result<()> {
        let mark = self.wal.mark()?;
        let result = self.append_and_sync(batch);
        if result.is_err() {
            // rollback_to logs and poisons the WAL itself if it fails.
            let _ = self.wal.rollback_to(mark);
        }
        result
    }

    fn append_and_sync(&mut self, batch: &[PendingAppend]) -> io::Result<()> {
        for (record, _) in batch {
            self.wal.append_buffered(record)?;
        }
        #[cfg(test)]
        if self.hooks.fail_next_flush.swap(false, Ordering::SeqCst) {
            return Err(io::Error::other("injected flush failure"));
        }
        self.wal.flush_sync()
    }

    async fn handle_other(&mut self, cmd: WalCommand) {
        match cmd {
            WalCommand::Compact { response } => {
                // No commit can land between snapshot and swap: this task is the
                // only writer.
                let snapshot = self.tables.read().await.snapshot();
                let result = Wal::write_compact_file(self.wal.path(), &snapshot)
                    .and_then(|()| self.wal.swap_compact_file());
                let _ = response.send(result);
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(self.wal.appends_since_compact());
            }
            WalCommand::Append { record, response } => {
                self.commit_batch(vec![(record, response)]).await;
            }
        }
    }
}
