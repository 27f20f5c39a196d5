use super::*;

const H: Ms = MS_PER_HOUR;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("studiobook_test_store");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn open(path: &PathBuf) -> Store {
    Store::open(path.clone(), Arc::new(NotifyHub::new()), StoreOptions::default()).unwrap()
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 11, 2).unwrap()
}

fn guitar(studio_id: Id, quantity: u32) -> Instrument {
    Instrument {
        id: 5,
        studio_id,
        name: "Guitar".into(),
        total_quantity: quantity,
        price_per_hour: 10.0,
        active: true,
    }
}

async fn seeded(path: &PathBuf) -> Store {
    let store = open(path);
    store.create_studio(1, Some(10), "Studio A".into()).await.unwrap();
    store.create_instrument(guitar(1, 2)).await.unwrap();
    store
}

fn new_booking(schedule_id: Id) -> NewBooking {
    NewBooking {
        client_id: 7,
        studio_id: 1,
        schedule_id,
        service_id: 1,
        service_name: "Recording".into(),
        instructor_id: None,
        total_price: 40.0,
    }
}

/// Stage schedule + booking + add-on for one slot and return the booking id.
async fn stage_slot(tx: &mut Transaction<'_>, span: Span, quantity: u32) -> Id {
    let schedule_id = tx.insert_schedule(1, 10, date(), span).await.unwrap();
    let booking_id = tx.insert_booking(new_booking(schedule_id)).await.unwrap();
    tx.insert_addon(booking_id, 5, quantity, 20.0).await.unwrap();
    booking_id
}

#[tokio::test]
async fn admin_rows_visible_after_create() {
    let path = test_wal_path("admin_rows.wal");
    let store = seeded(&path).await;

    assert_eq!(store.studio(1).await.unwrap().owner_id, Some(10));
    assert_eq!(store.instruments().await.len(), 1);

    let dup = store.create_studio(1, None, "Again".into()).await;
    assert_eq!(dup, Err(StoreError::AlreadyExists { table: "studios", id: 1 }));
}

#[tokio::test]
async fn instrument_requires_existing_studio() {
    let path = test_wal_path("instrument_fk.wal");
    let store = open(&path);
    let result = store.create_instrument(guitar(99, 1)).await;
    assert!(matches!(result, Err(StoreError::ForeignKey(_))));
}

#[tokio::test]
async fn instrument_rejects_bad_price() {
    let path = test_wal_path("instrument_price.wal");
    let store = open(&path);
    store.create_studio(1, Some(10), "A".into()).await.unwrap();
    let mut instrument = guitar(1, 1);
    instrument.price_per_hour = f64::NAN;
    assert!(matches!(
        store.create_instrument(instrument).await,
        Err(StoreError::InvalidValue(_))
    ));
}

#[tokio::test]
async fn commit_publishes_all_rows() {
    let path = test_wal_path("commit_all.wal");
    let store = seeded(&path).await;

    let mut tx = store.begin(vec![]).await.unwrap();
    let booking_id = stage_slot(&mut tx, Span::new(10 * H, 12 * H), 1).await;
    tx.insert_payment(NewPayment {
        payment_group: "PG-1".into(),
        booking_id,
        owner_id: 10,
        initial_amount: 15.0,
        total_amount: 60.0,
    })
    .await
    .unwrap();
    tx.insert_notification(10, 7, booking_id, "New booking".into())
        .await
        .unwrap();

    // Nothing visible before commit.
    assert!(store.bookings().await.is_empty());
    tx.commit().await.unwrap();

    assert_eq!(store.schedules().await.len(), 1);
    assert_eq!(store.bookings().await.len(), 1);
    assert_eq!(store.addons().await.len(), 1);
    assert_eq!(store.payments().await.len(), 1);
    assert_eq!(store.notifications().await.len(), 1);
    assert_eq!(store.booking(booking_id).await.unwrap().status, BookingStatus::Pending);
}

#[tokio::test]
async fn dropped_transaction_leaves_nothing() {
    let path = test_wal_path("dropped_tx.wal");
    let store = seeded(&path).await;

    {
        let mut tx = store.begin(vec![]).await.unwrap();
        stage_slot(&mut tx, Span::new(10 * H, 12 * H), 1).await;
    }
    let tx = store.begin(vec![]).await.unwrap();
    tx.rollback();

    assert!(store.schedules().await.is_empty());
    assert!(store.bookings().await.is_empty());
    assert!(store.addons().await.is_empty());
}

#[tokio::test]
async fn staged_reservations_count_in_same_transaction() {
    let path = test_wal_path("staged_reservations.wal");
    let store = seeded(&path).await;

    let mut tx = store.begin(vec![]).await.unwrap();
    stage_slot(&mut tx, Span::new(10 * H, 12 * H), 2).await;

    let overlapping = Span::new(11 * H, 13 * H);
    assert_eq!(tx.reserved_quantity(5, date(), &overlapping).await, 2);
    assert_eq!(tx.reserved_quantity(5, date(), &Span::new(12 * H, 13 * H)).await, 0);
    // Committed view is untouched until commit.
    assert!(store.instrument_reservations(5, date()).await.is_empty());
}

#[tokio::test]
async fn duplicate_schedule_rejected_in_transaction_and_against_committed() {
    let path = test_wal_path("dup_schedule.wal");
    let store = seeded(&path).await;
    let span = Span::new(10 * H, 12 * H);

    let mut tx = store.begin(vec![]).await.unwrap();
    tx.insert_schedule(1, 10, date(), span).await.unwrap();
    let twin = tx.insert_schedule(1, 10, date(), span).await;
    assert!(matches!(twin, Err(StoreError::UniqueViolation(_))));
    tx.commit().await.unwrap();

    let mut tx = store.begin(vec![]).await.unwrap();
    let again = tx.insert_schedule(1, 10, date(), span).await;
    assert!(matches!(again, Err(StoreError::UniqueViolation(_))));
    // A different span on the same day is fine.
    tx.insert_schedule(1, 10, date(), Span::new(12 * H, 13 * H))
        .await
        .unwrap();
}

#[tokio::test]
async fn commit_rechecks_schedule_uniqueness() {
    let path = test_wal_path("commit_recheck.wal");
    let store = seeded(&path).await;
    let span = Span::new(10 * H, 12 * H);

    let mut first = store.begin(vec![]).await.unwrap();
    let mut second = store.begin(vec![]).await.unwrap();
    first.insert_schedule(1, 10, date(), span).await.unwrap();
    second.insert_schedule(1, 10, date(), span).await.unwrap();

    first.commit().await.unwrap();
    let result = second.commit().await;
    assert!(matches!(result, Err(StoreError::UniqueViolation(_))));
    assert_eq!(store.schedules().await.len(), 1);
}

#[tokio::test]
async fn foreign_keys_checked_on_stage() {
    let path = test_wal_path("fk_stage.wal");
    let store = seeded(&path).await;
    let mut tx = store.begin(vec![]).await.unwrap();

    assert!(matches!(
        tx.insert_schedule(42, 10, date(), Span::new(0, H)).await,
        Err(StoreError::ForeignKey(_))
    ));
    assert!(matches!(
        tx.insert_booking(new_booking(999)).await,
        Err(StoreError::ForeignKey(_))
    ));
    assert!(matches!(
        tx.insert_addon(999, 5, 1, 0.0).await,
        Err(StoreError::ForeignKey(_))
    ));
    assert!(matches!(
        tx.insert_notification(10, 7, 999, "x".into()).await,
        Err(StoreError::ForeignKey(_))
    ));
    assert_eq!(tx.staged_len(), 0);
}

#[tokio::test]
async fn cancelling_frees_inventory() {
    let path = test_wal_path("cancel_frees.wal");
    let store = seeded(&path).await;
    let span = Span::new(10 * H, 12 * H);

    let mut tx = store.begin(vec![]).await.unwrap();
    let booking_id = stage_slot(&mut tx, span, 2).await;
    tx.commit().await.unwrap();
    assert_eq!(store.instrument_reservations(5, date()).await.len(), 1);

    store
        .set_booking_status(booking_id, BookingStatus::Cancelled)
        .await
        .unwrap();
    assert!(store.instrument_reservations(5, date()).await.is_empty());

    // The released slot can be booked again.
    let mut tx = store.begin(vec![]).await.unwrap();
    stage_slot(&mut tx, span, 2).await;
    tx.commit().await.unwrap();

    let undo = store.set_booking_status(booking_id, BookingStatus::Pending).await;
    assert!(matches!(undo, Err(StoreError::InvalidTransition { .. })));
}

#[tokio::test]
async fn notification_published_after_commit_only() {
    let path = test_wal_path("notify_commit.wal");
    let store = seeded(&path).await;
    let mut rx = store.notify.subscribe(10);

    {
        let mut tx = store.begin(vec![]).await.unwrap();
        let booking_id = stage_slot(&mut tx, Span::new(8 * H, 9 * H), 1).await;
        tx.insert_notification(10, 7, booking_id, "dropped".into())
            .await
            .unwrap();
    }
    assert!(rx.try_recv().is_err());

    let mut tx = store.begin(vec![]).await.unwrap();
    let booking_id = stage_slot(&mut tx, Span::new(10 * H, 12 * H), 1).await;
    tx.insert_notification(10, 7, booking_id, "kept".into())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let received = rx.recv().await.unwrap();
    assert_eq!(received.message, "kept");
}

#[tokio::test]
async fn begin_times_out_on_held_lock() {
    let path = test_wal_path("lock_timeout.wal");
    let store = Store::open(
        path,
        Arc::new(NotifyHub::new()),
        StoreOptions {
            lock_timeout: Duration::from_millis(30),
        },
    )
    .unwrap();
    let key = LockKey::InstrumentDay {
        instrument_id: 5,
        date: date(),
    };

    let held = store.begin(vec![key]).await.unwrap();
    let blocked = store.begin(vec![key]).await;
    assert!(matches!(blocked, Err(StoreError::LockTimeout(k)) if k == key));

    held.rollback();
    tokio_test::assert_ok!(store.begin(vec![key]).await);
}

#[tokio::test]
async fn wal_replay_restores_committed_rows_only() {
    let path = test_wal_path("replay.wal");
    let booking_id;
    {
        let store = seeded(&path).await;
        let mut tx = store.begin(vec![]).await.unwrap();
        booking_id = stage_slot(&mut tx, Span::new(10 * H, 12 * H), 1).await;
        tx.commit().await.unwrap();

        let mut abandoned = store.begin(vec![]).await.unwrap();
        stage_slot(&mut abandoned, Span::new(14 * H, 15 * H), 1).await;
        abandoned.rollback();

        store.set_booking_status(booking_id, BookingStatus::Confirmed).await.unwrap();
    }

    let store = open(&path);
    assert_eq!(store.studios().await.len(), 1);
    assert_eq!(store.schedules().await.len(), 1);
    assert_eq!(store.booking(booking_id).await.unwrap().status, BookingStatus::Confirmed);
    assert_eq!(store.schedules().await[0].status, ScheduleStatus::Confirmed);
    assert_eq!(store.instrument_reservations(5, date()).await.len(), 1);

    // Sequences resume above the highest committed id.
    let mut tx = store.begin(vec![]).await.unwrap();
    let schedule_id = tx
        .insert_schedule(1, 10, date(), Span::new(16 * H, 17 * H))
        .await
        .unwrap();
    assert!(schedule_id > store.schedules().await[0].id);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    {
        let store = seeded(&path).await;
        for hour in 0..6 {
            let mut tx = store.begin(vec![]).await.unwrap();
            stage_slot(&mut tx, Span::new(hour * H, (hour + 1) * H), 1).await;
            tx.commit().await.unwrap();
        }
        store.set_instrument_active(5, false).await.unwrap();
        assert_eq!(store.wal_appends_since_compact().await, 9);

        store.compact_wal().await.unwrap();
        assert_eq!(store.wal_appends_since_compact().await, 0);
    }

    let store = open(&path);
    assert_eq!(store.bookings().await.len(), 6);
    assert_eq!(store.instrument_reservations(5, date()).await.len(), 6);
    assert!(!store.instrument(5).await.unwrap().active);
}

#[tokio::test]
async fn concurrent_commits_share_one_group_commit() {
    let path = test_wal_path("group_commit.wal");
    let store = open(&path);

    // Every commit is queued before the writer task gets to run.
    let results = futures::future::join_all(
        (1..=16).map(|id| store.create_studio(id, None, format!("Studio {id}"))),
    )
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(store.studios().await.len(), 16);
    assert_eq!(store.group_commits(), 1);
    assert_eq!(store.wal_appends_since_compact().await, 16);
}

#[tokio::test]
async fn conflicting_records_in_one_group_commit() {
    let path = test_wal_path("group_conflict.wal");
    let store = seeded(&path).await;
    let span = Span::new(10 * H, 12 * H);
    let before = store.group_commits();

    let mut txs = Vec::new();
    for _ in 0..4 {
        let mut tx = store.begin(vec![]).await.unwrap();
        tx.insert_schedule(1, 10, date(), span).await.unwrap();
        txs.push(tx);
    }
    let results = futures::future::join_all(txs.into_iter().map(Transaction::commit)).await;

    assert!(results[0].is_ok());
    for result in &results[1..] {
        assert!(matches!(result, Err(StoreError::UniqueViolation(_))), "{result:?}");
    }
    assert_eq!(store.group_commits(), before + 1);
    assert_eq!(store.schedules().await.len(), 1);

    drop(store);
    let reopened = open(&path);
    assert_eq!(reopened.schedules().await.len(), 1);
}

#[tokio::test]
async fn failed_flush_publishes_nothing_and_log_stays_clean() {
    let path = test_wal_path("failed_flush.wal");
    let store = seeded(&path).await;
    let mut rx = store.notify.subscribe(10);

    store.fail_next_flush();
    let mut tx = store.begin(vec![]).await.unwrap();
    let booking_id = stage_slot(&mut tx, Span::new(10 * H, 12 * H), 1).await;
    tx.insert_notification(10, 7, booking_id, "lost".into()).await.unwrap();
    assert!(matches!(tx.commit().await, Err(StoreError::Wal(_))));

    assert!(store.schedules().await.is_empty());
    assert!(store.bookings().await.is_empty());
    assert!(rx.try_recv().is_err());
    assert_eq!(store.wal_appends_since_compact().await, 2);

    // The next commit lands right after the last good record.
    store.create_studio(2, Some(11), "Studio B".into()).await.unwrap();
    drop(store);
    let records = Wal::replay(&path).unwrap();
    assert_eq!(records.len(), 3);
    let reopened = open(&path);
    assert!(reopened.bookings().await.is_empty());
    assert_eq!(reopened.studios().await.len(), 2);
}
