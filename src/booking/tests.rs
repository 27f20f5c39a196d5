use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use super::inventory::reserved_timeline;
use super::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::store::{LockKey, Store, StoreOptions};

const DATE: &str = "2026-11-02";
const OWNER: Id = 10;
const CLIENT: Id = 7;
const GUITAR: Id = 5; // quantity 1, $10/h
const DRUMS: Id = 6; // quantity 2, $10/h
const FOREIGN_AMP: Id = 7; // belongs to studio 2
const RETIRED_MIC: Id = 8; // inactive

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("studiobook_test_booking");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn instrument(id: Id, studio_id: Id, quantity: u32, active: bool) -> Instrument {
    Instrument {
        id,
        studio_id,
        name: format!("instrument {id}"),
        total_quantity: quantity,
        price_per_hour: 10.0,
        active,
    }
}

async fn setup_with(path: PathBuf, options: StoreOptions) -> BookingService {
    let store = Store::open(path, Arc::new(NotifyHub::new()), options).unwrap();
    store.create_studio(1, Some(OWNER), "Studio A".into()).await.unwrap();
    store.create_studio(2, None, "Ownerless".into()).await.unwrap();
    store.create_instrument(instrument(GUITAR, 1, 1, true)).await.unwrap();
    store.create_instrument(instrument(DRUMS, 1, 2, true)).await.unwrap();
    store.create_instrument(instrument(FOREIGN_AMP, 2, 4, true)).await.unwrap();
    store.create_instrument(instrument(RETIRED_MIC, 1, 1, false)).await.unwrap();
    BookingService::new(Arc::new(store))
}

async fn setup(name: &str) -> BookingService {
    setup_with(test_wal_path(name), StoreOptions::default()).await
}

fn services() -> BTreeMap<Id, ServiceDescriptor> {
    let mut services = BTreeMap::new();
    services.insert(
        1,
        ServiceDescriptor {
            name: "Recording".into(),
            price_per_hour: 40.0,
            instructor_id: None,
        },
    );
    services.insert(
        2,
        ServiceDescriptor {
            name: "Lesson".into(),
            price_per_hour: 30.0,
            instructor_id: Some(55),
        },
    );
    services
}

fn slot(start: &str, end: &str, instruments: &[(Id, u32)]) -> SlotRequest {
    SlotRequest {
        date: DATE.into(),
        start: start.into(),
        end: end.into(),
        service_id: 1,
        instruments: instruments
            .iter()
            .map(|&(instrument_id, quantity)| InstrumentSelection {
                instrument_id,
                quantity,
            })
            .collect(),
    }
}

fn request(slots: Vec<SlotRequest>) -> BookingRequest {
    BookingRequest {
        client_id: CLIENT,
        studio_id: 1,
        services: services(),
        slots,
    }
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn date() -> NaiveDate {
    NaiveDate::parse_from_str(DATE, "%Y-%m-%d").unwrap()
}

struct Counts {
    schedules: usize,
    bookings: usize,
    addons: usize,
    payments: usize,
    notifications: usize,
}

async fn counts(service: &BookingService) -> Counts {
    let store = service.store();
    Counts {
        schedules: store.schedules().await.len(),
        bookings: store.bookings().await.len(),
        addons: store.addons().await.len(),
        payments: store.payments().await.len(),
        notifications: store.notifications().await.len(),
    }
}

fn assert_no_rows(c: &Counts) {
    assert_eq!(
        (c.schedules, c.bookings, c.addons, c.payments, c.notifications),
        (0, 0, 0, 0, 0)
    );
}

// ── Scenarios ────────────────────────────────────────────

#[tokio::test]
async fn single_slot_without_addons() {
    let service = setup("single_slot.wal").await;

    let confirmation = service
        .submit(request(vec![slot("10:00", "12:00", &[])]))
        .await
        .unwrap();

    assert_eq!(confirmation.booking_count, 1);
    assert!(approx(confirmation.total_amount, 80.0));
    assert!(approx(confirmation.initial_amount, 20.0));

    let c = counts(&service).await;
    assert_eq!((c.schedules, c.bookings, c.addons, c.payments, c.notifications), (1, 1, 0, 1, 1));

    let store = service.store();
    let booking = store.booking(confirmation.first_booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.client_id, CLIENT);
    assert_eq!(booking.service_name, "Recording");
    assert!(approx(booking.total_price, 80.0));

    let schedule = &store.schedules().await[0];
    assert_eq!(schedule.owner_id, OWNER);
    assert_eq!(schedule.status, ScheduleStatus::Reserved);

    let payment = &store.payments().await[0];
    assert_eq!(payment.payment_group, confirmation.payment_group);
    assert!(approx(payment.initial_amount, 20.0));
    assert!(approx(payment.total_amount, 80.0));
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn addon_priced_into_total_and_initial() {
    let service = setup("addon_priced.wal").await;

    let confirmation = service
        .submit(request(vec![slot("10:00", "13:00", &[(DRUMS, 2)])]))
        .await
        .unwrap();

    // 3h × $40 base + 3h × $10 × 2 drums
    assert!(approx(confirmation.total_amount, 180.0));
    assert!(approx(confirmation.initial_amount, 45.0));
    let addons = service.store().addons().await;
    assert_eq!(addons.len(), 1);
    assert_eq!(addons[0].quantity, 2);
    assert!(approx(addons[0].line_price, 60.0));
}

#[tokio::test]
async fn fully_reserved_instrument_rolls_back_whole_request() {
    let service = setup("fully_reserved.wal").await;
    service
        .submit(request(vec![slot("10:00", "12:00", &[(GUITAR, 1)])]))
        .await
        .unwrap();
    let before = counts(&service).await;

    let failure = service
        .submit(request(vec![
            slot("13:00", "14:00", &[]),
            slot("11:00", "13:00", &[(GUITAR, 1)]),
        ]))
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), "InsufficientInventory");
    assert_eq!(failure.studio_id, 1);
    let after = counts(&service).await;
    assert_eq!(
        (after.schedules, after.bookings, after.addons, after.payments, after.notifications),
        (before.schedules, before.bookings, before.addons, before.payments, before.notifications)
    );
}

#[tokio::test]
async fn multi_slot_request_shares_payment_group_and_notification() {
    let service = setup("multi_slot.wal").await;
    let mut lesson = slot("14:00", "15:00", &[]);
    lesson.service_id = 2;

    let confirmation = service
        .submit(request(vec![slot("10:00", "12:00", &[(GUITAR, 1)]), lesson]))
        .await
        .unwrap();

    assert_eq!(confirmation.booking_count, 2);
    assert_eq!(confirmation.booking_ids.len(), 2);
    assert_eq!(confirmation.first_booking_id, confirmation.booking_ids[0]);
    // 2h × 40 + 2h × 10 guitar, then 1h × 30
    assert!(approx(confirmation.total_amount, 130.0));
    assert!(approx(confirmation.initial_amount, 32.5));

    let store = service.store();
    let payments = store.payments().await;
    assert_eq!(payments.len(), 2);
    assert!(payments.iter().all(|p| p.payment_group == confirmation.payment_group));
    assert!(payments.iter().all(|p| p.owner_id == OWNER));

    let lesson_booking = store.booking(confirmation.booking_ids[1]).await.unwrap();
    assert_eq!(lesson_booking.instructor_id, Some(55));

    let notifications = store.notifications().await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].owner_id, OWNER);
    assert_eq!(notifications[0].booking_id, confirmation.first_booking_id);
    assert!(!notifications[0].read);
    assert!(notifications[0].message.contains("Recording"));
    assert!(notifications[0].message.contains("Lesson"));
}

#[tokio::test]
async fn earlier_slots_in_same_request_count_against_inventory() {
    let service = setup("same_request_inventory.wal").await;

    let failure = service
        .submit(request(vec![
            slot("10:00", "12:00", &[(GUITAR, 1)]),
            slot("11:00", "13:00", &[(GUITAR, 1)]),
        ]))
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), "InsufficientInventory");
    assert_no_rows(&counts(&service).await);
}

#[tokio::test]
async fn duplicate_selections_are_merged() {
    let service = setup("merged_selections.wal").await;

    let failure = service
        .submit(request(vec![slot("10:00", "12:00", &[(GUITAR, 1), (GUITAR, 1)])]))
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error,
        BookingError::InsufficientInventory { requested: 2, available: 1, .. }
    ));

    service
        .submit(request(vec![slot("10:00", "12:00", &[(DRUMS, 1), (DRUMS, 1)])]))
        .await
        .unwrap();
    assert_eq!(service.store().addons().await.len(), 1);
}

#[tokio::test]
async fn touching_slots_do_not_conflict() {
    let service = setup("touching.wal").await;

    let confirmation = service
        .submit(request(vec![
            slot("10:00", "12:00", &[(GUITAR, 1)]),
            slot("12:00", "14:00", &[(GUITAR, 1)]),
        ]))
        .await
        .unwrap();
    assert_eq!(confirmation.booking_count, 2);
}

// ── Failure kinds ────────────────────────────────────────

#[tokio::test]
async fn invalid_interval_writes_nothing() {
    let service = setup("invalid_interval.wal").await;

    let failure = service
        .submit(request(vec![
            slot("10:00", "12:00", &[]),
            slot("15:00", "14:00", &[]),
        ]))
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), "InvalidInterval");
    assert!(failure
        .message()
        .starts_with("An error occurred while processing your booking"));
    assert_no_rows(&counts(&service).await);
}

#[tokio::test]
async fn same_bad_request_same_error_kind() {
    let service = setup("idempotent_rejection.wal").await;
    let bad = request(vec![slot("12:00", "12:00", &[])]);

    let first = service.submit(bad.clone()).await.unwrap_err();
    let second = service.submit(bad).await.unwrap_err();

    assert_eq!(first.kind(), second.kind());
    assert_eq!(first.error, second.error);
    assert_ne!(first.reference, second.reference);
}

#[tokio::test]
async fn request_shape_rejected_before_transaction() {
    let service = setup("shape.wal").await;

    let failure = service.submit(request(vec![])).await.unwrap_err();
    assert_eq!(failure.kind(), "InvalidRequest");

    let mut no_services = request(vec![slot("10:00", "11:00", &[])]);
    no_services.services.clear();
    assert_eq!(service.submit(no_services).await.unwrap_err().kind(), "InvalidRequest");
}

#[tokio::test]
async fn unknown_service() {
    let service = setup("unknown_service.wal").await;
    let mut bad = slot("10:00", "11:00", &[]);
    bad.service_id = 99;

    let failure = service.submit(request(vec![bad])).await.unwrap_err();
    assert_eq!(failure.error, BookingError::UnknownService(99));
}

#[tokio::test]
async fn studio_without_owner() {
    let service = setup("no_owner.wal").await;
    let mut req = request(vec![slot("10:00", "11:00", &[])]);
    req.studio_id = 2;

    let failure = service.submit(req).await.unwrap_err();
    assert_eq!(failure.error, BookingError::StudioHasNoOwner(2));
    assert_eq!(failure.studio_id, 2);

    let mut missing = request(vec![slot("10:00", "11:00", &[])]);
    missing.studio_id = 404;
    assert_eq!(service.submit(missing).await.unwrap_err().kind(), "StudioHasNoOwner");
}

#[tokio::test]
async fn instrument_resolution_failures() {
    let service = setup("instrument_failures.wal").await;

    let cases = [
        (999, "InstrumentNotFound"),
        (FOREIGN_AMP, "InstrumentWrongStudio"),
        (RETIRED_MIC, "InstrumentInactive"),
    ];
    for (instrument_id, kind) in cases {
        let failure = service
            .submit(request(vec![slot("10:00", "11:00", &[(instrument_id, 1)])]))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), kind, "instrument {instrument_id}");
    }
    assert_no_rows(&counts(&service).await);
}

#[tokio::test]
async fn negative_service_price_is_invalid_pricing() {
    let service = setup("negative_price.wal").await;
    let mut req = request(vec![slot("10:00", "11:00", &[])]);
    if let Some(descriptor) = req.services.get_mut(&1) {
        descriptor.price_per_hour = -5.0;
    }

    let failure = service.submit(req).await.unwrap_err();
    assert_eq!(failure.kind(), "InvalidPricing");
    assert_no_rows(&counts(&service).await);
}

#[tokio::test]
async fn already_booked_slot_is_schedule_conflict() {
    let service = setup("schedule_conflict.wal").await;
    service
        .submit(request(vec![slot("10:00", "12:00", &[])]))
        .await
        .unwrap();

    let failure = service
        .submit(request(vec![slot("10:00", "12:00", &[])]))
        .await
        .unwrap_err();
    assert_eq!(failure.kind(), "ScheduleConflict");
    assert_eq!(service.store().bookings().await.len(), 1);
}

#[tokio::test]
async fn held_lock_times_out() {
    let options = StoreOptions {
        lock_timeout: Duration::from_millis(30),
    };
    let service = setup_with(test_wal_path("booking_lock_timeout.wal"), options).await;
    let key = LockKey::InstrumentDay {
        instrument_id: GUITAR,
        date: date(),
    };
    let held = service.store().begin(vec![key]).await.unwrap();

    let failure = service
        .submit(request(vec![slot("10:00", "11:00", &[(GUITAR, 1)])]))
        .await
        .unwrap_err();
    assert_eq!(failure.error, BookingError::LockTimeout(key));

    held.rollback();
    tokio_test::assert_ok!(
        service
            .submit(request(vec![slot("10:00", "11:00", &[(GUITAR, 1)])]))
            .await
    );
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn cancelled_booking_frees_inventory() {
    let service = setup("cancel_frees.wal").await;
    let first = service
        .submit(request(vec![slot("10:00", "12:00", &[(GUITAR, 1)])]))
        .await
        .unwrap();

    let blocked = service
        .submit(request(vec![slot("11:00", "12:00", &[(GUITAR, 1)])]))
        .await
        .unwrap_err();
    assert_eq!(blocked.kind(), "InsufficientInventory");

    service
        .store()
        .set_booking_status(first.first_booking_id, BookingStatus::Cancelled)
        .await
        .unwrap();

    service
        .submit(request(vec![slot("11:00", "12:00", &[(GUITAR, 1)])]))
        .await
        .unwrap();
}

#[tokio::test]
async fn owner_notified_after_commit() {
    let service = setup("owner_notified.wal").await;
    let mut rx = service.store().notify.subscribe(OWNER);

    let _ = service
        .submit(request(vec![slot("15:00", "14:00", &[])]))
        .await;
    assert!(rx.try_recv().is_err());

    let confirmation = service
        .submit(request(vec![slot("10:00", "11:00", &[])]))
        .await
        .unwrap();
    let notification = rx.recv().await.unwrap();
    assert_eq!(notification.booking_id, confirmation.first_booking_id);
    assert_eq!(notification.client_id, CLIENT);
}

#[tokio::test]
async fn failed_commit_after_payment_and_notification_leaves_nothing() {
    let service = setup("failed_commit.wal").await;
    let mut rx = service.store().notify.subscribe(OWNER);

    service.store().fail_next_flush();
    let failure = service
        .submit(request(vec![
            slot("10:00", "11:00", &[(GUITAR, 1)]),
            slot("12:00", "13:00", &[(DRUMS, 2)]),
        ]))
        .await
        .unwrap_err();
    assert_eq!(failure.error.kind(), "CommitFailed");

    assert_no_rows(&counts(&service).await);
    assert!(rx.try_recv().is_err());
    assert!(reserved_timeline(service.store(), GUITAR, date()).await.unwrap().is_empty());

    // The same slots are still free.
    tokio_test::assert_ok!(
        service
            .submit(request(vec![slot("10:00", "11:00", &[(GUITAR, 1)])]))
            .await
    );
    assert_eq!(rx.recv().await.unwrap().client_id, CLIENT);
}

#[tokio::test]
async fn timeline_reflects_committed_addons() {
    let service = setup("timeline.wal").await;
    service
        .submit(request(vec![
            slot("10:00", "12:00", &[(DRUMS, 1)]),
            slot("11:00", "13:00", &[(DRUMS, 1)]),
        ]))
        .await
        .unwrap();

    let timeline = reserved_timeline(service.store(), DRUMS, date()).await.unwrap();
    let levels: Vec<u32> = timeline.iter().map(|u| u.reserved).collect();
    assert_eq!(levels, vec![1, 2, 1]);
    assert_eq!(timeline[1].available, 0);

    assert_eq!(
        reserved_timeline(service.store(), 999, date()).await.unwrap_err().kind(),
        "InstrumentNotFound"
    );
}

#[tokio::test]
async fn replay_keeps_committed_requests_only() {
    let path = test_wal_path("booking_replay.wal");
    let confirmation;
    {
        let service = setup_with(path.clone(), StoreOptions::default()).await;
        confirmation = service
            .submit(request(vec![slot("10:00", "12:00", &[(DRUMS, 2)])]))
            .await
            .unwrap();
        service
            .submit(request(vec![
                slot("13:00", "14:00", &[]),
                slot("13:30", "14:30", &[(DRUMS, 3)]),
            ]))
            .await
            .unwrap_err();
    }

    let store = Store::open(path, Arc::new(NotifyHub::new()), StoreOptions::default()).unwrap();
    assert_eq!(store.bookings().await.len(), 1);
    assert_eq!(store.schedules().await.len(), 1);
    assert_eq!(store.payments().await[0].payment_group, confirmation.payment_group);
    assert_eq!(store.instrument_reservations(DRUMS, date()).await.len(), 1);
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_oversell() {
    let service = Arc::new(setup("concurrent_oversell.wal").await);

    let mut handles = Vec::new();
    for minute in 0..16 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            // Distinct schedules that all cover 11:00-12:00.
            let start = format!("10:{minute:02}");
            service
                .submit(request(vec![slot(&start, "12:00", &[(DRUMS, 1)])]))
                .await
        }));
    }

    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(failure) => assert_eq!(failure.kind(), "InsufficientInventory"),
        }
    }
    assert_eq!(committed, 2);

    let timeline = reserved_timeline(service.store(), DRUMS, date()).await.unwrap();
    assert!(timeline.iter().all(|u| u.reserved <= 2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_slots_commit_once() {
    let service = Arc::new(setup("concurrent_identical.wal").await);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service
                .submit(request(vec![slot("18:00", "20:00", &[])]))
                .await
        }));
    }

    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(failure) => assert_eq!(failure.kind(), "ScheduleConflict"),
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(service.store().schedules().await.len(), 1);
}
