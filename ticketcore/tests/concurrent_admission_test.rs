//! Concurrent admission tests for the booking engine.
//!
//! These tests start many uncoordinated bookings against the same
//! (date, ticket) key and verify that the committed quantity never exceeds
//! capacity and that no admission is lost.

mod common;

use std::sync::Arc;

use common::{day, engine, quantity, request, ticket_id};
use ticketcore::{
    BookingError, CapacityKey, ReservationId, ReservationPatch, ReservationStore,
};
use tokio::sync::Barrier;

async fn committed(engine: &common::TestEngine, date: chrono::NaiveDate) -> u32 {
    engine
        .store()
        .committed_quantity(CapacityKey::new(date, ticket_id(1)), None)
        .await
        .expect("committed quantity should be readable")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_concurrent_bookings_for_the_last_seats_admit_exactly_one() {
    // Given: capacity 2 for (2025-06-01, ticket 1)
    let engine = Arc::new(engine(2));
    let barrier = Arc::new(Barrier::new(3));

    // When: two bookings of 2 race each other
    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.create_reservation(request(day(2025, 6, 1), 2)).await
        }));
    }
    barrier.wait().await;

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.expect("booking task should not panic"));
    }

    // Then: one succeeds, one is rejected, and the key holds 2, not 4
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let rejections = results
        .iter()
        .filter(|r| matches!(r, Err(BookingError::CapacityExceeded(_))))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(rejections, 1);
    assert_eq!(committed(&engine, day(2025, 6, 1)).await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn n_single_seat_bookings_against_r_remaining_admit_exactly_r() {
    const CAPACITY: u32 = 10;
    const ALREADY_HELD: u32 = 3;
    const CONTENDERS: usize = 40;
    let remaining = (CAPACITY - ALREADY_HELD) as usize;

    // Given: 3 of 10 seats already taken
    let engine = Arc::new(engine(CAPACITY));
    engine
        .create_reservation(request(day(2025, 6, 1), ALREADY_HELD))
        .await
        .expect("initial booking should succeed");

    // When: 40 bookings of one seat start together
    let barrier = Arc::new(Barrier::new(CONTENDERS + 1));
    let mut handles = Vec::with_capacity(CONTENDERS);
    for _ in 0..CONTENDERS {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.create_reservation(request(day(2025, 6, 1), 1)).await
        }));
    }
    barrier.wait().await;

    let results = futures::future::join_all(handles).await;

    // Then: exactly the 7 remaining seats were sold
    let outcomes: Vec<Result<ReservationId, BookingError>> = results
        .into_iter()
        .map(|joined| joined.expect("booking task should not panic"))
        .collect();
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    let rejections = outcomes
        .iter()
        .filter(|r| matches!(r, Err(BookingError::CapacityExceeded(_))))
        .count();

    assert_eq!(successes, remaining);
    assert_eq!(rejections, CONTENDERS - remaining);
    assert_eq!(committed(&engine, day(2025, 6, 1)).await, CAPACITY);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_and_creates_never_exceed_capacity() {
    // Given: capacity 6 with two reservations of 2 on the same key
    let engine = Arc::new(engine(6));
    let first = engine
        .create_reservation(request(day(2025, 6, 1), 2))
        .await
        .expect("booking");
    let second = engine
        .create_reservation(request(day(2025, 6, 1), 2))
        .await
        .expect("booking");

    // When: both grow to 3 while a new booking of 2 races them
    let barrier = Arc::new(Barrier::new(4));
    let mut updates = Vec::new();
    for reservation_id in [first, second] {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        updates.push(tokio::spawn(async move {
            barrier.wait().await;
            engine
                .update_reservation(
                    reservation_id,
                    ReservationPatch::default().with_quantity(quantity(3)),
                )
                .await
                .map(|_| ())
        }));
    }
    let creator = {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            barrier.wait().await;
            engine
                .create_reservation(request(day(2025, 6, 1), 2))
                .await
                .map(|_| ())
        })
    };
    barrier.wait().await;

    for handle in updates {
        let _ = handle.await.expect("update task should not panic");
    }
    let _ = creator.await.expect("create task should not panic");

    // Then: whatever order won, the key never holds more than 6
    let held = committed(&engine, day(2025, 6, 1)).await;
    assert!(held <= 6, "committed {held} exceeds capacity 6");
    let all = engine.list_all().await.expect("listing works");
    let summed: u32 = all.iter().map(|r| r.quantity.count()).sum();
    assert_eq!(summed, held);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_frees_capacity_for_a_waiting_booking() {
    let engine = Arc::new(engine(2));
    let holder = engine
        .create_reservation(request(day(2025, 6, 1), 2))
        .await
        .expect("fills the key");

    assert!(engine.cancel_reservation(holder).await.expect("cancel works"));
    let retried = engine
        .create_reservation(request(day(2025, 6, 1), 2))
        .await;

    assert!(retried.is_ok());
    assert_eq!(committed(&engine, day(2025, 6, 1)).await, 2);
}
