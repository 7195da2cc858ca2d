mod common;

use common::{
    buyer, catalog_priced, day, engine, engine_on, quantity, request, ticket_id, today,
};
use ticketcore::{
    BookingError, BuyerEmail, CreateReservation, InMemoryReservationStore, Money, PaymentMethod,
    ReservationForm, ReservationId, ReservationPatch, ReservationStore,
};

#[tokio::test]
async fn create_snapshots_price_and_returns_identity() {
    // Given: ticket 1 costs 10.00
    let engine = engine(100);

    // When: 3 tickets are booked
    let reservation_id = engine
        .create_reservation(request(day(2025, 6, 1), 3))
        .await
        .expect("booking within capacity should succeed");

    // Then: the stored reservation totals 30.00
    let stored = engine
        .get_reservation(reservation_id)
        .await
        .expect("created reservation should be readable");
    assert_eq!(stored.unit_price, Money::from_cents(1_000));
    assert_eq!(stored.total_price, Money::from_cents(3_000));
    assert_eq!(stored.reservation_id, reservation_id);
}

#[tokio::test]
async fn quantity_update_reprices_and_excludes_own_contribution() {
    // Given: a key of capacity 5 holding one reservation of 3 at 10.00
    let engine = engine(5);
    let reservation_id = engine
        .create_reservation(request(day(2025, 6, 1), 3))
        .await
        .expect("initial booking should succeed");

    // When: the quantity grows to 5
    let updated = engine
        .update_reservation(
            reservation_id,
            ReservationPatch::default().with_quantity(quantity(5)),
        )
        .await
        .expect("0 + 5 <= 5 should be admitted");

    // Then: the total is 50.00 and the key holds 5, not 8
    assert_eq!(updated.total_price, Money::from_cents(5_000));
    let remaining = engine
        .remaining_capacity(day(2025, 6, 1), ticket_id(1))
        .await
        .expect("remaining capacity should be readable");
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn quantity_update_uses_the_current_catalog_price() {
    // Given: a reservation booked while ticket 1 cost 10.00
    let store = InMemoryReservationStore::new();
    let before = engine_on(store.clone(), catalog_priced(1_000), 100);
    let reservation_id = before
        .create_reservation(request(day(2025, 6, 1), 2))
        .await
        .expect("initial booking should succeed");

    // When: the price rises to 12.00 and the quantity changes
    let after = engine_on(store, catalog_priced(1_200), 100);
    let updated = after
        .update_reservation(
            reservation_id,
            ReservationPatch::default().with_quantity(quantity(4)),
        )
        .await
        .expect("quantity change should succeed");

    // Then: the new total uses the new price
    assert_eq!(updated.unit_price, Money::from_cents(1_200));
    assert_eq!(updated.total_price, Money::from_cents(4_800));
}

#[tokio::test]
async fn non_quantity_update_keeps_the_snapshot_price() {
    let store = InMemoryReservationStore::new();
    let before = engine_on(store.clone(), catalog_priced(1_000), 100);
    let reservation_id = before
        .create_reservation(request(day(2025, 6, 1), 2))
        .await
        .expect("initial booking should succeed");

    let after = engine_on(store, catalog_priced(1_200), 100);
    let updated = after
        .update_reservation(
            reservation_id,
            ReservationPatch::default()
                .with_date(day(2025, 6, 2))
                .with_payment_method(PaymentMethod::Cash),
        )
        .await
        .expect("date change should succeed");

    assert_eq!(updated.date, day(2025, 6, 2));
    assert_eq!(updated.payment_method, PaymentMethod::Cash);
    assert_eq!(updated.total_price, Money::from_cents(2_000));
}

#[tokio::test]
async fn creating_in_the_past_fails_with_past_date() {
    let engine = engine(100);

    let result = engine
        .create_reservation(request(day(2025, 4, 30), 1))
        .await;

    assert_eq!(
        result,
        Err(BookingError::PastDate {
            date: day(2025, 4, 30),
            today: today(),
        })
    );
    assert!(engine.list_all().await.expect("listing works").is_empty());
}

#[tokio::test]
async fn booking_today_is_allowed() {
    let engine = engine(100);
    let result = engine.create_reservation(request(today(), 1)).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn unknown_ticket_fails_with_ticket_not_found() {
    let engine = engine(100);
    let mut unknown = request(day(2025, 6, 1), 1);
    unknown.ticket_id = ticket_id(42);

    let result = engine.create_reservation(unknown).await;

    assert_eq!(
        result,
        Err(BookingError::TicketNotFound {
            ticket_id: ticket_id(42)
        })
    );
}

#[tokio::test]
#[tracing_test::traced_test]
async fn full_key_rejects_with_capacity_exceeded() {
    // Given: capacity 2 already filled
    let engine = engine(2);
    engine
        .create_reservation(request(day(2025, 6, 1), 2))
        .await
        .expect("first booking fills the key");

    // When: one more ticket is requested
    let result = engine
        .create_reservation(request(day(2025, 6, 1), 1))
        .await;

    // Then: the rejection is final, not retryable, and logged
    let error = result.expect_err("a full key must reject");
    assert!(matches!(error, BookingError::CapacityExceeded(_)));
    assert!(!error.is_retryable());
    assert!(logs_contain("[booking.capacity_exceeded]"));
}

#[tokio::test]
async fn other_days_and_tickets_are_unaffected_by_a_full_key() {
    let engine = engine_on(
        InMemoryReservationStore::new(),
        ticketcore::StaticCatalog::builtin(),
        2,
    );
    engine
        .create_reservation(request(day(2025, 6, 1), 2))
        .await
        .expect("fills ticket 1 on June 1st");

    let next_day = engine.create_reservation(request(day(2025, 6, 2), 2)).await;
    let mut other_ticket = request(day(2025, 6, 1), 2);
    other_ticket.ticket_id = ticket_id(2);
    let other_ticket = engine.create_reservation(other_ticket).await;

    assert!(next_day.is_ok());
    assert!(other_ticket.is_ok());
}

#[tokio::test]
async fn cancelling_twice_reports_true_then_false() {
    // Given: a key filled by one reservation
    let engine = engine(2);
    let reservation_id = engine
        .create_reservation(request(day(2025, 6, 1), 2))
        .await
        .expect("booking should succeed");

    // When: it is cancelled twice
    let first = engine.cancel_reservation(reservation_id).await;
    let second = engine.cancel_reservation(reservation_id).await;

    // Then: the capacity is free again
    assert_eq!(first, Ok(true));
    assert_eq!(second, Ok(false));
    assert!(engine
        .create_reservation(request(day(2025, 6, 1), 2))
        .await
        .is_ok());
}

#[tokio::test]
async fn listing_by_email_ignores_case() {
    let engine = engine(100);
    let mut upper = request(day(2025, 6, 1), 1);
    upper.buyer = buyer("X@Y.com");
    let mut lower = request(day(2025, 6, 2), 1);
    lower.buyer = buyer("x@y.com");
    engine.create_reservation(upper).await.expect("booking");
    engine.create_reservation(lower).await.expect("booking");
    engine
        .create_reservation(request(day(2025, 6, 3), 1))
        .await
        .expect("booking");

    let by_upper = engine
        .list_by_buyer_email(&BuyerEmail::try_new("X@Y.com").expect("valid email"))
        .await
        .expect("listing works");
    let by_lower = engine
        .list_by_buyer_email(&BuyerEmail::try_new("x@y.com").expect("valid email"))
        .await
        .expect("listing works");

    assert_eq!(by_upper.len(), 2);
    assert_eq!(by_upper, by_lower);
}

#[tokio::test]
async fn empty_patch_is_invalid_input() {
    let engine = engine(100);
    let reservation_id = engine
        .create_reservation(request(day(2025, 6, 1), 1))
        .await
        .expect("booking");

    let result = engine
        .update_reservation(reservation_id, ReservationPatch::default())
        .await;

    assert_eq!(
        result,
        Err(BookingError::InvalidInput("no fields to update".to_string()))
    );
}

#[tokio::test]
async fn updating_a_missing_reservation_is_not_found() {
    let engine = engine(100);
    let reservation_id = ReservationId::generate();

    let result = engine
        .update_reservation(
            reservation_id,
            ReservationPatch::default().with_quantity(quantity(2)),
        )
        .await;

    assert_eq!(
        result,
        Err(BookingError::ReservationNotFound { reservation_id })
    );
    assert_eq!(
        engine.get_reservation(reservation_id).await,
        Err(BookingError::ReservationNotFound { reservation_id })
    );
}

#[tokio::test]
async fn moving_a_reservation_into_the_past_fails() {
    let engine = engine(100);
    let reservation_id = engine
        .create_reservation(request(day(2025, 6, 1), 1))
        .await
        .expect("booking");

    let result = engine
        .update_reservation(
            reservation_id,
            ReservationPatch::default().with_date(day(2025, 1, 1)),
        )
        .await;

    assert!(matches!(result, Err(BookingError::PastDate { .. })));
}

#[tokio::test]
async fn moving_a_reservation_onto_a_full_day_is_rejected() {
    // Given: June 2nd is full and a reservation of 2 sits on June 1st
    let engine = engine(3);
    engine
        .create_reservation(request(day(2025, 6, 2), 2))
        .await
        .expect("partially fills June 2nd");
    let mover = engine
        .create_reservation(request(day(2025, 6, 1), 2))
        .await
        .expect("booking");

    // When: it moves to June 2nd
    let result = engine
        .update_reservation(mover, ReservationPatch::default().with_date(day(2025, 6, 2)))
        .await;

    // Then: 2 + 2 > 3 is rejected and the reservation stays put
    assert!(matches!(result, Err(BookingError::CapacityExceeded(_))));
    let stored = engine.get_reservation(mover).await.expect("still stored");
    assert_eq!(stored.date, day(2025, 6, 1));
}

#[tokio::test]
async fn monthly_stats_cover_the_last_twelve_months() {
    // Given: reservations stored directly, one outside the window
    let store = InMemoryReservationStore::new();
    let engine = engine_on(store.clone(), catalog_priced(1_000), 100);
    let policy = engine.config().admission_policy();
    for (date, n) in [
        (day(2025, 5, 10), 2),
        (day(2025, 5, 20), 1),
        (day(2025, 3, 1), 4),
        (day(2024, 4, 30), 1),
    ] {
        let req: CreateReservation = request(date, n);
        let reservation = ticketcore::Reservation::new(
            store.generate_reservation_id(),
            &req,
            Money::from_cents(1_000),
        );
        store
            .insert_reservation(reservation, policy)
            .await
            .expect("seeding should succeed");
    }

    // When: stats are requested
    let stats = engine.monthly_stats().await.expect("stats are readable");

    // Then: two months, most recent first
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].month, day(2025, 5, 1));
    assert_eq!(stats[0].reservation_count, 2);
    assert_eq!(stats[0].total_tickets, 3);
    assert_eq!(stats[0].total_revenue, Money::from_cents(3_000));
    assert_eq!(stats[0].average_revenue, Money::from_cents(1_500));
    assert_eq!(stats[1].month, day(2025, 3, 1));
}

#[tokio::test]
async fn remaining_capacity_is_zero_for_past_days() {
    let engine = engine(100);
    let remaining = engine
        .remaining_capacity(day(2025, 1, 1), ticket_id(1))
        .await
        .expect("readable");
    assert_eq!(remaining, 0);

    let remaining = engine
        .remaining_capacity(day(2025, 6, 1), ticket_id(1))
        .await
        .expect("readable");
    assert_eq!(remaining, 100);
}

#[tokio::test]
async fn routing_form_flows_through_to_a_reservation() {
    let engine = engine(100);
    let form = ReservationForm {
        name: "  Bea Lima ".to_string(),
        email: "BEA@example.com".to_string(),
        ticket_id: 1,
        quantity: 2,
        date: "2025-07-14".to_string(),
        payment: "virement".to_string(),
    };

    let request = CreateReservation::try_from(form).expect("form is well formed");
    let reservation_id = engine.create_reservation(request).await.expect("booking");

    let stored = engine.get_reservation(reservation_id).await.expect("stored");
    assert_eq!(stored.buyer.name.as_ref(), "Bea Lima");
    assert_eq!(stored.payment_method, PaymentMethod::BankTransfer);
    assert_eq!(stored.total_price, Money::from_cents(2_000));
}
