use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Days, NaiveDate};
use rand::Rng;
use ticketcore::{
    AdmissionPolicy, Buyer, BuyerEmail, BuyerName, Capacity, CapacityKey, CreateReservation,
    Money, PaymentMethod, Quantity, Reservation, ReservationChange, ReservationId,
    ReservationStore, StoreError, TicketId,
};
use tokio::sync::Barrier;

#[derive(Debug)]
pub struct ContractTestFailure {
    scenario: &'static str,
    detail: String,
}

impl ContractTestFailure {
    fn new(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self {
            scenario,
            detail: detail.into(),
        }
    }

    fn store_error(scenario: &'static str, operation: &'static str, error: StoreError) -> Self {
        Self::new(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }

    fn assertion(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self::new(scenario, detail)
    }
}

impl fmt::Display for ContractTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.detail)
    }
}

impl std::error::Error for ContractTestFailure {}

pub type ContractTestResult = Result<(), ContractTestFailure>;

fn policy(scenario: &'static str, capacity: u32) -> Result<AdmissionPolicy, ContractTestFailure> {
    let capacity = Capacity::try_new(capacity).map_err(|error| {
        ContractTestFailure::assertion(scenario, format!("invalid capacity {capacity}: {error}"))
    })?;
    Ok(AdmissionPolicy::new(capacity, Duration::from_secs(10)))
}

/// A key no other scenario (or earlier run against a reused database) uses.
fn contract_key(scenario: &'static str) -> Result<CapacityKey, ContractTestFailure> {
    let mut rng = rand::rng();
    let offset = rng.random_range(0..300_000_u64);
    let ticket = rng.random_range(1_000..i32::MAX);

    let date = NaiveDate::from_ymd_opt(2100, 1, 1)
        .and_then(|base| base.checked_add_days(Days::new(offset)))
        .ok_or_else(|| ContractTestFailure::assertion(scenario, "unable to pick a visit date"))?;
    let ticket_id = TicketId::try_new(ticket).map_err(|error| {
        ContractTestFailure::assertion(scenario, format!("invalid ticket id {ticket}: {error}"))
    })?;

    Ok(CapacityKey::new(date, ticket_id))
}

fn contract_email(scenario: &'static str, label: &str) -> Result<BuyerEmail, ContractTestFailure> {
    // Unique per run so lookups never see rows from parallel scenarios.
    let raw = format!(
        "{label}.{}@contract.example.com",
        ReservationId::generate().into_inner().simple()
    );
    BuyerEmail::try_new(raw.clone()).map_err(|error| {
        ContractTestFailure::assertion(scenario, format!("invalid email `{raw}`: {error}"))
    })
}

fn contract_reservation(
    scenario: &'static str,
    key: CapacityKey,
    quantity: u32,
    email: BuyerEmail,
) -> Result<Reservation, ContractTestFailure> {
    let quantity = Quantity::try_new(quantity).map_err(|error| {
        ContractTestFailure::assertion(scenario, format!("invalid quantity {quantity}: {error}"))
    })?;
    let name = BuyerName::try_new("Contract Buyer")
        .map_err(|error| ContractTestFailure::assertion(scenario, error.to_string()))?;

    let request = CreateReservation {
        buyer: Buyer::new(name, email),
        ticket_id: key.ticket_id,
        date: key.date,
        quantity,
        payment_method: PaymentMethod::Paypal,
    };
    Ok(Reservation::new(
        ReservationId::generate(),
        &request,
        Money::from_cents(2_500),
    ))
}

fn quantity_change(
    scenario: &'static str,
    quantity: u32,
) -> Result<ReservationChange, ContractTestFailure> {
    let quantity = Quantity::try_new(quantity).map_err(|error| {
        ContractTestFailure::assertion(scenario, format!("invalid quantity {quantity}: {error}"))
    })?;
    Ok(ReservationChange {
        quantity: Some(quantity),
        ..ReservationChange::default()
    })
}

async fn committed<S: ReservationStore>(
    scenario: &'static str,
    store: &S,
    key: CapacityKey,
) -> Result<u32, ContractTestFailure> {
    store
        .committed_quantity(key, None)
        .await
        .map_err(|error| ContractTestFailure::store_error(scenario, "committed_quantity", error))
}

pub async fn test_insert_then_find<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ReservationStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "insert_then_find";

    let store = make_store();
    let key = contract_key(SCENARIO)?;
    let email = contract_email(SCENARIO, "insert")?;
    let reservation = contract_reservation(SCENARIO, key, 3, email)?;

    let stored = store
        .insert_reservation(reservation.clone(), policy(SCENARIO, 10)?)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "insert_reservation", error))?;

    if stored != reservation {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("insert returned {stored:?}, expected {reservation:?}"),
        ));
    }

    let found = store
        .find_reservation(reservation.reservation_id)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "find_reservation", error))?;

    match found {
        Some(found) if found == reservation => Ok(()),
        Some(found) => Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("stored row changed on read: {found:?}"),
        )),
        None => Err(ContractTestFailure::assertion(
            SCENARIO,
            "inserted reservation could not be found",
        )),
    }
}

pub async fn test_capacity_overflow_is_rejected<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ReservationStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "capacity_overflow_is_rejected";

    let store = make_store();
    let key = contract_key(SCENARIO)?;
    let policy = policy(SCENARIO, 2)?;

    let first = contract_reservation(SCENARIO, key, 2, contract_email(SCENARIO, "first")?)?;
    let _ = store
        .insert_reservation(first, policy)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "insert_reservation", error))?;

    let overflow = contract_reservation(SCENARIO, key, 1, contract_email(SCENARIO, "second")?)?;
    let overflow_id = overflow.reservation_id;

    match store.insert_reservation(overflow, policy).await {
        Err(StoreError::CapacityExceeded(rejection)) => {
            if rejection.committed != 2 || rejection.capacity != 2 {
                return Err(ContractTestFailure::assertion(
                    SCENARIO,
                    format!("rejection reported wrong amounts: {rejection}"),
                ));
            }
        }
        Err(error) => {
            return Err(ContractTestFailure::store_error(
                SCENARIO,
                "insert_reservation",
                error,
            ))
        }
        Ok(_) => {
            return Err(ContractTestFailure::assertion(
                SCENARIO,
                "expected capacity rejection but insert succeeded",
            ))
        }
    }

    let leaked = store
        .find_reservation(overflow_id)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "find_reservation", error))?;
    if leaked.is_some() {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "rejected reservation was persisted",
        ));
    }

    let held = committed(SCENARIO, &store, key).await?;
    if held != 2 {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected committed quantity 2 after rejection, observed {held}"),
        ));
    }

    Ok(())
}

pub async fn test_concurrent_admissions_respect_capacity<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ReservationStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "concurrent_admissions_respect_capacity";
    const CAPACITY: u32 = 5;
    const CONTENDERS: usize = 12;

    let store = Arc::new(make_store());
    let key = contract_key(SCENARIO)?;
    let policy = policy(SCENARIO, CAPACITY)?;
    let barrier = Arc::new(Barrier::new(CONTENDERS));

    let mut handles = Vec::with_capacity(CONTENDERS);
    for index in 0..CONTENDERS {
        let reservation = contract_reservation(
            SCENARIO,
            key,
            1,
            contract_email(SCENARIO, &format!("contender{index}"))?,
        )?;
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            let _ = barrier.wait().await;
            store.insert_reservation(reservation, policy).await
        }));
    }

    let mut admitted = 0_usize;
    for joined in futures::future::join_all(handles).await {
        let outcome = joined.map_err(|error| {
            ContractTestFailure::assertion(SCENARIO, format!("admission task panicked: {error}"))
        })?;
        match outcome {
            Ok(_) => admitted += 1,
            Err(StoreError::CapacityExceeded(_)) => {}
            Err(error) => {
                return Err(ContractTestFailure::store_error(
                    SCENARIO,
                    "insert_reservation",
                    error,
                ))
            }
        }
    }

    if admitted != CAPACITY as usize {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected exactly {CAPACITY} admissions, observed {admitted}"),
        ));
    }

    let held = committed(SCENARIO, store.as_ref(), key).await?;
    if held != CAPACITY {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected committed quantity {CAPACITY}, observed {held}"),
        ));
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Contender {
    Grow,
    MoveIn,
    Insert,
}

pub async fn test_concurrent_updates_and_inserts_respect_capacity<F, S>(
    make_store: F,
) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ReservationStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "concurrent_updates_and_inserts_respect_capacity";
    const CAPACITY: u32 = 10;
    const PER_KIND: usize = 3;

    let store = Arc::new(make_store());
    let key = contract_key(SCENARIO)?;
    let source_date = key
        .date
        .checked_add_days(Days::new(1))
        .ok_or_else(|| ContractTestFailure::assertion(SCENARIO, "unable to pick a source date"))?;
    let source = CapacityKey::new(source_date, key.ticket_id);
    let policy = policy(SCENARIO, CAPACITY)?;

    // Three single seats on the contested key, three pairs on the next day.
    let mut growers = Vec::with_capacity(PER_KIND);
    let mut movers = Vec::with_capacity(PER_KIND);
    for index in 0..PER_KIND {
        for (target, quantity, rows) in [(key, 1, &mut growers), (source, 2, &mut movers)] {
            let seed = contract_reservation(
                SCENARIO,
                target,
                quantity,
                contract_email(SCENARIO, &format!("seed{index}"))?,
            )?;
            let seeded = store
                .insert_reservation(seed, policy)
                .await
                .map_err(|error| {
                    ContractTestFailure::store_error(SCENARIO, "insert_reservation", error)
                })?;
            rows.push(seeded.reservation_id);
        }
    }

    // Every contender adds two seats to the key, which has room for seven.
    let grow = quantity_change(SCENARIO, 3)?;
    let move_in = ReservationChange {
        date: Some(key.date),
        ..ReservationChange::default()
    };
    let contenders = PER_KIND * 3 + 1;
    let barrier = Arc::new(Barrier::new(contenders));
    let mut handles = Vec::with_capacity(contenders);

    for reservation_id in growers {
        let (store, barrier, change) = (Arc::clone(&store), Arc::clone(&barrier), grow.clone());
        handles.push(tokio::spawn(async move {
            let _ = barrier.wait().await;
            let outcome = store.update_reservation(reservation_id, change, policy).await;
            (Contender::Grow, outcome)
        }));
    }
    for reservation_id in movers {
        let (store, barrier, change) = (Arc::clone(&store), Arc::clone(&barrier), move_in.clone());
        handles.push(tokio::spawn(async move {
            let _ = barrier.wait().await;
            let outcome = store.update_reservation(reservation_id, change, policy).await;
            (Contender::MoveIn, outcome)
        }));
    }
    for index in 0..=PER_KIND {
        let reservation = contract_reservation(
            SCENARIO,
            key,
            2,
            contract_email(SCENARIO, &format!("newcomer{index}"))?,
        )?;
        let (store, barrier) = (Arc::clone(&store), Arc::clone(&barrier));
        handles.push(tokio::spawn(async move {
            let _ = barrier.wait().await;
            let outcome = store.insert_reservation(reservation, policy).await;
            (Contender::Insert, outcome)
        }));
    }

    let mut admitted = Vec::new();
    for joined in futures::future::join_all(handles).await {
        let (contender, outcome) = joined.map_err(|error| {
            ContractTestFailure::assertion(SCENARIO, format!("contender task panicked: {error}"))
        })?;
        match outcome {
            Ok(_) => admitted.push(contender),
            Err(StoreError::CapacityExceeded(_)) => {}
            Err(error) => {
                let operation = if contender == Contender::Insert {
                    "insert_reservation"
                } else {
                    "update_reservation"
                };
                return Err(ContractTestFailure::store_error(SCENARIO, operation, error));
            }
        }
    }

    // 3 + 2 + 2 + 2 fits, a fourth pair would not.
    if admitted.len() != 3 {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected exactly 3 admissions, observed {admitted:?}"),
        ));
    }

    let held = committed(SCENARIO, store.as_ref(), key).await?;
    if held != 9 {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected committed quantity 9 on the contested key, observed {held}"),
        ));
    }

    let moved = admitted
        .iter()
        .filter(|contender| **contender == Contender::MoveIn)
        .count();
    let expected_left = 2 * u32::try_from(PER_KIND - moved).unwrap_or(u32::MAX);
    let left = committed(SCENARIO, store.as_ref(), source).await?;
    if left != expected_left {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected {expected_left} seats left on the source day, observed {left}"),
        ));
    }

    Ok(())
}

pub async fn test_identity_collision_is_reported<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ReservationStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "identity_collision_is_reported";

    let store = make_store();
    let policy = policy(SCENARIO, 10)?;
    let original = contract_reservation(
        SCENARIO,
        contract_key(SCENARIO)?,
        1,
        contract_email(SCENARIO, "original")?,
    )?;
    let _ = store
        .insert_reservation(original.clone(), policy)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "insert_reservation", error))?;

    let mut intruder = contract_reservation(
        SCENARIO,
        contract_key(SCENARIO)?,
        4,
        contract_email(SCENARIO, "intruder")?,
    )?;
    intruder.reservation_id = original.reservation_id;

    match store.insert_reservation(intruder, policy).await {
        Err(StoreError::IdentityCollision { reservation_id })
            if reservation_id == original.reservation_id => {}
        Err(error) => {
            return Err(ContractTestFailure::store_error(
                SCENARIO,
                "insert_reservation",
                error,
            ))
        }
        Ok(_) => {
            return Err(ContractTestFailure::assertion(
                SCENARIO,
                "expected identity collision but insert succeeded",
            ))
        }
    }

    let stored = store
        .find_reservation(original.reservation_id)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "find_reservation", error))?;
    if stored.as_ref() != Some(&original) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("colliding insert overwrote the original: {stored:?}"),
        ));
    }

    Ok(())
}

pub async fn test_update_excludes_own_contribution<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ReservationStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "update_excludes_own_contribution";

    let store = make_store();
    let key = contract_key(SCENARIO)?;
    let policy = policy(SCENARIO, 5)?;
    let held = contract_reservation(SCENARIO, key, 3, contract_email(SCENARIO, "held")?)?;
    let _ = store
        .insert_reservation(held.clone(), policy)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "insert_reservation", error))?;

    let updated = store
        .update_reservation(held.reservation_id, quantity_change(SCENARIO, 5)?, policy)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "update_reservation", error))?;

    if updated.quantity.count() != 5 {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected quantity 5, observed {}", updated.quantity),
        ));
    }
    if updated.total_price != updated.unit_price.times(updated.quantity) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!(
                "total {} does not match {} x {}",
                updated.total_price, updated.quantity, updated.unit_price
            ),
        ));
    }

    let held_now = committed(SCENARIO, &store, key).await?;
    if held_now != 5 {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected committed quantity 5, observed {held_now}"),
        ));
    }

    match store
        .update_reservation(held.reservation_id, quantity_change(SCENARIO, 6)?, policy)
        .await
    {
        Err(StoreError::CapacityExceeded(_)) => Ok(()),
        Err(error) => Err(ContractTestFailure::store_error(
            SCENARIO,
            "update_reservation",
            error,
        )),
        Ok(_) => Err(ContractTestFailure::assertion(
            SCENARIO,
            "growing beyond capacity should be rejected",
        )),
    }
}

pub async fn test_rejected_move_leaves_row_unchanged<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ReservationStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "rejected_move_leaves_row_unchanged";

    let store = make_store();
    let origin = contract_key(SCENARIO)?;
    let destination = CapacityKey::new(
        origin
            .date
            .succ_opt()
            .ok_or_else(|| ContractTestFailure::assertion(SCENARIO, "no next day"))?,
        origin.ticket_id,
    );
    let policy = policy(SCENARIO, 3)?;

    let blocker =
        contract_reservation(SCENARIO, destination, 2, contract_email(SCENARIO, "blocker")?)?;
    let mover = contract_reservation(SCENARIO, origin, 2, contract_email(SCENARIO, "mover")?)?;
    for reservation in [blocker, mover.clone()] {
        let _ = store
            .insert_reservation(reservation, policy)
            .await
            .map_err(|error| {
                ContractTestFailure::store_error(SCENARIO, "insert_reservation", error)
            })?;
    }

    let change = ReservationChange {
        date: Some(destination.date),
        ..ReservationChange::default()
    };
    match store
        .update_reservation(mover.reservation_id, change, policy)
        .await
    {
        Err(StoreError::CapacityExceeded(_)) => {}
        Err(error) => {
            return Err(ContractTestFailure::store_error(
                SCENARIO,
                "update_reservation",
                error,
            ))
        }
        Ok(_) => {
            return Err(ContractTestFailure::assertion(
                SCENARIO,
                "moving 2 onto a key holding 2 of 3 should be rejected",
            ))
        }
    }

    let stored = store
        .find_reservation(mover.reservation_id)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "find_reservation", error))?;
    if stored.as_ref() != Some(&mover) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("rejected move changed the row: {stored:?}"),
        ));
    }

    Ok(())
}

pub async fn test_update_of_missing_reservation<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ReservationStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "update_of_missing_reservation";

    let store = make_store();
    let reservation_id = ReservationId::generate();

    match store
        .update_reservation(
            reservation_id,
            quantity_change(SCENARIO, 2)?,
            policy(SCENARIO, 10)?,
        )
        .await
    {
        Err(StoreError::NotFound {
            reservation_id: missing,
        }) if missing == reservation_id => Ok(()),
        Err(error) => Err(ContractTestFailure::store_error(
            SCENARIO,
            "update_reservation",
            error,
        )),
        Ok(_) => Err(ContractTestFailure::assertion(
            SCENARIO,
            "updating a missing reservation should fail",
        )),
    }
}

pub async fn test_delete_is_idempotent<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ReservationStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "delete_is_idempotent";

    let store = make_store();
    let key = contract_key(SCENARIO)?;
    let policy = policy(SCENARIO, 2)?;
    let reservation = contract_reservation(SCENARIO, key, 2, contract_email(SCENARIO, "gone")?)?;
    let _ = store
        .insert_reservation(reservation.clone(), policy)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "insert_reservation", error))?;

    let first = store
        .delete_reservation(reservation.reservation_id)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "delete_reservation", error))?;
    let second = store
        .delete_reservation(reservation.reservation_id)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "delete_reservation", error))?;

    if !first || second {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected deletes to report true then false, observed {first} then {second}"),
        ));
    }

    let held = committed(SCENARIO, &store, key).await?;
    if held != 0 {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("delete did not free capacity, {held} still committed"),
        ));
    }

    Ok(())
}

pub async fn test_email_lookup_ignores_case<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ReservationStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "email_lookup_ignores_case";

    let store = make_store();
    let policy = policy(SCENARIO, 10)?;
    let email = contract_email(SCENARIO, "Mixed.Case")?;
    let upper = BuyerEmail::try_new(email.as_ref().to_uppercase())
        .map_err(|error| ContractTestFailure::assertion(SCENARIO, error.to_string()))?;
    let lower = BuyerEmail::try_new(email.as_ref().to_lowercase())
        .map_err(|error| ContractTestFailure::assertion(SCENARIO, error.to_string()))?;

    for (label, address) in [("upper", upper.clone()), ("lower", lower.clone())] {
        let reservation =
            contract_reservation(SCENARIO, contract_key(SCENARIO)?, 1, address)?;
        let _ = store
            .insert_reservation(reservation, policy)
            .await
            .map_err(|error| ContractTestFailure::store_error(SCENARIO, label, error))?;
    }

    let by_upper = store
        .reservations_by_email(&upper)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "reservations_by_email", error))?;
    let by_lower = store
        .reservations_by_email(&lower)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "reservations_by_email", error))?;

    if by_upper.len() != 2 {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected 2 reservations for {upper}, observed {}", by_upper.len()),
        ));
    }
    if by_upper != by_lower {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "lookups differing only in case returned different sets",
        ));
    }

    Ok(())
}

pub async fn test_listing_is_ordered<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ReservationStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "listing_is_ordered";

    let store = make_store();
    let policy = policy(SCENARIO, 10)?;
    let key = contract_key(SCENARIO)?;
    let later = CapacityKey::new(
        key.date
            .succ_opt()
            .ok_or_else(|| ContractTestFailure::assertion(SCENARIO, "no next day"))?,
        key.ticket_id,
    );

    let mut ids = Vec::new();
    for target in [key, later, later] {
        let reservation =
            contract_reservation(SCENARIO, target, 1, contract_email(SCENARIO, "order")?)?;
        ids.push(reservation.reservation_id);
        let _ = store
            .insert_reservation(reservation, policy)
            .await
            .map_err(|error| {
                ContractTestFailure::store_error(SCENARIO, "insert_reservation", error)
            })?;
    }

    let listed: Vec<(NaiveDate, ReservationId)> = store
        .all_reservations()
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "all_reservations", error))?
        .into_iter()
        .filter(|reservation| ids.contains(&reservation.reservation_id))
        .map(|reservation| (reservation.date, reservation.reservation_id))
        .collect();

    let mut expected = listed.clone();
    expected.sort_by(|a, b| b.cmp(a));

    if listed.len() != ids.len() || listed != expected {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected date then id descending, observed {listed:?}"),
        ));
    }

    Ok(())
}

pub async fn test_keys_are_isolated<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ReservationStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "keys_are_isolated";

    let store = make_store();
    let policy = policy(SCENARIO, 2)?;
    let full = contract_key(SCENARIO)?;
    let other_ticket = TicketId::try_new(full.ticket_id.into_inner().saturating_sub(1).max(1))
        .map_err(|error| ContractTestFailure::assertion(SCENARIO, error.to_string()))?;
    let neighbours = [
        CapacityKey::new(full.date, other_ticket),
        CapacityKey::new(
            full.date
                .succ_opt()
                .ok_or_else(|| ContractTestFailure::assertion(SCENARIO, "no next day"))?,
            full.ticket_id,
        ),
    ];

    let filler = contract_reservation(SCENARIO, full, 2, contract_email(SCENARIO, "filler")?)?;
    let _ = store
        .insert_reservation(filler, policy)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "insert_reservation", error))?;

    for neighbour in neighbours {
        let reservation =
            contract_reservation(SCENARIO, neighbour, 2, contract_email(SCENARIO, "neighbour")?)?;
        let _ = store
            .insert_reservation(reservation, policy)
            .await
            .map_err(|error| {
                ContractTestFailure::store_error(SCENARIO, "insert_reservation", error)
            })?;
    }

    Ok(())
}

pub async fn test_monthly_stats_rollup<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: ReservationStore + Send + Sync + 'static,
{
    const SCENARIO: &str = "monthly_stats_rollup";

    let store = make_store();
    let policy = policy(SCENARIO, 10)?;

    // Stats group by month across all tickets, so pick a month far from the
    // dates the other scenarios use.
    let (year, month) = {
        let mut rng = rand::rng();
        (rng.random_range(5_000..9_000), rng.random_range(1..=12_u32))
    };
    let first_of_month = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ContractTestFailure::assertion(SCENARIO, "invalid month"))?;
    let ticket_id = TicketId::try_new(1)
        .map_err(|error| ContractTestFailure::assertion(SCENARIO, error.to_string()))?;

    for (day, quantity) in [(1_u64, 2_u32), (14, 1), (27, 1)] {
        let date = first_of_month
            .checked_add_days(Days::new(day - 1))
            .ok_or_else(|| ContractTestFailure::assertion(SCENARIO, "invalid day"))?;
        let reservation = contract_reservation(
            SCENARIO,
            CapacityKey::new(date, ticket_id),
            quantity,
            contract_email(SCENARIO, "stats")?,
        )?;
        let _ = store
            .insert_reservation(reservation, policy)
            .await
            .map_err(|error| {
                ContractTestFailure::store_error(SCENARIO, "insert_reservation", error)
            })?;
    }

    let stats = store
        .monthly_stats(first_of_month)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "monthly_stats", error))?;

    if stats.windows(2).any(|pair| pair[0].month <= pair[1].month) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "months are not listed most recent first",
        ));
    }

    let ours = stats
        .iter()
        .find(|entry| entry.month == first_of_month)
        .ok_or_else(|| {
            ContractTestFailure::assertion(SCENARIO, format!("no stats for {first_of_month}"))
        })?;

    // 2 x 25.00 + 25.00 + 25.00 over three reservations.
    let expected_revenue = Money::from_cents(10_000);
    let expected_average = Money::from_cents(3_333);
    if ours.month.day() != 1
        || ours.reservation_count != 3
        || ours.total_tickets != 4
        || ours.total_revenue != expected_revenue
        || ours.average_revenue != expected_average
    {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("unexpected rollup {ours:?}"),
        ));
    }

    Ok(())
}

#[macro_export]
macro_rules! reservation_store_contract_tests {
    (suite = $suite:ident, make_store = $make_store:expr $(,)?) => {
        #[allow(non_snake_case)]
        mod $suite {
            use $crate::contract::{
                test_capacity_overflow_is_rejected, test_concurrent_admissions_respect_capacity,
                test_concurrent_updates_and_inserts_respect_capacity, test_delete_is_idempotent, test_email_lookup_ignores_case,
                test_identity_collision_is_reported, test_insert_then_find,
                test_keys_are_isolated, test_listing_is_ordered, test_monthly_stats_rollup,
                test_rejected_move_leaves_row_unchanged, test_update_excludes_own_contribution,
                test_update_of_missing_reservation,
            };

            #[tokio::test(flavor = "multi_thread")]
            async fn insert_then_find_contract() {
                test_insert_then_find($make_store)
                    .await
                    .expect("reservation store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn capacity_overflow_is_rejected_contract() {
                test_capacity_overflow_is_rejected($make_store)
                    .await
                    .expect("reservation store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn concurrent_admissions_respect_capacity_contract() {
                test_concurrent_admissions_respect_capacity($make_store)
                    .await
                    .expect("reservation store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn concurrent_updates_and_inserts_respect_capacity_contract() {
                test_concurrent_updates_and_inserts_respect_capacity($make_store)
                    .await
                    .expect("reservation store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn identity_collision_is_reported_contract() {
                test_identity_collision_is_reported($make_store)
                    .await
                    .expect("reservation store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn update_excludes_own_contribution_contract() {
                test_update_excludes_own_contribution($make_store)
                    .await
                    .expect("reservation store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn rejected_move_leaves_row_unchanged_contract() {
                test_rejected_move_leaves_row_unchanged($make_store)
                    .await
                    .expect("reservation store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn update_of_missing_reservation_contract() {
                test_update_of_missing_reservation($make_store)
                    .await
                    .expect("reservation store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn delete_is_idempotent_contract() {
                test_delete_is_idempotent($make_store)
                    .await
                    .expect("reservation store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn email_lookup_ignores_case_contract() {
                test_email_lookup_ignores_case($make_store)
                    .await
                    .expect("reservation store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn listing_is_ordered_contract() {
                test_listing_is_ordered($make_store)
                    .await
                    .expect("reservation store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn keys_are_isolated_contract() {
                test_keys_are_isolated($make_store)
                    .await
                    .expect("reservation store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn monthly_stats_rollup_contract() {
                test_monthly_stats_rollup($make_store)
                    .await
                    .expect("reservation store contract failed");
            }
        }
    };
}

pub use reservation_store_contract_tests;
