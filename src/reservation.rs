//! Reservation lifecycle: reserve, cancel, list and expire.
//!
//! A reservation holds one copy of a book for `reservationDays`. Expiry is
//! applied lazily before any reservation read or reservation-dependent write,
//! and periodically by [`ExpirySweeper`].

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::app_response::{AppResponse, Rejection};
use crate::identity::Session;
use crate::library::{decrement, increment, load_book, load_user, remove_book, save_book, Library};
use crate::local_db_model::{Book, Reservation, ReservationStatus, User};
use crate::local_db_state::{new_id, WriteTxn};
use crate::observers::{RecordKind, TransitionEvent};
use crate::query::Query;

/// Which reservations an expiry pass looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryScope<'a> {
    All,
    User(&'a str),
    Reservation(&'a str),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReservationFilter {
    /// Admin only: restrict to one user.
    pub user_id: Option<String>,
    /// Case-insensitive match against book title, user email or status.
    pub text: Option<String>,
}

impl Library {
    /// Reserves one copy of `book_id` for the session user.
    pub fn reserve_book(&self, session: &Session, book_id: &str) -> Result<Reservation, AppResponse> {
        self.expire_due(ExpiryScope::User(&session.uid))?;

        let now = self.now();
        let period = self.config().reservation_period();
        let limit = self.config().max_holds;
        let expiration_date = now.checked_add_signed(period).ok_or_else(|| {
            AppResponse::ValidationError("Reservation period is out of range".to_string())
        })?;

        let reservation = self.store().write(|txn| {
            let mut book = load_book(txn, book_id)?;
            let mut user = load_user(txn, &session.uid)?;
            check_can_hold(&book, &user, limit)?;

            let reservation = Reservation {
                id: new_id(),
                user_id: user.id.clone(),
                user_email: user.email.clone(),
                book_id: book.id.clone(),
                book_title: book.title.clone(),
                reservation_date: now,
                expiration_date,
                status: ReservationStatus::Active,
            };
            txn.insert(&reservation)?;

            user.currently_reserved_books.push(book.id.clone());
            txn.put(&user)?;

            book.current_stock = decrement(book.current_stock, "currentStock", &book)?;
            book.number_of_reserved_books =
                increment(book.number_of_reserved_books, "numberOfReservedBooks", &book)?;
            save_book(txn, &book)?;
            Ok(reservation)
        })?;

        self.notify(&[reservation_event(&reservation, None)]);
        Ok(reservation)
    }

    /// Cancels an active reservation and puts the held copy back on the shelf.
    pub fn cancel_reservation(
        &self,
        session: &Session,
        reservation_id: &str,
    ) -> Result<Reservation, AppResponse> {
        self.expire_due(ExpiryScope::Reservation(reservation_id))?;

        let reservation = self.store().write(|txn| {
            let mut reservation = txn.get::<Reservation>(reservation_id)?.ok_or_else(|| {
                AppResponse::from(Rejection::ReservationNotFound {
                    reservation_id: reservation_id.to_string(),
                })
            })?;
            session.require_self_or_admin(&reservation.user_id, "cancel reservations")?;
            transition(&mut reservation, ReservationStatus::Cancelled)?;
            txn.put(&reservation)?;
            release_reserved_copy(txn, &reservation)?;
            Ok(reservation)
        })?;

        self.notify(&[reservation_event(&reservation, Some(ReservationStatus::Active))]);
        Ok(reservation)
    }

    /// Lists reservations, expiring overdue ones first.
    ///
    /// Regular users always get only their own reservations. Newest first.
    pub fn list_reservations(
        &self,
        session: &Session,
        filter: &ReservationFilter,
    ) -> Result<Vec<Reservation>, AppResponse> {
        let user_id = if session.is_admin() {
            filter.user_id.as_deref()
        } else {
            Some(session.uid.as_str())
        };

        let scope = user_id.map_or(ExpiryScope::All, ExpiryScope::User);
        self.expire_due(scope)?;

        let query = match user_id {
            Some(uid) => Query::new().where_eq("userId", uid),
            None => Query::new(),
        };
        let mut reservations: Vec<Reservation> = self.store().query_as(&query)?;

        if let Some(text) = filter.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let needle = text.to_lowercase();
            reservations.retain(|r| {
                r.book_title.to_lowercase().contains(&needle)
                    || r.user_email.to_lowercase().contains(&needle)
                    || r.status.as_str().contains(&needle)
            });
        }

        reservations.sort_by(|a, b| b.reservation_date.cmp(&a.reservation_date));
        Ok(reservations)
    }

    /// Expires every overdue reservation. Returns how many were expired.
    pub fn expire_due_reservations(&self) -> Result<usize, AppResponse> {
        self.expire_due(ExpiryScope::All)
    }

    /// Expires overdue reservations in `scope` in a single write transaction.
    pub fn expire_due(&self, scope: ExpiryScope<'_>) -> Result<usize, AppResponse> {
        let now = self.now();
        let events = self
            .store()
            .write(|txn| expire_due_in(txn, now, scope))?;
        if !events.is_empty() {
            info!("Expired {} overdue reservation(s)", events.len());
            self.notify(&events);
        }
        Ok(events.len())
    }
}

fn expire_due_in(
    txn: &mut WriteTxn<'_>,
    now: DateTime<Utc>,
    scope: ExpiryScope<'_>,
) -> Result<Vec<TransitionEvent>, AppResponse> {
    let candidates: Vec<Reservation> = match scope {
        ExpiryScope::All => txn.query(&Query::new().where_eq("status", "active"))?,
        ExpiryScope::User(user_id) => txn.query(
            &Query::new()
                .where_eq("userId", user_id)
                .where_eq("status", "active"),
        )?,
        ExpiryScope::Reservation(id) => txn.get::<Reservation>(id)?.into_iter().collect(),
    };

    let mut events = Vec::new();
    for mut reservation in candidates.into_iter().filter(|r| r.is_due(now)) {
        transition(&mut reservation, ReservationStatus::Expired)?;
        txn.put(&reservation)?;
        release_reserved_copy(txn, &reservation)?;
        events.push(reservation_event(&reservation, Some(ReservationStatus::Active)));
    }
    Ok(events)
}

/// Returns the copy held by `reservation` to available stock.
///
/// Both `currentStock` and `numberOfReservedBooks` move, so the book counters
/// still add up to `totalNumber`.
fn release_reserved_copy(txn: &mut WriteTxn<'_>, reservation: &Reservation) -> Result<(), AppResponse> {
    match txn.get::<Book>(&reservation.book_id)? {
        Some(mut book) => {
            book.current_stock = increment(book.current_stock, "currentStock", &book)?;
            book.number_of_reserved_books =
                decrement(book.number_of_reserved_books, "numberOfReservedBooks", &book)?;
            save_book(txn, &book)?;
        }
        None => warn!(
            "Reservation {} points at missing book {}",
            reservation.id, reservation.book_id
        ),
    }

    if let Some(mut user) = txn.get::<User>(&reservation.user_id)? {
        remove_book(&mut user.currently_reserved_books, &reservation.book_id);
        txn.put(&user)?;
    }
    Ok(())
}

/// Shared admission rules for a new reservation or direct rental.
pub(crate) fn check_can_hold(book: &Book, user: &User, limit: u32) -> Result<(), AppResponse> {
    if book.current_stock == 0 {
        return Err(Rejection::OutOfStock {
            title: book.title.clone(),
        }
        .into());
    }
    if user.holds_book(&book.id) {
        return Err(Rejection::AlreadyHeld {
            title: book.title.clone(),
        }
        .into());
    }
    if user.hold_count() >= limit as usize {
        return Err(Rejection::HoldLimitReached { limit }.into());
    }
    Ok(())
}

pub(crate) fn transition(
    reservation: &mut Reservation,
    next: ReservationStatus,
) -> Result<(), AppResponse> {
    if !reservation.status.can_transition_to(next) {
        return Err(Rejection::NotActive {
            status: reservation.status,
        }
        .into());
    }
    reservation.status = next;
    Ok(())
}

pub(crate) fn reservation_event(
    reservation: &Reservation,
    from: Option<ReservationStatus>,
) -> TransitionEvent {
    TransitionEvent {
        kind: RecordKind::Reservation,
        record_id: reservation.id.clone(),
        book_id: reservation.book_id.clone(),
        user_id: reservation.user_id.clone(),
        from: from.map(|s| s.to_string()),
        to: reservation.status.to_string(),
    }
}

/// Background thread that expires overdue reservations on a fixed interval.
///
/// The thread stops when [`ExpirySweeper::stop`] is called or the sweeper is
/// dropped.
pub struct ExpirySweeper {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ExpirySweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirySweeper")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl ExpirySweeper {
    /// Starts sweeping every `config().sweep_interval()`.
    pub fn spawn(library: Arc<Library>) -> Result<Self, AppResponse> {
        let interval = library.config().sweep_interval();
        Self::spawn_with_interval(library, interval)
    }

    pub fn spawn_with_interval(library: Arc<Library>, interval: Duration) -> Result<Self, AppResponse> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("kolibri-expiry".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = library.expire_due_reservations() {
                            error!("Expiry sweep failed: {e}");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        info!("Expiry sweeper started (interval {interval:?})");
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            // The receiver is gone if the thread already exited.
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Expiry sweeper thread panicked");
            }
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
