//! Renting out and returning copies.

use serde::{Deserialize, Serialize};

use crate::app_response::{AppResponse, Rejection};
use crate::identity::Session;
use crate::library::{decrement, increment, load_book, load_user, remove_book, save_book, Library};
use crate::local_db_model::{RentalStatus, RentalTransaction, Reservation, ReservationStatus, User};
use crate::local_db_state::new_id;
use crate::observers::{RecordKind, TransitionEvent};
use crate::query::Query;
use crate::reservation::{check_can_hold, reservation_event, transition, ExpiryScope};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentRequest {
    pub user_id: String,
    pub book_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRequest {
    pub user_id: String,
    pub book_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RentalFilter {
    pub user_id: Option<String>,
    pub status: Option<RentalStatus>,
}

impl Library {
    /// Rents a copy to `request.user_id`.
    ///
    /// An active reservation for the same book is fulfilled: the copy it
    /// already holds is handed out and stock is not touched again.
    pub fn rent_book(
        &self,
        session: &Session,
        request: &RentRequest,
    ) -> Result<RentalTransaction, AppResponse> {
        session.require_self_or_admin(&request.user_id, "rent books")?;
        self.expire_due(ExpiryScope::User(&request.user_id))?;

        let now = self.now();
        let limit = self.config().max_holds;

        let (rental, fulfilled) = self.store().write(|txn| {
            let mut book = load_book(txn, &request.book_id)?;
            let mut user = load_user(txn, &request.user_id)?;

            let active_reservation = txn
                .query::<Reservation>(
                    &Query::new()
                        .where_eq("userId", user.id.as_str())
                        .where_eq("bookId", book.id.as_str())
                        .where_eq("status", "active"),
                )?
                .into_iter()
                .next();

            let fulfilled = match active_reservation {
                Some(mut reservation) => {
                    transition(&mut reservation, ReservationStatus::Fulfilled)?;
                    txn.put(&reservation)?;

                    remove_book(&mut user.currently_reserved_books, &book.id);
                    user.currently_rented_books.push(book.id.clone());

                    book.number_of_reserved_books =
                        decrement(book.number_of_reserved_books, "numberOfReservedBooks", &book)?;
                    book.number_of_rented_out_books =
                        increment(book.number_of_rented_out_books, "numberOfRentedOutBooks", &book)?;
                    Some(reservation)
                }
                None => {
                    check_can_hold(&book, &user, limit)?;
                    user.currently_rented_books.push(book.id.clone());

                    book.current_stock = decrement(book.current_stock, "currentStock", &book)?;
                    book.number_of_rented_out_books =
                        increment(book.number_of_rented_out_books, "numberOfRentedOutBooks", &book)?;
                    None
                }
            };

            let rental = RentalTransaction {
                id: new_id(),
                book_id: book.id.clone(),
                user_id: user.id.clone(),
                rentee_email: user.email.clone(),
                book_title: book.title.clone(),
                transaction_by: session.email.clone(),
                status: RentalStatus::Active,
                rented_date: now,
                returned_date: None,
            };
            txn.insert(&rental)?;
            txn.put(&user)?;
            save_book(txn, &book)?;
            Ok((rental, fulfilled))
        })?;

        let mut events = Vec::with_capacity(2);
        if let Some(reservation) = &fulfilled {
            events.push(reservation_event(reservation, Some(ReservationStatus::Active)));
        }
        events.push(rental_event(&rental, None));
        self.notify(&events);
        Ok(rental)
    }

    /// Closes the active rental of `request.book_id` by `request.user_id`.
    pub fn return_book(
        &self,
        session: &Session,
        request: &ReturnRequest,
    ) -> Result<RentalTransaction, AppResponse> {
        session.require_self_or_admin(&request.user_id, "return books")?;
        let now = self.now();

        let rental = self.store().write(|txn| {
            let mut rental = txn
                .query::<RentalTransaction>(
                    &Query::new()
                        .where_eq("userId", request.user_id.as_str())
                        .where_eq("bookId", request.book_id.as_str())
                        .where_eq("status", "active"),
                )?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    AppResponse::from(Rejection::NoActiveRental {
                        book_id: request.book_id.clone(),
                    })
                })?;

            let mut book = load_book(txn, &request.book_id)?;
            if book.number_of_rented_out_books == 0 {
                return Err(Rejection::NothingRentedOut {
                    title: book.title.clone(),
                }
                .into());
            }

            if !rental.status.can_transition_to(RentalStatus::Returned) {
                return Err(AppResponse::Conflict(format!(
                    "Rental {} is already {}",
                    rental.id, rental.status
                )));
            }
            rental.status = RentalStatus::Returned;
            rental.returned_date = Some(now);
            txn.put(&rental)?;

            book.current_stock = increment(book.current_stock, "currentStock", &book)?;
            book.number_of_rented_out_books =
                decrement(book.number_of_rented_out_books, "numberOfRentedOutBooks", &book)?;
            save_book(txn, &book)?;

            if let Some(mut user) = txn.get::<User>(&request.user_id)? {
                remove_book(&mut user.currently_rented_books, &request.book_id);
                txn.put(&user)?;
            }
            Ok(rental)
        })?;

        self.notify(&[rental_event(&rental, Some(RentalStatus::Active))]);
        Ok(rental)
    }

    /// Rentals visible to the session, newest first.
    pub fn list_rentals(
        &self,
        session: &Session,
        filter: &RentalFilter,
    ) -> Result<Vec<RentalTransaction>, AppResponse> {
        let user_id = if session.is_admin() {
            filter.user_id.as_deref()
        } else {
            Some(session.uid.as_str())
        };

        let mut query = Query::new();
        if let Some(uid) = user_id {
            query = query.where_eq("userId", uid);
        }
        if let Some(status) = filter.status {
            query = query.where_eq("status", status.as_str());
        }

        let mut rentals: Vec<RentalTransaction> = self.store().query_as(&query)?;
        rentals.sort_by(|a, b| b.rented_date.cmp(&a.rented_date));
        Ok(rentals)
    }
}

fn rental_event(rental: &RentalTransaction, from: Option<RentalStatus>) -> TransitionEvent {
    TransitionEvent {
        kind: RecordKind::Rental,
        record_id: rental.id.clone(),
        book_id: rental.book_id.clone(),
        user_id: rental.user_id.clone(),
        from: from.map(|s| s.to_string()),
        to: rental.status.to_string(),
    }
}
