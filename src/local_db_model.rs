//! Document definitions for the library store.
//!
//! Each record type maps to one LMDB named database (a [`Collection`]) and is
//! stored as JSON inside a [`StoredDocument`] envelope that carries a
//! revision counter. Field names follow the camelCase contract the front-end
//! already reads, e.g. `currentStock` or `numberOfRentedOutBooks`.
//!
//! # Examples
//!
//! ```rust
//! use kolibri_core::local_db_model::{Book, ReservationStatus};
//!
//! let book = Book::new("b1", "Momo", "Michael Ende", "9783522202107", 5);
//! assert_eq!(book.current_stock, 5);
//! assert!(book.check_counters().is_ok());
//!
//! assert!(ReservationStatus::Active.can_transition_to(ReservationStatus::Cancelled));
//! assert!(!ReservationStatus::Expired.can_transition_to(ReservationStatus::Cancelled));
//! ```

use std::fmt::{Display, Formatter};

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::app_response::AppResponse;

/// The named databases inside the LMDB environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Books,
    Users,
    Reservations,
    RentalTransactions,
    InventoryTransactions,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Books,
        Collection::Users,
        Collection::Reservations,
        Collection::RentalTransactions,
        Collection::InventoryTransactions,
    ];

    /// Name of the LMDB database backing this collection.
    pub fn name(self) -> &'static str {
        match self {
            Collection::Books => "books",
            Collection::Users => "users",
            Collection::Reservations => "reservations",
            Collection::RentalTransactions => "rentalTransactions",
            Collection::InventoryTransactions => "inventoryTransactions",
        }
    }

    pub fn from_name(name: &str) -> Option<Collection> {
        Collection::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A record that lives in exactly one collection, keyed by its id.
pub trait Document: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    fn id(&self) -> &str;
}

/// Envelope written to LMDB for every document.
///
/// `revision` starts at 1 on insert and grows by one on every write, which is
/// what compare-and-swap updates check against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument<T> {
    pub revision: u64,
    pub data: T,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Admin => f.write_str("admin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub isbn: String,
    #[serde(default)]
    pub description: String,
    pub total_number: u32,
    pub current_stock: u32,
    pub number_of_reserved_books: u32,
    pub number_of_rented_out_books: u32,
    #[serde(rename = "coverImageURL", default)]
    pub cover_image_url: Option<String>,
}

impl Book {
    /// A fresh title with every copy on the shelf.
    pub fn new(id: &str, title: &str, author: &str, isbn: &str, total_number: u32) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            author: author.to_string(),
            isbn: isbn.to_string(),
            description: String::new(),
            total_number,
            current_stock: total_number,
            number_of_reserved_books: 0,
            number_of_rented_out_books: 0,
            cover_image_url: None,
        }
    }

    /// Verifies `currentStock + reserved + rentedOut == totalNumber`.
    pub fn check_counters(&self) -> Result<(), AppResponse> {
        let allocated = u64::from(self.current_stock)
            + u64::from(self.number_of_reserved_books)
            + u64::from(self.number_of_rented_out_books);
        if allocated == u64::from(self.total_number) {
            Ok(())
        } else {
            Err(AppResponse::DatabaseError(format!(
                "Counter invariant violated for book {}: stock {} + reserved {} + rented {} != total {}",
                self.id,
                self.current_stock,
                self.number_of_reserved_books,
                self.number_of_rented_out_books,
                self.total_number
            )))
        }
    }

    /// True when no copy is reserved or rented out.
    pub fn is_fully_shelved(&self) -> bool {
        self.current_stock == self.total_number
    }
}

impl Document for Book {
    const COLLECTION: Collection = Collection::Books;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default)]
    pub currently_reserved_books: Vec<String>,
    #[serde(default)]
    pub currently_rented_books: Vec<String>,
}

impl User {
    /// Reservations plus rentals currently held.
    pub fn hold_count(&self) -> usize {
        self.currently_reserved_books.len() + self.currently_rented_books.len()
    }

    pub fn holds_book(&self, book_id: &str) -> bool {
        self.currently_reserved_books.iter().any(|id| id == book_id)
            || self.currently_rented_books.iter().any(|id| id == book_id)
    }
}

impl Document for User {
    const COLLECTION: Collection = Collection::Users;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Active,
    Fulfilled,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    /// Only an active reservation can move, and never back to active.
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (
                ReservationStatus::Active,
                ReservationStatus::Fulfilled | ReservationStatus::Cancelled | ReservationStatus::Expired
            )
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Fulfilled => "fulfilled",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
        }
    }
}

impl Display for ReservationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_email: String,
    pub book_id: String,
    pub book_title: String,
    pub reservation_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub status: ReservationStatus,
}

impl Reservation {
    /// Active and past its expiration date at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && self.expiration_date <= now
    }
}

impl Document for Reservation {
    const COLLECTION: Collection = Collection::Reservations;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RentalStatus {
    Active,
    Returned,
}

impl RentalStatus {
    pub fn can_transition_to(self, next: RentalStatus) -> bool {
        self == RentalStatus::Active && next == RentalStatus::Returned
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RentalStatus::Active => "active",
            RentalStatus::Returned => "returned",
        }
    }
}

impl Display for RentalStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentalTransaction {
    pub id: String,
    pub book_id: String,
    pub user_id: String,
    pub rentee_email: String,
    pub book_title: String,
    pub transaction_by: String,
    pub status: RentalStatus,
    pub rented_date: DateTime<Utc>,
    #[serde(default)]
    pub returned_date: Option<DateTime<Utc>>,
}

impl Document for RentalTransaction {
    const COLLECTION: Collection = Collection::RentalTransactions;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Audit record for a stock purchase or write-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryTransaction {
    pub id: String,
    pub book_id: String,
    pub book_title: String,
    pub transaction_by: String,
    pub quantity_change: i64,
    pub invoice_or_write_off: String,
    pub transaction_date: DateTime<Utc>,
    /// `totalNumber` of the book after this adjustment.
    pub total_number: u32,
}

impl Document for InventoryTransaction {
    const COLLECTION: Collection = Collection::InventoryTransactions;

    fn id(&self) -> &str {
        &self.id
    }
}
