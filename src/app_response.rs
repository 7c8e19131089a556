use std::fmt::{Display, Formatter};

use lmdb::Error as LmdbError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;

use crate::local_db_model::ReservationStatus;

/// Response envelope shared by the Rust API and the FFI layer.
///
/// Every fallible operation in the crate returns `Result<T, AppResponse>`;
/// the FFI functions serialize the same enum back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppResponse {
    DatabaseError(String),
    SerializationError(String),
    NotFound(String),
    ValidationError(String),
    BadRequest(String),
    Forbidden(String),
    Conflict(String),
    Rejected(Rejection),
    Ok(String),
}

/// A workflow precondition that did not hold.
///
/// These are expected outcomes of user actions, not faults: the caller shows
/// the message and nothing in the store has changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Rejection {
    BookNotFound { book_id: String },
    UserNotFound { user_id: String },
    ReservationNotFound { reservation_id: String },
    OutOfStock { title: String },
    AlreadyHeld { title: String },
    HoldLimitReached { limit: u32 },
    NotActive { status: ReservationStatus },
    NoActiveRental { book_id: String },
    NothingRentedOut { title: String },
    ZeroQuantityChange,
    MissingReference,
    DisposalExceedsStock { requested: u64, available: u32 },
    DuplicateIsbn { isbn: String },
    DuplicateUser { user_id: String },
    OutstandingHolds { title: String },
}

impl Display for Rejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::BookNotFound { book_id } => write!(f, "Book not found: {book_id}"),
            Rejection::UserNotFound { user_id } => write!(f, "User not found: {user_id}"),
            Rejection::ReservationNotFound { reservation_id } => {
                write!(f, "Reservation not found: {reservation_id}")
            }
            Rejection::OutOfStock { title } => write!(f, "'{title}' is out of stock"),
            Rejection::AlreadyHeld { title } => {
                write!(f, "You already have '{title}' reserved or rented")
            }
            Rejection::HoldLimitReached { limit } => write!(
                f,
                "You cannot reserve or rent more than {limit} books at the same time"
            ),
            Rejection::NotActive { status } => {
                write!(f, "Only active reservations can be cancelled (status: {status})")
            }
            Rejection::NoActiveRental { book_id } => {
                write!(f, "No active rental found for book {book_id}")
            }
            Rejection::NothingRentedOut { title } => {
                write!(f, "No copies of '{title}' are rented out")
            }
            Rejection::ZeroQuantityChange => {
                write!(f, "Quantity change cannot be 0. Please enter a valid number.")
            }
            Rejection::MissingReference => write!(f, "Invoice/Write-off request is required."),
            Rejection::DisposalExceedsStock { requested, available } => write!(
                f,
                "Attempted disposal exceeds available stock ({requested} requested, {available} available)."
            ),
            Rejection::DuplicateIsbn { isbn } => {
                write!(f, "A book with ISBN {isbn} already exists")
            }
            Rejection::DuplicateUser { user_id } => {
                write!(f, "A profile already exists for user {user_id}")
            }
            Rejection::OutstandingHolds { title } => write!(
                f,
                "'{title}' cannot be removed while copies are reserved or rented out"
            ),
        }
    }
}

impl Display for AppResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppResponse::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppResponse::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppResponse::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppResponse::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppResponse::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            AppResponse::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppResponse::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppResponse::Rejected(reason) => write!(f, "{}", reason),
            AppResponse::Ok(msg) => write!(f, "Ok: {}", msg),
        }
    }
}

impl std::error::Error for AppResponse {}

impl From<LmdbError> for AppResponse {
    fn from(err: LmdbError) -> Self {
        match err {
            LmdbError::NotFound => AppResponse::NotFound("Key not found".to_string()),
            LmdbError::MapFull => AppResponse::DatabaseError(
                "Database map is full; increase mapSize in the configuration".to_string(),
            ),
            LmdbError::Corrupted | LmdbError::PageNotFound => {
                AppResponse::DatabaseError(format!("Database is corrupted: {}", err))
            }
            _ => AppResponse::DatabaseError(format!("LMDB error: {}", err)),
        }
    }
}

impl From<SerdeError> for AppResponse {
    fn from(err: SerdeError) -> Self {
        AppResponse::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<std::io::Error> for AppResponse {
    fn from(err: std::io::Error) -> Self {
        AppResponse::DatabaseError(format!("IO error: {}", err))
    }
}

impl From<Rejection> for AppResponse {
    fn from(reason: Rejection) -> Self {
        AppResponse::Rejected(reason)
    }
}

impl AppResponse {
    pub fn success(msg: impl Into<String>) -> Self {
        AppResponse::Ok(msg.into())
    }

    /// The rejection reason, if this response is a workflow rejection.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            AppResponse::Rejected(reason) => Some(reason),
            _ => None,
        }
    }
}

pub type AppResult<T> = Result<T, AppResponse>;
