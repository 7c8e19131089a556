//! # Kolibri Core
//!
//! Local-first core of the Kolibri library app: book catalog, reservations,
//! rentals, inventory and user profiles on top of an LMDB document store,
//! plus the standalone country-data filter.
//!
//! Every workflow step (reserve, cancel, rent, return, adjust inventory,
//! expire) runs in a single LMDB write transaction, so a rejected step leaves
//! nothing half-written and concurrent callers cannot oversell a book.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kolibri_core::{AuthUser, Library, LibraryConfig, NewBook, NewProfile};
//!
//! let library = Library::open("my_library", LibraryConfig::default()).unwrap();
//! let admin = AuthUser { uid: "a1".into(), email: "admin@example.com".into(), display_name: None };
//! library.bootstrap_admin(&admin, &NewProfile::default()).unwrap();
//! let session = library.resolve_session(&admin).unwrap();
//!
//! let book = library
//!     .add_book(&session, &NewBook {
//!         title: "Dune".into(),
//!         author: "Frank Herbert".into(),
//!         isbn: "9780441013593".into(),
//!         description: String::new(),
//!         total_number: 3,
//!     })
//!     .unwrap();
//! library.reserve_book(&session, &book.id).unwrap();
//! ```
//!
//! ## FFI Functions
//!
//! The C surface takes and returns JSON. Every function except
//! [`create_library`] returns an [`AppResponse`] serialized to a C string,
//! which the caller releases with [`free_response`].
//!
//! - [`create_library`] / [`close_library`]
//! - [`register_user`]
//! - [`add_book`], [`get_book`], [`list_books`], [`delete_book`],
//!   [`update_book_details`], [`set_book_cover`]
//! - [`get_user`], [`list_users`], [`update_profile`], [`set_profile_picture`]
//! - [`reserve_book`], [`cancel_reservation`], [`list_reservations`]
//! - [`rent_book`], [`return_book`], [`list_rentals`]
//! - [`adjust_inventory`], [`list_inventory_transactions`]
//! - [`filter_countries`]

pub mod app_response;
pub mod catalog;
pub mod config;
pub mod countries;
pub mod identity;
pub mod inventory;
pub mod library;
pub mod local_db_model;
pub mod local_db_state;
pub mod object_store;
pub mod observers;
pub mod query;
pub mod rental;
pub mod reservation;

pub use crate::app_response::{AppResponse, AppResult, Rejection};
pub use crate::catalog::{BookDetailsUpdate, NewBook, NewProfile, ProfileUpdate};
pub use crate::config::LibraryConfig;
pub use crate::countries::{Country, CountryFilter, FilterOutcome};
pub use crate::identity::{AuthUser, Role, Session, SessionHub};
pub use crate::inventory::{InventoryAdjustment, TransactionField, TransactionQuery};
pub use crate::library::{Clock, Library, SystemClock};
pub use crate::local_db_model::{
    Book, InventoryTransaction, RentalStatus, RentalTransaction, Reservation, ReservationStatus, User,
};
pub use crate::rental::{RentRequest, RentalFilter, ReturnRequest};
pub use crate::reservation::{ExpirySweeper, ReservationFilter};

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Opens a library named `name` and returns an owning pointer to it.
///
/// `config_json` may be null, in which case defaults are used.
///
/// # Returns
///
/// A pointer to the [`Library`] on success, or null on failure. Release it
/// with [`close_library`].
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use kolibri_core::create_library;
///
/// let name = CString::new("test_library").unwrap();
/// let library = create_library(name.as_ptr(), std::ptr::null());
///
/// if !library.is_null() {
///     // Library opened successfully
/// }
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn create_library(name: *const c_char, config_json: *const c_char) -> *mut Library {
    if name.is_null() {
        warn!("Null name pointer passed to create_library");
        return std::ptr::null_mut();
    }

    let name_str = match unsafe { CStr::from_ptr(name).to_str() } {
        Ok(s) => s,
        Err(e) => {
            warn!("Invalid UTF-8 in name parameter: {e}");
            return std::ptr::null_mut();
        }
    };

    let config = if config_json.is_null() {
        LibraryConfig::default()
    } else {
        let parsed = unsafe { CStr::from_ptr(config_json).to_str() }
            .map_err(|e| AppResponse::BadRequest(format!("Invalid UTF-8 in config: {e}")))
            .and_then(LibraryConfig::from_json);
        match parsed {
            Ok(config) => config,
            Err(e) => {
                warn!("Rejected library config: {e}");
                return std::ptr::null_mut();
            }
        }
    };

    match Library::open(name_str, config) {
        Ok(library) => {
            info!("Library '{name_str}' opened");
            Box::into_raw(Box::new(library))
        }
        Err(e) => {
            warn!("Failed to open library '{name_str}': {e}");
            std::ptr::null_mut()
        }
    }
}

/// Closes a library created by [`create_library`] and frees it.
///
/// The pointer must not be used afterwards.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn close_library(state: *mut Library) -> *const c_char {
    if state.is_null() {
        let error = AppResponse::BadRequest("Null state pointer passed to close_library".to_string());
        return response_to_c_string(&error);
    }

    let library = unsafe { Box::from_raw(state) };
    info!("Closing library at {}", library.store().path().display());
    drop(library);
    response_to_c_string(&AppResponse::Ok("Library closed successfully".to_string()))
}

/// Creates the `users` document for a signed-up account.
///
/// `auth_json` is an [`AuthUser`], `profile_json` a [`NewProfile`] (nullable).
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn register_user(
    state: *mut Library,
    auth_json: *const c_char,
    profile_json: *const c_char,
) -> *const c_char {
    let library = match library_ref(state, "register_user") {
        Ok(library) => library,
        Err(error_ptr) => return error_ptr,
    };
    let auth: AuthUser = match parse_json(auth_json, "auth user") {
        Ok(auth) => auth,
        Err(error_ptr) => return error_ptr,
    };
    let profile: NewProfile = match parse_json_or_default(profile_json, "profile") {
        Ok(profile) => profile,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.register_user(&auth, &profile))
}

/// Adds a book. `book_json` is a [`NewBook`]; the acting user must be an admin.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn add_book(state: *mut Library, uid: *const c_char, book_json: *const c_char) -> *const c_char {
    let (library, session) = match acting(state, uid, "add_book") {
        Ok(pair) => pair,
        Err(error_ptr) => return error_ptr,
    };
    let new_book: NewBook = match parse_json(book_json, "book") {
        Ok(book) => book,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.add_book(&session, &new_book))
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_book(state: *mut Library, book_id: *const c_char) -> *const c_char {
    let library = match library_ref(state, "get_book") {
        Ok(library) => library,
        Err(error_ptr) => return error_ptr,
    };
    let book_id = match c_ptr_to_string(book_id, "book id") {
        Ok(id) => id,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.get_book(&book_id))
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn list_books(state: *mut Library) -> *const c_char {
    match library_ref(state, "list_books") {
        Ok(library) => respond(library.list_books()),
        Err(error_ptr) => error_ptr,
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn delete_book(state: *mut Library, uid: *const c_char, book_id: *const c_char) -> *const c_char {
    let (library, session) = match acting(state, uid, "delete_book") {
        Ok(pair) => pair,
        Err(error_ptr) => return error_ptr,
    };
    let book_id = match c_ptr_to_string(book_id, "book id") {
        Ok(id) => id,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.delete_book(&session, &book_id))
}

/// Reserves one copy of `book_id` for the user `uid`.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use kolibri_core::{create_library, free_response, reserve_book};
///
/// let name = CString::new("test_library").unwrap();
/// let library = create_library(name.as_ptr(), std::ptr::null());
///
/// let uid = CString::new("user-1").unwrap();
/// let book = CString::new("book-1").unwrap();
/// let response = reserve_book(library, uid.as_ptr(), book.as_ptr());
/// free_response(response);
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn reserve_book(state: *mut Library, uid: *const c_char, book_id: *const c_char) -> *const c_char {
    let (library, session) = match acting(state, uid, "reserve_book") {
        Ok(pair) => pair,
        Err(error_ptr) => return error_ptr,
    };
    let book_id = match c_ptr_to_string(book_id, "book id") {
        Ok(id) => id,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.reserve_book(&session, &book_id))
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn cancel_reservation(
    state: *mut Library,
    uid: *const c_char,
    reservation_id: *const c_char,
) -> *const c_char {
    let (library, session) = match acting(state, uid, "cancel_reservation") {
        Ok(pair) => pair,
        Err(error_ptr) => return error_ptr,
    };
    let reservation_id = match c_ptr_to_string(reservation_id, "reservation id") {
        Ok(id) => id,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.cancel_reservation(&session, &reservation_id))
}

/// Lists reservations visible to `uid`. `filter_json` is a nullable
/// [`ReservationFilter`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn list_reservations(
    state: *mut Library,
    uid: *const c_char,
    filter_json: *const c_char,
) -> *const c_char {
    let (library, session) = match acting(state, uid, "list_reservations") {
        Ok(pair) => pair,
        Err(error_ptr) => return error_ptr,
    };
    let filter: ReservationFilter = match parse_json_or_default(filter_json, "filter") {
        Ok(filter) => filter,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.list_reservations(&session, &filter))
}

/// Rents a book. `request_json` is a [`RentRequest`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn rent_book(state: *mut Library, uid: *const c_char, request_json: *const c_char) -> *const c_char {
    let (library, session) = match acting(state, uid, "rent_book") {
        Ok(pair) => pair,
        Err(error_ptr) => return error_ptr,
    };
    let request: RentRequest = match parse_json(request_json, "rent request") {
        Ok(request) => request,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.rent_book(&session, &request))
}

/// Returns a book. `request_json` is a [`ReturnRequest`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn return_book(state: *mut Library, uid: *const c_char, request_json: *const c_char) -> *const c_char {
    let (library, session) = match acting(state, uid, "return_book") {
        Ok(pair) => pair,
        Err(error_ptr) => return error_ptr,
    };
    let request: ReturnRequest = match parse_json(request_json, "return request") {
        Ok(request) => request,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.return_book(&session, &request))
}

/// Applies an [`InventoryAdjustment`]; the acting user must be an admin.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn adjust_inventory(
    state: *mut Library,
    uid: *const c_char,
    adjustment_json: *const c_char,
) -> *const c_char {
    let (library, session) = match acting(state, uid, "adjust_inventory") {
        Ok(pair) => pair,
        Err(error_ptr) => return error_ptr,
    };
    let adjustment: InventoryAdjustment = match parse_json(adjustment_json, "adjustment") {
        Ok(adjustment) => adjustment,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.adjust_inventory(&session, &adjustment))
}

/// Lists inventory transactions for an admin. `query_json` is a nullable
/// [`TransactionQuery`]; the default is newest first.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn list_inventory_transactions(
    state: *mut Library,
    uid: *const c_char,
    query_json: *const c_char,
) -> *const c_char {
    let (library, session) = match acting(state, uid, "list_inventory_transactions") {
        Ok(pair) => pair,
        Err(error_ptr) => return error_ptr,
    };
    let query: TransactionQuery = match parse_json_or_default(query_json, "transaction query") {
        Ok(query) => query,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.list_inventory_transactions(&session, &query))
}

/// Lists rentals visible to `uid`. `filter_json` is a nullable [`RentalFilter`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn list_rentals(state: *mut Library, uid: *const c_char, filter_json: *const c_char) -> *const c_char {
    let (library, session) = match acting(state, uid, "list_rentals") {
        Ok(pair) => pair,
        Err(error_ptr) => return error_ptr,
    };
    let filter: RentalFilter = match parse_json_or_default(filter_json, "filter") {
        Ok(filter) => filter,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.list_rentals(&session, &filter))
}

/// Edits title, author, ISBN or description. `update_json` is a [`BookDetailsUpdate`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn update_book_details(
    state: *mut Library,
    uid: *const c_char,
    book_id: *const c_char,
    update_json: *const c_char,
) -> *const c_char {
    let (library, session) = match acting(state, uid, "update_book_details") {
        Ok(pair) => pair,
        Err(error_ptr) => return error_ptr,
    };
    let book_id = match c_ptr_to_string(book_id, "book id") {
        Ok(id) => id,
        Err(error_ptr) => return error_ptr,
    };
    let update: BookDetailsUpdate = match parse_json(update_json, "book update") {
        Ok(update) => update,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.update_book_details(&session, &book_id, &update))
}

/// Stores a cover image and returns its URL.
///
/// `image` points to `image_len` bytes; `extension` is e.g. `"jpg"`.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn set_book_cover(
    state: *mut Library,
    uid: *const c_char,
    book_id: *const c_char,
    image: *const u8,
    image_len: usize,
    extension: *const c_char,
) -> *const c_char {
    let (library, session) = match acting(state, uid, "set_book_cover") {
        Ok(pair) => pair,
        Err(error_ptr) => return error_ptr,
    };
    let book_id = match c_ptr_to_string(book_id, "book id") {
        Ok(id) => id,
        Err(error_ptr) => return error_ptr,
    };
    let bytes = match c_bytes(image, image_len, "image") {
        Ok(bytes) => bytes,
        Err(error_ptr) => return error_ptr,
    };
    let extension = match c_ptr_to_string(extension, "extension") {
        Ok(extension) => extension,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.set_book_cover(&session, &book_id, bytes, &extension))
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_user(state: *mut Library, uid: *const c_char, user_id: *const c_char) -> *const c_char {
    let (library, session) = match acting(state, uid, "get_user") {
        Ok(pair) => pair,
        Err(error_ptr) => return error_ptr,
    };
    let user_id = match c_ptr_to_string(user_id, "user id") {
        Ok(id) => id,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.get_user(&session, &user_id))
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn list_users(state: *mut Library, uid: *const c_char) -> *const c_char {
    match acting(state, uid, "list_users") {
        Ok((library, session)) => respond(library.list_users(&session)),
        Err(error_ptr) => error_ptr,
    }
}

/// Edits a profile. `update_json` is a [`ProfileUpdate`]; changing `role`
/// needs an admin.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn update_profile(
    state: *mut Library,
    uid: *const c_char,
    user_id: *const c_char,
    update_json: *const c_char,
) -> *const c_char {
    let (library, session) = match acting(state, uid, "update_profile") {
        Ok(pair) => pair,
        Err(error_ptr) => return error_ptr,
    };
    let user_id = match c_ptr_to_string(user_id, "user id") {
        Ok(id) => id,
        Err(error_ptr) => return error_ptr,
    };
    let update: ProfileUpdate = match parse_json(update_json, "profile update") {
        Ok(update) => update,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.update_profile(&session, &user_id, &update))
}

/// Stores a profile picture and returns its URL. Same buffer contract as
/// [`set_book_cover`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn set_profile_picture(
    state: *mut Library,
    uid: *const c_char,
    user_id: *const c_char,
    image: *const u8,
    image_len: usize,
    extension: *const c_char,
) -> *const c_char {
    let (library, session) = match acting(state, uid, "set_profile_picture") {
        Ok(pair) => pair,
        Err(error_ptr) => return error_ptr,
    };
    let user_id = match c_ptr_to_string(user_id, "user id") {
        Ok(id) => id,
        Err(error_ptr) => return error_ptr,
    };
    let bytes = match c_bytes(image, image_len, "image") {
        Ok(bytes) => bytes,
        Err(error_ptr) => return error_ptr,
    };
    let extension = match c_ptr_to_string(extension, "extension") {
        Ok(extension) => extension,
        Err(error_ptr) => return error_ptr,
    };
    respond(library.set_profile_picture(&session, &user_id, bytes, &extension))
}

/// Filters a country dataset. Needs no library instance.
///
/// `dataset_json` is an array of [`Country`], `filter_json` a nullable
/// [`CountryFilter`]. The result is a [`FilterOutcome`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn filter_countries(dataset_json: *const c_char, filter_json: *const c_char) -> *const c_char {
    let dataset: Vec<Country> = match parse_json(dataset_json, "country dataset") {
        Ok(dataset) => dataset,
        Err(error_ptr) => return error_ptr,
    };
    let filter: CountryFilter = match parse_json_or_default(filter_json, "country filter") {
        Ok(filter) => filter,
        Err(error_ptr) => return error_ptr,
    };
    respond(Ok(filter.apply(&dataset)))
}

/// Releases a response string returned by any function in this crate.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn free_response(response: *const c_char) {
    if response.is_null() {
        return;
    }
    drop(unsafe { CString::from_raw(response as *mut c_char) });
}

/// Serializes an operation result into the response envelope.
fn respond<T: Serialize>(result: Result<T, AppResponse>) -> *const c_char {
    match result {
        Ok(value) => match serde_json::to_string(&value) {
            Ok(json) => response_to_c_string(&AppResponse::Ok(json)),
            Err(e) => {
                let error = AppResponse::SerializationError(format!("Failed to serialize result: {e}"));
                response_to_c_string(&error)
            }
        },
        Err(e) => {
            warn!("FFI call failed: {e}");
            response_to_c_string(&e)
        }
    }
}

fn library_ref<'a>(state: *mut Library, caller: &str) -> Result<&'a Library, *const c_char> {
    match unsafe { state.as_ref() } {
        Some(library) => Ok(library),
        None => {
            let error = AppResponse::BadRequest(format!("Null state pointer passed to {caller}"));
            Err(response_to_c_string(&error))
        }
    }
}

/// Resolves the library and the session of the acting user `uid`.
fn acting<'a>(
    state: *mut Library,
    uid: *const c_char,
    caller: &str,
) -> Result<(&'a Library, Session), *const c_char> {
    let library = library_ref(state, caller)?;
    let uid = c_ptr_to_string(uid, "uid")?;
    match library.session_for_uid(&uid) {
        Ok(session) => Ok((library, session)),
        Err(e) => {
            warn!("{caller}: could not resolve session for {uid}: {e}");
            Err(response_to_c_string(&e))
        }
    }
}

fn parse_json<T: DeserializeOwned>(ptr: *const c_char, field_name: &str) -> Result<T, *const c_char> {
    let json = c_ptr_to_string(ptr, field_name)?;
    serde_json::from_str(&json).map_err(|e| {
        let error = AppResponse::SerializationError(format!("Invalid {field_name} JSON: {e}"));
        response_to_c_string(&error)
    })
}

fn parse_json_or_default<T: DeserializeOwned + Default>(
    ptr: *const c_char,
    field_name: &str,
) -> Result<T, *const c_char> {
    if ptr.is_null() {
        Ok(T::default())
    } else {
        parse_json(ptr, field_name)
    }
}

/// Converts an [`AppResponse`] to a C string owned by the caller.
///
/// Returns null if serialization or C string creation fails.
fn response_to_c_string(response: &AppResponse) -> *const c_char {
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

/// Borrows `len` bytes from a caller-owned buffer.
fn c_bytes<'a>(ptr: *const u8, len: usize, field_name: &str) -> Result<&'a [u8], *const c_char> {
    if ptr.is_null() {
        let error = AppResponse::BadRequest(format!("Null {field_name} pointer"));
        return Err(response_to_c_string(&error));
    }
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
}

/// Converts a C string pointer to a Rust `String`.
///
/// On a null pointer or invalid UTF-8 the error side holds a ready
/// `BadRequest` response.
fn c_ptr_to_string(ptr: *const c_char, field_name: &str) -> Result<String, *const c_char> {
    if ptr.is_null() {
        let error = AppResponse::BadRequest(format!("Null {field_name} pointer"));
        return Err(response_to_c_string(&error));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => {
            let error = AppResponse::BadRequest(format!("Invalid UTF-8 in {field_name}: {e}"));
            Err(response_to_c_string(&error))
        }
    }
}
