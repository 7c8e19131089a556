//! Books and user profiles.

use chrono::NaiveDate;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app_response::{AppResponse, Rejection};
use crate::identity::{AuthUser, Role, Session};
use crate::library::{load_book, load_user, save_book, Library};
use crate::local_db_model::{Book, Collection, User};
use crate::local_db_state::{new_id, WriteTxn};
use crate::object_store::object_key;
use crate::query::Query;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub isbn: String,
    #[serde(default)]
    pub description: String,
    pub total_number: u32,
}

/// Descriptive fields only; counters change through workflows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookDetailsUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewProfile {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub role: Option<Role>,
}

fn required(value: &str, field: &str) -> Result<String, AppResponse> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(AppResponse::ValidationError(format!("{field} is required")))
    } else {
        Ok(trimmed.to_string())
    }
}

fn ensure_isbn_free(txn: &WriteTxn<'_>, isbn: &str, except_id: Option<&str>) -> Result<(), AppResponse> {
    let taken = txn
        .query::<Book>(&Query::new().where_eq("isbn", isbn))?
        .into_iter()
        .any(|book| Some(book.id.as_str()) != except_id);
    if taken {
        Err(Rejection::DuplicateIsbn {
            isbn: isbn.to_string(),
        }
        .into())
    } else {
        Ok(())
    }
}

impl Library {
    pub fn add_book(&self, session: &Session, new_book: &NewBook) -> Result<Book, AppResponse> {
        session.require_admin("add books")?;
        let title = required(&new_book.title, "Title")?;
        let author = required(&new_book.author, "Author")?;
        let isbn = required(&new_book.isbn, "ISBN")?;

        let mut book = Book::new(&new_id(), &title, &author, &isbn, new_book.total_number);
        book.description = new_book.description.trim().to_string();

        self.store().write(|txn| {
            ensure_isbn_free(txn, &isbn, None)?;
            book.check_counters()?;
            txn.insert(&book)
        })?;
        info!("Added book '{}' ({} copies)", book.title, book.total_number);
        Ok(book)
    }

    pub fn update_book_details(
        &self,
        session: &Session,
        book_id: &str,
        update: &BookDetailsUpdate,
    ) -> Result<Book, AppResponse> {
        session.require_admin("edit books")?;
        self.store().write(|txn| {
            let mut book = load_book(txn, book_id)?;
            if let Some(title) = &update.title {
                book.title = required(title, "Title")?;
            }
            if let Some(author) = &update.author {
                book.author = required(author, "Author")?;
            }
            if let Some(isbn) = &update.isbn {
                let isbn = required(isbn, "ISBN")?;
                ensure_isbn_free(txn, &isbn, Some(book_id))?;
                book.isbn = isbn;
            }
            if let Some(description) = &update.description {
                book.description = description.trim().to_string();
            }
            save_book(txn, &book)?;
            Ok(book)
        })
    }

    /// Removes a book, allowed only while every copy is on the shelf.
    pub fn delete_book(&self, session: &Session, book_id: &str) -> Result<Book, AppResponse> {
        session.require_admin("remove books")?;
        let book = self.store().write(|txn| {
            let book = load_book(txn, book_id)?;
            if !book.is_fully_shelved() {
                return Err(Rejection::OutstandingHolds {
                    title: book.title.clone(),
                }
                .into());
            }
            txn.delete(Collection::Books, book_id)?;
            Ok(book)
        })?;
        info!("Removed book '{}'", book.title);
        Ok(book)
    }

    pub fn get_book(&self, book_id: &str) -> Result<Book, AppResponse> {
        self.store()
            .get::<Book>(book_id)?
            .map(|stored| stored.data)
            .ok_or_else(|| {
                Rejection::BookNotFound {
                    book_id: book_id.to_string(),
                }
                .into()
            })
    }

    /// All books sorted by title.
    pub fn list_books(&self) -> Result<Vec<Book>, AppResponse> {
        let mut books: Vec<Book> = self.store().all()?;
        books.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()));
        Ok(books)
    }

    /// Uploads a cover image and stores its URL on the book.
    pub fn set_book_cover(
        &self,
        session: &Session,
        book_id: &str,
        bytes: &[u8],
        extension: &str,
    ) -> Result<String, AppResponse> {
        session.require_admin("change book covers")?;
        self.get_book(book_id)?;

        let key = object_key("covers", book_id, extension);
        let url = self.store_object(&key, bytes, |url| {
            self.store().write(|txn| {
                let mut book = load_book(txn, book_id)?;
                book.cover_image_url = Some(url.to_string());
                save_book(txn, &book)
            })
        })?;
        Ok(url)
    }

    /// Creates the `users` document for a newly signed-up account.
    pub fn register_user(&self, auth: &AuthUser, profile: &NewProfile) -> Result<User, AppResponse> {
        self.create_user(auth, profile, Role::User)
    }

    /// Registers the first administrator. Fails once any admin exists.
    pub fn bootstrap_admin(&self, auth: &AuthUser, profile: &NewProfile) -> Result<User, AppResponse> {
        let admins = self
            .store()
            .query(Collection::Users, &Query::new().where_eq("role", "admin"))?;
        if !admins.is_empty() {
            return Err(AppResponse::Forbidden(
                "An administrator already exists".to_string(),
            ));
        }
        self.create_user(auth, profile, Role::Admin)
    }

    fn create_user(&self, auth: &AuthUser, profile: &NewProfile, role: Role) -> Result<User, AppResponse> {
        let uid = required(&auth.uid, "User id")?;
        let email = required(&auth.email, "Email")?;

        let user = User {
            id: uid,
            email,
            role,
            first_name: profile.first_name.trim().to_string(),
            last_name: profile.last_name.trim().to_string(),
            date_of_birth: profile.date_of_birth,
            profile_picture_url: None,
            currently_reserved_books: Vec::new(),
            currently_rented_books: Vec::new(),
        };

        self.store().write(|txn| {
            if txn.get::<User>(&user.id)?.is_some() {
                return Err(Rejection::DuplicateUser {
                    user_id: user.id.clone(),
                }
                .into());
            }
            txn.insert(&user)
        })?;
        info!("Registered {} as {}", user.email, user.role);
        Ok(user)
    }

    pub fn update_profile(
        &self,
        session: &Session,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<User, AppResponse> {
        session.require_self_or_admin(user_id, "edit profiles")?;
        if update.role.is_some() {
            session.require_admin("change roles")?;
        }

        self.store().write(|txn| {
            let mut user = load_user(txn, user_id)?;
            if let Some(email) = &update.email {
                user.email = required(email, "Email")?;
            }
            if let Some(first_name) = &update.first_name {
                user.first_name = first_name.trim().to_string();
            }
            if let Some(last_name) = &update.last_name {
                user.last_name = last_name.trim().to_string();
            }
            if update.date_of_birth.is_some() {
                user.date_of_birth = update.date_of_birth;
            }
            if let Some(role) = update.role {
                user.role = role;
            }
            txn.put(&user)?;
            Ok(user)
        })
    }

    pub fn set_profile_picture(
        &self,
        session: &Session,
        user_id: &str,
        bytes: &[u8],
        extension: &str,
    ) -> Result<String, AppResponse> {
        session.require_self_or_admin(user_id, "change profile pictures")?;
        let key = object_key("profilePictures", user_id, extension);

        self.get_user(session, user_id)?;
        let url = self.store_object(&key, bytes, |url| {
            self.store().write(|txn| {
                let mut user = load_user(txn, user_id)?;
                user.profile_picture_url = Some(url.to_string());
                txn.put(&user).map(|_| ())
            })
        })?;
        Ok(url)
    }

    /// Uploads `bytes` under `key`, then runs `link` with the object URL.
    /// The object is removed again if `link` fails.
    pub(crate) fn store_object<F>(&self, key: &str, bytes: &[u8], link: F) -> Result<String, AppResponse>
    where
        F: FnOnce(&str) -> Result<(), AppResponse>,
    {
        self.objects().upload(key, bytes)?;
        let linked = self
            .objects()
            .get_url(key)
            .and_then(|url| link(&url).map(|()| url));
        if linked.is_err() {
            if let Err(e) = self.objects().delete(key) {
                warn!("Could not remove orphaned object {key}: {e}");
            }
        }
        linked
    }

    pub fn get_user(&self, session: &Session, user_id: &str) -> Result<User, AppResponse> {
        session.require_self_or_admin(user_id, "view profiles")?;
        self.store()
            .get::<User>(user_id)?
            .map(|stored| stored.data)
            .ok_or_else(|| {
                Rejection::UserNotFound {
                    user_id: user_id.to_string(),
                }
                .into()
            })
    }

    pub fn list_users(&self, session: &Session) -> Result<Vec<User>, AppResponse> {
        session.require_admin("list users")?;
        let mut users: Vec<User> = self.store().all()?;
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }
}
