use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::app_response::{AppResponse, Rejection};
use crate::config::LibraryConfig;
use crate::identity::{AuthUser, Session, SessionHub};
use crate::local_db_model::{Book, User};
use crate::local_db_state::{DocumentStore, WriteTxn};
use crate::object_store::ObjectStore;
use crate::observers::{TransitionEvent, TransitionLogger, TransitionObserver};

/// Source of "now" for expiry and timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A library instance: document store, blob store and workflow rules.
///
/// The workflow operations live in the [`reservation`](crate::reservation),
/// [`rental`](crate::rental), [`inventory`](crate::inventory) and
/// [`catalog`](crate::catalog) modules as `impl Library` blocks.
pub struct Library {
    store: DocumentStore,
    objects: ObjectStore,
    config: LibraryConfig,
    clock: Arc<dyn Clock>,
    observers: Vec<Box<dyn TransitionObserver>>,
    sessions: SessionHub,
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("path", &self.store.path())
            .field("config", &self.config)
            .field("observers_count", &self.observers.len())
            .finish()
    }
}

impl Library {
    /// Opens the library database `<name>.lmdb` and its asset directory.
    pub fn open(name: &str, config: LibraryConfig) -> Result<Self, AppResponse> {
        config.validate()?;
        let store = DocumentStore::init(name, config.map_size)?;
        let objects_dir = config
            .object_store_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{name}.assets")));
        let objects = ObjectStore::open(&objects_dir, config.public_url_base.as_deref())?;

        info!(
            "Library '{name}' ready (max holds {}, reservation period {} days)",
            config.max_holds, config.reservation_days
        );
        Ok(Self {
            store,
            objects,
            config,
            clock: Arc::new(SystemClock),
            observers: vec![Box::new(TransitionLogger)],
            sessions: SessionHub::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn register_observer(&mut self, observer: Box<dyn TransitionObserver>) {
        self.observers.push(observer);
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionHub {
        &self.sessions
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Looks up the role for an authenticated user.
    pub fn resolve_session(&self, user: &AuthUser) -> Result<Session, AppResponse> {
        let profile = self.session_for_uid(&user.uid)?;
        Ok(Session {
            email: user.email.clone(),
            ..profile
        })
    }

    /// Builds a session from the `users` document keyed by `uid`.
    pub fn session_for_uid(&self, uid: &str) -> Result<Session, AppResponse> {
        let user = self
            .store
            .get::<User>(uid)?
            .ok_or_else(|| {
                AppResponse::from(Rejection::UserNotFound {
                    user_id: uid.to_string(),
                })
            })?
            .data;
        Ok(Session {
            uid: user.id,
            email: user.email,
            role: user.role,
        })
    }

    /// The session of whoever is currently published on the hub.
    pub fn current_session(&self) -> Result<Option<Session>, AppResponse> {
        match self.sessions.current() {
            Some(user) => self.resolve_session(&user).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn notify(&self, events: &[TransitionEvent]) {
        for event in events {
            for observer in &self.observers {
                observer.on_transition(event);
            }
        }
    }
}

pub(crate) fn load_book(txn: &WriteTxn<'_>, book_id: &str) -> Result<Book, AppResponse> {
    txn.get::<Book>(book_id)?.ok_or_else(|| {
        Rejection::BookNotFound {
            book_id: book_id.to_string(),
        }
        .into()
    })
}

pub(crate) fn load_user(txn: &WriteTxn<'_>, user_id: &str) -> Result<User, AppResponse> {
    txn.get::<User>(user_id)?.ok_or_else(|| {
        Rejection::UserNotFound {
            user_id: user_id.to_string(),
        }
        .into()
    })
}

/// Writes a book after checking its counters add up.
pub(crate) fn save_book(txn: &mut WriteTxn<'_>, book: &Book) -> Result<(), AppResponse> {
    book.check_counters()?;
    txn.put(book).map(|_| ())
}

pub(crate) fn increment(value: u32, counter: &str, book: &Book) -> Result<u32, AppResponse> {
    value.checked_add(1).ok_or_else(|| {
        AppResponse::DatabaseError(format!("{counter} overflow on book {}", book.id))
    })
}

pub(crate) fn decrement(value: u32, counter: &str, book: &Book) -> Result<u32, AppResponse> {
    value.checked_sub(1).ok_or_else(|| {
        warn!("Refusing to take {counter} below zero on book {}", book.id);
        AppResponse::DatabaseError(format!("{counter} would become negative on book {}", book.id))
    })
}

/// Removes `book_id` from a user's hold list.
pub(crate) fn remove_book(list: &mut Vec<String>, book_id: &str) {
    list.retain(|id| id != book_id);
}
