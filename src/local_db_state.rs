//! LMDB-backed document store.
//!
//! One LMDB environment per library, one named database per
//! [`Collection`]. Documents are JSON inside a [`StoredDocument`] envelope.
//!
//! Multi-document changes go through [`DocumentStore::write`], which runs a
//! closure inside a single LMDB write transaction. LMDB allows one writer at a
//! time, so a read-check-write sequence inside the closure cannot interleave
//! with another writer, and any error aborts every write made so far.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lmdb::{Cursor, Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::app_response::AppResponse;
use crate::local_db_model::{Collection, Document, StoredDocument};
use crate::query::Query;

/// Generates a new document id.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub struct DocumentStore {
    env: Environment,
    databases: HashMap<Collection, Database>,
    path: PathBuf,
}

impl DocumentStore {
    /// Opens (or creates) the environment at `<name>.lmdb`.
    pub fn init(name: &str, map_size: usize) -> Result<Self, AppResponse> {
        if name.trim().is_empty() {
            return Err(AppResponse::BadRequest(
                "Database name cannot be empty".to_string(),
            ));
        }

        let path = PathBuf::from(format!("{name}.lmdb"));
        std::fs::create_dir_all(&path)?;

        let env = Environment::new()
            .set_max_dbs(Collection::ALL.len() as u32)
            .set_map_size(map_size)
            .open(&path)?;

        let mut databases = HashMap::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            let db = env.create_db(Some(collection.name()), DatabaseFlags::empty())?;
            databases.insert(collection, db);
        }

        info!("Opened document store at {}", path.display());
        Ok(Self {
            env,
            databases,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn database(&self, collection: Collection) -> Result<Database, AppResponse> {
        database_for(&self.databases, collection)
    }

    pub fn get<T: Document>(&self, id: &str) -> Result<Option<StoredDocument<T>>, AppResponse> {
        let db = self.database(T::COLLECTION)?;
        let txn = self.env.begin_ro_txn()?;
        read_stored(&txn, db, id)
    }

    /// Point read without a static document type.
    pub fn get_raw(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<StoredDocument<JsonValue>>, AppResponse> {
        let db = self.database(collection)?;
        let txn = self.env.begin_ro_txn()?;
        read_stored(&txn, db, id)
    }

    pub fn all<T: Document>(&self) -> Result<Vec<T>, AppResponse> {
        let db = self.database(T::COLLECTION)?;
        let txn = self.env.begin_ro_txn()?;
        let stored: Vec<StoredDocument<T>> = scan_stored(&txn, db)?;
        Ok(stored.into_iter().map(|s| s.data).collect())
    }

    pub fn query(&self, collection: Collection, query: &Query) -> Result<Vec<JsonValue>, AppResponse> {
        let db = self.database(collection)?;
        let txn = self.env.begin_ro_txn()?;
        let stored: Vec<StoredDocument<JsonValue>> = scan_stored(&txn, db)?;
        Ok(query.apply(stored.into_iter().map(|s| s.data).collect()))
    }

    pub fn query_as<T: Document>(&self, query: &Query) -> Result<Vec<T>, AppResponse> {
        self.query(T::COLLECTION, query)?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(AppResponse::from))
            .collect()
    }

    pub fn count(&self, collection: Collection) -> Result<usize, AppResponse> {
        let db = self.database(collection)?;
        let txn = self.env.begin_ro_txn()?;
        let stored: Vec<StoredDocument<JsonValue>> = scan_stored(&txn, db)?;
        Ok(stored.len())
    }

    /// Inserts a document; fails with `Conflict` if the id is taken.
    pub fn insert<T: Document>(&self, document: &T) -> Result<String, AppResponse> {
        self.write(|txn| {
            txn.insert(document)?;
            Ok(document.id().to_string())
        })
    }

    /// Shallow-merges `fields` into the stored JSON object.
    ///
    /// `id` cannot be changed through a partial update.
    pub fn update_fields(
        &self,
        collection: Collection,
        id: &str,
        fields: &JsonValue,
    ) -> Result<StoredDocument<JsonValue>, AppResponse> {
        let patch = fields.as_object().ok_or_else(|| {
            AppResponse::BadRequest("Partial update must be a JSON object".to_string())
        })?;
        if patch.contains_key("id") {
            return Err(AppResponse::BadRequest(
                "The id field cannot be updated".to_string(),
            ));
        }

        self.write(|txn| {
            let mut stored = txn
                .get_raw(collection, id)?
                .ok_or_else(|| AppResponse::NotFound(format!("No {collection} document with id: {id}")))?;
            let object = stored.data.as_object_mut().ok_or_else(|| {
                AppResponse::SerializationError(format!("Stored {collection}/{id} is not an object"))
            })?;
            for (key, value) in patch {
                object.insert(key.clone(), value.clone());
            }
            stored.revision += 1;
            txn.put_raw(collection, id, &stored)?;
            Ok(stored)
        })
    }

    /// Replaces a document only if its stored revision is `expected_revision`.
    ///
    /// Returns the new revision.
    pub fn compare_and_swap<T: Document>(
        &self,
        document: &T,
        expected_revision: u64,
    ) -> Result<u64, AppResponse> {
        self.write(|txn| txn.put_if_revision(document, expected_revision))
    }

    pub fn delete(&self, collection: Collection, id: &str) -> Result<bool, AppResponse> {
        self.write(|txn| txn.delete(collection, id))
    }

    pub fn clear_all_records(&self) -> Result<(), AppResponse> {
        self.write(|txn| {
            for collection in Collection::ALL {
                let db = database_for(txn.databases, collection)?;
                txn.txn.clear_db(db)?;
            }
            Ok(())
        })?;
        info!("Cleared all collections in {}", self.path.display());
        Ok(())
    }

    /// Runs `f` inside one write transaction.
    ///
    /// The transaction commits only if `f` returns `Ok`.
    pub fn write<R, F>(&self, f: F) -> Result<R, AppResponse>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> Result<R, AppResponse>,
    {
        let txn = self.env.begin_rw_txn()?;
        let mut write = WriteTxn {
            txn,
            databases: &self.databases,
        };
        let result = f(&mut write)?;
        write.txn.commit()?;
        Ok(result)
    }
}

/// Handle passed to [`DocumentStore::write`] closures.
pub struct WriteTxn<'env> {
    txn: RwTransaction<'env>,
    databases: &'env HashMap<Collection, Database>,
}

impl WriteTxn<'_> {
    pub fn get<T: Document>(&self, id: &str) -> Result<Option<T>, AppResponse> {
        Ok(self.get_stored::<T>(id)?.map(|s| s.data))
    }

    pub fn get_stored<T: Document>(&self, id: &str) -> Result<Option<StoredDocument<T>>, AppResponse> {
        let db = database_for(self.databases, T::COLLECTION)?;
        read_stored(&self.txn, db, id)
    }

    fn get_raw(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<StoredDocument<JsonValue>>, AppResponse> {
        let db = database_for(self.databases, collection)?;
        read_stored(&self.txn, db, id)
    }

    pub fn scan<T: Document>(&self) -> Result<Vec<T>, AppResponse> {
        let db = database_for(self.databases, T::COLLECTION)?;
        let stored: Vec<StoredDocument<T>> = scan_stored(&self.txn, db)?;
        Ok(stored.into_iter().map(|s| s.data).collect())
    }

    pub fn query<T: Document>(&self, query: &Query) -> Result<Vec<T>, AppResponse> {
        let db = database_for(self.databases, T::COLLECTION)?;
        let stored: Vec<StoredDocument<JsonValue>> = scan_stored(&self.txn, db)?;
        query
            .apply(stored.into_iter().map(|s| s.data).collect())
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(AppResponse::from))
            .collect()
    }

    /// Writes `document`, bumping its revision. Returns the new revision.
    pub fn put<T: Document>(&mut self, document: &T) -> Result<u64, AppResponse> {
        let revision = self
            .get_raw(T::COLLECTION, document.id())?
            .map_or(0, |s| s.revision)
            + 1;
        let stored = StoredDocument {
            revision,
            data: document,
        };
        self.put_raw(T::COLLECTION, document.id(), &stored)?;
        Ok(revision)
    }

    pub fn insert<T: Document>(&mut self, document: &T) -> Result<(), AppResponse> {
        if document.id().is_empty() {
            return Err(AppResponse::BadRequest(
                "Document id cannot be empty".to_string(),
            ));
        }
        if self.get_raw(T::COLLECTION, document.id())?.is_some() {
            return Err(AppResponse::Conflict(format!(
                "{} document {} already exists",
                T::COLLECTION,
                document.id()
            )));
        }
        self.put(document).map(|_| ())
    }

    pub fn put_if_revision<T: Document>(
        &mut self,
        document: &T,
        expected_revision: u64,
    ) -> Result<u64, AppResponse> {
        let current = self
            .get_raw(T::COLLECTION, document.id())?
            .ok_or_else(|| {
                AppResponse::NotFound(format!("No {} document with id: {}", T::COLLECTION, document.id()))
            })?
            .revision;
        if current != expected_revision {
            return Err(AppResponse::Conflict(format!(
                "{}/{} is at revision {current}, expected {expected_revision}",
                T::COLLECTION,
                document.id()
            )));
        }
        self.put(document)
    }

    pub fn delete(&mut self, collection: Collection, id: &str) -> Result<bool, AppResponse> {
        let db = database_for(self.databases, collection)?;
        match self.txn.del(db, &id, None) {
            Ok(()) => {
                debug!("Deleted {collection}/{id}");
                Ok(true)
            }
            Err(lmdb::Error::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn put_raw<T: Serialize>(
        &mut self,
        collection: Collection,
        id: &str,
        stored: &StoredDocument<T>,
    ) -> Result<(), AppResponse> {
        let db = database_for(self.databases, collection)?;
        let bytes = serde_json::to_vec(stored)?;
        self.txn.put(db, &id, &bytes, WriteFlags::empty())?;
        debug!("Wrote {collection}/{id} at revision {}", stored.revision);
        Ok(())
    }
}

fn database_for(
    databases: &HashMap<Collection, Database>,
    collection: Collection,
) -> Result<Database, AppResponse> {
    databases
        .get(&collection)
        .copied()
        .ok_or_else(|| AppResponse::DatabaseError(format!("Collection {collection} is not open")))
}

fn read_stored<Tx: Transaction, T: DeserializeOwned>(
    txn: &Tx,
    db: Database,
    id: &str,
) -> Result<Option<StoredDocument<T>>, AppResponse> {
    match txn.get(db, &id) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn scan_stored<Tx: Transaction, T: DeserializeOwned>(
    txn: &Tx,
    db: Database,
) -> Result<Vec<StoredDocument<T>>, AppResponse> {
    let mut cursor = txn.open_ro_cursor(db)?;
    let mut documents = Vec::new();
    // `iter_start` panics on an empty database; an unpositioned `iter` starts at the first key.
    for (_key, value) in cursor.iter() {
        documents.push(serde_json::from_slice(value)?);
    }
    Ok(documents)
}
