//! Namespace catalog: databases, collections, documents and indexes.
//!
//! The apply engine only sees the [`Catalog`] trait. [`InMemoryCatalog`]
//! is the reference implementation used by tests and tools.

use crate::error::{ApplyErrorCode, CoreError, CoreResult};
use crate::types::Namespace;
use crate::update::matches;
use parking_lot::{Mutex, RwLock};
use replog_codec::{Document, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Name of the index every collection has on `_id`.
pub const ID_INDEX_NAME: &str = "_id_";

fn bad_spec(message: impl Into<String>) -> CoreError {
    CoreError::apply(ApplyErrorCode::BadIndexSpec, message)
}

/// A validated index definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name, unique within the collection.
    pub name: String,
    /// Key pattern: field to `1`, `-1` or an index type name.
    pub key: Document,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Remaining options, compared when deciding if two specs are identical.
    pub options: Document,
}

impl IndexSpec {
    /// Creates a spec with no extra options.
    #[must_use]
    pub fn new(name: impl Into<String>, key: Document) -> Self {
        Self {
            name: name.into(),
            key,
            unique: false,
            options: Document::new(),
        }
    }

    /// The default `_id` index.
    #[must_use]
    pub fn id_index() -> Self {
        Self::new(ID_INDEX_NAME, Document::new().with("_id", 1))
    }

    /// Parses and validates an index spec document.
    ///
    /// `ns` is accepted and dropped; `v` is ignored.
    ///
    /// # Errors
    ///
    /// `BadIndexSpec` for a missing or empty key or name, a key value that
    /// is not `1`, `-1` or a type name, or a mistyped `unique`.
    pub fn from_document(doc: &Document) -> CoreResult<Self> {
        let key = doc
            .get_document("key")
            .ok_or_else(|| bad_spec("index spec requires a 'key' document"))?;
        if key.is_empty() {
            return Err(bad_spec("index key pattern is empty"));
        }
        for (field, direction) in key.iter() {
            let valid = match direction {
                Value::Integer(1 | -1) => true,
                Value::Text(kind) => !kind.is_empty(),
                _ => false,
            };
            if field.is_empty() || !valid {
                return Err(bad_spec(format!(
                    "bad index key entry {field:?}: {direction:?}"
                )));
            }
        }

        let name = doc
            .get_text("name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| bad_spec("index spec requires a non-empty 'name'"))?;

        let unique = match doc.get("unique") {
            None => false,
            Some(v) => v
                .as_bool()
                .ok_or_else(|| bad_spec("'unique' must be a bool"))?,
        };

        let options = doc
            .iter()
            .filter(|(k, _)| !matches!(*k, "key" | "name" | "unique" | "ns" | "v"))
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        Ok(Self {
            name: name.to_string(),
            key: key.clone(),
            unique,
            options,
        })
    }

    /// Serializes to a spec document.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new()
            .with("v", 2)
            .with("key", self.key.clone())
            .with("name", self.name.as_str());
        if self.unique {
            doc.insert("unique", true);
        }
        for (k, v) in self.options.iter() {
            doc.insert(k, v.clone());
        }
        doc
    }

    /// True if both specs define the same index apart from the name.
    #[must_use]
    pub fn same_definition(&self, other: &Self) -> bool {
        self.key == other.key && self.unique == other.unique && self.options == other.options
    }
}

/// Outcome of an index creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The index was registered.
    Created,
    /// An identical index already existed.
    AlreadyExists,
}

/// Outcome of a document insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The document was stored.
    Inserted,
    /// A document with the same `_id` already exists; nothing changed.
    DuplicateKey,
}

/// Metadata for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    /// Full namespace.
    pub namespace: Namespace,
    /// Collection UUID, if assigned.
    pub uuid: Option<Uuid>,
    /// Creation options as last modified.
    pub options: Document,
}

/// Local state the apply engine mutates.
pub trait Catalog: Send + Sync {
    /// True if the database exists.
    fn database_exists(&self, db: &str) -> bool;

    /// Ensures the database exists. Returns true if it was created.
    ///
    /// # Errors
    ///
    /// `InvalidNamespace` for an empty or malformed name.
    fn create_database(&self, db: &str) -> CoreResult<bool>;

    /// Drops a database and its collections. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn drop_database(&self, db: &str) -> CoreResult<bool>;

    /// Returns collection metadata.
    fn collection(&self, ns: &Namespace) -> Option<CollectionInfo>;

    /// Lists collections of a database.
    fn list_collections(&self, db: &str) -> Vec<CollectionInfo>;

    /// Creates a collection (and its database). Returns false if it existed.
    ///
    /// # Errors
    ///
    /// `InvalidNamespace` if `ns` cannot name a collection.
    fn create_collection(&self, ns: &Namespace, uuid: Option<Uuid>, options: Document) -> CoreResult<bool>;

    /// Drops a collection. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn drop_collection(&self, ns: &Namespace) -> CoreResult<bool>;

    /// Renames a collection, keeping its documents and indexes.
    ///
    /// # Errors
    ///
    /// `NamespaceNotFound` if `from` is missing; `NamespaceExists` if `to`
    /// exists and `drop_target` is false.
    fn rename_collection(&self, from: &Namespace, to: &Namespace, drop_target: bool) -> CoreResult<()>;

    /// Merges `options` into a collection's options.
    ///
    /// # Errors
    ///
    /// `NamespaceNotFound` if the collection is missing.
    fn modify_collection(&self, ns: &Namespace, options: &Document) -> CoreResult<()>;

    /// Looks a document up by `_id`.
    ///
    /// # Errors
    ///
    /// Fails if the id cannot be encoded.
    fn find_by_id(&self, ns: &Namespace, id: &Value) -> CoreResult<Option<Document>>;

    /// Returns the first document matching `criteria`.
    fn find_one(&self, ns: &Namespace, criteria: &Document) -> Option<Document>;

    /// Inserts a document with an `_id`, leaving an existing one untouched.
    ///
    /// # Errors
    ///
    /// `NamespaceNotFound` if the collection is missing; `InvalidEntry` if
    /// the document has no `_id`.
    fn insert_document(&self, ns: &Namespace, doc: Document) -> CoreResult<InsertOutcome>;

    /// Stores a document by `_id`, replacing any existing one.
    ///
    /// # Errors
    ///
    /// As [`Catalog::insert_document`].
    fn replace_document(&self, ns: &Namespace, doc: Document) -> CoreResult<()>;

    /// Deletes a document by `_id`. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Fails if the id cannot be encoded.
    fn delete_document(&self, ns: &Namespace, id: &Value) -> CoreResult<bool>;

    /// Number of documents in a collection; zero if it does not exist.
    fn document_count(&self, ns: &Namespace) -> usize;

    /// Lists a collection's indexes.
    ///
    /// # Errors
    ///
    /// `NamespaceNotFound` if the collection is missing.
    fn list_indexes(&self, ns: &Namespace) -> CoreResult<Vec<IndexSpec>>;

    /// Registers an index.
    ///
    /// # Errors
    ///
    /// `NamespaceNotFound` if the collection is missing; `IndexConflict` if
    /// an index with the same name or key but another definition exists.
    fn create_index(&self, ns: &Namespace, spec: IndexSpec) -> CoreResult<IndexOutcome>;

    /// Drops an index by name. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// `NamespaceNotFound` if the collection is missing; `BadIndexSpec` for
    /// the `_id` index.
    fn drop_index(&self, ns: &Namespace, name: &str) -> CoreResult<bool>;
}

#[derive(Debug, Clone)]
struct CollectionState {
    uuid: Option<Uuid>,
    options: Document,
    documents: BTreeMap<Vec<u8>, Document>,
    indexes: Vec<IndexSpec>,
}

impl CollectionState {
    fn new(uuid: Option<Uuid>, options: Document) -> Self {
        Self {
            uuid,
            options,
            documents: BTreeMap::new(),
            indexes: vec![IndexSpec::id_index()],
        }
    }
}

type Databases = BTreeMap<String, BTreeMap<String, CollectionState>>;

/// Reference catalog kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    databases: RwLock<Databases>,
}

fn not_found(ns: &Namespace) -> CoreError {
    CoreError::apply(
        ApplyErrorCode::NamespaceNotFound,
        format!("namespace {ns} not found"),
    )
}

fn document_key(doc: &Document) -> CoreResult<Vec<u8>> {
    let id = doc.id().ok_or_else(|| {
        CoreError::apply(ApplyErrorCode::InvalidEntry, "document has no _id")
    })?;
    Ok(id.key_bytes()?)
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every document of a collection in `_id` key order.
    #[must_use]
    pub fn documents(&self, ns: &Namespace) -> Vec<Document> {
        self.with_collection(ns, |c| c.documents.values().cloned().collect())
            .unwrap_or_default()
    }

    fn with_collection<R>(&self, ns: &Namespace, f: impl FnOnce(&CollectionState) -> R) -> Option<R> {
        let dbs = self.databases.read();
        dbs.get(ns.db()).and_then(|colls| colls.get(ns.coll())).map(f)
    }

    fn with_collection_mut<R>(
        &self,
        ns: &Namespace,
        f: impl FnOnce(&mut CollectionState) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let mut dbs = self.databases.write();
        let coll = dbs
            .get_mut(ns.db())
            .and_then(|colls| colls.get_mut(ns.coll()))
            .ok_or_else(|| not_found(ns))?;
        f(coll)
    }
}

impl Catalog for InMemoryCatalog {
    fn database_exists(&self, db: &str) -> bool {
        self.databases.read().contains_key(db)
    }

    fn create_database(&self, db: &str) -> CoreResult<bool> {
        if db.is_empty() || db.contains(['.', '$', '/', '\\', ' ', '\0']) {
            return Err(CoreError::apply(
                ApplyErrorCode::InvalidNamespace,
                format!("invalid database name {db:?}"),
            ));
        }
        let mut dbs = self.databases.write();
        if dbs.contains_key(db) {
            return Ok(false);
        }
        dbs.insert(db.to_string(), BTreeMap::new());
        Ok(true)
    }

    fn drop_database(&self, db: &str) -> CoreResult<bool> {
        Ok(self.databases.write().remove(db).is_some())
    }

    fn collection(&self, ns: &Namespace) -> Option<CollectionInfo> {
        self.with_collection(ns, |c| CollectionInfo {
            namespace: ns.clone(),
            uuid: c.uuid,
            options: c.options.clone(),
        })
    }

    fn list_collections(&self, db: &str) -> Vec<CollectionInfo> {
        let dbs = self.databases.read();
        dbs.get(db)
            .map(|colls| {
                colls
                    .iter()
                    .map(|(name, c)| CollectionInfo {
                        namespace: Namespace::from_parts(db, name),
                        uuid: c.uuid,
                        options: c.options.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn create_collection(&self, ns: &Namespace, uuid: Option<Uuid>, options: Document) -> CoreResult<bool> {
        if !ns.is_valid_collection() {
            return Err(CoreError::apply(
                ApplyErrorCode::InvalidNamespace,
                format!("cannot create collection {ns:?}"),
            ));
        }
        self.create_database(ns.db())?;
        let mut dbs = self.databases.write();
        let colls = dbs.entry(ns.db().to_string()).or_default();
        if colls.contains_key(ns.coll()) {
            return Ok(false);
        }
        colls.insert(ns.coll().to_string(), CollectionState::new(uuid, options));
        Ok(true)
    }

    fn drop_collection(&self, ns: &Namespace) -> CoreResult<bool> {
        let mut dbs = self.databases.write();
        Ok(dbs
            .get_mut(ns.db())
            .and_then(|colls| colls.remove(ns.coll()))
            .is_some())
    }

    fn rename_collection(&self, from: &Namespace, to: &Namespace, drop_target: bool) -> CoreResult<()> {
        if !to.is_valid_collection() {
            return Err(CoreError::apply(
                ApplyErrorCode::InvalidNamespace,
                format!("cannot rename to {to:?}"),
            ));
        }
        let mut dbs = self.databases.write();
        let exists = |dbs: &Databases, ns: &Namespace| {
            dbs.get(ns.db()).is_some_and(|c| c.contains_key(ns.coll()))
        };
        if !exists(&*dbs, from) {
            return Err(not_found(from));
        }
        if from == to {
            return Ok(());
        }
        if exists(&*dbs, to) && !drop_target {
            return Err(CoreError::apply(
                ApplyErrorCode::NamespaceExists,
                format!("target namespace {to} exists"),
            ));
        }

        let state = dbs
            .get_mut(from.db())
            .and_then(|colls| colls.remove(from.coll()))
            .ok_or_else(|| not_found(from))?;
        dbs.entry(to.db().to_string())
            .or_default()
            .insert(to.coll().to_string(), state);
        Ok(())
    }

    fn modify_collection(&self, ns: &Namespace, options: &Document) -> CoreResult<()> {
        self.with_collection_mut(ns, |c| {
            for (k, v) in options.iter() {
                c.options.insert(k, v.clone());
            }
            Ok(())
        })
    }

    fn find_by_id(&self, ns: &Namespace, id: &Value) -> CoreResult<Option<Document>> {
        let key = id.key_bytes()?;
        Ok(self
            .with_collection(ns, |c| c.documents.get(&key).cloned())
            .flatten())
    }

    fn find_one(&self, ns: &Namespace, criteria: &Document) -> Option<Document> {
        self.with_collection(ns, |c| {
            c.documents
                .values()
                .find(|doc| matches(doc, criteria))
                .cloned()
        })
        .flatten()
    }

    fn insert_document(&self, ns: &Namespace, doc: Document) -> CoreResult<InsertOutcome> {
        let key = document_key(&doc)?;
        self.with_collection_mut(ns, |c| {
            if c.documents.contains_key(&key) {
                return Ok(InsertOutcome::DuplicateKey);
            }
            c.documents.insert(key, doc);
            Ok(InsertOutcome::Inserted)
        })
    }

    fn replace_document(&self, ns: &Namespace, doc: Document) -> CoreResult<()> {
        let key = document_key(&doc)?;
        self.with_collection_mut(ns, |c| {
            c.documents.insert(key, doc);
            Ok(())
        })
    }

    fn delete_document(&self, ns: &Namespace, id: &Value) -> CoreResult<bool> {
        let key = id.key_bytes()?;
        let mut dbs = self.databases.write();
        Ok(dbs
            .get_mut(ns.db())
            .and_then(|colls| colls.get_mut(ns.coll()))
            .and_then(|c| c.documents.remove(&key))
            .is_some())
    }

    fn document_count(&self, ns: &Namespace) -> usize {
        self.with_collection(ns, |c| c.documents.len()).unwrap_or(0)
    }

    fn list_indexes(&self, ns: &Namespace) -> CoreResult<Vec<IndexSpec>> {
        self.with_collection(ns, |c| c.indexes.clone())
            .ok_or_else(|| not_found(ns))
    }

    fn create_index(&self, ns: &Namespace, spec: IndexSpec) -> CoreResult<IndexOutcome> {
        self.with_collection_mut(ns, |c| {
            if let Some(existing) = c.indexes.iter().find(|i| i.name == spec.name) {
                if existing.same_definition(&spec) {
                    return Ok(IndexOutcome::AlreadyExists);
                }
                return Err(CoreError::apply(
                    ApplyErrorCode::IndexConflict,
                    format!("index {:?} exists with a different definition", spec.name),
                ));
            }
            if let Some(existing) = c.indexes.iter().find(|i| i.key == spec.key) {
                return Err(CoreError::apply(
                    ApplyErrorCode::IndexConflict,
                    format!(
                        "index {:?} already covers the key of {:?}",
                        existing.name, spec.name
                    ),
                ));
            }
            c.indexes.push(spec);
            Ok(IndexOutcome::Created)
        })
    }

    fn drop_index(&self, ns: &Namespace, name: &str) -> CoreResult<bool> {
        if name == ID_INDEX_NAME {
            return Err(bad_spec("cannot drop the _id index"));
        }
        self.with_collection_mut(ns, |c| {
            let before = c.indexes.len();
            c.indexes.retain(|i| i.name != name);
            Ok(c.indexes.len() != before)
        })
    }
}

/// Per-namespace exclusive locks shared by apply and local writers.
#[derive(Debug, Default)]
pub struct NamespaceLocks {
    table: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NamespaceLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, ns: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.table.lock().entry(ns.to_string()).or_default())
    }

    /// Runs `f` holding every named namespace exclusively.
    ///
    /// Locks are taken in sorted order so two callers locking overlapping
    /// sets cannot deadlock. Entries nobody else holds are dropped from the
    /// table afterwards.
    pub fn with_locked<R>(&self, namespaces: &[&Namespace], f: impl FnOnce() -> R) -> R {
        let mut names: Vec<&str> = namespaces.iter().map(|ns| ns.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        let handles: Vec<Arc<Mutex<()>>> = names.iter().map(|n| self.handle(n)).collect();
        let result = {
            let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();
            f()
        };
        drop(handles);
        self.prune(&names);
        result
    }

    // Handles are only cloned under the table lock, so a count of one here
    // means no other caller holds or waits on the namespace.
    fn prune(&self, names: &[&str]) {
        let mut table = self.table.lock();
        for name in names {
            if table.get(*name).is_some_and(|h| Arc::strong_count(h) == 1) {
                table.remove(*name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(s: &str) -> Namespace {
        Namespace::new(s)
    }

    #[test]
    fn collection_lifecycle() {
        let catalog = InMemoryCatalog::new();
        assert!(catalog.create_collection(&ns("app.users"), None, Document::new()).unwrap());
        assert!(!catalog.create_collection(&ns("app.users"), None, Document::new()).unwrap());
        assert!(catalog.database_exists("app"));
        assert_eq!(catalog.list_collections("app").len(), 1);

        assert!(catalog.drop_collection(&ns("app.users")).unwrap());
        assert!(!catalog.drop_collection(&ns("app.users")).unwrap());
        assert!(catalog.collection(&ns("app.users")).is_none());
    }

    #[test]
    fn command_namespace_is_not_a_collection() {
        let catalog = InMemoryCatalog::new();
        let err = catalog
            .create_collection(&ns("app.$cmd"), None, Document::new())
            .unwrap_err();
        assert_eq!(err.apply_code(), Some(ApplyErrorCode::InvalidNamespace));
    }

    #[test]
    fn documents_by_id() {
        let catalog = InMemoryCatalog::new();
        let users = ns("app.users");
        catalog.create_collection(&users, None, Document::new()).unwrap();

        let doc = Document::new().with("_id", 1).with("n", "a");
        assert_eq!(catalog.insert_document(&users, doc.clone()).unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            catalog
                .insert_document(&users, Document::new().with("_id", 1).with("n", "b"))
                .unwrap(),
            InsertOutcome::DuplicateKey
        );
        assert_eq!(catalog.find_by_id(&users, &Value::Integer(1)).unwrap(), Some(doc));

        assert!(catalog.delete_document(&users, &Value::Integer(1)).unwrap());
        assert!(!catalog.delete_document(&users, &Value::Integer(1)).unwrap());
        assert!(catalog.insert_document(&users, Document::new().with("n", 1)).is_err());
    }

    #[test]
    fn insert_into_missing_collection_fails() {
        let catalog = InMemoryCatalog::new();
        let err = catalog
            .insert_document(&ns("app.none"), Document::new().with("_id", 1))
            .unwrap_err();
        assert_eq!(err.apply_code(), Some(ApplyErrorCode::NamespaceNotFound));
    }

    #[test]
    fn rename_rules() {
        let catalog = InMemoryCatalog::new();
        let a = ns("app.a");
        let b = ns("app.b");
        catalog.create_collection(&a, None, Document::new()).unwrap();
        catalog.insert_document(&a, Document::new().with("_id", 1)).unwrap();
        catalog.create_collection(&b, None, Document::new()).unwrap();

        let err = catalog.rename_collection(&a, &b, false).unwrap_err();
        assert_eq!(err.apply_code(), Some(ApplyErrorCode::NamespaceExists));

        catalog.rename_collection(&a, &b, true).unwrap();
        assert_eq!(catalog.document_count(&b), 1);
        assert!(catalog.collection(&a).is_none());

        let err = catalog.rename_collection(&a, &ns("other.c"), false).unwrap_err();
        assert_eq!(err.apply_code(), Some(ApplyErrorCode::NamespaceNotFound));
    }

    #[test]
    fn index_spec_validation() {
        let good = Document::new()
            .with("v", 2)
            .with("key", Document::new().with("email", 1))
            .with("name", "email_1")
            .with("ns", "app.users")
            .with("unique", true);
        let spec = IndexSpec::from_document(&good).unwrap();
        assert!(spec.unique);
        assert!(spec.options.is_empty());

        let no_key = Document::new().with("name", "x");
        let empty_key = Document::new().with("key", Document::new()).with("name", "x");
        let bad_dir = Document::new()
            .with("key", Document::new().with("a", 2))
            .with("name", "x");
        let no_name = Document::new().with("key", Document::new().with("a", 1));
        for doc in [no_key, empty_key, bad_dir, no_name] {
            let err = IndexSpec::from_document(&doc).unwrap_err();
            assert_eq!(err.apply_code(), Some(ApplyErrorCode::BadIndexSpec));
        }
    }

    #[test]
    fn index_creation_is_idempotent_and_detects_conflicts() {
        let catalog = InMemoryCatalog::new();
        let users = ns("app.users");
        catalog.create_collection(&users, None, Document::new()).unwrap();
        let spec = IndexSpec::new("email_1", Document::new().with("email", 1));

        assert_eq!(catalog.create_index(&users, spec.clone()).unwrap(), IndexOutcome::Created);
        assert_eq!(
            catalog.create_index(&users, spec.clone()).unwrap(),
            IndexOutcome::AlreadyExists
        );

        let mut unique = spec.clone();
        unique.unique = true;
        let err = catalog.create_index(&users, unique).unwrap_err();
        assert_eq!(err.apply_code(), Some(ApplyErrorCode::IndexConflict));

        let renamed = IndexSpec::new("by_email", Document::new().with("email", 1));
        assert!(catalog.create_index(&users, renamed).is_err());

        assert_eq!(catalog.list_indexes(&users).unwrap().len(), 2);
        assert!(catalog.drop_index(&users, "email_1").unwrap());
        assert!(!catalog.drop_index(&users, "email_1").unwrap());
        assert!(catalog.drop_index(&users, ID_INDEX_NAME).is_err());
    }

    #[test]
    fn namespace_locks_dedup_and_release() {
        let locks = NamespaceLocks::new();
        let a = ns("app.a");
        let b = ns("app.b");
        let out = locks.with_locked(&[&b, &a, &b], || 7);
        assert_eq!(out, 7);
        assert_eq!(locks.with_locked(&[&a], || 8), 8);
        assert!(locks.table.lock().is_empty());
    }

    #[test]
    fn namespace_locks_keep_entries_while_held() {
        let locks = Arc::new(NamespaceLocks::new());
        let a = ns("app.a");
        let b = ns("app.b");
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let holder = {
            let locks = Arc::clone(&locks);
            let a = a.clone();
            std::thread::spawn(move || {
                locks.with_locked(&[&a], || {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                });
            })
        };
        entered_rx.recv().unwrap();

        locks.with_locked(&[&b], || ());
        {
            let table = locks.table.lock();
            assert!(table.contains_key("app.a"));
            assert!(!table.contains_key("app.b"));
        }

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        assert!(locks.table.lock().is_empty());
    }
}
