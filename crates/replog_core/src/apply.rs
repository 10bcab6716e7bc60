//! Replaying logged entries against local state.
//!
//! The apply engine is the read-side dual of the writer: it takes an entry
//! that was logged somewhere and re-executes its effect through the
//! [`Catalog`]. Re-applying an entry is always safe. What "safe" means
//! depends on the [`ApplyMode`]:
//!
//! - **Steady state**: the node is following a live primary. An update
//!   whose target is missing becomes an upsert, and a duplicate insert
//!   overwrites the stored document.
//! - **Initial sync**: the node copied data that may already reflect later
//!   entries. Updates are literal, a missing target is a no-op, a duplicate
//!   insert leaves the stored document alone, and namespace conflicts that
//!   later entries will resolve are tolerated.
//!
//! Tolerated outcomes are logged at `debug` and counted in [`ApplyStats`].

use crate::catalog::{Catalog, IndexOutcome, IndexSpec, InsertOutcome, NamespaceLocks, ID_INDEX_NAME};
use crate::entry::{OpKind, OplogEntry};
use crate::error::{ApplyErrorCode, CoreError, CoreResult};
use crate::session::SessionTracker;
use crate::stats::ApplyStats;
use crate::types::Namespace;
use crate::update::{apply_update, upsert_seed};
use replog_codec::{Document, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Replay semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyMode {
    /// Copying data from a sync source.
    InitialSync,
    /// Following a live primary.
    SteadyState,
}

impl ApplyMode {
    /// True for [`ApplyMode::SteadyState`].
    #[must_use]
    pub const fn is_steady_state(self) -> bool {
        matches!(self, Self::SteadyState)
    }
}

/// Notified once per successfully applied non-command entry.
pub trait OpsAppliedObserver {
    /// Called after an entry's effect is in place.
    fn on_op_applied(&self);
}

impl<F: Fn()> OpsAppliedObserver for F {
    fn on_op_applied(&self) {
        self();
    }
}

fn invalid_entry(message: impl Into<String>) -> CoreError {
    CoreError::apply(ApplyErrorCode::InvalidEntry, message)
}

/// Re-executes logged entries.
pub struct ApplyEngine {
    catalog: Arc<dyn Catalog>,
    sessions: Arc<dyn SessionTracker>,
    locks: Arc<NamespaceLocks>,
    stats: ApplyStats,
}

impl ApplyEngine {
    /// Creates an engine with its own lock table.
    pub fn new(catalog: Arc<dyn Catalog>, sessions: Arc<dyn SessionTracker>) -> Self {
        Self::with_locks(catalog, sessions, Arc::new(NamespaceLocks::new()))
    }

    /// Creates an engine sharing `locks` with local writers.
    pub fn with_locks(
        catalog: Arc<dyn Catalog>,
        sessions: Arc<dyn SessionTracker>,
        locks: Arc<NamespaceLocks>,
    ) -> Self {
        Self {
            catalog,
            sessions,
            locks,
            stats: ApplyStats::new(),
        }
    }

    /// Returns the catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Returns the namespace lock table.
    #[must_use]
    pub fn locks(&self) -> &Arc<NamespaceLocks> {
        &self.locks
    }

    /// Returns the engine's counters.
    #[must_use]
    pub fn stats(&self) -> &ApplyStats {
        &self.stats
    }

    /// Decodes a wire document and applies it through the matching entry
    /// point.
    ///
    /// # Errors
    ///
    /// `InvalidEntry` if the document is not a valid entry; otherwise as
    /// [`ApplyEngine::apply_operation`] or [`ApplyEngine::apply_command`].
    pub fn apply_document(
        &self,
        doc: &Document,
        mode: ApplyMode,
        observer: &dyn OpsAppliedObserver,
    ) -> CoreResult<()> {
        let entry = OplogEntry::from_document(doc).map_err(|e| {
            self.stats.record_failure();
            invalid_entry(e.to_string())
        })?;
        self.apply_entry(&entry, mode, observer)
    }

    /// Applies any entry through the matching entry point.
    ///
    /// # Errors
    ///
    /// As [`ApplyEngine::apply_operation`] or [`ApplyEngine::apply_command`].
    pub fn apply_entry(
        &self,
        entry: &OplogEntry,
        mode: ApplyMode,
        observer: &dyn OpsAppliedObserver,
    ) -> CoreResult<()> {
        match entry.kind {
            OpKind::Command => self.apply_command(entry, mode),
            _ => self.apply_operation(entry, mode, observer),
        }
    }

    /// Applies an insert, update, delete, no-op or database marker.
    ///
    /// The observer fires once on success. Entries whose session statement
    /// was already applied are skipped without firing it.
    ///
    /// # Errors
    ///
    /// `WrongEntryPoint` for commands; other `Apply` codes for entries
    /// that cannot be reconciled with local state.
    pub fn apply_operation(
        &self,
        entry: &OplogEntry,
        mode: ApplyMode,
        observer: &dyn OpsAppliedObserver,
    ) -> CoreResult<()> {
        let result = self.apply_operation_inner(entry, mode, observer);
        if let Err(e) = &result {
            self.stats.record_failure();
            tracing::debug!(op_time = %entry.op_time(), error = %e, "apply failed");
        }
        result
    }

    fn apply_operation_inner(
        &self,
        entry: &OplogEntry,
        mode: ApplyMode,
        observer: &dyn OpsAppliedObserver,
    ) -> CoreResult<()> {
        if entry.kind == OpKind::Command {
            return Err(CoreError::apply(
                ApplyErrorCode::WrongEntryPoint,
                format!("command entry {entry} passed to apply_operation"),
            ));
        }

        let statement = entry.session.zip(entry.statement_id);
        if let Some((session, stmt)) = statement {
            if self.sessions.has_applied(&session, stmt) {
                tracing::debug!(
                    op_time = %entry.op_time(),
                    session = %session.session_id,
                    %stmt,
                    "skipping already applied statement"
                );
                self.stats.record_duplicate();
                return Ok(());
            }
        }

        match entry.kind {
            OpKind::Noop | OpKind::Command => {}
            OpKind::DbMarker => {
                self.catalog.create_database(entry.namespace.db())?;
            }
            OpKind::Insert if entry.namespace.is_system_indexes() => {
                let (target, spec) =
                    self.prep_for_apply_ops_index_insert(&entry.namespace, &entry.object)?;
                self.locks.with_locked(&[&target], || {
                    self.create_index_inner(&target, entry.uuid, spec)
                })?;
            }
            OpKind::Insert => {
                self.locks
                    .with_locked(&[&entry.namespace], || self.apply_insert(entry, mode))?;
            }
            OpKind::Update => {
                self.locks
                    .with_locked(&[&entry.namespace], || self.apply_update(entry, mode))?;
            }
            OpKind::Delete => {
                self.locks
                    .with_locked(&[&entry.namespace], || self.apply_delete(entry))?;
            }
        }

        if let Some((session, stmt)) = statement {
            self.sessions.record_applied(&session, stmt, entry.op_time());
        }
        observer.on_op_applied();
        Ok(())
    }

    fn tolerate(&self, entry: &OplogEntry, what: &str) {
        tracing::debug!(op_time = %entry.op_time(), ns = %entry.namespace, "{what}");
        self.stats.record_tolerated();
    }

    fn ensure_collection(&self, ns: &Namespace, uuid: Option<Uuid>) -> CoreResult<()> {
        if self.catalog.create_collection(ns, uuid, Document::new())? {
            tracing::debug!(%ns, "implicitly created collection");
        }
        Ok(())
    }

    fn apply_insert(&self, entry: &OplogEntry, mode: ApplyMode) -> CoreResult<()> {
        if entry.object.id().is_none() {
            return Err(invalid_entry(format!("insert {entry} has no _id")));
        }
        self.ensure_collection(&entry.namespace, entry.uuid)?;

        match self
            .catalog
            .insert_document(&entry.namespace, entry.object.clone())?
        {
            InsertOutcome::Inserted => Ok(()),
            InsertOutcome::DuplicateKey if mode.is_steady_state() => {
                self.catalog
                    .replace_document(&entry.namespace, entry.object.clone())?;
                self.tolerate(entry, "duplicate insert replaced existing document");
                Ok(())
            }
            InsertOutcome::DuplicateKey => {
                self.tolerate(entry, "duplicate insert ignored");
                Ok(())
            }
        }
    }

    fn apply_update(&self, entry: &OplogEntry, mode: ApplyMode) -> CoreResult<()> {
        let criteria = entry
            .criteria
            .as_ref()
            .ok_or_else(|| invalid_entry(format!("update {entry} has no criteria")))?;
        let ns = &entry.namespace;

        let existing = match criteria.id() {
            Some(id) => self.catalog.find_by_id(ns, id)?,
            None => self.catalog.find_one(ns, criteria),
        };

        match existing {
            Some(current) => {
                let updated = apply_update(&current, &entry.object)?;
                self.catalog.replace_document(ns, updated)?;
            }
            None if mode.is_steady_state() => {
                let seed = upsert_seed(criteria)?;
                let doc = apply_update(&seed, &entry.object)?;
                if doc.id().is_none() {
                    // Nothing to key an upsert by: an earlier replay already
                    // moved the target out of the criteria.
                    self.tolerate(entry, "update of missing document has no _id to upsert");
                    return Ok(());
                }
                self.ensure_collection(ns, entry.uuid)?;
                self.catalog.replace_document(ns, doc)?;
                self.stats.record_upsert();
                tracing::debug!(op_time = %entry.op_time(), %ns, "update of missing document applied as upsert");
            }
            None => self.tolerate(entry, "update of missing document ignored"),
        }
        Ok(())
    }

    fn apply_delete(&self, entry: &OplogEntry) -> CoreResult<()> {
        let ns = &entry.namespace;
        let removed = match entry.object.id() {
            Some(id) => self.catalog.delete_document(ns, id)?,
            None if entry.object.is_empty() => {
                return Err(invalid_entry(format!("delete {entry} has an empty target")));
            }
            None => match self.catalog.find_one(ns, &entry.object) {
                Some(doc) => match doc.id() {
                    Some(id) => self.catalog.delete_document(ns, id)?,
                    None => false,
                },
                None => false,
            },
        };
        if !removed {
            self.tolerate(entry, "delete of missing document ignored");
        }
        Ok(())
    }

    /// Validates an insert into `db.system.indexes` and extracts the index.
    ///
    /// The spec's `ns` names the target collection and must be in the same
    /// database as `indexes_ns`. It is stripped from the returned spec.
    ///
    /// # Errors
    ///
    /// `InvalidEntry` if `ns` is missing or not text, `InvalidNamespace` if
    /// it is malformed or in another database, `BadIndexSpec` if the rest
    /// of the spec is invalid.
    pub fn prep_for_apply_ops_index_insert(
        &self,
        indexes_ns: &Namespace,
        index_doc: &Document,
    ) -> CoreResult<(Namespace, IndexSpec)> {
        let target = index_doc
            .get_text("ns")
            .map(Namespace::new)
            .ok_or_else(|| invalid_entry("index insert is missing a text 'ns' field"))?;
        if !target.is_valid_collection() || target.db() != indexes_ns.db() {
            return Err(CoreError::apply(
                ApplyErrorCode::InvalidNamespace,
                format!("index target {target} is not a collection of {}", indexes_ns.db()),
            ));
        }
        let spec = IndexSpec::from_document(index_doc)?;
        Ok((target, spec))
    }

    /// Creates an index on behalf of an applied operation and notifies the
    /// observer.
    ///
    /// The collection is created if missing. An identical existing index is
    /// success.
    ///
    /// # Errors
    ///
    /// `BadIndexSpec` for a malformed spec, `IndexConflict` for a clashing
    /// definition.
    pub fn create_index_for_apply_ops(
        &self,
        ns: &Namespace,
        spec_doc: &Document,
        observer: &dyn OpsAppliedObserver,
    ) -> CoreResult<IndexOutcome> {
        let spec = IndexSpec::from_document(spec_doc)?;
        let outcome = self
            .locks
            .with_locked(&[ns], || self.create_index_inner(ns, None, spec))?;
        observer.on_op_applied();
        Ok(outcome)
    }

    fn create_index_inner(
        &self,
        ns: &Namespace,
        uuid: Option<Uuid>,
        spec: IndexSpec,
    ) -> CoreResult<IndexOutcome> {
        self.ensure_collection(ns, uuid)?;
        let name = spec.name.clone();
        let outcome = self.catalog.create_index(ns, spec)?;
        match outcome {
            IndexOutcome::Created => tracing::debug!(%ns, index = %name, "created index"),
            IndexOutcome::AlreadyExists => {
                tracing::debug!(%ns, index = %name, "identical index already exists");
                self.stats.record_tolerated();
            }
        }
        Ok(outcome)
    }

    /// Applies a command entry. The observer is not involved.
    ///
    /// # Errors
    ///
    /// `WrongEntryPoint` for non-command entries, `UnknownCommand` for an
    /// unrecognized command, and other `Apply` codes for namespace states
    /// that cannot be reconciled in `mode`.
    pub fn apply_command(&self, entry: &OplogEntry, mode: ApplyMode) -> CoreResult<()> {
        let result = self.apply_command_inner(entry, mode);
        match &result {
            Ok(()) => self.stats.record_command(),
            Err(e) => {
                self.stats.record_failure();
                tracing::debug!(op_time = %entry.op_time(), error = %e, "command failed");
            }
        }
        result
    }

    fn apply_command_inner(&self, entry: &OplogEntry, mode: ApplyMode) -> CoreResult<()> {
        if entry.kind != OpKind::Command {
            return Err(CoreError::apply(
                ApplyErrorCode::WrongEntryPoint,
                format!("{} entry {entry} passed to apply_command", entry.kind),
            ));
        }
        let (name, arg) = entry
            .object
            .first()
            .ok_or_else(|| invalid_entry("empty command document"))?;
        let db = entry.namespace.db();
        let cmd = &entry.object;

        match name {
            "create" => {
                let ns = command_target(db, name, arg)?;
                let options = without_first(cmd);
                self.locks.with_locked(&[&ns], || {
                    if !self.catalog.create_collection(&ns, entry.uuid, options)? {
                        self.tolerate(entry, "create of existing collection ignored");
                    }
                    Ok(())
                })
            }
            "drop" => {
                let ns = command_target(db, name, arg)?;
                self.locks.with_locked(&[&ns], || {
                    if !self.catalog.drop_collection(&ns)? {
                        self.tolerate(entry, "drop of missing collection ignored");
                    }
                    Ok(())
                })
            }
            "createIndexes" => {
                let ns = command_target(db, name, arg)?;
                let specs = match cmd.get("indexes") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|item| {
                            item.as_document()
                                .ok_or_else(|| invalid_entry("createIndexes entries must be documents"))
                                .and_then(IndexSpec::from_document)
                        })
                        .collect::<CoreResult<Vec<_>>>()?,
                    Some(_) => return Err(invalid_entry("'indexes' must be an array")),
                    None => vec![IndexSpec::from_document(&without_first(cmd))?],
                };
                self.locks.with_locked(&[&ns], || {
                    specs
                        .into_iter()
                        .try_for_each(|spec| self.create_index_inner(&ns, entry.uuid, spec).map(drop))
                })
            }
            "dropIndexes" | "deleteIndexes" => {
                let ns = command_target(db, name, arg)?;
                let index = cmd
                    .get("index")
                    .ok_or_else(|| invalid_entry(format!("{name} requires 'index'")))?;
                self.locks
                    .with_locked(&[&ns], || self.drop_indexes(entry, &ns, index))
            }
            "renameCollection" => {
                let from = arg
                    .as_text()
                    .map(Namespace::new)
                    .ok_or_else(|| invalid_entry("renameCollection source must be text"))?;
                let to = cmd
                    .get_text("to")
                    .map(Namespace::new)
                    .ok_or_else(|| invalid_entry("renameCollection requires a text 'to'"))?;
                let drop_target = cmd.get_bool("dropTarget").unwrap_or(false);
                self.locks.with_locked(&[&from, &to], || {
                    match self.catalog.rename_collection(&from, &to, drop_target) {
                        Err(e)
                            if !mode.is_steady_state()
                                && matches!(
                                    e.apply_code(),
                                    Some(
                                        ApplyErrorCode::NamespaceNotFound
                                            | ApplyErrorCode::NamespaceExists
                                    )
                                ) =>
                        {
                            self.tolerate(entry, "rename conflict tolerated during initial sync");
                            Ok(())
                        }
                        other => other,
                    }
                })
            }
            "dropDatabase" => {
                let collections: Vec<Namespace> = self
                    .catalog
                    .list_collections(db)
                    .into_iter()
                    .map(|c| c.namespace)
                    .collect();
                let mut held: Vec<&Namespace> = collections.iter().collect();
                held.push(&entry.namespace);
                self.locks.with_locked(&held, || {
                    if !self.catalog.drop_database(db)? {
                        self.tolerate(entry, "drop of missing database ignored");
                    }
                    Ok(())
                })
            }
            "collMod" => {
                let ns = command_target(db, name, arg)?;
                let options = without_first(cmd);
                self.locks.with_locked(&[&ns], || {
                    match self.catalog.modify_collection(&ns, &options) {
                        Err(e)
                            if !mode.is_steady_state()
                                && e.apply_code() == Some(ApplyErrorCode::NamespaceNotFound) =>
                        {
                            self.tolerate(entry, "collMod of missing collection tolerated during initial sync");
                            Ok(())
                        }
                        other => other,
                    }
                })
            }
            other => Err(CoreError::apply(
                ApplyErrorCode::UnknownCommand,
                format!("unknown command {other:?} in {entry}"),
            )),
        }
    }

    fn drop_indexes(&self, entry: &OplogEntry, ns: &Namespace, index: &Value) -> CoreResult<()> {
        let existing = match self.catalog.list_indexes(ns) {
            Ok(indexes) => indexes,
            Err(e) if e.apply_code() == Some(ApplyErrorCode::NamespaceNotFound) => {
                self.tolerate(entry, "dropIndexes on missing collection ignored");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let names: Vec<String> = match index {
            Value::Text(name) if name == "*" => existing
                .into_iter()
                .map(|i| i.name)
                .filter(|n| n != ID_INDEX_NAME)
                .collect(),
            Value::Text(name) => vec![name.clone()],
            Value::Document(key) => existing
                .into_iter()
                .filter(|i| &i.key == key)
                .map(|i| i.name)
                .collect(),
            other => {
                return Err(invalid_entry(format!(
                    "dropIndexes 'index' must be a name or key pattern, got {}",
                    other.type_name()
                )))
            }
        };

        if names.is_empty() {
            self.tolerate(entry, "drop of missing index ignored");
        }
        for name in names {
            if !self.catalog.drop_index(ns, &name)? {
                self.tolerate(entry, "drop of missing index ignored");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ApplyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyEngine")
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

fn command_target(db: &str, command: &str, arg: &Value) -> CoreResult<Namespace> {
    let coll = arg
        .as_text()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| invalid_entry(format!("{command} requires a collection name")))?;
    let ns = Namespace::from_parts(db, coll);
    if !ns.is_valid_collection() {
        return Err(CoreError::apply(
            ApplyErrorCode::InvalidNamespace,
            format!("{command} target {ns:?} is not a collection"),
        ));
    }
    Ok(ns)
}

fn without_first(doc: &Document) -> Document {
    doc.iter()
        .skip(1)
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
