//! Entry construction from operation descriptors.

use crate::allocator::OPLOG_VERSION;
use crate::entry::{check_shape, OpKind, OplogEntry, OplogLink};
use crate::error::{CoreError, CoreResult};
use crate::types::{Namespace, OplogSlot, SessionInfo, StatementId};
use replog_codec::Document;
use uuid::Uuid;

/// Everything about an operation except where it lands in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct OpDescriptor {
    /// Operation kind.
    pub kind: OpKind,
    /// Target namespace.
    pub namespace: Namespace,
    /// Target collection UUID.
    pub uuid: Option<Uuid>,
    /// Primary document.
    pub object: Document,
    /// Criteria document.
    pub criteria: Option<Document>,
    /// Session the write belongs to.
    pub session: Option<SessionInfo>,
    /// Statement within the session.
    pub statement_id: Option<StatementId>,
    /// True for writes made by chunk migration.
    pub from_migrate: bool,
    /// Links to related entries.
    pub link: OplogLink,
}

impl OpDescriptor {
    /// Creates a descriptor with no optional parts.
    #[must_use]
    pub fn new(kind: OpKind, namespace: impl Into<Namespace>, object: Document) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            uuid: None,
            object,
            criteria: None,
            session: None,
            statement_id: None,
            from_migrate: false,
            link: OplogLink::default(),
        }
    }

    /// An insert of `document`.
    #[must_use]
    pub fn insert(namespace: impl Into<Namespace>, document: Document) -> Self {
        Self::new(OpKind::Insert, namespace, document)
    }

    /// An update applying `update` to the document matching `criteria`.
    #[must_use]
    pub fn update(namespace: impl Into<Namespace>, update: Document, criteria: Document) -> Self {
        Self::new(OpKind::Update, namespace, update).with_criteria(criteria)
    }

    /// A delete of the document identified by `id_document`.
    #[must_use]
    pub fn delete(namespace: impl Into<Namespace>, id_document: Document) -> Self {
        Self::new(OpKind::Delete, namespace, id_document)
    }

    /// A command run against `db`.
    #[must_use]
    pub fn command(db: &str, command: Document) -> Self {
        Self::new(OpKind::Command, Namespace::command(db), command)
    }

    /// A no-op carrying `message`.
    #[must_use]
    pub fn noop(namespace: impl Into<Namespace>, message: &str) -> Self {
        Self::new(
            OpKind::Noop,
            namespace,
            Document::new().with("msg", message),
        )
    }

    /// A marker recording that `db` exists.
    #[must_use]
    pub fn db_marker(db: &str) -> Self {
        Self::new(OpKind::DbMarker, Namespace::db_marker(db), Document::new())
    }

    /// Sets the collection UUID.
    #[must_use]
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Sets the criteria document.
    #[must_use]
    pub fn with_criteria(mut self, criteria: Document) -> Self {
        self.criteria = Some(criteria);
        self
    }

    /// Sets session info and statement id.
    #[must_use]
    pub fn with_session(mut self, session: SessionInfo, statement_id: StatementId) -> Self {
        self.session = Some(session);
        self.statement_id = Some(statement_id);
        self
    }

    /// Sets the migration flag.
    #[must_use]
    pub fn from_migrate(mut self, value: bool) -> Self {
        self.from_migrate = value;
        self
    }

    /// Sets the links.
    #[must_use]
    pub fn with_link(mut self, link: OplogLink) -> Self {
        self.link = link;
        self
    }

    /// Checks the descriptor without building anything.
    ///
    /// # Errors
    ///
    /// Returns `Validation` describing the first rule the descriptor breaks.
    pub fn validate(&self) -> CoreResult<()> {
        check_shape(
            self.kind,
            &self.namespace,
            self.criteria.as_ref(),
            self.session.as_ref(),
            self.statement_id,
        )
        .map_err(CoreError::validation)
    }
}

/// Builds an entry from a descriptor and its slot. Pure; no I/O.
///
/// # Errors
///
/// Returns `Validation` if the descriptor is malformed.
pub fn build_entry(descriptor: OpDescriptor, slot: OplogSlot) -> CoreResult<OplogEntry> {
    descriptor.validate()?;
    Ok(OplogEntry {
        slot,
        version: OPLOG_VERSION,
        kind: descriptor.kind,
        namespace: descriptor.namespace,
        uuid: descriptor.uuid,
        object: descriptor.object,
        criteria: descriptor.criteria,
        session: descriptor.session,
        statement_id: descriptor.statement_id,
        from_migrate: descriptor.from_migrate,
        link: descriptor.link,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OpTime, Timestamp};

    fn slot() -> OplogSlot {
        OplogSlot::new(OpTime::new(Timestamp::new(10, 1), 1), 123)
    }

    #[test]
    fn builds_insert() {
        let doc = Document::new().with("_id", 1).with("name", "Amani");
        let entry = build_entry(OpDescriptor::insert("app.users", doc.clone()), slot()).unwrap();

        assert_eq!(entry.kind, OpKind::Insert);
        assert_eq!(entry.version, OPLOG_VERSION);
        assert_eq!(entry.object, doc);
        assert_eq!(entry.slot, slot());
        assert!(entry.link.is_empty());
    }

    #[test]
    fn constructors_produce_valid_descriptors() {
        let descriptors = [
            OpDescriptor::insert("a.b", Document::new().with("_id", 1)),
            OpDescriptor::update(
                "a.b",
                Document::new().with("x", 1),
                Document::new().with("_id", 1),
            ),
            OpDescriptor::delete("a.b", Document::new().with("_id", 1)),
            OpDescriptor::command("a", Document::new().with("drop", "b")),
            OpDescriptor::noop("a.b", "hello"),
            OpDescriptor::db_marker("a"),
        ];
        for desc in descriptors {
            desc.validate().unwrap();
        }
    }

    #[test]
    fn update_without_criteria_is_rejected() {
        let mut desc = OpDescriptor::update(
            "app.users",
            Document::new().with("x", 1),
            Document::new().with("_id", 1),
        );
        desc.criteria = None;

        let err = build_entry(desc, slot()).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn insert_with_criteria_is_rejected() {
        let desc = OpDescriptor::insert("app.users", Document::new().with("_id", 1))
            .with_criteria(Document::new());
        assert!(desc.validate().is_err());
    }

    #[test]
    fn command_must_target_cmd_namespace() {
        let desc = OpDescriptor::new(
            OpKind::Command,
            "app.users",
            Document::new().with("drop", "users"),
        );
        assert!(desc.validate().is_err());
    }

    #[test]
    fn modifiers_carry_through() {
        let session = SessionInfo::new(Uuid::from_u128(1), 4);
        let prev = OpTime::new(Timestamp::new(9, 9), 1);
        let uuid = Uuid::from_u128(2);
        let entry = build_entry(
            OpDescriptor::insert("app.users", Document::new().with("_id", 1))
                .with_uuid(uuid)
                .with_session(session, StatementId::new(7))
                .from_migrate(true)
                .with_link(OplogLink::after(prev)),
            slot(),
        )
        .unwrap();

        assert_eq!(entry.uuid, Some(uuid));
        assert_eq!(entry.session, Some(session));
        assert_eq!(entry.statement_id, Some(StatementId::new(7)));
        assert!(entry.from_migrate);
        assert_eq!(entry.link.prev_op_time, Some(prev));
    }
}
