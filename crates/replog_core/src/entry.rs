//! The oplog entry model and its wire form.
//!
//! An entry is stored as a CBOR-encoded [`Document`] with these fields:
//!
//! | field             | meaning                                   |
//! |-------------------|-------------------------------------------|
//! | `ts`, `t`         | optime (packed timestamp, term)           |
//! | `h`               | chain hash                                |
//! | `v`               | format version                            |
//! | `op`              | kind code: `i u d c n db`                 |
//! | `ns`              | namespace                                 |
//! | `ui`              | collection UUID (optional)                |
//! | `o`               | primary document                          |
//! | `o2`              | criteria document (optional)              |
//! | `lsid`, `txnNumber` | session info (optional)                 |
//! | `stmtId`          | statement id (optional)                   |
//! | `fromMigrate`     | present only when true                    |
//! | `prevOpTime`, `preImageOpTime`, `postImageOpTime` | links (optional) |

use crate::error::CoreResult;
use crate::types::{uuid_from_value, Namespace, OpTime, OplogSlot, SessionInfo, StatementId, Timestamp};
use replog_codec::{from_cbor, to_cbor, CodecError, CodecResult, Document, Value};
use std::fmt;
use uuid::Uuid;

/// The kind of operation an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Document insert.
    Insert,
    /// Document update.
    Update,
    /// Document delete.
    Delete,
    /// Database command.
    Command,
    /// No-op placeholder.
    Noop,
    /// Database existence marker.
    DbMarker,
}

impl OpKind {
    /// Returns the wire code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Insert => "i",
            Self::Update => "u",
            Self::Delete => "d",
            Self::Command => "c",
            Self::Noop => "n",
            Self::DbMarker => "db",
        }
    }

    /// Parses a wire code.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "i" => Some(Self::Insert),
            "u" => Some(Self::Update),
            "d" => Some(Self::Delete),
            "c" => Some(Self::Command),
            "n" => Some(Self::Noop),
            "db" => Some(Self::DbMarker),
            _ => None,
        }
    }

    /// True for the kinds applied through the CRUD entry point.
    #[must_use]
    pub const fn is_crud(self) -> bool {
        !matches!(self, Self::Command)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Links from an entry to related entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OplogLink {
    /// Previous entry of the same multi-statement operation.
    pub prev_op_time: Option<OpTime>,
    /// Entry holding the pre-image of the changed document.
    pub pre_image_op_time: Option<OpTime>,
    /// Entry holding the post-image of the changed document.
    pub post_image_op_time: Option<OpTime>,
}

impl OplogLink {
    /// A link with only `prev_op_time` set.
    #[must_use]
    pub const fn after(prev: OpTime) -> Self {
        Self {
            prev_op_time: Some(prev),
            pre_image_op_time: None,
            post_image_op_time: None,
        }
    }

    /// True if no link is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.prev_op_time.is_none()
            && self.pre_image_op_time.is_none()
            && self.post_image_op_time.is_none()
    }
}

/// Checks the per-kind shape rules shared by the builder and the decoder.
pub(crate) fn check_shape(
    kind: OpKind,
    namespace: &Namespace,
    criteria: Option<&Document>,
    session: Option<&SessionInfo>,
    statement_id: Option<StatementId>,
) -> Result<(), String> {
    match kind {
        OpKind::Update if criteria.is_none() => {
            return Err("update entries require a criteria document".into());
        }
        OpKind::Insert | OpKind::Delete if criteria.is_some() => {
            return Err(format!("{kind} entries must not carry a criteria document"));
        }
        _ => {}
    }

    if kind == OpKind::DbMarker {
        if !namespace.is_db_marker() {
            return Err(format!("db marker namespace must be 'db.', got {namespace:?}"));
        }
    } else if !namespace.is_well_formed() {
        return Err(format!("namespace must be 'db.coll', got {:?}", namespace.as_str()));
    }

    if kind == OpKind::Command && !namespace.is_command() {
        return Err(format!("command entries must target db.$cmd, got {namespace}"));
    }

    if let Some(stmt) = statement_id {
        if !stmt.is_initialized() {
            return Err("statement id -1 is never logged".into());
        }
        if session.is_none() {
            return Err("a statement id requires session info".into());
        }
    }
    Ok(())
}

/// A single replication log entry. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OplogEntry {
    /// Position and chain hash.
    pub slot: OplogSlot,
    /// Format version.
    pub version: i32,
    /// Operation kind.
    pub kind: OpKind,
    /// Target namespace.
    pub namespace: Namespace,
    /// Target collection UUID.
    pub uuid: Option<Uuid>,
    /// Primary document (`o`).
    pub object: Document,
    /// Criteria document (`o2`).
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

impl OplogEntry {
    /// Returns the entry's optime.
    #[must_use]
    pub fn op_time(&self) -> OpTime {
        self.slot.op_time
    }

    /// Returns the entry's chain hash.
    #[must_use]
    pub fn hash(&self) -> i64 {
        self.slot.hash
    }

    /// Returns the `_id` the entry targets, from `o2` for updates and `o`
    /// otherwise.
    #[must_use]
    pub fn target_id(&self) -> Option<&Value> {
        match self.kind {
            OpKind::Update => self.criteria.as_ref().and_then(Document::id),
            _ => self.object.id(),
        }
    }

    /// Converts to the wire document.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let op_time = self.op_time();
        let mut doc = Document::new()
            .with("ts", op_time.timestamp().as_u64() as i64)
            .with("t", op_time.term())
            .with("h", self.slot.hash)
            .with("v", self.version)
            .with("op", self.kind.code())
            .with("ns", self.namespace.as_str());
        if let Some(uuid) = self.uuid {
            doc.insert("ui", uuid.as_bytes().to_vec());
        }
        doc.insert("o", self.object.clone());
        if let Some(criteria) = &self.criteria {
            doc.insert("o2", criteria.clone());
        }
        if let Some(session) = &self.session {
            doc.insert(
                "lsid",
                Document::new().with("id", session.session_id.as_bytes().to_vec()),
            );
            doc.insert("txnNumber", session.txn_number);
        }
        if let Some(stmt) = self.statement_id {
            doc.insert("stmtId", stmt.as_i32());
        }
        if self.from_migrate {
            doc.insert("fromMigrate", true);
        }
        let links = [
            ("prevOpTime", self.link.prev_op_time),
            ("preImageOpTime", self.link.pre_image_op_time),
            ("postImageOpTime", self.link.post_image_op_time),
        ];
        for (field, link) in links {
            if let Some(op_time) = link {
                doc.insert(field, op_time.to_document());
            }
        }
        doc
    }

    /// Parses the wire document, enforcing per-kind field legality.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStructure` for missing or mistyped fields, unknown
    /// kinds, and shapes the builder would have rejected.
    pub fn from_document(doc: &Document) -> CodecResult<Self> {
        let ts = required_integer(doc, "ts")?;
        let term = required_integer(doc, "t")?;
        let hash = required_integer(doc, "h")?;
        let version = i32::try_from(required_integer(doc, "v")?)
            .map_err(|_| CodecError::invalid_structure("'v' out of range"))?;
        let code = doc
            .get_text("op")
            .ok_or_else(|| CodecError::invalid_structure("missing text field 'op'"))?;
        let kind = OpKind::from_code(code)
            .ok_or_else(|| CodecError::invalid_structure(format!("unknown op kind {code:?}")))?;
        let namespace = Namespace::new(
            doc.get_text("ns")
                .ok_or_else(|| CodecError::invalid_structure("missing text field 'ns'"))?,
        );
        let uuid = doc
            .get("ui")
            .map(|v| uuid_from_value(v, "ui"))
            .transpose()?;
        let object = doc
            .get_document("o")
            .cloned()
            .ok_or_else(|| CodecError::invalid_structure("missing document field 'o'"))?;
        let criteria = optional_document(doc, "o2")?;

        let session = match (doc.get("lsid"), doc.get("txnNumber")) {
            (None, None) => None,
            (Some(lsid), Some(txn)) => {
                let id = lsid
                    .as_document()
                    .and_then(|d| d.get("id"))
                    .ok_or_else(|| CodecError::invalid_structure("'lsid' missing 'id'"))?;
                let txn_number = txn
                    .as_integer()
                    .ok_or_else(|| CodecError::invalid_structure("'txnNumber' must be an integer"))?;
                Some(SessionInfo::new(uuid_from_value(id, "lsid.id")?, txn_number))
            }
            _ => {
                return Err(CodecError::invalid_structure(
                    "'lsid' and 'txnNumber' must appear together",
                ))
            }
        };
        let statement_id = doc
            .get("stmtId")
            .map(|v| {
                v.as_integer()
                    .and_then(|n| i32::try_from(n).ok())
                    .map(StatementId::new)
                    .ok_or_else(|| CodecError::invalid_structure("'stmtId' must be an i32"))
            })
            .transpose()?;
        let from_migrate = match doc.get("fromMigrate") {
            None => false,
            Some(v) => v
                .as_bool()
                .ok_or_else(|| CodecError::invalid_structure("'fromMigrate' must be a bool"))?,
        };
        let link = OplogLink {
            prev_op_time: optional_op_time(doc, "prevOpTime")?,
            pre_image_op_time: optional_op_time(doc, "preImageOpTime")?,
            post_image_op_time: optional_op_time(doc, "postImageOpTime")?,
        };

        check_shape(
            kind,
            &namespace,
            criteria.as_ref(),
            session.as_ref(),
            statement_id,
        )
        .map_err(CodecError::invalid_structure)?;

        Ok(Self {
            slot: OplogSlot::new(
                OpTime::new(Timestamp::from_u64(ts as u64), term),
                hash,
            ),
            version,
            kind,
            namespace,
            uuid,
            object,
            criteria,
            session,
            statement_id,
            from_migrate,
            link,
        })
    }

    /// Encodes to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(to_cbor(&self.to_document())?)
    }

    /// Decodes from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid entry.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let doc: Document = from_cbor(bytes)?;
        Ok(Self::from_document(&doc)?)
    }
}

impl fmt::Display for OplogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.op_time(), self.kind, self.namespace)
    }
}

fn required_integer(doc: &Document, field: &str) -> CodecResult<i64> {
    doc.get_integer(field)
        .ok_or_else(|| CodecError::invalid_structure(format!("missing integer field '{field}'")))
}

fn optional_document(doc: &Document, field: &str) -> CodecResult<Option<Document>> {
    match doc.get(field) {
        None => Ok(None),
        Some(Value::Document(d)) => Ok(Some(d.clone())),
        Some(other) => Err(CodecError::invalid_structure(format!(
            "'{field}' must be a document, got {}",
            other.type_name()
        ))),
    }
}

fn optional_op_time(doc: &Document, field: &str) -> CodecResult<Option<OpTime>> {
    optional_document(doc, field)?
        .as_ref()
        .map(OpTime::from_document)
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op_time(inc: u32) -> OpTime {
        OpTime::new(Timestamp::new(1_700_000_000, inc), 1)
    }

    fn update_entry() -> OplogEntry {
        OplogEntry {
            slot: OplogSlot::new(op_time(2), -42),
            version: 2,
            kind: OpKind::Update,
            namespace: Namespace::new("app.users"),
            uuid: Some(Uuid::from_u128(7)),
            object: Document::new().with("$set", Document::new().with("age", 31)),
            criteria: Some(Document::new().with("_id", 5)),
            session: Some(SessionInfo::new(Uuid::from_u128(99), 3)),
            statement_id: Some(StatementId::new(0)),
            from_migrate: false,
            link: OplogLink {
                prev_op_time: Some(op_time(1)),
                pre_image_op_time: None,
                post_image_op_time: Some(op_time(1)),
            },
        }
    }

    #[test]
    fn kind_codes() {
        for kind in [
            OpKind::Insert,
            OpKind::Update,
            OpKind::Delete,
            OpKind::Command,
            OpKind::Noop,
            OpKind::DbMarker,
        ] {
            assert_eq!(OpKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(OpKind::from_code("x"), None);
        assert!(!OpKind::Command.is_crud());
    }

    #[test]
    fn wire_document_omits_absent_fields() {
        let mut entry = update_entry();
        entry.uuid = None;
        entry.session = None;
        entry.statement_id = None;
        entry.link = OplogLink::default();

        let doc = entry.to_document();
        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(keys, vec!["ts", "t", "h", "v", "op", "ns", "o", "o2"]);
    }

    #[test]
    fn from_migrate_written_only_when_true() {
        let mut entry = update_entry();
        assert!(!entry.to_document().contains_key("fromMigrate"));
        entry.from_migrate = true;
        assert_eq!(entry.to_document().get_bool("fromMigrate"), Some(true));
    }

    #[test]
    fn bytes_decode_to_the_same_entry() {
        let entry = update_entry();
        let decoded = OplogEntry::decode(&entry.encode().unwrap()).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.target_id(), Some(&Value::Integer(5)));
    }

    #[test]
    fn decoder_rejects_unknown_kind() {
        let mut doc = update_entry().to_document();
        doc.insert("op", "z");
        let err = OplogEntry::from_document(&doc).unwrap_err();
        assert!(err.to_string().contains("unknown op kind"));
    }

    #[test]
    fn decoder_enforces_criteria_legality() {
        let mut doc = update_entry().to_document();
        doc.remove("o2");
        assert!(OplogEntry::from_document(&doc).is_err());

        let mut doc = update_entry().to_document();
        doc.insert("op", "i");
        assert!(OplogEntry::from_document(&doc).is_err());
    }

    #[test]
    fn decoder_requires_paired_session_fields() {
        let mut doc = update_entry().to_document();
        doc.remove("txnNumber");
        assert!(OplogEntry::from_document(&doc).is_err());
    }

    #[test]
    fn shape_rules() {
        let ns = Namespace::new("app.users");
        let session = SessionInfo::new(Uuid::nil(), 1);
        let criteria = Document::new().with("_id", 1);

        assert!(check_shape(OpKind::Insert, &ns, None, None, None).is_ok());
        assert!(check_shape(OpKind::Delete, &ns, Some(&criteria), None, None).is_err());
        assert!(check_shape(OpKind::Noop, &ns, Some(&criteria), None, None).is_ok());
        assert!(check_shape(OpKind::Command, &ns, None, None, None).is_err());
        assert!(check_shape(OpKind::Command, &Namespace::command("app"), None, None, None).is_ok());
        assert!(check_shape(OpKind::DbMarker, &Namespace::db_marker("app"), None, None, None).is_ok());
        assert!(check_shape(OpKind::DbMarker, &ns, None, None, None).is_err());
        assert!(check_shape(OpKind::Insert, &Namespace::new(""), None, None, None).is_err());
        assert!(
            check_shape(OpKind::Insert, &ns, None, None, Some(StatementId::new(1))).is_err()
        );
        assert!(
            check_shape(OpKind::Insert, &ns, None, Some(&session), Some(StatementId::new(1)))
                .is_ok()
        );
        assert!(check_shape(
            OpKind::Insert,
            &ns,
            None,
            Some(&session),
            Some(StatementId::UNINITIALIZED)
        )
        .is_err());
    }
}
