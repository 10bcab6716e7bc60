//! Update document semantics used during apply.
//!
//! An update document is either a full replacement or a modifier document
//! made of `$set` and `$unset`. `$v` (the update format version some
//! writers include) is accepted and ignored.

use crate::error::{ApplyErrorCode, CoreError, CoreResult};
use replog_codec::{Document, Value};

/// The two forms an update document can take.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateForm<'a> {
    /// Replace every field except `_id`.
    Replacement(&'a Document),
    /// Set and unset individual paths.
    Modifier {
        /// Paths to set.
        set: Option<&'a Document>,
        /// Paths to remove.
        unset: Option<&'a Document>,
    },
}

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::apply(ApplyErrorCode::InvalidUpdate, message)
}

/// Classifies an update document.
///
/// # Errors
///
/// `InvalidUpdate` if operator and plain fields are mixed, an operator is
/// unknown, or an operator's argument is not a document.
pub fn classify(update: &Document) -> CoreResult<UpdateForm<'_>> {
    let operators = update.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 {
        return Ok(UpdateForm::Replacement(update));
    }
    if operators != update.len() {
        return Err(invalid("update mixes operators and plain fields"));
    }

    let mut set = None;
    let mut unset = None;
    for (op, arg) in update.iter() {
        match op {
            "$v" => continue,
            "$set" | "$unset" => {
                let arg = arg.as_document().ok_or_else(|| {
                    invalid(format!("{op} expects a document, got {}", arg.type_name()))
                })?;
                if op == "$set" {
                    set = Some(arg);
                } else {
                    unset = Some(arg);
                }
            }
            other => return Err(invalid(format!("unsupported update operator {other}"))),
        }
    }
    Ok(UpdateForm::Modifier { set, unset })
}

/// Applies `update` to `target` and returns the new document.
///
/// # Errors
///
/// `InvalidUpdate` if the update is malformed, would change `_id`, or
/// touches a path through a non-document value.
pub fn apply_update(target: &Document, update: &Document) -> CoreResult<Document> {
    match classify(update)? {
        UpdateForm::Replacement(replacement) => {
            if let (Some(old), Some(new)) = (target.id(), replacement.id()) {
                if old != new {
                    return Err(invalid("replacement would change _id"));
                }
            }
            let mut result = Document::new();
            if let Some(id) = target.id().or_else(|| replacement.id()) {
                result.insert("_id", id.clone());
            }
            for (key, value) in replacement.iter().filter(|(k, _)| *k != "_id") {
                result.insert(key, value.clone());
            }
            Ok(result)
        }
        UpdateForm::Modifier { set, unset } => {
            let mut result = target.clone();
            if let Some(set) = set {
                for (path, value) in set.iter() {
                    if path == "_id" && target.id().is_some_and(|id| id != value) {
                        return Err(invalid("$set would change _id"));
                    }
                    result
                        .set_path(path, value.clone())
                        .map_err(|e| invalid(e.to_string()))?;
                }
            }
            if let Some(unset) = unset {
                for (path, _) in unset.iter() {
                    if path == "_id" {
                        return Err(invalid("cannot $unset _id"));
                    }
                    result
                        .remove_path(path)
                        .map_err(|e| invalid(e.to_string()))?;
                }
            }
            Ok(result)
        }
    }
}

/// Returns true if every criteria field equals the document's value at
/// that path. An empty criteria matches everything.
#[must_use]
pub fn matches(document: &Document, criteria: &Document) -> bool {
    criteria
        .iter()
        .all(|(path, expected)| document.get_path(path) == Some(expected))
}

/// Builds the starting document for an upsert from the criteria's
/// equality fields. Operator fields and operator-valued fields are skipped.
///
/// # Errors
///
/// `InvalidUpdate` if a criteria path is malformed.
pub fn upsert_seed(criteria: &Document) -> CoreResult<Document> {
    let mut seed = Document::new();
    for (path, value) in criteria.iter() {
        if path.starts_with('$') || is_operator_document(value) {
            continue;
        }
        seed.set_path(path, value.clone())
            .map_err(|e| invalid(e.to_string()))?;
    }
    Ok(seed)
}

fn is_operator_document(value: &Value) -> bool {
    value
        .as_document()
        .and_then(Document::first)
        .is_some_and(|(k, _)| k.starts_with('$'))
}
