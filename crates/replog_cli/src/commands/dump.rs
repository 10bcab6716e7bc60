//! Dump command implementation.

use crate::OutputFormat;
use replog_codec::{Document, Value};
use replog_core::OplogEntry;
use serde::Serialize;
use std::path::Path;

/// Entry representation for output.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Frame offset in the file.
    pub offset: u64,
    /// Timestamp seconds.
    pub secs: u32,
    /// Timestamp increment.
    pub inc: u32,
    /// Term.
    pub term: i64,
    /// Chain hash.
    pub hash: i64,
    /// Operation code.
    pub op: &'static str,
    /// Namespace.
    pub ns: String,
    /// Collection UUID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui: Option<String>,
    /// Statement id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stmt_id: Option<i32>,
    /// Primary document.
    pub o: serde_json::Value,
    /// Criteria document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub o2: Option<serde_json::Value>,
}

impl EntryInfo {
    fn new(offset: u64, entry: &OplogEntry) -> Self {
        let op_time = entry.op_time();
        Self {
            offset,
            secs: op_time.timestamp().secs(),
            inc: op_time.timestamp().inc(),
            term: op_time.term(),
            hash: entry.hash(),
            op: entry.kind.code(),
            ns: entry.namespace.to_string(),
            ui: entry.uuid.map(|u| u.to_string()),
            stmt_id: entry.statement_id.map(|s| s.as_i32()),
            o: document_to_json(&entry.object),
            o2: entry.criteria.as_ref().map(document_to_json),
        }
    }
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let loaded = super::load(path)?;
    if loaded.scan.has_torn_tail() {
        tracing::warn!(
            valid = loaded.scan.valid_len,
            total = loaded.scan.total_len,
            "oplog ends in a torn frame; it is not shown"
        );
    }

    let entries: Vec<EntryInfo> = loaded
        .entries
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|(offset, entry)| EntryInfo::new(*offset, entry))
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text => print_text_output(&entries, loaded.entries.len()),
    }
    Ok(())
}

fn print_text_output(entries: &[EntryInfo], total: usize) {
    println!("Oplog entries ({} of {total})", entries.len());
    println!("================");
    println!();

    for entry in entries {
        print!(
            "[{:08}] ({}, {}) t={} {:2} {}",
            entry.offset, entry.secs, entry.inc, entry.term, entry.op, entry.ns
        );
        if let Some(stmt) = entry.stmt_id {
            print!(" stmt={stmt}");
        }
        print!(" o={}", entry.o);
        if let Some(o2) = &entry.o2 {
            print!(" o2={o2}");
        }
        println!();
    }
}

/// Converts a document to plain JSON. Byte strings become lowercase hex.
pub fn document_to_json(doc: &Document) -> serde_json::Value {
    serde_json::Value::Object(
        doc.iter()
            .map(|(k, v)| (k.to_string(), value_to_json(v)))
            .collect(),
    )
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(n) => serde_json::Value::from(*n),
        Value::Bytes(bytes) => serde_json::Value::String(hex_encode(bytes)),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Document(doc) => document_to_json(doc),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
