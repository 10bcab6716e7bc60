//! Verify command implementation.

use replog_core::{verify_chain, ChainReport, OplogEntry};
use std::path::Path;

/// Runs the verify command.
///
/// Frame checksums and framing are checked while loading; any corruption
/// there fails before the chain is examined.
pub fn run(path: &Path, prev_hash: Option<i64>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying oplog at {}", path.display());
    println!();

    let loaded = super::load(path)?;
    println!(
        "Frames: {} ({} bytes)",
        loaded.scan.frames.len(),
        loaded.scan.valid_len
    );
    if loaded.scan.has_torn_tail() {
        println!(
            "Torn tail: {} trailing bytes will be dropped on next open",
            loaded.scan.total_len - loaded.scan.valid_len
        );
    }

    let entries: Vec<OplogEntry> = loaded.entries.into_iter().map(|(_, e)| e).collect();
    let report = verify_chain(&entries, &loaded.holes, prev_hash);
    print_report(&report);

    println!();
    if report.is_intact() {
        println!("✓ Oplog verification passed");
        Ok(())
    } else {
        println!("✗ Oplog verification failed");
        Err("verification failed".into())
    }
}

fn print_report(report: &ChainReport) {
    println!("Entries checked: {}", report.checked);
    if report.holes > 0 {
        println!("Holes bridged: {}", report.holes);
    }
    if let (Some(first), Some(last)) = (report.first, report.last) {
        println!("Range: {first} .. {last}");
    }
    if !report.is_intact() {
        println!("Chain breaks: {}", report.breaks.len());
        for chain_break in &report.breaks {
            println!("  - {chain_break}");
        }
    }
}
