//! Task id discovery in service output.

use std::sync::OnceLock;

use regex::Regex;

/// Return every UUID-shaped substring of a single line, first occurrence
/// order, without duplicates.
pub fn extract_task_ids(line: &str) -> Vec<&str> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        // 8-4-4-4-12 hex groups
        Regex::new(
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        )
        .expect("valid task id pattern")
    });

    let mut ids: Vec<&str> = Vec::new();
    for m in pattern.find_iter(line) {
        if !ids.contains(&m.as_str()) {
            ids.push(m.as_str());
        }
    }
    ids
}
