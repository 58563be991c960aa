//! Canonical tool name constants.
//!
//! Tool-name string literals used by the context stages should reference
//! these constants so the read-only allow-list and the agent's tool set
//! cannot drift apart.

pub const READ_FILE: &str = "read_file";
pub const LIST_DIR: &str = "list_dir";
pub const LIST_FILES: &str = "list_files";
pub const GREP: &str = "grep";
pub const FIND_FILES: &str = "find_files";

/// Read-only, idempotent tools. Repeating one of these with the same
/// arguments makes every earlier result obsolete.
pub const READ_ONLY_TOOLS: &[&str] = &[READ_FILE, LIST_DIR, LIST_FILES, GREP, FIND_FILES];

/// Whether `name` is on the read-only allow-list.
pub fn is_read_only(name: &str) -> bool {
    READ_ONLY_TOOLS.contains(&name)
}
