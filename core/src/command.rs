//! Command table parsing and storage
//!
//! The supervisor's only input is a flat list of tokens in which the
//! literal separator `---` delimits command groups:
//!
//! ```text
//! nginx -c site.conf --- redis-server --- worker --queue jobs
//! ```
//!
//! The parsed [`CommandTable`] is immutable for the lifetime of the
//! supervisor; every relaunch of a slot re-reads its group from here.

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Literal token separating command groups on the command line
pub const GROUP_SEPARATOR: &str = "---";

/// One supervised unit: an executable path followed by its arguments
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandGroup {
    argv: Vec<String>,
}

impl CommandGroup {
    /// Create a group from a non-empty argv
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() {
            return Err(CoreError::CommandParse(
                "command group cannot be empty".to_string(),
            ));
        }
        Ok(Self { argv })
    }

    /// The executable path
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Arguments passed to the executable
    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    /// The full token sequence, program first
    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl std::fmt::Display for CommandGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.argv.join(" "))
    }
}

/// The ordered, immutable list of command groups to supervise
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandTable {
    groups: Vec<CommandGroup>,
}

impl CommandTable {
    /// Parse a flat token list into command groups.
    ///
    /// Tokens are split on the literal [`GROUP_SEPARATOR`]. An empty input,
    /// a leading or trailing separator, and two adjacent separators are all
    /// rejected, since each would describe a command group with no
    /// executable.
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Result<Self> {
        if tokens.is_empty() {
            return Err(CoreError::CommandParse(
                "at least one command is required".to_string(),
            ));
        }

        let mut groups = Vec::new();
        let mut current: Vec<String> = Vec::new();

        for token in tokens {
            let token = token.as_ref();
            if token == GROUP_SEPARATOR {
                groups.push(CommandGroup::new(std::mem::take(&mut current))?);
            } else {
                current.push(token.to_string());
            }
        }
        groups.push(CommandGroup::new(current)?);

        Ok(Self { groups })
    }

    /// Number of command groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the table holds no groups (never true for a parsed table)
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// All command groups in declaration order
    pub fn groups(&self) -> &[CommandGroup] {
        &self.groups
    }

    /// The group at `index`, panicking on an out-of-range index.
    ///
    /// Slot `command_index` values are created from this table and the
    /// table never shrinks, so an out-of-range index is a logic error.
    pub fn group(&self, index: usize) -> &CommandGroup {
        &self.groups[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<String> {
        s.split_whitespace().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_single_group() {
        let table = CommandTable::parse(&tokens("sleep 100")).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.group(0).program(), "sleep");
        assert_eq!(table.group(0).args(), &["100".to_string()]);
    }

    #[test]
    fn test_multiple_groups() {
        let table = CommandTable::parse(&tokens("sleep 100 --- sleep 100 --- false")).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.group(0).program(), "sleep");
        assert_eq!(table.group(2).program(), "false");
        assert!(table.group(2).args().is_empty());
    }

    #[test]
    fn test_group_with_no_args() {
        let table = CommandTable::parse(&tokens("true")).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.group(0).args().is_empty());
    }

    #[test]
    fn test_empty_input_rejected() {
        let empty: Vec<String> = vec![];
        assert!(CommandTable::parse(&empty).is_err());
    }

    #[test]
    fn test_empty_groups_rejected() {
        assert!(CommandTable::parse(&tokens("--- sleep 1")).is_err());
        assert!(CommandTable::parse(&tokens("sleep 1 ---")).is_err());
        assert!(CommandTable::parse(&tokens("sleep 1 --- --- sleep 2")).is_err());
        assert!(CommandTable::parse(&tokens("---")).is_err());
    }

    #[test]
    fn test_display() {
        let table = CommandTable::parse(&tokens("sleep 100")).unwrap();
        assert_eq!(table.group(0).to_string(), "sleep 100");
    }
}
