//! Instruction table
//!
//! Maps debugger command names to the parsing instruction applied to their
//! responses. The source is line oriented, one `[$]name:->:instruction` per
//! line. A line's ordinal is its instruction code; a leading `$` asks for the
//! command's own arguments to be replayed into the response before parsing.

use crate::bridge::error::{BridgeError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Resolved table entry for one command name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionRef {
    pub code: usize,
    pub replay_params: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InstructionTable {
    commands: HashMap<String, InstructionRef>,
    instructions: Vec<String>,
}

impl InstructionTable {
    /// Build a table from instruction source text
    pub fn parse(source: &str) -> Result<Self> {
        let line_re = Regex::new(r"^(\$)?(.*?):->:(.*)$")?;
        let mut table = Self::default();

        for (code, line) in source.lines().enumerate() {
            match line_re.captures(line) {
                Some(caps) => {
                    let name = caps.get(2).map_or("", |m| m.as_str()).to_string();
                    let instruction = caps.get(3).map_or("", |m| m.as_str()).to_string();
                    let replay_params = caps.get(1).is_some();
                    table.commands.insert(
                        name,
                        InstructionRef {
                            code,
                            replay_params,
                        },
                    );
                    table.instructions.push(instruction);
                }
                None => {
                    if !line.trim().is_empty() {
                        warn!("Ignoring malformed instruction line {}: {}", code, line);
                    }
                    // Keep numbering aligned with the source
                    table.instructions.push(String::new());
                }
            }
        }

        debug!(
            "Loaded {} instructions for {} commands",
            table.instructions.len(),
            table.commands.len()
        );
        Ok(table)
    }

    /// Read and parse an instruction file
    pub fn load(path: &Path) -> Result<Self> {
        let source =
            std::fs::read_to_string(path).map_err(|source| BridgeError::InstructionSource {
                path: path.to_path_buf(),
                source,
            })?;
        let table = Self::parse(&source)?;
        if table.is_empty() {
            warn!("Instruction source {} is empty", path.display());
        }
        Ok(table)
    }

    pub fn lookup(&self, command: &str) -> Option<InstructionRef> {
        self.commands.get(command).copied()
    }

    /// Instruction text for `code`, empty when out of range
    pub fn instruction(&self, code: usize) -> &str {
        self.instructions.get(code).map_or("", String::as_str)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Split a command into its name and its arguments.
///
/// Arguments keep their leading separator and have every space replaced by
/// `;`, so `-break-after 4 10` saves `;4;10` for appending to a response line.
pub fn split_command(command: &str) -> (&str, Option<String>) {
    match command.find(' ') {
        Some(at) => (&command[..at], Some(command[at..].replace(' ', ";"))),
        None => (command, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "-async:->:@$EOL$;\n\
                          -breakpoint-modified:->:?number=\";@\";\n\
                          \n\
                          $-var-assign:->:?value=\";@\";\n\
                          not an instruction\n\
                          -break-insert:->:?bkpt={;@};";

    #[test]
    fn test_codes_follow_line_order() {
        let table = InstructionTable::parse(SOURCE).unwrap();
        assert_eq!(table.len(), 6);
        assert_eq!(table.lookup("-async").unwrap().code, 0);
        assert_eq!(table.lookup("-breakpoint-modified").unwrap().code, 1);
        assert_eq!(table.lookup("-break-insert").unwrap().code, 5);
        assert_eq!(table.instruction(5), "?bkpt={;@};");
    }

    #[test]
    fn test_dollar_prefix_marks_param_replay() {
        let table = InstructionTable::parse(SOURCE).unwrap();
        let entry = table.lookup("-var-assign").unwrap();
        assert_eq!(entry.code, 3);
        assert!(entry.replay_params);
        assert!(!table.lookup("-async").unwrap().replay_params);
    }

    #[test]
    fn test_malformed_lines_keep_numbering() {
        let table = InstructionTable::parse(SOURCE).unwrap();
        assert_eq!(table.instruction(2), "");
        assert_eq!(table.instruction(4), "");
        assert_eq!(table.instruction(99), "");
        assert!(table.lookup("not an instruction").is_none());
    }

    #[test]
    fn test_crlf_source() {
        let table = InstructionTable::parse("-a:->:#x;\r\n-b:->:#y;\r\n").unwrap();
        assert_eq!(table.instruction(0), "#x;");
        assert_eq!(table.lookup("-b").unwrap().code, 1);
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let result = InstructionTable::load(Path::new("/nonexistent/Instructions.txt"));
        assert!(matches!(result, Err(BridgeError::InstructionSource { .. })));
    }

    #[test]
    fn test_split_command() {
        assert_eq!(split_command("-exec-next"), ("-exec-next", None));
        assert_eq!(
            split_command("-var-assign var1 42 + 1"),
            ("-var-assign", Some(";var1;42;+;1".to_string()))
        );
    }
}
