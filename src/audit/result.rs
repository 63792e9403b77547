//! Heuristic classification of opaque result payloads.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of result shapes recognized by field presence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResultCategory {
    FileOperations,
    GitOperations,
    Testing,
    Error,
    Unknown,
}

impl ResultCategory {
    /// First matching marker field wins.
    pub fn classify(result: &Map<String, Value>) -> Self {
        if result.contains_key("files_created") {
            ResultCategory::FileOperations
        } else if result.contains_key("commits") {
            ResultCategory::GitOperations
        } else if result.contains_key("tests_run") {
            ResultCategory::Testing
        } else if result.contains_key("error") {
            ResultCategory::Error
        } else {
            ResultCategory::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCategory::FileOperations => "file_operations",
            ResultCategory::GitOperations => "git_operations",
            ResultCategory::Testing => "testing",
            ResultCategory::Error => "error",
            ResultCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ResultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
