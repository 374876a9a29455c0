use serde::{Deserialize, Serialize};

/// The outcome of a roll or pick: one generated string per requested
/// iteration, plus a human-readable trace of what the engine did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableResult {
    pub results: Vec<String>,
    pub log: Vec<String>,
}

impl TableResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_result(&mut self, value: impl Into<String>) {
        self.results.push(value.into());
    }

    pub fn add_log(&mut self, message: impl Into<String>) {
        self.log.push(message.into());
    }
}
