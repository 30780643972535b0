//! Output formatting

use serde::Serialize;
use serde_json::{Map, Value};

/// Selects between human readable and JSON output
#[derive(Debug, Clone, Copy)]
pub struct Output {
    json_mode: bool,
}

impl Output {
    /// Create a new output selector
    pub fn new(json_mode: bool) -> Self {
        Self { json_mode }
    }

    /// Start a result record
    pub fn record(self) -> Record {
        Record {
            json_mode: self.json_mode,
            fields: Map::new(),
            lines: Vec::new(),
        }
    }
}

/// One printed result: JSON fields, or text lines
pub struct Record {
    json_mode: bool,
    fields: Map<String, Value>,
    lines: Vec<String>,
}

impl Record {
    /// Add a JSON field
    pub fn field(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Add a line of human readable text
    pub fn line(mut self, text: impl Into<String>) -> Self {
        self.lines.push(text.into());
        self
    }

    /// Print to stdout
    pub fn print(self) {
        if self.json_mode {
            let json = Value::Object(self.fields);
            println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        } else {
            for line in self.lines {
                println!("{}", line);
            }
        }
    }
}
