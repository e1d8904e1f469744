//! Command output, either as aligned text or as one JSON object per line.

use colored::Colorize;
use serde_json::{Map, Value};

pub struct Report {
    command: &'static str,
    fields: Vec<(String, Value)>,
}

impl Report {
    pub fn new(command: &'static str) -> Self {
        Self {
            command,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    pub fn to_json(&self) -> String {
        let mut object = Map::new();
        object.insert("command".to_string(), Value::from(self.command));
        for (key, value) in &self.fields {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object).to_string()
    }

    pub fn to_text(&self) -> String {
        let width = self.fields.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
        let mut out = self.command.bold().to_string();
        for (key, value) in &self.fields {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            out.push_str(&format!("\n  {:width$}  {}", key.bright_cyan(), value));
        }
        out
    }

    pub fn print(&self, json: bool) {
        if json {
            println!("{}", self.to_json());
        } else {
            println!("{}", self.to_text());
        }
    }
}

/// Lowercase hex, 16 bytes per row, each row prefixed with its address.
pub fn hex_dump(addr: u32, data: &[u8]) -> String {
    data.chunks(16)
        .enumerate()
        .map(|(row, chunk)| {
            let bytes: Vec<_> = chunk.iter().map(|b| format!("{b:02x}")).collect();
            format!("{:08x}: {}", addr.wrapping_add(row as u32 * 16), bytes.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_carries_command_and_fields() {
        let report = Report::new("gpio").field("pin", 4).field("level", true);
        let parsed: Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(parsed["command"], "gpio");
        assert_eq!(parsed["pin"], 4);
        assert_eq!(parsed["level"], true);
    }

    #[test]
    fn text_prints_strings_unquoted() {
        colored::control::set_override(false);
        let text = Report::new("version").field("firmware", "1.2.3").to_text();
        assert_eq!(text, "version\n  firmware  1.2.3");
    }

    #[test]
    fn hex_dump_rows() {
        let data: Vec<u8> = (0..20).collect();
        let dump = hex_dump(0x100, &data);
        let rows: Vec<_> = dump.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("00000100: 00 01 02"));
        assert_eq!(rows[1], "00000110: 10 11 12 13");
    }
}
