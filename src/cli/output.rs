//! CLI Output Formatting.

use console::{style, Term};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT FORMAT
// ═══════════════════════════════════════════════════════════════════════════════

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
    /// Pretty JSON format
    JsonPretty,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Ok(OutputFormat::JsonPretty),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT FORMATTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Output formatter for CLI
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    format: OutputFormat,
    color: bool,
    term: Term,
}

impl Default for OutputFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Text)
    }
}

impl OutputFormatter {
    /// Create new formatter
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            color: true,
            term: Term::stdout(),
        }
    }

    /// Disable color
    pub fn without_color(mut self) -> Self {
        self.color = false;
        self
    }

    /// Get format
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json | OutputFormat::JsonPretty)
    }

    fn line(&self, text: &str) {
        let _ = self.term.write_line(text);
    }

    /// Print success message
    pub fn success(&self, message: &str) {
        if self.is_json() {
            self.print_json(&serde_json::json!({ "status": "success", "message": message }));
        } else if self.color {
            self.line(&format!("{} {}", style("✓").green(), message));
        } else {
            self.line(&format!("OK: {}", message));
        }
    }

    /// Print warning message
    pub fn warning(&self, message: &str) {
        if self.is_json() {
            self.print_json(&serde_json::json!({ "status": "warning", "message": message }));
        } else if self.color {
            self.line(&format!("{} {}", style("⚠").yellow(), message));
        } else {
            self.line(&format!("WARNING: {}", message));
        }
    }

    /// Print info message (text formats only)
    pub fn info(&self, message: &str) {
        if self.is_json() {
            return;
        }
        if self.color {
            self.line(&format!("{} {}", style("→").cyan(), message));
        } else {
            self.line(message);
        }
    }

    /// Print a titled record
    pub fn data<T: Serialize>(&self, title: &str, data: &T) {
        if self.is_json() {
            self.print_json(data);
            return;
        }
        if let Ok(json) = serde_json::to_value(data) {
            self.section(title);
            self.print_text(&json, 1);
        }
    }

    /// Print section header
    pub fn section(&self, title: &str) {
        if self.is_json() {
            return;
        }
        if self.color {
            self.line(&format!("\n{}", style(title).bold().underlined()));
        } else {
            self.line(&format!("\n=== {} ===", title));
        }
    }

    fn print_json<T: Serialize>(&self, data: &T) {
        let output = if matches!(self.format, OutputFormat::JsonPretty) {
            serde_json::to_string_pretty(data)
        } else {
            serde_json::to_string(data)
        };

        if let Ok(json) = output {
            self.line(&json);
        }
    }

    fn print_text(&self, json: &serde_json::Value, indent: usize) {
        let prefix = "  ".repeat(indent);

        match json {
            serde_json::Value::Object(map) => {
                for (key, value) in map {
                    let key = if self.color {
                        style(key).bold().to_string()
                    } else {
                        key.clone()
                    };
                    match value {
                        serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                            self.line(&format!("{}{}:", prefix, key));
                            self.print_text(value, indent + 1);
                        }
                        _ => self.line(&format!("{}{}: {}", prefix, key, format_value(value))),
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for (i, item) in arr.iter().enumerate() {
                    self.line(&format!("{}[{}]:", prefix, i));
                    self.print_text(item, indent + 1);
                }
            }
            _ => self.line(&format!("{}{}", prefix, format_value(json))),
        }
    }
}

/// Format a JSON value for text output
fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "-".into(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("json-pretty".parse::<OutputFormat>().unwrap(), OutputFormat::JsonPretty);
        assert_eq!("TEXT".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&serde_json::Value::Null), "-");
        assert_eq!(format_value(&serde_json::json!("1.5")), "1.5");
        assert_eq!(format_value(&serde_json::json!(3)), "3");
    }
}
