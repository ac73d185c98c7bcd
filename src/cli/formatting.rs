//! Formatting utilities for CLI output.
//!
//! Provides consistent formatting for values and layers, plus styled help
//! text for CLI commands.

use crate::{
    Value,
    layer::{Layer, LayerOptions},
};

/// ANSI color codes for terminal output
pub struct Colors;

impl Colors {
    /// Reset all formatting
    pub const RESET: &'static str = "\x1b[0m";
    /// Bold text
    pub const BOLD: &'static str = "\x1b[1m";
    /// Dim text
    pub const DIM: &'static str = "\x1b[2m";

    /// Red color
    pub const RED: &'static str = "\x1b[31m";
    /// Green color
    pub const GREEN: &'static str = "\x1b[32m";
    /// Yellow color
    pub const YELLOW: &'static str = "\x1b[33m";
    /// Blue color
    pub const BLUE: &'static str = "\x1b[34m";
    /// Cyan color
    pub const CYAN: &'static str = "\x1b[36m";
}

/// Formats section headers with styling
pub fn format_header(text: &str) -> String {
    format!("{}{}{}{}", Colors::BOLD, Colors::CYAN, text, Colors::RESET)
}

/// Formats subheaders with styling
pub fn format_subheader(text: &str) -> String {
    format!(
        "{}{}{}{}",
        Colors::BOLD,
        Colors::YELLOW,
        text,
        Colors::RESET
    )
}

/// Formats command names with styling
pub fn format_command(text: &str) -> String {
    format!("{}{}{}{}", Colors::BOLD, Colors::GREEN, text, Colors::RESET)
}

/// Formats category names with styling
pub fn format_category(text: &str) -> String {
    format!("{}{}{}{}", Colors::BOLD, Colors::BLUE, text, Colors::RESET)
}

/// Formats descriptions with muted styling
pub fn format_description(text: &str) -> String {
    format!("{}{}{}", Colors::DIM, text, Colors::RESET)
}

/// Formats error messages with red styling
pub fn format_error(text: &str) -> String {
    format!("{}{}{}{}", Colors::BOLD, Colors::RED, text, Colors::RESET)
}

/// Formats a value for human-readable CLI output.
///
/// Strings are quoted, lists are bracketed and byte arrays show their
/// length only.
///
/// ```
/// use valuespace::{Value, cli::formatting::format_value};
///
/// assert_eq!(format_value(Some(&Value::from("hello"))), "\"hello\"");
/// assert_eq!(format_value(Some(&Value::Int(42))), "42");
/// assert_eq!(format_value(None), "<unset>");
/// ```
pub fn format_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::StringList(items)) => format!(
            "[{}]",
            items
                .iter()
                .map(|item| format!("\"{item}\""))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Some(value) => value.to_string(),
        None => "<unset>".to_string(),
    }
}

/// Renders capability bits as `permanent, writable`.
pub fn format_options(options: LayerOptions) -> String {
    let names: Vec<&str> = [
        (LayerOptions::PERMANENT, "permanent"),
        (LayerOptions::TRANSIENT, "transient"),
        (LayerOptions::WRITABLE, "writable"),
        (LayerOptions::READ_ONLY, "read-only"),
    ]
    .into_iter()
    .filter(|(bit, _)| options.contains(*bit))
    .map(|(_, name)| name)
    .collect();

    if names.is_empty() {
        return "none".to_string();
    }
    names.join(", ")
}

/// One line describing an installed layer.
pub fn format_layer(layer: &dyn Layer) -> String {
    format!(
        "{:>4}  {}  {}  {}",
        layer.order(),
        format_command(layer.name()),
        layer.id(),
        format_description(&format_options(layer.options())),
    )
}
