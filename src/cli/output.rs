//! Output formatting module for pits-infra
//!
//! Provides colored human output and line-delimited JSON messages.

use colored::Colorize;
use serde::Serialize;
use std::io::{self, Write};

use pits_infra::template::diff::{ChangeType, StackDiff};

/// Output formatter for different output modes
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    /// JSON output mode
    json_mode: bool,
    /// Verbosity level
    verbosity: u8,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();
        if !use_color {
            colored::control::set_override(false);
        }

        Self {
            use_color,
            json_mode,
            verbosity,
        }
    }

    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            println!("\n{}", title.cyan().bold());
            println!("{}", "-".repeat(title.len()).cyan());
        } else {
            println!("\n{}", title);
            println!("{}", "-".repeat(title.len()));
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.json_mode {
            emit_json(&serde_json::json!({"type": "error", "message": message}), true);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.json_mode {
            emit_json(&serde_json::json!({"type": "warning", "message": message}), true);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "WARNING:".yellow().bold(), message);
        } else {
            eprintln!("WARNING: {}", message);
        }
    }

    /// Print an info message (respects verbosity)
    pub fn info(&self, message: &str) {
        if self.verbosity < 1 || self.json_mode {
            return;
        }

        if self.use_color {
            println!("{} {}", "INFO:".blue(), message);
        } else {
            println!("INFO: {}", message);
        }
    }

    /// Print a success line
    pub fn success(&self, message: &str) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            println!("{} {}", "✓".green().bold(), message);
        } else {
            println!("OK: {}", message);
        }
    }

    /// Print text exactly as given, in either mode
    pub fn raw(&self, text: &str) {
        print!("{}", text);
        if !text.ends_with('\n') {
            println!();
        }
    }

    /// Print a serializable document (JSON mode only)
    pub fn document<T: Serialize>(&self, value: &T) {
        if self.json_mode {
            emit_json(value, false);
        }
    }

    /// Print a table
    pub fn table(&self, headers: &[&str], rows: &[Vec<String>]) {
        if self.json_mode {
            return;
        }

        // Calculate column widths
        let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
        for row in rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.chars().count());
                }
            }
        }

        let header_line = headers
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
            .collect::<Vec<_>>()
            .join(" | ");
        if self.use_color {
            println!("{}", header_line.bright_white().bold());
        } else {
            println!("{}", header_line);
        }

        let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        if self.use_color {
            println!("{}", sep.join("-+-").bright_black());
        } else {
            println!("{}", sep.join("-+-"));
        }

        for row in rows {
            let row_line = row
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{:width$}", cell, width = *width))
                .collect::<Vec<_>>()
                .join(" | ");
            println!("{}", row_line);
        }
    }

    /// Print the changes of one stack
    pub fn stack_diff(&self, diff: &StackDiff) {
        if self.json_mode {
            return;
        }

        let title = if diff.new_stack {
            format!("Stack {} (new)", diff.stack)
        } else {
            format!("Stack {}", diff.stack)
        };
        if self.use_color {
            println!("{}", title.bright_white().bold());
        } else {
            println!("{}", title);
        }

        if !diff.has_changes() {
            println!("  {}", diff.summary_text());
            return;
        }

        for change in diff.resources.iter().chain(&diff.outputs) {
            let kind = if change.resource_type.is_empty() {
                "Output".to_string()
            } else {
                change.resource_type.clone()
            };
            let line = format!("  {} {} ({})", change.change_type, change.id, kind);
            if self.use_color {
                let line = match change.change_type {
                    ChangeType::Added => line.green(),
                    ChangeType::Removed => line.red(),
                    ChangeType::Modified => line.yellow(),
                };
                println!("{}", line);
            } else {
                println!("{}", line);
            }

            if self.verbosity >= 1 {
                if let Some(text) = &change.text_diff {
                    self.text_diff(text);
                }
            }
        }
        println!("  {}", diff.summary_text());
    }

    fn text_diff(&self, text: &str) {
        for line in text.lines() {
            if !self.use_color {
                println!("      {}", line);
            } else if line.starts_with('+') {
                println!("      {}", line.green());
            } else if line.starts_with('-') {
                println!("      {}", line.red());
            } else {
                println!("      {}", line.bright_black());
            }
        }
    }

    /// Flush stdout
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

fn emit_json<T: Serialize + ?Sized>(value: &T, to_stderr: bool) {
    let rendered = match serde_json::to_string(value) {
        Ok(rendered) => rendered,
        Err(e) => format!("{{\"type\":\"error\",\"message\":\"{}\"}}", e),
    };
    if to_stderr {
        eprintln!("{}", rendered);
    } else {
        println!("{}", rendered);
    }
}
