//! Output formatting for agent responses

use anyhow::Error;
use colored::*;
use serde::Serialize;
use serde_json::json;

use crate::error::AgentError;

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<(), AgentError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "chain": error.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
        }
    });
    match serde_json::to_string_pretty(&error_json) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to format error as JSON: {}", e),
    }
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    for cause in error.chain().skip(1) {
        eprintln!("  {} {}", "Caused by:".yellow(), cause);
    }
}

/// One status line for human output
pub fn print_line(label: &str, value: impl std::fmt::Display) {
    println!("{:>16} {}", label.bold(), value);
}
