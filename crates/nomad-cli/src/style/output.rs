//! Output helper functions for consistent styled messages.

use std::fmt::Display;

use nomad_server::AcceptRejectResponse;

use super::colors::SemanticStyle;

/// Prints a success message with a checkmark.
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".success(), msg);
}

/// Prints an error message to stderr with an X mark.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".error(), msg);
}

pub fn print_warn(msg: &str) {
    println!("{} {}", "⚠".warning(), msg);
}

/// Prints a follow-up suggestion, dimmed, with an arrow.
pub fn print_hint(msg: &str) {
    println!("{} {}", "→".muted(), msg.muted());
}

/// Prints an indented `key: value` line under a preceding message.
pub fn print_labeled(key: &str, value: impl Display) {
    println!("  {}: {}", key.muted(), value);
}

/// Prints why a node refused a protocol message, e.g.
/// `✗ node n1 UNACCEPTABLE: <applicator message>`.
pub fn print_rejection(node: &str, response: &AcceptRejectResponse) {
    let reason = response
        .rejection_reason
        .map_or_else(|| "REJECTED".to_string(), |r| r.to_string());
    let message = response
        .rejection_message
        .as_deref()
        .unwrap_or("rejected without a reason");
    eprintln!(
        "{} node {} {}: {}",
        "✗".error(),
        node,
        reason.warning(),
        message
    );
}
