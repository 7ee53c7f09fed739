//! Pulls candidate shell commands out of a diagnostic response.
//!
//! The model is asked to prefix each runnable command with `$ `. Everything
//! else in the response is explanation and is ignored here.

/// Marker that distinguishes a command line from prose.
const COMMAND_MARKER: char = '$';

/// Extract candidate commands in the order the model proposed them.
/// Later commands may depend on earlier ones succeeding, so order matters.
pub fn extract_commands(explanation: &str) -> Vec<String> {
    explanation
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let command = trimmed.strip_prefix(COMMAND_MARKER)?.trim();
            if command.is_empty() {
                None
            } else {
                Some(command.to_string())
            }
        })
        .collect()
}
