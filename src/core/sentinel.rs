//! In-container guard
//!
//! Every task container gets `A11Y_SCANNER_IN_CONTAINER=1`. The scanner's
//! entry points refuse to run without it.

use std::collections::HashMap;

pub const IN_CONTAINER_ENV: &str = "A11Y_SCANNER_IN_CONTAINER";
pub const IN_CONTAINER_VALUE: &str = "1";

/// Whether an environment mapping proves we are inside a task container
pub fn is_container_context(env: &HashMap<String, String>) -> bool {
    env.get(IN_CONTAINER_ENV).map(String::as_str) == Some(IN_CONTAINER_VALUE)
}

/// Diagnostic printed when the guard refuses to run
pub fn refusal_message() -> String {
    format!(
        "[ERROR] This command only runs inside the scanner container ({}={} is not set).\n\
         Run it through the container runner instead:\n  \
         a11y-container prepare\n  \
         a11y-container run",
        IN_CONTAINER_ENV, IN_CONTAINER_VALUE
    )
}
