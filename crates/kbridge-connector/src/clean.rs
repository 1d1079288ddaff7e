use std::sync::OnceLock;

use regex::Regex;

static EDGE_RUNS: OnceLock<Regex> = OnceLock::new();

/// Leading or trailing run of Unicode separators and control/format characters.
fn edge_runs() -> &'static Regex {
    EDGE_RUNS.get_or_init(|| Regex::new(r"^[\pZ\pC]+|[\pZ\pC]+$").expect("static regex"))
}

/// Normalize a knowledge-base display string for the voice channel.
///
/// - `&nbsp;` entities become plain spaces
/// - a leading and a trailing run of whitespace/control characters each
///   become a single space
/// - `\n\t` sequences are removed and `\n\n` collapses to `\n`
///
/// The passes repeat until nothing changes, so the result is a fixpoint and
/// cleaning is idempotent.
pub fn clean_message(message: &str) -> String {
    let mut current = message.to_string();
    loop {
        let next = clean_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn clean_once(message: &str) -> String {
    let message = message.replace("&nbsp;", " ");
    let message = edge_runs().replace_all(&message, " ");
    let message = message.replace("\n\t", "");
    message.replace("\n\n", "\n")
}
