use std::sync::OnceLock;

use regex::Regex;

/// Characters of tool output allowed back into the conversation before
/// truncation.
pub const DEFAULT_RESPONSE_CHAR_BUDGET: usize = 4000;

// CSI and OSC escape sequences, lone ESC sequences, then any remaining C0
// control characters except newline and tab.
const CONTROL_CODE_PATTERN: &str =
    "\\x1b\\[[0-9;?]*[ -/]*[@-~]|\\x1b\\][^\\x07\\x1b]*(?:\\x07|\\x1b\\\\)|\\x1b.|[\\x00-\\x08\\x0b-\\x1f\\x7f]";

fn control_codes() -> &'static Regex {
    static CONTROL_CODES: OnceLock<Regex> = OnceLock::new();
    CONTROL_CODES.get_or_init(|| Regex::new(CONTROL_CODE_PATTERN).expect("control code pattern"))
}

/// Strips terminal control codes from a tool result and truncates it to
/// `char_budget` characters, appending a marker with the original length.
/// A budget of zero disables truncation.
pub fn sanitize_tool_response(raw: &str, char_budget: usize) -> String {
    let cleaned = control_codes().replace_all(raw, "");
    let total = cleaned.chars().count();
    if char_budget == 0 || total <= char_budget {
        return cleaned.into_owned();
    }

    let truncated: String = cleaned.chars().take(char_budget).collect();
    format!("{truncated}\n[Output truncated, total length: {total}]")
}
