use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{CommandSpec, NO_ARG_COMMANDS, SINGLE_PATH_COMMANDS};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

// Unquoted paths with spaces are rejoined so `/upload my cat.jpg` still works.
fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

/// Turns one line of chat input into an [`Intent`].
///
/// Slash commands map to their registered action; any other non-empty text
/// becomes an `ask` intent carrying the trimmed text as its prompt.
pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = if remainder.is_empty() {
                ""
            } else {
                remainder.trim()
            };

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("ask", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn parse_upload_plain_path() {
        let intent = parse_intent("/upload cat.jpg");
        assert_eq!(intent.action, "upload");
        assert_eq!(intent.command_args["path"], json!("cat.jpg"));
    }

    #[test]
    fn parse_upload_quoted_and_unquoted_spaces() {
        let quoted = parse_intent("/upload \"/tmp/my cat.jpg\"");
        assert_eq!(quoted.command_args["path"], json!("/tmp/my cat.jpg"));

        let unquoted = parse_intent("  /upload   /tmp/my cat.jpg  ");
        assert_eq!(unquoted.command_args["path"], json!("/tmp/my cat.jpg"));
    }

    #[test]
    fn image_is_an_alias_for_upload() {
        let intent = parse_intent("/image dog.png");
        assert_eq!(intent.action, "upload");
        assert_eq!(intent.command_args["path"], json!("dog.png"));
    }

    #[test]
    fn upload_without_path_keeps_empty_path() {
        let intent = parse_intent("/upload");
        assert_eq!(intent.action, "upload");
        assert_eq!(intent.command_args["path"], json!(""));
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/clear").action, "clear");
        assert_eq!(parse_intent("/HISTORY").action, "history");
        assert_eq!(parse_intent("/status").action, "status");
        assert_eq!(parse_intent("/tips").action, "tips");
        assert_eq!(parse_intent("/help").action, "help");
        assert_eq!(parse_intent("/quit").action, "quit");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn free_text_becomes_a_question() {
        let intent = parse_intent("  What breed?  ");
        assert_eq!(intent.action, "ask");
        assert_eq!(intent.prompt.as_deref(), Some("What breed?"));
        assert_eq!(intent.raw, "  What breed?  ");
    }

    #[test]
    fn blank_input_is_noop() {
        assert_eq!(parse_intent("").action, "noop");
        assert_eq!(parse_intent("   \t").action, "noop");
    }

    #[test]
    fn lone_slash_is_treated_as_text() {
        let intent = parse_intent("/ what is this?");
        assert_eq!(intent.action, "ask");
        assert_eq!(intent.prompt.as_deref(), Some("/ what is this?"));
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
