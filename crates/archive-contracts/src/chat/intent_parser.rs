use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, DOWNLOAD_COMMAND, ID_COMMANDS, NO_ARG_COMMANDS, RAW_ARG_COMMANDS,
};

/// One parsed line of studio input.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn find_spec(command: &str, specs: &[CommandSpec]) -> Option<CommandSpec> {
    specs.iter().copied().find(|spec| spec.command == command)
}

fn split_args(arg: &str) -> Vec<String> {
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

fn first_arg(arg: &str) -> String {
    split_args(arg).into_iter().next().unwrap_or_default()
}

/// Slash commands map to actions; any other non-empty text is a search.
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
            let arg = slash_tail[command_len..].trim();

            if let Some(spec) = find_spec(&command, RAW_ARG_COMMANDS) {
                return Intent::new(spec.action, text)
                    .with_arg(spec.arg_key, Value::String(arg.to_string()));
            }

            if let Some(spec) = find_spec(&command, ID_COMMANDS) {
                return Intent::new(spec.action, text)
                    .with_arg(spec.arg_key, Value::String(first_arg(arg)));
            }

            if let Some(spec) = find_spec(&command, NO_ARG_COMMANDS) {
                return Intent::new(spec.action, text);
            }

            if command == DOWNLOAD_COMMAND.command {
                let mut parts = split_args(arg).into_iter();
                let id = parts.next().unwrap_or_default();
                let dir = parts.collect::<Vec<String>>().join(" ");
                return Intent::new(DOWNLOAD_COMMAND.action, text)
                    .with_arg(DOWNLOAD_COMMAND.arg_key, Value::String(id))
                    .with_arg(
                        "dir",
                        if dir.is_empty() {
                            Value::Null
                        } else {
                            Value::String(dir)
                        },
                    );
            }

            return Intent::new("unknown", text)
                .with_arg("command", Value::String(command))
                .with_arg("arg", Value::String(arg.to_string()));
        }
    }

    Intent::new("search", text).with_arg("query", Value::String(raw_trimmed.to_string()))
}
