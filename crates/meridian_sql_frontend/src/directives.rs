//! Query directives carried in `/*vt+ KEY[=value] ... */` comments.

use std::collections::HashMap;

pub const DIRECTIVE_PREFIX: &str = "/*vt+ ";
pub const DIRECTIVE_QUERY_TIMEOUT: &str = "QUERY_TIMEOUT_MS";
pub const DIRECTIVE_SCATTER_ERRORS_AS_WARNINGS: &str = "SCATTER_ERRORS_AS_WARNINGS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveValue {
    Flag(bool),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentDirectives {
    values: HashMap<String, DirectiveValue>,
}

impl CommentDirectives {
    /// Collect directives from raw comments. Comments without the directive
    /// prefix are ignored; later keys override earlier ones.
    pub fn extract(comments: &[String]) -> Self {
        let mut values = HashMap::new();
        for comment in comments {
            let Some(body) = comment
                .strip_prefix(DIRECTIVE_PREFIX)
                .and_then(|rest| rest.strip_suffix("*/"))
            else {
                continue;
            };
            for token in body.split_whitespace() {
                let (key, value) = match token.split_once('=') {
                    None => (token, DirectiveValue::Flag(true)),
                    Some((k, v)) => (k, parse_value(v)),
                };
                values.insert(key.to_string(), value);
            }
        }
        CommentDirectives { values }
    }

    pub fn get(&self, key: &str) -> Option<&DirectiveValue> {
        self.values.get(key)
    }

    /// True when the directive is present as a bare flag or `=true`/`=1`.
    pub fn is_set(&self, key: &str) -> bool {
        matches!(
            self.values.get(key),
            Some(DirectiveValue::Flag(true)) | Some(DirectiveValue::Int(1))
        )
    }

    /// Integer value of the directive, if present and numeric.
    pub fn int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(DirectiveValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// QUERY_TIMEOUT_MS, or 0 when absent or malformed.
    pub fn query_timeout_ms(&self) -> u64 {
        self.int(DIRECTIVE_QUERY_TIMEOUT)
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn parse_value(raw: &str) -> DirectiveValue {
    if let Ok(i) = raw.parse::<i64>() {
        return DirectiveValue::Int(i);
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" => DirectiveValue::Flag(true),
        "false" => DirectiveValue::Flag(false),
        _ => DirectiveValue::Str(raw.to_string()),
    }
}
