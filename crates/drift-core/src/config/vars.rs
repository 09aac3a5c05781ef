//! Environment variable interpolation for config files.
//!
//! Supports the following syntax:
//! - `$VAR` or `${VAR}` - substitute with env var value, error if missing
//! - `${VAR:-default}` - use default if VAR is unset OR empty
//! - `${VAR-default}` - use default only if VAR is unset (empty is OK)
//! - `$$` - escape sequence for literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)
            (?:
                (:?-)
                ([^}]*)
            )?
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("env var pattern is a valid regex")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Every problem found, so a user sees all missing variables at once.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in the given text.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| substitute(caps, &mut errors))
        .into_owned();

    InterpolationResult { text, errors }
}

fn substitute(caps: &Captures, errors: &mut Vec<String>) -> String {
    let full_match = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
    if full_match == "$$" {
        return "$".to_string();
    }

    let var_name = caps
        .get(1)
        .or_else(|| caps.get(4))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let default_syntax = caps.get(2).map(|m| m.as_str());
    let default_value = caps.get(3).map(|m| m.as_str());

    match env::var(var_name) {
        Ok(value) if value.contains('\n') || value.contains('\r') => {
            errors.push(format!(
                "environment variable '{var_name}' contains newlines, which is not allowed"
            ));
            full_match.to_string()
        }
        Ok(value) if value.is_empty() && default_syntax == Some(":-") => {
            default_value.unwrap_or_default().to_string()
        }
        Ok(value) => value,
        Err(_) => match default_value {
            Some(default) => default.to_string(),
            None => {
                errors.push(format!("environment variable '{var_name}' is not set"));
                full_match.to_string()
            }
        },
    }
}
