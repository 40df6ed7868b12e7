//! `{key}` placeholder substitution for stack names.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::Tags;
use crate::error::{Error, Result};

fn placeholder_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{(\w+)\}"))
        .as_ref()
        .map_err(|e| Error::config(format!("invalid placeholder pattern: {e}")))
}

/// Keys referenced by `{key}` placeholders, in order of appearance.
///
/// # Errors
///
/// Returns an error only if the placeholder pattern fails to compile.
pub fn placeholders(template: &str) -> Result<Vec<String>> {
    Ok(placeholder_pattern()?
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect())
}

/// Replace every `{key}` in `template` with `values[key]`.
///
/// # Errors
///
/// Returns [`Error::Template`] naming the first key with no value.
pub fn render(template: &str, values: &Tags) -> Result<String> {
    let pattern = placeholder_pattern()?;

    if let Some(key) = placeholders(template)?
        .into_iter()
        .find(|key| !values.contains_key(key))
    {
        return Err(Error::Template {
            template: template.to_string(),
            key,
        });
    }

    Ok(pattern
        .replace_all(template, |caps: &Captures<'_>| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}
