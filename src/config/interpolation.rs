// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

use super::error::ConfigError;

/// Resolves `${VAR_NAME}` references in a string from environment variables.
///
/// `${VAR_NAME:-fallback}` substitutes `fallback` when the variable is unset
/// or empty. A plain `${VAR_NAME}` that is not set returns
/// `ConfigError::UndefinedVariable`.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    resolve_with(input, |name| std::env::var(name).ok())
}

/// Same as [`resolve_variables`] with an injected lookup, so tests do not
/// have to mutate the process environment.
pub fn resolve_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut expr = String::new();
            let mut found_close = false;
            for c in chars.by_ref() {
                if c == '}' {
                    found_close = true;
                    break;
                }
                expr.push(c);
            }
            if !found_close || expr.is_empty() {
                // Malformed interpolation -- treat literally
                result.push('$');
                result.push('{');
                result.push_str(&expr);
                continue;
            }

            match expr.split_once(":-") {
                Some((name, fallback)) => {
                    let value = lookup(name).filter(|v| !v.is_empty());
                    result.push_str(value.as_deref().unwrap_or(fallback));
                }
                None => {
                    let value = lookup(&expr)
                        .ok_or_else(|| ConfigError::UndefinedVariable { name: expr.clone() })?;
                    result.push_str(&value);
                }
            }
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}
