//! `${VAR}` expansion for raw config text.
//!
//! `${VAR:-fallback}` expands to `fallback` when `VAR` is unset or empty.
//! A placeholder that cannot be resolved is kept verbatim so the parser (or
//! the operator reading the error) still sees it.

const OPEN: &str = "${";
const DEFAULT_SEP: &str = ":-";

/// Expand placeholders against the process environment.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

/// Expand placeholders using `lookup` to resolve variable names.
pub fn substitute_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];

        let Some(end) = after_open.find('}') else {
            // Unterminated: everything left is literal.
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &after_open[..end];
        let placeholder = &rest[start..start + OPEN.len() + end + 1];
        match resolve(body, &lookup) {
            Some(value) => out.push_str(&value),
            None => out.push_str(placeholder),
        }
        rest = &after_open[end + 1..];
    }

    out.push_str(rest);
    out
}

fn resolve<F>(body: &str, lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let (name, fallback) = match body.split_once(DEFAULT_SEP) {
        Some((name, fallback)) => (name, Some(fallback)),
        None => (body, None),
    };
    if name.is_empty() {
        return None;
    }
    match (lookup(name), fallback) {
        (Some(value), Some(fallback)) if value.is_empty() => Some(fallback.to_string()),
        (Some(value), _) => Some(value),
        (None, fallback) => fallback.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(name: &str) -> Option<String> {
        match name {
            "DB_PATH" => Some("/var/lib/relaygate.db".into()),
            "PORT" => Some("8080".into()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn expands_every_known_placeholder() {
        assert_eq!(
            substitute_with("path = \"${DB_PATH}\"\nport = ${PORT}", vars),
            "path = \"/var/lib/relaygate.db\"\nport = 8080"
        );
    }

    #[test]
    fn unknown_placeholder_is_kept() {
        assert_eq!(substitute_with("token=${SECRET}!", vars), "token=${SECRET}!");
    }

    #[test]
    fn fallback_applies_when_unset_or_empty() {
        assert_eq!(substitute_with("${MISSING:-3000}", vars), "3000");
        assert_eq!(substitute_with("${EMPTY:-loopback}", vars), "loopback");
        assert_eq!(substitute_with("${PORT:-3000}", vars), "8080");
        assert_eq!(substitute_with("${MISSING:-}", vars), "");
    }

    #[test]
    fn malformed_placeholders_stay_literal() {
        assert_eq!(substitute_with("url=${PORT", vars), "url=${PORT");
        assert_eq!(substitute_with("a ${} b", vars), "a ${} b");
        assert_eq!(substitute_with("cost $5 {x}", vars), "cost $5 {x}");
    }

    #[test]
    fn reads_process_environment() {
        // Set by cargo for test binaries.
        assert_eq!(
            substitute_env("${CARGO_PKG_NAME}"),
            env!("CARGO_PKG_NAME")
        );
    }
}
