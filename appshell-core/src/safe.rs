//! Request argument validation
//!
//! `is_safe` gates forced downloads and generic query validation;
//! `is_safe_url` keeps login redirects on the same host.

use url::Url;

/// Character substituted for each allowed extra substring before the
/// alphanumeric check.
const PLACEHOLDER: &str = "X";

/// True when `value` is empty or alphanumeric once every occurrence of
/// the `extra` substrings has been neutralised. An absent value is never
/// safe.
pub fn is_safe(value: Option<&str>, extra: &[&str]) -> bool {
    let Some(value) = value else {
        return false;
    };
    if value.is_empty() {
        return true;
    }

    let mut normalized = value.to_string();
    for allowed in extra.iter().filter(|a| !a.is_empty()) {
        normalized = normalized.replace(allowed, PLACEHOLDER);
    }
    normalized.chars().all(char::is_alphanumeric)
}

/// Check every query argument with [`is_safe`]. Returns the name of the
/// first failing argument.
pub fn args_safe<'a, I>(args: I, extra: &[&str]) -> Result<(), &'a str>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    for (name, value) in args {
        if !is_safe(Some(value), extra) {
            return Err(name);
        }
    }
    Ok(())
}

/// True when `target`, resolved against `host_url`, stays on the same
/// host and uses http or https.
pub fn is_safe_url(host_url: &str, target: &str) -> bool {
    let Ok(base) = Url::parse(host_url) else {
        return false;
    };
    let Ok(resolved) = base.join(target) else {
        return false;
    };

    matches!(resolved.scheme(), "http" | "https")
        && resolved.host_str() == base.host_str()
        && resolved.port_or_known_default() == base.port_or_known_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alphanumeric_is_safe() {
        assert!(is_safe(Some("abc123"), &[]));
        assert!(is_safe(Some("Zürich"), &[]));
        assert!(is_safe(Some(""), &[]));
    }

    #[test]
    fn test_absent_is_unsafe() {
        assert!(!is_safe(None, &[]));
        assert!(!is_safe(None, &["-"]));
    }

    #[test]
    fn test_punctuation_needs_allowance() {
        assert!(!is_safe(Some("report-2024.csv"), &[]));
        assert!(!is_safe(Some("report-2024.csv"), &["-"]));
        assert!(is_safe(Some("report-2024.csv"), &["-", "."]));
        assert!(!is_safe(Some("a b"), &["-", "."]));
    }

    #[test]
    fn test_multi_character_allowance() {
        assert!(is_safe(Some("a::b"), &["::"]));
        assert!(!is_safe(Some("a:b"), &["::"]));
    }

    #[test]
    fn test_args_safe_reports_first_failure() {
        let args = vec![("page", "2"), ("sort", "name;drop"), ("q", "x y")];
        assert_eq!(args_safe(args, &[]), Err("sort"));
        assert_eq!(args_safe(vec![("page", "2")], &[]), Ok(()));
    }

    #[test]
    fn test_safe_url() {
        let host = "http://localhost:8080/";
        assert!(is_safe_url(host, "/dashboard"));
        assert!(is_safe_url(host, "status.html?x=1"));
        assert!(is_safe_url(host, "http://localhost:8080/a"));
        assert!(!is_safe_url(host, "https://evil.example/"));
        assert!(!is_safe_url(host, "//evil.example/path"));
        assert!(!is_safe_url(host, "javascript:alert(1)"));
        assert!(!is_safe_url(host, "http://localhost:9090/"));
    }
}
