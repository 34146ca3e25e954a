//! Composite resource identifiers.
//!
//! Resources that live inside a repository use `repository:<part>` IDs.
//! Older state may still hold `repository/<part>`; those are accepted on
//! read and rewritten with `:`.

use crate::error::ProviderError;

/// Separator between ID parts.
pub const SEPARATOR: char = ':';

/// Join two parts into a composite ID.
pub fn build_two_part_id(first: &str, second: &str) -> String {
    format!("{}{}{}", first, SEPARATOR, second)
}

/// Split a two-part ID.
///
/// The `:` form is tried first. Otherwise the ID is split on its first `/`,
/// since branch names and file paths may contain further slashes.
pub fn parse_two_part_id(
    id: &str,
    first_name: &str,
    second_name: &str,
) -> Result<(String, String), ProviderError> {
    if let Some((first, second)) = id.split_once(SEPARATOR) {
        return Ok((first.to_string(), second.to_string()));
    }
    if let Some((first, second)) = id.split_once('/') {
        return Ok((first.to_string(), second.to_string()));
    }
    Err(ProviderError::operation(
        "Invalid ID",
        format!(
            "unexpected format of ID ({}), expected {}:{} or {}/{}",
            id, first_name, second_name, first_name, second_name
        ),
    ))
}

/// Whether the ID still uses the legacy `/` separator.
pub fn is_legacy(id: &str) -> bool {
    !id.contains(SEPARATOR)
}

/// Split an import ID of the form `a:b[:c]`. The third part keeps any
/// further `:` characters.
pub fn parse_import_id<'a>(
    id: &'a str,
    expected: &str,
) -> Result<(&'a str, &'a str, Option<&'a str>), ProviderError> {
    let mut parts = id.splitn(3, SEPARATOR);
    let first = parts.next().unwrap_or_default();
    let second = parts.next();
    let third = parts.next();
    match second {
        Some(second) if !first.is_empty() && !second.is_empty() => {
            Ok((first, second, third.filter(|t| !t.is_empty())))
        },
        _ => Err(ProviderError::operation(
            "Invalid Import ID",
            format!("Import ID must be in format '{}', got '{}'", expected, id),
        )),
    }
}

/// Split an `owner/repo` full name. Exactly two non-empty parts are
/// required.
pub fn split_full_name(full_name: &str) -> Option<(&str, &str)> {
    let mut parts = full_name.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => {
            Some((owner, repo))
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_two_part_id() {
        assert_eq!(build_two_part_id("hello", "feature/x"), "hello:feature/x");
    }

    #[test]
    fn test_parse_two_part_id_prefers_colon() {
        let (repo, branch) = parse_two_part_id("hello:feature/x", "repository", "branch").unwrap();
        assert_eq!(repo, "hello");
        assert_eq!(branch, "feature/x");
    }

    #[test]
    fn test_parse_two_part_id_legacy_slash() {
        let (repo, branch) = parse_two_part_id("hello/feature/x", "repository", "branch").unwrap();
        assert_eq!(repo, "hello");
        assert_eq!(branch, "feature/x");
        assert!(is_legacy("hello/feature/x"));
        assert!(!is_legacy("hello:feature/x"));
    }

    #[test]
    fn test_parse_two_part_id_rejects_single_part() {
        let err = parse_two_part_id("hello", "repository", "branch").unwrap_err();
        assert!(err
            .to_string()
            .contains("expected repository:branch or repository/branch"));
    }

    #[test]
    fn test_parse_import_id() {
        assert_eq!(
            parse_import_id("hello:dev", "repository:branch").unwrap(),
            ("hello", "dev", None)
        );
        assert_eq!(
            parse_import_id("hello:docs/a.md:gh-pages", "repository:file").unwrap(),
            ("hello", "docs/a.md", Some("gh-pages"))
        );
        assert!(parse_import_id("hello", "repository:branch").is_err());
        assert!(parse_import_id(":dev", "repository:branch").is_err());
    }

    #[test]
    fn test_split_full_name() {
        assert_eq!(split_full_name("octo/hello"), Some(("octo", "hello")));
        assert_eq!(split_full_name("octo"), None);
        assert_eq!(split_full_name("octo/hello/extra"), None);
        assert_eq!(split_full_name("/hello"), None);
    }
}
