//! Branch and nickname validation. Runs before any mutation.

use crate::error::SessionError;

pub const MAX_NICKNAME_LEN: usize = 64;
pub const MAX_BRANCH_LEN: usize = 200;

/// Accept `[A-Za-z0-9._/-]` with git-hostile shapes rejected.
pub fn validate_branch(branch: &str) -> Result<(), SessionError> {
    let reject = |reason: &str| {
        Err(SessionError::InvalidBranch {
            branch: branch.to_string(),
            reason: reason.to_string(),
        })
    };

    if branch.is_empty() {
        return reject("must not be empty");
    }
    if branch.len() > MAX_BRANCH_LEN {
        return reject("too long");
    }
    if let Some(c) = branch
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-')))
    {
        return reject(&format!("character '{c}' not allowed; use letters, digits, '.', '_', '/', '-'"));
    }
    if branch.starts_with('-') || branch.starts_with('/') || branch.starts_with('.') {
        return reject("must not start with '-', '/' or '.'");
    }
    if branch.ends_with('/') || branch.ends_with('.') || branch.ends_with(".lock") {
        return reject("must not end with '/', '.' or '.lock'");
    }
    if branch.contains("..") || branch.contains("//") || branch.contains("/.") {
        return reject("must not contain '..', '//' or '/.'");
    }
    if branch == "HEAD" {
        return reject("'HEAD' is reserved");
    }
    Ok(())
}

/// Accept 1-64 chars of `[A-Za-z0-9 _-]`, not blank.
pub fn validate_nickname(nickname: &str) -> Result<(), SessionError> {
    let reject = |reason: &str| {
        Err(SessionError::InvalidNickname {
            nickname: nickname.to_string(),
            reason: reason.to_string(),
        })
    };

    if nickname.trim().is_empty() {
        return reject("must not be blank");
    }
    if nickname.chars().count() > MAX_NICKNAME_LEN {
        return reject(&format!("longer than {MAX_NICKNAME_LEN} characters"));
    }
    if let Some(c) = nickname
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-')))
    {
        return reject(&format!("character '{c}' not allowed; use letters, digits, space, '_', '-'"));
    }
    Ok(())
}

/// Squash free text into something [`validate_nickname`] accepts.
pub fn nickname_from(text: &str) -> Option<String> {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-') { c } else { ' ' })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(MAX_NICKNAME_LEN).collect();
    let truncated = truncated.trim().to_string();
    (!truncated.is_empty()).then_some(truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("main")]
    #[case("feature/auth-flow")]
    #[case("fix_1.2")]
    #[case("epic/checkout/story-3")]
    fn accepts_plain_branches(#[case] branch: &str) {
        assert!(validate_branch(branch).is_ok(), "{branch}");
    }

    #[rstest]
    #[case("")]
    #[case("has space")]
    #[case("semi;colon")]
    #[case("$(rm -rf)")]
    #[case("-leading")]
    #[case("/abs")]
    #[case("trailing/")]
    #[case("a..b")]
    #[case("x.lock")]
    #[case("HEAD")]
    #[case("ünicode")]
    fn rejects_unsafe_branches(#[case] branch: &str) {
        assert!(
            matches!(validate_branch(branch), Err(SessionError::InvalidBranch { .. })),
            "{branch}"
        );
    }

    #[rstest]
    #[case("auth work")]
    #[case("reviewer-2")]
    #[case("a")]
    fn accepts_nicknames(#[case] nick: &str) {
        assert!(validate_nickname(nick).is_ok());
    }

    #[rstest]
    #[case("   ")]
    #[case("quote'd")]
    #[case("slash/no")]
    fn rejects_nicknames(#[case] nick: &str) {
        assert!(matches!(
            validate_nickname(nick),
            Err(SessionError::InvalidNickname { .. })
        ));
    }

    #[test]
    fn nickname_length_limit() {
        assert!(validate_nickname(&"a".repeat(64)).is_ok());
        assert!(validate_nickname(&"a".repeat(65)).is_err());
    }

    #[test]
    fn nickname_from_free_text() {
        assert_eq!(nickname_from("Login: add OAuth!").as_deref(), Some("Login add OAuth"));
        assert_eq!(nickname_from("???"), None);
        assert!(validate_nickname(&nickname_from(&"x".repeat(100)).expect("some")).is_ok());
    }
}
