//! Quoting for values interpolated into the shell commands that run inside the container.

use std::borrow::Cow;

fn is_verbatim(byte: u8) -> bool {
    matches!(byte, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-' | b'.' | b'/' | b':' | b'=' | b'@' | b'%' | b'+' | b',')
}

/// Quotes `arg` for a POSIX shell. Arguments consisting only of safe characters are returned as is,
/// everything else is wrapped in single quotes.
pub fn quote(arg: &str) -> Cow<'_, str> {
    if !arg.is_empty() && arg.bytes().all(is_verbatim) {
        return Cow::Borrowed(arg);
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            out.push_str(r"'\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    Cow::Owned(out)
}

/// Quotes each argument and joins them with spaces.
pub fn quote_join<'a, I: IntoIterator<Item = &'a str>>(args: I) -> String {
    let mut out = String::new();
    for arg in args {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&quote(arg));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_values_are_verbatim() {
        assert_eq!(quote("pe-puppet.localdomain"), "pe-puppet.localdomain");
        assert_eq!(
            quote("https://github.com/GeoffWilliams/r10k-control"),
            "https://github.com/GeoffWilliams/r10k-control"
        );
    }

    #[test]
    fn unsafe_values_are_single_quoted() {
        assert_eq!(quote(""), "''");
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("$(reboot)"), "'$(reboot)'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn quote_join_works() {
        assert_eq!(
            quote_join(["git", "clone", "a b", "dir"]),
            "git clone 'a b' dir"
        );
    }
}
