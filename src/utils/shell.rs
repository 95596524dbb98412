//! POSIX shell quoting for values injected into the stub.

/// Quote `s` as a single POSIX shell word.
///
/// Each `'` closes the quoted run, adds an escaped quote and reopens it, so
/// `it's` becomes `'it'\''s'`. Everything else is literal inside single quotes.
pub fn quote(s: &str) -> String {
    let parts: Vec<&str> = s.split('\'').collect();
    let mut quoted = String::with_capacity(s.len() + 2 + 3 * (parts.len() - 1));
    quoted.push('\'');
    quoted.push_str(&parts.join("'\\''"));
    quoted.push('\'');
    quoted
}
