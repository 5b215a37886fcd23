//! Job-id glob patterns.
//!
//! `*` matches any run of characters (including none) and `?` matches
//! exactly one. Every other character matches itself.

/// Pattern that matches every job id.
pub const MATCH_ALL: &str = "*";

/// Match `text` against a glob `pattern`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    // Position of the last `*` seen, and the text index it was tried at.
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || (p[pi] != '*' && p[pi] == t[ti])) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

/// Translate a pattern into SQLite `GLOB` syntax, where `[` opens a
/// character class and must be escaped.
pub(crate) fn to_sqlite_glob(pattern: &str) -> String {
    pattern.replace('[', "[[]")
}
