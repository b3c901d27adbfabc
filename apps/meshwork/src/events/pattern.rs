//! Glob matching for pub/sub channel patterns.
//!
//! `*` matches any run of characters (including none), `?` exactly one.
//! Everything else matches literally.

/// Returns true if `channel` matches `pattern`.
#[must_use]
pub fn glob_match(pattern: &str, channel: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let c: Vec<char> = channel.chars().collect();

    let (mut pi, mut ci) = (0, 0);
    // Position of the last `*` and the channel index it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;

    while ci < c.len() {
        match p.get(pi) {
            Some('*') => {
                backtrack = Some((pi, ci));
                pi += 1;
            }
            Some('?') => {
                pi += 1;
                ci += 1;
            }
            Some(&ch) if ch == c[ci] => {
                pi += 1;
                ci += 1;
            }
            _ => match backtrack {
                Some((star, at)) => {
                    pi = star + 1;
                    ci = at + 1;
                    backtrack = Some((star, at + 1));
                }
                None => return false,
            },
        }
    }

    p[pi..].iter().all(|&ch| ch == '*')
}
