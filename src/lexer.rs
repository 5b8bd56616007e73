//! Line normalization and tokenization for the shell input language.
//!
//! The language has no quoting: a line is cleaned up, operators are padded
//! with spaces so that every one of them becomes a standalone word, shell
//! variables are expanded, and the result is cut on single spaces.

use crate::env::Environment;
use crate::error::{ShellError, ShellResult};
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Characters that always form a token on their own.
///
/// Two-character operators (`&&`, `||`, `>>`) therefore reach the planner as
/// two adjacent one-character tokens.
pub const OPERATOR_CHARS: &[char] = &[';', '|', '&', '<', '>', '!'];

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // `${NAME}` (an unterminated brace runs to the end of the line) or `$NAME`.
    // A `$` followed by neither matches with an empty name.
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(?:\{([^}]*)\}?|([A-Za-z0-9_]*))").expect("valid variable pattern")
    })
}

/// Remove leading and trailing whitespace, including the trailing newline.
pub fn trim(line: &str) -> &str {
    line.trim()
}

/// Replace every run of whitespace with a single space.
pub fn collapse(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Surround each operator character with spaces.
pub fn separate(line: &str) -> String {
    let mut out = String::with_capacity(line.len() * 2);
    for ch in line.chars() {
        if OPERATOR_CHARS.contains(&ch) {
            out.push(' ');
            out.push(ch);
            out.push(' ');
        } else {
            out.push(ch);
        }
    }
    out
}

/// Expand `$NAME` and `${NAME}` from `env`; unset names expand to nothing.
pub fn substitute_variables(line: &str, env: &Environment) -> String {
    variable_pattern()
        .replace_all(line, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            env.get_var(name).unwrap_or_default().to_string()
        })
        .into_owned()
}

fn bounded(text: String, max_len: usize) -> ShellResult<String> {
    if text.len() >= max_len {
        Err(ShellError::LengthOverflow)
    } else {
        Ok(text)
    }
}

/// Bring a raw input line into the canonical form the tokenizer expects.
///
/// # Arguments
/// * `line` - The raw line as read from the user.
/// * `env` - Source of variable values.
/// * `max_len` - Bound on the size of every intermediate buffer.
///
/// # Returns
/// The normalized line, or [`ShellError::LengthOverflow`] if any step would
/// produce a buffer of `max_len` bytes or more.
pub fn normalize(line: &str, env: &Environment, max_len: usize) -> ShellResult<String> {
    let trimmed = bounded(trim(line).to_string(), max_len)?;
    let collapsed = collapse(&trimmed);
    let separated = bounded(separate(&collapsed), max_len)?;
    let recollapsed = collapse(&separated);
    bounded(substitute_variables(&recollapsed, env), max_len)
}

/// Split a normalized line into its tokens. An empty line has none.
pub fn tokenize(line: &str) -> Vec<String> {
    line.split(' ')
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 4096;

    fn env_with(vars: &[(&str, &str)]) -> Environment {
        let mut env = Environment::empty();
        for (k, v) in vars {
            env.set_var(*k, *v);
        }
        env
    }

    #[test]
    fn test_normalize_trims_and_collapses() {
        let env = Environment::empty();
        assert_eq!(
            normalize("  ls   -l \t /tmp \n", &env, MAX).unwrap(),
            "ls -l /tmp"
        );
    }

    #[test]
    fn test_normalize_separates_operators() {
        let env = Environment::empty();
        assert_eq!(
            normalize("a|b&&c||d;e>f>>g<h 2>&1 !x&", &env, MAX).unwrap(),
            "a | b & & c | | d ; e > f > > g < h 2 > & 1 ! x &"
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let env = Environment::empty();
        for line in ["echo hello", "false&&echo nope||echo ok", " cat<in>out ; ls&", ""] {
            let once = normalize(line, &env, MAX).unwrap();
            let twice = normalize(&once, &env, MAX).unwrap();
            assert_eq!(once, twice, "normalizing {line:?} twice changed it");
        }
    }

    #[test]
    fn test_substitute_plain_and_braced_variables() {
        let env = env_with(&[("NAME", "world"), ("A_1", "x")]);
        assert_eq!(
            substitute_variables("hello $NAME ${NAME}s $A_1.", &env),
            "hello world worlds x."
        );
    }

    #[test]
    fn test_substitute_unset_and_bare_dollar() {
        let env = env_with(&[("HOME", "/home/me")]);
        assert_eq!(substitute_variables("a $MISSING b", &env), "a  b");
        assert_eq!(substitute_variables("cost $ 5", &env), "cost  5");
        assert_eq!(substitute_variables("${HOME", &env), "/home/me");
    }

    #[test]
    fn test_length_overflow() {
        let env = Environment::empty();
        assert!(matches!(
            normalize(&"a".repeat(20), &env, 10),
            Err(ShellError::LengthOverflow)
        ));
        // Fits before separation, overflows once operators are padded.
        assert!(matches!(
            normalize("a|b|c|d", &env, 12),
            Err(ShellError::LengthOverflow)
        ));
        let env = env_with(&[("BIG", &"x".repeat(32))]);
        assert!(matches!(
            normalize("echo $BIG", &env, 16),
            Err(ShellError::LengthOverflow)
        ));
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("echo one | wc -l"), vec!["echo", "one", "|", "wc", "-l"]);
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn test_tokens_rejoin_to_normalized_text() {
        let env = Environment::empty();
        let text = normalize("ls -l>out;  echo   done", &env, MAX).unwrap();
        let tokens = tokenize(&text);
        assert_eq!(tokens.join(" "), text);
        assert_eq!(tokenize(&tokens.join(" ")), tokens);
    }
}
