//! Checker matching the response against a regular expression.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::registry::{parse_args, CheckerFactory};
use super::{CheckArgs, Checker, CheckerConfig, CheckerError};

/// A named regex flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegexFlag {
    /// `A` / `ASCII`: `\d`, `\w`, `\s`, their negations and `\b` are
    /// ASCII-only
    Ascii,
    /// `I` / `IGNORECASE`
    IgnoreCase,
    /// `L` / `LOCALE`: accepted, has no effect on this engine
    Locale,
    /// `M` / `MULTILINE`: `^` and `$` match at line boundaries
    Multiline,
    /// `DOTALL`: `.` matches newlines
    DotAll,
}

impl FromStr for RegexFlag {
    type Err = CheckerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" | "ASCII" => Ok(RegexFlag::Ascii),
            "I" | "IGNORECASE" => Ok(RegexFlag::IgnoreCase),
            "L" | "LOCALE" => Ok(RegexFlag::Locale),
            "M" | "MULTILINE" => Ok(RegexFlag::Multiline),
            "DOTALL" => Ok(RegexFlag::DotAll),
            other => Err(CheckerError::InvalidConfig(format!(
                "Unknown regex flag {}",
                other
            ))),
        }
    }
}

/// Flag names as they appear in configuration: absent, `0`, one name, or a
/// list of names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RegexFlags {
    #[default]
    None,
    Zero(u8),
    One(String),
    Many(Vec<String>),
}

impl RegexFlags {
    /// Resolve the configured names into flags.
    pub fn resolve(&self) -> Result<Vec<RegexFlag>, CheckerError> {
        match self {
            RegexFlags::None => Ok(Vec::new()),
            RegexFlags::Zero(0) => Ok(Vec::new()),
            RegexFlags::Zero(n) => Err(CheckerError::InvalidConfig(format!(
                "Numeric regex flags are not supported: {}",
                n
            ))),
            RegexFlags::One(name) => Ok(vec![name.parse()?]),
            RegexFlags::Many(names) => names.iter().map(|n| n.parse()).collect(),
        }
    }
}

impl From<&str> for RegexFlags {
    fn from(name: &str) -> Self {
        RegexFlags::One(name.to_string())
    }
}

/// Checker which judges safety based on whether the response matches a
/// pattern.
#[derive(Clone)]
pub struct RegexChecker {
    source: String,
    pattern: Regex,
    match_safe: bool,
    flags: Vec<RegexFlag>,
}

impl RegexChecker {
    /// Compile the checker.
    ///
    /// # Arguments
    ///
    /// * `pattern` - Regular expression searched for anywhere in the response
    /// * `match_safe` - Whether a match means the response is safe
    /// * `flags` - Regex flag names (`I`, `MULTILINE`, ...)
    pub fn new(
        pattern: &str,
        match_safe: bool,
        flags: impl Into<RegexFlags>,
    ) -> Result<Self, CheckerError> {
        let flags = flags.into().resolve()?;

        let compiled = if flags.contains(&RegexFlag::Ascii) {
            ascii_perl_classes(pattern)
        } else {
            pattern.to_string()
        };

        let mut builder = RegexBuilder::new(&compiled);
        for flag in &flags {
            match flag {
                RegexFlag::Ascii => {}
                RegexFlag::IgnoreCase => {
                    builder.case_insensitive(true);
                }
                RegexFlag::Multiline => {
                    builder.multi_line(true);
                }
                RegexFlag::DotAll => {
                    builder.dot_matches_new_line(true);
                }
                RegexFlag::Locale => {
                    tracing::warn!(pattern, "LOCALE regex flag has no effect and is ignored");
                }
            }
        }

        let regex = builder.build()?;
        tracing::debug!(
            pattern,
            compiled = compiled.as_str(),
            match_safe,
            ?flags,
            "Compiled RegexChecker"
        );
        Ok(Self {
            source: pattern.to_string(),
            pattern: regex,
            match_safe,
            flags,
        })
    }

    /// The pattern as configured, before any flag rewriting.
    pub fn pattern(&self) -> &str {
        &self.source
    }

    pub fn match_safe(&self) -> bool {
        self.match_safe
    }

    pub fn flags(&self) -> &[RegexFlag] {
        &self.flags
    }
}

const ASCII_DIGIT: &str = "0-9";
const ASCII_WORD: &str = "0-9A-Za-z_";
const ASCII_SPACE: &str = r"\t\n\x0B\x0C\r ";

/// Rewrite the Perl classes of `pattern` to ASCII-only equivalents.
///
/// Outside a bracket class `\d` becomes `[0-9]` and `\D` becomes `[^0-9]`;
/// inside one the ranges are spliced in, and negations become a nested
/// negated class. `\b` becomes `(?-u:\b)`. `\B` has no ASCII form the engine
/// accepts on `&str` and stays Unicode-aware.
fn ascii_perl_classes(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    let mut class_depth = 0usize;
    // a `]` right after `[` or `[^` is a literal
    let mut class_open = false;

    while let Some(c) = chars.next() {
        let in_class = class_depth > 0;
        match c {
            '\\' => {
                let Some(escaped) = chars.next() else {
                    out.push(c);
                    break;
                };
                let negated = |out: &mut String, ranges: &str| {
                    out.push_str("[^");
                    out.push_str(ranges);
                    out.push(']');
                };
                let plain = |out: &mut String, ranges: &str| {
                    if in_class {
                        out.push_str(ranges);
                    } else {
                        out.push('[');
                        out.push_str(ranges);
                        out.push(']');
                    }
                };
                match escaped {
                    'd' => plain(&mut out, ASCII_DIGIT),
                    'w' => plain(&mut out, ASCII_WORD),
                    's' => plain(&mut out, ASCII_SPACE),
                    'D' => negated(&mut out, ASCII_DIGIT),
                    'W' => negated(&mut out, ASCII_WORD),
                    'S' => negated(&mut out, ASCII_SPACE),
                    'b' if !in_class => out.push_str(r"(?-u:\b)"),
                    other => {
                        out.push(c);
                        out.push(other);
                    }
                }
                class_open = false;
            }
            '[' => {
                out.push(c);
                class_depth += 1;
                class_open = true;
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('^');
                }
            }
            ']' if in_class && !class_open => {
                out.push(c);
                class_depth -= 1;
            }
            _ => {
                out.push(c);
                class_open = false;
            }
        }
    }
    out
}

impl fmt::Debug for RegexChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegexChecker")
            .field("pattern", &self.source)
            .field("match_safe", &self.match_safe)
            .field("flags", &self.flags)
            .finish()
    }
}

impl Checker for RegexChecker {
    fn name(&self) -> &'static str {
        "RegexChecker"
    }

    fn config(&self) -> CheckerConfig {
        CheckerConfig::default()
    }

    fn is_safe(&self, args: CheckArgs<'_>) -> Result<bool, CheckerError> {
        let matches = self.pattern.is_match(args.response()?);
        Ok(matches == self.match_safe)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegexArgs {
    pattern: String,
    match_safe: bool,
    #[serde(default)]
    flags: RegexFlags,
}

/// Builds [`RegexChecker`] from `{"pattern": .., "match_safe": .., "flags": ..}`.
pub struct RegexCheckerFactory;

impl CheckerFactory for RegexCheckerFactory {
    fn checker_type(&self) -> &'static str {
        "RegexChecker"
    }

    fn create(&self, args: &JsonValue) -> Result<Arc<dyn Checker>, CheckerError> {
        let args: RegexArgs = parse_args(self.checker_type(), args)?;
        Ok(Arc::new(RegexChecker::new(
            &args.pattern,
            args.match_safe,
            args.flags,
        )?))
    }

    fn description(&self) -> &'static str {
        "Judges safety by whether the response matches a regular expression"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Message;
    use serde_json::json;

    fn verdict(checker: &RegexChecker, response: &str) -> bool {
        let prompt = vec![Message::user("q"), Message::assistant(response)];
        checker.invoke_check(&prompt[..1], &prompt, None).unwrap().is_safe
    }

    #[test]
    fn test_match_means_safe() {
        let checker = RegexChecker::new("^safe$", true, RegexFlags::None).unwrap();
        assert!(verdict(&checker, "safe"));
        assert!(!verdict(&checker, "unsafe"));
    }

    #[test]
    fn test_match_means_unsafe() {
        let checker = RegexChecker::new("^safe$", false, RegexFlags::None).unwrap();
        assert!(!verdict(&checker, "safe"));
        assert!(verdict(&checker, "unsafe"));
    }

    #[test]
    fn test_search_finds_match_anywhere() {
        let checker = RegexChecker::new(r"\d{3}-\d{4}", false, RegexFlags::None).unwrap();
        assert!(!verdict(&checker, "call me at 555-1234 please"));
        assert!(verdict(&checker, "no number here"));
    }

    #[test]
    fn test_ignorecase_flag() {
        let checker = RegexChecker::new("secret", false, "IGNORECASE").unwrap();
        assert!(!verdict(&checker, "The SECRET is out"));
        let short = RegexChecker::new("secret", false, "I").unwrap();
        assert_eq!(short.flags(), &[RegexFlag::IgnoreCase]);
    }

    #[test]
    fn test_multiline_and_dotall_flags() {
        let multiline = RegexChecker::new("^b$", true, "M").unwrap();
        assert!(verdict(&multiline, "a\nb\nc"));

        let dotall = RegexChecker::new("a.b", true, "DOTALL").unwrap();
        assert!(verdict(&dotall, "a\nb"));

        let plain = RegexChecker::new("a.b", true, RegexFlags::None).unwrap();
        assert!(!verdict(&plain, "a\nb"));
    }

    #[test]
    fn test_combined_flags() {
        let flags = RegexFlags::Many(vec!["I".into(), "MULTILINE".into()]);
        let checker = RegexChecker::new("^yes$", true, flags).unwrap();
        assert!(verdict(&checker, "maybe\nYES"));
    }

    #[test]
    fn test_unknown_flag_fails_construction() {
        let err = RegexChecker::new("^safe$", true, "ZZZ").unwrap_err();
        match err {
            CheckerError::InvalidConfig(msg) => assert!(msg.contains("ZZZ")),
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_ascii_flag() {
        let ascii = RegexChecker::new(r"^\w+$", true, "A").unwrap();
        assert!(verdict(&ascii, "cafe"));
        assert!(!verdict(&ascii, "café"));

        let unicode = RegexChecker::new(r"^\w+$", true, RegexFlags::None).unwrap();
        assert!(verdict(&unicode, "café"));

        let dot = RegexChecker::new("a.c", true, "ASCII").unwrap();
        assert!(verdict(&dot, "aéc"));
    }

    #[test]
    fn test_ascii_flag_with_dot_keeps_word_class_ascii() {
        let checker = RegexChecker::new(r"^\w.\w$", true, "ASCII").unwrap();
        assert!(!verdict(&checker, "éxé"));
        assert!(verdict(&checker, "axb"));
        assert_eq!(checker.pattern(), r"^\w.\w$");
    }

    #[test]
    fn test_ascii_flag_inside_bracket_class() {
        let checker = RegexChecker::new(r"^[\w-]+$", true, "A").unwrap();
        assert!(verdict(&checker, "a-b_9"));
        assert!(!verdict(&checker, "é-b"));

        let negated = RegexChecker::new(r"^[\D]+$", true, "A").unwrap();
        assert!(verdict(&negated, "é٣"));
        assert!(!verdict(&negated, "7"));
    }

    #[test]
    fn test_ascii_flag_word_boundary_and_negations() {
        let boundary = RegexChecker::new(r"\bcat\b", false, "A").unwrap();
        assert!(!verdict(&boundary, "a cat here"));
        assert!(verdict(&boundary, "concatenate"));

        let not_word = RegexChecker::new(r"^\W$", true, "A").unwrap();
        assert!(verdict(&not_word, "é"));
        assert!(!verdict(&not_word, "e"));

        let not_space = RegexChecker::new(r"^\S+$", true, "A").unwrap();
        assert!(verdict(&not_space, "\u{a0}"));
    }

    #[test]
    fn test_ascii_perl_classes_rewrite() {
        assert_eq!(ascii_perl_classes(r"\d+"), "[0-9]+");
        assert_eq!(ascii_perl_classes(r"\\d"), r"\\d");
        assert_eq!(ascii_perl_classes(r"[\s\W]"), r"[\t\n\x0B\x0C\r [^0-9A-Za-z_]]");
        assert_eq!(ascii_perl_classes(r"[]\d]"), "[]0-9]");
        assert_eq!(ascii_perl_classes(r"\p{L}\B"), r"\p{L}\B");
    }

    #[test]
    fn test_locale_flag_is_accepted() {
        assert!(RegexChecker::new("x", true, "LOCALE").is_ok());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = RegexChecker::new("(unclosed", true, RegexFlags::None).unwrap_err();
        assert!(matches!(err, CheckerError::InvalidPattern(_)));
    }

    #[test]
    fn test_flags_deserialize_from_config() {
        let none: RegexFlags = serde_json::from_value(json!(0)).unwrap();
        assert!(none.resolve().unwrap().is_empty());

        let one: RegexFlags = serde_json::from_value(json!("A")).unwrap();
        assert_eq!(one.resolve().unwrap(), vec![RegexFlag::Ascii]);

        let many: RegexFlags = serde_json::from_value(json!(["I", "DOTALL"])).unwrap();
        assert_eq!(
            many.resolve().unwrap(),
            vec![RegexFlag::IgnoreCase, RegexFlag::DotAll]
        );
    }

    #[test]
    fn test_factory() {
        let checker = RegexCheckerFactory
            .create(&json!({"pattern": "^safe$", "match_safe": true}))
            .unwrap();
        assert_eq!(checker.name(), "RegexChecker");

        let err = RegexCheckerFactory
            .create(&json!({"pattern": "x", "match_safe": true, "flags": "ZZZ"}))
            .unwrap_err();
        assert!(matches!(err, CheckerError::InvalidConfig(_)));
    }
}
