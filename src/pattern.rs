//! Patterns and helpers to construct regular expressions.
//!
//! A rule's pattern is either a literal regex source string or a lazily
//! built value such as a word list that is rendered to an optimized
//! alternation. Building happens once, when the owning lexicon compiles its
//! rules.
//!
//! The helpers in this module are also useful on their own:
//!
//! ```
//! use treelex::pattern::words_to_regexp;
//!
//! let rx = words_to_regexp(&["car", "cdr"]);
//! assert_eq!(rx, "c[ad]r");
//! ```

/// A rule pattern, built to a regex source string at lexicon compile time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// A regex source string, used as-is.
    Raw(String),
    /// A word list, rendered to an optimized alternation wrapped in the
    /// given prefix and suffix (both may be empty).
    Words {
        /// The words to match.
        words: Vec<String>,
        /// Regex source prepended to the alternation.
        prefix: String,
        /// Regex source appended to the alternation.
        suffix: String,
    },
    /// A character class matching one of the characters (or, when
    /// `positive` is false, any character not in the set).
    Chars {
        /// The characters in the set.
        chars: String,
        /// Whether the class is positive or negated.
        positive: bool,
    },
}

impl Pattern {
    /// A pattern from a regex source string.
    pub fn raw(source: impl Into<String>) -> Pattern {
        Pattern::Raw(source.into())
    }

    /// A pattern matching any of the given words.
    pub fn words(words: &[&str]) -> Pattern {
        Pattern::words_with(words, "", "")
    }

    /// A pattern matching any of the given words, wrapped in a prefix and
    /// suffix, e.g. `\b` word boundaries.
    pub fn words_with(words: &[&str], prefix: &str, suffix: &str) -> Pattern {
        Pattern::Words {
            words: words.iter().map(|w| w.to_string()).collect(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        }
    }

    /// A pattern matching one of the characters in the string.
    pub fn chars(chars: impl Into<String>) -> Pattern {
        Pattern::Chars {
            chars: chars.into(),
            positive: true,
        }
    }

    /// A pattern matching one character that is *not* in the string.
    pub fn chars_negated(chars: impl Into<String>) -> Pattern {
        Pattern::Chars {
            chars: chars.into(),
            positive: false,
        }
    }

    /// Build the regex source for this pattern.
    pub fn source(&self) -> String {
        match self {
            Pattern::Raw(source) => source.clone(),
            Pattern::Words {
                words,
                prefix,
                suffix,
            } => {
                let words: Vec<&str> = words.iter().map(String::as_str).collect();
                let expr = words_to_regexp(&words);
                if prefix.is_empty() && suffix.is_empty() {
                    expr
                } else {
                    format!("{}(?:{}){}", prefix, expr, suffix)
                }
            }
            Pattern::Chars { chars, positive } => {
                let negate = if *positive { "" } else { "^" };
                format!("[{}{}]", negate, make_charclass(chars.chars()))
            }
        }
    }
}

impl From<&str> for Pattern {
    fn from(source: &str) -> Pattern {
        Pattern::Raw(source.to_string())
    }
}

impl From<String> for Pattern {
    fn from(source: String) -> Pattern {
        Pattern::Raw(source)
    }
}

/// Convert a word list to an optimized regular expression source.
///
/// Words sharing prefixes and suffixes are collapsed into a radix trie
/// before rendering, so common material appears only once and single
/// characters merge into character classes.
pub fn words_to_regexp(words: &[&str]) -> String {
    if words.is_empty() {
        return String::new();
    }
    let (words, suffix) = common_suffix(words);
    let trie = Trie::from_words(&words);
    let mut expr = trie.to_regexp(true);
    if !suffix.is_empty() {
        expr.push_str(&regex::escape(&suffix));
    }
    expr
}

/// Return a character class body with adjacent characters grouped.
///
/// ```
/// use treelex::pattern::make_charclass;
///
/// assert_eq!(make_charclass("abcdf".chars()), "a-df");
/// ```
pub fn make_charclass(chars: impl Iterator<Item = char>) -> String {
    let mut points: Vec<u32> = chars.map(u32::from).collect();
    points.sort_unstable();
    points.dedup();
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for c in points {
        match ranges.last_mut() {
            Some(last) if last.1 + 1 == c => last.1 = c,
            _ => ranges.push((c, c)),
        }
    }
    let mut out = String::new();
    for (a, b) in ranges {
        let a = char::from_u32(a).unwrap_or('\u{FFFD}');
        let b = char::from_u32(b).unwrap_or('\u{FFFD}');
        if a == b {
            out.push_str(&escape_in_class(a));
        } else if a as u32 + 1 == b as u32 {
            out.push_str(&escape_in_class(a));
            out.push_str(&escape_in_class(b));
        } else {
            out.push_str(&escape_in_class(a));
            out.push('-');
            out.push_str(&escape_in_class(b));
        }
    }
    out
}

/// Escape a character for use inside a character class.
fn escape_in_class(c: char) -> String {
    match c {
        '\\' | ']' | '[' | '^' | '-' | '&' | '~' => format!("\\{}", c),
        _ => c.to_string(),
    }
}

/// Split off the common suffix of the words.
///
/// Returns the words with the suffix chopped off, and the suffix itself
/// (empty if there is none).
pub fn common_suffix(words: &[&str]) -> (Vec<String>, String) {
    let mut suffix: Vec<char> = Vec::new();
    let reversed: Vec<Vec<char>> = words.iter().map(|w| w.chars().rev().collect()).collect();
    'outer: for i in 0.. {
        let mut it = reversed.iter().map(|w| w.get(i));
        let first = match it.next().flatten() {
            Some(c) => *c,
            None => break,
        };
        for c in it {
            if c != Some(&first) {
                break 'outer;
            }
        }
        suffix.push(first);
    }
    suffix.reverse();
    let suffix: String = suffix.into_iter().collect();
    let words = words
        .iter()
        .map(|w| w[..w.len() - suffix.len()].to_string())
        .collect();
    (words, suffix)
}

/// Convert an unambiguous regexp to a plain string.
///
/// Returns the string when the expression matches exactly one literal text,
/// so substring search can replace the regex engine. Returns `None` when the
/// expression uses any metacharacter or an escape we do not resolve.
pub fn to_string(expr: &str) -> Option<String> {
    let mut out = String::new();
    let mut chars = expr.chars();
    while let Some(c) = chars.next() {
        match c {
            '^' | '$' | '|' | '.' | '(' | ')' | '[' | ']' | '{' | '}' | '+' | '*' | '?' => {
                return None
            }
            '\\' => {
                let e = chars.next()?;
                match e {
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    'f' => out.push('\u{0C}'),
                    'v' => out.push('\u{0B}'),
                    'a' => out.push('\u{07}'),
                    'x' => {
                        let hex: String = chars.by_ref().take(2).collect();
                        out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
                    }
                    'u' => {
                        let hex: String = chars.by_ref().take(4).collect();
                        out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
                    }
                    '^' | '$' | '|' | '.' | '(' | ')' | '[' | ']' | '{' | '}' | '+' | '*'
                    | '?' | '\\' | '-' | '/' | ' ' | '\'' | '"' | '#' | '&' | '~' | ',' | ';'
                    | ':' | '<' | '>' | '=' | '!' | '@' | '%' => out.push(e),
                    _ => return None,
                }
            }
            _ => out.push(c),
        }
    }
    Some(out)
}

/// A radix trie over the word list, with single-child chains merged.
struct Trie {
    /// Child edges, keyed by the (merged) edge text, in deterministic order.
    children: Vec<(String, Trie)>,
    /// Whether a word ends at this node.
    terminal: bool,
}

impl Trie {
    fn new() -> Trie {
        Trie {
            children: Vec::new(),
            terminal: false,
        }
    }

    fn from_words(words: &[String]) -> Trie {
        let mut root = Trie::new();
        for word in words {
            root.insert(word);
        }
        root.merge_chains();
        root
    }

    fn insert(&mut self, word: &str) {
        let mut node = self;
        for c in word.chars() {
            let key = c.to_string();
            let idx = match node.children.iter().position(|(k, _)| *k == key) {
                Some(i) => i,
                None => {
                    node.children.push((key, Trie::new()));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[idx].1;
        }
        node.terminal = true;
    }

    /// Merge runs of single-child non-terminal nodes into one edge.
    fn merge_chains(&mut self) {
        for (key, child) in &mut self.children {
            while child.children.len() == 1 && !child.terminal {
                let (k, sub) = child.children.pop().expect("one child");
                key.push_str(&k);
                *child = sub;
            }
            child.merge_chains();
        }
    }

    /// Render this node's alternation to a regex source string.
    ///
    /// `top` suppresses the non-capturing group when the whole expression
    /// is a single alternative.
    fn to_regexp(&self, top: bool) -> String {
        if self.children.is_empty() {
            return String::new();
        }
        // A terminal among children makes the whole alternation optional.
        let optional = self.terminal;

        // Single chars whose branch ends immediately collapse into a class.
        let mut class_chars: Vec<char> = Vec::new();
        let mut alts: Vec<String> = Vec::new();
        for (key, child) in &self.children {
            let is_leaf = child.children.is_empty();
            let mut one = key.chars();
            let first = one.next();
            if is_leaf && one.next().is_none() {
                if let Some(c) = first {
                    class_chars.push(c);
                    continue;
                }
            }
            let mut alt = regex::escape(key);
            alt.push_str(&child.to_regexp(false));
            alts.push(alt);
        }
        if class_chars.len() == 1 {
            alts.push(regex::escape(&class_chars[0].to_string()));
        } else if class_chars.len() > 1 {
            alts.push(format!("[{}]", make_charclass(class_chars.into_iter())));
        }
        alts.sort();

        let single_class = alts.len() == 1 && self.children.len() > 1 && alts[0].starts_with('[');
        let joined = alts.join("|");
        if alts.len() == 1 && (top || single_class || !joined.contains('|')) && !optional {
            joined
        } else if single_class && optional {
            format!("{}?", joined)
        } else if optional {
            format!("(?:{})?", joined)
        } else if alts.len() == 1 {
            joined
        } else {
            format!("(?:{})", joined)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn matches_exactly(rx: &str, words: &[&str], non_words: &[&str]) {
        let re = Regex::new(&format!(r"\A(?:{})\z", rx)).expect("valid regex");
        for w in words {
            assert!(re.is_match(w), "{:?} should match {:?}", rx, w);
        }
        for w in non_words {
            assert!(!re.is_match(w), "{:?} should not match {:?}", rx, w);
        }
    }

    #[test]
    fn test_single_word() {
        matches_exactly(&words_to_regexp(&["foo"]), &["foo"], &["fo", "fooo"]);
    }

    #[test]
    fn test_charclass_merge() {
        assert_eq!(words_to_regexp(&["car", "cdr"]), "c[ad]r");
    }

    #[test]
    fn test_common_suffix_words() {
        let rx = words_to_regexp(&["opa", "oma", "mama", "papa"]);
        matches_exactly(&rx, &["opa", "oma", "mama", "papa"], &["oma_", "ama", "o"]);
    }

    #[test]
    fn test_prefix_sharing() {
        let rx = words_to_regexp(&["begin", "beginner", "begins"]);
        matches_exactly(&rx, &["begin", "beginner", "begins"], &["beg", "beginn"]);
    }

    #[test]
    fn test_lisp_accessors() {
        let rx = words_to_regexp(&["car", "cdr", "caar", "cadr", "cdar", "cddr"]);
        matches_exactly(
            &rx,
            &["car", "cdr", "caar", "cadr", "cdar", "cddr"],
            &["cr", "cadar"],
        );
    }

    #[test]
    fn test_escaping() {
        let rx = words_to_regexp(&["a+b", "a+c"]);
        matches_exactly(&rx, &["a+b", "a+c"], &["ab", "aab"]);
    }

    #[test]
    fn test_common_suffix_helper() {
        let (words, suffix) = common_suffix(&["opa", "oma", "mama", "papa"]);
        assert_eq!(suffix, "a");
        assert_eq!(words, vec!["op", "om", "mam", "pap"]);
    }

    #[test]
    fn test_no_common_suffix() {
        let (words, suffix) = common_suffix(&["ab", "cd"]);
        assert_eq!(suffix, "");
        assert_eq!(words, vec!["ab", "cd"]);
    }

    #[test]
    fn test_to_string_literal() {
        assert_eq!(to_string(r"a\.e"), Some("a.e".to_string()));
        assert_eq!(to_string(r"a\ne"), Some("a\ne".to_string()));
        assert_eq!(to_string("abc"), Some("abc".to_string()));
    }

    #[test]
    fn test_to_string_rejects_metacharacters() {
        assert_eq!(to_string("a.e"), None);
        assert_eq!(to_string("ab+"), None);
        assert_eq!(to_string(r"\d"), None);
    }

    #[test]
    fn test_make_charclass_ranges() {
        assert_eq!(make_charclass("abcdefghjklmnop".chars()), "a-hj-p");
        assert_eq!(make_charclass("ab".chars()), "ab");
    }

    #[test]
    fn test_pattern_words_source() {
        let p = Pattern::words_with(&["if", "else"], r"\b", r"\b");
        let re = Regex::new(&p.source()).expect("valid regex");
        assert!(re.is_match("if"));
        assert!(re.is_match("else"));
        assert!(!re.is_match("iff"));
    }

    #[test]
    fn test_pattern_chars_source() {
        let p = Pattern::chars("+-*/");
        let re = Regex::new(&p.source()).expect("valid regex");
        assert!(re.is_match("+"));
        assert!(!re.is_match("a"));
    }
}
