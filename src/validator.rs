//! Static validation of lexicons.
//!
//! Language definitions are ordinary data, so most mistakes only surface
//! when a lexicon is first used on text that happens to hit the broken
//! rule. [`validate_lexicon`] checks a lexicon up front:
//!
//! * duplicate or conflicting default rules;
//! * patterns that do not compile, or that match the empty string (which
//!   cannot stall the lexer, but silently skips input);
//! * malformed target sequences;
//! * default targets that loop back to a lexicon already on the chain
//!   without consuming input.
//!
//! Errors mean the lexicon will misbehave; warnings are suspicious but may
//! be intended.

use rustc_hash::FxHashSet;

use crate::error::Result;
use crate::lexicon::Lexicon;
use crate::rule::{RulePattern, TargetSpec};

/// The findings of a validation run.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Definite problems; the lexicon will not work as written.
    pub errors: Vec<String>,
    /// Suspicious constructs that may be intended.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Whether no errors were found (warnings are allowed).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, lexicon: &Lexicon, message: impl Into<String>) {
        self.errors
            .push(format!("{}: error: {}", lexicon, message.into()));
    }

    fn warning(&mut self, lexicon: &Lexicon, message: impl Into<String>) {
        self.warnings
            .push(format!("{}: warning: {}", lexicon, message.into()));
    }
}

/// Validate a single lexicon.
pub fn validate_lexicon(lexicon: &Lexicon) -> ValidationResult {
    let mut result = ValidationResult::default();
    let rules = match lexicon.rules() {
        Ok(rules) => rules,
        Err(e) => {
            result.error(lexicon, e.to_string());
            return result;
        }
    };

    let mut seen_default_action = false;
    let mut seen_default_target = false;
    for rule in rules {
        match &rule.pattern {
            RulePattern::DefaultAction => {
                if seen_default_action {
                    result.error(lexicon, "conflicting default actions");
                }
                seen_default_action = true;
            }
            RulePattern::DefaultTarget => {
                if seen_default_target {
                    result.error(lexicon, "conflicting default targets");
                }
                seen_default_target = true;
                check_default_target(lexicon, &rule.targets, &mut result);
            }
            RulePattern::Regex(pattern) => {
                let source = pattern.source();
                match regex::Regex::new(&source) {
                    Err(e) => result.error(
                        lexicon,
                        format!("regular expression {:?} error: {}", source, e),
                    ),
                    Ok(re) => {
                        if re.is_match("") {
                            result.warning(
                                lexicon,
                                format!("pattern {:?} matches the empty string", source),
                            );
                        }
                    }
                }
            }
            RulePattern::Item(_) => {
                result.error(lexicon, "pattern did not fold at rule binding");
            }
        }
    }
    if seen_default_action && seen_default_target {
        result.error(
            lexicon,
            "can't have both a default action and a default target",
        );
    }
    result
}

/// Validate several lexicons; `true` when all are valid.
pub fn validate_lexicons<'a>(lexicons: impl IntoIterator<Item = &'a Lexicon>) -> bool {
    lexicons
        .into_iter()
        .map(validate_lexicon)
        .all(|r| r.is_valid())
}

/// Follow a default-target chain and report when it cannot make progress
/// or returns to a lexicon already seen.
fn check_default_target(lexicon: &Lexicon, targets: &[TargetSpec], result: &mut ValidationResult) {
    let mut current = lexicon.clone();
    let mut targets: Vec<TargetSpec> = targets.to_vec();
    let mut state: Vec<Lexicon> = vec![lexicon.clone()];
    let mut circular: FxHashSet<usize> = FxHashSet::default();

    loop {
        circular.insert(current.key());
        let depth = state.len();
        for spec in &targets {
            match spec {
                TargetSpec::Int(i) if *i < 0 => {
                    if state.len() as i32 + i < 1 {
                        return; // pops out of the chain: fine
                    }
                    state.truncate((state.len() as i32 + i) as usize);
                }
                TargetSpec::Int(i) => {
                    for _ in 0..*i {
                        state.push(current.clone());
                    }
                }
                TargetSpec::Lexicon(l) => state.push(l.clone()),
                TargetSpec::Item(_) => {
                    result.error(
                        lexicon,
                        "only integers and lexicons are allowed in a default target",
                    );
                    return;
                }
            }
        }
        if state.len() == depth {
            result.error(lexicon, "invalid default target");
            return;
        }
        current = state.last().expect("chain never empties").clone();
        if circular.contains(&current.key()) {
            result.error(
                lexicon,
                format!(
                    "circular default target: {}",
                    state
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(" -> ")
                ),
            );
            return;
        }
        match default_target_of(&current) {
            Ok(Some(next)) => targets = next,
            Ok(None) => return,
            Err(_) => return, // reported when that lexicon is validated
        }
    }
}

/// The default-target specs of a lexicon, if it has one.
fn default_target_of(lexicon: &Lexicon) -> Result<Option<Vec<TargetSpec>>> {
    for rule in lexicon.rules()? {
        if matches!(rule.pattern, RulePattern::DefaultTarget) {
            return Ok(Some(rule.targets.clone()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::LexiconDescriptor;
    use crate::rule::Rule;
    use crate::stdactions::{NAME, TEXT};

    #[test]
    fn test_valid_lexicon() {
        fn rules() -> Vec<Rule> {
            vec![
                Rule::new(r"\w+", *NAME, vec![]),
                Rule::default_action(*TEXT),
            ]
        }
        static OK: LexiconDescriptor = LexiconDescriptor::new("ValTest", "ok", rules);
        let result = validate_lexicon(&Lexicon::of(&OK));
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_invalid_regex_reported() {
        fn rules() -> Vec<Rule> {
            vec![Rule::new("(", *NAME, vec![])]
        }
        static BROKEN: LexiconDescriptor = LexiconDescriptor::new("ValTest", "broken", rules);
        let result = validate_lexicon(&Lexicon::of(&BROKEN));
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("ValTest.broken"));
    }

    #[test]
    fn test_empty_match_warned() {
        fn rules() -> Vec<Rule> {
            vec![Rule::new(r"\d*", *NAME, vec![])]
        }
        static EMPTYISH: LexiconDescriptor = LexiconDescriptor::new("ValTest", "emptyish", rules);
        let result = validate_lexicon(&Lexicon::of(&EMPTYISH));
        assert!(result.is_valid());
        assert!(result.warnings[0].contains("empty string"));
    }

    #[test]
    fn test_conflicting_defaults() {
        fn rules() -> Vec<Rule> {
            vec![
                Rule::default_action(*TEXT),
                Rule::default_action(*NAME),
            ]
        }
        static TWICE: LexiconDescriptor = LexiconDescriptor::new("ValTest", "twice", rules);
        let result = validate_lexicon(&Lexicon::of(&TWICE));
        assert!(!result.is_valid());
    }

    #[test]
    fn test_default_action_and_target_are_exclusive() {
        fn rules() -> Vec<Rule> {
            vec![
                Rule::new(r"\w+", *NAME, vec![]),
                Rule::default_action(*TEXT),
                Rule::default_target(vec![TargetSpec::Int(-1)]),
            ]
        }
        static BOTH: LexiconDescriptor = LexiconDescriptor::new("ValTest", "both", rules);
        let result = validate_lexicon(&Lexicon::of(&BOTH));
        assert!(!result.is_valid());
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("can't have both a default action and a default target")));
    }

    #[test]
    fn test_circular_default_target() {
        fn a_rules() -> Vec<Rule> {
            vec![Rule::default_target(vec![TargetSpec::Lexicon(Lexicon::of(
                &CIRC_B,
            ))])]
        }
        fn b_rules() -> Vec<Rule> {
            vec![Rule::default_target(vec![TargetSpec::Lexicon(Lexicon::of(
                &CIRC_A,
            ))])]
        }
        static CIRC_A: LexiconDescriptor = LexiconDescriptor::new("ValTest", "circ_a", a_rules);
        static CIRC_B: LexiconDescriptor = LexiconDescriptor::new("ValTest", "circ_b", b_rules);
        let result = validate_lexicon(&Lexicon::of(&CIRC_A));
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("circular default target"));
    }

    #[test]
    fn test_popless_default_target_cycle_is_invalid() {
        fn a_rules() -> Vec<Rule> {
            vec![Rule::default_target(vec![TargetSpec::Lexicon(Lexicon::of(
                &SWAP_B,
            ))])]
        }
        fn b_rules() -> Vec<Rule> {
            vec![Rule::default_target(vec![
                TargetSpec::Int(-1),
                TargetSpec::Lexicon(Lexicon::of(&SWAP_A)),
            ])]
        }
        static SWAP_A: LexiconDescriptor = LexiconDescriptor::new("ValTest", "swap_a", a_rules);
        static SWAP_B: LexiconDescriptor = LexiconDescriptor::new("ValTest", "swap_b", b_rules);
        // pop one, push one: the chain never makes progress
        let result = validate_lexicon(&Lexicon::of(&SWAP_A));
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("invalid default target"));
    }

    #[test]
    fn test_popping_default_target_is_fine() {
        fn rules() -> Vec<Rule> {
            vec![
                Rule::new(r"\w+", *NAME, vec![]),
                Rule::default_target(vec![TargetSpec::Int(-1)]),
            ]
        }
        static POPPER: LexiconDescriptor = LexiconDescriptor::new("ValTest", "popper", rules);
        let result = validate_lexicon(&Lexicon::of(&POPPER));
        assert!(result.is_valid());
    }
}
