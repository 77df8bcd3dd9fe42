//! Rules and the vocabulary to write them.
//!
//! A [`Rule`] pairs a pattern with an action and zero or more targets. The
//! free functions in this module are the building blocks language
//! definitions are written with: dynamic patterns ([`words`], [`chars`],
//! [`arg_pattern`]), dynamic actions ([`bygroup`], [`using`], [`skip`],
//! [`bytext`]), and dynamic targets ([`derive`], [`ifarg`], [`ifmember`]).
//!
//! A small JSON-ish array lexicon could look like this:
//!
//! ```text
//! fn array_rules() -> Vec<Rule> {
//!     vec![
//!         Rule::new(r"\d+", *NUMBER, vec![]),
//!         Rule::new(",", *SEPARATOR, vec![]),
//!         Rule::new(r"\]", *BRACKET, vec![TargetSpec::Int(-1)]),
//!         Rule::default_action(*TEXT),
//!     ]
//! }
//! ```

use crate::action::Action;
use crate::item::{Predicate, RuleItem, Value};
use crate::lexicon::Lexicon;
use crate::pattern::Pattern;

/// The pattern slot of a rule.
#[derive(Debug, Clone)]
pub enum RulePattern {
    /// A regular pattern, combined into the lexicon's alternation.
    Regex(Pattern),
    /// A dynamic pattern: a rule item that must fold to a string (or
    /// `None`, dropping the rule) when pre-evaluated with the lexicon
    /// argument.
    Item(RuleItem),
    /// Matches any run of text no other rule matches.
    DefaultAction,
    /// Taken when no rule matches; stops lexing in this lexicon.
    DefaultTarget,
}

/// The action slot of a rule.
#[derive(Debug, Clone)]
pub enum ActionSpec {
    /// A plain action; the match becomes one token.
    Action(Action),
    /// No action: the match produces no token (used with zero-width
    /// patterns that only switch contexts).
    None,
    /// One token per capture group, with the paired action.
    Subgroup(Vec<ActionSpec>),
    /// Lex the matched text with another lexicon and yield its tokens,
    /// flattened.
    Delegate(Lexicon),
    /// Silently drop the matched text.
    Skip,
    /// An item evaluating to an action at match time.
    Item(RuleItem),
}

impl From<Action> for ActionSpec {
    fn from(action: Action) -> ActionSpec {
        ActionSpec::Action(action)
    }
}

/// One element of a rule's target sequence.
#[derive(Debug, Clone)]
pub enum TargetSpec {
    /// Negative: pop contexts. Positive: push the current lexicon n times.
    Int(i32),
    /// Push this lexicon.
    Lexicon(Lexicon),
    /// An item evaluating to an integer or a lexicon at match time.
    Item(RuleItem),
}

impl From<i32> for TargetSpec {
    fn from(n: i32) -> TargetSpec {
        TargetSpec::Int(n)
    }
}

impl From<Lexicon> for TargetSpec {
    fn from(lexicon: Lexicon) -> TargetSpec {
        TargetSpec::Lexicon(lexicon)
    }
}

/// One rule of a lexicon.
#[derive(Debug, Clone)]
pub struct Rule {
    pub(crate) pattern: RulePattern,
    pub(crate) action: ActionSpec,
    pub(crate) targets: Vec<TargetSpec>,
}

impl Rule {
    /// A pattern rule.
    pub fn new(
        pattern: impl Into<Pattern>,
        action: impl Into<ActionSpec>,
        targets: Vec<TargetSpec>,
    ) -> Rule {
        Rule {
            pattern: RulePattern::Regex(pattern.into()),
            action: action.into(),
            targets,
        }
    }

    /// A rule with a dynamic pattern, e.g. from [`arg_pattern`].
    pub fn with_pattern_item(
        item: RuleItem,
        action: impl Into<ActionSpec>,
        targets: Vec<TargetSpec>,
    ) -> Rule {
        Rule {
            pattern: RulePattern::Item(item),
            action: action.into(),
            targets,
        }
    }

    /// The default-action rule: unmatched text gets this action.
    pub fn default_action(action: impl Into<ActionSpec>) -> Rule {
        Rule {
            pattern: RulePattern::DefaultAction,
            action: action.into(),
            targets: Vec::new(),
        }
    }

    /// The default-target rule: when nothing matches, follow this target.
    pub fn default_target(targets: Vec<TargetSpec>) -> Rule {
        Rule {
            pattern: RulePattern::DefaultTarget,
            action: ActionSpec::None,
            targets,
        }
    }
}

// ---------------------------------------------------------------------------
// Variables

/// The text the rule matched.
pub const TEXT: RuleItem = RuleItem::Text;

/// The argument of the (derived) lexicon the rule lives in.
pub const ARG: RuleItem = RuleItem::Arg;

/// The text of rule-local capture group `n` (1-based).
pub fn match_group(n: usize) -> RuleItem {
    RuleItem::MatchGroup(n)
}

// ---------------------------------------------------------------------------
// Dynamic patterns

/// A pattern matching any of the given words as an optimized alternation.
pub fn words(words: &[&str]) -> Pattern {
    Pattern::words(words)
}

/// Like [`words`], wrapped in a prefix and suffix (e.g. `\b`).
pub fn words_with(list: &[&str], prefix: &str, suffix: &str) -> Pattern {
    Pattern::words_with(list, prefix, suffix)
}

/// A pattern matching one of the characters.
pub fn chars(set: &str) -> Pattern {
    Pattern::chars(set)
}

/// A pattern built from the lexicon argument.
///
/// The argument string is regex-escaped (unless `escape` is false) and
/// wrapped in `prefix` and `suffix`. When the lexicon has no (string)
/// argument, the rule is dropped.
pub fn arg_pattern(escape: bool, prefix: &str, suffix: &str) -> RuleItem {
    let prefix = prefix.to_string();
    let suffix = suffix.to_string();
    let build = Predicate::new(move |args: &[Value]| match &args[0] {
        Value::Str(s) => {
            let body = if escape {
                regex::escape(s)
            } else {
                s.clone()
            };
            Value::Str(format!("{}{}{}", prefix, body, suffix))
        }
        _ => Value::None,
    });
    RuleItem::Pattern(Box::new(RuleItem::Call(build, vec![ARG])))
}

/// A pattern that is `pattern` when the lexicon has an argument, and
/// `else_pattern` (dropping the rule when `None`) otherwise.
pub fn ifarg(pattern: &str, else_pattern: Option<&str>) -> RuleItem {
    let then_value = Value::Str(pattern.to_string());
    let else_value = match else_pattern {
        Some(p) => Value::Str(p.to_string()),
        None => Value::None,
    };
    RuleItem::Pattern(Box::new(RuleItem::Select {
        index: Box::new(RuleItem::Call(
            Predicate::new(|args: &[Value]| {
                Value::Int(if matches!(args[0], Value::None) { 0 } else { 1 })
            }),
            vec![ARG],
        )),
        items: vec![RuleItem::Value(else_value), RuleItem::Value(then_value)],
    }))
}

// ---------------------------------------------------------------------------
// Dynamic actions

/// One token per capture group, with the paired actions.
pub fn bygroup(actions: Vec<ActionSpec>) -> ActionSpec {
    ActionSpec::Subgroup(actions)
}

/// Like [`bygroup`], for the common case of plain actions.
pub fn bygroups(actions: &[Action]) -> ActionSpec {
    ActionSpec::Subgroup(actions.iter().map(|a| ActionSpec::Action(*a)).collect())
}

/// Lex the matched text with `lexicon` and yield its tokens, flattened.
pub fn using(lexicon: Lexicon) -> ActionSpec {
    ActionSpec::Delegate(lexicon)
}

/// Silently drop the matched text.
pub fn skip() -> ActionSpec {
    ActionSpec::Skip
}

/// Choose a rule item by a predicate over the matched text.
///
/// The predicate receives the matched text and returns the index of the
/// item to use.
pub fn bytext(
    predicate: impl Fn(&str) -> usize + Send + Sync + 'static,
    items: Vec<RuleItem>,
) -> RuleItem {
    RuleItem::Select {
        index: Box::new(RuleItem::Call(
            Predicate::new(move |args: &[Value]| match &args[0] {
                Value::Str(s) => Value::Int(predicate(s) as i32),
                _ => Value::Int(0),
            }),
            vec![TEXT],
        )),
        items,
    }
}

/// Choose a rule item by a predicate over the capture group texts.
///
/// The predicate receives one `Option<&str>` per rule-local capture group
/// and returns the index of the item to use.
pub fn bymatch(
    predicate: impl Fn(&[Option<&str>]) -> usize + Send + Sync + 'static,
    items: Vec<RuleItem>,
) -> RuleItem {
    RuleItem::Select {
        index: Box::new(RuleItem::Call(
            Predicate::new(move |args: &[Value]| match &args[0] {
                Value::List(groups) => {
                    let texts: Vec<Option<&str>> = groups
                        .iter()
                        .map(|v| match v {
                            Value::Str(s) => Some(s.as_str()),
                            _ => None,
                        })
                        .collect();
                    Value::Int(predicate(&texts) as i32)
                }
                _ => Value::Int(0),
            }),
            vec![RuleItem::MatchGroups],
        )),
        items,
    }
}

/// `then` when the matched text is in the word list, `otherwise` if not.
pub fn ifmember(list: &[&str], then: RuleItem, otherwise: RuleItem) -> RuleItem {
    let set: std::collections::BTreeSet<String> = list.iter().map(|w| w.to_string()).collect();
    bytext(
        move |text| usize::from(set.contains(text)),
        vec![otherwise, then],
    )
}

// ---------------------------------------------------------------------------
// Dynamic targets

/// Derive `lexicon` with the value of `arg` as argument.
///
/// The classic use is a heredoc: capture the terminator word and derive the
/// body lexicon with it:
///
/// ```text
/// Rule::new(r"@(\w+)@", *NAME, vec![TargetSpec::Item(derive(here(), match_group(1)))])
/// ```
pub fn derive(lexicon: Lexicon, arg: RuleItem) -> RuleItem {
    RuleItem::Target {
        value: Box::new(RuleItem::Call(
            Predicate::new(|args: &[Value]| {
                Value::List(vec![Value::Int(0), args[0].clone()])
            }),
            vec![arg],
        )),
        lexicons: vec![lexicon],
    }
}

/// A target item selecting by an arbitrary value item.
///
/// When `value` evaluates to an integer, that integer is the target; when it
/// evaluates to a `(index, arg)` pair, `lexicons[index]` is derived with the
/// argument.
pub fn target(value: RuleItem, lexicons: Vec<Lexicon>) -> RuleItem {
    RuleItem::Target {
        value: Box::new(value),
        lexicons,
    }
}

/// Apply a predicate to evaluated argument items.
pub fn call(predicate: Predicate, args: Vec<RuleItem>) -> RuleItem {
    RuleItem::Call(predicate, args)
}

/// Choose one of the items by an index item.
pub fn select(index: RuleItem, items: Vec<RuleItem>) -> RuleItem {
    RuleItem::Select {
        index: Box::new(index),
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Arg, Env, PreEval};

    #[test]
    fn test_arg_pattern_folds_with_string_argument() {
        let item = arg_pattern(true, r"\b", r"\b");
        let arg = Some(Arg::from("STOP"));
        match item.pre_evaluate(&Env::with_arg(&arg)) {
            PreEval::Done(Value::Str(s)) => assert_eq!(s, r"\bSTOP\b"),
            other => panic!("expected pattern string, got {:?}", other),
        }
    }

    #[test]
    fn test_arg_pattern_drops_without_argument() {
        let item = arg_pattern(true, "", "");
        let arg = None;
        match item.pre_evaluate(&Env::with_arg(&arg)) {
            PreEval::Done(Value::None) => {}
            other => panic!("expected dropped pattern, got {:?}", other),
        }
    }

    #[test]
    fn test_arg_pattern_escapes() {
        let item = arg_pattern(true, "", "");
        let arg = Some(Arg::from("a+b"));
        match item.pre_evaluate(&Env::with_arg(&arg)) {
            PreEval::Done(Value::Str(s)) => assert_eq!(s, r"a\+b"),
            other => panic!("expected escaped pattern, got {:?}", other),
        }
    }

    #[test]
    fn test_ifarg_selects_by_argument_presence() {
        let item = ifarg("yes", None);
        let arg = Some(Arg::from(1));
        match item.pre_evaluate(&Env::with_arg(&arg)) {
            PreEval::Done(Value::Str(s)) => assert_eq!(s, "yes"),
            other => panic!("expected pattern, got {:?}", other),
        }
        let arg = None;
        match item.pre_evaluate(&Env::with_arg(&arg)) {
            PreEval::Done(Value::None) => {}
            other => panic!("expected dropped pattern, got {:?}", other),
        }
    }

    #[test]
    fn test_ifmember() {
        let then = RuleItem::Value(Value::Int(1));
        let otherwise = RuleItem::Value(Value::Int(0));
        let item = ifmember(&["red", "blue"], then, otherwise);
        let m = crate::item::Match::new(0, 3, vec![]);
        let env = Env::at_match("red", &m);
        assert_eq!(item.evaluate(&env).unwrap(), Value::Int(1));
        let env = Env::at_match("green", &m);
        assert_eq!(item.evaluate(&env).unwrap(), Value::Int(0));
    }
}
