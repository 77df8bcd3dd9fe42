//! Replaceable rule items.
//!
//! Rules may contain small expression trees that are evaluated against the
//! text a rule matched, the regex match itself, or the argument a derived
//! lexicon was created with. A [`RuleItem`] is such an expression node; a
//! [`Value`] is what evaluation produces.
//!
//! Items are evaluated in two stages:
//!
//! * **pre-evaluation** against `{arg}` alone, when a lexicon binds its
//!   rules. Items that depend only on the lexicon argument fold to plain
//!   values and disappear from the rule; items that also need the match
//!   survive, partially folded.
//! * **full evaluation** against `{text, match}` when a rule matches.
//!
//! Pre-evaluation never fails on a missing variable; it simply leaves the
//! item in place for the later stage.

use std::fmt;
use std::sync::Arc;

use crate::action::Action;
use crate::error::{Error, Result};
use crate::lexicon::Lexicon;

/// The argument of a derived lexicon: a small hashable value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Arg {
    /// A string argument, e.g. a heredoc terminator.
    Str(String),
    /// An integer argument.
    Int(i32),
    /// An action argument.
    Action(Action),
}

impl From<&str> for Arg {
    fn from(s: &str) -> Arg {
        Arg::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Arg {
        Arg::Str(s)
    }
}

impl From<i32> for Arg {
    fn from(i: i32) -> Arg {
        Arg::Int(i)
    }
}

impl From<Action> for Arg {
    fn from(a: Action) -> Arg {
        Arg::Action(a)
    }
}

/// One capture group of a match, in absolute text offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// Start offset in the lexed text.
    pub start: usize,
    /// End offset in the lexed text.
    pub end: usize,
    /// The captured text.
    pub text: String,
}

/// The relevant data of one regex match, detached from the regex engine.
///
/// Group numbering is rule-local: group 1 is the first capture group of the
/// matched rule's own pattern, regardless of where that pattern ended up in
/// the combined lexicon regex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Start offset of the whole match.
    pub start: usize,
    /// End offset of the whole match.
    pub end: usize,
    groups: Vec<Option<Capture>>,
}

impl Match {
    pub(crate) fn new(start: usize, end: usize, groups: Vec<Option<Capture>>) -> Match {
        Match { start, end, groups }
    }

    /// The number of capture groups in the matched pattern.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// The capture for rule-local group `n` (1-based), if it participated.
    pub fn group(&self, n: usize) -> Option<&Capture> {
        if n == 0 {
            return None;
        }
        self.groups.get(n - 1).and_then(Option::as_ref)
    }
}

/// The result of evaluating a rule item.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The absence of a value; rules item producing it are dropped.
    None,
    /// An integer, e.g. a pop/push count.
    Int(i32),
    /// A string.
    Str(String),
    /// An action.
    Action(Action),
    /// A lexicon (possibly derived).
    Lexicon(Lexicon),
    /// A list of values; unrolled wherever a rule slot expects one value.
    List(Vec<Value>),
}

impl Value {
    /// Convert to a lexicon argument, if the value can be one.
    pub(crate) fn to_arg(&self) -> Option<Option<Arg>> {
        match self {
            Value::None => Some(None),
            Value::Str(s) => Some(Some(Arg::Str(s.clone()))),
            Value::Int(i) => Some(Some(Arg::Int(*i))),
            Value::Action(a) => Some(Some(Arg::Action(*a))),
            _ => None,
        }
    }

    /// A short display form for error messages.
    pub(crate) fn describe(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Str(s) => format!("{:?}", s),
            Value::Action(a) => a.to_string(),
            Value::Lexicon(l) => l.to_string(),
            Value::List(v) => format!("list of {} values", v.len()),
        }
    }
}

impl From<&Arg> for Value {
    fn from(arg: &Arg) -> Value {
        match arg {
            Arg::Str(s) => Value::Str(s.clone()),
            Arg::Int(i) => Value::Int(*i),
            Arg::Action(a) => Value::Action(*a),
        }
    }
}

/// Flatten a value, unrolling nested lists.
pub(crate) fn unroll(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::List(values) => {
            for v in values {
                unroll(v, out);
            }
        }
        v => out.push(v),
    }
}

/// The evaluation environment for rule items.
///
/// Fields that are `None` are *absent*: an item referencing them raises
/// [`Error::Evaluation`] (full evaluation) or survives unchanged
/// (pre-evaluation). Note that `arg` distinguishes "absent" from "present
/// with no value": a vanilla lexicon pre-evaluates with `Some(&None)`.
#[derive(Clone, Copy, Default)]
pub struct Env<'e> {
    pub(crate) arg: Option<&'e Option<Arg>>,
    pub(crate) text: Option<&'e str>,
    pub(crate) match_: Option<&'e Match>,
}

impl<'e> Env<'e> {
    /// The pre-evaluation environment of a lexicon with the given argument.
    pub fn with_arg(arg: &'e Option<Arg>) -> Env<'e> {
        Env {
            arg: Some(arg),
            text: None,
            match_: None,
        }
    }

    /// The match-time environment.
    pub fn at_match(text: &'e str, match_: &'e Match) -> Env<'e> {
        Env {
            arg: None,
            text: Some(text),
            match_: Some(match_),
        }
    }

    /// An environment carrying only the matched text (default actions).
    pub fn with_text(text: &'e str) -> Env<'e> {
        Env {
            arg: None,
            text: Some(text),
            match_: None,
        }
    }
}

/// A pure predicate callable from rules.
///
/// Predicates receive the evaluated argument values and return a value,
/// typically an index for [`select`](RuleItem::Select). They must be pure:
/// the lexer may evaluate them at arbitrary times and caches the results.
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&[Value]) -> Value + Send + Sync>);

impl Predicate {
    /// Wrap a function as a predicate.
    pub fn new(f: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> Predicate {
        Predicate(Arc::new(f))
    }

    /// Apply the predicate.
    pub fn call(&self, args: &[Value]) -> Value {
        (self.0)(args)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<predicate>")
    }
}

/// The result of pre-evaluating an item against `{arg}`.
#[derive(Debug, Clone)]
pub enum PreEval {
    /// Fully evaluated to a value.
    Done(Value),
    /// Partially evaluated; a fresh, simpler item.
    Partial(RuleItem),
    /// Nothing could be evaluated; the item is unchanged.
    Unchanged,
}

/// An evaluatable node in a rule.
#[derive(Debug, Clone)]
pub enum RuleItem {
    /// A constant value.
    Value(Value),
    /// The text the rule matched.
    Text,
    /// The argument of the (derived) lexicon the rule lives in.
    Arg,
    /// The text of rule-local capture group `n` (1-based); `Value::None`
    /// when the group did not participate in the match.
    MatchGroup(usize),
    /// The texts of all rule-local capture groups, as a list.
    MatchGroups,
    /// Apply a predicate to evaluated arguments.
    Call(Predicate, Vec<RuleItem>),
    /// Choose one of the items by an integer index.
    Select {
        /// Evaluates to the index into `items`.
        index: Box<RuleItem>,
        /// The branches to choose from.
        items: Vec<RuleItem>,
    },
    /// Produce a target: an integer, or a derived lexicon when the value
    /// evaluates to a `(index, arg)` pair into `lexicons`.
    Target {
        /// Evaluates to an integer or a two-element list `(index, arg)`.
        value: Box<RuleItem>,
        /// The lexicons the pair form indexes into.
        lexicons: Vec<Lexicon>,
    },
    /// Carrier for a dynamic pattern; the inner item must fold at
    /// pre-evaluation time (patterns may depend on the argument only).
    Pattern(Box<RuleItem>),
}

impl RuleItem {
    /// Evaluate the item in the environment.
    pub fn evaluate(&self, env: &Env) -> Result<Value> {
        match self {
            RuleItem::Value(v) => Ok(v.clone()),
            RuleItem::Text => match env.text {
                Some(text) => Ok(Value::Str(text.to_string())),
                None => Err(Error::Evaluation { name: "text" }),
            },
            RuleItem::Arg => match env.arg {
                Some(arg) => Ok(arg.as_ref().map(Value::from).unwrap_or(Value::None)),
                None => Err(Error::Evaluation { name: "arg" }),
            },
            RuleItem::MatchGroup(n) => match env.match_ {
                Some(m) => Ok(m
                    .group(*n)
                    .map(|c| Value::Str(c.text.clone()))
                    .unwrap_or(Value::None)),
                None => Err(Error::Evaluation { name: "match" }),
            },
            RuleItem::MatchGroups => match env.match_ {
                Some(m) => Ok(Value::List(
                    (1..=m.group_count())
                        .map(|n| {
                            m.group(n)
                                .map(|c| Value::Str(c.text.clone()))
                                .unwrap_or(Value::None)
                        })
                        .collect(),
                )),
                None => Err(Error::Evaluation { name: "match" }),
            },
            RuleItem::Call(predicate, args) => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(a.evaluate(env)?);
                }
                Ok(predicate.call(&values))
            }
            RuleItem::Select { index, items } => {
                let index = match index.evaluate(env)? {
                    Value::Int(i) => i.max(0) as usize,
                    other => {
                        return Err(Error::Action {
                            lexicon: String::new(),
                            found: other.describe(),
                        })
                    }
                };
                match items.get(index) {
                    Some(item) => item.evaluate(env),
                    None => Ok(Value::None),
                }
            }
            RuleItem::Target { value, lexicons } => {
                let value = value.evaluate(env)?;
                resolve_target_value(value, lexicons)
            }
            RuleItem::Pattern(inner) => inner.evaluate(env),
        }
    }

    /// Try to evaluate the item; leave what cannot be evaluated yet.
    pub fn pre_evaluate(&self, env: &Env) -> PreEval {
        match self {
            RuleItem::Value(v) => PreEval::Done(v.clone()),
            RuleItem::Text | RuleItem::MatchGroup(_) | RuleItem::MatchGroups => {
                match self.evaluate(env) {
                    Ok(v) => PreEval::Done(v),
                    Err(_) => PreEval::Unchanged,
                }
            }
            RuleItem::Arg => match self.evaluate(env) {
                Ok(v) => PreEval::Done(v),
                Err(_) => PreEval::Unchanged,
            },
            RuleItem::Call(predicate, args) => {
                let (folded, complete, changed) = pre_evaluate_all(args, env);
                if complete {
                    let values: Vec<Value> = folded
                        .into_iter()
                        .map(|i| match i {
                            RuleItem::Value(v) => v,
                            _ => unreachable!("complete fold yields values"),
                        })
                        .collect();
                    PreEval::Done(predicate.call(&values))
                } else if changed {
                    PreEval::Partial(RuleItem::Call(predicate.clone(), folded))
                } else {
                    PreEval::Unchanged
                }
            }
            RuleItem::Select { index, items } => match index.pre_evaluate(env) {
                PreEval::Done(Value::Int(i)) => {
                    let i = i.max(0) as usize;
                    match items.get(i) {
                        Some(item) => match item.pre_evaluate(env) {
                            PreEval::Done(v) => PreEval::Done(v),
                            PreEval::Partial(item) => PreEval::Partial(item),
                            // The choice itself is a simplification.
                            PreEval::Unchanged => PreEval::Partial(item.clone()),
                        },
                        None => PreEval::Done(Value::None),
                    }
                }
                PreEval::Done(_) => PreEval::Unchanged,
                PreEval::Partial(index) => {
                    let (folded, _, _) = pre_evaluate_all(items, env);
                    PreEval::Partial(RuleItem::Select {
                        index: Box::new(index),
                        items: folded,
                    })
                }
                PreEval::Unchanged => {
                    let (folded, _, changed) = pre_evaluate_all(items, env);
                    if changed {
                        PreEval::Partial(RuleItem::Select {
                            index: index.clone(),
                            items: folded,
                        })
                    } else {
                        PreEval::Unchanged
                    }
                }
            },
            RuleItem::Target { value, lexicons } => match value.pre_evaluate(env) {
                PreEval::Done(v) => match resolve_target_value(v, lexicons) {
                    Ok(v) => PreEval::Done(v),
                    Err(_) => PreEval::Unchanged,
                },
                PreEval::Partial(value) => PreEval::Partial(RuleItem::Target {
                    value: Box::new(value),
                    lexicons: lexicons.clone(),
                }),
                PreEval::Unchanged => PreEval::Unchanged,
            },
            RuleItem::Pattern(inner) => match inner.pre_evaluate(env) {
                PreEval::Done(v) => PreEval::Done(v),
                PreEval::Partial(item) => PreEval::Partial(RuleItem::Pattern(Box::new(item))),
                PreEval::Unchanged => PreEval::Unchanged,
            },
        }
    }
}

/// Resolve the value of a target item: an integer stands for pop/push
/// counts, a `(index, arg)` list derives one of the given lexicons.
fn resolve_target_value(value: Value, lexicons: &[Lexicon]) -> Result<Value> {
    match value {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Lexicon(l) => Ok(Value::Lexicon(l)),
        Value::List(pair) if pair.len() == 2 => {
            let index = match &pair[0] {
                Value::Int(i) => (*i).max(0) as usize,
                other => {
                    return Err(Error::Target {
                        lexicon: String::new(),
                        rule: 0,
                        found: other.describe(),
                    })
                }
            };
            let lexicon = lexicons.get(index).ok_or_else(|| Error::Target {
                lexicon: String::new(),
                rule: 0,
                found: format!("lexicon index {} out of range", index),
            })?;
            let arg = pair[1].to_arg().ok_or_else(|| Error::Target {
                lexicon: String::new(),
                rule: 0,
                found: pair[1].describe(),
            })?;
            Ok(Value::Lexicon(lexicon.derived(arg)))
        }
        other => Err(Error::Target {
            lexicon: String::new(),
            rule: 0,
            found: other.describe(),
        }),
    }
}

/// Pre-evaluate a slice of items.
///
/// Returns the folded items (values wrapped back as `RuleItem::Value`),
/// whether all of them folded completely, and whether anything changed.
fn pre_evaluate_all(items: &[RuleItem], env: &Env) -> (Vec<RuleItem>, bool, bool) {
    let mut folded = Vec::with_capacity(items.len());
    let mut complete = true;
    let mut changed = false;
    for item in items {
        match item.pre_evaluate(env) {
            PreEval::Done(v) => {
                changed = changed || !matches!(item, RuleItem::Value(_));
                folded.push(RuleItem::Value(v));
            }
            PreEval::Partial(i) => {
                complete = false;
                changed = true;
                folded.push(i);
            }
            PreEval::Unchanged => {
                complete = false;
                folded.push(item.clone());
            }
        }
    }
    (folded, complete, changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn none_arg() -> Option<Arg> {
        None
    }

    #[test]
    fn test_arg_variable() {
        let arg = Some(Arg::from("STOP"));
        let env = Env::with_arg(&arg);
        assert_eq!(
            RuleItem::Arg.evaluate(&env).unwrap(),
            Value::Str("STOP".to_string())
        );

        let arg = none_arg();
        let env = Env::with_arg(&arg);
        assert_eq!(RuleItem::Arg.evaluate(&env).unwrap(), Value::None);
    }

    #[test]
    fn test_text_variable_missing() {
        let arg = none_arg();
        let env = Env::with_arg(&arg);
        assert_eq!(
            RuleItem::Text.evaluate(&env),
            Err(Error::Evaluation { name: "text" })
        );
    }

    #[test]
    fn test_match_group() {
        let m = Match::new(
            0,
            5,
            vec![
                Some(Capture {
                    start: 0,
                    end: 2,
                    text: "ab".to_string(),
                }),
                None,
            ],
        );
        let env = Env::at_match("abcde", &m);
        assert_eq!(
            RuleItem::MatchGroup(1).evaluate(&env).unwrap(),
            Value::Str("ab".to_string())
        );
        assert_eq!(RuleItem::MatchGroup(2).evaluate(&env).unwrap(), Value::None);
    }

    #[test]
    fn test_call_pre_evaluates_when_args_fold() {
        let upper = Predicate::new(|args| match &args[0] {
            Value::Str(s) => Value::Str(s.to_uppercase()),
            _ => Value::None,
        });
        let item = RuleItem::Call(upper, vec![RuleItem::Arg]);

        let arg = Some(Arg::from("stop"));
        let env = Env::with_arg(&arg);
        match item.pre_evaluate(&env) {
            PreEval::Done(Value::Str(s)) => assert_eq!(s, "STOP"),
            other => panic!("expected folded value, got {:?}", other),
        }
    }

    #[test]
    fn test_call_survives_without_match() {
        let first = Predicate::new(|args| args[0].clone());
        let item = RuleItem::Call(first, vec![RuleItem::Text]);
        let arg = none_arg();
        let env = Env::with_arg(&arg);
        assert!(matches!(item.pre_evaluate(&env), PreEval::Unchanged));
    }

    #[test]
    fn test_select_folds_chosen_branch() {
        let item = RuleItem::Select {
            index: Box::new(RuleItem::Value(Value::Int(1))),
            items: vec![
                RuleItem::Value(Value::Str("zero".to_string())),
                RuleItem::Value(Value::Str("one".to_string())),
            ],
        };
        let arg = none_arg();
        let env = Env::with_arg(&arg);
        match item.pre_evaluate(&env) {
            PreEval::Done(Value::Str(s)) => assert_eq!(s, "one"),
            other => panic!("expected folded value, got {:?}", other),
        }
    }

    #[test]
    fn test_unroll_flattens() {
        let mut out = Vec::new();
        unroll(
            Value::List(vec![
                Value::Int(1),
                Value::List(vec![Value::Int(2), Value::Int(3)]),
            ]),
            &mut out,
        );
        assert_eq!(out, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }
}
