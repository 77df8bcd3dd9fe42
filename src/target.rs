//! Targets describe where the lexer goes after a match.
//!
//! A [`Target`] is the reduction of a rule's target sequence: a non-positive
//! `pop` count and a list of lexicons to push. Targets compose left to
//! right; composing with the empty target is the identity.
//!
//! The [`TargetFactory`] accumulates targets across parse rows that emit no
//! lexemes (skips, zero-width context switches, default targets), so the
//! combined state change is attached to the next emitted event.

use crate::error::{Error, Result};
use crate::item::{unroll, Env, Value};
use crate::lexicon::Lexicon;
use crate::rule::TargetSpec;

/// A reduced target: how many contexts to pop, which lexicons to push.
///
/// `pop` is zero or negative. A target with `pop == 0` and no pushes is
/// never constructed; `Option<Target>` stands for "no state change".
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Zero or negative: how many contexts to leave.
    pub pop: i32,
    /// The lexicons to enter, in order.
    pub push: Vec<Lexicon>,
}

impl Target {
    /// Reduce a rule's target sequence.
    ///
    /// `current` is the lexicon the rule belongs to; positive integers push
    /// it. Items are evaluated in `env`; pass `None` only when the sequence
    /// is known to be static. `rule` is used in error messages.
    pub(crate) fn make(
        current: &Lexicon,
        specs: &[TargetSpec],
        env: Option<&Env>,
        rule: usize,
    ) -> Result<Option<Target>> {
        let mut pop = 0i32;
        let mut push: Vec<Lexicon> = Vec::new();
        for spec in specs {
            match spec {
                TargetSpec::Int(i) => apply_int(&mut pop, &mut push, current, *i),
                TargetSpec::Lexicon(l) => push.push(l.clone()),
                TargetSpec::Item(item) => {
                    let env = env.ok_or_else(|| Error::Target {
                        lexicon: current.full_name(),
                        rule,
                        found: "unevaluated rule item".to_string(),
                    })?;
                    let value = item.evaluate(env).map_err(|e| match e {
                        Error::Target { found, .. } => Error::Target {
                            lexicon: current.full_name(),
                            rule,
                            found,
                        },
                        other => other,
                    })?;
                    let mut values = Vec::new();
                    unroll(value, &mut values);
                    for v in values {
                        match v {
                            Value::Int(i) => apply_int(&mut pop, &mut push, current, i),
                            Value::Lexicon(l) => push.push(l),
                            Value::None => {}
                            other => {
                                return Err(Error::Target {
                                    lexicon: current.full_name(),
                                    rule,
                                    found: other.describe(),
                                })
                            }
                        }
                    }
                }
            }
        }
        if pop == 0 && push.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Target { pop, push }))
        }
    }

    /// A target entering one lexicon.
    pub fn enter(lexicon: Lexicon) -> Target {
        Target {
            pop: 0,
            push: vec![lexicon],
        }
    }

    /// A target leaving one context.
    pub fn leave() -> Target {
        Target {
            pop: -1,
            push: Vec::new(),
        }
    }
}

/// Apply one integer element of a target sequence.
fn apply_int(pop: &mut i32, push: &mut Vec<Lexicon>, current: &Lexicon, i: i32) {
    if i < 0 {
        let cancel = (-i) as usize;
        if cancel < push.len() {
            push.truncate(push.len() - cancel);
        } else {
            *pop += push.len() as i32 + i;
            push.clear();
        }
    } else {
        for _ in 0..i {
            push.push(current.clone());
        }
    }
}

/// Accumulates targets until an event is emitted.
#[derive(Debug, Default)]
pub(crate) struct TargetFactory {
    pop: i32,
    push: Vec<Lexicon>,
}

impl TargetFactory {
    pub(crate) fn new() -> TargetFactory {
        TargetFactory::default()
    }

    /// Compose `target` onto the accumulated state, left to right.
    pub(crate) fn add(&mut self, target: &Target) {
        if target.pop == 0 {
            self.push.extend(target.push.iter().cloned());
        } else {
            let cancel = (-target.pop) as usize;
            if cancel <= self.push.len() {
                self.push.truncate(self.push.len() - cancel);
                self.push.extend(target.push.iter().cloned());
            } else {
                self.pop += self.push.len() as i32 + target.pop;
                self.push = target.push.clone();
            }
        }
    }

    /// Record entering one lexicon.
    pub(crate) fn push(&mut self, lexicon: Lexicon) {
        self.push.push(lexicon);
    }

    /// Record leaving one context.
    pub(crate) fn pop(&mut self) {
        if self.push.is_empty() {
            self.pop -= 1;
        } else {
            self.push.pop();
        }
    }

    /// Take the accumulated target, resetting to the identity.
    pub(crate) fn take(&mut self) -> Option<Target> {
        if self.pop == 0 && self.push.is_empty() {
            return None;
        }
        let target = Target {
            pop: self.pop,
            push: std::mem::take(&mut self.push),
        };
        self.pop = 0;
        Some(target)
    }
}
