//! The Lexer parses text using a stack of lexicons.
//!
//! The lexer produces [`Event`] values. An event pairs an optional
//! [`Target`] with one or more lexemes; the target is the accumulated
//! context change since the previous event, to be applied *before* the
//! event's lexemes are attached. A lexeme is one `(pos, text, action)`
//! triple; its text is never empty.
//!
//! Rules that match without producing tokens (skips, zero-width context
//! switches, default targets) accumulate their targets until the next token
//! appears. A rule pushing a lexicon whose `consume` flag is set applies its
//! target *before* its own event, so its tokens land in the new context.
//!
//! The lexer is protected against circular default targets: when the same
//! `(position, stack depth, push length)` state is reached twice without
//! progress, the position is advanced by one character.
//!
//! ```text
//! for event in Lexer::new([Css::root()]).events("h1 { color: red; }", 0) {
//!     println!("{:?}", event?);
//! }
//! ```

use rustc_hash::FxHashSet;

use crate::action::Action;
use crate::error::{Error, Result};
use crate::item::{unroll, Env, Match, Value};
use crate::lexicon::{action_from_value, Lexicon, RuleMatch};
use crate::rule::ActionSpec;
use crate::target::{Target, TargetFactory};

/// One lexed piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme {
    /// Position in the text.
    pub pos: usize,
    /// The matched text; never empty.
    pub text: String,
    /// The action of the rule that matched.
    pub action: Action,
}

/// One step of the lexer output.
///
/// The target, if any, describes the context changes to apply before
/// attaching the lexemes. The lexemes are contiguous in the text and share
/// one parent context.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// The accumulated context change preceding the lexemes.
    pub target: Option<Target>,
    /// The tokens of this event; never empty.
    pub lexemes: Vec<Lexeme>,
}

/// A Lexer is responsible for parsing text using a stack of lexicons.
///
/// The first lexicon is the root and is never popped; the last one is the
/// currently active lexicon.
#[derive(Debug, Clone)]
pub struct Lexer {
    lexicons: Vec<Lexicon>,
}

impl Lexer {
    /// A lexer with the given initial stack (at least the root lexicon).
    pub fn new(lexicons: impl IntoIterator<Item = Lexicon>) -> Lexer {
        let lexicons: Vec<Lexicon> = lexicons.into_iter().collect();
        assert!(!lexicons.is_empty(), "a lexer needs at least one lexicon");
        Lexer { lexicons }
    }

    /// The current lexicon stack.
    pub fn lexicons(&self) -> &[Lexicon] {
        &self.lexicons
    }

    /// Start lexing `text` at `pos`, consuming the lexer.
    ///
    /// The returned iterator exposes the evolving stack via
    /// [`Events::lexicons`].
    pub fn events(self, text: &str, pos: usize) -> Events<'_> {
        Events {
            lexicons: self.lexicons,
            text,
            pos,
            parse: None,
            factory: TargetFactory::new(),
            circular: FxHashSet::default(),
            done: false,
        }
    }
}

/// Iterator over the events of a lexing run; see [`Lexer::events`].
pub struct Events<'t> {
    lexicons: Vec<Lexicon>,
    text: &'t str,
    pos: usize,
    parse: Option<crate::lexicon::Parse<'t>>,
    factory: TargetFactory,
    circular: FxHashSet<(usize, usize, usize)>,
    done: bool,
}

impl<'t> Events<'t> {
    /// The current lexicon stack; the top is the active lexicon.
    pub fn lexicons(&self) -> &[Lexicon] {
        &self.lexicons
    }

    /// The current position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Recover the lexer with the current stack.
    pub fn into_lexer(self) -> Lexer {
        Lexer {
            lexicons: self.lexicons,
        }
    }

    /// Apply a clamped target to the stack.
    fn apply_target(&mut self, target: &Target) {
        if target.pop != 0 {
            let keep = (self.lexicons.len() as i32 + target.pop).max(1) as usize;
            self.lexicons.truncate(keep);
        }
        self.lexicons.extend(target.push.iter().cloned());
    }

    /// Clamp the pop count so the root lexicon always remains.
    fn clamp(&self, target: &mut Target) {
        if target.pop != 0 && (-target.pop) as usize >= self.lexicons.len() {
            target.pop = 1 - self.lexicons.len() as i32;
        }
    }

    /// Build the lexemes of one row, resolving dynamic actions.
    fn lexemes(&self, row: &RuleMatch) -> Result<Vec<Lexeme>> {
        let mut lexemes = Vec::with_capacity(1);
        if let Some(action) = &row.action {
            collect_lexemes(
                self.lexicons.last().expect("stack is never empty"),
                action,
                row.pos,
                &row.text,
                row.match_.as_ref(),
                &mut lexemes,
            )?;
        }
        Ok(lexemes)
    }

    /// Advance `pos` one character, for cycle protection.
    fn bump_pos(&mut self) {
        if self.pos < self.text.len() {
            self.pos += self.text[self.pos..]
                .chars()
                .next()
                .map_or(1, char::len_utf8);
        }
    }
}

impl<'t> Iterator for Events<'t> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.parse.is_none() {
                let top = self.lexicons.last().expect("stack is never empty");
                self.parse = Some(top.parse(self.text, self.pos));
            }
            let row = match self.parse.as_mut().expect("just created").next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(row)) => row,
            };
            if let Some(mut target) = row.target.clone() {
                self.clamp(&mut target);
                if !row.text.is_empty() {
                    let consume = target
                        .push
                        .last()
                        .map(Lexicon::consume)
                        .unwrap_or(false);
                    let lexemes = match self.lexemes(&row) {
                        Ok(lexemes) => lexemes,
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    };
                    self.circular.clear();
                    self.pos = row.pos + row.text.len();
                    self.parse = None;
                    if consume {
                        // the new context gets the tokens: state first
                        self.apply_target(&target);
                        self.factory.add(&target);
                        if !lexemes.is_empty() {
                            let event = Event {
                                target: self.factory.take(),
                                lexemes,
                            };
                            return Some(Ok(event));
                        }
                    } else if lexemes.is_empty() {
                        self.apply_target(&target);
                        self.factory.add(&target);
                    } else {
                        let event = Event {
                            target: self.factory.take(),
                            lexemes,
                        };
                        self.apply_target(&target);
                        self.factory.add(&target);
                        return Some(Ok(event));
                    }
                } else {
                    // a zero-width row switching contexts; guard cycles
                    if target.pop != 0 {
                        let keep = (self.lexicons.len() as i32 + target.pop).max(1) as usize;
                        self.lexicons.truncate(keep);
                    }
                    let state = (self.pos, self.lexicons.len(), target.push.len());
                    if !self.circular.insert(state) {
                        self.bump_pos();
                        self.circular.clear();
                    }
                    self.lexicons.extend(target.push.iter().cloned());
                    self.factory.add(&target);
                    self.parse = None;
                }
            } else if !row.text.is_empty() {
                self.pos = row.pos + row.text.len();
                let lexemes = match self.lexemes(&row) {
                    Ok(lexemes) => lexemes,
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                };
                if !lexemes.is_empty() {
                    let event = Event {
                        target: self.factory.take(),
                        lexemes,
                    };
                    return Some(Ok(event));
                }
            }
            // empty text without target: nothing to do, next row
        }
    }
}

/// Resolve an action spec into lexemes, recursively.
fn collect_lexemes(
    lexicon: &Lexicon,
    action: &ActionSpec,
    pos: usize,
    text: &str,
    match_: Option<&Match>,
    out: &mut Vec<Lexeme>,
) -> Result<()> {
    match action {
        ActionSpec::Action(action) => {
            if !text.is_empty() {
                out.push(Lexeme {
                    pos,
                    text: text.to_string(),
                    action: *action,
                });
            }
        }
        ActionSpec::None | ActionSpec::Skip => {}
        ActionSpec::Item(item) => {
            let env = match match_ {
                Some(m) => Env::at_match(text, m),
                None => Env::with_text(text),
            };
            let mut values = Vec::new();
            unroll(item.evaluate(&env)?, &mut values);
            for value in values {
                match value {
                    Value::None => {}
                    other => {
                        let spec = action_from_value(lexicon, other)?;
                        collect_lexemes(lexicon, &spec, pos, text, match_, out)?;
                    }
                }
            }
        }
        ActionSpec::Subgroup(specs) => {
            let m = match_.ok_or_else(|| Error::Subgroups {
                lexicon: lexicon.full_name(),
                expected: specs.len(),
                found: 0,
            })?;
            if m.group_count() != specs.len() {
                return Err(Error::Subgroups {
                    lexicon: lexicon.full_name(),
                    expected: specs.len(),
                    found: m.group_count(),
                });
            }
            for (i, spec) in specs.iter().enumerate() {
                if let Some(capture) = m.group(i + 1) {
                    let capture = capture.clone();
                    collect_lexemes(lexicon, spec, capture.start, &capture.text, match_, out)?;
                }
            }
        }
        ActionSpec::Delegate(sub) => {
            // lex the matched text with a fresh lexer, flattened
            for event in Lexer::new([sub.clone()]).events(text, 0) {
                for lexeme in event?.lexemes {
                    out.push(Lexeme {
                        pos: pos + lexeme.pos,
                        text: lexeme.text,
                        action: lexeme.action,
                    });
                }
            }
        }
    }
    Ok(())
}
