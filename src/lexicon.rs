//! Lexicons: named rule sets bound to a language.
//!
//! A lexicon starts life as a static [`LexiconDescriptor`]: the language
//! name, the lexicon name, flags, and a function producing the rules.
//! [`Lexicon::of`] binds the descriptor to an interned [`Lexicon`] value;
//! the same descriptor always yields the same value.
//!
//! Calling [`Lexicon::derived`] with a hashable argument returns a *derived*
//! lexicon: a distinct value sharing the descriptor, whose rule items are
//! pre-evaluated against the argument. Derived lexicons compare equal to
//! their vanilla lexicon but are not identical to it; use
//! [`Lexicon::same`] for identity. Deriving with `None` returns the vanilla
//! lexicon itself.
//!
//! On first use a lexicon compiles its rules: the patterns are combined
//! into one alternation regex with a dispatch table, unless a faster
//! specialization applies (a lone literal string rule is matched with
//! substring search, an empty rule set scans to the end of text in one
//! step). The compiled parser is cached for the lifetime of the process and
//! shared freely between threads.

use std::fmt;
use std::sync::Mutex;

use once_cell::sync::{Lazy, OnceCell};
use regex::{Regex, RegexBuilder};
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::item::{unroll, Arg, Capture, Env, Match, PreEval, Value};
use crate::pattern;
use crate::rule::{ActionSpec, Rule, RulePattern, TargetSpec};
use crate::target::Target;

/// Flags passed to the regex compiler for all patterns of a lexicon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReFlags {
    /// Match case-insensitively.
    pub case_insensitive: bool,
    /// `^` and `$` match at line boundaries.
    pub multi_line: bool,
    /// `.` also matches `\n`.
    pub dot_matches_new_line: bool,
}

impl ReFlags {
    /// No flags.
    pub const fn new() -> ReFlags {
        ReFlags {
            case_insensitive: false,
            multi_line: false,
            dot_matches_new_line: false,
        }
    }

    /// Enable case-insensitive matching.
    pub const fn ignore_case(mut self) -> ReFlags {
        self.case_insensitive = true;
        self
    }

    /// Enable multi-line mode.
    pub const fn multi_line(mut self) -> ReFlags {
        self.multi_line = true;
        self
    }

    /// Let `.` match newlines.
    pub const fn dot_all(mut self) -> ReFlags {
        self.dot_matches_new_line = true;
        self
    }
}

/// The static definition of a lexicon.
///
/// Define one `static` per lexicon and bind it with [`Lexicon::of`]:
///
/// ```text
/// fn root_rules() -> Vec<Rule> {
///     vec![Rule::new(r"\d+", *NUMBER, vec![])]
/// }
/// static ROOT: LexiconDescriptor = LexiconDescriptor::new("MyLang", "root", root_rules);
/// let root = Lexicon::of(&ROOT);
/// ```
#[derive(Debug)]
pub struct LexiconDescriptor {
    /// The language this lexicon belongs to.
    pub language: &'static str,
    /// The lexicon's own name.
    pub name: &'static str,
    /// Flags for the regex compiler.
    pub re_flags: ReFlags,
    /// Whether the tokens that switch to this lexicon belong to it.
    pub consume: bool,
    /// The function producing the rules; run once, on first use.
    pub rules: fn() -> Vec<Rule>,
}

impl LexiconDescriptor {
    /// A descriptor with default flags.
    pub const fn new(
        language: &'static str,
        name: &'static str,
        rules: fn() -> Vec<Rule>,
    ) -> LexiconDescriptor {
        LexiconDescriptor {
            language,
            name,
            re_flags: ReFlags::new(),
            consume: false,
            rules,
        }
    }

    /// The same descriptor with the `consume` flag set: tokens that switch
    /// to this lexicon are added to the new context instead of the current.
    pub const fn consume(mut self) -> LexiconDescriptor {
        self.consume = true;
        self
    }

    /// The same descriptor with regex flags.
    pub const fn with_flags(mut self, flags: ReFlags) -> LexiconDescriptor {
        self.re_flags = flags;
        self
    }
}

/// The intern table of vanilla lexicons, keyed by descriptor address.
static REGISTRY: Lazy<Mutex<FxHashMap<usize, Lexicon>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

struct LexiconData {
    descriptor: &'static LexiconDescriptor,
    arg: Option<Arg>,
    rules: OnceCell<Result<Vec<Rule>>>,
    parser: OnceCell<Result<CompiledParser>>,
    /// Cache of derived lexicons; locks the miss path only.
    derived: Mutex<FxHashMap<Arg, Lexicon>>,
}

/// A named rule set bound to a language, ready to parse text.
///
/// `Lexicon` is a cheap handle; clones refer to the same lexicon. Equality
/// compares the descriptor, so a derived lexicon equals its vanilla
/// lexicon; [`Lexicon::same`] compares identity.
#[derive(Clone)]
pub struct Lexicon {
    inner: Arc<LexiconData>,
}

impl Lexicon {
    /// The lexicon for a descriptor; interned, so repeated calls return the
    /// identical value.
    pub fn of(descriptor: &'static LexiconDescriptor) -> Lexicon {
        let key = descriptor as *const LexiconDescriptor as usize;
        let mut registry = REGISTRY.lock().unwrap();
        registry
            .entry(key)
            .or_insert_with(|| Lexicon {
                inner: Arc::new(LexiconData {
                    descriptor,
                    arg: None,
                    rules: OnceCell::new(),
                    parser: OnceCell::new(),
                    derived: Mutex::new(FxHashMap::default()),
                }),
            })
            .clone()
    }

    /// Derive a lexicon with the given argument; cached, so the same
    /// argument returns the identical value. `None` returns the vanilla
    /// lexicon itself.
    pub fn derived(&self, arg: Option<Arg>) -> Lexicon {
        let arg = match arg {
            Some(arg) => arg,
            None => return self.vanilla(),
        };
        let vanilla = self.vanilla();
        if let Some(found) = vanilla.inner.derived.lock().unwrap().get(&arg) {
            return found.clone();
        }
        let mut cache = vanilla.inner.derived.lock().unwrap();
        cache
            .entry(arg.clone())
            .or_insert_with(|| Lexicon {
                inner: Arc::new(LexiconData {
                    descriptor: vanilla.inner.descriptor,
                    arg: Some(arg),
                    rules: OnceCell::new(),
                    parser: OnceCell::new(),
                    derived: Mutex::new(FxHashMap::default()),
                }),
            })
            .clone()
    }

    /// The vanilla (underived) lexicon of this descriptor.
    pub fn vanilla(&self) -> Lexicon {
        if self.inner.arg.is_none() {
            self.clone()
        } else {
            Lexicon::of(self.inner.descriptor)
        }
    }

    /// True when both handles refer to the identical lexicon (derivations
    /// of a lexicon are equal to it, but not the same).
    pub fn same(&self, other: &Lexicon) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The lexicon name.
    pub fn name(&self) -> &'static str {
        self.inner.descriptor.name
    }

    /// The language name.
    pub fn language(&self) -> &'static str {
        self.inner.descriptor.language
    }

    /// The qualified name, `Language.lexicon`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.language(), self.name())
    }

    /// The argument this lexicon was derived with, if any.
    pub fn arg(&self) -> Option<&Arg> {
        self.inner.arg.as_ref()
    }

    /// Whether tokens switching to this lexicon belong to it.
    pub fn consume(&self) -> bool {
        self.inner.descriptor.consume
    }

    /// The regex flags of this lexicon.
    pub fn re_flags(&self) -> ReFlags {
        self.inner.descriptor.re_flags
    }

    /// The bound rules, with items pre-evaluated against the argument.
    ///
    /// Rules whose dynamic pattern folded to `None` are omitted.
    pub fn rules(&self) -> Result<&[Rule]> {
        let rules = self
            .inner
            .rules
            .get_or_init(|| bind_rules(self, (self.inner.descriptor.rules)()));
        match rules {
            Ok(rules) => Ok(rules),
            Err(e) => Err(e.clone()),
        }
    }

    /// Start parsing `text` at `pos`.
    ///
    /// The returned iterator yields one row per match: the position,
    /// matched text, match data, resolved action and reduced target. It is
    /// purely a function of `(text, pos)` and carries no lexer state.
    pub fn parse<'t>(&self, text: &'t str, pos: usize) -> Parse<'t> {
        Parse {
            lexicon: self.clone(),
            text,
            pos,
            at: pos,
            queued: None,
            done: false,
        }
    }

    pub(crate) fn parser(&self) -> Result<&CompiledParser> {
        let parser = self
            .inner
            .parser
            .get_or_init(|| CompiledParser::build(self));
        match parser {
            Ok(parser) => Ok(parser),
            Err(e) => Err(e.clone()),
        }
    }

    /// A stable key for identity-based collections.
    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl PartialEq for Lexicon {
    /// Equal when bound to the same descriptor; derivation is ignored.
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.inner.descriptor, other.inner.descriptor)
    }
}

impl Eq for Lexicon {}

impl std::hash::Hash for Lexicon {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (self.inner.descriptor as *const LexiconDescriptor as usize).hash(state);
    }
}

impl fmt::Display for Lexicon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.language(), self.name())?;
        if self.inner.arg.is_some() {
            write!(f, "*")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Lexicon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Rule binding

/// Pre-evaluate the rules of a lexicon against its argument.
fn bind_rules(lexicon: &Lexicon, raw: Vec<Rule>) -> Result<Vec<Rule>> {
    let arg = lexicon.inner.arg.clone();
    let env = Env::with_arg(&arg);
    let mut rules = Vec::with_capacity(raw.len());
    for rule in raw {
        let pattern = match rule.pattern {
            RulePattern::Item(item) => match item.pre_evaluate(&env) {
                PreEval::Done(Value::Str(source)) => RulePattern::Regex(pattern::Pattern::Raw(source)),
                PreEval::Done(Value::None) => continue, // rule dropped
                PreEval::Done(other) => {
                    return Err(Error::Pattern {
                        lexicon: lexicon.full_name(),
                        pattern: String::new(),
                        message: format!("dynamic pattern produced {}", other.describe()),
                    })
                }
                PreEval::Partial(_) | PreEval::Unchanged => {
                    return Err(Error::Pattern {
                        lexicon: lexicon.full_name(),
                        pattern: String::new(),
                        message: "pattern depends on match-time data".to_string(),
                    })
                }
            },
            other => other,
        };
        let action = bind_action(lexicon, rule.action, &env)?;
        let mut targets = Vec::with_capacity(rule.targets.len());
        for spec in rule.targets {
            bind_target(lexicon, spec, &env, &mut targets)?;
        }
        rules.push(Rule {
            pattern,
            action,
            targets,
        });
    }
    Ok(rules)
}

fn bind_action(lexicon: &Lexicon, spec: ActionSpec, env: &Env) -> Result<ActionSpec> {
    Ok(match spec {
        ActionSpec::Item(item) => match item.pre_evaluate(env) {
            PreEval::Done(value) => action_from_value(lexicon, value)?,
            PreEval::Partial(item) => ActionSpec::Item(item),
            PreEval::Unchanged => ActionSpec::Item(item),
        },
        ActionSpec::Subgroup(specs) => ActionSpec::Subgroup(
            specs
                .into_iter()
                .map(|s| bind_action(lexicon, s, env))
                .collect::<Result<_>>()?,
        ),
        other => other,
    })
}

/// Convert an evaluated value to an action spec.
pub(crate) fn action_from_value(lexicon: &Lexicon, value: Value) -> Result<ActionSpec> {
    match value {
        Value::Action(a) => Ok(ActionSpec::Action(a)),
        Value::None => Ok(ActionSpec::None),
        other => Err(Error::Action {
            lexicon: lexicon.full_name(),
            found: other.describe(),
        }),
    }
}

fn bind_target(
    lexicon: &Lexicon,
    spec: TargetSpec,
    env: &Env,
    out: &mut Vec<TargetSpec>,
) -> Result<()> {
    match spec {
        TargetSpec::Item(item) => match item.pre_evaluate(env) {
            PreEval::Done(value) => {
                let mut values = Vec::new();
                unroll(value, &mut values);
                for v in values {
                    match v {
                        Value::Int(i) => out.push(TargetSpec::Int(i)),
                        Value::Lexicon(l) => out.push(TargetSpec::Lexicon(l)),
                        Value::None => {}
                        other => {
                            return Err(Error::Target {
                                lexicon: lexicon.full_name(),
                                rule: 0,
                                found: other.describe(),
                            })
                        }
                    }
                }
            }
            PreEval::Partial(item) => out.push(TargetSpec::Item(item)),
            PreEval::Unchanged => out.push(TargetSpec::Item(item)),
        },
        other => out.push(other),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Compilation

/// One normal rule, compiled into the combined regex.
pub(crate) struct RuleEntry {
    /// Global capture index of this rule's wrapping group.
    group: usize,
    /// Number of capture groups inside the rule's own pattern.
    subgroups: usize,
    action: ActionSpec,
    targets: Vec<TargetSpec>,
    /// The reduced target when the rule is fully static.
    static_target: Option<Option<Target>>,
    /// Whether action or targets must be evaluated per match.
    needs_eval: bool,
    /// Index of the rule in the lexicon, for error messages.
    index: usize,
}

/// What happens at text no rule matches.
enum DefaultRule {
    Action(ActionSpec),
    Target(Target),
}

enum ParserKind {
    /// No rules at all: parsing just stops.
    Quit,
    /// Only a default action: one row scans to the end of text.
    ScanToEnd(ActionSpec),
    /// Only a default target: one zero-width stop row per position.
    StopOnly(Target),
    /// One literal rule, matched with substring search.
    Literal {
        needle: String,
        action: ActionSpec,
        target: Option<Target>,
        default: Option<DefaultRule>,
    },
    /// The general case: a combined alternation regex.
    Regex {
        /// Compiled alternation; anchored when a default target is present.
        re: Regex,
        /// Whether `re` is the `\A`-anchored variant.
        anchored: bool,
        entries: Vec<RuleEntry>,
        default: Option<DefaultRule>,
    },
}

pub(crate) struct CompiledParser {
    kind: ParserKind,
}

impl CompiledParser {
    fn build(lexicon: &Lexicon) -> Result<CompiledParser> {
        let rules = lexicon.rules()?;
        let flags = lexicon.re_flags();

        let mut default_action: Option<ActionSpec> = None;
        let mut default_target: Option<Target> = None;
        let mut sources: Vec<String> = Vec::new();
        let mut normal: Vec<(&Rule, usize)> = Vec::new();

        for (index, rule) in rules.iter().enumerate() {
            match &rule.pattern {
                RulePattern::DefaultAction => {
                    default_action.get_or_insert_with(|| rule.action.clone());
                }
                RulePattern::DefaultTarget => {
                    if default_target.is_none() {
                        default_target =
                            Target::make(lexicon, &rule.targets, None, index)?;
                    }
                }
                RulePattern::Regex(p) => {
                    let source = p.source();
                    // skip rules whose pattern was already seen
                    if !sources.contains(&source) {
                        sources.push(source);
                        normal.push((rule, index));
                    }
                }
                RulePattern::Item(_) => unreachable!("items fold at rule binding"),
            }
        }

        let default = match (&default_action, &default_target) {
            (Some(_), Some(_)) => {
                // mutually exclusive; also reported by the validator
                return Err(Error::Defaults {
                    lexicon: lexicon.full_name(),
                });
            }
            (Some(action), None) => Some(DefaultRule::Action(action.clone())),
            (None, Some(target)) => Some(DefaultRule::Target(target.clone())),
            (None, None) => None,
        };

        // The empty lexicon specializations.
        if normal.is_empty() {
            let kind = match default {
                Some(DefaultRule::Action(action)) => ParserKind::ScanToEnd(action),
                Some(DefaultRule::Target(target)) => ParserKind::StopOnly(target),
                None => ParserKind::Quit,
            };
            return Ok(CompiledParser { kind });
        }

        // Validate every pattern on its own; this pins compile errors to
        // the offending rule and yields the subgroup counts.
        let mut subgroup_counts = Vec::with_capacity(sources.len());
        for source in &sources {
            let re = build_regex(source, flags).map_err(|e| Error::Pattern {
                lexicon: lexicon.full_name(),
                pattern: source.clone(),
                message: e.to_string(),
            })?;
            subgroup_counts.push(re.captures_len() - 1);
        }

        // A single static literal rule is matched with substring search.
        if sources.len() == 1 && !flags.case_insensitive {
            let (rule, index) = normal[0];
            if !action_needs_eval(&rule.action) && !targets_need_eval(&rule.targets) {
                if let Some(needle) = pattern::to_string(&sources[0]) {
                    if !needle.is_empty() {
                        return Ok(CompiledParser {
                            kind: ParserKind::Literal {
                                needle,
                                action: rule.action.clone(),
                                target: Target::make(lexicon, &rule.targets, None, index)?,
                                default,
                            },
                        });
                    }
                }
            }
        }

        // The general case: one combined alternation.
        let anchored = matches!(default, Some(DefaultRule::Target(_)));
        let alternation = sources
            .iter()
            .enumerate()
            .map(|(i, p)| format!("(?P<g_{}>{})", i, p))
            .collect::<Vec<_>>()
            .join("|");
        let combined = if anchored {
            format!(r"\A(?:{})", alternation)
        } else {
            alternation
        };
        let re = build_regex(&combined, flags).map_err(|e| Error::Pattern {
            lexicon: lexicon.full_name(),
            pattern: combined.clone(),
            message: e.to_string(),
        })?;

        // Map every rule to the global index of its wrapping group.
        let mut group_index: FxHashMap<String, usize> = FxHashMap::default();
        for (i, name) in re.capture_names().enumerate() {
            if let Some(name) = name {
                group_index.insert(name.to_string(), i);
            }
        }
        let mut entries = Vec::with_capacity(normal.len());
        for (i, (rule, index)) in normal.iter().enumerate() {
            let needs_eval = action_needs_eval(&rule.action) || targets_need_eval(&rule.targets);
            let static_target = if targets_need_eval(&rule.targets) {
                None
            } else {
                Some(Target::make(lexicon, &rule.targets, None, *index)?)
            };
            entries.push(RuleEntry {
                group: group_index[&format!("g_{}", i)],
                subgroups: subgroup_counts[i],
                action: rule.action.clone(),
                targets: rule.targets.clone(),
                static_target,
                needs_eval,
                index: *index,
            });
        }

        Ok(CompiledParser {
            kind: ParserKind::Regex {
                re,
                anchored,
                entries,
                default,
            },
        })
    }
}

fn build_regex(source: &str, flags: ReFlags) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(source)
        .case_insensitive(flags.case_insensitive)
        .multi_line(flags.multi_line)
        .dot_matches_new_line(flags.dot_matches_new_line)
        .build()
}

fn action_needs_eval(spec: &ActionSpec) -> bool {
    match spec {
        ActionSpec::Item(_) => true,
        ActionSpec::Subgroup(specs) => specs.iter().any(action_needs_eval),
        _ => false,
    }
}

fn targets_need_eval(specs: &[TargetSpec]) -> bool {
    specs.iter().any(|s| matches!(s, TargetSpec::Item(_)))
}

// ---------------------------------------------------------------------------
// Parsing

/// One row of a lexicon's parse output.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    /// Start position of the match.
    pub pos: usize,
    /// The matched text; empty only for default-target stop rows.
    pub text: String,
    /// The match data; `None` for default-action and stop rows.
    pub match_: Option<Match>,
    /// The action; `None` for stop rows.
    pub action: Option<ActionSpec>,
    /// The reduced target, if the rule has one.
    pub target: Option<Target>,
}

/// Iterator over the parse rows of one lexicon, created by
/// [`Lexicon::parse`].
pub struct Parse<'t> {
    lexicon: Lexicon,
    text: &'t str,
    pos: usize,
    at: usize,
    queued: Option<RuleMatch>,
    done: bool,
}

impl<'t> Parse<'t> {
    /// Build the row for a run of unmatched text.
    fn default_action_row(&self, spec: &ActionSpec, pos: usize, end: usize) -> Result<RuleMatch> {
        let text = &self.text[pos..end];
        let action = match spec {
            ActionSpec::Item(item) => {
                let env = Env::with_text(text);
                let mut values = Vec::new();
                unroll(item.evaluate(&env)?, &mut values);
                match values.as_slice() {
                    [value] => action_from_value(&self.lexicon, value.clone())?,
                    _ => {
                        return Err(Error::Action {
                            lexicon: self.lexicon.full_name(),
                            found: format!("{} values", values.len()),
                        })
                    }
                }
            }
            other => other.clone(),
        };
        Ok(RuleMatch {
            pos,
            text: text.to_string(),
            match_: None,
            action: Some(action),
            target: None,
        })
    }

    /// The zero-width row carrying the default target.
    fn stop_row(&self, target: &Target) -> RuleMatch {
        RuleMatch {
            pos: self.pos,
            text: String::new(),
            match_: None,
            action: None,
            target: Some(target.clone()),
        }
    }

    /// Build the row for a regex match.
    fn match_row(
        &self,
        entries: &[RuleEntry],
        caps: &regex::Captures,
        offset: usize,
    ) -> Result<RuleMatch> {
        for entry in entries {
            let m0 = match caps.get(entry.group) {
                Some(m) => m,
                None => continue,
            };
            let start = m0.start() + offset;
            let end = m0.end() + offset;
            let text = m0.as_str().to_string();
            let groups = (1..=entry.subgroups)
                .map(|k| {
                    caps.get(entry.group + k).map(|m| Capture {
                        start: m.start() + offset,
                        end: m.end() + offset,
                        text: m.as_str().to_string(),
                    })
                })
                .collect();
            let match_ = Match::new(start, end, groups);
            let (action, target) = if entry.needs_eval {
                let env = Env::at_match(&text, &match_);
                let action = match &entry.action {
                    ActionSpec::Item(item) => {
                        let mut values = Vec::new();
                        unroll(item.evaluate(&env)?, &mut values);
                        match values.as_slice() {
                            [value] => action_from_value(&self.lexicon, value.clone())?,
                            _ => {
                                return Err(Error::Action {
                                    lexicon: self.lexicon.full_name(),
                                    found: format!("{} values", values.len()),
                                })
                            }
                        }
                    }
                    other => other.clone(),
                };
                let target = match &entry.static_target {
                    Some(target) => target.clone(),
                    None => Target::make(&self.lexicon, &entry.targets, Some(&env), entry.index)?,
                };
                (action, target)
            } else {
                (
                    entry.action.clone(),
                    entry.static_target.clone().unwrap_or(None),
                )
            };
            return Ok(RuleMatch {
                pos: start,
                text,
                match_: Some(match_),
                action: Some(action),
                target,
            });
        }
        // The regex matched, so exactly one rule group participated.
        unreachable!("combined match without a participating rule group")
    }

    /// Width of the char at `i`, to advance over an empty match.
    fn char_width(&self, i: usize) -> usize {
        self.text[i..].chars().next().map_or(1, char::len_utf8)
    }
}

impl<'t> Iterator for Parse<'t> {
    type Item = Result<RuleMatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(row) = self.queued.take() {
            return Some(Ok(row));
        }
        // a local handle, so the parser borrow does not pin `self`
        let lexicon = self.lexicon.clone();
        let parser = match lexicon.parser() {
            Ok(parser) => parser,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        match &parser.kind {
            ParserKind::Quit => {
                self.done = true;
                None
            }
            ParserKind::ScanToEnd(action) => {
                self.done = true;
                if self.pos < self.text.len() {
                    Some(self.default_action_row(&action.clone(), self.pos, self.text.len()))
                } else {
                    None
                }
            }
            ParserKind::StopOnly(target) => {
                self.done = true;
                if self.pos < self.text.len() {
                    Some(Ok(self.stop_row(&target.clone())))
                } else {
                    None
                }
            }
            ParserKind::Literal {
                needle,
                action,
                target,
                default,
            } => {
                let (needle, action, target) = (needle.clone(), action.clone(), target.clone());
                match default {
                    Some(DefaultRule::Target(stop)) => {
                        // match-at-position: the needle must follow directly.
                        if self.text[self.pos..].starts_with(&needle) {
                            let pos = self.pos;
                            self.pos += needle.len();
                            self.at = self.pos;
                            Some(Ok(RuleMatch {
                                pos,
                                text: needle,
                                match_: None,
                                action: Some(action),
                                target,
                            }))
                        } else if self.pos < self.text.len() {
                            let stop = stop.clone();
                            self.done = true;
                            Some(Ok(self.stop_row(&stop)))
                        } else {
                            self.done = true;
                            None
                        }
                    }
                    Some(DefaultRule::Action(gap_action)) => {
                        let gap_action = gap_action.clone();
                        match self.text[self.pos..].find(&needle) {
                            Some(rel) => {
                                let i = self.pos + rel;
                                let row = RuleMatch {
                                    pos: i,
                                    text: needle.clone(),
                                    match_: None,
                                    action: Some(action),
                                    target,
                                };
                                let gap_start = self.pos;
                                self.pos = i + needle.len();
                                self.at = self.pos;
                                if i > gap_start {
                                    self.queued = Some(row);
                                    Some(self.default_action_row(&gap_action, gap_start, i))
                                } else {
                                    Some(Ok(row))
                                }
                            }
                            None => {
                                self.done = true;
                                if self.pos < self.text.len() {
                                    Some(self.default_action_row(
                                        &gap_action,
                                        self.pos,
                                        self.text.len(),
                                    ))
                                } else {
                                    None
                                }
                            }
                        }
                    }
                    None => match self.text[self.pos..].find(&needle) {
                        Some(rel) => {
                            let i = self.pos + rel;
                            self.pos = i + needle.len();
                            self.at = self.pos;
                            Some(Ok(RuleMatch {
                                pos: i,
                                text: needle,
                                match_: None,
                                action: Some(action),
                                target,
                            }))
                        }
                        None => {
                            self.done = true;
                            None
                        }
                    },
                }
            }
            ParserKind::Regex {
                re,
                anchored,
                entries,
                default,
            } => {
                if *anchored {
                    // match-at-position mode with a default target.
                    let stop = match default {
                        Some(DefaultRule::Target(t)) => t.clone(),
                        _ => unreachable!("anchored parser implies a default target"),
                    };
                    loop {
                        if self.pos >= self.text.len() {
                            self.done = true;
                            return None;
                        }
                        let caps = match re.captures(&self.text[self.pos..]) {
                            Some(caps) => caps,
                            None => {
                                self.done = true;
                                return Some(Ok(self.stop_row(&stop)));
                            }
                        };
                        let row = match self.match_row(entries, &caps, self.pos) {
                            Ok(row) => row,
                            Err(e) => {
                                self.done = true;
                                return Some(Err(e));
                            }
                        };
                        let end = row.pos + row.text.len();
                        if row.text.is_empty() && row.target.is_none() {
                            // a zero-width match that changes nothing can
                            // never make progress; skip one char
                            self.pos += self.char_width(self.pos);
                            continue;
                        }
                        self.pos = end;
                        self.at = end;
                        return Some(Ok(row));
                    }
                }
                // finditer mode, with or without a default action.
                loop {
                    let caps = if self.at <= self.text.len() {
                        re.captures_at(self.text, self.at)
                    } else {
                        None
                    };
                    let caps = match caps {
                        Some(caps) => caps,
                        None => {
                            self.done = true;
                            if let Some(DefaultRule::Action(gap_action)) = default {
                                if self.pos < self.text.len() {
                                    let gap_action = gap_action.clone();
                                    return Some(self.default_action_row(
                                        &gap_action,
                                        self.pos,
                                        self.text.len(),
                                    ));
                                }
                            }
                            return None;
                        }
                    };
                    let row = match self.match_row(entries, &caps, 0) {
                        Ok(row) => row,
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    };
                    let start = row.pos;
                    let end = row.pos + row.text.len();
                    // advance the search cursor; one extra char on an
                    // empty match, like finditer does
                    self.at = if end > start {
                        end
                    } else if end < self.text.len() {
                        end + self.char_width(end)
                    } else {
                        self.text.len() + 1
                    };
                    let gap_start = self.pos;
                    if row.text.is_empty() && row.target.is_none() {
                        continue;
                    }
                    self.pos = end;
                    if let Some(DefaultRule::Action(gap_action)) = default {
                        if start > gap_start {
                            let gap_action = gap_action.clone();
                            let gap = self.default_action_row(&gap_action, gap_start, start);
                            self.queued = Some(row);
                            return Some(gap);
                        }
                    }
                    return Some(Ok(row));
                }
            }
        }
    }
}
