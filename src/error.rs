//! Error types for lexicon compilation and lexing.
//!
//! All fatal conditions the engine can hit are collected in the [`Error`]
//! enum. Errors carry the qualified lexicon name (`Language.lexicon`) where
//! they originated, so a faulty language definition can be located without
//! a debugger.
//!
//! Errors are values, never panics: the lexer and the tree builder propagate
//! them with `?` and the builder guarantees that a failed rebuild leaves the
//! tree untouched.

use thiserror::Error;

/// Any error raised while compiling a lexicon or lexing text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// A rule pattern failed to compile as a regular expression.
    ///
    /// Raised on first use of the lexicon, not at definition time.
    #[error("{lexicon}: invalid pattern {pattern:?}: {message}")]
    Pattern {
        /// Qualified name of the lexicon holding the offending rule.
        lexicon: String,
        /// The pattern source that failed to compile.
        pattern: String,
        /// The message reported by the regex engine.
        message: String,
    },

    /// A target rule item evaluated to something that is neither an integer
    /// nor a lexicon.
    #[error("{lexicon}: rule {rule}: invalid target value: {found}")]
    Target {
        /// Qualified name of the lexicon holding the offending rule.
        lexicon: String,
        /// Index of the rule within the lexicon.
        rule: usize,
        /// Display form of the value the item produced.
        found: String,
    },

    /// An action rule item evaluated to something that is not an action.
    #[error("{lexicon}: invalid action value: {found}")]
    Action {
        /// Qualified name of the lexicon holding the offending rule.
        lexicon: String,
        /// Display form of the value the item produced.
        found: String,
    },

    /// A subgroup action was paired with a different number of capture
    /// groups than the rule's pattern provides.
    #[error("{lexicon}: subgroup action expects {expected} capture groups, pattern has {found}")]
    Subgroups {
        /// Qualified name of the lexicon holding the offending rule.
        lexicon: String,
        /// Number of actions the subgroup action was created with.
        expected: usize,
        /// Number of capture groups in the matched pattern.
        found: usize,
    },

    /// A lexicon declared both a default action and a default target,
    /// which are mutually exclusive.
    #[error("{lexicon}: can't have both a default action and a default target")]
    Defaults {
        /// Qualified name of the offending lexicon.
        lexicon: String,
    },

    /// A rule item referenced a variable that is absent from the current
    /// evaluation environment, e.g. `MATCH` outside a match context.
    #[error("can't find variable '{name}' in the evaluation environment")]
    Evaluation {
        /// Name of the missing variable.
        name: &'static str,
    },

    /// A user-supplied predicate panicked during rule evaluation.
    ///
    /// The panic is caught at an event boundary; the tree is left in its
    /// last consistent state.
    #[error("rule predicate panicked: {message}")]
    Predicate {
        /// The panic payload, if it was a string.
        message: String,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
