//! # treelex - incremental context-tracking lexer
//!
//! treelex parses text into a tree of tokens and contexts, driven by
//! *lexicons*: named rule sets that can push and pop each other on a
//! stack while matching. After an edit, the tree is patched instead of
//! rebuilt: lexing restarts a safe distance left of the change and stops
//! as soon as the old tokens right of it can be reused.
//!
//! ## Overview
//!
//! A language is a collection of static [`LexiconDescriptor`]s; each rule
//! pairs a regex pattern with an action tag and a target:
//!
//! ```rust
//! use treelex::{Lexicon, LexiconDescriptor, Rule, TreeBuilder};
//! use treelex::rule::skip;
//! use treelex::stdactions::{BRACKET, NUMBER};
//!
//! fn root_rules() -> Vec<Rule> {
//!     vec![
//!         Rule::new(r"\[", *BRACKET, vec![Lexicon::of(&ARRAY).into()]),
//!         Rule::new(r"\d+", *NUMBER, vec![]),
//!         Rule::new(r"\s+", skip(), vec![]),
//!     ]
//! }
//! static ROOT: LexiconDescriptor = LexiconDescriptor::new("Demo", "root", root_rules);
//!
//! fn array_rules() -> Vec<Rule> {
//!     vec![
//!         Rule::new(r"\]", *BRACKET, vec![(-1).into()]),
//!         Rule::new(r"\d+", *NUMBER, vec![]),
//!         Rule::new(r"\s+", skip(), vec![]),
//!     ]
//! }
//! static ARRAY: LexiconDescriptor = LexiconDescriptor::new("Demo", "array", array_rules);
//!
//! let mut builder = TreeBuilder::new(Lexicon::of(&ROOT));
//! builder.build("1 [2 3]").unwrap();
//! let texts: Vec<&str> = builder.tree().tokens().map(|t| t.text()).collect();
//! assert_eq!(texts, vec!["1", "[", "2", "3", "]"]);
//!
//! // the bracketed part lives in its own context
//! let two = builder.root().find_token(3).unwrap();
//! assert_eq!(two.parent().lexicon().name(), "array");
//! ```
//!
//! An edit is applied with [`TreeBuilder::rebuild`], which reports the
//! range of text whose tokens actually changed. The [`Worker`] wraps a
//! builder for applications that update text repeatedly (optionally on a
//! background thread).
//!
//! ## Modules
//!
//! - [`action`]: interned action tags ([`stdactions`] has the usual set)
//! - [`pattern`]: patterns and regex construction helpers
//! - [`rule`]: rules and the vocabulary to write them
//! - [`lexicon`]: lexicon descriptors, binding, derivation, parsing
//! - [`lexer`]: the event-driven lexer
//! - [`tree`]: the token tree and its navigation API
//! - [`builder`]: full and incremental tree building
//! - [`worker`]: coalescing update driver
//! - [`validator`]: static checks for language definitions
//! - [`error`]: the error type

#![doc(html_root_url = "https://docs.rs/treelex/0.3.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod action;
pub mod builder;
pub mod error;
pub mod item;
pub mod lexer;
pub mod lexicon;
pub mod pattern;
pub mod rule;
pub mod stdactions;
pub mod target;
pub mod tree;
pub mod validator;
pub mod worker;

// Re-exports for convenience
pub use action::Action;
pub use builder::{BuildResult, TreeBuilder};
pub use error::{Error, Result};
pub use item::{Arg, Match, RuleItem, Value};
pub use lexer::{Event, Lexeme, Lexer};
pub use lexicon::{Lexicon, LexiconDescriptor, ReFlags};
pub use pattern::Pattern;
pub use rule::{ActionSpec, Rule, TargetSpec};
pub use target::Target;
pub use tree::{ContextRef, DumpStyle, NodeRef, Range, TokenRef, Tree};
pub use validator::{validate_lexicon, ValidationResult};
pub use worker::Worker;

/// Build the tree of all tokens from `text`.
///
/// This is the one-shot convenience entry point; keep a [`TreeBuilder`]
/// when the text will be edited.
pub fn root(root_lexicon: Lexicon, text: &str) -> Result<Tree> {
    let mut builder = TreeBuilder::new(root_lexicon);
    builder.build(text)?;
    Ok(builder.into_tree())
}

/// Collect all events from lexing `text` with `root_lexicon`.
pub fn events(root_lexicon: Lexicon, text: &str) -> Result<Vec<Event>> {
    Lexer::new([root_lexicon]).events(text, 0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::skip;
    use crate::stdactions::{NAME, NUMBER};

    fn rules() -> Vec<Rule> {
        vec![
            Rule::new(r"\d+", *NUMBER, vec![]),
            Rule::new(r"\w+", *NAME, vec![]),
            Rule::new(r"\s+", skip(), vec![]),
        ]
    }
    static WORDS: LexiconDescriptor = LexiconDescriptor::new("LibTest", "words", rules);

    #[test]
    fn test_root_convenience() {
        let tree = root(Lexicon::of(&WORDS), "a 1 b").unwrap();
        let texts: Vec<&str> = tree.tokens().map(|t| t.text()).collect();
        assert_eq!(texts, vec!["a", "1", "b"]);
    }

    #[test]
    fn test_events_convenience() {
        let events = events(Lexicon::of(&WORDS), "a 1").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].lexemes[0].action, *NUMBER);
    }
}
