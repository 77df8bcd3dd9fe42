//! The standard action catalog.
//!
//! Language definitions are free to invent their own actions, but using the
//! conventional names below lets generic consumers (highlighters, theme
//! engines) treat every language uniformly. The catalog mirrors the usual
//! highlighting vocabulary: a handful of base categories plus derived
//! actions for the common refinements.
//!
//! All entries are [`Action`] singletons; `stdactions::NUMBER` and
//! `Action::from_path("Literal.Number")` are the same value.

use once_cell::sync::Lazy;

use crate::action::Action;

macro_rules! std_action {
    ($(#[$doc:meta])* $name:ident = $path:literal) => {
        $(#[$doc])*
        pub static $name: Lazy<Action> = Lazy::new(|| Action::from_path($path));
    };
}

// Base actions, derive from these:

std_action!(/// Plain text.
    TEXT = "Text");
std_action!(/// Whitespace (usually not styled).
    WHITESPACE = "Whitespace");
std_action!(/// A language keyword.
    KEYWORD = "Keyword");
std_action!(/// Punctuation that structures the input.
    DELIMITER = "Delimiter");
std_action!(/// A name; see the derived actions for the many roles.
    NAME = "Name");
std_action!(/// A literal value.
    LITERAL = "Literal");
std_action!(/// A comment.
    COMMENT = "Comment");

// Mixin actions, for subtle style changes:

std_action!(/// Needs the user's attention.
    ALERT = "Alert");
std_action!(/// Invalid input.
    INVALID = "Invalid");
std_action!(/// Escaped text like `\n` in a string.
    ESCAPE = "Escape");
std_action!(/// A thing is defined here (vs. referred to).
    DEFINITION = "Definition");
std_action!(/// A pseudo-element or pseudo-class.
    PSEUDO = "Pseudo");

// Actions that derive from Name:

std_action!(/// An attribute name.
    NAME_ATTRIBUTE = "Name.Attribute");
std_action!(/// A builtin name.
    NAME_BUILTIN = "Name.Builtin");
std_action!(/// A class name.
    NAME_CLASS = "Name.Class");
std_action!(/// A constant name.
    NAME_CONSTANT = "Name.Constant");
std_action!(/// A function name.
    NAME_FUNCTION = "Name.Function");
std_action!(/// A generic identifier.
    NAME_IDENTIFIER = "Name.Identifier");
std_action!(/// A property name.
    NAME_PROPERTY = "Name.Property");
std_action!(/// A markup tag name.
    NAME_TAG = "Name.Tag");
std_action!(/// A type name.
    NAME_TYPE = "Name.Type");
std_action!(/// A variable name.
    NAME_VARIABLE = "Name.Variable");

// Actions that derive from Literal:

std_action!(/// Verbatim data.
    DATA = "Literal.Data");
std_action!(/// A quoted string.
    STRING = "Literal.String");
std_action!(/// A single character.
    CHARACTER = "Literal.Character");
std_action!(/// A numeric value.
    NUMBER = "Literal.Number");
std_action!(/// A color value.
    COLOR = "Literal.Color");

// Actions that derive from Delimiter:

std_action!(/// `{ }`, `( )`, `[ ]` and friends.
    BRACKET = "Delimiter.Bracket");
std_action!(/// An arithmetic or logical operator.
    OPERATOR = "Delimiter.Operator");
std_action!(/// A quote character.
    QUOTE = "Delimiter.Quote");
std_action!(/// A separator like `,` or `;`.
    SEPARATOR = "Delimiter.Separator");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_matches_paths() {
        assert_eq!(*NUMBER, Action::from_path("Literal.Number"));
        assert_eq!(*BRACKET, Action::from_path("Delimiter.Bracket"));
        assert_eq!(NUMBER.parent(), Some(*LITERAL));
    }

    #[test]
    fn test_category_membership() {
        assert!(*STRING == "Literal");
        assert!(*NAME_TAG == "Name");
        assert!(*NUMBER != "Name");
    }
}
