//! End-to-end tests for treelex.
//!
//! These tests define small languages in the style real definitions would
//! use (nested contexts, default actions/targets, derived lexicons,
//! dynamic actions) and verify the complete pipeline: rules, lexer,
//! tree builder, navigation.

use pretty_assertions::assert_eq;

use treelex::rule::{bygroups, derive, match_group, skip};
use treelex::stdactions::{
    BRACKET, COLOR, COMMENT, DELIMITER, NAME, NAME_TAG, NUMBER, STRING, TEXT,
};
use treelex::{Action, Lexicon, LexiconDescriptor, Rule, TargetSpec, TreeBuilder};

// ============================================
// 1. A minimal CSS-like language
// ============================================

mod css {
    use super::*;

    fn root_rules() -> Vec<Rule> {
        vec![
            Rule::new(r"[A-Za-z]\w*", *NAME_TAG, vec![]),
            Rule::new(r"\{", *BRACKET, vec![Lexicon::of(&RULE).into()]),
            Rule::new(r"\s+", skip(), vec![]),
        ]
    }
    pub static ROOT: LexiconDescriptor = LexiconDescriptor::new("Css", "root", root_rules);

    fn rule_rules() -> Vec<Rule> {
        vec![
            Rule::new(r"\}", *BRACKET, vec![(-1).into()]),
            Rule::new(
                r"[A-Za-z-]+",
                Action::from_path("Name.Property.Definition"),
                vec![Lexicon::of(&DECLARATION).into()],
            ),
            Rule::new(r"\s+", skip(), vec![]),
        ]
    }
    pub static RULE: LexiconDescriptor = LexiconDescriptor::new("Css", "rule", rule_rules);

    fn declaration_rules() -> Vec<Rule> {
        vec![
            Rule::new(":", *DELIMITER, vec![]),
            Rule::new(";", *DELIMITER, vec![(-1).into()]),
            Rule::new(r"[A-Za-z]\w*", *COLOR, vec![]),
            Rule::new(r"\s+", skip(), vec![]),
        ]
    }
    pub static DECLARATION: LexiconDescriptor =
        LexiconDescriptor::new("Css", "declaration", declaration_rules);
}

fn token_tuples(tree: &treelex::Tree) -> Vec<(usize, String, Action)> {
    tree.tokens()
        .map(|t| (t.pos(), t.text().to_string(), t.action()))
        .collect()
}

#[test]
fn test_css_selector_tokens() {
    let tree = treelex::root(Lexicon::of(&css::ROOT), "h1 { color: red; }").unwrap();
    assert_eq!(
        token_tuples(&tree),
        vec![
            (0, "h1".to_string(), *NAME_TAG),
            (3, "{".to_string(), *BRACKET),
            (5, "color".to_string(), Action::from_path("Name.Property.Definition")),
            (10, ":".to_string(), *DELIMITER),
            (12, "red".to_string(), *COLOR),
            (15, ";".to_string(), *DELIMITER),
            (17, "}".to_string(), *BRACKET),
        ]
    );
}

#[test]
fn test_css_context_nesting() {
    let tree = treelex::root(Lexicon::of(&css::ROOT), "h1 { color: red; }").unwrap();
    let red = tree.root().find_token(12).unwrap();
    let names: Vec<&str> = red.ancestors().map(|c| c.lexicon().name()).collect();
    assert_eq!(names, vec!["declaration", "rule", "root"]);
    // adjacent tokens never overlap
    let mut last_end = 0;
    for token in tree.tokens() {
        assert!(token.pos() >= last_end);
        last_end = token.end();
    }
}

// ============================================
// 2. A minimal JSON language
// ============================================

mod json {
    use super::*;

    fn values() -> Vec<Rule> {
        vec![
            Rule::new(r"\{", *DELIMITER, vec![Lexicon::of(&OBJECT).into()]),
            Rule::new(r"\[", *DELIMITER, vec![Lexicon::of(&ARRAY).into()]),
            Rule::new("\"", *STRING, vec![Lexicon::of(&STRING_LEX).into()]),
            Rule::new(r"-?\d+(?:\.\d+)?(?:[Ee][+-]?\d+)?", *NUMBER, vec![]),
            Rule::new(
                treelex::pattern::Pattern::words_with(&["true", "false", "null"], r"\b", r"\b"),
                Action::from_path("Name.Constant"),
                vec![],
            ),
        ]
    }

    fn root_rules() -> Vec<Rule> {
        let mut rules = values();
        rules.push(Rule::new(r"\s+", skip(), vec![]));
        rules
    }
    pub static ROOT: LexiconDescriptor = LexiconDescriptor::new("Json", "root", root_rules);

    fn object_rules() -> Vec<Rule> {
        vec![
            Rule::new(r"\}", *DELIMITER, vec![(-1).into()]),
            Rule::new(r"\s+", skip(), vec![]),
            Rule::default_target(vec![Lexicon::of(&KEY).into()]),
        ]
    }
    pub static OBJECT: LexiconDescriptor = LexiconDescriptor::new("Json", "object", object_rules);

    fn key_rules() -> Vec<Rule> {
        vec![
            Rule::new("\"", *STRING, vec![Lexicon::of(&STRING_LEX).into()]),
            Rule::new(":", *DELIMITER, vec![(-1).into(), Lexicon::of(&VALUE).into()]),
            Rule::new(r"\s+", skip(), vec![]),
        ]
    }
    pub static KEY: LexiconDescriptor = LexiconDescriptor::new("Json", "key", key_rules);

    fn value_rules() -> Vec<Rule> {
        let mut rules = values();
        rules.push(Rule::new(",", *DELIMITER, vec![(-1).into()]));
        rules.push(Rule::new(r"\}", *DELIMITER, vec![(-2).into()]));
        rules.push(Rule::new(r"\s+", skip(), vec![]));
        rules
    }
    pub static VALUE: LexiconDescriptor = LexiconDescriptor::new("Json", "value", value_rules);

    fn array_rules() -> Vec<Rule> {
        let mut rules = values();
        rules.push(Rule::new(",", *DELIMITER, vec![]));
        rules.push(Rule::new(r"\]", *DELIMITER, vec![(-1).into()]));
        rules.push(Rule::new(r"\s+", skip(), vec![]));
        rules
    }
    pub static ARRAY: LexiconDescriptor = LexiconDescriptor::new("Json", "array", array_rules);

    fn string_rules() -> Vec<Rule> {
        vec![
            Rule::new("\"", *STRING, vec![(-1).into()]),
            Rule::new(
                r#"\\(?:["\\/bfnrt]|u[0-9a-fA-F]{4})"#,
                Action::from_path("Literal.String.Escape"),
                vec![],
            ),
            Rule::default_action(*STRING),
        ]
    }
    pub static STRING_LEX: LexiconDescriptor =
        LexiconDescriptor::new("Json", "string", string_rules);
}

#[test]
fn test_json_tree_structure() {
    let tree = treelex::root(Lexicon::of(&json::ROOT), r#"{"a":[1,2,3]}"#).unwrap();
    let root = tree.root();

    // root: '{' token, then the object context
    assert_eq!(root.lexicon().name(), "root");
    assert_eq!(root.len(), 2);
    let brace = root.child(0).unwrap().token().unwrap();
    assert_eq!(brace.text(), "{");
    let object = root.child(1).unwrap().context().unwrap();
    assert_eq!(object.lexicon().name(), "object");

    // the object holds one key context and one value context
    assert_eq!(object.len(), 2);
    let key = object.child(0).unwrap().context().unwrap();
    assert_eq!(key.lexicon().name(), "key");
    let value = object.child(1).unwrap().context().unwrap();
    assert_eq!(value.lexicon().name(), "value");

    // the key holds the quoted name in a string context
    let string = key
        .children()
        .filter_map(|n| n.context())
        .next()
        .expect("string context");
    assert_eq!(string.lexicon().name(), "string");
    assert_eq!(string.first_token().unwrap().text(), "a");
    let array = value
        .children()
        .filter_map(|n| n.context())
        .find(|c| c.lexicon().name() == "array")
        .expect("array context");

    // with the three numbers
    let numbers: Vec<String> = array
        .tokens()
        .filter(|t| t.action() == *NUMBER)
        .map(|t| t.text().to_string())
        .collect();
    assert_eq!(numbers, vec!["1", "2", "3"]);
}

#[test]
fn test_json_token_concatenation_covers_text() {
    let text = r#"{"a":[1,2,3]}"#;
    let tree = treelex::root(Lexicon::of(&json::ROOT), text).unwrap();
    // no whitespace in this input: the token texts cover everything
    let joined: String = tree.tokens().map(|t| t.text().to_string()).collect();
    assert_eq!(joined, text);
    assert_eq!(tree.root().pos(), 0);
    assert_eq!(tree.root().end(), text.len());
}

#[test]
fn test_json_find_context() {
    let text = r#"{"a":[1,2,3]}"#;
    let tree = treelex::root(Lexicon::of(&json::ROOT), text).unwrap();
    // position of '2'
    let ctx = tree.root().find_context(8);
    assert_eq!(ctx.lexicon().name(), "array");
    assert_eq!(tree.root().find_token(8).unwrap().text(), "2");
}

// ============================================
// 3. Derived lexicons (heredoc style)
// ============================================

mod heredoc {
    use super::*;
    use treelex::rule::arg_pattern;

    fn root_rules() -> Vec<Rule> {
        vec![
            Rule::new(
                r"(@)(\w+)(@)",
                bygroups(&[*DELIMITER, *NAME, *DELIMITER]),
                vec![TargetSpec::Item(derive(Lexicon::of(&HERE), match_group(2)))],
            ),
            Rule::new(r"\w+", *TEXT, vec![]),
            Rule::new(r"\s+", skip(), vec![]),
        ]
    }
    pub static ROOT: LexiconDescriptor = LexiconDescriptor::new("Here", "root", root_rules);

    fn here_rules() -> Vec<Rule> {
        vec![
            Rule::with_pattern_item(arg_pattern(true, r"\b", r"\b"), *NAME, vec![(-1).into()]),
            Rule::new(r"\w+", *TEXT, vec![]),
            Rule::new(r"\s+", skip(), vec![]),
        ]
    }
    pub static HERE: LexiconDescriptor = LexiconDescriptor::new("Here", "here", here_rules);
}

#[test]
fn test_derived_lexicon_heredoc() {
    let tree = treelex::root(Lexicon::of(&heredoc::ROOT), "@STOP@ x STOP y").unwrap();
    let tuples = token_tuples(&tree);
    assert_eq!(
        tuples,
        vec![
            (0, "@".to_string(), *DELIMITER),
            (1, "STOP".to_string(), *NAME),
            (5, "@".to_string(), *DELIMITER),
            (7, "x".to_string(), *TEXT),
            (9, "STOP".to_string(), *NAME),
            (14, "y".to_string(), *TEXT),
        ]
    );

    // the markers form one group in the root context
    let marker = tree.root().find_token(0).unwrap();
    assert_eq!(marker.group_index(), Some(0));
    assert_eq!(marker.group_end().text(), "@");
    assert_eq!(marker.group_end().pos(), 5);

    // 'x' and the boundary word live in the derived context
    let x = tree.root().find_token(7).unwrap();
    let here_ctx = x.parent();
    assert_eq!(here_ctx.lexicon().name(), "here");
    assert_eq!(
        here_ctx.lexicon().arg(),
        Some(&treelex::Arg::from("STOP"))
    );
    // equal to the vanilla lexicon, but not the same
    assert_eq!(*here_ctx.lexicon(), Lexicon::of(&heredoc::HERE));
    assert!(!here_ctx.lexicon().same(&Lexicon::of(&heredoc::HERE)));

    // the trailing word is back in the root context
    let y = tree.root().find_token(14).unwrap();
    assert!(y.parent().is_root());
}

#[test]
fn test_derivation_caching_is_identity() {
    let here = Lexicon::of(&heredoc::HERE);
    let a = here.derived(Some("X".into()));
    let b = here.derived(Some("X".into()));
    assert!(a.same(&b));
    assert!(here.derived(None).same(&here));
}

// ============================================
// 4. The consume flag
// ============================================

mod comments {
    use super::*;

    fn root_rules() -> Vec<Rule> {
        vec![
            Rule::new("<!--", *COMMENT, vec![Lexicon::of(&COMMENT_LEX).into()]),
            Rule::new(r"\w+", *TEXT, vec![]),
            Rule::new(r"\s+", skip(), vec![]),
        ]
    }
    pub static ROOT: LexiconDescriptor = LexiconDescriptor::new("Comments", "root", root_rules);

    fn comment_rules() -> Vec<Rule> {
        vec![
            Rule::new("-->", *COMMENT, vec![(-1).into()]),
            Rule::default_action(*COMMENT),
        ]
    }
    pub static COMMENT_LEX: LexiconDescriptor =
        LexiconDescriptor::new("Comments", "comment", comment_rules).consume();
}

#[test]
fn test_consume_reparents_opening_token() {
    let tree = treelex::root(Lexicon::of(&comments::ROOT), "a <!-- b --> c").unwrap();
    let opener = tree.root().find_token(2).unwrap();
    assert_eq!(opener.text(), "<!--");
    // the pushed context owns the token that switched to it
    assert_eq!(opener.parent().lexicon().name(), "comment");
    assert!(opener.is_first());
    // and is closed again afterwards
    let c = tree.root().find_token(13).unwrap();
    assert!(c.parent().is_root());
}

// ============================================
// 5. Default-target cycle protection
// ============================================

#[test]
fn test_default_target_cycle_protection() {
    fn cycle_rules() -> Vec<Rule> {
        vec![Rule::default_target(vec![
            (-1).into(),
            Lexicon::of(&CYCLE).into(),
        ])]
    }
    static CYCLE: LexiconDescriptor = LexiconDescriptor::new("Cycle", "root", cycle_rules);

    let mut builder = TreeBuilder::new(Lexicon::of(&CYCLE));
    let result = builder.build("abc").unwrap();
    // terminates, yields no tokens
    assert_eq!(builder.root().len(), 0);
    assert_eq!(result.start, 0);
    // the validator flags the same definition
    let validation = treelex::validate_lexicon(&Lexicon::of(&CYCLE));
    assert!(!validation.is_valid());
}

// ============================================
// 6. The dump contract
// ============================================

#[test]
fn test_dump_styles_exist() {
    for name in ["ascii", "round", "square", "double", "thick", "flat"] {
        assert!(
            treelex::DumpStyle::by_name(name).is_some(),
            "style {} missing",
            name
        );
    }
}

#[test]
fn test_dump_renders_tree() {
    let tree = treelex::root(Lexicon::of(&json::ROOT), r#"{"a":[1]}"#).unwrap();
    let out = tree
        .root()
        .dump(treelex::DumpStyle::by_name("round").unwrap())
        .to_string();
    assert!(out.contains("<Context Json.root"));
    assert!(out.contains("<Context Json.object"));
    assert!(out.contains("<Token \"1\""));
    assert!(out.contains(" \u{251C}\u{2574}") || out.contains(" \u{2570}\u{2574}"));
    // one line per node
    let nodes = 1 + tree.tokens().count()
        + out.matches("<Context").count() - 1;
    assert!(out.lines().count() >= nodes);
}

// ============================================
// 7. Open lexicons
// ============================================

#[test]
fn test_open_lexicons_at_unterminated_input() {
    let mut builder = TreeBuilder::new(Lexicon::of(&json::ROOT));
    let result = builder.build(r#"{"a":[1,2"#).unwrap();
    // the ':' popped the key lexicon before pushing value
    let open: Vec<String> = result
        .lexicons
        .unwrap()
        .iter()
        .map(|l| l.name().to_string())
        .collect();
    assert_eq!(open, vec!["object", "value", "array"]);
}
