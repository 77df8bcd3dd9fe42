//! Interned action tags.
//!
//! An [`Action`] identifies the semantic category of a token, e.g. `Number`
//! or `Name.Tag`. The lexer itself never interprets actions; they exist for
//! the consumers of the tree (highlighters, formatters, transformers).
//!
//! Actions form a tree: every action has a name and an optional parent.
//! They are immutable singletons, interned by `(parent, name)`, so two
//! mentions of the same dotted path are pointer-identical:
//!
//! ```
//! use treelex::Action;
//!
//! let name = Action::new("Name");
//! let tag = name.child("Tag");
//! assert_eq!(tag, Action::from_path("Name.Tag"));
//! assert_eq!(tag.to_string(), "Name.Tag");
//! ```
//!
//! Comparing an action against a string tests whether that name occurs
//! anywhere in the action's chain, which makes broad category tests cheap:
//!
//! ```
//! use treelex::Action;
//!
//! let string = Action::from_path("Literal.String.Double");
//! assert!(string == "String");
//! assert!(string == "Literal");
//! assert!(string != "Number");
//! ```

use std::fmt;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

/// The intern table. Keyed by the parent node's address (0 for toplevel
/// actions) and the action name.
static REGISTRY: Lazy<Mutex<FxHashMap<(usize, String), &'static ActionNode>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

/// One interned node of the action tree.
#[derive(Debug)]
struct ActionNode {
    name: &'static str,
    parent: Option<&'static ActionNode>,
}

/// A token's semantic category, e.g. `Number` or `Name.Tag`.
///
/// `Action` is a small copyable handle to an interned node; identity of the
/// node is equality of the action.
#[derive(Clone, Copy)]
pub struct Action(&'static ActionNode);

impl Action {
    /// Return the toplevel action with the given name, interning it on
    /// first use.
    pub fn new(name: &str) -> Action {
        Action::intern(None, name)
    }

    /// Return the child action `self.name`, interning it on first use.
    pub fn child(self, name: &str) -> Action {
        Action::intern(Some(self.0), name)
    }

    /// Resolve a dotted path like `"Name.Tag"` to an action.
    pub fn from_path(path: &str) -> Action {
        let mut parts = path.split('.');
        let mut action = Action::new(parts.next().unwrap_or(""));
        for part in parts {
            action = action.child(part);
        }
        action
    }

    fn intern(parent: Option<&'static ActionNode>, name: &str) -> Action {
        let key = (
            parent.map_or(0, |p| p as *const ActionNode as usize),
            name.to_string(),
        );
        let mut registry = REGISTRY.lock().unwrap();
        if let Some(node) = registry.get(&key) {
            return Action(node);
        }
        let leaked: &'static str = Box::leak(name.to_string().into_boxed_str());
        let node: &'static ActionNode = Box::leak(Box::new(ActionNode {
            name: leaked,
            parent,
        }));
        registry.insert(key, node);
        Action(node)
    }

    /// The name of this action, without parent names.
    pub fn name(self) -> &'static str {
        self.0.name
    }

    /// The parent action, if any.
    pub fn parent(self) -> Option<Action> {
        self.0.parent.map(Action)
    }

    /// Iterate over this action and then its parents, towards the root.
    pub fn chain(self) -> impl Iterator<Item = Action> {
        std::iter::successors(Some(self), |a| a.parent())
    }

    /// Return true if this action is `other` or a descendant of `other`.
    pub fn is_in(self, other: Action) -> bool {
        self.chain().any(|a| a == other)
    }

    /// Return the closest common ancestor with `other`, if any.
    pub fn common_ancestor(self, other: Action) -> Option<Action> {
        self.chain().find(|a| other.is_in(*a))
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Action {}

impl std::hash::Hash for Action {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (self.0 as *const ActionNode as usize).hash(state);
    }
}

/// Comparing with a string tests membership of that name in the chain.
impl PartialEq<str> for Action {
    fn eq(&self, other: &str) -> bool {
        self.chain().any(|a| a.name() == other)
    }
}

impl PartialEq<&str> for Action {
    fn eq(&self, other: &&str) -> bool {
        *self == **other
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.chain().map(Action::name).collect();
        names.reverse();
        write!(f, "{}", names.join("."))
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
