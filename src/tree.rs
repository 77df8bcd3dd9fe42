//! The tree structure a text is parsed into.
//!
//! A tree consists of contexts and tokens. A [`Context`](ContextRef)
//! corresponds to one activation of a lexicon and owns an ordered list of
//! children: tokens and nested contexts, sorted by position and
//! non-overlapping. A [`Token`](TokenRef) is one lexed piece of text.
//! Tokens produced together from a single match (by a subgroup action) are
//! *group tokens* and are always adjacent in one context.
//!
//! Nodes live in an arena owned by [`Tree`]; parent links are plain arena
//! indices, so ownership runs strictly from the root downward. The public
//! API hands out lightweight cursors ([`TokenRef`], [`ContextRef`]) that
//! borrow the tree.
//!
//! Finding a token at a position uses bisection over the sorted children,
//! so lookups cost `O(log n)` per level:
//!
//! ```text
//! let token = tree.root().find_token(45).unwrap();
//! assert!(token.pos() <= 45 && 45 < token.end());
//! ```
//!
//! The [`dump`](NodeRef::dump) method renders a tree for inspection:
//!
//! ```text
//! <Context Json.root at 0-13 (2 children)>
//!  ├╴<Token '{' at 0:1 (Delimiter)>
//!  ╰╴<Context Json.object at 1-13 (3 children)>
//!     ├╴<Token '"a"' at 1:4 (Literal.String)>
//!     ...
//! ```

use std::fmt;

use crate::action::Action;
use crate::lexer::Lexeme;
use crate::lexicon::Lexicon;

/// Index of a node in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct TokenData {
    parent: NodeId,
    pos: usize,
    text: Box<str>,
    action: Action,
}

#[derive(Debug)]
struct ContextData {
    parent: Option<NodeId>,
    lexicon: Lexicon,
    children: Vec<NodeId>,
}

/// Arena slot. Plain tokens and group tokens are distinct variants, so the
/// common case does not carry a group index.
#[derive(Debug)]
enum Slot {
    Free,
    Token(TokenData),
    /// A token of a group; the index is negated for the last member, so a
    /// three-token group carries 0, 1, -2.
    Group(TokenData, i32),
    Context(ContextData),
}

/// The tree of tokens and contexts a text was parsed into.
///
/// The tree owns all nodes; read access goes through [`Tree::root`].
pub struct Tree {
    slots: Vec<Slot>,
    free: Vec<NodeId>,
    root: NodeId,
}

impl Tree {
    /// An empty tree with a root context for the given lexicon.
    pub fn new(root_lexicon: Lexicon) -> Tree {
        let mut tree = Tree {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId(0),
        };
        tree.root = tree.alloc(Slot::Context(ContextData {
            parent: None,
            lexicon: root_lexicon,
            children: Vec::new(),
        }));
        tree
    }

    /// The root context.
    pub fn root(&self) -> ContextRef<'_> {
        ContextRef {
            tree: self,
            id: self.root,
        }
    }

    /// The root lexicon.
    pub fn root_lexicon(&self) -> &Lexicon {
        self.lexicon_of(self.root)
    }

    /// All tokens of the tree in document order.
    pub fn tokens(&self) -> Tokens<'_> {
        self.root().tokens()
    }

    // -- arena plumbing ----------------------------------------------------

    fn alloc(&mut self, slot: Slot) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.slots[id.index()] = slot;
                id
            }
            None => {
                self.slots.push(slot);
                NodeId((self.slots.len() - 1) as u32)
            }
        }
    }

    fn slot(&self, id: NodeId) -> &Slot {
        &self.slots[id.index()]
    }

    fn slot_mut(&mut self, id: NodeId) -> &mut Slot {
        &mut self.slots[id.index()]
    }

    fn token_data(&self, id: NodeId) -> &TokenData {
        match self.slot(id) {
            Slot::Token(t) | Slot::Group(t, _) => t,
            _ => panic!("node is not a token"),
        }
    }

    fn context_data(&self, id: NodeId) -> &ContextData {
        match self.slot(id) {
            Slot::Context(c) => c,
            _ => panic!("node is not a context"),
        }
    }

    fn context_data_mut(&mut self, id: NodeId) -> &mut ContextData {
        match self.slot_mut(id) {
            Slot::Context(c) => c,
            _ => panic!("node is not a context"),
        }
    }

    pub(crate) fn root_id(&self) -> NodeId {
        self.root
    }

    pub(crate) fn is_token(&self, id: NodeId) -> bool {
        matches!(self.slot(id), Slot::Token(_) | Slot::Group(..))
    }

    pub(crate) fn is_context(&self, id: NodeId) -> bool {
        matches!(self.slot(id), Slot::Context(_))
    }

    pub(crate) fn group_of(&self, id: NodeId) -> Option<i32> {
        match self.slot(id) {
            Slot::Group(_, g) => Some(*g),
            _ => None,
        }
    }

    pub(crate) fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        match self.slot(id) {
            Slot::Token(t) | Slot::Group(t, _) => Some(t.parent),
            Slot::Context(c) => c.parent,
            Slot::Free => None,
        }
    }

    pub(crate) fn children_of(&self, id: NodeId) -> &[NodeId] {
        &self.context_data(id).children
    }

    pub(crate) fn lexicon_of(&self, id: NodeId) -> &Lexicon {
        &self.context_data(id).lexicon
    }

    pub(crate) fn text_of(&self, id: NodeId) -> &str {
        &self.token_data(id).text
    }

    pub(crate) fn action_of(&self, id: NodeId) -> Action {
        self.token_data(id).action
    }

    /// Position of a node; a context descends to its first token (0 when
    /// empty).
    pub(crate) fn pos_of(&self, id: NodeId) -> usize {
        match self.slot(id) {
            Slot::Token(t) | Slot::Group(t, _) => t.pos,
            Slot::Context(_) => self
                .first_token_in(id)
                .map(|t| self.token_data(t).pos)
                .unwrap_or(0),
            Slot::Free => 0,
        }
    }

    /// End of a node; a context descends to its last token (0 when empty).
    pub(crate) fn end_of(&self, id: NodeId) -> usize {
        match self.slot(id) {
            Slot::Token(t) | Slot::Group(t, _) => t.pos + t.text.len(),
            Slot::Context(_) => self
                .last_token_in(id)
                .map(|t| {
                    let t = self.token_data(t);
                    t.pos + t.text.len()
                })
                .unwrap_or(0),
            Slot::Free => 0,
        }
    }

    /// The first token of the subtree at `id`, if any.
    pub(crate) fn first_token_in(&self, id: NodeId) -> Option<NodeId> {
        let mut node = id;
        loop {
            if self.is_token(node) {
                return Some(node);
            }
            node = *self.children_of(node).first()?;
        }
    }

    /// The last token of the subtree at `id`, if any.
    pub(crate) fn last_token_in(&self, id: NodeId) -> Option<NodeId> {
        let mut node = id;
        loop {
            if self.is_token(node) {
                return Some(node);
            }
            node = *self.children_of(node).last()?;
        }
    }

    // -- mutation ----------------------------------------------------------

    /// Replace the root lexicon; the whole tree is invalidated.
    pub(crate) fn set_root_lexicon(&mut self, lexicon: Lexicon) {
        self.clear_root();
        self.context_data_mut(self.root).lexicon = lexicon;
    }

    /// Delete all children of the root context.
    pub(crate) fn clear_root(&mut self) {
        let children = std::mem::take(&mut self.context_data_mut(self.root).children);
        for child in children {
            self.free_subtree(child);
        }
    }

    /// Create a context and append it to `parent`.
    pub(crate) fn new_context(&mut self, parent: NodeId, lexicon: Lexicon) -> NodeId {
        let id = self.alloc(Slot::Context(ContextData {
            parent: Some(parent),
            lexicon,
            children: Vec::new(),
        }));
        self.context_data_mut(parent).children.push(id);
        id
    }

    /// Create a context without a parent.
    pub(crate) fn new_detached_context(&mut self, lexicon: Lexicon) -> NodeId {
        self.alloc(Slot::Context(ContextData {
            parent: None,
            lexicon,
            children: Vec::new(),
        }))
    }

    /// Materialize the lexemes of one event as children of `parent`.
    ///
    /// A single lexeme becomes a plain token; several become a group.
    pub(crate) fn append_lexemes(&mut self, parent: NodeId, lexemes: &[Lexeme]) {
        if lexemes.len() == 1 {
            let l = &lexemes[0];
            let id = self.alloc(Slot::Token(TokenData {
                parent,
                pos: l.pos,
                text: l.text.clone().into_boxed_str(),
                action: l.action,
            }));
            self.context_data_mut(parent).children.push(id);
        } else {
            let last = lexemes.len() - 1;
            for (i, l) in lexemes.iter().enumerate() {
                let group = if i == last { -(last as i32) } else { i as i32 };
                let id = self.alloc(Slot::Group(
                    TokenData {
                        parent,
                        pos: l.pos,
                        text: l.text.clone().into_boxed_str(),
                        action: l.action,
                    },
                    group,
                ));
                self.context_data_mut(parent).children.push(id);
            }
        }
    }

    /// Delete the children of `ctx` from index `from` on.
    pub(crate) fn truncate_children(&mut self, ctx: NodeId, from: usize) {
        let removed: Vec<NodeId> = self.context_data_mut(ctx).children.split_off(from);
        for id in removed {
            self.free_subtree(id);
        }
    }

    /// Delete the children of `ctx` before index `upto`.
    pub(crate) fn remove_leading_children(&mut self, ctx: NodeId, upto: usize) {
        let removed: Vec<NodeId> = self
            .context_data_mut(ctx)
            .children
            .drain(..upto)
            .collect();
        for id in removed {
            self.free_subtree(id);
        }
    }

    /// Move the children of `src` from index `from` on to the end of `dst`.
    pub(crate) fn move_children(&mut self, src: NodeId, from: usize, dst: NodeId) {
        let moved: Vec<NodeId> = self.context_data_mut(src).children.split_off(from);
        for &id in &moved {
            match self.slot_mut(id) {
                Slot::Token(t) | Slot::Group(t, _) => t.parent = dst,
                Slot::Context(c) => c.parent = Some(dst),
                Slot::Free => {}
            }
        }
        self.context_data_mut(dst).children.extend(moved);
    }

    /// Remove `id` from its parent's child list (the node itself stays
    /// allocated).
    pub(crate) fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.parent_of(id) {
            let index = self.parent_index(id);
            self.context_data_mut(parent).children.remove(index);
        }
    }

    /// Free a node and all its descendants.
    pub(crate) fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Slot::Context(c) = self.slot(id) {
                stack.extend(c.children.iter().copied());
            }
            self.slots[id.index()] = Slot::Free;
            self.free.push(id);
        }
    }

    /// Free a single (childless) node.
    pub(crate) fn free_node(&mut self, id: NodeId) {
        self.slots[id.index()] = Slot::Free;
        self.free.push(id);
    }

    /// Shift the positions of all tokens in the subtree at `id`.
    pub(crate) fn shift_subtree(&mut self, id: NodeId, offset: isize) {
        if offset == 0 {
            return;
        }
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            match self.slot_mut(id) {
                Slot::Token(t) | Slot::Group(t, _) => {
                    t.pos = (t.pos as isize + offset) as usize;
                }
                Slot::Context(c) => stack.extend(c.children.iter().copied()),
                Slot::Free => {}
            }
        }
    }

    // -- search ------------------------------------------------------------

    /// Index of `id` in its parent, found by position bisection.
    pub(crate) fn parent_index(&self, id: NodeId) -> usize {
        let parent = self.parent_of(id).expect("node has a parent");
        let children = self.children_of(parent);
        let pos = self.pos_of(id);
        let mut lo = 0;
        let mut hi = children.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            let n = children[mid];
            if n == id {
                return mid;
            }
            if self.pos_of(n) < pos {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        // equal positions cluster around lo (empty contexts); scan for
        // identity
        children
            .iter()
            .position(|&c| c == id)
            .expect("child is in its parent")
    }

    /// Index of the child of `ctx` at (or right of) `pos`; `None` when all
    /// children end at or before `pos`.
    pub(crate) fn find(&self, ctx: NodeId, pos: usize) -> Option<usize> {
        let children = self.children_of(ctx);
        let mut lo = 0;
        let mut hi = children.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.end_of(children[mid]) <= pos {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        (lo < children.len()).then_some(lo)
    }

    /// Index of the child of `ctx` at (or left of) `pos`; `None` when all
    /// children start at or after `pos`.
    pub(crate) fn find_left(&self, ctx: NodeId, pos: usize) -> Option<usize> {
        let children = self.children_of(ctx);
        let mut lo = 0;
        let mut hi = children.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.pos_of(children[mid]) < pos {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo.checked_sub(1)
    }

    /// The token at (or right of) `pos`, descending into contexts.
    pub(crate) fn find_token_id(&self, ctx: NodeId, pos: usize) -> Option<NodeId> {
        let mut node = ctx;
        loop {
            let i = self.find(node, pos)?;
            node = self.children_of(node)[i];
            if self.is_token(node) {
                return Some(node);
            }
        }
    }

    /// Like [`find_token_id`](Self::find_token_id), also returning the
    /// index trail from `ctx` to the token.
    pub(crate) fn find_token_with_trail(
        &self,
        ctx: NodeId,
        pos: usize,
    ) -> Option<(NodeId, Vec<usize>)> {
        let mut node = ctx;
        let mut trail = Vec::new();
        loop {
            let i = self.find(node, pos)?;
            trail.push(i);
            node = self.children_of(node)[i];
            if self.is_token(node) {
                return Some((node, trail));
            }
        }
    }

    /// The token at (or left of) `pos`, with the index trail.
    pub(crate) fn find_token_left_with_trail(
        &self,
        ctx: NodeId,
        pos: usize,
    ) -> Option<(NodeId, Vec<usize>)> {
        let mut node = ctx;
        let mut trail = Vec::new();
        loop {
            let i = self.find_left(node, pos)?;
            trail.push(i);
            node = self.children_of(node)[i];
            if self.is_token(node) {
                return Some((node, trail));
            }
        }
    }

    /// The first token completely right of `pos` (`token.pos >= pos`).
    pub(crate) fn find_token_after_id(&self, ctx: NodeId, pos: usize) -> Option<NodeId> {
        let mut node = ctx;
        loop {
            let children = self.children_of(node);
            let mut lo = 0;
            let mut hi = children.len();
            while lo < hi {
                let mid = (lo + hi) / 2;
                let n = children[mid];
                // compare by the subtree's last token
                let key = match self.last_token_in(n) {
                    Some(t) => self.pos_of(t),
                    None => 0,
                };
                if key < pos {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            }
            if lo >= children.len() {
                return None;
            }
            node = children[lo];
            if self.is_token(node) {
                return Some(node);
            }
        }
    }

    /// The last token completely left of `pos` (`token.end <= pos`).
    ///
    /// Tolerates empty contexts, which exist transiently during a rebuild.
    pub(crate) fn find_token_before_id(&self, ctx: NodeId, pos: usize) -> Option<NodeId> {
        let mut node = ctx;
        loop {
            let children = self.children_of(node);
            let mut lo = 0;
            let mut hi = children.len();
            while lo < hi {
                let mid = (lo + hi) / 2;
                let n = children[mid];
                // compare by the subtree's first token; an empty context
                // sorts left
                let key = match self.first_token_in(n) {
                    Some(t) => self.end_of(t),
                    None => 0,
                };
                if pos < key {
                    hi = mid;
                } else {
                    lo = mid + 1;
                }
            }
            if lo == 0 {
                return None;
            }
            node = children[lo - 1];
            if self.is_token(node) {
                return Some(node);
            }
        }
    }

    /// The youngest context whose extent contains `pos` (or `ctx` itself).
    pub(crate) fn find_context_id(&self, ctx: NodeId, pos: usize) -> NodeId {
        let mut node = ctx;
        loop {
            let i = match self.find(node, pos) {
                Some(i) => i,
                None => return node,
            };
            let n = self.children_of(node)[i];
            if self.is_context(n) && self.pos_of(n) <= pos {
                node = n;
            } else {
                return node;
            }
        }
    }

    // -- token-level navigation --------------------------------------------

    /// The token following `id` in document order, if any.
    pub(crate) fn next_token_id(&self, id: NodeId) -> Option<NodeId> {
        let mut node = id;
        while let Some(parent) = self.parent_of(node) {
            let index = self.parent_index(node);
            for &sibling in &self.children_of(parent)[index + 1..] {
                if let Some(token) = self.first_token_in(sibling) {
                    return Some(token);
                }
            }
            node = parent;
        }
        None
    }

    /// The token preceding `id` in document order, if any.
    pub(crate) fn previous_token_id(&self, id: NodeId) -> Option<NodeId> {
        let mut node = id;
        while let Some(parent) = self.parent_of(node) {
            let index = self.parent_index(node);
            for &sibling in self.children_of(parent)[..index].iter().rev() {
                if let Some(token) = self.last_token_in(sibling) {
                    return Some(token);
                }
            }
            node = parent;
        }
        None
    }

    /// The ancestors of `id`, nearest first.
    pub(crate) fn ancestor_ids(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut node = id;
        while let Some(parent) = self.parent_of(node) {
            out.push(parent);
            node = parent;
        }
        out
    }

    /// The lexicons of the ancestors of a token, root first.
    pub(crate) fn ancestry_lexicons(&self, id: NodeId) -> Vec<Lexicon> {
        let mut out: Vec<Lexicon> = self
            .ancestor_ids(id)
            .iter()
            .map(|&c| self.lexicon_of(c).clone())
            .collect();
        out.reverse();
        out
    }

    /// First token of the group `id` belongs to (or `id` itself).
    pub(crate) fn group_start_id(&self, id: NodeId) -> NodeId {
        match self.group_of(id) {
            None => id,
            Some(g) => {
                let index = self.parent_index(id);
                let back = if g < 0 { (-g) as usize } else { g as usize };
                let parent = self.parent_of(id).expect("token has a parent");
                self.children_of(parent)[index - back]
            }
        }
    }

    /// Last token of the group `id` belongs to (or `id` itself).
    pub(crate) fn group_end_id(&self, id: NodeId) -> NodeId {
        match self.group_of(id) {
            None => id,
            Some(g) if g < 0 => id,
            Some(_) => {
                let parent = self.parent_of(id).expect("token has a parent");
                let children = self.children_of(parent);
                let mut index = self.parent_index(id);
                while let Some(g) = self.group_of(children[index]) {
                    if g < 0 {
                        break;
                    }
                    index += 1;
                }
                children[index]
            }
        }
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tree({:?})", self.root())
    }
}

// ---------------------------------------------------------------------------
// Cursors

/// A context in a tree: one activation of a lexicon.
#[derive(Clone, Copy)]
pub struct ContextRef<'a> {
    tree: &'a Tree,
    id: NodeId,
}

/// A token in a tree.
#[derive(Clone, Copy)]
pub struct TokenRef<'a> {
    tree: &'a Tree,
    id: NodeId,
}

/// Either a token or a context.
#[derive(Clone, Copy)]
pub enum NodeRef<'a> {
    /// A token node.
    Token(TokenRef<'a>),
    /// A context node.
    Context(ContextRef<'a>),
}

impl<'a> ContextRef<'a> {
    pub(crate) fn new(tree: &'a Tree, id: NodeId) -> ContextRef<'a> {
        ContextRef { tree, id }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    /// The lexicon this context was created for.
    pub fn lexicon(&self) -> &'a Lexicon {
        self.tree.lexicon_of(self.id)
    }

    /// The parent context, if this is not the root.
    pub fn parent(&self) -> Option<ContextRef<'a>> {
        self.tree
            .parent_of(self.id)
            .map(|id| ContextRef::new(self.tree, id))
    }

    /// Whether this is the root context.
    pub fn is_root(&self) -> bool {
        self.tree.parent_of(self.id).is_none()
    }

    /// The number of children.
    pub fn len(&self) -> usize {
        self.tree.children_of(self.id).len()
    }

    /// Whether the context has no children.
    pub fn is_empty(&self) -> bool {
        self.tree.children_of(self.id).is_empty()
    }

    /// The child at `index`.
    pub fn child(&self, index: usize) -> Option<NodeRef<'a>> {
        let id = *self.tree.children_of(self.id).get(index)?;
        Some(NodeRef::wrap(self.tree, id))
    }

    /// Iterate over the children.
    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let tree = self.tree;
        self.tree
            .children_of(self.id)
            .iter()
            .map(move |&id| NodeRef::wrap(tree, id))
    }

    /// Position of the first token (0 when empty).
    pub fn pos(&self) -> usize {
        self.tree.pos_of(self.id)
    }

    /// End of the last token (0 when empty).
    pub fn end(&self) -> usize {
        self.tree.end_of(self.id)
    }

    /// The first token of this subtree.
    pub fn first_token(&self) -> Option<TokenRef<'a>> {
        self.tree
            .first_token_in(self.id)
            .map(|id| TokenRef { tree: self.tree, id })
    }

    /// The last token of this subtree.
    pub fn last_token(&self) -> Option<TokenRef<'a>> {
        self.tree
            .last_token_in(self.id)
            .map(|id| TokenRef { tree: self.tree, id })
    }

    /// The token at `pos`, i.e. the first whose end is right of `pos`.
    pub fn find_token(&self, pos: usize) -> Option<TokenRef<'a>> {
        self.tree
            .find_token_id(self.id, pos)
            .map(|id| TokenRef { tree: self.tree, id })
    }

    /// The last token completely left of `pos`.
    pub fn find_token_before(&self, pos: usize) -> Option<TokenRef<'a>> {
        self.tree
            .find_token_before_id(self.id, pos)
            .map(|id| TokenRef { tree: self.tree, id })
    }

    /// The first token completely right of `pos`.
    pub fn find_token_after(&self, pos: usize) -> Option<TokenRef<'a>> {
        self.tree
            .find_token_after_id(self.id, pos)
            .map(|id| TokenRef { tree: self.tree, id })
    }

    /// The youngest descendant context containing `pos` (or this one).
    pub fn find_context(&self, pos: usize) -> ContextRef<'a> {
        ContextRef::new(self.tree, self.tree.find_context_id(self.id, pos))
    }

    /// All tokens of this subtree in document order.
    pub fn tokens(&self) -> Tokens<'a> {
        Tokens {
            tree: self.tree,
            stack: vec![(self.id, 0)],
        }
    }

    /// The height of this subtree (1 for a context of tokens only).
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut stack = vec![(self.id, 0usize, 1usize)];
        while let Some((node, index, depth)) = stack.pop() {
            let children = self.tree.children_of(node);
            if let Some(&child) = children.get(index) {
                stack.push((node, index + 1, depth));
                if self.tree.is_context(child) {
                    height = height.max(depth + 1);
                    stack.push((child, 0, depth + 1));
                }
            }
        }
        if self.is_empty() {
            0
        } else {
            height.max(1)
        }
    }

    /// A [`Range`] spanning `start..end` of this context, or `None` when
    /// empty.
    pub fn range(&self, start: usize, end: Option<usize>) -> Option<Range<'a>> {
        Range::from_context(*self, start, end)
    }

    /// Render this subtree with the given dump style.
    pub fn dump(&self, style: &'static DumpStyle) -> Dump<'a> {
        NodeRef::Context(*self).dump(style)
    }
}

impl<'a> TokenRef<'a> {
    pub(crate) fn new(tree: &'a Tree, id: NodeId) -> TokenRef<'a> {
        TokenRef { tree, id }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    /// Position in the text.
    pub fn pos(&self) -> usize {
        self.tree.pos_of(self.id)
    }

    /// End position in the text.
    pub fn end(&self) -> usize {
        self.tree.end_of(self.id)
    }

    /// The token text.
    pub fn text(&self) -> &'a str {
        self.tree.text_of(self.id)
    }

    /// The action of the rule that created this token.
    pub fn action(&self) -> Action {
        self.tree.action_of(self.id)
    }

    /// The context this token belongs to.
    pub fn parent(&self) -> ContextRef<'a> {
        ContextRef::new(
            self.tree,
            self.tree.parent_of(self.id).expect("token has a parent"),
        )
    }

    /// The group index when this token is part of a group (negated for the
    /// last member), `None` for plain tokens.
    pub fn group_index(&self) -> Option<i32> {
        self.tree.group_of(self.id)
    }

    /// The first token of this token's group (or the token itself).
    pub fn group_start(&self) -> TokenRef<'a> {
        TokenRef::new(self.tree, self.tree.group_start_id(self.id))
    }

    /// The last token of this token's group (or the token itself).
    pub fn group_end(&self) -> TokenRef<'a> {
        TokenRef::new(self.tree, self.tree.group_end_id(self.id))
    }

    /// Whether this token is the first child of its parent.
    pub fn is_first(&self) -> bool {
        self.tree.children_of(self.parent().id).first() == Some(&self.id)
    }

    /// Whether this token is the last child of its parent.
    pub fn is_last(&self) -> bool {
        self.tree.children_of(self.parent().id).last() == Some(&self.id)
    }

    /// The sibling left of this token, if any.
    pub fn left_sibling(&self) -> Option<NodeRef<'a>> {
        let index = self.tree.parent_index(self.id);
        let parent = self.tree.parent_of(self.id)?;
        index
            .checked_sub(1)
            .map(|i| NodeRef::wrap(self.tree, self.tree.children_of(parent)[i]))
    }

    /// The sibling right of this token, if any.
    pub fn right_sibling(&self) -> Option<NodeRef<'a>> {
        let index = self.tree.parent_index(self.id);
        let parent = self.tree.parent_of(self.id)?;
        self.tree
            .children_of(parent)
            .get(index + 1)
            .map(|&id| NodeRef::wrap(self.tree, id))
    }

    /// The following token in document order.
    pub fn next_token(&self) -> Option<TokenRef<'a>> {
        self.tree
            .next_token_id(self.id)
            .map(|id| TokenRef::new(self.tree, id))
    }

    /// The preceding token in document order.
    pub fn previous_token(&self) -> Option<TokenRef<'a>> {
        self.tree
            .previous_token_id(self.id)
            .map(|id| TokenRef::new(self.tree, id))
    }

    /// The ancestor contexts, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = ContextRef<'a>> + 'a {
        let tree = self.tree;
        tree.ancestor_ids(self.id)
            .into_iter()
            .map(move |id| ContextRef::new(tree, id))
    }

    /// Whether the other token has the same lexicons in its ancestry,
    /// compared by identity.
    pub fn state_matches(&self, other: &TokenRef) -> bool {
        let mine = self.tree.ancestry_lexicons(self.id);
        let theirs = other.tree.ancestry_lexicons(other.id);
        mine.len() == theirs.len()
            && mine
                .iter()
                .zip(theirs.iter())
                .all(|(a, b)| a.same(b))
    }

    /// All following tokens in document order.
    pub fn forward(&self) -> impl Iterator<Item = TokenRef<'a>> + 'a {
        let tree = self.tree;
        std::iter::successors(tree.next_token_id(self.id), move |&id| {
            tree.next_token_id(id)
        })
        .map(move |id| TokenRef::new(tree, id))
    }

    /// All preceding tokens in backward order.
    pub fn backward(&self) -> impl Iterator<Item = TokenRef<'a>> + 'a {
        let tree = self.tree;
        std::iter::successors(tree.previous_token_id(self.id), move |&id| {
            tree.previous_token_id(id)
        })
        .map(move |id| TokenRef::new(tree, id))
    }
}

impl<'a> NodeRef<'a> {
    pub(crate) fn wrap(tree: &'a Tree, id: NodeId) -> NodeRef<'a> {
        if tree.is_token(id) {
            NodeRef::Token(TokenRef::new(tree, id))
        } else {
            NodeRef::Context(ContextRef::new(tree, id))
        }
    }

    /// Whether this node is a token.
    pub fn is_token(&self) -> bool {
        matches!(self, NodeRef::Token(_))
    }

    /// Whether this node is a context.
    pub fn is_context(&self) -> bool {
        matches!(self, NodeRef::Context(_))
    }

    /// The token, if this node is one.
    pub fn token(&self) -> Option<TokenRef<'a>> {
        match self {
            NodeRef::Token(t) => Some(*t),
            NodeRef::Context(_) => None,
        }
    }

    /// The context, if this node is one.
    pub fn context(&self) -> Option<ContextRef<'a>> {
        match self {
            NodeRef::Context(c) => Some(*c),
            NodeRef::Token(_) => None,
        }
    }

    /// Position of this node.
    pub fn pos(&self) -> usize {
        match self {
            NodeRef::Token(t) => t.pos(),
            NodeRef::Context(c) => c.pos(),
        }
    }

    /// End position of this node.
    pub fn end(&self) -> usize {
        match self {
            NodeRef::Token(t) => t.end(),
            NodeRef::Context(c) => c.end(),
        }
    }

    /// Render this node and its contents with a dump style.
    pub fn dump(&self, style: &'static DumpStyle) -> Dump<'a> {
        Dump {
            node: *self,
            style,
        }
    }
}

impl PartialEq for TokenRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.id == other.id
    }
}

impl PartialEq for ContextRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.id == other.id
    }
}

// ---------------------------------------------------------------------------
// Iteration

/// Iterator over the tokens of a subtree in document order.
pub struct Tokens<'a> {
    tree: &'a Tree,
    /// Stack of (context, next child index).
    stack: Vec<(NodeId, usize)>,
}

impl<'a> Iterator for Tokens<'a> {
    type Item = TokenRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let &(node, index) = self.stack.last()?;
            match self.tree.children_of(node).get(index) {
                None => {
                    self.stack.pop();
                }
                Some(&child) => {
                    self.stack.last_mut().expect("just peeked").1 += 1;
                    if self.tree.is_token(child) {
                        return Some(TokenRef::new(self.tree, child));
                    }
                    self.stack.push((child, 0));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Range

/// A contiguous slice of a tree.
///
/// A range is an ancestor context plus index trails to its first and last
/// token. Empty trails extend to the respective edge of the ancestor.
pub struct Range<'a> {
    ancestor: ContextRef<'a>,
    start_trail: Vec<usize>,
    end_trail: Vec<usize>,
}

impl<'a> Range<'a> {
    /// Create a range over `start..end` of a context.
    ///
    /// The ancestor is narrowed to the youngest common ancestor of the edge
    /// tokens. Returns `None` for an empty context or an empty slice.
    pub fn from_context(
        context: ContextRef<'a>,
        start: usize,
        end: Option<usize>,
    ) -> Option<Range<'a>> {
        if context.is_empty() {
            return None;
        }
        let tree = context.tree;
        let mut ancestor = context.id;
        let mut end_trail = match end {
            Some(end) if end < context.end() => {
                if end <= start {
                    return None;
                }
                tree.find_token_left_with_trail(ancestor, end)?.1
            }
            _ => Vec::new(),
        };
        let mut start_trail = if start > 0 {
            tree.find_token_with_trail(ancestor, start)?.1
        } else {
            Vec::new()
        };
        if !start_trail.is_empty() && !end_trail.is_empty() {
            // narrow to the youngest common ancestor
            let mut n = 0;
            while n < start_trail.len() - 1
                && n < end_trail.len() - 1
                && start_trail[n] == end_trail[n]
            {
                let child = tree.children_of(ancestor)[start_trail[n]];
                if !tree.is_context(child) {
                    break;
                }
                ancestor = child;
                n += 1;
            }
            start_trail.drain(..n);
            end_trail.drain(..n);
        }
        Some(Range {
            ancestor: ContextRef::new(tree, ancestor),
            start_trail,
            end_trail,
        })
    }

    /// The common ancestor of the range.
    pub fn ancestor(&self) -> ContextRef<'a> {
        self.ancestor
    }

    /// Position of the first token of the range.
    pub fn pos(&self) -> usize {
        let tree = self.ancestor.tree;
        let mut node = self.ancestor.id;
        for &i in &self.start_trail {
            node = tree.children_of(node)[i];
        }
        tree.pos_of(node)
    }

    /// End position of the last token of the range.
    pub fn end(&self) -> usize {
        let tree = self.ancestor.tree;
        let mut node = self.ancestor.id;
        for &i in &self.end_trail {
            node = tree.children_of(node)[i];
        }
        tree.end_of(node)
    }

    /// All tokens of the range in document order.
    pub fn tokens(&self) -> impl Iterator<Item = TokenRef<'a>> + 'a {
        let tree = self.ancestor.tree;
        let first = if self.start_trail.is_empty() {
            tree.first_token_in(self.ancestor.id)
        } else {
            let mut node = self.ancestor.id;
            for &i in &self.start_trail {
                node = tree.children_of(node)[i];
            }
            Some(node)
        };
        let last = if self.end_trail.is_empty() {
            tree.last_token_in(self.ancestor.id)
        } else {
            let mut node = self.ancestor.id;
            for &i in &self.end_trail {
                node = tree.children_of(node)[i];
            }
            Some(node)
        };
        RangeTokens {
            tree,
            next: first,
            last,
        }
    }
}

struct RangeTokens<'a> {
    tree: &'a Tree,
    next: Option<NodeId>,
    last: Option<NodeId>,
}

impl<'a> Iterator for RangeTokens<'a> {
    type Item = TokenRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = if Some(id) == self.last {
            None
        } else {
            self.tree.next_token_id(id)
        };
        Some(TokenRef::new(self.tree, id))
    }
}

// ---------------------------------------------------------------------------
// Display and dump

/// Shorten long token texts for display.
fn abbreviate(text: &str) -> String {
    if text.chars().count() > 30 {
        let head: String = text.chars().take(28).collect();
        format!("{:?}...", head)
    } else {
        format!("{:?}", text)
    }
}

impl fmt::Display for TokenRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Token {} at {}:{} ({})>",
            abbreviate(self.text()),
            self.pos(),
            self.end(),
            self.action()
        )
    }
}

impl fmt::Debug for TokenRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ContextRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.len();
        let children = if len == 1 { "child" } else { "children" };
        if self.is_empty() {
            write!(
                f,
                "<Context {} at ?-? ({} {})>",
                self.lexicon(),
                len,
                children
            )
        } else {
            write!(
                f,
                "<Context {} at {}-{} ({} {})>",
                self.lexicon(),
                self.pos(),
                self.end(),
                len,
                children
            )
        }
    }
}

impl fmt::Debug for ContextRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Token(t) => fmt::Display::fmt(t, f),
            NodeRef::Context(c) => fmt::Display::fmt(c, f),
        }
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// One box-drawing style for [`NodeRef::dump`].
pub struct DumpStyle {
    /// Continuation of an unfinished ancestor level.
    pub vert: &'static str,
    /// Blank continuation of a finished ancestor level.
    pub blank: &'static str,
    /// Branch to a non-final child.
    pub branch: &'static str,
    /// Branch to the final child.
    pub last: &'static str,
}

/// Plain ASCII pipes and backticks.
pub static DUMP_ASCII: DumpStyle = DumpStyle {
    vert: " | ",
    blank: "   ",
    branch: " |-",
    last: " `-",
};
/// Light lines with rounded corners (the default).
pub static DUMP_ROUND: DumpStyle = DumpStyle {
    vert: " \u{2502} ",
    blank: "   ",
    branch: " \u{251C}\u{2574}",
    last: " \u{2570}\u{2574}",
};
/// Light lines with square corners.
pub static DUMP_SQUARE: DumpStyle = DumpStyle {
    vert: " \u{2502} ",
    blank: "   ",
    branch: " \u{251C}\u{2574}",
    last: " \u{2514}\u{2574}",
};
/// Double lines.
pub static DUMP_DOUBLE: DumpStyle = DumpStyle {
    vert: " \u{2551} ",
    blank: "   ",
    branch: " \u{2560}\u{2550}",
    last: " \u{255A}\u{2550}",
};
/// Heavy lines.
pub static DUMP_THICK: DumpStyle = DumpStyle {
    vert: " \u{2503} ",
    blank: "   ",
    branch: " \u{2523}\u{2578}",
    last: " \u{2517}\u{2578}",
};
/// Compact, one column per level.
pub static DUMP_FLAT: DumpStyle = DumpStyle {
    vert: "\u{2502}",
    blank: " ",
    branch: "\u{251C}",
    last: "\u{2570}",
};

impl DumpStyle {
    /// Look up a style by its name: `ascii`, `round`, `square`, `double`,
    /// `thick` or `flat`.
    pub fn by_name(name: &str) -> Option<&'static DumpStyle> {
        match name {
            "ascii" => Some(&DUMP_ASCII),
            "round" => Some(&DUMP_ROUND),
            "square" => Some(&DUMP_SQUARE),
            "double" => Some(&DUMP_DOUBLE),
            "thick" => Some(&DUMP_THICK),
            "flat" => Some(&DUMP_FLAT),
            _ => None,
        }
    }

    /// The default style, `round`.
    pub fn default_style() -> &'static DumpStyle {
        &DUMP_ROUND
    }
}

/// Displayable tree rendering, created by [`NodeRef::dump`].
pub struct Dump<'a> {
    node: NodeRef<'a>,
    style: &'static DumpStyle,
}

impl Dump<'_> {
    fn write_node(
        &self,
        f: &mut fmt::Formatter<'_>,
        node: NodeRef<'_>,
        lasts: &mut Vec<bool>,
    ) -> fmt::Result {
        for (i, &is_last) in lasts.iter().enumerate() {
            let s = if i + 1 == lasts.len() {
                if is_last {
                    self.style.last
                } else {
                    self.style.branch
                }
            } else if is_last {
                self.style.blank
            } else {
                self.style.vert
            };
            f.write_str(s)?;
        }
        writeln!(f, "{}", node)?;
        if let NodeRef::Context(context) = node {
            let len = context.len();
            for (i, child) in context.children().enumerate() {
                lasts.push(i + 1 == len);
                self.write_node(f, child, lasts)?;
                lasts.pop();
            }
        }
        Ok(())
    }
}

impl fmt::Display for Dump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lasts = Vec::new();
        self.write_node(f, self.node, &mut lasts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexeme;
    use crate::stdactions::{NAME, NUMBER};

    fn no_rules() -> Vec<crate::rule::Rule> {
        Vec::new()
    }
    static ROOT_LEX: LexiconDescriptor = LexiconDescriptor::new("TreeTest", "root", no_rules);
    static SUB_LEX: LexiconDescriptor = LexiconDescriptor::new("TreeTest", "sub", no_rules);

    use crate::lexicon::LexiconDescriptor;

    fn lexeme(pos: usize, text: &str, action: Action) -> Lexeme {
        Lexeme {
            pos,
            text: text.to_string(),
            action,
        }
    }

    /// root: [a, sub[b c], d]
    fn sample_tree() -> Tree {
        let mut tree = Tree::new(Lexicon::of(&ROOT_LEX));
        let root = tree.root_id();
        tree.append_lexemes(root, &[lexeme(0, "a", *NAME)]);
        let sub = tree.new_context(root, Lexicon::of(&SUB_LEX));
        tree.append_lexemes(sub, &[lexeme(2, "b", *NUMBER)]);
        tree.append_lexemes(sub, &[lexeme(4, "c", *NUMBER)]);
        tree.append_lexemes(root, &[lexeme(6, "d", *NAME)]);
        tree
    }

    #[test]
    fn test_pos_end() {
        let tree = sample_tree();
        assert_eq!(tree.root().pos(), 0);
        assert_eq!(tree.root().end(), 7);
        let sub = tree.root().child(1).unwrap().context().unwrap();
        assert_eq!(sub.pos(), 2);
        assert_eq!(sub.end(), 5);
    }

    #[test]
    fn test_tokens_in_document_order() {
        let tree = sample_tree();
        let texts: Vec<&str> = tree.tokens().map(|t| t.text()).collect();
        assert_eq!(texts, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_find_token() {
        let tree = sample_tree();
        let root = tree.root();
        assert_eq!(root.find_token(0).unwrap().text(), "a");
        // gap between tokens: the next token to the right is found
        assert_eq!(root.find_token(1).unwrap().text(), "b");
        assert_eq!(root.find_token(4).unwrap().text(), "c");
        assert_eq!(root.find_token(6).unwrap().text(), "d");
        assert!(root.find_token(7).is_none());
    }

    #[test]
    fn test_find_token_before_after() {
        let tree = sample_tree();
        let root = tree.root();
        assert!(root.find_token_before(0).is_none());
        assert_eq!(root.find_token_before(1).unwrap().text(), "a");
        assert_eq!(root.find_token_before(4).unwrap().text(), "b");
        assert_eq!(root.find_token_before(100).unwrap().text(), "d");
        assert_eq!(root.find_token_after(0).unwrap().text(), "a");
        assert_eq!(root.find_token_after(1).unwrap().text(), "b");
        assert_eq!(root.find_token_after(5).unwrap().text(), "d");
        assert!(root.find_token_after(7).is_none());
    }

    #[test]
    fn test_find_context() {
        let tree = sample_tree();
        let root = tree.root();
        assert!(root.find_context(0).is_root());
        let ctx = root.find_context(4);
        assert_eq!(ctx.lexicon().name(), "sub");
    }

    #[test]
    fn test_navigation() {
        let tree = sample_tree();
        let a = tree.root().find_token(0).unwrap();
        let b = a.next_token().unwrap();
        assert_eq!(b.text(), "b");
        assert_eq!(b.parent().lexicon().name(), "sub");
        assert_eq!(b.previous_token().unwrap().text(), "a");
        let d = tree.root().find_token(6).unwrap();
        assert_eq!(d.previous_token().unwrap().text(), "c");
        assert!(d.next_token().is_none());
        let forward: Vec<&str> = a.forward().map(|t| t.text()).collect();
        assert_eq!(forward, vec!["b", "c", "d"]);
        let backward: Vec<&str> = d.backward().map(|t| t.text()).collect();
        assert_eq!(backward, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_ancestors() {
        let tree = sample_tree();
        let b = tree.root().find_token(2).unwrap();
        let names: Vec<&str> = b.ancestors().map(|c| c.lexicon().name()).collect();
        assert_eq!(names, vec!["sub", "root"]);
    }

    #[test]
    fn test_state_matches() {
        let tree = sample_tree();
        let b = tree.root().find_token(2).unwrap();
        let c = tree.root().find_token(4).unwrap();
        let a = tree.root().find_token(0).unwrap();
        assert!(b.state_matches(&c));
        assert!(!b.state_matches(&a));
    }

    #[test]
    fn test_group_tokens() {
        let mut tree = Tree::new(Lexicon::of(&ROOT_LEX));
        let root = tree.root_id();
        tree.append_lexemes(
            root,
            &[
                lexeme(0, "aa", *NAME),
                lexeme(2, "b", *NUMBER),
                lexeme(3, "cc", *NAME),
            ],
        );
        let first = tree.root().find_token(0).unwrap();
        let mid = tree.root().find_token(2).unwrap();
        let last = tree.root().find_token(3).unwrap();
        assert_eq!(first.group_index(), Some(0));
        assert_eq!(mid.group_index(), Some(1));
        assert_eq!(last.group_index(), Some(-2));
        assert_eq!(mid.group_start(), first);
        assert_eq!(mid.group_end(), last);
        assert_eq!(first.group_end(), last);
        assert_eq!(last.group_start(), first);
    }

    #[test]
    fn test_height() {
        let tree = sample_tree();
        assert_eq!(tree.root().height(), 2);
        let empty = Tree::new(Lexicon::of(&ROOT_LEX));
        assert_eq!(empty.root().height(), 0);
    }

    #[test]
    fn test_range_full() {
        let tree = sample_tree();
        let range = tree.root().range(0, None).unwrap();
        let texts: Vec<&str> = range.tokens().map(|t| t.text()).collect();
        assert_eq!(texts, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_range_partial() {
        let tree = sample_tree();
        let range = tree.root().range(2, Some(5)).unwrap();
        let texts: Vec<&str> = range.tokens().map(|t| t.text()).collect();
        assert_eq!(texts, vec!["b", "c"]);
        assert_eq!(range.pos(), 2);
        assert_eq!(range.end(), 5);
        // both edge tokens live in the sub context: the ancestor narrows
        assert_eq!(range.ancestor().lexicon().name(), "sub");
    }

    #[test]
    fn test_dump_styles() {
        let tree = sample_tree();
        let out = tree.root().dump(DumpStyle::by_name("ascii").unwrap()).to_string();
        assert!(out.contains("<Context TreeTest.root at 0-7 (3 children)>"));
        assert!(out.contains(" |-"));
        assert!(out.contains(" `-"));
        let round = tree.root().dump(DumpStyle::default_style()).to_string();
        assert!(round.contains("\u{251C}\u{2574}"));
        assert!(DumpStyle::by_name("nope").is_none());
    }

    #[test]
    fn test_display_forms() {
        let tree = sample_tree();
        let a = tree.root().find_token(0).unwrap();
        assert_eq!(a.to_string(), "<Token \"a\" at 0:1 (Name)>");
        let sub = tree.root().child(1).unwrap().context().unwrap();
        assert_eq!(sub.to_string(), "<Context TreeTest.sub at 2-5 (2 children)>");
    }

    #[test]
    fn test_empty_context_display() {
        let tree = Tree::new(Lexicon::of(&ROOT_LEX));
        assert_eq!(
            tree.root().to_string(),
            "<Context TreeTest.root at ?-? (0 children)>"
        );
    }

    #[test]
    fn test_shift_subtree() {
        let mut tree = sample_tree();
        let root = tree.root_id();
        tree.shift_subtree(root, 10);
        let positions: Vec<usize> = tree.tokens().map(|t| t.pos()).collect();
        assert_eq!(positions, vec![10, 12, 14, 16]);
    }

    #[test]
    fn test_move_children() {
        let mut tree = sample_tree();
        let root = tree.root_id();
        let detached = tree.new_detached_context(Lexicon::of(&SUB_LEX));
        tree.move_children(root, 1, detached);
        assert_eq!(tree.root().len(), 1);
        let moved: Vec<NodeId> = tree.children_of(detached).to_vec();
        assert_eq!(moved.len(), 2);
        assert_eq!(tree.parent_of(moved[0]), Some(detached));
    }

    #[test]
    fn test_truncate_and_free() {
        let mut tree = sample_tree();
        let root = tree.root_id();
        tree.truncate_children(root, 1);
        let texts: Vec<&str> = tree.tokens().map(|t| t.text()).collect();
        assert_eq!(texts, vec!["a"]);
        // freed slots are reused
        let before = tree.slots.len();
        tree.append_lexemes(root, &[lexeme(2, "x", *NAME)]);
        assert_eq!(tree.slots.len(), before);
    }
}
