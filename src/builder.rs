//! Building and incrementally rebuilding the token tree.
//!
//! [`TreeBuilder`] owns a [`Tree`] and keeps it in sync with a text.
//! [`TreeBuilder::build`] tokenizes from scratch;
//! [`TreeBuilder::rebuild`] patches the existing tree after an edit,
//! reusing every token it can:
//!
//! * **head**: lexing restarts at a safe distance left of the edit. The
//!   builder replays the events the old tree would have produced there and
//!   compares them with a fresh lexer; the longest agreeing prefix is kept.
//!   When nothing agrees it retreats further left.
//! * **tail**: the part of the old tree right of the edit is split off.
//!   When the fresh lexer reaches a preserved token at the same (shifted)
//!   position with the same open lexicons, the whole detached tail is
//!   spliced back and lexing stops.
//!
//! A rebuild gathers its whole event stream *before* touching the tree, so
//! a lexing error (or a panicking user predicate) leaves the previous tree
//! fully intact, and an interrupt costs nothing but the lexing done so far.
//!
//! Group tokens are never split: restart points and tail candidates are
//! moved to group boundaries.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::lexer::{Event, Lexeme, Lexer};
use crate::lexicon::Lexicon;
use crate::target::TargetFactory;
use crate::tree::{ContextRef, NodeId, Tree};

/// How many tokens to back up before the edit, in case a pattern match
/// could grow with more context.
const BACKUP_TOKENS: usize = 10;

/// The outcome of a (re)build: the range of text whose tokens changed.
#[derive(Debug, Clone)]
pub struct BuildResult {
    /// Start of the re-tokenized range; can be left of the edit.
    pub start: usize,
    /// End of the re-tokenized range; the rejoin position when old tail
    /// tokens were reused, the end of text otherwise.
    pub end: usize,
    /// The open lexicons at the end of the text (root excluded), or `None`
    /// when the old tail was reused so the previous value still holds.
    pub lexicons: Option<Vec<Lexicon>>,
}

/// The outcome of an interruptible rebuild.
pub(crate) enum Build {
    /// The rebuild ran to completion.
    Done(BuildResult),
    /// The interrupt flag was raised; the tree is unchanged.
    Interrupted,
}

/// Where lexing restarts relative to the old tree.
enum HeadPlan {
    /// Reparse everything; the root keeps its lexicon but loses its
    /// children.
    Full,
    /// Keep the old tree up to and including this token.
    Cut { cut_after: NodeId },
}

/// Everything a rebuild decided before mutating the tree.
struct Plan {
    head: HeadPlan,
    start_parse: usize,
    events: Vec<Event>,
    /// Tail token to splice at, with its shifted position.
    rejoin: Option<(NodeId, usize)>,
    /// The context switches of the event that hit the tail; its lexemes
    /// are duplicates of preserved tokens, but the switches still apply.
    rejoin_target: Option<crate::target::Target>,
    /// Open lexicons at end of text; `None` when the tail was reused.
    open_lexicons: Option<Vec<Lexicon>>,
    end_pos: usize,
    interrupted: bool,
}

/// Builds a tree from a text and keeps it up to date across edits.
pub struct TreeBuilder {
    tree: Tree,
    start: usize,
    end: usize,
    lexicons: Option<Vec<Lexicon>>,
}

impl TreeBuilder {
    /// A builder with an empty tree for the given root lexicon.
    pub fn new(root_lexicon: Lexicon) -> TreeBuilder {
        TreeBuilder {
            tree: Tree::new(root_lexicon),
            start: 0,
            end: 0,
            lexicons: None,
        }
    }

    /// The root context of the current tree.
    pub fn root(&self) -> ContextRef<'_> {
        self.tree.root()
    }

    /// The current tree.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Consume the builder, returning the tree.
    pub fn into_tree(self) -> Tree {
        self.tree
    }

    /// The root lexicon.
    pub fn root_lexicon(&self) -> Lexicon {
        self.tree.root_lexicon().clone()
    }

    /// Replace the root lexicon, invalidating the whole tree.
    pub fn set_root_lexicon(&mut self, root_lexicon: Lexicon) {
        self.tree.set_root_lexicon(root_lexicon);
        self.lexicons = None;
    }

    /// Start of the range changed by the last (re)build.
    pub fn start(&self) -> usize {
        self.start
    }

    /// End of the range changed by the last (re)build.
    pub fn end(&self) -> usize {
        self.end
    }

    /// The open lexicons after the last (re)build that reached the end of
    /// the text (root excluded).
    pub fn lexicons(&self) -> Option<&[Lexicon]> {
        self.lexicons.as_deref()
    }

    /// Tokenize the full text, replacing any current tree content.
    pub fn build(&mut self, text: &str) -> Result<BuildResult> {
        self.rebuild(text, 0, 0, text.len())
    }

    /// Re-tokenize after an edit at `start` that removed `removed` and
    /// added `added` characters; `text` is the new text.
    ///
    /// On error the tree is left exactly as it was.
    pub fn rebuild(
        &mut self,
        text: &str,
        start: usize,
        removed: usize,
        added: usize,
    ) -> Result<BuildResult> {
        match self.rebuild_interruptible(text, start, removed, added, None)? {
            Build::Done(result) => Ok(result),
            Build::Interrupted => unreachable!("no interrupt flag was given"),
        }
    }

    /// Like [`rebuild`](Self::rebuild), stopping cleanly at the next event
    /// boundary when `interrupt` is raised. An interrupted rebuild leaves
    /// the tree unchanged.
    pub(crate) fn rebuild_interruptible(
        &mut self,
        text: &str,
        start: usize,
        removed: usize,
        added: usize,
        interrupt: Option<&AtomicBool>,
    ) -> Result<Build> {
        // Plan first, without touching the tree: errors and interrupts
        // must not leave half-applied state behind.
        let plan = match catch_unwind(AssertUnwindSafe(|| {
            self.plan(text, start, removed, added, interrupt)
        })) {
            Ok(plan) => plan?,
            Err(payload) => {
                return Err(Error::Predicate {
                    message: panic_message(&payload),
                })
            }
        };
        if plan.interrupted {
            return Ok(Build::Interrupted);
        }
        let offset = added as isize - removed as isize;
        self.apply(plan, offset)
    }

    // -- planning (read-only) ----------------------------------------------

    fn plan(
        &self,
        text: &str,
        start: usize,
        removed: usize,
        added: usize,
        interrupt: Option<&AtomicBool>,
    ) -> Result<Plan> {
        let change_end = start + removed;
        let offset = added as isize - removed as isize;

        // Tail: the first reusable token right of the edit.
        let mut tail = if start + added < text.len() {
            TailCursor::start(&self.tree, change_end, offset)
        } else {
            None
        };

        // Head: restart point and the lexer, positioned after the part of
        // the old event stream that still agrees with the new text.
        let (head, start_parse, mut events, mut pending) = self.plan_head(text, start)?;

        let mut chain: Vec<Lexicon> = match &head {
            HeadPlan::Full => vec![self.tree.root_lexicon().clone()],
            HeadPlan::Cut { cut_after } => self.tree.ancestry_lexicons(*cut_after),
        };
        let mut buffered: Vec<Event> = Vec::new();
        let mut rejoin = None;
        let mut rejoin_target = None;

        loop {
            if let Some(flag) = interrupt {
                if flag.load(Ordering::Relaxed) {
                    return Ok(Plan {
                        head,
                        start_parse,
                        events: buffered,
                        rejoin: None,
                        rejoin_target: None,
                        open_lexicons: None,
                        end_pos: 0,
                        interrupted: true,
                    });
                }
            }
            let event = match pending.take() {
                Some(event) => event,
                None => match events.next() {
                    Some(event) => event?,
                    None => break,
                },
            };
            if let Some(target) = &event.target {
                apply_to_chain(&mut chain, target);
            }
            let mut tail_dead = false;
            if let Some(cursor) = &mut tail {
                let first_pos = event.lexemes[0].pos;
                if !cursor.advance_to(&self.tree, first_pos) {
                    tail_dead = true;
                } else if let Some((token, shifted)) = cursor.current(&self.tree) {
                    if shifted == first_pos && self.chain_matches(&chain, token) {
                        rejoin = Some((token, shifted));
                        rejoin_target = event.target;
                        break;
                    }
                }
            }
            if tail_dead {
                tail = None;
            }
            buffered.push(event);
        }

        let (open_lexicons, end_pos) = match rejoin {
            Some((_, shifted)) => (None, shifted),
            None => (
                Some(events.lexicons()[1..].to_vec()),
                text.len(),
            ),
        };
        Ok(Plan {
            head,
            start_parse,
            events: buffered,
            rejoin,
            rejoin_target,
            open_lexicons,
            end_pos,
            interrupted: false,
        })
    }

    /// Find the restart point before the edit and position a fresh lexer
    /// there, validated against the old event stream.
    ///
    /// Returns the head plan, the parse start, the running event iterator
    /// and possibly one event that was read ahead during comparison.
    #[allow(clippy::type_complexity)]
    fn plan_head<'t>(
        &self,
        text: &'t str,
        change_start: usize,
    ) -> Result<(HeadPlan, usize, crate::lexer::Events<'t>, Option<Event>)> {
        let tree = &self.tree;
        let root = tree.root_id();
        let mut start = change_start;

        while start > 0 {
            // the last token completely left of the edit, backed out of
            // any group overlapping it
            let mut last_token = match tree.find_token_before_id(root, start) {
                Some(token) => token,
                None => break,
            };
            loop {
                if tree.group_of(last_token).is_none() {
                    break;
                }
                let group_end = tree.group_end_id(last_token);
                if tree.end_of(group_end) <= start {
                    break;
                }
                let group_start = tree.group_start_id(last_token);
                match tree.previous_token_id(group_start) {
                    Some(token) => last_token = token,
                    None => return self.full_head(text),
                }
            }

            // back up some tokens; a longer match could reach the edit
            let mut start_token = last_token;
            for _ in 0..BACKUP_TOKENS {
                match tree.previous_token_id(start_token) {
                    Some(token) => start_token = token,
                    None => break,
                }
            }
            loop {
                start_token = tree.group_start_id(start_token);
                let parent = tree.parent_of(start_token).expect("token has a parent");
                let is_first = tree.children_of(parent).first() == Some(&start_token);
                if is_first && tree.lexicon_of(parent).consume() {
                    if let Some(token) = tree.previous_token_id(start_token) {
                        start_token = token;
                        continue;
                    }
                }
                break;
            }

            let has_previous = tree.previous_token_id(start_token).is_some();
            let restart_pos = if has_previous {
                tree.pos_of(start_token)
            } else {
                0
            };
            let lexer = if restart_pos > 0 {
                Lexer::new(tree.ancestry_lexicons(start_token))
            } else {
                Lexer::new([tree.root_lexicon().clone()])
            };
            let mut events = lexer.events(text, restart_pos);

            // compare the old events with the fresh ones
            let old = self.replay_events(start_token, last_token);
            let mut agreed: Option<NodeId> = None;
            let mut pending = None;
            for (old_event, ids) in &old {
                match events.next() {
                    None => break,
                    Some(Err(e)) => return Err(e),
                    Some(Ok(new_event)) => {
                        if new_event == *old_event {
                            agreed = Some(*ids.last().expect("events carry tokens"));
                        } else {
                            pending = Some(new_event);
                            break;
                        }
                    }
                }
            }
            match agreed {
                Some(cut_after) => {
                    let start_parse = tree.end_of(cut_after);
                    return Ok((HeadPlan::Cut { cut_after }, start_parse, events, pending));
                }
                None => {
                    // not even the first event matched: retreat
                    start = restart_pos;
                }
            }
        }
        self.full_head(text)
    }

    fn full_head<'t>(
        &self,
        text: &'t str,
    ) -> Result<(HeadPlan, usize, crate::lexer::Events<'t>, Option<Event>)> {
        let lexer = Lexer::new([self.tree.root_lexicon().clone()]);
        Ok((HeadPlan::Full, 0, lexer.events(text, 0), None))
    }

    /// Yield the events the old tree produced from `start_token` through
    /// `last_token`, with the token ids belonging to each event.
    fn replay_events(&self, start_token: NodeId, last_token: NodeId) -> Vec<(Event, Vec<NodeId>)> {
        let tree = &self.tree;
        let mut factory = TargetFactory::new();

        // A first token outside the root context was reached through
        // zero-width switches or a consume push: replay that state change.
        let parent = tree.parent_of(start_token).expect("token has a parent");
        if tree.children_of(parent).first() == Some(&start_token)
            && tree.parent_of(parent).is_some()
            && tree.previous_token_id(start_token).is_none()
        {
            for lexicon in &tree.ancestry_lexicons(start_token)[1..] {
                factory.push(lexicon.clone());
            }
        }

        let mut out = Vec::new();
        let mut node = start_token;
        'walk: loop {
            // the token run of one event: a whole group, or one token
            let parent = tree.parent_of(node).expect("token has a parent");
            let children = tree.children_of(parent);
            let mut index = tree.parent_index(node);
            let mut ids = Vec::with_capacity(1);
            loop {
                let id = children[index];
                ids.push(id);
                match tree.group_of(id) {
                    Some(g) if g >= 0 => index += 1,
                    _ => break,
                }
            }
            let lexemes: Vec<Lexeme> = ids
                .iter()
                .map(|&id| Lexeme {
                    pos: tree.pos_of(id),
                    text: tree.text_of(id).to_string(),
                    action: tree.action_of(id),
                })
                .collect();
            let done = ids.contains(&last_token);
            out.push((
                Event {
                    target: factory.take(),
                    lexemes,
                },
                ids,
            ));
            if done {
                break;
            }

            // advance to the next token, tracking context changes
            let mut current = *out.last().expect("just pushed").1.last().expect("non-empty");
            loop {
                let parent = match tree.parent_of(current) {
                    Some(parent) => parent,
                    None => break 'walk,
                };
                let index = tree.parent_index(current);
                let mut found = None;
                for &sibling in &tree.children_of(parent)[index + 1..] {
                    if tree.is_token(sibling) {
                        found = Some(sibling);
                        break;
                    }
                    // descend into the context, to its first token
                    if let Some(token) = tree.first_token_in(sibling) {
                        let mut n = sibling;
                        while tree.is_context(n) {
                            factory.push(tree.lexicon_of(n).clone());
                            n = tree.children_of(n)[0];
                        }
                        found = Some(token);
                        break;
                    }
                }
                match found {
                    Some(token) => {
                        node = token;
                        continue 'walk;
                    }
                    None => {
                        factory.pop();
                        current = parent;
                    }
                }
            }
        }
        out
    }

    /// Whether the open lexicon chain matches a token's ancestry, compared
    /// by identity.
    fn chain_matches(&self, chain: &[Lexicon], token: NodeId) -> bool {
        let ancestry = self.tree.ancestry_lexicons(token);
        chain.len() == ancestry.len()
            && chain.iter().zip(ancestry.iter()).all(|(a, b)| a.same(b))
    }

    // -- application (infallible) ------------------------------------------

    fn apply(&mut self, plan: Plan, offset: isize) -> Result<Build> {
        // Split the tail off before cutting: the cut would free it.
        let mirror = plan
            .rejoin
            .map(|(token, _)| self.split_tail(token));

        // Cut the old tree after the last agreeing token.
        let mut open: Vec<NodeId> = match plan.head {
            HeadPlan::Full => {
                self.tree.clear_root();
                vec![self.tree.root_id()]
            }
            HeadPlan::Cut { cut_after } => {
                let mut node = cut_after;
                let mut chain = vec![];
                while let Some(parent) = self.tree.parent_of(node) {
                    let index = self.tree.parent_index(node);
                    self.tree.truncate_children(parent, index + 1);
                    chain.push(parent);
                    node = parent;
                }
                chain.reverse();
                chain
            }
        };

        // Stream the new events into the tree.
        for event in &plan.events {
            if let Some(target) = &event.target {
                self.apply_target(&mut open, target);
            }
            let top = *open.last().expect("root always open");
            self.tree.append_lexemes(top, &event.lexemes);
        }

        match mirror {
            Some(mirrors) => {
                // the context switches right before the tail still apply
                if let Some(target) = &plan.rejoin_target {
                    self.apply_target(&mut open, target);
                }
                // splice the detached tail into the open contexts
                self.tree.shift_subtree(mirrors[0], offset);
                debug_assert_eq!(mirrors.len(), open.len());
                for (i, &m) in mirrors.iter().enumerate().rev() {
                    let from = if i + 1 == mirrors.len() { 0 } else { 1 };
                    if let Some(&dst) = open.get(i) {
                        self.tree.move_children(m, from, dst);
                    }
                }
                self.tree.free_subtree(mirrors[0]);
            }
            None => {
                // unwind contexts that ended up empty
                while open.len() > 1 {
                    let top = *open.last().expect("len checked");
                    if self.tree.children_of(top).is_empty() {
                        open.pop();
                        self.tree.detach(top);
                        self.tree.free_node(top);
                    } else {
                        break;
                    }
                }
                self.lexicons = plan.open_lexicons;
            }
        }

        self.start = plan.start_parse;
        self.end = plan.end_pos;
        Ok(Build::Done(BuildResult {
            start: self.start,
            end: self.end,
            lexicons: self.lexicons.clone(),
        }))
    }

    /// Pop and push contexts per an event target. A popped context that
    /// ended up empty is deleted from its parent.
    fn apply_target(&mut self, open: &mut Vec<NodeId>, target: &crate::target::Target) {
        for _ in 0..-target.pop {
            if open.len() > 1 {
                let popped = open.pop().expect("len checked");
                if self.tree.children_of(popped).is_empty() {
                    self.tree.detach(popped);
                    self.tree.free_node(popped);
                }
            }
        }
        for lexicon in &target.push {
            let top = *open.last().expect("root always open");
            open.push(self.tree.new_context(top, lexicon.clone()));
        }
    }

    /// Split everything from `token` to the end of the tree into a
    /// detached mirror of its context ancestry. Returns the mirror chain,
    /// root first; the deepest mirror context starts with `token`.
    fn split_tail(&mut self, token: NodeId) -> Vec<NodeId> {
        let mut ancestors = self.tree.ancestor_ids(token);
        ancestors.reverse(); // root first

        let mut mirrors = Vec::with_capacity(ancestors.len());
        for (i, &old) in ancestors.iter().enumerate() {
            let lexicon = self.tree.lexicon_of(old).clone();
            let mirror = if i == 0 {
                self.tree.new_detached_context(lexicon)
            } else {
                let parent = mirrors[i - 1];
                self.tree.new_context(parent, lexicon)
            };
            mirrors.push(mirror);
        }
        // move the token and everything right of it, level by level
        let token_index = self.tree.parent_index(token);
        let deepest = *ancestors.last().expect("token has ancestors");
        self.tree
            .move_children(deepest, token_index, *mirrors.last().expect("non-empty"));
        for i in (0..ancestors.len() - 1).rev() {
            let path_child = ancestors[i + 1];
            let index = self.tree.parent_index(path_child);
            self.tree.move_children(ancestors[i], index + 1, mirrors[i]);
        }
        mirrors
    }
}

/// Walks the reusable tokens right of the edit, in document order, skipping
/// tokens that do not start a group.
struct TailCursor {
    current: NodeId,
    offset: isize,
}

impl TailCursor {
    /// The cursor at the first reusable token with `pos >= change_end`.
    fn start(tree: &Tree, change_end: usize, offset: isize) -> Option<TailCursor> {
        let mut token = tree.find_token_after_id(tree.root_id(), change_end)?;
        while matches!(tree.group_of(token), Some(g) if g != 0) {
            token = tree.next_token_id(token)?;
        }
        Some(TailCursor {
            current: token,
            offset,
        })
    }

    /// Advance until the shifted position is at least `min_pos`; false when
    /// the tail ran out.
    fn advance_to(&mut self, tree: &Tree, min_pos: usize) -> bool {
        loop {
            let shifted = (tree.pos_of(self.current) as isize + self.offset) as usize;
            if shifted >= min_pos {
                return true;
            }
            let mut next = match tree.next_token_id(self.current) {
                Some(next) => next,
                None => return false,
            };
            loop {
                match tree.group_of(next) {
                    Some(g) if g != 0 => match tree.next_token_id(next) {
                        Some(n) => next = n,
                        None => return false,
                    },
                    _ => break,
                }
            }
            self.current = next;
        }
    }

    /// The current candidate and its shifted position.
    fn current(&self, tree: &Tree) -> Option<(NodeId, usize)> {
        let shifted = (tree.pos_of(self.current) as isize + self.offset) as usize;
        Some((self.current, shifted))
    }
}

/// Apply an event target to a lexicon chain, mirroring what the tree
/// mutation will do.
fn apply_to_chain(chain: &mut Vec<Lexicon>, target: &crate::target::Target) {
    if target.pop != 0 {
        let keep = (chain.len() as i32 + target.pop).max(1) as usize;
        chain.truncate(keep);
    }
    chain.extend(target.push.iter().cloned());
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
