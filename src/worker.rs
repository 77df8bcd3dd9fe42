//! The Worker runs a tree builder as text updates come in.
//!
//! A [`Worker`] owns a [`TreeBuilder`] and serializes updates to it.
//! Updates arriving while a build runs are coalesced into one pending
//! change set; the running build is interrupted at the next event boundary
//! and restarted with the merged changes. Building can run on the calling
//! thread or on a background thread.
//!
//! Listeners can subscribe to:
//!
//! * `tree_updated(start, end)` — one coalesced batch finished;
//! * `tree_finished` — all pending updates are processed;
//! * `error` — an update failed; the tree kept its previous state.
//!
//! Readers use [`Worker::with_root`] (non-blocking) or
//! [`Worker::with_root_wait`] to access a tree that is guaranteed complete.
//!
//! The worker owns the only lock in the crate. The lock guards the pending
//! changes, the busy flag and the callback lists; it is never held while
//! lexing runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::builder::{Build, BuildResult, TreeBuilder};
use crate::error::Error;
use crate::lexicon::Lexicon;
use crate::tree::ContextRef;

type UpdatedCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;
type FinishedCallback = Arc<dyn Fn() + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;
type OneShot = Box<dyn FnOnce() + Send>;

/// Pending changes to a text, coalesced into a single change set.
///
/// Merging a new edit widens the changed region and keeps the removed and
/// added counts consistent with applying both edits in order.
#[derive(Debug, Default, Clone)]
pub struct Changes {
    /// The newest full text.
    pub text: String,
    /// A requested root lexicon change, if any.
    pub root_lexicon: Option<Lexicon>,
    /// Start of the changed region; `None` when no text change is pending.
    pub start: Option<usize>,
    /// Number of characters removed at `start`.
    pub removed: usize,
    /// Number of characters added at `start`.
    pub added: usize,
}

impl Changes {
    /// No pending changes.
    pub fn new() -> Changes {
        Changes::default()
    }

    /// Merge a new text change with the pending ones.
    pub fn add_change(&mut self, text: &str, start: usize, removed: usize, added: usize) {
        self.text.clear();
        self.text.push_str(text);
        let (old_start, old_added) = match self.start {
            None => {
                self.start = Some(start);
                self.removed = removed;
                self.added = added;
                return;
            }
            Some(s) => (s, self.added),
        };
        // offset between the new edit and the pending region
        let offset = if start + removed < old_start {
            old_start - start - removed
        } else if start > old_start + old_added {
            start - old_start - old_added
        } else {
            0
        };
        // the part of the removal that overlaps the pending addition
        let overlap_start = start.max(old_start);
        let overlap_end = (start + removed).min(old_start + old_added);
        let overlap = overlap_end.saturating_sub(overlap_start) as isize;

        let correction = offset as isize - overlap;
        self.start = Some(old_start.min(start));
        self.removed = (self.removed as isize + removed as isize + correction).max(0) as usize;
        self.added = (self.added as isize + added as isize + correction).max(0) as usize;
    }

    /// Record a root lexicon change.
    pub fn add_root_lexicon(&mut self, text: &str, root_lexicon: Lexicon) {
        self.text.clear();
        self.text.push_str(text);
        self.root_lexicon = Some(root_lexicon);
    }

    /// Whether anything is pending.
    pub fn has_changes(&self) -> bool {
        self.start.is_some() || self.root_lexicon.is_some()
    }

    /// Map a position from before these changes to after them.
    pub fn new_position(&self, pos: usize) -> usize {
        match self.start {
            None => pos,
            Some(start) => {
                if pos < start {
                    pos
                } else if pos < start + self.removed {
                    start + self.added
                } else {
                    pos - self.removed + self.added
                }
            }
        }
    }
}

struct State {
    builder: Option<TreeBuilder>,
    changes: Changes,
    busy: bool,
    /// Set by `cancel`, so an interrupted batch is dropped instead of
    /// retried with merged changes.
    cancelled: bool,
    updated_callbacks: Vec<UpdatedCallback>,
    finished_callbacks: Vec<FinishedCallback>,
    error_callbacks: Vec<ErrorCallback>,
    oneshots: Vec<OneShot>,
    last_error: Option<Error>,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    interrupt: AtomicBool,
    background: bool,
}

/// Serializes text updates to a [`TreeBuilder`] and publishes completion
/// events.
pub struct Worker {
    shared: Arc<Shared>,
}

impl Worker {
    /// A worker building on the calling thread.
    pub fn new(root_lexicon: Lexicon) -> Worker {
        Worker::with_builder(TreeBuilder::new(root_lexicon), false)
    }

    /// A worker building on a background thread.
    pub fn background(root_lexicon: Lexicon) -> Worker {
        Worker::with_builder(TreeBuilder::new(root_lexicon), true)
    }

    fn with_builder(builder: TreeBuilder, background: bool) -> Worker {
        Worker {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    builder: Some(builder),
                    changes: Changes::new(),
                    busy: false,
                    cancelled: false,
                    updated_callbacks: Vec::new(),
                    finished_callbacks: Vec::new(),
                    error_callbacks: Vec::new(),
                    oneshots: Vec::new(),
                    last_error: None,
                }),
                cond: Condvar::new(),
                interrupt: AtomicBool::new(false),
                background,
            }),
        }
    }

    /// Update the text, optionally changing the root lexicon.
    ///
    /// `start`, `removed` and `added` describe the edit that turned the
    /// previous text into `text`. Updates submitted while a build is in
    /// progress are merged and processed in order.
    pub fn update(
        &self,
        text: &str,
        root_lexicon: Option<Lexicon>,
        start: usize,
        removed: usize,
        added: usize,
    ) {
        let start_job = {
            let mut state = self.shared.state.lock().unwrap();
            if let Some(root_lexicon) = root_lexicon {
                state.changes.add_root_lexicon(text, root_lexicon);
            }
            state.changes.add_change(text, start, removed, added);
            if state.busy {
                // the running build restarts with the merged changes
                self.shared.interrupt.store(true, Ordering::Relaxed);
                false
            } else {
                state.busy = true;
                true
            }
        };
        if start_job {
            self.run();
        }
    }

    /// Replace the whole text.
    pub fn set_text(&self, text: &str) {
        let removed = {
            let state = self.shared.state.lock().unwrap();
            state
                .builder
                .as_ref()
                .map(|b| b.root().end())
                .unwrap_or(0)
        };
        self.update(text, None, 0, removed, text.len());
    }

    /// Drop pending updates and stop the current build at the next event
    /// boundary. The tree keeps its last consistent state.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.changes = Changes::new();
        state.cancelled = true;
        self.shared.interrupt.store(true, Ordering::Relaxed);
    }

    /// Block until no update is in flight.
    pub fn wait(&self) {
        let state = self.shared.state.lock().unwrap();
        let _unused = self
            .shared
            .cond
            .wait_while(state, |state| state.busy)
            .unwrap();
    }

    /// Run `f` on the root context if the tree is currently complete;
    /// `None` while an update is in flight.
    pub fn with_root<R>(&self, f: impl FnOnce(ContextRef) -> R) -> Option<R> {
        let state = self.shared.state.lock().unwrap();
        if state.busy {
            return None;
        }
        state.builder.as_ref().map(|b| f(b.root()))
    }

    /// Run `f` on the root context, blocking until all pending updates
    /// submitted before this call are processed.
    pub fn with_root_wait<R>(&self, f: impl FnOnce(ContextRef) -> R) -> R {
        let state = self.shared.state.lock().unwrap();
        let state = self
            .shared
            .cond
            .wait_while(state, |state| state.busy)
            .unwrap();
        f(state.builder.as_ref().expect("builder present when idle").root())
    }

    /// Register a one-shot callback that fires when the current updates
    /// are done; fires immediately when the worker is idle.
    pub fn when_done(&self, callback: impl FnOnce() + Send + 'static) {
        let run_now = {
            let mut state = self.shared.state.lock().unwrap();
            if state.busy {
                state.oneshots.push(Box::new(callback));
                None
            } else {
                Some(callback)
            }
        };
        if let Some(callback) = run_now {
            callback();
        }
    }

    /// Subscribe to `tree_updated(start, end)`, fired once per finished
    /// batch.
    pub fn on_tree_updated(&self, callback: impl Fn(usize, usize) + Send + Sync + 'static) {
        let mut state = self.shared.state.lock().unwrap();
        state.updated_callbacks.push(Arc::new(callback));
    }

    /// Subscribe to `tree_finished`, fired when all pending updates are
    /// processed.
    pub fn on_tree_finished(&self, callback: impl Fn() + Send + Sync + 'static) {
        let mut state = self.shared.state.lock().unwrap();
        state.finished_callbacks.push(Arc::new(callback));
    }

    /// Subscribe to build failures. A failed update leaves the tree at its
    /// previous consistent state.
    pub fn on_error(&self, callback: impl Fn(&Error) + Send + Sync + 'static) {
        let mut state = self.shared.state.lock().unwrap();
        state.error_callbacks.push(Arc::new(callback));
    }

    /// The error of the last failed update, if any.
    pub fn last_error(&self) -> Option<Error> {
        self.shared.state.lock().unwrap().last_error.clone()
    }

    fn run(&self) {
        let shared = Arc::clone(&self.shared);
        if self.shared.background {
            thread::spawn(move || process(&shared));
        } else {
            process(&shared);
        }
    }
}

/// Drain the pending changes, batch by batch. Runs with the state lock
/// released while lexing.
fn process(shared: &Arc<Shared>) {
    loop {
        // take the work out of the shared state
        let (mut builder, changes) = {
            let mut state = shared.state.lock().unwrap();
            let changes = std::mem::take(&mut state.changes);
            if !changes.has_changes() {
                finish(shared, state);
                return;
            }
            shared.interrupt.store(false, Ordering::Relaxed);
            state.cancelled = false;
            let builder = state.builder.take().expect("builder present");
            (builder, changes)
        };

        let result = run_batch(&mut builder, &changes, &shared.interrupt);

        // put the builder back and publish what happened
        let callbacks = {
            let mut state = shared.state.lock().unwrap();
            state.builder = Some(builder);
            match &result {
                Ok(Some(r)) => {
                    state.last_error = None;
                    Some((r.start, r.end, state.updated_callbacks.clone()))
                }
                Ok(None) => {
                    // Interrupted: the batch left the tree untouched, so
                    // its changes are still owed — put them back in front
                    // of whatever arrived meanwhile (unless cancelled).
                    if state.cancelled {
                        state.cancelled = false;
                    } else {
                        let newer = std::mem::take(&mut state.changes);
                        let mut combined = changes.clone();
                        if let Some(root_lexicon) = newer.root_lexicon {
                            combined.add_root_lexicon(&newer.text, root_lexicon);
                        }
                        if let Some(start) = newer.start {
                            combined.add_change(&newer.text, start, newer.removed, newer.added);
                        }
                        state.changes = combined;
                    }
                    None
                }
                Err(e) => {
                    state.last_error = Some(e.clone());
                    let error_callbacks = state.error_callbacks.clone();
                    let e = e.clone();
                    drop(state);
                    for callback in &error_callbacks {
                        callback(&e);
                    }
                    None
                }
            }
        };
        if let Some((start, end, callbacks)) = callbacks {
            for callback in &callbacks {
                callback(start, end);
            }
        }
    }
}

/// Run one coalesced batch.
fn run_batch(
    builder: &mut TreeBuilder,
    changes: &Changes,
    interrupt: &AtomicBool,
) -> Result<Option<BuildResult>, Error> {
    if let Some(root_lexicon) = &changes.root_lexicon {
        // A new root lexicon invalidates the tree: full build. Runs to
        // completion, as the old tree is gone the moment the root changes.
        builder.set_root_lexicon(root_lexicon.clone());
        let result = builder.rebuild(&changes.text, 0, 0, changes.text.len())?;
        Ok(Some(result))
    } else if let Some(start) = changes.start {
        match builder.rebuild_interruptible(
            &changes.text,
            start,
            changes.removed,
            changes.added,
            Some(interrupt),
        )? {
            Build::Done(result) => Ok(Some(result)),
            Build::Interrupted => Ok(None),
        }
    } else {
        Ok(None)
    }
}

/// Mark the worker idle and fire the finished callbacks.
fn finish(shared: &Arc<Shared>, mut state: std::sync::MutexGuard<'_, State>) {
    state.busy = false;
    let finished = state.finished_callbacks.clone();
    let oneshots = std::mem::take(&mut state.oneshots);
    drop(state);
    shared.cond.notify_all();
    for callback in &finished {
        callback();
    }
    for callback in oneshots {
        callback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::LexiconDescriptor;
    use crate::rule::{skip, Rule};
    use crate::stdactions::{NAME, NUMBER};

    fn rules() -> Vec<Rule> {
        vec![
            Rule::new(r"\d+", *NUMBER, vec![]),
            Rule::new(r"\w+", *NAME, vec![]),
            Rule::new(r"\s+", skip(), vec![]),
        ]
    }
    static WORDS: LexiconDescriptor = LexiconDescriptor::new("WorkerTest", "words", rules);

    #[test]
    fn test_update_and_read() {
        let worker = Worker::new(Lexicon::of(&WORDS));
        worker.update("ab 12", None, 0, 0, 5);
        let texts =
            worker.with_root(|root| root.tokens().map(|t| t.text().to_string()).collect::<Vec<_>>());
        assert_eq!(texts.unwrap(), vec!["ab", "12"]);
    }

    #[test]
    fn test_updated_event_carries_range() {
        let worker = Worker::new(Lexicon::of(&WORDS));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        worker.on_tree_updated(move |start, end| log.lock().unwrap().push((start, end)));
        worker.update("ab 12", None, 0, 0, 5);
        assert_eq!(seen.lock().unwrap().as_slice(), &[(0, 5)]);
    }

    #[test]
    fn test_background_worker_waits() {
        let worker = Worker::background(Lexicon::of(&WORDS));
        worker.update("one 2 three", None, 0, 0, 11);
        worker.wait();
        let count = worker.with_root_wait(|root| root.tokens().count());
        assert_eq!(count, 3);
    }

    #[test]
    fn test_finished_fires_once_after_coalescing() {
        let worker = Worker::new(Lexicon::of(&WORDS));
        let fired = Arc::new(Mutex::new(0));
        let log = Arc::clone(&fired);
        worker.on_tree_finished(move || *log.lock().unwrap() += 1);
        worker.update("a", None, 0, 0, 1);
        assert_eq!(*fired.lock().unwrap(), 1);
        worker.update("ab", None, 1, 0, 1);
        assert_eq!(*fired.lock().unwrap(), 2);
    }

    #[test]
    fn test_when_done_fires_immediately_when_idle() {
        let worker = Worker::new(Lexicon::of(&WORDS));
        let fired = Arc::new(Mutex::new(false));
        let log = Arc::clone(&fired);
        worker.when_done(move || *log.lock().unwrap() = true);
        assert!(*fired.lock().unwrap());
    }

    #[test]
    fn test_set_text_replaces() {
        let worker = Worker::new(Lexicon::of(&WORDS));
        worker.set_text("aa bb");
        worker.set_text("c");
        let texts =
            worker.with_root_wait(|root| root.tokens().map(|t| t.text().to_string()).collect::<Vec<_>>());
        assert_eq!(texts, vec!["c"]);
    }

    #[test]
    fn test_root_lexicon_change_triggers_full_build() {
        fn other_rules() -> Vec<Rule> {
            vec![Rule::new(r"\S+", *NAME, vec![]), Rule::new(r"\s+", skip(), vec![])]
        }
        static OTHER: LexiconDescriptor = LexiconDescriptor::new("WorkerTest", "other", other_rules);
        let worker = Worker::new(Lexicon::of(&WORDS));
        worker.set_text("a 1");
        worker.update("a 1", Some(Lexicon::of(&OTHER)), 0, 0, 0);
        worker.with_root_wait(|root| {
            assert_eq!(root.lexicon().name(), "other");
            assert_eq!(root.tokens().count(), 2);
        });
    }

    // -- Changes merging ---------------------------------------------------

    #[test]
    fn test_changes_single() {
        let mut c = Changes::new();
        c.add_change("hello", 1, 2, 3);
        assert_eq!(c.start, Some(1));
        assert_eq!(c.removed, 2);
        assert_eq!(c.added, 3);
    }

    #[test]
    fn test_changes_merge_disjoint_after() {
        let mut c = Changes::new();
        // "aaaa" -> replace 0..1 by "bb" -> "bbaaa"
        c.add_change("bbaaa", 0, 1, 2);
        // then append at 5
        c.add_change("bbaaax", 5, 0, 1);
        assert_eq!(c.start, Some(0));
        // everything from 0 to the end of the second edit is covered
        assert_eq!(c.new_position(0), 0);
        assert!(c.has_changes());
    }

    #[test]
    fn test_changes_merge_overlapping() {
        let mut c = Changes::new();
        c.add_change("xxxx", 1, 1, 1);
        c.add_change("xxyx", 2, 1, 1);
        assert_eq!(c.start, Some(1));
        assert_eq!(c.removed, 2);
        assert_eq!(c.added, 2);
    }

    #[test]
    fn test_new_position_maps_through_edit() {
        let mut c = Changes::new();
        c.add_change("text", 2, 3, 1);
        assert_eq!(c.new_position(1), 1);
        assert_eq!(c.new_position(3), 3); // inside removed: maps to end of added
        assert_eq!(c.new_position(10), 8);
    }
}
