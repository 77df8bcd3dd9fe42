//! Worker tests: update sequencing, coalescing, background builds and
//! failure reporting.

use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;

use treelex::rule::skip;
use treelex::stdactions::{BRACKET, NAME, NUMBER};
use treelex::{Lexicon, LexiconDescriptor, Rule, Worker};

fn words_rules() -> Vec<Rule> {
    vec![
        Rule::new(r"\d+", *NUMBER, vec![]),
        Rule::new(r"\w+", *NAME, vec![]),
        Rule::new(r"\s+", skip(), vec![]),
    ]
}
static WORDS: LexiconDescriptor = LexiconDescriptor::new("Work", "words", words_rules);

fn tokens_of(worker: &Worker) -> Vec<(usize, String)> {
    worker.with_root_wait(|root| {
        root.tokens()
            .map(|t| (t.pos(), t.text().to_string()))
            .collect()
    })
}

#[test]
fn test_updates_in_order() {
    let worker = Worker::new(Lexicon::of(&WORDS));
    worker.update("one", None, 0, 0, 3);
    worker.update("one two", None, 3, 0, 4);
    worker.update("one two 3", None, 7, 0, 2);
    assert_eq!(
        tokens_of(&worker),
        vec![
            (0, "one".to_string()),
            (4, "two".to_string()),
            (8, "3".to_string()),
        ]
    );
}

#[test]
fn test_reader_sees_all_prior_updates() {
    let worker = Worker::background(Lexicon::of(&WORDS));
    for i in 0..20 {
        let text: String = (0..=i).map(|n| format!("w{} ", n)).collect();
        let added = format!("w{} ", i).len();
        worker.update(&text, None, text.len() - added, 0, added);
    }
    // wait=true observes a tree consistent with every prior update
    let count = worker.with_root_wait(|root| root.tokens().count());
    assert_eq!(count, 20);
}

#[test]
fn test_with_root_none_while_busy_is_allowed() {
    // non-blocking reads may return None, but must never see a stale tree
    // once the worker reports finished
    let worker = Worker::background(Lexicon::of(&WORDS));
    worker.update("a b c", None, 0, 0, 5);
    worker.wait();
    let texts = worker
        .with_root(|root| root.tokens().map(|t| t.text().to_string()).collect::<Vec<_>>())
        .expect("idle after wait");
    assert_eq!(texts, vec!["a", "b", "c"]);
}

#[test]
fn test_tree_updated_then_finished_order() {
    let worker = Worker::new(Lexicon::of(&WORDS));
    let log = Arc::new(Mutex::new(Vec::new()));
    let updated_log = Arc::clone(&log);
    worker.on_tree_updated(move |start, end| {
        updated_log
            .lock()
            .unwrap()
            .push(format!("updated {}..{}", start, end))
    });
    let finished_log = Arc::clone(&log);
    worker.on_tree_finished(move || finished_log.lock().unwrap().push("finished".to_string()));

    worker.update("aa bb", None, 0, 0, 5);
    assert_eq!(
        log.lock().unwrap().as_slice(),
        &["updated 0..5".to_string(), "finished".to_string()]
    );
}

#[test]
fn test_failure_keeps_previous_tree() {
    fn fragile_rules() -> Vec<Rule> {
        vec![
            Rule::new(r"\w+", *NAME, vec![]),
            Rule::new(r"\s+", skip(), vec![]),
            Rule::new("!", *BRACKET, vec![Lexicon::of(&BROKEN).into()]),
        ]
    }
    fn broken_rules() -> Vec<Rule> {
        vec![Rule::new("(", *NAME, vec![])]
    }
    static FRAGILE: LexiconDescriptor = LexiconDescriptor::new("Work", "fragile", fragile_rules);
    static BROKEN: LexiconDescriptor = LexiconDescriptor::new("Work", "broken", broken_rules);

    let worker = Worker::new(Lexicon::of(&FRAGILE));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let error_log = Arc::clone(&errors);
    worker.on_error(move |e| error_log.lock().unwrap().push(e.to_string()));

    worker.update("aa bb", None, 0, 0, 5);
    assert_eq!(tokens_of(&worker).len(), 2);

    // this update reaches the lexicon with the broken pattern
    worker.update("aa bb !", None, 5, 0, 2);
    worker.wait();
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert!(worker.last_error().is_some());
    // the tree still reflects the last successful update
    let texts = worker
        .with_root(|root| root.tokens().map(|t| t.text().to_string()).collect::<Vec<_>>())
        .expect("idle");
    assert_eq!(texts, vec!["aa", "bb"]);

    // a later good update recovers
    worker.update("aa bb cc", None, 5, 2, 3);
    worker.wait();
    assert!(worker.last_error().is_none());
    assert_eq!(tokens_of(&worker).len(), 3);
}

#[test]
fn test_cancel_drops_pending_updates() {
    let worker = Worker::new(Lexicon::of(&WORDS));
    worker.update("aa", None, 0, 0, 2);
    worker.cancel();
    // the tree is still in a consistent state
    let texts = worker
        .with_root(|root| root.tokens().map(|t| t.text().to_string()).collect::<Vec<_>>())
        .expect("idle after cancel");
    assert_eq!(texts, vec!["aa"]);
}

#[test]
fn test_background_burst_of_updates() {
    let worker = Worker::background(Lexicon::of(&WORDS));
    let mut text = String::new();
    for i in 0..100 {
        let word = format!("{} ", i);
        let start = text.len();
        text.push_str(&word);
        worker.update(&text, None, start, 0, word.len());
    }
    worker.wait();
    let count = worker.with_root_wait(|root| root.tokens().count());
    assert_eq!(count, 100);
}
