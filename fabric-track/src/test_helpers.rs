// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Helpers for testing the output of the _track_ macros.
//!
//! A [`TestTracker`] keeps every event in memory so that a test can check
//! them with [`check_and_clear`].

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;

use crate::{Tag, Track};

/// A tracker that keeps track events.
pub struct TestTracker {
    events: Mutex<Vec<String>>,

    unique_tag: AtomicU64,
}

impl TestTracker {
    /// Create a new [`Tracker`](crate::Tracker) for the tests.
    #[must_use]
    pub fn new(initial_tag: u64) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            unique_tag: AtomicU64::new(initial_tag),
        }
    }

    fn add_event(&self, event: String) {
        println!("{event}");
        self.events.lock().unwrap().push(event);
    }

    /// Return a copy of the events seen since the last clear.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl Track for TestTracker {
    fn unique_tag(&self) -> Tag {
        Tag(self.unique_tag.fetch_add(1, Ordering::SeqCst))
    }

    fn is_entity_enabled(&self, _tag: Tag, _level: log::Level) -> bool {
        true
    }

    fn add_entity(&self, _tag: Tag, _entity_name: &str) {}

    fn enter(&self, tag: Tag, object: Tag) {
        self.add_event(format!("{tag}: {object} entered"));
    }

    fn exit(&self, tag: Tag, object: Tag) {
        self.add_event(format!("{tag}: {object} exited"));
    }

    fn create(&self, created_by: Tag, tag: Tag, num_bytes: usize, name: &str) {
        self.add_event(format!(
            "{created_by}: created {tag}, {name}, {num_bytes} bytes"
        ));
    }

    fn destroy(&self, destroyed_by: Tag, tag: Tag) {
        self.add_event(format!("{destroyed_by}: destroyed {tag}"));
    }

    fn log(&self, tag: Tag, level: log::Level, msg: std::fmt::Arguments) {
        self.add_event(format!("{tag}:{level}: {msg}"));
    }

    fn time(&self, set_by: Tag, cycle: u64) {
        self.add_event(format!("{set_by}: set time to cycle {cycle}"));
    }

    fn shutdown(&self) {}
}

/// Create a [`TestTracker`] and the [`Tracker`](crate::Tracker) that shares
/// it.
///
/// # Examples
///
/// ```
/// use fabric_track::test_helpers;
///
/// let (test_tracker, tracker) = fabric_track::test_init!(10);
/// let top = fabric_track::entity::toplevel(&tracker, "top");
/// test_helpers::check_and_clear(&test_tracker, &["0: created 10, top, 0 bytes"]);
/// ```
#[macro_export]
macro_rules! test_init {
    ($start_tag:expr) => {{
        let test_tracker = std::sync::Arc::new($crate::test_helpers::TestTracker::new($start_tag));
        let tracker: $crate::Tracker = test_tracker.clone();
        (test_tracker, tracker)
    }};
}

/// Check and clear the _trace_ and _log_ output
///
/// Asserts that the events seen since creation, or since the last call,
/// match the `expected` regular expressions one-to-one and in order. The
/// recorded events are then cleared.
pub fn check_and_clear(tracker: &TestTracker, expected: &[&str]) {
    let mut events = tracker.events.lock().unwrap();

    println!("Checking {:?} matches {:?}", expected, *events);
    assert_eq!(expected.len(), events.len());

    for (i, (log_expect, actual)) in expected.iter().zip(events.iter()).enumerate() {
        let re = Regex::new(log_expect).unwrap();
        println!("Checking {i}: {log_expect:?} matches {actual:?}");
        assert!(re.is_match(actual));
    }

    events.clear();
}
