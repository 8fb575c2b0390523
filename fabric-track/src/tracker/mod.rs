// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Define the [`Track`] trait and the [`Tracker`]s that implement it.

/// Include the /dev/null tracker.
pub mod dev_null;
/// Include the text-based tracker.
pub mod text;

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub use dev_null::DevNullTracker;
use regex::Regex;
pub use text::TextTracker;

use crate::{ROOT, Tag, TraceState, Writer};

/// This is the interface that is supported by all [`Tracker`]s.
pub trait Track {
    /// Allocate a new global tag
    fn unique_tag(&self) -> Tag;

    /// Determine whether an event at `level` from the entity is emitted.
    fn is_entity_enabled(&self, tag: Tag, level: log::Level) -> bool;

    /// Register an entity so that its enables can be determined by name.
    fn add_entity(&self, tag: Tag, entity_name: &str);

    /// Track when an object with the given tag arrives.
    fn enter(&self, tag: Tag, object: Tag);

    /// Track when an object with the given tag leaves.
    fn exit(&self, tag: Tag, object: Tag);

    /// Track when an object with the given tag is created.
    fn create(&self, created_by: Tag, tag: Tag, num_bytes: usize, name: &str);

    /// Track when an object with the given tag is destroyed.
    fn destroy(&self, destroyed_by: Tag, tag: Tag);

    /// Track a log message of the given level.
    fn log(&self, tag: Tag, level: log::Level, msg: std::fmt::Arguments);

    /// Advance the time to `cycle`.
    fn time(&self, set_by: Tag, cycle: u64);

    /// Flush any buffered output.
    fn shutdown(&self);
}

/// The type of a [`Tracker`] that is shared across entities.
pub type Tracker = Arc<dyn Track + Send + Sync>;

/// Create a [`Tracker`] that prints _log_ events at `level` and above to
/// `stdout`.
pub fn stdout_tracker(level: log::Level) -> Tracker {
    let entity_manager = EntityManager::new(TraceState::Disabled, level);
    let stdout_writer = Box::new(std::io::BufWriter::new(io::stdout()));
    let tracker: Tracker = Arc::new(TextTracker::new(entity_manager, stdout_writer));
    tracker
}

/// Create a [`Tracker`] that writes events to `writer` using an already
/// configured [`EntityManager`].
pub fn text_tracker(entity_manager: EntityManager, writer: Writer) -> Tracker {
    let tracker: Tracker = Arc::new(TextTracker::new(entity_manager, writer));
    tracker
}

/// Create a [`Tracker`] that suppresses all track events.
pub fn dev_null_tracker() -> Tracker {
    let tracker: Tracker = Arc::new(DevNullTracker {});
    tracker
}

/// The [`EntityManager`] is responsible for determining entity log / trace
/// enable states.
///
/// Enables are resolved once, when an entity is added, by matching its full
/// name against the filters in the order they were added. The first match
/// wins.
///
/// This manager is also used to allocate unique [`Tag`] values.
pub struct EntityManager {
    default_trace_enabled: bool,
    default_log_level: log::Level,

    /// List of regular expressions mapping entity names to trace
    /// enable/disable.
    regex_to_trace_enabled: Vec<(Regex, bool)>,

    /// List of regular expressions mapping entity names to log levels.
    regex_to_log_level: Vec<(Regex, log::Level)>,

    /// Resolved enables for every entity seen.
    entity_enables: Mutex<HashMap<Tag, (bool, log::Level)>>,

    unique_tag: AtomicU64,
}

impl EntityManager {
    /// Constructor with [`TraceState`] and [`log::Level`]
    #[must_use]
    pub fn new(default_trace_enabled: TraceState, default_log_level: log::Level) -> Self {
        Self {
            default_trace_enabled: default_trace_enabled == TraceState::Enabled,
            default_log_level,
            regex_to_trace_enabled: Vec::new(),
            regex_to_log_level: Vec::new(),
            entity_enables: Mutex::new(HashMap::new()),
            unique_tag: AtomicU64::new(ROOT.0 + 1),
        }
    }

    fn unique_tag(&self) -> Tag {
        Tag(self.unique_tag.fetch_add(1, Ordering::SeqCst))
    }

    fn trace_enabled_for(&self, entity_name: &str) -> bool {
        for (regex, enabled) in &self.regex_to_trace_enabled {
            if regex.is_match(entity_name) {
                return *enabled;
            }
        }
        self.default_trace_enabled
    }

    fn log_level_for(&self, entity_name: &str) -> log::Level {
        for (regex, level) in &self.regex_to_log_level {
            if regex.is_match(entity_name) {
                return *level;
            }
        }
        self.default_log_level
    }

    fn add_entity(&self, tag: Tag, entity_name: &str) {
        let enables = (
            self.trace_enabled_for(entity_name),
            self.log_level_for(entity_name),
        );
        self.entity_enables.lock().unwrap().insert(tag, enables);
    }

    fn is_enabled(&self, tag: Tag, level: log::Level) -> bool {
        let enables = self.entity_enables.lock().unwrap();
        let (trace_enabled, log_level) = enables
            .get(&tag)
            .copied()
            .unwrap_or((self.default_trace_enabled, self.default_log_level));

        if level == log::Level::Trace && trace_enabled {
            return true;
        }
        level <= log_level
    }

    /// Add a log filter regular expression.
    ///
    /// # Example
    ///
    /// ```rust
    /// use fabric_track::TraceState;
    /// use fabric_track::tracker::EntityManager;
    /// let mut manager = EntityManager::new(TraceState::Disabled, log::Level::Warn);
    /// manager.add_log_filter(".*producer.*", log::Level::Trace);
    /// ```
    pub fn add_log_filter(&mut self, regex_str: &str, level: log::Level) {
        match Regex::new(regex_str) {
            Ok(regex) => self.regex_to_log_level.push((regex, level)),
            Err(e) => panic!("Failed to parse regex {regex_str}:\n{e}\n"),
        }
    }

    /// Add a filter regular expression for enabling/disabling trace for
    /// matching entities.
    pub fn add_trace_filter(&mut self, regex_str: &str, enabled: TraceState) {
        match Regex::new(regex_str) {
            Ok(regex) => self
                .regex_to_trace_enabled
                .push((regex, enabled == TraceState::Enabled)),
            Err(e) => panic!("Failed to parse regex {regex_str}:\n{e}\n"),
        }
    }
}
