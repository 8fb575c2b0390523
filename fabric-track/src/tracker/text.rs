// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::tracker::{EntityManager, Track};
use crate::{SharedWriter, Tag, Writer};

/// A simple text tracker that writes one line per event.
pub struct TextTracker {
    entity_manager: EntityManager,

    /// Writer to which all events are written.
    writer: SharedWriter,
}

impl TextTracker {
    /// Create a new [`TextTracker`] with an [`EntityManager`].
    pub fn new(entity_manager: EntityManager, writer: Writer) -> Self {
        Self {
            entity_manager,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    fn write_line(&self, line: std::fmt::Arguments) {
        let mut writer = self.writer.lock().unwrap();
        // A failing sink must not bring the simulation down.
        let _ = writer.write_fmt(format_args!("{line}\n"));
    }
}

impl Track for TextTracker {
    fn unique_tag(&self) -> Tag {
        self.entity_manager.unique_tag()
    }

    fn is_entity_enabled(&self, tag: Tag, level: log::Level) -> bool {
        self.entity_manager.is_enabled(tag, level)
    }

    fn add_entity(&self, tag: Tag, entity_name: &str) {
        self.entity_manager.add_entity(tag, entity_name);
    }

    fn enter(&self, tag: Tag, object: Tag) {
        self.write_line(format_args!("{tag}: enter {object}"));
    }

    fn exit(&self, tag: Tag, object: Tag) {
        self.write_line(format_args!("{tag}: exit {object}"));
    }

    fn create(&self, created_by: Tag, tag: Tag, num_bytes: usize, name: &str) {
        self.write_line(format_args!(
            "{created_by}: created {tag}, {name}, {num_bytes} bytes"
        ));
    }

    fn destroy(&self, destroyed_by: Tag, tag: Tag) {
        self.write_line(format_args!("{destroyed_by}: destroyed {tag}"));
    }

    fn log(&self, tag: Tag, level: log::Level, msg: std::fmt::Arguments) {
        self.write_line(format_args!("{tag}:{level}: {msg}"));
    }

    fn time(&self, set_by: Tag, cycle: u64) {
        self.write_line(format_args!("{set_by}: set time to cycle {cycle}"));
    }

    fn shutdown(&self) {
        let _ = self.writer.lock().unwrap().flush();
    }
}
