// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Helpers shared by the tests of all fabric crates.

use std::fs;
use std::io::BufWriter;
use std::path::Path;

use fabric_track::tracker::{EntityManager, text_tracker};
use fabric_track::{TraceState, Tracker, Writer};

use crate::engine::Engine;

/// Create a [`Tracker`] that writes to `traces/<test file stem>.log`.
///
/// Use as `create_tracker(file!())` so each test file gets its own log.
#[must_use]
pub fn create_tracker(full_filepath: &str) -> Tracker {
    const FOLDER: &str = "traces";
    fs::create_dir_all(FOLDER).unwrap();

    let filename_only = Path::new(full_filepath)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap();

    let writer: Writer = Box::new(BufWriter::new(
        fs::File::create(format!("{FOLDER}/{filename_only}.log")).unwrap(),
    ));

    let entity_manager = EntityManager::new(TraceState::Disabled, log::Level::Info);
    text_tracker(entity_manager, writer)
}

#[must_use]
pub fn start_test(full_filepath: &str) -> Engine {
    Engine::new(&create_tracker(full_filepath))
}
