#![allow(dead_code)]

pub mod mock;

use std::sync::Arc;

use sql_mapper::plan::PlanCache;
use sql_mapper::prelude::*;
use tempfile::tempdir;

pub fn unique_db_path(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    // Leak the tempdir so the file persists for the duration of the test binary.
    std::mem::forget(dir);
    path.to_string_lossy().into_owned()
}

/// Options with a cache private to one test, so counters are not shared.
pub fn isolated_options() -> ConnectionOptions {
    ConnectionOptions::default().with_plan_cache(Arc::new(PlanCache::new()))
}
