//! Debug tracing for GC, allocation and collection events
//!
//! This module records:
//! - Every allocation
//! - GC events (start, end, weak references cleared)
//! - Hash map resizes, including resizes skipped because a collection
//!   already resized the map
//! - Tree insertions
//!
//! Enable with ROOTED_GC_TRACE=1. With ROOTED_GC_TRACE_FILE=<path> every
//! event is also appended to that file as it happens.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::sync::Mutex;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crate::collections::type_ids::type_name;

static TRACING_ENABLED: AtomicBool = AtomicBool::new(false);
static EVENT_COUNTER: AtomicU64 = AtomicU64::new(0);
static INIT: Once = Once::new();
static START_TIME: Mutex<Option<Instant>> = Mutex::new(None);
static INCREMENTAL_FILE: Mutex<Option<File>> = Mutex::new(None);
static GLOBAL_EVENTS: Mutex<Vec<TraceEvent>> = Mutex::new(Vec::new());

/// Initialize tracing based on environment variables. Safe to call more
/// than once; only the first call reads the environment.
pub fn init() {
    INIT.call_once(|| {
        if std::env::var("ROOTED_GC_TRACE").is_err() {
            return;
        }
        set_enabled(true);

        if let Ok(trace_file) = std::env::var("ROOTED_GC_TRACE_FILE") {
            match File::create(&trace_file) {
                Ok(mut file) => {
                    let _ = writeln!(file, "# rooted-collections GC trace");
                    let _ = writeln!(file, "# Format: seq timestamp_us event details");
                    if let Ok(mut incremental) = INCREMENTAL_FILE.lock() {
                        *incremental = Some(file);
                    }
                    eprintln!("[GC_TRACE] Incremental tracing to {}", trace_file);
                }
                Err(e) => eprintln!("[GC_TRACE] Failed to create trace file: {}", e),
            }
        }
        eprintln!("[GC_TRACE] Tracing enabled");
    });
}

pub fn set_enabled(enabled: bool) {
    if enabled {
        if let Ok(mut start) = START_TIME.lock() {
            start.get_or_insert_with(Instant::now);
        }
    }
    TRACING_ENABLED.store(enabled, Ordering::SeqCst);
}

#[inline]
pub fn is_enabled() -> bool {
    TRACING_ENABLED.load(Ordering::Relaxed)
}

fn timestamp_us() -> u64 {
    if let Ok(start) = START_TIME.lock() {
        if let Some(start) = *start {
            return start.elapsed().as_micros() as u64;
        }
    }
    0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEventKind {
    Allocate { type_id: u8, words: usize },
    GcStart { collection: usize },
    GcEnd {
        collection: usize,
        bytes_copied: usize,
        duration_us: u64,
    },
    WeakCleared { count: usize },
    MapResize { from: usize, to: usize },
    MapResizeSkipped { requested: usize },
    TreeInsert { fresh_nodes: usize },
}

impl fmt::Display for TraceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEventKind::Allocate { type_id, words } => {
                write!(f, "ALLOC {} words={}", type_name(*type_id), words)
            }
            TraceEventKind::GcStart { collection } => write!(f, "GC_START #{}", collection),
            TraceEventKind::GcEnd {
                collection,
                bytes_copied,
                duration_us,
            } => write!(
                f,
                "GC_END #{} copied={} took={}us",
                collection, bytes_copied, duration_us
            ),
            TraceEventKind::WeakCleared { count } => write!(f, "WEAK_CLEARED count={}", count),
            TraceEventKind::MapResize { from, to } => {
                write!(f, "MAP_RESIZE {} -> {}", from, to)
            }
            TraceEventKind::MapResizeSkipped { requested } => {
                write!(f, "MAP_RESIZE_SKIPPED requested={}", requested)
            }
            TraceEventKind::TreeInsert { fresh_nodes } => {
                write!(f, "TREE_INSERT fresh_nodes={}", fresh_nodes)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub seq: u64,
    pub timestamp_us: u64,
    pub kind: TraceEventKind,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.seq, self.timestamp_us, self.kind)
    }
}

pub fn record(kind: TraceEventKind) {
    if !is_enabled() {
        return;
    }
    let event = TraceEvent {
        seq: EVENT_COUNTER.fetch_add(1, Ordering::SeqCst),
        timestamp_us: timestamp_us(),
        kind,
    };
    if let Ok(mut file) = INCREMENTAL_FILE.lock() {
        if let Some(file) = file.as_mut() {
            let _ = writeln!(file, "{}", event);
        }
    }
    if let Ok(mut events) = GLOBAL_EVENTS.lock() {
        events.push(event);
    }
}

/// Drain everything recorded so far.
pub fn take_events() -> Vec<TraceEvent> {
    GLOBAL_EVENTS
        .lock()
        .map(|mut events| std::mem::take(&mut *events))
        .unwrap_or_default()
}

#[inline]
pub fn trace_alloc(type_id: u8, words: usize) {
    if is_enabled() {
        record(TraceEventKind::Allocate { type_id, words });
    }
}
