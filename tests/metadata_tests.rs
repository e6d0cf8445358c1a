// M03: Document bounds tests
// Tests for the earliest-start / latest-end bounds kept by a document.

use tracedoc::{Event, Options, TraceDocument, UNDEFINED_END_TIME_NS, UNDEFINED_START_TIME_NS};

fn new_doc(dir: &tempfile::TempDir) -> TraceDocument {
    TraceDocument::create(dir.path().join("doc.trace"), Options::default()).unwrap()
}

// =============================================================================
// Test 1: Empty document reports undefined bounds
// =============================================================================
#[test]
fn empty_document_has_undefined_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let doc = new_doc(&dir);

    assert_eq!(doc.earliest_event_start_time_ns().unwrap(), UNDEFINED_START_TIME_NS);
    assert_eq!(doc.latest_event_end_time_ns().unwrap(), UNDEFINED_END_TIME_NS);
}

// =============================================================================
// Test 2: Instants widen both bounds
// =============================================================================
#[test]
fn instants_update_both_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let doc = new_doc(&dir);

    doc.append(&Event::instant("e1", 10)).unwrap();
    doc.append(&Event::instant("e2", 5)).unwrap();

    assert_eq!(doc.earliest_event_start_time_ns().unwrap(), 5);
    assert_eq!(doc.latest_event_end_time_ns().unwrap(), 10);
}

// =============================================================================
// Test 3: A start alone leaves the end undefined
// =============================================================================
#[test]
fn start_only_sets_earliest() {
    let dir = tempfile::tempdir().unwrap();
    let doc = new_doc(&dir);

    doc.append(&Event::interval_start("s1", 100)).unwrap();

    assert_eq!(doc.earliest_event_start_time_ns().unwrap(), 100);
    assert_eq!(doc.latest_event_end_time_ns().unwrap(), UNDEFINED_END_TIME_NS);
}

// =============================================================================
// Test 4: An end alone leaves the start undefined
// =============================================================================
#[test]
fn end_only_sets_latest() {
    let dir = tempfile::tempdir().unwrap();
    let doc = new_doc(&dir);

    doc.append(&Event::interval_end("x1", "missing", 70)).unwrap();

    assert_eq!(doc.earliest_event_start_time_ns().unwrap(), UNDEFINED_START_TIME_NS);
    assert_eq!(doc.latest_event_end_time_ns().unwrap(), 70);
}

// =============================================================================
// Test 5: An end earlier than every start is still the latest end
// =============================================================================
#[test]
fn bounds_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let doc = new_doc(&dir);

    doc.append(&Event::interval_start("s1", 500)).unwrap();
    doc.append(&Event::interval_end("x1", "s0", 100)).unwrap();

    let bounds = doc.time_bounds().unwrap();
    assert_eq!(bounds.earliest_start_ns, 500);
    assert_eq!(bounds.latest_end_ns, 100);
}

// =============================================================================
// Test 6: Bounds are restored on reopen
// =============================================================================
#[test]
fn bounds_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.trace");

    let doc = TraceDocument::create(&path, Options::default()).unwrap();
    doc.append(&Event::interval_start("s1", 40)).unwrap();
    doc.append(&Event::instant("i1", -3)).unwrap();
    doc.append(&Event::interval_end("x1", "s1", 90)).unwrap();
    doc.unload().unwrap();

    doc.load().unwrap();
    assert_eq!(doc.earliest_event_start_time_ns().unwrap(), -3);
    assert_eq!(doc.latest_event_end_time_ns().unwrap(), 90);
}

// =============================================================================
// Test 7: Appends that do not move the bounds keep the file smaller
// =============================================================================
#[test]
fn unchanged_bounds_write_no_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let doc = new_doc(&dir);

    doc.append(&Event::instant("e1", 10)).unwrap();
    let after_first = doc.stats().unwrap().file_size_bytes;
    doc.append(&Event::instant("e2", 10)).unwrap();
    let second = doc.stats().unwrap().file_size_bytes - after_first;
    doc.append(&Event::instant("e3", 11)).unwrap();
    let third = doc.stats().unwrap().file_size_bytes - after_first - second;

    // Same-sized rows; only the third carries a metadata frame.
    assert!(third > second);
}
