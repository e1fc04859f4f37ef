mod test_support;

use serde_json::{json, Value};
use test_support::{assert_close, assessment, temp_dir, Sidecar};

fn configure(sc: &mut Sidecar) {
    sc.ok(
        "cfg",
        "terms.set",
        json!({
            "term": "T1",
            "ptWeight": 30,
            "quizWeight": 20,
            "examWeight": 50,
            "assessments": [
                assessment("pt1", "PT", 50.0),
                assessment("quiz1", "QUIZ", 100.0),
                assessment("exam1", "EXAM", 100.0)
            ]
        }),
    );
}

#[test]
fn over_max_is_clamped_and_warned_once() {
    let workspace = temp_dir("gradeledger-clamp");
    let mut sc = Sidecar::open(&workspace);
    configure(&mut sc);

    let first = sc.ok(
        "1",
        "scores.set",
        json!({ "studentId": "s1", "assessmentId": "quiz1", "score": 120 }),
    );
    assert_close(first.get("score").and_then(|v| v.as_f64()), 100.0);
    assert_eq!(first.get("clamped").and_then(|v| v.as_bool()), Some(true));
    assert!(first.get("warning").and_then(|v| v.as_str()).is_some());

    let second = sc.ok(
        "2",
        "scores.set",
        json!({ "studentId": "s2", "assessmentId": "quiz1", "score": 150 }),
    );
    assert_close(second.get("score").and_then(|v| v.as_f64()), 100.0);
    assert_eq!(second.get("clamped").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(second.get("warning"), Some(&Value::Null));

    let neg = sc.ok(
        "3",
        "scores.set",
        json!({ "studentId": "s1", "assessmentId": "pt1", "score": -4 }),
    );
    assert_close(neg.get("score").and_then(|v| v.as_f64()), 0.0);

    let got = sc.ok(
        "4",
        "scores.get",
        json!({ "studentId": "s1", "assessmentId": "quiz1" }),
    );
    assert_close(got.get("score").and_then(|v| v.as_f64()), 100.0);
    assert_close(got.get("effectiveScore").and_then(|v| v.as_f64()), 100.0);
    sc.shutdown();
}

#[test]
fn invalid_scores_are_rejected_without_state_change() {
    let workspace = temp_dir("gradeledger-invalid-score");
    let mut sc = Sidecar::open(&workspace);
    configure(&mut sc);

    sc.ok(
        "1",
        "scores.set",
        json!({ "studentId": "s1", "assessmentId": "quiz1", "score": "42" }),
    );
    assert_eq!(
        sc.err_code(
            "2",
            "scores.set",
            json!({ "studentId": "s1", "assessmentId": "quiz1", "score": "abc" })
        ),
        "invalid_score"
    );
    assert_eq!(
        sc.err_code(
            "3",
            "scores.set",
            json!({ "studentId": "s1", "assessmentId": "quiz1", "score": "NaN" })
        ),
        "invalid_score"
    );
    assert_eq!(
        sc.err_code(
            "4",
            "scores.set",
            json!({ "studentId": "s1", "assessmentId": "missing", "score": 1 })
        ),
        "not_found"
    );

    let got = sc.ok(
        "5",
        "scores.get",
        json!({ "studentId": "s1", "assessmentId": "quiz1" }),
    );
    assert_close(got.get("score").and_then(|v| v.as_f64()), 42.0);

    // Blank clears the cell.
    let cleared = sc.ok(
        "6",
        "scores.set",
        json!({ "studentId": "s1", "assessmentId": "quiz1", "score": "" }),
    );
    assert_eq!(cleared.get("score"), Some(&Value::Null));
    sc.shutdown();
}

#[test]
fn flushed_scores_survive_reopen() {
    let workspace = temp_dir("gradeledger-persist");
    let mut sc = Sidecar::open(&workspace);
    configure(&mut sc);
    // Keep the timer out of the way so the explicit flush takes the batch.
    sc.ok(
        "0",
        "setup.update",
        json!({ "section": "queue", "patch": { "debounceMs": 60000 } }),
    );

    sc.ok(
        "1",
        "scores.set",
        json!({ "studentId": "s1", "assessmentId": "pt1", "score": 40 }),
    );
    sc.ok(
        "2",
        "scores.set",
        json!({ "studentId": "s1", "assessmentId": "exam1", "score": 90 }),
    );
    let flushed = sc.ok("3", "scores.flush", json!({}));
    assert_eq!(
        flushed.pointer("/outcome/status").and_then(|v| v.as_str()),
        Some("persisted")
    );
    assert_eq!(
        flushed.pointer("/outcome/written").and_then(|v| v.as_u64()),
        Some(2)
    );
    assert_eq!(flushed.get("pending").and_then(|v| v.as_u64()), Some(0));

    let updated = sc.events_named("grades.updated");
    assert_eq!(updated.len(), 1);
    let students = updated[0]
        .pointer("/payload/studentIds")
        .and_then(|v| v.as_array())
        .expect("studentIds");
    assert_eq!(students, &vec![json!("s1")]);

    // Nothing left: a second flush makes no call.
    let again = sc.ok("4", "scores.flush", json!({}));
    assert_eq!(
        again.pointer("/outcome/status").and_then(|v| v.as_str()),
        Some("empty")
    );
    sc.shutdown();

    let mut sc = Sidecar::open(&workspace);
    let got = sc.ok(
        "5",
        "scores.get",
        json!({ "studentId": "s1", "assessmentId": "exam1" }),
    );
    assert_close(got.get("score").and_then(|v| v.as_f64()), 90.0);
    let status = sc.ok("6", "queue.status", json!({}));
    assert_eq!(status.get("pending").and_then(|v| v.as_u64()), Some(0));
    sc.shutdown();
}

#[test]
fn pending_scores_are_flushed_on_exit() {
    let workspace = temp_dir("gradeledger-exit-flush");
    let mut sc = Sidecar::open(&workspace);
    configure(&mut sc);
    sc.ok(
        "1",
        "setup.update",
        json!({ "section": "queue", "patch": { "debounceMs": 60000 } }),
    );
    sc.ok(
        "2",
        "scores.set",
        json!({ "studentId": "s7", "assessmentId": "quiz1", "score": 77 }),
    );
    let status = sc.ok("3", "queue.status", json!({}));
    assert_eq!(status.get("pending").and_then(|v| v.as_u64()), Some(1));

    let events = sc.shutdown();
    assert!(events
        .iter()
        .any(|e| e.get("event").and_then(|v| v.as_str()) == Some("grades.updated")));

    let mut sc = Sidecar::open(&workspace);
    let got = sc.ok(
        "4",
        "scores.get",
        json!({ "studentId": "s7", "assessmentId": "quiz1" }),
    );
    assert_close(got.get("score").and_then(|v| v.as_f64()), 77.0);
    sc.shutdown();
}

#[test]
fn switching_workspace_flushes_the_previous_one() {
    let first = temp_dir("gradeledger-switch-a");
    let second = temp_dir("gradeledger-switch-b");
    let mut sc = Sidecar::open(&first);
    configure(&mut sc);
    sc.ok(
        "1",
        "scores.set",
        json!({ "studentId": "s1", "assessmentId": "quiz1", "score": 64 }),
    );
    sc.ok(
        "2",
        "workspace.select",
        json!({ "path": second.to_string_lossy() }),
    );
    assert_eq!(sc.events_named("grades.updated").len(), 1);
    assert_eq!(
        sc.err_code(
            "3",
            "scores.get",
            json!({ "studentId": "s1", "assessmentId": "quiz1" })
        ),
        "not_found"
    );
    sc.ok("4", "workspace.select", json!({ "path": first.to_string_lossy() }));
    let got = sc.ok(
        "5",
        "scores.get",
        json!({ "studentId": "s1", "assessmentId": "quiz1" }),
    );
    assert_close(got.get("score").and_then(|v| v.as_f64()), 64.0);
    sc.shutdown();
}

#[test]
fn reselecting_the_open_workspace_keeps_unsaved_edits() {
    let workspace = temp_dir("gradeledger-reselect");
    let mut sc = Sidecar::open(&workspace);
    configure(&mut sc);
    sc.ok(
        "1",
        "setup.update",
        json!({ "section": "queue", "patch": { "debounceMs": 60000 } }),
    );
    sc.ok(
        "2",
        "scores.set",
        json!({ "studentId": "s1", "assessmentId": "quiz1", "score": 77 }),
    );

    sc.ok(
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let got = sc.ok(
        "4",
        "scores.get",
        json!({ "studentId": "s1", "assessmentId": "quiz1" }),
    );
    assert_close(got.get("score").and_then(|v| v.as_f64()), 77.0);
    // The reselect saved the edit before reloading it.
    assert_eq!(sc.events_named("grades.updated").len(), 1);
    let status = sc.ok("5", "queue.status", json!({}));
    assert_eq!(status.get("pending").and_then(|v| v.as_u64()), Some(0));
    sc.shutdown();
}
