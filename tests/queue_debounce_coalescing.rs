mod test_support;

use serde_json::json;
use std::time::Duration;
use test_support::{assert_close, assessment, temp_dir, Sidecar};

fn configure(sc: &mut Sidecar, debounce_ms: u64) {
    sc.ok(
        "cfg",
        "terms.set",
        json!({
            "term": "T2",
            "ptWeight": 0,
            "quizWeight": 100,
            "examWeight": 0,
            "assessments": [assessment("q1", "QUIZ", 10.0), assessment("q2", "QUIZ", 10.0)]
        }),
    );
    sc.ok(
        "timing",
        "setup.update",
        json!({ "section": "queue", "patch": { "debounceMs": debounce_ms } }),
    );
}

#[test]
fn rapid_edits_to_one_cell_become_one_write() {
    let workspace = temp_dir("gradeledger-coalesce");
    let mut sc = Sidecar::open(&workspace);
    configure(&mut sc, 400);

    sc.ok(
        "1",
        "scores.set",
        json!({ "studentId": "s1", "assessmentId": "q1", "score": 5 }),
    );
    sc.ok(
        "2",
        "scores.set",
        json!({ "studentId": "s1", "assessmentId": "q1", "score": 7 }),
    );
    let status = sc.ok("3", "queue.status", json!({}));
    assert_eq!(status.get("pending").and_then(|v| v.as_u64()), Some(1));
    assert!(status.get("nextFlushInMs").and_then(|v| v.as_u64()).is_some());
    assert_eq!(
        status.pointer("/timing/debounceMs").and_then(|v| v.as_u64()),
        Some(400)
    );

    let idle = sc.wait_idle(Duration::from_secs(10));
    assert_eq!(idle.pointer("/stats/remoteCalls").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(idle.pointer("/stats/flushes").and_then(|v| v.as_u64()), Some(1));
    assert!(idle.get("nextFlushInMs").map(|v| v.is_null()).unwrap_or(false));

    let updated = sc.events_named("grades.updated");
    assert_eq!(updated.len(), 1);
    assert_eq!(
        updated[0].pointer("/payload/written").and_then(|v| v.as_u64()),
        Some(1)
    );
    sc.shutdown();

    let mut sc = Sidecar::open(&workspace);
    let got = sc.ok(
        "4",
        "scores.get",
        json!({ "studentId": "s1", "assessmentId": "q1" }),
    );
    assert_close(got.get("score").and_then(|v| v.as_f64()), 7.0);
    sc.shutdown();
}

#[test]
fn bulk_paste_is_one_batch() {
    let workspace = temp_dir("gradeledger-bulk-batch");
    let mut sc = Sidecar::open(&workspace);
    configure(&mut sc, 200);

    let edits: Vec<_> = (0..40)
        .map(|i| {
            json!({
                "studentId": format!("s{:02}", i),
                "assessmentId": if i % 2 == 0 { "q1" } else { "q2" },
                "score": (i % 10) as f64
            })
        })
        .collect();
    let res = sc.ok("1", "scores.bulkSet", json!({ "edits": edits }));
    assert_eq!(res.get("updated").and_then(|v| v.as_u64()), Some(40));
    assert_eq!(res.get("rejected").and_then(|v| v.as_u64()), Some(0));

    let idle = sc.wait_idle(Duration::from_secs(10));
    assert_eq!(idle.pointer("/stats/remoteCalls").and_then(|v| v.as_u64()), Some(1));
    let updated = sc.events_named("grades.updated");
    assert_eq!(updated.len(), 1);
    assert_eq!(
        updated[0].pointer("/payload/written").and_then(|v| v.as_u64()),
        Some(40)
    );
    sc.shutdown();
}
