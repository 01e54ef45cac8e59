#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_edudeskd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn edudeskd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

pub fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

/// Two classrooms that each hold a "Math" subject with a "Quiz 1" evaluation
/// and a "Q1" question, plus one graded result per classroom.
pub struct Seed {
    pub class_a: String,
    pub class_b: String,
    pub math_a: String,
    pub math_b: String,
    pub quiz_a: String,
    pub question_a: String,
    pub question_b: String,
}

pub fn seed_workspace(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Seed {
    let id = |v: &serde_json::Value, key: &str| {
        v.get(key)
            .and_then(|v| v.as_str())
            .expect("created id")
            .to_string()
    };
    let class_a = id(
        &request_ok(stdin, reader, "seed-1", "classrooms.create", json!({ "name": "ClassA" })),
        "classroomId",
    );
    let class_b = id(
        &request_ok(stdin, reader, "seed-2", "classrooms.create", json!({ "name": "ClassB" })),
        "classroomId",
    );
    let math_a = id(
        &request_ok(
            stdin,
            reader,
            "seed-3",
            "subjects.create",
            json!({ "classroomId": class_a, "name": "Math" }),
        ),
        "subjectId",
    );
    let math_b = id(
        &request_ok(
            stdin,
            reader,
            "seed-4",
            "subjects.create",
            json!({ "classroomId": class_b, "name": "Math" }),
        ),
        "subjectId",
    );
    let quiz_a = id(
        &request_ok(
            stdin,
            reader,
            "seed-5",
            "evaluations.create",
            json!({ "subjectId": math_a, "title": "Quiz 1" }),
        ),
        "evaluationId",
    );
    let quiz_b = id(
        &request_ok(
            stdin,
            reader,
            "seed-6",
            "evaluations.create",
            json!({ "subjectId": math_b, "title": "Quiz 1" }),
        ),
        "evaluationId",
    );
    let question_a = id(
        &request_ok(
            stdin,
            reader,
            "seed-7",
            "questions.create",
            json!({ "evaluationId": quiz_a, "label": "Q1" }),
        ),
        "questionId",
    );
    let question_b = id(
        &request_ok(
            stdin,
            reader,
            "seed-8",
            "questions.create",
            json!({ "evaluationId": quiz_b, "label": "Q1" }),
        ),
        "questionId",
    );
    let ada = id(
        &request_ok(
            stdin,
            reader,
            "seed-9",
            "students.create",
            json!({ "classroomId": class_a, "displayName": "Ada" }),
        ),
        "studentId",
    );
    let alan = id(
        &request_ok(
            stdin,
            reader,
            "seed-10",
            "students.create",
            json!({ "classroomId": class_b, "displayName": "Alan" }),
        ),
        "studentId",
    );
    request_ok(
        stdin,
        reader,
        "seed-11",
        "results.record",
        json!({ "questionId": question_a, "studentId": ada, "score": 8.0 }),
    );
    request_ok(
        stdin,
        reader,
        "seed-12",
        "results.record",
        json!({ "questionId": question_b, "studentId": alan, "score": 6.0 }),
    );
    Seed {
        class_a,
        class_b,
        math_a,
        math_b,
        quiz_a,
        question_a,
        question_b,
    }
}
