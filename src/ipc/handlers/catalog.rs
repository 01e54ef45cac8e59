use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_name, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn ensure_exists(
    conn: &Connection,
    req: &Request,
    table: &str,
    id: &str,
    what: &str,
) -> Result<(), serde_json::Value> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let exists: Option<i64> = conn
        .query_row(&sql, [id], |r| r.get(0))
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if exists.is_none() {
        return Err(err(
            &req.id,
            "not_found",
            format!("{} not found", what),
            Some(json!({ "id": id })),
        ));
    }
    Ok(())
}

fn handle_classrooms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classrooms": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           (SELECT COUNT(*) FROM subjects s WHERE s.classroom_id = c.id) AS subject_count,
           (SELECT COUNT(*) FROM students st WHERE st.classroom_id = c.id) AS student_count
         FROM classrooms c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let subject_count: i64 = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "subjectCount": subject_count,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classrooms) => ok(&req.id, json!({ "classrooms": classrooms })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classrooms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_name(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let classroom_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO classrooms(id, name, created_at) VALUES(?, ?, ?)",
        (&classroom_id, &name, &created_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classrooms" })),
        );
    }
    ok(&req.id, json!({ "classroomId": classroom_id, "name": name }))
}

/// Insert a row under an existing parent and return its new id.
fn create_child(
    state: &mut AppState,
    req: &Request,
    parent: (&str, &str, &str),
    table: &str,
    columns: &str,
    name_key: &str,
    id_key: &str,
) -> serde_json::Value {
    let (parent_param, parent_table, parent_what) = parent;
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let parent_id = match required_str(req, parent_param) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_name(req, name_key) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_exists(conn, req, parent_table, &parent_id, parent_what) {
        return e;
    }

    let id = Uuid::new_v4().to_string();
    let sql = format!("INSERT INTO {}({}) VALUES(?, ?, ?)", table, columns);
    if let Err(e) = conn.execute(&sql, (&id, &parent_id, &name)) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": table })),
        );
    }
    ok(&req.id, json!({ id_key: id, name_key: name }))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    create_child(
        state,
        req,
        ("classroomId", "classrooms", "classroom"),
        "subjects",
        "id, classroom_id, name",
        "name",
        "subjectId",
    )
}

fn handle_evaluations_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    create_child(
        state,
        req,
        ("subjectId", "subjects", "subject"),
        "evaluations",
        "id, subject_id, title",
        "title",
        "evaluationId",
    )
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    create_child(
        state,
        req,
        ("classroomId", "classrooms", "classroom"),
        "students",
        "id, classroom_id, display_name",
        "displayName",
        "studentId",
    )
}

fn handle_questions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let evaluation_id = match required_str(req, "evaluationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let label = match required_name(req, "label") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_exists(conn, req, "evaluations", &evaluation_id, "evaluation") {
        return e;
    }

    // Append after existing questions unless an explicit position is given.
    let sort_order = match req.params.get("sortOrder").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => match conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM questions WHERE evaluation_id = ?",
            [&evaluation_id],
            |r| r.get::<_, i64>(0),
        ) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
    };

    let question_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO questions(id, evaluation_id, label, sort_order) VALUES(?, ?, ?, ?)",
        (&question_id, &evaluation_id, &label, sort_order),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "questions" })),
        );
    }
    ok(
        &req.id,
        json!({ "questionId": question_id, "label": label, "sortOrder": sort_order }),
    )
}

fn handle_results_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let question_id = match required_str(req, "questionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let score = match req.params.get("score") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_f64() {
            Some(n) => Some(n),
            None => return err(&req.id, "bad_params", "score must be a number or null", None),
        },
    };
    let status = match req.params.get("status").and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => s.trim().to_ascii_lowercase(),
        Some(_) => return err(&req.id, "bad_params", "status must not be empty", None),
        None if score.is_some() => "graded".to_string(),
        None => "pending".to_string(),
    };
    if let Err(e) = ensure_exists(conn, req, "questions", &question_id, "question") {
        return e;
    }
    if let Err(e) = ensure_exists(conn, req, "students", &student_id, "student") {
        return e;
    }

    let updated_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO results(question_id, student_id, score, status, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(question_id, student_id) DO UPDATE SET
           score = excluded.score,
           status = excluded.status,
           updated_at = excluded.updated_at",
        (&question_id, &student_id, score, &status, &updated_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "results" })),
        );
    }
    ok(
        &req.id,
        json!({ "questionId": question_id, "studentId": student_id, "score": score, "status": status }),
    )
}

/// Statements that remove one record and everything beneath it, children
/// first (no ON DELETE CASCADE in the schema).
fn cascade_statements(method: &str) -> Option<(&'static str, &'static str, Vec<(&'static str, &'static str)>)> {
    let out = match method {
        "classrooms.delete" => (
            "classroomId",
            "classrooms",
            vec![
                (
                    "results",
                    "DELETE FROM results
                     WHERE student_id IN (SELECT id FROM students WHERE classroom_id = ?1)
                        OR question_id IN (
                          SELECT q.id FROM questions q
                          JOIN evaluations e ON e.id = q.evaluation_id
                          JOIN subjects s ON s.id = e.subject_id
                          WHERE s.classroom_id = ?1)",
                ),
                (
                    "questions",
                    "DELETE FROM questions WHERE evaluation_id IN (
                       SELECT e.id FROM evaluations e
                       JOIN subjects s ON s.id = e.subject_id
                       WHERE s.classroom_id = ?1)",
                ),
                (
                    "evaluations",
                    "DELETE FROM evaluations WHERE subject_id IN (
                       SELECT id FROM subjects WHERE classroom_id = ?1)",
                ),
                ("subjects", "DELETE FROM subjects WHERE classroom_id = ?1"),
                ("students", "DELETE FROM students WHERE classroom_id = ?1"),
                (
                    "invitations",
                    "UPDATE invitations SET classroom_id = NULL WHERE classroom_id = ?1",
                ),
                ("classrooms", "DELETE FROM classrooms WHERE id = ?1"),
            ],
        ),
        "subjects.delete" => (
            "subjectId",
            "subjects",
            vec![
                (
                    "results",
                    "DELETE FROM results WHERE question_id IN (
                       SELECT q.id FROM questions q
                       JOIN evaluations e ON e.id = q.evaluation_id
                       WHERE e.subject_id = ?1)",
                ),
                (
                    "questions",
                    "DELETE FROM questions WHERE evaluation_id IN (
                       SELECT id FROM evaluations WHERE subject_id = ?1)",
                ),
                ("evaluations", "DELETE FROM evaluations WHERE subject_id = ?1"),
                ("subjects", "DELETE FROM subjects WHERE id = ?1"),
            ],
        ),
        "evaluations.delete" => (
            "evaluationId",
            "evaluations",
            vec![
                (
                    "results",
                    "DELETE FROM results WHERE question_id IN (
                       SELECT id FROM questions WHERE evaluation_id = ?1)",
                ),
                ("questions", "DELETE FROM questions WHERE evaluation_id = ?1"),
                ("evaluations", "DELETE FROM evaluations WHERE id = ?1"),
            ],
        ),
        "questions.delete" => (
            "questionId",
            "questions",
            vec![
                ("results", "DELETE FROM results WHERE question_id = ?1"),
                ("questions", "DELETE FROM questions WHERE id = ?1"),
            ],
        ),
        _ => return None,
    };
    Some(out)
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some((id_param, table, statements)) = cascade_statements(&req.method) else {
        return err(&req.id, "not_implemented", "unknown delete", None);
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_str(req, id_param) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_exists(conn, req, table, &id, table.trim_end_matches('s')) {
        return e;
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for (affected, sql) in statements {
        if let Err(e) = tx.execute(sql, [&id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": affected })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    tracing::info!(table, id = %id, "deleted with dependents");
    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classrooms.list" => Some(handle_classrooms_list(state, req)),
        "classrooms.create" => Some(handle_classrooms_create(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "evaluations.create" => Some(handle_evaluations_create(state, req)),
        "questions.create" => Some(handle_questions_create(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "results.record" => Some(handle_results_record(state, req)),
        "classrooms.delete" | "subjects.delete" | "evaluations.delete" | "questions.delete" => {
            Some(handle_delete(state, req))
        }
        _ => None,
    }
}
