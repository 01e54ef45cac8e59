//! Option-lookup and grouped-report services over the workspace database.
//!
//! The selection chain and the report screen only see the two traits; the
//! SQLite catalog is one implementation of them.

use crate::chain::SelectOption;
use crate::error::FetchError;
use crate::query::Query;
use crate::report::{GroupedReport, ReportItem};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LevelKind {
    Classroom,
    Subject,
    Evaluation,
    Question,
}

impl LevelKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "classroom" => Some(Self::Classroom),
            "subject" => Some(Self::Subject),
            "evaluation" => Some(Self::Evaluation),
            "question" => Some(Self::Question),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classroom => "classroom",
            Self::Subject => "subject",
            Self::Evaluation => "evaluation",
            Self::Question => "question",
        }
    }

    pub fn parent(self) -> Option<Self> {
        match self {
            Self::Classroom => None,
            Self::Subject => Some(Self::Classroom),
            Self::Evaluation => Some(Self::Subject),
            Self::Question => Some(Self::Evaluation),
        }
    }

    fn table(self) -> &'static str {
        match self {
            Self::Classroom => "classrooms",
            Self::Subject => "subjects",
            Self::Evaluation => "evaluations",
            Self::Question => "questions",
        }
    }

    fn label_column(self) -> &'static str {
        match self {
            Self::Classroom | Self::Subject => "name",
            Self::Evaluation => "title",
            Self::Question => "label",
        }
    }

    fn parent_column(self) -> Option<&'static str> {
        match self {
            Self::Classroom => None,
            Self::Subject => Some("classroom_id"),
            Self::Evaluation => Some("subject_id"),
            Self::Question => Some("evaluation_id"),
        }
    }

    fn order_by(self) -> &'static str {
        match self {
            Self::Question => "sort_order, label",
            other => other.label_column(),
        }
    }
}

/// Check that `kinds` form a dependent chain: each level's parent kind is the
/// kind of the level above it.
pub fn validate_chain(kinds: &[LevelKind]) -> Result<(), String> {
    for pair in kinds.windows(2) {
        if pair[1].parent() != Some(pair[0]) {
            return Err(format!(
                "{} cannot depend on {}",
                pair[1].as_str(),
                pair[0].as_str()
            ));
        }
    }
    Ok(())
}

pub trait OptionSource {
    fn lookup(&self, kind: LevelKind, parent: Option<&str>) -> Result<Vec<SelectOption>, FetchError>;
}

pub trait ReportSource {
    fn grouped_report(&self, query: &Query) -> Result<GroupedReport, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    pub unread_notifications: i64,
    pub pending_invitations: i64,
}

pub struct SqliteCatalog<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCatalog<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn counters(&self) -> rusqlite::Result<Counters> {
        let unread_notifications: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE read_at IS NULL",
            [],
            |r| r.get(0),
        )?;
        let pending_invitations: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM invitations WHERE status = 'pending'",
            [],
            |r| r.get(0),
        )?;
        Ok(Counters {
            unread_notifications,
            pending_invitations,
        })
    }

    fn exists(&self, kind: LevelKind, id: &str) -> Result<bool, FetchError> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?", kind.table());
        let found: Option<i64> = self
            .conn
            .query_row(&sql, [id], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }
}

impl OptionSource for SqliteCatalog<'_> {
    fn lookup(&self, kind: LevelKind, parent: Option<&str>) -> Result<Vec<SelectOption>, FetchError> {
        let mut sql = format!(
            "SELECT id, {} FROM {}",
            kind.label_column(),
            kind.table()
        );
        let mut bind: Vec<Value> = Vec::new();
        if let Some(parent_id) = parent {
            let (Some(parent_kind), Some(column)) = (kind.parent(), kind.parent_column()) else {
                return Err(FetchError::source(
                    "bad_params",
                    format!("{} has no parent level", kind.as_str()),
                ));
            };
            if !self.exists(parent_kind, parent_id)? {
                return Err(FetchError::source(
                    "not_found",
                    format!("{} {} not found", parent_kind.as_str(), parent_id),
                ));
            }
            sql.push_str(&format!(" WHERE {} = ?", column));
            bind.push(Value::Text(parent_id.to_string()));
        }
        sql.push_str(&format!(" ORDER BY {}", kind.order_by()));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind), |r| {
                Ok(SelectOption::new(
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// String values for a query key: a scalar or an array of scalars.
fn query_strings(v: &serde_json::Value) -> Vec<String> {
    match v {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Number(n) => vec![n.to_string()],
        serde_json::Value::Bool(b) => vec![b.to_string()],
        serde_json::Value::Array(items) => items.iter().flat_map(query_strings).collect(),
        _ => Vec::new(),
    }
}

impl ReportSource for SqliteCatalog<'_> {
    fn grouped_report(&self, query: &Query) -> Result<GroupedReport, FetchError> {
        let mut sql = String::from(
            "SELECT c.name, s.name, e.title, q.label, st.id, st.display_name, r.score, r.status
             FROM results r
             JOIN questions q ON q.id = r.question_id
             JOIN evaluations e ON e.id = q.evaluation_id
             JOIN subjects s ON s.id = e.subject_id
             JOIN classrooms c ON c.id = s.classroom_id
             JOIN students st ON st.id = r.student_id
             WHERE 1 = 1",
        );
        let mut bind: Vec<Value> = Vec::new();

        for (key, column) in [
            ("classroom", "c.id"),
            ("subject", "s.id"),
            ("evaluation", "e.id"),
            ("question", "q.id"),
            ("status", "r.status"),
        ] {
            let Some(raw) = query.get(key) else {
                continue;
            };
            let values = query_strings(raw);
            if values.is_empty() {
                continue;
            }
            let marks = vec!["?"; values.len()].join(", ");
            sql.push_str(&format!(" AND {} IN ({})", column, marks));
            bind.extend(values.into_iter().map(Value::Text));
        }
        // Matched in Rust: LIKE treats `_`/`%` as wildcards and SQLite's LOWER
        // only folds ASCII.
        let search = query
            .get("search")
            .and_then(|v| v.as_str())
            .map(str::to_lowercase);
        sql.push_str(" ORDER BY c.name, s.name, e.title, q.sort_order, q.label, st.display_name");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind))?;
        let mut report = GroupedReport::default();
        while let Some(row) = rows.next()? {
            let student: String = row.get(5)?;
            if let Some(needle) = search.as_deref() {
                if !student.to_lowercase().contains(needle) {
                    continue;
                }
            }
            let class: String = row.get(0)?;
            let subject: String = row.get(1)?;
            let evaluation: String = row.get(2)?;
            let question: String = row.get(3)?;
            report
                .group_mut(&class, &subject, &evaluation, &question)
                .push(ReportItem {
                    student_id: row.get(4)?,
                    student,
                    score: row.get(6)?,
                    status: row.get(7)?,
                });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
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

    fn seeded(prefix: &str) -> Connection {
        let conn = db::open_db(&temp_dir(prefix)).expect("open db");
        conn.execute_batch(
            "INSERT INTO classrooms(id, name) VALUES('c1', 'ClassA'), ('c2', 'ClassB');
             INSERT INTO subjects(id, classroom_id, name) VALUES('s1', 'c1', 'Math'), ('s2', 'c2', 'Math'), ('s3', 'c1', 'Art');
             INSERT INTO evaluations(id, subject_id, title) VALUES('e1', 's1', 'Quiz 1'), ('e2', 's2', 'Quiz 1');
             INSERT INTO questions(id, evaluation_id, label, sort_order) VALUES('q1', 'e1', 'Q1', 0), ('q2', 'e2', 'Q1', 0);
             INSERT INTO students(id, classroom_id, display_name) VALUES('st1', 'c1', 'Ada Lovelace'), ('st2', 'c2', 'Alan Turing');
             INSERT INTO results(question_id, student_id, score, status) VALUES('q1', 'st1', 8, 'graded'), ('q2', 'st2', NULL, 'pending');",
        )
        .expect("seed");
        conn
    }

    #[test]
    fn lookup_lists_children_of_parent() {
        let conn = seeded("edudesk-catalog-lookup");
        let cat = SqliteCatalog::new(&conn);
        let subjects = cat.lookup(LevelKind::Subject, Some("c1")).expect("lookup");
        let labels: Vec<&str> = subjects.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["Art", "Math"]);

        let roots = cat.lookup(LevelKind::Classroom, None).expect("roots");
        assert_eq!(roots.len(), 2);
    }

    #[test]
    fn lookup_for_missing_parent_fails() {
        let conn = seeded("edudesk-catalog-missing");
        let cat = SqliteCatalog::new(&conn);
        let err = cat
            .lookup(LevelKind::Evaluation, Some("nope"))
            .expect_err("missing parent");
        assert_eq!(err.code, "not_found");
        assert_eq!(err.kind, crate::error::FetchErrorKind::Source);
    }

    #[test]
    fn chain_validation_requires_parent_kinds() {
        assert!(validate_chain(&[LevelKind::Classroom, LevelKind::Subject, LevelKind::Evaluation]).is_ok());
        assert!(validate_chain(&[LevelKind::Subject, LevelKind::Evaluation]).is_ok());
        assert!(validate_chain(&[LevelKind::Classroom, LevelKind::Evaluation]).is_err());
    }

    #[test]
    fn grouped_report_respects_query() {
        let conn = seeded("edudesk-catalog-report");
        let cat = SqliteCatalog::new(&conn);

        let all = cat.grouped_report(&Query::new()).expect("report");
        assert_eq!(all.classes.len(), 2);
        assert_eq!(all.classes["ClassA"]["Math"]["Quiz 1"]["Q1"].items.len(), 1);
        assert_eq!(all.classes["ClassB"]["Math"]["Quiz 1"]["Q1"].items.len(), 1);

        let q = json!({ "classroom": "c2" }).as_object().cloned().expect("obj");
        let only_b = cat.grouped_report(&q).expect("report");
        assert_eq!(only_b.classes.keys().collect::<Vec<_>>(), vec!["ClassB"]);
        let group = &only_b.classes["ClassB"]["Math"]["Quiz 1"]["Q1"];
        assert_eq!(group.stats.count, 1);
        assert_eq!(group.stats.graded, 0);

        let q = json!({ "search": "ada", "status": ["graded"] })
            .as_object()
            .cloned()
            .expect("obj");
        let searched = cat.grouped_report(&q).expect("report");
        let group = &searched.classes["ClassA"]["Math"]["Quiz 1"]["Q1"];
        assert_eq!(group.items[0].student, "Ada Lovelace");
        assert_eq!(group.stats.mean, Some(8.0));
        assert!(searched.classes.get("ClassB").is_none());
    }

    fn search_count(cat: &SqliteCatalog<'_>, needle: &str) -> usize {
        let q = json!({ "search": needle }).as_object().cloned().expect("obj");
        let report = cat.grouped_report(&q).expect("report");
        report
            .classes
            .values()
            .flat_map(|subjects| subjects.values())
            .flat_map(|evaluations| evaluations.values())
            .flat_map(|questions| questions.values())
            .map(|group| group.items.len())
            .sum()
    }

    #[test]
    fn search_matches_literally_and_folds_unicode_case() {
        let conn = seeded("edudesk-catalog-search");
        conn.execute_batch(
            "INSERT INTO students(id, classroom_id, display_name) VALUES('st3', 'c1', 'Élodie Martin');
             INSERT INTO results(question_id, student_id, score, status) VALUES('q1', 'st3', 7, 'graded');",
        )
        .expect("seed");
        let cat = SqliteCatalog::new(&conn);

        assert_eq!(search_count(&cat, "_"), 0);
        assert_eq!(search_count(&cat, "%"), 0);
        assert_eq!(search_count(&cat, "élodie"), 1);
        assert_eq!(search_count(&cat, "ÉLODIE"), 1);
        assert_eq!(search_count(&cat, "LOVELACE"), 1);
        assert_eq!(search_count(&cat, "a"), 3);
    }

    #[test]
    fn counters_count_unread_and_pending() {
        let conn = seeded("edudesk-catalog-counters");
        conn.execute_batch(
            "INSERT INTO notifications(id, message, created_at) VALUES('n1', 'hi', 'now');
             INSERT INTO notifications(id, message, created_at, read_at) VALUES('n2', 'old', 'now', 'now');
             INSERT INTO invitations(id, email, status, created_at) VALUES('i1', 'a@b.c', 'pending', 'now');",
        )
        .expect("seed");
        let c = SqliteCatalog::new(&conn).counters().expect("counters");
        assert_eq!(c.unread_notifications, 1);
        assert_eq!(c.pending_invitations, 1);
    }
}
