//! Badge counters (unread notifications, pending invitations) and the records
//! behind them.

use crate::catalog::SqliteCatalog;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_name, required_str, screen_not_found};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::time::{Duration, Instant};
use uuid::Uuid;

const MIN_INTERVAL_MS: u64 = 1_000;
const MAX_INTERVAL_MS: u64 = 3_600_000;

fn handle_counters_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let interval = match req.params.get("intervalMs") {
        Some(v) if !v.is_null() => match v.as_u64() {
            Some(ms) if (MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&ms) => {
                Some(Duration::from_millis(ms))
            }
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    format!(
                        "intervalMs must be between {} and {}",
                        MIN_INTERVAL_MS, MAX_INTERVAL_MS
                    ),
                    None,
                )
            }
        },
        _ => None,
    };
    let Some(screen) = state.screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    if let Some(i) = interval {
        screen.poller.set_interval(i);
    }
    screen.poller.start(Instant::now());
    tracing::debug!(screen = %screen_id, interval_ms = screen.poller.interval().as_millis() as u64, "counter polling started");
    ok(
        &req.id,
        json!({
            "running": true,
            "intervalMs": screen.poller.interval().as_millis() as u64
        }),
    )
}

fn handle_counters_stop(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(screen) = state.screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    screen.poller.stop();
    ok(&req.id, json!({ "running": false }))
}

fn handle_counters_poll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let AppState { db, screens, .. } = state;
    let Some(screen) = screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    let now = Instant::now();
    let due = screen.poller.poll(now);
    let next_due_ms = screen
        .poller
        .next_due_in(now)
        .map(|d| d.as_millis() as u64);
    if !due {
        return ok(
            &req.id,
            json!({
                "due": false,
                "running": screen.poller.is_running(),
                "nextDueMs": next_due_ms
            }),
        );
    }

    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match SqliteCatalog::new(conn).counters() {
        Ok(counts) => ok(
            &req.id,
            json!({
                "due": true,
                "running": true,
                "counts": counts,
                "nextDueMs": next_due_ms
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// One-off read that ignores the poll schedule.
fn handle_counters_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match SqliteCatalog::new(conn).counters() {
        Ok(counts) => ok(&req.id, json!(counts)),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_notifications_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let message = match required_name(req, "message") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO notifications(id, message, created_at) VALUES(?, ?, ?)",
        (&id, &message, &created_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "notifications" })),
        );
    }
    ok(&req.id, json!({ "notificationId": id }))
}

fn handle_notifications_mark_read(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let notification_id = match required_str(req, "notificationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let read_at = chrono::Utc::now().to_rfc3339();
    match conn.execute(
        "UPDATE notifications SET read_at = COALESCE(read_at, ?) WHERE id = ?",
        (&read_at, &notification_id),
    ) {
        Ok(0) => err(
            &req.id,
            "not_found",
            "notification not found",
            Some(json!({ "notificationId": notification_id })),
        ),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_invitations_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let email = match required_name(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let classroom_id = req
        .params
        .get("classroomId")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    if let Some(cid) = classroom_id.as_deref() {
        let exists = conn
            .query_row("SELECT 1 FROM classrooms WHERE id = ?", [cid], |r| {
                r.get::<_, i64>(0)
            })
            .optional();
        match exists {
            Ok(Some(_)) => {}
            Ok(None) => {
                return err(
                    &req.id,
                    "not_found",
                    "classroom not found",
                    Some(json!({ "classroomId": cid })),
                )
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    let id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO invitations(id, email, classroom_id, created_at) VALUES(?, ?, ?, ?)",
        (&id, &email, &classroom_id, &created_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "invitations" })),
        );
    }
    ok(&req.id, json!({ "invitationId": id }))
}

fn handle_invitations_respond(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let invitation_id = match required_str(req, "invitationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(accept) = req.params.get("accept").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "accept must be a boolean", None);
    };
    let status = if accept { "accepted" } else { "declined" };
    let responded_at = chrono::Utc::now().to_rfc3339();
    let updated = conn.execute(
        "UPDATE invitations SET status = ?, responded_at = ? WHERE id = ? AND status = 'pending'",
        (status, &responded_at, &invitation_id),
    );
    match updated {
        Ok(0) => err(
            &req.id,
            "not_found",
            "no pending invitation with that id",
            Some(json!({ "invitationId": invitation_id })),
        ),
        Ok(_) => ok(&req.id, json!({ "status": status })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "counters.start" => Some(handle_counters_start(state, req)),
        "counters.stop" => Some(handle_counters_stop(state, req)),
        "counters.poll" => Some(handle_counters_poll(state, req)),
        "counters.get" => Some(handle_counters_get(state, req)),
        "notifications.create" => Some(handle_notifications_create(state, req)),
        "notifications.markRead" => Some(handle_notifications_mark_read(state, req)),
        "invitations.create" => Some(handle_invitations_create(state, req)),
        "invitations.respond" => Some(handle_invitations_respond(state, req)),
        _ => None,
    }
}
