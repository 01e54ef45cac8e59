use crate::catalog::{LevelKind, OptionSource, SqliteCatalog};
use crate::chain::SelectOption;
use crate::error::FetchError;
use crate::fetch::{FetchTicket, Settlement};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::screen::Screen;
use rusqlite::Connection;
use serde_json::json;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// A required string that must not be blank after trimming.
pub fn required_name(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let v = required_str(req, key)?.trim().to_string();
    if v.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be empty", key),
            None,
        ));
    }
    Ok(v)
}

pub fn required_index(req: &Request, key: &str) -> Result<usize, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a non-negative integer", key),
                None,
            )
        })
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn screen_not_found(req: &Request, screen_id: &str) -> serde_json::Value {
    err(
        &req.id,
        "not_found",
        "screen not found",
        Some(json!({ "screenId": screen_id })),
    )
}

/// Disclosure path: a non-empty array of strings.
pub fn path_param(req: &Request) -> Result<Vec<String>, serde_json::Value> {
    let bad = || {
        err(
            &req.id,
            "bad_params",
            "path must be a non-empty array of strings",
            None,
        )
    };
    let items = req
        .params
        .get("path")
        .and_then(|v| v.as_array())
        .ok_or_else(bad)?;
    if items.is_empty() {
        return Err(bad());
    }
    items
        .iter()
        .map(|v| v.as_str().map(str::to_string).ok_or_else(bad))
        .collect()
}

pub fn parse_level_kinds(req: &Request) -> Result<Vec<LevelKind>, serde_json::Value> {
    let Some(items) = req.params.get("levels").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing levels", None));
    };
    let mut kinds = Vec::with_capacity(items.len());
    for item in items {
        let kind = item.as_str().and_then(LevelKind::parse).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "levels must be one of: classroom, subject, evaluation, question",
                Some(json!({ "level": item })),
            )
        })?;
        kinds.push(kind);
    }
    if kinds.is_empty() {
        return Err(err(&req.id, "bad_params", "levels must not be empty", None));
    }
    Ok(kinds)
}

/// Option source used when no workspace is open: every fetch fails.
pub struct NoWorkspace;

impl OptionSource for NoWorkspace {
    fn lookup(&self, _kind: LevelKind, _parent: Option<&str>) -> Result<Vec<SelectOption>, FetchError> {
        Err(FetchError::source("no_workspace", "select a workspace first"))
    }
}

/// Resolve everything outstanding when the screen runs in auto-resolve mode.
pub fn settle_if_auto(db: Option<&Connection>, screen: &mut Screen) {
    if !screen.auto_resolve() {
        return;
    }
    let settled = match db {
        Some(conn) => screen.drain(&SqliteCatalog::new(conn)),
        None => screen.drain(&NoWorkspace),
    };
    if !settled.is_empty() {
        tracing::debug!(screen = %screen.id, count = settled.len(), "auto-resolved fetches");
    }
}

pub fn ticket_json(ticket: &FetchTicket, current: bool) -> serde_json::Value {
    json!({
        "levelIndex": ticket.level_index,
        "levelId": ticket.level_id,
        "sequence": ticket.sequence,
        "parentValue": ticket.parent_value,
        "current": current,
    })
}

pub fn settlement_json(settlement: Settlement) -> serde_json::Value {
    json!({
        "applied": settlement.is_current(),
        "stale": !settlement.is_current(),
    })
}

pub fn levels_json(screen: &Screen) -> serde_json::Value {
    json!(screen.chain.snapshot())
}
