//! Screen lifecycle, selection chain and host-driven fetch resolution.

use crate::catalog::{validate_chain, SqliteCatalog};
use crate::config::EngineConfig;
use crate::error::FetchError;
use crate::ipc::error::{chain_err, err, ok};
use crate::ipc::helpers::{
    levels_json, parse_level_kinds, required_index, required_str, screen_not_found,
    settle_if_auto, settlement_json, ticket_json, NoWorkspace,
};
use crate::ipc::types::{AppState, Request};
use crate::screen::{Screen, Theme};
use serde_json::json;
use std::time::{Duration, Instant};
use uuid::Uuid;

fn parse_theme(req: &Request) -> Result<Option<Theme>, serde_json::Value> {
    match req.params.get("theme") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_str().and_then(Theme::parse).map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "theme must be one of: light, dark",
                Some(json!({ "theme": v })),
            )
        }),
    }
}

fn screen_json(screen: &Screen) -> serde_json::Value {
    let pending: Vec<serde_json::Value> = screen
        .chain
        .pending()
        .iter()
        .map(|t| ticket_json(t, screen.chain.is_current(t)))
        .collect();
    json!({
        "screenId": screen.id,
        "theme": screen.theme(),
        "autoResolve": screen.auto_resolve(),
        "levels": levels_json(screen),
        "filters": screen.filters(),
        "query": screen.query(),
        "showAllKeys": screen.translator().show_all_keys().collect::<Vec<_>>(),
        "pending": pending,
        "reportError": screen.report_error(),
        "disclosureNodes": screen.disclosure.len(),
        "counters": {
            "running": screen.poller.is_running(),
            "intervalMs": screen.poller.interval().as_millis() as u64
        }
    })
}

/// Reads fail overdue fetches first so a host that never calls `fetch.expire`
/// still sees timeouts.
fn expire_lazily(screen: &mut Screen) {
    let expired = screen.expire_overdue(Instant::now());
    if !expired.is_empty() {
        tracing::debug!(screen = %screen.id, count = expired.len(), "expired overdue fetches on read");
    }
}

fn handle_screen_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let kinds = match parse_level_kinds(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(msg) = validate_chain(&kinds) {
        return err(&req.id, "bad_params", msg, None);
    }
    let theme = match parse_theme(req) {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return e,
    };
    let config = match EngineConfig::load(state.db.as_ref()) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let auto_resolve = req
        .params
        .get("autoResolve")
        .and_then(|v| v.as_bool())
        .unwrap_or(config.auto_resolve);

    let screen_id = Uuid::new_v4().to_string();
    let mut screen = Screen::open(
        screen_id.clone(),
        kinds,
        theme,
        auto_resolve,
        &config,
        Instant::now(),
    );
    settle_if_auto(state.db.as_ref(), &mut screen);
    let body = screen_json(&screen);
    tracing::info!(screen = %screen_id, levels = screen.kinds().len(), auto_resolve, "screen opened");
    state.screens.insert(screen_id, screen);
    ok(&req.id, body)
}

fn handle_screen_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match state.screens.remove(&screen_id) {
        Some(_) => {
            tracing::info!(screen = %screen_id, "screen closed");
            ok(&req.id, json!({ "closed": true }))
        }
        None => screen_not_found(req, &screen_id),
    }
}

fn handle_screen_snapshot(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(screen) = state.screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    expire_lazily(screen);
    ok(&req.id, screen_json(screen))
}

fn handle_screen_set_theme(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let theme = match parse_theme(req) {
        Ok(Some(t)) => t,
        Ok(None) => return err(&req.id, "bad_params", "missing theme", None),
        Err(e) => return e,
    };
    let Some(screen) = state.screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    screen.set_theme(theme);
    ok(&req.id, json!({ "theme": theme }))
}

fn handle_chain_set_level(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let index = match required_index(req, "levelIndex") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let value = match req.params.get("value") {
        None => String::new(),
        Some(v) if v.is_null() => String::new(),
        Some(v) => match v.as_str() {
            Some(s) => s.to_string(),
            None => return err(&req.id, "bad_params", "value must be a string or null", None),
        },
    };
    let AppState { db, screens, .. } = state;
    let Some(screen) = screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };

    let issued = match screen.chain.set_level(index, &value, Instant::now()) {
        Ok(t) => t,
        Err(e) => return chain_err(&req.id, &e),
    };
    let issued_json = issued.as_ref().map(|t| ticket_json(t, true));
    settle_if_auto(db.as_ref(), screen);
    ok(
        &req.id,
        json!({ "issued": issued_json, "levels": levels_json(screen) }),
    )
}

fn handle_chain_get_level(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let index = match required_index(req, "levelIndex") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(screen) = state.screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    expire_lazily(screen);
    match screen.chain.level(index) {
        Ok(level) => ok(&req.id, json!({ "level": level })),
        Err(e) => chain_err(&req.id, &e),
    }
}

fn handle_chain_retry(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let index = match required_index(req, "levelIndex") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let AppState { db, screens, .. } = state;
    let Some(screen) = screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    let ticket = match screen.chain.retry(index, Instant::now()) {
        Ok(t) => t,
        Err(e) => return chain_err(&req.id, &e),
    };
    tracing::info!(screen = %screen_id, level = %ticket.level_id, "level retry");
    let issued = ticket_json(&ticket, true);
    settle_if_auto(db.as_ref(), screen);
    ok(
        &req.id,
        json!({ "issued": issued, "levels": levels_json(screen) }),
    )
}

fn handle_fetch_pending(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(screen) = state.screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    expire_lazily(screen);
    let pending: Vec<serde_json::Value> = screen
        .chain
        .pending()
        .iter()
        .map(|t| ticket_json(t, screen.chain.is_current(t)))
        .collect();
    ok(&req.id, json!({ "pending": pending }))
}

/// `fetch.resolve` runs the lookup against the catalog; `fetch.fail` applies a
/// failure reported by the host for the same ticket.
fn handle_fetch_settle(state: &mut AppState, req: &Request, fail: bool) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let index = match required_index(req, "levelIndex") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(sequence) = req.params.get("sequence").and_then(|v| v.as_u64()) else {
        return err(&req.id, "bad_params", "sequence must be a positive integer", None);
    };
    let AppState { db, screens, .. } = state;
    let Some(screen) = screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    if let Err(e) = screen.chain.level(index) {
        return chain_err(&req.id, &e);
    }

    // Already settled, expired or never issued: nothing to apply.
    let Some(ticket) = screen.chain.find_ticket(index, sequence) else {
        tracing::debug!(screen = %screen_id, index, sequence, "resolution for unknown ticket");
        let mut body = settlement_json(crate::fetch::Settlement::Stale);
        body["level"] = json!(screen.chain.level(index).ok());
        return ok(&req.id, body);
    };

    let settlement = if fail {
        let code = req
            .params
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("fetch_failed");
        let message = req
            .params
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("fetch failed");
        screen
            .chain
            .complete(&ticket, Err(FetchError::source(code, message)))
    } else {
        match db.as_ref() {
            Some(conn) => screen.resolve(&ticket, &SqliteCatalog::new(conn)),
            None => screen.resolve(&ticket, &NoWorkspace),
        }
    };

    let mut body = settlement_json(settlement);
    body["level"] = json!(screen.chain.level(index).ok());
    ok(&req.id, body)
}

fn handle_fetch_drain(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let AppState { db, screens, .. } = state;
    let Some(screen) = screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    let settled = match db.as_ref() {
        Some(conn) => screen.drain(&SqliteCatalog::new(conn)),
        None => screen.drain(&NoWorkspace),
    };
    let settled: Vec<serde_json::Value> = settled
        .iter()
        .map(|(t, s)| {
            json!({
                "levelIndex": t.level_index,
                "sequence": t.sequence,
                "applied": s.is_current()
            })
        })
        .collect();
    ok(
        &req.id,
        json!({ "settled": settled, "levels": levels_json(screen) }),
    )
}

fn handle_fetch_expire(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let timeout = match req.params.get("timeoutMs") {
        Some(v) if !v.is_null() => match v.as_u64() {
            Some(ms) => Some(Duration::from_millis(ms)),
            None => return err(&req.id, "bad_params", "timeoutMs must be a non-negative integer", None),
        },
        _ => None,
    };
    let Some(screen) = state.screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    let timeout = timeout.unwrap_or_else(|| screen.fetch_timeout());
    let expired: Vec<serde_json::Value> = screen
        .chain
        .expire_overdue(Instant::now(), timeout)
        .iter()
        .map(|t| ticket_json(t, false))
        .collect();
    ok(
        &req.id,
        json!({ "expired": expired, "levels": levels_json(screen) }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "screen.open" => Some(handle_screen_open(state, req)),
        "screen.close" => Some(handle_screen_close(state, req)),
        "screen.snapshot" => Some(handle_screen_snapshot(state, req)),
        "screen.setTheme" => Some(handle_screen_set_theme(state, req)),
        "chain.setLevel" => Some(handle_chain_set_level(state, req)),
        "chain.getLevel" => Some(handle_chain_get_level(state, req)),
        "chain.retry" => Some(handle_chain_retry(state, req)),
        "fetch.pending" => Some(handle_fetch_pending(state, req)),
        "fetch.resolve" => Some(handle_fetch_settle(state, req, false)),
        "fetch.fail" => Some(handle_fetch_settle(state, req, true)),
        "fetch.drain" => Some(handle_fetch_drain(state, req)),
        "fetch.expire" => Some(handle_fetch_expire(state, req)),
        _ => None,
    }
}
