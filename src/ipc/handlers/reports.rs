use crate::catalog::SqliteCatalog;
use crate::disclosure::node_key;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{path_param, required_str, screen_not_found};
use crate::ipc::types::{AppState, Request};
use crate::query::{self, FilterState, Translator};
use crate::report::GroupedReport;
use serde_json::json;

fn filters_param(req: &Request) -> Result<FilterState, serde_json::Value> {
    match req.params.get("filters") {
        None => Ok(FilterState::new()),
        Some(v) if v.is_null() => Ok(FilterState::new()),
        Some(v) => v
            .as_object()
            .cloned()
            .ok_or_else(|| err(&req.id, "bad_params", "filters must be an object", None)),
    }
}

fn handle_filters_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match filters_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let replace = req
        .params
        .get("replace")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let Some(screen) = state.screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    screen.set_filters(&patch, replace);
    ok(
        &req.id,
        json!({ "filters": screen.filters(), "query": screen.query() }),
    )
}

/// Stateless translation, handy for hosts that build queries without a screen.
fn handle_filters_translate(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let filters = match filters_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let query = match req.params.get("showAllKeys") {
        None => query::translate(&filters),
        Some(v) if v.is_null() => query::translate(&filters),
        Some(v) => {
            let Some(items) = v.as_array() else {
                return err(&req.id, "bad_params", "showAllKeys must be an array", None);
            };
            Translator::new(items.iter().filter_map(|k| k.as_str()).map(str::to_string))
                .translate(&filters)
        }
    };
    ok(&req.id, json!({ "query": query }))
}

fn handle_reports_grouped(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let AppState { db, screens, .. } = state;
    let Some(screen) = screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let query = screen.query();
    // A failed load is screen data, not a request failure; the host renders it
    // next to the last good report.
    let (report, error) = match screen.load_report(&SqliteCatalog::new(conn)) {
        Ok(r) => (Some(r), None),
        Err(e) => (None, Some(e)),
    };
    let rows = report
        .as_ref()
        .map(|r| screen.disclosure.visible_rows(r))
        .unwrap_or_default();
    let empty = report.as_ref().map(GroupedReport::is_empty).unwrap_or(true);
    ok(
        &req.id,
        json!({
            "query": query,
            "report": report,
            "rows": rows,
            "empty": empty,
            "error": error,
            "generatedAt": chrono::Utc::now().to_rfc3339(),
        }),
    )
}

fn handle_disclosure(state: &mut AppState, req: &Request, toggle: bool) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let path = match path_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(screen) = state.screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    let open = if toggle {
        screen.disclosure.toggle(&path)
    } else {
        screen.disclosure.is_open(&path)
    };
    ok(
        &req.id,
        json!({ "path": path, "open": open, "key": node_key(&path) }),
    )
}

fn handle_disclosure_set_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let path = match path_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(open) = req.params.get("open").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "open must be a boolean", None);
    };
    let Some(screen) = state.screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    screen.disclosure.set_open(&path, open);
    ok(
        &req.id,
        json!({ "path": path, "open": open, "key": node_key(&path) }),
    )
}

fn handle_disclosure_set_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    let screen_id = match required_str(req, "screenId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(open) = req.params.get("open").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "open must be a boolean", None);
    };
    let Some(screen) = state.screens.get_mut(&screen_id) else {
        return screen_not_found(req, &screen_id);
    };
    let paths = screen.report_paths().to_vec();
    screen.disclosure.set_all(&paths, open);
    ok(&req.id, json!({ "open": open, "count": paths.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "filters.set" => Some(handle_filters_set(state, req)),
        "filters.translate" => Some(handle_filters_translate(state, req)),
        "reports.grouped" => Some(handle_reports_grouped(state, req)),
        "disclosure.toggle" => Some(handle_disclosure(state, req, true)),
        "disclosure.isOpen" => Some(handle_disclosure(state, req, false)),
        "disclosure.setOpen" => Some(handle_disclosure_set_open(state, req)),
        "disclosure.setAll" => Some(handle_disclosure_set_all(state, req)),
        _ => None,
    }
}
