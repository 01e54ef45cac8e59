use crate::catalog::{LevelKind, OptionSource, ReportSource};
use crate::chain::SelectionChain;
use crate::config::EngineConfig;
use crate::disclosure::{DisclosureTree, NodePath};
use crate::error::FetchError;
use crate::fetch::{FetchTicket, Settlement};
use crate::polling::Poller;
use crate::query::{FilterState, Query, Translator};
use crate::report::GroupedReport;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Supplied by the host; the engine never detects it on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            _ => None,
        }
    }
}

/// All state owned by one open management/report screen.
pub struct Screen {
    pub id: String,
    kinds: Vec<LevelKind>,
    pub chain: SelectionChain,
    pub disclosure: DisclosureTree,
    filters: FilterState,
    translator: Translator,
    pub poller: Poller,
    theme: Theme,
    auto_resolve: bool,
    fetch_timeout: Duration,
    report_paths: Vec<NodePath>,
    report_error: Option<FetchError>,
}

impl Screen {
    /// Build the screen and issue the root level fetch.
    pub fn open(
        id: String,
        kinds: Vec<LevelKind>,
        theme: Theme,
        auto_resolve: bool,
        config: &EngineConfig,
        now: Instant,
    ) -> Self {
        let mut chain = SelectionChain::new(kinds.iter().map(|k| k.as_str()));
        chain.mount(now);
        Self {
            id,
            kinds,
            chain,
            disclosure: DisclosureTree::new(),
            filters: FilterState::new(),
            translator: Translator::new(config.show_all_keys.iter().cloned()),
            poller: Poller::new(config.poll_interval),
            theme,
            auto_resolve,
            fetch_timeout: config.fetch_timeout,
            report_paths: Vec::new(),
            report_error: None,
        }
    }

    pub fn kinds(&self) -> &[LevelKind] {
        &self.kinds
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.theme = theme;
    }

    pub fn auto_resolve(&self) -> bool {
        self.auto_resolve
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Fail current fetches that have waited longer than the screen's timeout.
    pub fn expire_overdue(&mut self, now: Instant) -> Vec<FetchTicket> {
        self.chain.expire_overdue(now, self.fetch_timeout)
    }

    /// Run `ticket` against `source` and apply the outcome.
    pub fn resolve(&mut self, ticket: &FetchTicket, source: &dyn OptionSource) -> Settlement {
        let Some(kind) = self.kinds.get(ticket.level_index).copied() else {
            return Settlement::Stale;
        };
        let outcome = source.lookup(kind, ticket.parent_value.as_deref());
        self.chain.complete(ticket, outcome)
    }

    /// Resolve every outstanding fetch in issue order.
    pub fn drain(&mut self, source: &dyn OptionSource) -> Vec<(FetchTicket, Settlement)> {
        let mut out = Vec::new();
        // Resolving can't issue new fetches, so one pass empties the queue.
        for ticket in self.chain.pending() {
            let settled = self.resolve(&ticket, source);
            out.push((ticket, settled));
        }
        out
    }

    pub fn set_filters(&mut self, patch: &FilterState, replace: bool) {
        if replace {
            self.filters = patch.clone();
        } else {
            for (k, v) in patch {
                self.filters.insert(k.clone(), v.clone());
            }
        }
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    /// Explicit filters plus the chain's selections keyed by level kind. A
    /// selected level wins over a filter with the same key; an unset one leaves
    /// the filter alone.
    pub fn filter_state(&self) -> FilterState {
        let mut state = self.filters.clone();
        for (index, kind) in self.kinds.iter().enumerate() {
            let value = self.chain.value(index).unwrap_or_default();
            if value.is_empty() {
                continue;
            }
            state.insert(
                kind.as_str().to_string(),
                serde_json::Value::String(value.to_string()),
            );
        }
        state
    }

    pub fn query(&self) -> Query {
        self.translator.translate(&self.filter_state())
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    /// Load the grouped report for the current query. Disclosure nodes whose
    /// paths are gone from the new report are pruned.
    pub fn load_report(&mut self, source: &dyn ReportSource) -> Result<GroupedReport, FetchError> {
        let query = self.query();
        match source.grouped_report(&query) {
            Ok(report) => {
                let paths = report.paths();
                if !self.disclosure.is_empty() {
                    let pruned = self.disclosure.retain_paths(&paths);
                    if pruned > 0 {
                        tracing::debug!(screen = %self.id, pruned, "pruned disclosure nodes");
                    }
                }
                self.report_paths = paths;
                self.report_error = None;
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(screen = %self.id, error = %e, "grouped report failed");
                self.report_error = Some(e.clone());
                Err(e)
            }
        }
    }

    pub fn report_paths(&self) -> &[NodePath] {
        &self.report_paths
    }

    pub fn report_error(&self) -> Option<&FetchError> {
        self.report_error.as_ref()
    }
}
