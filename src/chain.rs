//! Dependent selection chains (classroom -> subject -> evaluation -> ...).
//!
//! A chain is an ordered list of levels where level `i` takes its options from
//! the value selected at level `i - 1`. Changing a level clears everything below
//! it synchronously and issues one fetch for the next level. Option fetches are
//! resolved by the host through [`SelectionChain::complete`]; the coordinator
//! decides whether a resolution is still wanted.

use crate::error::{ChainError, FetchError};
use crate::fetch::{FetchCoordinator, FetchTicket, Settlement};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LevelState {
    Empty,
    Loading,
    Populated,
    Errored,
}

#[derive(Debug, Clone)]
struct SelectionLevel {
    id: String,
    current_value: String,
    options: Vec<SelectOption>,
    error: Option<FetchError>,
    populated: bool,
}

impl SelectionLevel {
    fn new(id: String) -> Self {
        Self {
            id,
            current_value: String::new(),
            options: Vec::new(),
            error: None,
            populated: false,
        }
    }

    fn reset(&mut self) {
        self.current_value.clear();
        self.options.clear();
        self.error = None;
        self.populated = false;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelSnapshot {
    pub index: usize,
    pub id: String,
    pub parent_id: Option<String>,
    pub value: String,
    pub options: Vec<SelectOption>,
    pub loading: bool,
    pub error: Option<FetchError>,
    pub state: LevelState,
}

#[derive(Debug, Clone)]
pub struct SelectionChain {
    levels: Vec<SelectionLevel>,
    fetches: FetchCoordinator,
}

impl SelectionChain {
    pub fn new<I, S>(level_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let levels: Vec<SelectionLevel> = level_ids
            .into_iter()
            .map(|id| SelectionLevel::new(id.into()))
            .collect();
        let fetches = FetchCoordinator::new(levels.len());
        Self { levels, fetches }
    }

    pub fn value(&self, index: usize) -> Option<&str> {
        self.levels.get(index).map(|l| l.current_value.as_str())
    }

    /// Issue the root level's fetch. The root has no parent, so it is the only
    /// level that loads without a selection above it.
    pub fn mount(&mut self, now: Instant) -> Option<FetchTicket> {
        let root = self.levels.first_mut()?;
        root.reset();
        let id = root.id.clone();
        Some(self.fetches.issue(0, &id, None, now))
    }

    pub fn set_level(
        &mut self,
        index: usize,
        value: &str,
        now: Instant,
    ) -> Result<Option<FetchTicket>, ChainError> {
        self.check_index(index)?;
        let level = &mut self.levels[index];
        if !value.is_empty() && !level.options.iter().any(|o| o.value == value) {
            return Err(ChainError::InvalidSelection {
                level: level.id.clone(),
                value: value.to_string(),
            });
        }
        level.current_value = value.to_string();
        tracing::debug!(level = %level.id, value, "level set");

        self.clear_below(index);

        let next = index + 1;
        if next >= self.levels.len() || value.is_empty() {
            return Ok(None);
        }
        let next_id = self.levels[next].id.clone();
        Ok(Some(self.fetches.issue(next, &next_id, Some(value), now)))
    }

    pub fn level(&self, index: usize) -> Result<LevelSnapshot, ChainError> {
        self.check_index(index)?;
        let level = &self.levels[index];
        let loading = self.fetches.is_loading(index);
        let state = if loading {
            LevelState::Loading
        } else if level.error.is_some() {
            LevelState::Errored
        } else if level.populated {
            LevelState::Populated
        } else {
            LevelState::Empty
        };
        Ok(LevelSnapshot {
            index,
            id: level.id.clone(),
            parent_id: index
                .checked_sub(1)
                .map(|p| self.levels[p].id.clone()),
            value: level.current_value.clone(),
            options: level.options.clone(),
            loading,
            error: level.error.clone(),
            state,
        })
    }

    pub fn snapshot(&self) -> Vec<LevelSnapshot> {
        (0..self.levels.len())
            .filter_map(|i| self.level(i).ok())
            .collect()
    }

    /// Apply the outcome of a fetch. Stale outcomes are discarded and leave the
    /// chain untouched.
    pub fn complete(
        &mut self,
        ticket: &FetchTicket,
        outcome: Result<Vec<SelectOption>, FetchError>,
    ) -> Settlement {
        let settlement = self.fetches.settle(ticket);
        if !settlement.is_current() {
            return settlement;
        }
        let Some(level) = self.levels.get_mut(ticket.level_index) else {
            return Settlement::Stale;
        };
        match outcome {
            Ok(options) => {
                level.options = options;
                level.error = None;
                level.populated = true;
                if !level.current_value.is_empty()
                    && !level.options.iter().any(|o| o.value == level.current_value)
                {
                    level.current_value.clear();
                }
            }
            Err(e) => {
                tracing::warn!(level = %level.id, sequence = ticket.sequence, error = %e, "option fetch failed");
                level.options.clear();
                level.current_value.clear();
                level.error = Some(e);
                level.populated = false;
            }
        }
        settlement
    }

    /// Explicit retry: reload `index` from its parent's current value. Only an
    /// errored or empty level can be retried.
    pub fn retry(&mut self, index: usize, now: Instant) -> Result<FetchTicket, ChainError> {
        self.check_index(index)?;
        let parent_value = match index.checked_sub(1) {
            None => None,
            Some(p) => {
                let v = self.levels[p].current_value.clone();
                if v.is_empty() {
                    return Err(ChainError::MissingParent {
                        level: self.levels[index].id.clone(),
                    });
                }
                Some(v)
            }
        };
        let state = self.level(index)?.state;
        if !matches!(state, LevelState::Errored | LevelState::Empty) {
            return Err(ChainError::NotRetryable {
                level: self.levels[index].id.clone(),
                state,
            });
        }
        self.levels[index].reset();
        self.clear_below(index);
        let id = self.levels[index].id.clone();
        Ok(self.fetches.issue(index, &id, parent_value.as_deref(), now))
    }

    /// Mark current fetches older than `timeout` as failed.
    pub fn expire_overdue(&mut self, now: Instant, timeout: Duration) -> Vec<FetchTicket> {
        let expired = self.fetches.expire_overdue(now, timeout);
        for t in &expired {
            if let Some(level) = self.levels.get_mut(t.level_index) {
                tracing::warn!(level = %level.id, sequence = t.sequence, "option fetch timed out");
                level.options.clear();
                level.current_value.clear();
                level.populated = false;
                level.error = Some(FetchError::timeout(timeout.as_millis()));
            }
        }
        expired
    }

    pub fn pending(&self) -> Vec<FetchTicket> {
        self.fetches.pending()
    }

    pub fn find_ticket(&self, index: usize, sequence: u64) -> Option<FetchTicket> {
        self.fetches.find(index, sequence).cloned()
    }

    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        self.fetches.is_current(ticket)
    }

    fn clear_below(&mut self, index: usize) {
        for j in index + 1..self.levels.len() {
            self.levels[j].reset();
            self.fetches.invalidate(j);
        }
    }

    fn check_index(&self, index: usize) -> Result<(), ChainError> {
        if index < self.levels.len() {
            Ok(())
        } else {
            Err(ChainError::UnknownLevel {
                index,
                len: self.levels.len(),
            })
        }
    }
}
