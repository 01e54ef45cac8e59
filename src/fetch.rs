//! Sequence-tagged fetch bookkeeping for dependent levels.
//!
//! Every fetch issued for a level gets the next sequence number for that level.
//! Resolution is accepted only for the highest issued sequence; anything older
//! is stale and dropped without touching state. Nothing is ever cancelled on the
//! wire, several fetches for one level may be outstanding and resolve in any
//! order.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchTicket {
    pub level_index: usize,
    pub level_id: String,
    pub sequence: u64,
    /// Value of the parent level at issue time; `None` for the root level.
    pub parent_value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Current,
    Stale,
}

impl Settlement {
    pub fn is_current(self) -> bool {
        self == Settlement::Current
    }
}

#[derive(Debug, Clone)]
struct Outstanding {
    ticket: FetchTicket,
    issued_at: Instant,
    order: u64,
}

#[derive(Debug, Clone, Default)]
struct LevelSequence {
    issued: u64,
    outstanding: BTreeMap<u64, Outstanding>,
}

#[derive(Debug, Clone)]
pub struct FetchCoordinator {
    levels: Vec<LevelSequence>,
    next_order: u64,
}

impl FetchCoordinator {
    pub fn new(level_count: usize) -> Self {
        Self {
            levels: vec![LevelSequence::default(); level_count],
            next_order: 0,
        }
    }

    /// Issue a new fetch for `level_index`. Earlier outstanding fetches for the
    /// same level become stale immediately.
    ///
    /// Panics if `level_index` is out of range; the chain validates indices
    /// before calling in.
    pub fn issue(
        &mut self,
        level_index: usize,
        level_id: &str,
        parent_value: Option<&str>,
        now: Instant,
    ) -> FetchTicket {
        let level = &mut self.levels[level_index];
        level.issued += 1;
        let ticket = FetchTicket {
            level_index,
            level_id: level_id.to_string(),
            sequence: level.issued,
            parent_value: parent_value.map(str::to_string),
        };
        level.outstanding.insert(
            ticket.sequence,
            Outstanding {
                ticket: ticket.clone(),
                issued_at: now,
                order: self.next_order,
            },
        );
        self.next_order += 1;
        tracing::debug!(
            level = %ticket.level_id,
            sequence = ticket.sequence,
            "fetch issued"
        );
        ticket
    }

    /// Make everything outstanding for the level stale without issuing.
    pub fn invalidate(&mut self, level_index: usize) {
        let level = &mut self.levels[level_index];
        if level.outstanding.contains_key(&level.issued) {
            tracing::debug!(level_index, sequence = level.issued, "fetch invalidated");
        }
        level.issued += 1;
    }

    /// Consume a resolution for `ticket`. Returns `Current` only when the ticket
    /// is the level's latest issued fetch and has not been settled or expired.
    pub fn settle(&mut self, ticket: &FetchTicket) -> Settlement {
        let Some(level) = self.levels.get_mut(ticket.level_index) else {
            return Settlement::Stale;
        };
        let was_outstanding = level.outstanding.remove(&ticket.sequence).is_some();
        if was_outstanding && ticket.sequence == level.issued {
            Settlement::Current
        } else {
            tracing::debug!(
                level = %ticket.level_id,
                sequence = ticket.sequence,
                latest = level.issued,
                "stale response discarded"
            );
            Settlement::Stale
        }
    }

    pub fn is_loading(&self, level_index: usize) -> bool {
        self.levels
            .get(level_index)
            .map(|l| l.outstanding.contains_key(&l.issued))
            .unwrap_or(false)
    }

    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        self.levels
            .get(ticket.level_index)
            .map(|l| l.issued == ticket.sequence && l.outstanding.contains_key(&ticket.sequence))
            .unwrap_or(false)
    }

    /// Look up an outstanding ticket by level and sequence.
    pub fn find(&self, level_index: usize, sequence: u64) -> Option<&FetchTicket> {
        self.levels
            .get(level_index)
            .and_then(|l| l.outstanding.get(&sequence))
            .map(|o| &o.ticket)
    }

    /// Every outstanding ticket, stale ones included, in issue order.
    pub fn pending(&self) -> Vec<FetchTicket> {
        let mut all: Vec<&Outstanding> = self
            .levels
            .iter()
            .flat_map(|l| l.outstanding.values())
            .collect();
        all.sort_by_key(|o| o.order);
        all.into_iter().map(|o| o.ticket.clone()).collect()
    }

    /// Drop every outstanding fetch older than `timeout`. Returns the ones that
    /// were still current; late resolutions for them will be stale.
    pub fn expire_overdue(&mut self, now: Instant, timeout: Duration) -> Vec<FetchTicket> {
        let mut expired = Vec::new();
        for level in &mut self.levels {
            let issued = level.issued;
            level.outstanding.retain(|seq, o| {
                let overdue = now.saturating_duration_since(o.issued_at) >= timeout;
                if overdue && *seq == issued {
                    expired.push(o.ticket.clone());
                }
                !overdue
            });
        }
        expired
    }
}
