//! Open/closed state for nested report groups.
//!
//! Nodes are identified by their full ancestor path. A subject called "Math"
//! under two classes is two nodes. Untouched nodes are open.

use crate::report::{GroupStats, GroupedReport, ReportItem};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

pub const DEFAULT_OPEN: bool = true;

pub type NodePath = Vec<String>;

#[derive(Debug, Clone, Default)]
pub struct DisclosureTree {
    nodes: HashMap<NodePath, bool>,
}

impl DisclosureTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self, path: &[String]) -> bool {
        self.nodes.get(path).copied().unwrap_or(DEFAULT_OPEN)
    }

    /// Flip the node and return its new state.
    pub fn toggle(&mut self, path: &[String]) -> bool {
        let open = !self.is_open(path);
        self.nodes.insert(path.to_vec(), open);
        open
    }

    pub fn set_open(&mut self, path: &[String], open: bool) {
        self.nodes.insert(path.to_vec(), open);
    }

    pub fn set_all<'a, I>(&mut self, paths: I, open: bool)
    where
        I: IntoIterator<Item = &'a NodePath>,
    {
        for p in paths {
            self.nodes.insert(p.clone(), open);
        }
    }

    /// Forget nodes whose path is not in `paths`.
    pub fn retain_paths(&mut self, paths: &[NodePath]) -> usize {
        let keep: HashSet<&NodePath> = paths.iter().collect();
        let before = self.nodes.len();
        self.nodes.retain(|p, _| keep.contains(p));
        before - self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Rows to render for `report`: a group is listed when every ancestor is
    /// open; an open question row carries its items.
    pub fn visible_rows(&self, report: &GroupedReport) -> Vec<VisibleRow> {
        let mut rows = Vec::new();
        let mut path: NodePath = Vec::with_capacity(4);
        for (class, subjects) in &report.classes {
            path.push(class.clone());
            let open = self.push_row(&mut rows, &path, None, Vec::new());
            if open {
                for (subject, evaluations) in subjects {
                    path.push(subject.clone());
                    let open = self.push_row(&mut rows, &path, None, Vec::new());
                    if open {
                        for (evaluation, questions) in evaluations {
                            path.push(evaluation.clone());
                            let open = self.push_row(&mut rows, &path, None, Vec::new());
                            if open {
                                for (question, group) in questions {
                                    path.push(question.clone());
                                    let items = if self.is_open(&path) {
                                        group.items.clone()
                                    } else {
                                        Vec::new()
                                    };
                                    self.push_row(
                                        &mut rows,
                                        &path,
                                        Some(group.stats.clone()),
                                        items,
                                    );
                                    path.pop();
                                }
                            }
                            path.pop();
                        }
                    }
                    path.pop();
                }
            }
            path.pop();
        }
        rows
    }

    fn push_row(
        &self,
        rows: &mut Vec<VisibleRow>,
        path: &[String],
        stats: Option<GroupStats>,
        items: Vec<ReportItem>,
    ) -> bool {
        let open = self.is_open(path);
        rows.push(VisibleRow {
            key: node_key(path),
            label: path.last().cloned().unwrap_or_default(),
            depth: path.len(),
            path: path.to_vec(),
            open,
            stats,
            items,
        });
        open
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleRow {
    pub key: String,
    pub label: String,
    pub depth: usize,
    pub path: NodePath,
    pub open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<GroupStats>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ReportItem>,
}

/// Stable render key for a node. Segments are length-prefixed before hashing so
/// no choice of separator characters inside labels can make two paths collide.
pub fn node_key(path: &[String]) -> String {
    let mut hasher = Sha256::new();
    for seg in path {
        hasher.update((seg.len() as u64).to_le_bytes());
        hasher.update(seg.as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(24);
    for b in digest.iter().take(12) {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
