// Copyright 2025 The Gitsieve Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Rebuilding one commit's tree under the keep/remove patterns.
//!
//! The walk collects every leaf of the source tree, then runs two fan-out
//! phases over the scheduler: the keep phase decides which leaves enter the
//! working set, the remove phase evicts from it. Entries are keyed by their
//! per-walk index, so concurrent decisions about different leaves never
//! interfere, and re-deciding one leaf overwrites its previous entry.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::patterns::{MatchedRule, PatternSet};
use crate::predicate::{EntryContext, PredicateError, PredicateHost};
use crate::repo_path::RepoPathBuf;
use crate::rewrite::MutableCommit;
use crate::scheduler::Scheduler;
use crate::store::{BlobId, CommitId, GitStore, StoreError, TreeId, TreeValue};

/// A leaf of the source tree under evaluation. Submodule links report a
/// size of zero and are never binary.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub path: RepoPathBuf,
    pub name: String,
    /// Never `TreeValue::Tree`; subtrees are recursed into, not evaluated.
    pub value: TreeValue,
    pub size: u64,
    pub is_binary: bool,
}

/// Working copy of a [`TreeEntry`] handed to an entry predicate.
#[derive(Debug)]
pub struct MutableEntry {
    entry: Arc<TreeEntry>,
    /// Whether the entry stays out of the rewritten tree. The caller seeds
    /// the default: `false` for keep rules, `true` for remove rules.
    pub discard: bool,
    /// Replacement blob contents, if the predicate installed any.
    pub content: Option<Vec<u8>>,
    pub executable: bool,
}

impl MutableEntry {
    pub fn new(entry: Arc<TreeEntry>, discard: bool) -> Self {
        let executable = matches!(
            entry.value,
            TreeValue::Blob {
                executable: true,
                ..
            }
        );
        MutableEntry {
            entry,
            discard,
            content: None,
            executable,
        }
    }

    pub fn path(&self) -> &RepoPathBuf {
        &self.entry.path
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn value(&self) -> &TreeValue {
        &self.entry.value
    }

    pub fn size(&self) -> u64 {
        self.entry.size
    }

    pub fn is_binary(&self) -> bool {
        self.entry.is_binary
    }
}

/// What an admitted entry contributes to the rewritten tree.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OutputValue {
    Blob { id: BlobId, executable: bool },
    Inline { data: Vec<u8>, executable: bool },
    Symlink(BlobId),
    GitSubmodule(CommitId),
}

#[derive(Debug)]
struct Admitted {
    entry: Arc<TreeEntry>,
    output: OutputValue,
}

/// The set of leaves currently selected for the rewritten tree, keyed by
/// per-walk leaf index.
#[derive(Debug, Default)]
struct WorkingSet {
    entries: Mutex<HashMap<usize, Admitted>>,
}

impl WorkingSet {
    fn admit(&self, index: usize, admitted: Admitted) {
        self.entries.lock().unwrap().insert(index, admitted);
    }

    fn evict(&self, index: usize) {
        self.entries.lock().unwrap().remove(&index);
    }

    fn snapshot(&self) -> Vec<(usize, Arc<TreeEntry>)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(index, admitted)| (*index, admitted.entry.clone()))
            .collect()
    }

    fn into_admitted(self) -> Vec<Admitted> {
        self.entries
            .into_inner()
            .unwrap()
            .into_values()
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Polarity {
    Keep,
    Remove,
}

#[derive(Debug, Error)]
pub enum TreeFilterError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Predicate(#[from] PredicateError),
}

/// Rebuilds source trees under a pair of pattern sets.
pub struct TreeFilter<'a> {
    store: &'a GitStore,
    keep: &'a PatternSet,
    remove: &'a PatternSet,
    host: &'a dyn PredicateHost,
    scheduler: Scheduler,
    include_links: bool,
}

impl<'a> TreeFilter<'a> {
    pub fn new(
        store: &'a GitStore,
        keep: &'a PatternSet,
        remove: &'a PatternSet,
        host: &'a dyn PredicateHost,
        scheduler: Scheduler,
        include_links: bool,
    ) -> Self {
        TreeFilter {
            store,
            keep,
            remove,
            host,
            scheduler,
            include_links,
        }
    }

    /// Rebuilds `tree_id`, returning `None` when no entry was admitted.
    ///
    /// `commit` is shared with entry predicates, which may set its
    /// `discard` flag; the caller must check that flag afterwards.
    pub fn rebuild(
        &self,
        commit: &Mutex<MutableCommit>,
        tree_id: &TreeId,
    ) -> Result<Option<TreeId>, TreeFilterError> {
        let leaves = self.collect_leaves(tree_id)?;
        let working = WorkingSet::default();

        let keep_items = leaves.into_iter().enumerate().collect();
        self.scheduler.try_for_each(keep_items, |(index, entry)| {
            self.evaluate(commit, &working, index, entry, Polarity::Keep)
        })?;
        if commit.lock().unwrap().discard {
            return Ok(None);
        }

        if !self.remove.is_empty() {
            self.scheduler
                .try_for_each(working.snapshot(), |(index, entry)| {
                    self.evaluate(commit, &working, index, entry, Polarity::Remove)
                })?;
            if commit.lock().unwrap().discard {
                return Ok(None);
            }
        }

        let admitted = working.into_admitted();
        if admitted.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.write_admitted(admitted)?))
    }

    /// Depth-first walk collecting the leaves to evaluate. Blob metadata is
    /// read here, on the calling thread, so the fan-out phases touch the
    /// store only for predicate content reads.
    fn collect_leaves(&self, tree_id: &TreeId) -> Result<Vec<Arc<TreeEntry>>, TreeFilterError> {
        let mut leaves = vec![];
        self.collect_dir(&RepoPathBuf::root(), tree_id, &mut leaves)?;
        Ok(leaves)
    }

    fn collect_dir(
        &self,
        dir: &RepoPathBuf,
        tree_id: &TreeId,
        leaves: &mut Vec<Arc<TreeEntry>>,
    ) -> Result<(), TreeFilterError> {
        for (name, value) in self.store.read_tree(tree_id)? {
            let path = dir.join(&name);
            match value {
                TreeValue::Tree(sub_tree) => self.collect_dir(&path, &sub_tree, leaves)?,
                TreeValue::Blob { id, executable } => {
                    let (size, is_binary) = self.store.blob_metadata(&id)?;
                    leaves.push(Arc::new(TreeEntry {
                        path,
                        name,
                        value: TreeValue::Blob { id, executable },
                        size,
                        is_binary,
                    }));
                }
                TreeValue::Symlink(id) => {
                    let (size, _) = self.store.blob_metadata(&id)?;
                    leaves.push(Arc::new(TreeEntry {
                        path,
                        name,
                        value: TreeValue::Symlink(id),
                        size,
                        is_binary: false,
                    }));
                }
                TreeValue::GitSubmodule(id) => {
                    if self.include_links {
                        leaves.push(Arc::new(TreeEntry {
                            path,
                            name,
                            value: TreeValue::GitSubmodule(id),
                            size: 0,
                            is_binary: false,
                        }));
                    }
                }
            }
        }
        Ok(())
    }

    /// Decides one leaf under one polarity and applies the decision to the
    /// working set.
    fn evaluate(
        &self,
        commit: &Mutex<MutableCommit>,
        working: &WorkingSet,
        index: usize,
        entry: Arc<TreeEntry>,
        polarity: Polarity,
    ) -> Result<(), TreeFilterError> {
        let patterns = match polarity {
            Polarity::Keep => self.keep,
            Polarity::Remove => self.remove,
        };
        if polarity == Polarity::Keep && patterns.is_empty() {
            working.admit(
                index,
                Admitted {
                    output: original_output(&entry),
                    entry,
                },
            );
            return Ok(());
        }
        match patterns.match_path(entry.path.as_str()) {
            None => Ok(()),
            Some(MatchedRule::Plain) => {
                match polarity {
                    Polarity::Keep => working.admit(
                        index,
                        Admitted {
                            output: original_output(&entry),
                            entry,
                        },
                    ),
                    Polarity::Remove => working.evict(index),
                }
                Ok(())
            }
            Some(MatchedRule::Scripted(rule_index)) => {
                let rule = patterns.scripted_rule(rule_index);
                let mut mutable = MutableEntry::new(entry.clone(), polarity == Polarity::Remove);
                {
                    // One predicate invocation at a time may see the commit.
                    let mut commit = commit.lock().unwrap();
                    self.host.invoke_entry(
                        rule.predicate,
                        EntryContext {
                            repo: self.store,
                            pattern: &rule.glob,
                            commit: &mut commit,
                            entry: &mut mutable,
                        },
                    )?;
                    if commit.discard {
                        return Ok(());
                    }
                }
                if mutable.discard {
                    working.evict(index);
                } else {
                    working.admit(
                        index,
                        Admitted {
                            output: replaced_output(&entry, mutable),
                            entry,
                        },
                    );
                }
                Ok(())
            }
        }
    }

    fn write_admitted(&self, admitted: Vec<Admitted>) -> Result<TreeId, TreeFilterError> {
        let mut tree: BTreeMap<RepoPathBuf, TreeValue> = BTreeMap::new();
        for Admitted { entry, output } in admitted {
            let value = match output {
                OutputValue::Inline { data, executable } => TreeValue::Blob {
                    id: self.store.write_blob(&data)?,
                    executable,
                },
                OutputValue::Blob { id, executable } => TreeValue::Blob { id, executable },
                OutputValue::Symlink(id) => TreeValue::Symlink(id),
                OutputValue::GitSubmodule(id) => TreeValue::GitSubmodule(id),
            };
            tree.insert(entry.path.clone(), value);
        }
        Ok(self.store.write_tree(&tree)?)
    }
}

fn original_output(entry: &TreeEntry) -> OutputValue {
    match &entry.value {
        TreeValue::Blob { id, executable } => OutputValue::Blob {
            id: id.clone(),
            executable: *executable,
        },
        TreeValue::Symlink(id) => OutputValue::Symlink(id.clone()),
        TreeValue::GitSubmodule(id) => OutputValue::GitSubmodule(id.clone()),
        TreeValue::Tree(_) => unreachable!("trees are never leaves"),
    }
}

/// Applies whatever the predicate left in the mutable entry to the
/// admitted output. Replacement content and the executable bit only apply
/// to blobs.
fn replaced_output(entry: &TreeEntry, mutable: MutableEntry) -> OutputValue {
    match &entry.value {
        TreeValue::Blob { id, .. } => match mutable.content {
            Some(data) => OutputValue::Inline {
                data,
                executable: mutable.executable,
            },
            None => OutputValue::Blob {
                id: id.clone(),
                executable: mutable.executable,
            },
        },
        _ => original_output(entry),
    }
}
