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

#![allow(missing_docs)]

//! The commit rewrite loop.
//!
//! Commits are processed strictly in topological-reverse order, parents
//! before children, so that the commit map is always current when a child
//! re-maps its parents. Inside one commit the tree phase fans out; between
//! commits everything is sequential.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::patterns::PatternSet;
use crate::predicate::{CommitContext, PredicateError, PredicateHandle, PredicateHost};
use crate::scheduler::Scheduler;
use crate::store::{CommitId, GitStore, Signature, SourceCommit, StoreError};
use crate::tree_filter::{TreeFilter, TreeFilterError};

/// Working copy of a source commit handed to the commit predicate. All
/// fields are writable except the id and the parent list.
#[derive(Debug, Clone)]
pub struct MutableCommit {
    id: CommitId,
    parent_ids: Vec<CommitId>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
    /// When set by a predicate, the commit is dropped from the rewritten
    /// history and descendants re-map through its parents.
    pub discard: bool,
    /// Free slot for predicates to stash state in.
    pub tag: Option<String>,
}

impl MutableCommit {
    pub fn new(source: &SourceCommit) -> Self {
        MutableCommit {
            id: source.id.clone(),
            parent_ids: source.parent_ids.clone(),
            author: source.author.clone(),
            committer: source.committer.clone(),
            message: source.message.clone(),
            discard: false,
            tag: None,
        }
    }

    pub fn id(&self) -> &CommitId {
        &self.id
    }

    pub fn parent_ids(&self) -> &[CommitId] {
        &self.parent_ids
    }
}

#[derive(Clone, Debug, Default)]
pub struct RewriteOptions {
    /// Cut original-parent links at the boundary of the revision range.
    pub detach: bool,
    /// Feed submodule links through tree filtering.
    pub include_links: bool,
    /// Never prune two-parent commits through tree equality.
    pub preserve_merge_commits: bool,
    /// Run per-entry evaluation on the calling thread.
    pub serial: bool,
}

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("User script failed on commit {commit}: {message}")]
    PredicateRuntime { commit: String, message: String },
    #[error("Cannot remap parent {parent} of commit {commit}")]
    ParentRemapFailure { commit: String, parent: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Rewrites a sequence of commits, maintaining the source-to-rewritten
/// commit map and the discarded set.
pub struct CommitRewriter<'a> {
    store: &'a GitStore,
    host: &'a dyn PredicateHost,
    commit_filter: Option<PredicateHandle>,
    keep: &'a PatternSet,
    remove: &'a PatternSet,
    options: &'a RewriteOptions,
    scheduler: Scheduler,
    /// source commit id -> rewritten commit id; entries are never removed.
    commit_map: HashMap<CommitId, CommitId>,
    /// Discarded source commits, with their source parents for resolution.
    discarded: HashMap<CommitId, Vec<CommitId>>,
    /// ParentResolver memo.
    resolved: HashMap<CommitId, Option<CommitId>>,
    head: Option<CommitId>,
}

impl<'a> CommitRewriter<'a> {
    pub fn new(
        store: &'a GitStore,
        host: &'a dyn PredicateHost,
        commit_filter: Option<PredicateHandle>,
        keep: &'a PatternSet,
        remove: &'a PatternSet,
        options: &'a RewriteOptions,
    ) -> Self {
        CommitRewriter {
            store,
            host,
            commit_filter,
            keep,
            remove,
            options,
            scheduler: Scheduler::new(options.serial),
            commit_map: HashMap::new(),
            discarded: HashMap::new(),
            resolved: HashMap::new(),
            head: None,
        }
    }

    pub fn commit_map(&self) -> &HashMap<CommitId, CommitId> {
        &self.commit_map
    }

    /// Number of commits materialised so far.
    pub fn written(&self) -> usize {
        self.commit_map.len()
    }

    pub fn head(&self) -> Option<&CommitId> {
        self.head.as_ref()
    }

    /// Rewrites all commits, parents before children, and returns the
    /// rewritten image of the last one.
    #[instrument(skip_all, fields(commits = commits.len()))]
    pub fn rewrite_all(&mut self, commits: &[CommitId]) -> Result<Option<CommitId>, RewriteError> {
        for id in commits {
            self.rewrite_one(id)?;
        }
        Ok(self.head.clone())
    }

    fn rewrite_one(&mut self, id: &CommitId) -> Result<(), RewriteError> {
        let source = self.store.read_commit(id)?;
        let mut mutable = MutableCommit::new(&source);

        // Commit predicate phase
        if let Some(handle) = self.commit_filter {
            self.host
                .invoke_commit(
                    handle,
                    CommitContext {
                        repo: self.store,
                        commit: &mut mutable,
                    },
                )
                .map_err(|err| predicate_runtime(id, err))?;
            if mutable.discard {
                debug!(commit = %id.hex(), "commit filter discarded commit");
                self.discard(&source);
                return Ok(());
            }
        }

        // Tree phase
        let new_tree = if !self.keep.is_empty() || !self.remove.is_empty() {
            let filter = TreeFilter::new(
                self.store,
                self.keep,
                self.remove,
                self.host,
                self.scheduler,
                self.options.include_links,
            );
            let commit_cell = Mutex::new(mutable);
            let rebuilt = filter.rebuild(&commit_cell, &source.tree_id).map_err(|err| match err {
                TreeFilterError::Store(err) => RewriteError::Store(err),
                TreeFilterError::Predicate(err) => predicate_runtime(id, err),
            })?;
            mutable = commit_cell.into_inner().unwrap();
            if mutable.discard {
                debug!(commit = %id.hex(), "entry predicate discarded commit");
                self.discard(&source);
                return Ok(());
            }
            match rebuilt {
                Some(tree_id) => tree_id,
                None => {
                    debug!(commit = %id.hex(), "rewritten tree is empty; discarding commit");
                    self.discard(&source);
                    return Ok(());
                }
            }
        } else {
            source.tree_id.clone()
        };

        // Parent mapping phase
        let mut new_parents: Vec<CommitId> = vec![];
        let mut unchanged_parents: Vec<CommitId> = vec![];
        let mut prune_candidate: Option<CommitId> = None;
        for parent in &source.parent_ids {
            let Some(resolved) = self.resolve_parent(id, parent)? else {
                continue;
            };
            if resolved == *parent {
                unchanged_parents.push(resolved.clone());
            }
            if new_parents.contains(&resolved) {
                // git rejects duplicate parent lines; first occurrence wins
                continue;
            }
            if prune_candidate.is_none() && self.store.commit_tree_id(&resolved)? == new_tree {
                prune_candidate = Some(resolved.clone());
            }
            new_parents.push(resolved);
        }

        // Prune: reuse the parent when the rewrite changed nothing
        if let Some(candidate) = prune_candidate {
            if !(self.options.preserve_merge_commits && new_parents.len() == 2) {
                debug!(
                    commit = %id.hex(),
                    parent = %candidate.hex(),
                    "tree unchanged from parent; pruning commit"
                );
                self.discard(&source);
                self.head = Some(candidate);
                return Ok(());
            }
        }

        // Detach: drop links that crossed the range boundary untouched
        if self.options.detach && !unchanged_parents.is_empty() {
            new_parents.retain(|parent| !unchanged_parents.contains(parent));
        }

        let new_id = self.store.write_commit(
            &mutable.author,
            &mutable.committer,
            &mutable.message,
            &new_tree,
            &new_parents,
        )?;
        debug!(commit = %id.hex(), rewritten = %new_id.hex(), "materialised commit");
        self.commit_map.insert(source.id.clone(), new_id.clone());
        self.head = Some(new_id);
        Ok(())
    }

    fn discard(&mut self, source: &SourceCommit) {
        self.discarded
            .insert(source.id.clone(), source.parent_ids.clone());
    }

    /// The parent resolver: maps a source commit id to the nearest
    /// rewritten ancestor, walking through discarded commits in parent
    /// order. An id outside the processed range resolves to itself;
    /// `None` means every ancestor was discarded.
    ///
    /// Single-parent chains are followed iteratively and the whole visited
    /// trail is memoised; recursion only happens at discarded merges, so
    /// the depth is bounded by the number of nested merges, not the chain
    /// length.
    fn resolve_parent(
        &mut self,
        commit: &CommitId,
        parent: &CommitId,
    ) -> Result<Option<CommitId>, RewriteError> {
        let mut trail: Vec<CommitId> = vec![];
        let mut current = parent.clone();
        let result = loop {
            if let Some(cached) = self.resolved.get(&current) {
                break cached.clone();
            }
            if let Some(image) = self.commit_map.get(&current) {
                break Some(image.clone());
            }
            match self.discarded.get(&current) {
                Some(parents) => match parents.as_slice() {
                    [] => {
                        trail.push(current.clone());
                        break None;
                    }
                    [single] => {
                        let single = single.clone();
                        trail.push(current);
                        current = single;
                    }
                    _ => {
                        let parents = parents.clone();
                        trail.push(current);
                        let mut found = None;
                        for p in &parents {
                            if let Some(resolved) = self.resolve_parent(commit, p)? {
                                found = Some(resolved);
                                break;
                            }
                        }
                        break found;
                    }
                },
                None => {
                    if !self.store.commit_exists(&current)? {
                        return Err(RewriteError::ParentRemapFailure {
                            commit: commit.hex(),
                            parent: current.hex(),
                        });
                    }
                    trail.push(current.clone());
                    break Some(current);
                }
            }
        };
        for visited in trail {
            self.resolved.insert(visited, result.clone());
        }
        Ok(result)
    }
}

fn predicate_runtime(id: &CommitId, err: PredicateError) -> RewriteError {
    RewriteError::PredicateRuntime {
        commit: id.hex(),
        message: err.to_string(),
    }
}
