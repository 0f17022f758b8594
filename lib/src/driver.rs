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

//! Validates run parameters, drives the rewrite loop, and writes the
//! output branch.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, instrument};

use crate::patterns::{PatternError, PatternOrigin, PatternParseError, PatternSet};
use crate::predicate::{PredicateError, PredicateHost};
use crate::revspec::Revspec;
use crate::rewrite::{CommitRewriter, RewriteError, RewriteOptions};
use crate::store::{CommitId, GitStore, StoreError};

/// Everything one rewrite run needs, assembled by the caller.
#[derive(Clone, Debug, Default)]
pub struct RewriteParams {
    /// Source repository; the current directory is searched when absent.
    pub repo_dir: Option<PathBuf>,
    /// Name of the branch that receives the rewritten history.
    pub branch: String,
    /// Overwrite the output branch if it already exists.
    pub force: bool,
    /// Accumulated keep-rule block (one rule per logical line).
    pub keep_rules: String,
    /// Accumulated remove-rule block.
    pub remove_rules: String,
    /// Commit-predicate body.
    pub commit_filter: Option<String>,
    /// Revision range to rewrite; `HEAD` when absent.
    pub revspec: Option<String>,
    pub options: RewriteOptions,
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    /// Commits enumerated in the revision range.
    pub processed: usize,
    /// Commits actually materialised (not discarded or pruned).
    pub written: usize,
    /// Rewritten image of the last commit; `None` when everything was
    /// discarded and no branch was written.
    pub tip: Option<CommitId>,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Not a git repository: {path}")]
    InvalidRepository {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },
    #[error("A branch name is required")]
    MissingBranchName,
    #[error("Branch {name} already exists; use force to overwrite it")]
    BranchExistsNoForce { name: String },
    #[error("Invalid revision specification \"{spec}\": {detail}")]
    InvalidRevspec { spec: String, detail: String },
    #[error(transparent)]
    PatternParse(#[from] PatternParseError),
    #[error("No commit filter or tree filter is configured")]
    MissingFilter,
    #[error("Failed to compile user script\n{diagnostics}")]
    PredicateCompilation { diagnostics: String },
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PatternError> for RunError {
    fn from(err: PatternError) -> Self {
        match err {
            PatternError::Parse(err) => RunError::PatternParse(err),
            PatternError::Predicate(err) => compilation_error(err),
        }
    }
}

fn compilation_error(err: PredicateError) -> RunError {
    match err {
        PredicateError::Compilation { diagnostics } => {
            RunError::PredicateCompilation { diagnostics }
        }
        PredicateError::Runtime { message } => RunError::PredicateCompilation {
            diagnostics: message,
        },
    }
}

/// Runs one rewrite: validate, enumerate, rewrite, write the branch ref.
#[instrument(skip_all, fields(branch = %params.branch))]
pub fn run(params: &RewriteParams, host: &mut dyn PredicateHost) -> Result<RunSummary, RunError> {
    if params.branch.is_empty() {
        return Err(RunError::MissingBranchName);
    }

    let repo_dir = params
        .repo_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let store = GitStore::discover(&repo_dir).map_err(|source| RunError::InvalidRepository {
        path: repo_dir.clone(),
        source,
    })?;

    if store.branch_exists(&params.branch)? && !params.force {
        return Err(RunError::BranchExistsNoForce {
            name: params.branch.clone(),
        });
    }

    let revspec =
        Revspec::parse(params.revspec.as_deref()).map_err(|err| RunError::InvalidRevspec {
            spec: params.revspec.clone().unwrap_or_default(),
            detail: err.to_string(),
        })?;

    if params.commit_filter.is_none()
        && params.keep_rules.trim().is_empty()
        && params.remove_rules.trim().is_empty()
    {
        return Err(RunError::MissingFilter);
    }

    let keep = PatternSet::parse(&params.keep_rules, PatternOrigin::Keep, &mut *host)?;
    let remove = PatternSet::parse(&params.remove_rules, PatternOrigin::Remove, &mut *host)?;
    let commit_filter = params
        .commit_filter
        .as_deref()
        .map(|script| host.compile(script))
        .transpose()
        .map_err(compilation_error)?;

    let resolve = |spec: &str| {
        store
            .resolve_revision(spec)
            .map_err(|err| RunError::InvalidRevspec {
                spec: spec.to_owned(),
                detail: err.to_string(),
            })
    };
    let (from_id, to_id) = match &revspec {
        Revspec::Single(rev) => (None, resolve(rev)?),
        Revspec::Range { from, to } => (Some(resolve(from)?), resolve(to)?),
    };
    let commits = store.enumerate_range(&to_id, from_id.as_ref())?;
    info!(commits = commits.len(), "enumerated revision range");

    let host = &*host;
    let mut rewriter = CommitRewriter::new(
        &store,
        host,
        commit_filter,
        &keep,
        &remove,
        &params.options,
    );
    let tip = rewriter.rewrite_all(&commits)?;
    let written = rewriter.written();

    match &tip {
        Some(tip) => {
            store.set_branch(&params.branch, tip, params.force)?;
            info!(branch = %params.branch, tip = %tip.hex(), written, "updated branch");
        }
        None => {
            info!("every commit in the range was discarded; branch not written");
        }
    }

    Ok(RunSummary {
        processed: commits.len(),
        written,
        tip,
    })
}
