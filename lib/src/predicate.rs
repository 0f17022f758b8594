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

//! The seam between the rewrite engine and user predicates.
//!
//! The engine never interprets predicate text itself; it compiles scripts
//! through a [`PredicateHost`] and invokes the returned handles. The host
//! shipped with this crate is [`crate::script::ScriptHost`], but anything
//! implementing the trait (a different DSL, a bytecode VM) plugs in the
//! same way.

use thiserror::Error;

use crate::rewrite::MutableCommit;
use crate::store::GitStore;
use crate::tree_filter::MutableEntry;

/// Opaque reference to a compiled predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PredicateHandle(pub(crate) usize);

/// What a commit predicate observes: the source repository and the commit
/// being rewritten. Decisions flow back through the mutable fields of
/// `commit`.
pub struct CommitContext<'a> {
    pub repo: &'a GitStore,
    pub commit: &'a mut MutableCommit,
}

/// What an entry predicate observes: additionally the glob that selected
/// the entry and the entry itself.
pub struct EntryContext<'a> {
    pub repo: &'a GitStore,
    pub pattern: &'a str,
    pub commit: &'a mut MutableCommit,
    pub entry: &'a mut MutableEntry,
}

#[derive(Debug, Error)]
pub enum PredicateError {
    /// The script failed to compile. The diagnostics carry line/column
    /// information and an indented dump of the script source.
    #[error("Failed to compile user script\n{diagnostics}")]
    Compilation { diagnostics: String },
    /// The script failed while running.
    #[error("{message}")]
    Runtime { message: String },
}

impl PredicateError {
    pub fn runtime(message: impl Into<String>) -> Self {
        PredicateError::Runtime {
            message: message.into(),
        }
    }
}

pub trait PredicateHost: Send + Sync {
    /// Compiles predicate text into an invocable handle.
    fn compile(&mut self, script: &str) -> Result<PredicateHandle, PredicateError>;

    fn invoke_commit(
        &self,
        handle: PredicateHandle,
        ctx: CommitContext<'_>,
    ) -> Result<(), PredicateError>;

    fn invoke_entry(
        &self,
        handle: PredicateHandle,
        ctx: EntryContext<'_>,
    ) -> Result<(), PredicateError>;
}
