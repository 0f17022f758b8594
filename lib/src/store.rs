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

use std::collections::BTreeMap;
use std::fmt::{Debug, Error, Formatter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use git2::Oid;
use itertools::Itertools;
use thiserror::Error;

use crate::repo_path::RepoPathBuf;

const MODE_BLOB: i32 = 0o100644;
const MODE_BLOB_EXECUTABLE: i32 = 0o100755;
const MODE_SYMLINK: i32 = 0o120000;
const MODE_GIT_SUBMODULE: i32 = 0o160000;
const MODE_TREE: i32 = 0o040000;

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub struct CommitId(Vec<u8>);

impl Debug for CommitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.debug_tuple("CommitId").field(&self.hex()).finish()
    }
}

impl CommitId {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<Oid> for CommitId {
    fn from(oid: Oid) -> Self {
        CommitId(oid.as_bytes().to_vec())
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub struct TreeId(Vec<u8>);

impl Debug for TreeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.debug_tuple("TreeId").field(&self.hex()).finish()
    }
}

impl TreeId {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<Oid> for TreeId {
    fn from(oid: Oid) -> Self {
        TreeId(oid.as_bytes().to_vec())
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub struct BlobId(Vec<u8>);

impl Debug for BlobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.debug_tuple("BlobId").field(&self.hex()).finish()
    }
}

impl BlobId {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<Oid> for BlobId {
    fn from(oid: Oid) -> Self {
        BlobId(oid.as_bytes().to_vec())
    }
}

/// Seconds since the epoch plus the zone offset git stores alongside it.
#[derive(Debug, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct Timestamp {
    pub seconds: i64,
    pub tz_offset_minutes: i32,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: Timestamp,
}

/// A read-only snapshot of a commit in the source repository.
#[derive(Debug, Clone)]
pub struct SourceCommit {
    pub id: CommitId,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
    pub tree_id: TreeId,
    pub parent_ids: Vec<CommitId>,
}

#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum TreeValue {
    Blob { id: BlobId, executable: bool },
    Symlink(BlobId),
    GitSubmodule(CommitId),
    Tree(TreeId),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Git(#[from] git2::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle to the source repository's object database.
///
/// Reads during the tree walk and serialized object writes share the one
/// `git2::Repository`, so every operation goes through the mutex.
pub struct GitStore {
    repo: Mutex<git2::Repository>,
}

impl Debug for GitStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.debug_struct("GitStore")
            .field("path", &self.lock_repo().path())
            .finish()
    }
}

fn signature_from_git(signature: &git2::Signature) -> Signature {
    Signature {
        name: String::from_utf8_lossy(signature.name_bytes()).into_owned(),
        email: String::from_utf8_lossy(signature.email_bytes()).into_owned(),
        timestamp: Timestamp {
            seconds: signature.when().seconds(),
            tz_offset_minutes: signature.when().offset_minutes(),
        },
    }
}

fn signature_to_git(signature: &Signature) -> Result<git2::Signature<'static>, git2::Error> {
    let time = git2::Time::new(
        signature.timestamp.seconds,
        signature.timestamp.tz_offset_minutes,
    );
    git2::Signature::new(&signature.name, &signature.email, &time)
}

fn to_oid(bytes: &[u8]) -> StoreResult<Oid> {
    Ok(Oid::from_bytes(bytes)?)
}

impl GitStore {
    /// Opens the repository containing `path`.
    pub fn discover(path: &Path) -> Result<GitStore, git2::Error> {
        let repo = git2::Repository::discover(path)?;
        Ok(GitStore {
            repo: Mutex::new(repo),
        })
    }

    fn lock_repo(&self) -> MutexGuard<'_, git2::Repository> {
        self.repo.lock().unwrap()
    }

    pub fn read_commit(&self, id: &CommitId) -> StoreResult<SourceCommit> {
        let repo = self.lock_repo();
        let commit = repo.find_commit(to_oid(id.as_bytes())?)?;
        let result = Ok(SourceCommit {
            id: commit.id().into(),
            author: signature_from_git(&commit.author()),
            committer: signature_from_git(&commit.committer()),
            message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
            tree_id: commit.tree_id().into(),
            parent_ids: commit.parent_ids().map(CommitId::from).collect(),
        });
        result
    }

    pub fn commit_exists(&self, id: &CommitId) -> StoreResult<bool> {
        let repo = self.lock_repo();
        let result = match repo.find_commit(to_oid(id.as_bytes())?) {
            Ok(_) => Ok(true),
            Err(err) if err.code() == git2::ErrorCode::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        };
        result
    }

    pub fn commit_tree_id(&self, id: &CommitId) -> StoreResult<TreeId> {
        let repo = self.lock_repo();
        let commit = repo.find_commit(to_oid(id.as_bytes())?)?;
        Ok(commit.tree_id().into())
    }

    /// Reads the immediate entries of a tree, in tree order.
    pub fn read_tree(&self, id: &TreeId) -> StoreResult<Vec<(String, TreeValue)>> {
        let repo = self.lock_repo();
        let tree = repo.find_tree(to_oid(id.as_bytes())?)?;
        let mut entries = vec![];
        for entry in tree.iter() {
            let name = String::from_utf8_lossy(entry.name_bytes()).into_owned();
            let value = match entry.filemode() {
                MODE_TREE => TreeValue::Tree(entry.id().into()),
                MODE_GIT_SUBMODULE => TreeValue::GitSubmodule(entry.id().into()),
                MODE_SYMLINK => TreeValue::Symlink(entry.id().into()),
                MODE_BLOB_EXECUTABLE => TreeValue::Blob {
                    id: entry.id().into(),
                    executable: true,
                },
                _ => TreeValue::Blob {
                    id: entry.id().into(),
                    executable: false,
                },
            };
            entries.push((name, value));
        }
        Ok(entries)
    }

    /// Returns `(size, is_binary)` for a blob.
    pub fn blob_metadata(&self, id: &BlobId) -> StoreResult<(u64, bool)> {
        let repo = self.lock_repo();
        let blob = repo.find_blob(to_oid(id.as_bytes())?)?;
        Ok((blob.size() as u64, blob.is_binary()))
    }

    pub fn read_blob(&self, id: &BlobId) -> StoreResult<Vec<u8>> {
        let repo = self.lock_repo();
        let blob = repo.find_blob(to_oid(id.as_bytes())?)?;
        Ok(blob.content().to_vec())
    }

    pub fn write_blob(&self, data: &[u8]) -> StoreResult<BlobId> {
        let repo = self.lock_repo();
        Ok(repo.blob(data)?.into())
    }

    /// Writes the nested trees described by a flat `path -> value` map and
    /// returns the root tree id. Values must not be `TreeValue::Tree`.
    pub fn write_tree(&self, entries: &BTreeMap<RepoPathBuf, TreeValue>) -> StoreResult<TreeId> {
        let repo = self.lock_repo();
        let mut dirs: BTreeMap<RepoPathBuf, BTreeMap<String, TreeValue>> = BTreeMap::new();
        dirs.insert(RepoPathBuf::root(), BTreeMap::new());
        for (path, value) in entries {
            let (dir, name) = path.split().expect("entry paths must not be the root");
            let mut ancestor = dir.clone();
            while !dirs.contains_key(&ancestor) {
                dirs.insert(ancestor.clone(), BTreeMap::new());
                match ancestor.parent() {
                    Some(parent) => ancestor = parent,
                    None => break,
                }
            }
            dirs.get_mut(&dir)
                .unwrap()
                .insert(name.to_owned(), value.clone());
        }

        // Deepest directories sort last, so popping from the back writes
        // children before their parents.
        while let Some((dir, contents)) = dirs.pop_last() {
            let mut builder = repo.treebuilder(None)?;
            for (name, value) in &contents {
                let (oid, mode) = match value {
                    TreeValue::Blob { id, executable } => (
                        to_oid(id.as_bytes())?,
                        if *executable {
                            MODE_BLOB_EXECUTABLE
                        } else {
                            MODE_BLOB
                        },
                    ),
                    TreeValue::Symlink(id) => (to_oid(id.as_bytes())?, MODE_SYMLINK),
                    TreeValue::GitSubmodule(id) => (to_oid(id.as_bytes())?, MODE_GIT_SUBMODULE),
                    TreeValue::Tree(id) => (to_oid(id.as_bytes())?, MODE_TREE),
                };
                builder.insert(name.as_str(), oid, mode)?;
            }
            let tree_oid = builder.write()?;
            match dir.split() {
                Some((parent, name)) => {
                    dirs.get_mut(&parent)
                        .unwrap()
                        .insert(name.to_owned(), TreeValue::Tree(tree_oid.into()));
                }
                None => return Ok(tree_oid.into()),
            }
        }

        unreachable!("the directory map always contains the root tree");
    }

    pub fn write_commit(
        &self,
        author: &Signature,
        committer: &Signature,
        message: &str,
        tree_id: &TreeId,
        parent_ids: &[CommitId],
    ) -> StoreResult<CommitId> {
        let repo = self.lock_repo();
        let tree = repo.find_tree(to_oid(tree_id.as_bytes())?)?;
        let parents: Vec<git2::Commit> = parent_ids
            .iter()
            .map(|id| Ok(repo.find_commit(to_oid(id.as_bytes())?)?))
            .collect::<StoreResult<_>>()?;
        let parent_refs = parents.iter().collect_vec();
        let author = signature_to_git(author)?;
        let committer = signature_to_git(committer)?;
        let oid = repo.commit(None, &author, &committer, message, &tree, &parent_refs)?;
        Ok(oid.into())
    }

    /// Resolves revspec text (`HEAD`, `HEAD~4`, a branch, a hex prefix) to
    /// the commit it names.
    pub fn resolve_revision(&self, spec: &str) -> StoreResult<CommitId> {
        let repo = self.lock_repo();
        let object = repo.revparse_single(spec)?;
        let commit = object.peel_to_commit()?;
        Ok(commit.id().into())
    }

    /// Enumerates commits reachable from `to` (and not from `from`) in
    /// topological-reverse order: parents always precede children.
    pub fn enumerate_range(
        &self,
        to: &CommitId,
        from: Option<&CommitId>,
    ) -> StoreResult<Vec<CommitId>> {
        let repo = self.lock_repo();
        let mut walk = repo.revwalk()?;
        walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE)?;
        walk.push(to_oid(to.as_bytes())?)?;
        if let Some(from) = from {
            walk.hide(to_oid(from.as_bytes())?)?;
        }
        walk.map(|oid| Ok(CommitId::from(oid?))).collect()
    }

    pub fn branch_exists(&self, name: &str) -> StoreResult<bool> {
        let repo = self.lock_repo();
        let result = match repo.find_reference(&format!("refs/heads/{name}")) {
            Ok(_) => Ok(true),
            Err(err) if err.code() == git2::ErrorCode::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        };
        result
    }

    /// Points `refs/heads/<name>` at `id`. With `force`, an existing ref is
    /// deleted first.
    pub fn set_branch(&self, name: &str, id: &CommitId, force: bool) -> StoreResult<()> {
        let repo = self.lock_repo();
        let refname = format!("refs/heads/{name}");
        if force {
            match repo.find_reference(&refname) {
                Ok(mut reference) => reference.delete()?,
                Err(err) if err.code() == git2::ErrorCode::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        repo.reference(&refname, to_oid(id.as_bytes())?, false, "history rewrite")?;
        Ok(())
    }
}
