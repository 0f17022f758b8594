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

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Once;

use git2::Oid;
use gitsieve_lib::store::GitStore;
use tempfile::TempDir;

pub fn hermetic_libgit2() {
    // libgit2 respects init.defaultBranch (and possibly other config
    // variables) in the user's config files. Disable access to them to make
    // our tests hermetic.
    //
    // set_search_path is unsafe because it cannot guarantee thread safety (as
    // its documentation states). For the same reason, we wrap these invocations
    // in `call_once`.
    static CONFIGURE_GIT2: Once = Once::new();
    CONFIGURE_GIT2.call_once(|| unsafe {
        git2::opts::set_search_path(git2::ConfigLevel::System, "").unwrap();
        git2::opts::set_search_path(git2::ConfigLevel::Global, "").unwrap();
        git2::opts::set_search_path(git2::ConfigLevel::XDG, "").unwrap();
        git2::opts::set_search_path(git2::ConfigLevel::ProgramData, "").unwrap();
    });
}

pub fn new_temp_dir() -> TempDir {
    hermetic_libgit2();
    tempfile::Builder::new()
        .prefix("gitsieve-test-")
        .tempdir()
        .unwrap()
}

/// A scratch git repository. Commits are written straight to the object
/// database; the working copy is never touched.
pub struct TestRepo {
    _temp_dir: TempDir,
    pub path: PathBuf,
}

impl TestRepo {
    pub fn init() -> TestRepo {
        let temp_dir = new_temp_dir();
        let path = temp_dir.path().join("repo");
        fs::create_dir(&path).unwrap();
        git2::Repository::init(&path).unwrap();
        TestRepo {
            _temp_dir: temp_dir,
            path,
        }
    }

    pub fn open(&self) -> git2::Repository {
        git2::Repository::open(&self.path).unwrap()
    }

    pub fn store(&self) -> GitStore {
        GitStore::discover(&self.path).unwrap()
    }

    /// Writes a commit whose tree contains exactly `files`. The commit is
    /// not referenced by anything until `set_head` (or a branch) points at
    /// it. Timestamps are fixed so identical inputs produce identical ids.
    pub fn commit(&self, parents: &[Oid], files: &[(&str, &[u8])], message: &str) -> Oid {
        let repo = self.open();
        let tree_oid = build_tree(&repo, files);
        let tree = repo.find_tree(tree_oid).unwrap();
        let signature = git2::Signature::new(
            "Test User",
            "test.user@example.com",
            &git2::Time::new(1_700_000_000, 0),
        )
        .unwrap();
        let parent_commits: Vec<_> = parents
            .iter()
            .map(|oid| repo.find_commit(*oid).unwrap())
            .collect();
        let parent_refs: Vec<_> = parent_commits.iter().collect();
        repo.commit(None, &signature, &signature, message, &tree, &parent_refs)
            .unwrap()
    }

    /// Points the branch HEAD refers to at `oid`.
    pub fn set_head(&self, oid: Oid) {
        let repo = self.open();
        let head = repo.find_reference("HEAD").unwrap();
        let target = head.symbolic_target().unwrap().to_owned();
        repo.reference(&target, oid, true, "test setup").unwrap();
    }

    pub fn branch_tip(&self, name: &str) -> Oid {
        let repo = self.open();
        let result = repo
            .find_reference(&format!("refs/heads/{name}"))
            .unwrap()
            .target()
            .unwrap();
        result
    }
}

/// Builds nested trees from a flat `path -> content` list and returns the
/// root tree id.
pub fn build_tree(repo: &git2::Repository, files: &[(&str, &[u8])]) -> Oid {
    let mut blobs: Vec<(&str, &[u8])> = vec![];
    let mut subdirs: BTreeMap<&str, Vec<(&str, &[u8])>> = BTreeMap::new();
    for (path, content) in files.iter().copied() {
        match path.split_once('/') {
            None => blobs.push((path, content)),
            Some((dir, rest)) => subdirs.entry(dir).or_default().push((rest, content)),
        }
    }
    let mut builder = repo.treebuilder(None).unwrap();
    for (name, content) in blobs {
        let oid = repo.blob(content).unwrap();
        builder.insert(name, oid, 0o100644).unwrap();
    }
    for (name, entries) in subdirs {
        let oid = build_tree(repo, &entries);
        builder.insert(name, oid, 0o040000).unwrap();
    }
    builder.write().unwrap()
}

/// Flattened, sorted list of blob paths in a commit's tree.
pub fn tree_files(repo: &git2::Repository, commit: Oid) -> Vec<String> {
    let commit = repo.find_commit(commit).unwrap();
    let tree = commit.tree().unwrap();
    let mut files = vec![];
    tree.walk(git2::TreeWalkMode::PreOrder, |dir, entry| {
        if matches!(
            entry.kind(),
            Some(git2::ObjectType::Blob) | Some(git2::ObjectType::Commit)
        ) {
            files.push(format!("{}{}", dir, entry.name().unwrap()));
        }
        git2::TreeWalkResult::Ok
    })
    .unwrap();
    files.sort();
    files
}

/// All commits reachable from `tip`, children before parents.
pub fn log_ids(repo: &git2::Repository, tip: Oid) -> Vec<Oid> {
    let mut walk = repo.revwalk().unwrap();
    walk.set_sorting(git2::Sort::TOPOLOGICAL).unwrap();
    walk.push(tip).unwrap();
    walk.map(|oid| oid.unwrap()).collect()
}
