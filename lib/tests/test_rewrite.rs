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

use assert_matches::assert_matches;
use gitsieve_lib::driver::{run, RewriteParams, RunError, RunSummary};
use gitsieve_lib::patterns::PatternParseError;
use gitsieve_lib::rewrite::RewriteError;
use gitsieve_lib::script::ScriptHost;
use testutils::{log_ids, tree_files, TestRepo};

fn base_params(repo: &TestRepo, branch: &str) -> RewriteParams {
    RewriteParams {
        repo_dir: Some(repo.path.clone()),
        branch: branch.to_owned(),
        ..RewriteParams::default()
    }
}

fn run_params(params: &RewriteParams) -> Result<RunSummary, RunError> {
    let mut host = ScriptHost::new();
    run(params, &mut host)
}

/// Five commits, each adding one file, HEAD at the newest.
fn linear_history(repo: &TestRepo) -> Vec<git2::Oid> {
    let mut commits = vec![];
    let mut files: Vec<(String, Vec<u8>)> = vec![];
    for i in 0..5 {
        files.push((format!("f{i}.txt"), format!("contents {i}").into_bytes()));
        let file_refs: Vec<(&str, &[u8])> = files
            .iter()
            .map(|(path, content)| (path.as_str(), content.as_slice()))
            .collect();
        let parents: Vec<git2::Oid> = commits.last().copied().into_iter().collect();
        commits.push(repo.commit(&parents, &file_refs, &format!("commit {i}")));
    }
    repo.set_head(*commits.last().unwrap());
    commits
}

#[test]
fn test_missing_filter() {
    let repo = TestRepo::init();
    let c0 = repo.commit(&[], &[("a.txt", b"a")], "initial");
    repo.set_head(c0);

    let params = base_params(&repo, "filtered");
    assert_matches!(run_params(&params), Err(RunError::MissingFilter));
}

#[test]
fn test_missing_branch_name() {
    let repo = TestRepo::init();
    let params = base_params(&repo, "");
    assert_matches!(run_params(&params), Err(RunError::MissingBranchName));
}

#[test]
fn test_invalid_repository() {
    let temp_dir = testutils::new_temp_dir();
    let params = RewriteParams {
        repo_dir: Some(temp_dir.path().to_owned()),
        branch: "filtered".to_owned(),
        keep_rules: "*\n".to_owned(),
        ..RewriteParams::default()
    };
    assert_matches!(run_params(&params), Err(RunError::InvalidRepository { .. }));
}

#[test]
fn test_invalid_revspec() {
    let repo = TestRepo::init();
    let c0 = repo.commit(&[], &[("a.txt", b"a")], "initial");
    repo.set_head(c0);

    let mut params = base_params(&repo, "filtered");
    params.keep_rules = "*\n".to_owned();
    params.revspec = Some("main...topic".to_owned());
    assert_matches!(run_params(&params), Err(RunError::InvalidRevspec { .. }));

    params.revspec = Some("no-such-revision".to_owned());
    assert_matches!(run_params(&params), Err(RunError::InvalidRevspec { .. }));
}

#[test]
fn test_branch_exists_requires_force() {
    let repo = TestRepo::init();
    let c0 = repo.commit(&[], &[("a.txt", b"a")], "initial");
    repo.set_head(c0);
    repo.open()
        .reference("refs/heads/filtered", c0, false, "test setup")
        .unwrap();

    let mut params = base_params(&repo, "filtered");
    params.keep_rules = "*\n".to_owned();
    assert_matches!(
        run_params(&params),
        Err(RunError::BranchExistsNoForce { .. })
    );

    params.force = true;
    let summary = run_params(&params).unwrap();
    assert_eq!(summary.processed, 1);
    assert!(summary.tip.is_some());
}

#[test]
fn test_scripted_rule_order() {
    let repo = TestRepo::init();
    let c0 = repo.commit(
        &[],
        &[("a.txt", b"a"), ("b.txt", b"b"), ("c.txt", b"c")],
        "initial",
    );
    repo.set_head(c0);

    let mut params = base_params(&repo, "filtered");
    params.keep_rules =
        "a.txt => entry.discard = false\n* => entry.discard = true\n".to_owned();
    let summary = run_params(&params).unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.written, 1);
    let git_repo = repo.open();
    assert_eq!(
        tree_files(&git_repo, repo.branch_tip("filtered")),
        ["a.txt"]
    );
}

#[test]
fn test_binary_and_size_keep() {
    let repo = TestRepo::init();
    let big = b"x".repeat(50);
    let c0 = repo.commit(
        &[],
        &[
            ("small.txt", b"12345678".as_slice()),
            ("big.txt", big.as_slice()),
            ("img.bin", b"\x00\x01\x02\x03\x04".as_slice()),
        ],
        "initial",
    );
    repo.set_head(c0);

    let mut params = base_params(&repo, "filtered");
    params.keep_rules =
        "* => entry.discard = entry.is_binary || entry.size > 10\n".to_owned();
    run_params(&params).unwrap();

    let git_repo = repo.open();
    assert_eq!(
        tree_files(&git_repo, repo.branch_tip("filtered")),
        ["small.txt"]
    );
}

#[test]
fn test_remove_with_exception() {
    let repo = TestRepo::init();
    let c0 = repo.commit(
        &[],
        &[
            ("Test1/a1.txt", b"a1".as_slice()),
            ("Test1/a2.txt", b"a2".as_slice()),
            ("Test1/b.txt", b"b".as_slice()),
        ],
        "first",
    );
    let c1 = repo.commit(
        &[c0],
        &[
            ("Test1/a1.txt", b"a1".as_slice()),
            ("Test1/a2.txt", b"a2".as_slice()),
            ("Test1/b.txt", b"b".as_slice()),
            ("Test2/a2.txt", b"a2".as_slice()),
            ("Test2/c.txt", b"c".as_slice()),
        ],
        "second",
    );
    repo.set_head(c1);

    let mut params = base_params(&repo, "filtered");
    params.keep_rules = "/Test[12]\n".to_owned();
    params.remove_rules = "*\n!a[12].txt\n".to_owned();
    run_params(&params).unwrap();

    let git_repo = repo.open();
    let output = log_ids(&git_repo, repo.branch_tip("filtered"));
    assert_eq!(output.len(), 2);
    assert_eq!(
        tree_files(&git_repo, output[0]),
        ["Test1/a1.txt", "Test1/a2.txt", "Test2/a2.txt"]
    );
    assert_eq!(
        tree_files(&git_repo, output[1]),
        ["Test1/a1.txt", "Test1/a2.txt"]
    );
}

#[test]
fn test_commit_message_append_over_range() {
    let repo = TestRepo::init();
    let commits = linear_history(&repo);

    let mut params = base_params(&repo, "filtered");
    params.commit_filter = Some("commit.message += \"X\"".to_owned());
    params.revspec = Some("HEAD~4..HEAD".to_owned());
    let summary = run_params(&params).unwrap();
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.written, 4);

    let git_repo = repo.open();
    let output = log_ids(&git_repo, repo.branch_tip("filtered"));
    assert_eq!(output.len(), 5);
    // The four rewritten commits got the suffix; the boundary commit kept
    // its original id.
    for (i, oid) in output.iter().take(4).enumerate() {
        let message = git_repo
            .find_commit(*oid)
            .unwrap()
            .message()
            .unwrap()
            .to_owned();
        assert_eq!(message, format!("commit {}X", 4 - i));
    }
    assert_eq!(output[4], commits[0]);
}

#[test]
fn test_detach_cuts_boundary_parents() {
    let repo = TestRepo::init();
    linear_history(&repo);

    let mut params = base_params(&repo, "filtered");
    params.commit_filter = Some("commit.message += \"X\"".to_owned());
    params.revspec = Some("HEAD~2..HEAD".to_owned());
    params.options.detach = true;
    run_params(&params).unwrap();

    let git_repo = repo.open();
    let output = log_ids(&git_repo, repo.branch_tip("filtered"));
    assert_eq!(output.len(), 2);
    let oldest = git_repo.find_commit(output[1]).unwrap();
    assert_eq!(oldest.parent_count(), 0);
    assert_eq!(oldest.message().unwrap(), "commit 3X");
}

#[test]
fn test_unterminated_multiline_script() {
    let repo = TestRepo::init();
    let c0 = repo.commit(&[], &[("a.txt", b"a")], "initial");
    repo.set_head(c0);

    let mut params = base_params(&repo, "filtered");
    params.keep_rules = "* {% entry.discard = true;\n".to_owned();
    let err = run_params(&params).unwrap_err();
    assert_matches!(
        err,
        RunError::PatternParse(PatternParseError::UnterminatedScript { .. })
    );
    assert!(err
        .to_string()
        .contains("Expecting the end %} of multiline script"));
}

#[test]
fn test_prune_reuses_parent_with_identical_tree() {
    let repo = TestRepo::init();
    let files: &[(&str, &[u8])] = &[("f.txt", b"f"), ("g.txt", b"g")];
    let c0 = repo.commit(&[], &[("f.txt", b"f")], "first");
    let c1 = repo.commit(&[c0], files, "second");
    // Same tree as its parent, so it contributes nothing
    let c2 = repo.commit(&[c1], files, "empty change");
    repo.set_head(c2);

    let mut params = base_params(&repo, "filtered");
    params.keep_rules = "*\n".to_owned();
    let summary = run_params(&params).unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.written, 2);

    let git_repo = repo.open();
    let output = log_ids(&git_repo, repo.branch_tip("filtered"));
    assert_eq!(output.len(), 2);
    assert_eq!(
        git_repo.find_commit(output[0]).unwrap().message().unwrap(),
        "second"
    );
}

#[test]
fn test_preserve_merge_commits() {
    let repo = TestRepo::init();
    let r = repo.commit(&[], &[("keep.txt", b"k")], "root");
    let a = repo.commit(&[r], &[("keep.txt", b"k"), ("a.txt", b"a")], "side a");
    let b = repo.commit(&[r], &[("keep.txt", b"k"), ("junk.txt", b"j")], "side b");
    let m = repo.commit(&[a, b], &[("keep.txt", b"k"), ("a.txt", b"a")], "merge");
    repo.set_head(m);

    // Removing junk.txt empties side b down to the root tree: b is pruned
    // away and the merge's second parent resolves through it to the root.
    let mut params = base_params(&repo, "collapsed");
    params.remove_rules = "junk.txt\n".to_owned();
    run_params(&params).unwrap();
    // Without merge preservation the merge itself is pruned into side a.
    assert_eq!(repo.branch_tip("collapsed"), a);

    let mut params = base_params(&repo, "preserved");
    params.remove_rules = "junk.txt\n".to_owned();
    params.options.preserve_merge_commits = true;
    run_params(&params).unwrap();

    let git_repo = repo.open();
    let tip = git_repo.find_commit(repo.branch_tip("preserved")).unwrap();
    assert_eq!(tip.message().unwrap(), "merge");
    let parents: Vec<_> = tip.parent_ids().collect();
    assert_eq!(parents, [a, r]);
    assert_eq!(
        tree_files(&git_repo, tip.id()),
        ["a.txt", "keep.txt"]
    );
}

#[test]
fn test_entry_predicate_discards_whole_commit() {
    let repo = TestRepo::init();
    let big = b"x".repeat(50);
    let c0 = repo.commit(
        &[],
        &[("big.txt", big.as_slice()), ("a.txt", b"a")],
        "initial",
    );
    repo.set_head(c0);

    let mut params = base_params(&repo, "filtered");
    params.keep_rules =
        "* => commit.discard = commit.discard || entry.size > 40\n".to_owned();
    let summary = run_params(&params).unwrap();
    assert_eq!(summary.written, 0);
    assert!(summary.tip.is_none());
    assert!(repo
        .open()
        .find_reference("refs/heads/filtered")
        .is_err());
}

#[test]
fn test_predicate_runtime_error_aborts() {
    let repo = TestRepo::init();
    let c0 = repo.commit(&[], &[("a.txt", b"a")], "initial");
    repo.set_head(c0);

    let mut params = base_params(&repo, "filtered");
    params.commit_filter = Some("commit.unknown = true".to_owned());
    assert_matches!(
        run_params(&params),
        Err(RunError::Rewrite(RewriteError::PredicateRuntime { .. }))
    );
}

#[test]
fn test_predicate_compilation_error() {
    let repo = TestRepo::init();
    let c0 = repo.commit(&[], &[("a.txt", b"a")], "initial");
    repo.set_head(c0);

    let mut params = base_params(&repo, "filtered");
    params.commit_filter = Some("commit.message = ".to_owned());
    let err = run_params(&params).unwrap_err();
    let diagnostics = assert_matches!(
        err,
        RunError::PredicateCompilation { diagnostics } => diagnostics
    );
    assert!(diagnostics.contains("-->"), "{diagnostics}");
}

#[test]
fn test_replacement_blob() {
    let repo = TestRepo::init();
    let c0 = repo.commit(
        &[],
        &[("secret.txt", b"hunter2"), ("a.txt", b"a")],
        "initial",
    );
    repo.set_head(c0);

    let mut params = base_params(&repo, "filtered");
    params.keep_rules =
        "secret.txt => entry.content = \"gone\"\n* => entry.discard = false\n".to_owned();
    run_params(&params).unwrap();

    let git_repo = repo.open();
    let tip = git_repo.find_commit(repo.branch_tip("filtered")).unwrap();
    assert_eq!(tree_files(&git_repo, tip.id()), ["a.txt", "secret.txt"]);
    let tree = tip.tree().unwrap();
    let entry = tree.get_name("secret.txt").unwrap();
    let blob = git_repo.find_blob(entry.id()).unwrap();
    assert_eq!(blob.content(), b"gone");
}

#[test]
fn test_submodule_links_follow_include_links() {
    let repo = TestRepo::init();
    let c0 = repo.commit(&[], &[("readme", b"hello")], "base");
    let git_repo = repo.open();
    let blob = git_repo.blob(b"hello").unwrap();
    let mut builder = git_repo.treebuilder(None).unwrap();
    builder.insert("readme", blob, 0o100644).unwrap();
    builder.insert("vendor", c0, 0o160000).unwrap();
    let tree_oid = builder.write().unwrap();
    let tree = git_repo.find_tree(tree_oid).unwrap();
    let signature = git2::Signature::new(
        "Test User",
        "test.user@example.com",
        &git2::Time::new(1_700_000_000, 0),
    )
    .unwrap();
    let head = git_repo
        .commit(None, &signature, &signature, "add link", &tree, &[])
        .unwrap();
    repo.set_head(head);

    let mut params = base_params(&repo, "no-links");
    params.keep_rules = "*\n".to_owned();
    run_params(&params).unwrap();
    assert_eq!(
        tree_files(&git_repo, repo.branch_tip("no-links")),
        ["readme"]
    );

    let mut params = base_params(&repo, "with-links");
    params.keep_rules = "*\n".to_owned();
    params.options.include_links = true;
    run_params(&params).unwrap();
    assert_eq!(
        tree_files(&git_repo, repo.branch_tip("with-links")),
        ["readme", "vendor"]
    );
}

#[test]
fn test_serial_mode_matches_parallel() {
    let repo = TestRepo::init();
    let c0 = repo.commit(
        &[],
        &[("a.txt", b"a"), ("b.txt", b"b"), ("c.txt", b"c")],
        "initial",
    );
    repo.set_head(c0);

    let mut parallel = base_params(&repo, "parallel");
    parallel.keep_rules = "a.txt => entry.discard = false\n* => entry.discard = true\n".to_owned();
    run_params(&parallel).unwrap();

    let mut serial = base_params(&repo, "serial");
    serial.keep_rules = parallel.keep_rules.clone();
    serial.options.serial = true;
    run_params(&serial).unwrap();

    assert_eq!(repo.branch_tip("parallel"), repo.branch_tip("serial"));
}

#[test]
fn test_idempotence() {
    let repo = TestRepo::init();
    linear_history(&repo);

    for branch in ["out1", "out2"] {
        let mut params = base_params(&repo, branch);
        params.keep_rules = "f[02].txt\n".to_owned();
        params.commit_filter = Some("commit.message += \" (filtered)\"".to_owned());
        run_params(&params).unwrap();
    }

    // Identical inputs and fixed timestamps give identical commits
    assert_eq!(repo.branch_tip("out1"), repo.branch_tip("out2"));
}
