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

use std::thread;

use gitsieve_lib::patterns::{MatchedRule, PatternOrigin, PatternSet};
use gitsieve_lib::script::ScriptHost;

fn parse(text: &str) -> PatternSet {
    let mut host = ScriptHost::new();
    PatternSet::parse(text, PatternOrigin::Keep, &mut host).unwrap()
}

#[test]
fn test_match_results_are_stable_under_concurrency() {
    let set = parse(
        "a.txt => entry.discard = false\n\
         big/* => entry.discard = entry.size > 10\n\
         *.log\n\
         !keep.log\n",
    );
    let paths = [
        "a.txt",
        "b.txt",
        "big/blob",
        "big/sub/blob",
        "build.log",
        "keep.log",
        "src/main.rs",
    ];
    let expected: Vec<_> = paths.iter().map(|path| set.match_path(path)).collect();
    assert_eq!(
        expected,
        [
            Some(MatchedRule::Scripted(0)),
            None,
            Some(MatchedRule::Scripted(1)),
            Some(MatchedRule::Scripted(1)),
            Some(MatchedRule::Plain),
            None,
            None,
        ]
    );

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..100 {
                    let results: Vec<_> =
                        paths.iter().map(|path| set.match_path(path)).collect();
                    assert_eq!(results, expected);
                }
            });
        }
    });
}

#[test]
fn test_fresh_sets_agree_with_cached_results() {
    let text = "a.txt => entry.discard = false\n*.log\n";
    let warm = parse(text);
    for path in ["a.txt", "x.log", "other"] {
        let expected = warm.match_path(path);
        // A set that never saw this path computes the same answer
        assert_eq!(parse(text).match_path(path), expected);
        // And the cached answer never changes
        assert_eq!(warm.match_path(path), expected);
    }
}
