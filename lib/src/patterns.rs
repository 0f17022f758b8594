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

//! Parsed keep/remove rule blocks.
//!
//! A rule block holds one rule per logical line. A rule is a plain
//! gitignore pattern, `<glob> => <expression>`, or `<glob> {% body %}`
//! where the body may span lines. Plain patterns aggregate into one
//! gitignore matcher; scripted rules keep their input order and match
//! first-wins.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use thiserror::Error;

use crate::gitignore::{IgnoreLine, IgnoreMatcher};
use crate::predicate::{PredicateError, PredicateHandle, PredicateHost};

#[derive(Debug, Error)]
pub enum PatternParseError {
    #[error("Expecting the end %}} of multiline script opened at line {line}")]
    UnterminatedScript { line: usize },
    #[error("Pattern rule at line {line} has no glob")]
    MissingGlob { line: usize },
    #[error("Failed to read pattern file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PatternError {
    #[error(transparent)]
    Parse(#[from] PatternParseError),
    #[error(transparent)]
    Predicate(#[from] PredicateError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternOrigin {
    Keep,
    Remove,
}

/// A glob paired with a compiled predicate.
#[derive(Debug)]
pub struct ScriptedRule {
    pub glob: String,
    pub predicate: PredicateHandle,
    pub origin: PatternOrigin,
    /// Position of the rule in its block, for ordering diagnostics.
    pub index: usize,
    matcher: IgnoreLine,
}

/// The result of matching one path against a pattern set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchedRule {
    /// A scripted rule matched; the payload indexes [`PatternSet::scripted_rule`].
    Scripted(usize),
    /// The combined plain-pattern matcher reported a match.
    Plain,
}

/// One parsed keep or remove block with a memoised match cache.
#[derive(Debug)]
pub struct PatternSet {
    origin: PatternOrigin,
    scripted: Vec<ScriptedRule>,
    plain: IgnoreMatcher,
    cache: RwLock<HashMap<String, Option<MatchedRule>>>,
}

impl PatternSet {
    pub fn empty(origin: PatternOrigin) -> Self {
        PatternSet {
            origin,
            scripted: vec![],
            plain: IgnoreMatcher::empty(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Parses a rule block, compiling scripted rules through `host`.
    pub fn parse(
        text: &str,
        origin: PatternOrigin,
        host: &mut dyn PredicateHost,
    ) -> Result<PatternSet, PatternError> {
        let lines: Vec<&str> = text.lines().collect();
        let mut set = PatternSet::empty(origin);
        let mut index = 0;
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];
            i += 1;
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if let Some((glob, tail)) = line.split_once("{%") {
                let opened_at = i;
                let mut body = String::new();
                let mut rest = tail;
                loop {
                    if let Some((before, _)) = rest.split_once("%}") {
                        body.push_str(before);
                        break;
                    }
                    body.push_str(rest);
                    body.push('\n');
                    match lines.get(i) {
                        Some(next) => {
                            rest = next;
                            i += 1;
                        }
                        None => {
                            return Err(
                                PatternParseError::UnterminatedScript { line: opened_at }.into()
                            )
                        }
                    }
                }
                set.add_scripted(glob.trim(), &body, index, opened_at, host)?;
            } else if let Some((glob, expression)) = line.split_once("=>") {
                set.add_scripted(glob.trim(), expression.trim(), index, i, host)?;
            } else {
                set.plain.add_line(line);
            }
            index += 1;
        }
        Ok(set)
    }

    fn add_scripted(
        &mut self,
        glob: &str,
        script: &str,
        index: usize,
        line: usize,
        host: &mut dyn PredicateHost,
    ) -> Result<(), PatternError> {
        let matcher =
            IgnoreLine::parse(glob).ok_or(PatternParseError::MissingGlob { line })?;
        let predicate = host.compile(script)?;
        self.scripted.push(ScriptedRule {
            glob: glob.to_owned(),
            predicate,
            origin: self.origin,
            index,
            matcher,
        });
        Ok(())
    }

    pub fn origin(&self) -> PatternOrigin {
        self.origin
    }

    /// Whether the set contains no rules at all.
    pub fn is_empty(&self) -> bool {
        self.scripted.is_empty() && self.plain.is_empty()
    }

    pub fn scripted_rule(&self, index: usize) -> &ScriptedRule {
        &self.scripted[index]
    }

    /// Matches a path: scripted rules first (input order), then the
    /// combined plain matcher. Results are memoised per path; the first
    /// writer wins, so concurrent callers settle on one answer.
    pub fn match_path(&self, path: &str) -> Option<MatchedRule> {
        if let Some(cached) = self.cache.read().unwrap().get(path) {
            return *cached;
        }
        let result = self.compute_match(path);
        *self
            .cache
            .write()
            .unwrap()
            .entry(path.to_owned())
            .or_insert(result)
    }

    fn compute_match(&self, path: &str) -> Option<MatchedRule> {
        for (index, rule) in self.scripted.iter().enumerate() {
            if rule.matcher.matches(path) {
                return Some(MatchedRule::Scripted(index));
            }
        }
        self.plain.matches(path).then_some(MatchedRule::Plain)
    }
}
