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

use thiserror::Error;

/// A parsed revision specification: either everything reachable from one
/// revision, or the commits reachable from `to` but not from `from`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Revspec {
    Single(String),
    Range { from: String, to: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RevspecParseError {
    #[error("merge-base ranges (\"...\") are not supported")]
    MergeBase,
    #[error("the \"{0}\" suffix is not supported")]
    UnsupportedSuffix(&'static str),
}

impl Revspec {
    /// Parses user revspec text. Absent or empty text defaults to `HEAD`;
    /// an empty side of a `..` range likewise defaults to `HEAD`.
    pub fn parse(text: Option<&str>) -> Result<Revspec, RevspecParseError> {
        let text = text.map(str::trim).unwrap_or("");
        if text.is_empty() {
            return Ok(Revspec::Single("HEAD".to_owned()));
        }
        if text.contains("...") {
            return Err(RevspecParseError::MergeBase);
        }
        for suffix in ["^!", "^@"] {
            if text.ends_with(suffix) {
                return Err(RevspecParseError::UnsupportedSuffix(suffix));
            }
        }
        match text.split_once("..") {
            Some((from, to)) => {
                let from = if from.is_empty() { "HEAD" } else { from };
                let to = if to.is_empty() { "HEAD" } else { to };
                Ok(Revspec::Range {
                    from: from.to_owned(),
                    to: to.to_owned(),
                })
            }
            None => Ok(Revspec::Single(text.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_parse_default() {
        assert_eq!(
            Revspec::parse(None),
            Ok(Revspec::Single("HEAD".to_owned()))
        );
        assert_eq!(
            Revspec::parse(Some("  ")),
            Ok(Revspec::Single("HEAD".to_owned()))
        );
    }

    #[test]
    fn test_parse_single() {
        assert_eq!(
            Revspec::parse(Some("main")),
            Ok(Revspec::Single("main".to_owned()))
        );
        assert_eq!(
            Revspec::parse(Some("HEAD~4")),
            Ok(Revspec::Single("HEAD~4".to_owned()))
        );
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(
            Revspec::parse(Some("HEAD~4..HEAD")),
            Ok(Revspec::Range {
                from: "HEAD~4".to_owned(),
                to: "HEAD".to_owned(),
            })
        );
        assert_eq!(
            Revspec::parse(Some("v1.0..")),
            Ok(Revspec::Range {
                from: "v1.0".to_owned(),
                to: "HEAD".to_owned(),
            })
        );
        assert_eq!(
            Revspec::parse(Some("..topic")),
            Ok(Revspec::Range {
                from: "HEAD".to_owned(),
                to: "topic".to_owned(),
            })
        );
    }

    #[test]
    fn test_parse_rejected_forms() {
        assert_matches!(
            Revspec::parse(Some("main...topic")),
            Err(RevspecParseError::MergeBase)
        );
        assert_matches!(
            Revspec::parse(Some("HEAD^!")),
            Err(RevspecParseError::UnsupportedSuffix("^!"))
        );
        assert_matches!(
            Revspec::parse(Some("HEAD^@")),
            Err(RevspecParseError::UnsupportedSuffix("^@"))
        );
    }
}
