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

use std::fmt::{Debug, Error, Formatter};

/// A repository-relative path with `/`-separated components. The empty
/// string is the repository root.
///
/// The derived `Ord` sorts a directory before everything inside it, which
/// the tree writer relies on when emitting trees children-first.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepoPathBuf {
    value: String,
}

impl Debug for RepoPathBuf {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.debug_tuple("RepoPathBuf").field(&self.value).finish()
    }
}

impl RepoPathBuf {
    pub fn root() -> Self {
        RepoPathBuf {
            value: String::new(),
        }
    }

    /// Wraps a `/`-separated path. The input must not have leading or
    /// trailing slashes.
    pub fn from_internal_string(value: impl Into<String>) -> Self {
        let value = value.into();
        assert!(!value.starts_with('/') && !value.ends_with('/'));
        RepoPathBuf { value }
    }

    pub fn is_root(&self) -> bool {
        self.value.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn join(&self, name: &str) -> RepoPathBuf {
        assert!(!name.is_empty() && !name.contains('/'));
        if self.is_root() {
            RepoPathBuf {
                value: name.to_owned(),
            }
        } else {
            RepoPathBuf {
                value: format!("{}/{}", self.value, name),
            }
        }
    }

    /// Splits into `(parent directory, basename)`. Returns `None` for the
    /// root path.
    pub fn split(&self) -> Option<(RepoPathBuf, &str)> {
        if self.is_root() {
            return None;
        }
        match self.value.rsplit_once('/') {
            Some((parent, name)) => Some((
                RepoPathBuf {
                    value: parent.to_owned(),
                },
                name,
            )),
            None => Some((RepoPathBuf::root(), &self.value)),
        }
    }

    pub fn parent(&self) -> Option<RepoPathBuf> {
        self.split().map(|(parent, _)| parent)
    }
}
