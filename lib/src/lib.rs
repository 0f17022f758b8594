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

pub mod driver;
pub mod gitignore;
pub mod patterns;
pub mod predicate;
pub mod repo_path;
pub mod revspec;
pub mod rewrite;
pub mod scheduler;
pub mod script;
pub mod settings;
pub mod store;
pub mod tree_filter;
