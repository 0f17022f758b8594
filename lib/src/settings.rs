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

/// User-level configuration. Command-line flags take precedence over
/// anything read from here.
#[derive(Debug, Clone)]
pub struct UserSettings {
    config: config::Config,
}

impl Default for UserSettings {
    fn default() -> Self {
        UserSettings::from_config(config::Config::default())
    }
}

impl UserSettings {
    pub fn from_config(config: config::Config) -> Self {
        UserSettings { config }
    }

    pub fn config(&self) -> &config::Config {
        &self.config
    }

    /// Whether per-entry evaluation should stay on the calling thread.
    pub fn disable_threads(&self) -> bool {
        self.config
            .get_bool("filter.disable-threads")
            .unwrap_or(false)
    }

    pub fn verbose(&self) -> bool {
        self.config.get_bool("ui.verbose").unwrap_or(false)
    }

    /// Log filter directives, e.g. `gitsieve_lib=debug`.
    pub fn log_filter(&self) -> Option<String> {
        self.config.get_string("ui.log").ok()
    }
}
