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

use std::env;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use gitsieve_lib::driver::{self, RewriteParams, RunError, RunSummary};
use gitsieve_lib::patterns::PatternParseError;
use gitsieve_lib::rewrite::RewriteOptions;
use gitsieve_lib::script::ScriptHost;
use gitsieve_lib::settings::UserSettings;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Rewrites git history onto a new branch through commit and tree filters.
#[derive(Parser, Clone, Debug)]
#[command(name = "gitsieve", version, about)]
struct Args {
    /// Name of the branch that receives the rewritten history
    #[arg(long, short = 'b', value_name = "NAME")]
    branch: Option<String>,
    /// Overwrite the output branch if it already exists
    #[arg(long)]
    force: bool,
    /// Source repository (discovered from the current directory by default)
    #[arg(long, short = 'd', value_name = "PATH", value_hint = clap::ValueHint::DirPath)]
    repo_dir: Option<PathBuf>,
    /// Append a rule to the keep-pattern block
    #[arg(long, short = 'k', value_name = "RULE")]
    keep: Vec<String>,
    /// Append the contents of a file to the keep-pattern block
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    keep_from_file: Vec<PathBuf>,
    /// Append a rule to the remove-pattern block
    #[arg(long, short = 'r', value_name = "RULE")]
    remove: Vec<String>,
    /// Append the contents of a file to the remove-pattern block
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    remove_from_file: Vec<PathBuf>,
    /// Commit-predicate body, run once per commit
    #[arg(long, short = 'c', value_name = "TEXT")]
    commit_filter: Option<String>,
    /// Commit-predicate body read from a file
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    commit_filter_script: Option<PathBuf>,
    /// Cut original-parent links at the boundary of the revision range
    #[arg(long)]
    detach: bool,
    /// Include submodule links in tree filtering
    #[arg(long)]
    include_links: bool,
    /// Evaluate everything on the calling thread
    #[arg(long)]
    disable_threads: bool,
    /// Never prune two-parent commits through tree equality
    #[arg(long)]
    preserve_merge_commits: bool,
    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
    /// Revision range to rewrite (defaults to HEAD)
    #[arg(value_name = "REVSPEC")]
    revspec: Option<String>,
}

fn read_config() -> Result<UserSettings, config::ConfigError> {
    let mut config_builder = config::Config::builder();

    if let Some(config_dir) = dirs::config_dir() {
        config_builder = config_builder.add_source(
            config::File::from(config_dir.join("gitsieve").join("config.toml"))
                .required(false)
                .format(config::FileFormat::Toml),
        );
    }

    if let Ok(value) = env::var("GITSIEVE_DISABLE_THREADS") {
        config_builder = config_builder.set_override("filter.disable-threads", value)?;
    }
    if let Ok(value) = env::var("GITSIEVE_LOG") {
        config_builder = config_builder.set_override("ui.log", value)?;
    }

    let config = config_builder.build()?;
    Ok(UserSettings::from_config(config))
}

fn init_tracing(verbose: bool, directives: Option<String>) {
    let default = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::ERROR
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .parse_lossy(directives.unwrap_or_default());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn collect_rules(rules: &[String], files: &[PathBuf]) -> Result<String, RunError> {
    let mut block = String::new();
    for rule in rules {
        block.push_str(rule);
        block.push('\n');
    }
    for path in files {
        let text = fs::read_to_string(path).map_err(|source| PatternParseError::ReadFile {
            path: path.clone(),
            source,
        })?;
        block.push_str(&text);
        block.push('\n');
    }
    Ok(block)
}

fn read_commit_filter(args: &Args) -> Result<Option<String>, RunError> {
    let mut parts: Vec<String> = vec![];
    if let Some(text) = &args.commit_filter {
        parts.push(text.clone());
    }
    if let Some(path) = &args.commit_filter_script {
        let text = fs::read_to_string(path).map_err(|source| PatternParseError::ReadFile {
            path: path.clone(),
            source,
        })?;
        parts.push(text);
    }
    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join("\n")))
    }
}

fn run(args: &Args, settings: &UserSettings) -> Result<RunSummary, RunError> {
    let params = RewriteParams {
        repo_dir: args.repo_dir.clone(),
        branch: args.branch.clone().unwrap_or_default(),
        force: args.force,
        keep_rules: collect_rules(&args.keep, &args.keep_from_file)?,
        remove_rules: collect_rules(&args.remove, &args.remove_from_file)?,
        commit_filter: read_commit_filter(args)?,
        revspec: args.revspec.clone(),
        options: RewriteOptions {
            detach: args.detach,
            include_links: args.include_links,
            preserve_merge_commits: args.preserve_merge_commits,
            serial: args.disable_threads || settings.disable_threads(),
        },
    };
    let mut host = ScriptHost::new();
    driver::run(&params, &mut host)
}

fn report_success(args: &Args, summary: &RunSummary) {
    let branch = args.branch.as_deref().unwrap_or_default();
    match &summary.tip {
        Some(tip) => println!(
            "Rewrote {} of {} commits; {} now points to {}",
            summary.written,
            summary.processed,
            branch,
            tip.hex()
        ),
        None => println!(
            "All {} commits were discarded; {} was not written",
            summary.processed, branch
        ),
    }
}

fn report_error(err: &RunError) {
    let message = err.to_string();
    match message.split_once('\n') {
        Some((first, details)) => {
            eprintln!("Error: {first}");
            for line in details.lines() {
                eprintln!("  {line}");
            }
        }
        None => eprintln!("Error: {message}"),
    }
}

fn main() {
    let args = Args::parse();
    let settings = match read_config() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Invalid config: {err}");
            std::process::exit(1);
        }
    };
    init_tracing(args.verbose || settings.verbose(), settings.log_filter());

    let status = match run(&args, &settings) {
        Ok(summary) => {
            report_success(&args, &summary);
            0
        }
        Err(err) => {
            report_error(&err);
            1
        }
    };
    std::process::exit(status);
}
