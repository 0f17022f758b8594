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

//! Gitignore-compatible pattern matching for rule blocks.
//!
//! Pattern blocks here are always interpreted relative to the repository
//! root, so there is no per-directory nesting; a matcher is a flat list of
//! lines where later lines take precedence and `!` negates.

use regex::{escape as regex_escape, Regex};

fn push_literal(regex: &mut String, c: char) {
    regex.push_str(&regex_escape(&c.to_string()));
}

/// One parsed gitignore pattern.
#[derive(Debug)]
pub struct IgnoreLine {
    is_negative: bool,
    regex: Regex,
}

impl IgnoreLine {
    // Trailing spaces are not part of the pattern unless escaped. A single
    // forward pass tracks the escape state, so `end` always marks the last
    // significant character; a trailing run of unescaped spaces never
    // advances it.
    fn strip_trailing_spaces(input: &str) -> &str {
        let input = input.strip_suffix('\r').unwrap_or(input);
        let mut end = 0;
        let mut escaped = false;
        for (i, c) in input.char_indices() {
            if escaped {
                escaped = false;
                end = i + c.len_utf8();
            } else if c == '\\' {
                escaped = true;
                // A dangling backslash stays part of the pattern
                end = i + 1;
            } else if c != ' ' {
                end = i + c.len_utf8();
            }
        }
        &input[..end]
    }

    /// Parses one pattern line. Returns `None` for comments and lines that
    /// match nothing (blank, or a bare `!`).
    pub fn parse(input: &str) -> Option<IgnoreLine> {
        if input.starts_with('#') {
            return None;
        }

        let input = IgnoreLine::strip_trailing_spaces(input);
        // A bare "!" matches nothing rather than everything, so strip the
        // negation before the emptiness check.
        let (is_negative, input) = match input.strip_prefix('!') {
            None => (false, input),
            Some(rest) => (true, rest),
        };
        if input.is_empty() {
            return None;
        }

        let (dir_only, input) = match input.strip_suffix('/') {
            None => (false, input),
            Some(rest) => (true, rest),
        };
        let (mut anchored, input) = match input.strip_prefix('/') {
            None => (false, input),
            Some(rest) => (true, rest),
        };
        anchored |= input.contains('/');

        let mut regex = String::from("^");
        if !anchored {
            regex.push_str("(.*/)?");
        }

        let components: Vec<_> = input.split('/').collect();
        for (i, component) in components.iter().enumerate() {
            let last = i == components.len() - 1;
            if *component == "**" {
                regex.push_str(if last { ".*" } else { "(.*/)?" });
            } else {
                IgnoreLine::glob_to_regex(component, &mut regex);
                if !last {
                    regex.push('/');
                }
            }
        }
        regex.push_str(if dir_only { "/.*" } else { "(/.*|$)" });

        Some(IgnoreLine {
            is_negative,
            regex: Regex::new(&regex).unwrap(),
        })
    }

    // Translates one path component (no "/" and not "**") into regex
    // syntax: "?" is any character but "/", "*" any run of them, "[...]"
    // passes through as a character class, and a backslash makes the next
    // character literal.
    fn glob_to_regex(component: &str, regex: &mut String) {
        let mut chars = component.chars();
        while let Some(c) = chars.next() {
            match c {
                '?' => regex.push_str("[^/]"),
                '*' => regex.push_str("[^/]*"),
                '\\' => match chars.next() {
                    Some(next) => {
                        // Escaping is only defined for glob
                        // metacharacters; any other escape keeps its
                        // backslash as a literal.
                        if !matches!(next, ' ' | '#' | '!' | '?' | '\\' | '*') {
                            push_literal(regex, '\\');
                        }
                        push_literal(regex, next);
                    }
                    None => push_literal(regex, '\\'),
                },
                '[' => {
                    let mut members = String::new();
                    let mut closed = false;
                    for member in chars.by_ref() {
                        if member == ']' {
                            closed = true;
                            break;
                        }
                        members.push(member);
                    }
                    // An unclosed class matches nothing, so its members
                    // are dropped
                    if closed {
                        regex.push('[');
                        regex.push_str(&members);
                        regex.push(']');
                    }
                }
                _ => push_literal(regex, c),
            }
        }
    }

    pub fn is_negative(&self) -> bool {
        self.is_negative
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// An ordered block of gitignore patterns, matched with gitignore's own
/// precedence rules.
#[derive(Debug, Default)]
pub struct IgnoreMatcher {
    lines: Vec<IgnoreLine>,
}

impl IgnoreMatcher {
    pub fn empty() -> IgnoreMatcher {
        IgnoreMatcher::default()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Appends one pattern line. Comments and blank lines are skipped.
    pub fn add_line(&mut self, input: &str) {
        if let Some(line) = IgnoreLine::parse(input) {
            self.lines.push(line);
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        // Later lines take precedence, so check them in reverse.
        for line in self.lines.iter().rev() {
            if line.matches(path) {
                return !line.is_negative;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(input: &str) -> IgnoreMatcher {
        let mut matcher = IgnoreMatcher::empty();
        for line in input.lines() {
            matcher.add_line(line);
        }
        matcher
    }

    fn matches(input: &str, path: &str) -> bool {
        matcher(input).matches(path)
    }

    #[test]
    fn test_empty_matcher() {
        assert!(!IgnoreMatcher::empty().matches("foo"));
        assert!(!matches("", "foo"));
        assert!(!matches("# comment\n", "foo"));
    }

    #[test]
    fn test_literal() {
        assert!(matches("foo\n", "foo"));
        assert!(matches("foo\n", "dir/foo"));
        assert!(matches("foo\n", "dir/subdir/foo"));
        assert!(!matches("foo\n", "food"));
        assert!(!matches("foo\n", "dir/food"));
    }

    #[test]
    fn test_rooted_literal() {
        assert!(matches("/foo\n", "foo"));
        assert!(!matches("/foo\n", "dir/foo"));
    }

    #[test]
    fn test_deep_dir() {
        assert!(!matches("/dir1/dir2/dir3\n", "foo"));
        assert!(!matches("/dir1/dir2/dir3\n", "dir1/dir2/foo"));
        assert!(matches("/dir1/dir2/dir3\n", "dir1/dir2/dir3/foo"));
        assert!(matches("/dir1/dir2/dir3\n", "dir1/dir2/dir3/dir4/foo"));
    }

    #[test]
    fn test_match_only_dir() {
        assert!(!matches("/dir/\n", "dir"));
        assert!(matches("/dir/\n", "dir/foo"));
        assert!(matches("/dir/\n", "dir/subdir/foo"));
    }

    #[test]
    fn test_unusual_symbols() {
        assert!(matches("\\*\n", "*"));
        assert!(!matches("\\*\n", "foo"));
        assert!(matches("\\!\n", "!"));
        assert!(matches("\\?\n", "?"));
        assert!(!matches("\\?\n", "x"));
        // Invalid escapes are treated like literal backslashes
        assert!(matches("\\w\n", "\\w"));
        assert!(!matches("\\w\n", "w"));
    }

    #[test]
    fn test_trailing_spaces() {
        assert!(!matches(" \n", " "));
        assert!(matches("\\ \n", " "));
        assert!(matches("a b\n", "a b"));
        assert!(matches("a b \n", "a b"));
        assert!(!matches("a b \n", "a b "));
        assert!(matches("a b\\ \\ \n", "a b  "));
    }

    #[test]
    fn test_glob() {
        assert!(!matches("*.o\n", "foo"));
        assert!(matches("*.o\n", "foo.o"));
        assert!(matches("*.o\n", "dir/foo.o"));
        assert!(!matches("foo.?\n", "foo"));
        assert!(!matches("foo.?\n", "foo."));
        assert!(matches("foo.?\n", "foo.o"));
    }

    #[test]
    fn test_range() {
        assert!(!matches("foo.[az]\n", "foo"));
        assert!(matches("foo.[az]\n", "foo.a"));
        assert!(!matches("foo.[az]\n", "foo.g"));
        assert!(matches("foo.[a-z]\n", "foo.g"));
        assert!(matches("foo.[0-9a-fA-F]\n", "foo.E"));
        assert!(!matches("foo.[0-9a-fA-F]\n", "foo._"));
        assert!(matches("Test[12]\n", "Test1/a.txt"));
        assert!(!matches("Test[12]\n", "Test3/a.txt"));
    }

    #[test]
    fn test_leading_dir_glob() {
        assert!(matches("**/foo\n", "foo"));
        assert!(matches("**/foo\n", "dir1/dir2/foo"));
        assert!(matches("**/dir/foo\n", "dir1/dir2/dir/foo"));
    }

    #[test]
    fn test_trailing_dir_glob() {
        assert!(!matches("abc/**\n", "abc"));
        assert!(matches("abc/**\n", "abc/file"));
        assert!(matches("abc/**\n", "abc/dir/file"));
    }

    #[test]
    fn test_internal_dir_glob() {
        assert!(matches("a/**/b\n", "a/b"));
        assert!(matches("a/**/b\n", "a/x/b"));
        assert!(matches("a/**/b\n", "a/x/y/b"));
        assert!(!matches("a/**/b\n", "ax/y/b"));
        assert!(!matches("a/**/b\n", "ab"));
    }

    #[test]
    fn test_negation_ordering() {
        assert!(matches("foo\n!foo/bar\n", "foo"));
        assert!(!matches("foo\n!foo/bar\n", "foo/bar"));
        assert!(matches("foo\n!foo/bar\n", "foo/baz"));
        assert!(matches("foo\n!foo/bar\nfoo/bar/baz", "foo/bar/baz"));
        assert!(!matches("foo\n!foo/bar\nfoo/bar/baz", "foo/bar/quux"));
        // "Everything except" shape
        assert!(!matches("*\n!a[12].txt\n", "Test1/a1.txt"));
        assert!(!matches("*\n!a[12].txt\n", "Test2/a2.txt"));
        assert!(matches("*\n!a[12].txt\n", "Test1/b.txt"));
    }
}
