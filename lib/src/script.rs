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

//! The predicate host shipped with this crate.
//!
//! Scripts are sequences of assignments over the fields of `commit`,
//! `entry`, and `pattern`:
//!
//! ```text
//! entry.discard = entry.is_binary || entry.size > 1000
//! commit.message += "\n(rewritten)"
//! ```
//!
//! Values are booleans, 64-bit integers, and strings; `+` adds integers and
//! concatenates strings, `+=` reads then assigns. Everything else a filter
//! needs comes from the exposed fields, listed in the match arms of
//! `read_field`/`write_field` below.

use itertools::Itertools;
use once_cell::sync::Lazy;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;

use crate::predicate::{
    CommitContext, EntryContext, PredicateError, PredicateHandle, PredicateHost,
};
use crate::rewrite::MutableCommit;
use crate::store::TreeValue;

#[derive(Parser)]
#[grammar = "predicate.pest"]
struct ScriptParser;

type ParseError = Box<pest::error::Error<Rule>>;

static PRATT_PARSER: Lazy<PrattParser<Rule>> = Lazy::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::logical_or_op, Assoc::Left))
        .op(Op::infix(Rule::logical_and_op, Assoc::Left))
        .op(Op::infix(Rule::eq_op, Assoc::Left)
            | Op::infix(Rule::ne_op, Assoc::Left)
            | Op::infix(Rule::lt_op, Assoc::Left)
            | Op::infix(Rule::le_op, Assoc::Left)
            | Op::infix(Rule::gt_op, Assoc::Left)
            | Op::infix(Rule::ge_op, Assoc::Left))
        .op(Op::infix(Rule::concat_op, Assoc::Left))
        .op(Op::prefix(Rule::not_op))
});

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Bool(bool),
    Int(i64),
    Str(String),
    Field(Vec<String>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Concat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AssignOp {
    Set,
    Append,
}

#[derive(Clone, Debug)]
struct Statement {
    target: Vec<String>,
    op: AssignOp,
    value: Expr,
}

#[derive(Clone, Debug, Default)]
struct Program {
    statements: Vec<Statement>,
}

fn custom_error(span: pest::Span<'_>, message: String) -> ParseError {
    Box::new(pest::error::Error::new_from_span(
        pest::error::ErrorVariant::CustomError { message },
        span,
    ))
}

fn parse_program(script: &str) -> Result<Program, ParseError> {
    let mut pairs = ScriptParser::parse(Rule::program, script)?;
    let mut statements = vec![];
    for pair in pairs.next().unwrap().into_inner() {
        match pair.as_rule() {
            Rule::statement => statements.push(parse_statement(pair)?),
            Rule::EOI => {}
            r => unreachable!("unexpected rule {r:?} in program"),
        }
    }
    Ok(Program { statements })
}

fn parse_statement(pair: Pair<Rule>) -> Result<Statement, ParseError> {
    let mut inner = pair.into_inner();
    let target = parse_field(inner.next().unwrap());
    let op = match inner.next().unwrap().as_str() {
        "+=" => AssignOp::Append,
        _ => AssignOp::Set,
    };
    let value = parse_expression(inner.next().unwrap().into_inner())?;
    Ok(Statement { target, op, value })
}

fn parse_field(pair: Pair<Rule>) -> Vec<String> {
    pair.into_inner()
        .map(|segment| segment.as_str().to_owned())
        .collect()
}

fn parse_expression(pairs: Pairs<Rule>) -> Result<Expr, ParseError> {
    PRATT_PARSER
        .map_primary(parse_primary)
        .map_prefix(|op, rhs| match op.as_rule() {
            Rule::not_op => Ok(Expr::Not(Box::new(rhs?))),
            r => unreachable!("unexpected prefix rule {r:?}"),
        })
        .map_infix(|lhs, op, rhs| {
            let op = match op.as_rule() {
                Rule::logical_or_op => BinOp::Or,
                Rule::logical_and_op => BinOp::And,
                Rule::eq_op => BinOp::Eq,
                Rule::ne_op => BinOp::Ne,
                Rule::lt_op => BinOp::Lt,
                Rule::le_op => BinOp::Le,
                Rule::gt_op => BinOp::Gt,
                Rule::ge_op => BinOp::Ge,
                Rule::concat_op => BinOp::Concat,
                r => unreachable!("unexpected infix rule {r:?}"),
            };
            Ok(Expr::Binary(op, Box::new(lhs?), Box::new(rhs?)))
        })
        .parse(pairs)
}

fn parse_primary(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::string_literal => {
            let content = inner.into_inner().next().unwrap();
            Ok(Expr::Str(unescape(content.as_str())))
        }
        Rule::integer_literal => {
            let span = inner.as_span();
            inner
                .as_str()
                .parse()
                .map(Expr::Int)
                .map_err(|err| custom_error(span, format!("Invalid integer literal: {err}")))
        }
        Rule::boolean_literal => Ok(Expr::Bool(inner.as_str() == "true")),
        Rule::field => Ok(Expr::Field(parse_field(inner))),
        Rule::expression => parse_expression(inner.into_inner()),
        r => unreachable!("unexpected primary rule {r:?}"),
    }
}

fn unescape(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('0') => result.push('\0'),
            Some(c) => result.push(c),
            None => {}
        }
    }
    result
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
        }
    }
}

/// The fields visible to one predicate invocation.
enum Scope<'a, 'b> {
    Commit(&'a mut CommitContext<'b>),
    Entry(&'a mut EntryContext<'b>),
}

impl Scope<'_, '_> {
    fn commit(&mut self) -> &mut MutableCommit {
        match self {
            Scope::Commit(ctx) => ctx.commit,
            Scope::Entry(ctx) => ctx.commit,
        }
    }
}

fn unknown_field(path: &[String]) -> PredicateError {
    PredicateError::runtime(format!("Unknown field \"{}\"", path.iter().join(".")))
}

fn read_field(scope: &mut Scope, path: &[String]) -> Result<Value, PredicateError> {
    let segments = path.iter().map(String::as_str).collect_vec();
    match segments.as_slice() {
        ["commit", "id"] => Ok(Value::Str(scope.commit().id().hex())),
        ["commit", "discard"] => Ok(Value::Bool(scope.commit().discard)),
        ["commit", "message"] => Ok(Value::Str(scope.commit().message.clone())),
        ["commit", "tag"] => Ok(Value::Str(scope.commit().tag.clone().unwrap_or_default())),
        ["commit", "author", "name"] => Ok(Value::Str(scope.commit().author.name.clone())),
        ["commit", "author", "email"] => Ok(Value::Str(scope.commit().author.email.clone())),
        ["commit", "committer", "name"] => Ok(Value::Str(scope.commit().committer.name.clone())),
        ["commit", "committer", "email"] => Ok(Value::Str(scope.commit().committer.email.clone())),
        ["pattern"] => match scope {
            Scope::Entry(ctx) => Ok(Value::Str(ctx.pattern.to_owned())),
            Scope::Commit(_) => Err(unknown_field(path)),
        },
        ["entry", rest @ ..] => match scope {
            Scope::Entry(ctx) => read_entry_field(ctx, path, rest),
            Scope::Commit(_) => Err(unknown_field(path)),
        },
        _ => Err(unknown_field(path)),
    }
}

fn read_entry_field(
    ctx: &mut EntryContext,
    path: &[String],
    rest: &[&str],
) -> Result<Value, PredicateError> {
    match rest {
        ["discard"] => Ok(Value::Bool(ctx.entry.discard)),
        ["size"] => Ok(Value::Int(ctx.entry.size() as i64)),
        ["is_binary"] => Ok(Value::Bool(ctx.entry.is_binary())),
        ["path"] => Ok(Value::Str(ctx.entry.path().as_str().to_owned())),
        ["name"] => Ok(Value::Str(ctx.entry.name().to_owned())),
        ["executable"] => Ok(Value::Bool(ctx.entry.executable)),
        ["content"] => {
            if let Some(data) = &ctx.entry.content {
                return Ok(Value::Str(String::from_utf8_lossy(data).into_owned()));
            }
            let data = match ctx.entry.value() {
                TreeValue::Blob { id, .. } | TreeValue::Symlink(id) => ctx
                    .repo
                    .read_blob(id)
                    .map_err(|err| PredicateError::runtime(err.to_string()))?,
                TreeValue::GitSubmodule(_) => vec![],
                TreeValue::Tree(_) => vec![],
            };
            Ok(Value::Str(String::from_utf8_lossy(&data).into_owned()))
        }
        _ => Err(unknown_field(path)),
    }
}

fn write_field(scope: &mut Scope, path: &[String], value: Value) -> Result<(), PredicateError> {
    let segments = path.iter().map(String::as_str).collect_vec();
    let mismatch = |expected: &str, actual: &Value| {
        PredicateError::runtime(format!(
            "Expected a {expected} value for \"{}\", got a {}",
            path.iter().join("."),
            actual.type_name()
        ))
    };
    match segments.as_slice() {
        ["commit", "discard"] => match value {
            Value::Bool(b) => {
                scope.commit().discard = b;
                Ok(())
            }
            other => Err(mismatch("boolean", &other)),
        },
        ["commit", "message"] => match value {
            Value::Str(s) => {
                scope.commit().message = s;
                Ok(())
            }
            other => Err(mismatch("string", &other)),
        },
        ["commit", "tag"] => match value {
            Value::Str(s) => {
                scope.commit().tag = Some(s);
                Ok(())
            }
            other => Err(mismatch("string", &other)),
        },
        ["commit", "author", "name"] => match value {
            Value::Str(s) => {
                scope.commit().author.name = s;
                Ok(())
            }
            other => Err(mismatch("string", &other)),
        },
        ["commit", "author", "email"] => match value {
            Value::Str(s) => {
                scope.commit().author.email = s;
                Ok(())
            }
            other => Err(mismatch("string", &other)),
        },
        ["commit", "committer", "name"] => match value {
            Value::Str(s) => {
                scope.commit().committer.name = s;
                Ok(())
            }
            other => Err(mismatch("string", &other)),
        },
        ["commit", "committer", "email"] => match value {
            Value::Str(s) => {
                scope.commit().committer.email = s;
                Ok(())
            }
            other => Err(mismatch("string", &other)),
        },
        ["entry", rest @ ..] => match scope {
            Scope::Entry(ctx) => match (rest, value) {
                (["discard"], Value::Bool(b)) => {
                    ctx.entry.discard = b;
                    Ok(())
                }
                (["discard"], other) => Err(mismatch("boolean", &other)),
                (["content"], Value::Str(s)) => {
                    ctx.entry.content = Some(s.into_bytes());
                    Ok(())
                }
                (["content"], other) => Err(mismatch("string", &other)),
                (["executable"], Value::Bool(b)) => {
                    ctx.entry.executable = b;
                    Ok(())
                }
                (["executable"], other) => Err(mismatch("boolean", &other)),
                _ => Err(PredicateError::runtime(format!(
                    "Cannot assign to \"{}\"",
                    path.iter().join(".")
                ))),
            },
            Scope::Commit(_) => Err(unknown_field(path)),
        },
        _ => Err(PredicateError::runtime(format!(
            "Cannot assign to \"{}\"",
            path.iter().join(".")
        ))),
    }
}

fn expect_bool(value: Value) -> Result<bool, PredicateError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(PredicateError::runtime(format!(
            "Expected a boolean value, got a {}",
            other.type_name()
        ))),
    }
}

fn add_values(lhs: Value, rhs: Value) -> Result<Value, PredicateError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(b)
            .map(Value::Int)
            .ok_or_else(|| PredicateError::runtime("Integer overflow in \"+\"")),
        (Value::Str(mut a), Value::Str(b)) => {
            a.push_str(&b);
            Ok(Value::Str(a))
        }
        (lhs, rhs) => Err(PredicateError::runtime(format!(
            "Cannot add a {} and a {}",
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn compare_values(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, PredicateError> {
    match op {
        BinOp::Eq | BinOp::Ne => {
            if lhs.type_name() != rhs.type_name() {
                return Err(PredicateError::runtime(format!(
                    "Cannot compare a {} with a {}",
                    lhs.type_name(),
                    rhs.type_name()
                )));
            }
            let equal = lhs == rhs;
            Ok(Value::Bool(if op == BinOp::Eq { equal } else { !equal }))
        }
        _ => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Bool(match op {
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                BinOp::Ge => a >= b,
                _ => unreachable!("not a comparison operator: {op:?}"),
            })),
            (lhs, rhs) => Err(PredicateError::runtime(format!(
                "Cannot order a {} and a {}",
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}

fn eval(scope: &mut Scope, expr: &Expr) -> Result<Value, PredicateError> {
    match expr {
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Field(path) => read_field(scope, path),
        Expr::Not(inner) => Ok(Value::Bool(!expect_bool(eval(scope, inner)?)?)),
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            if expect_bool(eval(scope, lhs)?)? {
                Ok(Value::Bool(true))
            } else {
                Ok(Value::Bool(expect_bool(eval(scope, rhs)?)?))
            }
        }
        Expr::Binary(BinOp::And, lhs, rhs) => {
            if !expect_bool(eval(scope, lhs)?)? {
                Ok(Value::Bool(false))
            } else {
                Ok(Value::Bool(expect_bool(eval(scope, rhs)?)?))
            }
        }
        Expr::Binary(BinOp::Concat, lhs, rhs) => {
            add_values(eval(scope, lhs)?, eval(scope, rhs)?)
        }
        Expr::Binary(op, lhs, rhs) => {
            compare_values(*op, eval(scope, lhs)?, eval(scope, rhs)?)
        }
    }
}

fn exec_statement(scope: &mut Scope, statement: &Statement) -> Result<(), PredicateError> {
    let value = eval(scope, &statement.value)?;
    let value = match statement.op {
        AssignOp::Set => value,
        AssignOp::Append => add_values(read_field(scope, &statement.target)?, value)?,
    };
    write_field(scope, &statement.target, value)
}

/// Compiles and runs predicate scripts.
#[derive(Debug, Default)]
pub struct ScriptHost {
    programs: Vec<Program>,
}

impl ScriptHost {
    pub fn new() -> Self {
        ScriptHost::default()
    }

    fn program(&self, handle: PredicateHandle) -> Result<&Program, PredicateError> {
        self.programs
            .get(handle.0)
            .ok_or_else(|| PredicateError::runtime("Unknown predicate handle"))
    }

    fn run(&self, handle: PredicateHandle, scope: &mut Scope) -> Result<(), PredicateError> {
        for statement in &self.program(handle)?.statements {
            exec_statement(scope, statement)?;
        }
        Ok(())
    }
}

impl PredicateHost for ScriptHost {
    fn compile(&mut self, script: &str) -> Result<PredicateHandle, PredicateError> {
        let program = parse_program(script).map_err(|err| PredicateError::Compilation {
            diagnostics: compile_diagnostics(script, &err),
        })?;
        self.programs.push(program);
        Ok(PredicateHandle(self.programs.len() - 1))
    }

    fn invoke_commit(
        &self,
        handle: PredicateHandle,
        mut ctx: CommitContext<'_>,
    ) -> Result<(), PredicateError> {
        self.run(handle, &mut Scope::Commit(&mut ctx))
    }

    fn invoke_entry(
        &self,
        handle: PredicateHandle,
        mut ctx: EntryContext<'_>,
    ) -> Result<(), PredicateError> {
        self.run(handle, &mut Scope::Entry(&mut ctx))
    }
}

fn compile_diagnostics(script: &str, error: &pest::error::Error<Rule>) -> String {
    let dump = script.lines().map(|line| format!("    {line}")).join("\n");
    format!("{error}\n{dump}")
}
