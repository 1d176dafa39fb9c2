//! Filter expressions accepted in [`FindMemo::filter`](crate::FindMemo::filter).
//!
//! An expression is a conjunction of clauses joined by `&&`:
//!
//! ```text
//! creator_id == 1 && created_ts >= 1700000000
//! visibility in ["PUBLIC", "PROTECTED"] && pinned == true
//! tag in ["work", "ideas"] && content.contains("draft") && has_task_list
//! ```
//!
//! Expressions use CEL syntax and are parsed with `cel-parser`; only the
//! subset above is accepted, anything else is `InvalidArgument`. Parsing
//! is pure; drivers decide how each [`Condition`] is evaluated.

use cel_parser::{Atom, Expression, RelationOp, UnaryOp};

use crate::error::{StoreError, StoreResult};
use crate::memo::{RowStatus, Visibility};

/// Integer-valued memo columns usable in comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntField {
    CreatorId,
    CreatedTs,
    UpdatedTs,
}

impl IntField {
    pub fn column(&self) -> &'static str {
        match self {
            Self::CreatorId => "creator_id",
            Self::CreatedTs => "created_ts",
            Self::UpdatedTs => "updated_ts",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Boolean content features recorded in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFlag {
    HasLink,
    HasTaskList,
    HasCode,
    HasIncompleteTasks,
}

impl PayloadFlag {
    /// JSON path of the flag inside the serialized payload.
    pub fn json_path(&self) -> &'static str {
        match self {
            Self::HasLink => "$.property.hasLink",
            Self::HasTaskList => "$.property.hasTaskList",
            Self::HasCode => "$.property.hasCode",
            Self::HasIncompleteTasks => "$.property.hasIncompleteTasks",
        }
    }

    fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "has_link" => Some(Self::HasLink),
            "has_task_list" => Some(Self::HasTaskList),
            "has_code" => Some(Self::HasCode),
            "has_incomplete_tasks" => Some(Self::HasIncompleteTasks),
            _ => None,
        }
    }
}

/// One clause of a filter expression. All clauses must hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Int {
        field: IntField,
        op: CompareOp,
        value: i64,
    },
    Pinned(bool),
    Visibility {
        equal: bool,
        value: Visibility,
    },
    RowStatus {
        equal: bool,
        value: RowStatus,
    },
    /// Visibility is one of the listed values.
    VisibilityIn(Vec<Visibility>),
    /// At least one of the listed tags is present.
    TagIn(Vec<String>),
    ContentContains(String),
    Flag(PayloadFlag),
}

/// Parse a filter expression. A blank expression yields no conditions.
pub fn parse_filter(input: &str) -> StoreResult<Vec<Condition>> {
    if input.trim().is_empty() {
        return Ok(Vec::new());
    }
    let expr = cel_parser::parse(input).map_err(|e| invalid(format!("{e:?}")))?;

    let mut conditions = Vec::new();
    collect(&expr, &mut conditions)?;
    Ok(conditions)
}

fn invalid(msg: impl Into<String>) -> StoreError {
    StoreError::InvalidArgument(format!("invalid filter: {}", msg.into()))
}

// ── AST walk ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Int(i64),
    Bool(bool),
}

/// Flatten a tree of `&&` into its clauses, left to right.
fn collect(expr: &Expression, out: &mut Vec<Condition>) -> StoreResult<()> {
    match expr {
        Expression::And(lhs, rhs) => {
            collect(lhs, out)?;
            collect(rhs, out)
        }
        other => {
            out.push(clause(other)?);
            Ok(())
        }
    }
}

fn clause(expr: &Expression) -> StoreResult<Condition> {
    match expr {
        Expression::Ident(name) => PayloadFlag::from_ident(name.as_str())
            .map(Condition::Flag)
            .ok_or_else(|| invalid(format!("`{name}` is not a flag"))),
        Expression::FunctionCall(func, Some(target), args) => contains_call(func, target, args),
        Expression::Relation(lhs, RelationOp::In, rhs) => membership(ident(lhs)?, rhs),
        Expression::Relation(lhs, op, rhs) => comparison(ident(lhs)?, compare_op(op)?, literal(rhs)?),
        Expression::Or(..) => Err(invalid("`||` is not supported")),
        other => Err(invalid(format!("unsupported expression {other:?}"))),
    }
}

fn ident(expr: &Expression) -> StoreResult<&str> {
    match expr {
        Expression::Ident(name) => Ok(name.as_str()),
        other => Err(invalid(format!("expected a field name, found {other:?}"))),
    }
}

fn compare_op(op: &RelationOp) -> StoreResult<CompareOp> {
    match op {
        RelationOp::Equals => Ok(CompareOp::Eq),
        RelationOp::NotEquals => Ok(CompareOp::Ne),
        RelationOp::LessThan => Ok(CompareOp::Lt),
        RelationOp::LessThanEq => Ok(CompareOp::Le),
        RelationOp::GreaterThan => Ok(CompareOp::Gt),
        RelationOp::GreaterThanEq => Ok(CompareOp::Ge),
        RelationOp::In => Err(invalid("misplaced `in`")),
    }
}

fn literal(expr: &Expression) -> StoreResult<Literal> {
    match expr {
        Expression::Atom(Atom::Int(i)) => Ok(Literal::Int(*i)),
        Expression::Atom(Atom::UInt(u)) => i64::try_from(*u)
            .map(Literal::Int)
            .map_err(|_| invalid(format!("integer {u} out of range"))),
        Expression::Atom(Atom::String(s)) => Ok(Literal::Str(s.to_string())),
        Expression::Atom(Atom::Bool(b)) => Ok(Literal::Bool(*b)),
        Expression::Unary(UnaryOp::Minus, inner) => match literal(inner)? {
            Literal::Int(i) => Ok(Literal::Int(-i)),
            other => Err(invalid(format!("cannot negate {other:?}"))),
        },
        other => Err(invalid(format!("expected a literal, found {other:?}"))),
    }
}

/// `content.contains("...")`, the only method call accepted.
fn contains_call(func: &Expression, target: &Expression, args: &[Expression]) -> StoreResult<Condition> {
    match (func, target, args) {
        (Expression::Ident(f), Expression::Ident(t), [Expression::Atom(Atom::String(needle))])
            if f.as_str() == "contains" && t.as_str() == "content" =>
        {
            Ok(Condition::ContentContains(needle.to_string()))
        }
        _ => Err(invalid("only `content.contains(\"...\")` is supported")),
    }
}

fn membership(ident: &str, list: &Expression) -> StoreResult<Condition> {
    let Expression::List(items) = list else {
        return Err(invalid(format!("`{ident} in` takes a list")));
    };
    let values = items
        .iter()
        .map(|item| match item {
            Expression::Atom(Atom::String(s)) => Ok(s.to_string()),
            other => Err(invalid(format!("expected a string, found {other:?}"))),
        })
        .collect::<StoreResult<Vec<_>>>()?;

    match ident {
        "visibility" => Ok(Condition::VisibilityIn(
            values
                .iter()
                .map(|v| Visibility::parse(v).map_err(|e| invalid(e.to_string())))
                .collect::<StoreResult<_>>()?,
        )),
        "tag" => Ok(Condition::TagIn(values)),
        other => Err(invalid(format!("`in` is not supported for `{other}`"))),
    }
}

fn comparison(ident: &str, op: CompareOp, value: Literal) -> StoreResult<Condition> {
    let int_field = match ident {
        "creator_id" => Some(IntField::CreatorId),
        "created_ts" => Some(IntField::CreatedTs),
        "updated_ts" => Some(IntField::UpdatedTs),
        _ => None,
    };
    if let Some(field) = int_field {
        return match value {
            Literal::Int(value) => Ok(Condition::Int { field, op, value }),
            other => Err(invalid(format!("`{ident}` compares with integers, got {other:?}"))),
        };
    }

    let equal = match op {
        CompareOp::Eq => true,
        CompareOp::Ne => false,
        _ => return Err(invalid(format!("`{ident}` only supports `==` and `!=`"))),
    };

    match (ident, value) {
        ("pinned", Literal::Bool(b)) => Ok(Condition::Pinned(b == equal)),
        ("visibility", Literal::Str(s)) => Ok(Condition::Visibility {
            equal,
            value: Visibility::parse(&s).map_err(|e| invalid(e.to_string()))?,
        }),
        ("row_status", Literal::Str(s)) => Ok(Condition::RowStatus {
            equal,
            value: RowStatus::parse(&s).map_err(|e| invalid(e.to_string()))?,
        }),
        (field @ ("pinned" | "visibility" | "row_status"), other) => {
            Err(invalid(format!("wrong literal type for `{field}`: {other:?}")))
        }
        (other, _) => Err(invalid(format!("unknown field `{other}`"))),
    }
}
