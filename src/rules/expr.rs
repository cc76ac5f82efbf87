//! Row-scoped scalar expressions.
//!
//! Expressions are small explicit trees built through the constructor
//! and combinator methods on [`Expr`]. They read attributes of the
//! row being evaluated and, through to-one relationships, attributes
//! of its parents. Evaluation is strict: comparing or doing
//! arithmetic on `Null` is an error, so rules that may see absent
//! values must say so with `is_null` or `coalesce`. A parent read
//! through an unassigned foreign key yields `Null` rather than
//! failing, which keeps guard expressions writable.

use thiserror::Error;

use crate::model::Value;

/// Result type for expression evaluation
pub type EvalResult<T> = Result<T, EvalError>;

/// Errors raised while evaluating an expression against a row
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Unknown relationship: {0}")]
    UnknownRelationship(String),

    #[error("Row vanished during evaluation: {0}")]
    MissingRow(String),

    #[error("Type mismatch in {op}: {left} vs {right}")]
    TypeMismatch {
        op: &'static str,
        left: String,
        right: String,
    },

    #[error("Null operand in {0}; guard with is_null or coalesce")]
    NullOperand(&'static str),

    #[error("Condition did not evaluate to a boolean")]
    NotBoolean,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Integer overflow in {0}")]
    NumericOverflow(&'static str),
}

/// Comparison operators. All of them require non-null operands of
/// comparable kinds; Int and Float compare numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn name(&self) -> &'static str {
        match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    fn name(&self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
        }
    }
}

/// An attribute read an expression performs, as seen by the
/// dependency graph builder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadRef {
    Own(String),
    Parent { rel: String, attr: String },
}

/// Read access to the row an expression is evaluated against.
pub trait RowView {
    fn value(&self, attr: &str) -> EvalResult<Value>;
    /// Value of `attr` on the parent through the named to-one
    /// relationship. `Null` when the foreign key is unassigned.
    fn parent_value(&self, rel: &str, attr: &str) -> EvalResult<Value>;
}

/// A scalar expression over one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Attr(String),
    Parent { rel: String, attr: String },
    IsNull(Box<Expr>),
    Coalesce(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    // ==================
    // Constructors
    // ==================

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn int(n: i64) -> Self {
        Expr::Literal(Value::Int(n))
    }

    pub fn float(x: f64) -> Self {
        Expr::Literal(Value::Float(x))
    }

    pub fn attr(name: &str) -> Self {
        Expr::Attr(name.to_string())
    }

    pub fn parent(rel: &str, attr: &str) -> Self {
        Expr::Parent {
            rel: rel.to_string(),
            attr: attr.to_string(),
        }
    }

    pub fn if_else(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    // ==================
    // Combinators
    // ==================

    pub fn is_null(self) -> Self {
        Expr::IsNull(Box::new(self))
    }

    pub fn coalesce(self, fallback: Expr) -> Self {
        Expr::Coalesce(Box::new(self), Box::new(fallback))
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub fn and(self, rhs: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: Expr) -> Self {
        Expr::Or(Box::new(self), Box::new(rhs))
    }

    pub fn eq(self, rhs: Expr) -> Self {
        Expr::Cmp(CmpOp::Eq, Box::new(self), Box::new(rhs))
    }

    pub fn ne(self, rhs: Expr) -> Self {
        Expr::Cmp(CmpOp::Ne, Box::new(self), Box::new(rhs))
    }

    pub fn lt(self, rhs: Expr) -> Self {
        Expr::Cmp(CmpOp::Lt, Box::new(self), Box::new(rhs))
    }

    pub fn le(self, rhs: Expr) -> Self {
        Expr::Cmp(CmpOp::Le, Box::new(self), Box::new(rhs))
    }

    pub fn gt(self, rhs: Expr) -> Self {
        Expr::Cmp(CmpOp::Gt, Box::new(self), Box::new(rhs))
    }

    pub fn ge(self, rhs: Expr) -> Self {
        Expr::Cmp(CmpOp::Ge, Box::new(self), Box::new(rhs))
    }

    pub fn add(self, rhs: Expr) -> Self {
        Expr::Arith(ArithOp::Add, Box::new(self), Box::new(rhs))
    }

    pub fn sub(self, rhs: Expr) -> Self {
        Expr::Arith(ArithOp::Sub, Box::new(self), Box::new(rhs))
    }

    pub fn mul(self, rhs: Expr) -> Self {
        Expr::Arith(ArithOp::Mul, Box::new(self), Box::new(rhs))
    }

    pub fn div(self, rhs: Expr) -> Self {
        Expr::Arith(ArithOp::Div, Box::new(self), Box::new(rhs))
    }

    // ==================
    // Analysis
    // ==================

    /// Every attribute read this expression performs, duplicates
    /// included. The graph builder dedups.
    pub fn reads(&self) -> Vec<ReadRef> {
        let mut out = Vec::new();
        self.collect_reads(&mut out);
        out
    }

    fn collect_reads(&self, out: &mut Vec<ReadRef>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Attr(name) => out.push(ReadRef::Own(name.clone())),
            Expr::Parent { rel, attr } => out.push(ReadRef::Parent {
                rel: rel.clone(),
                attr: attr.clone(),
            }),
            Expr::IsNull(inner) | Expr::Not(inner) => inner.collect_reads(out),
            Expr::Coalesce(a, b)
            | Expr::And(a, b)
            | Expr::Or(a, b)
            | Expr::Cmp(_, a, b)
            | Expr::Arith(_, a, b) => {
                a.collect_reads(out);
                b.collect_reads(out);
            }
            Expr::If { cond, then, otherwise } => {
                cond.collect_reads(out);
                then.collect_reads(out);
                otherwise.collect_reads(out);
            }
        }
    }

    // ==================
    // Evaluation
    // ==================

    pub fn eval(&self, row: &dyn RowView) -> EvalResult<Value> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Attr(name) => row.value(name),
            Expr::Parent { rel, attr } => row.parent_value(rel, attr),
            Expr::IsNull(inner) => Ok(Value::Bool(inner.eval(row)?.is_null())),
            Expr::Coalesce(a, b) => {
                let left = a.eval(row)?;
                if left.is_null() {
                    b.eval(row)
                } else {
                    Ok(left)
                }
            }
            Expr::Not(inner) => match inner.eval(row)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                _ => Err(EvalError::NotBoolean),
            },
            Expr::And(a, b) => {
                if !expect_bool(a.eval(row)?)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(expect_bool(b.eval(row)?)?))
            }
            Expr::Or(a, b) => {
                if expect_bool(a.eval(row)?)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(expect_bool(b.eval(row)?)?))
            }
            Expr::Cmp(op, a, b) => compare(*op, a.eval(row)?, b.eval(row)?),
            Expr::Arith(op, a, b) => arithmetic(*op, a.eval(row)?, b.eval(row)?),
            Expr::If { cond, then, otherwise } => {
                if expect_bool(cond.eval(row)?)? {
                    then.eval(row)
                } else {
                    otherwise.eval(row)
                }
            }
        }
    }

    /// Evaluate and require a boolean result.
    pub fn eval_bool(&self, row: &dyn RowView) -> EvalResult<bool> {
        expect_bool(self.eval(row)?)
    }
}

fn expect_bool(value: Value) -> EvalResult<bool> {
    value.as_bool().ok_or(EvalError::NotBoolean)
}

fn kind_name(value: &Value) -> String {
    value
        .value_type()
        .map(|t| t.name().to_string())
        .unwrap_or_else(|| "null".to_string())
}

fn compare(op: CmpOp, left: Value, right: Value) -> EvalResult<Value> {
    if left.is_null() || right.is_null() {
        return Err(EvalError::NullOperand(op.name()));
    }
    if matches!(op, CmpOp::Eq | CmpOp::Ne) {
        let equal = match left.compare(&right) {
            Some(ordering) => ordering == std::cmp::Ordering::Equal,
            None if left.value_type() == right.value_type() => left == right,
            None => {
                return Err(EvalError::TypeMismatch {
                    op: op.name(),
                    left: kind_name(&left),
                    right: kind_name(&right),
                })
            }
        };
        return Ok(Value::Bool(if op == CmpOp::Eq { equal } else { !equal }));
    }
    let ordering = left.compare(&right).ok_or_else(|| EvalError::TypeMismatch {
        op: op.name(),
        left: kind_name(&left),
        right: kind_name(&right),
    })?;
    let result = match op {
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Ge => ordering.is_ge(),
        CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
    };
    Ok(Value::Bool(result))
}

fn arithmetic(op: ArithOp, left: Value, right: Value) -> EvalResult<Value> {
    if left.is_null() || right.is_null() {
        return Err(EvalError::NullOperand(op.name()));
    }
    if op == ArithOp::Div {
        let (a, b) = numeric_pair(op, &left, &right)?;
        if b == 0.0 {
            return Err(EvalError::DivisionByZero);
        }
        return Ok(Value::Float(a / b));
    }
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                ArithOp::Add => a.checked_add(*b),
                ArithOp::Sub => a.checked_sub(*b),
                ArithOp::Mul => a.checked_mul(*b),
                ArithOp::Div => unreachable!("handled above"),
            };
            result.map(Value::Int).ok_or(EvalError::NumericOverflow(op.name()))
        }
        _ => {
            let (a, b) = numeric_pair(op, &left, &right)?;
            let result = match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => unreachable!("handled above"),
            };
            Ok(Value::Float(result))
        }
    }
}

fn numeric_pair(op: ArithOp, left: &Value, right: &Value) -> EvalResult<(f64, f64)> {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(EvalError::TypeMismatch {
            op: op.name(),
            left: kind_name(left),
            right: kind_name(right),
        }),
    }
}
