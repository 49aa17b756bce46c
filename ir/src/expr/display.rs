//! Infix rendering of expressions.
//!
//! Parentheses are emitted only where precedence requires them. A right
//! operand of equal precedence is always parenthesized, so
//! `i * 16 + (j * 4 + k)` keeps the grouping produced by index assembly.

use std::fmt;

use crate::types::{BinaryOp, ConstValue, UnaryOp};

use super::core::{Expr, ExprOp};

const PREC_ATOM: u8 = 6;
const PREC_UNARY: u8 = 5;

fn binary_prec(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::And => 1,
        BinaryOp::Lt | BinaryOp::Ge => 2,
        BinaryOp::Add | BinaryOp::Sub => 3,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 4,
        BinaryOp::CeilDiv | BinaryOp::Min | BinaryOp::Max => PREC_ATOM,
    }
}

fn symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Lt => "<",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "&&",
        BinaryOp::CeilDiv => "ceilDiv",
        BinaryOp::Min => "min",
        BinaryOp::Max => "max",
    }
}

fn prec(expr: &Expr) -> u8 {
    match &expr.op {
        ExprOp::Const(ConstValue::Int(v)) if *v < 0 => PREC_UNARY,
        ExprOp::Const(_) | ExprOp::Var(_) => PREC_ATOM,
        ExprOp::Unary(..) => PREC_UNARY,
        ExprOp::Binary(op, ..) => binary_prec(*op),
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, min_prec: u8) -> fmt::Result {
    if prec(expr) < min_prec { write!(f, "({expr})") } else { write!(f, "{expr}") }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            ExprOp::Const(ConstValue::Int(v)) => write!(f, "{v}"),
            ExprOp::Const(ConstValue::Bool(v)) => write!(f, "{v}"),
            ExprOp::Var(var) => f.write_str(&var.name),
            ExprOp::Unary(UnaryOp::Neg, a) => {
                f.write_str("-")?;
                write_operand(f, a, PREC_ATOM)
            }
            ExprOp::Binary(op @ (BinaryOp::CeilDiv | BinaryOp::Min | BinaryOp::Max), a, b) => {
                write!(f, "{}({a}, {b})", symbol(*op))
            }
            ExprOp::Binary(op, a, b) => {
                let p = binary_prec(*op);
                write_operand(f, a, p)?;
                write!(f, " {} ", symbol(*op))?;
                write_operand(f, b, p + 1)
            }
        }
    }
}
