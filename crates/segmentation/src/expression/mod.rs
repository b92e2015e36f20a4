//! Free-form filter expressions over dataset rows.
//!
//! Expressions bind column names to the row's values:
//! - `Age >= 18 and Age <= 35`
//! - `AccountType in ['Savings', 'Checking']`
//! - `not (Gender == 'Male') or Balance > 10000.5`
//! - `` `Account Type` != null ``

mod ast;
mod evaluator;
mod lexer;
mod parser;

pub use ast::{CompareOp, Expr};
pub use evaluator::{check, eval_row, evaluate, ExpressionMask, RowError};
pub use parser::parse;
