//! Conditional compilation
//!
//! [`filter`] decides every `#if`/`#ifdef`/`#ifndef` chain against the
//! configured macro map and blanks the branches that are out. The integer
//! expression evaluator in [`expr`] is shared with the linker, which uses it
//! for array dimensions, bit widths and enum values.

pub mod expr;
mod filter;

pub use expr::{evaluate, parse_int_literal, EvalError, Expr, NoNames, Resolver};
pub use filter::{filter, ConditionalRegion, Decision, FilterOutput};
