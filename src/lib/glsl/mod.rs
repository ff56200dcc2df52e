//! GLSL front end: grammar, typed syntax tree, renderer and traversals.

pub mod ast;
pub mod parse;
pub mod preprocess;
pub mod visit;

pub use ast::{Expr, ShaderAst, Stmt, TranslationUnit};
pub use parse::{parse_expression, parse_program};
