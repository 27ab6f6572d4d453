//! A tiny jit-compiled expression language: one scalar type, named function
//! definitions, and immediate evaluation of top-level expressions in a
//! persistent session.

pub mod ast;
pub mod codegen;
pub mod intrinsics;
pub mod lexer;
pub mod parser;
pub mod session;
