/// A function signature: name plus ordered parameter names. Everything is
/// the one scalar type, so the names alone pin down arity and order.
/// Duplicate parameter names are not rejected; the last binding wins.
#[derive(Debug, PartialEq, Clone)]
pub struct Prototype {
    pub name: String,
    pub args: Vec<String>,
}

/// Expression tree. Each node exclusively owns its children; a tree is
/// built once by the parser and consumed by a single codegen pass.
#[derive(Debug, PartialEq, Clone)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(char, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// A named definition: one prototype, one body expression whose value is
/// the return value. There is no statement sequencing.
#[derive(Debug, PartialEq, Clone)]
pub struct Function {
    pub prototype: Prototype,
    pub body: Expr,
}
