use std::collections::HashMap;
use std::io::Read;

use anyhow::{anyhow, Result};
use inkwell::{
    context::Context,
    execution_engine::ExecutionEngine,
    module::Module,
    targets::{InitializationConfig, Target},
    values::{AnyValue, FunctionValue},
    OptimizationLevel,
};

use crate::codegen::Codegen;
use crate::lexer::{Lexer, Token};
use crate::parser::{Parser, ANON_FN_NAME};

type EntryFunc = unsafe extern "C" fn() -> f64;

/// Outcome of handling one top-level construct. `Failed` means a diagnostic
/// was already printed and the loop should simply continue.
#[derive(Debug, PartialEq, Clone)]
pub enum Step {
    Eof,
    Ignored,
    Defined(String),
    Declared(String),
    Evaluated(f64),
    Failed,
}

/// The read-eval loop: drives lexer, parser, and codegen, rotates
/// compilation units into the JIT execution engine, and evaluates top-level
/// expressions immediately.
///
/// Everything is single-threaded and synchronous; the only suspension point
/// is the lexer blocking on the next input character.
pub struct Session<'ctx, R: Read> {
    parser: Parser<R>,
    codegen: Codegen<'ctx>,
    engine: ExecutionEngine<'ctx>,
    /// Finalized unit per defined function name, kept so a redefinition can
    /// unload the unit it supersedes.
    definitions: HashMap<String, Module<'ctx>>,
    primed: bool,
}

impl<'ctx, R: Read> Session<'ctx, R> {
    pub fn new(context: &'ctx Context, lexer: Lexer<R>) -> Result<Self> {
        Target::initialize_native(&InitializationConfig::default())
            .map_err(|e| anyhow!("failed to initialize native target: {}", e))?;

        // The engine wants a module at construction time; this one stays
        // empty and every real unit is added later.
        let anchor = context.create_module("scry-session");
        let engine = anchor
            .create_jit_execution_engine(OptimizationLevel::None)
            .map_err(|e| anyhow!("failed to create execution engine: {:?}", e))?;

        Ok(Session {
            parser: Parser::new(lexer),
            codegen: Codegen::new(context),
            engine,
            definitions: HashMap::new(),
            primed: false,
        })
    }

    /// Runs until end of input, printing a prompt per iteration and a
    /// result line per evaluated expression. Parse and codegen failures are
    /// diagnosed and survived; only engine malfunctions abort.
    pub fn run(&mut self) -> Result<()> {
        loop {
            eprint!("ready> ");
            match self.step()? {
                Step::Eof => return Ok(()),
                Step::Evaluated(value) => eprintln!("Evaluated to {}", value),
                _ => {}
            }
        }
    }

    /// Handles exactly one top-level construct.
    pub fn step(&mut self) -> Result<Step> {
        if !self.primed {
            // deferred so `run` can show a prompt before the lexer blocks
            self.parser.advance();
            self.primed = true;
        }

        match self.parser.current() {
            Token::Eof => Ok(Step::Eof),
            Token::Char(';') => {
                self.parser.advance();
                Ok(Step::Ignored)
            }
            Token::Def => self.handle_definition(),
            Token::Extern => self.handle_extern(),
            _ => self.handle_top_level(),
        }
    }

    fn handle_definition(&mut self) -> Result<Step> {
        let func = match self.parser.parse_definition() {
            Ok(func) => func,
            Err(err) => return Ok(self.recover(&err.to_string())),
        };

        let name = func.prototype.name.clone();
        let fn_val = match self.codegen.compile_fn(&func) {
            Ok(fn_val) => fn_val,
            Err(err) => {
                eprintln!("error: {}", err);
                return Ok(Step::Failed);
            }
        };

        eprintln!("Read function definition:");
        Self::dump(fn_val);

        let module = self.codegen.rotate_unit();
        // unload the unit this definition supersedes, so symbol lookup
        // can only ever find the newest body
        if let Some(old) = self.definitions.remove(&name) {
            self.engine
                .remove_module(&old)
                .map_err(|e| anyhow!("failed to unload module: {:?}", e))?;
        }
        self.engine
            .add_module(&module)
            .map_err(|_| anyhow!("failed to load module into execution engine"))?;
        self.definitions.insert(name.clone(), module);

        Ok(Step::Defined(name))
    }

    fn handle_extern(&mut self) -> Result<Step> {
        let proto = match self.parser.parse_extern() {
            Ok(proto) => proto,
            Err(err) => return Ok(self.recover(&err.to_string())),
        };

        let name = proto.name.clone();
        let fn_val = self.codegen.declare_extern(proto);
        eprintln!("Read extern:");
        Self::dump(fn_val);

        Ok(Step::Declared(name))
    }

    fn handle_top_level(&mut self) -> Result<Step> {
        let func = match self.parser.parse_top_level_expr() {
            Ok(func) => func,
            Err(err) => return Ok(self.recover(&err.to_string())),
        };

        if let Err(err) = self.codegen.compile_fn(&func) {
            eprintln!("error: {}", err);
            return Ok(Step::Failed);
        }

        let module = self.codegen.rotate_unit();
        self.engine
            .add_module(&module)
            .map_err(|_| anyhow!("failed to load module into execution engine"))?;

        let value = {
            let entry = unsafe { self.engine.get_function::<EntryFunc>(ANON_FN_NAME) }
                .map_err(|e| anyhow!("{}", e))?;
            unsafe { entry.call() }
        };

        // drop the whole unit: anonymous wrappers must not stay callable
        self.engine
            .remove_module(&module)
            .map_err(|e| anyhow!("failed to unload module: {:?}", e))?;

        Ok(Step::Evaluated(value))
    }

    /// Best-effort resynchronization: report the failure and skip one
    /// token. Not guaranteed to land on a construct boundary, but one
    /// malformed construct never halts the session.
    fn recover(&mut self, message: &str) -> Step {
        eprintln!("error: {}", message);
        self.parser.advance();
        Step::Failed
    }

    fn dump(fn_val: FunctionValue) {
        let ir = fn_val.print_to_string();
        eprintln!("{}", ir.to_str().unwrap_or("<non-utf8 ir>"));
    }
}
