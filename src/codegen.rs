use std::collections::HashMap;

use inkwell::{
    builder::Builder,
    context::Context,
    module::Module,
    passes::PassManager,
    types::BasicMetadataTypeEnum,
    values::{BasicMetadataValueEnum, BasicValueEnum, FloatValue, FunctionValue},
    FloatPredicate,
};

use crate::ast::{Expr, Function, Prototype};

/// Name shared by every compilation unit; LLVM is fine with duplicates.
const MODULE_NAME: &str = "scry";

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum CodegenError {
    #[error("unknown variable referenced {0}")]
    UnknownVariable(String),
    #[error("invalid binary operator {0}")]
    InvalidOperator(char),
    #[error("unknown function referenced {0}")]
    UnknownFunction(String),
    #[error("invalid number of args in call to {0}: expected {1} found {2}")]
    InvalidCall(String, usize, usize),
    #[error("failed to verify function {0}")]
    InvalidFunction(String),
}

pub type CodegenResult<T> = Result<T, CodegenError>;

/// Lowers AST nodes into LLVM IR inside the current compilation unit.
///
/// Two pieces of state outlive a unit: `fn_protos`, the cross-unit prototype
/// cache that lets a call resolve a function whose defining unit has already
/// been handed off, and the context itself. `named_values` is the local
/// scope of whichever function body is being generated right now.
pub struct Codegen<'ctx> {
    context: &'ctx Context,
    pub module: Module<'ctx>,
    builder: Builder<'ctx>,
    fpm: PassManager<FunctionValue<'ctx>>,
    named_values: HashMap<String, BasicValueEnum<'ctx>>,
    fn_protos: HashMap<String, Prototype>,
}

impl<'ctx> Codegen<'ctx> {
    pub fn new(context: &'ctx Context) -> Codegen<'ctx> {
        let (module, fpm) = Self::fresh_unit(context);
        Codegen {
            context,
            module,
            builder: context.create_builder(),
            fpm,
            named_values: HashMap::new(),
            fn_protos: HashMap::new(),
        }
    }

    /// A new empty module plus its function pass pipeline. The pipeline is
    /// the optimizer collaborator: it only ever sees verified functions.
    fn fresh_unit(
        context: &'ctx Context,
    ) -> (Module<'ctx>, PassManager<FunctionValue<'ctx>>) {
        let module = context.create_module(MODULE_NAME);
        let fpm: PassManager<FunctionValue<'ctx>> = PassManager::create(&module);
        fpm.add_instruction_combining_pass();
        fpm.add_reassociate_pass();
        fpm.add_gvn_pass();
        fpm.add_cfg_simplification_pass();
        fpm.initialize();
        (module, fpm)
    }

    /// Closes the current compilation unit and starts an empty one,
    /// returning the finished unit for the execution engine. The prototype
    /// cache carries over, so functions in the finished unit stay callable
    /// from later ones.
    pub fn rotate_unit(&mut self) -> Module<'ctx> {
        let (module, fpm) = Self::fresh_unit(self.context);
        self.fpm = fpm;
        std::mem::replace(&mut self.module, module)
    }

    /// Resolves a function first in the current unit, then by materializing
    /// a declaration from the prototype cache. This is how a call reaches a
    /// function whose unit was already finalized.
    fn get_function(&self, name: &str) -> Option<FunctionValue<'ctx>> {
        if let Some(func) = self.module.get_function(name) {
            return Some(func);
        }
        self.fn_protos
            .get(name)
            .map(|proto| self.compile_proto(proto))
    }

    fn codegen_expr(&mut self, expr: &Expr) -> CodegenResult<FloatValue<'ctx>> {
        match expr {
            Expr::Number(value) => Ok(self.context.f64_type().const_float(*value)),
            Expr::Variable(name) => match self.named_values.get(name) {
                Some(var) => Ok(var.into_float_value()),
                None => Err(CodegenError::UnknownVariable(name.clone())),
            },
            Expr::Binary(op, left, right) => {
                let lhs = self.codegen_expr(left)?;
                let rhs = self.codegen_expr(right)?;

                match op {
                    '+' => Ok(self.builder.build_float_add(lhs, rhs, "addtmp")),
                    '-' => Ok(self.builder.build_float_sub(lhs, rhs, "subtmp")),
                    '*' => Ok(self.builder.build_float_mul(lhs, rhs, "multmp")),
                    '<' => {
                        let cmp = self.builder.build_float_compare(
                            FloatPredicate::ULT,
                            lhs,
                            rhs,
                            "cmptmp",
                        );
                        // the i1 comparison result becomes 1.0 or 0.0
                        Ok(self.builder.build_unsigned_int_to_float(
                            cmp,
                            self.context.f64_type(),
                            "booltmp",
                        ))
                    }
                    _ => Err(CodegenError::InvalidOperator(*op)),
                }
            }
            Expr::Call(callee, args) => {
                let func = self
                    .get_function(callee)
                    .ok_or_else(|| CodegenError::UnknownFunction(callee.clone()))?;

                let arity = func.get_params().len();
                if arity != args.len() {
                    return Err(CodegenError::InvalidCall(
                        callee.clone(),
                        arity,
                        args.len(),
                    ));
                }

                let mut argsv: Vec<BasicMetadataValueEnum> = Vec::with_capacity(args.len());
                for arg in args {
                    argsv.push(self.codegen_expr(arg)?.into());
                }

                match self
                    .builder
                    .build_call(func, argsv.as_slice(), "calltmp")
                    .try_as_basic_value()
                    .left()
                {
                    Some(value) => Ok(value.into_float_value()),
                    // every scry function returns the scalar type
                    None => unreachable!("call returned no value"),
                }
            }
        }
    }

    /// Declares `double name(double, ...)` in the current unit, naming the
    /// parameters for later local-scope binding. Cannot fail.
    fn compile_proto(&self, proto: &Prototype) -> FunctionValue<'ctx> {
        let arg_types = std::iter::repeat(self.context.f64_type())
            .take(proto.args.len())
            .map(|f| f.into())
            .collect::<Vec<BasicMetadataTypeEnum>>();

        let fn_type = self.context.f64_type().fn_type(arg_types.as_slice(), false);
        let fn_val = self.module.add_function(proto.name.as_str(), fn_type, None);

        for (arg, name) in fn_val.get_param_iter().zip(&proto.args) {
            arg.into_float_value().set_name(name);
        }

        fn_val
    }

    /// Declares an `extern` prototype and records it in the prototype cache
    /// so calls in later units can still resolve it.
    pub fn declare_extern(&mut self, proto: Prototype) -> FunctionValue<'ctx> {
        let fn_val = self.compile_proto(&proto);
        self.fn_protos.insert(proto.name.clone(), proto);
        fn_val
    }

    /// Compiles a full definition into the current unit.
    ///
    /// The prototype is cached before resolution - re-registering a name
    /// overwrites the previous entry, so the latest signature wins for
    /// future lookups. A body that fails to generate (or a function that
    /// fails verification) is deleted from the unit entirely; a unit must
    /// never keep a half-defined function around for later calls to find.
    pub fn compile_fn(&mut self, function: &Function) -> CodegenResult<FunctionValue<'ctx>> {
        let Function { prototype, body } = function;

        self.fn_protos
            .insert(prototype.name.clone(), prototype.clone());
        let fn_val = self
            .get_function(&prototype.name)
            .ok_or_else(|| CodegenError::UnknownFunction(prototype.name.clone()))?;

        let entry = self.context.append_basic_block(fn_val, "entry");
        self.builder.position_at_end(entry);

        self.named_values.clear();
        self.named_values.reserve(prototype.args.len());
        // zip rather than index: a stale cached declaration may disagree
        // with this prototype about arity
        for (name, arg) in prototype.args.iter().zip(fn_val.get_param_iter()) {
            self.named_values.insert(name.clone(), arg);
        }

        let ret = match self.codegen_expr(body) {
            Ok(value) => value,
            Err(err) => {
                unsafe {
                    fn_val.delete();
                }
                return Err(err);
            }
        };

        self.builder.build_return(Some(&ret));

        if fn_val.verify(true) {
            self.fpm.run_on(&fn_val);
            Ok(fn_val)
        } else {
            unsafe {
                fn_val.delete();
            }
            Err(CodegenError::InvalidFunction(prototype.name.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use inkwell::context::Context;

    use crate::lexer::Lexer;
    use crate::parser::Parser;

    use super::*;

    fn parser_for(input: &str) -> Parser<Cursor<String>> {
        let mut parser = Parser::new(Lexer::new(Cursor::new(input.to_string())));
        parser.advance();
        parser
    }

    fn printed(codegen: &Codegen) -> String {
        codegen.module.print_to_string().to_string()
    }

    #[test]
    fn arithmetic_lowers_to_float_instructions() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);
        let func = parser_for("def calc(x y) x*y - x").parse_definition().unwrap();
        codegen.compile_fn(&func).unwrap();

        let ir = printed(&codegen);
        assert!(ir.contains("fmul double"));
        assert!(ir.contains("fsub double"));
    }

    #[test]
    fn comparison_lowers_to_fcmp_and_uitofp() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);
        let func = parser_for("def lt(x y) x<y").parse_definition().unwrap();
        codegen.compile_fn(&func).unwrap();

        let ir = printed(&codegen);
        assert!(ir.contains("fcmp ult double"));
        assert!(ir.contains("uitofp i1"));
    }

    #[test]
    fn constant_body_folds_at_build_time() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);
        let func = parser_for("def seven() 3+4").parse_definition().unwrap();
        codegen.compile_fn(&func).unwrap();

        assert!(printed(&codegen).contains("ret double 7.000000e+00"));
    }

    #[test]
    fn undefined_variable_removes_the_function() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);
        let func = parser_for("def f(x) y").parse_definition().unwrap();

        assert_eq!(
            codegen.compile_fn(&func),
            Err(CodegenError::UnknownVariable("y".to_string()))
        );
        // the broken function must not linger in the unit
        assert!(codegen.module.get_function("f").is_none());
    }

    #[test]
    fn unknown_function_call_fails() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);
        let func = parser_for("def f(x) g(x)").parse_definition().unwrap();

        assert_eq!(
            codegen.compile_fn(&func),
            Err(CodegenError::UnknownFunction("g".to_string()))
        );
    }

    #[test]
    fn arity_mismatch_fails() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);

        let proto = parser_for("extern sin(x)").parse_extern().unwrap();
        codegen.declare_extern(proto);

        let func = parser_for("def f(x) sin(x, x)").parse_definition().unwrap();
        assert_eq!(
            codegen.compile_fn(&func),
            Err(CodegenError::InvalidCall("sin".to_string(), 1, 2))
        );
    }

    #[test]
    fn calls_resolve_across_unit_rotation() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);

        let def = parser_for("def double(x) x*2").parse_definition().unwrap();
        codegen.compile_fn(&def).unwrap();
        codegen.rotate_unit();

        // `double` lives in a closed unit now; the call signature comes
        // from the prototype cache
        let user = parser_for("def quad(x) double(double(x))")
            .parse_definition()
            .unwrap();
        codegen.compile_fn(&user).unwrap();

        assert!(printed(&codegen).contains("declare double @double(double)"));
    }

    #[test]
    fn extern_resolves_across_unit_rotation() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);

        let proto = parser_for("extern cos(x)").parse_extern().unwrap();
        codegen.declare_extern(proto);
        codegen.rotate_unit();

        let user = parser_for("def c(x) cos(x)").parse_definition().unwrap();
        codegen.compile_fn(&user).unwrap();
        assert!(printed(&codegen).contains("declare double @cos(double)"));
    }

    #[test]
    fn redefinition_overwrites_the_cached_signature() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);

        let one = parser_for("def f(x) x").parse_definition().unwrap();
        codegen.compile_fn(&one).unwrap();
        codegen.rotate_unit();

        let two = parser_for("def f(x y) x+y").parse_definition().unwrap();
        codegen.compile_fn(&two).unwrap();
        codegen.rotate_unit();

        // the two-argument signature is the one future calls must see
        let user = parser_for("def g() f(1, 2)").parse_definition().unwrap();
        codegen.compile_fn(&user).unwrap();
    }

    #[test]
    fn recompiling_an_unchanged_definition_is_idempotent() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);
        let func = parser_for("def inc(x) x+1").parse_definition().unwrap();

        codegen.compile_fn(&func).unwrap();
        let first = printed(&codegen);
        codegen.rotate_unit();

        codegen.compile_fn(&func).unwrap();
        assert_eq!(printed(&codegen), first);
    }

    #[test]
    fn duplicate_parameter_names_last_binding_wins() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context);
        let func = parser_for("def f(x x) x").parse_definition().unwrap();
        codegen.compile_fn(&func).unwrap();

        // the body's `x` refers to the second parameter
        assert!(printed(&codegen).contains("ret double %x1"));
    }
}
