use crate::bytecode::{Emitter, Opcode, Operand, Value, encode_call};
use crate::context::{CompilationContext, CompileError};
use crate::language::{BuiltinOp, Msg};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOperator {
    fn opcode(self) -> Opcode {
        match self {
            BinaryOperator::Add => Opcode::Add,
            BinaryOperator::Sub => Opcode::Sub,
            BinaryOperator::Mul => Opcode::Mul,
            BinaryOperator::Div => Opcode::Div,
            BinaryOperator::Mod => Opcode::Mod,
            BinaryOperator::Eq => Opcode::CmpEq,
            BinaryOperator::Ne => Opcode::CmpNe,
            BinaryOperator::Lt => Opcode::CmpLt,
            BinaryOperator::Le => Opcode::CmpLe,
            BinaryOperator::Gt => Opcode::CmpGt,
            BinaryOperator::Ge => Opcode::CmpGe,
            BinaryOperator::And => Opcode::And,
            BinaryOperator::Or => Opcode::Or,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Variable(String),
    SelfRef,
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Builtin {
        op: BuiltinOp,
        args: Vec<Expression>,
    },
    /// User function call; the target address is resolved at codegen.
    Call {
        name: String,
        args: Vec<Expression>,
    },
    /// Call into a dynamically loaded library, validated at link time.
    NativeCall {
        name: String,
        args: Vec<Expression>,
    },
    /// `Classe.metodo(args)` — allocates a fresh receiver and jumps to the
    /// statically known method body.
    StaticCall {
        class: String,
        method: String,
        args: Vec<Expression>,
    },
    /// `variavel.metodo(args)` — receiver class only known at runtime.
    MethodCall {
        receiver: Box<Expression>,
        method: String,
        args: Vec<Expression>,
    },
    MemberGet {
        receiver: Box<Expression>,
        name: String,
    },
    ListLiteral(Vec<Expression>),
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportKind {
    Plain { name: String },
    File { path: String },
    Alias { name: String, alias: String },
    Selective { name: String, items: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Expr(Expression),
    Assign {
        name: String,
        value: Expression,
    },
    IndexAssign {
        target: Expression,
        index: Expression,
        value: Expression,
    },
    MemberAssign {
        receiver: Expression,
        name: String,
        value: Expression,
    },
    If {
        condition: Expression,
        then_body: Block,
        else_body: Option<Block>,
    },
    While {
        condition: Expression,
        body: Block,
    },
    Repeat {
        count: Expression,
        body: Block,
    },
    ForRange {
        var: String,
        from: Expression,
        to: Expression,
        body: Block,
    },
    Break {
        line: usize,
    },
    Continue {
        line: usize,
    },
    FunctionDef {
        name: String,
        params: Vec<String>,
        body: Block,
    },
    Return(Option<Expression>),
    ClassDef {
        name: String,
        methods: Vec<MethodDecl>,
    },
    Import(ImportKind),
    NativeDef {
        name: String,
        arity: usize,
    },
}

/// Ordered statement sequence; also the root node produced by the parser.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block(pub Vec<Statement>);

type LowerResult = Result<(), CompileError>;

impl Expression {
    pub fn lower(&self, ctx: &mut CompilationContext, em: &mut Emitter) -> LowerResult {
        match self {
            Expression::Literal(value) => {
                em.emit_const(value.clone());
            }
            Expression::Variable(name) => {
                em.emit_with(Opcode::LoadVar, Operand::Name(name.clone()));
            }
            Expression::SelfRef => {
                em.emit_with(Opcode::LoadVar, Operand::Name("auto".to_string()));
            }
            Expression::Unary { op, operand } => {
                operand.lower(ctx, em)?;
                em.emit(match op {
                    UnaryOperator::Neg => Opcode::Neg,
                    UnaryOperator::Not => Opcode::Not,
                });
            }
            Expression::Binary { op, left, right } => {
                left.lower(ctx, em)?;
                right.lower(ctx, em)?;
                em.emit(op.opcode());
            }
            Expression::Builtin { op, args } => {
                for arg in args {
                    arg.lower(ctx, em)?;
                }
                em.emit(match op {
                    BuiltinOp::Print => Opcode::Print,
                    BuiltinOp::Input => Opcode::Input,
                    BuiltinOp::ToInt => Opcode::ToInt,
                    BuiltinOp::ToFloat => Opcode::ToFloat,
                    BuiltinOp::ToText => Opcode::ToText,
                    BuiltinOp::ToBool => Opcode::ToBool,
                    BuiltinOp::TypeName => Opcode::TypeName,
                    BuiltinOp::Length => Opcode::ListLen,
                    BuiltinOp::Append => Opcode::ListAppend,
                    BuiltinOp::Remove => Opcode::ListRemove,
                });
            }
            Expression::Call { name, args } => {
                for arg in args {
                    arg.lower(ctx, em)?;
                }
                em.emit_with(Opcode::Call, Operand::Call(encode_call(name, args.len())));
            }
            Expression::NativeCall { name, args } => {
                for arg in args {
                    arg.lower(ctx, em)?;
                }
                em.emit_with(
                    Opcode::CallNative,
                    Operand::Call(encode_call(name, args.len())),
                );
            }
            Expression::StaticCall {
                class,
                method,
                args,
            } => {
                em.emit_with(Opcode::NewObject, Operand::Name(class.clone()));
                for arg in args {
                    arg.lower(ctx, em)?;
                }
                let key = format!("{class}.{method}");
                em.emit_with(Opcode::Call, Operand::Call(encode_call(&key, args.len())));
            }
            Expression::MethodCall {
                receiver,
                method,
                args,
            } => {
                receiver.lower(ctx, em)?;
                for arg in args {
                    arg.lower(ctx, em)?;
                }
                em.emit_with(
                    Opcode::CallMethod,
                    Operand::Call(encode_call(method, args.len())),
                );
            }
            Expression::MemberGet { receiver, name } => {
                receiver.lower(ctx, em)?;
                em.emit_with(Opcode::GetMember, Operand::Name(name.clone()));
            }
            Expression::ListLiteral(items) => {
                for item in items {
                    item.lower(ctx, em)?;
                }
                em.emit_with(
                    Opcode::NewList,
                    Operand::Value(Value::Int(items.len() as i64)),
                );
            }
            Expression::Index { target, index } => {
                target.lower(ctx, em)?;
                index.lower(ctx, em)?;
                em.emit(Opcode::IndexGet);
            }
        }
        Ok(())
    }
}

impl Statement {
    pub fn lower(&self, ctx: &mut CompilationContext, em: &mut Emitter) -> LowerResult {
        match self {
            Statement::Expr(expr) => {
                expr.lower(ctx, em)?;
                em.emit(Opcode::Pop);
            }
            Statement::Assign { name, value } => {
                value.lower(ctx, em)?;
                em.emit_with(Opcode::StoreVar, Operand::Name(name.clone()));
            }
            Statement::IndexAssign {
                target,
                index,
                value,
            } => {
                target.lower(ctx, em)?;
                index.lower(ctx, em)?;
                value.lower(ctx, em)?;
                em.emit(Opcode::IndexSet);
            }
            Statement::MemberAssign {
                receiver,
                name,
                value,
            } => {
                receiver.lower(ctx, em)?;
                value.lower(ctx, em)?;
                em.emit_with(Opcode::SetMember, Operand::Name(name.clone()));
            }
            Statement::If {
                condition,
                then_body,
                else_body,
            } => {
                condition.lower(ctx, em)?;
                let skip_then = em.emit_jump(Opcode::JumpIfFalse);
                then_body.lower(ctx, em)?;
                match else_body {
                    Some(else_body) => {
                        let skip_else = em.emit_jump(Opcode::Jump);
                        em.patch_to_here(skip_then);
                        else_body.lower(ctx, em)?;
                        em.patch_to_here(skip_else);
                    }
                    None => em.patch_to_here(skip_then),
                }
            }
            Statement::While { condition, body } => {
                let start = em.here();
                condition.lower(ctx, em)?;
                let exit = em.emit_jump(Opcode::JumpIfFalse);
                em.enter_loop();
                let body_start = em.here();
                body.lower(ctx, em)?;
                em.emit_with(Opcode::Jump, Operand::Addr(start));
                em.patch_to_here(exit);
                let end = em.here();
                em.exit_loop(body_start, end, start);
            }
            Statement::Repeat { count, body } => {
                let counter = ctx.fresh_temp();
                count.lower(ctx, em)?;
                em.emit_with(Opcode::StoreVar, Operand::Name(counter.clone()));
                let start = em.here();
                em.emit_with(Opcode::LoadVar, Operand::Name(counter.clone()));
                em.emit_const(Value::Int(0));
                em.emit(Opcode::CmpGt);
                let exit = em.emit_jump(Opcode::JumpIfFalse);
                em.enter_loop();
                let body_start = em.here();
                body.lower(ctx, em)?;
                // Decrement block doubles as the `continuar` target.
                let step = em.here();
                em.emit_with(Opcode::LoadVar, Operand::Name(counter.clone()));
                em.emit_const(Value::Int(1));
                em.emit(Opcode::Sub);
                em.emit_with(Opcode::StoreVar, Operand::Name(counter.clone()));
                em.emit_with(Opcode::Jump, Operand::Addr(start));
                em.patch_to_here(exit);
                let end = em.here();
                em.exit_loop(body_start, end, step);
            }
            Statement::ForRange {
                var,
                from,
                to,
                body,
            } => {
                let limit = ctx.fresh_temp();
                from.lower(ctx, em)?;
                em.emit_with(Opcode::StoreVar, Operand::Name(var.clone()));
                to.lower(ctx, em)?;
                em.emit_with(Opcode::StoreVar, Operand::Name(limit.clone()));
                let start = em.here();
                em.emit_with(Opcode::LoadVar, Operand::Name(var.clone()));
                em.emit_with(Opcode::LoadVar, Operand::Name(limit.clone()));
                em.emit(Opcode::CmpLe);
                let exit = em.emit_jump(Opcode::JumpIfFalse);
                em.enter_loop();
                let body_start = em.here();
                body.lower(ctx, em)?;
                let step = em.here();
                em.emit_with(Opcode::LoadVar, Operand::Name(var.clone()));
                em.emit_const(Value::Int(1));
                em.emit(Opcode::Add);
                em.emit_with(Opcode::StoreVar, Operand::Name(var.clone()));
                em.emit_with(Opcode::Jump, Operand::Addr(start));
                em.patch_to_here(exit);
                let end = em.here();
                em.exit_loop(body_start, end, step);
            }
            Statement::Break { line } => {
                if !em.in_loop() {
                    return Err(ctx.error(Msg::LoopControlOutsideLoop, &[&line.to_string()]));
                }
                em.emit(Opcode::Break);
            }
            Statement::Continue { line } => {
                if !em.in_loop() {
                    return Err(ctx.error(Msg::LoopControlOutsideLoop, &[&line.to_string()]));
                }
                em.emit(Opcode::Continue);
            }
            Statement::FunctionDef { name, params, body } => {
                let skip = em.emit_jump(Opcode::Jump);
                ctx.set_function_address(name, em.here());
                // Arguments arrive on the stack in push order; pop into the
                // parameter slots back to front.
                for param in params.iter().rev() {
                    em.emit_with(Opcode::StoreVar, Operand::Name(param.clone()));
                }
                body.lower(ctx, em)?;
                em.emit(Opcode::Return);
                em.patch_to_here(skip);
            }
            Statement::Return(value) => match value {
                Some(value) => {
                    value.lower(ctx, em)?;
                    em.emit(Opcode::ReturnValue);
                }
                None => {
                    em.emit(Opcode::Return);
                }
            },
            Statement::ClassDef { name, methods } => {
                for method in methods {
                    let skip = em.emit_jump(Opcode::Jump);
                    ctx.set_method_address(name, &method.name, em.here());
                    for param in method.params.iter().rev() {
                        em.emit_with(Opcode::StoreVar, Operand::Name(param.clone()));
                    }
                    em.emit_with(Opcode::StoreVar, Operand::Name("auto".to_string()));
                    method.body.lower(ctx, em)?;
                    // Falling off the end hands the receiver back, which is
                    // what makes `Pessoa.criar(...)` return the instance.
                    em.emit_with(Opcode::LoadVar, Operand::Name("auto".to_string()));
                    em.emit(Opcode::ReturnValue);
                    em.patch_to_here(skip);
                }
            }
            // Imports and native declarations registered their symbols while
            // the parser ran; they emit nothing.
            Statement::Import(_) | Statement::NativeDef { .. } => {}
        }
        Ok(())
    }
}

impl Block {
    pub fn lower(&self, ctx: &mut CompilationContext, em: &mut Emitter) -> LowerResult {
        for statement in &self.0 {
            statement.lower(ctx, em)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::LanguageTable;
    use std::path::Path;

    fn context() -> CompilationContext {
        CompilationContext::new(LanguageTable::portuguese(), Path::new("."))
    }

    fn lower(statements: Vec<Statement>) -> (Vec<crate::bytecode::Instruction>, CompilationContext)
    {
        let mut ctx = context();
        let mut em = Emitter::new();
        Block(statements)
            .lower(&mut ctx, &mut em)
            .expect("lowering should succeed");
        (em.code, ctx)
    }

    fn int(value: i64) -> Expression {
        Expression::Literal(Value::Int(value))
    }

    #[test]
    fn if_without_else_jumps_past_then_block() {
        let (code, _) = lower(vec![Statement::If {
            condition: Expression::Literal(Value::Bool(true)),
            then_body: Block(vec![Statement::Expr(int(1))]),
            else_body: None,
        }]);
        // 0 const, 1 jump-if-false, 2 const, 3 pop
        assert_eq!(code[1].op, Opcode::JumpIfFalse);
        assert_eq!(code[1].operand, Operand::Addr(4));
    }

    #[test]
    fn if_else_targets_match_block_boundaries() {
        let (code, _) = lower(vec![Statement::If {
            condition: Expression::Binary {
                op: BinaryOperator::Gt,
                left: Box::new(int(1)),
                right: Box::new(int(0)),
            },
            then_body: Block(vec![Statement::Expr(int(10))]),
            else_body: Some(Block(vec![Statement::Expr(int(20))])),
        }]);
        // 0 const 1, 1 const 0, 2 cmp_gt, 3 jf, 4 const 10, 5 pop,
        // 6 jump, 7 const 20, 8 pop
        assert_eq!(code[3].op, Opcode::JumpIfFalse);
        assert_eq!(code[3].operand, Operand::Addr(7), "false path enters else");
        assert_eq!(code[6].op, Opcode::Jump);
        assert_eq!(code[6].operand, Operand::Addr(9), "then path skips else");
    }

    #[test]
    fn while_loop_jumps_back_to_condition() {
        let (code, _) = lower(vec![Statement::While {
            condition: Expression::Literal(Value::Bool(true)),
            body: Block(vec![Statement::Expr(int(1))]),
        }]);
        // 0 const, 1 jf -> 5, 2 const, 3 pop, 4 jump -> 0
        assert_eq!(code[1].operand, Operand::Addr(5));
        assert_eq!(code[4].op, Opcode::Jump);
        assert_eq!(code[4].operand, Operand::Addr(0));
    }

    #[test]
    fn break_and_continue_are_rewritten_to_jumps() {
        let (code, _) = lower(vec![Statement::While {
            condition: Expression::Literal(Value::Bool(true)),
            body: Block(vec![
                Statement::Break { line: 2 },
                Statement::Continue { line: 3 },
            ]),
        }]);
        assert!(!code
            .iter()
            .any(|i| matches!(i.op, Opcode::Break | Opcode::Continue)));
        // 0 const, 1 jf -> 5, 2 jump(end=5), 3 jump(start=0), 4 jump -> 0
        assert_eq!(code[2].operand, Operand::Addr(5));
        assert_eq!(code[3].operand, Operand::Addr(0));
    }

    #[test]
    fn break_outside_loop_is_fatal() {
        let mut ctx = context();
        let mut em = Emitter::new();
        let err = Statement::Break { line: 4 }
            .lower(&mut ctx, &mut em)
            .expect_err("break outside a loop must fail");
        assert!(err.message.contains("laco"));
        assert!(err.message.contains('4'));
    }

    #[test]
    fn repeat_counts_down_through_a_temp_slot() {
        let (code, _) = lower(vec![Statement::Repeat {
            count: int(3),
            body: Block(vec![Statement::Expr(int(7))]),
        }]);
        let temp_stores = code
            .iter()
            .filter(|i| {
                i.op == Opcode::StoreVar
                    && matches!(&i.operand, Operand::Name(name) if name.starts_with('#'))
            })
            .count();
        assert_eq!(temp_stores, 2, "initialization plus decrement");
        assert!(code.iter().any(|i| i.op == Opcode::CmpGt));
    }

    #[test]
    fn for_range_uses_inclusive_limit() {
        let (code, _) = lower(vec![Statement::ForRange {
            var: "i".to_string(),
            from: int(1),
            to: int(3),
            body: Block(vec![]),
        }]);
        assert!(code.iter().any(|i| i.op == Opcode::CmpLe));
    }

    #[test]
    fn function_definition_registers_body_address_and_is_skipped() {
        let mut ctx = context();
        ctx.register_function("dobro", vec!["n".to_string()]);
        let mut em = Emitter::new();
        Block(vec![Statement::FunctionDef {
            name: "dobro".to_string(),
            params: vec!["n".to_string()],
            body: Block(vec![Statement::Return(Some(Expression::Binary {
                op: BinaryOperator::Mul,
                left: Box::new(Expression::Variable("n".to_string())),
                right: Box::new(int(2)),
            }))]),
        }])
        .lower(&mut ctx, &mut em)
        .expect("lowering should succeed");

        let address = ctx.functions["dobro"].address.expect("address patched");
        assert_eq!(address, 1, "body starts right after the skip jump");
        assert_eq!(em.code[0].op, Opcode::Jump);
        assert_eq!(em.code[0].operand, Operand::Addr(em.code.len()));
        assert_eq!(em.code[1].op, Opcode::StoreVar, "parameter prologue");
    }

    #[test]
    fn method_bodies_return_the_receiver_implicitly() {
        let mut ctx = context();
        ctx.register_class("Pessoa", "teste.jp");
        ctx.register_method("Pessoa", "criar", vec!["nome".to_string()]);
        let mut em = Emitter::new();
        Block(vec![Statement::ClassDef {
            name: "Pessoa".to_string(),
            methods: vec![MethodDecl {
                name: "criar".to_string(),
                params: vec!["nome".to_string()],
                body: Block(vec![Statement::MemberAssign {
                    receiver: Expression::SelfRef,
                    name: "nome".to_string(),
                    value: Expression::Variable("nome".to_string()),
                }]),
            }],
        }])
        .lower(&mut ctx, &mut em)
        .expect("lowering should succeed");

        let address = ctx.classes["Pessoa"].methods["criar"]
            .address
            .expect("method address patched");
        assert_eq!(address, 1);
        let tail = &em.code[em.code.len() - 2..];
        assert_eq!(tail[0].op, Opcode::LoadVar);
        assert_eq!(tail[0].operand, Operand::Name("auto".to_string()));
        assert_eq!(tail[1].op, Opcode::ReturnValue);
    }

    #[test]
    fn static_call_allocates_receiver_before_arguments() {
        let (code, _) = lower(vec![Statement::Assign {
            name: "p".to_string(),
            value: Expression::StaticCall {
                class: "Pessoa".to_string(),
                method: "criar".to_string(),
                args: vec![Expression::Literal(Value::Str("Ana".to_string()))],
            },
        }]);
        assert_eq!(code[0].op, Opcode::NewObject);
        assert_eq!(code[0].operand, Operand::Name("Pessoa".to_string()));
        assert_eq!(code[1].op, Opcode::LoadConst);
        assert_eq!(code[2].op, Opcode::Call);
        assert_eq!(
            code[2].operand,
            Operand::Call("Pessoa.criar:1".to_string())
        );
    }

    #[test]
    fn list_literal_carries_element_count() {
        let (code, _) = lower(vec![Statement::Expr(Expression::ListLiteral(vec![
            int(1),
            int(2),
            int(3),
        ]))]);
        assert_eq!(code[3].op, Opcode::NewList);
        assert_eq!(code[3].operand, Operand::Value(Value::Int(3)));
    }

    #[test]
    fn no_sentinel_survives_nested_control_flow() {
        let (code, _) = lower(vec![Statement::While {
            condition: Expression::Literal(Value::Bool(true)),
            body: Block(vec![Statement::If {
                condition: Expression::Literal(Value::Bool(false)),
                then_body: Block(vec![Statement::Break { line: 3 }]),
                else_body: Some(Block(vec![Statement::Continue { line: 5 }])),
            }]),
        }]);
        let mut em = Emitter::new();
        em.code = code;
        assert_eq!(em.first_unpatched(), None);
    }
}
