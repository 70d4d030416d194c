use thiserror::Error;

use crate::ast::{
    Block, Expression, ImportKind, MethodDecl, Statement, UnaryOperator,
};
use crate::ast::BinaryOperator;
use crate::bytecode::Value;
use crate::context::CompilationContext;
use crate::imports;
use crate::language::{Msg, format_message};
use crate::token::{Token, TokenKind};

/// Fatal syntax error with an expected-vs-found diagnostic. Localized at
/// construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    ctx: &'a mut CompilationContext,
}

pub fn parse_tokens(
    tokens: Vec<Token>,
    ctx: &mut CompilationContext,
) -> Result<Block, ParseError> {
    Parser::new(tokens, ctx).parse_program()
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, ctx: &'a mut CompilationContext) -> Self {
        Self {
            tokens,
            pos: 0,
            ctx,
        }
    }

    pub fn parse_program(mut self) -> Result<Block, ParseError> {
        let mut statements = Vec::new();
        loop {
            self.consume_newlines();
            if self.check(&TokenKind::Eof) {
                break;
            }
            statements.push(self.parse_statement()?);
        }
        Ok(Block(statements))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match self.kind() {
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Repeat => self.parse_repeat(),
            TokenKind::For => self.parse_for(),
            TokenKind::Break => {
                let line = self.line();
                self.advance();
                self.expect_statement_end()?;
                Ok(Statement::Break { line })
            }
            TokenKind::Continue => {
                let line = self.line();
                self.advance();
                self.expect_statement_end()?;
                Ok(Statement::Continue { line })
            }
            TokenKind::Function => self.parse_function(),
            TokenKind::Class => self.parse_class(),
            TokenKind::Import => self.parse_import(),
            TokenKind::From => self.parse_selective_import(),
            TokenKind::Native => self.parse_native(),
            TokenKind::Return => self.parse_return(),
            _ => self.parse_expression_statement(),
        }
    }

    /// Expression statement, or one of the assignment forms once an `=`
    /// shows up after a variable, index or member expression.
    fn parse_expression_statement(&mut self) -> Result<Statement, ParseError> {
        let expr = self.parse_expression()?;
        if self.check(&TokenKind::Equal) {
            let line = self.line();
            self.advance();
            let value = self.parse_expression()?;
            self.expect_statement_end()?;
            return match expr {
                Expression::Variable(name) => Ok(Statement::Assign { name, value }),
                Expression::Index { target, index } => Ok(Statement::IndexAssign {
                    target: *target,
                    index: *index,
                    value,
                }),
                Expression::MemberGet { receiver, name } => Ok(Statement::MemberAssign {
                    receiver: *receiver,
                    name,
                    value,
                }),
                _ => Err(self.error_at(line, Msg::ExpectedToken, &[
                    "variavel",
                    "expressao",
                    &line.to_string(),
                ])),
            };
        }
        self.expect_statement_end()?;
        Ok(Statement::Expr(expr))
    }

    fn parse_if(&mut self) -> Result<Statement, ParseError> {
        self.advance();
        let condition = self.parse_expression()?;
        let then_body = self.parse_block()?;
        let else_body = if self.check(&TokenKind::Else) {
            self.advance();
            if self.check(&TokenKind::If) {
                // `senao se` chains recursively through the else branch.
                Some(Block(vec![self.parse_if()?]))
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Statement::If {
            condition,
            then_body,
            else_body,
        })
    }

    fn parse_while(&mut self) -> Result<Statement, ParseError> {
        self.advance();
        let condition = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Statement::While { condition, body })
    }

    fn parse_repeat(&mut self) -> Result<Statement, ParseError> {
        self.advance();
        self.expect(TokenKind::LParen, "(")?;
        let count = self.parse_expression()?;
        self.expect(TokenKind::RParen, ")")?;
        let body = self.parse_block()?;
        Ok(Statement::Repeat { count, body })
    }

    fn parse_for(&mut self) -> Result<Statement, ParseError> {
        self.advance();
        let var = self.expect_identifier()?;
        self.expect(TokenKind::From, "de")?;
        let from = self.parse_expression()?;
        self.expect(TokenKind::To, "ate")?;
        let to = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Statement::ForRange {
            var,
            from,
            to,
            body,
        })
    }

    fn parse_function(&mut self) -> Result<Statement, ParseError> {
        self.advance();
        let name = self.expect_identifier()?;
        let params = self.parse_params()?;
        // Eager registration: the body and everything after it can already
        // resolve calls to this function.
        self.ctx.register_function(&name, params.clone());
        let body = self.parse_block()?;
        Ok(Statement::FunctionDef { name, params, body })
    }

    fn parse_class(&mut self) -> Result<Statement, ParseError> {
        self.advance();
        let name = self.expect_identifier()?;
        let label = self.ctx.current_module_label();
        self.ctx.register_class(&name, &label);

        self.expect(TokenKind::Colon, ":")?;
        self.expect(TokenKind::Newline, "\\n")?;
        self.expect(TokenKind::Indent, "<indent>")?;

        let mut methods = Vec::new();
        loop {
            self.consume_newlines();
            if self.check(&TokenKind::Dedent) || self.check(&TokenKind::Eof) {
                break;
            }
            self.expect(TokenKind::Function, "funcao")?;
            let method_name = self.expect_identifier()?;
            let params = self.parse_params()?;
            self.ctx.register_method(&name, &method_name, params.clone());
            let body = self.parse_block()?;
            methods.push(MethodDecl {
                name: method_name,
                params,
                body,
            });
        }
        self.expect(TokenKind::Dedent, "<dedent>")?;
        Ok(Statement::ClassDef { name, methods })
    }

    fn parse_import(&mut self) -> Result<Statement, ParseError> {
        let line = self.line();
        self.advance();
        let kind = match self.kind().clone() {
            TokenKind::Str(path) | TokenKind::RawStr(path) => {
                self.advance();
                ImportKind::File { path }
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if self.check(&TokenKind::As) {
                    self.advance();
                    let alias = self.expect_identifier()?;
                    ImportKind::Alias { name, alias }
                } else {
                    ImportKind::Plain { name }
                }
            }
            _ => return Err(self.expected("modulo")),
        };
        imports::eager_load(self.ctx, &kind, line)?;
        self.expect_statement_end()?;
        Ok(Statement::Import(kind))
    }

    fn parse_selective_import(&mut self) -> Result<Statement, ParseError> {
        let line = self.line();
        self.advance();
        let name = self.expect_identifier()?;
        self.expect(TokenKind::Import, "importar")?;
        let mut items = vec![self.expect_identifier()?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            items.push(self.expect_identifier()?);
        }
        let kind = ImportKind::Selective { name, items };
        imports::eager_load(self.ctx, &kind, line)?;
        self.expect_statement_end()?;
        Ok(Statement::Import(kind))
    }

    fn parse_native(&mut self) -> Result<Statement, ParseError> {
        let line = self.line();
        self.advance();
        let name = self.expect_identifier()?;
        self.expect(TokenKind::LParen, "(")?;
        let arity = match self.kind() {
            TokenKind::Integer(value) if *value >= 0 => {
                let value = *value as usize;
                self.advance();
                value
            }
            _ => return Err(self.expected("aridade")),
        };
        self.expect(TokenKind::RParen, ")")?;
        let Some(library) = self.ctx.current_library.clone() else {
            return Err(self.error_at(line, Msg::NativeOutsideLibrary, &[&line.to_string()]));
        };
        self.ctx.register_native(&name, library, arity);
        self.expect_statement_end()?;
        Ok(Statement::NativeDef { name, arity })
    }

    fn parse_return(&mut self) -> Result<Statement, ParseError> {
        self.advance();
        if matches!(
            self.kind(),
            TokenKind::Newline | TokenKind::Dedent | TokenKind::Eof
        ) {
            self.expect_statement_end()?;
            return Ok(Statement::Return(None));
        }
        let value = self.parse_expression()?;
        self.expect_statement_end()?;
        Ok(Statement::Return(Some(value)))
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        self.expect(TokenKind::Colon, ":")?;
        self.expect(TokenKind::Newline, "\\n")?;
        self.expect(TokenKind::Indent, "<indent>")?;
        let mut statements = Vec::new();
        loop {
            self.consume_newlines();
            if self.check(&TokenKind::Dedent) || self.check(&TokenKind::Eof) {
                break;
            }
            statements.push(self.parse_statement()?);
        }
        self.expect(TokenKind::Dedent, "<dedent>")?;
        Ok(Block(statements))
    }

    fn parse_params(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(TokenKind::LParen, "(")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            params.push(self.expect_identifier()?);
            while self.check(&TokenKind::Comma) {
                self.advance();
                params.push(self.expect_identifier()?);
            }
        }
        self.expect(TokenKind::RParen, ")")?;
        Ok(params)
    }

    // ------------------------------------------------------------------
    // Expressions: logical -> comparison -> additive -> multiplicative ->
    // unary -> postfix -> primary
    // ------------------------------------------------------------------

    pub fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            expr = binary(BinaryOperator::Or, expr, right);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_comparison()?;
        while self.check(&TokenKind::And) {
            self.advance();
            let right = self.parse_comparison()?;
            expr = binary(BinaryOperator::And, expr, right);
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_additive()?;
        loop {
            let op = match self.kind() {
                TokenKind::EqualEqual => BinaryOperator::Eq,
                TokenKind::NotEqual => BinaryOperator::Ne,
                TokenKind::Less => BinaryOperator::Lt,
                TokenKind::LessEqual => BinaryOperator::Le,
                TokenKind::Greater => BinaryOperator::Gt,
                TokenKind::GreaterEqual => BinaryOperator::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_additive(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.kind() {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.kind() {
                TokenKind::Star => BinaryOperator::Mul,
                TokenKind::Slash => BinaryOperator::Div,
                TokenKind::Percent => BinaryOperator::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        match self.kind() {
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expression::Unary {
                    op: UnaryOperator::Neg,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expression::Unary {
                    op: UnaryOperator::Not,
                    operand: Box::new(operand),
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(&TokenKind::Dot) {
                self.advance();
                let member = self.expect_identifier()?;
                if self.check(&TokenKind::LParen) {
                    let args = self.parse_args()?;
                    expr = self.classify_dotted_call(expr, member, args)?;
                } else {
                    expr = Expression::MemberGet {
                        receiver: Box::new(expr),
                        name: member,
                    };
                }
            } else if self.check(&TokenKind::LBracket) {
                self.advance();
                let index = self.parse_expression()?;
                self.expect(TokenKind::RBracket, "]")?;
                expr = Expression::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// `a.b(...)`: an uppercase or known-class `a` is a static call, a known
    /// module key collapses into the flat function namespace, anything else
    /// is an instance method call on a variable.
    fn classify_dotted_call(
        &mut self,
        receiver: Expression,
        method: String,
        args: Vec<Expression>,
    ) -> Result<Expression, ParseError> {
        if let Expression::Variable(name) = &receiver {
            if self.ctx.is_module(name) && !self.ctx.is_class(name) {
                let line = self.line();
                return self.resolve_call(method, args, line);
            }
            let uppercase_start = name
                .chars()
                .next()
                .map(char::is_uppercase)
                .unwrap_or(false);
            if uppercase_start || self.ctx.is_class(name) {
                return Ok(Expression::StaticCall {
                    class: name.clone(),
                    method,
                    args,
                });
            }
        }
        Ok(Expression::MethodCall {
            receiver: Box::new(receiver),
            method,
            args,
        })
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        let line = self.line();
        match self.kind().clone() {
            TokenKind::Integer(value) => {
                self.advance();
                Ok(Expression::Literal(Value::Int(value)))
            }
            TokenKind::Float(value) => {
                self.advance();
                Ok(Expression::Literal(Value::Float(value)))
            }
            TokenKind::Str(value) => {
                self.advance();
                if value.contains('{') {
                    self.parse_interpolated(&value, line)
                } else {
                    Ok(Expression::Literal(Value::Str(value)))
                }
            }
            TokenKind::RawStr(value) => {
                self.advance();
                Ok(Expression::Literal(Value::Str(value)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expression::Literal(Value::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expression::Literal(Value::Bool(false)))
            }
            TokenKind::SelfRef => {
                self.advance();
                Ok(Expression::SelfRef)
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if self.check(&TokenKind::LParen) {
                    let args = self.parse_args()?;
                    self.resolve_call(name, args, line)
                } else {
                    Ok(Expression::Variable(name))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen, ")")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    elements.push(self.parse_expression()?);
                    while self.check(&TokenKind::Comma) {
                        self.advance();
                        elements.push(self.parse_expression()?);
                    }
                }
                self.expect(TokenKind::RBracket, "]")?;
                Ok(Expression::ListLiteral(elements))
            }
            _ => Err(self.expected("expressao")),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expression>, ParseError> {
        self.expect(TokenKind::LParen, "(")?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            args.push(self.parse_expression()?);
            while self.check(&TokenKind::Comma) {
                self.advance();
                args.push(self.parse_expression()?);
            }
        }
        self.expect(TokenKind::RParen, ")")?;
        Ok(args)
    }

    /// Call-site classification, checked in priority order: builtin,
    /// declared native, known user function, lazily-validated native (when
    /// any native library is imported), plain user call as fallback.
    fn resolve_call(
        &mut self,
        name: String,
        args: Vec<Expression>,
        line: usize,
    ) -> Result<Expression, ParseError> {
        if let Some(op) = self.ctx.lang.builtin(&name) {
            if args.len() != op.arity() {
                return Err(self.error_at(line, Msg::BuiltinArity, &[
                    &name,
                    &op.arity().to_string(),
                    &args.len().to_string(),
                    &line.to_string(),
                ]));
            }
            return Ok(Expression::Builtin { op, args });
        }
        if self.ctx.natives.contains_key(&name) {
            return Ok(Expression::NativeCall { name, args });
        }
        if self.ctx.functions.contains_key(&name) {
            return Ok(Expression::Call { name, args });
        }
        if self.ctx.has_native_modules() {
            // Deferred to the codegen linkage check.
            return Ok(Expression::NativeCall { name, args });
        }
        Ok(Expression::Call { name, args })
    }

    // ------------------------------------------------------------------
    // String interpolation: "texto {expr} mais"
    // ------------------------------------------------------------------

    fn parse_interpolated(&mut self, text: &str, line: usize) -> Result<Expression, ParseError> {
        let mut fragments: Vec<Expression> = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars();
        while let Some(c) = chars.next() {
            if c != '{' {
                literal.push(c);
                continue;
            }
            let mut depth = 1;
            let mut inner = String::new();
            loop {
                match chars.next() {
                    Some('{') => {
                        depth += 1;
                        inner.push('{');
                    }
                    Some('}') => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                        inner.push('}');
                    }
                    Some(other) => inner.push(other),
                    None => {
                        return Err(self.error_at(line, Msg::BadInterpolation, &[
                            text,
                            &line.to_string(),
                        ]));
                    }
                }
            }
            if !literal.is_empty() {
                fragments.push(Expression::Literal(Value::Str(std::mem::take(
                    &mut literal,
                ))));
            }
            fragments.push(self.parse_interp_expr(inner.trim(), line)?);
        }
        if !literal.is_empty() {
            fragments.push(Expression::Literal(Value::Str(literal)));
        }

        let mut fragments = fragments.into_iter();
        let Some(first) = fragments.next() else {
            return Ok(Expression::Literal(Value::Str(String::new())));
        };
        let mut remaining = fragments.peekable();
        // Adjacent expression fragments concatenate; an empty leading text
        // fragment forces string semantics for the first ADD.
        let mut expr = if remaining.peek().is_some()
            && !matches!(first, Expression::Literal(Value::Str(_)))
        {
            binary(
                BinaryOperator::Add,
                Expression::Literal(Value::Str(String::new())),
                first,
            )
        } else {
            first
        };
        for fragment in remaining {
            expr = binary(BinaryOperator::Add, expr, fragment);
        }
        Ok(expr)
    }

    /// The braced sub-language: operands split on top-level spaces with a
    /// left-folded operator chain between them.
    fn parse_interp_expr(&mut self, text: &str, line: usize) -> Result<Expression, ParseError> {
        let segments = split_top_level(text, ' ');
        if segments.is_empty() || segments.len() % 2 == 0 {
            return Err(self.error_at(line, Msg::BadInterpolation, &[text, &line.to_string()]));
        }
        let mut expr = self.parse_interp_atom(&segments[0], line)?;
        let mut index = 1;
        while index < segments.len() {
            let op = match segments[index].as_str() {
                "+" => BinaryOperator::Add,
                "-" => BinaryOperator::Sub,
                "*" => BinaryOperator::Mul,
                "/" => BinaryOperator::Div,
                "%" => BinaryOperator::Mod,
                _ => {
                    return Err(self.error_at(line, Msg::BadInterpolation, &[
                        text,
                        &line.to_string(),
                    ]));
                }
            };
            let right = self.parse_interp_atom(&segments[index + 1], line)?;
            expr = binary(op, expr, right);
            index += 2;
        }
        Ok(expr)
    }

    fn parse_interp_atom(&mut self, text: &str, line: usize) -> Result<Expression, ParseError> {
        let text = text.trim();
        let bad = |parser: &Self| {
            parser.error_at(line, Msg::BadInterpolation, &[text, &line.to_string()])
        };
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Err(bad(self));
        }

        // Numeric literal, optionally negative.
        if chars[0].is_ascii_digit() || (chars[0] == '-' && chars.len() > 1) {
            if text.contains('.') {
                return text
                    .parse::<f64>()
                    .map(|value| Expression::Literal(Value::Float(value)))
                    .map_err(|_| bad(self));
            }
            return text
                .parse::<i64>()
                .map(|value| Expression::Literal(Value::Int(value)))
                .map_err(|_| bad(self));
        }

        // Quoted literal.
        if (chars[0] == '"' || chars[0] == '\'') && chars.len() >= 2 {
            let quote = chars[0];
            if *chars.last().unwrap() != quote {
                return Err(bad(self));
            }
            let inner: String = chars[1..chars.len() - 1].iter().collect();
            return Ok(Expression::Literal(Value::Str(inner)));
        }

        // Parenthesized sub-expression.
        if chars[0] == '(' && *chars.last().unwrap() == ')' {
            let inner: String = chars[1..chars.len() - 1].iter().collect();
            return self.parse_interp_expr(inner.trim(), line);
        }

        // Identifier chain: name, auto.attr, dotted member/method chains,
        // list indexing.
        let mut pos = 0;
        let name = read_chain_ident(&chars, &mut pos).ok_or_else(|| bad(self))?;
        let mut expr = if self.ctx.lang.keyword(&name) == Some(TokenKind::SelfRef) {
            Expression::SelfRef
        } else if pos < chars.len() && chars[pos] == '(' {
            let inner = read_balanced(&chars, &mut pos, '(', ')').ok_or_else(|| bad(self))?;
            let args = self.parse_interp_args(&inner, line)?;
            self.resolve_call(name, args, line)?
        } else {
            Expression::Variable(name)
        };

        while pos < chars.len() {
            match chars[pos] {
                '.' => {
                    pos += 1;
                    let member = read_chain_ident(&chars, &mut pos).ok_or_else(|| bad(self))?;
                    if pos < chars.len() && chars[pos] == '(' {
                        let inner =
                            read_balanced(&chars, &mut pos, '(', ')').ok_or_else(|| bad(self))?;
                        let args = self.parse_interp_args(&inner, line)?;
                        expr = self.classify_dotted_call(expr, member, args)?;
                    } else {
                        expr = Expression::MemberGet {
                            receiver: Box::new(expr),
                            name: member,
                        };
                    }
                }
                '[' => {
                    let inner =
                        read_balanced(&chars, &mut pos, '[', ']').ok_or_else(|| bad(self))?;
                    let index = self.parse_interp_expr(inner.trim(), line)?;
                    expr = Expression::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Err(bad(self)),
            }
        }
        Ok(expr)
    }

    fn parse_interp_args(
        &mut self,
        text: &str,
        line: usize,
    ) -> Result<Vec<Expression>, ParseError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        split_top_level(text, ',')
            .iter()
            .map(|arg| self.parse_interp_expr(arg.trim(), line))
            .collect()
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn line(&self) -> usize {
        self.current().line()
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.kind() == kind
    }

    fn consume_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), ParseError> {
        if self.check(&kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.expected(what))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        if let TokenKind::Identifier(name) = self.kind() {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.expected("identificador"))
        }
    }

    fn expect_statement_end(&mut self) -> Result<(), ParseError> {
        match self.kind() {
            TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            TokenKind::Dedent | TokenKind::Eof => Ok(()),
            _ => Err(self.expected("\\n")),
        }
    }

    fn expected(&self, what: &str) -> ParseError {
        let token = self.current();
        ParseError {
            line: token.line(),
            message: format_message(self.ctx.lang.msg(Msg::ExpectedToken), &[
                what,
                &token.describe(),
                &token.line().to_string(),
            ]),
        }
    }

    fn error_at(&self, line: usize, key: Msg, args: &[&str]) -> ParseError {
        ParseError {
            line,
            message: format_message(self.ctx.lang.msg(key), args),
        }
    }
}

fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Expression {
    Expression::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Splits on `sep` at zero bracket depth and outside quotes; empty segments
/// are dropped.
fn split_top_level(text: &str, sep: char) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for c in text.chars() {
        if let Some(open) = quote {
            current.push(c);
            if c == open {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c == sep && depth == 0 => {
                if !current.trim().is_empty() {
                    segments.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        segments.push(current.trim().to_string());
    }
    segments
}

fn read_chain_ident(chars: &[char], pos: &mut usize) -> Option<String> {
    let start = *pos;
    if *pos >= chars.len() || !(chars[*pos].is_alphabetic() || chars[*pos] == '_') {
        return None;
    }
    while *pos < chars.len() && (chars[*pos].is_alphanumeric() || chars[*pos] == '_') {
        *pos += 1;
    }
    Some(chars[start..*pos].iter().collect())
}

/// Reads a balanced `open`..`close` group starting at `pos` (which must sit
/// on `open`) and returns the inner text, advancing past the closer.
fn read_balanced(chars: &[char], pos: &mut usize, open: char, close: char) -> Option<String> {
    if *pos >= chars.len() || chars[*pos] != open {
        return None;
    }
    let mut depth = 0usize;
    let start = *pos + 1;
    while *pos < chars.len() {
        if chars[*pos] == open {
            depth += 1;
        } else if chars[*pos] == close {
            depth -= 1;
            if depth == 0 {
                let inner: String = chars[start..*pos].iter().collect();
                *pos += 1;
                return Some(inner);
            }
        }
        *pos += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{BuiltinOp, LanguageTable};
    use crate::lexer;
    use indoc::indoc;
    use std::path::Path;

    fn context() -> CompilationContext {
        CompilationContext::new(LanguageTable::portuguese(), Path::new("."))
    }

    fn parse(input: &str) -> (Block, CompilationContext) {
        let mut ctx = context();
        let tokens = lexer::tokenize(input, &ctx.lang).expect("tokenize should succeed");
        let program = parse_tokens(tokens, &mut ctx).expect("parse should succeed");
        (program, ctx)
    }

    fn parse_error(input: &str) -> ParseError {
        let mut ctx = context();
        let tokens = lexer::tokenize(input, &ctx.lang).expect("tokenize should succeed");
        parse_tokens(tokens, &mut ctx).expect_err("expected parse failure")
    }

    fn int(value: i64) -> Expression {
        Expression::Literal(Value::Int(value))
    }

    #[test]
    fn parses_function_and_registers_it_eagerly() {
        let input = indoc! {"
            funcao dobro(n):
                retornar n * 2
            x = dobro(4)
        "};
        let (program, ctx) = parse(input);
        assert!(ctx.functions.contains_key("dobro"));
        assert_eq!(ctx.functions["dobro"].params, vec!["n".to_string()]);
        let Statement::Assign { value, .. } = &program.0[1] else {
            panic!("expected assignment, got {:?}", program.0[1]);
        };
        assert!(
            matches!(value, Expression::Call { name, args } if name == "dobro" && args.len() == 1)
        );
    }

    #[test]
    fn function_calls_inside_own_body_resolve() {
        let input = indoc! {"
            funcao conta(n):
                se n > 0:
                    conta(n - 1)
        "};
        let (program, _) = parse(input);
        let Statement::FunctionDef { body, .. } = &program.0[0] else {
            panic!("expected function definition");
        };
        let Statement::If { then_body, .. } = &body.0[0] else {
            panic!("expected if statement");
        };
        assert!(matches!(
            &then_body.0[0],
            Statement::Expr(Expression::Call { name, .. }) if name == "conta"
        ));
    }

    #[test]
    fn chains_senao_se_recursively() {
        let input = indoc! {"
            se x > 10:
                saida(1)
            senao se x > 5:
                saida(2)
            senao:
                saida(3)
        "};
        let (program, _) = parse(input);
        let Statement::If { else_body, .. } = &program.0[0] else {
            panic!("expected if statement");
        };
        let chained = else_body.as_ref().expect("expected else body");
        let Statement::If {
            else_body: inner_else,
            ..
        } = &chained.0[0]
        else {
            panic!("expected chained if inside else");
        };
        assert!(inner_else.is_some());
    }

    #[test]
    fn resolves_builtins_before_user_functions() {
        let (program, _) = parse("saida(1)\n");
        assert!(matches!(
            &program.0[0],
            Statement::Expr(Expression::Builtin {
                op: BuiltinOp::Print,
                ..
            })
        ));
    }

    #[test]
    fn builtin_arity_mismatch_is_fatal() {
        let err = parse_error("saida(1, 2)\n");
        assert!(err.message.contains("saida"));
        assert!(err.message.contains('2'));
    }

    #[test]
    fn uppercase_receiver_parses_as_static_call() {
        let (program, _) = parse("p = Pessoa.criar(\"Ana\")\n");
        let Statement::Assign { value, .. } = &program.0[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(
            value,
            Expression::StaticCall { class, method, .. }
                if class == "Pessoa" && method == "criar"
        ));
    }

    #[test]
    fn lowercase_receiver_parses_as_instance_call() {
        let (program, _) = parse("p.saudar()\n");
        assert!(matches!(
            &program.0[0],
            Statement::Expr(Expression::MethodCall { method, .. }) if method == "saudar"
        ));
    }

    #[test]
    fn member_assignment_through_auto() {
        let (program, _) = parse("auto.nome = \"Ana\"\n");
        assert!(matches!(
            &program.0[0],
            Statement::MemberAssign {
                receiver: Expression::SelfRef,
                name,
                ..
            } if name == "nome"
        ));
    }

    #[test]
    fn index_assignment_and_read() {
        let input = indoc! {"
            valores[0] = 5
            x = valores[1]
        "};
        let (program, _) = parse(input);
        assert!(matches!(&program.0[0], Statement::IndexAssign { .. }));
        let Statement::Assign { value, .. } = &program.0[1] else {
            panic!("expected assignment");
        };
        assert!(matches!(value, Expression::Index { .. }));
    }

    #[test]
    fn class_declaration_registers_eagerly() {
        let input = indoc! {"
            classe Pessoa:
                funcao criar(nome):
                    auto.nome = nome
                funcao saudar():
                    saida(auto.nome)
        "};
        let (_, ctx) = parse(input);
        assert!(ctx.is_class("Pessoa"));
        let methods = &ctx.classes["Pessoa"].methods;
        assert_eq!(methods["criar"].params, vec!["nome".to_string()]);
        assert_eq!(methods["criar"].address, None, "address unknown until lowering");
        assert!(methods.contains_key("saudar"));
    }

    #[test]
    fn forward_reference_to_class_in_same_file() {
        // `Pessoa` is registered the moment its header is parsed, so the
        // static call inside `principal` (parsed later) classifies correctly.
        let input = indoc! {"
            classe Pessoa:
                funcao criar():
                    auto.x = 0
            funcao principal():
                p = Pessoa.criar()
        "};
        let (program, _) = parse(input);
        let Statement::FunctionDef { body, .. } = &program.0[1] else {
            panic!("expected function definition");
        };
        let Statement::Assign { value, .. } = &body.0[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(value, Expression::StaticCall { .. }));
    }

    #[test]
    fn precedence_multiplication_binds_tighter() {
        let (program, _) = parse("x = 1 + 2 * 3\n");
        let Statement::Assign { value, .. } = &program.0[0] else {
            panic!("expected assignment");
        };
        let Expression::Binary { op, right, .. } = value else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOperator::Add);
        assert!(matches!(
            right.as_ref(),
            Expression::Binary {
                op: BinaryOperator::Mul,
                ..
            }
        ));
    }

    #[test]
    fn logical_operators_bind_loosest() {
        let (program, _) = parse("x = a > 1 e b < 2 ou c == 3\n");
        let Statement::Assign { value, .. } = &program.0[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(
            value,
            Expression::Binary {
                op: BinaryOperator::Or,
                ..
            }
        ));
    }

    #[test]
    fn interpolation_concatenates_text_and_expression() {
        let (program, _) = parse("saida(\"ola {nome}!\")\n");
        let Statement::Expr(Expression::Builtin { args, .. }) = &program.0[0] else {
            panic!("expected builtin call");
        };
        let Expression::Binary {
            op: BinaryOperator::Add,
            left,
            right,
        } = &args[0]
        else {
            panic!("expected concatenation, got {:?}", args[0]);
        };
        assert!(matches!(
            right.as_ref(),
            Expression::Literal(Value::Str(text)) if text == "!"
        ));
        let Expression::Binary { left: prefix, right: var, .. } = left.as_ref() else {
            panic!("expected nested concatenation");
        };
        assert!(matches!(
            prefix.as_ref(),
            Expression::Literal(Value::Str(text)) if text == "ola "
        ));
        assert!(matches!(
            var.as_ref(),
            Expression::Variable(name) if name == "nome"
        ));
    }

    #[test]
    fn interpolation_supports_auto_members_and_operators() {
        let (program, _) = parse("saida(\"total {auto.contagem + 1}\")\n");
        let Statement::Expr(Expression::Builtin { args, .. }) = &program.0[0] else {
            panic!("expected builtin call");
        };
        let Expression::Binary { right, .. } = &args[0] else {
            panic!("expected concatenation");
        };
        let Expression::Binary {
            op: BinaryOperator::Add,
            left,
            ..
        } = right.as_ref()
        else {
            panic!("expected addition inside braces");
        };
        assert!(matches!(
            left.as_ref(),
            Expression::MemberGet { receiver, name }
                if matches!(receiver.as_ref(), Expression::SelfRef) && name == "contagem"
        ));
    }

    #[test]
    fn interpolation_supports_method_chains_and_indexing() {
        let (program, _) = parse("saida(\"{itens[0]} e {p.nome()}\")\n");
        let Statement::Expr(Expression::Builtin { args, .. }) = &program.0[0] else {
            panic!("expected builtin call");
        };
        fn collect_leaves(expr: &Expression, leaves: &mut Vec<Expression>) {
            if let Expression::Binary {
                op: BinaryOperator::Add,
                left,
                right,
            } = expr
            {
                collect_leaves(left, leaves);
                collect_leaves(right, leaves);
            } else {
                leaves.push(expr.clone());
            }
        }
        let mut leaves = Vec::new();
        collect_leaves(&args[0], &mut leaves);
        assert!(leaves.iter().any(|leaf| matches!(leaf, Expression::Index { .. })));
        assert!(leaves
            .iter()
            .any(|leaf| matches!(leaf, Expression::MethodCall { method, .. } if method == "nome")));
    }

    #[test]
    fn adjacent_interpolations_stay_textual() {
        let (program, _) = parse("x = \"{a}{b}\"\n");
        let Statement::Assign { value, .. } = &program.0[0] else {
            panic!("expected assignment");
        };
        // Leading empty literal keeps the ADD chain in string territory.
        let Expression::Binary { left, .. } = value else {
            panic!("expected concatenation");
        };
        let Expression::Binary { left: empty, .. } = left.as_ref() else {
            panic!("expected nested concatenation");
        };
        assert!(matches!(
            empty.as_ref(),
            Expression::Literal(Value::Str(text)) if text.is_empty()
        ));
    }

    #[test]
    fn raw_strings_are_never_interpolated() {
        let (program, _) = parse("x = \"\"\"sem {interpolacao}\"\"\"\n");
        let Statement::Assign { value, .. } = &program.0[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(
            value,
            Expression::Literal(Value::Str(text)) if text == "sem {interpolacao}"
        ));
    }

    #[test]
    fn bad_interpolation_is_fatal_with_line() {
        let err = parse_error("saida(\"x {1 +}\")\n");
        assert!(err.message.contains("expressao invalida"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn unexpected_token_reports_expected_and_found() {
        let err = parse_error("funcao 1():\n    retornar\n");
        assert!(err.message.contains("identificador"));
        assert!(err.message.contains('1'));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn native_declaration_outside_library_is_fatal() {
        let err = parse_error("nativo desenhar(2)\n");
        assert!(err.message.contains("biblioteca"));
    }

    #[test]
    fn repeat_and_for_statements_parse() {
        let input = indoc! {"
            repetir(3):
                saida(\"x\")
            para i de 1 ate 10:
                saida(i)
        "};
        let (program, _) = parse(input);
        assert!(matches!(&program.0[0], Statement::Repeat { .. }));
        assert!(matches!(
            &program.0[1],
            Statement::ForRange { var, .. } if var == "i"
        ));
    }

    #[test]
    fn unary_operators_parse_at_primary_level() {
        let (program, _) = parse("x = -1 + nao verdadeiro\n");
        let Statement::Assign { value, .. } = &program.0[0] else {
            panic!("expected assignment");
        };
        let Expression::Binary { left, right, .. } = value else {
            panic!("expected binary expression");
        };
        assert!(matches!(
            left.as_ref(),
            Expression::Unary {
                op: UnaryOperator::Neg,
                ..
            }
        ));
        assert!(matches!(
            right.as_ref(),
            Expression::Unary {
                op: UnaryOperator::Not,
                ..
            }
        ));
    }

    #[test]
    fn splits_top_level_spaces_respecting_nesting() {
        assert_eq!(
            split_top_level("a + soma(1, 2) - b[i + 1]", ' '),
            vec!["a", "+", "soma(1, 2)", "-", "b[i + 1]"]
        );
        assert_eq!(
            split_top_level("\"um dois\" + x", ' '),
            vec!["\"um dois\"", "+", "x"]
        );
    }
}
