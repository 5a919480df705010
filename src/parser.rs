use crate::ast::{BinaryOp, Expr, FunctionDecl, Ident, Literal, Stmt, UnaryOp};
use crate::error::SyntaxError;
use crate::lexer::{Token, TokenKind};
use crate::span::Span;

const MAX_ARGS: usize = 255;

type ParseResult<T> = Result<T, SyntaxError>;

/// Result of a best-effort parse: every statement that parsed cleanly, plus
/// every syntax error met along the way.
#[derive(Debug, Default)]
pub struct ParseOutput {
    pub statements: Vec<Stmt>,
    pub errors: Vec<SyntaxError>,
}

impl ParseOutput {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Parse a token stream produced by [`crate::lexer::lex`]. The stream is
/// expected to end with an `Eof` token; one is assumed if it does not.
pub fn parse(tokens: &[Token]) -> ParseOutput {
    let mut p = Parser::new(tokens);
    let statements = p.parse_program();
    tracing::debug!(
        statements = statements.len(),
        errors = p.errors.len(),
        "parsed token stream"
    );
    ParseOutput {
        statements,
        errors: p.errors,
    }
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    eof: Token,
    errors: Vec<SyntaxError>,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        let eof_span = tokens.last().map(|t| t.span).unwrap_or_default();
        Parser {
            tokens,
            pos: 0,
            eof: Token::new(TokenKind::Eof, None, eof_span),
            errors: Vec::new(),
        }
    }

    fn parse_program(&mut self) -> Vec<Stmt> {
        let mut statements = Vec::new();
        while !self.is_end() {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }
        statements
    }

    /// One declaration with recovery: a failed rule is recorded, the stream is
    /// resynchronised and the statement is dropped.
    fn declaration(&mut self) -> Option<Stmt> {
        let result = if self.consume_if(TokenKind::Var) {
            self.parse_var_declaration()
        } else if self.consume_if(TokenKind::Function) {
            self.parse_function()
        } else {
            self.parse_stmt()
        };
        match result {
            Ok(stmt) => Some(stmt),
            Err(err) => {
                tracing::warn!(line = err.span.line, error = %err, "syntax error");
                self.errors.push(err);
                self.synchronize();
                None
            }
        }
    }

    fn synchronize(&mut self) {
        self.bump();
        while !self.is_end() {
            if self.previous().kind == TokenKind::Semicolon {
                return;
            }
            match self.peek_kind() {
                TokenKind::Function
                | TokenKind::Var
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.bump();
        }
    }

    fn parse_var_declaration(&mut self) -> ParseResult<Stmt> {
        let name = self.expect_identifier("Expect variable name after 'var'.")?;
        self.expect(TokenKind::Assign, "Expect '=' after variable name.")?;
        let initializer = self.parse_expr()?;
        self.expect(TokenKind::Semicolon, "Expect ';' after variable declaration.")?;
        Ok(Stmt::Var {
            name,
            initializer: Some(initializer),
        })
    }

    fn parse_function(&mut self) -> ParseResult<Stmt> {
        let name = self.expect_identifier("Expect function name after 'function'.")?;
        self.expect(TokenKind::LParen, "Expect '(' after function name.")?;

        let mut params = Vec::new();
        if !self.peek_is(TokenKind::RParen) {
            loop {
                params.push(self.expect_identifier("Expect parameter name.")?);
                if !self.consume_if(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.expect(TokenKind::RParen, "Expect ')' after parameters.")?;
        self.expect(TokenKind::LBrace, "Expect '{' before function body.")?;
        let body = self.parse_block()?;

        Ok(Stmt::Function(FunctionDecl { name, params, body }))
    }

    fn parse_stmt(&mut self) -> ParseResult<Stmt> {
        match self.peek_kind() {
            TokenKind::Return => {
                let keyword = self.bump().span;
                let value = if self.peek_is(TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(TokenKind::Semicolon, "Expect ';' after return value.")?;
                Ok(Stmt::Return { keyword, value })
            }
            TokenKind::Print => {
                self.bump();
                let value = self.parse_expr()?;
                self.expect(TokenKind::Semicolon, "Expect ';' after value.")?;
                Ok(Stmt::Print(value))
            }
            TokenKind::If => self.parse_if_stmt(),
            TokenKind::While => self.parse_while_stmt(),
            TokenKind::LBrace => {
                self.bump();
                Ok(Stmt::Block(self.parse_block()?))
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semicolon, "Expect ';' after expression.")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// Parses the statements of a block whose `{` was already consumed.
    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.peek_is(TokenKind::RBrace) && !self.is_end() {
            if let Some(stmt) = self.declaration() {
                stmts.push(stmt);
            }
        }
        self.expect(TokenKind::RBrace, "Expect '}' after block.")?;
        Ok(stmts)
    }

    fn parse_if_stmt(&mut self) -> ParseResult<Stmt> {
        self.bump();
        self.expect(TokenKind::LParen, "Expect '(' after 'if'.")?;
        let condition = self.parse_expr()?;
        self.expect(TokenKind::RParen, "Expect ')' after if condition.")?;
        self.expect(TokenKind::LBrace, "Expect '{' before if body.")?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.consume_if(TokenKind::Else) {
            self.expect(TokenKind::LBrace, "Expect '{' before else body.")?;
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn parse_while_stmt(&mut self) -> ParseResult<Stmt> {
        self.bump();
        self.expect(TokenKind::LParen, "Expect '(' after 'while'.")?;
        let condition = self.parse_expr()?;
        self.expect(TokenKind::RParen, "Expect ')' after condition.")?;
        self.expect(TokenKind::LBrace, "Expect '{' before while body.")?;
        let body = self.parse_block()?;
        Ok(Stmt::While { condition, body })
    }

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> ParseResult<Expr> {
        let left = self.parse_equality()?;
        if self.peek_is(TokenKind::Assign) {
            let equals = self.bump().clone();
            let value = self.parse_assignment()?;
            if let Expr::Variable(target) = left {
                return Ok(Expr::Assign {
                    target,
                    value: Box::new(value),
                });
            }
            return Err(SyntaxError::at(&equals, "Invalid assignment target."));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> ParseResult<Expr> {
        let mut node = self.parse_comparison()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqualTo => BinaryOp::Eq,
                TokenKind::NotEqual => BinaryOp::NotEq,
                _ => break,
            };
            let span = self.bump().span;
            let right = self.parse_comparison()?;
            node = binary(op, node, right, span);
        }
        Ok(node)
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let mut node = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Less => BinaryOp::Lt,
                TokenKind::LessEqual => BinaryOp::LtEq,
                TokenKind::Greater => BinaryOp::Gt,
                TokenKind::GreaterEqual => BinaryOp::GtEq,
                _ => break,
            };
            let span = self.bump().span;
            let right = self.parse_term()?;
            node = binary(op, node, right, span);
        }
        Ok(node)
    }

    fn parse_term(&mut self) -> ParseResult<Expr> {
        let mut node = self.parse_factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let span = self.bump().span;
            let right = self.parse_factor()?;
            node = binary(op, node, right, span);
        }
        Ok(node)
    }

    fn parse_factor(&mut self) -> ParseResult<Expr> {
        let mut node = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => break,
            };
            let span = self.bump().span;
            let right = self.parse_unary()?;
            node = binary(op, node, right, span);
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.parse_call(),
        };
        let span = self.bump().span;
        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            span,
        })
    }

    fn parse_call(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        while self.consume_if(TokenKind::LParen) {
            expr = self.finish_call(expr)?;
        }
        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> ParseResult<Expr> {
        let mut args = Vec::new();
        if !self.peek_is(TokenKind::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if args.len() > MAX_ARGS {
                    return Err(SyntaxError::at(
                        self.peek(),
                        "Can't have more than 255 arguments.",
                    ));
                }
                if !self.consume_if(TokenKind::Comma) {
                    break;
                }
            }
        }
        let paren = self.expect(TokenKind::RParen, "Expect ')' after arguments.")?;
        Ok(Expr::Call {
            callee: Box::new(callee),
            args,
            span: paren.span,
        })
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let tok = self.peek();
        let span = tok.span;
        let value = match tok.kind {
            TokenKind::False => Literal::False,
            TokenKind::True => Literal::True,
            TokenKind::Null => Literal::Null,
            TokenKind::Number => {
                if tok.text().parse::<i64>().is_err() {
                    return Err(SyntaxError::at(tok, "Number literal does not fit in 64 bits."));
                }
                Literal::Number(tok.text().to_string())
            }
            TokenKind::String => Literal::Str(tok.lexeme.clone().unwrap_or_default()),
            TokenKind::Identifier => {
                let name = tok.text().to_string();
                self.bump();
                return Ok(Expr::Variable(Ident::new(name, span)));
            }
            TokenKind::LParen => {
                self.bump();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen, "Expect ')' after expression.")?;
                return Ok(Expr::Grouping(Box::new(expr)));
            }
            _ => return Err(SyntaxError::at(tok, "Expect expression.")),
        };
        self.bump();
        Ok(Expr::Literal { value, span })
    }

    fn is_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    fn previous(&self) -> &Token {
        match self.pos {
            0 => &self.eof,
            n => self.tokens.get(n - 1).unwrap_or(&self.eof),
        }
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_is(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    /// Advances past the current token (never past `Eof`) and returns it.
    fn bump(&mut self) -> &Token {
        if !self.is_end() {
            self.pos += 1;
            self.previous()
        } else {
            self.peek()
        }
    }

    fn consume_if(&mut self, kind: TokenKind) -> bool {
        if self.peek_is(kind) && !self.is_end() {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> ParseResult<&Token> {
        if self.peek_is(kind) && !self.is_end() {
            Ok(self.bump())
        } else {
            Err(SyntaxError::at(self.peek(), message))
        }
    }

    fn expect_identifier(&mut self, message: &str) -> ParseResult<Ident> {
        let tok = self.peek();
        if tok.kind != TokenKind::Identifier {
            return Err(SyntaxError::at(tok, message));
        }
        let ident = Ident::new(tok.text(), tok.span);
        self.bump();
        Ok(ident)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr, span: Span) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
        span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_src(src: &str) -> ParseOutput {
        parse(&lex(src))
    }

    fn expr_of(src: &str) -> Expr {
        let out = parse_src(src);
        assert!(out.errors.is_empty(), "unexpected errors: {:?}", out.errors);
        match out.statements.into_iter().next() {
            Some(Stmt::Expr(expr)) | Some(Stmt::Print(expr)) => expr,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        assert_eq!(expr_of("1 + 2 * 3;").to_string(), "(+ 1 (* 2 3))");
        assert_eq!(expr_of("1 * 2 + 3;").to_string(), "(+ (* 1 2) 3)");
    }

    #[test]
    fn binary_operators_are_left_associative() {
        assert_eq!(expr_of("1 - 2 - 3;").to_string(), "(- (- 1 2) 3)");
        assert_eq!(expr_of("8 / 4 / 2;").to_string(), "(/ (/ 8 4) 2)");
    }

    #[test]
    fn precedence_ladder() {
        assert_eq!(
            expr_of("a == b < c + d * -e;").to_string(),
            "(== a (< b (+ c (* d (- e)))))"
        );
        assert_eq!(expr_of("!!x;").to_string(), "(! (! x))");
        assert_eq!(expr_of("(1 + 2) * 3;").to_string(), "(* (group (+ 1 2)) 3)");
    }

    #[test]
    fn assignment_is_right_associative() {
        assert_eq!(expr_of("a = b = 1;").to_string(), "(= a (= b 1))");
    }

    #[test]
    fn invalid_assignment_target_is_dropped() {
        let out = parse_src("1 = 2; print 3;");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].message, "Invalid assignment target.");
        assert_eq!(out.errors[0].lexeme.as_deref(), Some("="));
        assert_eq!(out.statements.len(), 1);
        assert!(matches!(out.statements[0], Stmt::Print(_)));
    }

    #[test]
    fn chained_calls() {
        assert_eq!(expr_of("f(1, g(2))(3);").to_string(), "(call (call f 1 (call g 2)) 3)");
        assert_eq!(expr_of("f();").to_string(), "(call f)");
    }

    #[test]
    fn literals() {
        assert_eq!(expr_of("print \"hi\";").to_string(), "\"hi\"");
        assert!(matches!(
            expr_of("true;"),
            Expr::Literal {
                value: Literal::True,
                ..
            }
        ));
        assert!(matches!(
            expr_of("null;"),
            Expr::Literal {
                value: Literal::Null,
                ..
            }
        ));
    }

    #[test]
    fn declarations() {
        let out = parse_src(
            "var x = 1;
             function add(a, b) { return a + b; }
             if (x < 2) { print x; } else { print 0; }
             while (x) { x = x - 1; }
             { var y = 2; }
             return;",
        );
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.statements.len(), 6);
        match &out.statements[1] {
            Stmt::Function(decl) => {
                assert_eq!(decl.name.name, "add");
                let params: Vec<_> = decl.params.iter().map(|p| p.name.as_str()).collect();
                assert_eq!(params, vec!["a", "b"]);
                assert_eq!(decl.body.len(), 1);
            }
            other => panic!("expected function, got {other:?}"),
        }
        assert!(matches!(
            &out.statements[2],
            Stmt::If {
                else_branch: Some(_),
                ..
            }
        ));
        assert!(matches!(&out.statements[3], Stmt::While { .. }));
        assert!(matches!(&out.statements[4], Stmt::Block(b) if b.len() == 1));
        assert!(matches!(&out.statements[5], Stmt::Return { value: None, .. }));
    }

    #[test]
    fn var_requires_initializer() {
        let out = parse_src("var x; print 1;");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].message, "Expect '=' after variable name.");
        assert_eq!(out.statements.len(), 1);
    }

    #[test]
    fn if_requires_braces() {
        let out = parse_src("if (x) print x;");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].message, "Expect '{' before if body.");
    }

    #[test]
    fn reports_multiple_errors() {
        let out = parse_src("var = 1; print ; var ok = 2; print ok");
        assert_eq!(out.errors.len(), 3);
        assert_eq!(out.errors[2].lexeme, None);
        assert_eq!(out.statements.len(), 1);
        assert!(matches!(&out.statements[0], Stmt::Var { name, .. } if name.name == "ok"));
    }

    #[test]
    fn errors_inside_blocks_recover_locally() {
        let out = parse_src("function f() { var = 1; print 2; } print 3;");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.statements.len(), 2);
        match &out.statements[0] {
            Stmt::Function(decl) => assert_eq!(decl.body.len(), 1),
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn invalid_tokens_surface_as_syntax_errors() {
        let out = parse_src("print \"open;");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].message, "Expect expression.");
    }

    #[test]
    fn too_many_arguments() {
        let args = vec!["1"; 256].join(", ");
        let out = parse_src(&format!("f({args});"));
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].message, "Can't have more than 255 arguments.");

        let args = vec!["1"; 255].join(", ");
        assert!(parse_src(&format!("f({args});")).errors.is_empty());
    }

    #[test]
    fn oversized_number_literal() {
        let out = parse_src("print 99999999999999999999; print 9223372036854775807;");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].message, "Number literal does not fit in 64 bits.");
        assert_eq!(out.errors[0].lexeme.as_deref(), Some("99999999999999999999"));
        assert_eq!(out.statements.len(), 1);
    }

    #[test]
    fn recovery_stops_at_statement_keyword() {
        let out = parse_src("var x = ) if (1) { print 1; }");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].message, "Expect expression.");
        assert_eq!(out.statements.len(), 1);
        match &out.statements[0] {
            Stmt::If { then_branch, .. } => assert_eq!(then_branch.len(), 1),
            other => panic!("expected if statement, got {other:?}"),
        }
    }
}
