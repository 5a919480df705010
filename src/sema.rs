use crate::ast::{Expr, FunctionDecl, Ident, Stmt};
use crate::error::ErrorHandler;
use crate::symbol::{Symbol, SymbolKind, SymbolTable};

/// Resolve every statement against a fresh global scope, reporting into
/// `errors`. The AST is only read.
pub fn analyze(statements: &[Stmt], errors: &mut ErrorHandler) {
    let mut analyzer = SemanticAnalyzer::new(errors);
    analyzer.analyze(statements);
}

pub struct SemanticAnalyzer<'e> {
    errors: &'e mut ErrorHandler,
    symbols: SymbolTable,
    function_depth: usize,
}

impl<'e> SemanticAnalyzer<'e> {
    pub fn new(errors: &'e mut ErrorHandler) -> Self {
        Self {
            errors,
            symbols: SymbolTable::new(),
            function_depth: 0,
        }
    }

    pub fn analyze(&mut self, statements: &[Stmt]) {
        self.symbols.enter_scope();
        for stmt in statements {
            self.analyze_stmt(stmt);
        }
        debug_assert!(self.symbols.is_at_global_scope());
        tracing::debug!(
            statements = statements.len(),
            errors = self.errors.errors().len(),
            "analyzed program"
        );
    }

    fn declare(&mut self, ident: &Ident, kind: SymbolKind) {
        if !self.symbols.define(Symbol::new(ident.name.clone(), kind)) {
            self.errors.report(
                ident.span,
                format!(
                    "Identifier '{}' is already defined in the current scope.",
                    ident.name
                ),
            );
        }
    }

    fn resolve(&mut self, ident: &Ident) {
        if self.symbols.resolve(&ident.name).is_none() {
            self.errors
                .report(ident.span, format!("Undefined variable '{}'.", ident.name));
        }
    }

    fn analyze_block(&mut self, stmts: &[Stmt]) {
        self.symbols.enter_scope();
        for stmt in stmts {
            self.analyze_stmt(stmt);
        }
        self.symbols.exit_scope();
    }

    fn analyze_function(&mut self, func: &FunctionDecl) {
        self.function_depth += 1;
        self.symbols.enter_scope();
        for param in &func.params {
            self.declare(param, SymbolKind::Variable);
        }
        for stmt in &func.body {
            self.analyze_stmt(stmt);
        }
        self.symbols.exit_scope();
        self.function_depth -= 1;
    }

    fn analyze_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(expr) | Stmt::Print(expr) => self.analyze_expr(expr),
            Stmt::Var { name, initializer } => {
                if let Some(init) = initializer {
                    self.analyze_expr(init);
                }
                self.declare(name, SymbolKind::Variable);
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.analyze_expr(condition);
                self.analyze_block(then_branch);
                if let Some(else_b) = else_branch {
                    self.analyze_block(else_b);
                }
            }
            Stmt::While { condition, body } => {
                self.analyze_expr(condition);
                self.analyze_block(body);
            }
            Stmt::Return { keyword, value } => {
                if self.function_depth == 0 {
                    self.errors
                        .report(*keyword, "Invalid return statement outside of a function.");
                }
                if let Some(v) = value {
                    self.analyze_expr(v);
                }
            }
            Stmt::Block(stmts) => self.analyze_block(stmts),
            Stmt::Function(func) => {
                self.declare(&func.name, SymbolKind::Function);
                self.analyze_function(func);
            }
        }
    }

    fn analyze_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Variable(ident) => self.resolve(ident),
            Expr::Assign { target, value } => {
                self.analyze_expr(value);
                self.resolve(target);
            }
            Expr::Binary { left, right, .. } => {
                self.analyze_expr(left);
                self.analyze_expr(right);
            }
            Expr::Unary { operand, .. } => self.analyze_expr(operand),
            Expr::Call { callee, args, .. } => {
                self.analyze_expr(callee);
                for arg in args {
                    self.analyze_expr(arg);
                }
            }
            Expr::Grouping(inner) => self.analyze_expr(inner),
            Expr::Literal { .. } => {}
        }
    }
}
