use crate::ast::{BinaryOp, Expr, FunctionDecl, Ident, Literal, Stmt, UnaryOp};
use crate::ir::{Instruction, IrProgram, OpCode, Operand};
use std::collections::HashMap;

/// Lower a semantically valid program to TAC.
pub fn generate(statements: &[Stmt]) -> IrProgram {
    IrGenerator::new().generate(statements)
}

#[derive(Debug, Clone)]
enum Binding {
    Storage(String),
    Function(String),
}

pub struct IrGenerator {
    program: IrProgram,
    next_temp: usize,
    next_label: usize,
    scopes: Vec<HashMap<String, Binding>>,
    // Declarations seen so far per source name, used to give shadowing
    // declarations their own storage.
    storage_names: HashMap<String, usize>,
    function_names: HashMap<String, usize>,
}

impl Default for IrGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IrGenerator {
    pub fn new() -> Self {
        Self {
            program: IrProgram::new(),
            next_temp: 0,
            next_label: 0,
            scopes: Vec::new(),
            storage_names: HashMap::new(),
            function_names: HashMap::new(),
        }
    }

    /// Top-level code first, then `HALT`, then every top-level function in
    /// source order.
    pub fn generate(mut self, statements: &[Stmt]) -> IrProgram {
        self.scopes.push(HashMap::new());

        let (functions, globals): (Vec<&Stmt>, Vec<&Stmt>) = statements
            .iter()
            .partition(|stmt| matches!(stmt, Stmt::Function(_)));

        let mut labelled = Vec::with_capacity(functions.len());
        for stmt in functions {
            if let Stmt::Function(decl) = stmt {
                let label = self.declare_function(&decl.name);
                labelled.push((decl, label));
            }
        }

        for stmt in globals {
            self.lower_stmt(stmt);
        }
        self.emit(Instruction::new(OpCode::Halt, None, None, None));

        for (decl, label) in labelled {
            self.lower_function(decl, label);
        }

        tracing::debug!(
            instructions = self.program.len(),
            temporaries = self.next_temp,
            labels = self.next_label,
            "generated three-address code"
        );
        self.program
    }

    fn emit(&mut self, instr: Instruction) {
        self.program.push(instr);
    }

    fn new_temp(&mut self) -> Operand {
        let t = self.next_temp;
        self.next_temp += 1;
        Operand::Temporary(t)
    }

    fn new_label(&mut self, prefix: &str) -> Operand {
        let l = format!(".{prefix}{}", self.next_label);
        self.next_label += 1;
        Operand::Label(l)
    }

    fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn exit_scope(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, name: &str, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), binding);
        }
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn declare_storage(&mut self, ident: &Ident) -> String {
        let storage = unique_name(&mut self.storage_names, &ident.name);
        self.bind(&ident.name, Binding::Storage(storage.clone()));
        storage
    }

    fn declare_function(&mut self, ident: &Ident) -> String {
        let label = unique_name(&mut self.function_names, &ident.name);
        self.bind(&ident.name, Binding::Function(label.clone()));
        label
    }

    fn storage_for(&self, ident: &Ident) -> Operand {
        match self.lookup(&ident.name) {
            Some(Binding::Storage(storage)) => Operand::var(storage.as_str()),
            _ => Operand::var(ident.name.as_str()),
        }
    }

    fn lower_block(&mut self, stmts: &[Stmt]) {
        self.enter_scope();
        for stmt in stmts {
            self.lower_stmt(stmt);
        }
        self.exit_scope();
    }

    fn lower_function(&mut self, decl: &FunctionDecl, label: String) {
        self.emit(Instruction::label(Operand::Label(label)));
        self.enter_scope();
        for (index, param) in decl.params.iter().enumerate() {
            let storage = self.declare_storage(param);
            self.emit(Instruction::new(
                OpCode::ParamBind,
                None,
                Some(Operand::Variable(storage)),
                Some(Operand::constant(index.to_string())),
            ));
        }
        for stmt in &decl.body {
            self.lower_stmt(stmt);
        }
        self.exit_scope();
        if self.program.last().map(|i| i.op) != Some(OpCode::Return) {
            self.emit(Instruction::new(OpCode::Return, None, None, None));
        }
    }

    fn lower_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(expr) => {
                self.lower_expr(expr);
            }
            Stmt::Print(expr) => {
                let value = self.lower_expr(expr);
                self.emit(Instruction::new(OpCode::Print, None, Some(value), None));
            }
            Stmt::Var { name, initializer } => {
                let value = initializer.as_ref().map(|init| self.lower_expr(init));
                let storage = self.declare_storage(name);
                if let Some(value) = value {
                    self.emit(Instruction::assign(Operand::Variable(storage), value));
                }
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let cond = self.lower_expr(condition);
                let else_lbl = self.new_label("else");
                let end_lbl = self.new_label("endif");
                self.emit(Instruction::jump_if_false(cond, else_lbl.clone()));
                self.lower_block(then_branch);
                self.emit(Instruction::jump(end_lbl.clone()));
                self.emit(Instruction::label(else_lbl));
                if let Some(else_b) = else_branch {
                    self.lower_block(else_b);
                }
                self.emit(Instruction::label(end_lbl));
            }
            Stmt::While { condition, body } => {
                let start_lbl = self.new_label("while_start");
                let end_lbl = self.new_label("while_end");
                self.emit(Instruction::label(start_lbl.clone()));
                let cond = self.lower_expr(condition);
                self.emit(Instruction::jump_if_false(cond, end_lbl.clone()));
                self.lower_block(body);
                self.emit(Instruction::jump(start_lbl));
                self.emit(Instruction::label(end_lbl));
            }
            Stmt::Return { value, .. } => {
                let val = value.as_ref().map(|e| self.lower_expr(e));
                self.emit(Instruction::new(OpCode::Return, None, val, None));
            }
            Stmt::Block(stmts) => self.lower_block(stmts),
            Stmt::Function(decl) => {
                // Nested declaration: emitted in place, jumped over.
                let label = self.declare_function(&decl.name);
                let skip_lbl = self.new_label("skip");
                self.emit(Instruction::jump(skip_lbl.clone()));
                self.lower_function(decl, label);
                self.emit(Instruction::label(skip_lbl));
            }
        }
    }

    /// Appends the code computing `expr` and returns the operand holding
    /// its value.
    fn lower_expr(&mut self, expr: &Expr) -> Operand {
        match expr {
            Expr::Literal { value, .. } => match value {
                Literal::Number(digits) => Operand::constant(digits.as_str()),
                Literal::Str(text) => Operand::constant(format!("\"{text}\"")),
                Literal::True => Operand::constant("true"),
                Literal::False => Operand::constant("false"),
                Literal::Null => Operand::constant("null"),
            },
            Expr::Variable(ident) => match self.lookup(&ident.name) {
                Some(Binding::Storage(storage)) => Operand::var(storage.as_str()),
                Some(Binding::Function(label)) => Operand::label(label.as_str()),
                None => Operand::var(ident.name.as_str()),
            },
            Expr::Grouping(inner) => self.lower_expr(inner),
            Expr::Assign { target, value } => {
                let val = self.lower_expr(value);
                let dest = self.storage_for(target);
                self.emit(Instruction::assign(dest.clone(), val));
                dest
            }
            Expr::Unary { op, operand, .. } => {
                let val = self.lower_expr(operand);
                let dest = self.new_temp();
                let instr = match op {
                    UnaryOp::Not => {
                        Instruction::new(OpCode::Not, Some(dest.clone()), Some(val), None)
                    }
                    UnaryOp::Neg => {
                        Instruction::binary(OpCode::Sub, dest.clone(), Operand::constant("0"), val)
                    }
                };
                self.emit(instr);
                dest
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                let l = self.lower_expr(left);
                let r = self.lower_expr(right);
                let dest = self.new_temp();
                self.emit(Instruction::binary(opcode(*op), dest.clone(), l, r));
                dest
            }
            Expr::Call { callee, args, .. } => {
                let target = self.lower_callee(callee);
                let values: Vec<Operand> = args.iter().map(|arg| self.lower_expr(arg)).collect();
                let count = values.len();
                for value in values {
                    self.emit(Instruction::new(OpCode::Param, None, Some(value), None));
                }
                let dest = self.new_temp();
                self.emit(Instruction::new(
                    OpCode::Call,
                    Some(dest.clone()),
                    Some(target),
                    Some(Operand::constant(count.to_string())),
                ));
                dest
            }
        }
    }

    /// A bare function name becomes its label; anything else is evaluated
    /// to a value and called indirectly.
    fn lower_callee(&mut self, callee: &Expr) -> Operand {
        if let Expr::Variable(ident) = callee {
            match self.lookup(&ident.name) {
                Some(Binding::Function(label)) => return Operand::label(label.as_str()),
                None => return Operand::label(ident.name.as_str()),
                Some(Binding::Storage(_)) => {}
            }
        }
        self.lower_expr(callee)
    }
}

fn opcode(op: BinaryOp) -> OpCode {
    match op {
        BinaryOp::Add => OpCode::Add,
        BinaryOp::Sub => OpCode::Sub,
        BinaryOp::Mul => OpCode::Mul,
        BinaryOp::Div => OpCode::Div,
        BinaryOp::Lt => OpCode::Lt,
        BinaryOp::Gt => OpCode::Gt,
        BinaryOp::LtEq => OpCode::Le,
        BinaryOp::GtEq => OpCode::Ge,
        BinaryOp::Eq => OpCode::Eq,
        BinaryOp::NotEq => OpCode::Ne,
    }
}

/// First declaration keeps the bare name, later ones get `name.N`.
fn unique_name(seen: &mut HashMap<String, usize>, name: &str) -> String {
    let count = seen.entry(name.to_string()).or_insert(0);
    let unique = match *count {
        0 => name.to_string(),
        n => format!("{name}.{n}"),
    };
    *count += 1;
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn lower_src(src: &str) -> IrProgram {
        let out = parse(&lex(src));
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        generate(&out.statements)
    }

    fn listing(src: &str) -> Vec<String> {
        lower_src(src)
            .instructions()
            .iter()
            .map(|i| i.to_string())
            .collect()
    }

    #[test]
    fn straight_line_code_ends_in_halt() {
        assert_eq!(
            listing("var a = 1; var b = 2; print a + b;"),
            vec!["a = 1", "b = 2", "t0 = a + b", "print t0", "halt"]
        );
    }

    #[test]
    fn if_else_shape() {
        assert_eq!(
            listing("var x = 1; if (x) { print 1; } else { print 2; }"),
            vec![
                "x = 1",
                "ifFalse x goto .else0",
                "print 1",
                "goto .endif1",
                ".else0:",
                "print 2",
                ".endif1:",
                "halt",
            ]
        );
    }

    #[test]
    fn labels_are_unique_across_program() {
        let program = lower_src(
            "var x = 1;
             if (x) { print 1; } else { print 2; }
             if (x) { print 3; }
             while (x) { x = x - 1; }
             function f() { if (x) { return 1; } }",
        );
        let mut defined: Vec<&str> = program
            .instructions()
            .iter()
            .filter_map(|i| i.defined_label())
            .collect();
        let total = defined.len();
        defined.sort_unstable();
        defined.dedup();
        assert_eq!(defined.len(), total);

        for instr in program.instructions() {
            if matches!(instr.op, OpCode::Jump | OpCode::JumpIfFalse) {
                let target = match instr.op {
                    OpCode::Jump => instr.arg1.as_ref(),
                    _ => instr.arg2.as_ref(),
                };
                let Some(Operand::Label(name)) = target else {
                    panic!("jump without label: {instr}");
                };
                assert!(defined.contains(&name.as_str()), "missing label {name}");
            }
        }
    }

    #[test]
    fn while_shape() {
        assert_eq!(
            listing("var i = 3; while (i > 0) { i = i - 1; }"),
            vec![
                "i = 3",
                ".while_start0:",
                "t0 = i > 0",
                "ifFalse t0 goto .while_end1",
                "t1 = i - 1",
                "i = t1",
                "goto .while_start0",
                ".while_end1:",
                "halt",
            ]
        );
    }

    #[test]
    fn functions_follow_halt() {
        assert_eq!(
            listing("function add(a, b) { return a + b; } print add(1, 2);"),
            vec![
                "param 1",
                "param 2",
                "t0 = call add, 2",
                "print t0",
                "halt",
                "add:",
                "bind_param a, 0",
                "bind_param b, 1",
                "t1 = a + b",
                "return t1",
            ]
        );
    }

    #[test]
    fn implicit_return_added_once() {
        let with_return = listing("function f() { return 1; }");
        assert_eq!(with_return, vec!["halt", "f:", "return 1"]);

        let without = listing("function g(x) { print x; }");
        assert_eq!(without, vec!["halt", "g:", "bind_param x, 0", "print x", "return"]);
    }

    #[test]
    fn nested_calls_do_not_interleave_params() {
        assert_eq!(
            listing("function f(a, b) {} function g(a) {} f(g(1), 2);")[..5],
            [
                "param 1",
                "t0 = call g, 1",
                "param t0",
                "param 2",
                "t1 = call f, 2",
            ]
        );
    }

    #[test]
    fn seven_arguments_are_all_passed() {
        let program = lower_src(
            "function f(a, b, c, d, e, g, h) { return h; } print f(1, 2, 3, 4, 5, 6, 7);",
        );
        let params = program
            .instructions()
            .iter()
            .filter(|i| i.op == OpCode::Param)
            .count();
        let binds = program
            .instructions()
            .iter()
            .filter(|i| i.op == OpCode::ParamBind)
            .count();
        assert_eq!(params, 7);
        assert_eq!(binds, 7);
        let call = program
            .instructions()
            .iter()
            .find(|i| i.op == OpCode::Call)
            .unwrap();
        assert_eq!(call.arg2, Some(Operand::constant("7")));
    }

    #[test]
    fn literals_are_normalised() {
        assert_eq!(
            listing("print true; print false; print null; print \"hi\";"),
            vec!["print true", "print false", "print null", "print \"hi\"", "halt"]
        );
    }

    #[test]
    fn unary_operators() {
        assert_eq!(
            listing("var x = 1; print !x; print -x;"),
            vec!["x = 1", "t0 = !x", "print t0", "t1 = 0 - x", "print t1", "halt"]
        );
    }

    #[test]
    fn assignment_yields_its_target() {
        assert_eq!(
            listing("var a = 0; var b = 0; a = b = 5;"),
            vec!["a = 0", "b = 0", "b = 5", "a = b", "halt"]
        );
    }

    #[test]
    fn shadowed_names_get_separate_storage() {
        assert_eq!(
            listing("var x = 1; { var x = 2; print x; } { var x = x; print x; } print x;"),
            vec![
                "x = 1",
                "x.1 = 2",
                "print x.1",
                "x.2 = x",
                "print x.2",
                "print x",
                "halt",
            ]
        );
    }

    #[test]
    fn parameters_shadowing_globals() {
        assert_eq!(
            listing("var x = 1; function f(x) { return x; } print f(x);"),
            vec![
                "x = 1",
                "param x",
                "t0 = call f, 1",
                "print t0",
                "halt",
                "f:",
                "bind_param x.1, 0",
                "return x.1",
            ]
        );
    }

    #[test]
    fn nested_functions_are_jumped_over() {
        assert_eq!(
            listing("function outer() { function inner() { return 1; } return inner(); }"),
            vec![
                "halt",
                "outer:",
                "goto .skip0",
                "inner:",
                "return 1",
                ".skip0:",
                "t0 = call inner, 0",
                "return t0",
            ]
        );
    }
}
