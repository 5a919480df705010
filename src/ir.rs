//! Three-address code: a flat, ordered instruction list.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Named storage. Shadowing declarations carry a `name.N` suffix.
    Variable(String),
    Temporary(usize),
    /// Literal text: digits, `"quoted"` string source text, or one of
    /// `true`, `false`, `null`.
    Constant(String),
    /// Function names and generated control labels (`.else3`, ...).
    Label(String),
}

impl Operand {
    pub fn var(name: impl Into<String>) -> Self {
        Operand::Variable(name.into())
    }

    pub fn constant(text: impl Into<String>) -> Self {
        Operand::Constant(text.into())
    }

    pub fn label(name: impl Into<String>) -> Self {
        Operand::Label(name.into())
    }

    /// Raw source text of a string constant, without the quotes.
    pub fn string_literal(&self) -> Option<&str> {
        match self {
            Operand::Constant(text) if text.len() >= 2 && text.starts_with('"') => {
                Some(&text[1..text.len() - 1])
            }
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Variable(name) | Operand::Label(name) | Operand::Constant(name) => {
                f.write_str(name)
            }
            Operand::Temporary(id) => write!(f, "t{id}"),
        }
    }
}

/// Generated control labels start with a dot, which no source identifier can,
/// so they never collide with function labels.
pub fn is_control_label(name: &str) -> bool {
    name.starts_with('.')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Add,
    Sub,
    Mul,
    Div,
    Not,
    Assign,
    Jump,
    JumpIfFalse,
    JumpIfTrue,
    Label,
    Call,
    Return,
    Param,
    ParamBind,
    Print,
    Halt,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl OpCode {
    fn infix(self) -> Option<&'static str> {
        let symbol = match self {
            OpCode::Add => "+",
            OpCode::Sub => "-",
            OpCode::Mul => "*",
            OpCode::Div => "/",
            OpCode::Lt => "<",
            OpCode::Gt => ">",
            OpCode::Le => "<=",
            OpCode::Ge => ">=",
            OpCode::Eq => "==",
            OpCode::Ne => "!=",
            _ => return None,
        };
        Some(symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub op: OpCode,
    pub result: Option<Operand>,
    pub arg1: Option<Operand>,
    pub arg2: Option<Operand>,
}

impl Instruction {
    pub fn new(
        op: OpCode,
        result: Option<Operand>,
        arg1: Option<Operand>,
        arg2: Option<Operand>,
    ) -> Self {
        Instruction {
            op,
            result,
            arg1,
            arg2,
        }
    }

    pub fn binary(op: OpCode, result: Operand, left: Operand, right: Operand) -> Self {
        Self::new(op, Some(result), Some(left), Some(right))
    }

    pub fn assign(result: Operand, value: Operand) -> Self {
        Self::new(OpCode::Assign, Some(result), Some(value), None)
    }

    pub fn label(label: Operand) -> Self {
        Self::new(OpCode::Label, None, Some(label), None)
    }

    pub fn jump(label: Operand) -> Self {
        Self::new(OpCode::Jump, None, Some(label), None)
    }

    pub fn jump_if_false(cond: Operand, label: Operand) -> Self {
        Self::new(OpCode::JumpIfFalse, None, Some(cond), Some(label))
    }

    /// Iterates over the operands that are present, result first.
    pub fn operands(&self) -> impl Iterator<Item = &Operand> {
        self.result
            .iter()
            .chain(self.arg1.iter())
            .chain(self.arg2.iter())
    }

    /// Name of the label this instruction defines, if it is a `LABEL`.
    pub fn defined_label(&self) -> Option<&str> {
        match (self.op, &self.arg1) {
            (OpCode::Label, Some(Operand::Label(name))) => Some(name),
            _ => None,
        }
    }

    fn arg(slot: &Option<Operand>) -> &dyn fmt::Display {
        match slot {
            Some(op) => op,
            None => &"?",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let res = Self::arg(&self.result);
        let a1 = Self::arg(&self.arg1);
        let a2 = Self::arg(&self.arg2);
        if let Some(symbol) = self.op.infix() {
            return write!(f, "{res} = {a1} {symbol} {a2}");
        }
        match self.op {
            OpCode::Not => write!(f, "{res} = !{a1}"),
            OpCode::Assign => write!(f, "{res} = {a1}"),
            OpCode::Jump => write!(f, "goto {a1}"),
            OpCode::JumpIfFalse => write!(f, "ifFalse {a1} goto {a2}"),
            OpCode::JumpIfTrue => write!(f, "ifTrue {a1} goto {a2}"),
            OpCode::Label => write!(f, "{a1}:"),
            OpCode::Call => match &self.result {
                Some(result) => write!(f, "{result} = call {a1}, {a2}"),
                None => write!(f, "call {a1}, {a2}"),
            },
            OpCode::Return => match &self.arg1 {
                Some(value) => write!(f, "return {value}"),
                None => f.write_str("return"),
            },
            OpCode::Param => write!(f, "param {a1}"),
            OpCode::ParamBind => write!(f, "bind_param {a1}, {a2}"),
            OpCode::Print => write!(f, "print {a1}"),
            OpCode::Halt => f.write_str("halt"),
            _ => unreachable!("infix opcodes handled above"),
        }
    }
}

/// Ordered, append-only instruction list; order is execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrProgram {
    instructions: Vec<Instruction>,
}

impl IrProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, instr: Instruction) {
        self.instructions.push(instr);
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn last(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl fmt::Display for IrProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instr in &self.instructions {
            if instr.op == OpCode::Label {
                writeln!(f, "{instr}")?;
            } else {
                writeln!(f, "  {instr}")?;
            }
        }
        Ok(())
    }
}
