use crate::ir::{is_control_label, Instruction, IrProgram, OpCode, Operand};
use std::collections::{HashMap, HashSet};

const ARG_REGISTERS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

/// Translate a TAC program to NASM x86-64 source for a `-no-pie` ELF link
/// against libc.
pub fn generate(program: &IrProgram) -> String {
    CodeGenerator::new(program).generate()
}

pub struct CodeGenerator<'a> {
    program: &'a IrProgram,
    slots: Vec<String>,
    slot_names: HashSet<String>,
    strings: Vec<String>,
    string_ids: HashMap<String, usize>,
    // Arguments of the call being built; pushed when its CALL is reached.
    pending: Vec<Operand>,
    out: String,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(program: &'a IrProgram) -> Self {
        CodeGenerator {
            program,
            slots: Vec::new(),
            slot_names: HashSet::new(),
            strings: Vec::new(),
            string_ids: HashMap::new(),
            pending: Vec::new(),
            out: String::new(),
        }
    }

    pub fn generate(mut self) -> String {
        self.collect();

        self.raw("section .note.GNU-stack noalloc noexec nowrite progbits");
        self.raw("extern printf");
        self.raw("extern exit");
        self.raw("global main");

        self.raw("");
        self.raw("section .data");
        self.raw("fmt_int: db \"%ld\", 10, 0");
        self.raw("fmt_str: db \"%s\", 10, 0");
        let strings = std::mem::take(&mut self.strings);
        for (id, text) in strings.iter().enumerate() {
            let bytes: Vec<String> = text
                .bytes()
                .chain(std::iter::once(0))
                .map(|b| b.to_string())
                .collect();
            self.raw(&format!("str_{id}: db {}", bytes.join(", ")));
        }

        self.raw("");
        self.raw("section .bss");
        let slots = std::mem::take(&mut self.slots);
        for slot in &slots {
            self.raw(&format!("{slot}: resq 1"));
        }

        self.raw("");
        self.raw("section .text");
        self.raw("main:");
        self.prologue();
        let program = self.program;
        for instr in program.instructions() {
            self.gen_instruction(instr);
        }

        tracing::debug!(
            slots = slots.len(),
            strings = strings.len(),
            bytes = self.out.len(),
            "generated assembly"
        );
        self.out
    }

    /// First pass: storage slots and interned strings, in first-seen order.
    fn collect(&mut self) {
        let program = self.program;
        for instr in program.instructions() {
            for op in instr.operands() {
                if let Some(slot) = slot_name(op) {
                    if self.slot_names.insert(slot.clone()) {
                        self.slots.push(slot);
                    }
                } else if let Some(raw) = op.string_literal() {
                    let text = decode_escapes(raw);
                    if !self.string_ids.contains_key(&text) {
                        self.string_ids.insert(text.clone(), self.strings.len());
                        self.strings.push(text);
                    }
                }
            }
        }
    }

    fn raw(&mut self, line: &str) {
        self.out.push_str(line);
        self.out.push('\n');
    }

    fn emit(&mut self, line: impl AsRef<str>) {
        self.out.push_str("  ");
        self.out.push_str(line.as_ref());
        self.out.push('\n');
    }

    fn prologue(&mut self) {
        self.emit("push rbp");
        self.emit("mov rbp, rsp");
        self.emit("and rsp, -16");
    }

    fn epilogue(&mut self) {
        self.emit("mov rsp, rbp");
        self.emit("pop rbp");
        self.emit("ret");
    }

    /// Assembly text for reading `op`. Constants become immediates, strings
    /// and labels their address.
    fn value(&self, op: &Operand) -> String {
        match op {
            Operand::Variable(name) => format!("qword [{}]", var_slot(name)),
            Operand::Temporary(id) => format!("qword [{}]", tmp_slot(*id)),
            Operand::Constant(text) => match text.as_str() {
                "true" => "1".to_string(),
                "false" | "null" => "0".to_string(),
                _ => match op.string_literal() {
                    Some(raw) => {
                        let id = self.string_ids.get(&decode_escapes(raw)).copied();
                        format!("str_{}", id.unwrap_or_default())
                    }
                    None => text.clone(),
                },
            },
            Operand::Label(name) => asm_label(name),
        }
    }

    fn load(&mut self, reg: &str, op: &Option<Operand>) {
        let src = op.as_ref().map_or_else(|| "0".to_string(), |op| self.value(op));
        self.emit(format!("mov {reg}, {src}"));
    }

    fn store(&mut self, dest: &Option<Operand>) {
        if let Some(dest) = dest {
            let dest = self.value(dest);
            self.emit(format!("mov {dest}, rax"));
        }
    }

    fn gen_instruction(&mut self, instr: &Instruction) {
        match instr.op {
            OpCode::Add | OpCode::Sub | OpCode::Mul => {
                let mnemonic = match instr.op {
                    OpCode::Add => "add",
                    OpCode::Sub => "sub",
                    _ => "imul",
                };
                self.load("rax", &instr.arg1);
                self.load("rcx", &instr.arg2);
                self.emit(format!("{mnemonic} rax, rcx"));
                self.store(&instr.result);
            }
            OpCode::Div => {
                self.load("rax", &instr.arg1);
                self.emit("cqo");
                self.load("rcx", &instr.arg2);
                self.emit("idiv rcx");
                self.store(&instr.result);
            }
            OpCode::Lt | OpCode::Gt | OpCode::Le | OpCode::Ge | OpCode::Eq | OpCode::Ne => {
                let set = match instr.op {
                    OpCode::Lt => "setl",
                    OpCode::Gt => "setg",
                    OpCode::Le => "setle",
                    OpCode::Ge => "setge",
                    OpCode::Eq => "sete",
                    _ => "setne",
                };
                self.load("rax", &instr.arg1);
                self.load("rcx", &instr.arg2);
                self.emit("cmp rax, rcx");
                self.emit(format!("{set} al"));
                self.emit("movzx rax, al");
                self.store(&instr.result);
            }
            OpCode::Not => {
                self.load("rax", &instr.arg1);
                self.emit("cmp rax, 0");
                self.emit("sete al");
                self.emit("movzx rax, al");
                self.store(&instr.result);
            }
            OpCode::Assign => {
                self.load("rax", &instr.arg1);
                self.store(&instr.result);
            }
            OpCode::Jump => {
                let target = self.target(&instr.arg1);
                self.emit(format!("jmp {target}"));
            }
            OpCode::JumpIfFalse | OpCode::JumpIfTrue => {
                let jcc = if instr.op == OpCode::JumpIfFalse { "je" } else { "jne" };
                self.load("rax", &instr.arg1);
                self.emit("cmp rax, 0");
                let target = self.target(&instr.arg2);
                self.emit(format!("{jcc} {target}"));
            }
            OpCode::Label => {
                if let Some(name) = instr.defined_label() {
                    self.raw(&format!("{}:", asm_label(name)));
                    if !is_control_label(name) {
                        self.prologue();
                    }
                }
            }
            OpCode::Param => {
                if let Some(arg) = &instr.arg1 {
                    self.pending.push(arg.clone());
                }
            }
            OpCode::Call => self.gen_call(instr),
            OpCode::ParamBind => {
                let index = count(&instr.arg2).unwrap_or_default();
                match ARG_REGISTERS.get(index) {
                    Some(reg) => {
                        if let Some(dest) = &instr.arg1 {
                            let dest = self.value(dest);
                            self.emit(format!("mov {dest}, {reg}"));
                        }
                    }
                    None => {
                        let offset = 16 + (index - ARG_REGISTERS.len()) * 8;
                        self.emit(format!("mov rax, qword [rbp + {offset}]"));
                        self.store(&instr.arg1);
                    }
                }
            }
            OpCode::Return => {
                if instr.arg1.is_some() {
                    self.load("rax", &instr.arg1);
                }
                self.epilogue();
            }
            OpCode::Print => {
                let fmt = match instr.arg1.as_ref().and_then(Operand::string_literal) {
                    Some(_) => "fmt_str",
                    None => "fmt_int",
                };
                self.emit(format!("mov rdi, {fmt}"));
                self.load("rsi", &instr.arg1);
                self.emit("xor rax, rax");
                self.emit("call printf");
            }
            OpCode::Halt => {
                self.emit("mov rdi, 0");
                self.emit("call exit");
            }
        }
    }

    /// Arguments are pushed last first so the first six pop straight into
    /// their registers and the rest stay on the stack, seventh on top.
    fn gen_call(&mut self, instr: &Instruction) {
        let argc = count(&instr.arg2)
            .unwrap_or(self.pending.len())
            .min(self.pending.len());
        let args = self.pending.split_off(self.pending.len() - argc);
        for arg in args.iter().rev() {
            let src = self.value(arg);
            self.emit(format!("mov rax, {src}"));
            self.emit("push rax");
        }
        for reg in ARG_REGISTERS.iter().take(argc) {
            self.emit(format!("pop {reg}"));
        }

        match &instr.arg1 {
            Some(Operand::Label(name)) => {
                self.emit("xor rax, rax");
                self.emit(format!("call {}", asm_label(name)));
            }
            callee => {
                self.load("r10", callee);
                self.emit("xor rax, rax");
                self.emit("call r10");
            }
        }

        if argc > ARG_REGISTERS.len() {
            self.emit(format!("add rsp, {}", (argc - ARG_REGISTERS.len()) * 8));
        }
        self.store(&instr.result);
    }

    fn target(&self, label: &Option<Operand>) -> String {
        match label {
            Some(Operand::Label(name)) => asm_label(name),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

fn var_slot(name: &str) -> String {
    format!("var_{name}")
}

fn tmp_slot(id: usize) -> String {
    format!("tmp_{id}")
}

fn slot_name(op: &Operand) -> Option<String> {
    match op {
        Operand::Variable(name) => Some(var_slot(name)),
        Operand::Temporary(id) => Some(tmp_slot(*id)),
        _ => None,
    }
}

fn asm_label(name: &str) -> String {
    if is_control_label(name) {
        format!("L{name}")
    } else {
        format!("fn_{name}")
    }
}

fn count(op: &Option<Operand>) -> Option<usize> {
    match op {
        Some(Operand::Constant(text)) => text.parse().ok(),
        _ => None,
    }
}

/// Decode the escapes a string literal may carry. Unknown escapes keep the
/// escaped character.
fn decode_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
