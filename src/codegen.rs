//! Code generation: lower the SM program into AT&T 32-bit x86 assembly.
//!
//! The generator interprets the SM program symbolically: the "values" on its
//! stack are operand locations (registers, frame slots, named memory), not
//! numbers. Each instruction allocates backing storage for the slots it
//! produces, emits code respecting the two-operand constraints of x86, and
//! keeps the symbolic stack consistent across control-flow joins through a
//! label-to-stack map plus a barrier flag set after unconditional jumps.

use std::collections::{BTreeSet, HashMap};

use crate::error::{CompileResult, UnsupportedSnafu};
use crate::parser::BinaryOp;
use crate::sm::{Cond, Insn, Loc};

/// Register table. Only the first `NUM_REGS` are usable for the symbolic
/// stack; `%edi` is a scratch, `%eax`/`%edx` are reserved for arithmetic and
/// the return value, `%ebp`/`%esp` hold the frame.
const REGS: [&str; 8] = [
  "%ebx", "%ecx", "%esi", "%edi", "%eax", "%edx", "%ebp", "%esp",
];
const NUM_REGS: usize = 3;

const EAX: Opnd = Opnd::R(4);
const EDX: Opnd = Opnd::R(5);
const EBP: Opnd = Opnd::R(6);
const ESP: Opnd = Opnd::R(7);

/// An x86 operand location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opnd {
  /// Hard register, index into `REGS`.
  R(usize),
  /// Symbolic stack slot: `i >= 0` is the i-th word below the frame
  /// pointer, `i < 0` addresses the argument area above it.
  S(isize),
  /// Named memory.
  M(String),
  /// Immediate.
  L(i64),
  /// Indirect `off(base)`.
  I(i64, Box<Opnd>),
}

impl Opnd {
  fn is_memory(&self) -> bool {
    matches!(self, Opnd::S(_) | Opnd::M(_) | Opnd::I(..))
  }
}

impl std::fmt::Display for Opnd {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Opnd::R(i) => f.write_str(REGS[*i]),
      Opnd::S(i) => {
        if *i >= 0 {
          write!(f, "-{}(%ebp)", (i + 1) * 4)
        } else {
          write!(f, "{}(%ebp)", 8 + (-1 - i) * 4)
        }
      }
      Opnd::M(name) => f.write_str(name),
      Opnd::L(n) => write!(f, "${n}"),
      Opnd::I(0, base) => write!(f, "({base})"),
      Opnd::I(off, base) => write!(f, "{off}({base})"),
    }
  }
}

/// One emitted x86 instruction. Binary operations carry the source-level
/// operator and are mapped to a suffixed mnemonic when printed.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
  Mov(Opnd, Opnd),
  Lea(Opnd, Opnd),
  Binop(&'static str, Opnd, Opnd),
  IDiv(Opnd),
  Cltd,
  Set(&'static str, &'static str),
  Push(Opnd),
  Pop(Opnd),
  Call(String),
  Label(String),
  Jmp(String),
  CJmp(&'static str, String),
  Ret,
  Comment(String),
}

fn binop_mnemonic(op: &str) -> &'static str {
  match op {
    "+" => "addl",
    "-" => "subl",
    "*" => "imull",
    "&&" => "andl",
    "!!" => "orl",
    "^" => "xorl",
    "cmp" => "cmpl",
    _ => panic!("no x86 mnemonic for operator {op}"),
  }
}

impl std::fmt::Display for Instr {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Instr::Mov(src, dst) => write!(f, "\tmovl\t{src}, {dst}"),
      Instr::Lea(src, dst) => write!(f, "\tleal\t{src}, {dst}"),
      Instr::Binop(op, src, dst) => write!(f, "\t{}\t{src}, {dst}", binop_mnemonic(op)),
      Instr::IDiv(src) => write!(f, "\tidivl\t{src}"),
      Instr::Cltd => f.write_str("\tcltd"),
      Instr::Set(cond, reg) => write!(f, "\tset{cond}\t{reg}"),
      Instr::Push(src) => write!(f, "\tpushl\t{src}"),
      Instr::Pop(dst) => write!(f, "\tpopl\t{dst}"),
      Instr::Call(name) => write!(f, "\tcall\t{name}"),
      Instr::Label(name) => write!(f, "{name}:"),
      Instr::Jmp(name) => write!(f, "\tjmp\t{name}"),
      Instr::CJmp(cond, name) => write!(f, "\tj{cond}\t{name}"),
      Instr::Ret => f.write_str("\tret"),
      Instr::Comment(text) => write!(f, "# {text}"),
    }
  }
}

/// Code generation environment: the symbolic operand stack and everything
/// needed to keep it consistent across functions and joins.
struct Env {
  stack: Vec<Opnd>,
  stack_slots: usize,
  globals: BTreeSet<String>,
  barrier: bool,
  stack_map: HashMap<String, Vec<Opnd>>,
  fname: String,
}

impl Env {
  fn new() -> Self {
    Self {
      stack: Vec::new(),
      stack_slots: 0,
      globals: BTreeSet::new(),
      barrier: false,
      stack_map: HashMap::new(),
      fname: String::new(),
    }
  }

  /// Choose the next symbolic slot given the current top: registers first,
  /// then frame slots.
  fn allocate(&mut self) -> Opnd {
    let opnd = match self.stack.last() {
      None => Opnd::R(0),
      Some(Opnd::R(k)) if k + 1 < NUM_REGS => Opnd::R(k + 1),
      Some(Opnd::S(k)) => Opnd::S(k + 1),
      Some(_) => Opnd::S(0),
    };
    if let Opnd::S(k) = opnd {
      self.stack_slots = self.stack_slots.max(k as usize + 1);
    }
    self.stack.push(opnd.clone());
    opnd
  }

  fn push(&mut self, opnd: Opnd) {
    self.stack.push(opnd);
  }

  fn pop(&mut self) -> Opnd {
    self.stack.pop().expect("symbolic stack underflow")
  }

  /// Pop the top two operands, top first.
  fn pop2(&mut self) -> (Opnd, Opnd) {
    let x = self.pop();
    let y = self.pop();
    (x, y)
  }

  fn peek(&self) -> Opnd {
    self
      .stack
      .last()
      .expect("symbolic stack is empty")
      .clone()
  }

  /// Registers below the top `depth` slots, bottom-up: the values that must
  /// survive a call whose arguments occupy the top of the stack.
  fn live_registers(&self, depth: usize) -> Vec<Opnd> {
    let keep = self.stack.len() - depth;
    self.stack[..keep]
      .iter()
      .filter(|opnd| matches!(opnd, Opnd::R(_)))
      .cloned()
      .collect()
  }

  /// Materialize a binding's home as an operand. Every global that shows up
  /// here is recorded for the `.data` section.
  fn loc(&mut self, loc: &Loc) -> Opnd {
    match loc {
      Loc::Global(name) => {
        self.globals.insert(name.clone());
        Opnd::M(format!("global_{name}"))
      }
      Loc::Arg(i) => Opnd::S(-1 - *i as isize),
      Loc::Local(i) => Opnd::S(*i as isize),
    }
  }

  /// Snapshot the symbolic stack under a label and clear the barrier.
  fn set_stack(&mut self, label: &str) {
    self.stack_map.insert(label.to_string(), self.stack.clone());
    self.barrier = false;
  }

  /// Replace the symbolic stack with the snapshot for `label`, if any.
  fn retrieve_stack(&mut self, label: &str) {
    if let Some(stack) = self.stack_map.get(label) {
      self.stack = stack.clone();
    }
  }

  fn enter_function(&mut self, name: &str) {
    self.fname = name.to_string();
    self.stack.clear();
    self.stack_slots = 0;
  }
}

/// Emit a move, splitting memory-to-memory transfers through `%eax`.
fn emit_move(from: Opnd, to: Opnd, out: &mut Vec<Instr>) {
  if from.is_memory() && to.is_memory() {
    out.push(Instr::Mov(from, EAX));
    out.push(Instr::Mov(EAX, to));
  } else {
    out.push(Instr::Mov(from, to));
  }
}

fn set_suffix(op: BinaryOp) -> &'static str {
  match op {
    BinaryOp::Lt => "l",
    BinaryOp::Le => "le",
    BinaryOp::Eq => "e",
    BinaryOp::Ne => "ne",
    BinaryOp::Ge => "ge",
    BinaryOp::Gt => "g",
    _ => panic!("operator {op} is not a comparison"),
  }
}

/// Generate the complete assembly text for an SM program.
pub fn compile(program: &[Insn]) -> CompileResult<String> {
  log::debug!("generating x86 for {} SM instructions", program.len());
  let mut env = Env::new();
  let mut body: Vec<Instr> = Vec::new();
  for insn in program {
    body.push(Instr::Comment(insn.to_string()));
    step(&mut env, insn, &mut body)?;
  }
  Ok(serialize(&env, &body))
}

fn step(env: &mut Env, insn: &Insn, out: &mut Vec<Instr>) -> CompileResult<()> {
  match insn {
    Insn::Const(n) => {
      let s = env.allocate();
      out.push(Instr::Mov(Opnd::L(*n), s));
    }
    Insn::Ld(loc) => {
      let src = env.loc(loc);
      let s = env.allocate();
      emit_move(src, s, out);
    }
    Insn::Lda(loc) => {
      let addr = env.loc(loc);
      let s = env.allocate();
      out.push(Instr::Lea(addr, EAX));
      out.push(Instr::Mov(EAX, s));
    }
    Insn::St(loc) => {
      let dst = env.loc(loc);
      emit_move(env.peek(), dst, out);
    }
    Insn::Sti => {
      let (x, y) = env.pop2();
      out.push(Instr::Mov(x, EAX));
      out.push(Instr::Mov(y.clone(), EDX));
      out.push(Instr::Mov(EAX, Opnd::I(0, Box::new(EDX))));
      out.push(Instr::Mov(EAX, y.clone()));
      env.push(y);
    }
    Insn::Binop(op) => {
      let (x, y) = env.pop2();
      match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
          out.push(Instr::Mov(y.clone(), EAX));
          out.push(Instr::Binop(op.symbol(), x, EAX));
          out.push(Instr::Mov(EAX, y.clone()));
        }
        BinaryOp::Div | BinaryOp::Rem => {
          out.push(Instr::Mov(y.clone(), EAX));
          out.push(Instr::Cltd);
          out.push(Instr::IDiv(x));
          let result = if *op == BinaryOp::Div { EAX } else { EDX };
          out.push(Instr::Mov(result, y.clone()));
        }
        BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge
        | BinaryOp::Eq
        | BinaryOp::Ne => {
          out.push(Instr::Mov(y.clone(), EDX));
          out.push(Instr::Binop("^", EAX, EAX));
          out.push(Instr::Binop("cmp", x, EDX));
          out.push(Instr::Set(set_suffix(*op), "%al"));
          out.push(Instr::Mov(EAX, y.clone()));
        }
        BinaryOp::And | BinaryOp::Or => {
          // Normalize both operands to 0/1, then combine. Both sides are
          // always evaluated; the operators do not short-circuit.
          out.push(Instr::Mov(x, EAX));
          out.push(Instr::Binop(op.symbol(), EAX, EAX));
          out.push(Instr::Mov(Opnd::L(0), EAX));
          out.push(Instr::Set("ne", "%al"));
          out.push(Instr::Mov(y.clone(), EDX));
          out.push(Instr::Binop(op.symbol(), EDX, EDX));
          out.push(Instr::Mov(Opnd::L(0), EDX));
          out.push(Instr::Set("ne", "%dl"));
          out.push(Instr::Binop(op.symbol(), EDX, EAX));
          out.push(Instr::Mov(EAX, y.clone()));
        }
      }
      env.push(y);
    }
    Insn::Read => {
      let s = env.allocate();
      out.push(Instr::Call("Lread".to_string()));
      out.push(Instr::Mov(EAX, s));
    }
    Insn::Write => {
      let s = env.pop();
      out.push(Instr::Push(s));
      out.push(Instr::Call("Lwrite".to_string()));
      out.push(Instr::Pop(EAX));
    }
    Insn::Drop => {
      env.pop();
    }
    Insn::Label(label) => {
      if env.barrier {
        env.retrieve_stack(label);
        env.barrier = false;
      }
      out.push(Instr::Label(label.clone()));
    }
    Insn::Jmp(label) => {
      env.set_stack(label);
      env.barrier = true;
      out.push(Instr::Jmp(label.clone()));
    }
    Insn::CJmp(cond, label) => {
      let s = env.pop();
      env.set_stack(label);
      out.push(Instr::Binop("cmp", Opnd::L(0), s));
      let suffix = match cond {
        Cond::Z => "z",
        Cond::Nz => "nz",
      };
      out.push(Instr::CJmp(suffix, label.clone()));
    }
    Insn::Begin(name, _n_args, n_locals) => {
      env.enter_function(name);
      out.push(Instr::Push(EBP));
      out.push(Instr::Mov(ESP, EBP));
      if *n_locals > 0 {
        out.push(Instr::Binop("-", Opnd::L(4 * *n_locals as i64), ESP));
      }
    }
    Insn::End => {
      if env.fname == "main" {
        out.push(Instr::Mov(EBP, ESP));
        out.push(Instr::Pop(EBP));
        out.push(Instr::Binop("^", EAX, EAX));
        out.push(Instr::Ret);
      } else {
        let y = env.pop();
        out.push(Instr::Mov(EBP, ESP));
        out.push(Instr::Pop(EBP));
        out.push(Instr::Mov(y, EAX));
        out.push(Instr::Ret);
      }
    }
    Insn::Call(name, n_args) => {
      let live = env.live_registers(*n_args);
      let mut args = Vec::with_capacity(*n_args);
      for _ in 0..*n_args {
        args.push(env.pop());
      }
      let s = env.allocate();
      for reg in &live {
        out.push(Instr::Push(reg.clone()));
      }
      // Pop order is rightmost argument first, which is exactly the cdecl
      // push order: the leftmost argument ends up at 8(%ebp).
      for arg in &args {
        out.push(Instr::Push(arg.clone()));
      }
      out.push(Instr::Call(name.clone()));
      if *n_args > 0 {
        out.push(Instr::Binop("+", Opnd::L(4 * *n_args as i64), ESP));
      }
      for reg in live.iter().rev() {
        out.push(Instr::Pop(reg.clone()));
      }
      out.push(Instr::Mov(EAX, s));
    }
    Insn::Global(name) => {
      env.globals.insert(name.clone());
    }
    Insn::Dup => {
      return UnsupportedSnafu {
        insn: insn.to_string(),
      }
      .fail();
    }
  }
  Ok(())
}

/// Assemble the final text: entry directive, zero-initialized globals, body.
fn serialize(env: &Env, body: &[Instr]) -> String {
  let mut out = String::new();
  out.push_str("\t.global main\n");
  out.push_str("\t.data\n");
  for global in &env.globals {
    out.push_str(&format!("global_{global}:\t.int\t0\n"));
  }
  out.push_str("\t.text\n");
  for instr in body {
    out.push_str(&instr.to_string());
    out.push('\n');
  }
  out
}
