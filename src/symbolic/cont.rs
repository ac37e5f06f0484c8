//! Continuation values and control registers.
//!
//! Control flow is continuation-based: every jump/call/loop reduces to
//! "jump to continuation C", and c0/c1 hold what happens on return/break.
//! Loop continuations carry a unique loop id issued by the interpreter
//! instance that owns the run.

use std::sync::Arc;

use z3::ast::BV;
use z3::Context;

use crate::insn::Code;
use crate::symbolic::memory::Cell;
use crate::symbolic::value::StackValue;

/// Partial register save list attached to an ordinary continuation.
/// `None` means "leave the register alone on jump".
#[derive(Debug, Clone, Default)]
pub struct SavedRegs<'ctx> {
    pub c0: Option<Arc<Continuation<'ctx>>>,
    pub c1: Option<Arc<Continuation<'ctx>>>,
    pub c2: Option<Arc<Continuation<'ctx>>>,
    pub c3: Option<Arc<Continuation<'ctx>>>,
    pub c4: Option<Arc<Cell<'ctx>>>,
    pub c5: Option<Arc<Cell<'ctx>>>,
    pub c7: Option<Arc<Vec<StackValue<'ctx>>>>,
}

impl<'ctx> SavedRegs<'ctx> {
    pub fn is_empty(&self) -> bool {
        self.c0.is_none()
            && self.c1.is_none()
            && self.c2.is_none()
            && self.c3.is_none()
            && self.c4.is_none()
            && self.c5.is_none()
            && self.c7.is_none()
    }
}

/// The machine's control registers.
#[derive(Debug, Clone)]
pub struct ControlRegs<'ctx> {
    /// Return continuation.
    pub c0: Arc<Continuation<'ctx>>,
    /// Alternate return continuation.
    pub c1: Arc<Continuation<'ctx>>,
    /// Exception handler.
    pub c2: Arc<Continuation<'ctx>>,
    /// Method dictionary dispatcher.
    pub c3: Arc<Continuation<'ctx>>,
    /// Persistent storage cell.
    pub c4: Arc<Cell<'ctx>>,
    /// Pending output actions list.
    pub c5: Arc<Cell<'ctx>>,
    /// Globals tuple (environment in slot 0).
    pub c7: Arc<Vec<StackValue<'ctx>>>,
}

impl<'ctx> ControlRegs<'ctx> {
    pub fn apply_saved(&mut self, saved: &SavedRegs<'ctx>) {
        if let Some(c0) = &saved.c0 {
            self.c0 = c0.clone();
        }
        if let Some(c1) = &saved.c1 {
            self.c1 = c1.clone();
        }
        if let Some(c2) = &saved.c2 {
            self.c2 = c2.clone();
        }
        if let Some(c3) = &saved.c3 {
            self.c3 = c3.clone();
        }
        if let Some(c4) = &saved.c4 {
            self.c4 = c4.clone();
        }
        if let Some(c5) = &saved.c5 {
            self.c5 = c5.clone();
        }
        if let Some(c7) = &saved.c7 {
            self.c7 = c7.clone();
        }
    }
}

/// Ordinary continuation: a code position plus an optional captured stack
/// and register save list.
#[derive(Debug, Clone)]
pub struct OrdCont<'ctx> {
    pub code: Code,
    pub ip: usize,
    pub saved: SavedRegs<'ctx>,
    pub captured_stack: Option<Vec<StackValue<'ctx>>>,
    /// With a captured stack: how many values the jumper passes on top of
    /// it (`None` = all of them). Implements CALLXARGS return counts.
    pub take_on_jump: Option<usize>,
    /// Set on return continuations created by method calls; jumping here
    /// pops one recursion-depth entry for the method.
    pub method_exit: Option<i64>,
}

impl<'ctx> OrdCont<'ctx> {
    pub fn entry(code: Code) -> Self {
        Self {
            code,
            ip: 0,
            saved: SavedRegs::default(),
            captured_stack: None,
            take_on_jump: None,
            method_exit: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Continuation<'ctx> {
    Ordinary(OrdCont<'ctx>),
    /// Terminate with exit code 0 (or 1 for the alternate register).
    Quit(i32),
    /// Default exception handler: terminate with the thrown code.
    ExcQuit,
    /// The c3 method dispatcher of a loaded contract: pops a method id and
    /// enters that method's code.
    MethodDispatch { contract: usize },
    /// REPEAT body with `remaining` iterations left.
    Repeat {
        remaining: BV<'ctx>,
        body: Arc<Continuation<'ctx>>,
        after: Arc<Continuation<'ctx>>,
        loop_id: u64,
    },
    /// UNTIL: rerun body while the popped flag is zero.
    Until {
        body: Arc<Continuation<'ctx>>,
        after: Arc<Continuation<'ctx>>,
        loop_id: u64,
    },
    /// WHILE: `checking` alternates between condition and body entry.
    While {
        cond: Arc<Continuation<'ctx>>,
        body: Arc<Continuation<'ctx>>,
        after: Arc<Continuation<'ctx>>,
        checking: bool,
        loop_id: u64,
    },
    /// AGAIN: infinite loop (left only via exceptions or RETALT).
    Again {
        body: Arc<Continuation<'ctx>>,
        loop_id: u64,
    },
}

impl<'ctx> Continuation<'ctx> {
    pub fn quit0() -> Arc<Self> {
        Arc::new(Continuation::Quit(0))
    }

    pub fn quit1() -> Arc<Self> {
        Arc::new(Continuation::Quit(1))
    }

    pub fn exc_quit() -> Arc<Self> {
        Arc::new(Continuation::ExcQuit)
    }

    pub fn ordinary(code: Code) -> Arc<Self> {
        Arc::new(Continuation::Ordinary(OrdCont::entry(code)))
    }

    /// Attaches or merges a save-list entry for c0. Used by composition
    /// instructions; an existing save wins, as in the VM.
    pub fn with_saved_c0(self: &Arc<Self>, c0: Arc<Continuation<'ctx>>) -> Arc<Self> {
        match self.as_ref() {
            Continuation::Ordinary(ord) => {
                if ord.saved.c0.is_some() {
                    return self.clone();
                }
                let mut ord = ord.clone();
                ord.saved.c0 = Some(c0);
                Arc::new(Continuation::Ordinary(ord))
            }
            // Non-ordinary continuations ignore composition.
            _ => self.clone(),
        }
    }

    pub fn with_saved_c1(self: &Arc<Self>, c1: Arc<Continuation<'ctx>>) -> Arc<Self> {
        match self.as_ref() {
            Continuation::Ordinary(ord) => {
                if ord.saved.c1.is_some() {
                    return self.clone();
                }
                let mut ord = ord.clone();
                ord.saved.c1 = Some(c1);
                Arc::new(Continuation::Ordinary(ord))
            }
            _ => self.clone(),
        }
    }

    pub fn loop_id(&self) -> Option<u64> {
        match self {
            Continuation::Repeat { loop_id, .. }
            | Continuation::Until { loop_id, .. }
            | Continuation::While { loop_id, .. }
            | Continuation::Again { loop_id, .. } => Some(*loop_id),
            _ => None,
        }
    }
}

/// Initial register bank for one contract invocation.
pub fn initial_regs<'ctx>(
    _ctx: &'ctx Context,
    method_dispatch: Arc<Continuation<'ctx>>,
    storage: Arc<Cell<'ctx>>,
    actions: Arc<Cell<'ctx>>,
    globals: Arc<Vec<StackValue<'ctx>>>,
) -> ControlRegs<'ctx> {
    ControlRegs {
        c0: Continuation::quit0(),
        c1: Continuation::quit1(),
        c2: Continuation::exc_quit(),
        c3: method_dispatch,
        c4: storage,
        c5: actions,
        c7: globals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::{code_of, Instr, StackInstr};

    #[test]
    fn test_with_saved_c0_does_not_overwrite() {
        let code = code_of(vec![Instr::Stack(StackInstr::Nop)]);
        let first = Continuation::quit0();
        let second = Continuation::quit1();

        let cont = Continuation::ordinary(code)
            .with_saved_c0(first)
            .with_saved_c0(second);

        match cont.as_ref() {
            Continuation::Ordinary(ord) => match ord.saved.c0.as_deref() {
                Some(Continuation::Quit(0)) => {}
                other => panic!("expected first save to win, got {other:?}"),
            },
            other => panic!("unexpected: {other:?}"),
        }
    }
}
