//! Decoded TVM instruction model.
//!
//! One closed tagged union per instruction category; the interpreter
//! dispatches on the outer tag and each category handler runs a total match
//! over its own union. Variants the engine does not implement yet fail
//! loudly at dispatch time instead of falling through.

use std::sync::Arc;

use num_bigint::BigInt;

/// A decoded instruction stream. Continuation bodies nest as further `Code`
/// values inside [`ContInstr::PushCont`].
pub type Code = Arc<Vec<Instr>>;

pub fn code_of(instrs: Vec<Instr>) -> Code {
    Arc::new(instrs)
}

#[derive(Debug, Clone)]
pub enum Instr {
    Stack(StackInstr),
    Arith(ArithInstr),
    Cmp(CmpInstr),
    Cont(ContInstr),
    Tuple(TupleInstr),
    CellBuild(CellBuildInstr),
    CellParse(CellParseInstr),
    Dict(DictInstr),
    Crypto(CryptoInstr),
    Currency(CurrencyInstr),
    Config(ConfigInstr),
    Action(ActionInstr),
    Debug(DebugInstr),
}

/// Pure stack manipulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackInstr {
    Nop,
    /// XCHG s0, s(i).
    Xchg0(u8),
    /// XCHG s(i), s(j).
    Xchg(u8, u8),
    /// PUSH s(i); `Push(0)` is DUP.
    Push(u8),
    /// POP s(i); `Pop(0)` is DROP.
    Pop(u8),
    Rot,
    RotRev,
    Swap2,
    Dup2,
    Over2,
    Drop2,
    Tuck,
    /// PUSH s(n) with n taken from the stack.
    Pick,
    Roll,
    RollRev,
    /// BLKSWAP i, j.
    BlkSwap(u8, u8),
    /// BLKPUSH n, i.
    BlkPush(u8, u8),
    BlkDrop(u8),
    /// DROP n with n taken from the stack.
    DropX,
    /// REVERSE n, i.
    Reverse(u8, u8),
    Depth,
    OnlyTopX,
    OnlyX,
}

/// Integer arithmetic and bitwise logic over 257-bit signed integers.
#[derive(Debug, Clone)]
pub enum ArithInstr {
    PushInt(i64),
    PushIntBig(BigInt),
    PushPow2(u16),
    PushPow2Dec(u16),
    PushNegPow2(u16),
    Add,
    Sub,
    SubR,
    Mul,
    Div,
    Mod,
    DivMod,
    Inc,
    Dec,
    AddConst(i16),
    MulConst(i16),
    Negate,
    Abs,
    Min,
    Max,
    MinMax,
    Lshift(u16),
    Rshift(u16),
    LshiftVar,
    RshiftVar,
    Pow2,
    And,
    Or,
    Xor,
    Not,
    /// FITS n: range-check as signed n-bit.
    Fits(u16),
    /// UFITS n: range-check as unsigned n-bit.
    UFits(u16),
    FitsVar,
    UFitsVar,
    MulDiv,
    MulDivMod,
    /// Combined shift/divide family; intentionally unimplemented (backlog).
    LshiftDiv,
    /// Combined shift/divide family; intentionally unimplemented (backlog).
    LshiftDivMod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpInstr {
    Sgn,
    Less,
    Equal,
    Leq,
    Greater,
    Geq,
    Neq,
    Cmp,
    EqInt(i16),
    NeqInt(i16),
    GtInt(i16),
    LessInt(i16),
}

/// Continuations and control flow.
#[derive(Debug, Clone)]
pub enum ContInstr {
    PushCont(Code),
    /// EXECUTE: call the continuation on top of the stack.
    Execute,
    /// JMPX: jump to the continuation on top of the stack.
    JmpX,
    /// CALLXARGS p, r.
    CallXArgs(u8, i8),
    JmpXArgs(u8),
    Ret,
    RetAlt,
    If,
    IfNot,
    IfJmp,
    IfNotJmp,
    IfElse,
    IfRet,
    IfNotRet,
    CondSel,
    Repeat,
    Until,
    While,
    Again,
    /// c(i) → stack.
    PushCtr(u8),
    /// stack → c(i).
    PopCtr(u8),
    /// SETCONTCTR i: store c(i) into a continuation's save list.
    SetContCtr(u8),
    /// SAVECTR i: save c(i) into c0's save list.
    SaveCtr(u8),
    /// ATEXIT: compose the popped continuation in front of c0.
    Atexit,
    AtexitAlt,
    /// BOOLAND-style composition: set cont.c0 := c0.
    Compos,
    ComposAlt,
    ComposBoth,
    CallDict(i64),
    JmpDict(i64),
    Throw(u16),
    ThrowIf(u16),
    ThrowIfNot(u16),
    ThrowAny,
    Try,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleInstr {
    Null,
    IsNull,
    MkTuple(u8),
    Nil,
    Index(u8),
    IndexQ(u8),
    Untuple(u8),
    UnpackFirst(u8),
    /// Intentionally unimplemented (backlog).
    Explode(u8),
    TupleLen,
    TupleLenQ,
    Last,
    TPush,
    TPop,
    SetIndex(u8),
    NullSwapIf,
    NullSwapIfNot,
}

/// Builder-side cell operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellBuildInstr {
    NewBuilder,
    EndCell,
    /// STU cc+1 (static width 1..=256).
    StUint(u32),
    /// STI cc+1.
    StInt(u32),
    /// STUX: width from the stack.
    StUintVar,
    StIntVar,
    StRef,
    /// STBREF: seal a builder and store it as a child reference.
    StBuilderRef,
    StSlice,
    /// STB: append another builder's bits and refs.
    StBuilder,
    BuilderBits,
    BuilderRefs,
    BuilderRemBits,
    /// BDEPTH (mocked; fixed in post-processing).
    BuilderDepth,
}

/// Slice-side cell operations.
#[derive(Debug, Clone)]
pub enum CellParseInstr {
    /// Push a literal slice (decoded from the code stream).
    PushSlice(Vec<bool>),
    /// Push a literal reference cell from the code stream.
    PushRef(CodeCell),
    /// CTOS.
    CellToSlice,
    /// ENDS: fail unless the slice is fully read.
    EndParse,
    LdUint(u32),
    LdInt(u32),
    PldUint(u32),
    PldInt(u32),
    LdUintVar,
    LdIntVar,
    LdRef,
    PldRef,
    /// LDREFRTOS: load a ref and open it as a slice.
    LdRefToSlice,
    LdSlice(u32),
    LdSliceVar,
    SliceBits,
    SliceRefs,
    SliceBitRefs,
    SliceEmpty,
    SliceDataEmpty,
    SliceRefsEmpty,
    SkipBits(u32),
    SkipBitsVar,
    /// SDCUTFIRST: keep only the first n bits.
    CutFirst,
    /// SDEPTH (mocked; fixed in post-processing).
    SliceDepth,
    /// SCHKBITS: throw cell overflow unless n more bits can be read.
    CheckBits,
    /// SDEQ: structural equality of the unread payloads.
    SliceEq,
}

/// Placeholder for reference cells embedded in code (the bytecode
/// front-end resolves them before handing us the stream).
#[derive(Debug, Clone)]
pub struct CodeCell {
    pub bits: Vec<bool>,
    pub children: Vec<CodeCell>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictKeyKind {
    Slice,
    Signed,
    Unsigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictSetMode {
    /// Unconditional store.
    Set,
    /// Store only if the key is already present.
    Replace,
    /// Store only if the key is absent.
    Add,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictInstr {
    NewDict,
    Get {
        key: DictKeyKind,
        by_ref: bool,
    },
    Set {
        key: DictKeyKind,
        mode: DictSetMode,
        by_ref: bool,
    },
    Del {
        key: DictKeyKind,
    },
    /// DICTMIN / DICTMAX and signed/unsigned variants.
    Extremum {
        key: DictKeyKind,
        max: bool,
    },
    /// DICTGETNEXT / DICTGETPREV and -EQ variants.
    GetNear {
        key: DictKeyKind,
        next: bool,
        allow_eq: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoInstr {
    /// HASHCU (mocked; fixed in post-processing).
    HashCellU,
    /// HASHSU (mocked; fixed in post-processing).
    HashSliceU,
    /// SHA256U over slice data (mocked; fixed in post-processing).
    Sha256U,
    /// CHKSIGNU (mocked boolean; fixed in post-processing).
    CheckSignU,
    CheckSignS,
    /// CDEPTH (mocked; fixed in post-processing).
    CellDepth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencyInstr {
    /// LDGRAMS: VarUInteger 16.
    LdGrams,
    StGrams,
    /// LDVARUINT32-style with an explicit length-prefix width.
    LdVarUint(u32),
    LdMsgAddr,
    /// REWRITESTDADDR; var/extern address forms are backlog.
    ParseStdAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigInstr {
    /// GETPARAM i from the c7 environment tuple (NOW=3, LTIME=5, BALANCE=7,
    /// MYADDR=8, ...).
    GetParam(u8),
    /// CONFIGROOT.
    ConfigRoot,
    /// CONFIGPARAM / CONFIGOPTPARAM.
    ConfigParam { opt: bool },
    GetGlob(u8),
    SetGlob(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionInstr {
    SendRawMsg,
    RawReserve,
    SetCode,
    Accept,
    SetGasLimit,
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugInstr {
    DumpStack,
    Dump(u8),
    /// Harness extension: synchronously invoke (contract, method) popped
    /// from the stack and push the callee's exit code on return.
    CheckerCall,
}

impl Instr {
    /// Static gas price of one instruction. Computed costs (cell creation,
    /// dictionary work) use flat approximations; exact gas fidelity is a
    /// non-goal.
    pub fn gas_cost(&self) -> u64 {
        match self {
            Instr::Stack(_) => 18,
            Instr::Arith(a) => match a {
                ArithInstr::PushIntBig(_) => 34,
                ArithInstr::MulDiv | ArithInstr::MulDivMod => 26,
                _ => 18,
            },
            Instr::Cmp(_) => 18,
            Instr::Cont(c) => match c {
                ContInstr::PushCont(_) => 26,
                ContInstr::CallDict(_) | ContInstr::JmpDict(_) => 126,
                ContInstr::Throw(_)
                | ContInstr::ThrowIf(_)
                | ContInstr::ThrowIfNot(_)
                | ContInstr::ThrowAny => 76,
                ContInstr::Try => 26,
                _ => 18,
            },
            Instr::Tuple(t) => match t {
                TupleInstr::MkTuple(n) | TupleInstr::Untuple(n) => 26 + *n as u64,
                _ => 26,
            },
            Instr::CellBuild(b) => match b {
                CellBuildInstr::NewBuilder => 86,
                CellBuildInstr::EndCell | CellBuildInstr::StBuilderRef => 518,
                _ => 26,
            },
            Instr::CellParse(p) => match p {
                CellParseInstr::CellToSlice | CellParseInstr::LdRefToSlice => 118,
                CellParseInstr::PushRef(_) => 118,
                CellParseInstr::PushSlice(_) => 22,
                _ => 26,
            },
            Instr::Dict(_) => 147,
            Instr::Crypto(_) => 26,
            Instr::Currency(_) => 26,
            Instr::Config(_) => 26,
            Instr::Action(a) => match a {
                ActionInstr::SendRawMsg => 526,
                ActionInstr::RawReserve => 526,
                _ => 26,
            },
            Instr::Debug(_) => 26,
        }
    }
}
