//! Typed instruction/value model consumed by the code generator.
//!
//! This is the boundary between semantic analysis and bytecode
//! emission: a closed tree of instructions over resolved JVM types.
//! Every variant the generator dispatches on lives here, so unknown
//! shapes are unrepresentable rather than a runtime fatal branch.

use crate::ast::Modifier;
use crate::frame::Width;

/// A resolved JVM type. Object types carry internal names
/// (`java/lang/String`), never dotted source names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Void,
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    Object(String),
    Array(Box<TypeRef>),
}

impl TypeRef {
    pub fn object(internal_name: &str) -> TypeRef {
        TypeRef::Object(internal_name.to_string())
    }

    pub fn array(elem: TypeRef) -> TypeRef {
        TypeRef::Array(Box::new(elem))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeRef::Void)
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, TypeRef::Long | TypeRef::Double)
    }

    /// Operand-stack width; `None` for `void`, which never occupies
    /// the stack.
    pub fn width(&self) -> Option<Width> {
        match self {
            TypeRef::Void => None,
            TypeRef::Long | TypeRef::Double => Some(Width::Two),
            _ => Some(Width::One),
        }
    }

    /// Local-variable slots taken when stored.
    pub fn slot_words(&self) -> u16 {
        match self {
            TypeRef::Void => 0,
            TypeRef::Long | TypeRef::Double => 2,
            _ => 1,
        }
    }

    pub fn descriptor(&self) -> String {
        match self {
            TypeRef::Void => "V".to_string(),
            TypeRef::Boolean => "Z".to_string(),
            TypeRef::Byte => "B".to_string(),
            TypeRef::Short => "S".to_string(),
            TypeRef::Char => "C".to_string(),
            TypeRef::Int => "I".to_string(),
            TypeRef::Long => "J".to_string(),
            TypeRef::Float => "F".to_string(),
            TypeRef::Double => "D".to_string(),
            TypeRef::Object(name) => format!("L{name};"),
            TypeRef::Array(elem) => format!("[{}", elem.descriptor()),
        }
    }
}

/// Builds a JVM method descriptor from parameter and return types.
pub fn method_descriptor(params: &[TypeRef], ret: &TypeRef) -> String {
    let mut out = String::from("(");
    for param in params {
        out.push_str(&param.descriptor());
    }
    out.push(')');
    out.push_str(&ret.descriptor());
    out
}

// JVM access flags.
pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SUPER: u16 = 0x0020;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const SYNTHETIC: u16 = 0x1000;
    pub const ANNOTATION: u16 = 0x2000;
}

/// Maps source modifiers onto JVM access flags. `internal` maps to
/// package-private (no flag); `override` and `implicit` have no
/// class-file representation.
pub fn access_flags(modifiers: &[Modifier]) -> u16 {
    let mut flags = 0;
    for modifier in modifiers {
        flags |= match modifier {
            Modifier::Public => access::PUBLIC,
            Modifier::Private => access::PRIVATE,
            Modifier::Protected => access::PROTECTED,
            Modifier::Static => access::STATIC,
            Modifier::Final => access::FINAL,
            Modifier::Abstract => access::ABSTRACT,
            Modifier::Internal | Modifier::Override | Modifier::Implicit => 0,
        };
    }
    flags
}

/// Jump-target identity. Labels are allocated by the producer of the
/// instruction tree; the generator registers each on first reference
/// and asserts every referenced label is eventually visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
    /// Call through a captured closure value; dispatched like a
    /// virtual call but never eligible for the indirection peephole.
    WithCapture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    /// Bitwise complement, emitted as `x ^ -1`.
    BitNot,
}

/// Condition for a one-operand conditional jump; the operand is an
/// int on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    IfTrue,
    IfFalse,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
}

impl Const {
    pub fn ty(&self) -> TypeRef {
        match self {
            Const::Null => TypeRef::object("java/lang/Object"),
            Const::Int(_) => TypeRef::Int,
            Const::Long(_) => TypeRef::Long,
            Const::Float(_) => TypeRef::Float,
            Const::Double(_) => TypeRef::Double,
            Const::Str(_) => TypeRef::object("java/lang/String"),
        }
    }
}

/// What the indirection peephole needs to know about a pointer
/// wrapper's target. Produced by capture analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct PointerFacts {
    /// True when any closure captured the wrapper; optimizing then
    /// would desynchronize the closure's view of the value.
    pub captured: bool,
    /// The wrapper's declared element type.
    pub elem: TypeRef,
    /// The local slot holding the target when the wrapper stands for
    /// a plain local variable; `None` for freshly constructed or
    /// non-local wrappers.
    pub local_slot: Option<u16>,
}

impl PointerFacts {
    /// The structural safety check: only a never-captured wrapper over
    /// a direct local reference may compile to direct slot access.
    pub fn optimizable(&self) -> bool {
        !self.captured && self.local_slot.is_some()
    }
}

/// A sequence evaluated for one final value. All but the last
/// instruction run for effect; `auto_pop` discards stack residue
/// between them. When the caller does not need the pack's value and
/// the last instruction is a pure getter, it is suppressed entirely.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuePack {
    pub insts: Vec<Inst>,
    pub auto_pop: bool,
    pub suppress_trailing_getter: bool,
}

/// One instruction/value node. Instructions produce zero or one stack
/// values; composite operands are nested subtrees evaluated in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Const(Const),
    LoadLocal {
        slot: u16,
        ty: TypeRef,
    },
    StoreLocal {
        slot: u16,
        ty: TypeRef,
        value: Box<Inst>,
    },
    /// `object: None` reads a static field.
    GetField {
        owner: String,
        name: String,
        ty: TypeRef,
        object: Option<Box<Inst>>,
    },
    PutField {
        owner: String,
        name: String,
        ty: TypeRef,
        object: Option<Box<Inst>>,
        value: Box<Inst>,
    },
    Invoke {
        kind: InvokeKind,
        owner: String,
        name: String,
        params: Vec<TypeRef>,
        ret: TypeRef,
        /// Absent for static calls.
        receiver: Option<Box<Inst>>,
        args: Vec<Inst>,
    },
    /// `new` + `dup` + constructor call.
    New {
        class: String,
        ctor_params: Vec<TypeRef>,
        args: Vec<Inst>,
    },
    NewArray {
        elem: TypeRef,
        items: Vec<Inst>,
    },
    /// `java/util/ArrayList` built element by element.
    NewList {
        items: Vec<Inst>,
    },
    /// `java/util/HashMap` built entry by entry.
    NewMap {
        entries: Vec<(Inst, Inst)>,
    },
    /// `checkcast` when the target is an object type, a primitive
    /// conversion otherwise.
    Cast {
        target: TypeRef,
        value: Box<Inst>,
    },
    InstanceOf {
        class: String,
        value: Box<Inst>,
    },
    Binary {
        op: BinOp,
        ty: TypeRef,
        left: Box<Inst>,
        right: Box<Inst>,
    },
    Unary {
        op: UnOp,
        ty: TypeRef,
        operand: Box<Inst>,
    },
    /// Short-circuit forms; the target bytecode has no logical
    /// instruction, so these expand to jumps around constant pushes.
    LogicalAnd {
        left: Box<Inst>,
        right: Box<Inst>,
    },
    LogicalOr {
        left: Box<Inst>,
        right: Box<Inst>,
    },
    /// Comparison producing an int 0/1.
    Compare {
        op: CmpOp,
        ty: TypeRef,
        left: Box<Inst>,
        right: Box<Inst>,
    },
    /// Marks a jump target at this point in the sequence.
    Label(LabelId),
    Goto(LabelId),
    Branch {
        cond: Cond,
        operand: Box<Inst>,
        target: LabelId,
    },
    MonitorEnter(Box<Inst>),
    MonitorExit(Box<Inst>),
    Return(Option<Box<Inst>>),
    Throw(Box<Inst>),
    /// Records a source line for the LineNumberTable.
    Line(u32),
    /// Read through an indirection wrapper; compiles to a direct
    /// local load when the facts prove it safe.
    PointerGet {
        wrapper: Box<Inst>,
        facts: PointerFacts,
    },
    PointerSet {
        wrapper: Box<Inst>,
        value: Box<Inst>,
        facts: PointerFacts,
    },
    Pack(ValuePack),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeRef,
    pub flags: u16,
}

/// One (start, end, handler, type) tuple, resolved through the label
/// map after the body is emitted. `exception: None` is a catch-all.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionEntry {
    pub start: LabelId,
    pub end: LabelId,
    pub handler: LabelId,
    pub exception: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub name: String,
    pub params: Vec<TypeRef>,
    pub return_type: TypeRef,
    pub flags: u16,
    /// `None` for abstract and annotation-member methods.
    pub body: Option<Vec<Inst>>,
    pub exception_table: Vec<ExceptionEntry>,
    /// Local slots consumed by `this` and the parameters, so the
    /// tracker starts with the right floor for max_locals.
    pub param_slots: u16,
}

impl MethodDecl {
    pub fn descriptor(&self) -> String {
        method_descriptor(&self.params, &self.return_type)
    }

    pub fn is_static(&self) -> bool {
        self.flags & access::STATIC != 0
    }
}

/// A fully-resolved type declaration ready for emission. Names are
/// JVM internal names.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub name: String,
    pub super_name: String,
    pub interfaces: Vec<String>,
    pub flags: u16,
    /// Annotation declarations are emitted through a dedicated path
    /// with no instruction bodies.
    pub is_annotation: bool,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
    /// `<clinit>` body, when any static state needs initializing.
    pub static_init: Option<Vec<Inst>>,
    pub source_file: Option<String>,
}

impl TypeDecl {
    pub fn new(name: &str) -> TypeDecl {
        TypeDecl {
            name: name.to_string(),
            super_name: "java/lang/Object".to_string(),
            interfaces: Vec::new(),
            flags: access::PUBLIC | access::SUPER,
            is_annotation: false,
            fields: Vec::new(),
            methods: Vec::new(),
            static_init: None,
            source_file: None,
        }
    }
}
