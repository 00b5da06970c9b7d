//! Bytecode generation from the typed instruction model.
//!
//! One `FrameTracker` per body, kept in lockstep with physical byte
//! emission. Short-circuit logic expands to conditional jumps around
//! constant pushes since the target machine has no logical
//! instruction; indirection wrappers compile down to direct local
//! access when capture analysis proves it safe. Structurally
//! impossible states abort the enclosing type's generation with
//! `CodegenError::Internal` rather than emitting malformed bytes.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::classfile::{
    op, put_u16, ClassWriter, CodeAttribute, ConstantPool, ExceptionTableEntry,
};
use crate::frame::{FrameError, FrameTracker, Width};
use crate::ir::{
    access, method_descriptor, BinOp, CmpOp, Cond, Const, Inst, InvokeKind, LabelId, MethodDecl,
    TypeDecl, TypeRef, UnOp, ValuePack,
};

/// Internal name of the runtime indirection wrapper; its `get`/`set`
/// pair is what the peephole elides.
pub const REF_CLASS: &str = "quill/rt/Ref";

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("internal error generating {type_name}: {message}")]
    Internal { type_name: String, message: String },
}

/// Read-only name→type map spanning the compilation unit, consulted
/// for supertype walks. Treated as immutable for the whole pass.
#[derive(Debug, Default)]
pub struct TypeLookup {
    supers: BTreeMap<String, String>,
}

impl TypeLookup {
    pub fn new() -> TypeLookup {
        TypeLookup::default()
    }

    pub fn from_decls(decls: &[TypeDecl]) -> TypeLookup {
        let mut lookup = TypeLookup::new();
        for decl in decls {
            lookup.insert(&decl.name, &decl.super_name);
        }
        lookup
    }

    pub fn insert(&mut self, name: &str, super_name: &str) {
        self.supers.insert(name.to_string(), super_name.to_string());
    }

    pub fn superclass(&self, name: &str) -> Option<&str> {
        self.supers.get(name).map(String::as_str)
    }

    /// Walks `from`'s superclass chain looking for `to`. Unknown types
    /// are assumed to extend `java/lang/Object` directly.
    pub fn is_assignable(&self, from: &str, to: &str) -> bool {
        if to == "java/lang/Object" {
            return true;
        }
        let mut current = from.to_string();
        loop {
            if current == to {
                return true;
            }
            match self.superclass(&current) {
                Some(next) => current = next.to_string(),
                None => return current == "java/lang/Object" && to == "java/lang/Object",
            }
        }
    }

    /// The nearest type both arguments are assignable to.
    pub fn common_supertype(&self, a: &str, b: &str) -> String {
        let mut ancestors = Vec::new();
        let mut current = a.to_string();
        loop {
            ancestors.push(current.clone());
            match self.superclass(&current) {
                Some(next) => current = next.to_string(),
                None => break,
            }
        }
        let mut candidate = b.to_string();
        loop {
            if ancestors.iter().any(|name| *name == candidate) {
                return candidate;
            }
            match self.superclass(&candidate) {
                Some(next) => candidate = next.to_string(),
                None => return "java/lang/Object".to_string(),
            }
        }
    }
}

/// Emits every declared type. Annotation declarations go through a
/// dedicated bodiless path.
pub fn generate(
    types: &[TypeDecl],
    lookup: &TypeLookup,
) -> Result<BTreeMap<String, Vec<u8>>, CodegenError> {
    let mut out = BTreeMap::new();
    for decl in types {
        let bytes = if decl.is_annotation {
            generate_annotation(decl)
        } else {
            generate_type(decl, lookup)?
        };
        out.insert(decl.name.clone(), bytes);
    }
    Ok(out)
}

fn generate_annotation(decl: &TypeDecl) -> Vec<u8> {
    let flags =
        (decl.flags & !access::SUPER) | access::INTERFACE | access::ABSTRACT | access::ANNOTATION;
    let mut writer = ClassWriter::new(&decl.name, "java/lang/Object", flags);
    writer.add_interface("java/lang/annotation/Annotation");
    for method in &decl.methods {
        writer.add_method(
            access::PUBLIC | access::ABSTRACT,
            &method.name,
            &method.descriptor(),
            None,
        );
    }
    if let Some(source) = &decl.source_file {
        writer.set_source_file(source);
    }
    writer.finish()
}

fn generate_type(decl: &TypeDecl, lookup: &TypeLookup) -> Result<Vec<u8>, CodegenError> {
    let mut writer = ClassWriter::new(&decl.name, &decl.super_name, decl.flags);
    for interface in &decl.interfaces {
        writer.add_interface(interface);
    }
    for field in &decl.fields {
        writer.add_field(field.flags, &field.name, &field.ty.descriptor());
    }

    if let Some(init) = &decl.static_init {
        let clinit = MethodDecl {
            name: "<clinit>".to_string(),
            params: Vec::new(),
            return_type: TypeRef::Void,
            flags: access::STATIC,
            body: Some(init.clone()),
            exception_table: Vec::new(),
            param_slots: 0,
        };
        let code = emit_body(&decl.name, &mut writer.pool, lookup, &clinit)?;
        writer.add_method(access::STATIC, "<clinit>", "()V", Some(code));
    }

    for method in &decl.methods {
        let code = match &method.body {
            Some(_) => Some(emit_body(&decl.name, &mut writer.pool, lookup, method)?),
            None => None,
        };
        writer.add_method(method.flags, &method.name, &method.descriptor(), code);
    }

    if let Some(source) = &decl.source_file {
        writer.set_source_file(source);
    }
    Ok(writer.finish())
}

fn emit_body(
    type_name: &str,
    pool: &mut ConstantPool,
    lookup: &TypeLookup,
    method: &MethodDecl,
) -> Result<CodeAttribute, CodegenError> {
    let mut emitter = BodyEmitter {
        type_name,
        pool,
        lookup,
        code: Vec::new(),
        tracker: FrameTracker::new(method.param_slots),
        line_numbers: Vec::new(),
        next_label: FRESH_LABEL_BASE,
    };

    let body = method
        .body
        .as_ref()
        .ok_or_else(|| emitter.internal("emitting a body-less method"))?;
    for inst in body {
        if let Some(ty) = emitter.eval(inst, false)? {
            emitter.discard(&ty)?;
        }
    }
    emitter.emit_default_return(&method.return_type)?;

    let mut exceptions = Vec::new();
    for entry in &method.exception_table {
        let start_pc = emitter.label_pc(entry.start)?;
        let end_pc = emitter.label_pc(entry.end)?;
        let handler_pc = emitter.label_pc(entry.handler)?;
        let catch_type = match &entry.exception {
            Some(name) => emitter.pool.class(name),
            None => 0,
        };
        exceptions.push(ExceptionTableEntry {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        });
    }

    let BodyEmitter {
        mut code,
        tracker,
        line_numbers,
        ..
    } = emitter;
    tracker
        .patch_branches(&mut code)
        .map_err(|err| internal_for(type_name, err))?;

    Ok(CodeAttribute {
        max_stack: tracker.max_stack(),
        max_locals: tracker.max_locals(),
        code,
        exceptions,
        line_numbers,
    })
}

fn internal_for(type_name: &str, err: FrameError) -> CodegenError {
    CodegenError::Internal {
        type_name: type_name.to_string(),
        message: err.to_string(),
    }
}

/// Labels the emitter invents for short-circuit and comparison
/// expansion live above this base so they cannot collide with
/// producer-allocated labels.
const FRESH_LABEL_BASE: u32 = 0x8000_0000;

struct BodyEmitter<'a> {
    type_name: &'a str,
    pool: &'a mut ConstantPool,
    lookup: &'a TypeLookup,
    code: Vec<u8>,
    tracker: FrameTracker,
    line_numbers: Vec<(u16, u16)>,
    next_label: u32,
}

impl BodyEmitter<'_> {
    fn internal(&self, message: impl Into<String>) -> CodegenError {
        CodegenError::Internal {
            type_name: self.type_name.to_string(),
            message: message.into(),
        }
    }

    fn frame(&self, err: FrameError) -> CodegenError {
        internal_for(self.type_name, err)
    }

    fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    /// Resolved bytecode offset of a visited label, for the exception
    /// table.
    fn label_pc(&self, label: LabelId) -> Result<u16, CodegenError> {
        let offset = self
            .tracker
            .offset_of(label)
            .ok_or_else(|| self.internal(format!("unresolved handler label {label:?}")))?;
        u16::try_from(offset)
            .map_err(|_| self.internal("exception range beyond 16-bit code size"))
    }

    fn fresh_label(&mut self) -> LabelId {
        let id = LabelId(self.next_label);
        self.next_label += 1;
        id
    }

    fn push(&mut self, width: Width) {
        self.tracker.push(width);
    }

    fn pop(&mut self, width: Width) -> Result<(), CodegenError> {
        self.tracker.pop(width).map_err(|err| self.frame(err))
    }

    fn push_ty(&mut self, ty: &TypeRef) {
        if let Some(width) = ty.width() {
            self.tracker.push(width);
        }
    }

    fn pop_ty(&mut self, ty: &TypeRef) -> Result<(), CodegenError> {
        if let Some(width) = ty.width() {
            self.pop(width)?;
        }
        Ok(())
    }

    /// Pops a value left on the stack and emits the matching pop
    /// opcode.
    fn discard(&mut self, ty: &TypeRef) -> Result<(), CodegenError> {
        match ty.width() {
            Some(Width::Two) => {
                self.code.push(op::POP2);
                self.pop(Width::Two)
            }
            Some(Width::One) => {
                self.code.push(op::POP);
                self.pop(Width::One)
            }
            None => Ok(()),
        }
    }

    fn emit_u16(&mut self, value: u16) {
        put_u16(&mut self.code, value);
    }

    fn emit_branch(&mut self, opcode: u8, target: LabelId) {
        let opcode_offset = self.offset();
        self.code.push(opcode);
        let operand_pos = self.code.len();
        self.code.extend_from_slice(&[0, 0]);
        self.tracker.refer_label(target, operand_pos, opcode_offset);
    }

    fn define_label(&mut self, label: LabelId) -> Result<(), CodegenError> {
        let offset = self.offset();
        self.tracker
            .define_label(label, offset)
            .map_err(|err| self.frame(err))
    }

    /// A required-value position: the instruction must leave exactly
    /// one value.
    fn eval_value(&mut self, inst: &Inst) -> Result<TypeRef, CodegenError> {
        self.eval(inst, true)?
            .ok_or_else(|| self.internal("expected a value-producing instruction"))
    }

    /// Emits one instruction; returns the type it left on the stack.
    fn eval(&mut self, inst: &Inst, want_value: bool) -> Result<Option<TypeRef>, CodegenError> {
        match inst {
            Inst::Const(constant) => {
                self.emit_const(constant)?;
                Ok(Some(constant.ty()))
            }
            Inst::LoadLocal { slot, ty } => {
                self.emit_load(*slot, ty)?;
                Ok(Some(ty.clone()))
            }
            Inst::StoreLocal { slot, ty, value } => {
                self.eval_value(value)?;
                self.emit_store(*slot, ty)?;
                Ok(None)
            }
            Inst::GetField {
                owner,
                name,
                ty,
                object,
            } => {
                let field = self.pool.field_ref(owner, name, &ty.descriptor());
                match object {
                    Some(object) => {
                        self.eval_value(object)?;
                        self.pop(Width::One)?;
                        self.code.push(op::GETFIELD);
                    }
                    None => self.code.push(op::GETSTATIC),
                }
                self.emit_u16(field);
                self.push_ty(ty);
                Ok(Some(ty.clone()))
            }
            Inst::PutField {
                owner,
                name,
                ty,
                object,
                value,
            } => {
                let field = self.pool.field_ref(owner, name, &ty.descriptor());
                match object {
                    Some(object) => {
                        self.eval_value(object)?;
                        self.eval_value(value)?;
                        self.pop_ty(ty)?;
                        self.pop(Width::One)?;
                        self.code.push(op::PUTFIELD);
                    }
                    None => {
                        self.eval_value(value)?;
                        self.pop_ty(ty)?;
                        self.code.push(op::PUTSTATIC);
                    }
                }
                self.emit_u16(field);
                Ok(None)
            }
            Inst::Invoke {
                kind,
                owner,
                name,
                params,
                ret,
                receiver,
                args,
            } => self.emit_invoke(*kind, owner, name, params, ret, receiver.as_deref(), args),
            Inst::New {
                class,
                ctor_params,
                args,
            } => {
                let class_idx = self.pool.class(class);
                self.code.push(op::NEW);
                self.emit_u16(class_idx);
                self.push(Width::One);
                self.code.push(op::DUP);
                self.push(Width::One);
                for arg in args {
                    self.eval_value(arg)?;
                }
                let descriptor = method_descriptor(ctor_params, &TypeRef::Void);
                let ctor = self.pool.method_ref(class, "<init>", &descriptor);
                self.code.push(op::INVOKESPECIAL);
                self.emit_u16(ctor);
                for param in ctor_params.iter().rev() {
                    self.pop_ty(param)?;
                }
                self.pop(Width::One)?; // the dup'd reference
                Ok(Some(TypeRef::object(class)))
            }
            Inst::NewArray { elem, items } => self.emit_new_array(elem, items),
            Inst::NewList { items } => {
                self.emit_plain_new("java/util/ArrayList")?;
                for item in items {
                    self.code.push(op::DUP);
                    self.push(Width::One);
                    self.eval_value(item)?;
                    let add = self.pool.method_ref(
                        "java/util/ArrayList",
                        "add",
                        "(Ljava/lang/Object;)Z",
                    );
                    self.code.push(op::INVOKEVIRTUAL);
                    self.emit_u16(add);
                    self.pop(Width::One)?; // argument
                    self.pop(Width::One)?; // receiver
                    self.push(Width::One); // boolean result
                    self.code.push(op::POP);
                    self.pop(Width::One)?;
                }
                Ok(Some(TypeRef::object("java/util/ArrayList")))
            }
            Inst::NewMap { entries } => {
                self.emit_plain_new("java/util/HashMap")?;
                for (key, value) in entries {
                    self.code.push(op::DUP);
                    self.push(Width::One);
                    self.eval_value(key)?;
                    self.eval_value(value)?;
                    let put = self.pool.method_ref(
                        "java/util/HashMap",
                        "put",
                        "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
                    );
                    self.code.push(op::INVOKEVIRTUAL);
                    self.emit_u16(put);
                    self.pop(Width::One)?;
                    self.pop(Width::One)?;
                    self.pop(Width::One)?;
                    self.push(Width::One); // previous-value result
                    self.code.push(op::POP);
                    self.pop(Width::One)?;
                }
                Ok(Some(TypeRef::object("java/util/HashMap")))
            }
            Inst::Cast { target, value } => {
                let from = self.eval_value(value)?;
                self.emit_cast(&from, target)?;
                Ok(Some(target.clone()))
            }
            Inst::InstanceOf { class, value } => {
                self.eval_value(value)?;
                let class_idx = self.pool.class(class);
                self.code.push(op::INSTANCEOF);
                self.emit_u16(class_idx);
                self.pop(Width::One)?;
                self.push(Width::One);
                Ok(Some(TypeRef::Boolean))
            }
            Inst::Binary {
                op: bin,
                ty,
                left,
                right,
            } => {
                self.eval_value(left)?;
                let right_ty = self.eval_value(right)?;
                self.emit_binary(*bin, ty, &right_ty)?;
                Ok(Some(ty.clone()))
            }
            Inst::Unary { op: un, ty, operand } => {
                self.eval_value(operand)?;
                self.emit_unary(*un, ty)?;
                Ok(Some(ty.clone()))
            }
            Inst::Compare {
                op: cmp,
                ty,
                left,
                right,
            } => {
                self.eval_value(left)?;
                self.eval_value(right)?;
                self.emit_compare(*cmp, ty)?;
                Ok(Some(TypeRef::Boolean))
            }
            Inst::LogicalAnd { left, right } => {
                self.emit_short_circuit(left, right, true)?;
                Ok(Some(TypeRef::Boolean))
            }
            Inst::LogicalOr { left, right } => {
                self.emit_short_circuit(left, right, false)?;
                Ok(Some(TypeRef::Boolean))
            }
            Inst::Label(label) => {
                self.define_label(*label)?;
                Ok(None)
            }
            Inst::Goto(label) => {
                self.emit_branch(op::GOTO, *label);
                Ok(None)
            }
            Inst::Branch {
                cond,
                operand,
                target,
            } => {
                self.eval_value(operand)?;
                self.pop(Width::One)?;
                let opcode = match cond {
                    Cond::IfTrue => op::IFNE,
                    Cond::IfFalse => op::IFEQ,
                };
                self.emit_branch(opcode, *target);
                Ok(None)
            }
            Inst::MonitorEnter(object) => {
                self.eval_value(object)?;
                self.pop(Width::One)?;
                self.code.push(op::MONITORENTER);
                Ok(None)
            }
            Inst::MonitorExit(object) => {
                self.eval_value(object)?;
                self.pop(Width::One)?;
                self.code.push(op::MONITOREXIT);
                Ok(None)
            }
            Inst::Return(value) => {
                match value {
                    Some(value) => {
                        let ty = self.eval_value(value)?;
                        self.pop_ty(&ty)?;
                        self.code.push(return_op(&ty));
                    }
                    None => self.code.push(op::RETURN),
                }
                Ok(None)
            }
            Inst::Throw(value) => {
                self.eval_value(value)?;
                self.pop(Width::One)?;
                self.code.push(op::ATHROW);
                Ok(None)
            }
            Inst::Line(line) => {
                let pc = u16::try_from(self.offset())
                    .map_err(|_| self.internal("code beyond 16-bit range"))?;
                let line = u16::try_from(*line).unwrap_or(u16::MAX);
                self.line_numbers.push((pc, line));
                Ok(None)
            }
            Inst::PointerGet { wrapper, facts } => {
                if facts.optimizable() {
                    // safe: never captured, target is a direct local
                    let slot = facts.local_slot.unwrap_or(0);
                    self.emit_load(slot, &facts.elem)?;
                    return Ok(Some(facts.elem.clone()));
                }
                self.eval_value(wrapper)?;
                let get = self
                    .pool
                    .method_ref(REF_CLASS, "get", "()Ljava/lang/Object;");
                self.code.push(op::INVOKEVIRTUAL);
                self.emit_u16(get);
                self.pop(Width::One)?;
                self.push(Width::One);
                if let TypeRef::Object(name) = &facts.elem {
                    let class_idx = self.pool.class(name);
                    self.code.push(op::CHECKCAST);
                    self.emit_u16(class_idx);
                    Ok(Some(facts.elem.clone()))
                } else {
                    Ok(Some(TypeRef::object("java/lang/Object")))
                }
            }
            Inst::PointerSet {
                wrapper,
                value,
                facts,
            } => {
                let safe = facts.optimizable()
                    && match (&facts.elem, inst_object_type(value)) {
                        (TypeRef::Object(elem), Some(value_ty)) => {
                            self.lookup.is_assignable(&value_ty, elem)
                        }
                        (TypeRef::Object(_), None) => false,
                        _ => true,
                    };
                if safe {
                    let slot = facts.local_slot.unwrap_or(0);
                    self.eval_value(value)?;
                    self.emit_store(slot, &facts.elem)?;
                    return Ok(None);
                }
                self.eval_value(wrapper)?;
                self.eval_value(value)?;
                let set = self
                    .pool
                    .method_ref(REF_CLASS, "set", "(Ljava/lang/Object;)V");
                self.code.push(op::INVOKEVIRTUAL);
                self.emit_u16(set);
                self.pop(Width::One)?;
                self.pop(Width::One)?;
                Ok(None)
            }
            Inst::Pack(pack) => self.emit_pack(pack, want_value),
        }
    }

    /// All but the last instruction run for effect; residue between
    /// them is auto-popped when requested. A pure trailing getter is
    /// suppressed when the caller does not need the pack's value.
    fn emit_pack(
        &mut self,
        pack: &ValuePack,
        want_value: bool,
    ) -> Result<Option<TypeRef>, CodegenError> {
        let floor = self.tracker.depth();
        let Some((last, body)) = pack.insts.split_last() else {
            return Ok(None);
        };
        for inst in body {
            if let Some(ty) = self.eval(inst, false)? {
                if pack.auto_pop {
                    self.discard(&ty)?;
                }
            }
            if pack.auto_pop {
                // defensive residue check stays byte-accurate: eval
                // accounts for every push, so anything above the floor
                // is leftover the producer meant to drop
                let residue = self.tracker.drain_to(floor);
                for _ in 0..residue {
                    self.code.push(op::POP);
                }
            }
        }
        if !want_value && pack.suppress_trailing_getter && is_pure_getter(last) {
            return Ok(None);
        }
        self.eval(last, want_value)
    }

    fn emit_const(&mut self, constant: &Const) -> Result<(), CodegenError> {
        match constant {
            Const::Null => {
                self.code.push(op::ACONST_NULL);
                self.push(Width::One);
            }
            Const::Int(v) => {
                self.emit_int_const(*v)?;
            }
            Const::Long(v) => {
                match v {
                    0 => self.code.push(op::LCONST_0),
                    1 => self.code.push(op::LCONST_1),
                    _ => {
                        let idx = self.pool.long(*v);
                        self.code.push(op::LDC2_W);
                        self.emit_u16(idx);
                    }
                }
                self.push(Width::Two);
            }
            Const::Float(v) => {
                if *v == 0.0 && v.is_sign_positive() {
                    self.code.push(op::FCONST_0);
                } else if *v == 1.0 {
                    self.code.push(op::FCONST_1);
                } else {
                    let idx = self.pool.float(*v);
                    self.emit_ldc(idx);
                }
                self.push(Width::One);
            }
            Const::Double(v) => {
                if *v == 0.0 && v.is_sign_positive() {
                    self.code.push(op::DCONST_0);
                } else if *v == 1.0 {
                    self.code.push(op::DCONST_1);
                } else {
                    let idx = self.pool.double(*v);
                    self.code.push(op::LDC2_W);
                    self.emit_u16(idx);
                }
                self.push(Width::Two);
            }
            Const::Str(text) => {
                let idx = self.pool.string(text);
                self.emit_ldc(idx);
                self.push(Width::One);
            }
        }
        Ok(())
    }

    fn emit_int_const(&mut self, v: i32) -> Result<(), CodegenError> {
        match v {
            -1 => self.code.push(op::ICONST_M1),
            0..=5 => self.code.push(op::ICONST_0 + v as u8),
            -128..=127 => {
                self.code.push(op::BIPUSH);
                self.code.push(v as i8 as u8);
            }
            -32768..=32767 => {
                self.code.push(op::SIPUSH);
                self.emit_u16(v as i16 as u16);
            }
            _ => {
                let idx = self.pool.integer(v);
                self.emit_ldc(idx);
            }
        }
        self.push(Width::One);
        Ok(())
    }

    fn emit_ldc(&mut self, index: u16) {
        if index <= u16::from(u8::MAX) {
            self.code.push(op::LDC);
            self.code.push(index as u8);
        } else {
            self.code.push(op::LDC_W);
            self.emit_u16(index);
        }
    }

    fn slot_byte(&self, slot: u16) -> Result<u8, CodegenError> {
        u8::try_from(slot).map_err(|_| self.internal(format!("local slot {slot} exceeds 255")))
    }

    fn emit_load(&mut self, slot: u16, ty: &TypeRef) -> Result<(), CodegenError> {
        let opcode = match ty {
            TypeRef::Boolean | TypeRef::Byte | TypeRef::Short | TypeRef::Char | TypeRef::Int => {
                op::ILOAD
            }
            TypeRef::Long => op::LLOAD,
            TypeRef::Float => op::FLOAD,
            TypeRef::Double => op::DLOAD,
            TypeRef::Object(_) | TypeRef::Array(_) => op::ALOAD,
            TypeRef::Void => return Err(self.internal("load of a void local")),
        };
        let byte = self.slot_byte(slot)?;
        self.code.push(opcode);
        self.code.push(byte);
        let width = ty
            .width()
            .ok_or_else(|| self.internal("widthless local load"))?;
        self.tracker.touch_slot(slot, width);
        self.push(width);
        Ok(())
    }

    fn emit_store(&mut self, slot: u16, ty: &TypeRef) -> Result<(), CodegenError> {
        let opcode = match ty {
            TypeRef::Boolean | TypeRef::Byte | TypeRef::Short | TypeRef::Char | TypeRef::Int => {
                op::ISTORE
            }
            TypeRef::Long => op::LSTORE,
            TypeRef::Float => op::FSTORE,
            TypeRef::Double => op::DSTORE,
            TypeRef::Object(_) | TypeRef::Array(_) => op::ASTORE,
            TypeRef::Void => return Err(self.internal("store of a void local")),
        };
        let byte = self.slot_byte(slot)?;
        let width = ty
            .width()
            .ok_or_else(|| self.internal("widthless local store"))?;
        self.pop(width)?;
        self.code.push(opcode);
        self.code.push(byte);
        self.tracker.touch_slot(slot, width);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_invoke(
        &mut self,
        kind: InvokeKind,
        owner: &str,
        name: &str,
        params: &[TypeRef],
        ret: &TypeRef,
        receiver: Option<&Inst>,
        args: &[Inst],
    ) -> Result<Option<TypeRef>, CodegenError> {
        if matches!(kind, InvokeKind::Static) != receiver.is_none() {
            return Err(self.internal("receiver presence does not match invoke kind"));
        }
        if let Some(receiver) = receiver {
            self.eval_value(receiver)?;
        }
        for arg in args {
            self.eval_value(arg)?;
        }

        let descriptor = method_descriptor(params, ret);
        match kind {
            InvokeKind::Interface => {
                let idx = self.pool.interface_method_ref(owner, name, &descriptor);
                self.code.push(op::INVOKEINTERFACE);
                self.emit_u16(idx);
                let count: u16 = 1 + params.iter().map(TypeRef::slot_words).sum::<u16>();
                self.code.push(count as u8);
                self.code.push(0);
            }
            InvokeKind::Static => {
                let idx = self.pool.method_ref(owner, name, &descriptor);
                self.code.push(op::INVOKESTATIC);
                self.emit_u16(idx);
            }
            InvokeKind::Special => {
                let idx = self.pool.method_ref(owner, name, &descriptor);
                self.code.push(op::INVOKESPECIAL);
                self.emit_u16(idx);
            }
            InvokeKind::Virtual | InvokeKind::WithCapture => {
                let idx = self.pool.method_ref(owner, name, &descriptor);
                self.code.push(op::INVOKEVIRTUAL);
                self.emit_u16(idx);
            }
        }

        for param in params.iter().rev() {
            self.pop_ty(param)?;
        }
        if receiver.is_some() {
            self.pop(Width::One)?;
        }
        self.push_ty(ret);
        Ok(if ret.is_void() { None } else { Some(ret.clone()) })
    }

    /// `new` + `dup` + no-arg constructor for collection literals.
    fn emit_plain_new(&mut self, class: &str) -> Result<(), CodegenError> {
        let class_idx = self.pool.class(class);
        self.code.push(op::NEW);
        self.emit_u16(class_idx);
        self.push(Width::One);
        self.code.push(op::DUP);
        self.push(Width::One);
        let ctor = self.pool.method_ref(class, "<init>", "()V");
        self.code.push(op::INVOKESPECIAL);
        self.emit_u16(ctor);
        self.pop(Width::One)?;
        Ok(())
    }

    fn emit_new_array(
        &mut self,
        elem: &TypeRef,
        items: &[Inst],
    ) -> Result<Option<TypeRef>, CodegenError> {
        let len = i32::try_from(items.len())
            .map_err(|_| self.internal("array literal too long"))?;
        self.emit_int_const(len)?;
        match elem {
            TypeRef::Object(name) => {
                let class_idx = self.pool.class(name);
                self.code.push(op::ANEWARRAY);
                self.emit_u16(class_idx);
            }
            TypeRef::Array(_) => {
                let descriptor = elem.descriptor();
                let class_idx = self.pool.class(&descriptor);
                self.code.push(op::ANEWARRAY);
                self.emit_u16(class_idx);
            }
            primitive => {
                let atype = newarray_atype(primitive)
                    .ok_or_else(|| self.internal("array of an unsupported element type"))?;
                self.code.push(op::NEWARRAY);
                self.code.push(atype);
            }
        }
        self.pop(Width::One)?; // length
        self.push(Width::One); // array ref

        let store = array_store_op(elem);
        for (index, item) in items.iter().enumerate() {
            self.code.push(op::DUP);
            self.push(Width::One);
            self.emit_int_const(index as i32)?;
            self.eval_value(item)?;
            self.code.push(store);
            self.pop_ty(elem)?;
            self.pop(Width::One)?; // index
            self.pop(Width::One)?; // array ref copy
        }
        Ok(Some(TypeRef::array(elem.clone())))
    }

    fn emit_cast(&mut self, from: &TypeRef, to: &TypeRef) -> Result<(), CodegenError> {
        if from == to {
            return Ok(());
        }
        match (from, to) {
            (TypeRef::Object(_) | TypeRef::Array(_), TypeRef::Object(name)) => {
                let class_idx = self.pool.class(name);
                self.code.push(op::CHECKCAST);
                self.emit_u16(class_idx);
                Ok(())
            }
            (TypeRef::Object(_) | TypeRef::Array(_), TypeRef::Array(_)) => {
                // array class entries use the descriptor form
                let class_idx = self.pool.class(&to.descriptor());
                self.code.push(op::CHECKCAST);
                self.emit_u16(class_idx);
                Ok(())
            }
            _ => {
                let opcode = conversion_op(from, to)
                    .ok_or_else(|| self.internal(format!("no conversion {from:?} -> {to:?}")))?;
                self.pop_ty(from)?;
                self.code.push(opcode);
                self.push_ty(to);
                Ok(())
            }
        }
    }

    fn emit_binary(
        &mut self,
        bin: BinOp,
        ty: &TypeRef,
        right_ty: &TypeRef,
    ) -> Result<(), CodegenError> {
        let base = match (ty, bin) {
            (TypeRef::Int, _) => int_binary_op(bin),
            (TypeRef::Long, _) => long_binary_op(bin),
            (TypeRef::Float, BinOp::Add) => Some(op::FADD),
            (TypeRef::Float, BinOp::Sub) => Some(op::FSUB),
            (TypeRef::Float, BinOp::Mul) => Some(op::FMUL),
            (TypeRef::Float, BinOp::Div) => Some(op::FDIV),
            (TypeRef::Float, BinOp::Rem) => Some(op::FREM),
            (TypeRef::Double, BinOp::Add) => Some(op::DADD),
            (TypeRef::Double, BinOp::Sub) => Some(op::DSUB),
            (TypeRef::Double, BinOp::Mul) => Some(op::DMUL),
            (TypeRef::Double, BinOp::Div) => Some(op::DDIV),
            (TypeRef::Double, BinOp::Rem) => Some(op::DREM),
            _ => None,
        };
        let opcode =
            base.ok_or_else(|| self.internal(format!("no {bin:?} instruction for {ty:?}")))?;
        self.pop_ty(right_ty)?;
        self.pop_ty(ty)?;
        self.code.push(opcode);
        self.push_ty(ty);
        Ok(())
    }

    fn emit_unary(&mut self, un: UnOp, ty: &TypeRef) -> Result<(), CodegenError> {
        match un {
            UnOp::Neg => {
                let opcode = match ty {
                    TypeRef::Int => op::INEG,
                    TypeRef::Long => op::LNEG,
                    TypeRef::Float => op::FNEG,
                    TypeRef::Double => op::DNEG,
                    other => return Err(self.internal(format!("negation of {other:?}"))),
                };
                self.code.push(opcode);
                Ok(())
            }
            UnOp::BitNot => match ty {
                TypeRef::Int => {
                    self.code.push(op::ICONST_M1);
                    self.push(Width::One);
                    self.code.push(op::IXOR);
                    self.pop(Width::One)?;
                    Ok(())
                }
                TypeRef::Long => {
                    let idx = self.pool.long(-1);
                    self.code.push(op::LDC2_W);
                    self.emit_u16(idx);
                    self.push(Width::Two);
                    self.code.push(op::LXOR);
                    self.pop(Width::Two)?;
                    Ok(())
                }
                other => Err(self.internal(format!("complement of {other:?}"))),
            },
        }
    }

    /// `and == true`: both operands must be nonzero. Expands to jumps
    /// around `iconst_1`/`iconst_0`.
    fn emit_short_circuit(
        &mut self,
        left: &Inst,
        right: &Inst,
        and: bool,
    ) -> Result<(), CodegenError> {
        let shortcut = self.fresh_label();
        let end = self.fresh_label();
        let (test, early, late) = if and {
            (op::IFEQ, op::ICONST_0, op::ICONST_1)
        } else {
            (op::IFNE, op::ICONST_1, op::ICONST_0)
        };

        self.eval_value(left)?;
        self.pop(Width::One)?;
        self.emit_branch(test, shortcut);
        self.eval_value(right)?;
        self.pop(Width::One)?;
        self.emit_branch(test, shortcut);
        self.code.push(late);
        self.push(Width::One);
        self.emit_branch(op::GOTO, end);
        self.pop(Width::One)?; // value carried over the goto
        self.define_label(shortcut)?;
        self.code.push(early);
        self.push(Width::One);
        self.define_label(end)?;
        Ok(())
    }

    fn emit_compare(&mut self, cmp: CmpOp, ty: &TypeRef) -> Result<(), CodegenError> {
        let truth = self.fresh_label();
        let end = self.fresh_label();
        match ty {
            TypeRef::Int
            | TypeRef::Boolean
            | TypeRef::Byte
            | TypeRef::Short
            | TypeRef::Char => {
                let opcode = match cmp {
                    CmpOp::Eq => op::IF_ICMPEQ,
                    CmpOp::Ne => op::IF_ICMPNE,
                    CmpOp::Lt => op::IF_ICMPLT,
                    CmpOp::Le => op::IF_ICMPLE,
                    CmpOp::Gt => op::IF_ICMPGT,
                    CmpOp::Ge => op::IF_ICMPGE,
                };
                self.pop(Width::One)?;
                self.pop(Width::One)?;
                self.emit_branch(opcode, truth);
            }
            TypeRef::Long | TypeRef::Float | TypeRef::Double => {
                let (cmp_opcode, width) = match ty {
                    TypeRef::Long => (op::LCMP, Width::Two),
                    TypeRef::Float => (op::FCMPL, Width::One),
                    _ => (op::DCMPL, Width::Two),
                };
                self.code.push(cmp_opcode);
                self.pop(width)?;
                self.pop(width)?;
                self.push(Width::One);
                let opcode = match cmp {
                    CmpOp::Eq => op::IFEQ,
                    CmpOp::Ne => op::IFNE,
                    CmpOp::Lt => op::IFLT,
                    CmpOp::Le => op::IFLE,
                    CmpOp::Gt => op::IFGT,
                    CmpOp::Ge => op::IFGE,
                };
                self.pop(Width::One)?;
                self.emit_branch(opcode, truth);
            }
            other => return Err(self.internal(format!("comparison over {other:?}"))),
        }
        self.code.push(op::ICONST_0);
        self.push(Width::One);
        self.emit_branch(op::GOTO, end);
        self.pop(Width::One)?;
        self.define_label(truth)?;
        self.code.push(op::ICONST_1);
        self.push(Width::One);
        self.define_label(end)?;
        Ok(())
    }

    /// Appended after every body so fall-through is legal: default
    /// literal plus a typed return.
    fn emit_default_return(&mut self, ret: &TypeRef) -> Result<(), CodegenError> {
        match ret {
            TypeRef::Void => self.code.push(op::RETURN),
            TypeRef::Boolean | TypeRef::Byte | TypeRef::Short | TypeRef::Char | TypeRef::Int => {
                self.code.push(op::ICONST_0);
                self.push(Width::One);
                self.pop(Width::One)?;
                self.code.push(op::IRETURN);
            }
            TypeRef::Long => {
                self.code.push(op::LCONST_0);
                self.code.push(op::LRETURN);
            }
            TypeRef::Float => {
                self.code.push(op::FCONST_0);
                self.code.push(op::FRETURN);
            }
            TypeRef::Double => {
                self.code.push(op::DCONST_0);
                self.code.push(op::DRETURN);
            }
            TypeRef::Object(_) | TypeRef::Array(_) => {
                self.code.push(op::ACONST_NULL);
                self.code.push(op::ARETURN);
            }
        }
        Ok(())
    }
}

/// Value accessors with no side effects; a pack may drop one of these
/// as its trailing instruction when the result is unused.
fn is_pure_getter(inst: &Inst) -> bool {
    matches!(
        inst,
        Inst::Const(_) | Inst::LoadLocal { .. } | Inst::GetField { .. } | Inst::PointerGet { .. }
    )
}

/// Best-effort static type of a value instruction, used by the
/// pointer peephole's element-type check.
fn inst_object_type(inst: &Inst) -> Option<String> {
    let ty = match inst {
        Inst::Const(c) => c.ty(),
        Inst::LoadLocal { ty, .. } => ty.clone(),
        Inst::GetField { ty, .. } => ty.clone(),
        Inst::Invoke { ret, .. } => ret.clone(),
        Inst::New { class, .. } => TypeRef::object(class),
        Inst::Cast { target, .. } => target.clone(),
        Inst::PointerGet { facts, .. } => facts.elem.clone(),
        _ => return None,
    };
    match ty {
        TypeRef::Object(name) => Some(name),
        _ => None,
    }
}

fn return_op(ty: &TypeRef) -> u8 {
    match ty {
        TypeRef::Boolean | TypeRef::Byte | TypeRef::Short | TypeRef::Char | TypeRef::Int => {
            op::IRETURN
        }
        TypeRef::Long => op::LRETURN,
        TypeRef::Float => op::FRETURN,
        TypeRef::Double => op::DRETURN,
        _ => op::ARETURN,
    }
}

fn int_binary_op(bin: BinOp) -> Option<u8> {
    Some(match bin {
        BinOp::Add => op::IADD,
        BinOp::Sub => op::ISUB,
        BinOp::Mul => op::IMUL,
        BinOp::Div => op::IDIV,
        BinOp::Rem => op::IREM,
        BinOp::And => op::IAND,
        BinOp::Or => op::IOR,
        BinOp::Xor => op::IXOR,
        BinOp::Shl => op::ISHL,
        BinOp::Shr => op::ISHR,
        BinOp::Ushr => op::IUSHR,
    })
}

fn long_binary_op(bin: BinOp) -> Option<u8> {
    Some(match bin {
        BinOp::Add => op::LADD,
        BinOp::Sub => op::LSUB,
        BinOp::Mul => op::LMUL,
        BinOp::Div => op::LDIV,
        BinOp::Rem => op::LREM,
        BinOp::And => op::LAND,
        BinOp::Or => op::LOR,
        BinOp::Xor => op::LXOR,
        BinOp::Shl => op::LSHL,
        BinOp::Shr => op::LSHR,
        BinOp::Ushr => op::LUSHR,
    })
}

fn conversion_op(from: &TypeRef, to: &TypeRef) -> Option<u8> {
    Some(match (from, to) {
        (TypeRef::Int, TypeRef::Long) => op::I2L,
        (TypeRef::Int, TypeRef::Float) => op::I2F,
        (TypeRef::Int, TypeRef::Double) => op::I2D,
        (TypeRef::Long, TypeRef::Int) => op::L2I,
        (TypeRef::Long, TypeRef::Float) => op::L2F,
        (TypeRef::Long, TypeRef::Double) => op::L2D,
        (TypeRef::Float, TypeRef::Int) => op::F2I,
        (TypeRef::Float, TypeRef::Long) => op::F2L,
        (TypeRef::Float, TypeRef::Double) => op::F2D,
        (TypeRef::Double, TypeRef::Int) => op::D2I,
        (TypeRef::Double, TypeRef::Long) => op::D2L,
        (TypeRef::Double, TypeRef::Float) => op::D2F,
        _ => return None,
    })
}

fn newarray_atype(ty: &TypeRef) -> Option<u8> {
    Some(match ty {
        TypeRef::Boolean => 4,
        TypeRef::Char => 5,
        TypeRef::Float => 6,
        TypeRef::Double => 7,
        TypeRef::Byte => 8,
        TypeRef::Short => 9,
        TypeRef::Int => 10,
        TypeRef::Long => 11,
        _ => return None,
    })
}

fn array_store_op(elem: &TypeRef) -> u8 {
    match elem {
        TypeRef::Boolean | TypeRef::Byte => op::BASTORE,
        TypeRef::Char => op::CASTORE,
        TypeRef::Short => op::SASTORE,
        TypeRef::Int => op::IASTORE,
        TypeRef::Long => op::LASTORE,
        TypeRef::Float => op::FASTORE,
        TypeRef::Double => op::DASTORE,
        _ => op::AASTORE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ExceptionEntry, FieldDecl, PointerFacts};

    fn int_method(name: &str, body: Vec<Inst>) -> MethodDecl {
        MethodDecl {
            name: name.to_string(),
            params: Vec::new(),
            return_type: TypeRef::Void,
            flags: access::PUBLIC | access::STATIC,
            body: Some(body),
            exception_table: Vec::new(),
            param_slots: 0,
        }
    }

    fn emit(method: &MethodDecl) -> CodeAttribute {
        let mut pool = ConstantPool::new();
        let lookup = TypeLookup::new();
        emit_body("demo/Main", &mut pool, &lookup, method).expect("emission")
    }

    fn store_add_one_two() -> Inst {
        Inst::StoreLocal {
            slot: 0,
            ty: TypeRef::Int,
            value: Box::new(Inst::Binary {
                op: BinOp::Add,
                ty: TypeRef::Int,
                left: Box::new(Inst::Const(Const::Int(1))),
                right: Box::new(Inst::Const(Const::Int(2))),
            }),
        }
    }

    #[test]
    fn store_of_add_needs_two_stack_words() {
        // the typed equivalent of `val x = 1 + 2`
        let method = int_method("run", vec![store_add_one_two()]);
        let code = emit(&method);
        assert!(code.max_stack >= 2);
        assert!(code.max_locals >= 1);
        assert_eq!(
            &code.code[..5],
            &[op::ICONST_1, op::ICONST_2, op::IADD, op::ISTORE, 0]
        );
    }

    #[test]
    fn wide_arithmetic_needs_four_words() {
        let method = int_method(
            "run",
            vec![Inst::StoreLocal {
                slot: 0,
                ty: TypeRef::Long,
                value: Box::new(Inst::Binary {
                    op: BinOp::Add,
                    ty: TypeRef::Long,
                    left: Box::new(Inst::Const(Const::Long(1))),
                    right: Box::new(Inst::Const(Const::Long(2))),
                }),
            }],
        );
        let code = emit(&method);
        assert_eq!(code.max_stack, 4);
        assert_eq!(code.max_locals, 2);
    }

    #[test]
    fn short_circuit_and_expands_to_jumps() {
        let method = int_method(
            "run",
            vec![Inst::StoreLocal {
                slot: 0,
                ty: TypeRef::Boolean,
                value: Box::new(Inst::LogicalAnd {
                    left: Box::new(Inst::Const(Const::Int(1))),
                    right: Box::new(Inst::Const(Const::Int(0))),
                }),
            }],
        );
        let code = emit(&method);
        let ifeqs = code.code.iter().filter(|&&b| b == op::IFEQ).count();
        assert_eq!(ifeqs, 2);
        assert!(code.code.contains(&op::GOTO));
        // one word at a time: max stack stays 1
        assert_eq!(code.max_stack, 1);
    }

    #[test]
    fn guaranteed_default_return_matches_the_type() {
        let void_method = int_method("run", Vec::new());
        assert_eq!(emit(&void_method).code, vec![op::RETURN]);

        let mut int_ret = int_method("run", Vec::new());
        int_ret.return_type = TypeRef::Int;
        assert_eq!(emit(&int_ret).code, vec![op::ICONST_0, op::IRETURN]);

        let mut obj_ret = int_method("run", Vec::new());
        obj_ret.return_type = TypeRef::object("java/lang/String");
        assert_eq!(emit(&obj_ret).code, vec![op::ACONST_NULL, op::ARETURN]);
    }

    #[test]
    fn uncaptured_pointer_compiles_to_direct_local_access() {
        let facts = PointerFacts {
            captured: false,
            elem: TypeRef::Int,
            local_slot: Some(3),
        };
        let method = int_method(
            "run",
            vec![Inst::StoreLocal {
                slot: 0,
                ty: TypeRef::Int,
                value: Box::new(Inst::PointerGet {
                    wrapper: Box::new(Inst::LoadLocal {
                        slot: 1,
                        ty: TypeRef::object(REF_CLASS),
                    }),
                    facts,
                }),
            }],
        );
        let code = emit(&method);
        assert_eq!(&code.code[..2], &[op::ILOAD, 3]);
        assert!(!code.code.contains(&op::INVOKEVIRTUAL));
    }

    #[test]
    fn captured_pointer_stays_a_wrapper_call() {
        let facts = PointerFacts {
            captured: true,
            elem: TypeRef::object("java/lang/Integer"),
            local_slot: Some(3),
        };
        let method = int_method(
            "run",
            vec![Inst::StoreLocal {
                slot: 0,
                ty: TypeRef::object("java/lang/Integer"),
                value: Box::new(Inst::PointerGet {
                    wrapper: Box::new(Inst::LoadLocal {
                        slot: 1,
                        ty: TypeRef::object(REF_CLASS),
                    }),
                    facts,
                }),
            }],
        );
        let code = emit(&method);
        assert!(code.code.contains(&op::INVOKEVIRTUAL));
        assert!(code.code.contains(&op::CHECKCAST));
    }

    #[test]
    fn doubly_nested_capture_is_still_conservative() {
        // capture at any depth disables the peephole
        let facts = PointerFacts {
            captured: true,
            elem: TypeRef::Int,
            local_slot: Some(2),
        };
        assert!(!facts.optimizable());
    }

    #[test]
    fn value_pack_auto_pops_residue_and_suppresses_trailing_getter() {
        let pack = Inst::Pack(ValuePack {
            insts: vec![
                // evaluated for effect, leaves residue
                Inst::Const(Const::Int(42)),
                // trailing pure getter
                Inst::LoadLocal {
                    slot: 0,
                    ty: TypeRef::Int,
                },
            ],
            auto_pop: true,
            suppress_trailing_getter: true,
        });
        let method = int_method("run", vec![pack]);
        let code = emit(&method);
        // bipush 42, pop, return: the trailing load is suppressed
        assert_eq!(code.code, vec![op::BIPUSH, 42, op::POP, op::RETURN]);
    }

    #[test]
    fn value_pack_keeps_the_value_when_wanted() {
        let pack = Inst::Pack(ValuePack {
            insts: vec![
                Inst::Const(Const::Int(42)),
                Inst::LoadLocal {
                    slot: 0,
                    ty: TypeRef::Int,
                },
            ],
            auto_pop: true,
            suppress_trailing_getter: true,
        });
        let method = int_method(
            "run",
            vec![Inst::StoreLocal {
                slot: 1,
                ty: TypeRef::Int,
                value: Box::new(pack),
            }],
        );
        let code = emit(&method);
        assert_eq!(
            code.code,
            vec![op::BIPUSH, 42, op::POP, op::ILOAD, 0, op::ISTORE, 1, op::RETURN]
        );
    }

    #[test]
    fn throw_evaluates_and_raises() {
        let method = int_method(
            "run",
            vec![Inst::Throw(Box::new(Inst::New {
                class: "java/lang/RuntimeException".to_string(),
                ctor_params: Vec::new(),
                args: Vec::new(),
            }))],
        );
        let code = emit(&method);
        assert_eq!(code.code.last(), Some(&op::RETURN));
        assert!(code.code.contains(&op::ATHROW));
        assert!(code.code.contains(&op::NEW));
    }

    #[test]
    fn branch_to_an_unvisited_label_is_internal_error() {
        let method = int_method("run", vec![Inst::Goto(LabelId(9))]);
        let mut pool = ConstantPool::new();
        let lookup = TypeLookup::new();
        let err = emit_body("demo/Main", &mut pool, &lookup, &method).unwrap_err();
        assert!(err.to_string().contains("never visited"));
    }

    #[test]
    fn stack_underflow_is_internal_error() {
        let method = int_method(
            "run",
            vec![Inst::Branch {
                cond: Cond::IfTrue,
                operand: Box::new(Inst::Pack(ValuePack {
                    insts: Vec::new(),
                    auto_pop: false,
                    suppress_trailing_getter: false,
                })),
                target: LabelId(0),
            }],
        );
        let mut pool = ConstantPool::new();
        let lookup = TypeLookup::new();
        assert!(emit_body("demo/Main", &mut pool, &lookup, &method).is_err());
    }

    #[test]
    fn loops_resolve_backward_and_forward_branches() {
        let top = LabelId(0);
        let out = LabelId(1);
        let method = int_method(
            "run",
            vec![
                Inst::Label(top),
                Inst::Branch {
                    cond: Cond::IfFalse,
                    operand: Box::new(Inst::LoadLocal {
                        slot: 0,
                        ty: TypeRef::Int,
                    }),
                    target: out,
                },
                Inst::Goto(top),
                Inst::Label(out),
            ],
        );
        let code = emit(&method);
        // ifeq forward to offset 8, goto backward to 0
        assert_eq!(code.code[2], op::IFEQ);
        let fwd = i16::from_be_bytes([code.code[3], code.code[4]]);
        assert_eq!(2 + fwd as i32, 8);
        assert_eq!(code.code[5], op::GOTO);
        let back = i16::from_be_bytes([code.code[6], code.code[7]]);
        assert_eq!(5 + back as i32, 0);
    }

    #[test]
    fn exception_table_resolves_through_labels() {
        let start = LabelId(0);
        let end = LabelId(1);
        let handler = LabelId(2);
        let mut method = int_method(
            "run",
            vec![
                Inst::Label(start),
                store_add_one_two(),
                Inst::Label(end),
                Inst::Goto(LabelId(3)),
                Inst::Label(handler),
                Inst::StoreLocal {
                    slot: 1,
                    ty: TypeRef::object("java/lang/Exception"),
                    value: Box::new(Inst::Const(Const::Null)),
                },
                Inst::Label(LabelId(3)),
            ],
        );
        method.exception_table.push(ExceptionEntry {
            start,
            end,
            handler,
            exception: Some("java/lang/Exception".to_string()),
        });
        let code = emit(&method);
        assert_eq!(code.exceptions.len(), 1);
        let row = &code.exceptions[0];
        assert_eq!(row.start_pc, 0);
        assert!(row.end_pc > row.start_pc);
        assert!(row.handler_pc >= row.end_pc);
        assert_ne!(row.catch_type, 0);
    }

    #[test]
    fn generate_emits_wellformed_class_bytes() {
        let mut decl = TypeDecl::new("demo/Main");
        decl.fields.push(FieldDecl {
            name: "counter".to_string(),
            ty: TypeRef::Int,
            flags: access::PRIVATE | access::STATIC,
        });
        decl.methods.push(int_method("run", vec![store_add_one_two()]));
        let lookup = TypeLookup::from_decls(std::slice::from_ref(&decl));
        let out = generate(std::slice::from_ref(&decl), &lookup).expect("generation");
        let bytes = out.get("demo/Main").expect("emitted type");
        assert_eq!(&bytes[0..4], &[0xca, 0xfe, 0xba, 0xbe]);
        assert_eq!(u16::from_be_bytes([bytes[6], bytes[7]]), 52);
    }

    #[test]
    fn annotation_declarations_take_the_bodiless_path() {
        let mut decl = TypeDecl::new("demo/Marker");
        decl.is_annotation = true;
        decl.methods.push(MethodDecl {
            name: "value".to_string(),
            params: Vec::new(),
            return_type: TypeRef::object("java/lang/String"),
            flags: access::PUBLIC | access::ABSTRACT,
            body: None,
            exception_table: Vec::new(),
            param_slots: 0,
        });
        let lookup = TypeLookup::new();
        let out = generate(std::slice::from_ref(&decl), &lookup).expect("generation");
        let bytes = out.get("demo/Marker").expect("emitted type");
        assert_eq!(&bytes[0..4], &[0xca, 0xfe, 0xba, 0xbe]);
    }

    #[test]
    fn supertype_walks() {
        let mut lookup = TypeLookup::new();
        lookup.insert("demo/Base", "java/lang/Object");
        lookup.insert("demo/Mid", "demo/Base");
        lookup.insert("demo/Leaf", "demo/Mid");
        lookup.insert("demo/Other", "demo/Base");
        assert!(lookup.is_assignable("demo/Leaf", "demo/Base"));
        assert!(!lookup.is_assignable("demo/Base", "demo/Leaf"));
        assert_eq!(lookup.common_supertype("demo/Leaf", "demo/Other"), "demo/Base");
        assert_eq!(
            lookup.common_supertype("demo/Leaf", "java/lang/String"),
            "java/lang/Object"
        );
    }
}
