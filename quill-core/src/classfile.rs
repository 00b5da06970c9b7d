//! Class-file assembly primitives.
//!
//! A small builder API over the JVM class-file binary format: a
//! deduplicating constant pool, method/field info records, the Code
//! attribute with exception table and LineNumberTable, and the opcode
//! catalog the generator emits. Produces version 52.0 (Java 8) files;
//! no StackMapTable is written.

use std::collections::HashMap;

pub const MAGIC: u32 = 0xCAFE_BABE;
pub const MAJOR_VERSION: u16 = 52;
pub const MINOR_VERSION: u16 = 0;

/// Opcodes used by the generator. Loads and stores use the generic
/// one-byte-index forms throughout.
#[allow(dead_code)]
pub mod op {
    pub const NOP: u8 = 0x00;
    pub const ACONST_NULL: u8 = 0x01;
    pub const ICONST_M1: u8 = 0x02;
    pub const ICONST_0: u8 = 0x03;
    pub const ICONST_1: u8 = 0x04;
    pub const ICONST_2: u8 = 0x05;
    pub const ICONST_3: u8 = 0x06;
    pub const ICONST_4: u8 = 0x07;
    pub const ICONST_5: u8 = 0x08;
    pub const LCONST_0: u8 = 0x09;
    pub const LCONST_1: u8 = 0x0a;
    pub const FCONST_0: u8 = 0x0b;
    pub const FCONST_1: u8 = 0x0c;
    pub const DCONST_0: u8 = 0x0e;
    pub const DCONST_1: u8 = 0x0f;
    pub const BIPUSH: u8 = 0x10;
    pub const SIPUSH: u8 = 0x11;
    pub const LDC: u8 = 0x12;
    pub const LDC_W: u8 = 0x13;
    pub const LDC2_W: u8 = 0x14;
    pub const ILOAD: u8 = 0x15;
    pub const LLOAD: u8 = 0x16;
    pub const FLOAD: u8 = 0x17;
    pub const DLOAD: u8 = 0x18;
    pub const ALOAD: u8 = 0x19;
    pub const ISTORE: u8 = 0x36;
    pub const LSTORE: u8 = 0x37;
    pub const FSTORE: u8 = 0x38;
    pub const DSTORE: u8 = 0x39;
    pub const ASTORE: u8 = 0x3a;
    pub const IASTORE: u8 = 0x4f;
    pub const LASTORE: u8 = 0x50;
    pub const FASTORE: u8 = 0x51;
    pub const DASTORE: u8 = 0x52;
    pub const AASTORE: u8 = 0x53;
    pub const BASTORE: u8 = 0x54;
    pub const CASTORE: u8 = 0x55;
    pub const SASTORE: u8 = 0x56;
    pub const POP: u8 = 0x57;
    pub const POP2: u8 = 0x58;
    pub const DUP: u8 = 0x59;
    pub const IADD: u8 = 0x60;
    pub const LADD: u8 = 0x61;
    pub const FADD: u8 = 0x62;
    pub const DADD: u8 = 0x63;
    pub const ISUB: u8 = 0x64;
    pub const LSUB: u8 = 0x65;
    pub const FSUB: u8 = 0x66;
    pub const DSUB: u8 = 0x67;
    pub const IMUL: u8 = 0x68;
    pub const LMUL: u8 = 0x69;
    pub const FMUL: u8 = 0x6a;
    pub const DMUL: u8 = 0x6b;
    pub const IDIV: u8 = 0x6c;
    pub const LDIV: u8 = 0x6d;
    pub const FDIV: u8 = 0x6e;
    pub const DDIV: u8 = 0x6f;
    pub const IREM: u8 = 0x70;
    pub const LREM: u8 = 0x71;
    pub const FREM: u8 = 0x72;
    pub const DREM: u8 = 0x73;
    pub const INEG: u8 = 0x74;
    pub const LNEG: u8 = 0x75;
    pub const FNEG: u8 = 0x76;
    pub const DNEG: u8 = 0x77;
    pub const ISHL: u8 = 0x78;
    pub const LSHL: u8 = 0x79;
    pub const ISHR: u8 = 0x7a;
    pub const LSHR: u8 = 0x7b;
    pub const IUSHR: u8 = 0x7c;
    pub const LUSHR: u8 = 0x7d;
    pub const IAND: u8 = 0x7e;
    pub const LAND: u8 = 0x7f;
    pub const IOR: u8 = 0x80;
    pub const LOR: u8 = 0x81;
    pub const IXOR: u8 = 0x82;
    pub const LXOR: u8 = 0x83;
    pub const I2L: u8 = 0x85;
    pub const I2F: u8 = 0x86;
    pub const I2D: u8 = 0x87;
    pub const L2I: u8 = 0x88;
    pub const L2F: u8 = 0x89;
    pub const L2D: u8 = 0x8a;
    pub const F2I: u8 = 0x8b;
    pub const F2L: u8 = 0x8c;
    pub const F2D: u8 = 0x8d;
    pub const D2I: u8 = 0x8e;
    pub const D2L: u8 = 0x8f;
    pub const D2F: u8 = 0x90;
    pub const LCMP: u8 = 0x94;
    pub const FCMPL: u8 = 0x95;
    pub const DCMPL: u8 = 0x97;
    pub const IFEQ: u8 = 0x99;
    pub const IFNE: u8 = 0x9a;
    pub const IFLT: u8 = 0x9b;
    pub const IFGE: u8 = 0x9c;
    pub const IFGT: u8 = 0x9d;
    pub const IFLE: u8 = 0x9e;
    pub const IF_ICMPEQ: u8 = 0x9f;
    pub const IF_ICMPNE: u8 = 0xa0;
    pub const IF_ICMPLT: u8 = 0xa1;
    pub const IF_ICMPGE: u8 = 0xa2;
    pub const IF_ICMPGT: u8 = 0xa3;
    pub const IF_ICMPLE: u8 = 0xa4;
    pub const GOTO: u8 = 0xa7;
    pub const IRETURN: u8 = 0xac;
    pub const LRETURN: u8 = 0xad;
    pub const FRETURN: u8 = 0xae;
    pub const DRETURN: u8 = 0xaf;
    pub const ARETURN: u8 = 0xb0;
    pub const RETURN: u8 = 0xb1;
    pub const GETSTATIC: u8 = 0xb2;
    pub const PUTSTATIC: u8 = 0xb3;
    pub const GETFIELD: u8 = 0xb4;
    pub const PUTFIELD: u8 = 0xb5;
    pub const INVOKEVIRTUAL: u8 = 0xb6;
    pub const INVOKESPECIAL: u8 = 0xb7;
    pub const INVOKESTATIC: u8 = 0xb8;
    pub const INVOKEINTERFACE: u8 = 0xb9;
    pub const NEW: u8 = 0xbb;
    pub const NEWARRAY: u8 = 0xbc;
    pub const ANEWARRAY: u8 = 0xbd;
    pub const ATHROW: u8 = 0xbf;
    pub const CHECKCAST: u8 = 0xc0;
    pub const INSTANCEOF: u8 = 0xc1;
    pub const MONITORENTER: u8 = 0xc2;
    pub const MONITOREXIT: u8 = 0xc3;
}

/// Dedup keys; floating entries are keyed by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CpKey {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    Str(u16),
    NameAndType(u16, u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
}

#[derive(Debug, Clone)]
enum CpEntry {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    Str(u16),
    NameAndType(u16, u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
}

/// Deduplicating constant pool. Indices are 1-based; Long and Double
/// entries occupy two indices as the format requires.
#[derive(Debug, Default)]
pub struct ConstantPool {
    entries: Vec<CpEntry>,
    index: HashMap<CpKey, u16>,
    next_index: u16,
}

impl ConstantPool {
    pub fn new() -> ConstantPool {
        ConstantPool {
            entries: Vec::new(),
            index: HashMap::new(),
            next_index: 1,
        }
    }

    fn intern(&mut self, key: CpKey, entry: CpEntry) -> u16 {
        if let Some(&existing) = self.index.get(&key) {
            return existing;
        }
        let assigned = self.next_index;
        self.next_index += match entry {
            CpEntry::Long(_) | CpEntry::Double(_) => 2,
            _ => 1,
        };
        self.entries.push(entry);
        self.index.insert(key, assigned);
        assigned
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        self.intern(
            CpKey::Utf8(text.to_string()),
            CpEntry::Utf8(text.to_string()),
        )
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.intern(CpKey::Integer(value), CpEntry::Integer(value))
    }

    pub fn float(&mut self, value: f32) -> u16 {
        self.intern(CpKey::Float(value.to_bits()), CpEntry::Float(value))
    }

    pub fn long(&mut self, value: i64) -> u16 {
        self.intern(CpKey::Long(value), CpEntry::Long(value))
    }

    pub fn double(&mut self, value: f64) -> u16 {
        self.intern(CpKey::Double(value.to_bits()), CpEntry::Double(value))
    }

    pub fn class(&mut self, internal_name: &str) -> u16 {
        let name = self.utf8(internal_name);
        self.intern(CpKey::Class(name), CpEntry::Class(name))
    }

    pub fn string(&mut self, text: &str) -> u16 {
        let utf8 = self.utf8(text);
        self.intern(CpKey::Str(utf8), CpEntry::Str(utf8))
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.intern(
            CpKey::NameAndType(name, descriptor),
            CpEntry::NameAndType(name, descriptor),
        )
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(owner);
        let nat = self.name_and_type(name, descriptor);
        self.intern(CpKey::FieldRef(class, nat), CpEntry::FieldRef(class, nat))
    }

    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(owner);
        let nat = self.name_and_type(name, descriptor);
        self.intern(CpKey::MethodRef(class, nat), CpEntry::MethodRef(class, nat))
    }

    pub fn interface_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(owner);
        let nat = self.name_and_type(name, descriptor);
        self.intern(
            CpKey::InterfaceMethodRef(class, nat),
            CpEntry::InterfaceMethodRef(class, nat),
        )
    }

    /// The constant_pool_count field: highest index plus one.
    pub fn count(&self) -> u16 {
        self.next_index
    }

    fn write(&self, out: &mut Vec<u8>) {
        put_u16(out, self.count());
        for entry in &self.entries {
            match entry {
                CpEntry::Utf8(text) => {
                    out.push(1);
                    let bytes = text.as_bytes();
                    put_u16(out, bytes.len() as u16);
                    out.extend_from_slice(bytes);
                }
                CpEntry::Integer(v) => {
                    out.push(3);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                CpEntry::Float(v) => {
                    out.push(4);
                    out.extend_from_slice(&v.to_bits().to_be_bytes());
                }
                CpEntry::Long(v) => {
                    out.push(5);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                CpEntry::Double(v) => {
                    out.push(6);
                    out.extend_from_slice(&v.to_bits().to_be_bytes());
                }
                CpEntry::Class(name) => {
                    out.push(7);
                    put_u16(out, *name);
                }
                CpEntry::Str(utf8) => {
                    out.push(8);
                    put_u16(out, *utf8);
                }
                CpEntry::FieldRef(class, nat) => {
                    out.push(9);
                    put_u16(out, *class);
                    put_u16(out, *nat);
                }
                CpEntry::MethodRef(class, nat) => {
                    out.push(10);
                    put_u16(out, *class);
                    put_u16(out, *nat);
                }
                CpEntry::InterfaceMethodRef(class, nat) => {
                    out.push(11);
                    put_u16(out, *class);
                    put_u16(out, *nat);
                }
                CpEntry::NameAndType(name, descriptor) => {
                    out.push(12);
                    put_u16(out, *name);
                    put_u16(out, *descriptor);
                }
            }
        }
    }
}

/// One row of a Code attribute's exception table; `catch_type` is a
/// constant-pool Class index, 0 for catch-all.
#[derive(Debug, Clone)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

/// Assembled Code attribute contents for one method.
#[derive(Debug, Clone, Default)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exceptions: Vec<ExceptionTableEntry>,
    /// (bytecode offset, source line) pairs for LineNumberTable.
    pub line_numbers: Vec<(u16, u16)>,
}

impl CodeAttribute {
    fn write(&self, pool: &mut ConstantPool, out: &mut Vec<u8>) {
        let name = pool.utf8("Code");
        let line_table_name = if self.line_numbers.is_empty() {
            None
        } else {
            Some(pool.utf8("LineNumberTable"))
        };

        let mut body = Vec::new();
        put_u16(&mut body, self.max_stack);
        put_u16(&mut body, self.max_locals);
        put_u32(&mut body, self.code.len() as u32);
        body.extend_from_slice(&self.code);
        put_u16(&mut body, self.exceptions.len() as u16);
        for entry in &self.exceptions {
            put_u16(&mut body, entry.start_pc);
            put_u16(&mut body, entry.end_pc);
            put_u16(&mut body, entry.handler_pc);
            put_u16(&mut body, entry.catch_type);
        }
        match line_table_name {
            Some(attr_name) => {
                put_u16(&mut body, 1);
                put_u16(&mut body, attr_name);
                put_u32(&mut body, 2 + 4 * self.line_numbers.len() as u32);
                put_u16(&mut body, self.line_numbers.len() as u16);
                for &(pc, line) in &self.line_numbers {
                    put_u16(&mut body, pc);
                    put_u16(&mut body, line);
                }
            }
            None => put_u16(&mut body, 0),
        }

        put_u16(out, name);
        put_u32(out, body.len() as u32);
        out.extend_from_slice(&body);
    }
}

#[derive(Debug)]
struct MemberInfo {
    flags: u16,
    name: u16,
    descriptor: u16,
    code: Option<CodeAttribute>,
}

/// Builds one class file. The pool is public so callers can intern
/// refs while emitting method bodies.
#[derive(Debug)]
pub struct ClassWriter {
    pub pool: ConstantPool,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<MemberInfo>,
    methods: Vec<MemberInfo>,
    source_file: Option<u16>,
}

impl ClassWriter {
    pub fn new(name: &str, super_name: &str, access_flags: u16) -> ClassWriter {
        let mut pool = ConstantPool::new();
        let this_class = pool.class(name);
        let super_class = pool.class(super_name);
        ClassWriter {
            pool,
            access_flags,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            source_file: None,
        }
    }

    pub fn add_interface(&mut self, name: &str) {
        let idx = self.pool.class(name);
        self.interfaces.push(idx);
    }

    pub fn add_field(&mut self, flags: u16, name: &str, descriptor: &str) {
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        self.fields.push(MemberInfo {
            flags,
            name,
            descriptor,
            code: None,
        });
    }

    pub fn add_method(&mut self, flags: u16, name: &str, descriptor: &str, code: Option<CodeAttribute>) {
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        self.methods.push(MemberInfo {
            flags,
            name,
            descriptor,
            code,
        });
    }

    pub fn set_source_file(&mut self, file_name: &str) {
        let idx = self.pool.utf8(file_name);
        self.source_file = Some(idx);
    }

    pub fn finish(mut self) -> Vec<u8> {
        // attribute names must enter the pool before it is serialized
        let source_attr = self
            .source_file
            .map(|idx| (self.pool.utf8("SourceFile"), idx));
        let members = std::mem::take(&mut self.fields);
        let mut field_bytes = Vec::new();
        put_u16(&mut field_bytes, members.len() as u16);
        for member in &members {
            write_member(member, &mut self.pool, &mut field_bytes);
        }
        let members = std::mem::take(&mut self.methods);
        let mut method_bytes = Vec::new();
        put_u16(&mut method_bytes, members.len() as u16);
        for member in &members {
            write_member(member, &mut self.pool, &mut method_bytes);
        }

        let mut out = Vec::new();
        put_u32(&mut out, MAGIC);
        put_u16(&mut out, MINOR_VERSION);
        put_u16(&mut out, MAJOR_VERSION);
        self.pool.write(&mut out);
        put_u16(&mut out, self.access_flags);
        put_u16(&mut out, self.this_class);
        put_u16(&mut out, self.super_class);
        put_u16(&mut out, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            put_u16(&mut out, *interface);
        }
        out.extend_from_slice(&field_bytes);
        out.extend_from_slice(&method_bytes);
        match source_attr {
            Some((attr_name, file_idx)) => {
                put_u16(&mut out, 1);
                put_u16(&mut out, attr_name);
                put_u32(&mut out, 2);
                put_u16(&mut out, file_idx);
            }
            None => put_u16(&mut out, 0),
        }
        out
    }
}

fn write_member(member: &MemberInfo, pool: &mut ConstantPool, out: &mut Vec<u8>) {
    put_u16(out, member.flags);
    put_u16(out, member.name);
    put_u16(out, member.descriptor);
    match &member.code {
        Some(code) => {
            put_u16(out, 1);
            code.write(pool, out);
        }
        None => put_u16(out, 0),
    }
}

pub fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u16(bytes: &[u8], at: usize) -> u16 {
        u16::from_be_bytes([bytes[at], bytes[at + 1]])
    }

    #[test]
    fn pool_deduplicates() {
        let mut pool = ConstantPool::new();
        let a = pool.utf8("hello");
        let b = pool.utf8("hello");
        assert_eq!(a, b);
        let c1 = pool.class("java/lang/Object");
        let c2 = pool.class("java/lang/Object");
        assert_eq!(c1, c2);
        let m1 = pool.method_ref("java/lang/Object", "<init>", "()V");
        let m2 = pool.method_ref("java/lang/Object", "<init>", "()V");
        assert_eq!(m1, m2);
    }

    #[test]
    fn wide_constants_take_two_indices() {
        let mut pool = ConstantPool::new();
        let long = pool.long(1);
        let next = pool.integer(2);
        assert_eq!(next, long + 2);
    }

    #[test]
    fn minimal_class_round_trips_header_fields() {
        let mut writer = ClassWriter::new("demo/Empty", "java/lang/Object", 0x0021);
        writer.add_method(
            0x0001,
            "<init>",
            "()V",
            Some(CodeAttribute {
                max_stack: 1,
                max_locals: 1,
                code: vec![op::ALOAD, 0, op::INVOKESPECIAL, 0, 0, op::RETURN],
                ..CodeAttribute::default()
            }),
        );
        let bytes = writer.finish();
        assert_eq!(&bytes[0..4], &[0xca, 0xfe, 0xba, 0xbe]);
        assert_eq!(read_u16(&bytes, 4), MINOR_VERSION);
        assert_eq!(read_u16(&bytes, 6), MAJOR_VERSION);
    }

    #[test]
    fn constant_pool_serializes_in_index_order() {
        let mut pool = ConstantPool::new();
        pool.utf8("a");
        pool.integer(7);
        let mut out = Vec::new();
        pool.write(&mut out);
        // count, then tag 1 (utf8 "a"), then tag 3 (integer 7)
        assert_eq!(read_u16(&out, 0), 3);
        assert_eq!(out[2], 1);
        assert_eq!(read_u16(&out, 3), 1);
        assert_eq!(out[5], b'a');
        assert_eq!(out[6], 3);
        assert_eq!(&out[7..11], &7i32.to_be_bytes());
    }
}
