//! Hand-assembled class files for the integration tests.
//!
//! The bytes are produced here without going through `hotpatch`, so the tests exercise the
//! parser against class files it did not write itself.

#![allow(dead_code)]

use std::collections::HashMap;

pub const JNDI_LOOKUP: &str = "org/apache/logging/log4j/core/lookup/JndiLookup";
pub const CACHED_INTROSPECTION_RESULTS: &str =
    "org/springframework/beans/CachedIntrospectionResults";

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SUPER: u16 = 0x0020;

/// A `Code` attribute under construction.
#[derive(Debug, Default)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytes: Vec<u8>,
    /// Raw `StackMapTable` entries and their count
    pub stack_map: Option<(u16, Vec<u8>)>,
}

impl Code {
    pub fn new(max_stack: u16, max_locals: u16) -> Self {
        Code {
            max_stack,
            max_locals,
            ..Code::default()
        }
    }

    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.bytes.push(opcode);
        self
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// A branch opcode whose 16-bit displacement is relative to the opcode itself.
    pub fn branch(&mut self, opcode: u8, displacement: i16) -> &mut Self {
        self.bytes.push(opcode);
        self.bytes.extend_from_slice(&displacement.to_be_bytes());
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Writes a class file constant by constant, interning as it goes.
pub struct ClassAssembler {
    major: u16,
    pool: Vec<u8>,
    pool_count: u16,
    interned: HashMap<(u8, Vec<u8>), u16>,
    this_class: u16,
    super_class: u16,
    fields: Vec<u8>,
    field_count: u16,
    methods: Vec<u8>,
    method_count: u16,
}

impl ClassAssembler {
    pub fn new(name: &str, major: u16) -> Self {
        let mut assembler = ClassAssembler {
            major,
            pool: Vec::new(),
            pool_count: 1,
            interned: HashMap::new(),
            this_class: 0,
            super_class: 0,
            fields: Vec::new(),
            field_count: 0,
            methods: Vec::new(),
            method_count: 0,
        };
        assembler.this_class = assembler.class(name);
        assembler.super_class = assembler.class("java/lang/Object");
        assembler
    }

    fn constant(&mut self, tag: u8, payload: Vec<u8>) -> u16 {
        if let Some(index) = self.interned.get(&(tag, payload.clone())) {
            return *index;
        }
        let index = self.pool_count;
        self.pool.push(tag);
        self.pool.extend_from_slice(&payload);
        self.pool_count += 1;
        self.interned.insert((tag, payload), index);
        index
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        let mut payload = (value.len() as u16).to_be_bytes().to_vec();
        payload.extend_from_slice(value.as_bytes());
        self.constant(1, payload)
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        self.constant(7, name.to_be_bytes().to_vec())
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let value = self.utf8(value);
        self.constant(8, value.to_be_bytes().to_vec())
    }

    fn member(&mut self, tag: u8, owner: &str, name: &str, descriptor: &str) -> u16 {
        let owner = self.class(owner);
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let mut name_and_type = name.to_be_bytes().to_vec();
        name_and_type.extend_from_slice(&descriptor.to_be_bytes());
        let name_and_type = self.constant(12, name_and_type);

        let mut payload = owner.to_be_bytes().to_vec();
        payload.extend_from_slice(&name_and_type.to_be_bytes());
        self.constant(tag, payload)
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member(9, owner, name, descriptor)
    }

    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member(10, owner, name, descriptor)
    }

    pub fn interface_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member(11, owner, name, descriptor)
    }

    pub fn field(&mut self, access: u16, name: &str, descriptor: &str) {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.fields.extend_from_slice(&access.to_be_bytes());
        self.fields.extend_from_slice(&name.to_be_bytes());
        self.fields.extend_from_slice(&descriptor.to_be_bytes());
        self.fields.extend_from_slice(&0u16.to_be_bytes());
        self.field_count += 1;
    }

    pub fn method(&mut self, access: u16, name: &str, descriptor: &str, code: &Code) {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let code_name = self.utf8("Code");

        let mut attributes = Vec::new();
        let mut attribute_count = 0u16;
        if let Some((count, entries)) = &code.stack_map {
            let table_name = self.utf8("StackMapTable");
            attributes.extend_from_slice(&table_name.to_be_bytes());
            attributes.extend_from_slice(&((entries.len() + 2) as u32).to_be_bytes());
            attributes.extend_from_slice(&count.to_be_bytes());
            attributes.extend_from_slice(entries);
            attribute_count += 1;
        }

        let mut info = Vec::new();
        info.extend_from_slice(&code.max_stack.to_be_bytes());
        info.extend_from_slice(&code.max_locals.to_be_bytes());
        info.extend_from_slice(&(code.bytes.len() as u32).to_be_bytes());
        info.extend_from_slice(&code.bytes);
        info.extend_from_slice(&0u16.to_be_bytes());
        info.extend_from_slice(&attribute_count.to_be_bytes());
        info.extend_from_slice(&attributes);

        self.methods.extend_from_slice(&access.to_be_bytes());
        self.methods.extend_from_slice(&name.to_be_bytes());
        self.methods.extend_from_slice(&descriptor.to_be_bytes());
        self.methods.extend_from_slice(&1u16.to_be_bytes());
        self.methods.extend_from_slice(&code_name.to_be_bytes());
        self.methods.extend_from_slice(&(info.len() as u32).to_be_bytes());
        self.methods.extend_from_slice(&info);
        self.method_count += 1;
    }

    /// A `public <init>()V` calling `Object.<init>`.
    pub fn default_constructor(&mut self) {
        let object_init = self.method_ref("java/lang/Object", "<init>", "()V");
        let mut code = Code::new(1, 1);
        code.op(0x2A).op(0xB7).u16(object_init).op(0xB1);
        self.method(ACC_PUBLIC, "<init>", "()V", &code);
    }

    pub fn finish(self) -> Vec<u8> {
        let mut out = vec![0xCA, 0xFE, 0xBA, 0xBE];
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&self.major.to_be_bytes());
        out.extend_from_slice(&self.pool_count.to_be_bytes());
        out.extend_from_slice(&self.pool);
        out.extend_from_slice(&(ACC_PUBLIC | ACC_SUPER).to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&self.field_count.to_be_bytes());
        out.extend_from_slice(&self.fields);
        out.extend_from_slice(&self.method_count.to_be_bytes());
        out.extend_from_slice(&self.methods);
        out.extend_from_slice(&0u16.to_be_bytes());
        out
    }
}

/// `com/example/Main` with `static int answer()` returning 42.
pub fn simple_class() -> Vec<u8> {
    let mut class = ClassAssembler::new("com/example/Main", 52);
    class.default_constructor();
    let mut code = Code::new(1, 0);
    code.op(0x10).u8(42).op(0xAC);
    class.method(ACC_PUBLIC | ACC_STATIC, "answer", "()I", &code);
    class.finish()
}

/// `JndiLookup.lookup` null-checking its key and delegating to `JndiManager`.
///
/// ```text
///  0: aload_2
///  1: ifnonnull 6
///  4: aconst_null
///  5: areturn
///  6: aload_2
///  7: invokestatic JndiManager.lookup
/// 10: areturn
/// ```
pub fn jndi_lookup_class() -> Vec<u8> {
    let mut class = ClassAssembler::new(JNDI_LOOKUP, 52);
    class.default_constructor();

    let manager_lookup = class.method_ref(
        "org/apache/logging/log4j/core/net/JndiManager",
        "lookup",
        "(Ljava/lang/String;)Ljava/lang/String;",
    );
    let mut code = Code::new(1, 3);
    code.op(0x2C)
        .branch(0xC7, 5)
        .op(0x01)
        .op(0xB0)
        .op(0x2C)
        .op(0xB8)
        .u16(manager_lookup)
        .op(0xB0);
    // same_frame at offset 6
    code.stack_map = Some((1, vec![6]));
    class.method(
        ACC_PUBLIC,
        "lookup",
        "(Lorg/apache/logging/log4j/core/LogEvent;Ljava/lang/String;)Ljava/lang/String;",
        &code,
    );
    class.finish()
}

/// `CachedIntrospectionResults` whose constructor runs the pre-fix property loop.
///
/// ```text
///  0: aload_0
///  1: invokespecial Object.<init>
///  4: aload_1
///  5: invokestatic Introspector.getBeanInfo
///  8: invokeinterface BeanInfo.getPropertyDescriptors
/// 13: astore_2
/// 14: aload_2
/// 15: arraylength
/// 16: istore_3
/// 17: iconst_0
/// 18: istore 4
/// 20: iload 4                         <- head
/// 22: iload_3
/// 23: if_icmpge 86
/// 26: aload_2
/// 27: iload 4
/// 29: aaload
/// 30: astore 5
/// 32: ldc Class java/lang/Class
/// 34: aload_1
/// 35: if_acmpne 67
/// 38: ldc "classLoader"
/// 40: aload 5
/// 42: invokevirtual PropertyDescriptor.getName
/// 45: invokevirtual String.equals
/// 48: ifne 80
/// 51: ldc "protectionDomain"
/// 53: aload 5
/// 55: invokevirtual PropertyDescriptor.getName
/// 58: invokevirtual String.equals
/// 61: ifeq 67
/// 64: goto 80                         (three nops without `continue_jump`)
/// 67: getstatic logger                <- next
/// 70: aload 5
/// 72: invokevirtual PropertyDescriptor.getName
/// 75: invokeinterface Log.trace
/// 80: iinc 4, 1                       <- resume
/// 83: goto 20
/// 86: return                          <- end
/// ```
///
/// Class files before version 50 carry no `StackMapTable`; for later versions the table is
/// left out as well, which the parser accepts and the encoder regenerates.
pub fn spring_class(major: u16, continue_jump: bool) -> Vec<u8> {
    let mut class = ClassAssembler::new(CACHED_INTROSPECTION_RESULTS, major);
    class.field(
        ACC_PRIVATE | ACC_STATIC | ACC_FINAL,
        "logger",
        "Lorg/apache/commons/logging/Log;",
    );

    let object_init = class.method_ref("java/lang/Object", "<init>", "()V");
    let bean_info = class.method_ref(
        "java/beans/Introspector",
        "getBeanInfo",
        "(Ljava/lang/Class;)Ljava/beans/BeanInfo;",
    );
    let descriptors = class.interface_method_ref(
        "java/beans/BeanInfo",
        "getPropertyDescriptors",
        "()[Ljava/beans/PropertyDescriptor;",
    );
    let class_constant = class.class("java/lang/Class");
    let class_loader = class.string("classLoader");
    let protection_domain = class.string("protectionDomain");
    let get_name = class.method_ref(
        "java/beans/PropertyDescriptor",
        "getName",
        "()Ljava/lang/String;",
    );
    let equals = class.method_ref("java/lang/String", "equals", "(Ljava/lang/Object;)Z");
    let logger = class.field_ref(
        CACHED_INTROSPECTION_RESULTS,
        "logger",
        "Lorg/apache/commons/logging/Log;",
    );
    let trace = class.interface_method_ref(
        "org/apache/commons/logging/Log",
        "trace",
        "(Ljava/lang/Object;)V",
    );

    let mut code = Code::new(2, 6);
    code.op(0x2A).op(0xB7).u16(object_init);
    code.op(0x2B).op(0xB8).u16(bean_info);
    code.op(0xB9).u16(descriptors).u8(1).u8(0);
    code.op(0x4D).op(0x2C).op(0xBE).op(0x3E).op(0x03).op(0x36).u8(4);
    assert_eq!(code.len(), 20);
    code.op(0x15).u8(4).op(0x1D).branch(0xA2, 63);
    code.op(0x2C).op(0x15).u8(4).op(0x32).op(0x3A).u8(5);
    assert_eq!(code.len(), 32);
    code.op(0x12).u8(class_constant as u8).op(0x2B).branch(0xA6, 32);
    code.op(0x12).u8(class_loader as u8).op(0x19).u8(5);
    code.op(0xB6).u16(get_name).op(0xB6).u16(equals).branch(0x9A, 32);
    code.op(0x12).u8(protection_domain as u8).op(0x19).u8(5);
    code.op(0xB6).u16(get_name).op(0xB6).u16(equals).branch(0x99, 6);
    assert_eq!(code.len(), 64);
    if continue_jump {
        code.branch(0xA7, 16);
    } else {
        code.op(0x00).op(0x00).op(0x00);
    }
    code.op(0xB2).u16(logger).op(0x19).u8(5).op(0xB6).u16(get_name);
    code.op(0xB9).u16(trace).u8(2).u8(0);
    assert_eq!(code.len(), 80);
    code.op(0x84).u8(4).u8(1).branch(0xA7, -63);
    code.op(0xB1);
    assert_eq!(code.len(), 87);

    class.method(0, "<init>", "(Ljava/lang/Class;)V", &code);
    class.finish()
}
