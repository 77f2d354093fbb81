use super::attributes::{Attribute, AttributeBody, Code};
use super::class::{ClassFile, Member};
use super::code::op;
use super::constant_pool::{ConstantPool, RefKind};
use super::flags;
use crate::core::error::PipelineResult;

/// Builds small class files from scratch. Used for fixtures and for the
/// in-process test corpus; produced classes are valid for verification as
/// long as the supplied code is straight-line.
pub struct ClassBuilder {
    pool: ConstantPool,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<Member>,
    methods: Vec<Member>,
    attributes: Vec<Attribute>,
}

impl ClassBuilder {
    pub fn new(name: &str, super_name: Option<&str>) -> PipelineResult<Self> {
        let mut pool = ConstantPool::new();
        let this_class = pool.class_index(name)?;
        let super_class = match super_name {
            Some(s) => pool.class_index(s)?,
            None => 0,
        };
        Ok(Self {
            pool,
            access: flags::ACC_PUBLIC | flags::ACC_SUPER,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        })
    }

    pub fn access(mut self, access: u16) -> Self {
        self.access = access;
        self
    }

    pub fn interface(mut self, name: &str) -> PipelineResult<Self> {
        let index = self.pool.class_index(name)?;
        self.interfaces.push(index);
        Ok(self)
    }

    pub fn field(mut self, access: u16, name: &str, descriptor: &str) -> PipelineResult<Self> {
        let member = Member {
            access,
            name_index: self.pool.utf8_index(name)?,
            descriptor_index: self.pool.utf8_index(descriptor)?,
            attributes: Vec::new(),
        };
        self.fields.push(member);
        Ok(self)
    }

    /// A `static final String` field with a constant value.
    pub fn string_constant(mut self, name: &str, value: &str) -> PipelineResult<Self> {
        let constant = self.pool.string_index(value)?;
        let attr_name = self.pool.utf8_index("ConstantValue")?;
        let member = Member {
            access: flags::ACC_PUBLIC | flags::ACC_STATIC | flags::ACC_FINAL,
            name_index: self.pool.utf8_index(name)?,
            descriptor_index: self.pool.utf8_index("Ljava/lang/String;")?,
            attributes: vec![Attribute {
                name_index: attr_name,
                body: AttributeBody::ConstantValue(constant),
            }],
        };
        self.fields.push(member);
        Ok(self)
    }

    /// Add a method. `body` receives a code emitter; `None` makes the method
    /// abstract-style (no Code attribute).
    pub fn method(
        mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        body: Option<&dyn Fn(&mut CodeEmitter<'_>) -> PipelineResult<()>>,
    ) -> PipelineResult<Self> {
        let mut attributes = Vec::new();
        if let Some(body) = body {
            let mut emitter = CodeEmitter {
                pool: &mut self.pool,
                code: Vec::new(),
            };
            body(&mut emitter)?;
            let code = emitter.code;
            let name_index = self.pool.utf8_index("Code")?;
            attributes.push(Attribute {
                name_index,
                body: AttributeBody::Code(Code {
                    max_stack: 8,
                    max_locals: 8,
                    code,
                    exception_table: Vec::new(),
                    attributes: Vec::new(),
                }),
            });
        }
        let member = Member {
            access,
            name_index: self.pool.utf8_index(name)?,
            descriptor_index: self.pool.utf8_index(descriptor)?,
            attributes,
        };
        self.methods.push(member);
        Ok(self)
    }

    pub fn source_file(mut self, file: &str) -> PipelineResult<Self> {
        let name_index = self.pool.utf8_index("SourceFile")?;
        let value = self.pool.utf8_index(file)?;
        self.attributes.push(Attribute {
            name_index,
            body: AttributeBody::SourceFile(value),
        });
        Ok(self)
    }

    pub fn build(self) -> ClassFile {
        ClassFile {
            minor_version: 0,
            major_version: 52,
            pool: self.pool,
            access: self.access,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces: self.interfaces,
            fields: self.fields,
            methods: self.methods,
            attributes: self.attributes,
        }
    }

    pub fn to_bytes(self) -> PipelineResult<Vec<u8>> {
        self.build().to_bytes()
    }
}

/// Straight-line bytecode emitter.
pub struct CodeEmitter<'a> {
    pool: &'a mut ConstantPool,
    code: Vec<u8>,
}

impl CodeEmitter<'_> {
    fn with_u16(&mut self, opcode: u8, index: u16) -> &mut Self {
        self.code.push(opcode);
        self.code.extend_from_slice(&index.to_be_bytes());
        self
    }

    pub fn aload(&mut self, slot: u8) -> &mut Self {
        self.code.extend_from_slice(&[0x19, slot]);
        self
    }

    pub fn iconst(&mut self, value: i8) -> &mut Self {
        self.code.extend_from_slice(&[0x10, value as u8]);
        self
    }

    pub fn pop(&mut self) -> &mut Self {
        self.code.push(0x57);
        self
    }

    pub fn dup(&mut self) -> &mut Self {
        self.code.push(0x59);
        self
    }

    pub fn return_void(&mut self) -> &mut Self {
        self.code.push(0xb1);
        self
    }

    pub fn ldc_string(&mut self, value: &str) -> PipelineResult<&mut Self> {
        let index = self.pool.string_index(value)?;
        if index <= 0xff {
            self.code.extend_from_slice(&[op::LDC, index as u8]);
            Ok(self)
        } else {
            Ok(self.with_u16(op::LDC_W, index))
        }
    }

    pub fn new_object(&mut self, class: &str) -> PipelineResult<&mut Self> {
        let index = self.pool.class_index(class)?;
        Ok(self.with_u16(op::NEW, index))
    }

    pub fn checkcast(&mut self, class: &str) -> PipelineResult<&mut Self> {
        let index = self.pool.class_index(class)?;
        Ok(self.with_u16(op::CHECKCAST, index))
    }

    pub fn field_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> PipelineResult<&mut Self> {
        let index = self
            .pool
            .member_ref_index(RefKind::Field, owner, name, descriptor)?;
        Ok(self.with_u16(opcode, index))
    }

    pub fn invoke(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> PipelineResult<&mut Self> {
        let kind = if opcode == op::INVOKEINTERFACE {
            RefKind::InterfaceMethod
        } else {
            RefKind::Method
        };
        let index = self.pool.member_ref_index(kind, owner, name, descriptor)?;
        self.with_u16(opcode, index);
        if opcode == op::INVOKEINTERFACE {
            let (params, _) = super::descriptor::split_method(descriptor)?;
            let slots = 1 + params
                .iter()
                .map(|p| if *p == "J" || *p == "D" { 2 } else { 1 })
                .sum::<u8>();
            self.code.extend_from_slice(&[slots, 0]);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_classes_parse_back_identically() {
        let bytes = ClassBuilder::new("a", Some("java/lang/Object"))
            .unwrap()
            .field(flags::ACC_PRIVATE, "b", "I")
            .unwrap()
            .string_constant("NAME", "a")
            .unwrap()
            .method(
                flags::ACC_PUBLIC,
                "c",
                "()V",
                Some(&|c: &mut CodeEmitter<'_>| {
                    c.aload(0)
                        .field_insn(op::GETFIELD, "a", "b", "I")?
                        .pop()
                        .return_void();
                    Ok(())
                }),
            )
            .unwrap()
            .to_bytes()
            .unwrap();

        let parsed = ClassFile::parse(&bytes, "a.class").unwrap();
        assert_eq!(parsed.name().unwrap(), "a");
        assert_eq!(parsed.super_name().unwrap().as_deref(), Some("java/lang/Object"));
        assert_eq!(parsed.fields.len(), 2);
        assert!(parsed.find_method("c", "()V").unwrap().code().is_some());
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }
}
