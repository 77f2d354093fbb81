use super::attributes::{parse_attributes, write_attributes, Attribute, AttributeBody, Code};
use super::bytes::{ByteReader, ByteWriter};
use super::constant_pool::ConstantPool;
use crate::core::error::PipelineResult;

const MAGIC: u32 = 0xCAFE_BABE;

/// A field or method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub access: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

impl Member {
    pub fn code(&self) -> Option<&Code> {
        self.attributes.iter().find_map(|a| match &a.body {
            AttributeBody::Code(code) => Some(code),
            _ => None,
        })
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.access & flag != 0
    }
}

/// A parsed class file. Parsing followed by `to_bytes` without changes is
/// byte-identical.
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub pool: ConstantPool,
    pub access: u16,
    pub this_class: u16,
    /// 0 for `java/lang/Object` and module-info.
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<Member>,
    pub methods: Vec<Member>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Parse class bytes. `context` names the class in error messages,
    /// usually the jar entry path.
    pub fn parse(bytes: &[u8], context: &str) -> PipelineResult<Self> {
        let mut r = ByteReader::new(bytes, context);
        if r.u32()? != MAGIC {
            return Err(r.error("bad magic"));
        }
        let minor_version = r.u16()?;
        let major_version = r.u16()?;
        let pool = ConstantPool::parse(&mut r)?;
        let access = r.u16()?;
        let this_class = r.u16()?;
        let super_class = r.u16()?;
        let interfaces = r.list(|r| r.u16())?;
        let fields = r.list(|r| parse_member(r, &pool))?;
        let methods = r.list(|r| parse_member(r, &pool))?;
        let attributes = parse_attributes(&mut r, &pool)?;
        if !r.is_empty() {
            return Err(r.error("trailing bytes after class"));
        }
        Ok(Self {
            minor_version,
            major_version,
            pool,
            access,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub fn to_bytes(&self) -> PipelineResult<Vec<u8>> {
        let mut w = ByteWriter::new();
        w.u32(MAGIC);
        w.u16(self.minor_version);
        w.u16(self.major_version);
        self.pool.write(&mut w)?;
        w.u16(self.access);
        w.u16(self.this_class);
        w.u16(self.super_class);
        w.count(self.interfaces.len(), "interfaces")?;
        for i in &self.interfaces {
            w.u16(*i);
        }
        for members in [&self.fields, &self.methods] {
            w.count(members.len(), "members")?;
            for m in members.iter() {
                w.u16(m.access);
                w.u16(m.name_index);
                w.u16(m.descriptor_index);
                write_attributes(&mut w, &m.attributes)?;
            }
        }
        write_attributes(&mut w, &self.attributes)?;
        Ok(w.into_inner())
    }

    pub fn name(&self) -> PipelineResult<String> {
        self.pool.class_name(self.this_class)
    }

    pub fn super_name(&self) -> PipelineResult<Option<String>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.pool.class_name(self.super_class).map(Some)
    }

    pub fn interface_names(&self) -> PipelineResult<Vec<String>> {
        self.interfaces
            .iter()
            .map(|i| self.pool.class_name(*i))
            .collect()
    }

    pub fn member_name(&self, member: &Member) -> PipelineResult<String> {
        self.pool.utf8(member.name_index)
    }

    pub fn member_descriptor(&self, member: &Member) -> PipelineResult<String> {
        self.pool.utf8(member.descriptor_index)
    }

    /// `(name, descriptor)` of every field, in declaration order.
    pub fn field_signatures(&self) -> PipelineResult<Vec<(String, String)>> {
        self.fields
            .iter()
            .map(|m| Ok((self.member_name(m)?, self.member_descriptor(m)?)))
            .collect()
    }

    /// `(name, descriptor)` of every method, in declaration order.
    pub fn method_signatures(&self) -> PipelineResult<Vec<(String, String)>> {
        self.methods
            .iter()
            .map(|m| Ok((self.member_name(m)?, self.member_descriptor(m)?)))
            .collect()
    }

    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<&Member> {
        find(&self.pool, &self.fields, name, descriptor)
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&Member> {
        find(&self.pool, &self.methods, name, descriptor)
    }

    /// Name of a class-level attribute by index into `attributes`.
    pub fn attribute_name(&self, attr: &Attribute) -> PipelineResult<String> {
        self.pool.utf8(attr.name_index)
    }

    pub fn find_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| self.pool.utf8(a.name_index).ok().as_deref() == Some(name))
    }
}

fn find<'a>(
    pool: &ConstantPool,
    members: &'a [Member],
    name: &str,
    descriptor: &str,
) -> Option<&'a Member> {
    members.iter().find(|m| {
        pool.utf8(m.name_index).ok().as_deref() == Some(name)
            && pool.utf8(m.descriptor_index).ok().as_deref() == Some(descriptor)
    })
}

fn parse_member(r: &mut ByteReader<'_>, pool: &ConstantPool) -> PipelineResult<Member> {
    Ok(Member {
        access: r.u16()?,
        name_index: r.u16()?,
        descriptor_index: r.u16()?,
        attributes: parse_attributes(r, pool)?,
    })
}

/// Entry path of a class inside a jar.
pub fn entry_path(class_name: &str) -> String {
    format!("{class_name}.class")
}

/// Class name for a jar entry, if it is a class file.
pub fn class_name_of(entry: &str) -> Option<&str> {
    entry
        .strip_suffix(".class")
        .filter(|n| !n.is_empty() && !n.ends_with("module-info") && !n.ends_with("package-info"))
}
