use std::collections::HashMap;

use super::bytes::{decode_mutf8, encode_mutf8, ByteReader, ByteWriter};
use crate::core::error::{PipelineError, PipelineResult};

/// A single constant-pool entry. Numeric constants are kept as raw bits so
/// that entries hash and compare exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Raw modified UTF-8 bytes.
    Utf8(Vec<u8>),
    Integer(u32),
    Float(u32),
    Long(u64),
    Double(u64),
    Class(u16),
    String(u16),
    Fieldref { class: u16, name_and_type: u16 },
    Methodref { class: u16, name_and_type: u16 },
    InterfaceMethodref { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
    /// Index 0 and the slot after every Long/Double.
    Unusable,
}

impl Constant {
    fn tag(&self) -> u8 {
        match self {
            Constant::Utf8(_) => 1,
            Constant::Integer(_) => 3,
            Constant::Float(_) => 4,
            Constant::Long(_) => 5,
            Constant::Double(_) => 6,
            Constant::Class(_) => 7,
            Constant::String(_) => 8,
            Constant::Fieldref { .. } => 9,
            Constant::Methodref { .. } => 10,
            Constant::InterfaceMethodref { .. } => 11,
            Constant::NameAndType { .. } => 12,
            Constant::MethodHandle { .. } => 15,
            Constant::MethodType(_) => 16,
            Constant::Dynamic { .. } => 17,
            Constant::InvokeDynamic { .. } => 18,
            Constant::Module(_) => 19,
            Constant::Package(_) => 20,
            Constant::Unusable => 0,
        }
    }

    fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

/// The kind of member a `*ref` constant points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Field,
    Method,
    InterfaceMethod,
}

/// A resolved `Fieldref`/`Methodref`/`InterfaceMethodref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub kind: RefKind,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

/// Constant pool with stable indices. Entries are only ever appended, so an
/// index handed out once stays valid for the lifetime of the pool.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    lookup: HashMap<Constant, u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self {
            entries: vec![Constant::Unusable],
            lookup: HashMap::new(),
        }
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(r: &mut ByteReader<'_>) -> PipelineResult<Self> {
        let count = r.u16()? as usize;
        let mut pool = ConstantPool {
            entries: Vec::with_capacity(count),
            lookup: HashMap::with_capacity(count),
        };
        pool.entries.push(Constant::Unusable);

        while pool.entries.len() < count {
            let tag = r.u8()?;
            let entry = match tag {
                1 => {
                    let len = r.u16()? as usize;
                    Constant::Utf8(r.bytes(len)?.to_vec())
                }
                3 => Constant::Integer(r.u32()?),
                4 => Constant::Float(r.u32()?),
                5 => Constant::Long(r.u64()?),
                6 => Constant::Double(r.u64()?),
                7 => Constant::Class(r.u16()?),
                8 => Constant::String(r.u16()?),
                9 => Constant::Fieldref {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                10 => Constant::Methodref {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                11 => Constant::InterfaceMethodref {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                12 => Constant::NameAndType {
                    name: r.u16()?,
                    descriptor: r.u16()?,
                },
                15 => Constant::MethodHandle {
                    kind: r.u8()?,
                    reference: r.u16()?,
                },
                16 => Constant::MethodType(r.u16()?),
                17 => Constant::Dynamic {
                    bootstrap: r.u16()?,
                    name_and_type: r.u16()?,
                },
                18 => Constant::InvokeDynamic {
                    bootstrap: r.u16()?,
                    name_and_type: r.u16()?,
                },
                19 => Constant::Module(r.u16()?),
                20 => Constant::Package(r.u16()?),
                other => return Err(r.error(format!("unknown constant tag {other}"))),
            };
            pool.push_raw(entry);
        }
        if pool.entries.len() > count {
            return Err(r.error("wide constant overruns the pool"));
        }
        Ok(pool)
    }

    /// Serialize the pool. A Utf8 entry longer than 65535 bytes cannot be
    /// encoded and is a `ClassFormat` error.
    pub fn write(&self, w: &mut ByteWriter) -> PipelineResult<()> {
        w.u16(self.entries.len() as u16);
        for entry in &self.entries {
            let tag = entry.tag();
            match entry {
                Constant::Unusable => continue,
                Constant::Utf8(bytes) => {
                    let len = u16::try_from(bytes.len()).map_err(|_| {
                        PipelineError::class_format(
                            "<constant pool>",
                            format!("Utf8 constant of {} bytes exceeds 65535", bytes.len()),
                        )
                    })?;
                    w.u8(tag);
                    w.u16(len);
                    w.bytes(bytes);
                }
                Constant::Integer(v) | Constant::Float(v) => {
                    w.u8(tag);
                    w.u32(*v);
                }
                Constant::Long(v) | Constant::Double(v) => {
                    w.u8(tag);
                    w.u64(*v);
                }
                Constant::Class(i)
                | Constant::String(i)
                | Constant::MethodType(i)
                | Constant::Module(i)
                | Constant::Package(i) => {
                    w.u8(tag);
                    w.u16(*i);
                }
                Constant::Fieldref { class, name_and_type }
                | Constant::Methodref { class, name_and_type }
                | Constant::InterfaceMethodref { class, name_and_type } => {
                    w.u8(tag);
                    w.u16(*class);
                    w.u16(*name_and_type);
                }
                Constant::NameAndType { name, descriptor } => {
                    w.u8(tag);
                    w.u16(*name);
                    w.u16(*descriptor);
                }
                Constant::MethodHandle { kind, reference } => {
                    w.u8(tag);
                    w.u8(*kind);
                    w.u16(*reference);
                }
                Constant::Dynamic {
                    bootstrap,
                    name_and_type,
                }
                | Constant::InvokeDynamic {
                    bootstrap,
                    name_and_type,
                } => {
                    w.u8(tag);
                    w.u16(*bootstrap);
                    w.u16(*name_and_type);
                }
            }
        }
        Ok(())
    }

    fn push_raw(&mut self, entry: Constant) -> u16 {
        let index = self.entries.len() as u16;
        let wide = entry.is_wide();
        self.lookup.entry(entry.clone()).or_insert(index);
        self.entries.push(entry);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        index
    }

    /// Number of slots including the unusable slot 0.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Iterate `(index, entry)` over usable slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, c)| !matches!(c, Constant::Unusable))
            .map(|(i, c)| (i as u16, c))
    }

    pub fn get(&self, index: u16) -> PipelineResult<&Constant> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => Err(PipelineError::class_format(
                "<constant pool>",
                format!("invalid constant index {index}"),
            )),
            Some(c) => Ok(c),
        }
    }

    /// Replace an entry in place. Only used for reference-type entries whose
    /// target changes; Utf8 entries are never mutated because they may be
    /// shared with string literals.
    pub fn set(&mut self, index: u16, entry: Constant) -> PipelineResult<()> {
        let slot = self
            .entries
            .get_mut(index as usize)
            .filter(|c| !matches!(c, Constant::Unusable))
            .ok_or_else(|| {
                PipelineError::class_format("<constant pool>", format!("invalid index {index}"))
            })?;
        if slot.is_wide() != entry.is_wide() || matches!(entry, Constant::Utf8(_)) {
            return Err(PipelineError::class_format(
                "<constant pool>",
                format!("illegal in-place replacement at {index}"),
            ));
        }
        let previous = std::mem::replace(slot, entry.clone());
        if self.lookup.get(&previous) == Some(&index) {
            self.lookup.remove(&previous);
        }
        self.lookup.entry(entry).or_insert(index);
        Ok(())
    }

    /// Return the index of an equal entry, appending one if none exists.
    pub fn intern(&mut self, entry: Constant) -> PipelineResult<u16> {
        if let Some(index) = self.lookup.get(&entry) {
            return Ok(*index);
        }
        let needed = if entry.is_wide() { 2 } else { 1 };
        if self.entries.len() + needed > u16::MAX as usize {
            return Err(PipelineError::class_format(
                "<constant pool>",
                "constant pool overflow",
            ));
        }
        Ok(self.push_raw(entry))
    }

    pub fn utf8(&self, index: u16) -> PipelineResult<String> {
        match self.get(index)? {
            Constant::Utf8(bytes) => decode_mutf8(bytes).ok_or_else(|| {
                PipelineError::class_format("<constant pool>", format!("bad utf8 at {index}"))
            }),
            other => Err(PipelineError::class_format(
                "<constant pool>",
                format!("expected Utf8 at {index}, found {:?}", other),
            )),
        }
    }

    pub fn class_name(&self, index: u16) -> PipelineResult<String> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            other => Err(PipelineError::class_format(
                "<constant pool>",
                format!("expected Class at {index}, found {:?}", other),
            )),
        }
    }

    pub fn name_and_type(&self, index: u16) -> PipelineResult<(String, String)> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            other => Err(PipelineError::class_format(
                "<constant pool>",
                format!("expected NameAndType at {index}, found {:?}", other),
            )),
        }
    }

    pub fn member_ref(&self, index: u16) -> PipelineResult<MemberRef> {
        let (kind, class, nat) = match self.get(index)? {
            Constant::Fieldref {
                class,
                name_and_type,
            } => (RefKind::Field, *class, *name_and_type),
            Constant::Methodref {
                class,
                name_and_type,
            } => (RefKind::Method, *class, *name_and_type),
            Constant::InterfaceMethodref {
                class,
                name_and_type,
            } => (RefKind::InterfaceMethod, *class, *name_and_type),
            other => {
                return Err(PipelineError::class_format(
                    "<constant pool>",
                    format!("expected member ref at {index}, found {:?}", other),
                ))
            }
        };
        let (name, descriptor) = self.name_and_type(nat)?;
        Ok(MemberRef {
            kind,
            owner: self.class_name(class)?,
            name,
            descriptor,
        })
    }

    pub fn utf8_index(&mut self, value: &str) -> PipelineResult<u16> {
        self.intern(Constant::Utf8(encode_mutf8(value)))
    }

    pub fn class_index(&mut self, name: &str) -> PipelineResult<u16> {
        let name = self.utf8_index(name)?;
        self.intern(Constant::Class(name))
    }

    pub fn string_index(&mut self, value: &str) -> PipelineResult<u16> {
        let utf8 = self.utf8_index(value)?;
        self.intern(Constant::String(utf8))
    }

    pub fn name_and_type_index(&mut self, name: &str, descriptor: &str) -> PipelineResult<u16> {
        let name = self.utf8_index(name)?;
        let descriptor = self.utf8_index(descriptor)?;
        self.intern(Constant::NameAndType { name, descriptor })
    }

    pub fn member_ref_index(
        &mut self,
        kind: RefKind,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> PipelineResult<u16> {
        let class = self.class_index(owner)?;
        let name_and_type = self.name_and_type_index(name, descriptor)?;
        self.intern(match kind {
            RefKind::Field => Constant::Fieldref {
                class,
                name_and_type,
            },
            RefKind::Method => Constant::Methodref {
                class,
                name_and_type,
            },
            RefKind::InterfaceMethod => Constant::InterfaceMethodref {
                class,
                name_and_type,
            },
        })
    }
}

/// Copies entries from one pool into another, deduplicating against entries
/// the destination already holds.
pub struct PoolImporter<'a> {
    src: &'a ConstantPool,
    dst: &'a mut ConstantPool,
    memo: HashMap<u16, u16>,
}

impl<'a> PoolImporter<'a> {
    pub fn new(src: &'a ConstantPool, dst: &'a mut ConstantPool) -> Self {
        Self {
            src,
            dst,
            memo: HashMap::new(),
        }
    }

    /// Import `index` from the source pool, returning its index in the
    /// destination. Index 0 means "absent" in several attributes and maps to 0.
    pub fn import(&mut self, index: u16) -> PipelineResult<u16> {
        if index == 0 {
            return Ok(0);
        }
        if let Some(mapped) = self.memo.get(&index) {
            return Ok(*mapped);
        }
        let translated = match self.src.get(index)?.clone() {
            c @ (Constant::Utf8(_)
            | Constant::Integer(_)
            | Constant::Float(_)
            | Constant::Long(_)
            | Constant::Double(_)) => c,
            Constant::Class(i) => Constant::Class(self.import(i)?),
            Constant::String(i) => Constant::String(self.import(i)?),
            Constant::MethodType(i) => Constant::MethodType(self.import(i)?),
            Constant::Module(i) => Constant::Module(self.import(i)?),
            Constant::Package(i) => Constant::Package(self.import(i)?),
            Constant::Fieldref {
                class,
                name_and_type,
            } => Constant::Fieldref {
                class: self.import(class)?,
                name_and_type: self.import(name_and_type)?,
            },
            Constant::Methodref {
                class,
                name_and_type,
            } => Constant::Methodref {
                class: self.import(class)?,
                name_and_type: self.import(name_and_type)?,
            },
            Constant::InterfaceMethodref {
                class,
                name_and_type,
            } => Constant::InterfaceMethodref {
                class: self.import(class)?,
                name_and_type: self.import(name_and_type)?,
            },
            Constant::NameAndType { name, descriptor } => Constant::NameAndType {
                name: self.import(name)?,
                descriptor: self.import(descriptor)?,
            },
            Constant::MethodHandle { kind, reference } => Constant::MethodHandle {
                kind,
                reference: self.import(reference)?,
            },
            // Bootstrap indices point into the BootstrapMethods attribute, which
            // is not carried across classes.
            Constant::Dynamic { .. } | Constant::InvokeDynamic { .. } => {
                return Err(PipelineError::class_format(
                    "<constant pool>",
                    format!("cannot import dynamic constant {index} across classes"),
                ))
            }
            Constant::Unusable => {
                return Err(PipelineError::class_format(
                    "<constant pool>",
                    format!("invalid constant index {index}"),
                ))
            }
        };
        let mapped = self.dst.intern(translated)?;
        self.memo.insert(index, mapped);
        Ok(mapped)
    }

    pub fn destination(&mut self) -> &mut ConstantPool {
        self.dst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_reuses_equal_entries() {
        let mut pool = ConstantPool::new();
        let a = pool.class_index("net/minecraft/Foo").unwrap();
        let b = pool.class_index("net/minecraft/Foo").unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.class_name(a).unwrap(), "net/minecraft/Foo");
    }

    #[test]
    fn wide_constants_take_two_slots_and_round_trip() {
        let mut pool = ConstantPool::new();
        let long = pool.intern(Constant::Long(42)).unwrap();
        let after = pool.utf8_index("x").unwrap();
        assert_eq!(after, long + 2);

        let mut w = ByteWriter::new();
        pool.write(&mut w).unwrap();
        let bytes = w.into_inner();
        let mut r = ByteReader::new(&bytes, "pool");
        let parsed = ConstantPool::parse(&mut r).unwrap();
        assert_eq!(parsed.len(), pool.len());
        assert_eq!(parsed.utf8(after).unwrap(), "x");
        assert!(r.is_empty());
    }

    #[test]
    fn importer_translates_nested_references() {
        let mut src = ConstantPool::new();
        src.utf8_index("padding").unwrap();
        let field = src
            .member_ref_index(RefKind::Field, "a", "b", "I")
            .unwrap();

        let mut dst = ConstantPool::new();
        dst.class_index("a").unwrap();
        let imported = PoolImporter::new(&src, &mut dst).import(field).unwrap();

        let resolved = dst.member_ref(imported).unwrap();
        assert_eq!(resolved.owner, "a");
        assert_eq!(resolved.name, "b");
        assert_eq!(resolved.descriptor, "I");
    }

    #[test]
    fn utf8_entries_cannot_be_replaced_in_place() {
        let mut pool = ConstantPool::new();
        let idx = pool.utf8_index("shared").unwrap();
        assert!(pool.set(idx, Constant::Utf8(b"other".to_vec())).is_err());
    }

    #[test]
    fn oversized_utf8_is_rejected_on_write() {
        let mut pool = ConstantPool::new();
        pool.intern(Constant::Utf8(vec![b'a'; 70_000])).unwrap();
        let err = pool.write(&mut ByteWriter::new()).unwrap_err();
        assert!(matches!(err, PipelineError::ClassFormat { .. }));

        let mut fits = ConstantPool::new();
        fits.intern(Constant::Utf8(vec![b'a'; u16::MAX as usize])).unwrap();
        assert!(fits.write(&mut ByteWriter::new()).is_ok());
    }
}
