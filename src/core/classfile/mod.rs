// ─── Class Files ───
// JVM class-file codec: constant pool, typed attributes, instruction
// decoding and cross-pool relocation.

pub mod attributes;
pub mod builder;
pub mod bytes;
pub mod class;
pub mod code;
pub mod constant_pool;
pub mod descriptor;

pub use class::{class_name_of, entry_path, ClassFile, Member};
pub use constant_pool::{Constant, ConstantPool, MemberRef, PoolImporter, RefKind};

/// Access flags shared by classes, fields and methods.
pub mod flags {
    pub const ACC_PUBLIC: u16 = 0x0001;
    pub const ACC_PRIVATE: u16 = 0x0002;
    pub const ACC_PROTECTED: u16 = 0x0004;
    pub const ACC_STATIC: u16 = 0x0008;
    pub const ACC_FINAL: u16 = 0x0010;
    pub const ACC_SUPER: u16 = 0x0020;
    pub const ACC_BRIDGE: u16 = 0x0040;
    pub const ACC_VARARGS: u16 = 0x0080;
    pub const ACC_NATIVE: u16 = 0x0100;
    pub const ACC_INTERFACE: u16 = 0x0200;
    pub const ACC_ABSTRACT: u16 = 0x0400;
    pub const ACC_SYNTHETIC: u16 = 0x1000;
    pub const ACC_ANNOTATION: u16 = 0x2000;
    pub const ACC_ENUM: u16 = 0x4000;

    pub const VISIBILITY: u16 = ACC_PUBLIC | ACC_PRIVATE | ACC_PROTECTED;
}
