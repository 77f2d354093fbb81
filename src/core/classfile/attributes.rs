use super::bytes::{ByteReader, ByteWriter};
use super::constant_pool::ConstantPool;
use crate::core::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Utf8 index of the attribute name.
    pub name_index: u16,
    pub body: AttributeBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeBody {
    Code(Code),
    ConstantValue(u16),
    Exceptions(Vec<u16>),
    Signature(u16),
    SourceFile(u16),
    InnerClasses(Vec<InnerClass>),
    EnclosingMethod { class: u16, method: u16 },
    LineNumberTable(Vec<LineNumber>),
    LocalVariableTable(Vec<LocalVariable>),
    /// Same layout as `LocalVariableTable`, with signatures in place of
    /// descriptors.
    LocalVariableTypeTable(Vec<LocalVariable>),
    StackMapTable(Vec<StackMapFrame>),
    /// `RuntimeVisibleAnnotations` or `RuntimeInvisibleAnnotations`.
    Annotations(Vec<Annotation>),
    /// `Runtime(In)VisibleParameterAnnotations`.
    ParameterAnnotations(Vec<Vec<Annotation>>),
    AnnotationDefault(ElementValue),
    MethodParameters(Vec<MethodParameter>),
    BootstrapMethods(Vec<BootstrapMethod>),
    Record(Vec<RecordComponent>),
    NestHost(u16),
    NestMembers(Vec<u16>),
    PermittedSubclasses(Vec<u16>),
    Synthetic,
    Deprecated,
    /// Anything else, kept byte for byte.
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// Class index, 0 for `finally`.
    pub catch_type: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerClass {
    pub inner_class: u16,
    pub outer_class: u16,
    pub inner_name: u16,
    pub access: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name: u16,
    pub descriptor: u16,
    pub index: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodParameter {
    pub name: u16,
    pub access: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethod {
    pub method_handle: u16,
    pub arguments: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordComponent {
    pub name: u16,
    pub descriptor: u16,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Utf8 index of a field descriptor.
    pub type_index: u16,
    pub elements: Vec<(u16, ElementValue)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementValue {
    Const { tag: u8, index: u16 },
    Enum { type_name: u16, const_name: u16 },
    /// Utf8 index of a return descriptor.
    Class(u16),
    Annotation(Annotation),
    Array(Vec<ElementValue>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(u16),
    /// Bytecode offset of the `new` instruction.
    Uninitialized(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    /// `extended` records whether the frame used the explicit-delta form,
    /// so unmodified frames round-trip byte for byte.
    Same { offset_delta: u16, extended: bool },
    SameLocals1 {
        offset_delta: u16,
        stack: VerificationType,
        extended: bool,
    },
    Chop { offset_delta: u16, chopped: u8 },
    Append { offset_delta: u16, locals: Vec<VerificationType> },
    Full {
        offset_delta: u16,
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::Same { offset_delta, .. }
            | StackMapFrame::SameLocals1 { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }

    pub fn set_offset_delta(&mut self, delta: u16) {
        match self {
            StackMapFrame::Same { offset_delta, .. }
            | StackMapFrame::SameLocals1 { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta = delta,
        }
    }

    pub fn types_mut(&mut self) -> Vec<&mut VerificationType> {
        match self {
            StackMapFrame::Same { .. } | StackMapFrame::Chop { .. } => Vec::new(),
            StackMapFrame::SameLocals1 { stack, .. } => vec![stack],
            StackMapFrame::Append { locals, .. } => locals.iter_mut().collect(),
            StackMapFrame::Full { locals, stack, .. } => {
                locals.iter_mut().chain(stack.iter_mut()).collect()
            }
        }
    }
}

// ── Parsing ─────────────────────────────────────────────

pub fn parse_attributes(
    r: &mut ByteReader<'_>,
    pool: &ConstantPool,
) -> PipelineResult<Vec<Attribute>> {
    r.list(|r| parse_attribute(r, pool))
}

fn parse_attribute(r: &mut ByteReader<'_>, pool: &ConstantPool) -> PipelineResult<Attribute> {
    let name_index = r.u16()?;
    let len = r.u32()? as usize;
    let data = r.bytes(len)?;
    let name = pool.utf8(name_index)?;
    let mut body_reader = ByteReader::new(data, r.context());
    let body = parse_body(&name, &mut body_reader, pool)?;
    if !body_reader.is_empty() {
        return Err(body_reader.error(format!("trailing bytes in {name} attribute")));
    }
    Ok(Attribute { name_index, body })
}

fn parse_body(
    name: &str,
    r: &mut ByteReader<'_>,
    pool: &ConstantPool,
) -> PipelineResult<AttributeBody> {
    Ok(match name {
        "Code" => {
            let max_stack = r.u16()?;
            let max_locals = r.u16()?;
            let code_len = r.u32()? as usize;
            let code = r.bytes(code_len)?.to_vec();
            let exception_table = r.list(|r| {
                Ok(ExceptionHandler {
                    start_pc: r.u16()?,
                    end_pc: r.u16()?,
                    handler_pc: r.u16()?,
                    catch_type: r.u16()?,
                })
            })?;
            let attributes = parse_attributes(r, pool)?;
            AttributeBody::Code(Code {
                max_stack,
                max_locals,
                code,
                exception_table,
                attributes,
            })
        }
        "ConstantValue" => AttributeBody::ConstantValue(r.u16()?),
        "Exceptions" => AttributeBody::Exceptions(r.list(|r| r.u16())?),
        "Signature" => AttributeBody::Signature(r.u16()?),
        "SourceFile" => AttributeBody::SourceFile(r.u16()?),
        "InnerClasses" => AttributeBody::InnerClasses(r.list(|r| {
            Ok(InnerClass {
                inner_class: r.u16()?,
                outer_class: r.u16()?,
                inner_name: r.u16()?,
                access: r.u16()?,
            })
        })?),
        "EnclosingMethod" => AttributeBody::EnclosingMethod {
            class: r.u16()?,
            method: r.u16()?,
        },
        "LineNumberTable" => AttributeBody::LineNumberTable(r.list(|r| {
            Ok(LineNumber {
                start_pc: r.u16()?,
                line: r.u16()?,
            })
        })?),
        "LocalVariableTable" => AttributeBody::LocalVariableTable(r.list(parse_local)?),
        "LocalVariableTypeTable" => AttributeBody::LocalVariableTypeTable(r.list(parse_local)?),
        "StackMapTable" => AttributeBody::StackMapTable(r.list(parse_frame)?),
        "RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations" => {
            AttributeBody::Annotations(r.list(parse_annotation)?)
        }
        "RuntimeVisibleParameterAnnotations" | "RuntimeInvisibleParameterAnnotations" => {
            let count = r.u8()? as usize;
            let mut params = Vec::with_capacity(count);
            for _ in 0..count {
                params.push(r.list(parse_annotation)?);
            }
            AttributeBody::ParameterAnnotations(params)
        }
        "AnnotationDefault" => AttributeBody::AnnotationDefault(parse_element(r)?),
        "MethodParameters" => {
            let count = r.u8()? as usize;
            let mut params = Vec::with_capacity(count);
            for _ in 0..count {
                params.push(MethodParameter {
                    name: r.u16()?,
                    access: r.u16()?,
                });
            }
            AttributeBody::MethodParameters(params)
        }
        "BootstrapMethods" => AttributeBody::BootstrapMethods(r.list(|r| {
            Ok(BootstrapMethod {
                method_handle: r.u16()?,
                arguments: r.list(|r| r.u16())?,
            })
        })?),
        "Record" => AttributeBody::Record(r.list(|r| {
            Ok(RecordComponent {
                name: r.u16()?,
                descriptor: r.u16()?,
                attributes: parse_attributes(r, pool)?,
            })
        })?),
        "NestHost" => AttributeBody::NestHost(r.u16()?),
        "NestMembers" => AttributeBody::NestMembers(r.list(|r| r.u16())?),
        "PermittedSubclasses" => AttributeBody::PermittedSubclasses(r.list(|r| r.u16())?),
        "Synthetic" => AttributeBody::Synthetic,
        "Deprecated" => AttributeBody::Deprecated,
        _ => {
            let rest = r.remaining();
            AttributeBody::Raw(r.bytes(rest)?.to_vec())
        }
    })
}

fn parse_local(r: &mut ByteReader<'_>) -> PipelineResult<LocalVariable> {
    Ok(LocalVariable {
        start_pc: r.u16()?,
        length: r.u16()?,
        name: r.u16()?,
        descriptor: r.u16()?,
        index: r.u16()?,
    })
}

fn parse_vtype(r: &mut ByteReader<'_>) -> PipelineResult<VerificationType> {
    Ok(match r.u8()? {
        0 => VerificationType::Top,
        1 => VerificationType::Integer,
        2 => VerificationType::Float,
        3 => VerificationType::Double,
        4 => VerificationType::Long,
        5 => VerificationType::Null,
        6 => VerificationType::UninitializedThis,
        7 => VerificationType::Object(r.u16()?),
        8 => VerificationType::Uninitialized(r.u16()?),
        other => return Err(r.error(format!("bad verification type {other}"))),
    })
}

fn parse_frame(r: &mut ByteReader<'_>) -> PipelineResult<StackMapFrame> {
    let frame_type = r.u8()?;
    Ok(match frame_type {
        0..=63 => StackMapFrame::Same {
            offset_delta: frame_type as u16,
            extended: false,
        },
        64..=127 => StackMapFrame::SameLocals1 {
            offset_delta: (frame_type - 64) as u16,
            stack: parse_vtype(r)?,
            extended: false,
        },
        247 => StackMapFrame::SameLocals1 {
            offset_delta: r.u16()?,
            stack: parse_vtype(r)?,
            extended: true,
        },
        248..=250 => StackMapFrame::Chop {
            offset_delta: r.u16()?,
            chopped: 251 - frame_type,
        },
        251 => StackMapFrame::Same {
            offset_delta: r.u16()?,
            extended: true,
        },
        252..=254 => {
            let offset_delta = r.u16()?;
            let mut locals = Vec::new();
            for _ in 0..(frame_type - 251) {
                locals.push(parse_vtype(r)?);
            }
            StackMapFrame::Append {
                offset_delta,
                locals,
            }
        }
        255 => {
            let offset_delta = r.u16()?;
            let locals = r.list(parse_vtype)?;
            let stack = r.list(parse_vtype)?;
            StackMapFrame::Full {
                offset_delta,
                locals,
                stack,
            }
        }
        other => return Err(r.error(format!("reserved stack map frame type {other}"))),
    })
}

fn parse_annotation(r: &mut ByteReader<'_>) -> PipelineResult<Annotation> {
    let type_index = r.u16()?;
    let elements = r.list(|r| Ok((r.u16()?, parse_element(r)?)))?;
    Ok(Annotation {
        type_index,
        elements,
    })
}

fn parse_element(r: &mut ByteReader<'_>) -> PipelineResult<ElementValue> {
    let tag = r.u8()?;
    Ok(match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' => ElementValue::Const {
            tag,
            index: r.u16()?,
        },
        b'e' => ElementValue::Enum {
            type_name: r.u16()?,
            const_name: r.u16()?,
        },
        b'c' => ElementValue::Class(r.u16()?),
        b'@' => ElementValue::Annotation(parse_annotation(r)?),
        b'[' => ElementValue::Array(r.list(parse_element)?),
        other => return Err(r.error(format!("bad element value tag {other}"))),
    })
}

// ── Writing ─────────────────────────────────────────────

pub fn write_attributes(w: &mut ByteWriter, attributes: &[Attribute]) -> PipelineResult<()> {
    w.count(attributes.len(), "attributes")?;
    for attr in attributes {
        let mut body = ByteWriter::new();
        write_body(&mut body, &attr.body)?;
        let body = body.into_inner();
        w.u16(attr.name_index);
        w.u32(body.len() as u32);
        w.bytes(&body);
    }
    Ok(())
}

fn write_body(w: &mut ByteWriter, body: &AttributeBody) -> PipelineResult<()> {
    match body {
        AttributeBody::Code(code) => {
            w.u16(code.max_stack);
            w.u16(code.max_locals);
            w.u32(code.code.len() as u32);
            w.bytes(&code.code);
            w.count(code.exception_table.len(), "exception table")?;
            for h in &code.exception_table {
                w.u16(h.start_pc);
                w.u16(h.end_pc);
                w.u16(h.handler_pc);
                w.u16(h.catch_type);
            }
            write_attributes(w, &code.attributes)?;
        }
        AttributeBody::ConstantValue(i)
        | AttributeBody::Signature(i)
        | AttributeBody::SourceFile(i)
        | AttributeBody::NestHost(i) => w.u16(*i),
        AttributeBody::Exceptions(list)
        | AttributeBody::NestMembers(list)
        | AttributeBody::PermittedSubclasses(list) => {
            w.count(list.len(), "class list")?;
            for i in list {
                w.u16(*i);
            }
        }
        AttributeBody::InnerClasses(list) => {
            w.count(list.len(), "inner classes")?;
            for ic in list {
                w.u16(ic.inner_class);
                w.u16(ic.outer_class);
                w.u16(ic.inner_name);
                w.u16(ic.access);
            }
        }
        AttributeBody::EnclosingMethod { class, method } => {
            w.u16(*class);
            w.u16(*method);
        }
        AttributeBody::LineNumberTable(list) => {
            w.count(list.len(), "line numbers")?;
            for ln in list {
                w.u16(ln.start_pc);
                w.u16(ln.line);
            }
        }
        AttributeBody::LocalVariableTable(list) | AttributeBody::LocalVariableTypeTable(list) => {
            w.count(list.len(), "local variables")?;
            for lv in list {
                w.u16(lv.start_pc);
                w.u16(lv.length);
                w.u16(lv.name);
                w.u16(lv.descriptor);
                w.u16(lv.index);
            }
        }
        AttributeBody::StackMapTable(frames) => {
            w.count(frames.len(), "stack map frames")?;
            for frame in frames {
                write_frame(w, frame)?;
            }
        }
        AttributeBody::Annotations(list) => {
            w.count(list.len(), "annotations")?;
            for a in list {
                write_annotation(w, a)?;
            }
        }
        AttributeBody::ParameterAnnotations(params) => {
            w.u8(u8::try_from(params.len()).map_err(|_| {
                PipelineError::class_format("<attribute>", "too many parameter annotations")
            })?);
            for list in params {
                w.count(list.len(), "annotations")?;
                for a in list {
                    write_annotation(w, a)?;
                }
            }
        }
        AttributeBody::AnnotationDefault(value) => write_element(w, value)?,
        AttributeBody::MethodParameters(params) => {
            w.u8(u8::try_from(params.len()).map_err(|_| {
                PipelineError::class_format("<attribute>", "too many method parameters")
            })?);
            for p in params {
                w.u16(p.name);
                w.u16(p.access);
            }
        }
        AttributeBody::BootstrapMethods(list) => {
            w.count(list.len(), "bootstrap methods")?;
            for bsm in list {
                w.u16(bsm.method_handle);
                w.count(bsm.arguments.len(), "bootstrap arguments")?;
                for arg in &bsm.arguments {
                    w.u16(*arg);
                }
            }
        }
        AttributeBody::Record(components) => {
            w.count(components.len(), "record components")?;
            for c in components {
                w.u16(c.name);
                w.u16(c.descriptor);
                write_attributes(w, &c.attributes)?;
            }
        }
        AttributeBody::Synthetic | AttributeBody::Deprecated => {}
        AttributeBody::Raw(bytes) => w.bytes(bytes),
    }
    Ok(())
}

fn write_vtype(w: &mut ByteWriter, t: &VerificationType) {
    match t {
        VerificationType::Top => w.u8(0),
        VerificationType::Integer => w.u8(1),
        VerificationType::Float => w.u8(2),
        VerificationType::Double => w.u8(3),
        VerificationType::Long => w.u8(4),
        VerificationType::Null => w.u8(5),
        VerificationType::UninitializedThis => w.u8(6),
        VerificationType::Object(i) => {
            w.u8(7);
            w.u16(*i);
        }
        VerificationType::Uninitialized(offset) => {
            w.u8(8);
            w.u16(*offset);
        }
    }
}

/// A compact frame whose delta grew past 63 during relocation switches to
/// the extended form.
fn write_frame(w: &mut ByteWriter, frame: &StackMapFrame) -> PipelineResult<()> {
    match frame {
        StackMapFrame::Same {
            offset_delta,
            extended,
        } => {
            if *offset_delta <= 63 && !extended {
                w.u8(*offset_delta as u8);
            } else {
                w.u8(251);
                w.u16(*offset_delta);
            }
        }
        StackMapFrame::SameLocals1 {
            offset_delta,
            stack,
            extended,
        } => {
            if *offset_delta <= 63 && !extended {
                w.u8(64 + *offset_delta as u8);
            } else {
                w.u8(247);
                w.u16(*offset_delta);
            }
            write_vtype(w, stack);
        }
        StackMapFrame::Chop {
            offset_delta,
            chopped,
        } => {
            w.u8(251 - chopped);
            w.u16(*offset_delta);
        }
        StackMapFrame::Append {
            offset_delta,
            locals,
        } => {
            w.u8(251 + locals.len() as u8);
            w.u16(*offset_delta);
            for t in locals {
                write_vtype(w, t);
            }
        }
        StackMapFrame::Full {
            offset_delta,
            locals,
            stack,
        } => {
            w.u8(255);
            w.u16(*offset_delta);
            w.count(locals.len(), "frame locals")?;
            for t in locals {
                write_vtype(w, t);
            }
            w.count(stack.len(), "frame stack")?;
            for t in stack {
                write_vtype(w, t);
            }
        }
    }
    Ok(())
}

fn write_annotation(w: &mut ByteWriter, a: &Annotation) -> PipelineResult<()> {
    w.u16(a.type_index);
    w.count(a.elements.len(), "annotation elements")?;
    for (name, value) in &a.elements {
        w.u16(*name);
        write_element(w, value)?;
    }
    Ok(())
}

fn write_element(w: &mut ByteWriter, value: &ElementValue) -> PipelineResult<()> {
    match value {
        ElementValue::Const { tag, index } => {
            w.u8(*tag);
            w.u16(*index);
        }
        ElementValue::Enum {
            type_name,
            const_name,
        } => {
            w.u8(b'e');
            w.u16(*type_name);
            w.u16(*const_name);
        }
        ElementValue::Class(i) => {
            w.u8(b'c');
            w.u16(*i);
        }
        ElementValue::Annotation(a) => {
            w.u8(b'@');
            write_annotation(w, a)?;
        }
        ElementValue::Array(values) => {
            w.u8(b'[');
            w.count(values.len(), "element array")?;
            for v in values {
                write_element(w, v)?;
            }
        }
    }
    Ok(())
}

// ── Constant index relocation ───────────────────────────

/// Rewrite every constant-pool index held by an attribute through `map`.
///
/// Raw attributes cannot be relocated (their layout is unknown) and come
/// back as `None`; callers drop them. Code bodies are not touched here, see
/// `code::relocate`.
pub fn relocate_attribute(
    attr: &Attribute,
    map: &mut dyn FnMut(u16) -> PipelineResult<u16>,
) -> PipelineResult<Option<Attribute>> {
    let name_index = map(attr.name_index)?;
    let body = match &attr.body {
        AttributeBody::Raw(_) | AttributeBody::Code(_) => return Ok(None),
        AttributeBody::BootstrapMethods(_) => return Ok(None),
        AttributeBody::ConstantValue(i) => AttributeBody::ConstantValue(map(*i)?),
        AttributeBody::Signature(i) => AttributeBody::Signature(map(*i)?),
        AttributeBody::SourceFile(i) => AttributeBody::SourceFile(map(*i)?),
        AttributeBody::NestHost(i) => AttributeBody::NestHost(map(*i)?),
        AttributeBody::Exceptions(list) => AttributeBody::Exceptions(map_list(list, map)?),
        AttributeBody::NestMembers(list) => AttributeBody::NestMembers(map_list(list, map)?),
        AttributeBody::PermittedSubclasses(list) => {
            AttributeBody::PermittedSubclasses(map_list(list, map)?)
        }
        AttributeBody::InnerClasses(list) => AttributeBody::InnerClasses(
            list.iter()
                .map(|ic| {
                    Ok(InnerClass {
                        inner_class: map(ic.inner_class)?,
                        outer_class: map(ic.outer_class)?,
                        inner_name: map(ic.inner_name)?,
                        access: ic.access,
                    })
                })
                .collect::<PipelineResult<_>>()?,
        ),
        AttributeBody::EnclosingMethod { class, method } => AttributeBody::EnclosingMethod {
            class: map(*class)?,
            method: map(*method)?,
        },
        AttributeBody::LineNumberTable(list) => AttributeBody::LineNumberTable(list.clone()),
        AttributeBody::LocalVariableTable(list) => {
            AttributeBody::LocalVariableTable(relocate_locals(list, map)?)
        }
        AttributeBody::LocalVariableTypeTable(list) => {
            AttributeBody::LocalVariableTypeTable(relocate_locals(list, map)?)
        }
        AttributeBody::StackMapTable(frames) => {
            let mut frames = frames.clone();
            for frame in frames.iter_mut() {
                for t in frame.types_mut() {
                    if let VerificationType::Object(i) = t {
                        *i = map(*i)?;
                    }
                }
            }
            AttributeBody::StackMapTable(frames)
        }
        AttributeBody::Annotations(list) => AttributeBody::Annotations(
            list.iter()
                .map(|a| relocate_annotation(a, map))
                .collect::<PipelineResult<_>>()?,
        ),
        AttributeBody::ParameterAnnotations(params) => AttributeBody::ParameterAnnotations(
            params
                .iter()
                .map(|list| {
                    list.iter()
                        .map(|a| relocate_annotation(a, map))
                        .collect::<PipelineResult<Vec<_>>>()
                })
                .collect::<PipelineResult<_>>()?,
        ),
        AttributeBody::AnnotationDefault(v) => {
            AttributeBody::AnnotationDefault(relocate_element(v, map)?)
        }
        AttributeBody::MethodParameters(params) => AttributeBody::MethodParameters(
            params
                .iter()
                .map(|p| {
                    Ok(MethodParameter {
                        name: map(p.name)?,
                        access: p.access,
                    })
                })
                .collect::<PipelineResult<_>>()?,
        ),
        AttributeBody::Record(components) => {
            let mut out = Vec::with_capacity(components.len());
            for c in components {
                let mut attributes = Vec::new();
                for a in &c.attributes {
                    if let Some(a) = relocate_attribute(a, map)? {
                        attributes.push(a);
                    }
                }
                out.push(RecordComponent {
                    name: map(c.name)?,
                    descriptor: map(c.descriptor)?,
                    attributes,
                });
            }
            AttributeBody::Record(out)
        }
        AttributeBody::Synthetic => AttributeBody::Synthetic,
        AttributeBody::Deprecated => AttributeBody::Deprecated,
    };
    Ok(Some(Attribute { name_index, body }))
}

fn map_list(
    list: &[u16],
    map: &mut dyn FnMut(u16) -> PipelineResult<u16>,
) -> PipelineResult<Vec<u16>> {
    list.iter().map(|i| map(*i)).collect()
}

fn relocate_locals(
    list: &[LocalVariable],
    map: &mut dyn FnMut(u16) -> PipelineResult<u16>,
) -> PipelineResult<Vec<LocalVariable>> {
    list.iter()
        .map(|lv| {
            Ok(LocalVariable {
                name: map(lv.name)?,
                descriptor: map(lv.descriptor)?,
                ..*lv
            })
        })
        .collect()
}

fn relocate_annotation(
    a: &Annotation,
    map: &mut dyn FnMut(u16) -> PipelineResult<u16>,
) -> PipelineResult<Annotation> {
    Ok(Annotation {
        type_index: map(a.type_index)?,
        elements: a
            .elements
            .iter()
            .map(|(name, value)| Ok((map(*name)?, relocate_element(value, map)?)))
            .collect::<PipelineResult<_>>()?,
    })
}

fn relocate_element(
    value: &ElementValue,
    map: &mut dyn FnMut(u16) -> PipelineResult<u16>,
) -> PipelineResult<ElementValue> {
    Ok(match value {
        ElementValue::Const { tag, index } => ElementValue::Const {
            tag: *tag,
            index: map(*index)?,
        },
        ElementValue::Enum {
            type_name,
            const_name,
        } => ElementValue::Enum {
            type_name: map(*type_name)?,
            const_name: map(*const_name)?,
        },
        ElementValue::Class(i) => ElementValue::Class(map(*i)?),
        ElementValue::Annotation(a) => ElementValue::Annotation(relocate_annotation(a, map)?),
        ElementValue::Array(values) => ElementValue::Array(
            values
                .iter()
                .map(|v| relocate_element(v, map))
                .collect::<PipelineResult<_>>()?,
        ),
    })
}
