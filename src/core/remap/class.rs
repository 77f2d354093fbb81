use std::collections::HashMap;

use super::remapper::Remapper;
use crate::core::classfile::attributes::{
    Annotation, Attribute, AttributeBody, BootstrapMethod, ElementValue,
};
use crate::core::classfile::descriptor::split_method;
use crate::core::classfile::{ClassFile, Constant, ConstantPool, RefKind};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::mappings::MemberKind;

const LAMBDA_METAFACTORY: &str = "java/lang/invoke/LambdaMetafactory";

/// Remap one class file. Returns the class's new name and bytes.
///
/// The input is never modified: the class is parsed into a fresh value,
/// rewritten and serialized again. Only the class itself and the shared,
/// read-only `Remapper` are consulted.
pub fn remap_class(bytes: &[u8], context: &str, remapper: &Remapper) -> PipelineResult<(String, Vec<u8>)> {
    let mut class = ClassFile::parse(bytes, context)?;
    let old_name = class.name()?;
    let bootstrap = bootstrap_methods(&class);

    // Pass 1: decide every replacement against the untouched pool. New
    // entries are only appended, so indices read here stay valid.
    let mut old_classes: HashMap<u16, String> = HashMap::new();
    let mut replacements: Vec<(u16, Constant)> = Vec::new();
    let entries: Vec<(u16, Constant)> = class.pool.iter().map(|(i, c)| (i, c.clone())).collect();
    for (index, entry) in &entries {
        match entry {
            Constant::Class(_) => {
                let name = class.pool.class_name(*index)?;
                let mapped = remapper.map_class_entry(&name)?;
                if mapped != name {
                    let utf8 = class.pool.utf8_index(&mapped)?;
                    replacements.push((*index, Constant::Class(utf8)));
                }
                old_classes.insert(*index, name);
            }
            Constant::MethodType(desc_index) => {
                let desc = class.pool.utf8(*desc_index)?;
                let mapped = remapper.map_desc(&desc)?;
                if mapped != desc {
                    replacements.push((*index, Constant::MethodType(class.pool.utf8_index(&mapped)?)));
                }
            }
            Constant::Fieldref { class: owner, .. }
            | Constant::Methodref { class: owner, .. }
            | Constant::InterfaceMethodref { class: owner, .. } => {
                let member = class.pool.member_ref(*index)?;
                let kind = match member.kind {
                    RefKind::Field => MemberKind::Field,
                    RefKind::Method | RefKind::InterfaceMethod => MemberKind::Method,
                };
                let name = remapper.map_member(kind, &member.owner, &member.name, &member.descriptor)?;
                let desc = remapper.map_desc(&member.descriptor)?;
                if name != member.name || desc != member.descriptor {
                    let name_and_type = class.pool.name_and_type_index(&name, &desc)?;
                    let replaced = match member.kind {
                        RefKind::Field => Constant::Fieldref {
                            class: *owner,
                            name_and_type,
                        },
                        RefKind::Method => Constant::Methodref {
                            class: *owner,
                            name_and_type,
                        },
                        RefKind::InterfaceMethod => Constant::InterfaceMethodref {
                            class: *owner,
                            name_and_type,
                        },
                    };
                    replacements.push((*index, replaced));
                }
            }
            Constant::InvokeDynamic {
                bootstrap: slot,
                name_and_type,
            } => {
                let (name, desc) = class.pool.name_and_type(*name_and_type)?;
                let method = bootstrap.get(*slot as usize).ok_or_else(|| {
                    PipelineError::class_format(context, format!("missing bootstrap method {slot}"))
                })?;
                let new_name = lambda_name(&class.pool, method, &name, &desc, remapper)?;
                let new_desc = remapper.map_desc(&desc)?;
                if new_name != name || new_desc != desc {
                    replacements.push((
                        *index,
                        Constant::InvokeDynamic {
                            bootstrap: *slot,
                            name_and_type: class.pool.name_and_type_index(&new_name, &new_desc)?,
                        },
                    ));
                }
            }
            Constant::Dynamic {
                bootstrap: slot,
                name_and_type,
            } => {
                let (name, desc) = class.pool.name_and_type(*name_and_type)?;
                let new_desc = remapper.map_desc(&desc)?;
                if new_desc != desc {
                    replacements.push((
                        *index,
                        Constant::Dynamic {
                            bootstrap: *slot,
                            name_and_type: class.pool.name_and_type_index(&name, &new_desc)?,
                        },
                    ));
                }
            }
            _ => {}
        }
    }

    // Pass 2: members, computed before class entries change.
    let mut member_updates = Vec::with_capacity(class.fields.len() + class.methods.len());
    for (kind, members) in [(MemberKind::Field, &class.fields), (MemberKind::Method, &class.methods)] {
        for member in members {
            let name = class.pool.utf8(member.name_index)?;
            let desc = class.pool.utf8(member.descriptor_index)?;
            let new_name = remapper.map_member(kind, &old_name, &name, &desc)?;
            let new_desc = remapper.map_desc(&desc)?;
            member_updates.push((new_name, new_desc));
        }
    }

    for (index, entry) in replacements {
        class.pool.set(index, entry)?;
    }

    let field_count = class.fields.len();
    for (i, (name, desc)) in member_updates.into_iter().enumerate() {
        let name_index = class.pool.utf8_index(&name)?;
        let descriptor_index = class.pool.utf8_index(&desc)?;
        let member = if i < field_count {
            &mut class.fields[i]
        } else {
            &mut class.methods[i - field_count]
        };
        member.name_index = name_index;
        member.descriptor_index = descriptor_index;
    }

    // Pass 3: attributes, now that class entries carry their new names.
    let mut rewriter = AttributeRewriter {
        remapper,
        owner: &old_name,
        old_classes: &old_classes,
    };
    let mut class_attributes = std::mem::take(&mut class.attributes);
    rewriter.rewrite_all(&mut class.pool, &mut class_attributes)?;
    class.attributes = class_attributes;
    for member in class.fields.iter_mut().chain(class.methods.iter_mut()) {
        rewriter.rewrite_all(&mut class.pool, &mut member.attributes)?;
    }

    let new_name = class.name()?;
    Ok((new_name, class.to_bytes()?))
}

fn bootstrap_methods(class: &ClassFile) -> Vec<BootstrapMethod> {
    class
        .attributes
        .iter()
        .find_map(|a| match &a.body {
            AttributeBody::BootstrapMethods(list) => Some(list.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

/// Name of an `invokedynamic` call site. Lambda call sites are named after
/// the functional interface method they implement, which is renamed like
/// any other method of that interface. Other call sites keep their name.
fn lambda_name(
    pool: &ConstantPool,
    method: &BootstrapMethod,
    name: &str,
    desc: &str,
    remapper: &Remapper,
) -> PipelineResult<String> {
    let Constant::MethodHandle { reference, .. } = pool.get(method.method_handle)? else {
        return Ok(name.to_string());
    };
    let handle = pool.member_ref(*reference)?;
    if handle.owner != LAMBDA_METAFACTORY {
        return Ok(name.to_string());
    }
    let (_, ret) = split_method(desc)?;
    let Some(interface) = ret.strip_prefix('L').and_then(|r| r.strip_suffix(';')) else {
        return Ok(name.to_string());
    };
    let sam_desc = match method.arguments.first().map(|i| pool.get(*i)) {
        Some(Ok(Constant::MethodType(desc_index))) => pool.utf8(*desc_index)?,
        _ => return Ok(name.to_string()),
    };
    remapper.map_member(MemberKind::Method, interface, name, &sam_desc)
}

struct AttributeRewriter<'a> {
    remapper: &'a Remapper,
    /// Old name of the class being remapped.
    owner: &'a str,
    /// Old names of the class's `Class` entries, by index.
    old_classes: &'a HashMap<u16, String>,
}

impl AttributeRewriter<'_> {
    fn rewrite_all(&mut self, pool: &mut ConstantPool, attributes: &mut [Attribute]) -> PipelineResult<()> {
        for attr in attributes.iter_mut() {
            self.rewrite(pool, &mut attr.body)?;
        }
        Ok(())
    }

    fn map_utf8(
        &self,
        pool: &mut ConstantPool,
        index: u16,
        map: impl Fn(&Remapper, &str) -> PipelineResult<String>,
    ) -> PipelineResult<u16> {
        let value = pool.utf8(index)?;
        let mapped = map(self.remapper, &value)?;
        if mapped == value {
            Ok(index)
        } else {
            pool.utf8_index(&mapped)
        }
    }

    fn rewrite(&mut self, pool: &mut ConstantPool, body: &mut AttributeBody) -> PipelineResult<()> {
        match body {
            AttributeBody::Code(code) => self.rewrite_all(pool, &mut code.attributes)?,
            AttributeBody::Signature(index) => {
                *index = self.map_utf8(pool, *index, Remapper::map_signature)?;
            }
            AttributeBody::LocalVariableTable(locals) => {
                for local in locals.iter_mut() {
                    local.descriptor = self.map_utf8(pool, local.descriptor, Remapper::map_desc)?;
                }
            }
            AttributeBody::LocalVariableTypeTable(locals) => {
                for local in locals.iter_mut() {
                    local.descriptor = self.map_utf8(pool, local.descriptor, Remapper::map_signature)?;
                }
            }
            AttributeBody::InnerClasses(entries) => {
                for entry in entries.iter_mut() {
                    if entry.inner_name == 0 {
                        continue;
                    }
                    let (Some(old_inner), new_inner) = (
                        self.old_classes.get(&entry.inner_class),
                        pool.class_name(entry.inner_class)?,
                    ) else {
                        continue;
                    };
                    if *old_inner == new_inner {
                        continue;
                    }
                    let old_outer = self.old_classes.get(&entry.outer_class).map(String::as_str);
                    let new_outer = if entry.outer_class == 0 {
                        None
                    } else {
                        Some(pool.class_name(entry.outer_class)?)
                    };
                    let simple = pool.utf8(entry.inner_name)?;
                    if simple_name(old_inner, old_outer) == simple {
                        let renamed = simple_name(&new_inner, new_outer.as_deref());
                        entry.inner_name = pool.utf8_index(&renamed)?;
                    }
                }
            }
            AttributeBody::EnclosingMethod { class, method } => {
                if *method != 0 {
                    let owner = self.old_classes.get(class).cloned().unwrap_or_default();
                    let (name, desc) = pool.name_and_type(*method)?;
                    let new_name = self.remapper.map_member(MemberKind::Method, &owner, &name, &desc)?;
                    let new_desc = self.remapper.map_desc(&desc)?;
                    *method = pool.name_and_type_index(&new_name, &new_desc)?;
                }
            }
            AttributeBody::Annotations(list) => {
                for annotation in list.iter_mut() {
                    self.rewrite_annotation(pool, annotation)?;
                }
            }
            AttributeBody::ParameterAnnotations(params) => {
                for annotation in params.iter_mut().flatten() {
                    self.rewrite_annotation(pool, annotation)?;
                }
            }
            AttributeBody::AnnotationDefault(value) => self.rewrite_element(pool, value)?,
            AttributeBody::Record(components) => {
                for component in components.iter_mut() {
                    let name = pool.utf8(component.name)?;
                    let desc = pool.utf8(component.descriptor)?;
                    let new_name = self.remapper.map_member(MemberKind::Field, self.owner, &name, &desc)?;
                    component.name = pool.utf8_index(&new_name)?;
                    component.descriptor = self.map_utf8(pool, component.descriptor, Remapper::map_desc)?;
                    self.rewrite_all(pool, &mut component.attributes)?;
                }
            }
            // Class entries were renamed in place; everything else here
            // holds no symbolic names.
            _ => {}
        }
        Ok(())
    }

    fn rewrite_annotation(&mut self, pool: &mut ConstantPool, annotation: &mut Annotation) -> PipelineResult<()> {
        let type_desc = pool.utf8(annotation.type_index)?;
        let annotation_class = type_desc
            .strip_prefix('L')
            .and_then(|t| t.strip_suffix(';'))
            .map(str::to_string);
        for (name_index, value) in annotation.elements.iter_mut() {
            if let Some(class) = &annotation_class {
                let name = pool.utf8(*name_index)?;
                let desc = self
                    .remapper
                    .hierarchy()
                    .method_desc_by_name(class, &name)
                    .map(str::to_string);
                if let Some(desc) = desc {
                    let mapped = self.remapper.map_member(MemberKind::Method, class, &name, &desc)?;
                    if mapped != name {
                        *name_index = pool.utf8_index(&mapped)?;
                    }
                }
            }
            self.rewrite_element(pool, value)?;
        }
        annotation.type_index = self.map_utf8(pool, annotation.type_index, Remapper::map_desc)?;
        Ok(())
    }

    fn rewrite_element(&mut self, pool: &mut ConstantPool, value: &mut ElementValue) -> PipelineResult<()> {
        match value {
            ElementValue::Const { .. } => {}
            ElementValue::Enum {
                type_name,
                const_name,
            } => {
                let desc = pool.utf8(*type_name)?;
                if let Some(class) = desc.strip_prefix('L').and_then(|t| t.strip_suffix(';')) {
                    let constant = pool.utf8(*const_name)?;
                    let mapped = self.remapper.map_member(MemberKind::Field, class, &constant, &desc)?;
                    if mapped != constant {
                        *const_name = pool.utf8_index(&mapped)?;
                    }
                }
                *type_name = self.map_utf8(pool, *type_name, Remapper::map_desc)?;
            }
            ElementValue::Class(index) => {
                *index = self.map_utf8(pool, *index, Remapper::map_desc)?;
            }
            ElementValue::Annotation(nested) => self.rewrite_annotation(pool, nested)?,
            ElementValue::Array(values) => {
                for v in values.iter_mut() {
                    self.rewrite_element(pool, v)?;
                }
            }
        }
        Ok(())
    }
}

/// Simple name of an inner class as javac records it: the part after
/// `Outer$`, or after the last `$` when the outer class is unknown.
fn simple_name(inner: &str, outer: Option<&str>) -> String {
    if let Some(rest) = outer.and_then(|o| inner.strip_prefix(o)).and_then(|r| r.strip_prefix('$')) {
        return rest.to_string();
    }
    let tail = inner.rsplit('/').next().unwrap_or(inner);
    tail.rsplit('$').next().unwrap_or(tail).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::core::classfile::builder::{ClassBuilder, CodeEmitter};
    use crate::core::classfile::code::{self, op};
    use crate::core::classfile::flags;
    use crate::core::jar::Jar;
    use crate::core::mappings::{resolve, MappingFormat, MappingSource, Namespace};

    const MAPPINGS: &str = "tiny\t2\t0\tofficial\tintermediary\tnamed
c\ta\tnet/minecraft/class_1\tnet/minecraft/Entity
\tf\tI\tb\tfield_1\thealth
\tm\t()V\tc\tmethod_1\ttick
c\td\tnet/minecraft/class_2\tnet/minecraft/World
\tm\t(La;)V\te\tmethod_2\tspawn
";

    fn setup() -> (Jar, Remapper) {
        let entity = ClassBuilder::new("a", Some("java/lang/Object"))
            .unwrap()
            .field(flags::ACC_PRIVATE, "b", "I")
            .unwrap()
            .method(
                flags::ACC_PUBLIC,
                "c",
                "()V",
                Some(&|c: &mut CodeEmitter<'_>| {
                    c.ldc_string("a")?.pop();
                    c.aload(0).field_insn(op::GETFIELD, "a", "b", "I")?.pop();
                    c.aload(0)
                        .invoke(op::INVOKEVIRTUAL, "a", "toString", "()Ljava/lang/String;")?
                        .pop()
                        .return_void();
                    Ok(())
                }),
            )
            .unwrap()
            .to_bytes()
            .unwrap();
        let world = ClassBuilder::new("d", Some("java/lang/Object"))
            .unwrap()
            .method(
                flags::ACC_PUBLIC,
                "e",
                "(La;)V",
                Some(&|c: &mut CodeEmitter<'_>| {
                    c.aload(1).invoke(op::INVOKEVIRTUAL, "a", "c", "()V")?.return_void();
                    Ok(())
                }),
            )
            .unwrap()
            .to_bytes()
            .unwrap();

        let mut jar = Jar::new();
        jar.classes.insert("a".into(), entity);
        jar.classes.insert("d".into(), world);

        let table = resolve(&[MappingSource {
            name: "test".into(),
            format: MappingFormat::Auto,
            contents: MAPPINGS.into(),
            override_existing: false,
        }])
        .unwrap();
        let remapper = Remapper::new(
            Arc::new(table),
            Namespace::Obfuscated,
            Namespace::Named,
            &["net/minecraft/".to_string()],
            &jar,
        )
        .unwrap();
        (jar, remapper)
    }

    #[test]
    fn renames_declarations_and_references() {
        let (jar, remapper) = setup();
        let (name, bytes) = remap_class(jar.class("d").unwrap(), "d", &remapper).unwrap();
        assert_eq!(name, "net/minecraft/World");

        let class = ClassFile::parse(&bytes, &name).unwrap();
        let method = class
            .find_method("spawn", "(Lnet/minecraft/Entity;)V")
            .unwrap();
        let body = method.code().unwrap();
        let call = code::instructions(&body.code)
            .unwrap()
            .into_iter()
            .find(|i| i.opcode == op::INVOKEVIRTUAL)
            .and_then(|i| code::constant_operand(&body.code, &i))
            .unwrap();
        let target = class.pool.member_ref(call).unwrap();
        assert_eq!(target.owner, "net/minecraft/Entity");
        assert_eq!(target.name, "tick");
    }

    #[test]
    fn string_literals_and_library_calls_are_untouched() {
        let (jar, remapper) = setup();
        let (_, bytes) = remap_class(jar.class("a").unwrap(), "a", &remapper).unwrap();
        let class = ClassFile::parse(&bytes, "Entity").unwrap();
        assert!(class.find_field("health", "I").is_some());

        let body = class.find_method("tick", "()V").unwrap().code().unwrap();
        let insns = code::instructions(&body.code).unwrap();
        let literal = code::constant_operand(&body.code, &insns[0]).unwrap();
        match class.pool.get(literal).unwrap() {
            Constant::String(utf8) => assert_eq!(class.pool.utf8(*utf8).unwrap(), "a"),
            other => panic!("unexpected {other:?}"),
        }
        let to_string = insns
            .iter()
            .find(|i| i.opcode == op::INVOKEVIRTUAL)
            .and_then(|i| code::constant_operand(&body.code, i))
            .unwrap();
        assert_eq!(class.pool.member_ref(to_string).unwrap().name, "toString");
    }

    #[test]
    fn unmapped_references_fail_with_the_symbol() {
        let (mut jar, _) = setup();
        let stray = ClassBuilder::new("q", Some("java/lang/Object"))
            .unwrap()
            .to_bytes()
            .unwrap();
        jar.classes.insert("q".into(), stray);
        let table = resolve(&[MappingSource {
            name: "test".into(),
            format: MappingFormat::Auto,
            contents: MAPPINGS.into(),
            override_existing: false,
        }])
        .unwrap();
        let remapper =
            Remapper::new(Arc::new(table), Namespace::Obfuscated, Namespace::Named, &[], &jar)
                .unwrap();
        match remap_class(jar.class("q").unwrap(), "q", &remapper).unwrap_err() {
            PipelineError::MappingGap { symbol, .. } => assert_eq!(symbol, "class q"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn inner_class_simple_names_follow_the_new_name() {
        assert_eq!(simple_name("net/minecraft/World$Chunk", Some("net/minecraft/World")), "Chunk");
        assert_eq!(simple_name("a$b", None), "b");
    }
}
