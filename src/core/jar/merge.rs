use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::archive::Jar;
use crate::core::classfile::attributes::{relocate_attribute, Attribute, AttributeBody, BootstrapMethod};
use crate::core::classfile::code;
use crate::core::classfile::descriptor::split_method;
use crate::core::classfile::{flags, ClassFile, Constant, ConstantPool, Member, PoolImporter};
use crate::core::error::{PipelineError, PipelineResult};

/// Which distribution a class or member came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Client,
    Server,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassProvenance {
    pub side: Side,
    /// Keyed by `name:descriptor`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Side>,
    /// Keyed by `name descriptor`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub methods: BTreeMap<String, Side>,
}

impl ClassProvenance {
    fn whole(side: Side) -> Self {
        Self {
            side,
            fields: BTreeMap::new(),
            methods: BTreeMap::new(),
        }
    }
}

/// Per-class and per-member provenance of a merged jar, keyed by class name
/// in the namespace the jars were merged in.
pub type ProvenanceTable = BTreeMap<String, ClassProvenance>;

#[derive(Debug, Clone)]
pub struct MergedJar {
    pub jar: Jar,
    pub provenance: ProvenanceTable,
}

impl MergedJar {
    /// A lone distribution, taken as it is with every class attributed to
    /// `side`.
    pub fn single(jar: Jar, side: Side) -> Self {
        let provenance = jar
            .classes
            .keys()
            .map(|name| (name.clone(), ClassProvenance::whole(side)))
            .collect();
        info!("Single {:?} jar: {} classes, nothing to merge", side, jar.classes.len());
        Self { jar, provenance }
    }
}

/// Merge a client and a server jar into one class set.
///
/// Classes found in one jar are taken as they are. Classes found in both are
/// merged member by member: identical members are kept once, members unique
/// to one side are unioned in, and incompatible definitions fail with
/// `MergeConflict`. Resources present in both jars are taken from the client.
pub fn merge_jars(client: &Jar, server: &Jar) -> PipelineResult<MergedJar> {
    let mut jar = Jar::new();
    let mut provenance = ProvenanceTable::new();

    for (name, bytes) in &client.classes {
        match server.classes.get(name) {
            None => {
                jar.classes.insert(name.clone(), bytes.clone());
                provenance.insert(name.clone(), ClassProvenance::whole(Side::Client));
            }
            Some(server_bytes) if server_bytes == bytes => {
                jar.classes.insert(name.clone(), bytes.clone());
                provenance.insert(name.clone(), ClassProvenance::whole(Side::Both));
            }
            Some(server_bytes) => {
                let (merged, record) = merge_class(name, bytes, server_bytes)?;
                jar.classes.insert(name.clone(), merged);
                provenance.insert(name.clone(), record);
            }
        }
    }
    for (name, bytes) in &server.classes {
        if !client.classes.contains_key(name) {
            jar.classes.insert(name.clone(), bytes.clone());
            provenance.insert(name.clone(), ClassProvenance::whole(Side::Server));
        }
    }

    jar.resources = client.resources.clone();
    for (path, data) in &server.resources {
        jar.resources.entry(path.clone()).or_insert_with(|| data.clone());
    }

    let shared = provenance.values().filter(|p| p.side == Side::Both).count();
    info!(
        "Merged jars: {} classes ({} shared, {} client-only, {} server-only)",
        jar.classes.len(),
        shared,
        provenance.values().filter(|p| p.side == Side::Client).count(),
        provenance.values().filter(|p| p.side == Side::Server).count()
    );
    Ok(MergedJar { jar, provenance })
}

fn conflict(class: &str, client: String, server: String) -> PipelineError {
    PipelineError::MergeConflict {
        class: class.to_string(),
        client,
        server,
    }
}

fn merge_class(
    name: &str,
    client_bytes: &[u8],
    server_bytes: &[u8],
) -> PipelineResult<(Vec<u8>, ClassProvenance)> {
    let mut merged = ClassFile::parse(client_bytes, name)?;
    let server = ClassFile::parse(server_bytes, name)?;

    let client_super = merged.super_name()?;
    let server_super = server.super_name()?;
    if client_super != server_super {
        return Err(conflict(
            name,
            format!("class {name} extends {}", client_super.unwrap_or_default()),
            format!("class {name} extends {}", server_super.unwrap_or_default()),
        ));
    }

    let mut record = ClassProvenance::whole(Side::Both);

    let client_interfaces = merged.interface_names()?;
    for iface in server.interface_names()? {
        if !client_interfaces.contains(&iface) {
            let index = merged.pool.class_index(&iface)?;
            merged.interfaces.push(index);
        }
    }

    let client_fields = merged.field_signatures()?;
    let client_methods = merged.method_signatures()?;
    for (field_name, desc) in &client_fields {
        record
            .fields
            .insert(format!("{field_name}:{desc}"), Side::Client);
    }
    for (method_name, desc) in &client_methods {
        record
            .methods
            .insert(format!("{method_name}{desc}"), Side::Client);
    }

    let mut bootstrap = take_bootstrap_methods(&mut merged);
    let server_bootstrap = match server.find_attribute("BootstrapMethods").map(|a| &a.body) {
        Some(AttributeBody::BootstrapMethods(list)) => list.clone(),
        _ => Vec::new(),
    };
    let mut new_fields = Vec::new();
    let mut new_methods = Vec::new();
    {
        let mut copier = MemberCopier {
            class: name,
            src: &server.pool,
            importer: PoolImporter::new(&server.pool, &mut merged.pool),
            src_bootstrap: &server_bootstrap,
            dst_bootstrap: &mut bootstrap,
            dynamic: HashMap::new(),
        };

        for field in &server.fields {
            let field_name = server.member_name(field)?;
            let desc = server.member_descriptor(field)?;
            let key = format!("{field_name}:{desc}");
            match client_fields.iter().position(|(n, d)| *n == field_name && *d == desc) {
                Some(i) => {
                    let existing = &merged.fields[i];
                    if existing.has_flag(flags::ACC_STATIC) != field.has_flag(flags::ACC_STATIC) {
                        return Err(conflict(
                            name,
                            describe_field(name, &field_name, &desc, existing.access),
                            describe_field(name, &field_name, &desc, field.access),
                        ));
                    }
                    record.fields.insert(key, Side::Both);
                }
                None => {
                    if let Some((_, client_desc)) =
                        client_fields.iter().find(|(n, _)| *n == field_name)
                    {
                        return Err(conflict(
                            name,
                            format!("field {name}.{field_name}:{client_desc}"),
                            format!("field {name}.{field_name}:{desc}"),
                        ));
                    }
                    new_fields.push(copier.copy_member(field)?);
                    record.fields.insert(key, Side::Server);
                }
            }
        }

        for method in &server.methods {
            let method_name = server.member_name(method)?;
            let desc = server.member_descriptor(method)?;
            let key = format!("{method_name}{desc}");
            match client_methods.iter().position(|(n, d)| *n == method_name && *d == desc) {
                Some(i) => {
                    let existing = &merged.methods[i];
                    if existing.has_flag(flags::ACC_STATIC) != method.has_flag(flags::ACC_STATIC) {
                        return Err(conflict(
                            name,
                            describe_method(name, &method_name, &desc, existing.access),
                            describe_method(name, &method_name, &desc, method.access),
                        ));
                    }
                    record.methods.insert(key, Side::Both);
                }
                None => {
                    let (params, _) = split_method(&desc)?;
                    for (client_name, client_desc) in &client_methods {
                        if *client_name != method_name {
                            continue;
                        }
                        let (client_params, _) = split_method(client_desc)?;
                        if client_params == params {
                            return Err(conflict(
                                name,
                                format!("method {name}.{method_name}{client_desc}"),
                                format!("method {name}.{method_name}{desc}"),
                            ));
                        }
                    }
                    new_methods.push(copier.copy_member(method)?);
                    record.methods.insert(key, Side::Server);
                }
            }
        }
    }

    merged.fields.extend(new_fields);
    merged.methods.extend(new_methods);
    if !bootstrap.is_empty() {
        let name_index = merged.pool.utf8_index("BootstrapMethods")?;
        merged.attributes.push(Attribute {
            name_index,
            body: AttributeBody::BootstrapMethods(bootstrap),
        });
    }

    debug!(
        "merged {}: {} server-only fields, {} server-only methods",
        name,
        record.fields.values().filter(|s| **s == Side::Server).count(),
        record.methods.values().filter(|s| **s == Side::Server).count()
    );
    Ok((merged.to_bytes()?, record))
}

/// Detach the class's bootstrap method table so new entries can be appended
/// while the pool is borrowed. The attribute is re-attached at the end.
fn take_bootstrap_methods(class: &mut ClassFile) -> Vec<BootstrapMethod> {
    let mut taken = Vec::new();
    class.attributes.retain(|attr| match &attr.body {
        AttributeBody::BootstrapMethods(list) => {
            taken = list.clone();
            false
        }
        _ => true,
    });
    taken
}

fn describe_field(class: &str, name: &str, desc: &str, access: u16) -> String {
    let scope = if access & flags::ACC_STATIC != 0 { "static " } else { "" };
    format!("{scope}field {class}.{name}:{desc}")
}

fn describe_method(class: &str, name: &str, desc: &str, access: u16) -> String {
    let scope = if access & flags::ACC_STATIC != 0 { "static " } else { "" };
    format!("{scope}method {class}.{name}{desc}")
}

/// Copies members from the server class into the merged class's pool.
struct MemberCopier<'a> {
    class: &'a str,
    src: &'a ConstantPool,
    importer: PoolImporter<'a>,
    src_bootstrap: &'a [BootstrapMethod],
    dst_bootstrap: &'a mut Vec<BootstrapMethod>,
    dynamic: HashMap<u16, u16>,
}

impl MemberCopier<'_> {
    fn import(&mut self, index: u16) -> PipelineResult<u16> {
        let (bootstrap, name_and_type, invoke) = match self.src.get(index)? {
            Constant::InvokeDynamic {
                bootstrap,
                name_and_type,
            } => (*bootstrap, *name_and_type, true),
            Constant::Dynamic {
                bootstrap,
                name_and_type,
            } => (*bootstrap, *name_and_type, false),
            _ => return self.importer.import(index),
        };
        if let Some(mapped) = self.dynamic.get(&index) {
            return Ok(*mapped);
        }

        let method = self
            .src_bootstrap
            .get(bootstrap as usize)
            .cloned()
            .ok_or_else(|| {
                PipelineError::class_format(self.class, format!("missing bootstrap method {bootstrap}"))
            })?;
        let mut copied = BootstrapMethod {
            method_handle: self.import(method.method_handle)?,
            arguments: Vec::with_capacity(method.arguments.len()),
        };
        for arg in &method.arguments {
            let mapped = self.import(*arg)?;
            copied.arguments.push(mapped);
        }
        let slot = match self.dst_bootstrap.iter().position(|b| *b == copied) {
            Some(slot) => slot,
            None => {
                self.dst_bootstrap.push(copied);
                self.dst_bootstrap.len() - 1
            }
        };
        let slot = u16::try_from(slot).map_err(|_| {
            PipelineError::class_format(self.class, "too many bootstrap methods")
        })?;
        let name_and_type = self.importer.import(name_and_type)?;
        let entry = if invoke {
            Constant::InvokeDynamic {
                bootstrap: slot,
                name_and_type,
            }
        } else {
            Constant::Dynamic {
                bootstrap: slot,
                name_and_type,
            }
        };
        let mapped = self.importer.destination().intern(entry)?;
        self.dynamic.insert(index, mapped);
        Ok(mapped)
    }

    fn copy_member(&mut self, member: &Member) -> PipelineResult<Member> {
        let mut attributes = Vec::with_capacity(member.attributes.len());
        for attr in &member.attributes {
            let copied = match &attr.body {
                AttributeBody::Code(body) => {
                    let relocated = code::relocate(body, &mut |i| self.import(i))?;
                    Some(Attribute {
                        name_index: self.import(attr.name_index)?,
                        body: AttributeBody::Code(relocated),
                    })
                }
                _ => relocate_attribute(attr, &mut |i| self.import(i))?,
            };
            if let Some(copied) = copied {
                attributes.push(copied);
            }
        }
        Ok(Member {
            access: member.access,
            name_index: self.import(member.name_index)?,
            descriptor_index: self.import(member.descriptor_index)?,
            attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classfile::builder::{ClassBuilder, CodeEmitter};
    use crate::core::classfile::code::op;

    fn jar_of(classes: Vec<(&str, Vec<u8>)>) -> Jar {
        let mut jar = Jar::new();
        for (name, bytes) in classes {
            jar.classes.insert(name.to_string(), bytes);
        }
        jar
    }

    fn shared_class(field: &str, extra: Option<(&str, &str)>) -> Vec<u8> {
        let mut builder = ClassBuilder::new("a", Some("java/lang/Object"))
            .unwrap()
            .field(flags::ACC_PRIVATE, field, "I")
            .unwrap()
            .method(
                flags::ACC_PUBLIC,
                "b",
                "()V",
                Some(&|c: &mut CodeEmitter<'_>| {
                    c.return_void();
                    Ok(())
                }),
            )
            .unwrap();
        if let Some((name, desc)) = extra {
            builder = builder
                .method(
                    flags::ACC_PUBLIC,
                    name,
                    desc,
                    Some(&|c: &mut CodeEmitter<'_>| {
                        c.ldc_string("server side")?.pop();
                        c.aload(0)
                            .field_insn(op::GETFIELD, "a", "s", "I")?
                            .pop()
                            .return_void();
                        Ok(())
                    }),
                )
                .unwrap();
        }
        builder.to_bytes().unwrap()
    }

    #[test]
    fn unions_members_of_shared_classes() {
        let client = jar_of(vec![
            ("a", shared_class("c", None)),
            ("client/Only", ClassBuilder::new("client/Only", None).unwrap().to_bytes().unwrap()),
        ]);
        let server = jar_of(vec![("a", shared_class("s", Some(("d", "()V"))))]);

        let merged = merge_jars(&client, &server).unwrap();
        let class = ClassFile::parse(merged.jar.class("a").unwrap(), "a").unwrap();
        assert!(class.find_field("c", "I").is_some());
        assert!(class.find_field("s", "I").is_some());
        let copied = class.find_method("d", "()V").unwrap();
        assert!(copied.code().is_some());

        let record = &merged.provenance["a"];
        assert_eq!(record.side, Side::Both);
        assert_eq!(record.fields["c:I"], Side::Client);
        assert_eq!(record.fields["s:I"], Side::Server);
        assert_eq!(record.methods["b()V"], Side::Both);
        assert_eq!(merged.provenance["client/Only"].side, Side::Client);
    }

    #[test]
    fn copied_code_resolves_in_the_merged_pool() {
        let client = jar_of(vec![("a", shared_class("c", None))]);
        let server = jar_of(vec![("a", shared_class("s", Some(("d", "()V"))))]);
        let merged = merge_jars(&client, &server).unwrap();
        let class = ClassFile::parse(merged.jar.class("a").unwrap(), "a").unwrap();
        let body = class.find_method("d", "()V").unwrap().code().unwrap();
        let insns = code::instructions(&body.code).unwrap();
        let field_ref = insns
            .iter()
            .find(|i| i.opcode == op::GETFIELD)
            .and_then(|i| code::constant_operand(&body.code, i))
            .unwrap();
        let member = class.pool.member_ref(field_ref).unwrap();
        assert_eq!((member.owner.as_str(), member.name.as_str()), ("a", "s"));
    }

    #[test]
    fn incompatible_return_types_conflict() {
        let client = jar_of(vec![("a", shared_class("c", Some(("d", "()V"))))]);
        let server = jar_of(vec![("a", shared_class("s", Some(("d", "()I"))))]);
        match merge_jars(&client, &server).unwrap_err() {
            PipelineError::MergeConflict { class, client, server } => {
                assert_eq!(class, "a");
                assert_eq!(client, "method a.d()V");
                assert_eq!(server, "method a.d()I");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn overloads_are_not_conflicts() {
        let client = jar_of(vec![("a", shared_class("c", Some(("d", "()V"))))]);
        let server = jar_of(vec![("a", shared_class("s", Some(("d", "(I)V"))))]);
        let merged = merge_jars(&client, &server).unwrap();
        let class = ClassFile::parse(merged.jar.class("a").unwrap(), "a").unwrap();
        assert!(class.find_method("d", "()V").is_some());
        assert!(class.find_method("d", "(I)V").is_some());
    }

    #[test]
    fn differing_superclasses_conflict() {
        let client = jar_of(vec![("a", ClassBuilder::new("a", Some("x")).unwrap().to_bytes().unwrap())]);
        let server = jar_of(vec![("a", ClassBuilder::new("a", Some("y")).unwrap().to_bytes().unwrap())]);
        assert!(matches!(
            merge_jars(&client, &server),
            Err(PipelineError::MergeConflict { .. })
        ));
    }

    fn conflict_between(client: Vec<u8>, server: Vec<u8>) -> (String, String) {
        let client = jar_of(vec![("a", client)]);
        let server = jar_of(vec![("a", server)]);
        match merge_jars(&client, &server).unwrap_err() {
            PipelineError::MergeConflict { class, client, server } => {
                assert_eq!(class, "a");
                (client, server)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn with_field(access: u16, desc: &str) -> Vec<u8> {
        ClassBuilder::new("a", Some("java/lang/Object"))
            .unwrap()
            .field(access, "x", desc)
            .unwrap()
            .to_bytes()
            .unwrap()
    }

    fn with_method(access: u16) -> Vec<u8> {
        ClassBuilder::new("a", Some("java/lang/Object"))
            .unwrap()
            .method(access, "m", "()V", None)
            .unwrap()
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn field_types_must_agree() {
        let (client, server) = conflict_between(
            with_field(flags::ACC_PRIVATE, "I"),
            with_field(flags::ACC_PRIVATE, "J"),
        );
        assert_eq!(client, "field a.x:I");
        assert_eq!(server, "field a.x:J");
    }

    #[test]
    fn shared_members_must_agree_on_static() {
        let (client, server) = conflict_between(
            with_field(flags::ACC_PRIVATE, "I"),
            with_field(flags::ACC_PRIVATE | flags::ACC_STATIC, "I"),
        );
        assert_eq!(client, "field a.x:I");
        assert_eq!(server, "static field a.x:I");

        let (client, server) = conflict_between(
            with_method(flags::ACC_PUBLIC | flags::ACC_STATIC),
            with_method(flags::ACC_PUBLIC),
        );
        assert_eq!(client, "static method a.m()V");
        assert_eq!(server, "method a.m()V");
    }
}
