use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::classfile::{flags, ClassFile};
use crate::core::error::PipelineResult;
use crate::core::jar::Jar;
use crate::core::mappings::MemberKind;

/// Decides which classes belong to the game. Members of classes outside the
/// game pass through remapping untouched; game symbols must be mapped.
#[derive(Debug, Clone, Default)]
pub struct GameScope {
    prefixes: Vec<String>,
    classes: HashSet<String>,
}

impl GameScope {
    pub fn new(prefixes: &[String], classes: impl IntoIterator<Item = String>) -> Self {
        Self {
            prefixes: prefixes.to_vec(),
            classes: classes.into_iter().collect(),
        }
    }

    /// Owned by the game: shipped in the jar, under a game package, or in
    /// the default package (where obfuscated classes live).
    pub fn owns(&self, class: &str) -> bool {
        if class.starts_with('[') {
            return false;
        }
        self.classes.contains(class)
            || !class.contains('/')
            || self.prefixes.iter().any(|p| class.starts_with(p.as_str()))
    }
}

#[derive(Debug, Clone)]
struct MemberDecl {
    name: String,
    desc: String,
    access: u16,
}

#[derive(Debug, Clone)]
struct ClassNode {
    super_name: Option<String>,
    interfaces: Vec<String>,
    fields: Vec<MemberDecl>,
    methods: Vec<MemberDecl>,
}

impl ClassNode {
    fn members(&self, kind: MemberKind) -> &[MemberDecl] {
        match kind {
            MemberKind::Field => &self.fields,
            MemberKind::Method => &self.methods,
        }
    }
}

/// Ancestors of a class as seen from inside the jar.
#[derive(Debug, Default)]
pub struct Ancestry<'a> {
    /// The class itself first, then supertypes breadth-first. Only classes
    /// present in the jar.
    pub game: Vec<&'a str>,
    /// Some supertype lives outside the game (other than `java/lang/Object`),
    /// so an unknown member may be inherited from it.
    pub library_ancestor: bool,
}

/// Supertypes and declared members of every class in a jar, indexed once
/// before the per-class passes run.
#[derive(Debug, Clone, Default)]
pub struct ClassHierarchy {
    nodes: HashMap<String, ClassNode>,
}

impl ClassHierarchy {
    pub fn from_jar(jar: &Jar) -> PipelineResult<Self> {
        let mut nodes = HashMap::with_capacity(jar.classes.len());
        for (name, bytes) in &jar.classes {
            let class = ClassFile::parse(bytes, name)?;
            let decls = |members: &[crate::core::classfile::Member]| -> PipelineResult<Vec<MemberDecl>> {
                members
                    .iter()
                    .map(|m| {
                        Ok(MemberDecl {
                            name: class.member_name(m)?,
                            desc: class.member_descriptor(m)?,
                            access: m.access,
                        })
                    })
                    .collect()
            };
            let node = ClassNode {
                super_name: class.super_name()?,
                interfaces: class.interface_names()?,
                fields: decls(&class.fields)?,
                methods: decls(&class.methods)?,
            };
            nodes.insert(class.name()?, node);
        }
        Ok(Self { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, class: &str) -> bool {
        self.nodes.contains_key(class)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn super_name(&self, class: &str) -> Option<&str> {
        self.nodes.get(class)?.super_name.as_deref()
    }

    pub fn ancestry<'a>(&'a self, class: &'a str, scope: &GameScope) -> Ancestry<'a> {
        let mut out = Ancestry::default();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([class]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            match self.nodes.get(current) {
                Some(node) => {
                    out.game.push(current);
                    queue.extend(node.super_name.as_deref());
                    queue.extend(node.interfaces.iter().map(String::as_str));
                }
                None if current == "java/lang/Object" => {}
                None if !scope.owns(current) => out.library_ancestor = true,
                None => {}
            }
        }
        out
    }

    /// Access flags of a member declared directly in `class`.
    pub fn declared(&self, kind: MemberKind, class: &str, name: &str, desc: &str) -> Option<u16> {
        self.nodes
            .get(class)?
            .members(kind)
            .iter()
            .find(|m| m.name == name && m.desc == desc)
            .map(|m| m.access)
    }

    /// Descriptor of the first method named `name` declared in `class`.
    /// Annotation elements are referenced by name only.
    pub fn method_desc_by_name(&self, class: &str, name: &str) -> Option<&str> {
        self.nodes
            .get(class)?
            .methods
            .iter()
            .find(|m| m.name == name && m.access & flags::ACC_STATIC == 0)
            .map(|m| m.desc.as_str())
    }
}
