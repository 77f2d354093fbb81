use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::debug;

use super::namespace::Namespace;
use crate::core::classfile::descriptor::map_descriptor;
use crate::core::error::{PipelineError, PipelineResult};

/// One name per namespace. The obfuscated slot is always filled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Names([Option<String>; 3]);

impl Names {
    pub fn get(&self, ns: Namespace) -> Option<&str> {
        self.0[ns.index()].as_deref()
    }

    /// Name in `ns`, following the namespace fallback chain.
    pub fn resolve(&self, ns: Namespace) -> Option<&str> {
        ns.fallback_chain().iter().find_map(|n| self.get(*n))
    }

    fn slot(&mut self, ns: Namespace) -> &mut Option<String> {
        &mut self.0[ns.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberKind {
    Field,
    Method,
}

/// Obfuscated identity of a member within its owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberKey {
    pub name: String,
    pub desc: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassMapping {
    pub names: Names,
    pub fields: BTreeMap<MemberKey, Names>,
    pub methods: BTreeMap<MemberKey, Names>,
}

impl ClassMapping {
    pub fn members(&self, kind: MemberKind) -> &BTreeMap<MemberKey, Names> {
        match kind {
            MemberKind::Field => &self.fields,
            MemberKind::Method => &self.methods,
        }
    }

    fn members_mut(&mut self, kind: MemberKind) -> &mut BTreeMap<MemberKey, Names> {
        match kind {
            MemberKind::Field => &mut self.fields,
            MemberKind::Method => &mut self.methods,
        }
    }
}

/// A symbol in some namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Symbol {
    Class(String),
    Field {
        owner: String,
        name: String,
        desc: String,
    },
    Method {
        owner: String,
        name: String,
        desc: String,
    },
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Class(name) => write!(f, "class {name}"),
            Symbol::Field { owner, name, desc } => write!(f, "field {owner}.{name}:{desc}"),
            Symbol::Method { owner, name, desc } => write!(f, "method {owner}.{name}{desc}"),
        }
    }
}

type MemberIndexKey = (Namespace, MemberKind, String, String, String);

/// Immutable, namespace-aware mapping table. Entries are anchored on their
/// obfuscated names; lookups from other namespaces go through indexes built
/// once at construction.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    classes: BTreeMap<String, ClassMapping>,
    class_index: HashMap<(Namespace, String), String>,
    member_index: HashMap<MemberIndexKey, MemberKey>,
}

impl MappingTable {
    fn new(classes: BTreeMap<String, ClassMapping>) -> Self {
        let mut class_index = HashMap::new();
        for (obf, class) in &classes {
            for ns in Namespace::ALL {
                if let Some(name) = class.names.resolve(ns) {
                    class_index.insert((ns, name.to_string()), obf.clone());
                }
            }
        }

        let mut table = Self {
            classes,
            class_index,
            member_index: HashMap::new(),
        };

        let mut member_index = HashMap::new();
        for (obf_owner, class) in &table.classes {
            for kind in [MemberKind::Field, MemberKind::Method] {
                for (key, names) in class.members(kind) {
                    for ns in Namespace::ALL {
                        let Some(name) = names.resolve(ns) else {
                            continue;
                        };
                        let desc = table.convert_desc(&key.desc, Namespace::Obfuscated, ns);
                        member_index.insert(
                            (ns, kind, obf_owner.clone(), name.to_string(), desc),
                            key.clone(),
                        );
                    }
                }
            }
        }
        table.member_index = member_index;
        table
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn member_count(&self) -> usize {
        self.classes
            .values()
            .map(|c| c.fields.len() + c.methods.len())
            .sum()
    }

    /// Classes keyed by obfuscated name, sorted.
    pub fn classes(&self) -> impl Iterator<Item = (&str, &ClassMapping)> {
        self.classes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Find a class by its name in `ns`. Returns the obfuscated anchor and
    /// the mapping.
    pub fn lookup_class(&self, name: &str, ns: Namespace) -> Option<(&str, &ClassMapping)> {
        let obf = if ns == Namespace::Obfuscated {
            name
        } else {
            self.class_index.get(&(ns, name.to_string()))?.as_str()
        };
        self.classes.get_key_value(obf).map(|(k, v)| (k.as_str(), v))
    }

    /// Find a member by owner, name and descriptor, all in `ns`.
    pub fn lookup_member(
        &self,
        kind: MemberKind,
        owner: &str,
        name: &str,
        desc: &str,
        ns: Namespace,
    ) -> Option<&Names> {
        let (obf_owner, class) = self.lookup_class(owner, ns)?;
        let members = class.members(kind);
        if ns == Namespace::Obfuscated {
            return members.get(&MemberKey {
                name: name.to_string(),
                desc: desc.to_string(),
            });
        }
        let key = self.member_index.get(&(
            ns,
            kind,
            obf_owner.to_string(),
            name.to_string(),
            desc.to_string(),
        ))?;
        members.get(key)
    }

    pub fn convert_class(&self, name: &str, from: Namespace, to: Namespace) -> PipelineResult<String> {
        self.lookup_class(name, from)
            .and_then(|(_, c)| c.names.resolve(to))
            .map(str::to_owned)
            .ok_or_else(|| PipelineError::MappingGap {
                symbol: Symbol::Class(name.to_string()).to_string(),
                namespace: to.to_string(),
            })
    }

    pub fn convert_member_name(
        &self,
        kind: MemberKind,
        owner: &str,
        name: &str,
        desc: &str,
        from: Namespace,
        to: Namespace,
    ) -> PipelineResult<String> {
        self.lookup_member(kind, owner, name, desc, from)
            .and_then(|n| n.resolve(to))
            .map(str::to_owned)
            .ok_or_else(|| {
                let (owner, name, desc) = (owner.to_string(), name.to_string(), desc.to_string());
                let symbol = match kind {
                    MemberKind::Field => Symbol::Field { owner, name, desc },
                    MemberKind::Method => Symbol::Method { owner, name, desc },
                };
                PipelineError::MappingGap {
                    symbol: symbol.to_string(),
                    namespace: to.to_string(),
                }
            })
    }

    /// Convert a descriptor. Classes without an entry are left unchanged;
    /// deciding whether that is legal belongs to the caller.
    pub fn convert_desc(&self, desc: &str, from: Namespace, to: Namespace) -> String {
        let mut map = |class: &str| -> PipelineResult<String> {
            Ok(self
                .lookup_class(class, from)
                .and_then(|(_, c)| c.names.resolve(to))
                .unwrap_or(class)
                .to_string())
        };
        map_descriptor(desc, &mut map).unwrap_or_else(|_| desc.to_string())
    }

    /// Namespace conversion of any symbol. Absent entries are a
    /// `MappingGap` naming the symbol.
    pub fn convert(&self, symbol: &Symbol, from: Namespace, to: Namespace) -> PipelineResult<Symbol> {
        Ok(match symbol {
            Symbol::Class(name) => Symbol::Class(self.convert_class(name, from, to)?),
            Symbol::Field { owner, name, desc } => Symbol::Field {
                owner: self.convert_class(owner, from, to)?,
                name: self.convert_member_name(MemberKind::Field, owner, name, desc, from, to)?,
                desc: self.convert_desc(desc, from, to),
            },
            Symbol::Method { owner, name, desc } => Symbol::Method {
                owner: self.convert_class(owner, from, to)?,
                name: self.convert_member_name(MemberKind::Method, owner, name, desc, from, to)?,
                desc: self.convert_desc(desc, from, to),
            },
        })
    }
}

/// Where a batch of definitions comes from, for conflict reporting.
#[derive(Debug, Clone, Copy)]
pub struct Origin<'a> {
    pub source: &'a str,
    /// Later definitions replace differing earlier ones instead of failing.
    pub override_existing: bool,
}

/// Accumulates definitions from several sources in precedence order.
#[derive(Debug, Default)]
pub struct MappingBuilder {
    classes: BTreeMap<String, ClassMapping>,
}

impl MappingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, obf: &str) -> &mut ClassMapping {
        self.classes.entry(obf.to_string()).or_insert_with(|| {
            let mut class = ClassMapping::default();
            *class.names.slot(Namespace::Obfuscated) = Some(obf.to_string());
            class
        })
    }

    /// Ensure a class exists and define its name in `ns`.
    pub fn define_class(
        &mut self,
        obf: &str,
        ns: Namespace,
        name: Option<&str>,
        origin: Origin<'_>,
    ) -> PipelineResult<()> {
        let class = self.entry(obf);
        if let Some(name) = name {
            assign(
                class.names.slot(ns),
                name,
                ns,
                || Symbol::Class(obf.to_string()),
                origin,
            )?;
        }
        Ok(())
    }

    /// Ensure a member exists and define its name in `ns`. Owner, name and
    /// descriptor are obfuscated.
    pub fn define_member(
        &mut self,
        kind: MemberKind,
        owner: &str,
        key: &MemberKey,
        ns: Namespace,
        name: Option<&str>,
        origin: Origin<'_>,
    ) -> PipelineResult<()> {
        let members = self.entry(owner).members_mut(kind);
        let names = members.entry(key.clone()).or_insert_with(|| {
            let mut names = Names::default();
            *names.slot(Namespace::Obfuscated) = Some(key.name.clone());
            names
        });
        if let Some(name) = name {
            let symbol = || match kind {
                MemberKind::Field => Symbol::Field {
                    owner: owner.to_string(),
                    name: key.name.clone(),
                    desc: key.desc.clone(),
                },
                MemberKind::Method => Symbol::Method {
                    owner: owner.to_string(),
                    name: key.name.clone(),
                    desc: key.desc.clone(),
                },
            };
            assign(names.slot(ns), name, ns, symbol, origin)?;
        }
        Ok(())
    }

    /// Obfuscated name of the class currently called `name` in `ns`.
    pub fn class_anchors(&self, ns: Namespace) -> HashMap<String, String> {
        self.classes
            .iter()
            .filter_map(|(obf, c)| c.names.get(ns).map(|n| (n.to_string(), obf.clone())))
            .collect()
    }

    /// Obfuscated key of a member known by its `ns` name, with the
    /// descriptor already converted to obfuscated names.
    pub fn member_anchor(
        &self,
        kind: MemberKind,
        owner: &str,
        name: &str,
        obf_desc: &str,
        ns: Namespace,
    ) -> Option<MemberKey> {
        self.classes
            .get(owner)?
            .members(kind)
            .iter()
            .find(|(key, names)| key.desc == obf_desc && names.get(ns) == Some(name))
            .map(|(key, _)| key.clone())
    }

    /// Assign named names to every member whose intermediate name is
    /// `intermediate`. Returns how many members matched.
    pub fn define_by_intermediate(
        &mut self,
        intermediate: &str,
        named: &str,
        origin: Origin<'_>,
    ) -> PipelineResult<usize> {
        let mut hits = 0;
        for (owner, class) in self.classes.iter_mut() {
            for kind in [MemberKind::Field, MemberKind::Method] {
                for (key, names) in class.members_mut(kind).iter_mut() {
                    if names.get(Namespace::Intermediate) != Some(intermediate) {
                        continue;
                    }
                    let symbol = || {
                        let (owner, name, desc) =
                            (owner.clone(), key.name.clone(), key.desc.clone());
                        match kind {
                            MemberKind::Field => Symbol::Field { owner, name, desc },
                            MemberKind::Method => Symbol::Method { owner, name, desc },
                        }
                    };
                    assign(names.slot(Namespace::Named), named, Namespace::Named, symbol, origin)?;
                    hits += 1;
                }
            }
        }
        Ok(hits)
    }

    pub fn build(self) -> MappingTable {
        debug!("mapping table built with {} classes", self.classes.len());
        MappingTable::new(self.classes)
    }
}

fn assign(
    slot: &mut Option<String>,
    incoming: &str,
    ns: Namespace,
    symbol: impl Fn() -> Symbol,
    origin: Origin<'_>,
) -> PipelineResult<()> {
    match slot {
        None => {
            *slot = Some(incoming.to_string());
            Ok(())
        }
        Some(existing) if existing == incoming => Ok(()),
        Some(existing) if origin.override_existing => {
            debug!(
                "{} overrides {} name of {}: {} -> {}",
                origin.source,
                ns,
                symbol(),
                existing,
                incoming
            );
            *slot = Some(incoming.to_string());
            Ok(())
        }
        Some(existing) => Err(PipelineError::MappingConflict {
            symbol: symbol().to_string(),
            namespace: ns.to_string(),
            existing: existing.clone(),
            incoming: incoming.to_string(),
            source_name: origin.source.to_string(),
        }),
    }
}
