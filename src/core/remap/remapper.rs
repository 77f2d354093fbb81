use std::sync::Arc;

use super::hierarchy::{ClassHierarchy, GameScope};
use crate::core::classfile::descriptor::{map_class_or_array, map_descriptor, map_signature};
use crate::core::classfile::flags;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::jar::Jar;
use crate::core::mappings::{MappingTable, MemberKind, Namespace, Symbol};

/// Methods every class inherits from `java/lang/Object`.
const OBJECT_METHODS: &[(&str, &str)] = &[
    ("toString", "()Ljava/lang/String;"),
    ("equals", "(Ljava/lang/Object;)Z"),
    ("hashCode", "()I"),
    ("clone", "()Ljava/lang/Object;"),
    ("finalize", "()V"),
    ("getClass", "()Ljava/lang/Class;"),
    ("notify", "()V"),
    ("notifyAll", "()V"),
    ("wait", "()V"),
    ("wait", "(J)V"),
    ("wait", "(JI)V"),
];

/// Everything needed to rename symbols from one namespace to another.
///
/// Immutable and shared by the per-class passes: remapping one class never
/// depends on the result of remapping another.
#[derive(Debug, Clone)]
pub struct Remapper {
    table: Arc<MappingTable>,
    from: Namespace,
    to: Namespace,
    scope: GameScope,
    hierarchy: ClassHierarchy,
}

impl Remapper {
    pub fn new(
        table: Arc<MappingTable>,
        from: Namespace,
        to: Namespace,
        game_prefixes: &[String],
        jar: &Jar,
    ) -> PipelineResult<Self> {
        let hierarchy = ClassHierarchy::from_jar(jar)?;
        let scope = GameScope::new(game_prefixes, hierarchy.class_names().map(str::to_string));
        Ok(Self {
            table,
            from,
            to,
            scope,
            hierarchy,
        })
    }

    pub fn from(&self) -> Namespace {
        self.from
    }

    pub fn to(&self) -> Namespace {
        self.to
    }

    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }

    pub fn scope(&self) -> &GameScope {
        &self.scope
    }

    pub fn hierarchy(&self) -> &ClassHierarchy {
        &self.hierarchy
    }

    /// Rename a class. Classes outside the game pass through; game classes
    /// without an entry are a `MappingGap`.
    pub fn map_class(&self, name: &str) -> PipelineResult<String> {
        if self.is_identity() || !self.scope.owns(name) {
            return Ok(name.to_string());
        }
        self.table.convert_class(name, self.from, self.to)
    }

    /// Rename a `Class` constant, which may hold an array descriptor.
    pub fn map_class_entry(&self, name: &str) -> PipelineResult<String> {
        map_class_or_array(name, &mut |c| self.map_class(c))
    }

    pub fn map_desc(&self, desc: &str) -> PipelineResult<String> {
        map_descriptor(desc, &mut |c| self.map_class(c))
    }

    pub fn map_signature(&self, sig: &str) -> PipelineResult<String> {
        map_signature(sig, &mut |c| self.map_class(c))
    }

    /// Rename a member referenced through `owner`.
    ///
    /// The member is looked up on `owner` and then on its supertypes inside
    /// the jar. Without an entry, the name passes through only when it
    /// provably is not a game symbol: constructors, `Object` methods,
    /// members that can come from a library supertype, and compiler
    /// generated members. Private and static game methods are never
    /// inherited, so they always need an entry. Anything else is a
    /// `MappingGap`.
    pub fn map_member(
        &self,
        kind: MemberKind,
        owner: &str,
        name: &str,
        desc: &str,
    ) -> PipelineResult<String> {
        if self.is_identity() || name.starts_with('<') || !self.scope.owns(owner) {
            return Ok(name.to_string());
        }

        let ancestry = self.hierarchy.ancestry(owner, &self.scope);
        for class in &ancestry.game {
            if let Some(mapped) = self
                .table
                .lookup_member(kind, class, name, desc, self.from)
                .and_then(|names| names.resolve(self.to))
            {
                return Ok(mapped.to_string());
            }
        }
        // Owners that are game classes missing from the jar still get a
        // direct lookup.
        if ancestry.game.is_empty() {
            if let Some(mapped) = self
                .table
                .lookup_member(kind, owner, name, desc, self.from)
                .and_then(|names| names.resolve(self.to))
            {
                return Ok(mapped.to_string());
            }
        }

        let declared = ancestry
            .game
            .iter()
            .find_map(|c| self.hierarchy.declared(kind, c, name, desc));
        let generated = declared
            .map(|access| access & (flags::ACC_SYNTHETIC | flags::ACC_BRIDGE) != 0)
            .unwrap_or(false);
        // Private and static methods never override a supertype's method.
        let overridable = declared
            .map(|access| access & (flags::ACC_PRIVATE | flags::ACC_STATIC) == 0)
            .unwrap_or(true);
        let passes = match kind {
            MemberKind::Field => generated || (declared.is_none() && ancestry.library_ancestor),
            MemberKind::Method => {
                generated
                    || (overridable
                        && (ancestry.library_ancestor
                            || OBJECT_METHODS.iter().any(|(n, d)| *n == name && *d == desc)))
            }
        };
        if passes {
            return Ok(name.to_string());
        }

        let (owner, name, desc) = (owner.to_string(), name.to_string(), desc.to_string());
        let symbol = match kind {
            MemberKind::Field => Symbol::Field { owner, name, desc },
            MemberKind::Method => Symbol::Method { owner, name, desc },
        };
        Err(PipelineError::MappingGap {
            symbol: symbol.to_string(),
            namespace: self.to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classfile::builder::ClassBuilder;
    use crate::core::mappings::{resolve, MappingFormat, MappingSource};

    fn remapper() -> Remapper {
        let mappings = "tiny\t2\t0\tofficial\tintermediary\tnamed
c\ta\tnet/minecraft/class_1\tnet/minecraft/Entity
\tf\tI\tb\tfield_1\thealth
\tm\t()V\tc\tmethod_1\ttick
";
        let table = resolve(&[MappingSource {
            name: "test".into(),
            format: MappingFormat::Auto,
            contents: mappings.into(),
            override_existing: false,
        }])
        .unwrap();

        let mut jar = Jar::new();
        jar.classes.insert(
            "a".into(),
            ClassBuilder::new("a", Some("java/lang/Object"))
                .unwrap()
                .field(flags::ACC_PRIVATE, "b", "I")
                .unwrap()
                .field(flags::ACC_PRIVATE, "z", "I")
                .unwrap()
                .to_bytes()
                .unwrap(),
        );
        jar.classes.insert(
            "d".into(),
            ClassBuilder::new("d", Some("a")).unwrap().to_bytes().unwrap(),
        );
        jar.classes.insert(
            "e".into(),
            ClassBuilder::new("e", Some("java/lang/Object"))
                .unwrap()
                .interface("java/lang/Runnable")
                .unwrap()
                .method(flags::ACC_PUBLIC, "run", "()V", None)
                .unwrap()
                .method(flags::ACC_PRIVATE | flags::ACC_STATIC, "q", "()V", None)
                .unwrap()
                .method(flags::ACC_PRIVATE, "r", "()V", None)
                .unwrap()
                .method(flags::ACC_PUBLIC | flags::ACC_SYNTHETIC, "s", "()V", None)
                .unwrap()
                .to_bytes()
                .unwrap(),
        );
        Remapper::new(
            Arc::new(table),
            Namespace::Obfuscated,
            Namespace::Named,
            &["net/minecraft/".to_string()],
            &jar,
        )
        .unwrap()
    }

    #[test]
    fn inherited_members_resolve_through_supertypes() {
        let r = remapper();
        assert_eq!(r.map_member(MemberKind::Field, "d", "b", "I").unwrap(), "health");
        assert_eq!(r.map_member(MemberKind::Method, "d", "c", "()V").unwrap(), "tick");
    }

    #[test]
    fn library_and_object_symbols_pass_through() {
        let r = remapper();
        assert_eq!(r.map_class("java/util/List").unwrap(), "java/util/List");
        assert_eq!(
            r.map_member(MemberKind::Method, "java/util/List", "size", "()I").unwrap(),
            "size"
        );
        assert_eq!(
            r.map_member(MemberKind::Method, "a", "hashCode", "()I").unwrap(),
            "hashCode"
        );
        assert_eq!(r.map_member(MemberKind::Method, "a", "<init>", "()V").unwrap(), "<init>");
    }

    #[test]
    fn unmapped_game_symbols_are_gaps() {
        let r = remapper();
        match r.map_member(MemberKind::Field, "a", "z", "I").unwrap_err() {
            PipelineError::MappingGap { symbol, namespace } => {
                assert_eq!(symbol, "field a.z:I");
                assert_eq!(namespace, "named");
            }
            other => panic!("unexpected {other:?}"),
        }
        // `d` and `e` have no class entry.
        assert!(matches!(r.map_class("d"), Err(PipelineError::MappingGap { .. })));
        assert_eq!(
            r.map_desc("(La;[Ljava/lang/String;)La;").unwrap(),
            "(Lnet/minecraft/Entity;[Ljava/lang/String;)Lnet/minecraft/Entity;"
        );
    }

    #[test]
    fn private_and_static_methods_never_inherit_from_libraries() {
        let r = remapper();
        assert_eq!(r.map_member(MemberKind::Method, "e", "run", "()V").unwrap(), "run");
        assert_eq!(r.map_member(MemberKind::Method, "e", "s", "()V").unwrap(), "s");
        for name in ["q", "r"] {
            match r.map_member(MemberKind::Method, "e", name, "()V").unwrap_err() {
                PipelineError::MappingGap { symbol, .. } => {
                    assert_eq!(symbol, format!("method e.{name}()V"));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}
