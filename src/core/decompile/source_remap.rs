use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::core::mappings::{MappingTable, MemberKind, Namespace};

/// Rewrites identifiers in Java source from one namespace to another.
///
/// The source is lexed rather than searched: string, character and text
/// block literals and comments are copied verbatim, so a literal that
/// happens to spell a mapped name is never touched. Simple names that map
/// to more than one target are left alone.
#[derive(Debug, Clone, Default)]
pub struct SourceRemapper {
    /// Dotted binary names (`net.minecraft.class_1`).
    qualified: HashMap<String, String>,
    /// `None` marks an ambiguous simple name.
    simple: HashMap<String, Option<String>>,
    members: HashMap<String, Option<String>>,
}

fn insert_unique(map: &mut HashMap<String, Option<String>>, from: &str, to: &str) {
    match map.entry(from.to_string()) {
        Entry::Vacant(slot) => {
            slot.insert(Some(to.to_string()));
        }
        Entry::Occupied(mut slot) => {
            if slot.get().as_deref() != Some(to) {
                slot.insert(None);
            }
        }
    }
}

fn simple_name(internal: &str) -> &str {
    let tail = internal.rsplit('/').next().unwrap_or(internal);
    tail.rsplit('$').next().unwrap_or(tail)
}

fn dotted(internal: &str) -> String {
    internal.replace(['/', '$'], ".")
}

impl SourceRemapper {
    pub fn from_table(table: &MappingTable, from: Namespace, to: Namespace) -> Self {
        let mut out = Self::default();
        if from == to {
            return out;
        }
        for (_, class) in table.classes() {
            if let (Some(a), Some(b)) = (class.names.resolve(from), class.names.resolve(to)) {
                if a != b {
                    out.qualified.insert(dotted(a), dotted(b));
                    let (sa, sb) = (simple_name(a), simple_name(b));
                    if sa != sb {
                        insert_unique(&mut out.simple, sa, sb);
                    }
                }
            }
            for kind in [MemberKind::Field, MemberKind::Method] {
                for names in class.members(kind).values() {
                    if let (Some(a), Some(b)) = (names.resolve(from), names.resolve(to)) {
                        if a != b {
                            insert_unique(&mut out.members, a, b);
                        }
                    }
                }
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.qualified.is_empty() && self.simple.is_empty() && self.members.is_empty()
    }

    /// Entry path of a source file after its top-level class is renamed.
    pub fn remap_path(&self, path: &str) -> String {
        let Some(stem) = path.strip_suffix(".java") else {
            return path.to_string();
        };
        match self.qualified.get(&stem.replace('/', ".")) {
            Some(to) => format!("{}.java", to.replace('.', "/")),
            None => path.to_string(),
        }
    }

    pub fn remap(&self, src: &str) -> String {
        if self.is_empty() {
            return src.to_string();
        }
        let b = src.as_bytes();
        let mut out = String::with_capacity(src.len());
        let mut copied = 0;
        let mut i = 0;
        while i < b.len() {
            match b[i] {
                b'/' if b.get(i + 1) == Some(&b'/') => i = skip_until(b, i + 2, b"\n"),
                b'/' if b.get(i + 1) == Some(&b'*') => i = skip_until(b, i + 2, b"*/"),
                b'"' if b[i..].starts_with(b"\"\"\"") => i = skip_literal(b, i + 3, b"\"\"\""),
                b'"' => i = skip_literal(b, i + 1, b"\""),
                b'\'' => i = skip_literal(b, i + 1, b"'"),
                c if c.is_ascii_digit() => {
                    i += 1;
                    while i < b.len() && (is_ident_part(b[i]) || b[i] == b'.') {
                        i += 1;
                    }
                }
                c if is_ident_start(c) => {
                    let start = i;
                    let mut segments = Vec::new();
                    loop {
                        let s = i;
                        while i < b.len() && is_ident_part(b[i]) {
                            i += 1;
                        }
                        segments.push(&src[s..i]);
                        if b.get(i) == Some(&b'.') && b.get(i + 1).is_some_and(|c| is_ident_start(*c)) {
                            i += 1;
                        } else {
                            break;
                        }
                    }
                    if let Some(replacement) = self.rewrite(&segments) {
                        out.push_str(&src[copied..start]);
                        out.push_str(&replacement);
                        copied = i;
                    }
                }
                _ => i += 1,
            }
        }
        out.push_str(&src[copied..]);
        out
    }

    /// Rewrite a dotted identifier chain. The longest leading run naming a
    /// qualified class is replaced as a whole; every other segment is
    /// looked up as a simple class name, then as a member name.
    fn rewrite(&self, segments: &[&str]) -> Option<String> {
        let mut parts: Vec<String> = Vec::with_capacity(segments.len());
        let mut changed = false;
        let mut i = 0;
        for j in (2..=segments.len()).rev() {
            if let Some(to) = self.qualified.get(&segments[..j].join(".")) {
                parts.push(to.clone());
                changed = true;
                i = j;
                break;
            }
        }
        for segment in &segments[i..] {
            let mapped = self
                .simple
                .get(*segment)
                .or_else(|| self.members.get(*segment))
                .and_then(|v| v.as_deref());
            match mapped {
                Some(to) => {
                    parts.push(to.to_string());
                    changed = true;
                }
                None => parts.push(segment.to_string()),
            }
        }
        changed.then(|| parts.join("."))
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$'
}

fn is_ident_part(c: u8) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

/// Position just past the next `end`, or the end of input.
fn skip_until(b: &[u8], mut i: usize, end: &[u8]) -> usize {
    while i < b.len() {
        if b[i..].starts_with(end) {
            return i + end.len();
        }
        i += 1;
    }
    b.len()
}

/// Like `skip_until`, honouring backslash escapes.
fn skip_literal(b: &[u8], mut i: usize, end: &[u8]) -> usize {
    while i < b.len() {
        if b[i] == b'\\' {
            i += 2;
            continue;
        }
        if b[i..].starts_with(end) {
            return i + end.len();
        }
        i += 1;
    }
    b.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mappings::{resolve, MappingFormat, MappingSource};

    fn remapper() -> SourceRemapper {
        let mappings = "tiny\t2\t0\tofficial\tintermediary\tnamed
c\ta\tnet/minecraft/class_1\tnet/minecraft/entity/Entity
\tf\tI\tb\tfield_1\thealth
\tm\t()V\tc\tmethod_1\ttick
c\td\tnet/minecraft/class_2\tnet/minecraft/entity/Entity$Pose
";
        let table = resolve(&[MappingSource {
            name: "test".into(),
            format: MappingFormat::Auto,
            contents: mappings.into(),
            override_existing: false,
        }])
        .unwrap();
        SourceRemapper::from_table(&table, Namespace::Intermediate, Namespace::Named)
    }

    #[test]
    fn renames_code_but_not_literals_or_comments() {
        let src = r#"package net.minecraft;

import net.minecraft.class_1;

// calls method_1 on class_1
public class Foo {
    /* field_1 */
    void run(class_1 e, class_2 pose) {
        e.method_1();
        int x = e.field_1 + 1.5e3f;
        String s = "method_1 of class_1";
        char c = '\'';
        String t = """
            field_1 "quoted" class_1
            """;
    }
}
"#;
        let out = remapper().remap(src);
        assert!(out.contains("import net.minecraft.entity.Entity;"));
        assert!(out.contains("void run(Entity e, Pose pose)"));
        assert!(out.contains("e.tick();"));
        assert!(out.contains("e.health + 1.5e3f"));
        assert!(out.contains("// calls method_1 on class_1"));
        assert!(out.contains("/* field_1 */"));
        assert!(out.contains("\"method_1 of class_1\""));
        assert!(out.contains("field_1 \"quoted\" class_1"));
        assert!(out.contains("package net.minecraft;"));
    }

    #[test]
    fn source_paths_follow_their_class() {
        let remapper = remapper();
        assert_eq!(
            remapper.remap_path("net/minecraft/class_1.java"),
            "net/minecraft/entity/Entity.java"
        );
        assert_eq!(remapper.remap_path("com/example/Mod.java"), "com/example/Mod.java");
    }

    #[test]
    fn identity_conversion_is_a_copy() {
        let table = crate::core::mappings::MappingTable::default();
        let remapper = SourceRemapper::from_table(&table, Namespace::Named, Namespace::Named);
        assert!(remapper.is_empty());
        assert_eq!(remapper.remap("class_1 x;"), "class_1 x;");
    }
}
