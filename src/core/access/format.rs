use std::fmt;

use serde::Serialize;

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::mappings::Namespace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessChange {
    Accessible,
    Extendable,
    Mutable,
}

impl AccessChange {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "accessible" => Some(AccessChange::Accessible),
            "extendable" => Some(AccessChange::Extendable),
            "mutable" => Some(AccessChange::Mutable),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            AccessChange::Accessible => "accessible",
            AccessChange::Extendable => "extendable",
            AccessChange::Mutable => "mutable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PatchTarget {
    Class { name: String },
    Method { owner: String, name: String, desc: String },
    Field { owner: String, name: String, desc: String },
}

impl PatchTarget {
    /// Class whose bytes the record rewrites.
    pub fn class(&self) -> &str {
        match self {
            PatchTarget::Class { name } => name,
            PatchTarget::Method { owner, .. } | PatchTarget::Field { owner, .. } => owner,
        }
    }
}

impl fmt::Display for PatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchTarget::Class { name } => write!(f, "class {name}"),
            PatchTarget::Method { owner, name, desc } => write!(f, "method {owner} {name} {desc}"),
            PatchTarget::Field { owner, name, desc } => write!(f, "field {owner} {name} {desc}"),
        }
    }
}

/// One widening request, with the file and line it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchRecord {
    pub change: AccessChange,
    pub transitive: bool,
    pub target: PatchTarget,
    pub source_name: String,
    pub line: usize,
}

impl PatchRecord {
    /// The record as it reads in its file, followed by its origin. Used in
    /// `PatchTargetMissing`.
    pub fn describe(&self) -> String {
        format!("{} ({}:{})", self, self.source_name, self.line)
    }
}

impl fmt::Display for PatchRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.transitive {
            f.write_str("transitive-")?;
        }
        write!(f, "{} {}", self.change.as_str(), self.target)
    }
}

/// Ordered access patches, all written against one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchSet {
    pub namespace: Namespace,
    pub records: Vec<PatchRecord>,
}

impl PatchSet {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Concatenate patch files in declared order. Every file must target
    /// the same namespace.
    pub fn concat(sets: impl IntoIterator<Item = PatchSet>) -> PipelineResult<Option<PatchSet>> {
        let mut out: Option<PatchSet> = None;
        for set in sets {
            match out.as_mut() {
                None => out = Some(set),
                Some(acc) if acc.namespace == set.namespace => acc.records.extend(set.records),
                Some(acc) => {
                    return Err(PipelineError::NamespaceMismatch {
                        expected: acc.namespace.to_string(),
                        actual: set.namespace.to_string(),
                    })
                }
            }
        }
        Ok(out)
    }
}

fn parse_error(source: &str, line: usize, message: impl Into<String>) -> PipelineError {
    PipelineError::PatchParse {
        source_name: source.to_string(),
        line,
        message: message.into(),
    }
}

/// Parse an access widener file:
///
/// ```text
/// accessWidener v2 named
/// accessible class net/minecraft/Foo
/// extendable method net/minecraft/Foo bar ()V
/// transitive-mutable field net/minecraft/Foo baz I
/// ```
///
/// Tokens are separated by any whitespace; `#` starts a comment.
pub fn parse_access_widener(contents: &str, source: &str) -> PipelineResult<PatchSet> {
    let mut lines = contents
        .lines()
        .enumerate()
        .map(|(i, raw)| (i + 1, raw.split('#').next().unwrap_or_default().trim()))
        .filter(|(_, l)| !l.is_empty());

    let (header_line, header) = lines
        .next()
        .ok_or_else(|| parse_error(source, 1, "empty file"))?;
    let header: Vec<&str> = header.split_whitespace().collect();
    let version = match header.as_slice() {
        ["accessWidener", "v1", _] => 1,
        ["accessWidener", "v2", _] => 2,
        _ => {
            return Err(parse_error(
                source,
                header_line,
                "expected 'accessWidener <v1|v2> <namespace>'",
            ))
        }
    };
    let namespace: Namespace = header[2]
        .parse()
        .map_err(|_| parse_error(source, header_line, format!("unknown namespace '{}'", header[2])))?;

    let mut set = PatchSet::new(namespace);
    for (line, text) in lines {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let (access, rest) = tokens
            .split_first()
            .ok_or_else(|| parse_error(source, line, "empty record"))?;

        let (transitive, access) = match access.strip_prefix("transitive-") {
            Some(_) if version < 2 => {
                return Err(parse_error(source, line, "transitive records need version v2"))
            }
            Some(inner) => (true, inner),
            None => (false, *access),
        };
        let change = AccessChange::parse(access)
            .ok_or_else(|| parse_error(source, line, format!("unknown access '{access}'")))?;

        let target = match rest {
            ["class", name] => PatchTarget::Class {
                name: name.to_string(),
            },
            ["method", owner, name, desc] => PatchTarget::Method {
                owner: owner.to_string(),
                name: name.to_string(),
                desc: desc.to_string(),
            },
            ["field", owner, name, desc] => PatchTarget::Field {
                owner: owner.to_string(),
                name: name.to_string(),
                desc: desc.to_string(),
            },
            _ => {
                return Err(parse_error(
                    source,
                    line,
                    "expected 'class <name>', 'method <owner> <name> <desc>' or 'field <owner> <name> <desc>'",
                ))
            }
        };

        let allowed = matches!(
            (change, &target),
            (AccessChange::Accessible, _)
                | (AccessChange::Extendable, PatchTarget::Class { .. })
                | (AccessChange::Extendable, PatchTarget::Method { .. })
                | (AccessChange::Mutable, PatchTarget::Field { .. })
        );
        if !allowed {
            return Err(parse_error(
                source,
                line,
                format!("'{}' cannot be applied to a {}", change.as_str(), kind_of(&target)),
            ));
        }

        set.records.push(PatchRecord {
            change,
            transitive,
            target,
            source_name: source.to_string(),
            line,
        });
    }
    Ok(set)
}

fn kind_of(target: &PatchTarget) -> &'static str {
    match target {
        PatchTarget::Class { .. } => "class",
        PatchTarget::Method { .. } => "method",
        PatchTarget::Field { .. } => "field",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_records_and_comments() {
        let text = "\
# widen a few things
accessWidener\tv2\tnamed

accessible class net/minecraft/Foo # trailing
extendable   method net/minecraft/Foo bar ()V
transitive-mutable field net/minecraft/Foo baz I
";
        let set = parse_access_widener(text, "mod.accesswidener").unwrap();
        assert_eq!(set.namespace, Namespace::Named);
        assert_eq!(set.len(), 3);
        assert_eq!(set.records[0].to_string(), "accessible class net/minecraft/Foo");
        assert_eq!(set.records[1].line, 5);
        assert!(set.records[2].transitive);
        assert_eq!(
            set.records[2].describe(),
            "transitive-mutable field net/minecraft/Foo baz I (mod.accesswidener:6)"
        );
    }

    #[test]
    fn rejects_bad_records_with_line_numbers() {
        let bad_header = parse_access_widener("accessWidener v3 named\n", "a").unwrap_err();
        assert!(matches!(bad_header, PipelineError::PatchParse { line: 1, .. }));

        let mutable_method = "accessWidener v1 named\nmutable method a b ()V\n";
        match parse_access_widener(mutable_method, "a").unwrap_err() {
            PipelineError::PatchParse { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("method"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let transitive_v1 = "accessWidener v1 named\ntransitive-accessible class a\n";
        assert!(matches!(
            parse_access_widener(transitive_v1, "a"),
            Err(PipelineError::PatchParse { line: 2, .. })
        ));
    }

    #[test]
    fn concatenation_requires_one_namespace() {
        let a = parse_access_widener("accessWidener v2 named\naccessible class a\n", "a").unwrap();
        let b = parse_access_widener("accessWidener v2 named\naccessible class b\n", "b").unwrap();
        let c = parse_access_widener("accessWidener v2 intermediary\n", "c").unwrap();

        let merged = PatchSet::concat([a.clone(), b]).unwrap().unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.records[1].target.class(), "b");
        assert!(matches!(
            PatchSet::concat([a, c]),
            Err(PipelineError::NamespaceMismatch { .. })
        ));
        assert!(PatchSet::concat(Vec::new()).unwrap().is_none());
    }
}
