use std::collections::HashMap;
use std::fmt::Write as _;

use super::namespace::Namespace;
use super::table::MappingTable;
use crate::core::error::{PipelineError, PipelineResult};

/// A mapping file as read from disk: one column per namespace, anchored on
/// the first column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingFile {
    pub namespaces: Vec<Namespace>,
    pub classes: Vec<ClassRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassRecord {
    pub names: Vec<Option<String>>,
    pub fields: Vec<MemberRecord>,
    pub methods: Vec<MemberRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRecord {
    /// Descriptor in the first namespace.
    pub desc: String,
    pub names: Vec<Option<String>>,
}

struct LineError<'a> {
    source: &'a str,
}

impl LineError<'_> {
    fn at(&self, line: usize, message: impl Into<String>) -> PipelineError {
        PipelineError::MappingParse {
            source_name: self.source.to_string(),
            line,
            message: message.into(),
        }
    }
}

fn parse_namespaces(cols: &[&str], err: &LineError<'_>) -> PipelineResult<Vec<Namespace>> {
    let mut namespaces = Vec::with_capacity(cols.len());
    for col in cols {
        let ns: Namespace = col
            .parse()
            .map_err(|_| err.at(1, format!("unknown namespace '{col}'")))?;
        if namespaces.contains(&ns) {
            return Err(err.at(1, format!("namespace '{col}' declared twice")));
        }
        namespaces.push(ns);
    }
    if namespaces.len() < 2 {
        return Err(err.at(1, "at least two namespaces are required"));
    }
    Ok(namespaces)
}

fn names_from(
    cols: &[&str],
    width: usize,
    escaped: bool,
    line: usize,
    err: &LineError<'_>,
) -> PipelineResult<Vec<Option<String>>> {
    if cols.len() > width {
        return Err(err.at(line, format!("expected {width} names, found {}", cols.len())));
    }
    let mut names: Vec<Option<String>> = cols
        .iter()
        .map(|c| {
            if c.is_empty() {
                None
            } else if escaped {
                Some(unescape(c))
            } else {
                Some(c.to_string())
            }
        })
        .collect();
    names.resize(width, None);
    if names[0].is_none() {
        return Err(err.at(line, "missing name in the first namespace"));
    }
    Ok(names)
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Parse a Tiny v2 file (`tiny\t2\t0\t<namespaces...>`).
pub fn parse_tiny_v2(contents: &str, source: &str) -> PipelineResult<MappingFile> {
    let err = LineError { source };
    let mut lines = contents.lines().enumerate();
    let header = lines
        .next()
        .map(|(_, l)| l)
        .ok_or_else(|| err.at(1, "empty file"))?;
    let cols: Vec<&str> = header.split('\t').collect();
    if cols.len() < 3 || cols[0] != "tiny" || cols[1] != "2" {
        return Err(err.at(1, "not a tiny v2 header"));
    }
    let namespaces = parse_namespaces(&cols[3..], &err)?;
    let width = namespaces.len();

    let mut file = MappingFile {
        namespaces,
        classes: Vec::new(),
    };
    let mut escaped = false;

    for (idx, raw) in lines {
        let line = idx + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let indent = raw.bytes().take_while(|b| *b == b'\t').count();
        let cols: Vec<&str> = raw[indent..].split('\t').collect();
        let kind = cols[0];

        match (indent, kind) {
            (0, "c") => {
                let names = names_from(&cols[1..], width, escaped, line, &err)?;
                file.classes.push(ClassRecord {
                    names,
                    ..ClassRecord::default()
                });
            }
            (1, _) if file.classes.is_empty() => {
                if kind == "escaped-names" {
                    escaped = true;
                }
            }
            (1, "f") | (1, "m") => {
                let desc = cols
                    .get(1)
                    .filter(|d| !d.is_empty())
                    .ok_or_else(|| err.at(line, "member without descriptor"))?
                    .to_string();
                let names = names_from(&cols[2..], width, escaped, line, &err)?;
                let record = MemberRecord { desc, names };
                let class = file
                    .classes
                    .last_mut()
                    .ok_or_else(|| err.at(line, "member outside of a class"))?;
                if kind == "f" {
                    class.fields.push(record);
                } else {
                    class.methods.push(record);
                }
            }
            // comments, parameters, locals
            (1, "c") | (2, _) | (3, _) => {}
            _ => return Err(err.at(line, format!("unexpected '{kind}' at depth {indent}"))),
        }
    }
    Ok(file)
}

/// Parse a Tiny v1 file (`v1\t<namespaces...>`).
pub fn parse_tiny_v1(contents: &str, source: &str) -> PipelineResult<MappingFile> {
    let err = LineError { source };
    let mut lines = contents.lines().enumerate();
    let header = lines
        .next()
        .map(|(_, l)| l)
        .ok_or_else(|| err.at(1, "empty file"))?;
    let cols: Vec<&str> = header.split('\t').collect();
    if cols.first() != Some(&"v1") {
        return Err(err.at(1, "not a tiny v1 header"));
    }
    let namespaces = parse_namespaces(&cols[1..], &err)?;
    let width = namespaces.len();

    let mut file = MappingFile {
        namespaces,
        classes: Vec::new(),
    };
    let mut by_owner: HashMap<String, usize> = HashMap::new();
    let mut class_slot = |file: &mut MappingFile, owner: &str| -> usize {
        *by_owner.entry(owner.to_string()).or_insert_with(|| {
            let mut names = vec![None; width];
            names[0] = Some(owner.to_string());
            file.classes.push(ClassRecord {
                names,
                ..ClassRecord::default()
            });
            file.classes.len() - 1
        })
    };

    for (idx, raw) in lines {
        let line = idx + 1;
        if raw.trim().is_empty() || raw.starts_with('#') {
            continue;
        }
        let cols: Vec<&str> = raw.split('\t').collect();
        match cols[0] {
            "CLASS" => {
                let names = names_from(&cols[1..], width, false, line, &err)?;
                let owner = names[0].clone().unwrap_or_default();
                let slot = class_slot(&mut file, &owner);
                file.classes[slot].names = names;
            }
            kind @ ("FIELD" | "METHOD") => {
                if cols.len() < 4 {
                    return Err(err.at(line, format!("truncated {kind} line")));
                }
                let names = names_from(&cols[3..], width, false, line, &err)?;
                let slot = class_slot(&mut file, cols[1]);
                let record = MemberRecord {
                    desc: cols[2].to_string(),
                    names,
                };
                if kind == "FIELD" {
                    file.classes[slot].fields.push(record);
                } else {
                    file.classes[slot].methods.push(record);
                }
            }
            other => return Err(err.at(line, format!("unknown record '{other}'"))),
        }
    }
    Ok(file)
}

/// Serialize a table as canonical Tiny v2: namespaces in fixed order,
/// classes and members sorted by obfuscated identity.
pub fn write_tiny_v2(table: &MappingTable) -> String {
    let mut out = String::new();
    let _ = write!(out, "tiny\t2\t0");
    for ns in Namespace::ALL {
        let _ = write!(out, "\t{}", ns.tiny_name());
    }
    out.push('\n');

    for (_, class) in table.classes() {
        out.push('c');
        for ns in Namespace::ALL {
            let _ = write!(out, "\t{}", class.names.get(ns).unwrap_or(""));
        }
        out.push('\n');
        for (tag, members) in [("f", &class.fields), ("m", &class.methods)] {
            for (key, names) in members {
                let _ = write!(out, "\t{tag}\t{}", key.desc);
                for ns in Namespace::ALL {
                    let _ = write!(out, "\t{}", names.get(ns).unwrap_or(""));
                }
                out.push('\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const V2: &str = "tiny\t2\t0\tofficial\tintermediary\tnamed
c\ta\tnet/minecraft/class_1\tnet/minecraft/Entity
\tc\tAn entity.
\tf\tI\ta\tfield_1\thealth
\tm\t(Lb;)V\tb\tmethod_1\ttick
\t\tp\t1\t\t\tworld
c\tb\tnet/minecraft/class_2\t
";

    #[test]
    fn parses_tiny_v2() {
        let file = parse_tiny_v2(V2, "v2.tiny").unwrap();
        assert_eq!(
            file.namespaces,
            vec![Namespace::Obfuscated, Namespace::Intermediate, Namespace::Named]
        );
        assert_eq!(file.classes.len(), 2);
        let entity = &file.classes[0];
        assert_eq!(entity.fields[0].names[2].as_deref(), Some("health"));
        assert_eq!(entity.methods[0].desc, "(Lb;)V");
        assert_eq!(file.classes[1].names[2], None);
    }

    #[test]
    fn parses_tiny_v1_grouping_members_by_owner() {
        let v1 = "v1\tofficial\tintermediary
FIELD\ta\tI\ta\tfield_1
CLASS\ta\tnet/minecraft/class_1
METHOD\ta\t()V\tb\tmethod_1
";
        let file = parse_tiny_v1(v1, "v1.tiny").unwrap();
        assert_eq!(file.classes.len(), 1);
        assert_eq!(file.classes[0].names[1].as_deref(), Some("net/minecraft/class_1"));
        assert_eq!(file.classes[0].fields.len(), 1);
        assert_eq!(file.classes[0].methods.len(), 1);
    }

    #[test]
    fn reports_line_numbers() {
        let bad = "tiny\t2\t0\tofficial\tnamed\nc\ta\tFoo\n\tx\toops\n";
        match parse_tiny_v2(bad, "bad.tiny").unwrap_err() {
            PipelineError::MappingParse { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_namespaces() {
        assert!(parse_tiny_v2("tiny\t2\t0\tofficial\tsrg\n", "x").is_err());
    }

    #[test]
    fn escaped_names_are_unescaped() {
        let text = "tiny\t2\t0\tofficial\tnamed\n\tescaped-names\nc\ta\tweird\\tname\n";
        let file = parse_tiny_v2(text, "x").unwrap();
        assert_eq!(file.classes[0].names[1].as_deref(), Some("weird\tname"));
    }
}
