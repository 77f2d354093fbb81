use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::mcp::parse_csv;
use super::namespace::Namespace;
use super::table::{MappingBuilder, MappingTable, MemberKey, MemberKind, Origin};
use super::tiny::{parse_tiny_v1, parse_tiny_v2, MappingFile};
use crate::core::classfile::descriptor::map_descriptor;
use crate::core::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingFormat {
    TinyV1,
    TinyV2,
    /// MCP-style `searge,name,side,desc` member names.
    Csv,
    /// Sniff the header.
    Auto,
}

impl MappingFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            MappingFormat::TinyV1 => "tiny_v1",
            MappingFormat::TinyV2 => "tiny_v2",
            MappingFormat::Csv => "csv",
            MappingFormat::Auto => "auto",
        }
    }

    pub fn detect(contents: &str) -> Option<MappingFormat> {
        let header = contents.lines().next()?;
        if header.starts_with("tiny\t2\t") {
            Some(MappingFormat::TinyV2)
        } else if header.starts_with("v1\t") {
            Some(MappingFormat::TinyV1)
        } else if header.starts_with("searge,") {
            Some(MappingFormat::Csv)
        } else {
            None
        }
    }
}

/// One loaded mapping source, in precedence order.
#[derive(Debug, Clone)]
pub struct MappingSource {
    pub name: String,
    pub format: MappingFormat,
    pub contents: String,
    pub override_existing: bool,
}

/// Merge sources, in order, into one table.
///
/// A source may restate what earlier sources defined. A differing
/// definition for the same (namespace, owner, member) fails with
/// `MappingConflict` unless the source is flagged as an override. Entries
/// are never removed.
pub fn resolve(sources: &[MappingSource]) -> PipelineResult<MappingTable> {
    let mut builder = MappingBuilder::new();
    for source in sources {
        let origin = Origin {
            source: &source.name,
            override_existing: source.override_existing,
        };
        let format = match source.format {
            MappingFormat::Auto => MappingFormat::detect(&source.contents).ok_or_else(|| {
                PipelineError::MappingParse {
                    source_name: source.name.clone(),
                    line: 1,
                    message: "unrecognized mapping format".into(),
                }
            })?,
            explicit => explicit,
        };
        debug!("loading mappings from {} as {:?}", source.name, format);

        match format {
            MappingFormat::TinyV1 => {
                let file = parse_tiny_v1(&source.contents, &source.name)?;
                apply_file(&mut builder, &file, origin)?;
            }
            MappingFormat::TinyV2 => {
                let file = parse_tiny_v2(&source.contents, &source.name)?;
                apply_file(&mut builder, &file, origin)?;
            }
            MappingFormat::Csv => {
                let mut unmatched = 0usize;
                for row in parse_csv(&source.contents)? {
                    if builder.define_by_intermediate(&row.searge, &row.name, origin)? == 0 {
                        unmatched += 1;
                    }
                }
                if unmatched > 0 {
                    warn!(
                        "{}: {} names matched no known intermediate member",
                        source.name, unmatched
                    );
                }
            }
            MappingFormat::Auto => {
                return Err(PipelineError::Config(format!(
                    "mapping format of {} could not be resolved",
                    source.name
                )))
            }
        }
    }

    let table = builder.build();
    debug!(
        "Resolved mappings: {} classes, {} members from {} source(s)",
        table.class_count(),
        table.member_count(),
        sources.len()
    );
    Ok(table)
}

/// Apply a column file. Files anchored on a namespace other than the
/// obfuscated one are attached through names defined by earlier sources.
fn apply_file(
    builder: &mut MappingBuilder,
    file: &MappingFile,
    origin: Origin<'_>,
) -> PipelineResult<()> {
    let anchor = file.namespaces[0];
    let anchors = if anchor == Namespace::Obfuscated {
        None
    } else {
        Some(builder.class_anchors(anchor))
    };

    let unanchored = |name: &str| PipelineError::MappingGap {
        symbol: format!("{anchor} {name} (from {})", origin.source),
        namespace: Namespace::Obfuscated.to_string(),
    };

    let to_obf_class = |name: &str| -> Option<String> {
        match &anchors {
            None => Some(name.to_string()),
            Some(map) => map.get(name).cloned(),
        }
    };

    for class in &file.classes {
        let anchor_name = class.names[0].as_deref().unwrap_or_default();
        let obf = to_obf_class(anchor_name).ok_or_else(|| unanchored(anchor_name))?;

        for (ns, name) in file.namespaces.iter().zip(&class.names) {
            builder.define_class(&obf, *ns, name.as_deref(), origin)?;
        }

        for (kind, records) in [
            (MemberKind::Field, &class.fields),
            (MemberKind::Method, &class.methods),
        ] {
            for record in records {
                let member_anchor = record.names[0].as_deref().unwrap_or_default();
                let obf_desc = map_descriptor(&record.desc, &mut |c: &str| {
                    Ok(to_obf_class(c).unwrap_or_else(|| c.to_string()))
                })?;
                let key = if anchors.is_none() {
                    MemberKey {
                        name: member_anchor.to_string(),
                        desc: obf_desc,
                    }
                } else {
                    builder
                        .member_anchor(kind, &obf, member_anchor, &obf_desc, anchor)
                        .ok_or_else(|| {
                            unanchored(&format!("{anchor_name}.{member_anchor}{}", record.desc))
                        })?
                };
                for (ns, name) in file.namespaces.iter().zip(&record.names) {
                    builder.define_member(kind, &obf, &key, *ns, name.as_deref(), origin)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str, contents: &str, override_existing: bool) -> MappingSource {
        MappingSource {
            name: name.into(),
            format: MappingFormat::Auto,
            contents: contents.into(),
            override_existing,
        }
    }

    const INTERMEDIARY: &str = "tiny\t2\t0\tofficial\tintermediary
c\ta\tnet/minecraft/class_1
\tm\t(Lb;)V\ta\tmethod_1
\tf\tI\tb\tfield_1
c\tb\tnet/minecraft/class_2
";

    const YARN: &str = "tiny\t2\t0\tintermediary\tnamed
c\tnet/minecraft/class_1\tnet/minecraft/Entity
\tm\t(Lnet/minecraft/class_2;)V\tmethod_1\ttick
c\tnet/minecraft/class_2\tnet/minecraft/World
";

    #[test]
    fn chains_intermediate_anchored_files() {
        let table = resolve(&[
            source("intermediary", INTERMEDIARY, false),
            source("yarn", YARN, false),
        ])
        .unwrap();
        assert_eq!(
            table
                .convert_member_name(
                    MemberKind::Method,
                    "a",
                    "a",
                    "(Lb;)V",
                    Namespace::Obfuscated,
                    Namespace::Named
                )
                .unwrap(),
            "tick"
        );
        assert_eq!(
            table
                .convert_class("b", Namespace::Obfuscated, Namespace::Named)
                .unwrap(),
            "net/minecraft/World"
        );
    }

    #[test]
    fn csv_names_attach_by_intermediate_name() {
        let csv = "searge,name,side,desc\nfield_1,health,0,\n";
        let table = resolve(&[
            source("intermediary", INTERMEDIARY, false),
            source("fields.csv", csv, false),
        ])
        .unwrap();
        assert_eq!(
            table
                .convert_member_name(
                    MemberKind::Field,
                    "a",
                    "b",
                    "I",
                    Namespace::Obfuscated,
                    Namespace::Named
                )
                .unwrap(),
            "health"
        );
    }

    #[test]
    fn later_source_conflict_fails_without_override() {
        let other = "tiny\t2\t0\tintermediary\tnamed\nc\tnet/minecraft/class_1\tnet/minecraft/Mob\n";
        let err = resolve(&[
            source("intermediary", INTERMEDIARY, false),
            source("yarn", YARN, false),
            source("other", other, false),
        ])
        .unwrap_err();
        assert!(matches!(err, PipelineError::MappingConflict { .. }));

        let table = resolve(&[
            source("intermediary", INTERMEDIARY, false),
            source("yarn", YARN, false),
            source("other", other, true),
        ])
        .unwrap();
        assert_eq!(
            table
                .convert_class("a", Namespace::Obfuscated, Namespace::Named)
                .unwrap(),
            "net/minecraft/Mob"
        );
        // The override never drops what it does not restate.
        assert!(table
            .convert_member_name(
                MemberKind::Method,
                "a",
                "a",
                "(Lb;)V",
                Namespace::Obfuscated,
                Namespace::Named
            )
            .is_ok());
    }

    #[test]
    fn unanchored_entries_are_gaps() {
        let err = resolve(&[source("yarn", YARN, false)]).unwrap_err();
        assert!(matches!(err, PipelineError::MappingGap { .. }));
    }
}
