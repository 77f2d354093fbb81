use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use super::format::{AccessChange, PatchRecord, PatchSet, PatchTarget};
use crate::core::classfile::attributes::AttributeBody;
use crate::core::classfile::{flags, ClassFile, Member};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::jar::Jar;
use crate::core::mappings::Namespace;

/// Counts reported after a successful application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PatchSummary {
    pub records: usize,
    pub classes_changed: usize,
}

/// Widen access flags in `jar` according to `patches`, returning a new jar.
///
/// Every record is checked against the jar before anything is written: a
/// single missing target fails the whole application with
/// `PatchTargetMissing` and no output. Only access flags change; a class
/// whose flags end up the same keeps its original bytes.
pub fn apply_patches(
    jar: &Jar,
    patches: &PatchSet,
    namespace: Namespace,
) -> PipelineResult<(Jar, PatchSummary)> {
    if patches.namespace != namespace {
        return Err(PipelineError::NamespaceMismatch {
            expected: patches.namespace.to_string(),
            actual: namespace.to_string(),
        });
    }

    let mut by_class: BTreeMap<&str, Vec<&PatchRecord>> = BTreeMap::new();
    for record in &patches.records {
        by_class.entry(record.target.class()).or_default().push(record);
    }
    let widened_classes: BTreeMap<&str, Vec<AccessChange>> = patches
        .records
        .iter()
        .filter_map(|r| match &r.target {
            PatchTarget::Class { name } => Some((name.as_str(), r.change)),
            _ => None,
        })
        .fold(BTreeMap::new(), |mut acc, (name, change)| {
            acc.entry(name).or_insert_with(Vec::new).push(change);
            acc
        });

    // Validation pass: resolve every record before touching anything.
    let mut parsed: BTreeMap<String, ClassFile> = BTreeMap::new();
    for (class_name, records) in &by_class {
        let missing = |record: &PatchRecord| PipelineError::PatchTargetMissing {
            record: record.describe(),
        };
        let Some(bytes) = jar.class(class_name) else {
            return Err(missing(records[0]));
        };
        let class = ClassFile::parse(bytes, class_name)?;
        for record in records {
            let found = match &record.target {
                PatchTarget::Class { .. } => true,
                PatchTarget::Method { name, desc, .. } => class.find_method(name, desc).is_some(),
                PatchTarget::Field { name, desc, .. } => class.find_field(name, desc).is_some(),
            };
            if !found {
                return Err(missing(*record));
            }
        }
        parsed.insert(class_name.to_string(), class);
    }

    // Outer classes carry InnerClasses entries for widened nested classes.
    for nested in widened_classes.keys() {
        if let Some((outer, _)) = nested.rsplit_once('$') {
            if !parsed.contains_key(outer) {
                if let Some(bytes) = jar.class(outer) {
                    parsed.insert(outer.to_string(), ClassFile::parse(bytes, outer)?);
                }
            }
        }
    }

    // Write pass.
    let mut out = jar.clone();
    let mut summary = PatchSummary {
        records: patches.len(),
        classes_changed: 0,
    };
    for (class_name, mut class) in parsed {
        let mut changed = false;
        for record in by_class.get(class_name.as_str()).into_iter().flatten() {
            changed |= apply_record(&mut class, record)?;
        }
        changed |= widen_inner_class_entries(&mut class, &widened_classes)?;
        if changed {
            debug!("widened access in {}", class_name);
            out.classes.insert(class_name, class.to_bytes()?);
            summary.classes_changed += 1;
        }
    }
    info!(
        "Applied {} access patches, {} classes changed",
        summary.records, summary.classes_changed
    );
    Ok((out, summary))
}

fn apply_record(class: &mut ClassFile, record: &PatchRecord) -> PipelineResult<bool> {
    let (members, name, desc) = match &record.target {
        PatchTarget::Class { .. } => {
            let before = class.access;
            class.access = widen_class(class.access, record.change);
            return Ok(class.access != before);
        }
        PatchTarget::Method { name, desc, .. } => (&mut class.methods, name, desc),
        PatchTarget::Field { name, desc, .. } => (&mut class.fields, name, desc),
    };
    let index = position(&class.pool, members, name, desc).ok_or_else(|| {
        PipelineError::PatchTargetMissing {
            record: record.describe(),
        }
    })?;
    let member = &mut members[index];
    let before = member.access;
    member.access = match &record.target {
        PatchTarget::Method { .. } => widen_method(member.access, record.change),
        _ => widen_field(member.access, record.change),
    };
    Ok(member.access != before)
}

fn position(
    pool: &crate::core::classfile::ConstantPool,
    members: &[Member],
    name: &str,
    desc: &str,
) -> Option<usize> {
    members.iter().position(|m| {
        pool.utf8(m.name_index).ok().as_deref() == Some(name)
            && pool.utf8(m.descriptor_index).ok().as_deref() == Some(desc)
    })
}

fn widen_inner_class_entries(
    class: &mut ClassFile,
    widened: &BTreeMap<&str, Vec<AccessChange>>,
) -> PipelineResult<bool> {
    if widened.is_empty() {
        return Ok(false);
    }
    let mut changed = false;
    for attr in &mut class.attributes {
        let AttributeBody::InnerClasses(entries) = &mut attr.body else {
            continue;
        };
        for entry in entries.iter_mut() {
            let inner = class.pool.class_name(entry.inner_class)?;
            let Some(changes) = widened.get(inner.as_str()) else {
                continue;
            };
            let before = entry.access;
            for change in changes {
                entry.access = widen_class(entry.access, *change);
            }
            changed |= entry.access != before;
        }
    }
    Ok(changed)
}

fn make_public(access: u16) -> u16 {
    (access & !(flags::ACC_PRIVATE | flags::ACC_PROTECTED)) | flags::ACC_PUBLIC
}

pub fn widen_class(access: u16, change: AccessChange) -> u16 {
    match change {
        AccessChange::Accessible => make_public(access),
        AccessChange::Extendable => make_public(access) & !flags::ACC_FINAL,
        AccessChange::Mutable => access,
    }
}

pub fn widen_method(access: u16, change: AccessChange) -> u16 {
    match change {
        AccessChange::Accessible => make_public(access),
        AccessChange::Extendable if access & flags::ACC_PUBLIC != 0 => access & !flags::ACC_FINAL,
        AccessChange::Extendable => {
            (access & !(flags::ACC_PRIVATE | flags::ACC_FINAL)) | flags::ACC_PROTECTED
        }
        AccessChange::Mutable => access,
    }
}

pub fn widen_field(access: u16, change: AccessChange) -> u16 {
    match change {
        AccessChange::Accessible => make_public(access),
        AccessChange::Mutable => access & !flags::ACC_FINAL,
        AccessChange::Extendable => access,
    }
}

/// Classes the patch set touches, for logging and reports.
pub fn targeted_classes(patches: &PatchSet) -> BTreeSet<&str> {
    patches.records.iter().map(|r| r.target.class()).collect()
}
