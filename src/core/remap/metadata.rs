use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::remapper::Remapper;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::mappings::MemberKind;

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";
pub const MOD_METADATA_PATH: &str = "fabric.mod.json";

fn metadata_error(message: impl Into<String>) -> PipelineError {
    PipelineError::stage("remap", message)
}

/// Rewrite the non-class entries of a jar: the manifest's `Main-Class`,
/// and the refmaps of every mixin config named by the mod metadata.
/// Everything else is copied unchanged.
pub fn remap_resources(
    resources: &BTreeMap<String, Vec<u8>>,
    remapper: &Remapper,
) -> PipelineResult<BTreeMap<String, Vec<u8>>> {
    let mut out = resources.clone();
    if remapper.is_identity() {
        return Ok(out);
    }

    if let Some(manifest) = resources.get(MANIFEST_PATH) {
        let text = String::from_utf8_lossy(manifest);
        if let Some(rewritten) = remap_manifest(&text, remapper)? {
            out.insert(MANIFEST_PATH.to_string(), rewritten.into_bytes());
        }
    }

    let Some(metadata) = resources.get(MOD_METADATA_PATH) else {
        return Ok(out);
    };
    let metadata: Value = serde_json::from_slice(metadata)?;
    for config_path in mixin_configs(&metadata)? {
        let Some(config) = resources.get(&config_path) else {
            debug!("mixin config {} is not in the jar", config_path);
            continue;
        };
        let config: Value = serde_json::from_slice(config)?;
        let Some(refmap_path) = config.get("refmap").and_then(Value::as_str) else {
            continue;
        };
        if let Some(refmap) = resources.get(refmap_path) {
            let refmap: Value = serde_json::from_slice(refmap)?;
            let rewritten = remap_refmap(refmap, remapper)?;
            out.insert(refmap_path.to_string(), serde_json::to_vec_pretty(&rewritten)?);
            debug!("rewrote refmap {}", refmap_path);
        }
    }
    Ok(out)
}

// ── Manifest ────────────────────────────────────────────

/// Rewrite `Main-Class`. Continuation lines are folded before parsing and
/// every attribute is re-wrapped at 72 bytes. `None` means the manifest
/// needs no change and its bytes should be kept as they are.
pub fn remap_manifest(text: &str, remapper: &Remapper) -> PipelineResult<Option<String>> {
    let mut logical: Vec<String> = Vec::new();
    for line in text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l)) {
        match (line.strip_prefix(' '), logical.last_mut()) {
            (Some(rest), Some(last)) => last.push_str(rest),
            _ => logical.push(line.to_string()),
        }
    }

    let mut changed = false;
    for line in &mut logical {
        if let Some(("Main-Class", value)) = line.split_once(": ") {
            let internal = value.trim().replace('.', "/");
            let mapped = remapper.map_class(&internal)?;
            if mapped != internal {
                *line = format!("Main-Class: {}", mapped.replace('/', "."));
                changed = true;
            }
        }
    }
    if !changed {
        return Ok(None);
    }

    let out = logical
        .iter()
        .map(|line| wrap_manifest_line(line))
        .collect::<Vec<_>>()
        .join("\r\n");
    Ok(Some(out))
}

fn wrap_manifest_line(line: &str) -> String {
    let mut out = String::new();
    let mut width = 0;
    let mut limit = 72;
    for c in line.chars() {
        let len = c.len_utf8();
        if width + len > limit {
            out.push_str("\r\n ");
            width = 0;
            // the leading space counts
            limit = 71;
        }
        out.push(c);
        width += len;
    }
    out
}

// ── Mod metadata ────────────────────────────────────────

/// Mixin config paths declared by `fabric.mod.json`. Each entry is either a
/// path or an object with a `config` path.
pub fn mixin_configs(metadata: &Value) -> PipelineResult<Vec<String>> {
    let Some(mixins) = metadata.get("mixins") else {
        return Ok(Vec::new());
    };
    let entries = match mixins {
        Value::String(path) => return Ok(vec![path.clone()]),
        Value::Array(entries) => entries,
        other => {
            return Err(metadata_error(format!(
                "fabric.mod.json: unsupported mixins value {other}"
            )))
        }
    };
    entries
        .iter()
        .map(|entry| match entry {
            Value::String(path) => Ok(path.clone()),
            Value::Object(obj) => obj
                .get("config")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| metadata_error("fabric.mod.json: mixin entry without config")),
            other => Err(metadata_error(format!(
                "fabric.mod.json: unsupported mixin entry {other}"
            ))),
        })
        .collect()
}

// ── Refmaps ─────────────────────────────────────────────

/// Convert every reference in a refmap (`mappings` and each `data` table).
pub fn remap_refmap(mut refmap: Value, remapper: &Remapper) -> PipelineResult<Value> {
    if let Some(mappings) = refmap.get_mut("mappings") {
        remap_reference_tables(mappings, remapper)?;
    }
    if let Some(Value::Object(data)) = refmap.get_mut("data") {
        for tables in data.values_mut() {
            remap_reference_tables(tables, remapper)?;
        }
    }
    Ok(refmap)
}

fn remap_reference_tables(tables: &mut Value, remapper: &Remapper) -> PipelineResult<()> {
    let Value::Object(tables) = tables else {
        return Err(metadata_error("refmap table is not an object"));
    };
    for references in tables.values_mut() {
        let Value::Object(references) = references else {
            return Err(metadata_error("refmap entry is not an object"));
        };
        for reference in references.values_mut() {
            if let Value::String(target) = reference {
                *target = remap_reference(target, remapper)?;
            }
        }
    }
    Ok(())
}

/// `Lowner;name(desc)ret`, `Lowner;name:desc`, or a bare class name.
/// References without an owner are relative to the mixin target and are
/// left alone.
fn remap_reference(reference: &str, remapper: &Remapper) -> PipelineResult<String> {
    let Some(rest) = reference.strip_prefix('L') else {
        if reference.contains(['(', ':', '.']) {
            return Ok(reference.to_string());
        }
        return remapper.map_class(reference);
    };
    let Some((owner, member)) = rest.split_once(';') else {
        return remapper.map_class(reference);
    };
    let new_owner = remapper.map_class(owner)?;

    let (kind, name, desc, sep) = if let Some(at) = member.find('(') {
        (MemberKind::Method, &member[..at], &member[at..], "")
    } else if let Some((name, desc)) = member.split_once(':') {
        (MemberKind::Field, name, desc, ":")
    } else {
        return Ok(format!("L{new_owner};{member}"));
    };
    let new_name = remapper.map_member(kind, owner, name, desc)?;
    let new_desc = remapper.map_desc(desc)?;
    Ok(format!("L{new_owner};{new_name}{sep}{new_desc}"))
}
