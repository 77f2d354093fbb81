use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::core::classfile::{class_name_of, entry_path};
use crate::core::error::{PipelineError, PipelineResult};

/// In-memory jar: class bytes keyed by internal class name, everything else
/// keyed by entry path. Both maps are sorted, which gives written jars a
/// stable entry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Jar {
    pub classes: BTreeMap<String, Vec<u8>>,
    pub resources: BTreeMap<String, Vec<u8>>,
}

impl Jar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(bytes: &[u8]) -> PipelineResult<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut jar = Jar::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut data)
                .map_err(|e| PipelineError::io(&name, e))?;
            match class_name_of(&name) {
                Some(class) => {
                    jar.classes.insert(class.to_string(), data);
                }
                None => {
                    jar.resources.insert(name, data);
                }
            }
        }
        Ok(jar)
    }

    /// Write a deterministic jar: sorted entries, fixed timestamps and
    /// permissions, deflate compression. The manifest goes first, as the JDK
    /// expects.
    pub fn write(&self) -> PipelineResult<Vec<u8>> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644);

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let mut entries: Vec<(String, &[u8])> = Vec::new();
        for (name, data) in &self.resources {
            entries.push((name.clone(), data));
        }
        for (name, data) in &self.classes {
            entries.push((entry_path(name), data));
        }
        entries.sort_by(|a, b| manifest_first(&a.0).cmp(&manifest_first(&b.0)).then(a.0.cmp(&b.0)));

        for (name, data) in entries {
            writer.start_file(name.as_str(), options)?;
            writer
                .write_all(data)
                .map_err(|e| PipelineError::io(&name, e))?;
        }
        Ok(writer.finish()?.into_inner())
    }

    pub fn class(&self, name: &str) -> Option<&[u8]> {
        self.classes.get(name).map(Vec::as_slice)
    }

    pub fn resource_str(&self, path: &str) -> Option<&str> {
        self.resources
            .get(path)
            .and_then(|b| std::str::from_utf8(b).ok())
    }
}

fn manifest_first(name: &str) -> u8 {
    match name {
        "META-INF/MANIFEST.MF" => 0,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Jar {
        let mut jar = Jar::new();
        jar.classes.insert("b".into(), vec![0xCA, 0xFE]);
        jar.classes.insert("a".into(), vec![1, 2, 3]);
        jar.resources
            .insert("META-INF/MANIFEST.MF".into(), b"Manifest-Version: 1.0\n".to_vec());
        jar.resources.insert("assets/x.json".into(), b"{}".to_vec());
        jar
    }

    #[test]
    fn write_then_read_preserves_entries() {
        let jar = sample();
        let bytes = jar.write().unwrap();
        assert_eq!(Jar::read(&bytes).unwrap(), jar);
    }

    #[test]
    fn written_jars_are_byte_identical() {
        let a = sample().write().unwrap();
        let b = sample().write().unwrap();
        assert_eq!(a, b);
    }
}
