use crate::core::error::{PipelineError, PipelineResult};

fn malformed(what: &str, value: &str) -> PipelineError {
    PipelineError::class_format("<descriptor>", format!("malformed {what}: {value}"))
}

/// Rewrite every class name inside a field or method descriptor.
pub fn map_descriptor(
    desc: &str,
    map: &mut dyn FnMut(&str) -> PipelineResult<String>,
) -> PipelineResult<String> {
    let mut out = String::with_capacity(desc.len());
    let mut rest = desc;
    while let Some(pos) = rest.find('L') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let end = after
            .find(';')
            .ok_or_else(|| malformed("descriptor", desc))?;
        out.push('L');
        out.push_str(&map(&after[..end])?);
        out.push(';');
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Class names referenced by a descriptor, in order of appearance.
pub fn referenced_classes(desc: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = desc;
    while let Some(pos) = rest.find('L') {
        let after = &rest[pos + 1..];
        match after.find(';') {
            Some(end) => {
                out.push(&after[..end]);
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    out
}

/// Map a class name that may be an array descriptor (`[Lfoo;`), as found in
/// `Class` constants.
pub fn map_class_or_array(
    name: &str,
    map: &mut dyn FnMut(&str) -> PipelineResult<String>,
) -> PipelineResult<String> {
    if name.starts_with('[') {
        map_descriptor(name, map)
    } else {
        map(name)
    }
}

/// Split a method descriptor into parameter descriptors and the return
/// descriptor.
pub fn split_method(desc: &str) -> PipelineResult<(Vec<&str>, &str)> {
    let inner = desc
        .strip_prefix('(')
        .ok_or_else(|| malformed("method descriptor", desc))?;
    let close = inner
        .find(')')
        .ok_or_else(|| malformed("method descriptor", desc))?;
    let (mut params_str, ret) = (&inner[..close], &inner[close + 1..]);
    let mut params = Vec::new();
    while !params_str.is_empty() {
        let len = field_len(params_str).ok_or_else(|| malformed("method descriptor", desc))?;
        params.push(&params_str[..len]);
        params_str = &params_str[len..];
    }
    Ok((params, ret))
}

fn field_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while bytes.get(i) == Some(&b'[') {
        i += 1;
    }
    match bytes.get(i)? {
        b'L' => Some(i + s[i..].find(';')? + 1),
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b'V' => Some(i + 1),
        _ => None,
    }
}

/// Java source spelling of a field descriptor (`[Lnet/foo/Bar;` becomes
/// `net.foo.Bar[]`).
pub fn java_type(desc: &str) -> String {
    let dims = desc.bytes().take_while(|b| *b == b'[').count();
    let base = &desc[dims..];
    let name = match base.as_bytes().first() {
        Some(b'B') => "byte".to_string(),
        Some(b'C') => "char".to_string(),
        Some(b'D') => "double".to_string(),
        Some(b'F') => "float".to_string(),
        Some(b'I') => "int".to_string(),
        Some(b'J') => "long".to_string(),
        Some(b'S') => "short".to_string(),
        Some(b'Z') => "boolean".to_string(),
        Some(b'V') => "void".to_string(),
        Some(b'L') => base[1..base.len().saturating_sub(1)].replace(['/', '$'], "."),
        _ => desc.to_string(),
    };
    format!("{}{}", name, "[]".repeat(dims))
}

// ── Generic signatures ──────────────────────────────────

/// Rewrite class names inside a generic signature (class, method or field
/// signature). Inner-class suffixes (`Outer<T>.Inner`) are resolved against
/// the mapped outer name.
pub fn map_signature(
    sig: &str,
    map: &mut dyn FnMut(&str) -> PipelineResult<String>,
) -> PipelineResult<String> {
    let mut p = SigMapper {
        src: sig.as_bytes(),
        sig,
        pos: 0,
        out: String::with_capacity(sig.len()),
        map,
    };
    p.signature()?;
    Ok(p.out)
}

struct SigMapper<'a, 'm> {
    src: &'a [u8],
    sig: &'a str,
    pos: usize,
    out: String,
    map: &'m mut dyn FnMut(&str) -> PipelineResult<String>,
}

impl SigMapper<'_, '_> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn err(&self) -> PipelineError {
        malformed("signature", self.sig)
    }

    fn copy(&mut self, n: usize) {
        self.out.push_str(&self.sig[self.pos..self.pos + n]);
        self.pos += n;
    }

    fn ident_until(&mut self, stops: &[u8]) -> PipelineResult<&str> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if stops.contains(&b) {
                let ident = &self.sig[start..self.pos];
                return Ok(ident);
            }
            self.pos += 1;
        }
        Err(self.err())
    }

    fn signature(&mut self) -> PipelineResult<()> {
        if self.peek() == Some(b'<') {
            self.formal_parameters()?;
        }
        while let Some(b) = self.peek() {
            match b {
                b'(' | b')' | b'^' => self.copy(1),
                _ => self.type_signature()?,
            }
        }
        Ok(())
    }

    fn formal_parameters(&mut self) -> PipelineResult<()> {
        self.copy(1);
        while self.peek() != Some(b'>') {
            let ident = self.ident_until(b":")?.to_string();
            self.out.push_str(&ident);
            while self.peek() == Some(b':') {
                self.copy(1);
                if matches!(self.peek(), Some(b'L' | b'T' | b'[')) {
                    self.type_signature()?;
                }
            }
            if self.peek().is_none() {
                return Err(self.err());
            }
        }
        self.copy(1);
        Ok(())
    }

    fn type_signature(&mut self) -> PipelineResult<()> {
        match self.peek().ok_or_else(|| self.err())? {
            b'L' => self.class_type(),
            b'T' => {
                let start = self.pos;
                self.ident_until(b";")?;
                self.pos += 1;
                self.out.push_str(&self.sig[start..self.pos]);
                Ok(())
            }
            b'[' => {
                self.copy(1);
                self.type_signature()
            }
            b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b'V' => {
                self.copy(1);
                Ok(())
            }
            _ => Err(self.err()),
        }
    }

    fn class_type(&mut self) -> PipelineResult<()> {
        self.pos += 1;
        self.out.push('L');
        let outer = self.ident_until(b"<.;")?.to_string();
        let mut mapped = (self.map)(&outer)?;
        let mut full = outer;
        self.out.push_str(&mapped);
        loop {
            match self.peek() {
                Some(b'<') => self.type_arguments()?,
                Some(b'.') => {
                    self.copy(1);
                    let inner = self.ident_until(b"<.;")?.to_string();
                    full = format!("{full}${inner}");
                    let inner_mapped = (self.map)(&full)?;
                    let simple = inner_mapped
                        .strip_prefix(&format!("{mapped}$"))
                        .map(str::to_owned)
                        .unwrap_or_else(|| {
                            inner_mapped
                                .rsplit(['$', '/'])
                                .next()
                                .unwrap_or(&inner_mapped)
                                .to_string()
                        });
                    self.out.push_str(&simple);
                    mapped = inner_mapped;
                }
                Some(b';') => {
                    self.copy(1);
                    return Ok(());
                }
                _ => return Err(self.err()),
            }
        }
    }

    fn type_arguments(&mut self) -> PipelineResult<()> {
        self.copy(1);
        loop {
            match self.peek().ok_or_else(|| self.err())? {
                b'>' => {
                    self.copy(1);
                    return Ok(());
                }
                b'*' => self.copy(1),
                b'+' | b'-' => {
                    self.copy(1);
                    self.type_signature()?;
                }
                _ => self.type_signature()?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rename(name: &str) -> PipelineResult<String> {
        Ok(match name {
            "a" => "net/minecraft/Entity".into(),
            "b" => "net/minecraft/World".into(),
            "b$c" => "net/minecraft/World$Chunk".into(),
            other => other.to_string(),
        })
    }

    #[test]
    fn maps_method_descriptors() {
        let out = map_descriptor("(La;I[Lb;)Ljava/lang/String;", &mut rename).unwrap();
        assert_eq!(out, "(Lnet/minecraft/Entity;I[Lnet/minecraft/World;)Ljava/lang/String;");
        assert!(map_descriptor("(La", &mut rename).is_err());
    }

    #[test]
    fn maps_array_class_constants() {
        assert_eq!(map_class_or_array("[[La;", &mut rename).unwrap(), "[[Lnet/minecraft/Entity;");
        assert_eq!(map_class_or_array("a", &mut rename).unwrap(), "net/minecraft/Entity");
    }

    #[test]
    fn splits_parameters() {
        let (params, ret) = split_method("(IJ[La;Lb;)V").unwrap();
        assert_eq!(params, vec!["I", "J", "[La;", "Lb;"]);
        assert_eq!(ret, "V");
    }

    #[test]
    fn renders_java_types() {
        assert_eq!(java_type("[Lb$c;"), "b.c[]");
        assert_eq!(java_type("Z"), "boolean");
    }

    #[test]
    fn maps_generic_signatures_without_touching_type_variables() {
        // Type variable named `L` must not be mistaken for a class type.
        let sig = "<L:La;>(TL;Ljava/util/List<+Lb;>;)Lb<TL;>.c;";
        let out = map_signature(sig, &mut rename).unwrap();
        assert_eq!(
            out,
            "<L:Lnet/minecraft/Entity;>(TL;Ljava/util/List<+Lnet/minecraft/World;>;)Lnet/minecraft/World<TL;>.Chunk;"
        );
    }

    #[test]
    fn maps_interface_bounds() {
        let out = map_signature("<T::Ljava/lang/Comparable<TT;>;>La;", &mut rename).unwrap();
        assert_eq!(out, "<T::Ljava/lang/Comparable<TT;>;>Lnet/minecraft/Entity;");
    }
}
