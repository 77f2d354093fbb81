use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use super::{source_path, source_units, DecompiledSources, Decompiler};
use crate::core::classfile::attributes::AttributeBody;
use crate::core::classfile::descriptor::{java_type, split_method};
use crate::core::classfile::{flags, ClassFile, Constant, Member};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::jar::Jar;
use crate::core::pipeline::CancellationFlag;

const INDENT: &str = "    ";
const ACC_SYNCHRONIZED: u16 = 0x0020;
const ACC_VOLATILE: u16 = 0x0040;
const ACC_TRANSIENT: u16 = 0x0080;

/// In-process engine producing declaration skeletons: every type, field
/// and method signature with constant values, and stubbed method bodies.
/// Fast and dependency-free, useful for navigation and for tests.
#[derive(Debug, Clone)]
pub struct SkeletonDecompiler {
    pub threads: usize,
}

#[async_trait]
impl Decompiler for SkeletonDecompiler {
    fn name(&self) -> &'static str {
        "skeleton"
    }

    async fn decompile(
        &self,
        jar: Arc<Jar>,
        cancel: &CancellationFlag,
    ) -> PipelineResult<DecompiledSources> {
        let units = source_units(&jar);
        let mut results: Vec<(String, PipelineResult<String>)> = stream::iter(units)
            .map(|name| {
                let jar = Arc::clone(&jar);
                let cancel = cancel.clone();
                async move {
                    if let Err(e) = cancel.checkpoint() {
                        return (name, Err(e));
                    }
                    let class = name.clone();
                    let rendered = match tokio::task::spawn_blocking(move || render_unit(&jar, &class)).await {
                        Ok(Ok(text)) => Ok(text),
                        Ok(Err(e)) => Err(PipelineError::DecompileFailure {
                            class: name.clone(),
                            message: e.to_string(),
                        }),
                        Err(e) => Err(PipelineError::stage("decompile", format!("worker panicked: {e}"))),
                    };
                    (name, rendered)
                }
            })
            .buffer_unordered(self.threads.max(1))
            .collect()
            .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = DecompiledSources::default();
        for (name, result) in results {
            match result {
                Ok(text) => {
                    out.sources.insert(source_path(&name), text);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => out.record_failure(&name, e),
            }
        }
        Ok(out)
    }
}

/// Render a top-level class and its named member classes as one file.
pub fn render_unit(jar: &Jar, name: &str) -> PipelineResult<String> {
    let mut out = String::new();
    if let Some((package, _)) = name.rsplit_once('/') {
        let _ = writeln!(out, "package {};\n", package.replace('/', "."));
    }
    render_class(jar, name, 0, &mut out)?;
    Ok(out)
}

fn simple_name(name: &str) -> &str {
    let tail = name.rsplit('/').next().unwrap_or(name);
    tail.rsplit('$').next().unwrap_or(tail)
}

/// Named member classes declared directly inside `outer`. Anonymous and
/// local classes (`Outer$1`, `Outer$1Local`) are not rendered.
fn member_classes<'a>(jar: &'a Jar, outer: &str) -> Vec<&'a str> {
    let prefix = format!("{outer}$");
    jar.classes
        .keys()
        .filter_map(|k| k.strip_prefix(prefix.as_str()).map(|rest| (k, rest)))
        .filter(|(_, rest)| {
            !rest.contains('$') && rest.bytes().next().is_some_and(|c| !c.is_ascii_digit())
        })
        .map(|(k, _)| k.as_str())
        .collect()
}

fn render_class(jar: &Jar, name: &str, depth: usize, out: &mut String) -> PipelineResult<()> {
    let bytes = jar
        .class(name)
        .ok_or_else(|| PipelineError::stage("decompile", format!("class {name} is not in the jar")))?;
    let class = ClassFile::parse(bytes, name)?;
    let pad = INDENT.repeat(depth);
    let access = own_inner_access(&class, name)?.unwrap_or(class.access);

    let kind = if access & flags::ACC_ANNOTATION != 0 {
        "@interface"
    } else if access & flags::ACC_INTERFACE != 0 {
        "interface"
    } else if access & flags::ACC_ENUM != 0 {
        "enum"
    } else {
        "class"
    };
    let mut header = visibility(access).to_string();
    if access & flags::ACC_STATIC != 0 && depth > 0 {
        header.push_str("static ");
    }
    if kind == "class" {
        if access & flags::ACC_ABSTRACT != 0 {
            header.push_str("abstract ");
        }
        if access & flags::ACC_FINAL != 0 {
            header.push_str("final ");
        }
    }
    let _ = write!(out, "{pad}{header}{kind} {}", simple_name(name));

    let super_name = class.super_name()?;
    if kind == "class" {
        if let Some(s) = super_name.as_deref().filter(|s| *s != "java/lang/Object") {
            let _ = write!(out, " extends {}", s.replace(['/', '$'], "."));
        }
    }
    let interfaces: Vec<String> = class
        .interface_names()?
        .iter()
        .filter(|i| kind != "@interface" || i.as_str() != "java/lang/annotation/Annotation")
        .map(|i| i.replace(['/', '$'], "."))
        .collect();
    if !interfaces.is_empty() {
        let keyword = if kind == "interface" { "extends" } else { "implements" };
        let _ = write!(out, " {keyword} {}", interfaces.join(", "));
    }
    out.push_str(" {\n");

    let inner_pad = INDENT.repeat(depth + 1);
    let constants: Vec<String> = class
        .fields
        .iter()
        .filter(|f| f.has_flag(flags::ACC_ENUM))
        .map(|f| class.member_name(f))
        .collect::<PipelineResult<_>>()?;
    if kind == "enum" {
        let _ = writeln!(out, "{inner_pad}{};", constants.join(", "));
    }

    for field in class.fields.iter().filter(|f| !f.has_flag(flags::ACC_SYNTHETIC)) {
        if field.has_flag(flags::ACC_ENUM) {
            continue;
        }
        render_field(&class, field, &inner_pad, out)?;
    }
    for method in &class.methods {
        if method.has_flag(flags::ACC_SYNTHETIC) || method.has_flag(flags::ACC_BRIDGE) {
            continue;
        }
        render_method(&class, name, kind, method, &inner_pad, out)?;
    }
    for member in member_classes(jar, name) {
        out.push('\n');
        render_class(jar, member, depth + 1, out)?;
    }
    let _ = writeln!(out, "{pad}}}");
    Ok(())
}

/// Access flags recorded for the class itself in its InnerClasses table.
fn own_inner_access(class: &ClassFile, name: &str) -> PipelineResult<Option<u16>> {
    for attr in &class.attributes {
        if let AttributeBody::InnerClasses(entries) = &attr.body {
            for entry in entries {
                if class.pool.class_name(entry.inner_class)? == name {
                    return Ok(Some(entry.access));
                }
            }
        }
    }
    Ok(None)
}

fn visibility(access: u16) -> &'static str {
    if access & flags::ACC_PUBLIC != 0 {
        "public "
    } else if access & flags::ACC_PROTECTED != 0 {
        "protected "
    } else if access & flags::ACC_PRIVATE != 0 {
        "private "
    } else {
        ""
    }
}

fn render_field(class: &ClassFile, field: &Member, pad: &str, out: &mut String) -> PipelineResult<()> {
    let desc = class.member_descriptor(field)?;
    let mut line = format!("{pad}{}", visibility(field.access));
    for (flag, word) in [
        (flags::ACC_STATIC, "static "),
        (flags::ACC_FINAL, "final "),
        (ACC_TRANSIENT, "transient "),
        (ACC_VOLATILE, "volatile "),
    ] {
        if field.access & flag != 0 {
            line.push_str(word);
        }
    }
    let _ = write!(line, "{} {}", java_type(&desc), class.member_name(field)?);
    let constant = field.attributes.iter().find_map(|a| match a.body {
        AttributeBody::ConstantValue(index) => Some(index),
        _ => None,
    });
    if let Some(index) = constant {
        let _ = write!(line, " = {}", constant_literal(class, index, &desc)?);
    }
    let _ = writeln!(out, "{line};");
    Ok(())
}

fn constant_literal(class: &ClassFile, index: u16, desc: &str) -> PipelineResult<String> {
    Ok(match class.pool.get(index)? {
        Constant::Integer(v) => match desc {
            "Z" => (*v != 0).to_string(),
            "C" => format!("(char) {}", *v as u16),
            _ => (*v as i32).to_string(),
        },
        Constant::Long(v) => format!("{}L", *v as i64),
        Constant::Float(bits) => float_literal(f32::from_bits(*bits), "Float", "F"),
        Constant::Double(bits) => float_literal(f64::from_bits(*bits), "Double", "D"),
        Constant::String(utf8) => format!("\"{}\"", escape_java(&class.pool.utf8(*utf8)?)),
        other => {
            return Err(PipelineError::class_format(
                class.name().unwrap_or_default(),
                format!("unexpected constant value {other:?}"),
            ))
        }
    })
}

fn float_literal<T: Into<f64> + std::fmt::Debug + Copy>(value: T, boxed: &str, suffix: &str) -> String {
    let wide: f64 = value.into();
    if wide.is_nan() {
        format!("{boxed}.NaN")
    } else if wide.is_infinite() && wide > 0.0 {
        format!("{boxed}.POSITIVE_INFINITY")
    } else if wide.is_infinite() {
        format!("{boxed}.NEGATIVE_INFINITY")
    } else {
        format!("{value:?}{suffix}")
    }
}

fn escape_java(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

fn render_method(
    class: &ClassFile,
    class_name: &str,
    kind: &str,
    method: &Member,
    pad: &str,
    out: &mut String,
) -> PipelineResult<()> {
    let name = class.member_name(method)?;
    if name == "<clinit>" {
        return Ok(());
    }
    let desc = class.member_descriptor(method)?;
    let (params, ret) = split_method(&desc)?;
    let access = method.access;
    let is_interface = matches!(kind, "interface" | "@interface");

    let mut line = pad.to_string();
    if !is_interface {
        line.push_str(visibility(access));
    } else if access & flags::ACC_PRIVATE != 0 {
        line.push_str("private ");
    }
    let has_body = access & (flags::ACC_ABSTRACT | flags::ACC_NATIVE) == 0;
    if is_interface && has_body && access & (flags::ACC_STATIC | flags::ACC_PRIVATE) == 0 {
        line.push_str("default ");
    }
    for (flag, word) in [
        (flags::ACC_STATIC, "static "),
        (flags::ACC_FINAL, "final "),
        (ACC_SYNCHRONIZED, "synchronized "),
        (flags::ACC_NATIVE, "native "),
    ] {
        if access & flag != 0 {
            line.push_str(word);
        }
    }
    if !is_interface && access & flags::ACC_ABSTRACT != 0 {
        line.push_str("abstract ");
    }

    if name == "<init>" {
        line.push_str(simple_name(class_name));
    } else {
        let _ = write!(line, "{} {}", java_type(ret), name);
    }

    let param_names = parameter_names(class, method)?;
    let last = params.len().saturating_sub(1);
    let rendered: Vec<String> = params
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let mut ty = java_type(p);
            if i == last && access & flags::ACC_VARARGS != 0 && ty.ends_with("[]") {
                ty.truncate(ty.len() - 2);
                ty.push_str("...");
            }
            let name = param_names
                .get(i)
                .cloned()
                .flatten()
                .unwrap_or_else(|| format!("p{i}"));
            format!("{ty} {name}")
        })
        .collect();
    let _ = write!(line, "({})", rendered.join(", "));

    let throws: Vec<String> = method
        .attributes
        .iter()
        .filter_map(|a| match &a.body {
            AttributeBody::Exceptions(list) => Some(list),
            _ => None,
        })
        .flatten()
        .map(|i| class.pool.class_name(*i).map(|n| n.replace(['/', '$'], ".")))
        .collect::<PipelineResult<_>>()?;
    if !throws.is_empty() {
        let _ = write!(line, " throws {}", throws.join(", "));
    }

    if has_body {
        let _ = writeln!(out, "{line} {{\n{pad}{INDENT}throw new UnsupportedOperationException();\n{pad}}}");
    } else {
        let _ = writeln!(out, "{line};");
    }
    Ok(())
}

fn parameter_names(class: &ClassFile, method: &Member) -> PipelineResult<Vec<Option<String>>> {
    for attr in &method.attributes {
        if let AttributeBody::MethodParameters(params) = &attr.body {
            return params
                .iter()
                .map(|p| {
                    if p.name == 0 {
                        Ok(None)
                    } else {
                        class.pool.utf8(p.name).map(Some)
                    }
                })
                .collect();
        }
    }
    Ok(Vec::new())
}
