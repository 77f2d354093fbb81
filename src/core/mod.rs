// ─── Loom Pipeline Core ───
// Content-addressed artifact pipeline that turns obfuscated game jars into
// remapped, merged, access-widened jars and optional decompiled sources.
//
// Architecture:
//   core/
//     cache/      Artifact keys + content-addressed store
//     mappings/   Tiny/CSV parsing, precedence merge, namespace conversion
//     provision/  Input locations, checksums, mirrors
//     downloader/ Checksum-verified fetches
//     maven/      Maven coordinates for provisioned inputs
//     classfile/  JVM class-file codec and builder
//     jar/        Deterministic jar I/O + client/server merge
//     remap/      Bytecode and metadata remapping
//     access/     Access widener parsing and application
//     decompile/  Pluggable decompilers + source remapping
//     pipeline/   Stage graph, executor, built-in loom stages
//     config      Pipeline configuration

pub mod access;
pub mod cache;
pub mod classfile;
pub mod config;
pub mod decompile;
pub mod downloader;
pub mod error;
pub mod http;
pub mod jar;
pub mod mappings;
pub mod maven;
pub mod pipeline;
pub mod provision;
pub mod remap;
