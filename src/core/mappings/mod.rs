// ─── Mappings ───
// Loads name mappings from Tiny v1/v2 and MCP CSV sources and merges them,
// in precedence order, into one immutable namespace-aware table.

pub mod mcp;
pub mod namespace;
pub mod resolver;
pub mod table;
pub mod tiny;

pub use namespace::Namespace;
pub use resolver::{resolve, MappingFormat, MappingSource};
pub use table::{ClassMapping, MappingTable, MemberKey, MemberKind, Names, Symbol};
