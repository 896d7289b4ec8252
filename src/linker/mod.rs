//! Cross-file linking
//!
//! [`link`] merges every [`ParsedFile`](crate::parser::ParsedFile) into one
//! [`LinkedTable`]: a single namespace of structs, enums, defines and
//! externs, a solved constant environment and the comments of every file.
//! Packet roots are then expanded on demand into [`ResolvedStruct`] trees
//! where every named type has been replaced by its definition.

mod constants;
mod resolved;
mod table;

pub use constants::{solve, Constants, Pending};
pub use resolved::{Count, ResolvedEntry, ResolvedEnum, ResolvedMember, ResolvedStruct, ResolvedType};
pub use table::{link, FileInfo, LinkedTable};
