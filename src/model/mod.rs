pub mod index_data;
pub mod location;
pub mod source;
pub mod symbol;

pub use index_data::{Diagnostic, FixIt, IndexData, IndexFlags, PendingReference, Severity};
pub use location::{FileId, Location, NULL_FILE_ID};
pub use source::{Source, SourceFlags};
pub use symbol::{SymbolInfo, SymbolKind};
