// clipkeeper - Stores
// In-memory history and snippet stores owned by the daemon

mod history;
mod snippets;

pub use history::{folder_ranges, Captured, ClipboardStore, HistoryLimits};
pub use snippets::{Imported, SnippetPatch, SnippetStore};
