//! docsearch-text
//!
//! In-memory BM25 lexical index built on tantivy. Writers publish immutable
//! [`LexicalSnapshot`]s; searches never observe a half-applied mutation.
pub mod index;
pub mod tantivy_utils;

pub use index::{LexicalIndex, LexicalSnapshot};
pub use tantivy_utils::{is_stop_word, tokenize};
