mod locator;
mod range;

pub use locator::{global_index_to_verse_key, verse_key_to_global_index, VerseKey, TOTAL_VERSES};
pub use range::parse_selection;
