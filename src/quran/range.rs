use crate::error::LocatorError;

use super::locator::{chapter_verse_count, VerseKey};

/// Every verse of a chapter, in order
pub fn chapter_verses(chapter: u16) -> Result<Vec<VerseKey>, LocatorError> {
    let count = chapter_verse_count(chapter).ok_or(LocatorError::InvalidChapter(chapter as u32))?;
    (1..=count).map(|verse| VerseKey::new(chapter, verse)).collect()
}

/// Inclusive range of verses in canonical order (may span chapters)
pub fn verses_between(from: VerseKey, to: VerseKey) -> Result<Vec<VerseKey>, LocatorError> {
    if from > to {
        return Err(LocatorError::InvalidRange(format!("{} comes after {}", from, to)));
    }

    (from.global_index()..=to.global_index())
        .map(VerseKey::from_global_index)
        .collect()
}

/// Parse a selection such as `36` (whole chapter), `2:255` (single verse),
/// or `2:1-2:5` / `2:1-5` (inclusive range).
pub fn parse_selection(selection: &str) -> Result<Vec<VerseKey>, LocatorError> {
    let selection = selection.trim();

    if let Some((start, end)) = selection.split_once('-') {
        let from: VerseKey = start.parse()?;
        // Bare verse number after the dash stays in the same chapter
        let to: VerseKey = if end.contains(':') {
            end.parse()?
        } else {
            let verse: u16 = end
                .trim()
                .parse()
                .map_err(|_| LocatorError::InvalidRange(selection.to_string()))?;
            VerseKey::new(from.chapter(), verse)?
        };
        return verses_between(from, to);
    }

    if selection.contains(':') {
        return Ok(vec![selection.parse()?]);
    }

    let chapter: u16 = selection
        .parse()
        .map_err(|_| LocatorError::InvalidRange(selection.to_string()))?;
    chapter_verses(chapter)
}
