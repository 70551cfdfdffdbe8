use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LocatorError;

/// Number of chapters
pub const CHAPTER_COUNT: u16 = 114;

/// Total number of verses across all chapters
pub const TOTAL_VERSES: u32 = 6236;

/// Verses per chapter, in canonical order
const VERSE_COUNTS: [u16; CHAPTER_COUNT as usize] = [
    7, 286, 200, 176, 120, 165, 206, 75, 129, 109, 123, 111, 43, 52, 99, 128, 111, 110, 98, 135,
    112, 78, 118, 64, 77, 227, 93, 88, 69, 60, 34, 30, 73, 54, 45, 83, 182, 88, 75, 85, 54, 53,
    89, 59, 37, 35, 38, 29, 18, 45, 60, 49, 62, 55, 78, 96, 29, 22, 24, 13, 14, 11, 11, 18, 12,
    12, 30, 52, 52, 44, 28, 28, 20, 56, 40, 31, 50, 40, 46, 42, 29, 19, 36, 25, 22, 17, 19, 26,
    30, 20, 15, 21, 11, 8, 8, 19, 5, 8, 8, 11, 11, 8, 3, 9, 5, 4, 7, 3, 6, 3, 5, 4, 5, 6,
];

/// Number of verses preceding each chapter; entry 114 is the grand total
const CHAPTER_OFFSETS: [u16; CHAPTER_COUNT as usize + 1] = chapter_offsets();

const fn chapter_offsets() -> [u16; CHAPTER_COUNT as usize + 1] {
    let mut offsets = [0u16; CHAPTER_COUNT as usize + 1];
    let mut i = 0;
    while i < CHAPTER_COUNT as usize {
        offsets[i + 1] = offsets[i] + VERSE_COUNTS[i];
        i += 1;
    }
    offsets
}

/// Number of verses in a chapter, or `None` if the chapter does not exist
pub fn chapter_verse_count(chapter: u16) -> Option<u16> {
    if (1..=CHAPTER_COUNT).contains(&chapter) {
        Some(VERSE_COUNTS[chapter as usize - 1])
    } else {
        None
    }
}

/// A single verse, identified by chapter and verse-in-chapter.
///
/// Ordering follows canonical order (chapter first, then verse). The textual
/// form is `"<chapter>:<verse>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VerseKey {
    chapter: u16,
    verse: u16,
}

impl VerseKey {
    /// Build a verse key, validating against the verse count table
    pub fn new(chapter: u16, verse: u16) -> Result<Self, LocatorError> {
        match chapter_verse_count(chapter) {
            Some(count) if (1..=count).contains(&verse) => Ok(Self { chapter, verse }),
            _ => Err(LocatorError::InvalidVerseKey(format!("{}:{}", chapter, verse))),
        }
    }

    /// Build a verse key from its 1-based global index (1..=6236)
    pub fn from_global_index(index: u32) -> Result<Self, LocatorError> {
        if !(1..=TOTAL_VERSES).contains(&index) {
            return Err(LocatorError::InvalidGlobalIndex(index));
        }

        // First chapter whose cumulative offset reaches the index
        let chapter = CHAPTER_OFFSETS.partition_point(|&offset| (offset as u32) < index);
        let verse = index - CHAPTER_OFFSETS[chapter - 1] as u32;

        Ok(Self {
            chapter: chapter as u16,
            verse: verse as u16,
        })
    }

    /// 1-based position of this verse across the whole text
    pub fn global_index(&self) -> u32 {
        CHAPTER_OFFSETS[self.chapter as usize - 1] as u32 + self.verse as u32
    }

    pub fn chapter(&self) -> u16 {
        self.chapter
    }

    pub fn verse(&self) -> u16 {
        self.verse
    }
}

impl fmt::Display for VerseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chapter, self.verse)
    }
}

impl FromStr for VerseKey {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LocatorError::InvalidVerseKey(s.to_string());

        let (chapter, verse) = s.trim().split_once(':').ok_or_else(invalid)?;
        let chapter: u16 = chapter.parse().map_err(|_| invalid())?;
        let verse: u16 = verse.parse().map_err(|_| invalid())?;

        Self::new(chapter, verse).map_err(|_| invalid())
    }
}

impl TryFrom<String> for VerseKey {
    type Error = LocatorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VerseKey> for String {
    fn from(key: VerseKey) -> Self {
        key.to_string()
    }
}

/// Map a verse key string to its global index
pub fn verse_key_to_global_index(key: &str) -> Result<u32, LocatorError> {
    Ok(key.parse::<VerseKey>()?.global_index())
}

/// Map a global index to its verse key
pub fn global_index_to_verse_key(index: u32) -> Result<VerseKey, LocatorError> {
    VerseKey::from_global_index(index)
}
