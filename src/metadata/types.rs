use serde::{Deserialize, Serialize};

use crate::quran::VerseKey;

/// `GET /chapters` response
#[derive(Debug, Deserialize)]
pub struct ChaptersResponse {
    pub chapters: Vec<Chapter>,
}

/// Chapter (surah) metadata
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Chapter {
    pub id: u16,
    pub revelation_place: String,
    #[serde(default)]
    pub revelation_order: Option<u16>,
    #[serde(default)]
    pub bismillah_pre: bool,
    pub name_simple: String,
    #[serde(default)]
    pub name_complex: Option<String>,
    pub name_arabic: String,
    pub verses_count: u16,
    #[serde(default)]
    pub translated_name: Option<TranslatedName>,
}

impl Chapter {
    /// English (or other requested language) meaning of the name
    pub fn meaning(&self) -> Option<&str> {
        self.translated_name.as_ref().map(|t| t.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TranslatedName {
    #[serde(default)]
    pub language_name: Option<String>,
    pub name: String,
}

/// `GET /verses/by_chapter/{id}` response page
#[derive(Debug, Deserialize)]
pub struct VersesResponse {
    pub verses: Vec<Verse>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Verse {
    pub id: u32,
    pub verse_number: u16,
    pub verse_key: VerseKey,
    #[serde(default)]
    pub text_uthmani: Option<String>,
    #[serde(default)]
    pub translations: Vec<Translation>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Translation {
    #[serde(default)]
    pub resource_id: Option<u32>,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    pub current_page: u32,
    pub next_page: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub total_records: Option<u32>,
}

/// `GET /recitations/{id}/by_chapter/{chapter}` response page
#[derive(Debug, Deserialize)]
pub struct AudioFilesResponse {
    pub audio_files: Vec<AudioFile>,
    pub pagination: Pagination,
}

/// Audio file of one verse, with a path relative to the audio CDN
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AudioFile {
    pub verse_key: VerseKey,
    pub url: String,
}

impl AudioFile {
    /// Absolute URL, joining relative paths onto `audio_base`
    pub fn absolute_url(&self, audio_base: &str) -> String {
        if self.url.starts_with("http://") || self.url.starts_with("https://") {
            return self.url.clone();
        }
        if let Some(rest) = self.url.strip_prefix("//") {
            return format!("https://{}", rest);
        }
        format!(
            "{}/{}",
            audio_base.trim_end_matches('/'),
            self.url.trim_start_matches('/')
        )
    }
}

/// On-disk copy of the chapter list
#[derive(Debug, Deserialize, Serialize)]
pub struct PersistedChapters {
    /// Seconds since the Unix epoch
    pub fetched_at: u64,
    pub chapters: Vec<Chapter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chapters() {
        let json = r#"{"chapters":[{"id":1,"revelation_place":"makkah","revelation_order":5,
            "bismillah_pre":false,"name_simple":"Al-Fatihah","name_complex":"Al-Fātiĥah",
            "name_arabic":"الفاتحة","verses_count":7,"pages":[1,1],
            "translated_name":{"language_name":"english","name":"The Opener"}}]}"#;

        let response: ChaptersResponse = serde_json::from_str(json).unwrap();
        let chapter = &response.chapters[0];
        assert_eq!(chapter.id, 1);
        assert_eq!(chapter.verses_count, 7);
        assert_eq!(chapter.meaning(), Some("The Opener"));
    }

    #[test]
    fn test_parse_verses_page() {
        let json = r#"{"verses":[{"id":8,"verse_number":1,"verse_key":"2:1","text_uthmani":"الٓمٓ"}],
            "pagination":{"per_page":50,"current_page":1,"next_page":2,"total_pages":6,"total_records":286}}"#;

        let response: VersesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.verses[0].verse_key, VerseKey::new(2, 1).unwrap());
        assert_eq!(response.pagination.next_page, Some(2));
        assert!(response.verses[0].translations.is_empty());
    }

    #[test]
    fn test_bad_verse_key_rejected() {
        let json = r#"{"verse_key":"2:999","url":"x.mp3"}"#;
        assert!(serde_json::from_str::<AudioFile>(json).is_err());
    }

    #[test]
    fn test_absolute_url() {
        let file = AudioFile {
            verse_key: VerseKey::new(1, 1).unwrap(),
            url: "AbdulBaset/Mujawwad/mp3/001001.mp3".into(),
        };
        assert_eq!(
            file.absolute_url("https://verses.quran.com/"),
            "https://verses.quran.com/AbdulBaset/Mujawwad/mp3/001001.mp3"
        );

        let protocol_relative = AudioFile {
            url: "//mirrors.quranicaudio.com/everyayah/Alafasy_128kbps/001001.mp3".into(),
            ..file.clone()
        };
        assert_eq!(
            protocol_relative.absolute_url("https://verses.quran.com"),
            "https://mirrors.quranicaudio.com/everyayah/Alafasy_128kbps/001001.mp3"
        );
    }
}
