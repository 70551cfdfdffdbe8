use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, trace};

use crate::error::CatalogError;
use crate::quran::VerseKey;

use super::providers::{find_provider, Provider};

/// Hand-curated source lists for verses known to fail on the primary CDN
pub const BUILTIN_OVERRIDES: &str = include_str!("../../data/overrides.json");

#[derive(Debug, Deserialize)]
struct OverrideRecord {
    verse: String,
    note: Option<String>,
    sources: Vec<SourceRecord>,
}

#[derive(Debug, Deserialize)]
struct SourceRecord {
    provider: String,
    template: Option<String>,
}

/// One curated source: a provider plus an optional replacement template
#[derive(Debug, Clone)]
pub struct OverrideSource {
    pub provider: &'static Provider,
    pub template: Option<String>,
}

impl OverrideSource {
    pub fn template(&self) -> &str {
        self.template.as_deref().unwrap_or(self.provider.template)
    }
}

/// Override table keyed by verse
#[derive(Debug, Default)]
pub struct OverrideTable {
    entries: HashMap<VerseKey, Vec<OverrideSource>>,
}

impl OverrideTable {
    /// Parse an override table from its JSON form
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let records: Vec<OverrideRecord> = serde_json::from_str(json)?;
        let mut entries = HashMap::with_capacity(records.len());

        for record in records {
            let verse: VerseKey = record
                .verse
                .parse()
                .map_err(|_| CatalogError::InvalidOverrideVerse {
                    verse: record.verse.clone(),
                })?;

            let sources = record
                .sources
                .into_iter()
                .map(|source| {
                    let provider = find_provider(&source.provider).ok_or_else(|| {
                        CatalogError::UnknownProvider {
                            verse: record.verse.clone(),
                            provider: source.provider.clone(),
                        }
                    })?;
                    Ok(OverrideSource {
                        provider,
                        template: source.template,
                    })
                })
                .collect::<Result<Vec<_>, CatalogError>>()?;

            trace!(%verse, sources = sources.len(), note = record.note.as_deref(), "Verse override");
            entries.insert(verse, sources);
        }

        debug!(count = entries.len(), "Loaded verse overrides");
        Ok(Self { entries })
    }

    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_OVERRIDES)
    }

    pub fn get(&self, verse: VerseKey) -> Option<&[OverrideSource]> {
        self.entries.get(&verse).map(Vec::as_slice)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
