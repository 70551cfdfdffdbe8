mod overrides;
mod providers;
mod reciters;

pub use reciters::{find_reciter, ReciterId, RECITERS};

use overrides::OverrideTable;
use providers::{Provider, ProviderTier, PROVIDERS};
use reciters::FALLBACK_RECITER;

use serde::Serialize;
use tracing::{debug, trace};

use crate::error::CatalogError;
use crate::quran::VerseKey;

/// One URL hypothesis for where a verse's audio lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioCandidate {
    pub url: String,
    pub provider: &'static str,
    /// Position in the ranked list (0 is tried first)
    pub priority: u32,
}

/// Ranked URL construction across all known audio providers.
///
/// Purely builds strings; never touches the network.
pub struct SourceCatalog {
    providers: &'static [Provider],
    overrides: OverrideTable,
}

impl SourceCatalog {
    pub fn new(providers: &'static [Provider], overrides: OverrideTable) -> Self {
        Self {
            providers,
            overrides,
        }
    }

    /// Catalog with the built-in providers and override table
    pub fn builtin() -> Result<Self, CatalogError> {
        Ok(Self::new(PROVIDERS, OverrideTable::builtin()?))
    }

    /// Ranked candidates for a reciter and verse.
    ///
    /// Curated overrides for the verse come first, then every provider that
    /// carries the reciter in tier order. The last-resort feed is appended
    /// only when no mirror or regional provider carries the reciter.
    pub fn candidates(&self, reciter_id: ReciterId, verse: VerseKey) -> Vec<AudioCandidate> {
        let reciter = find_reciter(reciter_id);
        let mut urls: Vec<(String, &'static Provider)> = Vec::new();

        if let (Some(reciter), Some(sources)) = (reciter, self.overrides.get(verse)) {
            trace!(%verse, count = sources.len(), "Applying verse override");
            for source in sources {
                if let Some(code) = reciter.code_for(source.provider.name) {
                    let url = source
                        .provider
                        .render_with(source.template(), code, reciter, verse);
                    urls.push((url, source.provider));
                }
            }
        }

        if let Some(reciter) = reciter {
            for provider in self.providers.iter().filter(|p| p.tier != ProviderTier::LastResort) {
                if let Some(url) = provider.render(reciter, verse) {
                    urls.push((url, provider));
                }
            }
        }

        let has_secondary = urls
            .iter()
            .any(|(_, p)| matches!(p.tier, ProviderTier::Mirror | ProviderTier::Regional));

        if !has_secondary {
            if let Some(fallback) = find_reciter(FALLBACK_RECITER) {
                for provider in self.providers.iter().filter(|p| p.tier == ProviderTier::LastResort) {
                    let url = provider.render_with(provider.template, "", fallback, verse);
                    urls.push((url, provider));
                }
            }
        }

        let mut candidates: Vec<AudioCandidate> = Vec::with_capacity(urls.len());
        for (url, provider) in urls {
            if candidates.iter().any(|c| c.url == url) {
                continue;
            }
            candidates.push(AudioCandidate {
                url,
                provider: provider.name,
                priority: candidates.len() as u32,
            });
        }

        debug!(
            reciter = %reciter_id,
            %verse,
            count = candidates.len(),
            "Built candidate list"
        );
        candidates
    }

    /// Whether any non-fallback provider carries this reciter
    pub fn supports(&self, reciter_id: ReciterId) -> bool {
        find_reciter(reciter_id).is_some_and(|reciter| {
            self.providers
                .iter()
                .any(|p| p.tier != ProviderTier::LastResort && reciter.code_for(p.name).is_some())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quran::{VerseKey, TOTAL_VERSES};

    fn catalog() -> SourceCatalog {
        SourceCatalog::builtin().unwrap()
    }

    fn verse(s: &str) -> VerseKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_primary_provider_first() {
        let candidates = catalog().candidates(ReciterId(7), verse("2:2"));
        assert_eq!(candidates[0].provider, "quran-cdn");
        assert_eq!(candidates[0].url, "https://verses.quran.com/Alafasy/mp3/002002.mp3");
        let providers: Vec<_> = candidates.iter().map(|c| c.provider).collect();
        assert_eq!(
            providers,
            vec!["quran-cdn", "everyayah", "quranicaudio", "islamic-network", "mp3quran"]
        );
        assert!(candidates.iter().enumerate().all(|(i, c)| c.priority == i as u32));
    }

    #[test]
    fn test_override_comes_first() {
        let candidates = catalog().candidates(ReciterId(7), verse("3:93"));
        assert_eq!(candidates[0].url, "https://audio.qurancdn.com/Alafasy/mp3/003093.mp3");
        assert_eq!(candidates[1].url, "https://cdn.alquran.cloud/media/audio/ayah/ar.alafasy/386");
        // Generic primary candidate still present, after the curated ones
        assert_eq!(candidates[2].url, "https://verses.quran.com/Alafasy/mp3/003093.mp3");
        assert_eq!(candidates.len(), 7);
    }

    #[test]
    fn test_overrides_add_urls_missing_from_providers() {
        let curated = catalog();
        let generic = SourceCatalog::new(PROVIDERS, OverrideTable::default());
        for v in ["1:1", "2:255", "2:282", "3:93", "18:10", "36:1", "67:1"] {
            let with = curated.candidates(ReciterId(7), verse(v));
            let without = generic.candidates(ReciterId(7), verse(v));
            assert_eq!(with.len(), without.len() + 2, "{}", v);
            assert!(without.iter().all(|c| c.url != with[0].url), "{}", v);
            assert_eq!(with[2].url, without[0].url, "{}", v);
        }
    }

    #[test]
    fn test_override_custom_template() {
        let candidates = catalog().candidates(ReciterId(6), verse("1:1"));
        assert!(candidates
            .iter()
            .any(|c| c.url == "https://download.quranicaudio.com/verses/Husary/mp3/001001.mp3"));
    }

    #[test]
    fn test_no_duplicate_urls() {
        let candidates = catalog().candidates(ReciterId(7), verse("2:255"));
        let mut urls: Vec<_> = candidates.iter().map(|c| c.url.as_str()).collect();
        urls.sort();
        let before = urls.len();
        urls.dedup();
        assert_eq!(before, urls.len());
    }

    #[test]
    fn test_unsupported_provider_skipped() {
        // Rifai only exists on the primary CDN
        let candidates = catalog().candidates(ReciterId(5), verse("1:2"));
        assert_eq!(candidates[0].url, "https://verses.quran.com/Rifai/mp3/001002.mp3");
        assert!(candidates.iter().all(|c| !c.url.contains("{")));
        assert_eq!(candidates.last().unwrap().provider, "everyayah-afasy");
    }

    #[test]
    fn test_last_resort_not_used_when_mirrors_exist() {
        let candidates = catalog().candidates(ReciterId(6), verse("1:2"));
        assert!(candidates.iter().all(|c| c.provider != "everyayah-afasy"));
    }

    #[test]
    fn test_unknown_reciter_gets_only_fallback() {
        let catalog = catalog();
        assert!(!catalog.supports(ReciterId(999)));
        let candidates = catalog.candidates(ReciterId(999), verse("1:2"));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "https://everyayah.com/data/Alafasy_128kbps/001002.mp3");
    }

    #[test]
    fn test_candidates_never_empty_for_known_reciters() {
        let catalog = catalog();
        for reciter in RECITERS {
            assert!(catalog.supports(reciter.id));
            for index in (1..=TOTAL_VERSES).step_by(97) {
                let v = VerseKey::from_global_index(index).unwrap();
                assert!(
                    !catalog.candidates(reciter.id, v).is_empty(),
                    "no candidates for {} {}",
                    reciter.id,
                    v
                );
            }
        }
    }
}
