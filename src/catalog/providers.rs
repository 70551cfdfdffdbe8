use crate::quran::VerseKey;

use super::reciters::Reciter;

/// Rough reliability class of a provider, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProviderTier {
    /// The metadata API's own CDN
    Primary,
    /// Independent mirrors of the per-verse archive
    Mirror,
    /// Reciter-specific regional servers
    Regional,
    /// Single well-known reciter, used when nothing else carries the request
    LastResort,
}

/// How a provider names per-verse files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerseFormat {
    /// `002255`
    Concatenated,
    /// `002_255`
    Underscore,
    /// Global verse index, `262`
    GlobalIndex,
}

impl VerseFormat {
    pub fn file_stem(&self, verse: VerseKey) -> String {
        match self {
            VerseFormat::Concatenated => format!("{:03}{:03}", verse.chapter(), verse.verse()),
            VerseFormat::Underscore => format!("{:03}_{:03}", verse.chapter(), verse.verse()),
            VerseFormat::GlobalIndex => verse.global_index().to_string(),
        }
    }
}

/// An audio provider and its URL convention.
///
/// Templates use `{reciter}` for the provider's reciter code, `{file}` for the
/// verse file stem and `{bitrate}` for the chosen quality.
#[derive(Debug)]
pub struct Provider {
    pub name: &'static str,
    pub tier: ProviderTier,
    pub template: &'static str,
    pub verse_format: VerseFormat,
    /// Bitrates the provider serves, preferred first
    pub bitrates: &'static [u32],
}

impl Provider {
    /// Render a URL for a reciter, or `None` if the provider doesn't carry them
    pub fn render(&self, reciter: &Reciter, verse: VerseKey) -> Option<String> {
        let code = reciter.code_for(self.name)?;
        Some(self.render_with(self.template, code, reciter, verse))
    }

    /// Render an arbitrary template using this provider's conventions
    pub fn render_with(
        &self,
        template: &str,
        code: &str,
        reciter: &Reciter,
        verse: VerseKey,
    ) -> String {
        let mut url = template
            .replace("{reciter}", code)
            .replace("{file}", &self.verse_format.file_stem(verse));

        if url.contains("{bitrate}") {
            url = url.replace("{bitrate}", &self.choose_bitrate(reciter).to_string());
        }

        url
    }

    /// Best bitrate both sides support, falling back to the provider default
    fn choose_bitrate(&self, reciter: &Reciter) -> u32 {
        reciter
            .qualities
            .iter()
            .copied()
            .find(|q| self.bitrates.contains(q))
            .or_else(|| self.bitrates.first().copied())
            .unwrap_or(128)
    }
}

/// Built-in providers, ranked by observed reliability
pub static PROVIDERS: &[Provider] = &[
    Provider {
        name: "quran-cdn",
        tier: ProviderTier::Primary,
        template: "https://verses.quran.com/{reciter}/mp3/{file}.mp3",
        verse_format: VerseFormat::Concatenated,
        bitrates: &[],
    },
    Provider {
        name: "everyayah",
        tier: ProviderTier::Mirror,
        template: "https://everyayah.com/data/{reciter}/{file}.mp3",
        verse_format: VerseFormat::Concatenated,
        bitrates: &[],
    },
    Provider {
        name: "quranicaudio",
        tier: ProviderTier::Mirror,
        template: "https://mirrors.quranicaudio.com/everyayah/{reciter}/{file}.mp3",
        verse_format: VerseFormat::Concatenated,
        bitrates: &[],
    },
    Provider {
        name: "islamic-network",
        tier: ProviderTier::Mirror,
        template: "https://cdn.islamic.network/quran/audio/{bitrate}/{reciter}/{file}.mp3",
        verse_format: VerseFormat::GlobalIndex,
        bitrates: &[128, 192, 64],
    },
    Provider {
        name: "mp3quran",
        tier: ProviderTier::Regional,
        template: "https://{reciter}/ayat/{file}.mp3",
        verse_format: VerseFormat::Underscore,
        bitrates: &[],
    },
    Provider {
        name: "everyayah-afasy",
        tier: ProviderTier::LastResort,
        template: "https://everyayah.com/data/Alafasy_128kbps/{file}.mp3",
        verse_format: VerseFormat::Concatenated,
        bitrates: &[],
    },
];

/// Look up a built-in provider by name
pub fn find_provider(name: &str) -> Option<&'static Provider> {
    PROVIDERS.iter().find(|p| p.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::reciters::{find_reciter, ReciterId};

    fn verse(s: &str) -> VerseKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_file_stems() {
        let v = verse("2:255");
        assert_eq!(VerseFormat::Concatenated.file_stem(v), "002255");
        assert_eq!(VerseFormat::Underscore.file_stem(v), "002_255");
        assert_eq!(VerseFormat::GlobalIndex.file_stem(v), "262");
    }

    #[test]
    fn test_render_per_provider_codes() {
        let husary = find_reciter(ReciterId(6)).unwrap();
        let everyayah = find_provider("everyayah").unwrap();
        assert_eq!(
            everyayah.render(husary, verse("1:1")).unwrap(),
            "https://everyayah.com/data/Husary_128kbps/001001.mp3"
        );

        let network = find_provider("islamic-network").unwrap();
        assert_eq!(
            network.render(husary, verse("2:1")).unwrap(),
            "https://cdn.islamic.network/quran/audio/128/ar.husary/8.mp3"
        );
    }

    #[test]
    fn test_bitrate_prefers_reciter_quality() {
        // Sudais has 192/64; 192 is served, so it wins over the 128 default
        let sudais = find_reciter(ReciterId(3)).unwrap();
        let network = find_provider("islamic-network").unwrap();
        let url = network.render(sudais, verse("1:1")).unwrap();
        assert!(url.contains("/192/"), "{}", url);
    }

    #[test]
    fn test_unsupported_reciter_renders_nothing() {
        let rifai = find_reciter(ReciterId(5)).unwrap();
        assert!(find_provider("everyayah").unwrap().render(rifai, verse("1:1")).is_none());
    }

    #[test]
    fn test_tiers_are_in_rank_order() {
        let tiers: Vec<_> = PROVIDERS.iter().map(|p| p.tier).collect();
        let mut sorted = tiers.clone();
        sorted.sort();
        assert_eq!(tiers, sorted);
    }
}
