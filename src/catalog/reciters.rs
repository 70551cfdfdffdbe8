use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical reciter identifier (matches the metadata API's recitation ids)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReciterId(pub u32);

impl fmt::Display for ReciterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReciterId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ReciterId)
    }
}

/// Reciter whose audio is served as a whole-text fallback
pub const FALLBACK_RECITER: ReciterId = ReciterId(7);

/// A narrator and the names each provider knows them by
#[derive(Debug)]
pub struct Reciter {
    pub id: ReciterId,
    pub name: &'static str,
    pub style: Option<&'static str>,
    /// Available bitrates in kbps, best first
    pub qualities: &'static [u32],
    /// (provider name, provider-specific reciter code)
    codes: &'static [(&'static str, &'static str)],
}

impl Reciter {
    /// This reciter's code on a provider, if the provider carries them
    pub fn code_for(&self, provider: &str) -> Option<&'static str> {
        self.codes
            .iter()
            .find(|(name, _)| *name == provider)
            .map(|(_, code)| *code)
    }

    /// Providers that carry this reciter
    pub fn providers(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.codes.iter().map(|(name, _)| *name)
    }

    pub fn display_name(&self) -> String {
        match self.style {
            Some(style) => format!("{} ({})", self.name, style),
            None => self.name.to_string(),
        }
    }
}

/// Built-in reciter table
pub static RECITERS: &[Reciter] = &[
    Reciter {
        id: ReciterId(1),
        name: "AbdulBaset AbdulSamad",
        style: Some("Mujawwad"),
        qualities: &[128, 64],
        codes: &[
            ("quran-cdn", "AbdulBaset/Mujawwad"),
            ("everyayah", "Abdul_Basit_Mujawwad_128kbps"),
            ("quranicaudio", "Abdul_Basit_Mujawwad_128kbps"),
        ],
    },
    Reciter {
        id: ReciterId(2),
        name: "AbdulBaset AbdulSamad",
        style: Some("Murattal"),
        qualities: &[192, 128, 64],
        codes: &[
            ("quran-cdn", "AbdulBaset/Murattal"),
            ("everyayah", "Abdul_Basit_Murattal_192kbps"),
            ("quranicaudio", "Abdul_Basit_Murattal_192kbps"),
            ("islamic-network", "ar.abdulbasitmurattal"),
        ],
    },
    Reciter {
        id: ReciterId(3),
        name: "Abdur-Rahman as-Sudais",
        style: None,
        qualities: &[192, 64],
        codes: &[
            ("quran-cdn", "Sudais"),
            ("everyayah", "Abdurrahmaan_As-Sudais_192kbps"),
            ("quranicaudio", "Abdurrahmaan_As-Sudais_192kbps"),
            ("islamic-network", "ar.abdurrahmaansudais"),
            ("mp3quran", "server11.mp3quran.net/sds"),
        ],
    },
    Reciter {
        id: ReciterId(4),
        name: "Abu Bakr al-Shatri",
        style: None,
        qualities: &[128, 64],
        codes: &[
            ("quran-cdn", "Shatri"),
            ("everyayah", "Abu_Bakr_Ash-Shaatree_128kbps"),
            ("islamic-network", "ar.shaatree"),
        ],
    },
    Reciter {
        id: ReciterId(5),
        name: "Hani ar-Rifai",
        style: None,
        qualities: &[192, 64],
        codes: &[("quran-cdn", "Rifai")],
    },
    Reciter {
        id: ReciterId(6),
        name: "Mahmoud Khalil Al-Husary",
        style: None,
        qualities: &[128, 64],
        codes: &[
            ("quran-cdn", "Husary"),
            ("everyayah", "Husary_128kbps"),
            ("quranicaudio", "Husary_128kbps"),
            ("islamic-network", "ar.husary"),
        ],
    },
    Reciter {
        id: ReciterId(7),
        name: "Mishari Rashid al-Afasy",
        style: None,
        qualities: &[192, 128, 64],
        codes: &[
            ("quran-cdn", "Alafasy"),
            ("everyayah", "Alafasy_128kbps"),
            ("quranicaudio", "Alafasy_128kbps"),
            ("islamic-network", "ar.alafasy"),
            ("mp3quran", "server8.mp3quran.net/afs"),
        ],
    },
    Reciter {
        id: ReciterId(9),
        name: "Mohamed Siddiq al-Minshawi",
        style: Some("Murattal"),
        qualities: &[128],
        codes: &[
            ("quran-cdn", "Minshawi/Murattal"),
            ("everyayah", "Minshawy_Murattal_128kbps"),
            ("quranicaudio", "Minshawy_Murattal_128kbps"),
            ("islamic-network", "ar.minshawi"),
        ],
    },
    Reciter {
        id: ReciterId(10),
        name: "Sa`ud ash-Shuraym",
        style: None,
        qualities: &[128, 64],
        codes: &[
            ("quran-cdn", "Shuraym"),
            ("everyayah", "Saood_ash-Shuraym_128kbps"),
            ("islamic-network", "ar.saoodshuraym"),
            ("mp3quran", "server7.mp3quran.net/shur"),
        ],
    },
];

/// Look up a built-in reciter
pub fn find_reciter(id: ReciterId) -> Option<&'static Reciter> {
    RECITERS.iter().find(|r| r.id == id)
}
