//! Supported caption languages and their localized prompts.

use rand::seq::SliceRandom;
use rand::Rng;

/// A supported language: source code (ISO 639-3), published code, and two prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    pub source_code: &'static str,
    pub code: &'static str,
    pub questions: [&'static str; 2],
}

const LANGUAGES: [Language; 12] = [
    Language {
        source_code: "eng",
        code: "en",
        questions: ["caption this image", "what is a good caption for this image?"],
    },
    Language {
        source_code: "yor",
        code: "yo",
        questions: ["àkọlé àwòrán yìí", "kí ni àkọlé tó dára fún àwòrán yìí?"],
    },
    Language {
        source_code: "afr",
        code: "af",
        questions: ["onderskrif hierdie beeld", "Wat is 'n goeie onderskrif vir hierdie prentjie?"],
    },
    Language {
        source_code: "amh",
        code: "am",
        questions: ["የዚህ ምስል መግለጫ", "ለዚህ ምስል ጥሩ መግለጫ ምንድነው?"],
    },
    Language {
        source_code: "ibo",
        code: "ig",
        questions: ["Nkọwa foto a", "kedu ihe ga-adị mma ị ga-ede n'okpuru foto a?"],
    },
    Language {
        source_code: "hau",
        code: "ha",
        questions: ["rubutun wannan hoton", "menene kyakkyawan taken wannan hoton?"],
    },
    Language {
        source_code: "swh",
        code: "sw",
        questions: ["maelezo ya picha hii", "Ni maelezo gani mazuri kwa picha hii?"],
    },
    Language {
        source_code: "sna",
        code: "sn",
        questions: ["mashoko omuzasi womufananidzo uyu", "Ndechipi chinyorwa chakanaka chomufananidzo uyu?"],
    },
    Language {
        source_code: "arb",
        code: "ar",
        questions: ["وصف هذه الصورة", "ما هو التسمية الجيدة لهذه الصورة؟"],
    },
    Language {
        source_code: "fra",
        code: "fr",
        questions: ["la légende de cette image", "Quelle est la bonne légende pour cette image?"],
    },
    Language {
        source_code: "por",
        code: "pt",
        questions: ["legenda esta imagem", "Qual é uma boa legenda para esta imagem?"],
    },
    Language {
        source_code: "zul",
        code: "zu",
        questions: ["umbhalo ongaphansi kwalesi sithombe", "yisiphi isihlokwana esihle salesi sithombe?"],
    },
];

/// Lookup table over the supported languages.
#[derive(Debug, Clone, Copy, Default)]
pub struct LanguageCatalog;

impl LanguageCatalog {
    pub fn languages(&self) -> &'static [Language] {
        &LANGUAGES
    }

    /// Resolve a source (ISO 639-3) code.
    pub fn by_source_code(&self, source_code: &str) -> Option<&'static Language> {
        LANGUAGES.iter().find(|l| l.source_code == source_code)
    }

    /// Resolve a published two-letter code.
    pub fn by_code(&self, code: &str) -> Option<&'static Language> {
        LANGUAGES.iter().find(|l| l.code == code)
    }

    /// Pick one of the language's prompts uniformly at random.
    pub fn pick_question<R: Rng + ?Sized>(&self, code: &str, rng: &mut R) -> Option<&'static str> {
        self.by_code(code).and_then(|l| l.questions.choose(rng).copied())
    }
}
