//! System-prompt assembly: persona intro, retrieved context block, style
//! rules, and the affective annotation derived from the best-matching row.

use crate::config::PersonaConfig;
use crate::corpus::DiaryEntry;

const INTENSITY_WORDS: [&str; 5] = [
    "very negative",
    "negative",
    "neutral",
    "positive",
    "very positive",
];

/// Maps an affect value in [-1, 1] to one of five qualitative labels.
/// Inputs outside the range are clamped, so the mapping is total.
pub fn intensity_word(value: f32) -> &'static str {
    let clamped = value.clamp(-1.0, 1.0);
    let index = (((clamped + 1.0) / 2.0) * INTENSITY_WORDS.len() as f32).floor() as usize;
    INTENSITY_WORDS[index.min(INTENSITY_WORDS.len() - 1)]
}

/// Affective metadata rendered into the system prompt, taken from the
/// top-ranked retrieved row.
#[derive(Debug, Clone, PartialEq)]
pub struct AffectAnnotation {
    pub valence_word: &'static str,
    pub arousal_word: &'static str,
    pub valence: f32,
    pub arousal: f32,
    pub characters: String,
    pub pronoun: &'static str,
    pub relevance: f32,
}

impl AffectAnnotation {
    pub fn from_entry(entry: &DiaryEntry) -> Self {
        let names = entry.character_names();
        Self {
            valence_word: intensity_word(entry.valence),
            arousal_word: intensity_word(entry.arousal),
            valence: entry.valence,
            arousal: entry.arousal,
            characters: names.join(", "),
            pronoun: if names.len() > 1 { "their" } else { "its" },
            relevance: entry.relevance,
        }
    }

    fn render(&self) -> String {
        format!(
            "\nFinally, consider the following information for crafting your answer: \
             1. Your emotions are {} in valence and {} in arousal ({} and {} respectively). \
             2. Also, mention {} and {} connection to this story. \
             3. Also, mention the relevance of this story to your life ({}/1)",
            self.valence_word,
            self.arousal_word,
            self.valence,
            self.arousal,
            self.characters,
            self.pronoun,
            self.relevance
        )
    }
}

pub struct PromptBuilder {
    persona: PersonaConfig,
}

impl PromptBuilder {
    pub fn new(persona: PersonaConfig) -> Self {
        Self { persona }
    }

    /// Builds the full system prompt for one turn from the retrieved rows,
    /// best match first. Deterministic for fixed inputs.
    pub fn system_prompt(&self, rows: &[&DiaryEntry]) -> String {
        let mut prompt = String::new();
        prompt.push_str(&self.persona.intro);
        prompt.push('\n');
        if !self.persona.corpus_description.is_empty() {
            prompt.push_str(&self.persona.corpus_description);
            prompt.push('\n');
        }
        prompt.push_str(&context_block(rows));
        prompt.push_str(&self.persona.style_rules);

        if let Some(first) = rows.first() {
            prompt.push_str(&AffectAnnotation::from_entry(first).render());
        }

        prompt
    }
}

fn context_block(rows: &[&DiaryEntry]) -> String {
    let joined = rows
        .iter()
        .map(|row| row.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    format!("Context begins:\n--------------------\n{joined}\nContext Ends\n--------------------\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(text: &str, valence: f32, arousal: f32, characters: &str, relevance: f32) -> DiaryEntry {
        DiaryEntry {
            text: text.to_string(),
            valence,
            arousal,
            characters: characters.to_string(),
            relevance,
        }
    }

    #[test]
    fn intensity_words_cover_all_buckets() {
        assert_eq!(intensity_word(-1.0), "very negative");
        assert_eq!(intensity_word(-0.7), "very negative");
        assert_eq!(intensity_word(-0.5), "negative");
        assert_eq!(intensity_word(0.0), "neutral");
        assert_eq!(intensity_word(0.3), "positive");
        assert_eq!(intensity_word(0.9), "very positive");
        assert_eq!(intensity_word(1.0), "very positive");
    }

    #[test]
    fn intensity_mapping_is_monotonic_and_gapless() {
        let rank = |word: &str| {
            INTENSITY_WORDS
                .iter()
                .position(|w| *w == word)
                .expect("label must come from the five-word set")
        };

        let mut previous = 0;
        let mut seen = [false; 5];
        let mut v = -1.0f32;
        while v <= 1.0 {
            let current = rank(intensity_word(v));
            assert!(current >= previous, "mapping went backwards at {v}");
            seen[current] = true;
            previous = current;
            v += 0.01;
        }
        assert!(seen.iter().all(|s| *s), "some bucket was never produced");
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        assert_eq!(intensity_word(-5.0), "very negative");
        assert_eq!(intensity_word(5.0), "very positive");
    }

    #[test]
    fn pronoun_follows_character_count() {
        let single = AffectAnnotation::from_entry(&entry("t", 0.0, 0.0, "[Theo]", 0.5));
        assert_eq!(single.pronoun, "its");

        let multiple = AffectAnnotation::from_entry(&entry("t", 0.0, 0.0, "[Theo, Gauguin]", 0.5));
        assert_eq!(multiple.pronoun, "their");
        assert_eq!(multiple.characters, "Theo, Gauguin");

        let none = AffectAnnotation::from_entry(&entry("t", 0.0, 0.0, "[]", 0.5));
        assert_eq!(none.pronoun, "its");
    }

    #[test]
    fn system_prompt_is_deterministic_and_complete() {
        let builder = PromptBuilder::new(PersonaConfig::default());
        let rows = [
            entry("The stars swirled above Arles.", 0.7, 0.6, "[Theo]", 0.9),
            entry("I could not sleep for the mistral.", -0.4, 0.5, "[]", 0.4),
        ];
        let refs: Vec<&DiaryEntry> = rows.iter().collect();

        let a = builder.system_prompt(&refs);
        let b = builder.system_prompt(&refs);
        assert_eq!(a, b);

        assert!(a.contains("Van Gogh"));
        assert!(a.contains("Context begins:"));
        assert!(a.contains("The stars swirled above Arles."));
        assert!(a.contains("I could not sleep for the mistral."));
        assert!(a.contains("Context Ends"));
        assert!(a.contains("first person"));
        // Affect annotation comes from the top-ranked row.
        assert!(a.contains("very positive in valence"));
        assert!(a.contains("mention Theo and its connection"));
        assert!(a.contains("(0.9/1)"));
    }

    #[test]
    fn empty_retrieval_omits_affect_annotation() {
        let builder = PromptBuilder::new(PersonaConfig::default());
        let prompt = builder.system_prompt(&[]);
        assert!(prompt.contains("Context begins:"));
        assert!(!prompt.contains("valence"));
    }
}
