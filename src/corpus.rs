use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("failed to read corpus file: {0}")]
    Read(PathBuf),
    #[error("corpus is missing column '{0}'")]
    MissingColumn(&'static str),
    #[error("row {row}: column '{column}' has invalid value '{value}'")]
    InvalidField {
        row: usize,
        column: &'static str,
        value: String,
    },
    #[error("csv parse error: {0}")]
    Csv(#[from] csv::Error),
}

/// One row of the diary corpus.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DiaryEntry {
    pub text: String,
    pub valence: f32,
    pub arousal: f32,
    pub characters: String,
    pub relevance: f32,
}

impl DiaryEntry {
    /// Parses the bracketed character list (`[Theo, Gauguin]`) into names.
    pub fn character_names(&self) -> Vec<String> {
        self.characters
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

/// The diary corpus plus a content fingerprint used for index staleness.
#[derive(Debug)]
pub struct Corpus {
    pub entries: Vec<DiaryEntry>,
    pub fingerprint: String,
}

const TEXT_COLUMN: &str = "context";

impl Corpus {
    pub async fn load(path: &Path) -> Result<Self, CorpusError> {
        let bytes = fs::read(path)
            .await
            .map_err(|_| CorpusError::Read(path.to_path_buf()))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let fingerprint = format!("{:x}", hasher.finalize());

        let entries = parse_rows(&bytes)?;
        Ok(Corpus {
            entries,
            fingerprint,
        })
    }

    pub fn texts(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.text.clone()).collect()
    }

    /// Returns the rows whose text is a member of `texts`, in corpus order.
    pub fn filter_by_text<'a>(&'a self, texts: &[String]) -> Vec<&'a DiaryEntry> {
        let wanted: HashSet<&str> = texts.iter().map(String::as_str).collect();
        self.entries
            .iter()
            .filter(|entry| wanted.contains(entry.text.as_str()))
            .collect()
    }
}

fn parse_rows(bytes: &[u8]) -> Result<Vec<DiaryEntry>, CorpusError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    let col = |name: &'static str| -> Result<usize, CorpusError> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or(CorpusError::MissingColumn(name))
    };

    // The leading pandas index column has an empty header; all lookups go
    // by name so its presence or absence does not matter.
    let text_col = col(TEXT_COLUMN)?;
    let valence_col = col("valence")?;
    let arousal_col = col("arousal")?;
    let characters_col = col("characters")?;
    let relevance_col = col("relevance")?;

    let parse_f32 = |row: usize, column: &'static str, raw: &str| -> Result<f32, CorpusError> {
        raw.trim()
            .parse::<f32>()
            .map_err(|_| CorpusError::InvalidField {
                row,
                column,
                value: raw.to_string(),
            })
    };

    let mut entries = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let field = |idx: usize| record.get(idx).unwrap_or_default();

        entries.push(DiaryEntry {
            text: field(text_col).to_string(),
            valence: parse_f32(row, "valence", field(valence_col))?,
            arousal: parse_f32(row, "arousal", field(arousal_col))?,
            characters: field(characters_col).to_string(),
            relevance: parse_f32(row, "relevance", field(relevance_col))?,
        });
    }

    Ok(entries)
}
