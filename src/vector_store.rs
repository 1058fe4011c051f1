use crate::corpus::Corpus;
use crate::embedding::Embedder;
use eyre::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;

const VECTORS_FILE: &str = "vectors.json";
const META_FILE: &str = "meta.json";
const EMBED_BATCH: usize = 64;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VectorEntry {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Sidecar metadata persisted next to the vectors; ties the index to the
/// corpus content and the embedding model it was built with.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct IndexMeta {
    pub fingerprint: String,
    pub model: String,
    pub dimension: usize,
    pub built_at: String,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct VectorStore {
    pub entries: Vec<VectorEntry>,
    pub meta: IndexMeta,
    #[serde(skip)]
    dir: PathBuf,
}

impl VectorStore {
    /// Loads the index when it exists and still matches the corpus and
    /// embedding model; otherwise embeds the corpus and saves a fresh one.
    pub async fn open_or_build(
        dir: &Path,
        corpus: &Corpus,
        embedder: &dyn Embedder,
        force_rebuild: bool,
    ) -> Result<Self> {
        if !force_rebuild {
            match Self::load(dir).await {
                Ok(Some(store)) => {
                    if store.meta.fingerprint == corpus.fingerprint
                        && store.meta.model == embedder.model()
                    {
                        info!(
                            "loaded index from {} ({} entries)",
                            dir.display(),
                            store.entries.len()
                        );
                        return Ok(store);
                    }
                    warn!(
                        "index at {} is stale (corpus or model changed), rebuilding",
                        dir.display()
                    );
                }
                Ok(None) => {
                    info!("no index found at {}, building", dir.display());
                }
                Err(e) => {
                    warn!(
                        "failed to load index at {}: {e:#}, rebuilding",
                        dir.display()
                    );
                }
            }
        }

        let store = Self::build(dir, corpus, embedder).await?;
        store.save().await?;
        Ok(store)
    }

    pub async fn load(dir: &Path) -> Result<Option<Self>> {
        let vectors_path = dir.join(VECTORS_FILE);
        let meta_path = dir.join(META_FILE);
        if !vectors_path.exists() || !meta_path.exists() {
            return Ok(None);
        }

        let entries: Vec<VectorEntry> =
            serde_json::from_str(&fs::read_to_string(&vectors_path).await?)
                .wrap_err("failed to parse vectors.json")?;
        let meta: IndexMeta = serde_json::from_str(&fs::read_to_string(&meta_path).await?)
            .wrap_err("failed to parse meta.json")?;

        Ok(Some(VectorStore {
            entries,
            meta,
            dir: dir.to_path_buf(),
        }))
    }

    pub async fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        fs::write(
            self.dir.join(VECTORS_FILE),
            serde_json::to_string_pretty(&self.entries)?,
        )
        .await?;
        fs::write(
            self.dir.join(META_FILE),
            serde_json::to_string_pretty(&self.meta)?,
        )
        .await?;
        Ok(())
    }

    async fn build(dir: &Path, corpus: &Corpus, embedder: &dyn Embedder) -> Result<Self> {
        let texts = corpus.texts();
        info!("embedding {} corpus rows", texts.len());

        let pb = ProgressBar::new(texts.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        pb.set_message("embedding corpus");

        let mut entries = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            let vectors = embedder.embed(batch).await?;
            for (text, embedding) in batch.iter().zip(vectors) {
                let mut hasher = Sha256::new();
                hasher.update(text.as_bytes());
                entries.push(VectorEntry {
                    id: format!("{:x}", hasher.finalize()),
                    text: text.clone(),
                    embedding,
                });
            }
            pb.inc(batch.len() as u64);
        }
        pb.finish_with_message("corpus embedded");

        let dimension = entries.first().map(|e| e.embedding.len()).unwrap_or(0);
        Ok(VectorStore {
            entries,
            meta: IndexMeta {
                fingerprint: corpus.fingerprint.clone(),
                model: embedder.model().to_string(),
                dimension,
                built_at: chrono::Local::now().to_rfc3339(),
            },
            dir: dir.to_path_buf(),
        })
    }

    /// Cosine nearest neighbors, best first, truncated to `limit`.
    pub fn search(&self, query_embedding: &[f32], limit: usize) -> Vec<(f32, &VectorEntry)> {
        let mut scored: Vec<(f32, &VectorEntry)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(&entry.embedding, query_embedding), entry))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }

    /// Embeds the query and returns the top matches as (score, text) pairs.
    pub async fn search_query(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(f32, String)>> {
        let mut vectors = embedder.embed(&[query.to_string()]).await?;
        let query_embedding = vectors.pop().unwrap_or_default();
        Ok(self
            .search(&query_embedding, limit)
            .into_iter()
            .map(|(score, entry)| (score, entry.text.clone()))
            .collect())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        0.0
    } else {
        dot_product / (magnitude_a * magnitude_b)
    }
}
