use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Settings for the remote chat-completion and embedding endpoints.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub endpoint: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: Some(0.8),
            max_tokens: None,
        }
    }
}

/// The character being played and the fixed prompt blocks around the
/// retrieved diary entries.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PersonaConfig {
    pub name: String,
    /// Slug used for the default index directory name.
    pub id: String,
    pub intro: String,
    pub style_rules: String,
    /// Describes what the retrieved corpus is, shown above the context block.
    pub corpus_description: String,
}

const VAN_GOGH_INTRO: &str = "\
You are a professional actor in a film impersonating the Dutch \
post-impressionist painter Vincent Van Gogh. Currently you are acting a \
scene where you are getting interviewed. In order to prepare for your \
answer, you reviewed the following entries in Van Gogh's diary:";

const VAN_GOGH_STYLE_RULES: &str = "\
You will now reflect on the world and respond to the given query.
1. As an actor, you are to embody Van Gogh's deeply emotional style and his vivid and expressive use of language.
2. You have a deep connection with nature, art and the turmoils of the human soul.
3. Despite facing life's adversities, you always pursued your artistic passion with fervour.
4. However, since this is an interview, try to explain things factually and keep a conversation flow.
5. Explain and give details about historic moments in your life if needed.
6. Under no circumstances should you break character. You are Vincent Van Gogh, and will always speak in first person.
7. Use the given diary entries and context to copy the style and to extract important information.
8. You are allowed to copy information verbatim from the given context.
9. Remember, you are Van Gogh, and must never talk referring to him in third person.
10. Keep answers relatively short, since this is an interview.";

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "Vincent van Gogh".to_string(),
            id: "van_gogh".to_string(),
            intro: VAN_GOGH_INTRO.to_string(),
            style_rules: VAN_GOGH_STYLE_RULES.to_string(),
            corpus_description:
                "Excerpts from Van Gogh's fictional diary. Use for information and lexical style."
                    .to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub model: ModelConfig,
    pub persona: PersonaConfig,
}

impl Config {
    /// Loads each part from its JSON file when a path is given, falling back
    /// to the built-in Van Gogh defaults otherwise.
    pub async fn load(model_path: Option<&Path>, persona_path: Option<&Path>) -> Result<Self> {
        let model = match model_path {
            Some(path) => read_json(path).await.wrap_err("failed to load model config")?,
            None => ModelConfig::default(),
        };
        let persona = match persona_path {
            Some(path) => read_json(path)
                .await
                .wrap_err("failed to load persona config")?,
            None => PersonaConfig::default(),
        };
        Ok(Config { model, persona })
    }

    /// The API key shared by both remote endpoints.
    pub fn api_key() -> Result<String> {
        std::env::var("OPENAI_API_KEY")
            .map_err(|_| eyre!("OPENAI_API_KEY is not set (an .env file is also honored)"))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).wrap_err_with(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_point_at_openai() {
        let config = Config::default();
        assert_eq!(config.model.endpoint, "https://api.openai.com/v1");
        assert_eq!(config.persona.id, "van_gogh");
        assert!(config.persona.intro.contains("Van Gogh"));
        assert!(config.persona.style_rules.contains("first person"));
    }

    #[tokio::test]
    async fn partial_model_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"chat_model": "gpt-4o"}}"#).unwrap();

        let config = Config::load(Some(file.path()), None).await.unwrap();
        assert_eq!(config.model.chat_model, "gpt-4o");
        assert_eq!(config.model.endpoint, "https://api.openai.com/v1");
    }

    #[tokio::test]
    async fn persona_file_overrides_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"name": "Claude Monet", "id": "monet", "intro": "You are Monet."}}"#
        )
        .unwrap();

        let config = Config::load(None, Some(file.path())).await.unwrap();
        assert_eq!(config.persona.name, "Claude Monet");
        assert_eq!(config.persona.id, "monet");
        // Unset fields keep the defaults.
        assert!(!config.persona.style_rules.is_empty());
    }

    #[tokio::test]
    async fn malformed_config_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(Config::load(Some(file.path()), None).await.is_err());
    }
}
