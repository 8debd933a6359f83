// src/config.rs

use serde::Deserialize;
use std::{fs, path::Path};
use toml_edit::{DocumentMut, value};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub locator: LocatorSection,
}

fn default_db_path() -> String {
    "docstore/invoices.db".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            llm: LlmSection::default(),
            locator: LocatorSection::default(),
        }
    }
}

/// Which extraction backend handles stored documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    /// Keyword-proximity locator only; no model calls.
    Heuristics,
    /// Local Ollama server, OpenAI-compatible endpoint.
    Ollama,
    /// Hosted OpenRouter endpoint.
    Openrouter,
    /// Any other OpenAI-compatible endpoint.
    Remote,
}

#[derive(Debug, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_backend")]
    pub backend: LlmBackend,
    #[serde(default)]
    pub openrouter: OpenRouterEndpoint,
    #[serde(default)]
    pub ollama: OllamaEndpoint,
    #[serde(default)]
    pub remote: RemoteEndpoint,
}

fn default_backend() -> LlmBackend {
    LlmBackend::Heuristics
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            openrouter: OpenRouterEndpoint::default(),
            ollama: OllamaEndpoint::default(),
            remote: RemoteEndpoint::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenRouterEndpoint {
    #[serde(default = "default_openrouter_url")]
    pub base_url: String,
    #[serde(default = "default_openrouter_model")]
    pub model: String,
    /// Falls back to the OPENROUTER_API_KEY environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_openrouter_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_openrouter_model() -> String {
    "google/gemini-2.5-flash-image-preview:free".to_string()
}

impl Default for OpenRouterEndpoint {
    fn default() -> Self {
        Self {
            base_url: default_openrouter_url(),
            model: default_openrouter_model(),
            api_key: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OllamaEndpoint {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

fn default_ollama_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_ollama_model() -> String {
    "qwen2.5:7b".to_string()
}

impl Default for OllamaEndpoint {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_ollama_model(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoteEndpoint {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct LocatorSection {
    /// Priority-ordered keyword list for the proximity locator.
    #[serde(default = "crate::heuristics::default_keywords")]
    pub keywords: Vec<String>,
}

impl Default for LocatorSection {
    fn default() -> Self {
        Self {
            keywords: crate::heuristics::default_keywords(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load the config file, or fall back to defaults when it doesn't exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write an OpenRouter API key back into the config file in place,
    /// preserving formatting and comments.
    pub fn update_api_key(
        path: impl AsRef<Path>,
        new_key: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = fs::read_to_string(&path)?;
        let mut doc = content.parse::<DocumentMut>()?;

        doc["llm"]["openrouter"]["api_key"] = value(new_key);

        fs::write(&path, doc.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.db_path, "docstore/invoices.db");
        assert_eq!(cfg.llm.backend, LlmBackend::Heuristics);
        assert!(cfg.locator.keywords.contains(&"TOTAL".to_string()));
    }

    #[test]
    fn backend_and_keywords_parse() {
        let cfg: Config = toml::from_str(
            r#"
            db_path = "test.db"

            [llm]
            backend = "ollama"

            [llm.ollama]
            model = "llama3.1"

            [locator]
            keywords = ["SUMA", "RAZEM"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.db_path, "test.db");
        assert_eq!(cfg.llm.backend, LlmBackend::Ollama);
        assert_eq!(cfg.llm.ollama.model, "llama3.1");
        assert_eq!(cfg.llm.ollama.base_url, "http://localhost:11434/v1");
        assert_eq!(cfg.locator.keywords, vec!["SUMA", "RAZEM"]);
    }
}
