use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf, sync::RwLock};

use crate::challenge::bank::DEFAULT_ENABLED_CATEGORIES;
use crate::challenge::{GeneratorConfig, ValidatorConfig};
use crate::detector::DetectionStrategy;

/// How the overlay behaves when a limit is breached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockingSettings {
    /// Challenge mode when true; plain "time's up" block otherwise.
    pub challenge_enabled: bool,
    /// Swap the question when the user switches apps mid-challenge.
    pub regenerate_on_switch: bool,
}

impl Default for BlockingSettings {
    fn default() -> Self {
        Self {
            challenge_enabled: true,
            regenerate_on_switch: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSettings {
    pub ai_enabled: bool,
    pub enabled_categories: Vec<String>,
    pub generation_models: Vec<String>,
}

impl Default for QuestionSettings {
    fn default() -> Self {
        let generator = GeneratorConfig::default();
        Self {
            ai_enabled: generator.ai_enabled,
            enabled_categories: DEFAULT_ENABLED_CATEGORIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            generation_models: generator.models,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    pub endpoint: String,
    pub validation_model: String,
    pub request_timeout_secs: u64,
}

impl Default for AiSettings {
    fn default() -> Self {
        let validator = ValidatorConfig::default();
        Self {
            endpoint: validator.endpoint,
            validation_model: validator.model,
            request_timeout_secs: validator.request_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserSettings {
    own_package: String,
    detection_strategy: DetectionStrategy,
    blocking: BlockingSettings,
    questions: QuestionSettings,
    ai: AiSettings,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            own_package: "dev.screenward".into(),
            detection_strategy: DetectionStrategy::default(),
            blocking: BlockingSettings::default(),
            questions: QuestionSettings::default(),
            ai: AiSettings::default(),
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn own_package(&self) -> String {
        self.data.read().unwrap().own_package.clone()
    }

    pub fn detection_strategy(&self) -> DetectionStrategy {
        self.data.read().unwrap().detection_strategy
    }

    pub fn blocking(&self) -> BlockingSettings {
        self.data.read().unwrap().blocking.clone()
    }

    pub fn update_blocking(&self, settings: BlockingSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap();
        guard.blocking = settings;
        self.persist(&guard)
    }

    pub fn update_detection_strategy(&self, strategy: DetectionStrategy) -> Result<()> {
        let mut guard = self.data.write().unwrap();
        guard.detection_strategy = strategy;
        self.persist(&guard)
    }

    pub fn update_ai(&self, settings: AiSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap();
        guard.ai = settings;
        self.persist(&guard)
    }

    pub fn update_questions(&self, settings: QuestionSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap();
        guard.questions = settings;
        self.persist(&guard)
    }

    /// Question generation config assembled from current preferences.
    pub fn generator_config(&self) -> GeneratorConfig {
        let guard = self.data.read().unwrap();
        GeneratorConfig {
            ai_enabled: guard.questions.ai_enabled,
            endpoint: guard.ai.endpoint.clone(),
            models: guard.questions.generation_models.clone(),
            request_timeout: Duration::from_secs(guard.ai.request_timeout_secs),
            enabled_categories: guard.questions.enabled_categories.clone(),
        }
    }

    pub fn validator_config(&self) -> ValidatorConfig {
        let guard = self.data.read().unwrap();
        ValidatorConfig {
            endpoint: guard.ai.endpoint.clone(),
            model: guard.ai.validation_model.clone(),
            request_timeout: Duration::from_secs(guard.ai.request_timeout_secs),
        }
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

impl SettingsStore {
    #[allow(dead_code)]
    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: UserSettings = serde_json::from_str(&contents)?;
        let mut guard = self.data.write().unwrap();
        *guard = data;
        Ok(())
    }
}
