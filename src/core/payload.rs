use crate::core::{ActorId, Result, WorkflowError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Localized title/content attached to a version, keyed by language code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub language: String,
    pub title: String,
    pub content: String,
    /// Set when the primary text changed after this translation was written.
    #[serde(default)]
    pub is_outdated: bool,
}

impl LocalizedText {
    pub fn new(language: &str, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            language: language.trim().to_ascii_lowercase(),
            title: title.into(),
            content: content.into(),
            is_outdated: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.language.len() != 2 || !self.language.chars().all(|c| c.is_ascii_lowercase()) {
            return Err(WorkflowError::InvalidPayload(format!(
                "language code must be two ASCII letters, got '{}'",
                self.language
            )));
        }
        if self.title.trim().is_empty() {
            return Err(WorkflowError::InvalidPayload(format!(
                "translation '{}' has an empty title",
                self.language
            )));
        }
        Ok(())
    }

    fn same_text(&self, other: &LocalizedText) -> bool {
        self.title == other.title && self.content == other.content
    }
}

/// Versioned content of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulePayload {
    pub title: String,
    /// ECTS credits.
    pub credits: u32,
    #[serde(default)]
    pub description: Option<String>,
    /// e.g. "WiSe 2025/26"
    pub valid_from_semester: String,
    /// Reference to the owning study program.
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub translations: BTreeMap<String, LocalizedText>,
}

impl ModulePayload {
    pub fn new(
        title: impl Into<String>,
        credits: u32,
        valid_from_semester: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            credits,
            description: None,
            valid_from_semester: valid_from_semester.into(),
            program: None,
            translations: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn with_translation(mut self, text: LocalizedText) -> Self {
        self.translations.insert(text.language.clone(), text);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(WorkflowError::InvalidPayload("title must not be empty".into()));
        }
        if self.credits == 0 {
            return Err(WorkflowError::InvalidPayload("credits must be at least 1".into()));
        }
        if self.valid_from_semester.trim().is_empty() {
            return Err(WorkflowError::InvalidPayload(
                "valid_from_semester must not be empty".into(),
            ));
        }
        for (key, text) in &self.translations {
            text.validate()?;
            if key != &text.language {
                return Err(WorkflowError::InvalidPayload(format!(
                    "translation keyed '{}' declares language '{}'",
                    key, text.language
                )));
            }
        }
        Ok(())
    }

    /// Flags translations that were carried over unchanged while the primary
    /// title or description changed relative to `previous`.
    pub fn mark_stale_translations(&mut self, previous: &ModulePayload) {
        let primary_changed =
            self.title != previous.title || self.description != previous.description;
        if !primary_changed {
            return;
        }

        for (language, text) in self.translations.iter_mut() {
            if let Some(old) = previous.translations.get(language) {
                if old.same_text(text) {
                    text.is_outdated = true;
                }
            }
        }
    }
}

/// Registration request for a brand-new module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewModule {
    /// Unique human-facing number, e.g. "F1-101".
    pub module_number: String,
    /// Owner to assign; only honoured for administrators.
    #[serde(default)]
    pub owner: Option<ActorId>,
    pub payload: ModulePayload,
}

impl NewModule {
    pub fn new(module_number: impl Into<String>, payload: ModulePayload) -> Self {
        Self {
            module_number: module_number.into(),
            owner: None,
            payload,
        }
    }

    pub fn owned_by(mut self, owner: ActorId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.module_number.trim().is_empty() {
            return Err(WorkflowError::InvalidPayload("module_number must not be empty".into()));
        }
        self.payload.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ModulePayload {
        ModulePayload::new("Databases", 6, "WiSe 2025/26")
            .with_description("Relational model")
            .with_translation(LocalizedText::new("DE", "Datenbanken", "Relationales Modell"))
    }

    #[test]
    fn test_language_code_is_normalized() {
        let text = LocalizedText::new(" EN ", "Title", "Body");
        assert_eq!(text.language, "en");
        assert!(text.validate().is_ok());
        assert!(LocalizedText::new("eng", "Title", "Body").validate().is_err());
    }

    #[test]
    fn test_payload_validation() {
        assert!(payload().validate().is_ok());

        let mut zero_credits = payload();
        zero_credits.credits = 0;
        assert!(matches!(zero_credits.validate(), Err(WorkflowError::InvalidPayload(_))));

        let mut blank_title = payload();
        blank_title.title = "  ".into();
        assert!(blank_title.validate().is_err());

        let mut mismatched = payload();
        let text = mismatched.translations.remove("de").unwrap();
        mismatched.translations.insert("fr".into(), text);
        assert!(mismatched.validate().is_err());
    }

    #[test]
    fn test_primary_change_marks_untouched_translations_outdated() {
        let previous = payload();
        let mut next = previous.clone().with_description("Relational and document model");
        next.mark_stale_translations(&previous);
        assert!(next.translations["de"].is_outdated);
    }

    #[test]
    fn test_updated_translation_is_not_flagged() {
        let previous = payload();
        let mut next = previous
            .clone()
            .with_description("Relational and document model")
            .with_translation(LocalizedText::new("de", "Datenbanken", "Relational und Dokumente"));
        next.mark_stale_translations(&previous);
        assert!(!next.translations["de"].is_outdated);
    }

    #[test]
    fn test_credit_only_change_keeps_translations_current() {
        let previous = payload();
        let mut next = previous.clone();
        next.credits = 5;
        next.mark_stale_translations(&previous);
        assert!(!next.translations["de"].is_outdated);
    }
}
