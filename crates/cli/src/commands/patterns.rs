use anyhow::{Context, Result};
use dllscan_core::patterns::PatternRegistry;
use serde::Serialize;

use crate::commands::load_scan_config;

#[derive(Debug, Serialize)]
pub struct LanguageInfo {
    pub id: String,
    pub name: String,
    pub extensions: Vec<String>,
    pub rules: Vec<RuleInfo>,
}

#[derive(Debug, Serialize)]
pub struct RuleInfo {
    pub id: String,
    pub mode: String,
    pub confidence: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    pub description: String,
}

/// Flatten the registry into serializable rows, in registry order.
pub fn describe_registry(registry: &PatternRegistry) -> Vec<LanguageInfo> {
    registry
        .languages()
        .iter()
        .map(|language| LanguageInfo {
            id: language.id.clone(),
            name: language.name.clone(),
            extensions: language.extensions.clone(),
            rules: language
                .rules
                .iter()
                .map(|rule| RuleInfo {
                    id: rule.id.clone(),
                    mode: rule.mode.as_str().to_string(),
                    confidence: rule.confidence.as_str().to_string(),
                    regex: rule.pattern().map(str::to_string),
                    description: rule.description.clone(),
                })
                .collect(),
        })
        .collect()
}

/// List the languages and rules used for dependency confirmation.
pub fn patterns_command(config: Option<&str>, json: bool) -> Result<()> {
    let config = load_scan_config(config)?;
    let registry = config.registry().context("Failed to build pattern registry")?;
    let languages = describe_registry(&registry);

    if json {
        let serialized = serde_json::to_string_pretty(&languages)
            .context("Failed to serialize pattern registry to JSON")?;
        println!("{}", serialized);
        return Ok(());
    }

    println!("Languages ({}):", languages.len());
    for language in &languages {
        let extensions = language.extensions.join(", ");
        println!("  - {} [{}] extensions: {}", language.name, language.id, extensions);
        for rule in &language.rules {
            println!(
                "      {} ({}, {}): {}",
                rule.id, rule.confidence, rule.mode, rule.description
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_lists_every_language_with_rules() {
        let registry = PatternRegistry::builtin().unwrap();
        let languages = describe_registry(&registry);
        assert_eq!(languages.len(), registry.languages().len());
        assert!(languages.iter().all(|l| !l.rules.is_empty()));
        let csharp = languages.iter().find(|l| l.id == "csharp").unwrap();
        assert!(csharp.extensions.contains(&"cs".to_string()));
        assert!(csharp.rules.iter().any(|r| r.mode == "literal" && r.regex.is_none()));
    }
}
