use anyhow::{Context, Result};
use mitra_core::prompt::SystemPrompts;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Reads every `*.md` file in `dir_path` into a map keyed by file stem.
pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem for prompt file")?
                .to_string();

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

            prompts.insert(prompt_key, content);
        }
    }

    Ok(prompts)
}

/// File holding a JSON object of prompt key to prompt text.
pub const PROMPTS_JSON_FILE: &str = "system_prompts.json";

/// Reads `system_prompts.json` from `dir_path`, if present.
pub fn load_prompts_json(dir_path: &Path) -> Result<HashMap<String, String>> {
    let path = dir_path.join(PROMPTS_JSON_FILE);
    if !path.is_file() {
        return Ok(HashMap::new());
    }

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Prompt file is not a JSON object of strings: {}", path.display()))
}

/// Built-in system prompts, with the prompts from `dir_path` layered on top:
/// first `system_prompts.json`, then `*.md` files, so a markdown file wins
/// over a JSON entry with the same key. A missing directory just means no
/// overrides.
pub fn system_prompts(dir_path: &Path) -> Result<SystemPrompts> {
    if !dir_path.is_dir() {
        tracing::info!(dir = %dir_path.display(), "No prompt directory, using built-in prompts");
        return Ok(SystemPrompts::default());
    }

    let mut overrides = load_prompts_json(dir_path)?;
    overrides.extend(load_prompts(dir_path)?);
    tracing::info!(overrides = overrides.len(), "Loaded prompt overrides");
    Ok(SystemPrompts::with_overrides(overrides))
}
