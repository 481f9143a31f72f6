//! Live system prompt loading. The prompt files are user-editable mid-session
//! and must take effect immediately, so they are re-read every turn with no
//! in-memory caching.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::message::SystemPrompt;

/// External/API conversations and internal ones read different files.
pub const EXTERNAL_PROMPT_FILE: &str = "twp.txt";
pub const INTERNAL_PROMPT_FILE: &str = "twp_bak.txt";

#[derive(Debug, Clone)]
pub struct SystemPromptLoader {
    prompts_dir: PathBuf,
}

impl SystemPromptLoader {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            prompts_dir: base_dir.join("data").join("config").join("prompts"),
        }
    }

    pub fn prompt_path(&self, external: bool) -> PathBuf {
        let file = if external {
            EXTERNAL_PROMPT_FILE
        } else {
            INTERNAL_PROMPT_FILE
        };
        self.prompts_dir.join(file)
    }

    pub fn load(&self, external: bool) -> Result<String> {
        let path = self.prompt_path(external);
        fs::read_to_string(&path)
            .with_context(|| format!("failed to read system prompt from {path:?}"))
    }

    /// Startup check: both variants must be present and readable, otherwise
    /// the process must not start (spec treats this as fatal configuration).
    pub fn verify(&self) -> Result<()> {
        self.load(true)?;
        self.load(false)?;
        Ok(())
    }
}

/// Substitute a bot-role hint into the prompt's fixed `#Role:` line. Prompts
/// without that line pass through unchanged.
pub fn apply_role_hint(prompt: &str, bot_id: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut replaced = false;
    for line in prompt.lines() {
        if !replaced && line.trim_start().starts_with("#Role:") {
            lines.push(format!("#Role: {bot_id}"));
            replaced = true;
        } else {
            lines.push(line.to_string());
        }
    }
    lines.join("\n")
}

/// Render the prompt as cache-tagged blocks: one ordinarily, two when the
/// conversation carries secondary system content.
pub fn render(primary: String, system2: Option<&str>) -> SystemPrompt {
    match system2 {
        Some(secondary) => SystemPrompt::with_secondary(primary, secondary.to_string()),
        None => SystemPrompt::single(primary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_loader(dir: &Path) -> SystemPromptLoader {
        let loader = SystemPromptLoader::new(dir);
        fs::create_dir_all(&loader.prompts_dir).unwrap();
        fs::write(loader.prompt_path(true), "external prompt").unwrap();
        fs::write(loader.prompt_path(false), "internal prompt").unwrap();
        loader
    }

    #[test]
    fn selects_file_by_originator() {
        let dir = tempfile::tempdir().unwrap();
        let loader = seeded_loader(dir.path());
        assert_eq!(loader.load(true).unwrap(), "external prompt");
        assert_eq!(loader.load(false).unwrap(), "internal prompt");
    }

    #[test]
    fn edits_take_effect_next_load() {
        let dir = tempfile::tempdir().unwrap();
        let loader = seeded_loader(dir.path());
        fs::write(loader.prompt_path(false), "edited").unwrap();
        assert_eq!(loader.load(false).unwrap(), "edited");
    }

    #[test]
    fn missing_file_fails_verify() {
        let dir = tempfile::tempdir().unwrap();
        let loader = SystemPromptLoader::new(dir.path());
        assert!(loader.verify().is_err());
    }

    #[test]
    fn role_hint_replaces_only_the_role_line() {
        let prompt = "intro\n#Role: generalist\nbody";
        let out = apply_role_hint(prompt, "reviewer-bot");
        assert!(out.contains("#Role: reviewer-bot"));
        assert!(!out.contains("generalist"));
        assert!(out.contains("intro"));
        assert!(out.contains("body"));
    }

    #[test]
    fn role_hint_without_role_line_is_identity() {
        let prompt = "no role line here";
        assert_eq!(apply_role_hint(prompt, "x"), prompt);
    }
}
