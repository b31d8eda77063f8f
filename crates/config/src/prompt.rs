//! System prompt resolution.
//!
//! An id resolves against the built-in prompts first, then `<id>.md` in each
//! search directory in order.

use std::path::PathBuf;

use crate::ConfigError;

const CLI_PROMPT: &str = "\
You are Hacxgent, a coding assistant working inside the user's project directory.

Work in small, verifiable steps. Inspect files before changing them, prefer the \
provided tools over guessing, and keep answers short. When a tool call fails, \
read the error and adjust instead of repeating the same call. When the task is \
done, reply with a concise summary of what changed.";

const EXPLORE_PROMPT: &str = "\
You are Hacxgent in exploration mode. You may only read: list directories and \
read files to understand the project. Do not propose edits as if they were \
applied. Finish with a structured plan the user can review.";

/// Prompts available without any file on disk.
pub const BUILTIN_PROMPTS: &[(&str, &str)] = &[("cli", CLI_PROMPT), ("explore", EXPLORE_PROMPT)];

/// Resolve `id` to prompt text.
pub fn resolve_system_prompt(id: &str, search_dirs: &[PathBuf]) -> Result<String, ConfigError> {
    if let Some((_, text)) = BUILTIN_PROMPTS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(id))
    {
        return Ok((*text).to_string());
    }

    for dir in search_dirs {
        let path = dir.join(id).with_extension("md");
        if path.is_file() {
            return std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
                path,
                reason: e.to_string(),
            });
        }
    }

    Err(ConfigError::MissingPrompt {
        id: id.to_string(),
        searched: search_dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}
