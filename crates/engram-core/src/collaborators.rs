//! External collaborators — language model, embedder.
//!
//! The store adapter is specified separately in [`crate::store`].

use crate::model::{Candidate, Config};
use crate::Result;

/// A single line of conversational transcript passed to [`Llm::extract`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Speaker role (`"user"`, `"assistant"`, etc).
    pub role: String,
    /// Message text.
    pub content: String,
}

/// Language-model collaborator: `llm(prompt) -> text`.
///
/// Implementations may hang; the core has no built-in timeout.
pub trait Llm: Send + Sync {
    /// Send `prompt` to the model and return its raw text response.
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Embedder collaborator: `embed(text) -> vector`.
///
/// Dimension is implicit to the implementation and must stay consistent
/// within a namespace. Errors are always recoverable — callers degrade to
/// keyword-only paths.
pub trait Embedder: Send + Sync {
    /// Produce an embedding vector for `text`.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Build the extraction prompt from the configured category set and a
/// transcript: category descriptions, `role: content` lines, and strict
/// JSON-array formatting rules.
pub fn build_extraction_prompt(config: &Config, transcript: &[Message], strict: bool) -> String {
    let categories = config
        .categories
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");

    let lines = transcript
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let strictness = if strict {
        "Your previous response could not be parsed. Respond with ONLY a bare JSON array, \
         no markdown code fences, no commentary, no trailing text. If there is nothing worth \
         remembering, respond with exactly `[]`."
    } else {
        "Respond with a bare JSON array of objects shaped like \
         `{\"content\": string, \"category\": string}`. Do not wrap the array in markdown \
         code fences. If there is nothing worth remembering, respond with `[]`."
    };

    format!(
        "Extract discrete, atomic facts worth remembering from the conversation below.\n\n\
         Categories:\n{categories}\n\n\
         Conversation:\n{lines}\n\n\
         {strictness}"
    )
}

/// Parsed extraction item before category/content normalization.
#[derive(Debug, Clone, serde::Deserialize)]
struct RawItem {
    content: String,
    category: String,
}

/// Find the first top-level `[...]` substring in `text`, tolerating
/// surrounding markdown code fences and commentary.
fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let rest = &text[start..];

    let mut depth = 0i32;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&rest[..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse an LLM's extraction response into candidates: tolerate surrounding
/// markdown fences, collapse unknown categories to `"fact"`, trim and
/// truncate content. Returns `None` when no parseable array is found and
/// the response is not the literal `[]` — the caller should retry once with
/// a stricter prompt in that case.
pub fn parse_extraction_response(response: &str, config: &Config) -> Option<Vec<Candidate>> {
    let trimmed = response.trim();
    if trimmed == "[]" {
        return Some(Vec::new());
    }

    let array_text = extract_json_array(trimmed)?;
    let raw: Vec<RawItem> = serde_json::from_str(array_text).ok()?;

    Some(
        raw.into_iter()
            .map(|item| Candidate::new(item.content, config.resolve_category(&item.category)))
            .collect(),
    )
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_array() {
        let config = Config::default();
        let response = r#"[{"content": "User prefers TypeScript", "category": "preference"}]"#;
        let parsed = parse_extraction_response(response, &config).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].content, "User prefers TypeScript");
        assert_eq!(parsed[0].category, "preference");
    }

    #[test]
    fn parses_array_inside_markdown_fence() {
        let config = Config::default();
        let response = "```json\n[{\"content\": \"x\", \"category\": \"fact\"}]\n```";
        let parsed = parse_extraction_response(response, &config).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn unknown_category_collapses_to_fact() {
        let config = Config::default();
        let response = r#"[{"content": "x", "category": "nonsense"}]"#;
        let parsed = parse_extraction_response(response, &config).unwrap();
        assert_eq!(parsed[0].category, "fact");
    }

    #[test]
    fn literal_empty_array_is_some_empty() {
        let config = Config::default();
        assert_eq!(
            parse_extraction_response("[]", &config).unwrap().len(),
            0
        );
    }

    #[test]
    fn unparseable_text_is_none() {
        let config = Config::default();
        assert!(parse_extraction_response("no array here", &config).is_none());
    }
}
