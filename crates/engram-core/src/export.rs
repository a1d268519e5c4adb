//! Export/import formats: a lossless JSON envelope, and
//! human-readable Markdown and CSV renderings.

use crate::model::{Config, Memory, Millis};
use crate::{EngramError, Result};
use std::collections::HashMap;

/// The JSON export envelope: one object per namespace export.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub engram: EnvelopeMeta,
    pub memories: Vec<Memory>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    pub version: u32,
    pub exported_at: Millis,
    pub namespace: String,
    pub count: usize,
    pub categories: Vec<String>,
}

/// Current envelope schema version, bumped on any breaking change to the
/// JSON export shape.
pub const ENVELOPE_VERSION: u32 = 1;

/// Serialize `memories` as the JSON envelope; round-trips losslessly
/// through [`import_json`].
pub fn export_json(memories: &[Memory], namespace: &str, now: Millis) -> Result<String> {
    let mut categories: Vec<String> = memories.iter().map(|m| m.category.clone()).collect();
    categories.sort();
    categories.dedup();

    let envelope = Envelope {
        engram: EnvelopeMeta {
            version: ENVELOPE_VERSION,
            exported_at: now,
            namespace: namespace.to_string(),
            count: memories.len(),
            categories,
        },
        memories: memories.to_vec(),
    };

    serde_json::to_string_pretty(&envelope)
        .map_err(|e| EngramError::Store(format!("serializing export envelope: {e}")))
}

/// Parse a JSON envelope back into its memories, ignoring the metadata
/// block beyond validating it deserializes.
pub fn import_json(json: &str) -> Result<Vec<Memory>> {
    let envelope: Envelope = serde_json::from_str(json)
        .map_err(|e| EngramError::Store(format!("parsing export envelope: {e}")))?;
    Ok(envelope.memories)
}

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Simple pluralization: append `s`. Matches the "simple pluralization"
/// export rule and [`import_markdown`]'s "stripping trailing `s`" inverse
/// — neither direction needs to handle irregular plurals since the
/// default category set (and any sane custom one) doesn't already end in `s`.
fn pluralize_category(category: &str) -> String {
    format!("{category}s")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Render `memories` as Markdown: an `# Engram Memory Export`
/// header, an ISO-8601 metadata blockquote, then one `## <Category>s`
/// section per category (stable category order of first appearance), each a
/// bullet list of `- **content** — importance: X, surprise: Y, age: Zd ago,
/// accessed: N×, vV` lines. Recovered by [`import_markdown`].
pub fn export_markdown(memories: &[Memory], namespace: &str, now: Millis) -> String {
    let mut order: Vec<String> = Vec::new();
    let mut by_category: HashMap<String, Vec<&Memory>> = HashMap::new();
    for memory in memories {
        by_category.entry(memory.category.clone()).or_insert_with(|| {
            order.push(memory.category.clone());
            Vec::new()
        });
        by_category.get_mut(&memory.category).unwrap().push(memory);
    }

    let exported_at = chrono::DateTime::from_timestamp_millis(now)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_default();

    let mut out = format!(
        "# Engram Memory Export\n\n> Exported {exported_at} · namespace: {namespace} · {} memories\n\n",
        memories.len(),
    );
    for category in &order {
        let heading = pluralize_category(&title_case(category));
        out.push_str(&format!("## {heading}\n\n"));
        for memory in &by_category[category] {
            let age_days = crate::decay::age_days(memory.created_at, now).max(0.0);
            out.push_str(&format!(
                "- **{}** — importance: {:.2}, surprise: {:.2}, age: {:.1}d ago, accessed: {}×, v{}\n",
                memory.content,
                memory.importance,
                memory.surprise,
                age_days,
                memory.access_count,
                memory.version,
            ));
        }
        out.push('\n');
    }
    out
}

/// One entry recovered from a Markdown export line, before the surrounding
/// `id`/`namespace`/timestamps a fresh import assigns.
struct ParsedEntry {
    content: String,
    importance: f32,
    surprise: f32,
    age_days: f64,
    access_count: u32,
    version: u32,
}

fn parse_markdown_entry(line: &str) -> Option<ParsedEntry> {
    let stripped = line.trim().strip_prefix("- **")?;
    let (content, rest) = stripped.split_once("** — ")?;

    let mut importance = None;
    let mut surprise = None;
    let mut age_days = None;
    let mut access_count = None;
    let mut version = None;

    for field in rest.split(", ") {
        let field = field.trim();
        if let Some(v) = field.strip_prefix("importance: ") {
            importance = v.parse::<f32>().ok();
        } else if let Some(v) = field.strip_prefix("surprise: ") {
            surprise = v.parse::<f32>().ok();
        } else if let Some(v) = field.strip_prefix("age: ").and_then(|v| v.strip_suffix(" ago")) {
            age_days = v.strip_suffix('d').and_then(|v| v.parse::<f64>().ok());
        } else if let Some(v) = field.strip_prefix("accessed: ").and_then(|v| v.strip_suffix('×')) {
            access_count = v.parse::<u32>().ok();
        } else if let Some(v) = field.strip_prefix('v') {
            version = v.parse::<u32>().ok();
        }
    }

    Some(ParsedEntry {
        content: content.to_string(),
        importance: importance?,
        surprise: surprise?,
        age_days: age_days?,
        access_count: access_count?,
        version: version?,
    })
}

/// Parse a Markdown export back into memories, recovering content, category,
/// and metrics. `namespace` and `id_gen` fill in the fields Markdown
/// doesn't carry; `age_days` (computed against `now`) is converted back into
/// an approximate `createdAt`. Unparseable lines are skipped rather than
/// failing the whole import.
pub fn import_markdown(
    markdown: &str,
    namespace: &str,
    now: Millis,
    mut id_gen: impl FnMut() -> String,
) -> Vec<Memory> {
    let mut current_category: Option<String> = None;
    let mut memories = Vec::new();

    for line in markdown.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("## ") {
            let lower = heading.to_lowercase();
            let singular = lower.strip_suffix('s').unwrap_or(&lower).to_string();
            current_category = Some(singular);
            continue;
        }

        let Some(category) = current_category.clone() else {
            continue;
        };
        let Some(parsed) = parse_markdown_entry(trimmed) else {
            continue;
        };

        let created_at = now - (parsed.age_days * MILLIS_PER_DAY) as Millis;
        memories.push(Memory {
            id: id_gen(),
            content: parsed.content,
            category,
            source: "markdown-import".to_string(),
            surprise: parsed.surprise,
            importance: parsed.importance,
            access_count: parsed.access_count,
            last_accessed: created_at,
            created_at,
            embedding: None,
            metadata: HashMap::new(),
            namespace: namespace.to_string(),
            ttl: None,
            expires_at: None,
            version: parsed.version,
            history: Vec::new(),
        });
    }

    memories
}

/// Render `memories` as RFC 4180 CSV with the header row exactly:
/// `id,content,category,surprise,importance,accessCount,createdAt,version,
/// metadata`, with `metadata` JSON-stringified and quoted per RFC 4180.
pub fn export_csv(memories: &[Memory]) -> Result<String> {
    let mut out =
        String::from("id,content,category,surprise,importance,accessCount,createdAt,version,metadata\n");
    for memory in memories {
        let metadata_json = serde_json::to_string(&memory.metadata)
            .map_err(|e| EngramError::Store(format!("serializing metadata for csv: {e}")))?;
        let fields = [
            memory.id.as_str(),
            memory.content.as_str(),
            memory.category.as_str(),
            &memory.surprise.to_string(),
            &memory.importance.to_string(),
            &memory.access_count.to_string(),
            &memory.created_at.to_string(),
            &memory.version.to_string(),
            &metadata_json,
        ];
        out.push_str(&fields.iter().map(|f| csv_quote(f)).collect::<Vec<_>>().join(","));
        out.push('\n');
    }
    Ok(out)
}

fn csv_quote(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Validate that `config`'s categories cover every category present in
/// `memories`, for callers importing into a differently-configured engine.
pub fn validate_categories(memories: &[Memory], config: &Config) -> Result<()> {
    for memory in memories {
        if !config.categories.iter().any(|c| c == &memory.category) {
            return Err(EngramError::Config(format!(
                "imported memory has unconfigured category {:?}",
                memory.category
            )));
        }
    }
    Ok(())
}
