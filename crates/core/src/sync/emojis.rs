//! Emoji annotation normalization.
//!
//! Two storage generations exist for a handle's emojis: a list of strings and
//! a single space-separated string. The canonical in-memory form is the list;
//! both forms are accepted wherever data is loaded.

use serde::{Deserialize, Deserializer};

/// Splits a legacy emoji string into tokens, dropping empty segments.
pub fn split_emoji_string(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Trims every token and drops blanks.
pub fn normalize_emojis<I, S>(tokens: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tokens
        .into_iter()
        .flat_map(|token| split_emoji_string(token.as_ref()))
        .collect()
}

/// Space-joined form used when rendering `{{emojis}}`.
pub fn join_emojis(emojis: &[String]) -> String {
    emojis.join(" ")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmojiRepr {
    List(Vec<String>),
    Text(String),
}

/// Serde helper accepting a list, a string, or null.
pub fn deserialize_emojis<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<EmojiRepr>::deserialize(deserializer)?;
    Ok(match raw {
        None => Vec::new(),
        Some(EmojiRepr::List(items)) => normalize_emojis(items),
        Some(EmojiRepr::Text(text)) => split_emoji_string(&text),
    })
}

/// Parses a stored column that may hold JSON list text or a legacy string.
pub fn parse_stored_emojis(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        if let Ok(items) = serde_json::from_str::<Vec<String>>(trimmed) {
            return normalize_emojis(items);
        }
    }
    split_emoji_string(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(default, deserialize_with = "deserialize_emojis")]
        emojis: Vec<String>,
    }

    #[test]
    fn accepts_both_generations() {
        let list: Holder = serde_json::from_str(r#"{"emojis":["🎨","🚀"]}"#).expect("list");
        let text: Holder = serde_json::from_str(r#"{"emojis":"🎨  🚀"}"#).expect("text");
        assert_eq!(list.emojis, vec!["🎨", "🚀"]);
        assert_eq!(text.emojis, list.emojis);
    }

    #[test]
    fn missing_or_null_is_empty() {
        let missing: Holder = serde_json::from_str("{}").expect("missing");
        let null: Holder = serde_json::from_str(r#"{"emojis":null}"#).expect("null");
        let blank: Holder = serde_json::from_str(r#"{"emojis":""}"#).expect("blank");
        assert!(missing.emojis.is_empty());
        assert!(null.emojis.is_empty());
        assert!(blank.emojis.is_empty());
    }

    #[test]
    fn stored_column_parses_json_and_legacy_text() {
        assert_eq!(parse_stored_emojis(Some(r#"["🔥"," 💯 "]"#)), vec!["🔥", "💯"]);
        assert_eq!(parse_stored_emojis(Some("🔥 💯")), vec!["🔥", "💯"]);
        assert!(parse_stored_emojis(None).is_empty());
    }
}
