/// Append `item` unless an equal entry is already present.
pub fn push_unique(items: &mut Vec<String>, item: String) {
    if !items.contains(&item) {
        items.push(item);
    }
}

/// Trim entries, drop blanks and duplicates (first occurrence wins), and keep
/// at most `limit` entries.
pub fn dedup_capped<I>(items: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out = Vec::new();
    for item in items {
        if out.len() >= limit {
            break;
        }
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        push_unique(&mut out, trimmed.to_string());
    }
    out
}

/// Truncate to at most `max_bytes` without splitting a UTF-8 character.
pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}
