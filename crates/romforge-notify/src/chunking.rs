//! Fitting text into a transport's per-message size limit.
//!
//! Limits are counted in characters, matching how the Bot API measures them.

/// Longest text message the Bot API accepts.
pub const TELEGRAM_MAX_MESSAGE_CHARS: usize = 4096;

/// Split `text` into pieces of at most `max_chars` characters.
///
/// Prefers to break after a newline in the second half of a piece, then after
/// a space, and only then mid-word.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || byte_index_after_n_chars(text, max_chars) == text.len() {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let boundary = byte_index_after_n_chars(remaining, max_chars);
        if boundary == remaining.len() {
            chunks.push(remaining.to_string());
            break;
        }

        let end = choose_split_boundary(&remaining[..boundary], boundary, max_chars);
        chunks.push(remaining[..end].to_string());
        remaining = &remaining[end..];
    }
    chunks
}

/// The newest part of `text` that fits in `max_chars` characters.
///
/// When the cut falls inside a line, the partial line is dropped unless it is
/// the only line left.
pub fn newest_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }

    let start = byte_index_after_n_chars(text, total - max_chars);
    let kept = &text[start..];
    if start > 0 && !text[..start].ends_with('\n') {
        if let Some(newline) = kept.find('\n') {
            return &kept[newline + 1..];
        }
    }
    kept
}

fn byte_index_after_n_chars(text: &str, n: usize) -> usize {
    text.char_indices()
        .nth(n)
        .map(|(index, _)| index)
        .unwrap_or(text.len())
}

fn choose_split_boundary(search_area: &str, max_boundary: usize, max_chars: usize) -> usize {
    if let Some(pos) = search_area.rfind('\n') {
        if search_area[..pos].chars().count() >= max_chars / 2 {
            return pos + 1;
        }
    }

    match search_area.rfind(' ') {
        Some(pos) if pos > 0 => pos + 1,
        _ => max_boundary,
    }
}
