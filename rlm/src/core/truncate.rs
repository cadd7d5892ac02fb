//! Bounded text helpers for execution output fed back to the model.

/// Truncate `text` to at most `limit` bytes on a char boundary.
///
/// Returns the (possibly shortened) text with a `[truncated N bytes]` notice
/// appended, and the number of bytes dropped.
pub fn truncate_output(text: &str, limit: usize) -> (String, usize) {
    if text.len() <= limit {
        return (text.to_string(), 0);
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let dropped = text.len() - end;
    (
        format!("{}\n[truncated {} bytes]", &text[..end], dropped),
        dropped,
    )
}
