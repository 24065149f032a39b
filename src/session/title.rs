//! Title cleanup for model-generated session titles

const ELLIPSIS: &str = "...";

/// Normalize a raw model reply into a display title
///
/// Returns `None` when nothing usable remains.
pub fn sanitize_title(raw: &str, max_chars: usize) -> Option<String> {
    let first_line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;

    let mut title = first_line
        .trim_start_matches(|c: char| c == '#' || c.is_whitespace())
        .trim_start_matches("Title:")
        .trim_start_matches("title:");

    title = title.trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '“' | '”' | '‘' | '’') || c.is_whitespace());
    title = title.trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ',' | ';' | ':'));
    title = title.trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '“' | '”' | '‘' | '’') || c.is_whitespace());

    let collapsed = title.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }

    Some(truncate_title(&collapsed, max_chars))
}

/// Cut `title` to at most `max_chars` characters, marking the cut with `...`
pub fn truncate_title(title: &str, max_chars: usize) -> String {
    if title.chars().count() <= max_chars {
        return title.to_string();
    }

    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let truncated: String = title.chars().take(keep).collect();
    format!("{}{}", truncated.trim_end(), ELLIPSIS)
}
