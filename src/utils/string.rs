//! String helpers for logging and HTML rendering

/// Truncate at a character boundary to at most `max_chars` characters
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Mask the local part of an email for log output: `jane.doe@x.com` -> `ja***@x.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => format!("{}***@{}", truncate_str(local, 2), domain),
        None => format!("{}***", truncate_str(email, 2)),
    }
}

/// Escape text for interpolation into HTML element content or attributes
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Whitespace-separated word count
pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}
