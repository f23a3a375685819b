#![forbid(unsafe_code)]

//! Scalar parsers for the display strings the upstream emits.

/// Parses `H:MM:SS`, `M:SS`, ISO-8601 (`PT1H2M3S`), bare seconds, and spelled
/// out forms such as `"3 minutes, 5 seconds"`.
pub fn parse_duration(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(seconds);
    }

    if trimmed.contains(':') {
        let mut total: u64 = 0;
        for part in trimmed.split(':') {
            let value = part.trim().parse::<u64>().ok()?;
            total = total.checked_mul(60)?.checked_add(value)?;
        }
        return Some(total);
    }

    if let Some(iso) = trimmed
        .strip_prefix("PT")
        .or_else(|| trimmed.strip_prefix("pt"))
    {
        return parse_unit_sequence(iso);
    }

    parse_spelled_duration(trimmed)
}

fn parse_unit_sequence(text: &str) -> Option<u64> {
    let mut total = 0u64;
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let value: u64 = digits.parse().ok()?;
        digits.clear();
        let factor = match ch.to_ascii_uppercase() {
            'H' => 3600,
            'M' => 60,
            'S' => 1,
            _ => return None,
        };
        total = total.checked_add(value.checked_mul(factor)?)?;
    }
    if !digits.is_empty() {
        return None;
    }
    Some(total)
}

fn parse_spelled_duration(text: &str) -> Option<u64> {
    let lowered = text.to_ascii_lowercase().replace(',', " ");
    let mut tokens = lowered.split_whitespace().peekable();
    let mut total = 0u64;
    let mut matched = false;
    while let Some(token) = tokens.next() {
        let Ok(value) = token.parse::<u64>() else {
            continue;
        };
        let Some(unit) = tokens.peek() else {
            break;
        };
        let factor = if unit.starts_with("hour") {
            3600
        } else if unit.starts_with("minute") {
            60
        } else if unit.starts_with("second") {
            1
        } else {
            continue;
        };
        total = total.checked_add(value.checked_mul(factor)?)?;
        matched = true;
        tokens.next();
    }
    matched.then_some(total)
}

/// Canonicalizes counts like `"297K views"`, `"1.2M"`, `"1,234"` and
/// `"No views"` into integers.
pub fn parse_count(text: &str) -> Option<u64> {
    let lowered = text.trim().to_ascii_lowercase();
    if lowered.is_empty() {
        return None;
    }
    if lowered.starts_with("no ") || lowered == "no" {
        return Some(0);
    }

    let token = lowered
        .split_whitespace()
        .find(|token| token.chars().any(|ch| ch.is_ascii_digit()))?;
    let cleaned: String = token.chars().filter(|ch| *ch != ',').collect();

    let digits_end = cleaned
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .unwrap_or(cleaned.len());
    let (number, suffix) = cleaned.split_at(digits_end);
    let base: f64 = number.parse().ok()?;
    let multiplier = match suffix.chars().next() {
        Some('k') => 1_000.0,
        Some('m') => 1_000_000.0,
        Some('b') => 1_000_000_000.0,
        _ => 1.0,
    };
    Some((base * multiplier).round() as u64)
}

/// Renders durations as `H:MM:SS` or `M:SS` for short clips.
pub fn format_duration(duration: u64) -> String {
    let hours = duration / 3600;
    let minutes = (duration % 3600) / 60;
    let seconds = duration % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Collects `#tags` in order of appearance, without duplicates.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for word in text.split_whitespace() {
        let Some(rest) = word.strip_prefix('#') else {
            continue;
        };
        let tag: String = rest
            .chars()
            .take_while(|ch| ch.is_alphanumeric() || *ch == '_')
            .collect();
        if tag.is_empty() || tag.chars().all(|ch| ch.is_ascii_digit()) {
            continue;
        }
        let tag = format!("#{tag}");
        if !tags.iter().any(|existing| existing.eq_ignore_ascii_case(&tag)) {
            tags.push(tag);
        }
    }
    tags
}
