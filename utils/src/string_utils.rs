/// Keeps at most `max_chars` characters of `s`, never splitting a character.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_truncate_long_string() {
        let input = "a".repeat(300);
        assert_eq!(truncate_chars(&input, 255).len(), 255);
    }

    #[test]
    fn test_truncate_short_string_unchanged() {
        assert_eq!(truncate_chars("stack failed", 255), "stack failed");
        assert_eq!(truncate_chars("", 255), "");
    }

    #[test]
    fn test_truncate_multibyte() {
        let input = "é".repeat(10);
        let actual = truncate_chars(&input, 4);
        assert_eq!(actual, "éééé");
        assert_eq!(actual.chars().count(), 4);
    }
}
