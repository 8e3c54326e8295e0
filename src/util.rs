/// Shorten `s` to at most `max` characters, marking the cut with "...".
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max.saturating_sub(3)).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Finance Manager", 20), "Finance Manager");
        assert_eq!(truncate("Supply Chain Manager", 10), "Supply ...");
        assert_eq!(truncate("Café Société", 7), "Café...");
    }
}
