use std::path::Path;

use anyhow::{Context, Result};

use crate::models::Article;

/// Parse an article export file: a JSON array of articles, or one article
/// per line
pub fn load_articles(path: &Path) -> Result<Vec<Article>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    parse_articles(&content).with_context(|| format!("Failed to parse articles: {:?}", path))
}

pub fn parse_articles(content: &str) -> Result<Vec<Article>> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("Failed to parse article array");
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid article on line {}", i + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bias;

    #[test]
    fn test_parse_array() {
        let json = r#"[{"id": "a1", "title": "Budget vote", "bias": "left"}]"#;
        let articles = parse_articles(json).unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].bias, Bias::Left);
        assert!(articles[0].issue_id.is_none());
    }

    #[test]
    fn test_parse_json_lines() {
        let lines = "{\"id\": \"a1\", \"title\": \"One\"}\n\n{\"id\": \"a2\", \"title\": \"Two\", \"bias\": \"right\"}\n";
        let articles = parse_articles(lines).unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[1].bias, Bias::Right);
        assert_eq!(articles[0].bias, Bias::Center);
    }

    #[test]
    fn test_bias_labels_parsed_leniently() {
        let json = r#"[
            {"id": "a1", "title": "One", "bias": "Left"},
            {"id": "a2", "title": "Two", "bias": " CENTRE "}
        ]"#;
        let articles = parse_articles(json).unwrap();
        assert_eq!(articles[0].bias, Bias::Left);
        assert_eq!(articles[1].bias, Bias::Center);

        let err = parse_articles(r#"[{"id": "a3", "title": "Three", "bias": "far-left"}]"#)
            .unwrap_err();
        assert!(format!("{err:#}").contains("unknown bias label"));
    }

    #[test]
    fn test_bad_line_reports_position() {
        let lines = "{\"id\": \"a1\", \"title\": \"One\"}\nnot json\n";
        let err = parse_articles(lines).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_articles("  \n").unwrap().is_empty());
    }
}
