use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier assigned to an article by the crawler
pub type ArticleId = String;

/// Political leaning of the outlet that published an article
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Bias {
    Left,
    #[default]
    Center,
    Right,
}

impl Bias {
    /// Every label, in the order used to break ties: center, then left, then right.
    pub const PRIORITY: [Bias; 3] = [Bias::Center, Bias::Left, Bias::Right];

    /// Every label in display order
    pub const ALL: [Bias; 3] = [Bias::Left, Bias::Center, Bias::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bias::Left => "left",
            Bias::Center => "center",
            Bias::Right => "right",
        }
    }

    /// Position of this label in the tie-break order (lower wins)
    pub fn priority(&self) -> usize {
        match self {
            Bias::Center => 0,
            Bias::Left => 1,
            Bias::Right => 2,
        }
    }
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bias {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Bias::Left),
            "center" | "centre" => Ok(Bias::Center),
            "right" => Ok(Bias::Right),
            other => Err(format!("unknown bias label: {other}")),
        }
    }
}

impl TryFrom<String> for Bias {
    type Error = String;

    fn try_from(label: String) -> Result<Self, Self::Error> {
        label.parse()
    }
}

/// A crawled news article, owned by the storage collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    /// Full body text
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub bias: Bias,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Embedding cached by an earlier process, if any
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Issue this article was linked to; set exactly once
    #[serde(default)]
    pub issue_id: Option<Uuid>,
}

impl Article {
    /// Title and body joined the way they are sent to the embedding service,
    /// capped at `max_chars` characters.
    pub fn embedding_text(&self, max_chars: usize) -> String {
        let combined = format!("{}\n\n{}", self.title, self.body);
        let trimmed = combined.trim();
        if trimmed.chars().count() > max_chars {
            trimmed.chars().take(max_chars).collect()
        } else {
            trimmed.to_string()
        }
    }

    pub fn is_unclustered(&self) -> bool {
        self.issue_id.is_none()
    }

    /// Image reference, ignoring blank strings
    pub fn image(&self) -> Option<&str> {
        self.image_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// Embedding vector for one article, produced by the embedding stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub article_id: ArticleId,
    /// Kept for cluster analysis output
    #[serde(default)]
    pub title: String,
    pub vector: Vec<f32>,
    /// Length in characters of the text that was embedded
    pub text_length: usize,
}

impl EmbeddingRecord {
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(title: &str, body: &str) -> Article {
        Article {
            id: "a1".to_string(),
            title: title.to_string(),
            body: body.to_string(),
            url: None,
            category: "politics".to_string(),
            bias: Bias::Center,
            published_at: None,
            image_url: None,
            embedding: None,
            issue_id: None,
        }
    }

    #[test]
    fn test_embedding_text_truncates_on_char_boundary() {
        let a = article("제목", "본문 내용이 길다");
        let text = a.embedding_text(4);
        assert_eq!(text.chars().count(), 4);
        assert_eq!(text, "제목\n\n");
    }

    #[test]
    fn test_embedding_text_trims_empty_body() {
        let a = article("Headline", "");
        assert_eq!(a.embedding_text(6000), "Headline");
    }

    #[test]
    fn test_bias_parse_and_display() {
        assert_eq!("Left".parse::<Bias>().unwrap(), Bias::Left);
        assert_eq!(" centre ".parse::<Bias>().unwrap(), Bias::Center);
        assert!("far-left".parse::<Bias>().is_err());
        assert_eq!(Bias::Right.to_string(), "right");
    }

    #[test]
    fn test_bias_deserializes_lowercase() {
        let bias: Bias = serde_json::from_str("\"right\"").unwrap();
        assert_eq!(bias, Bias::Right);
        assert_eq!(serde_json::to_string(&Bias::Center).unwrap(), "\"center\"");
    }

    #[test]
    fn test_blank_image_is_ignored() {
        let mut a = article("t", "b");
        a.image_url = Some("   ".to_string());
        assert_eq!(a.image(), None);
        a.image_url = Some("https://img/1.jpg".to_string());
        assert_eq!(a.image(), Some("https://img/1.jpg"));
    }
}
