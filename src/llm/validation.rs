use crate::error::ServiceError;
use crate::models::NeutralSummary;

/// Limits applied to summarization output before it is persisted
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Maximum headline length in characters
    pub max_title_chars: usize,
    /// Maximum neutral summary length in characters
    pub max_summary_chars: usize,
    /// Maximum bullets kept per bias summary
    pub max_bullets: usize,
    /// Maximum common points kept per issue
    pub max_common_points: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_title_chars: 120,
            max_summary_chars: 1000,
            max_bullets: 6,
            max_common_points: 6,
        }
    }
}

/// Check a neutral summary, returning a trimmed copy
pub fn validate_neutral(
    summary: NeutralSummary,
    config: &ValidationConfig,
) -> Result<NeutralSummary, ServiceError> {
    let mut errors = Vec::new();

    let title = summary.title.trim().to_string();
    let body = summary.summary.trim().to_string();

    // 1. Both fields present
    if title.is_empty() {
        errors.push("title is empty".to_string());
    }
    if body.is_empty() {
        errors.push("summary is empty".to_string());
    }

    // 2. Length limits
    let title_len = title.chars().count();
    if title_len > config.max_title_chars {
        errors.push(format!(
            "title is {} chars (max {})",
            title_len, config.max_title_chars
        ));
    }
    let body_len = body.chars().count();
    if body_len > config.max_summary_chars {
        errors.push(format!(
            "summary is {} chars (max {})",
            body_len, config.max_summary_chars
        ));
    }

    if errors.is_empty() {
        Ok(NeutralSummary {
            title,
            summary: body,
        })
    } else {
        Err(ServiceError::InvalidResponse(errors.join("; ")))
    }
}

/// Clean a bullet list: trim, strip list markers, drop blanks, cap the count.
///
/// An empty result is only accepted when `allow_empty` is set.
pub fn validate_points(
    points: Vec<String>,
    max_points: usize,
    allow_empty: bool,
) -> Result<Vec<String>, ServiceError> {
    let cleaned: Vec<String> = points
        .into_iter()
        .map(|p| {
            p.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim()
                .to_string()
        })
        .filter(|p| !p.is_empty())
        .take(max_points)
        .collect();

    if cleaned.is_empty() && !allow_empty {
        return Err(ServiceError::InvalidResponse(
            "no usable bullet points".to_string(),
        ));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_summary_is_trimmed() {
        let summary = NeutralSummary {
            title: "  Budget passes  ".to_string(),
            summary: "\nThe assembly passed the budget.\n".to_string(),
        };
        let valid = validate_neutral(summary, &ValidationConfig::default()).unwrap();
        assert_eq!(valid.title, "Budget passes");
        assert_eq!(valid.summary, "The assembly passed the budget.");
    }

    #[test]
    fn test_empty_title_rejected() {
        let summary = NeutralSummary {
            title: " ".to_string(),
            summary: "text".to_string(),
        };
        let err = validate_neutral(summary, &ValidationConfig::default()).unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("title is empty"));
    }

    #[test]
    fn test_long_title_rejected() {
        let config = ValidationConfig {
            max_title_chars: 5,
            ..Default::default()
        };
        let summary = NeutralSummary {
            title: "far too long".to_string(),
            summary: "ok".to_string(),
        };
        assert!(validate_neutral(summary, &config).is_err());
    }

    #[test]
    fn test_points_cleaned_and_capped() {
        let points = vec![
            "- first".to_string(),
            "   ".to_string(),
            "• second".to_string(),
            "third".to_string(),
        ];
        let cleaned = validate_points(points, 2, false).unwrap();
        assert_eq!(cleaned, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_empty_points() {
        assert!(validate_points(vec![String::new()], 5, false).is_err());
        assert_eq!(validate_points(vec![], 5, true).unwrap(), Vec::<String>::new());
    }
}
