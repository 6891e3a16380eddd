use super::ArticleDigest;
use crate::models::Bias;

/// Instructions for the neutral headline and summary
pub const NEUTRAL_SUMMARY_PROMPT: &str = r#"You are summarizing news coverage of a single real-world event.
The articles below come from outlets across the political spectrum.

RULES:
1. Write a short, factual headline (at most 50 characters) that takes no side.
2. Write a neutral summary of the core issue in at most 200 characters.
3. Use only facts stated in the articles. Do not speculate.
4. Write in the same language as the articles.

Submit your answer with the submit_issue_summary tool."#;

/// Instructions for one side's bullet summary
pub const BIAS_SUMMARY_PROMPT: &str = r#"You are describing how outlets with one political leaning cover a news event.
All articles below come from the same side.

RULES:
1. Write 2 to 5 short bullet points capturing what this coverage emphasizes.
2. Describe the framing; do not endorse or criticize it.
3. Each bullet is a single sentence.
4. Write in the same language as the articles.

Submit your answer with the submit_bias_summary tool."#;

/// Instructions for facts shared across opposing coverage
pub const COMMON_POINTS_PROMPT: &str = r#"You are comparing coverage of one news event from outlets with different political leanings.

RULES:
1. List the facts that outlets on different sides report consistently.
2. Each point is one plain factual sentence.
3. Leave out anything only one side reports, and any opinion.
4. If nothing is shared, submit an empty list.
5. Write in the same language as the articles.

Submit your answer with the submit_common_points tool."#;

/// Build the user message listing the sampled articles
pub fn build_articles_prompt(articles: &[ArticleDigest], focus: Option<Bias>) -> String {
    let mut prompt = String::new();

    match focus {
        Some(bias) => prompt.push_str(&format!(
            "# Coverage from {} outlets ({} articles)\n\n",
            bias,
            articles.len()
        )),
        None => prompt.push_str(&format!("# Coverage ({} articles)\n\n", articles.len())),
    }

    for (i, article) in articles.iter().enumerate() {
        prompt.push_str(&format!("## Article {} [{}]\n", i + 1, article.bias));
        prompt.push_str(&format!("Title: {}\n", article.title));
        if !article.excerpt.is_empty() {
            prompt.push_str(&format!("Excerpt: {}\n", article.excerpt));
        }
        prompt.push('\n');
    }

    prompt
}
