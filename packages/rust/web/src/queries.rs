use async_trait::async_trait;

use deepresearch_shared::{QueryGenerator, Result};

/// Derives search queries from fixed phrasings of the question.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateQueryGenerator;

#[async_trait]
impl QueryGenerator for TemplateQueryGenerator {
    async fn generate(&self, question: &str, count: usize) -> Result<Vec<String>> {
        let queries = [
            question.to_string(),
            format!("latest information about {question}"),
            format!("recent developments in {question}"),
        ];
        Ok(queries.into_iter().take(count).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_at_most_count_queries() {
        let generator = TemplateQueryGenerator;
        let queries = generator.generate("fusion power", 3).await.unwrap();
        assert_eq!(
            queries,
            [
                "fusion power",
                "latest information about fusion power",
                "recent developments in fusion power"
            ]
        );
        assert_eq!(generator.generate("q", 1).await.unwrap(), ["q"]);
        assert!(generator.generate("q", 0).await.unwrap().is_empty());
    }
}
