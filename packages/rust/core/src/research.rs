//! Research stage: queries → search → extract → summarize.
//!
//! Search, extraction and summarization failures degrade to empty or
//! placeholder content. Only query generation can fail the stage.

use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};

use deepresearch_shared::{
    Collaborators, ExtractedPage, Extraction, ResearchBundle, ResearchSummary, Result, SearchHit,
    Source, SourceRecord,
};

use crate::orchestrator::PipelineSettings;

/// Gather web sources for `question` and summarize them.
#[instrument(skip_all, fields(question = %question))]
pub async fn gather(
    collaborators: &Collaborators,
    settings: &PipelineSettings,
    question: &str,
) -> Result<ResearchBundle> {
    let queries = collaborators
        .queries
        .generate(question, settings.queries_per_question)
        .await?;
    debug!(count = queries.len(), "generated search queries");

    let mut hits = Vec::new();
    for query in &queries {
        match collaborators
            .search
            .search(query, settings.max_results, settings.depth)
            .await
        {
            Ok(results) => hits.extend(results),
            Err(e) => warn!(query = %query, error = %e, "search failed, continuing without results"),
        }
    }

    let urls = unique_urls(&hits, settings.max_urls);
    info!(hits = hits.len(), urls = urls.len(), "search complete");

    let mut records = Vec::with_capacity(urls.len());
    let mut pages = Vec::new();
    for url in urls {
        match collaborators.extractor.extract(&url).await {
            Extraction::Extracted(page) => {
                records.push(SourceRecord::from(Extraction::Extracted(page.clone())));
                pages.push(page);
            }
            Extraction::Failed { url, reason } => {
                warn!(url = %url, reason = %reason, "extraction failed");
                records.push(SourceRecord::from(Extraction::Failed { url, reason }));
            }
        }
    }

    let summary = summarize(collaborators, question, &pages).await;
    let sources = pages
        .iter()
        .map(|p| Source {
            url: p.url.clone(),
            title: p.title.clone(),
        })
        .collect();

    Ok(ResearchBundle {
        question: question.to_string(),
        summary,
        sources,
        records,
    })
}

async fn summarize(
    collaborators: &Collaborators,
    question: &str,
    pages: &[ExtractedPage],
) -> ResearchSummary {
    if pages.is_empty() {
        return ResearchSummary::NoRelevantContent;
    }
    match collaborators.summarizer.summarize(question, pages).await {
        Ok(text) => ResearchSummary::Summary(text),
        Err(e) => {
            warn!(error = %e, "summarization failed");
            ResearchSummary::Unavailable(e.to_string())
        }
    }
}

/// Unique URLs in first-seen order, at most `limit`.
fn unique_urls(hits: &[SearchHit], limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter(|hit| !hit.url.is_empty() && seen.insert(hit.url.as_str()))
        .take(limit)
        .map(|hit| hit.url.clone())
        .collect()
}
