//! Web-facing research collaborators: Tavily search, HTML page extraction
//! and search query generation.

mod extract;
mod queries;
mod search;

pub use extract::{HtmlExtractor, normalize_text};
pub use queries::TemplateQueryGenerator;
pub use search::TavilySearch;

/// Map a reqwest transport failure to a network error naming the target.
pub(crate) fn transport_error(target: &str, e: reqwest::Error) -> deepresearch_shared::DeepResearchError {
    if e.is_timeout() {
        deepresearch_shared::DeepResearchError::Network(format!("{target}: request timed out"))
    } else {
        deepresearch_shared::DeepResearchError::Network(format!("{target}: {e}"))
    }
}
