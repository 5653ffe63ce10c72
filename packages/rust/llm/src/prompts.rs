//! Prompt templates for each generation step.

use deepresearch_shared::Source;

/// One source excerpt fed into a prompt.
pub(crate) struct Excerpt<'a> {
    pub title: &'a str,
    pub url: &'a str,
    pub text: &'a str,
}

/// Join excerpts into a `---`-separated block, each cut to `max_chars`.
pub(crate) fn format_excerpts<'a>(
    excerpts: impl IntoIterator<Item = Excerpt<'a>>,
    max_chars: usize,
) -> String {
    excerpts
        .into_iter()
        .map(|e| {
            format!(
                "Source: {} ({})\n\n{}",
                e.title,
                e.url,
                truncate_chars(e.text, max_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Numbered source list, e.g. `1. Title - https://...`.
pub(crate) fn format_sources(sources: &[Source]) -> String {
    if sources.is_empty() {
        return "No specific sources available.".to_string();
    }
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {} - {}", i + 1, s.title, s.url))
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub(crate) fn summarize(question: &str, content: &str) -> String {
    format!(
        "You are a research assistant summarizing information related to a specific question.

Question: {question}

Content to summarize:

{content}

Write a comprehensive summary of the key information that helps answer the question.
Focus on facts, data and insights. Include relevant statistics, expert opinions and
important context. Stay objective and do not add opinions of your own. Organize the
summary into clear sections. It must be detailed enough to serve as the basis for a
comprehensive answer."
    )
}

pub(crate) fn draft(question: &str, summary: &str, sources: &str) -> String {
    format!(
        "You are a research assistant drafting a comprehensive answer to a question from
research findings.

Question: {question}

Research summary:
{summary}

Sources:
{sources}

Draft an answer that:
1. Directly addresses the question
2. Incorporates the key information from the research summary
3. Is well structured with clear sections
4. Includes relevant facts, data and expert opinions
5. Stays objective and avoids speculation
6. Acknowledges limitations in the available information
7. Cites sources as [1], [2], etc.

End with a \"References\" section listing all sources."
    )
}

pub(crate) fn fact_check(question: &str, answer: &str, sources: &str) -> String {
    format!(
        "You are a fact checker verifying an answer against source materials.

Question: {question}

Answer to verify:
{answer}

Source materials:
{sources}

Identify factual errors or misrepresentations, claims the sources cannot verify, and
suggested corrections. If the answer is accurate and supported, state that it has
been verified. Otherwise give specific feedback on what must change."
    )
}

pub(crate) fn finalize(question: &str, answer: &str, feedback: &str, sources: &str) -> String {
    format!(
        "You are a research assistant finalizing an answer using fact-check results.

Question: {question}

Draft answer:
{answer}

Fact-check results:
{feedback}

Sources:
{sources}

Revise the draft so that it is accurate. Correct every issue the fact check found;
if the draft was verified, keep it or make minor improvements. The final answer must
be well supported by the sources, address the question directly, use clear sections,
cite sources and end with a \"References\" section."
    )
}
