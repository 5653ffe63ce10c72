//! HTML page fetching and readable-text extraction.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Node};
use tracing::{debug, instrument, warn};
use url::Url;

use deepresearch_shared::{
    DeepResearchError, ExtractConfig, ExtractedPage, Extraction, PageExtractor, Result,
};

use crate::transport_error;

/// Browser-like User-Agent; many sites refuse unknown clients.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Elements whose text is never part of the readable content.
const EXCLUDED_TAGS: [&str; 5] = ["script", "style", "nav", "footer", "header"];

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

/// Title used when a page has no `<title>`.
const UNKNOWN_TITLE: &str = "Unknown";

/// Fetches pages over HTTP and extracts their title and visible text.
pub struct HtmlExtractor {
    client: Client,
    max_chars: usize,
    /// Allow loopback hosts (for integration tests with mock servers).
    allow_localhost: bool,
}

impl HtmlExtractor {
    pub fn new(config: &ExtractConfig) -> Result<Self> {
        Self::build(config, false)
    }

    /// `allow_localhost` admits loopback hosts only; private ranges stay blocked.
    fn build(config: &ExtractConfig, allow_localhost: bool) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            client: build_client(timeout, allow_localhost)?,
            max_chars: config.max_content_chars,
            allow_localhost,
        })
    }

    async fn fetch(&self, raw_url: &str) -> Result<ExtractedPage> {
        let url = Url::parse(raw_url)
            .map_err(|e| DeepResearchError::validation(format!("invalid URL {raw_url}: {e}")))?;
        if is_blocked(&url, self.allow_localhost) {
            return Err(DeepResearchError::validation(format!(
                "refusing to fetch private or non-HTTP address {url}"
            )));
        }

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| transport_error(raw_url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeepResearchError::Upstream {
                status: status.as_u16(),
                message: format!("{raw_url}: HTTP {status}"),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| DeepResearchError::Network(format!("{raw_url}: body read failed: {e}")))?;

        let (title, text) = readable_content(&body, self.max_chars);
        Ok(ExtractedPage {
            url: raw_url.to_string(),
            title,
            text,
        })
    }
}

#[async_trait]
impl PageExtractor for HtmlExtractor {
    #[instrument(skip_all, fields(url = %url))]
    async fn extract(&self, url: &str) -> Extraction {
        match self.fetch(url).await {
            Ok(page) => {
                debug!(chars = page.text.len(), "page extracted");
                Extraction::Extracted(page)
            }
            Err(e) => {
                warn!(error = %e, "page extraction failed");
                Extraction::Failed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// HTTP client whose redirect policy re-checks every hop against the SSRF
/// guard.
fn build_client(timeout: Duration, allow_localhost: bool) -> Result<Client> {
    let policy = reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if is_blocked(attempt.url(), allow_localhost) {
            let message = format!("redirect to private address {} refused", attempt.url());
            attempt.error(message)
        } else {
            attempt.follow()
        }
    });

    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(policy)
        .timeout(timeout)
        .build()
        .map_err(|e| DeepResearchError::Network(format!("failed to build HTTP client: {e}")))
}

/// Whether `url` must not be fetched.
fn is_blocked(url: &Url, allow_localhost: bool) -> bool {
    is_ssrf_target(url) && !(allow_localhost && is_loopback(url))
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Ipv4(v4)) => v4.is_loopback(),
        Some(url::Host::Ipv6(v6)) => v6.is_loopback(),
        Some(url::Host::Domain(host)) => host == "localhost",
        None => false,
    }
}

/// Title and normalized visible text of an HTML document.
fn readable_content(html: &str, max_chars: usize) -> (String, String) {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let title = root
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "title")
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string());

    let mut raw = String::new();
    collect_text(root, &mut raw);
    let text = truncate_chars(&normalize_text(&raw), max_chars);

    (title, text)
}

/// Append the text of `element`, one node per line, skipping excluded subtrees.
fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push('\n');
            }
            Node::Element(el) if EXCLUDED_TAGS.contains(&el.name()) => {}
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}

/// Trim every line, split phrases separated by double spaces onto their own
/// lines and drop blank ones.
pub fn normalize_text(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .flat_map(|line| line.split("  "))
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Check if a URL targets a private/internal network (SSRF protection).
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<html>
<head><title> Quantum Computing Basics </title><style>.x { color: red }</style></head>
<body>
  <header>Site Header</header>
  <nav><a href="/">Home</a></nav>
  <main>
    <h1>Qubits</h1>
    <p>   A qubit holds a superposition.   </p>
    <p>Entanglement links qubits.  Measurement collapses state.</p>
    <script>var tracking = true;</script>
  </main>
  <footer>Copyright</footer>
</body>
</html>"#;

    fn extractor() -> HtmlExtractor {
        HtmlExtractor::build(&ExtractConfig::default(), true).expect("client")
    }

    #[test]
    fn strips_chrome_and_normalizes_lines() {
        let (title, text) = readable_content(PAGE, 10_000);
        assert_eq!(title, "Quantum Computing Basics");
        assert_eq!(
            text,
            "Quantum Computing Basics\nQubits\nA qubit holds a superposition.\nEntanglement links qubits.\nMeasurement collapses state."
        );
        for hidden in ["Site Header", "Home", "Copyright", "tracking", "color"] {
            assert!(!text.contains(hidden), "{hidden}");
        }
    }

    #[test]
    fn missing_title_is_unknown() {
        let (title, _) = readable_content("<p>hello</p>", 100);
        assert_eq!(title, "Unknown");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn ssrf_detection() {
        let blocked = [
            "http://localhost/x",
            "http://127.0.0.1/",
            "http://10.0.0.8/",
            "http://192.168.1.1/",
            "http://[::1]/",
            "http://printer.local/",
            "file:///etc/passwd",
        ];
        for url in blocked {
            assert!(is_ssrf_target(&Url::parse(url).unwrap()), "{url}");
        }
        assert!(!is_ssrf_target(&Url::parse("https://example.com/a").unwrap()));
    }

    #[tokio::test]
    async fn extracts_served_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let url = format!("{}/article", server.uri());
        match extractor().extract(&url).await {
            Extraction::Extracted(page) => {
                assert_eq!(page.url, url);
                assert_eq!(page.title, "Quantum Computing Basics");
                assert!(page.text.contains("\nQubits\n"));
            }
            other => panic!("expected extraction, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_error_is_a_failed_extraction() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = format!("{}/gone", server.uri());
        let result = extractor().extract(&url).await;
        assert!(matches!(result, Extraction::Failed { .. }));
        assert_eq!(result.url(), url);
    }

    #[tokio::test]
    async fn redirect_to_private_address_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hop"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "http://10.0.0.8/admin"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/hop", server.uri());
        let result = tokio::time::timeout(Duration::from_secs(5), extractor().extract(&url))
            .await
            .expect("refused before any connection attempt");
        match result {
            Extraction::Failed { reason, .. } => assert!(reason.contains("redirect"), "{reason}"),
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn redirects_between_allowed_hosts_are_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301)
                    .insert_header("location", format!("{}/article", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let result = extractor().extract(&format!("{}/old", server.uri())).await;
        assert!(matches!(result, Extraction::Extracted(_)), "{result:?}");
    }

    #[tokio::test]
    async fn private_targets_are_refused_by_default() {
        let extractor = HtmlExtractor::new(&ExtractConfig::default()).unwrap();
        let result = extractor.extract("http://127.0.0.1:9/secret").await;
        match result {
            Extraction::Failed { reason, .. } => assert!(reason.contains("refusing")),
            other => panic!("expected refusal, got {other:?}"),
        }
    }
}
