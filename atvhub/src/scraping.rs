use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{info, warn};

const FULL_CONTENT_TIMEOUT_SECS: u64 = 5;
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const MAX_FALLBACK_CHARS: usize = 5000;
const MIN_ARTICLE_CHARS: usize = 200;

/// Elements whose text never counts as article content.
const SKIPPED: &[&str] = &["script", "style", "nav", "footer", "iframe", "header"];

/// Fetch an article page and extract its body text. Any failure yields an empty string.
pub async fn fetch_full_content(client: &Client, url: &str) -> String {
    match fetch_page(client, url).await {
        Ok(html) => {
            let text = extract_article_text(url, &html);
            info!("scraping: extracted {} chars from {}", text.chars().count(), url);
            text
        }
        Err(e) => {
            warn!("scraping: failed to fetch full content from {}: {:#}", url, e);
            String::new()
        }
    }
}

async fn fetch_page(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
        .timeout(Duration::from_secs(FULL_CONTENT_TIMEOUT_SECS))
        .send()
        .await
        .context("failed to fetch article page")?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow::anyhow!("article fetch failed with status: {}", status));
    }
    response.text().await.context("failed to read response body")
}

/// Pick the article text out of a page: newswire body and contact block,
/// then common article containers, then the whole page.
pub fn extract_article_text(url: &str, html: &str) -> String {
    let doc = Html::parse_document(html);

    if url.contains("newswire.co.kr") {
        let body = select_text(&doc, "#news-body");
        let contact = {
            let area = select_text(&doc, ".contact-area");
            if area.is_empty() {
                select_text(&doc, "#news-contact")
            } else {
                area
            }
        };
        if !body.is_empty() {
            return format!("{}\n\n{}", body, contact).trim().to_string();
        }
    }

    let article = select_text(&doc, "article, .article-body, .post-content, main, .content");
    if article.chars().count() > MIN_ARTICLE_CHARS {
        return article;
    }

    page_text(html)
}

fn select_text(doc: &Html, css: &str) -> String {
    let Ok(selector) = Selector::parse(css) else {
        return String::new();
    };
    doc.select(&selector).map(visible_text).collect::<String>().trim().to_string()
}

fn visible_text(el: ElementRef) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        if let Some(text) = node.value().as_text() {
            let hidden = node
                .ancestors()
                .filter_map(|a| a.value().as_element())
                .any(|e| SKIPPED.contains(&e.name()));
            if !hidden {
                out.push_str(text);
            }
        }
    }
    out
}

/// Whole-page text with whitespace runs collapsed, capped in length.
fn page_text(html: &str) -> String {
    static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s\s+").expect("static regex compile"));
    let text = match html2text::from_read(html.as_bytes(), 10_000) {
        Ok(t) => t,
        Err(e) => {
            warn!("scraping: failed to convert page to text: {}", e);
            return String::new();
        }
    };
    WS_RE
        .replace_all(&text, " ")
        .trim()
        .chars()
        .take(MAX_FALLBACK_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newswire_body_and_contact() {
        let html = r#"<html><body><header>menu</header>
            <div id="news-body">본문 <script>var x=1;</script>내용</div>
            <div class="contact-area">홍보팀 02-123-4567</div></body></html>"#;
        let text = extract_article_text("https://www.newswire.co.kr/newsRead.php?no=1", html);
        assert_eq!(text, "본문 내용\n\n홍보팀 02-123-4567");
    }

    #[test]
    fn common_article_selector_needs_enough_text() {
        let long = "가".repeat(250);
        let html = format!("<html><body><nav>nav</nav><article>{}</article></body></html>", long);
        assert_eq!(extract_article_text("https://example.com/a", &html), long);
    }

    #[test]
    fn short_pages_fall_back_to_whole_body() {
        let html = "<html><body><p>짧은   글</p><p>two</p></body></html>";
        let text = extract_article_text("https://example.com/a", html);
        assert!(text.contains("짧은"));
        assert!(text.contains("two"));
        assert!(!text.contains("  "));
    }
}
