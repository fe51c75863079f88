//! Try feed discovery against one or more URLs from the command line.

use anyhow::Result;
use atvhub::discovery::discover_feed;
use atvhub::ingestion::{build_client, fetch_feed_articles, RssFeedConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        anyhow::bail!("Usage: discover_feed <url> [url...]");
    }
    let client = build_client("KOBACO-Lead-Sniper/1.0")?;

    for url in urls {
        println!("\n{}", "=".repeat(60));
        println!("Testing: {}", url);
        println!("{}", "=".repeat(60));

        match discover_feed(&client, &url).await {
            Ok(found) => {
                println!("✓ Feed: {}", found.feed_url);
                println!("  Title: {}", found.title.as_deref().unwrap_or("(untitled)"));

                let articles = fetch_feed_articles(&client, &RssFeedConfig::new("test", &found.feed_url), 3).await;
                println!("  First {} entries:", articles.len());
                for (i, a) in articles.iter().enumerate() {
                    println!("    {}. {}", i + 1, a.title);
                    println!("       URL: {}", a.link);
                    println!("       Snippet: {} chars", a.content_snippet.chars().count());
                }
            }
            Err(e) => println!("✗ Failed: {}", e),
        }
    }
    Ok(())
}
