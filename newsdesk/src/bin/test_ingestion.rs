//! Manual smoke test against the real news and search providers.

use anyhow::Context;
use chrono::Utc;
use newsdesk::ingestion::{NewsApiClient, NewsQuery, NewsSource};
use newsdesk::search::{BraveSearchClient, WebSearch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let news_key = std::env::var("NEWS_API_KEY").context("Set NEWS_API_KEY environment variable")?;
    let news = NewsApiClient::new(common::DEFAULT_NEWS_API_URL, news_key, 10)?;
    let today = Utc::now().date_naive();

    for category in common::default_categories() {
        println!("\n{}", "=".repeat(60));
        println!("Testing: {}", category.name);
        println!("{}", "=".repeat(60));

        match news.fetch(&NewsQuery::from_category(&category, today)).await {
            Ok(articles) => {
                println!("✓ Success! {} articles", articles.len());
                for (i, article) in articles.iter().take(3).enumerate() {
                    println!("    {}. {}", i + 1, article.title);
                    println!("       URL: {}", article.url);
                    println!(
                        "       Source: {}",
                        article.source_name.as_deref().unwrap_or("unknown")
                    );
                }
            }
            Err(e) => println!("✗ Failed: {:#}", e),
        }
    }

    match std::env::var("BRAVE_API_KEY") {
        Ok(search_key) => {
            println!("\n{}", "=".repeat(60));
            println!("Testing: news search");
            println!("{}", "=".repeat(60));
            let search = BraveSearchClient::new(common::DEFAULT_SEARCH_API_URL, search_key, 10)?;
            match search.search("central bank interest rates", 8).await {
                Ok(results) => {
                    println!("✓ Success! {} news results", results.len());
                    for r in results.iter().take(3) {
                        println!("    - {} ({})", r.title, r.url);
                    }
                }
                Err(e) => println!("✗ Failed: {:#}", e),
            }
        }
        Err(_) => println!("\nBRAVE_API_KEY not set, skipping search test"),
    }

    Ok(())
}
