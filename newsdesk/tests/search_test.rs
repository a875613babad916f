use mockito::Matcher;
use newsdesk::search::{BraveSearchClient, WebSearch};

#[tokio::test]
async fn test_search_keeps_only_news_results() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("GET", "/")
        .match_header("x-subscription-token", "brave-key")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("q".into(), "eu ai act".into()),
            Matcher::UrlEncoded("count".into(), "8".into()),
            Matcher::UrlEncoded("search_lang".into(), "en".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "type": "news",
                "results": [
                    {
                        "type": "news_result",
                        "title": "EU AI Act enters into force",
                        "url": "https://www.bbc.com/news/technology-1",
                        "description": "The law sets rules for high-risk systems.",
                        "age": "2 days ago",
                        "meta_url": {"hostname": "www.bbc.com"}
                    },
                    {
                        "type": "video_result",
                        "title": "Explainer video",
                        "url": "https://video.example.com/1"
                    },
                    {
                        "type": "news_result",
                        "title": "What the AI Act means for startups",
                        "url": "https://time.com/ai-act-startups",
                        "meta_url": {"hostname": "time.com"}
                    }
                ]
            }"#,
        )
        .create_async()
        .await;

    let client = BraveSearchClient::new(server.url(), "brave-key", 5).expect("client");
    let results = client.search("eu ai act", 8).await.expect("search");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].title, "EU AI Act enters into force");
    assert_eq!(results[0].source.as_deref(), Some("www.bbc.com"));
    assert_eq!(results[0].age.as_deref(), Some("2 days ago"));
    assert_eq!(results[1].url, "https://time.com/ai-act-startups");
    assert!(results[1].description.is_none());

    mock.assert_async().await;
}

#[tokio::test]
async fn test_search_client_error() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .with_status(422)
        .with_body(r#"{"error": {"detail": "Unable to validate request parameter(s)"}}"#)
        .create_async()
        .await;

    let client = BraveSearchClient::new(server.url(), "brave-key", 5).expect("client");
    let err = client.search("", 8).await.expect_err("422 must fail");
    assert!(err.to_string().contains("422"));
}
