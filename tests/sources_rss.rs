// tests/sources_rss.rs
//
// RSS source client: fixture parsing, normalization, and date handling.

use newsroom_pipeline::sources::{rss::RssSource, SourceClient};

const FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>City Wire</title>
    <item>
      <title>Council&nbsp;approves   budget</title>
      <link>https://citywire.example/articles/council-budget</link>
      <pubDate>Mon, 18 Aug 2025 09:30:00 GMT</pubDate>
      <description>&lt;p&gt;The city council approved the &lt;b&gt;2026 budget&lt;/b&gt; on Monday.&lt;/p&gt;</description>
    </item>
    <item>
      <title></title>
      <description></description>
    </item>
    <item>
      <title>Transit line opens</title>
      <link>https://citywire.example/articles/transit-line</link>
      <description>Service starts next week.</description>
    </item>
  </channel>
</rss>"#;

#[tokio::test]
async fn fixture_parse_normalizes_and_skips_empty_items() {
    let source = RssSource::from_fixture("citywire", "local", FIXTURE);
    let docs = source.fetch_latest().await.expect("fixture parse");

    assert_eq!(docs.len(), 2, "the empty item is dropped");

    let first = &docs[0];
    assert_eq!(first.title, "Council approves budget");
    assert_eq!(first.body, "The city council approved the 2026 budget on Monday.");
    assert_eq!(first.category, "local");
    assert_eq!(first.source_url, "https://citywire.example/articles/council-budget");
    assert_eq!(first.published_at, 1755509400, "RFC 2822 pubDate to unix seconds");

    let second = &docs[1];
    assert_eq!(second.published_at, 0, "missing pubDate defaults to 0");
    assert_eq!(source.name(), "citywire");
}
