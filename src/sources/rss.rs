// src/sources/rss.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::dedup::normalize_content;
use crate::sources::{ScrapedDocument, SourceClient};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

fn parse_rfc2822_to_unix(ts: &str) -> u64 {
    chrono::DateTime::parse_from_rfc2822(ts)
        .ok()
        .and_then(|dt| u64::try_from(dt.timestamp()).ok())
        .unwrap_or(0)
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

/// RSS-backed source client. Feed name doubles as the source label and
/// the channel maps to one portal category.
pub struct RssSource {
    name: String,
    category: String,
    mode: Mode,
}

impl RssSource {
    pub fn from_fixture(name: &str, category: &str, xml: &str) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_url(name: &str, category: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            mode: Mode::Http {
                url: url.to_string(),
                client: reqwest::Client::new(),
            },
        }
    }

    fn parse_items_from_str(&self, s: &str) -> Result<Vec<ScrapedDocument>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean).with_context(|| format!("parsing {} rss xml", self.name))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = normalize_content(it.title.as_deref().unwrap_or_default());
            let body = normalize_content(it.description.as_deref().unwrap_or_default());
            if title.is_empty() && body.is_empty() {
                continue;
            }

            out.push(ScrapedDocument {
                source_url: it.link.unwrap_or_default(),
                title,
                body,
                category: self.category.clone(),
                published_at: it.pub_date.as_deref().map(parse_rfc2822_to_unix).unwrap_or(0),
            });
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("scrape_parse_ms").record(ms);
        counter!("scrape_documents_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl SourceClient for RssSource {
    async fn fetch_latest(&self) -> Result<Vec<ScrapedDocument>> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http { url, client } => {
                let body = match client.get(url).send().await {
                    Ok(resp) => resp.text().await.context("rss feed .text()")?,
                    Err(e) => {
                        tracing::warn!(error = ?e, source = %self.name, "source fetch error");
                        counter!("scrape_source_errors_total").increment(1);
                        return Err(e).context("rss feed get()");
                    }
                };
                self.parse_items_from_str(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
