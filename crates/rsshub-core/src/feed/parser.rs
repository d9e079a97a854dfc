use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use feed_rs::parser;

use super::models::FetchedItem;
use crate::{Error, Result};

/// RFC 1123 with a numeric zone, e.g. `Mon, 02 Jan 2006 15:04:05 -0700`
const RFC1123_NUMERIC: &str = "%a, %d %b %Y %H:%M:%S %z";
/// RFC 1123 without the zone, which is handled separately
const RFC1123_LOCAL: &str = "%a, %d %b %Y %H:%M:%S";

/// Parse an RSS/Atom document into fetched items.
///
/// Entries without a link are dropped since the link identifies the article.
pub fn parse_feed(content: &[u8]) -> Result<Vec<FetchedItem>> {
    let feed = parser::Builder::new()
        .timestamp_parser(parse_pub_date)
        .build()
        .parse(content)
        .map_err(|e| Error::FeedParse(e.to_string()))?;

    let now = Utc::now();
    let mut items = Vec::with_capacity(feed.entries.len());

    for entry in feed.entries {
        let Some(link) = entry.links.first().map(|l| l.href.trim().to_string()) else {
            tracing::debug!("Skipping entry '{}' without link", entry.id);
            continue;
        };
        if link.is_empty() {
            continue;
        }

        let title = entry.title.map(|t| t.content).unwrap_or_default();

        let description = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .unwrap_or_default();

        let published_at = entry.published.or(entry.updated).unwrap_or(now);

        items.push(FetchedItem {
            title,
            link,
            description,
            published_at,
        });
    }

    Ok(items)
}

/// Parse an item publication date.
///
/// Tries RFC 1123 with a numeric zone, then RFC 1123 with a zone name, then
/// RFC 3339 (Atom). Returns `None` when nothing matches so the caller can fall
/// back to "now".
pub fn parse_pub_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_str(text, RFC1123_NUMERIC) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Some(dt) = parse_rfc1123_named(text) {
        return Some(dt);
    }

    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_rfc1123_named(text: &str) -> Option<DateTime<Utc>> {
    let (local, zone) = text.rsplit_once(' ')?;
    let offset = zone_offset(zone)?;
    let naive = NaiveDateTime::parse_from_str(local, RFC1123_LOCAL).ok()?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Offset for a zone name. Unknown alphabetic names are read as UTC.
fn zone_offset(zone: &str) -> Option<FixedOffset> {
    let hours = match zone {
        "GMT" | "UTC" | "UT" | "Z" => 0,
        "EST" => -5,
        "EDT" => -4,
        "CST" => -6,
        "CDT" => -5,
        "MST" => -7,
        "MDT" => -6,
        "PST" => -8,
        "PDT" => -7,
        other if !other.is_empty() && other.chars().all(|c| c.is_ascii_alphabetic()) => 0,
        _ => return None,
    };
    FixedOffset::east_opt(hours * 3600)
}
