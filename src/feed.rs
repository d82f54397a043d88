//! Renders a channel's recent-package feed as `rss.xml`.
//!
//! Grounded in `original_source/rss.py`. Invoked by the scheduler agent
//! after a successful install (spec.md §4.2a).

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rss::{ChannelBuilder, GuidBuilder, ItemBuilder, SourceBuilder};
use serde_json::Value;

use crate::error::{Error, Result};

/// One package entry pulled out of a channel document's `packages` or
/// `packages.conda` map, paired with its name.
struct Package<'a> {
    name: &'a str,
    details: &'a Value,
}

fn timestamp_of(details: &Value) -> Option<i64> {
    details
        .get("timestamp")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
}

/// All packages across both maps, filtered by `threshold_days` and sorted
/// newest-first. A negative `threshold_days` disables the filter entirely
/// (spec.md §4.2a, `channel_config.py::get_days_old`'s `-1` default).
fn recent_packages<'a>(channeldata: &'a Value, threshold_days: i64) -> Vec<Package<'a>> {
    let threshold = if threshold_days < 0 {
        None
    } else {
        Some(Utc::now().timestamp() - threshold_days * 24 * 60 * 60)
    };

    let mut packages: Vec<Package<'a>> = ["packages", "packages.conda"]
        .iter()
        .filter_map(|key| channeldata.get(key))
        .filter_map(Value::as_object)
        .flat_map(|map| {
            map.iter().map(|(name, details)| Package { name, details })
        })
        .filter(|pkg| match threshold {
            None => true,
            Some(threshold) => timestamp_of(pkg.details).unwrap_or(threshold) > threshold,
        })
        .collect();

    packages.sort_by_key(|pkg| std::cmp::Reverse(timestamp_of(pkg.details).unwrap_or(0)));
    packages
}

fn str_field<'a>(details: &'a Value, field: &str) -> Option<&'a str> {
    details.get(field).and_then(Value::as_str)
}

fn rfc822(timestamp: Option<i64>) -> Option<String> {
    let ts = timestamp?;
    DateTime::<Utc>::from_timestamp(ts, 0).map(|dt| dt.to_rfc2822())
}

fn item_title(pkg: &Package) -> String {
    let version = str_field(pkg.details, "version").unwrap_or("0");
    let mut subdirs: BTreeSet<&str> = BTreeSet::new();
    if let Some(values) = pkg.details.get("subdirs").and_then(Value::as_array) {
        subdirs.extend(values.iter().filter_map(Value::as_str));
    }
    let subdirs = subdirs.into_iter().collect::<Vec<_>>().join(", ");
    format!("{} {} [{}]", pkg.name, version, subdirs)
}

fn build_item(pkg: &Package) -> rss::Item {
    let description = str_field(pkg.details, "description")
        .or_else(|| str_field(pkg.details, "summary"))
        .map(str::to_string);
    let link = str_field(pkg.details, "doc_url").map(str::to_string);
    let comments = str_field(pkg.details, "dev_url").map(str::to_string);
    let guid = str_field(pkg.details, "source_url").map(|url| {
        GuidBuilder::default()
            .value(url.to_string())
            .permalink(false)
            .build()
    });
    let source = str_field(pkg.details, "home").map(|url| {
        SourceBuilder::default().url(url.to_string()).build()
    });

    ItemBuilder::default()
        .title(Some(item_title(pkg)))
        .description(description)
        .link(link)
        .comments(comments)
        .guid(guid)
        .pub_date(rfc822(timestamp_of(pkg.details)))
        .source(source)
        .build()
}

/// Build the `rss.xml` document for `channel` from a parsed channel
/// document, with packages older than `threshold_days` excluded.
fn build_channel(channel: &str, channeldata: &Value, threshold_days: i64) -> rss::Channel {
    let packages = recent_packages(channeldata, threshold_days);
    let now = Utc::now().to_rfc2822();

    let items: Vec<rss::Item> = packages.iter().map(build_item).collect();

    ChannelBuilder::default()
        .title(format!("conda-static.anaconda.org/{channel}"))
        .link(format!("https://conda.anaconda.org/{channel}"))
        .description(format!(
            "An anaconda.org community with {} package updates in the past {} days.",
            items.len(),
            threshold_days
        ))
        .pub_date(Some(now.clone()))
        .last_build_date(Some(now))
        .items(items)
        .build()
}

/// Read `channeldata_path`, render its recent-package feed, and write
/// `rss.xml` beside it. Matches `original_source/cli.py::update_callback`'s
/// sibling-path convention. `beautify` selects pretty-printed (indented)
/// versus compact XML output, mirroring `--beautify` on the CLI.
pub async fn render(channel: &str, channeldata_path: &str, threshold_days: i64, beautify: bool) -> Result<()> {
    let contents = tokio::fs::read_to_string(channeldata_path).await?;
    let channeldata: Value =
        serde_json::from_str(&contents).map_err(|e| Error::Config {
            message: format!("failed to parse {channeldata_path}: {e}"),
        })?;

    let channel_xml = build_channel(channel, &channeldata, threshold_days);

    let rss_path = Path::new(channeldata_path)
        .parent()
        .map(|dir| dir.join("rss.xml"))
        .ok_or_else(|| Error::Config {
            message: format!("{channeldata_path} has no parent directory"),
        })?;

    let mut buf = Vec::new();
    let write_result = if beautify {
        channel_xml.pretty_write_to(&mut buf, b' ', 4)
    } else {
        channel_xml.write_to(&mut buf)
    };
    write_result.map_err(|e| Error::Config {
        message: format!("failed to render rss.xml for {channel}: {e}"),
    })?;
    tokio::fs::write(rss_path, buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_channeldata() -> Value {
        json!({
            "packages": {
                "sevenzip-19.00-win64.tar.bz2": {
                    "version": "19.00",
                    "subdirs": ["win-64", "osx-64"],
                    "description": "A file archiver",
                    "doc_url": "https://7-zip.org/docs",
                    "dev_url": "https://7-zip.org/dev",
                    "source_url": "https://7-zip.org/download",
                    "home": "https://7-zip.org",
                    "timestamp": Utc::now().timestamp()
                },
                "oldpkg-1.0.tar.bz2": {
                    "version": "1.0",
                    "subdirs": ["linux-64"],
                    "summary": "stale package",
                    "timestamp": Utc::now().timestamp() - 400 * 24 * 60 * 60
                }
            },
            "packages.conda": {}
        })
    }

    #[test]
    fn filters_by_freshness_threshold() {
        let channeldata = sample_channeldata();
        let recent = recent_packages(&channeldata, 30);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].name, "sevenzip-19.00-win64.tar.bz2");
    }

    #[test]
    fn negative_threshold_disables_filter() {
        let channeldata = sample_channeldata();
        let recent = recent_packages(&channeldata, -1);
        assert_eq!(recent.len(), 2);
    }

    #[test]
    fn item_title_joins_sorted_deduped_subdirs() {
        let channeldata = sample_channeldata();
        let pkg = &recent_packages(&channeldata, -1)
            .into_iter()
            .find(|p| p.name.starts_with("sevenzip"))
            .unwrap();
        assert_eq!(item_title(pkg), "sevenzip-19.00-win64.tar.bz2 19.00 [osx-64, win-64]");
    }

    #[test]
    fn description_falls_back_to_summary() {
        let channeldata = sample_channeldata();
        let pkg = recent_packages(&channeldata, -1)
            .into_iter()
            .find(|p| p.name.starts_with("oldpkg"))
            .unwrap();
        let item = build_item(&pkg);
        assert_eq!(item.description.as_deref(), Some("stale package"));
        assert!(item.link.is_none());
    }

    #[tokio::test]
    async fn render_writes_rss_xml_beside_channeldata() {
        let dir = tempfile::tempdir().unwrap();
        let channeldata_path = dir.path().join("channeldata.json");
        tokio::fs::write(&channeldata_path, sample_channeldata().to_string())
            .await
            .unwrap();

        render("demo", channeldata_path.to_str().unwrap(), 30, true)
            .await
            .unwrap();

        let rss_xml = tokio::fs::read_to_string(dir.path().join("rss.xml"))
            .await
            .unwrap();
        assert!(rss_xml.contains("sevenzip-19.00-win64.tar.bz2"));
        assert!(!rss_xml.contains("oldpkg"));
    }

    #[tokio::test]
    async fn beautify_false_writes_compact_xml() {
        let dir = tempfile::tempdir().unwrap();
        let channeldata_path = dir.path().join("channeldata.json");
        tokio::fs::write(&channeldata_path, sample_channeldata().to_string())
            .await
            .unwrap();

        render("demo", channeldata_path.to_str().unwrap(), 30, false)
            .await
            .unwrap();

        let rss_xml = tokio::fs::read_to_string(dir.path().join("rss.xml"))
            .await
            .unwrap();
        assert!(!rss_xml.contains("\n    "), "compact output should not be indented");
    }
}
