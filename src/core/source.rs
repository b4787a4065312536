//! 同步来源：书签 / 喜欢 / 个人推文，及其目标页面地址
//!
//! 喜欢与个人推文依赖用户名；用户名允许多种输入形式（`name`、`@name`、主页 URL）。

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::SyncError;

/// 采集来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncSource {
    #[default]
    Bookmarks,
    Likes,
    OwnTweets,
}

impl SyncSource {
    pub const ALL: [SyncSource; 3] = [SyncSource::Bookmarks, SyncSource::Likes, SyncSource::OwnTweets];

    /// 是否需要用户名才能定位目标页面
    pub fn requires_handle(self) -> bool {
        !matches!(self, SyncSource::Bookmarks)
    }

    /// 计算目标页面地址；需要用户名但解析为空时返回配置错误
    pub fn locator(self, raw_handle: &str) -> Result<String, SyncError> {
        let handle = parse_handle(raw_handle);
        if self.requires_handle() && handle.is_empty() {
            return Err(SyncError::Config(format!(
                "syncing {} requires an X handle in settings",
                self
            )));
        }
        Ok(match self {
            SyncSource::Bookmarks => "https://x.com/i/bookmarks".to_string(),
            SyncSource::Likes => format!("https://x.com/{}/likes", handle),
            SyncSource::OwnTweets => format!("https://x.com/{}", handle),
        })
    }
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncSource::Bookmarks => write!(f, "bookmarks"),
            SyncSource::Likes => write!(f, "likes"),
            SyncSource::OwnTweets => write!(f, "own_tweets"),
        }
    }
}

impl FromStr for SyncSource {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "bookmarks" => Ok(SyncSource::Bookmarks),
            "likes" => Ok(SyncSource::Likes),
            "own_tweets" | "tweets" => Ok(SyncSource::OwnTweets),
            other => Err(SyncError::Config(format!("unknown sync source: {}", other))),
        }
    }
}

fn url_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://(www\.)?(x|twitter)\.com/").expect("valid regex"))
}

/// 从多种输入形式中提取裸用户名：
/// "alice"、"@alice"、"https://x.com/alice"、"https://twitter.com/alice/likes"
pub fn parse_handle(raw: &str) -> String {
    let s = raw.trim();
    let s = url_prefix().replace(s, "");
    let s = s.split('/').next().unwrap_or("");
    s.strip_prefix('@').unwrap_or(s).to_string()
}

/// 根据页面地址判断其对应的来源（仅识别书签与喜欢页）
pub fn detect_source(url: &str) -> Option<SyncSource> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let (host, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let host = host.split(':').next()?.to_lowercase();
    if host != "x.com" && host != "twitter.com" {
        return None;
    }

    let path = path.split(['?', '#']).next().unwrap_or("/");
    if path == "/i/bookmarks" || path.starts_with("/i/bookmarks/") {
        return Some(SyncSource::Bookmarks);
    }
    if path.ends_with("/likes") {
        return Some(SyncSource::Likes);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_handle_variants() {
        assert_eq!(parse_handle("alice"), "alice");
        assert_eq!(parse_handle("  @alice "), "alice");
        assert_eq!(parse_handle("https://x.com/alice"), "alice");
        assert_eq!(parse_handle("https://www.twitter.com/alice/likes"), "alice");
        assert_eq!(parse_handle("http://x.com/@alice/with_replies"), "alice");
        assert_eq!(parse_handle(""), "");
    }

    #[test]
    fn test_locator_per_source() {
        assert_eq!(
            SyncSource::Bookmarks.locator("").unwrap(),
            "https://x.com/i/bookmarks"
        );
        assert_eq!(
            SyncSource::Likes.locator("@alice").unwrap(),
            "https://x.com/alice/likes"
        );
        assert_eq!(
            SyncSource::OwnTweets.locator("https://x.com/alice/likes").unwrap(),
            "https://x.com/alice"
        );
    }

    #[test]
    fn test_locator_requires_handle() {
        assert!(matches!(SyncSource::Likes.locator(""), Err(SyncError::Config(_))));
        let err = SyncSource::OwnTweets.locator("@").unwrap_err();
        assert!(err.to_string().contains("syncing own_tweets requires an X handle"));
        // 书签页不需要用户名
        assert!(SyncSource::Bookmarks.locator("").is_ok());
    }

    #[test]
    fn test_detect_source() {
        assert_eq!(detect_source("https://x.com/i/bookmarks"), Some(SyncSource::Bookmarks));
        assert_eq!(
            detect_source("https://twitter.com/i/bookmarks/123"),
            Some(SyncSource::Bookmarks)
        );
        assert_eq!(detect_source("https://x.com/alice/likes"), Some(SyncSource::Likes));
        assert_eq!(detect_source("https://x.com/alice"), None);
        assert_eq!(detect_source("https://example.com/i/bookmarks"), None);
        assert_eq!(detect_source("not a url"), None);
    }

    #[test]
    fn test_source_round_trip_through_str() {
        for source in SyncSource::ALL {
            assert_eq!(source.to_string().parse::<SyncSource>().unwrap(), source);
        }
        assert!("mentions".parse::<SyncSource>().is_err());
    }
}
