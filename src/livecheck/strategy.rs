// src/livecheck/strategy.rs

//! Version extraction strategies

use crate::error::{Error, Result};
use crate::version::Version;
use fancy_regex::Regex;
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// Pattern used on release tags when the recipe gives none
pub const DEFAULT_TAG_REGEX: &str = r"v?(\d+(?:\.\d+)+)";

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::LivecheckError(format!("invalid pattern /{}/: {}", pattern, e)))
}

/// Every version `regex` finds in `text`, minus those an `exclude`
/// pattern matches
///
/// The first capture group is the version; a pattern without groups
/// uses the whole match. Candidates that do not parse as versions are
/// skipped.
pub fn page_match(text: &str, regex: &str, exclude: &[String]) -> Result<Vec<Version>> {
    let re = compile(regex)?;
    let excludes = exclude
        .iter()
        .map(|p| compile(p))
        .collect::<Result<Vec<_>>>()?;

    let mut versions = Vec::new();
    for caps in re.captures_iter(text) {
        let caps = caps.map_err(|e| Error::LivecheckError(format!("pattern /{}/ failed: {}", regex, e)))?;
        let Some(m) = caps.get(1).or_else(|| caps.get(0)) else {
            continue;
        };
        let candidate = m.as_str();

        let mut excluded = false;
        for ex in &excludes {
            if ex
                .is_match(candidate)
                .map_err(|e| Error::LivecheckError(e.to_string()))?
            {
                excluded = true;
                break;
            }
        }
        if excluded {
            debug!("Excluded candidate {}", candidate);
            continue;
        }

        match Version::parse(candidate) {
            Ok(v) => versions.push(v),
            Err(_) => debug!("Ignoring non-version match {:?}", candidate),
        }
    }
    Ok(versions)
}

/// `(owner, repo)` of a GitHub URL
pub fn github_repo(url: &str) -> Result<(String, String)> {
    let parsed = Url::parse(url)
        .map_err(|e| Error::LivecheckError(format!("invalid URL {}: {}", url, e)))?;
    if !matches!(parsed.host_str(), Some("github.com") | Some("www.github.com")) {
        return Err(Error::LivecheckError(format!("{} is not a GitHub URL", url)));
    }
    let mut segments = parsed
        .path_segments()
        .ok_or_else(|| Error::LivecheckError(format!("{} has no repository path", url)))?
        .filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some(owner), Some(repo)) => Ok((
            owner.to_string(),
            repo.trim_end_matches(".git").to_string(),
        )),
        _ => Err(Error::LivecheckError(format!("{} has no owner/repo", url))),
    }
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
}

/// Version named by a GitHub "latest release" API response
pub fn github_latest(body: &[u8], regex: Option<&str>) -> Result<Option<Version>> {
    let release: Release = serde_json::from_slice(body)
        .map_err(|e| Error::LivecheckError(format!("unexpected releases API response: {}", e)))?;
    debug!("Latest release tag: {}", release.tag_name);
    let pattern = match regex {
        Some(r) => r,
        None => DEFAULT_TAG_REGEX,
    };
    Ok(page_match(&release.tag_name, pattern, &[])?.into_iter().max())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(versions: Vec<Version>) -> Vec<String> {
        versions.into_iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_page_match_listing() {
        let page = r#"<a href="item-1.2.3-src.tgz">item-1.2.3-src.tgz</a>
<a href="item-0.9.0-src.tgz">item-0.9.0-src.tgz</a>"#;
        let found = page_match(page, r"v?(\d+\.\d+\.\d+)", &[]).unwrap();
        assert_eq!(found.iter().max().unwrap().to_string(), "1.2.3");
    }

    #[test]
    fn test_lookahead_carves_out_old_scheme() {
        let page = r#"
<a href="include-what-you-use-0.20.src.tar.gz">
<a href="include-what-you-use-3.4.src.tar.gz">
<a href="include-what-you-use-0.19.src.tar.gz">
"#;
        let re = r"(?i)href=.*?include-what-you-use[._-]v?((?!3\.[345])\d+(?:\.\d+)+)[._-]src\.t";
        assert_eq!(strings(page_match(page, re, &[]).unwrap()), vec!["0.20", "0.19"]);
    }

    #[test]
    fn test_exclude_patterns() {
        let page = "pkg-2.0.tar.gz pkg-3.4.tar.gz pkg-1.9.tar.gz";
        let found = page_match(page, r"pkg-(\d+(?:\.\d+)+)\.tar", &[r"^3\.".to_string()]).unwrap();
        assert_eq!(strings(found), vec!["2.0", "1.9"]);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            page_match("x", "(unclosed", &[]),
            Err(Error::LivecheckError(_))
        ));
    }

    #[test]
    fn test_github_repo() {
        assert_eq!(
            github_repo("https://github.com/draios/sysdig/archive/refs/tags/0.29.3.tar.gz").unwrap(),
            ("draios".to_string(), "sysdig".to_string())
        );
        assert_eq!(
            github_repo("https://github.com/Roblox/luau.git").unwrap(),
            ("Roblox".to_string(), "luau".to_string())
        );
        assert!(github_repo("https://example.com/a/b").is_err());
    }

    #[test]
    fn test_github_latest_tag() {
        let body = br#"{"tag_name": "v0.30.1", "name": "Sysdig 0.30.1"}"#;
        assert_eq!(github_latest(body, None).unwrap().unwrap().to_string(), "0.30.1");
        let body = br#"{"tag_name": "nightly"}"#;
        assert!(github_latest(body, None).unwrap().is_none());
    }
}
