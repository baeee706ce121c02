//! Subject naming and matching
//!
//! Subjects are dot-separated tokens rooted at [`SUBJECT_ROOT`]. Filters use
//! NATS wildcards: `*` matches exactly one token, `>` matches one or more
//! trailing tokens.
//!
//! The [`SubjectScheme`] decides how an event maps to a subject on the publish
//! side and which filter a destination's cursor uses on the consume side, so the
//! two always agree.

use crate::event::WebhookEvent;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Root token of every subject
pub const SUBJECT_ROOT: &str = "NETBOX";

/// Region token used when an event carries no usable site slug
pub const UNKNOWN_REGION: &str = "unknown";

/// Derives a region from a site slug
pub trait RegionStrategy: Send + Sync {
    /// Region for the given site slug (may be empty)
    fn region(&self, site_slug: &str) -> String;
}

/// Drops the trailing character of the slug: `eu1` becomes `eu`
///
/// Slugs of one character or less are returned unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct StripTrailingChar;

impl RegionStrategy for StripTrailingChar {
    fn region(&self, site_slug: &str) -> String {
        let mut chars = site_slug.chars();
        match (chars.next_back(), chars.as_str()) {
            (Some(_), rest) if !rest.is_empty() => rest.to_string(),
            _ => site_slug.to_string(),
        }
    }
}

/// Uses the whole slug as the region
#[derive(Debug, Default, Clone, Copy)]
pub struct WholeSlug;

impl RegionStrategy for WholeSlug {
    fn region(&self, site_slug: &str) -> String {
        site_slug.to_string()
    }
}

/// How events are laid out across subjects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubjectScheme {
    /// `NETBOX.<model>`
    #[default]
    Object,
    /// `NETBOX.<model>.<event>`
    ObjectKind,
    /// `NETBOX.<region>.<model>`
    Region,
}

impl SubjectScheme {
    /// Subjects the backing stream must accept
    pub fn stream_subjects(&self) -> Vec<String> {
        match self {
            SubjectScheme::Object => vec![format!("{SUBJECT_ROOT}.*")],
            SubjectScheme::ObjectKind | SubjectScheme::Region => {
                vec![format!("{SUBJECT_ROOT}.*.*")]
            }
        }
    }

    /// Subject an event is published on
    pub fn publish_subject(&self, event: &WebhookEvent, regions: &dyn RegionStrategy) -> String {
        let model = token(&event.model);
        match self {
            SubjectScheme::Object => format!("{SUBJECT_ROOT}.{model}"),
            SubjectScheme::ObjectKind => format!("{SUBJECT_ROOT}.{model}.{}", token(&event.event)),
            SubjectScheme::Region => {
                let region = event
                    .site_slug()
                    .map(|slug| regions.region(slug))
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| UNKNOWN_REGION.to_string());
                format!("{SUBJECT_ROOT}.{}.{model}", token(&region))
            }
        }
    }

    /// Filter a destination cursor uses for one watched object type
    ///
    /// Under [`SubjectScheme::Region`] a destination without a region sees
    /// every region.
    pub fn filter_subject(&self, object_type: &str, region: Option<&str>) -> String {
        let model = token(object_type);
        match self {
            SubjectScheme::Object => format!("{SUBJECT_ROOT}.{model}"),
            SubjectScheme::ObjectKind => format!("{SUBJECT_ROOT}.{model}.*"),
            SubjectScheme::Region => match region {
                Some(region) => format!("{SUBJECT_ROOT}.{}.{model}", token(region)),
                None => format!("{SUBJECT_ROOT}.*.{model}"),
            },
        }
    }
}

impl FromStr for SubjectScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "object" => Ok(SubjectScheme::Object),
            "object-kind" => Ok(SubjectScheme::ObjectKind),
            "region" => Ok(SubjectScheme::Region),
            other => Err(format!(
                "unknown subject scheme '{other}' (expected 'object', 'object-kind' or 'region')"
            )),
        }
    }
}

impl fmt::Display for SubjectScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubjectScheme::Object => "object",
            SubjectScheme::ObjectKind => "object-kind",
            SubjectScheme::Region => "region",
        };
        f.write_str(name)
    }
}

/// Durable cursor name for a destination and object type
pub fn durable_name(destination: &str, object_type: &str) -> String {
    format!("{}-{}", token(destination), token(object_type))
}

/// Make a raw string safe to use as a single subject token or durable name
pub fn token(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Whether `subject` matches the wildcard `pattern`
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Whether two wildcard patterns can match a common subject
pub fn overlaps(a: &str, b: &str) -> bool {
    let mut a_tokens = a.split('.');
    let mut b_tokens = b.split('.');

    loop {
        match (a_tokens.next(), b_tokens.next()) {
            (Some(">"), Some(_)) | (Some(_), Some(">")) => return true,
            (Some("*"), Some(_)) | (Some(_), Some("*")) => {}
            (Some(x), Some(y)) if x == y => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Whether a subject or pattern is well formed
pub fn is_valid(subject: &str) -> bool {
    let tokens: Vec<&str> = subject.split('.').collect();
    tokens.iter().enumerate().all(|(i, t)| {
        !t.is_empty()
            && !t.chars().any(char::is_whitespace)
            && (*t != ">" || i == tokens.len() - 1)
            && (t.len() == 1 || !t.contains(['*', '>']))
    })
}
