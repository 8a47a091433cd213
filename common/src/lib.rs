#![warn(clippy::nursery, clippy::pedantic)]

//! Contains common functions and structures used by the server and the CLI

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
pub use url::Url;

pub const PASTES_ENDPOINT: &str = "/api/pastes";
pub const HEALTH_ENDPOINT: &str = "/api/healthz";

/// Path prefix of the human facing link handed out on creation.
pub const VIEW_PREFIX: &str = "/p/";

/// Milliseconds since the Unix epoch.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns `None` on overflow.
    #[must_use]
    pub fn checked_add_secs(self, secs: i64) -> Option<Self> {
        secs.checked_mul(1000)
            .and_then(|millis| self.0.checked_add(millis))
            .map(Self)
    }

    /// Returns `None` if the timestamp is outside of the range chrono can
    /// represent.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(time: DateTime<Utc>) -> Self {
        Self(time.timestamp_millis())
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime() {
            Some(time) => write!(f, "{}", time.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Body of a `POST` to [`PASTES_ENDPOINT`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CreatePaste {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_views: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PasteCreated {
    pub id: String,
    pub url: String,
}

/// A successful view of a paste.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PasteView {
    pub content: String,
    pub remaining_views: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PasteView {
    /// Human readable description of how much longer the paste lives.
    #[must_use]
    pub fn lifetime(&self) -> String {
        let time = self.expires_at.map(|time| {
            time.format("expires on %A, %B %-d, %Y at %T %Z")
                .to_string()
        });
        let views = self.remaining_views.map(|views| match views {
            0 => "has no views left".to_string(),
            1 => "has 1 view left".to_string(),
            n => format!("has {} views left", n),
        });

        match (time, views) {
            (None, None) => "This paste will not expire.".to_string(),
            (Some(time), None) => format!("This paste {}.", time),
            (None, Some(views)) => format!("This paste {}.", views),
            (Some(time), Some(views)) => format!("This paste {} and {}.", views, time),
        }
    }
}

/// Why a paste could not be viewed. The `reason` tag is what clients branch
/// on.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Denied {
    NotFound,
    Expired { expired_at: DateTime<Utc> },
    #[serde(rename = "view_limit")]
    ViewLimitExceeded { max_views: u32 },
}

impl Denied {
    #[must_use]
    pub const fn summary(&self) -> &'static str {
        match self {
            Self::NotFound => "Not found",
            Self::Expired { .. } => "Expired",
            Self::ViewLimitExceeded { .. } => "View limit exceeded",
        }
    }
}

impl Display for Denied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "This paste does not exist."),
            Self::Expired { expired_at } => write!(
                f,
                "{}",
                expired_at.format("This paste expired on %A, %B %-d, %Y at %T %Z.")
            ),
            Self::ViewLimitExceeded { max_views: 1 } => {
                write!(f, "This paste has already been read.")
            }
            Self::ViewLimitExceeded { max_views } => {
                write!(f, "This paste has already been read {} times.", max_views)
            }
        }
    }
}

/// Body of a `404` from the paste endpoint.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeniedBody {
    pub error: String,
    #[serde(flatten)]
    pub denied: Denied,
}

impl From<Denied> for DeniedBody {
    fn from(denied: Denied) -> Self {
        Self {
            error: denied.summary().to_string(),
            denied,
        }
    }
}

/// Body of any other error response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Health {
    pub ok: bool,
}

/// A link to a paste, split into the instance it lives on and its id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasteUrl {
    pub instance: Url,
    pub id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParsePasteUrlError {
    #[error("The provided url was bad")]
    BadUrl,
    #[error("The url does not point at a paste")]
    NotAPaste,
}

impl PasteUrl {
    /// The API endpoint that serves this paste.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance url cannot be a base url, which
    /// cannot happen for urls produced by [`FromStr`].
    pub fn api_url(&self) -> Result<Url, url::ParseError> {
        self.instance
            .join(&format!("{}/{}", PASTES_ENDPOINT, self.id))
    }
}

impl FromStr for PasteUrl {
    type Err = ParsePasteUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut url = Url::from_str(s).map_err(|_| ParsePasteUrlError::BadUrl)?;
        if url.cannot_be_a_base() {
            return Err(ParsePasteUrlError::BadUrl);
        }

        let id = url
            .path()
            .strip_prefix(VIEW_PREFIX)
            .or_else(|| {
                url.path()
                    .strip_prefix(PASTES_ENDPOINT)
                    .and_then(|rest| rest.strip_prefix('/'))
            })
            .map(|id| id.trim_end_matches('/'))
            .filter(|id| !id.is_empty() && !id.contains('/'))
            .ok_or(ParsePasteUrlError::NotAPaste)?
            .to_string();

        url.set_path("/");
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self { instance: url, id })
    }
}
