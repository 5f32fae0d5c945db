//! Core data types for imgsrv documents.
//!
//! Every source and every derivative artifact has a JSON sidecar describing
//! it. These types are that sidecar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pixel and file properties of an encoded image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Image width in pixels
    pub width: u32,

    /// Image height in pixels
    pub height: u32,

    /// Number of colour channels (1-4)
    pub channels: u8,

    /// Pixels per inch, if the file records it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub density: Option<u32>,

    /// Encoded size in bytes
    pub size: u64,

    /// MIME type, e.g. `image/jpeg`
    pub mimetype: String,

    /// Format name ("jpeg", "png", "webp", ...)
    pub format: String,
}

/// When the document was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Created {
    pub datetime: DateTime<Utc>,
}

impl Created {
    pub fn now() -> Self {
        Self {
            datetime: Utc::now(),
        }
    }
}

/// A hypermedia link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
}

impl Link {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    #[serde(rename = "self")]
    pub self_: Link,

    /// The source a derivative was computed from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Link>,

    /// The URL a source was fetched from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Link>,
}

/// The JSON document stored next to every source and artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDocument {
    pub metadata: ImageMetadata,

    pub created: Created,

    #[serde(rename = "_links")]
    pub links: Links,

    /// Free-form client data attached to a source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userdata: Option<serde_json::Value>,
}
