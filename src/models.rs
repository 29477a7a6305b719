use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Catalog quality tier. Tiers this build does not know are kept verbatim in
/// `Other` so stored records round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum AudioQuality {
    Low,
    High,
    #[default]
    Lossless,
    HiRes,
    HiResLossless,
    Other(String),
}

impl AudioQuality {
    pub fn as_str(&self) -> &str {
        match self {
            AudioQuality::Low => "LOW",
            AudioQuality::High => "HIGH",
            AudioQuality::Lossless => "LOSSLESS",
            AudioQuality::HiRes => "HI_RES",
            AudioQuality::HiResLossless => "HI_RES_LOSSLESS",
            AudioQuality::Other(tier) => tier,
        }
    }

    /// Known tiers only.
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "LOW" => Some(AudioQuality::Low),
            "HIGH" => Some(AudioQuality::High),
            "LOSSLESS" => Some(AudioQuality::Lossless),
            "HI_RES" => Some(AudioQuality::HiRes),
            "HI_RES_LOSSLESS" => Some(AudioQuality::HiResLossless),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> Self {
        Self::from_str(value).unwrap_or_else(|| AudioQuality::Other(value.to_string()))
    }

    /// Lossless and hi-res tiers.
    pub fn is_premium(&self) -> bool {
        matches!(
            self,
            AudioQuality::Lossless | AudioQuality::HiRes | AudioQuality::HiResLossless
        )
    }

    /// Nominal bitrate in kbps, when the tier is known.
    pub fn bitrate_kbps(&self) -> Option<u32> {
        match self {
            AudioQuality::Low => Some(96),
            AudioQuality::High => Some(320),
            AudioQuality::Other(_) => None,
            _ => Some(1411),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            AudioQuality::HiRes | AudioQuality::HiResLossless => "HI-RES",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AudioQuality {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AudioQuality {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(AudioQuality::parse(&raw))
    }
}

/// Reads `null` as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub artist_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Artist {
    fn non_empty_name(&self) -> Option<&str> {
        Some(self.name.as_str()).filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumRef {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Catalog track metadata. Fields the core does not know about are kept in
/// `extra` so the record round-trips untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<Artist>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artists: Vec<Artist>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<AlbumRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_quality: Option<AudioQuality>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Track {
    pub fn new(id: u64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            version: None,
            duration: None,
            artist: None,
            artists: Vec::new(),
            album: None,
            audio_quality: None,
            extra: Map::new(),
        }
    }

    /// Title with the version suffix, e.g. `Echo (Live)`.
    pub fn display_title(&self) -> String {
        match self.version.as_deref().map(str::trim) {
            Some(version) if !version.is_empty() => format!("{} ({version})", self.title),
            _ => self.title.clone(),
        }
    }

    /// Single explicit artist, then the first `MAIN` artist, then the first
    /// listed artist. Empty names count as missing.
    pub fn primary_artist(&self) -> Option<&str> {
        self.artist
            .as_ref()
            .and_then(Artist::non_empty_name)
            .or_else(|| {
                self.artists
                    .iter()
                    .find(|artist| artist.artist_type.as_deref() == Some("MAIN"))
                    .and_then(Artist::non_empty_name)
            })
            .or_else(|| self.artists.first().and_then(Artist::non_empty_name))
    }

    pub fn artist_names(&self) -> String {
        if self.artists.is_empty() {
            return self
                .artist
                .as_ref()
                .map(|artist| artist.name.clone())
                .unwrap_or_default();
        }
        self.artists
            .iter()
            .map(|artist| artist.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn quality_or_default(&self) -> AudioQuality {
        self.audio_quality.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<Artist>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artists: Vec<Artist>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Album {
    pub fn new(id: u64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            cover: None,
            artist: None,
            artists: Vec::new(),
            release_date: None,
            extra: Map::new(),
        }
    }
}
