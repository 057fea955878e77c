use serde::{Deserialize, Deserializer};

/// Response of `aria2.tellStatus`.
///
/// aria2 encodes every integer as a string, the numeric fields are parsed on
/// the way in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub gid: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "u64_from_str")]
    pub total_length: u64,
    #[serde(default, deserialize_with = "u64_from_str")]
    pub completed_length: u64,
    #[serde(default, deserialize_with = "u64_from_str")]
    pub download_speed: u64,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Gid of the job this one was spawned from (metadata phase of a torrent).
    #[serde(default)]
    pub following: Option<String>,
    /// Gids of the jobs spawned by this one.
    #[serde(default)]
    pub followed_by: Vec<String>,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub files: Vec<File>,
}

impl Status {
    /// A completion is final unless it only fetched metadata for a follow-up
    /// job.
    pub fn is_final_completion(&self) -> bool {
        self.following.is_some() || self.followed_by.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    #[serde(default, deserialize_with = "u64_from_str")]
    pub index: u64,
    pub path: String,
    #[serde(default, deserialize_with = "u64_from_str")]
    pub length: u64,
    #[serde(default, deserialize_with = "u64_from_str")]
    pub completed_length: u64,
    #[serde(default, deserialize_with = "bool_from_str")]
    pub selected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub version: String,
    #[serde(default)]
    pub enabled_features: Vec<String>,
}

fn u64_from_str<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Str(s) if s.is_empty() => Ok(0),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        Raw::Num(n) => Ok(n),
    }
}

fn bool_from_str<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Bool(bool),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Str(s) => Ok(s == "true"),
        Raw::Bool(b) => Ok(b),
    }
}
