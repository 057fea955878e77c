use std::collections::BTreeMap;

use serde::Serialize;

/// Per-job option map passed to `aria2.addUri`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AddUriOptions(BTreeMap<String, String>);

impl AddUriOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Requests a specific job id: 16 hex characters, unique on the daemon.
    pub fn gid<S: Into<String>>(self, gid: S) -> Self {
        self.set("gid", gid)
    }

    pub fn dir<S: Into<String>>(self, dir: S) -> Self {
        self.set("dir", dir)
    }

    pub fn http_proxy<S: Into<String>>(self, proxy: Option<S>) -> Self {
        match proxy {
            Some(proxy) => self.set("http-proxy", proxy),
            None => self,
        }
    }

    pub fn seed_time(self, minutes: u32) -> Self {
        self.set("seed-time", minutes.to_string())
    }

    pub fn bt_tracker<S: Into<String>>(self, trackers: S) -> Self {
        self.set("bt-tracker", trackers)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}
