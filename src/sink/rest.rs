//! REST object-storage and table sink (Supabase-compatible endpoints).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use url::Url;

use crate::sink::{DetectionRecord, ResultSink};

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RestSinkConfig {
    /// Project base URL, e.g. `https://project.supabase.co`.
    pub url: String,
    /// API key sent as both `apikey` and bearer token.
    pub key: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_bucket() -> String {
    "detections".to_string()
}

fn default_table() -> String {
    "detections".to_string()
}

pub struct RestSink {
    base: Url,
    key: String,
    bucket: String,
    table: String,
    agent: ureq::Agent,
}

impl RestSink {
    pub fn new(config: &RestSinkConfig) -> Result<Self> {
        let mut base = Url::parse(&config.url).context("parse sink url")?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(anyhow!("sink url must be http(s), got '{}'", base.scheme()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Ok(Self {
            base,
            key: config.key.clone(),
            bucket: config.bucket.clone(),
            table: config.table.clone(),
            agent,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("build sink endpoint {}", path))
    }

    /// Public URL of an uploaded object.
    pub fn public_url(&self, name: &str) -> Result<String> {
        Ok(self
            .endpoint(&format!("storage/v1/object/public/{}/{}", self.bucket, name))?
            .to_string())
    }
}

impl ResultSink for RestSink {
    fn name(&self) -> &'static str {
        "rest"
    }

    fn upload_image(&self, name: &str, jpeg: &[u8]) -> Result<String> {
        let url = self.endpoint(&format!("storage/v1/object/{}/{}", self.bucket, name))?;
        self.agent
            .post(url.as_str())
            .set("apikey", &self.key)
            .set("Authorization", &format!("Bearer {}", self.key))
            .set("Content-Type", "image/jpeg")
            .set("x-upsert", "true")
            .send_bytes(jpeg)
            .with_context(|| format!("upload {} to bucket {}", name, self.bucket))?;
        self.public_url(name)
    }

    fn record_detection(&self, record: &DetectionRecord) -> Result<()> {
        let url = self.endpoint(&format!("rest/v1/{}", self.table))?;
        let body = serde_json::to_string(record)?;
        self.agent
            .post(url.as_str())
            .set("apikey", &self.key)
            .set("Authorization", &format!("Bearer {}", self.key))
            .set("Content-Type", "application/json")
            .set("Prefer", "return=minimal")
            .send_string(&body)
            .with_context(|| format!("insert detection into {}", self.table))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> RestSinkConfig {
        RestSinkConfig {
            url: url.to_string(),
            key: "anon".to_string(),
            bucket: default_bucket(),
            table: default_table(),
        }
    }

    #[test]
    fn public_url_layout() -> Result<()> {
        let sink = RestSink::new(&config("https://example.supabase.co"))?;
        assert_eq!(
            sink.public_url("abc.jpg")?,
            "https://example.supabase.co/storage/v1/object/public/detections/abc.jpg"
        );
        Ok(())
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(RestSink::new(&config("ftp://example.com")).is_err());
    }
}
