//! Render pipeline configuration.

use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the render pipeline.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_")]
pub struct RenderConfig {
    /// Deadline for an image render (seconds)
    #[serde(default = "default_image_timeout_secs")]
    #[builder(default = "default_image_timeout_secs()")]
    image_timeout_secs: u64,

    /// Deadline for a video or audio render (seconds)
    #[serde(default = "default_video_timeout_secs")]
    #[builder(default = "default_video_timeout_secs()")]
    video_timeout_secs: u64,

    /// ffmpeg binary; remuxing and tagging are skipped without it
    #[serde(default)]
    #[builder(default)]
    ffmpeg_path: Option<PathBuf>,

    /// Concurrent ffmpeg processes
    #[serde(default = "default_ffmpeg_concurrency")]
    #[builder(default = "default_ffmpeg_concurrency()")]
    ffmpeg_concurrency: usize,

    /// Concurrent renders
    #[serde(default = "default_render_concurrency")]
    #[builder(default = "default_render_concurrency()")]
    render_concurrency: usize,

    /// How long a failed render is remembered (seconds)
    #[serde(default = "default_negative_ttl_secs")]
    #[builder(default = "default_negative_ttl_secs()")]
    negative_ttl_secs: u64,

    /// How long a passive render's source URL is kept (seconds)
    #[serde(default = "default_passive_url_ttl_secs")]
    #[builder(default = "default_passive_url_ttl_secs()")]
    passive_url_ttl_secs: u64,
}

fn default_image_timeout_secs() -> u64 {
    30
}

fn default_video_timeout_secs() -> u64 {
    90
}

fn default_ffmpeg_concurrency() -> usize {
    4
}

fn default_render_concurrency() -> usize {
    34
}

fn default_negative_ttl_secs() -> u64 {
    300
}

fn default_passive_url_ttl_secs() -> u64 {
    86_400
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            image_timeout_secs: default_image_timeout_secs(),
            video_timeout_secs: default_video_timeout_secs(),
            ffmpeg_path: None,
            ffmpeg_concurrency: default_ffmpeg_concurrency(),
            render_concurrency: default_render_concurrency(),
            negative_ttl_secs: default_negative_ttl_secs(),
            passive_url_ttl_secs: default_passive_url_ttl_secs(),
        }
    }
}

impl RenderConfig {
    /// Negative entry TTL.
    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }

    /// Passive URL TTL.
    pub fn passive_url_ttl(&self) -> Duration {
        Duration::from_secs(self.passive_url_ttl_secs)
    }
}
