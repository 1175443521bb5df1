//! Per-platform fetchers.

mod cashapp;
mod instagram;
mod onlyfans;
mod pinterest;
mod roblox;
mod snapchat;
mod telegram;
mod threads;
mod tiktok;
mod twitter;
mod valorant;

pub use cashapp::{CashappProfile, CashappUser};
pub use instagram::{
    HighlightEntry, HighlightIndex, InstagramHighlight, InstagramHighlights, InstagramPost,
    InstagramProfile, InstagramProfileFetcher, InstagramStory, ProfilePost,
};
pub use onlyfans::{OnlyFansProfile, OnlyFansUser};
pub use pinterest::{
    PinMedia, PinterestPost, PinterestPostFetcher, PinterestProfile, PinterestReverse,
    PinterestUser, ReverseMatch, ReverseResult, pin_id, pin_url,
};
pub use roblox::{Badge, RobloxProfile, RobloxUser};
pub use snapchat::{SnapMedia, SnapProfile, SnapchatUser};
pub use telegram::{TelegramProfile, TelegramUser};
pub use threads::{ThreadsPost, fetch_thread};
pub use tiktok::{
    TikTokAuthor, TikTokPost, TikTokProfile, TikTokProfileFetcher, TikTokRecent, TikTokTop,
    TikTokVideo, TopVideoItem, TopVideoResults, aweme_pair, feed_url, fetch_post,
};
pub use twitter::{Tweet, Tweets, TwitterProfile, TwitterUser, full_size_avatar};
pub use valorant::{RiotAccount, Stat, ValorantProfile, ValorantStats, riot_id};

use crate::Fetcher;
use std::sync::Arc;

/// Every built-in fetcher.
pub fn all() -> Vec<Arc<dyn Fetcher>> {
    vec![
        Arc::new(InstagramPost),
        Arc::new(InstagramProfileFetcher),
        Arc::new(InstagramStory),
        Arc::new(InstagramHighlights),
        Arc::new(InstagramHighlight),
        Arc::new(ThreadsPost),
        Arc::new(TikTokPost),
        Arc::new(TikTokProfileFetcher),
        Arc::new(TikTokRecent),
        Arc::new(TikTokTop),
        Arc::new(PinterestPostFetcher),
        Arc::new(PinterestUser),
        Arc::new(PinterestReverse),
        Arc::new(TwitterUser),
        Arc::new(SnapchatUser),
        Arc::new(RobloxUser),
        Arc::new(ValorantStats),
        Arc::new(OnlyFansUser),
        Arc::new(TelegramUser),
        Arc::new(CashappUser),
    ]
}
