//! Valorant competitive stats from tracker.gg, joined with account data
//! from the henrikdev API.

use crate::FetchContext;
use crate::context::check_status;
use crate::embedded::initial_state;
use crate::fetcher::{FetchRequest, Fetcher, found};
use crate::http::HttpRequest;
use async_trait::async_trait;
use meridian_cache::{CachePolicy, FetchOutcome, Ttl};
use meridian_error::{FetchError, FetchErrorKind, MeridianResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const COMPETITIVE_SUFFIX: &str = "playlist||key:competitive,playlist:competitive";
const STATE_ATTEMPTS: usize = 3;

/// Riot account data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiotAccount {
    /// Persistent id
    pub puuid: String,
    /// Shard, e.g. `na`
    pub region: Option<String>,
    /// Account level
    pub account_level: Option<u64>,
    /// Riot name
    pub name: String,
    /// Riot tag
    pub tag: String,
    /// Last update as henrikdev reports it
    pub last_update_raw: Option<i64>,
}

/// A tracker.gg stat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    /// Display value, e.g. `1.12` or `Diamond 2`
    pub display_value: Option<String>,
    /// Raw value
    pub value: Option<f64>,
    /// Rank icon when the stat is a rank
    pub icon_url: Option<String>,
}

/// Profile as returned by `/api/valorant/{name}/{tag}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValorantProfile {
    /// Riot account
    pub account: RiotAccount,
    /// Highest rank reached
    pub peak_rank: Option<Stat>,
    /// Current rank
    pub rank: Option<Stat>,
    /// Kill/death ratio
    pub kd_ratio: Option<Stat>,
    /// Damage per round
    pub damage_per_round: Option<Stat>,
    /// Headshot percentage
    pub headshot_pct: Option<Stat>,
    /// Win percentage
    pub win_pct: Option<Stat>,
    /// Matches won
    pub matches_won: Option<Stat>,
    /// Matches played
    pub matches_played: Option<Stat>,
    /// Matches lost
    pub matches_lost: Option<Stat>,
    /// Kills
    pub kills: Option<Stat>,
    /// Deaths
    pub deaths: Option<Stat>,
}

#[derive(Debug, Deserialize)]
struct HenrikEnvelope {
    data: HenrikAccount,
}

#[derive(Debug, Deserialize)]
struct HenrikAccount {
    puuid: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    account_level: Option<u64>,
    name: String,
    tag: String,
    #[serde(default)]
    last_update_raw: Option<i64>,
}

/// Split `name#tag`, both parts required.
pub fn riot_id(raw: &str) -> MeridianResult<(String, String)> {
    let invalid = || FetchError::new(FetchErrorKind::Validation(format!("invalid Riot id {}", raw)));
    let (name, tag) = raw.trim().split_once('#').ok_or_else(invalid)?;
    let name_ok = (3..=16).contains(&name.chars().count());
    let tag_ok = (3..=5).contains(&tag.chars().count()) && tag.chars().all(char::is_alphanumeric);
    if !name_ok || !tag_ok {
        return Err(invalid().into());
    }
    Ok((name.to_string(), tag.to_string()))
}

fn field<'a>(value: &'a Value, camel: &str, snake: &str) -> Option<&'a Value> {
    value.get(camel).or_else(|| value.get(snake))
}

/// The competitive overview segment of a tracker.gg state document.
fn competitive_segment(state: &Value) -> Option<&Value> {
    let profiles = state
        .pointer("/stats/segments")
        .or_else(|| state.pointer("/stats/standardProfileSegments"))?;
    let Value::Object(map) = profiles else {
        return None;
    };
    let segments = map
        .iter()
        .find(|(key, _)| key.ends_with(COMPETITIVE_SUFFIX))?
        .1
        .as_array()?;
    segments
        .iter()
        .find(|s| s.get("type").and_then(Value::as_str) == Some("season"))
        .or_else(|| segments.first())
}

fn stat(stats: &Value, camel: &str, snake: &str) -> Option<Stat> {
    let raw = field(stats, camel, snake)?;
    Some(Stat {
        display_value: field(raw, "displayValue", "display_value")
            .and_then(Value::as_str)
            .map(String::from),
        value: raw.get("value").and_then(Value::as_f64),
        icon_url: raw
            .pointer("/metadata/iconUrl")
            .or_else(|| raw.pointer("/metadata/icon_url"))
            .and_then(Value::as_str)
            .map(String::from),
    })
}

fn build_profile(account: RiotAccount, segment: &Value) -> ValorantProfile {
    let stats = segment.get("stats").unwrap_or(&Value::Null);
    ValorantProfile {
        account,
        peak_rank: stat(stats, "peakRank", "peak_rank"),
        rank: stat(stats, "rank", "rank"),
        kd_ratio: stat(stats, "kDRatio", "k_d_ratio"),
        damage_per_round: stat(stats, "damagePerRound", "damage_per_round"),
        headshot_pct: stat(stats, "headshotsPercentage", "headshots_percentage"),
        win_pct: stat(stats, "matchesWinPct", "matches_win_pct"),
        matches_won: stat(stats, "matchesWon", "matches_won"),
        matches_played: stat(stats, "matchesPlayed", "matches_played"),
        matches_lost: stat(stats, "matchesLost", "matches_lost"),
        kills: stat(stats, "kills", "kills"),
        deaths: stat(stats, "deaths", "deaths"),
    }
}

/// `GET /api/valorant/{name}/{tag}`; the target is `name#tag`.
#[derive(Debug, Default)]
pub struct ValorantStats;

impl ValorantStats {
    async fn account(&self, cx: &FetchContext, name: &str, tag: &str) -> MeridianResult<Option<RiotAccount>> {
        let url = format!(
            "https://api.henrikdev.xyz/valorant/v1/account/{}/{}",
            urlencode(name),
            urlencode(tag)
        );
        let response = cx.send(HttpRequest::get(&url)).await?;
        if response.status == 404 {
            return Ok(None);
        }
        check_status(&url, &response)?;
        let envelope: HenrikEnvelope = response.json()?;
        let a = envelope.data;
        Ok(Some(RiotAccount {
            puuid: a.puuid,
            region: a.region,
            account_level: a.account_level,
            name: a.name,
            tag: a.tag,
            last_update_raw: a.last_update_raw,
        }))
    }

    async fn tracker_state(&self, cx: &FetchContext, name: &str, tag: &str) -> MeridianResult<Value> {
        let lease = cx.page(true).await?;
        lease
            .navigate(&format!(
                "https://tracker.gg/valorant/profile/riot/{}/overview?season=all",
                urlencode(&format!("{}#{}", name, tag))
            ))
            .await?;
        for attempt in 1..=STATE_ATTEMPTS {
            let state = lease.evaluate("window.__INITIAL_STATE__").await.unwrap_or(Value::Null);
            if !state.is_null() {
                return Ok(state);
            }
            tracing::debug!(attempt, "tracker.gg state not ready");
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        initial_state(&lease.content().await?)
    }
}

fn urlencode(raw: &str) -> String {
    raw.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            _ => format!("%{:02X}", b),
        })
        .collect()
}

#[async_trait]
impl Fetcher for ValorantStats {
    fn route(&self) -> &'static str {
        "valorant.profile"
    }

    fn platform(&self) -> &'static str {
        "valorant"
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::new(Ttl::secs(86_400)).with_timeout(Duration::from_secs(45))
    }

    fn canonicalize(&self, request: &FetchRequest) -> MeridianResult<String> {
        let (name, tag) = riot_id(&request.target)?;
        Ok(format!("{}#{}", name.to_lowercase(), tag.to_lowercase()))
    }

    fn cache_key(&self, id: &str, _request: &FetchRequest) -> String {
        format!("valorant:{}", id)
    }

    #[tracing::instrument(skip(self, cx, _request))]
    async fn fetch(&self, cx: &FetchContext, id: &str, _request: &FetchRequest) -> MeridianResult<FetchOutcome<Value>> {
        let (name, tag) = riot_id(id)?;
        let Some(account) = self.account(cx, &name, &tag).await? else {
            return Ok(FetchOutcome::NotFound);
        };
        let state = self.tracker_state(cx, &name, &tag).await?;
        let segment = competitive_segment(&state).ok_or_else(|| {
            FetchError::new(FetchErrorKind::Validation(format!("{} profile isn't public", id)))
        })?;
        found(&build_profile(account, segment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_riot_id() {
        assert_eq!(riot_id("Tenz#0505").unwrap(), ("Tenz".into(), "0505".into()));
        assert!(riot_id("Tenz").is_err());
        assert!(riot_id("ab#123").is_err());
        assert!(riot_id("Tenz#12").is_err());
    }

    #[test]
    fn test_urlencode_hash() {
        assert_eq!(urlencode("a b#c"), "a%20b%23c");
    }

    #[test]
    fn test_competitive_segment_snake_case() {
        let state = json!({"stats": {"segments": {
            "riot|tenz#0505|playlist||key:unrated,playlist:unrated": [{"stats": {}}],
            "riot|tenz#0505|playlist||key:competitive,playlist:competitive": [
                {"type": "season", "stats": {
                    "k_d_ratio": {"display_value": "1.31", "value": 1.31},
                    "rank": {"displayValue": "Radiant", "value": 27.0, "metadata": {"iconUrl": "https://x/r.png"}}
                }}
            ]
        }}});
        let segment = competitive_segment(&state).unwrap();
        let profile = build_profile(RiotAccount::default(), segment);
        assert_eq!(profile.kd_ratio.unwrap().display_value.as_deref(), Some("1.31"));
        let rank = profile.rank.unwrap();
        assert_eq!(rank.display_value.as_deref(), Some("Radiant"));
        assert_eq!(rank.icon_url.as_deref(), Some("https://x/r.png"));
        assert!(profile.kills.is_none());
    }
}
