//! Configuration types.
//!
//! All thresholds live in one place. The scheduler, dispatcher and sweep
//! read the same `Policy` object — there are no per-call-site constants.

use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::error::ConfigError;

/// Follow-up policy, evaluated uniformly by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Minimum wait after the last outbound before the next follow-up.
    pub follow_up_delay: ChronoDuration,
    /// Follow-ups allowed before the contact is unsubscribed.
    pub max_follow_ups: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            follow_up_delay: ChronoDuration::days(3),
            max_follow_ups: 3,
        }
    }
}

impl Policy {
    /// Build from environment variables, falling back to defaults.
    ///
    /// - `OUTREACH_FOLLOW_UP_DELAY_SECS`
    /// - `OUTREACH_MAX_FOLLOW_UPS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let follow_up_delay = match std::env::var("OUTREACH_FOLLOW_UP_DELAY_SECS") {
            Ok(raw) => {
                let secs: i64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "OUTREACH_FOLLOW_UP_DELAY_SECS".into(),
                    message: format!("expected integer seconds, got {raw:?}"),
                })?;
                ChronoDuration::seconds(secs)
            }
            Err(_) => defaults.follow_up_delay,
        };

        let max_follow_ups = match std::env::var("OUTREACH_MAX_FOLLOW_UPS") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "OUTREACH_MAX_FOLLOW_UPS".into(),
                message: format!("expected integer count, got {raw:?}"),
            })?,
            Err(_) => defaults.max_follow_ups,
        };

        Ok(Self {
            follow_up_delay,
            max_follow_ups,
        })
    }
}

/// Who the outreach messages come from.
///
/// Rendered into greetings and signatures by the composer.
#[derive(Debug, Clone)]
pub struct SenderProfile {
    /// Name used to sign messages.
    pub from_name: String,
    /// Organization the sender represents.
    pub organization: String,
    /// Link included in signatures and neutral/negative replies.
    pub services_link: String,
    /// Subject line for follow-up messages.
    pub follow_up_subject: String,
}

impl Default for SenderProfile {
    fn default() -> Self {
        Self {
            from_name: "The team".to_string(),
            organization: "Outreach".to_string(),
            services_link: String::new(),
            follow_up_subject: "Following up".to_string(),
        }
    }
}

impl SenderProfile {
    /// Build from `OUTREACH_FROM_NAME`, `OUTREACH_ORG`, `OUTREACH_SERVICES_LINK`
    /// and `OUTREACH_FOLLOW_UP_SUBJECT`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            from_name: std::env::var("OUTREACH_FROM_NAME").unwrap_or(defaults.from_name),
            organization: std::env::var("OUTREACH_ORG").unwrap_or(defaults.organization),
            services_link: std::env::var("OUTREACH_SERVICES_LINK")
                .unwrap_or(defaults.services_link),
            follow_up_subject: std::env::var("OUTREACH_FOLLOW_UP_SUBJECT")
                .unwrap_or(defaults.follow_up_subject),
        }
    }
}

/// Engine-wide runtime configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Follow-up policy.
    pub policy: Policy,
    /// Sender identity for composed messages.
    pub sender: SenderProfile,
    /// Interval between automatic sweeps.
    pub sweep_interval: Duration,
    /// Maximum contacts processed concurrently within one sweep.
    /// Sized to respect transport and classifier rate limits.
    pub max_concurrency: usize,
    /// Timeout applied to each mail send.
    pub send_timeout: Duration,
    /// Timeout applied to each classification / composition LLM call.
    pub llm_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            sender: SenderProfile::default(),
            sweep_interval: Duration::from_secs(600),
            max_concurrency: 4,
            send_timeout: Duration::from_secs(30),
            llm_timeout: Duration::from_secs(20),
        }
    }
}

impl EngineConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let sweep_interval = parse_secs("OUTREACH_SWEEP_INTERVAL_SECS")?
            .unwrap_or(defaults.sweep_interval);
        let send_timeout =
            parse_secs("OUTREACH_SEND_TIMEOUT_SECS")?.unwrap_or(defaults.send_timeout);
        let llm_timeout = parse_secs("OUTREACH_LLM_TIMEOUT_SECS")?.unwrap_or(defaults.llm_timeout);

        let max_concurrency = match std::env::var("OUTREACH_MAX_CONCURRENCY") {
            Ok(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "OUTREACH_MAX_CONCURRENCY".into(),
                    message: format!("expected positive integer, got {raw:?}"),
                })?,
            Err(_) => defaults.max_concurrency,
        };

        Ok(Self {
            policy: Policy::from_env()?,
            sender: SenderProfile::from_env(),
            sweep_interval,
            max_concurrency,
            send_timeout,
            llm_timeout,
        })
    }
}

fn parse_secs(key: &str) -> Result<Option<Duration>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.into(),
                message: format!("expected integer seconds, got {raw:?}"),
            })?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults() {
        let policy = Policy::default();
        assert_eq!(policy.max_follow_ups, 3);
        assert_eq!(policy.follow_up_delay, ChronoDuration::days(3));
    }

    #[test]
    fn engine_config_defaults_are_sane() {
        let config = EngineConfig::default();
        assert!(config.max_concurrency > 0);
        assert!(config.send_timeout > Duration::ZERO);
        assert!(config.llm_timeout > Duration::ZERO);
    }
}
