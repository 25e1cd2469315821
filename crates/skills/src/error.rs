use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("skill '{skill}' does not comply to \"{condition}\" condition, required \"{value}\"")]
    ConditionNotMet {
        skill: String,
        condition: String,
        value: String,
    },

    #[error("skill '{skill}' failed to start: {reason}")]
    StartFailed { skill: String, reason: String },

    #[error("skill '{skill}' asked to delay its start by {delay:?}")]
    StartDelayed { skill: String, delay: Duration },

    #[error("skill '{skill}' is not available from the skill source")]
    FetchNotFound { skill: String },

    #[error("skill source rejected the configured credentials while fetching '{skill}'")]
    FetchAuthFailed { skill: String },

    #[error("skill source rate limit reached while fetching '{skill}'")]
    FetchRateLimited { skill: String },

    #[error("provisioning '{skill}' failed: {reason}")]
    ProvisioningFailed { skill: String, reason: String },

    #[error("skill not found: {skill}")]
    SkillNotFound { skill: String },

    #[error("skill '{skill}' is required and cannot be disabled or removed")]
    RequiredSkill { skill: String },

    #[error("required skill '{skill}' is unavailable: {reason}")]
    RequiredSkillUnavailable { skill: String, reason: String },

    #[error("invalid version string: '{value}'")]
    InvalidVersion { value: String },

    #[error("invalid install ticket {ticket}: {reason}")]
    InvalidTicket { ticket: String, reason: String },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn condition_not_met(
        skill: impl Into<String>,
        condition: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::ConditionNotMet {
            skill: skill.into(),
            condition: condition.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn start_failed(skill: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StartFailed {
            skill: skill.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn provisioning_failed(skill: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProvisioningFailed {
            skill: skill.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn skill_not_found(skill: impl Into<String>) -> Self {
        Self::SkillNotFound {
            skill: skill.into(),
        }
    }

    #[must_use]
    pub fn invalid_ticket(ticket: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTicket {
            ticket: ticket.into(),
            reason: reason.into(),
        }
    }

    /// Only a missing core skill stops the host.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RequiredSkillUnavailable { .. })
    }

    /// Errors raised by the source-fetch collaborator.
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            Self::FetchNotFound { .. } | Self::FetchAuthFailed { .. } | Self::FetchRateLimited { .. }
        )
    }

    /// Short machine-readable label, used for metrics and event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Http(_) => "http",
            Self::ConditionNotMet { .. } => "condition_not_met",
            Self::StartFailed { .. } => "start_failed",
            Self::StartDelayed { .. } => "start_delayed",
            Self::FetchNotFound { .. } => "fetch_not_found",
            Self::FetchAuthFailed { .. } => "fetch_auth_failed",
            Self::FetchRateLimited { .. } => "fetch_rate_limited",
            Self::ProvisioningFailed { .. } => "provisioning_failed",
            Self::SkillNotFound { .. } => "skill_not_found",
            Self::RequiredSkill { .. } => "required_skill",
            Self::RequiredSkillUnavailable { .. } => "required_skill_unavailable",
            Self::InvalidVersion { .. } => "invalid_version",
            Self::InvalidTicket { .. } => "invalid_ticket",
            Self::Message { .. } => "message",
            Self::External { .. } => "external",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
