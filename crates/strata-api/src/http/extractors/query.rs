//! Query parameter extractors for list endpoints.

use serde::Deserialize;

use strata_types::archive::ConversationStatus;
use strata_types::knowledge::FactKind;

use crate::http::error::AppError;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

/// Query parameters for the conversation list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct ConversationListQuery {
    pub owner: Option<String>,
    /// `active` or `summarized`.
    pub status: Option<String>,
    pub limit: Option<u32>,
}

impl ConversationListQuery {
    pub fn status(&self) -> Result<Option<ConversationStatus>, AppError> {
        self.status
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(AppError::Validation)
    }
}

/// Query parameters for the fact list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct FactListQuery {
    /// `preference`, `entity` or `pattern`.
    pub kind: Option<String>,
    pub limit: Option<u32>,
}

impl FactListQuery {
    pub fn kind(&self) -> Result<Option<FactKind>, AppError> {
        self.kind
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(AppError::Validation)
    }
}

/// Query parameters for the digest list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct DigestListQuery {
    pub owner: Option<String>,
    pub limit: Option<u32>,
}

/// Clamp a requested page size.
pub fn page_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}
