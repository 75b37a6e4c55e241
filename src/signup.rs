use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::time::Timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Signup {
    pub id: i64,
    pub user_id: i64,
    pub section_id: i64,
    pub created: Timestamp,
}

/// Body of `/signup` and `/leaveSection`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub user_id: i64,
    pub section_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignupError {
    #[error("Could not find section")]
    NoSection,
    #[error("Could not find user")]
    NoUser,
    #[error("User has already signed up for this section")]
    AlreadySignedUp,
    #[error("Section is full")]
    Full,
    #[error("User is not currently signed up for this section")]
    NotSignedUp,
    #[error("internal error")]
    Internal,
}

// store failures are logged where they happen and arrive here as ()
impl From<()> for SignupError {
    fn from((): ()) -> Self {
        Self::Internal
    }
}
