use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::time::StartDate;

/// A cohort of a course. Users join sections, up to `capacity` of them.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: i64,
    pub course_id: i64,
    pub nickname: String,
    pub date_start: StartDate,
    pub capacity: i64,
    // always equal to the number of signups for this section
    pub signup_count: i64,
}

impl Section {
    pub fn remaining(&self) -> i64 {
        (self.capacity - self.signup_count).max(0)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSection {
    pub course_id: i64,
    pub nickname: String,
    pub date_start: StartDate,
    /// Falls back to the server's configured capacity.
    #[serde(default)]
    pub capacity: Option<u32>,
}
