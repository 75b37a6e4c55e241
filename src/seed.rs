use std::fs;
use std::path::Path;

use log::info;
use serde::Deserialize;

use crate::course::NewCourse;
use crate::courseware::{Courseware, Error};
use crate::section::NewSection;
use crate::session::NewSession;

/// Reference data to load at startup.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub courses: Vec<NewCourse>,
    #[serde(default)]
    pub sections: Vec<NewSection>,
    #[serde(default)]
    pub sessions: Vec<NewSession>,
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("couldn't read seed file: {0}")]
    Read(#[from] std::io::Error),
    #[error("invalid seed file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("couldn't seed {what}: {source}")]
    Apply { what: String, source: Error },
}

impl Seed {
    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Add everything that isn't already there. Courses go first so sections
    /// and sessions can refer to them.
    pub async fn apply(self, courseware: &Courseware) -> Result<Counts, SeedError> {
        let mut counts = Counts::default();

        for course in self.courses {
            let what = format!("course {:?}", course.name);
            counts.courses += added(&what, courseware.add_course(course).await)?;
        }

        for section in self.sections {
            let what = format!("section {:?}", section.nickname);
            counts.sections += added(&what, courseware.add_section(section).await)?;
        }

        for session in self.sessions {
            let what = format!("session {:?}", session.name);
            counts.sessions += added(&what, courseware.add_session(session).await)?;
        }

        info!(
            "seeded {} courses, {} sections, {} sessions",
            counts.courses, counts.sections, counts.sessions
        );

        Ok(counts)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub courses: usize,
    pub sections: usize,
    pub sessions: usize,
}

fn added<T>(what: &str, r: Result<T, Error>) -> Result<usize, SeedError> {
    match r {
        Ok(_) => Ok(1),
        Err(Error::Conflict(_)) => {
            info!("{what} already present, skipping");
            Ok(0)
        }
        Err(source) => Err(SeedError::Apply {
            what: what.into(),
            source,
        }),
    }
}
