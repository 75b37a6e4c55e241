use std::{result, sync::Arc};

use log::{debug, error, info, trace, warn};
use serde::Serialize;
use warp::http;

use crate::auth::{Credentials, SessionToken, TokenSigner};
use crate::backend::{Backend, FindError, InsertError};
use crate::course::{Course, NewCourse};
use crate::release;
use crate::section::{NewSection, Section};
use crate::session::{NewSession, Session};
use crate::signup::{Signup, SignupError};
use crate::time::Timestamp;

pub struct Courseware {
    backend: Backend,
    tokens: TokenSigner,
    default_capacity: u32,
}

/// A caller whose session token checked out. With `USER_MATCH`, the caller is
/// also known to be acting on their own behalf.
pub struct CoursewareAuthed<const USER_MATCH: bool = false> {
    courseware: Arc<Courseware>,
    user_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("internal error")]
    Internal,
    #[error("User authentication failed")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
}

pub type Result<T> = result::Result<T, Error>;

impl From<Error> for http::StatusCode {
    fn from(e: Error) -> Self {
        match e {
            Error::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
            Error::Unauthorized => http::StatusCode::UNAUTHORIZED,
            Error::BadRequest(_) => http::StatusCode::BAD_REQUEST,
            Error::NotFound(_) => http::StatusCode::NOT_FOUND,
            Error::Conflict(_) => http::StatusCode::CONFLICT,
        }
    }
}

impl warp::reject::Reject for Error {}

impl From<SignupError> for Error {
    fn from(e: SignupError) -> Self {
        match e {
            SignupError::NoSection | SignupError::NoUser => Error::NotFound(e.to_string()),
            SignupError::AlreadySignedUp | SignupError::Full | SignupError::NotSignedUp => {
                Error::Conflict(e.to_string())
            }
            SignupError::Internal => Error::Internal,
        }
    }
}

fn not_found(what: impl FnOnce() -> String) -> impl FnOnce(FindError) -> Error {
    move |e| match e {
        FindError::NotFound => Error::NotFound(what()),
        FindError::Internal => Error::Internal,
    }
}

impl Courseware {
    pub fn new(backend: Backend, tokens: TokenSigner, default_capacity: u32) -> Self {
        Self {
            backend,
            tokens,
            default_capacity,
        }
    }

    pub async fn register(&self, creds: Credentials) -> Result<SessionToken> {
        let username = creds.user();

        if username.is_empty() {
            return Err(Error::BadRequest("username must not be empty".into()));
        }

        let user_id = self
            .backend
            .create_user(username, &creds.calc_pwhash())
            .await
            .map_err(|e| match e {
                InsertError::Duplicate => {
                    info!("register: {username} already exists");
                    Error::Conflict("User already exists".into())
                }
                e => {
                    error!("couldn't register user {username}: {e:?}");
                    Error::Internal
                }
            })?;

        info!("{username} registered as user {user_id}");
        self.issue(user_id)
    }

    pub async fn login(&self, creds: Credentials) -> Result<SessionToken> {
        let username = creds.user();

        let user = self.backend.find_user(username).await.map_err(|e| {
            if matches!(e, FindError::NotFound) {
                error!("rejecting non-existant user {}", username);
                Error::Unauthorized
            } else {
                error!("couldn't authenticate user {}: {e:?}", username);
                Error::Internal
            }
        })?;

        if !creds.matches(&user.pwhash) {
            error!("wrong password for user {}", username);
            return Err(Error::Unauthorized);
        }

        info!("{username} login");
        self.issue(user.id)
    }

    fn issue(&self, user_id: i64) -> Result<SessionToken> {
        self.tokens
            .issue(user_id, now()?)
            .map_err(|()| Error::Internal)
    }

    pub async fn authenticate(self: &Arc<Self>, token: &str) -> Result<CoursewareAuthed> {
        let user_id = self.tokens.verify(token, now()?).map_err(|e| {
            info!("rejecting session token: {e}");
            Error::Unauthorized
        })?;

        // a token is only as good as the user it names
        self.backend.find_user_by_id(user_id).await.map_err(|e| {
            if matches!(e, FindError::NotFound) {
                error!("session token for unknown user {user_id}");
                Error::Unauthorized
            } else {
                Error::Internal
            }
        })?;

        debug!("found user {user_id} by session");
        Ok(CoursewareAuthed {
            courseware: Arc::clone(self),
            user_id,
        })
    }

    pub async fn username(&self, user_id: i64) -> Result<String> {
        self.backend
            .find_user_by_id(user_id)
            .await
            .map(|user| user.username)
            .map_err(not_found(|| format!("Could not find user id {user_id}")))
    }
}

impl Courseware {
    pub async fn courses(&self) -> Result<Vec<Course>> {
        self.backend.courses().await.map_err(|()| Error::Internal)
    }

    pub async fn course(&self, course_id: i64) -> Result<Course> {
        trace!("getting course {course_id}");

        self.backend
            .course(course_id)
            .await
            .map_err(not_found(|| format!("Could not find course with id {course_id}")))
    }

    pub async fn sections(&self, course_id: i64) -> Result<Vec<Section>> {
        self.course(course_id).await?;

        self.backend
            .sections(course_id)
            .await
            .map_err(|()| Error::Internal)
    }

    pub async fn session_names(&self, course_id: i64) -> Result<Vec<String>> {
        self.course(course_id).await?;

        let sessions = self
            .backend
            .sessions(course_id)
            .await
            .map_err(|()| Error::Internal)?;

        Ok(sessions.into_iter().map(|s| s.name).collect())
    }

    pub async fn signups(&self, course_id: i64) -> Result<Vec<Signup>> {
        self.course(course_id).await?;

        self.backend
            .signups_for_course(course_id)
            .await
            .map_err(|()| Error::Internal)
    }

    async fn section(&self, section_id: i64) -> Result<Section> {
        self.backend
            .section(section_id)
            .await
            .map_err(not_found(|| format!("Could not find section with id {section_id}")))
    }

    pub async fn participants(&self, section_id: i64) -> Result<Vec<String>> {
        self.section(section_id).await?;

        self.backend
            .participants(section_id)
            .await
            .map_err(|()| Error::Internal)
    }

    pub async fn released_sessions(&self, section_id: i64) -> Result<Vec<Session>> {
        self.released_sessions_at(section_id, now()?).await
    }

    pub async fn released_sessions_at(
        &self,
        section_id: i64,
        now: Timestamp,
    ) -> Result<Vec<Session>> {
        let section = self.section(section_id).await?;

        let sessions = self
            .backend
            .sessions(section.course_id)
            .await
            .map_err(|()| Error::Internal)?;

        let total = sessions.len();
        let released = release::released(section.date_start, now, sessions);

        trace!(
            "section {section_id} (started {}): {}/{total} sessions released",
            section.date_start,
            released.len(),
        );

        Ok(released)
    }
}

impl Courseware {
    pub async fn add_course(&self, course: NewCourse) -> Result<Course> {
        if course.name.trim().is_empty() {
            return Err(Error::BadRequest("course name must not be empty".into()));
        }

        let course = self.backend.add_course(&course).await.map_err(|e| match e {
            InsertError::Duplicate => Error::Conflict("Course already exists!".into()),
            _ => Error::Internal,
        })?;

        info!("added course {} ({})", course.id, course.name);
        Ok(course)
    }

    pub async fn add_section(&self, section: NewSection) -> Result<Section> {
        let course = self.course(section.course_id).await?;
        let capacity = section.capacity.unwrap_or(self.default_capacity);

        let section = self
            .backend
            .add_section(&section, capacity.into())
            .await
            .map_err(|e| match e {
                InsertError::Duplicate => Error::Conflict(format!(
                    "Section with nickname {} already exists for course {}",
                    section.nickname, course.name
                )),
                InsertError::MissingParent => Error::NotFound(format!(
                    "Could not find course with courseId {}",
                    section.course_id
                )),
                InsertError::Internal => Error::Internal,
            })?;

        info!(
            "added section {} ({}) to course {}, {} places from {}",
            section.id,
            section.nickname,
            course.id,
            section.remaining(),
            section.date_start,
        );
        Ok(section)
    }

    pub async fn add_session(&self, session: NewSession) -> Result<Session> {
        let session = self.backend.add_session(&session).await.map_err(|e| match e {
            InsertError::Duplicate => Error::Conflict("Session already exists!".into()),
            InsertError::MissingParent => Error::NotFound(format!(
                "Could not find course with courseId {}",
                session.course_id
            )),
            InsertError::Internal => Error::Internal,
        })?;

        info!(
            "added session {} ({}) to course {}, week {}",
            session.id, session.name, session.course_id, session.session_number,
        );
        Ok(session)
    }

    /// Log any section whose counter disagrees with its signups.
    pub async fn check_counts(&self) -> Result<usize> {
        let drift = self
            .backend
            .count_drift()
            .await
            .map_err(|()| Error::Internal)?;

        for (section_id, counter, signups) in &drift {
            warn!("section {section_id} counts {counter} signups but has {signups}");
        }

        Ok(drift.len())
    }
}

impl CoursewareAuthed {
    pub fn with_user(self, user_id: i64) -> Result<CoursewareAuthed<true>> {
        if user_id == self.user_id {
            Ok(CoursewareAuthed {
                courseware: self.courseware,
                user_id: self.user_id,
            })
        } else {
            error!(
                "mismatching session & user: session user {}, requested user {user_id}",
                self.user_id,
            );
            Err(Error::Unauthorized)
        }
    }

    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id,
        }
    }
}

impl CoursewareAuthed<true> {
    pub async fn join(&self, section_id: i64) -> Result<()> {
        let user_id = self.user_id;
        let now = now()?;

        self.courseware
            .backend
            .join_section(user_id, section_id, now)
            .await
            .map_err(|e| {
                info!("user {user_id} couldn't join section {section_id}: {e}");
                e
            })?;

        info!("user {user_id} joined section {section_id}");
        Ok(())
    }

    pub async fn leave(&self, section_id: i64) -> Result<()> {
        let user_id = self.user_id;

        self.courseware
            .backend
            .leave_section(user_id, section_id)
            .await
            .map_err(|e| {
                info!("user {user_id} couldn't leave section {section_id}: {e}");
                e
            })?;

        info!("user {user_id} left section {section_id}");
        Ok(())
    }
}

fn now() -> Result<Timestamp> {
    Timestamp::now().map_err(|()| Error::Internal)
}

#[cfg(test)]
pub mod test {
    use super::*;

    use ::time::{macros::date, Duration, OffsetDateTime};
    use tempfile::TempDir;

    use crate::backend;
    use crate::time::StartDate;

    pub async fn create_courseware() -> (Arc<Courseware>, TempDir) {
        let (db, dir) = backend::test::create_db().await;
        let tokens = TokenSigner::new("secret", TokenSigner::DEFAULT_LIFETIME_SECS);

        (Arc::new(Courseware::new(db, tokens, 10)), dir)
    }

    async fn course(courseware: &Courseware) -> Course {
        courseware
            .add_course(NewCourse {
                name: "Rust".into(),
                description: "".into(),
                img_url: "".into(),
            })
            .await
            .unwrap()
    }

    async fn section(courseware: &Courseware, course_id: i64, start: StartDate) -> Section {
        courseware
            .add_section(NewSection {
                course_id,
                nickname: "mornings".into(),
                date_start: start,
                capacity: None,
            })
            .await
            .unwrap()
    }

    async fn signed_in(courseware: &Arc<Courseware>, username: &str) -> CoursewareAuthed {
        let token = courseware
            .register(Credentials::new(username, "password"))
            .await
            .unwrap();

        courseware.authenticate(token.as_str()).await.unwrap()
    }

    #[tokio::test]
    async fn register_then_login() {
        let (courseware, _dir) = create_courseware().await;

        let registered = courseware
            .register(Credentials::new("ada", "password"))
            .await
            .unwrap();
        let logged_in = courseware
            .login(Credentials::new("ada", "password"))
            .await
            .unwrap();

        let a = courseware.authenticate(registered.as_str()).await.unwrap();
        let b = courseware.authenticate(logged_in.as_str()).await.unwrap();
        assert_eq!(a.identity().user_id, b.identity().user_id);
        assert_eq!(courseware.username(a.identity().user_id).await.unwrap(), "ada");
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_blanks() {
        let (courseware, _dir) = create_courseware().await;

        courseware
            .register(Credentials::new("ada", "password"))
            .await
            .unwrap();

        assert_eq!(
            courseware.register(Credentials::new("ada", "other")).await,
            Err(Error::Conflict("User already exists".into()))
        );
        assert!(matches!(
            courseware.register(Credentials::new("", "pw")).await,
            Err(Error::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn login_failures_are_unauthorized() {
        let (courseware, _dir) = create_courseware().await;

        courseware
            .register(Credentials::new("ada", "password"))
            .await
            .unwrap();

        assert_eq!(
            courseware.login(Credentials::new("ada", "wrong")).await,
            Err(Error::Unauthorized)
        );
        assert_eq!(
            courseware.login(Credentials::new("nobody", "password")).await,
            Err(Error::Unauthorized)
        );
    }

    #[tokio::test]
    async fn authenticate_rejects_bad_tokens() {
        let (courseware, _dir) = create_courseware().await;

        assert!(matches!(
            courseware.authenticate("not a token").await,
            Err(Error::Unauthorized)
        ));

        // validly signed, but for a user that was never registered
        let ghost = TokenSigner::new("secret", 60)
            .issue(77, Timestamp::now().unwrap())
            .unwrap();
        assert!(matches!(
            courseware.authenticate(ghost.as_str()).await,
            Err(Error::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn acting_for_someone_else_is_unauthorized() {
        let (courseware, _dir) = create_courseware().await;

        let ada = signed_in(&courseware, "ada").await;
        let ada_id = ada.identity().user_id;

        assert!(matches!(ada.with_user(ada_id + 1), Err(Error::Unauthorized)));
    }

    #[tokio::test]
    async fn join_and_leave_map_to_conflicts() {
        let (courseware, _dir) = create_courseware().await;
        let course = course(&courseware).await;
        let section = section(&courseware, course.id, date!(2024 - 01 - 01).into()).await;

        let ada = signed_in(&courseware, "ada").await;
        let ada_id = ada.identity().user_id;
        let ada = ada.with_user(ada_id).unwrap();

        ada.join(section.id).await.unwrap();
        assert_eq!(
            ada.join(section.id).await,
            Err(Error::Conflict(
                "User has already signed up for this section".into()
            ))
        );
        assert_eq!(courseware.participants(section.id).await.unwrap(), ["ada"]);

        ada.leave(section.id).await.unwrap();
        assert_eq!(
            ada.leave(section.id).await,
            Err(Error::Conflict(
                "User is not currently signed up for this section".into()
            ))
        );
        assert!(matches!(ada.join(999).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn sections_default_to_configured_capacity() {
        let (courseware, _dir) = create_courseware().await;
        let course = course(&courseware).await;

        let default = section(&courseware, course.id, date!(2024 - 01 - 01).into()).await;
        let small = courseware
            .add_section(NewSection {
                course_id: course.id,
                nickname: "evenings".into(),
                date_start: date!(2024 - 01 - 01).into(),
                capacity: Some(3),
            })
            .await
            .unwrap();

        assert_eq!(default.capacity, 10);
        assert_eq!(small.capacity, 3);
        assert_eq!(small.remaining(), 3);

        let nicknames: Vec<_> = courseware
            .sections(course.id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.nickname)
            .collect();
        assert_eq!(nicknames, ["evenings", "mornings"]);
    }

    #[tokio::test]
    async fn admin_conflicts_and_missing_courses() {
        let (courseware, _dir) = create_courseware().await;
        let course = course(&courseware).await;
        section(&courseware, course.id, date!(2024 - 01 - 01).into()).await;

        assert!(matches!(
            courseware
                .add_course(NewCourse {
                    name: "Rust".into(),
                    description: "".into(),
                    img_url: "".into(),
                })
                .await,
            Err(Error::Conflict(_))
        ));
        assert_eq!(
            courseware
                .add_section(NewSection {
                    course_id: course.id,
                    nickname: "mornings".into(),
                    date_start: date!(2024 - 01 - 01).into(),
                    capacity: None,
                })
                .await,
            Err(Error::Conflict(
                "Section with nickname mornings already exists for course Rust".into()
            ))
        );
        assert!(matches!(
            courseware
                .add_session(NewSession {
                    course_id: 5,
                    name: "week 1".into(),
                    description: "".into(),
                    session_number: 1,
                })
                .await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(courseware.course(5).await, Err(Error::NotFound(_))));
        assert!(matches!(courseware.sections(5).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn released_sessions_follow_the_clock() {
        let (courseware, _dir) = create_courseware().await;
        let course = course(&courseware).await;
        let start: StartDate = date!(2024 - 01 - 01).into();
        let section = section(&courseware, course.id, start).await;

        for week in 1..=5 {
            courseware
                .add_session(NewSession {
                    course_id: course.id,
                    name: format!("week {week}"),
                    description: "".into(),
                    session_number: week,
                })
                .await
                .unwrap();
        }

        let at = |weeks: i64| start.timestamp().plus_secs(weeks * 7 * 24 * 60 * 60);
        let names = |sessions: Vec<Session>| -> Vec<String> {
            sessions.into_iter().map(|s| s.name).collect()
        };

        let none = courseware.released_sessions_at(section.id, at(0)).await.unwrap();
        let one = courseware.released_sessions_at(section.id, at(1)).await.unwrap();
        let all = courseware.released_sessions_at(section.id, at(8)).await.unwrap();

        assert!(none.is_empty());
        assert_eq!(names(one), ["week 1"]);
        assert_eq!(all.len(), 5);
        assert_eq!(
            courseware.session_names(course.id).await.unwrap(),
            ["week 1", "week 2", "week 3", "week 4", "week 5"]
        );
        assert!(matches!(
            courseware.released_sessions(999).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn released_sessions_now() {
        let (courseware, _dir) = create_courseware().await;
        let course = course(&courseware).await;
        let two_weeks_ago = OffsetDateTime::now_utc() - Duration::weeks(2);
        let section = section(&courseware, course.id, two_weeks_ago.date().into()).await;

        for week in 1..=3 {
            courseware
                .add_session(NewSession {
                    course_id: course.id,
                    name: format!("week {week}"),
                    description: "".into(),
                    session_number: week,
                })
                .await
                .unwrap();
        }

        assert_eq!(courseware.released_sessions(section.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn counts_start_consistent() {
        let (courseware, _dir) = create_courseware().await;

        assert_eq!(courseware.check_counts().await, Ok(0));
    }
}
