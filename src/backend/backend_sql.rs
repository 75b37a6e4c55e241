use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{query, query_as, query_scalar, Pool, Sqlite, SqliteConnection, Transaction};

use log::{error, info};

use crate::backend::{FindError, InsertError};
use crate::course::{Course, NewCourse};
use crate::section::{NewSection, Section};
use crate::session::{NewSession, Session};
use crate::signup::{Signup, SignupError};
use crate::time::Timestamp;
use crate::user::User;

type Result<T> = std::result::Result<T, ()>;

pub struct Backend(pub Pool<Sqlite>);

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn into_sql(path: &Path) -> PathBuf {
    path.join("courses.sql")
}

/// Log a store error, collapsing it into `()`.
fn logged(context: &'static str) -> impl FnOnce(sqlx::Error) {
    move |e| error!("{context}: {e:?}")
}

fn find_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> FindError {
    move |e| {
        if matches!(e, sqlx::Error::RowNotFound) {
            FindError::NotFound
        } else {
            error!("{context}: {e:?}");
            FindError::Internal
        }
    }
}

fn insert_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> InsertError {
    move |e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => InsertError::Duplicate,
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => InsertError::MissingParent,
        _ => {
            error!("{context}: {e:?}");
            InsertError::Internal
        }
    }
}

impl Backend {
    pub async fn new(data_dir: &Path) -> std::result::Result<Self, sqlx::Error> {
        let db_path = into_sql(data_dir);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Using {}", db_path.display());

        Ok(Self(pool))
    }
}

impl Backend {
    async fn transact<T, R, E, F>(&self, transaction: T) -> std::result::Result<R, E>
    where
        T: FnOnce(Transaction<'static, Sqlite>) -> F,
        F: Future<Output = std::result::Result<(Transaction<'static, Sqlite>, R), E>>,
        E: From<()>,
    {
        let tx = self.0.begin().await.map_err(|e| {
            error!("error beginning transaction: {:?}", e);
        })?;

        // dropping tx on error rolls back
        let (tx, r) = transaction(tx).await?;

        tx.commit().await.map_err(|e| {
            error!("error committing transaction: {:?}", e);
        })?;

        Ok(r)
    }
}

impl Backend {
    pub async fn find_user(&self, username: &str) -> std::result::Result<User, FindError> {
        query_as::<_, User>(
            "
            SELECT id, username, pwhash
            FROM users
            WHERE username = ?
            ",
        )
        .bind(username)
        .fetch_one(&self.0)
        .await
        .map_err(find_error("error finding user"))
    }

    pub async fn find_user_by_id(&self, id: i64) -> std::result::Result<User, FindError> {
        query_as::<_, User>(
            "
            SELECT id, username, pwhash
            FROM users
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_one(&self.0)
        .await
        .map_err(find_error("error finding user by id"))
    }

    pub async fn create_user(
        &self,
        username: &str,
        pwhash: &str,
    ) -> std::result::Result<i64, InsertError> {
        query(
            "
            INSERT INTO users
            (username, pwhash)
            VALUES
            (?, ?)
            ",
        )
        .bind(username)
        .bind(pwhash)
        .execute(&self.0)
        .await
        .map(|done| done.last_insert_rowid())
        .map_err(insert_error("error inserting user"))
    }
}

impl Backend {
    pub async fn courses(&self) -> Result<Vec<Course>> {
        query_as::<_, Course>(
            "
            SELECT id, name, description, img_url
            FROM courses
            ORDER BY id
            ",
        )
        .fetch_all(&self.0)
        .await
        .map_err(logged("error selecting courses"))
    }

    pub async fn course(&self, id: i64) -> std::result::Result<Course, FindError> {
        query_as::<_, Course>(
            "
            SELECT id, name, description, img_url
            FROM courses
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_one(&self.0)
        .await
        .map_err(find_error("error selecting course"))
    }

    pub async fn add_course(&self, course: &NewCourse) -> std::result::Result<Course, InsertError> {
        let id = query(
            "
            INSERT INTO courses
            (name, description, img_url)
            VALUES
            (?, ?, ?)
            ",
        )
        .bind(course.name.as_str())
        .bind(course.description.as_str())
        .bind(course.img_url.as_str())
        .execute(&self.0)
        .await
        .map_err(insert_error("error inserting course"))?
        .last_insert_rowid();

        Ok(Course {
            id,
            name: course.name.clone(),
            description: course.description.clone(),
            img_url: course.img_url.clone(),
        })
    }
}

impl Backend {
    pub async fn sections(&self, course_id: i64) -> Result<Vec<Section>> {
        query_as::<_, Section>(
            "
            SELECT id, course_id, nickname, date_start, capacity, signup_count
            FROM sections
            WHERE course_id = ?
            ORDER BY nickname
            ",
        )
        .bind(course_id)
        .fetch_all(&self.0)
        .await
        .map_err(logged("error selecting sections"))
    }

    pub async fn section(&self, id: i64) -> std::result::Result<Section, FindError> {
        query_as::<_, Section>(
            "
            SELECT id, course_id, nickname, date_start, capacity, signup_count
            FROM sections
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_one(&self.0)
        .await
        .map_err(find_error("error selecting section"))
    }

    pub async fn add_section(
        &self,
        section: &NewSection,
        capacity: i64,
    ) -> std::result::Result<Section, InsertError> {
        let id = query(
            "
            INSERT INTO sections
            (course_id, nickname, date_start, capacity)
            VALUES
            (?, ?, ?, ?) -- `signup_count` <- 0
            ",
        )
        .bind(section.course_id)
        .bind(section.nickname.as_str())
        .bind(section.date_start)
        .bind(capacity)
        .execute(&self.0)
        .await
        .map_err(insert_error("error inserting section"))?
        .last_insert_rowid();

        Ok(Section {
            id,
            course_id: section.course_id,
            nickname: section.nickname.clone(),
            date_start: section.date_start,
            capacity,
            signup_count: 0,
        })
    }

    /// Sections whose counter disagrees with their signups, as
    /// `(section, counter, signups)`. Empty unless something wrote around
    /// `join_section`/`leave_section`.
    pub async fn count_drift(&self) -> Result<Vec<(i64, i64, i64)>> {
        query_as::<_, (i64, i64, i64)>(
            "
            SELECT sections.id, sections.signup_count, COUNT(signups.id)
            FROM sections
            LEFT JOIN signups
                ON signups.section_id = sections.id
            GROUP BY sections.id
            HAVING sections.signup_count <> COUNT(signups.id)
            ",
        )
        .fetch_all(&self.0)
        .await
        .map_err(logged("error checking signup counts"))
    }
}

impl Backend {
    pub async fn sessions(&self, course_id: i64) -> Result<Vec<Session>> {
        query_as::<_, Session>(
            "
            SELECT id, course_id, name, description, session_number
            FROM sessions
            WHERE course_id = ?
            ORDER BY session_number, id
            ",
        )
        .bind(course_id)
        .fetch_all(&self.0)
        .await
        .map_err(logged("error selecting sessions"))
    }

    pub async fn add_session(
        &self,
        session: &NewSession,
    ) -> std::result::Result<Session, InsertError> {
        let id = query(
            "
            INSERT INTO sessions
            (course_id, name, description, session_number)
            VALUES
            (?, ?, ?, ?)
            ",
        )
        .bind(session.course_id)
        .bind(session.name.as_str())
        .bind(session.description.as_str())
        .bind(session.session_number)
        .execute(&self.0)
        .await
        .map_err(insert_error("error inserting session"))?
        .last_insert_rowid();

        Ok(Session {
            id,
            course_id: session.course_id,
            name: session.name.clone(),
            description: session.description.clone(),
            session_number: session.session_number,
        })
    }
}

impl Backend {
    pub async fn signups_for_course(&self, course_id: i64) -> Result<Vec<Signup>> {
        query_as::<_, Signup>(
            "
            SELECT signups.id, signups.user_id, signups.section_id, signups.created
            FROM signups
            INNER JOIN sections
                ON sections.id = signups.section_id
            WHERE sections.course_id = ?
            ORDER BY signups.id
            ",
        )
        .bind(course_id)
        .fetch_all(&self.0)
        .await
        .map_err(logged("error selecting signups"))
    }

    pub async fn participants(&self, section_id: i64) -> Result<Vec<String>> {
        query_scalar::<_, String>(
            "
            SELECT users.username
            FROM signups
            INNER JOIN users
                ON users.id = signups.user_id
            WHERE signups.section_id = ?
            ORDER BY signups.id
            ",
        )
        .bind(section_id)
        .fetch_all(&self.0)
        .await
        .map_err(logged("error selecting participants"))
    }

    /// Sign a user up to a section, if it has room and they aren't already in it.
    pub async fn join_section(
        &self,
        user_id: i64,
        section_id: i64,
        now: Timestamp,
    ) -> std::result::Result<(), SignupError> {
        self.transact(|mut tx| async move {
            // the claim is the first statement, so the transaction holds the
            // write lock from here until commit
            let claimed = query(
                "
                UPDATE sections
                SET signup_count = signup_count + 1
                WHERE id = ?
                    AND signup_count < capacity
                    AND NOT EXISTS (
                        SELECT 1
                        FROM signups
                        WHERE signups.section_id = sections.id
                            AND signups.user_id = ?
                    )
                ",
            )
            .bind(section_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(logged("error claiming section place"))?
            .rows_affected();

            if claimed == 0 {
                return Err(why_not_joined(&mut tx, user_id, section_id).await?);
            }

            if !exists(&mut tx, USER_EXISTS, user_id).await? {
                return Err(SignupError::NoUser);
            }

            query(
                "
                INSERT INTO signups
                (user_id, section_id, created)
                VALUES
                (?, ?, ?)
                ",
            )
            .bind(user_id)
            .bind(section_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(logged("error inserting signup"))?;

            Ok::<_, SignupError>((tx, ()))
        })
        .await
    }

    pub async fn leave_section(
        &self,
        user_id: i64,
        section_id: i64,
    ) -> std::result::Result<(), SignupError> {
        self.transact(|mut tx| async move {
            let removed = query(
                "
                DELETE FROM signups
                WHERE user_id = ?
                    AND section_id = ?
                ",
            )
            .bind(user_id)
            .bind(section_id)
            .execute(&mut *tx)
            .await
            .map_err(logged("error deleting signup"))?
            .rows_affected();

            if removed == 0 {
                return Err(if exists(&mut tx, SECTION_EXISTS, section_id).await? {
                    SignupError::NotSignedUp
                } else {
                    SignupError::NoSection
                });
            }

            let released = query(
                "
                UPDATE sections
                SET signup_count = signup_count - 1
                WHERE id = ?
                    AND signup_count > 0
                ",
            )
            .bind(section_id)
            .execute(&mut *tx)
            .await
            .map_err(logged("error releasing section place"))?
            .rows_affected();

            if released == 0 {
                error!("section {section_id} had a signup but a zero count");
                return Err(SignupError::Internal);
            }

            Ok::<_, SignupError>((tx, ()))
        })
        .await
    }
}

const SECTION_EXISTS: &str = "SELECT 1 FROM sections WHERE id = ?";
const USER_EXISTS: &str = "SELECT 1 FROM users WHERE id = ?";

async fn exists(conn: &mut SqliteConnection, sql: &'static str, id: i64) -> Result<bool> {
    query_scalar::<_, i64>(sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map(|row| row.is_some())
        .map_err(logged("error checking existence"))
}

/// Work out why a section claim matched nothing. Only meaningful inside the
/// claiming transaction.
async fn why_not_joined(
    conn: &mut SqliteConnection,
    user_id: i64,
    section_id: i64,
) -> Result<SignupError> {
    if !exists(conn, SECTION_EXISTS, section_id).await? {
        return Ok(SignupError::NoSection);
    }
    if !exists(conn, USER_EXISTS, user_id).await? {
        return Ok(SignupError::NoUser);
    }

    let signed_up = query_scalar::<_, i64>(
        "
        SELECT 1
        FROM signups
        WHERE user_id = ?
            AND section_id = ?
        ",
    )
    .bind(user_id)
    .bind(section_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(logged("error checking signup"))?
    .is_some();

    Ok(if signed_up {
        SignupError::AlreadySignedUp
    } else {
        SignupError::Full
    })
}
