use std::convert::Infallible;
use std::sync::Arc;

use log::error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::auth::{Credentials, SessionToken};
use crate::course::NewCourse;
use crate::courseware::{Courseware, Error};
use crate::section::NewSection;
use crate::session::NewSession;
use crate::signup::SignupRequest;

const MAX_BODY: u64 = 16 * 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenBody {
    session_token: SessionToken,
}

pub fn routes(
    courseware: Arc<Courseware>,
    admin: bool,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let with_courseware = warp::any().map(move || Arc::clone(&courseware));

    let catalog = {
        let courses = warp::path!("courses")
            .and(warp::get())
            .and(with_courseware.clone())
            .and_then(courses);

        let course = warp::path!("course" / i64)
            .and(warp::get())
            .and(with_courseware.clone())
            .and_then(course);

        let sections = warp::path!("course" / i64 / "sections")
            .and(warp::get())
            .and(with_courseware.clone())
            .and_then(sections);

        let session_names = warp::path!("course" / i64 / "sessionNames")
            .and(warp::get())
            .and(with_courseware.clone())
            .and_then(session_names);

        let signups = warp::path!("course" / i64 / "signups")
            .and(warp::get())
            .and(with_courseware.clone())
            .and_then(signups);

        let released = warp::path!("sessionsReleased" / i64)
            .and(warp::get())
            .and(with_courseware.clone())
            .and_then(released);

        let participants = warp::path!("section" / i64 / "participants")
            .and(warp::get())
            .and(with_courseware.clone())
            .and_then(participants);

        let username = warp::path!("username" / i64)
            .and(warp::get())
            .and(with_courseware.clone())
            .and_then(username);

        courses
            .or(course)
            .or(sections)
            .or(session_names)
            .or(signups)
            .or(released)
            .or(participants)
            .or(username)
    };

    let membership = {
        let join = warp::path!("signup")
            .and(warp::post())
            .and(with_courseware.clone())
            .and(bearer())
            .and(json_body())
            .and_then(join);

        let leave = warp::path!("leaveSection")
            .and(warp::post())
            .and(with_courseware.clone())
            .and(bearer())
            .and(json_body())
            .and_then(leave);

        join.or(leave)
    };

    let auth = {
        let register = warp::path!("register")
            .and(warp::post())
            .and(with_courseware.clone())
            .and(json_body())
            .and_then(register);

        let login = warp::path!("login")
            .and(warp::post())
            .and(with_courseware.clone())
            .and(json_body())
            .and_then(login);

        let authenticate = warp::path!("authenticate")
            .and(warp::post())
            .and(with_courseware.clone())
            .and(json_body())
            .and_then(authenticate);

        register.or(login).or(authenticate)
    };

    let admin_routes = {
        let enabled = warp::any()
            .and_then(move || async move {
                if admin {
                    Ok(())
                } else {
                    Err(warp::reject::not_found())
                }
            })
            .untuple_one();

        let add_course = warp::path!("addCourse")
            .and(warp::post())
            .and(with_courseware.clone())
            .and(json_body())
            .and_then(add_course);

        let add_section = warp::path!("addSection")
            .and(warp::post())
            .and(with_courseware.clone())
            .and(json_body())
            .and_then(add_section);

        let add_session = warp::path!("addSession")
            .and(warp::post())
            .and(with_courseware)
            .and(json_body())
            .and_then(add_session);

        enabled.and(add_course.or(add_section).or(add_session))
    };

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST"])
        .allow_headers(vec!["content-type", "authorization"]);

    catalog
        .or(membership)
        .or(auth)
        .or(admin_routes)
        .with(cors)
        .recover(handle_rejection)
        .with(warp::log("courseware"))
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: for<'de> Deserialize<'de> + Send,
{
    warp::body::content_length_limit(MAX_BODY).and(warp::body::json())
}

/// The token from an `Authorization: Bearer <token>` header.
fn bearer() -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::<String>("authorization").and_then(|header: String| async move {
        bearer_token(&header)
            .map(str::to_string)
            .ok_or_else(|| warp::reject::custom(Error::Unauthorized))
    })
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();

    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

async fn courses(courseware: Arc<Courseware>) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&courseware.courses().await?))
}

async fn course(course_id: i64, courseware: Arc<Courseware>) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&courseware.course(course_id).await?))
}

async fn sections(course_id: i64, courseware: Arc<Courseware>) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&courseware.sections(course_id).await?))
}

async fn session_names(
    course_id: i64,
    courseware: Arc<Courseware>,
) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&courseware.session_names(course_id).await?))
}

async fn signups(course_id: i64, courseware: Arc<Courseware>) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&courseware.signups(course_id).await?))
}

async fn released(section_id: i64, courseware: Arc<Courseware>) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(
        &courseware.released_sessions(section_id).await?,
    ))
}

async fn participants(
    section_id: i64,
    courseware: Arc<Courseware>,
) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&courseware.participants(section_id).await?))
}

async fn username(user_id: i64, courseware: Arc<Courseware>) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&courseware.username(user_id).await?))
}

async fn join(
    courseware: Arc<Courseware>,
    token: String,
    req: SignupRequest,
) -> Result<impl Reply, Rejection> {
    courseware
        .authenticate(&token)
        .await?
        .with_user(req.user_id)?
        .join(req.section_id)
        .await?;

    Ok(warp::reply::json(&"Sign-up successful"))
}

async fn leave(
    courseware: Arc<Courseware>,
    token: String,
    req: SignupRequest,
) -> Result<impl Reply, Rejection> {
    courseware
        .authenticate(&token)
        .await?
        .with_user(req.user_id)?
        .leave(req.section_id)
        .await?;

    Ok(warp::reply::json(&"Successfully left section"))
}

async fn register(
    courseware: Arc<Courseware>,
    creds: Credentials,
) -> Result<impl Reply, Rejection> {
    let session_token = courseware.register(creds).await?;

    Ok(warp::reply::with_status(
        warp::reply::json(&TokenBody { session_token }),
        StatusCode::CREATED,
    ))
}

async fn login(courseware: Arc<Courseware>, creds: Credentials) -> Result<impl Reply, Rejection> {
    let session_token = courseware.login(creds).await?;

    Ok(warp::reply::json(&TokenBody { session_token }))
}

async fn authenticate(
    courseware: Arc<Courseware>,
    body: Value,
) -> Result<impl Reply, Rejection> {
    // anything other than a string token is just a bad token
    let Some(token) = body.get("sessionToken").and_then(Value::as_str) else {
        return Err(Error::Unauthorized.into());
    };

    let authed = courseware.authenticate(token).await?;

    Ok(warp::reply::json(&authed.identity()))
}

async fn add_course(
    courseware: Arc<Courseware>,
    course: NewCourse,
) -> Result<impl Reply, Rejection> {
    let course = courseware.add_course(course).await?;

    Ok(warp::reply::with_status(
        warp::reply::json(&course),
        StatusCode::CREATED,
    ))
}

async fn add_section(
    courseware: Arc<Courseware>,
    section: NewSection,
) -> Result<impl Reply, Rejection> {
    let section = courseware.add_section(section).await?;

    Ok(warp::reply::with_status(
        warp::reply::json(&section),
        StatusCode::CREATED,
    ))
}

async fn add_session(
    courseware: Arc<Courseware>,
    session: NewSession,
) -> Result<impl Reply, Rejection> {
    let session = courseware.add_session(session).await?;

    Ok(warp::reply::with_status(
        warp::reply::json(&session),
        StatusCode::CREATED,
    ))
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = err.find::<Error>() {
        (StatusCode::from(e.clone()), e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if err.find::<warp::reject::MissingHeader>().is_some() {
        (StatusCode::UNAUTHORIZED, Error::Unauthorized.to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("unhandled rejection: {err:?}");
        (StatusCode::INTERNAL_SERVER_ERROR, Error::Internal.to_string())
    };

    Ok(warp::reply::with_status(warp::reply::json(&message), status))
}
