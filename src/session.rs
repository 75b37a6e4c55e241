use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use sqlx::FromRow;

/// One week's worth of course content.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: i64,
    pub course_id: i64,
    pub name: String,
    pub description: String,
    /// The week this session is released in, starting from 1.
    pub session_number: i64,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub course_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub session_number: i64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn session_number_as_string_or_number() {
        let numeric: NewSession = serde_json::from_str(
            r#"{ "courseId": 1, "name": "a", "description": "d", "sessionNumber": 3 }"#,
        )
        .unwrap();
        let stringly: NewSession =
            serde_json::from_str(r#"{ "courseId": 1, "name": "b", "sessionNumber": "3" }"#)
                .unwrap();

        assert_eq!(numeric.session_number, 3);
        assert_eq!(stringly.session_number, 3);
        assert_eq!(stringly.description, "");
    }

    #[test]
    fn session_number_must_be_numeric() {
        let r = serde_json::from_str::<NewSession>(
            r#"{ "courseId": 1, "name": "a", "sessionNumber": "three" }"#,
        );

        assert!(r.is_err());
    }
}
