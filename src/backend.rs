#[derive(Debug)]
pub enum FindError {
    NotFound,
    Internal,
}

#[derive(Debug)]
pub enum InsertError {
    /// A unique column already holds this value.
    Duplicate,
    /// The row refers to a course (or user, or section) that doesn't exist.
    MissingParent,
    Internal,
}

mod backend_sql;
pub use backend_sql::*;
