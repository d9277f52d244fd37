use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Category list is empty")]
    EmptyCategories,

    #[error("Duplicate item id: {0}")]
    DuplicateItemId(String),

    #[error("Item at position {0} has an empty id")]
    EmptyItemId(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
