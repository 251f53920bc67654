use ha_grosh::GroshError;
use ha_service_registry::ServiceError;
use thiserror::Error;

pub type ShoppingListResult<T> = Result<T, ShoppingListError>;

#[derive(Debug, Error)]
pub enum ShoppingListError {
    /// No config entry is loaded
    #[error("shopping list is not set up")]
    NotLoaded,

    /// The entry lacks a username or password
    #[error("config entry has no Grosh credentials")]
    MissingCredentials,

    /// No item with that id or name
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// Name or update rejected before touching the list
    #[error("invalid item: {0}")]
    InvalidItem(String),

    /// No household of the account matches the name or id
    #[error("Grosh list {0} does not exist")]
    UnknownList(String),

    /// A sync was requested before a list was chosen
    #[error("no Grosh list selected")]
    NoListSelected,

    #[error(transparent)]
    Grosh(#[from] GroshError),
}

impl From<ShoppingListError> for ServiceError {
    fn from(err: ShoppingListError) -> Self {
        match err {
            ShoppingListError::ItemNotFound(_)
            | ShoppingListError::InvalidItem(_)
            | ShoppingListError::UnknownList(_) => ServiceError::InvalidData(err.to_string()),
            other => ServiceError::CallFailed(other.to_string()),
        }
    }
}
