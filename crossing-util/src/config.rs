use serde::Serialize;
use serde::de::DeserializeOwned;

/// A configuration type that is persisted as a JSON document in a [`Store`](crate::store::Store)
pub trait StoredConfig
where
    Self: Serialize,
    Self: DeserializeOwned,
{
    fn kind() -> &'static str;

    /// This config's preferred file name exluding the extension.
    fn default_name() -> &'static str {
        Self::kind()
    }
}
