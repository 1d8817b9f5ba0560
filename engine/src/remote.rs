//! The remote authoritative state contract.
//!
//! Transports live outside the engine; they only need to hand back decoded
//! payloads or an error.

use crate::{error::Result, CollectionVersionMap, Record, UpdateOperation};
use serde::{Deserialize, Serialize};

/// Body of the remote state endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateResponse {
    /// Current version token of every collection the app tracks
    pub state: CollectionVersionMap,
}

/// Body of the bulk collection endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionResponse {
    /// Every record of the collection
    pub results: Vec<Record>,
}

/// Source of the authoritative collection state.
#[allow(async_fn_in_trait)]
pub trait RemoteState {
    /// Fetch the version map of every tracked collection.
    async fn fetch_state(&self) -> Result<CollectionVersionMap>;

    /// Fetch every record of a collection.
    async fn fetch_collection(&self, collection: &str) -> Result<Vec<Record>>;

    /// Fetch the ordered change log of a collection since `since`.
    async fn fetch_updates(&self, collection: &str, since: &str) -> Result<Vec<UpdateOperation>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_response_shape() {
        let body = json!({"state": {"author": "51a40ce2c6ec494fcbf56e46"}});
        let parsed: StateResponse = serde_json::from_value(body).unwrap();
        assert_eq!(
            parsed.state.get("author").unwrap(),
            "51a40ce2c6ec494fcbf56e46"
        );
    }

    #[test]
    fn collection_response_ignores_paging_fields() {
        let body = json!({
            "results": [{"_id": "a1"}, {"_id": "a2"}],
            "count": 2
        });
        let parsed: CollectionResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.results.len(), 2);
    }
}
