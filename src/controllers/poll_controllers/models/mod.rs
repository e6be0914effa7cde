use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug)]
pub struct CastVoteRequest {
    pub option_id: String,
}

#[derive(Serialize, Debug)]
pub struct VoteCheckResponse {
    pub has_voted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_id: Option<String>,
}
