use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema, Debug)]
pub struct CreatePartyRequest {
    pub name: String,
    pub size: i32,
}

#[derive(Serialize, ToSchema, Debug, PartialEq)]
pub struct CreatePartyResponse {
    #[serde(rename = "partyID")]
    pub party_id: String,
    #[serde(rename = "positionInQueue")]
    pub position_in_queue: i64,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ApiErrorResponse {
    pub error: String,
}
