//! Open Match frontend messages
//!
//! Field numbers follow `api/frontend.proto` and `api/messages.proto` of the
//! `openmatch` package. Only the fields this client reads or writes are
//! declared; prost skips unknown fields on decode.

use std::collections::HashMap;

pub const CREATE_TICKET: &str = "/openmatch.FrontendService/CreateTicket";
pub const DELETE_TICKET: &str = "/openmatch.FrontendService/DeleteTicket";
pub const GET_TICKET: &str = "/openmatch.FrontendService/GetTicket";
pub const WATCH_ASSIGNMENTS: &str = "/openmatch.FrontendService/WatchAssignments";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchFields {
    #[prost(map = "string, double", tag = "1")]
    pub double_args: HashMap<String, f64>,
    #[prost(map = "string, string", tag = "2")]
    pub string_args: HashMap<String, String>,
    #[prost(string, repeated, tag = "3")]
    pub tags: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Assignment {
    #[prost(string, tag = "1")]
    pub connection: String,
    #[prost(map = "string, message", tag = "4")]
    pub extensions: HashMap<String, prost_types::Any>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ticket {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(message, optional, tag = "3")]
    pub assignment: Option<Assignment>,
    #[prost(message, optional, tag = "4")]
    pub search_fields: Option<SearchFields>,
    #[prost(map = "string, message", tag = "5")]
    pub extensions: HashMap<String, prost_types::Any>,
    #[prost(message, optional, tag = "6")]
    pub create_time: Option<prost_types::Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateTicketRequest {
    #[prost(message, optional, tag = "1")]
    pub ticket: Option<Ticket>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteTicketRequest {
    #[prost(string, tag = "1")]
    pub ticket_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetTicketRequest {
    #[prost(string, tag = "1")]
    pub ticket_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WatchAssignmentsRequest {
    #[prost(string, tag = "1")]
    pub ticket_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WatchAssignmentsResponse {
    #[prost(message, optional, tag = "1")]
    pub assignment: Option<Assignment>,
}
