//! Messages exchanged with the OmniDocs capture popup over the cross-window channel.
//!
//! Inbound traffic is untrusted: [`classify`] turns a raw payload into a typed [`Request`]
//! or explains why it was rejected. Outbound [`Response`] values are built fresh for every
//! reply and serialized with [`Response::to_wire`].

mod fields;

pub use fields::{parse_field_values, FieldValues};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Capability descriptor announced in every init response.
pub const POST_MESSAGE_TYPE: &str = "Document";

pub mod event_type {
    pub const INIT_REQUEST: &str = "omnidocs-init-request";
    pub const INIT_RESPONSE: &str = "omnidocs-init-response";
    pub const DATA_REQUEST: &str = "omnidocs-data-request";
    pub const DATA_RESPONSE: &str = "omnidocs-data-response";
    pub const DELIVERY_REQUEST: &str = "omnidocs-delivery-request";
    /// Spelling the popup has been seen to use for delivery requests.
    pub const DELIVER_REQUEST: &str = "omnidocs-deliver-request";
    pub const DELIVER_RESPONSE: &str = "omnidocs-deliver-response";
    pub const CLOSE_REQUEST: &str = "omnidocs-close-request";

    pub(crate) const REQUESTS: [&str; 5] = [
        INIT_REQUEST,
        DATA_REQUEST,
        DELIVERY_REQUEST,
        DELIVER_REQUEST,
        CLOSE_REQUEST,
    ];
}

/// Reasons an inbound payload is not a usable request.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has no string eventType")]
    MissingEventType,
    #[error("unknown eventType {0:?}")]
    UnknownEventType(String),
    #[error("invalid {event_type}: {reason}")]
    Invalid { event_type: String, reason: String },
    #[error("invalid field values: {0}")]
    InvalidFieldValues(String),
}

/// Which form the popup is asking the host to fill.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FormContext {
    Initial,
    AdditionalForm,
}

/// Kind of result carried by a delivery request.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentType {
    Document,
    Element,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub correlation_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataRequest {
    pub id: String,
    pub correlation_id: String,
    pub form_context: FormContext,
    /// Field keys the popup wants values for, in display order.
    pub data: Vec<String>,
}

impl DataRequest {
    /// Pre-filled answer listing every requested key with an empty value, in the
    /// `[{"key": .., "value": ""}]` shape an operator edits before responding.
    pub fn response_template(&self) -> Value {
        Value::Array(
            self.data
                .iter()
                .map(|key| serde_json::json!({ "key": key, "value": "" }))
                .collect(),
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub id: String,
    pub correlation_id: String,
    pub document_type: DocumentType,
    /// The delivered reference, usually a download URL.
    pub data: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloseRequest {
    pub correlation_id: String,
}

/// Requests the popup sends to the host.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "eventType")]
pub enum Request {
    #[serde(rename = "omnidocs-init-request")]
    Init(InitRequest),
    #[serde(rename = "omnidocs-data-request")]
    Data(DataRequest),
    #[serde(
        rename = "omnidocs-delivery-request",
        alias = "omnidocs-deliver-request"
    )]
    Delivery(DeliveryRequest),
    #[serde(rename = "omnidocs-close-request")]
    Close(CloseRequest),
}

impl Request {
    pub fn event_type(&self) -> &'static str {
        match self {
            Request::Init(_) => event_type::INIT_REQUEST,
            Request::Data(_) => event_type::DATA_REQUEST,
            Request::Delivery(_) => event_type::DELIVERY_REQUEST,
            Request::Close(_) => event_type::CLOSE_REQUEST,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Request::Init(req) => &req.correlation_id,
            Request::Data(req) => &req.correlation_id,
            Request::Delivery(req) => &req.correlation_id,
            Request::Close(req) => &req.correlation_id,
        }
    }

    pub fn to_wire(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub correlation_id: String,
    pub post_message_type: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataResponse {
    pub data: FieldValues,
}

/// Responses the host sends back to the popup.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "eventType")]
pub enum Response {
    #[serde(rename = "omnidocs-init-response")]
    Init(InitResponse),
    #[serde(rename = "omnidocs-data-response")]
    Data(DataResponse),
    #[serde(rename = "omnidocs-deliver-response")]
    Deliver,
}

impl Response {
    pub fn init(request: &InitRequest) -> Self {
        Response::Init(InitResponse {
            correlation_id: request.correlation_id.clone(),
            post_message_type: POST_MESSAGE_TYPE.to_string(),
        })
    }

    pub fn data(values: FieldValues) -> Self {
        Response::Data(DataResponse { data: values })
    }

    pub fn deliver() -> Self {
        Response::Deliver
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Response::Init(_) => event_type::INIT_RESPONSE,
            Response::Data(_) => event_type::DATA_RESPONSE,
            Response::Deliver => event_type::DELIVER_RESPONSE,
        }
    }

    pub fn to_wire(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Validate an inbound payload and build the matching typed request.
///
/// Fields other than the ones a request type declares are ignored.
pub fn classify(raw: &Value) -> Result<Request, SchemaError> {
    let object = raw.as_object().ok_or(SchemaError::NotAnObject)?;
    let event = object
        .get("eventType")
        .and_then(Value::as_str)
        .ok_or(SchemaError::MissingEventType)?;

    if !event_type::REQUESTS.contains(&event) {
        return Err(SchemaError::UnknownEventType(event.to_string()));
    }

    Request::deserialize(raw).map_err(|err| SchemaError::Invalid {
        event_type: event.to_string(),
        reason: err.to_string(),
    })
}
