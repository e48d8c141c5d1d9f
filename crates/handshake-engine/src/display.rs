use message_schema::DataRequest;
use omnidocs_core_types::SessionId;
use tracing::info;

/// UI surface that shows pending data requests to an operator, who eventually answers
/// through [`crate::DocumentClient::send_data_response`].
///
/// Called synchronously from the handshake engine; implementations must not block.
pub trait DataRequestDisplay: Send + Sync {
    fn display_data_request(&self, session: SessionId, request: &DataRequest);
}

/// Display that only logs the request.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogDisplay;

impl DataRequestDisplay for LogDisplay {
    fn display_data_request(&self, session: SessionId, request: &DataRequest) {
        info!(
            target: "handshake",
            %session,
            id = %request.id,
            form_context = ?request.form_context,
            fields = ?request.data,
            "data request awaiting operator"
        );
    }
}
