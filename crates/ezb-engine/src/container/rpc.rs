//! Server side of the remote protocol

use ezb_sdk::{decode_request, encode_response, EjbRequest, EjbResponse, Throwable, WireError};
use tracing::debug;

use super::embedded::Embedded;

/// Routes encoded requests to the factories of a server
pub struct RpcDispatcher;

impl RpcDispatcher {
    /// Decode `bytes`, serve the request and encode the response
    ///
    /// Only malformed input is an `Err`; every other failure travels back
    /// inside the response.
    pub fn dispatch(embedded: &Embedded, bytes: &[u8]) -> Result<Vec<u8>, WireError> {
        let request = decode_request(bytes)?;
        let response = Self::handle(embedded, &request);
        encode_response(&response)
    }

    /// Serve a decoded request
    pub fn handle(embedded: &Embedded, request: &EjbRequest) -> EjbResponse {
        let factory = embedded
            .container(&request.container_id)
            .and_then(|container| container.factory(&request.factory_name));
        match factory {
            Some(factory) => factory.rpc_invoke(request),
            None => {
                debug!(
                    container = %request.container_id,
                    bean = %request.factory_name,
                    "Request for unknown bean"
                );
                EjbResponse::exception(
                    Throwable::ejb_exception(format!(
                        "No bean {} in container {} of server {}",
                        request.factory_name,
                        request.container_id,
                        embedded.id()
                    )),
                    false,
                )
            }
        }
    }
}
