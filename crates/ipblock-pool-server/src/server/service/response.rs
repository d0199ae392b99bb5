use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use ipblock_pool::BlockInfo;

/// A block record rendered as JSON, optionally indented.
pub struct BlockResponse {
    block: BlockInfo,
    pretty: bool,
}

impl BlockResponse {
    pub fn new(block: BlockInfo, pretty: bool) -> Self {
        Self { block, pretty }
    }
}

impl IntoResponse for BlockResponse {
    fn into_response(self) -> Response {
        let encoded = if self.pretty {
            serde_json::to_vec_pretty(&self.block)
        } else {
            serde_json::to_vec(&self.block)
        };

        match encoded {
            Ok(body) => (
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                )],
                body,
            )
                .into_response(),
            Err(err) => {
                tracing::error!("Failed to encode block response: {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
