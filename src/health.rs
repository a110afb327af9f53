//! Health check.
//!
//! `/health` at the root and `{base}/health` under every mounted bridge
//! answer `200 OK` with an empty body, for any HTTP verb. The check has no
//! dependencies: if the process can answer HTTP at all, it is healthy.

use http::StatusCode;

use crate::response::Response;

pub(crate) fn check() -> Response {
    Response::status(StatusCode::OK)
}
