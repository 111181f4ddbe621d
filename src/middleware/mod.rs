pub mod tracing;

pub use tracing::{request_id_middleware, REQUEST_ID_HEADER};
