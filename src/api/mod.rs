// HTTP trigger endpoint

mod dispatch;

pub use dispatch::{create_router, AppState, CORS_ALLOW_HEADERS};
