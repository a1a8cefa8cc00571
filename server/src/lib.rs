pub mod api;
pub mod resolver;
pub mod service;
pub mod state;
pub mod store;
pub mod users;

pub use service::GalleryService;
pub use state::AppState;
