mod user_service;

pub use user_service::{ProfileUpdate, Registration, UserService, DEFAULT_PAGE_SIZE};
