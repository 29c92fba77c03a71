pub mod request;
pub mod response;
pub mod stream;
pub mod types;
pub mod upstream;
