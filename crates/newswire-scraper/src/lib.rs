pub mod extract;
pub mod http;

pub use http::HttpScraper;
