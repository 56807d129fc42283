use once_cell::sync::Lazy;
use std::env;

pub static SERVER_ADDRESS: Lazy<String> = Lazy::new(|| {
    env::var("SERVER_ADDRESS")
        .unwrap_or_default()
        .trim_end_matches('/')
        .to_string()
});

pub static API_TOKEN: Lazy<String> = Lazy::new(|| env::var("API_TOKEN").unwrap_or_default());

pub const API_PREFIX: &str = "public/api/v3";

pub const LIST_PAGE_SIZE: usize = 500;

pub fn api_root(server: &str) -> String {
    format!("{}/{API_PREFIX}", server.trim_end_matches('/'))
}
