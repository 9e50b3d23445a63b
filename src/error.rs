use thiserror::Error;

#[derive(Error, Debug)]
#[allow(dead_code)]
pub enum AppError {
    #[error("Invalid registry endpoint '{0}': expected local:<runtime>, mock:<name>, or an http(s) URL")]
    InvalidEndpoint(String),

    #[error("Registry API error: {0}")]
    RegistryApi(String),

    #[error("Local runtime error: {0}")]
    LocalRuntime(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parse error: {0}")]
    DateParse(#[from] chrono::ParseError),
}
