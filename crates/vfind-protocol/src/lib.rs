//! # vfind-protocol
//!
//! Wire model of the file manager connector.
//!
//! A request is a bag of string fields (query string plus form body) with a
//! `cmd` selector. [`Fields`] holds them, [`Command::parse`] binds them to a
//! typed request, and [`Response`] is the JSON envelope sent back.

pub mod command;
pub mod fields;
pub mod response;

pub use command::{
    Command, LsRequest, MkdirRequest, OpenRequest, PasteRequest, SearchRequest, UploadMode,
    UploadRequest, ZipdlRequest,
};
pub use fields::Fields;
pub use response::{Response, ZipdlInfo, API_VERSION};

/// Field name of uploaded file parts in a multipart body
pub const UPLOAD_FIELD: &str = "upload[]";

/// Errors raised while binding request fields
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

impl ProtocolError {
    /// Wire error code understood by the client
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::MissingField(_) | ProtocolError::InvalidField { .. } => "errCmdParams",
            ProtocolError::UnknownCommand(_) => "errUnknownCmd",
        }
    }

    pub fn to_response(&self) -> Response {
        let detail = match self {
            ProtocolError::UnknownCommand(cmd) => cmd.clone(),
            other => other.to_string(),
        };
        Response::error(self.code(), detail)
    }
}

/// One file part of a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Vec<u8>,
}
