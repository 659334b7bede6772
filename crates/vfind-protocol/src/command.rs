//! Typed connector commands.
//!
//! [`Command::parse`] binds the flattened request fields to one explicit
//! request type per `cmd`. Uploaded file parts travel separately and are
//! attached by the server.

use vfind_core::{ChunkName, ChunkRange, MergeRequest};

use crate::fields::Fields;
use crate::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub target: Option<String>,
    pub init: bool,
    pub tree: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsRequest {
    pub target: String,
    pub intersect: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MkdirRequest {
    pub target: String,
    pub name: Option<String>,
    /// Relative paths created in one go
    pub dirs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasteRequest {
    pub dst: String,
    pub targets: Vec<String>,
    pub cut: bool,
    pub suffix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub q: String,
    pub target: Option<String>,
    pub mimes: Vec<String>,
}

/// What an upload request asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadMode {
    /// Whole files in `upload[]`
    Plain,
    /// One chunk of a larger file
    Chunk {
        cid: u64,
        chunk: ChunkName,
        range: ChunkRange,
    },
    /// Reassemble a completed transfer
    Merge(MergeRequest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub target: String,
    /// Per-file destination overrides (target hashes)
    pub upload_path: Vec<String>,
    pub mode: UploadMode,
}

impl UploadRequest {
    /// Destination override for file `index` out of `count`.
    ///
    /// Applies only when one override was sent per file and it differs from
    /// the request target.
    pub fn upload_path_for(&self, index: usize, count: usize) -> Option<&str> {
        if self.upload_path.len() != count {
            return None;
        }
        self.upload_path
            .get(index)
            .map(String::as_str)
            .filter(|p| !p.is_empty() && *p != self.target)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZipdlRequest {
    /// Build an archive from targets
    Export { targets: Vec<String> },
    /// Collect a previously exported archive
    Download {
        key: String,
        name: String,
        mime: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open(OpenRequest),
    Ls(LsRequest),
    Tree { target: String },
    Parents { target: String },
    Info { targets: Vec<String> },
    Mkdir(MkdirRequest),
    Mkfile { target: String, name: String },
    Rename { target: String, name: String },
    Rm { targets: Vec<String> },
    Paste(PasteRequest),
    Size { targets: Vec<String> },
    File { target: String, download: bool },
    Search(SearchRequest),
    Upload(UploadRequest),
    Zipdl(ZipdlRequest),
    Abort,
    Ping,
}

impl Command {
    pub fn parse(fields: &Fields) -> Result<Self, ProtocolError> {
        let cmd = fields.required("cmd")?;
        let command = match cmd.as_str() {
            "open" => Command::Open(OpenRequest {
                target: fields.optional("target"),
                init: fields.flag("init")?,
                tree: fields.flag("tree")?,
            }),
            "ls" => Command::Ls(LsRequest {
                target: fields.required("target")?,
                intersect: fields.list("intersect"),
            }),
            "tree" => Command::Tree {
                target: fields.required("target")?,
            },
            "parents" => Command::Parents {
                target: fields.required("target")?,
            },
            "info" => Command::Info {
                targets: non_empty(fields, "targets")?,
            },
            "mkdir" => {
                let req = MkdirRequest {
                    target: fields.required("target")?,
                    name: fields.optional("name"),
                    dirs: fields.list("dirs"),
                };
                if req.name.is_none() && req.dirs.is_empty() {
                    return Err(ProtocolError::MissingField("name"));
                }
                Command::Mkdir(req)
            }
            "mkfile" => Command::Mkfile {
                target: fields.required("target")?,
                name: fields.required("name")?,
            },
            "rename" => Command::Rename {
                target: fields.required("target")?,
                name: fields.required("name")?,
            },
            "rm" => Command::Rm {
                targets: non_empty(fields, "targets")?,
            },
            "paste" => Command::Paste(PasteRequest {
                dst: fields.required("dst")?,
                targets: non_empty(fields, "targets")?,
                cut: fields.flag("cut")?,
                suffix: fields.optional("suffix"),
            }),
            "size" => Command::Size {
                targets: non_empty(fields, "targets")?,
            },
            "file" => Command::File {
                target: fields.required("target")?,
                download: fields.flag("download")?,
            },
            "search" => Command::Search(SearchRequest {
                q: fields.required("q")?,
                target: fields.optional("target"),
                mimes: fields.list("mimes"),
            }),
            "upload" => Command::Upload(parse_upload(fields)?),
            "zipdl" => Command::Zipdl(parse_zipdl(fields)?),
            "abort" => Command::Abort,
            "ping" => Command::Ping,
            _ => return Err(ProtocolError::UnknownCommand(cmd)),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Open(_) => "open",
            Command::Ls(_) => "ls",
            Command::Tree { .. } => "tree",
            Command::Parents { .. } => "parents",
            Command::Info { .. } => "info",
            Command::Mkdir(_) => "mkdir",
            Command::Mkfile { .. } => "mkfile",
            Command::Rename { .. } => "rename",
            Command::Rm { .. } => "rm",
            Command::Paste(_) => "paste",
            Command::Size { .. } => "size",
            Command::File { .. } => "file",
            Command::Search(_) => "search",
            Command::Upload(_) => "upload",
            Command::Zipdl(_) => "zipdl",
            Command::Abort => "abort",
            Command::Ping => "ping",
        }
    }
}

fn non_empty(fields: &Fields, key: &'static str) -> Result<Vec<String>, ProtocolError> {
    let values = fields.list(key);
    if values.is_empty() {
        return Err(ProtocolError::MissingField(key));
    }
    Ok(values)
}

fn invalid(field: &'static str, value: &str) -> ProtocolError {
    ProtocolError::InvalidField {
        field,
        value: value.to_string(),
    }
}

fn parse_upload(fields: &Fields) -> Result<UploadRequest, ProtocolError> {
    let target = fields.required("target")?;
    let upload_path = fields.list("upload_path");
    let cid = fields.number::<u64>("cid")?.filter(|&c| c != 0);

    let mode = match (fields.optional("chunk"), cid) {
        (None, _) => UploadMode::Plain,
        (Some(chunk), Some(cid)) => {
            let range = fields.required("range")?;
            UploadMode::Chunk {
                cid,
                chunk: chunk.parse().map_err(|_| invalid("chunk", &chunk))?,
                range: range.parse().map_err(|_| invalid("range", &range))?,
            }
        }
        (Some(chunk), None) => {
            UploadMode::Merge(chunk.parse().map_err(|_| invalid("chunk", &chunk))?)
        }
    };

    Ok(UploadRequest {
        target,
        upload_path,
        mode,
    })
}

fn parse_zipdl(fields: &Fields) -> Result<ZipdlRequest, ProtocolError> {
    let targets = non_empty(fields, "targets")?;
    if !fields.flag("download")? {
        return Ok(ZipdlRequest::Export { targets });
    }
    // download form: [_, key, name, mime]
    match <[String; 4]>::try_from(targets) {
        Ok([_, key, name, mime]) if !key.is_empty() => Ok(ZipdlRequest::Download { key, name, mime }),
        _ => Err(ProtocolError::MissingField("targets")),
    }
}
