//! Command handlers for the connector

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;

use tracing::{debug, warn};
use vfind_config::{log_archive_info, log_upload_info, log_upload_warn};
use vfind_core::info::{self, VolumeOptions};
use vfind_core::volume::join_path;
use vfind_core::{
    ops, ArchiveExporter, ChunkName, ChunkRange, ChunkReassembler, FileInfo, FinderError,
    MergeRequest, Mount, Resolved, Result, VolumeRegistry, ZIP_MIME,
};
use vfind_protocol::{
    Command, LsRequest, MkdirRequest, OpenRequest, PasteRequest, Response, SearchRequest,
    UploadMode, UploadRequest, UploadedFile, ZipdlInfo, ZipdlRequest, API_VERSION,
};

/// Outcome of one command, turned into an HTTP response by the server
pub enum Reply {
    Json(Response),
    /// Raw file body for `file`, read lazily while the response streams
    File {
        name: String,
        mime: String,
        reader: Box<dyn Read + Send>,
        size: u64,
        attachment: bool,
    },
    /// One-shot archive download, already unlinked from disk
    Archive {
        name: String,
        mime: String,
        file: File,
        size: u64,
    },
    NoContent,
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Json(resp) => f.debug_tuple("Json").field(resp).finish(),
            Reply::File {
                name, size, attachment, ..
            } => f
                .debug_struct("File")
                .field("name", name)
                .field("size", size)
                .field("attachment", attachment)
                .finish_non_exhaustive(),
            Reply::Archive { name, size, .. } => f
                .debug_struct("Archive")
                .field("name", name)
                .field("size", size)
                .finish_non_exhaustive(),
            Reply::NoContent => f.write_str("NoContent"),
        }
    }
}

impl Reply {
    /// JSON body, if this reply has one
    pub fn json(&self) -> Option<&Response> {
        match self {
            Reply::Json(resp) => Some(resp),
            _ => None,
        }
    }
}

/// Command handler for the connector.
///
/// Every method performs blocking volume I/O; the server calls
/// [`CommandHandler::handle`] from the blocking thread pool.
pub struct CommandHandler {
    registry: VolumeRegistry,
    reassembler: ChunkReassembler,
    exporter: ArchiveExporter,
    upload_max_size: String,
}

impl CommandHandler {
    pub fn new(
        registry: VolumeRegistry,
        exporter: ArchiveExporter,
        upload_max_size: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            reassembler: ChunkReassembler::new(),
            exporter,
            upload_max_size: upload_max_size.into(),
        }
    }

    pub fn registry(&self) -> &VolumeRegistry {
        &self.registry
    }

    pub fn exporter(&self) -> &ArchiveExporter {
        &self.exporter
    }

    /// Handle one command; errors become an error envelope
    pub fn handle(&self, command: Command, files: Vec<UploadedFile>) -> Reply {
        let cmd = command.name();
        let result = match command {
            Command::Open(req) => self.open(req).map(Reply::Json),
            Command::Ls(req) => self.ls(req).map(Reply::Json),
            Command::Tree { target } => self.tree(&target).map(Reply::Json),
            Command::Parents { target } => self.parents(&target).map(Reply::Json),
            Command::Info { targets } => Ok(Reply::Json(self.info(&targets))),
            Command::Mkdir(req) => self.mkdir(req).map(Reply::Json),
            Command::Mkfile { target, name } => self.mkfile(&target, &name).map(Reply::Json),
            Command::Rename { target, name } => self.rename(&target, &name).map(Reply::Json),
            Command::Rm { targets } => Ok(Reply::Json(self.rm(&targets))),
            Command::Paste(req) => self.paste(req).map(Reply::Json),
            Command::Size { targets } => self.size(&targets).map(Reply::Json),
            Command::File { target, download } => self.file(&target, download),
            Command::Search(req) => self.search(req).map(Reply::Json),
            Command::Upload(req) => self.upload(req, files).map(Reply::Json),
            Command::Zipdl(ZipdlRequest::Export { targets }) => {
                self.zip_export(&targets).map(Reply::Json)
            }
            Command::Zipdl(ZipdlRequest::Download { key, name, mime }) => {
                self.zip_download(&key, name, mime)
            }
            Command::Abort => Ok(Reply::NoContent),
            Command::Ping => Ok(Reply::Json(Response::new())),
        };

        match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!(cmd, code = e.code(), error = %e, "Command failed");
                Reply::Json(Response::error(e.code(), e.to_string()))
            }
        }
    }

    fn resolve(&self, target: &str) -> Result<Resolved> {
        self.registry.resolve_target(target)
    }

    fn resolve_dir(&self, target: &str) -> Result<Resolved> {
        let resolved = self.resolve(target)?;
        if !resolved.mount.volume.stat(&resolved.path)?.is_dir {
            return Err(FinderError::InvalidTarget(format!(
                "not a directory: {}",
                target
            )));
        }
        Ok(resolved)
    }

    fn default_root(&self) -> Result<Resolved> {
        self.registry
            .default_mount()
            .map(|mount| Resolved {
                mount: mount.clone(),
                path: "/".to_string(),
            })
            .ok_or_else(|| FinderError::VolumeNotFound("no volumes mounted".to_string()))
    }

    fn open(&self, req: OpenRequest) -> Result<Response> {
        let Resolved { mount, path } = match req.target.as_deref() {
            Some(target) => self.resolve_dir(target)?,
            None => self.default_root()?,
        };

        let cwd = FileInfo::stat(&mount, &path)?;
        let mut files = info::list(&mount, &path)?;
        push_unique(&mut files, cwd.clone());

        if req.tree {
            for other in self.registry.mounts() {
                match FileInfo::root(other) {
                    Ok(root) => push_unique(&mut files, root),
                    Err(e) => warn!(volume = %other.name(), error = %e, "Volume root unavailable"),
                }
            }
            for item in ops::parents(&mount, &path)? {
                push_unique(&mut files, item);
            }
        }

        let mut resp = Response::new();
        if req.init {
            resp.api = Some(API_VERSION.to_string());
        }
        resp.upl_max_size = Some(self.upload_max_size.clone());
        resp.options = Some(VolumeOptions::for_mount(&mount));
        resp.cwd = Some(cwd);
        resp.files = Some(files);
        Ok(resp)
    }

    fn ls(&self, req: LsRequest) -> Result<Response> {
        let Resolved { mount, path } = self.resolve_dir(&req.target)?;
        let list = info::list(&mount, &path)?
            .into_iter()
            .filter(|item| req.intersect.is_empty() || req.intersect.contains(&item.name))
            .map(|item| (item.hash, item.name))
            .collect();
        Ok(Response {
            list: Some(list),
            ..Response::new()
        })
    }

    fn tree(&self, target: &str) -> Result<Response> {
        let Resolved { mount, path } = self.resolve_dir(target)?;
        Ok(Response {
            tree: Some(ops::subdirs(&mount, &path)?),
            ..Response::new()
        })
    }

    fn parents(&self, target: &str) -> Result<Response> {
        let Resolved { mount, path } = self.resolve_dir(target)?;
        Ok(Response {
            tree: Some(ops::parents(&mount, &path)?),
            ..Response::new()
        })
    }

    fn info(&self, targets: &[String]) -> Response {
        let files = targets
            .iter()
            .filter_map(|target| {
                match self
                    .resolve(target)
                    .and_then(|r| FileInfo::stat(&r.mount, &r.path))
                {
                    Ok(item) => Some(item),
                    Err(e) => {
                        debug!(target = %target, error = %e, "Skipping unknown target");
                        None
                    }
                }
            })
            .collect();
        Response {
            files: Some(files),
            ..Response::new()
        }
    }

    fn mkdir(&self, req: MkdirRequest) -> Result<Response> {
        let Resolved { mount, path } = self.resolve_dir(&req.target)?;
        let mut added = Vec::new();

        if let Some(name) = &req.name {
            added.push(ops::make_dir(&mount, &path, name)?);
        }

        let mut resp = Response::new();
        if !req.dirs.is_empty() {
            let mut hashes = BTreeMap::new();
            for relative in &req.dirs {
                let mut current = path.clone();
                for part in relative.split('/').filter(|p| !p.is_empty()) {
                    let next = join_path(&current, part);
                    if !mount.volume.exists(&next) {
                        added.push(ops::make_dir(&mount, &current, part)?);
                    }
                    current = next;
                }
                hashes.insert(relative.clone(), mount.hash(&current));
            }
            resp.hashes = Some(hashes);
        }
        Ok(resp.with_added(added))
    }

    fn mkfile(&self, target: &str, name: &str) -> Result<Response> {
        let Resolved { mount, path } = self.resolve_dir(target)?;
        let created = ops::make_file(&mount, &path, name)?;
        Ok(Response::new().with_added(vec![created]))
    }

    fn rename(&self, target: &str, name: &str) -> Result<Response> {
        let Resolved { mount, path } = self.resolve(target)?;
        let renamed = ops::rename(&mount, &path, name)?;
        Ok(Response::new()
            .with_added(vec![renamed])
            .with_removed(vec![target.to_string()]))
    }

    fn rm(&self, targets: &[String]) -> Response {
        let mut removed = Vec::new();
        let mut warnings = Vec::new();
        for target in targets {
            match self
                .resolve(target)
                .and_then(|r| ops::remove(&r.mount, &r.path))
            {
                Ok(()) => removed.push(target.clone()),
                Err(e) => {
                    warn!(target = %target, error = %e, "Remove failed");
                    warnings.push(format!("{}: {}", e.code(), target));
                }
            }
        }
        Response::new()
            .with_removed(removed)
            .with_warnings(warnings)
    }

    fn paste(&self, req: PasteRequest) -> Result<Response> {
        let dst = self.resolve_dir(&req.dst)?;
        let suffix = req
            .suffix
            .as_deref()
            .unwrap_or(ops::DEFAULT_PASTE_SUFFIX);

        let mut added = Vec::new();
        let mut removed = Vec::new();
        let mut warnings = Vec::new();
        for target in &req.targets {
            let result = self.resolve(target).and_then(|src| {
                if req.cut {
                    ops::move_into(&src.mount, &src.path, &dst.mount, &dst.path, suffix)
                } else {
                    ops::copy_into(&src.mount, &src.path, &dst.mount, &dst.path, suffix)
                }
            });
            match result {
                Ok(items) => {
                    added.extend(items);
                    if req.cut {
                        removed.push(target.clone());
                    }
                }
                Err(e) => {
                    warn!(target = %target, error = %e, "Paste failed");
                    warnings.push(format!("{}: {}", e.code(), target));
                }
            }
        }
        Ok(Response::new()
            .with_added(added)
            .with_removed(removed)
            .with_warnings(warnings))
    }

    fn size(&self, targets: &[String]) -> Result<Response> {
        let mut total = 0u64;
        for target in targets {
            let Resolved { mount, path } = self.resolve(target)?;
            total = total.saturating_add(ops::total_size(&mount, &path)?);
        }
        Ok(Response {
            size: Some(total),
            ..Response::new()
        })
    }

    fn file(&self, target: &str, download: bool) -> Result<Reply> {
        let Resolved { mount, path } = self.resolve(target)?;
        let item = FileInfo::stat(&mount, &path)?;
        if item.is_dir() {
            return Err(FinderError::InvalidTarget(format!(
                "is a directory: {}",
                target
            )));
        }
        let reader = mount.volume.open(&path)?;
        Ok(Reply::File {
            name: item.name,
            mime: item.mime,
            reader,
            size: item.size,
            attachment: download,
        })
    }

    fn search(&self, req: SearchRequest) -> Result<Response> {
        let scopes = match req.target.as_deref() {
            Some(target) => vec![self.resolve_dir(target)?],
            None => self
                .registry
                .mounts()
                .iter()
                .map(|mount| Resolved {
                    mount: mount.clone(),
                    path: "/".to_string(),
                })
                .collect(),
        };
        let mut files = Vec::new();
        for Resolved { mount, path } in scopes {
            files.extend(ops::search(&mount, &path, &req.q, &req.mimes)?);
        }
        Ok(Response {
            files: Some(files),
            ..Response::new()
        })
    }

    /// Destination override for upload file `index`, which must stay on the
    /// same volume as the request target.
    fn upload_dir(
        &self,
        mount: &Mount,
        req: &UploadRequest,
        index: usize,
        count: usize,
    ) -> Result<Option<String>> {
        let Some(hash) = req.upload_path_for(index, count) else {
            return Ok(None);
        };
        let resolved = self.resolve_dir(hash)?;
        if resolved.mount.id != mount.id {
            return Err(FinderError::InvalidTarget(format!(
                "upload path on another volume: {}",
                hash
            )));
        }
        Ok(Some(resolved.path))
    }

    fn upload(&self, req: UploadRequest, files: Vec<UploadedFile>) -> Result<Response> {
        let Resolved { mount, path } = self.resolve_dir(&req.target)?;
        match &req.mode {
            UploadMode::Plain => Ok(self.upload_plain(&mount, &path, &req, &files)),
            UploadMode::Chunk { cid, chunk, range } => {
                self.upload_chunk(&mount, &path, &req, &files, *cid, chunk, range)
            }
            UploadMode::Merge(merge) => {
                let upload_dir = self.upload_dir(&mount, &req, 0, 1)?;
                let merged = self
                    .reassembler
                    .merge(&mount, &path, upload_dir.as_deref(), merge)?;
                log_upload_info!(
                    "Chunked upload complete",
                    volume = mount.name(),
                    file = merge.filename.as_str(),
                    size = merged.size
                );
                Ok(Response::new().with_added(vec![merged]))
            }
        }
    }

    fn upload_plain(
        &self,
        mount: &Mount,
        dir: &str,
        req: &UploadRequest,
        files: &[UploadedFile],
    ) -> Response {
        let mut added = Vec::with_capacity(files.len());
        let mut warnings = Vec::new();
        for (i, file) in files.iter().enumerate() {
            let result = self.upload_dir(mount, req, i, files.len()).and_then(|over| {
                let dest = over.unwrap_or_else(|| dir.to_string());
                ops::upload_file(mount, &dest, &file.filename, &mut file.data.as_slice())
            });
            match result {
                Ok(item) => added.push(item),
                Err(e) => {
                    log_upload_warn!(
                        "Upload failed",
                        file = file.filename.as_str(),
                        error = tracing::field::display(&e)
                    );
                    warnings.push(format!("{}: {}", e.code(), file.filename));
                }
            }
        }
        Response::new().with_added(added).with_warnings(warnings)
    }

    #[allow(clippy::too_many_arguments)]
    fn upload_chunk(
        &self,
        mount: &Mount,
        dir: &str,
        req: &UploadRequest,
        files: &[UploadedFile],
        cid: u64,
        chunk: &ChunkName,
        range: &ChunkRange,
    ) -> Result<Response> {
        if files.is_empty() {
            return Err(FinderError::InvalidChunk(format!(
                "no data for {}",
                chunk.filename
            )));
        }
        for (i, file) in files.iter().enumerate() {
            let upload_dir = self.upload_dir(mount, req, i, files.len())?;
            self.reassembler.write_chunk(
                mount,
                dir,
                upload_dir.as_deref(),
                cid,
                chunk,
                range,
                &file.data,
            )?;
        }

        let mut resp = Response::new().with_added(Vec::new());
        if chunk.is_last() {
            resp.chunk_merged =
                Some(MergeRequest::new(cid, chunk.total, chunk.filename.clone()).token());
            resp.chunk_name = Some(chunk.filename.clone());
        }
        Ok(resp)
    }

    fn zip_export(&self, targets: &[String]) -> Result<Response> {
        let resolved = targets
            .iter()
            .map(|t| self.resolve(t))
            .collect::<Result<Vec<_>>>()?;
        let job = self.exporter.plan(resolved)?;
        let artifact = self.exporter.export(&job)?;
        log_archive_info!(
            "Archive ready",
            key = artifact.key.as_str(),
            bytes = job.total_size
        );
        Ok(Response {
            zipdl: Some(ZipdlInfo {
                mime: artifact.mime,
                file: artifact.key,
                name: artifact.name,
            }),
            ..Response::new()
        })
    }

    fn zip_download(&self, key: &str, name: String, mime: String) -> Result<Reply> {
        let taken = self.exporter.artifacts().take(key)?;
        Ok(Reply::Archive {
            name: if name.is_empty() {
                format!("{}.zip", key)
            } else {
                name
            },
            mime: if mime.is_empty() {
                ZIP_MIME.to_string()
            } else {
                mime
            },
            file: taken.file,
            size: taken.size,
        })
    }
}

fn push_unique(files: &mut Vec<FileInfo>, item: FileInfo) {
    if !files.iter().any(|f| f.hash == item.hash) {
        files.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use vfind_config::testing::TestEnvironment;
    use vfind_core::target;
    use vfind_protocol::Fields;

    fn handler(env: &TestEnvironment) -> CommandHandler {
        crate::build_handler(&env.config()).unwrap()
    }

    fn run(h: &CommandHandler, pairs: &[(&str, &str)]) -> Response {
        let fields: Fields = pairs.iter().copied().collect();
        let command = Command::parse(&fields).unwrap();
        match h.handle(command, Vec::new()) {
            Reply::Json(resp) => resp,
            other => panic!("expected json, got {:?}", other),
        }
    }

    fn root_hash(h: &CommandHandler) -> String {
        h.registry().default_mount().unwrap().hash("/")
    }

    #[test]
    fn test_open_init_lists_cwd() {
        let env = TestEnvironment::new().unwrap();
        env.create_file("files", "a.txt", b"abc").unwrap();
        let h = handler(&env);

        let resp = run(&h, &[("cmd", "open"), ("init", "1"), ("tree", "1")]);
        assert_eq!(resp.api.as_deref(), Some(API_VERSION));
        let cwd = resp.cwd.unwrap();
        assert_eq!(cwd.hash, root_hash(&h));
        let files = resp.files.unwrap();
        assert!(files.iter().any(|f| f.name == "a.txt"));
        assert_eq!(files.iter().filter(|f| f.hash == cwd.hash).count(), 1);
    }

    #[test]
    fn test_mkdir_mkfile_scenario() {
        let env = TestEnvironment::new().unwrap();
        let h = handler(&env);
        let root = root_hash(&h);

        let resp = run(&h, &[("cmd", "mkdir"), ("target", root.as_str()), ("name", "docs")]);
        let docs = resp.added.unwrap().remove(0);
        assert_eq!(docs.mime, "directory");
        assert_eq!(docs.dirs, 0);

        run(&h, &[("cmd", "mkfile"), ("target", docs.hash.as_str()), ("name", "a.txt")]);
        fs::write(env.volume_root("files").unwrap().join("docs/a.txt"), b"0123456789").unwrap();

        let resp = run(&h, &[("cmd", "open"), ("target", docs.hash.as_str())]);
        let listed: Vec<_> = resp
            .files
            .unwrap()
            .into_iter()
            .filter(|f| f.hash != docs.hash)
            .collect();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "a.txt");
        assert_eq!(listed[0].size, 10);
    }

    #[test]
    fn test_mkdir_dirs_reports_hashes() {
        let env = TestEnvironment::new().unwrap();
        let h = handler(&env);
        let root = root_hash(&h);

        let resp = run(
            &h,
            &[("cmd", "mkdir"), ("target", root.as_str()), ("dirs[]", "/a/b"), ("dirs[]", "/a/c")],
        );
        let hashes = resp.hashes.unwrap();
        let mount = h.registry().default_mount().unwrap();
        assert_eq!(hashes["/a/b"], mount.hash("/a/b"));
        assert_eq!(resp.added.unwrap().len(), 3);
        assert!(env.volume_root("files").unwrap().join("a/c").is_dir());
    }

    #[test]
    fn test_ls_intersect() {
        let env = TestEnvironment::new().unwrap();
        env.create_file("files", "a.txt", b"").unwrap();
        env.create_file("files", "b.txt", b"").unwrap();
        let h = handler(&env);
        let root = root_hash(&h);

        let resp = run(&h, &[("cmd", "ls"), ("target", root.as_str()), ("intersect[]", "b.txt")]);
        let list = resp.list.unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.values().any(|n| n == "b.txt"));
    }

    #[test]
    fn test_rm_reports_only_removed() {
        let env = TestEnvironment::new().unwrap();
        env.create_file("files", "a.txt", b"x").unwrap();
        let h = handler(&env);
        let mount = h.registry().default_mount().unwrap().clone();
        let a = mount.hash("/a.txt");
        let ghost = mount.hash("/ghost.txt");

        let resp = run(&h, &[("cmd", "rm"), ("targets[]", a.as_str()), ("targets[]", ghost.as_str())]);
        assert_eq!(resp.removed.unwrap(), vec![a]);
        assert_eq!(resp.warning.unwrap().len(), 1);
    }

    #[test]
    fn test_paste_across_volumes() {
        let env = TestEnvironment::with_volumes(&["left", "right"]).unwrap();
        env.create_file("left", "src/x.txt", b"x").unwrap();
        let h = handler(&env);
        let left = h.registry().mounts()[0].clone();
        let right = h.registry().mounts()[1].clone();

        let resp = run(
            &h,
            &[
                ("cmd", "paste"),
                ("dst", right.hash("/").as_str()),
                ("targets[]", left.hash("/src").as_str()),
                ("cut", "1"),
            ],
        );
        assert_eq!(resp.removed.unwrap(), vec![left.hash("/src")]);
        assert!(env.volume_root("right").unwrap().join("src/x.txt").exists());
        assert!(!env.volume_root("left").unwrap().join("src").exists());
    }

    #[test]
    fn test_errors_become_envelopes() {
        let env = TestEnvironment::new().unwrap();
        let h = handler(&env);
        let mount = h.registry().default_mount().unwrap().clone();

        let resp = run(&h, &[("cmd", "tree"), ("target", "garbage")]);
        assert_eq!(resp.error.unwrap().0, "errCmdParams");

        let resp = run(&h, &[("cmd", "tree"), ("target", target::encode("vnope", "/").as_str())]);
        assert_eq!(resp.error.unwrap().0, "errFolderNotFound");

        let resp = run(&h, &[("cmd", "size"), ("targets[]", mount.hash("/../etc").as_str())]);
        assert_eq!(resp.error.unwrap().0, "errPerm");
    }

    #[test]
    fn test_chunked_upload_flow() {
        let env = TestEnvironment::new().unwrap();
        let h = handler(&env);
        let root = root_hash(&h);
        let data: Vec<u8> = (0..300u32).map(|i| (i * 3) as u8).collect();

        let mut merge_token = None;
        for index in [1usize, 2, 0] {
            let fields: Fields = [
                ("cmd", "upload".to_string()),
                ("target", root.clone()),
                ("cid", "77".to_string()),
                ("chunk", format!("big.bin.{}_3.part", index)),
                ("range", format!("{},100,300", index * 100)),
            ]
            .into_iter()
            .collect();
            let file = UploadedFile {
                filename: "blob".into(),
                data: data[index * 100..index * 100 + 100].to_vec(),
            };
            let reply = h.handle(Command::parse(&fields).unwrap(), vec![file]);
            let resp = reply.json().unwrap();
            assert!(resp.error.is_none());
            if let Some(token) = &resp.chunk_merged {
                merge_token = Some(token.clone());
            }
        }
        let token = merge_token.unwrap();
        assert_eq!(token, "77_3_big.bin");

        let resp = run(&h, &[("cmd", "upload"), ("target", root.as_str()), ("chunk", token.as_str())]);
        assert_eq!(resp.added.unwrap()[0].size, 300);
        assert_eq!(fs::read(env.volume_root("files").unwrap().join("big.bin")).unwrap(), data);

        // a second merge finds no parts
        let resp = run(&h, &[("cmd", "upload"), ("target", root.as_str()), ("chunk", token.as_str())]);
        assert_eq!(resp.error.unwrap().0, "errUploadTransfer");
    }

    #[test]
    fn test_file_reply_is_lazy() {
        let env = TestEnvironment::new().unwrap();
        let path = env.create_file("files", "huge.bin", b"").unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(8 << 30)
            .unwrap();
        env.create_file("files", "note.txt", b"hello").unwrap();
        let h = handler(&env);
        let mount = h.registry().default_mount().unwrap().clone();

        let huge = mount.hash("/huge.bin");
        let fields: Fields = [("cmd", "file"), ("target", huge.as_str()), ("download", "1")]
            .into_iter()
            .collect();
        match h.handle(Command::parse(&fields).unwrap(), Vec::new()) {
            Reply::File {
                size, attachment, ..
            } => {
                assert_eq!(size, 8 << 30);
                assert!(attachment);
            }
            other => panic!("expected file, got {:?}", other),
        }

        let note = mount.hash("/note.txt");
        let fields: Fields = [("cmd", "file"), ("target", note.as_str())].into_iter().collect();
        match h.handle(Command::parse(&fields).unwrap(), Vec::new()) {
            Reply::File {
                mut reader,
                size,
                attachment,
                ..
            } => {
                let mut body = String::new();
                reader.read_to_string(&mut body).unwrap();
                assert_eq!(body, "hello");
                assert_eq!(size, 5);
                assert!(!attachment);
            }
            other => panic!("expected file, got {:?}", other),
        }
    }

    #[test]
    fn test_zipdl_download_is_one_shot() {
        let env = TestEnvironment::new().unwrap();
        env.create_file("files", "docs/a.txt", b"alpha").unwrap();
        let h = handler(&env);
        let docs = h.registry().default_mount().unwrap().hash("/docs");

        let resp = run(&h, &[("cmd", "zipdl"), ("targets[]", docs.as_str())]);
        let zipdl = resp.zipdl.unwrap();
        assert_eq!(env.staged_archives().unwrap(), 1);

        let download: Vec<(&str, &str)> = vec![
            ("cmd", "zipdl"),
            ("download", "1"),
            ("targets[]", docs.as_str()),
            ("targets[]", zipdl.file.as_str()),
            ("targets[]", zipdl.name.as_str()),
            ("targets[]", zipdl.mime.as_str()),
        ];
        let fields: Fields = download.iter().copied().collect();
        match h.handle(Command::parse(&fields).unwrap(), Vec::new()) {
            Reply::Archive { size, name, .. } => {
                assert!(size > 0);
                assert_eq!(name, zipdl.name);
            }
            other => panic!("expected archive, got {:?}", other),
        }
        assert_eq!(env.staged_archives().unwrap(), 0);

        let resp = run(&h, &download);
        assert_eq!(resp.error.unwrap().0, "errFileNotFound");
    }

    #[test]
    fn test_zipdl_over_ceiling() {
        let env = TestEnvironment::new().unwrap();
        env.create_file("files", "big.bin", &[0u8; 2048]).unwrap();
        let mut config = env.config();
        config.archive.max_size = 1024;
        let h = crate::build_handler(&config).unwrap();
        let target = h.registry().default_mount().unwrap().hash("/big.bin");

        let resp = run(&h, &[("cmd", "zipdl"), ("targets[]", target.as_str())]);
        assert_eq!(resp.error.unwrap().0, "errArcMaxSize");
        assert_eq!(env.staged_archives().unwrap(), 0);
    }
}
