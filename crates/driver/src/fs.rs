use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use transfer::{listing, BackendFactory, FtpBackend, OpenFile, Registry, SharedConnection, TransferError};

use crate::config::MountConfig;
use crate::error::{to_errno, DriverError};
use crate::inode::InodeTable;

const TTL: Duration = Duration::from_secs(1);
const GENERATION: u64 = 0;

/// Maps FUSE upcalls onto the transfer engine (spec §4.4 "Dispatcher").
///
/// One shared connection serves reads and metadata RPCs; every write-open
/// gets a dedicated connection from `factory` via its own [`OpenFile`].
/// Inode bookkeeping is purely path-based bridging -- this type holds no
/// content or attribute cache of its own.
pub struct FtpFilesystem {
    shared: SharedConnection,
    factory: BackendFactory,
    inodes: InodeTable,
    files: Registry,
    config: MountConfig,
    uid: u32,
    gid: u32,
}

impl FtpFilesystem {
    pub fn new(shared: SharedConnection, factory: BackendFactory, config: MountConfig) -> Self {
        // SAFETY: `getuid`/`getgid` take no arguments and cannot fail.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            shared,
            factory,
            inodes: InodeTable::new(),
            files: Registry::new(),
            config,
            uid,
            gid,
        }
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<listing::Entry>, DriverError> {
        let mut guard = self.shared.lock();
        let lines = guard.list_lines(&strip_leading_slash(dir), &self.config.list_command)?;
        drop(guard);
        Ok(listing::parse(&lines))
    }

    /// Resolves `path`'s attributes via a fresh listing of its parent
    /// directory (spec §4.4 getattr: "fetch a directory listing from the
    /// parent directory ... return the single-file stat"). `ino` is filled
    /// in by the caller, since this never allocates one itself.
    fn stat_path(&self, path: &str) -> Result<FileAttr, DriverError> {
        if path == "/" {
            return Ok(self.root_attr());
        }
        let (parent, name) = split_path(path);
        let entries = self.list_dir(&parent)?;
        let entry = entries
            .into_iter()
            .find(|e| e.name == name)
            .ok_or_else(|| DriverError::Transfer(TransferError::NotFound(path.to_string())))?;
        Ok(self.entry_attr(0, &entry))
    }

    fn entry_attr(&self, ino: u64, entry: &listing::Entry) -> FileAttr {
        let kind = if entry.is_dir {
            FileType::Directory
        } else if entry.is_symlink {
            FileType::Symlink
        } else {
            FileType::RegularFile
        };
        let now = SystemTime::now();
        FileAttr {
            ino,
            size: entry.size,
            blocks: entry.size.div_ceil(512),
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind,
            perm: (entry.mode & 0o7777) as u16,
            nlink: if entry.is_dir { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: self.config.block_size,
            flags: 0,
        }
    }

    fn root_attr(&self) -> FileAttr {
        let now = SystemTime::now();
        FileAttr {
            ino: crate::inode::ROOT_INO,
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: FileType::Directory,
            perm: 0o755,
            nlink: 2,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: self.config.block_size,
            flags: 0,
        }
    }

    /// A locally-fabricated attribute for a file just created through a
    /// write-capable open, before any listing of it would necessarily be
    /// visible on the server.
    fn synth_new_file_attr(&self, ino: u64, mode: u32) -> FileAttr {
        let now = SystemTime::now();
        FileAttr {
            ino,
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: FileType::RegularFile,
            perm: (mode & 0o7777) as u16,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: self.config.block_size,
            flags: 0,
        }
    }

    fn synth_new_dir_attr(&self, ino: u64, mode: u32) -> FileAttr {
        let mut attr = self.synth_new_file_attr(ino, mode);
        attr.kind = FileType::Directory;
        attr.nlink = 2;
        attr
    }

    /// `SITE CHMOD` is best-effort: not every server implements it, and a
    /// failure here shouldn't undo a file that was otherwise created
    /// successfully.
    fn try_chmod(&self, path: &str, mode: u32) {
        let octal = format!("{:03o}", mode & 0o7777);
        let path = strip_leading_slash(path);
        let mut guard = self.shared.lock();
        if let Err(err) = guard.quote(&format!("SITE CHMOD {octal} {path}")) {
            tracing::warn!(path, mode, error = %err, "SITE CHMOD failed");
        }
    }

    fn try_chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) {
        let path = strip_leading_slash(path);
        let mut guard = self.shared.lock();
        if let Some(uid) = uid {
            if let Err(err) = guard.quote(&format!("SITE CHUID {uid} {path}")) {
                tracing::warn!(path, uid, error = %err, "SITE CHUID failed");
            }
        }
        if let Some(gid) = gid {
            if let Err(err) = guard.quote(&format!("SITE CHGID {gid} {path}")) {
                tracing::warn!(path, gid, error = %err, "SITE CHGID failed");
            }
        }
    }

    /// Uploads zero bytes over a dedicated connection without involving the
    /// write pipeline or a file handle -- used for `mknod` and for a
    /// `truncate(2)` that targets a path with no open handle.
    fn truncate_file_to_zero(&self, path: &str) -> Result<(), TransferError> {
        let mut backend = (self.factory)()?;
        backend.connect()?;
        backend.begin_upload(path, false)?;
        backend.finish_upload()
    }
}

impl Filesystem for FtpFilesystem {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(to_errno(&DriverError::InvalidPath));
            return;
        };
        let Some((ino, path)) = self.inodes.intern_child(parent, name) else {
            reply.error(to_errno(&DriverError::UnknownInode(parent)));
            return;
        };
        match self.stat_path(&path) {
            Ok(mut attr) => {
                attr.ino = ino;
                reply.entry(&TTL, &attr, GENERATION);
            }
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(to_errno(&DriverError::UnknownInode(ino)));
            return;
        };
        match self.stat_path(&path) {
            Ok(mut attr) => {
                attr.ino = ino;
                reply.attr(&TTL, &attr);
            }
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(to_errno(&DriverError::UnknownInode(ino)));
            return;
        };

        if mode.is_some() || uid.is_some() || gid.is_some() {
            if let Some(mode) = mode {
                self.try_chmod(&path, mode);
            }
            if uid.is_some() || gid.is_some() {
                self.try_chown(&path, uid, gid);
            }
        }

        if let Some(size) = size {
            if size == 0 {
                let reset = fh.map_or(Ok(()), |fh| {
                    self.files.with(fh, |file| file.truncate_to_zero())
                });
                let result = match reset {
                    Ok(()) if fh.is_some() => Ok(()),
                    _ => self.truncate_file_to_zero(&path),
                };
                if let Err(err) = result {
                    reply.error(to_errno(&DriverError::Transfer(err)));
                    return;
                }
            } else {
                let current = {
                    let mut guard = self.shared.lock();
                    guard.size(&strip_leading_slash(&path))
                };
                match current {
                    Ok(current) if current == size => {}
                    _ => {
                        reply.error(to_errno(&DriverError::Transfer(
                            TransferError::PermissionDenied(
                                "truncate to a value other than zero or the current size is not supported".to_string(),
                            ),
                        )));
                        return;
                    }
                }
            }
        }

        match self.stat_path(&path) {
            Ok(mut attr) => {
                attr.ino = ino;
                reply.attr(&TTL, &attr);
            }
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(to_errno(&DriverError::UnknownInode(ino)));
            return;
        };
        let (parent, name) = split_path(&path);
        match self.list_dir(&parent) {
            Ok(entries) => match entries.into_iter().find(|e| e.name == name) {
                Some(entry) if entry.is_symlink => {
                    reply.data(entry.link_target.unwrap_or_default().as_bytes());
                }
                Some(_) => reply.error(libc::EINVAL),
                None => reply.error(libc::ENOENT),
            },
            Err(err) => reply.error(to_errno(&err)),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(to_errno(&DriverError::InvalidPath));
            return;
        };
        if mode & libc::S_IFMT != libc::S_IFREG {
            reply.error(libc::ENOTSUP);
            return;
        }
        let Some((ino, path)) = self.inodes.intern_child(parent, name) else {
            reply.error(to_errno(&DriverError::UnknownInode(parent)));
            return;
        };
        if let Err(err) = self.truncate_file_to_zero(&path) {
            reply.error(to_errno(&DriverError::Transfer(err)));
            return;
        }
        self.try_chmod(&path, mode);
        reply.entry(&TTL, &self.synth_new_file_attr(ino, mode), GENERATION);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(to_errno(&DriverError::InvalidPath));
            return;
        };
        let Some((ino, path)) = self.inodes.intern_child(parent, name) else {
            reply.error(to_errno(&DriverError::UnknownInode(parent)));
            return;
        };
        {
            let mut guard = self.shared.lock();
            if let Err(err) = guard.mkdir(&strip_leading_slash(&path)) {
                reply.error(to_errno(&DriverError::Transfer(err)));
                return;
            }
        }
        self.try_chmod(&path, mode);
        reply.entry(&TTL, &self.synth_new_dir_attr(ino, mode), GENERATION);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(to_errno(&DriverError::InvalidPath));
            return;
        };
        let Some((_ino, path)) = self.inodes.intern_child(parent, name) else {
            reply.error(to_errno(&DriverError::UnknownInode(parent)));
            return;
        };
        let mut guard = self.shared.lock();
        match guard.delete(&strip_leading_slash(&path)) {
            Ok(()) => {
                drop(guard);
                reply.ok();
            }
            Err(err) => reply.error(to_errno(&DriverError::Transfer(err))),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(to_errno(&DriverError::InvalidPath));
            return;
        };
        let Some((_ino, path)) = self.inodes.intern_child(parent, name) else {
            reply.error(to_errno(&DriverError::UnknownInode(parent)));
            return;
        };
        let mut guard = self.shared.lock();
        match guard.rmdir(&strip_leading_slash(&path)) {
            Ok(()) => {
                drop(guard);
                reply.ok();
            }
            Err(err) => reply.error(to_errno(&DriverError::Transfer(err))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(name), Some(new_name)) = (name.to_str(), new_name.to_str()) else {
            reply.error(to_errno(&DriverError::InvalidPath));
            return;
        };
        let Some((_, from)) = self.inodes.intern_child(parent, name) else {
            reply.error(to_errno(&DriverError::UnknownInode(parent)));
            return;
        };
        let Some((_, to)) = self.inodes.intern_child(new_parent, new_name) else {
            reply.error(to_errno(&DriverError::UnknownInode(new_parent)));
            return;
        };
        // spec §9 open question: rename uses the leading-slash-stripped
        // form; preserved as observed rather than guessed at.
        let from_stripped = strip_leading_slash(&from);
        let to_stripped = strip_leading_slash(&to);
        let mut guard = self.shared.lock();
        match guard.rename(&from_stripped, &to_stripped) {
            Ok(()) => {
                drop(guard);
                self.inodes.rename(&from, &to);
                reply.ok();
            }
            Err(err) => reply.error(to_errno(&DriverError::Transfer(err))),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(to_errno(&DriverError::UnknownInode(ino)));
            return;
        };
        let entries = match self.list_dir(&path) {
            Ok(entries) => entries,
            Err(err) => {
                reply.error(to_errno(&err));
                return;
            }
        };

        let mut rows: Vec<(u64, FileType, String)> = Vec::with_capacity(entries.len() + 2);
        rows.push((ino, FileType::Directory, ".".to_string()));
        rows.push((ino, FileType::Directory, "..".to_string()));
        for entry in entries {
            let Some((child_ino, _)) = self.inodes.intern_child(ino, &entry.name) else {
                continue;
            };
            let kind = if entry.is_dir {
                FileType::Directory
            } else if entry.is_symlink {
                FileType::Symlink
            } else {
                FileType::RegularFile
            };
            rows.push((child_ino, kind, entry.name));
        }

        for (i, (row_ino, kind, name)) in rows.into_iter().enumerate().skip(offset.max(0) as usize)
        {
            if reply.add(row_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(to_errno(&DriverError::UnknownInode(ino)));
            return;
        };

        let accmode = flags & libc::O_ACCMODE;
        let read_write = accmode == libc::O_RDWR;
        if read_write && !self.config.allow_read_write {
            reply.error(to_errno(&DriverError::Transfer(TransferError::Unsupported(
                "read-write opens are disabled".to_string(),
            ))));
            return;
        }
        if flags & libc::O_APPEND != 0 {
            reply.error(to_errno(&DriverError::Transfer(TransferError::Unsupported(
                "append-mode opens are not supported".to_string(),
            ))));
            return;
        }

        if accmode == libc::O_RDONLY {
            // Probe establishes the window and confirms reachability
            // without disturbing any handle state (spec §4.2).
            if let Err(err) = transfer::probe(&self.shared, &path) {
                reply.error(to_errno(&DriverError::Transfer(err)));
                return;
            }
            let fh = self.files.insert(OpenFile::new_read(path));
            reply.opened(fh, 0);
            return;
        }

        // O_TRUNC discards whatever the remote already holds, so the
        // pipeline starts at offset 0 without needing the remote's current
        // size at all (spec §4.4 open/create: "start the upload immediately
        // with create or trunc").
        let truncating = flags & libc::O_TRUNC != 0;

        let starting_offset = if truncating {
            0
        } else {
            let mut guard = self.shared.lock();
            match guard.size(&strip_leading_slash(&path)) {
                Ok(size) => size,
                Err(err) => {
                    reply.error(to_errno(&DriverError::Transfer(err)));
                    return;
                }
            }
        };

        let mut file = OpenFile::new_write_pending(
            path,
            Arc::clone(&self.factory),
            starting_offset,
            read_write,
        );
        if truncating {
            // Matches what `create()` and `setattr`'s explicit-truncate
            // path already do: enable a first write at offset 0 even
            // though nothing has been written through this handle yet.
            if let Err(err) = file.truncate_to_zero() {
                reply.error(to_errno(&DriverError::Transfer(err)));
                return;
            }
        }
        let fh = self.files.insert(file);
        reply.opened(fh, 0);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(to_errno(&DriverError::InvalidPath));
            return;
        };
        let Some((ino, path)) = self.inodes.intern_child(parent, name) else {
            reply.error(to_errno(&DriverError::UnknownInode(parent)));
            return;
        };

        let accmode = flags & libc::O_ACCMODE;
        let read_write = accmode == libc::O_RDWR;
        if read_write && !self.config.allow_read_write {
            reply.error(to_errno(&DriverError::Transfer(TransferError::Unsupported(
                "read-write opens are disabled".to_string(),
            ))));
            return;
        }

        if flags & libc::O_EXCL != 0 {
            match transfer::probe(&self.shared, &path) {
                Ok(()) => {
                    reply.error(libc::EACCES);
                    return;
                }
                Err(TransferError::NotFound(_)) => {}
                Err(err) => {
                    reply.error(to_errno(&DriverError::Transfer(err)));
                    return;
                }
            }
        }

        if accmode == libc::O_RDONLY {
            // Read-only create: synthesize an empty remote file, then chmod
            // (spec §4.4 "synthesize an empty remote file ... then chmod").
            let mut file =
                match OpenFile::new_write(path.clone(), Arc::clone(&self.factory), false, 0, false)
                {
                    Ok(file) => file,
                    Err(err) => {
                        reply.error(to_errno(&DriverError::Transfer(err)));
                        return;
                    }
                };
            if let Err(err) = file.flush() {
                reply.error(to_errno(&DriverError::Transfer(err)));
                return;
            }
            self.try_chmod(&path, mode);
            let fh = self.files.insert(OpenFile::new_read(path.clone()));
            reply.created(&TTL, &self.synth_new_file_attr(ino, mode), GENERATION, fh, 0);
            return;
        }

        let file = match OpenFile::new_write(
            path.clone(),
            Arc::clone(&self.factory),
            false,
            0,
            read_write,
        ) {
            Ok(file) => file,
            Err(err) => {
                reply.error(to_errno(&DriverError::Transfer(err)));
                return;
            }
        };
        self.try_chmod(&path, mode);
        let fh = self.files.insert(file);
        reply.created(&TTL, &self.synth_new_file_attr(ino, mode), GENERATION, fh, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let shared = &self.shared;
        let result = self
            .files
            .with(fh, |file| file.read(shared, fh, offset as u64, size as usize));
        match result {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(to_errno(&DriverError::Transfer(err))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let result = self.files.with(fh, |file| file.write(offset as u64, data));
        match result {
            Ok(n) => reply.written(n as u32),
            Err(err) => reply.error(to_errno(&DriverError::Transfer(err))),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let result = self.files.with(fh, |file| file.flush());
        match result {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(to_errno(&DriverError::Transfer(err))),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        let result = self.files.with(fh, |file| file.flush());
        match result {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(to_errno(&DriverError::Transfer(err))),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if let Some(mut file) = self.files.remove(fh) {
            let _ = file.flush();
            file.release(&self.shared, fh);
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        // No true free-space reporting (spec §1 Non-goals): fixed fields,
        // block size taken from configuration.
        reply.statfs(0, 0, 0, 0, 0, self.config.block_size, 255, 0);
    }
}

fn split_path(path: &str) -> (String, String) {
    match path.rfind('/') {
        Some(0) => ("/".to_string(), path[1..].to_string()),
        Some(idx) => (path[..idx].to_string(), path[idx + 1..].to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}

/// Strips the mount root's leading `/` before handing a path to the
/// backend: the shared connection is already anchored at the FTP account's
/// root on login, so every backend call is CWD-relative (the original's
/// `get_file_name`/`get_dir_path` convention). The mount root itself maps
/// to `.`, the conventional "current directory" path, rather than an empty
/// string.
fn strip_leading_slash(path: &str) -> String {
    match path.strip_prefix('/') {
        Some("") => ".".to_string(),
        Some(rest) => rest.to_string(),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_handles_root_level_and_nested_entries() {
        assert_eq!(split_path("/a.txt"), ("/".to_string(), "a.txt".to_string()));
        assert_eq!(
            split_path("/dir/a.txt"),
            ("/dir".to_string(), "a.txt".to_string())
        );
    }

    #[test]
    fn strip_leading_slash_only_removes_one_leading_slash() {
        assert_eq!(strip_leading_slash("/d1/f"), "d1/f");
        assert_eq!(strip_leading_slash("no/leading/slash"), "no/leading/slash");
    }

    #[test]
    fn strip_leading_slash_maps_the_mount_root_to_current_directory() {
        assert_eq!(strip_leading_slash("/"), ".");
    }
}
