//! Read-only FUSE mirror of a source directory.
//!
//! Metadata and directory listings pass straight through. File reads go
//! through a [`RateLimiter`]. Any attempt to open a file for writing is
//! refused with `EROFS`.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::File;
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    BackgroundSession, FUSE_ROOT_ID, FileAttr, FileType, Filesystem, MountOption, ReplyAttr,
    ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, Request,
};

use crate::error::{Result, ThrottleError};
use crate::limiter::RateLimiter;

const TTL: Duration = Duration::from_secs(1);

/// Filesystem mirroring `root` read-only with paced reads.
#[derive(Debug)]
pub struct ThrottledFs {
    root: PathBuf,
    limiter: RateLimiter,
    inodes: HashMap<u64, PathBuf>,
    paths: HashMap<PathBuf, u64>,
    next_ino: u64,
    handles: HashMap<u64, File>,
    next_fh: u64,
}

impl ThrottledFs {
    /// Creates a mirror of `root` serving reads at `bytes_per_sec`.
    ///
    /// # Errors
    /// Returns an error for a zero rate or a missing source directory.
    pub fn new(root: impl Into<PathBuf>, bytes_per_sec: u64) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ThrottleError::InvalidSource(root));
        }
        let limiter = RateLimiter::new(bytes_per_sec)?;

        let mut inodes = HashMap::new();
        let mut paths = HashMap::new();
        inodes.insert(FUSE_ROOT_ID, PathBuf::new());
        paths.insert(PathBuf::new(), FUSE_ROOT_ID);

        Ok(Self {
            root,
            limiter,
            inodes,
            paths,
            next_ino: FUSE_ROOT_ID + 1,
            handles: HashMap::new(),
            next_fh: 1,
        })
    }

    fn real_path(&self, ino: u64) -> Option<PathBuf> {
        self.inodes.get(&ino).map(|rel| self.root.join(rel))
    }

    fn inode_for(&mut self, rel: PathBuf) -> u64 {
        if let Some(ino) = self.paths.get(&rel) {
            return *ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.inodes.insert(ino, rel.clone());
        self.paths.insert(rel, ino);
        ino
    }

    fn child(&mut self, parent: u64, name: &OsStr) -> Option<(u64, PathBuf)> {
        let rel = self.inodes.get(&parent)?.join(name);
        let real = self.root.join(&rel);
        Some((self.inode_for(rel), real))
    }

    /// Mounts the mirror at `mountpoint` on a background thread. The
    /// returned session unmounts when dropped.
    ///
    /// # Errors
    /// Returns [`ThrottleError::Mount`] if the kernel refuses the mount.
    pub fn mount(self, mountpoint: &Path) -> Result<BackgroundSession> {
        let options = [
            MountOption::RO,
            MountOption::FSName("throttled-fs".to_string()),
        ];
        let root = self.root.clone();
        let rate = self.limiter.bytes_per_sec();
        let session = fuser::spawn_mount2(self, mountpoint, &options).map_err(|source| {
            ThrottleError::Mount {
                mountpoint: mountpoint.to_path_buf(),
                source,
            }
        })?;
        tracing::info!(source = %root.display(), mountpoint = %mountpoint.display(), rate = rate, "mounted");
        Ok(session)
    }
}

fn errno(e: &std::io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}

fn file_type(meta: &std::fs::Metadata) -> FileType {
    let ft = meta.file_type();
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else {
        FileType::RegularFile
    }
}

fn to_attr(ino: u64, meta: &std::fs::Metadata) -> FileAttr {
    let time = |t: std::io::Result<SystemTime>| t.unwrap_or(UNIX_EPOCH);
    FileAttr {
        ino,
        size: meta.len(),
        blocks: meta.blocks(),
        atime: time(meta.accessed()),
        mtime: time(meta.modified()),
        ctime: UNIX_EPOCH + Duration::from_secs(meta.ctime().max(0) as u64),
        crtime: UNIX_EPOCH,
        kind: file_type(meta),
        // Write bits stripped: the mirror is read-only.
        perm: (meta.mode() & 0o7555) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}

fn read_exact_at(file: &File, offset: u64, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

impl Filesystem for ThrottledFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some((ino, real)) = self.child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match std::fs::symlink_metadata(&real) {
            Ok(meta) => reply.entry(&TTL, &to_attr(ino, &meta), 0),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(real) = self.real_path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match std::fs::symlink_metadata(&real) {
            Ok(meta) => reply.attr(&TTL, &to_attr(ino, &meta)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(real) = self.real_path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match std::fs::read_link(&real) {
            Ok(target) => reply.data(target.as_os_str().as_encoded_bytes()),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        if flags & libc::O_ACCMODE != libc::O_RDONLY || flags & libc::O_TRUNC != 0 {
            reply.error(libc::EROFS);
            return;
        }
        let Some(real) = self.real_path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match File::open(&real) {
            Ok(file) => {
                let fh = self.next_fh;
                self.next_fh += 1;
                self.handles.insert(fh, file);
                tracing::debug!(path = %real.display(), fh = fh, "opened");
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
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
        let Some(file) = self.handles.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let result = self
            .limiter
            .throttle(u64::from(size), || read_exact_at(file, offset, size as usize));
        match result {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno(&e)),
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
        self.handles.remove(&fh);
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(rel) = self.inodes.get(&ino).cloned() else {
            reply.error(libc::ENOENT);
            return;
        };
        let dir = self.root.join(&rel);
        let listing = match std::fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };

        let parent_ino = rel
            .parent()
            .map_or(FUSE_ROOT_ID, |p| self.inode_for(p.to_path_buf()));
        let mut entries = vec![
            (ino, FileType::Directory, ".".into()),
            (parent_ino, FileType::Directory, "..".into()),
        ];
        let mut children: Vec<_> = listing
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                Some((entry.file_name(), file_type(&meta)))
            })
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, kind) in children {
            let child_ino = self.inode_for(rel.join(&name));
            entries.push((child_ino, kind, name));
        }

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(skip) {
            // A true return means the reply buffer is full.
            if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }
}
