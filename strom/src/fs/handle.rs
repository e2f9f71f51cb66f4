//! Thin wrapper over a file descriptor. Every system call the file stream
//! makes goes through here.

use std::{
  ffi::CString,
  io, mem,
  os::{
    fd::{AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd},
    unix::ffi::OsStrExt,
  },
  path::{Path, PathBuf},
};

use super::options::{FileAccess, FileShare};
use crate::error::{Error, Result};

pub(crate) struct FileHandle {
  fd: RawFd,
  owns: bool,
  valid: bool,
  path: Option<PathBuf>,
}

impl FileHandle {
  pub(crate) fn open(path: &Path, flags: libc::c_int, mode: u32) -> Result<Self> {
    let c_path = CString::new(path.as_os_str().as_bytes())
      .map_err(|_| Error::argument("path", "contains an interior NUL byte"))?;

    let fd = loop {
      match syscall!(open(c_path.as_ptr(), flags, mode as libc::c_uint)) {
        Ok(fd) => break fd,
        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
        Err(err) => return Err(Error::io_at(err, Some(path.to_path_buf()))),
      }
    };

    Ok(Self { fd, owns: true, valid: true, path: Some(path.to_path_buf()) })
  }

  pub(crate) fn from_owned(fd: OwnedFd) -> Self {
    Self { fd: fd.into_raw_fd(), owns: true, valid: true, path: None }
  }

  /// Wraps a descriptor the caller keeps ownership of.
  pub(crate) fn borrowed(fd: RawFd) -> Self {
    Self { fd, owns: false, valid: true, path: None }
  }

  pub(crate) fn raw(&self) -> RawFd {
    self.fd
  }

  pub(crate) fn borrow(&self) -> BorrowedFd<'_> {
    // Safety: the descriptor stays open for as long as `self` is borrowed.
    unsafe { BorrowedFd::borrow_raw(self.fd) }
  }

  pub(crate) fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  pub(crate) fn is_valid(&self) -> bool {
    self.valid
  }

  pub(crate) fn check(&self) -> Result<()> {
    if !self.valid {
      return Err(Error::StreamClosed);
    }
    Ok(())
  }

  /// Translates an OS error, invalidating the handle on `EBADF`.
  pub(crate) fn fault(&mut self, err: io::Error) -> Error {
    match err.raw_os_error() {
      Some(libc::EBADF) => {
        self.valid = false;
        #[cfg(feature = "tracing")]
        tracing::warn!(fd = self.fd, "file handle: descriptor is no longer valid");
        Error::io_at(err, self.path.clone())
      }
      Some(libc::ESPIPE) => {
        Error::UnsupportedOperation("handle does not support seeking")
      }
      _ => Error::io_at(err, self.path.clone()),
    }
  }

  pub(crate) fn access_mode(&mut self) -> Result<FileAccess> {
    self.check()?;
    let flags = syscall!(fcntl(self.fd, libc::F_GETFL)).map_err(|err| self.fault(err))?;
    Ok(match flags & libc::O_ACCMODE {
      libc::O_WRONLY => FileAccess::Write,
      libc::O_RDWR => FileAccess::ReadWrite,
      _ => FileAccess::Read,
    })
  }

  pub(crate) fn is_regular(&mut self) -> Result<bool> {
    let stat = self.stat()?;
    Ok(stat.st_mode & libc::S_IFMT == libc::S_IFREG)
  }

  /// Whether the descriptor has a movable offset (pipes and terminals don't).
  pub(crate) fn is_seekable(&mut self) -> Result<bool> {
    self.check()?;
    match syscall!(lseek(self.fd, 0, libc::SEEK_CUR)) {
      Ok(_) => Ok(true),
      Err(err) if err.raw_os_error() == Some(libc::ESPIPE) => Ok(false),
      Err(err) => Err(self.fault(err)),
    }
  }

  fn stat(&mut self) -> Result<libc::stat> {
    self.check()?;
    // Safety: all-zero is a valid `stat`; fstat overwrites it.
    let mut stat: libc::stat = unsafe { mem::zeroed() };
    syscall!(fstat(self.fd, &mut stat)).map_err(|err| self.fault(err))?;
    Ok(stat)
  }

  pub(crate) fn len(&mut self) -> Result<u64> {
    Ok(self.stat()?.st_size as u64)
  }

  pub(crate) fn set_len(&mut self, len: u64) -> Result<()> {
    self.check()?;
    let len = to_off(len)?;
    loop {
      match syscall!(ftruncate(self.fd, len)) {
        Ok(_) => return Ok(()),
        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
        Err(err) => return Err(self.fault(err)),
      }
    }
  }

  pub(crate) fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
    self.check()?;
    let offset = to_off(offset)?;
    loop {
      match syscall!(pread(
        self.fd,
        buf.as_mut_ptr().cast::<libc::c_void>(),
        buf.len(),
        offset
      )) {
        Ok(n) => return Ok(n as usize),
        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
        Err(err) => return Err(self.fault(err)),
      }
    }
  }

  pub(crate) fn write_all_at(&mut self, mut buf: &[u8], offset: u64) -> Result<()> {
    self.check()?;
    let mut offset = offset;
    while !buf.is_empty() {
      match syscall!(pwrite(
        self.fd,
        buf.as_ptr().cast::<libc::c_void>(),
        buf.len(),
        to_off(offset)?
      )) {
        Ok(0) => return Err(self.fault(io::ErrorKind::WriteZero.into())),
        Ok(n) => {
          buf = &buf[n as usize..];
          offset += n as u64;
        }
        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
        Err(err) => return Err(self.fault(err)),
      }
    }
    Ok(())
  }

  /// Reads at the descriptor's own offset.
  pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
    self.check()?;
    loop {
      match syscall!(read(
        self.fd,
        buf.as_mut_ptr().cast::<libc::c_void>(),
        buf.len()
      )) {
        Ok(n) => return Ok(n as usize),
        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
        Err(err) => return Err(self.fault(err)),
      }
    }
  }

  pub(crate) fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
    self.check()?;
    while !buf.is_empty() {
      match syscall!(write(
        self.fd,
        buf.as_ptr().cast::<libc::c_void>(),
        buf.len()
      )) {
        Ok(0) => return Err(self.fault(io::ErrorKind::WriteZero.into())),
        Ok(n) => buf = &buf[n as usize..],
        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
        Err(err) => return Err(self.fault(err)),
      }
    }
    Ok(())
  }

  /// The descriptor's own offset.
  pub(crate) fn cursor(&mut self) -> Result<u64> {
    self.check()?;
    let pos =
      syscall!(lseek(self.fd, 0, libc::SEEK_CUR)).map_err(|err| self.fault(err))?;
    Ok(pos as u64)
  }

  pub(crate) fn set_cursor(&mut self, pos: u64) -> Result<()> {
    self.check()?;
    let pos = to_off(pos)?;
    syscall!(lseek(self.fd, pos, libc::SEEK_SET)).map_err(|err| self.fault(err))?;
    Ok(())
  }

  pub(crate) fn sync_all(&mut self) -> Result<()> {
    self.check()?;
    syscall!(fsync(self.fd)).map_err(|err| self.fault(err))?;
    Ok(())
  }

  /// Expresses `share` as a non-blocking advisory lock.
  pub(crate) fn lock(&mut self, share: FileShare) -> Result<()> {
    self.check()?;
    let kind = match share {
      FileShare::None => libc::LOCK_EX,
      _ => libc::LOCK_SH,
    };
    match syscall!(flock(self.fd, kind | libc::LOCK_NB)) {
      Ok(_) => Ok(()),
      Err(err) if err.raw_os_error() == Some(libc::EWOULDBLOCK) => {
        Err(Error::io_at(
          io::Error::new(
            io::ErrorKind::WouldBlock,
            "sharing violation: the file is in use by another handle",
          ),
          self.path.clone(),
        ))
      }
      Err(err) => Err(self.fault(err)),
    }
  }

  pub(crate) fn close(&mut self) -> Result<()> {
    if !self.valid {
      return Ok(());
    }
    self.valid = false;
    if !self.owns {
      return Ok(());
    }
    syscall!(close(self.fd)).map_err(|err| Error::io_at(err, self.path.clone()))?;
    Ok(())
  }
}

impl AsRawFd for FileHandle {
  fn as_raw_fd(&self) -> RawFd {
    self.fd
  }
}

impl Drop for FileHandle {
  fn drop(&mut self) {
    let _ = self.close();
  }
}

impl std::fmt::Debug for FileHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FileHandle")
      .field("fd", &self.fd)
      .field("owns", &self.owns)
      .field("valid", &self.valid)
      .field("path", &self.path)
      .finish()
  }
}

fn to_off(pos: u64) -> Result<libc::off_t> {
  libc::off_t::try_from(pos)
    .map_err(|_| Error::argument("offset", "exceeds the largest file offset"))
}
