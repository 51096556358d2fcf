//! Byte-reproducible `.deb` member writers.
//!
//! Every header field that could vary between runs is pinned: entries are
//! written in path order, timestamps are the configured epoch, owner and
//! group are `root` (0), modes are normalized, and gzip headers carry no
//! file name or time.

use std::io;
use std::path::Path;

use flate2::{Compression, GzBuilder};
use tar::{EntryType, Header};

use crate::consts::DEB_FORMAT_VERSION;
use crate::view::Entry;

/// Write entries as a gzip-compressed tar. The empty path is written as `.`.
pub(crate) fn tar_gz<'a>(entries: impl IntoIterator<Item = (&'a Path, &'a Entry)>, mtime: u64) -> io::Result<Vec<u8>> {
  let encoder = GzBuilder::new().mtime(0).write(Vec::new(), Compression::best());
  let mut builder = tar::Builder::new(encoder);
  builder.mode(tar::HeaderMode::Deterministic);

  for (rel, entry) in entries {
    let name = if rel.as_os_str().is_empty() {
      Path::new(".").to_path_buf()
    } else {
      Path::new(".").join(rel)
    };

    let mut header = Header::new_gnu();
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("root")?;
    header.set_groupname("root")?;

    match entry {
      Entry::Dir => {
        header.set_entry_type(EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        builder.append_data(&mut header, &name, io::empty())?;
      }
      Entry::File { data, executable } => {
        header.set_entry_type(EntryType::Regular);
        header.set_mode(if *executable { 0o755 } else { 0o644 });
        header.set_size(data.len() as u64);
        builder.append_data(&mut header, &name, &data[..])?;
      }
      Entry::Symlink { target } => {
        header.set_entry_type(EntryType::Symlink);
        header.set_mode(0o777);
        header.set_size(0);
        builder.append_link(&mut header, &name, target)?;
      }
    }
  }

  let encoder = builder.into_inner()?;
  encoder.finish()
}

/// Assemble the outer `ar` archive: `debian-binary`, then control, then data.
pub(crate) fn deb_archive(control_tar_gz: &[u8], data_tar_gz: &[u8], mtime: u64) -> io::Result<Vec<u8>> {
  let mut out = Vec::new();
  {
    let mut archive = ar::Builder::new(&mut out);
    let members: [(&str, &[u8]); 3] = [
      ("debian-binary", DEB_FORMAT_VERSION),
      ("control.tar.gz", control_tar_gz),
      ("data.tar.gz", data_tar_gz),
    ];
    for (name, data) in members {
      let mut header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
      header.set_mtime(mtime);
      header.set_uid(0);
      header.set_gid(0);
      header.set_mode(0o100644);
      archive.append(&header, data)?;
    }
  }
  Ok(out)
}
