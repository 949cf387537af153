use std::io::BufRead;
use std::path::PathBuf;

use crate::fsutil;

use super::{Error, Result};

/// Counts the interfaces visible in the network namespace of a process.
///
/// `/proc/<pid>/net/dev` always reflects the namespace of `<pid>`, so no namespace switch is
/// needed to look inside a container.
#[derive(Debug, Clone)]
pub struct InterfaceProbe {
    proc_root: PathBuf,
}

impl InterfaceProbe {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    /// Returns the number of interfaces, loopback included, in the namespace of `pid`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileOpen`] if the process is gone and [`Error::ReadInterfaces`] if the
    /// file cannot be read.
    pub fn interface_count(&self, pid: u32) -> Result<usize> {
        let path = self.proc_root.join(pid.to_string()).join("net/dev");
        let mut reader = fsutil::open_file_reader(&path)?;
        count_interfaces(&mut reader).map_err(|source| Error::ReadInterfaces { path, source })
    }

    /// Returns true if anything besides the loopback interface exists, i.e. a CNI plugin has
    /// already wired up the namespace.
    pub fn has_network(&self, pid: u32) -> Result<bool> {
        Ok(self.interface_count(pid)? > 1)
    }
}

/// Counts interface lines of a `/proc/net/dev` formatted reader.
fn count_interfaces<R: BufRead>(buf: &mut R) -> std::io::Result<usize> {
    let mut line = String::new();

    // Skip headers (first two lines)
    for _ in 0..2 {
        buf.read_line(&mut line)?;
        line.clear();
    }

    let mut count = 0;
    while buf.read_line(&mut line)? != 0 {
        if line
            .split_once(':')
            .is_some_and(|(iface, _)| !iface.trim().is_empty())
        {
            count += 1;
        }
        line.clear();
    }

    Ok(count)
}
