use std::io::Write;
use std::net::Ipv4Addr;
use std::path::Path;

use super::{Error, Result};

/// Makes sure the hosts file at `path` resolves `hostname` to `ip`.
///
/// Returns `Ok(false)` if the file does not exist or already holds the entry. The file is
/// appended to in place, since it is usually bind mounted into the container and must keep its
/// inode.
///
/// # Errors
///
/// Returns [`Error::Hosts`] if the file cannot be read or appended to.
pub fn ensure_host_entry(path: &Path, ip: Ipv4Addr, hostname: &str) -> Result<bool> {
    let to_error = |source| Error::Hosts {
        path: path.to_path_buf(),
        source,
    };

    let hosts = match std::fs::read_to_string(path) {
        Ok(hosts) => hosts,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(to_error(err)),
    };

    let entry = format!("{ip}\t{hostname}");
    if hosts.lines().any(|line| line.trim_end() == entry) {
        return Ok(false);
    }

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(to_error)?;
    let separator = if hosts.is_empty() || hosts.ends_with('\n') {
        ""
    } else {
        "\n"
    };
    writeln!(file, "{separator}{entry}").map_err(to_error)?;
    Ok(true)
}
