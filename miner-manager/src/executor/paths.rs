//! Host-local path helpers.
//!
//! Paths are handled as strings because they follow the remote host's
//! conventions, not the manager's.

/// Join `name` onto `folder` using the folder's own separator.
pub fn join(folder: &str, name: &str) -> String {
    let sep = separator(folder);
    let folder = folder.trim_end_matches(['\\', '/']);
    format!("{folder}{sep}{name}")
}

/// Administrative-share form of a host-local path:
/// `c:\xdagger` on `RIG01` becomes `\\RIG01\c$\xdagger`.
pub fn unc(host: &str, path: &str) -> String {
    format!("\\\\{}\\{}", host, path.replace(':', "$"))
}

fn separator(path: &str) -> char {
    if path.contains('/') && !path.contains('\\') {
        '/'
    } else {
        '\\'
    }
}
