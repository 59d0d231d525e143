use std::fs;
use std::io::{self, Cursor};
use std::path::Path;

/// Pack the contents of `dir` into an in-memory tar archive
///
/// Entries are stored relative to `dir`. Any file or directory whose name is
/// listed in `exclude` is skipped, at any depth. Symlinks are archived as
/// links and never followed.
///
/// ```rust,ignore
/// // archive a build context without dependencies or VCS metadata
/// let bytes = pack_dir("./services/api", &["node_modules", ".git"])?;
/// ```
pub fn pack_dir(dir: impl AsRef<Path>, exclude: &[&str]) -> io::Result<Vec<u8>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        ));
    }

    let mut archive = Vec::new();
    {
        let mut builder = tar::Builder::new(Cursor::new(&mut archive));
        builder.follow_symlinks(false);
        append_dir(&mut builder, dir, Path::new(""), exclude)?;
        builder.finish()?;
    }

    Ok(archive)
}

fn append_dir<W: io::Write>(
    builder: &mut tar::Builder<W>,
    src: &Path,
    prefix: &Path,
    exclude: &[&str],
) -> io::Result<()> {
    let mut entries = fs::read_dir(src)?.collect::<io::Result<Vec<_>>>()?;
    // stable archive layout regardless of directory iteration order
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        if exclude.iter().any(|ex| name.as_os_str() == *ex) {
            continue;
        }

        let path = entry.path();
        let archive_path = prefix.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            builder.append_dir(&archive_path, &path)?;
            append_dir(builder, &path, &archive_path, exclude)?;
        } else {
            builder.append_path_with_name(&path, &archive_path)?;
        }
    }

    Ok(())
}
