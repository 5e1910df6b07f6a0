use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};


pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    file.read_exact(&mut buffer)?;
    Ok(buffer == [0x1F, 0x8B]) // Gzip magic bytes
}

/// True when any read file is gzip compressed, by magic bytes or, for
/// unreadable or tiny files, by extension.
pub fn any_gzipped(paths: &[&Path]) -> bool {
    paths.iter().any(|p| match is_gzipped(p) {
        Ok(gz) => gz,
        Err(_) => p.extension().is_some_and(|ext| ext == "gz"),
    })
}


/// Makes a relative path absolute against `base`.
pub fn resolve_path(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}


/// Builds `<dir>/<prefix><delim><stem><delim><suffix>`, skipping absent parts.
///
/// # Arguments
///
/// * `base` - File or bare name to build on. Only its file name is used when `dir` is given.
/// * `dir` - Optional directory to place the result in.
/// * `prefix` - Optional leading tag.
/// * `suffix` - Optional trailing tag, usually carrying the extension.
/// * `delimiter` - Joins the parts.
///
/// # Returns
/// PathBuf
pub fn file_path_manipulator(
    base: &Path,
    dir: Option<&Path>,
    prefix: Option<&str>,
    suffix: Option<&str>,
    delimiter: &str,
) -> PathBuf {
    let stem = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut parts: Vec<&str> = Vec::new();
    if let Some(p) = prefix {
        parts.push(p);
    }
    if !stem.is_empty() {
        parts.push(&stem);
    }
    if let Some(s) = suffix {
        parts.push(s);
    }
    let name = parts.join(delimiter);

    match dir {
        Some(d) => d.join(name),
        None => match base.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        },
    }
}


/// A file that exists and holds at least one byte.
pub fn is_nonempty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}


/// Moves `src` to `dst`, replacing an earlier `dst`. A no-op when both are the same path.
pub fn rename_into(src: &Path, dst: &Path) -> io::Result<()> {
    if src == dst {
        return Ok(());
    }
    if dst.exists() {
        fs::remove_file(dst)?;
    }
    fs::rename(src, dst)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_file_path_manipulator() {
        let p = file_path_manipulator(Path::new("S1"), Some(Path::new("/out")), None, Some("fusion_list.tsv"), "_");
        assert_eq!(p, PathBuf::from("/out/S1_fusion_list.tsv"));

        let p = file_path_manipulator(Path::new("/data/S1"), None, Some("pre"), None, ".");
        assert_eq!(p, PathBuf::from("/data/pre.S1"));
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(resolve_path(Path::new("/abs"), Path::new("/cwd")), PathBuf::from("/abs"));
        assert_eq!(resolve_path(Path::new("rel"), Path::new("/cwd")), PathBuf::from("/cwd/rel"));
    }

    #[test]
    fn test_nonempty_and_rename() -> io::Result<()> {
        let dir = TempDir::new()?;
        let empty = dir.path().join("empty.tsv");
        File::create(&empty)?;
        assert!(!is_nonempty_file(&empty));
        assert!(!is_nonempty_file(&dir.path().join("missing.tsv")));

        let full = dir.path().join("full.tsv");
        writeln!(File::create(&full)?, "GENE1--GENE2")?;
        assert!(is_nonempty_file(&full));

        let renamed = dir.path().join("S1_full.tsv");
        rename_into(&full, &renamed)?;
        assert!(is_nonempty_file(&renamed));
        assert!(!full.exists());
        rename_into(&renamed, &renamed)?;
        assert!(renamed.exists());
        Ok(())
    }

    #[test]
    fn test_any_gzipped() -> io::Result<()> {
        let dir = TempDir::new()?;
        let gz = dir.path().join("r1.fq.gz");
        File::create(&gz)?.write_all(&[0x1F, 0x8B, 0x08, 0x00])?;
        let plain = dir.path().join("r2.fq");
        writeln!(File::create(&plain)?, "@read1")?;
        assert!(any_gzipped(&[&plain, &gz]));
        assert!(!any_gzipped(&[&plain]));
        assert!(any_gzipped(&[Path::new("/nonexistent/r1.fastq.gz")]));
        Ok(())
    }
}
