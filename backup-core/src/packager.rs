use crate::constants::backup::{ARCHIVE_EXTENSION, SQL_EXTENSION, ZIP_COMPRESSION_LEVEL};
use crate::{BackupError, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// 单个条目需要 ZIP64 扩展的大小
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// 将转储文件压缩为单文件 zip，成功后删除源文件
///
/// 压缩包与源文件同目录，扩展名替换为 `.zip`。失败时删除不完整的压缩包，
/// 源文件保留给调用方清理。
pub async fn compress(source: &Path) -> Result<PathBuf> {
    let source = source.to_path_buf();
    let archive = source.with_extension(ARCHIVE_EXTENSION);

    let archive_path = archive.clone();
    let source_path = source.clone();
    let result = tokio::task::spawn_blocking(move || write_archive(&source_path, &archive_path))
        .await
        .map_err(BackupError::from)
        .and_then(|inner| inner);

    if let Err(e) = result {
        let _ = std::fs::remove_file(&archive);
        return Err(e);
    }

    tokio::fs::remove_file(&source).await?;
    tracing::debug!("压缩完成: {} -> {}", source.display(), archive.display());
    Ok(archive)
}

fn write_archive(source: &Path, archive: &Path) -> Result<()> {
    let entry_name = source
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| BackupError::invalid_input(format!("无效的文件路径: {}", source.display())))?;

    let input_file = File::open(source)?;
    let source_len = input_file.metadata()?.len();
    let mut input = BufReader::new(input_file);
    let mut writer = ZipWriter::new(BufWriter::new(File::create(archive)?));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(ZIP_COMPRESSION_LEVEL))
        // 超过 4 GiB 的条目必须使用 ZIP64
        .large_file(source_len >= ZIP64_THRESHOLD);

    writer.start_file(entry_name, options)?;
    std::io::copy(&mut input, &mut writer)?;

    let mut output = writer.finish()?;
    output.flush()?;
    output.get_ref().sync_all()?;
    Ok(())
}

/// 从压缩包中取出第一个 `.sql` 条目写到 `dest`
pub async fn extract(archive: &Path, dest: &Path) -> Result<PathBuf> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();

    let dest_path = dest.clone();
    let result = tokio::task::spawn_blocking(move || read_first_sql_entry(&archive, &dest_path))
        .await
        .map_err(BackupError::from)
        .and_then(|inner| inner);

    match result {
        Ok(()) => Ok(dest),
        Err(e) => {
            let _ = std::fs::remove_file(&dest);
            Err(e)
        }
    }
}

fn read_first_sql_entry(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(BufReader::new(file))
        .map_err(|e| BackupError::corrupt_archive(e.to_string()))?;

    let suffix = format!(".{SQL_EXTENSION}");
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| BackupError::corrupt_archive(e.to_string()))?;
        if !entry.is_file() || !entry.name().ends_with(&suffix) {
            continue;
        }

        let mut output = BufWriter::new(File::create(dest)?);
        std::io::copy(&mut entry, &mut output)
            .map_err(|e| BackupError::corrupt_archive(e.to_string()))?;
        output.flush()?;
        return Ok(());
    }

    Err(BackupError::NoSqlEntryFound)
}

/// 判断备份文件是否为压缩包
pub fn is_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_dump(dir: &TempDir) -> (PathBuf, Vec<u8>) {
        let path = dir.path().join("shop-2024-01-15T02-00-00-000Z.sql");
        let content: Vec<u8> = (0..20_000)
            .flat_map(|i| format!("INSERT INTO orders VALUES ({i}, '订单');\n").into_bytes())
            .collect();
        std::fs::write(&path, &content).unwrap();
        (path, content)
    }

    #[tokio::test]
    async fn test_compress_then_extract_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let (source, content) = write_dump(&dir);

        let archive = compress(&source).await.unwrap();
        assert_eq!(archive, source.with_extension("zip"));
        assert!(!source.exists());
        assert!(std::fs::metadata(&archive).unwrap().len() < content.len() as u64);

        let restored = dir.path().join("restored.sql");
        extract(&archive, &restored).await.unwrap();
        assert_eq!(std::fs::read(&restored).unwrap(), content);
    }

    #[tokio::test]
    async fn test_archive_entry_uses_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let (source, _) = write_dump(&dir);
        let archive = compress(&source).await.unwrap();

        let zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let names: Vec<&str> = zip.file_names().collect();
        assert_eq!(names, vec!["shop-2024-01-15T02-00-00-000Z.sql"]);
    }

    #[tokio::test]
    async fn test_compress_missing_source_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("missing.sql");
        assert!(compress(&source).await.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_extract_skips_non_sql_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("mixed.zip");
        {
            let mut writer = ZipWriter::new(File::create(&archive).unwrap());
            let options = SimpleFileOptions::default();
            writer.start_file("README.txt", options).unwrap();
            writer.write_all(b"notes").unwrap();
            writer.start_file("dump.sql", options).unwrap();
            writer.write_all(b"SELECT 1;").unwrap();
            writer.finish().unwrap();
        }

        let dest = dir.path().join("out.sql");
        extract(&archive, &dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "SELECT 1;");
    }

    #[tokio::test]
    async fn test_extract_without_sql_entry() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("nosql.zip");
        {
            let mut writer = ZipWriter::new(File::create(&archive).unwrap());
            writer
                .start_file("data.csv", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"a,b").unwrap();
            writer.finish().unwrap();
        }

        let dest = dir.path().join("out.sql");
        assert!(matches!(
            extract(&archive, &dest).await,
            Err(BackupError::NoSqlEntryFound)
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_extract_corrupt_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, b"this is not a zip file").unwrap();

        let dest = dir.path().join("out.sql");
        assert!(matches!(
            extract(&archive, &dest).await,
            Err(BackupError::CorruptArchive(_))
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_compress_dump_larger_than_four_gib() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("huge.sql");
        let len = (1u64 << 32) + 4096;
        // 稀疏文件，不占用真实磁盘空间
        File::create(&source).unwrap().set_len(len).unwrap();

        let archive = compress(&source).await.unwrap();
        assert!(!source.exists());

        let mut zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let entry = zip.by_index(0).unwrap();
        assert_eq!(entry.name(), "huge.sql");
        assert_eq!(entry.size(), len);
    }

    #[test]
    fn test_is_archive() {
        assert!(is_archive(Path::new("/b/shop.zip")));
        assert!(is_archive(Path::new("/b/shop.ZIP")));
        assert!(!is_archive(Path::new("/b/shop.sql")));
    }
}
