use crate::{StreamError, StreamResult};
use async_compression::tokio::bufread::{GzipDecoder, ZstdDecoder};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, BufReader};
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

use crate::codec::CharsetDecoder;

/// Default read buffer for a Procmon export (64 KiB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// How the bytes of one export should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

#[derive(Debug, Clone)]
pub struct SourceMeta {
    /// File name, used for extension sniffing and log fields
    pub name_hint: String,
    pub compression: Compression,
    /// Which character encoding to expect (defaults to UTF-8)
    pub charset: &'static encoding_rs::Encoding,
    /// Capacity of the buffered reader in front of the decoder
    pub buffer_capacity: usize,
}

impl Default for SourceMeta {
    fn default() -> Self {
        Self {
            name_hint: String::new(),
            compression: Compression::None,
            charset: encoding_rs::UTF_8,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl SourceMeta {
    /// Sniff compression from the file extension only.
    pub fn for_path(path: &Path) -> Self {
        let name_hint = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let compression = match path.extension().and_then(|s| s.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("gz") => Compression::Gzip,
            Some(ext) if ext.eq_ignore_ascii_case("zst") => Compression::Zstd,
            _ => Compression::None,
        };
        Self {
            name_hint,
            compression,
            ..Default::default()
        }
    }
}

/// Wrap a raw byte source with optional decompression and transcoding to UTF-8.
pub fn build_source_reader<R>(raw: R, meta: &SourceMeta) -> Box<dyn AsyncRead + Unpin + Send>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf = BufReader::with_capacity(meta.buffer_capacity.max(1), raw);
    let decompressed: Box<dyn AsyncRead + Unpin + Send> = match meta.compression {
        Compression::Gzip => Box::new(GzipDecoder::new(buf)),
        Compression::Zstd => Box::new(ZstdDecoder::new(buf)),
        Compression::None => Box::new(buf),
    };

    // UTF-8 passes straight through; BOM handling for UTF-8 happens on the header.
    if meta.charset == encoding_rs::UTF_8 {
        decompressed
    } else {
        let framed = FramedRead::new(decompressed, CharsetDecoder::new(meta.charset));
        Box::new(StreamReader::new(framed))
    }
}

/// Open a local export for streaming.
///
/// Rejects empty and non-existent paths before touching the file so callers
/// can tell a bad argument apart from an I/O failure.
pub async fn open_source(
    path: &Path,
    mut meta: SourceMeta,
) -> StreamResult<(Box<dyn AsyncRead + Unpin + Send>, SourceMeta)> {
    if path.as_os_str().is_empty() {
        return Err(StreamError::EmptyPath);
    }
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(StreamError::NotFound(path.to_path_buf()));
    }

    let file = File::open(path).await?;
    let sniffed = SourceMeta::for_path(path);
    if meta.name_hint.is_empty() {
        meta.name_hint = sniffed.name_hint;
    }
    if meta.compression == Compression::None {
        meta.compression = sniffed.compression;
    }

    let reader = build_source_reader(file, &meta);
    Ok((reader, meta))
}
