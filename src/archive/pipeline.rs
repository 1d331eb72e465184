// archive/pipeline.rs - tar <-> zstd codec pipeline
//
// Construction of the compression layers that sit between the archive file
// and the tar reader/writer. Errors raised while building or pumping the
// zstd decoder are classified as decompression failures; encoder-side
// failures as compression failures. Plain file I/O outside the codec
// boundary is reported by the callers.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read};

use crate::error::{TzstError, TzstResult};
use crate::interrupt;

/// Chunk size for pumping the decoder into the in-memory buffer.
pub(crate) const IO_CHUNK_SIZE: usize = 8192;

/// Decompress the whole archive into memory for random-access reading.
///
/// Reads through the zstd decoder in fixed-size chunks until EOF so archives
/// whose frames omit the content-size field decode the same as those that
/// carry it. Memory use is proportional to the decompressed size; streaming
/// mode avoids the buffer entirely.
pub(crate) fn decompress_to_memory(file: File) -> TzstResult<Vec<u8>> {
    let mut decoder = zstd::Decoder::new(file)
        .map_err(|e| TzstError::Decompression(format!("failed to open zstd stream: {e}")))?;

    let mut data = Vec::new();
    let mut chunk = [0u8; IO_CHUNK_SIZE];
    loop {
        interrupt::check()?;
        let read = decoder
            .read(&mut chunk)
            .map_err(|e| TzstError::Decompression(format!("failed to decompress archive: {e}")))?;
        if read == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..read]);
    }

    log::debug!("decompressed archive image: {} bytes", data.len());
    Ok(data)
}

/// Build the sequential decoder used by streaming mode.
pub(crate) fn streaming_decoder(file: File) -> TzstResult<zstd::Decoder<'static, BufReader<File>>> {
    zstd::Decoder::new(file)
        .map_err(|e| TzstError::Decompression(format!("failed to open zstd stream: {e}")))
}

/// Build the streaming encoder used by write mode.
///
/// The content-size flag is enabled so the frame header carries the
/// decompressed size whenever the encoder knows it.
pub(crate) fn encoder(
    file: File,
    compression_level: i32,
) -> TzstResult<zstd::Encoder<'static, BufWriter<File>>> {
    let mut encoder = zstd::Encoder::new(BufWriter::new(file), compression_level)
        .map_err(|e| TzstError::Compression(format!("failed to create zstd encoder: {e}")))?;
    encoder
        .include_contentsize(true)
        .map_err(|e| TzstError::Compression(format!("failed to configure zstd encoder: {e}")))?;
    Ok(encoder)
}
