//! Executable image format.
//!
//! An image is a flat sequence of 16-bit words in the host's native byte
//! order, loaded at address 0. There is no header. A trailing odd byte
//! cannot form a word and is ignored.

use crate::cpu::memory::MEMORY_WORDS;
use crate::word::Word;
use log::warn;
use std::path::Path;
use thiserror::Error;

/// Decode native-endian bytes into words.
pub fn words_from_bytes(bytes: &[u8]) -> Result<Vec<Word>, ImageError> {
    let chunks = bytes.chunks_exact(2);
    if !chunks.remainder().is_empty() {
        warn!("image has an odd trailing byte; ignoring it");
    }

    let words: Vec<Word> = chunks
        .map(|pair| Word::from_raw(u16::from_ne_bytes([pair[0], pair[1]])))
        .collect();

    if words.len() > MEMORY_WORDS {
        return Err(ImageError::TooLarge { words: words.len() });
    }
    Ok(words)
}

/// Encode words as native-endian bytes.
pub fn words_to_bytes(words: &[Word]) -> Vec<u8> {
    words.iter().flat_map(|w| w.raw().to_ne_bytes()).collect()
}

/// Load an image from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<Vec<Word>, ImageError> {
    let bytes = std::fs::read(path.as_ref())
        .map_err(|e| ImageError::IoError(format!("{}: {}", path.as_ref().display(), e)))?;
    words_from_bytes(&bytes)
}

/// Save an image to disk.
pub fn save_image<P: AsRef<Path>>(path: P, words: &[Word]) -> Result<(), ImageError> {
    std::fs::write(path.as_ref(), words_to_bytes(words))
        .map_err(|e| ImageError::IoError(format!("{}: {}", path.as_ref().display(), e)))
}

/// Errors that can occur while reading or writing images.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("image of {words} words does not fit in 65536 words of memory")]
    TooLarge { words: usize },
}
