//! Dataset loading utilities for the MNIST IDX format.
//!
//! Images: big-endian magic, count, rows, cols, then `count*rows*cols`
//! unsigned bytes, row-major. Labels: magic, count, then `count` bytes.
//! Files ending in `.gz` are decompressed on the fly.
use crate::tensor::Matrix;
use anyhow::{anyhow, bail, Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::GzDecoder;
use log::{debug, info};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

pub const IMAGE_MAGIC: u32 = 2051;
pub const LABEL_MAGIC: u32 = 2049;

/// One split: raw 0-255 images and their class labels, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct MnistSplit {
    pub images: Vec<Matrix>,
    pub labels: Vec<u8>,
}

impl MnistSplit {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Keep only the first `n` samples.
    pub fn truncate(&mut self, n: usize) {
        self.images.truncate(n);
        self.labels.truncate(n);
    }
}

/// Cap on capacity reserved from a header count; the payload decides how
/// many samples actually arrive.
const MAX_PREALLOC: usize = 1 << 16;

fn read_count<R: Read>(r: &mut R, what: &str) -> Result<usize> {
    let v = r
        .read_u32::<BigEndian>()
        .with_context(|| format!("Read {what}"))?;
    Ok(v as usize)
}

/// Read exactly `len` bytes into `buf`, growing it only as data arrives.
fn read_payload<R: Read>(r: &mut R, len: usize, buf: &mut Vec<u8>) -> Result<()> {
    buf.clear();
    r.by_ref().take(len as u64).read_to_end(buf)?;
    if buf.len() != len {
        bail!("expected {len} bytes, got {}", buf.len());
    }
    Ok(())
}

/// Parse an IDX image stream.
pub fn read_images<R: Read>(mut r: R) -> Result<Vec<Matrix>> {
    let magic = r.read_u32::<BigEndian>().context("Read magic")?;
    if magic != IMAGE_MAGIC {
        debug!("unexpected image magic {magic}");
    }
    let count = read_count(&mut r, "image count")?;
    let rows = read_count(&mut r, "row count")?;
    let cols = read_count(&mut r, "column count")?;
    let pixels = rows
        .checked_mul(cols)
        .ok_or_else(|| anyhow!("Image size {rows}x{cols} overflows"))?;
    if pixels == 0 && count > 0 {
        bail!("{count} images of size {rows}x{cols}");
    }
    let mut buf = Vec::new();
    let mut images = Vec::with_capacity(count.min(MAX_PREALLOC));
    for i in 0..count {
        read_payload(&mut r, pixels, &mut buf)
            .with_context(|| format!("Image data truncated at image {i} of {count}"))?;
        let data = buf.iter().map(|&b| b as f32).collect();
        images.push(Matrix::from_vec(rows, cols, data)?);
    }
    Ok(images)
}

/// Parse an IDX label stream.
pub fn read_labels<R: Read>(mut r: R) -> Result<Vec<u8>> {
    let magic = r.read_u32::<BigEndian>().context("Read magic")?;
    if magic != LABEL_MAGIC {
        debug!("unexpected label magic {magic}");
    }
    let count = read_count(&mut r, "label count")?;
    let mut labels = Vec::with_capacity(count.min(MAX_PREALLOC));
    read_payload(&mut r, count, &mut labels)
        .with_context(|| format!("Label data truncated (expected {count})"))?;
    Ok(labels)
}

/// Write images in the IDX layout. Pixels are clamped to `0..=255`.
pub fn write_images<W: Write>(mut w: W, images: &[Matrix]) -> Result<()> {
    let (rows, cols) = images.first().map(Matrix::shape).unwrap_or((0, 0));
    if images.iter().any(|m| m.shape() != (rows, cols)) {
        bail!("All images must share one shape");
    }
    w.write_u32::<BigEndian>(IMAGE_MAGIC)?;
    w.write_u32::<BigEndian>(images.len() as u32)?;
    w.write_u32::<BigEndian>(rows as u32)?;
    w.write_u32::<BigEndian>(cols as u32)?;
    for image in images {
        let bytes: Vec<u8> = image
            .as_slice()
            .iter()
            .map(|&px| px.round().clamp(0.0, 255.0) as u8)
            .collect();
        w.write_all(&bytes)?;
    }
    Ok(())
}

/// Write labels in the IDX layout.
pub fn write_labels<W: Write>(mut w: W, labels: &[u8]) -> Result<()> {
    w.write_u32::<BigEndian>(LABEL_MAGIC)?;
    w.write_u32::<BigEndian>(labels.len() as u32)?;
    w.write_all(labels)?;
    Ok(())
}

fn open(path: &Path) -> Result<Box<dyn Read>> {
    let file =
        File::open(path).map_err(|e| anyhow!("Failed to open {}: {}", path.display(), e))?;
    let reader = BufReader::new(file);
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

pub fn load_images<P: AsRef<Path>>(path: P) -> Result<Vec<Matrix>> {
    let path = path.as_ref();
    read_images(open(path)?).with_context(|| format!("Parsing {}", path.display()))
}

pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    read_labels(open(path)?).with_context(|| format!("Parsing {}", path.display()))
}

/// First existing file among the usual spellings of an MNIST file name.
fn locate(dir: &Path, prefix: &str, kind: &str) -> Result<PathBuf> {
    let candidates = [
        format!("{prefix}-{kind}-ubyte"),
        format!("{prefix}-{kind}-ubyte.gz"),
        format!("{prefix}-{}", kind.replacen('-', ".", 1) + "-ubyte"),
    ];
    candidates
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
        .ok_or_else(|| anyhow!("No {prefix} {kind} file found in {}", dir.display()))
}

/// Load the train (`train == true`) or test split from `dir`.
pub fn load_mnist<P: AsRef<Path>>(dir: P, train: bool) -> Result<MnistSplit> {
    let dir = dir.as_ref();
    let prefix = if train { "train" } else { "t10k" };
    let images = load_images(locate(dir, prefix, "images-idx3")?)?;
    let labels = load_labels(locate(dir, prefix, "labels-idx1")?)?;
    if images.len() != labels.len() {
        bail!(
            "{prefix} split has {} images but {} labels",
            images.len(),
            labels.len()
        );
    }
    if images.is_empty() {
        bail!("No MNIST data loaded for {prefix}");
    }
    info!("loaded {} {prefix} samples from {}", images.len(), dir.display());
    Ok(MnistSplit { images, labels })
}
