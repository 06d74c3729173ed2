use crate::error::Result;
use candle_core::Tensor;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One line of the summary log
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Record<'a> {
    Scalar {
        iter: usize,
        tag: &'a str,
        value: f32,
    },
    Histogram {
        iter: usize,
        tag: &'a str,
        min: f32,
        max: f32,
        mean: f32,
        values: &'a [f32],
    },
    Tensor {
        iter: usize,
        tag: &'a str,
        shape: &'a [usize],
        values: &'a [f32],
    },
}

/// Append-only JSON-lines log of training summaries
///
/// Every record is flushed right away so that a failed run keeps what
/// it has written so far.
pub struct SummaryWriter {
    path: PathBuf,
    buf: BufWriter<File>,
}

impl SummaryWriter {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            buf: BufWriter::new(file),
        })
    }

    fn write(&mut self, record: &Record) -> Result<()> {
        serde_json::to_writer(&mut self.buf, record)?;
        self.buf.write_all(b"\n")?;
        self.buf.flush()?;
        Ok(())
    }

    pub fn scalar(&mut self, iter: usize, tag: &str, value: f32) -> Result<()> {
        self.write(&Record::Scalar { iter, tag, value })
    }

    /// values of a tensor with their range and mean
    pub fn histogram(&mut self, iter: usize, tag: &str, x: &Tensor) -> Result<()> {
        let values = x.flatten_all()?.to_vec1::<f32>()?;
        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mean = values.iter().sum::<f32>() / values.len().max(1) as f32;
        self.write(&Record::Histogram {
            iter,
            tag,
            min,
            max,
            mean,
            values: &values,
        })
    }

    pub fn tensor(&mut self, iter: usize, tag: &str, x: &Tensor) -> Result<()> {
        let values = x.flatten_all()?.to_vec1::<f32>()?;
        self.write(&Record::Tensor {
            iter,
            tag,
            shape: x.dims(),
            values: &values,
        })
    }
}

impl Drop for SummaryWriter {
    fn drop(&mut self) {
        if let Err(e) = self.buf.flush() {
            log::warn!("failed to flush {}: {}", self.path.display(), e);
        }
    }
}
