use flate2::read::GzDecoder;
use ndarray::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
///
pub fn open_buf_reader<P: AsRef<Path>>(input_file: P) -> anyhow::Result<Box<dyn BufRead>> {
    let path = input_file.as_ref();
    let file = File::open(path)?;
    match path.extension().and_then(|x| x.to_str()) {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not
///
pub fn open_buf_writer<P: AsRef<Path>>(output_file: P) -> anyhow::Result<Box<dyn Write>> {
    let path = output_file.as_ref();
    let file = File::create(path)?;
    match path.extension().and_then(|x| x.to_str()) {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

/// `csv` for `x.csv` and `x.csv.gz`, and so on
pub fn get_format_ext(path: &Path) -> String {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let name_lower = name.to_lowercase();
    let stem = name_lower.strip_suffix(".gz").unwrap_or(&name_lower);
    Path::new(stem)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string()
}

fn is_not_comment_line(line: &str) -> bool {
    !(line.starts_with('#') || line.starts_with('%') || line.trim().is_empty())
}

///
/// Read a dense numeric matrix, one row per line
///
/// * `input_file` - `.csv` is comma-separated, anything else is split
///   on tabs and spaces; either may be gzipped
///
pub fn read_matrix<P: AsRef<Path>>(input_file: P) -> anyhow::Result<Array2<f32>> {
    let path = input_file.as_ref();
    let comma = get_format_ext(path) == "csv";
    let buf = open_buf_reader(path)?;

    let mut data = vec![];
    let mut ncol: Option<usize> = None;
    let mut nrow = 0;

    for (i, line) in buf.lines().enumerate() {
        let line = line?;
        if !is_not_comment_line(&line) {
            continue;
        }
        let words: Vec<&str> = if comma {
            line.split(',').map(|w| w.trim()).collect()
        } else {
            line.split_whitespace().collect()
        };
        let row = words
            .iter()
            .map(|w| w.parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("line {}: {}", i + 1, e))?;

        match ncol {
            None => ncol = Some(row.len()),
            Some(c) if c != row.len() => {
                anyhow::bail!("line {}: {} columns, expected {}", i + 1, row.len(), c)
            }
            _ => {}
        }
        data.extend(row);
        nrow += 1;
    }

    let ncol = ncol.ok_or_else(|| anyhow::anyhow!("empty matrix file {:?}", path))?;
    Ok(Array2::from_shape_vec((nrow, ncol), data)?)
}

/// Read one non-negative integer label per line
pub fn read_labels<P: AsRef<Path>>(input_file: P) -> anyhow::Result<Vec<usize>> {
    let buf = open_buf_reader(input_file)?;
    let mut ret = vec![];
    for line in buf.lines() {
        let line = line?;
        if is_not_comment_line(&line) {
            ret.push(line.trim().parse::<usize>()?);
        }
    }
    Ok(ret)
}

/// Write a dense matrix, tab-separated (comma for `.csv`)
pub fn write_matrix<P: AsRef<Path>>(mat: &Array2<f32>, output_file: P) -> anyhow::Result<()> {
    let path = output_file.as_ref();
    let sep = if get_format_ext(path) == "csv" { "," } else { "\t" };
    let mut buf = open_buf_writer(path)?;
    for row in mat.rows() {
        let line = row
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(sep);
        writeln!(buf, "{}", line)?;
    }
    buf.flush()?;
    Ok(())
}

pub fn write_labels<P: AsRef<Path>>(labels: &[usize], output_file: P) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(output_file)?;
    for l in labels {
        writeln!(buf, "{}", l)?;
    }
    buf.flush()?;
    Ok(())
}
