use std::{
    fs::File,
    io::{Cursor, Read, Seek, SeekFrom},
    path::Path,
};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use polars::prelude::*;
use ::zip::ZipArchive;

pub struct RemoteFile {
    response: reqwest::blocking::Response,
    current_size: u64,
    pbar: Option<ProgressBar>,
}
impl RemoteFile {
    pub fn with_pbar(url: &str) -> Result<Self> {
        Self::with_config(url, 3600, true)
    }
    pub fn with_config(url: &str, timeout: u64, pbar: bool) -> Result<Self> {
        let client = reqwest::blocking::Client::new();
        let response = client
            .get(url)
            .timeout(std::time::Duration::from_secs(timeout))
            .send()?
            .error_for_status()
            .with_context(|| format!("downloading {url}"))?;

        let pbar = if pbar {
            // servers without Content-Length get a spinner with a running byte count
            let pbar = match response.content_length() {
                Some(total_size) => ProgressBar::new(total_size),
                None => ProgressBar::new_spinner(),
            };
            pbar.set_style(ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
                .progress_chars("#>-"));
            pbar.set_message(format!("Downloading {}", url));
            Some(pbar)
        } else {
            None
        };
        Ok(Self {
            response,
            current_size: 0,
            pbar,
        })
    }
    fn update(&mut self, size: usize) {
        self.current_size += size as u64;
        if let Some(pbar) = &self.pbar {
            pbar.set_position(self.current_size);
            if size == 0 {
                pbar.finish();
            }
        }
    }
}

impl std::io::Read for RemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let size = self.response.read(buf)?;
        self.update(size);
        Ok(size)
    }
}

/// Downloads a zip archive to a temporary file and unpacks it under `path`.
pub fn download_and_extract<P: AsRef<Path>>(url: &str, path: P) -> Result<()> {
    let mut remote_file = RemoteFile::with_pbar(url)?;
    let mut archive = tempfile::tempfile()?;
    std::io::copy(&mut remote_file, &mut archive)?;
    archive.seek(SeekFrom::Start(0))?;

    let mut archive = ZipArchive::new(&archive)?;
    archive.extract(path)?;
    Ok(())
}

/// Reads a header-less, gzip-compressed CSV table.
pub fn read_csv_gz<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let path = path.as_ref();
    let mut bytes = Vec::new();
    GzDecoder::new(File::open(path).with_context(|| format!("opening {}", path.display()))?)
        .read_to_end(&mut bytes)
        .with_context(|| format!("decompressing {}", path.display()))?;
    let df = CsvReader::new(Cursor::new(bytes))
        .has_header(false)
        .finish()
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(df)
}

pub(crate) fn column_u32(series: &Series) -> Result<Vec<u32>> {
    if series.null_count() > 0 {
        bail!("column {} has {} missing values", series.name(), series.null_count());
    }
    Ok(series
        .cast(&DataType::UInt32)?
        .u32()?
        .into_no_null_iter()
        .collect())
}

/// Row-major `(rows, columns)` values of a numeric table.
pub(crate) fn table_f32(df: &DataFrame) -> Result<Vec<f32>> {
    let (rows, cols) = df.shape();
    let mut columns = Vec::with_capacity(cols);
    for series in df.get_columns() {
        let series = series.cast(&DataType::Float32)?;
        columns.push(series.f32()?.into_no_null_iter().collect::<Vec<f32>>());
    }
    let mut values = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        values.extend(columns.iter().map(|c| c[r]));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    fn write_gz(path: &Path, text: &str) {
        let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn reads_headerless_gzip_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge.csv.gz");
        write_gz(&path, "0,1\n1,2\n2,0\n");
        let df = read_csv_gz(&path).unwrap();
        assert_eq!(df.shape(), (3, 2));
        assert_eq!(column_u32(&df.get_columns()[0]).unwrap(), vec![0, 1, 2]);
        assert_eq!(column_u32(&df.get_columns()[1]).unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn tables_come_out_row_major() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node-feat.csv.gz");
        write_gz(&path, "0.5,1.0,-2.0\n3.0,4.25,0.0\n");
        let df = read_csv_gz(&path).unwrap();
        assert_eq!(
            table_f32(&df).unwrap(),
            vec![0.5, 1.0, -2.0, 3.0, 4.25, 0.0]
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_csv_gz(dir.path().join("absent.csv.gz")).is_err());
    }
}
