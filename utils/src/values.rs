//! Flat comma-separated numeric files: one line, no header.

use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

pub fn write_values<W: Write, T: Display>(writer: &mut W, values: &[T]) -> io::Result<()> {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            writer.write_all(b",")?;
        }
        write!(writer, "{}", value)?;
    }
    Ok(())
}

/// Writes `values` to `path`, replacing any existing file.
pub fn save_values<T: Display>(path: &Path, values: &[T]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_values(&mut writer, values)?;
    writer.flush()
}

pub fn read_values<R: BufRead, T: FromStr>(reader: R) -> io::Result<Vec<T>> {
    let mut values = Vec::new();
    let mut lines = 0;

    for line_res in reader.lines() {
        let line = line_res?;
        if line.trim().is_empty() {
            continue;
        }
        lines += 1;
        if lines > 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Expected a single line of values",
            ));
        }

        for (idx, field) in line.split(',').enumerate() {
            let value = field.trim().parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Field {} is not a valid number: {:?}", idx, field),
                )
            })?;
            values.push(value);
        }
    }

    Ok(values)
}

pub fn load_values<T: FromStr>(path: &Path) -> io::Result<Vec<T>> {
    read_values(BufReader::new(File::open(path)?))
}
