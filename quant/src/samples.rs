use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

use candle_core::{Device, Tensor};
use utils::IntTensor;

use crate::config::{Int, PIXEL_MAX};
use crate::error::{Error, Result};
use crate::network::INPUT_SIDE;

const IDX_IMAGES_MAGIC: u32 = 0x0000_0803;
const IDX_LABELS_MAGIC: u32 = 0x0000_0801;

/// One labelled grayscale image, pixels row-major `[channel][y][x]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    pub pixels: Vec<u8>,
    pub label: u8,
    pub shape: [usize; 3],
}

impl Sample {
    pub fn new(pixels: Vec<u8>, label: u8, shape: [usize; 3]) -> Result<Self> {
        if pixels.len() != shape.iter().product::<usize>() {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                actual: vec![pixels.len()],
            });
        }
        Ok(Self {
            pixels,
            label,
            shape,
        })
    }

    /// A single-channel 28x28 digit.
    pub fn mnist(pixels: Vec<u8>, label: u8) -> Result<Self> {
        Self::new(pixels, label, [1, INPUT_SIDE, INPUT_SIDE])
    }

    /// Integer image at the given scale: `trunc(pixel / 255 * img_scale)`.
    pub fn quantize(&self, img_scale: u64) -> IntTensor {
        let scale = img_scale as f64;
        let mut tensor = IntTensor::zeros(self.shape.to_vec());
        for (q, &p) in tensor.data_mut().iter_mut().zip(&self.pixels) {
            *q = (p as f64 / PIXEL_MAX * scale).trunc() as Int;
        }
        tensor
    }
}

#[derive(Clone, Debug, Default)]
pub struct Samples {
    pub samples: Vec<Sample>,
}

impl Samples {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Keeps at most the first `len` samples.
    pub fn truncate(&mut self, len: usize) {
        self.samples.truncate(len);
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write!(writer, "label")?; // Header
        if let Some(first) = self.samples.first() {
            for i in 0..first.pixels.len() {
                write!(writer, ",p{}", i)?;
            }
        }
        writeln!(writer)?;

        for sample in &self.samples {
            write!(writer, "{}", sample.label)?;
            for p in &sample.pixels {
                write!(writer, ",{}", p)?;
            }
            writeln!(writer)?;
        }

        Ok(())
    }

    /// Reads `label,pixel0,...,pixel783` rows of 28x28 digits. A leading
    /// header line is skipped if its first field is not a number.
    pub fn read<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut samples = Vec::new();

        for (line_idx, line_res) in reader.lines().enumerate() {
            let line = line_res?;
            if line.trim().is_empty() {
                continue;
            }
            let mut parts = line.split(',');
            let label_str = parts
                .next()
                .ok_or_else(|| invalid(format!("line {}: missing label field", line_idx + 1)))?;

            let label: u8 = match label_str.trim().parse() {
                Ok(label) => label,
                Err(_) if line_idx == 0 => continue, // Header
                Err(_) => {
                    return Err(invalid(format!(
                        "line {}: label is not a valid digit",
                        line_idx + 1
                    )))
                }
            };

            let pixels = parts
                .map(|field| field.trim().parse::<u8>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| {
                    invalid(format!("line {}: pixel is not a valid byte", line_idx + 1))
                })?;

            let sample = Sample::mnist(pixels, label)
                .map_err(|e| invalid(format!("line {}: {}", line_idx + 1, e)))?;
            samples.push(sample);
        }

        Ok(Self { samples })
    }

    pub fn open_csv(path: &Path) -> Result<Self> {
        File::open(path)
            .and_then(|file| Self::read(BufReader::new(file)))
            .map_err(|e| parse_error(path, e))
    }

    /// Reads an IDX image file (magic 0x803) and its IDX label file
    /// (magic 0x801), both big-endian.
    pub fn read_idx<I: Read, L: Read>(images: I, labels: L) -> io::Result<Self> {
        let (shape, pixels) = read_idx_images(images)?;
        let labels = read_idx_labels(labels)?;
        Self::zip_idx(shape, pixels, labels)
    }

    pub fn open_idx(images_path: &Path, labels_path: &Path) -> Result<Self> {
        let (shape, pixels) = File::open(images_path)
            .and_then(|file| read_idx_images(BufReader::new(file)))
            .map_err(|e| parse_error(images_path, e))?;
        let labels = File::open(labels_path)
            .and_then(|file| read_idx_labels(BufReader::new(file)))
            .map_err(|e| parse_error(labels_path, e))?;
        Self::zip_idx(shape, pixels, labels).map_err(|e| parse_error(labels_path, e))
    }

    fn zip_idx(shape: [usize; 3], pixels: Vec<u8>, labels: Vec<u8>) -> io::Result<Self> {
        let image_len: usize = shape.iter().product();
        let count = pixels.len() / image_len.max(1);
        if count != labels.len() {
            return Err(invalid(format!(
                "{} images but {} labels",
                count,
                labels.len()
            )));
        }

        let samples = pixels
            .chunks_exact(image_len.max(1))
            .zip(labels)
            .map(|(image, label)| Sample {
                pixels: image.to_vec(),
                label,
                shape,
            })
            .collect();

        Ok(Self { samples })
    }

    /// Float batch `(n, channels, height, width)` with pixels mapped to [0, 1],
    /// the input the float model was trained on.
    pub fn batch_tensor(batch: &[Sample], device: &Device) -> Result<Tensor> {
        let shape = batch
            .first()
            .map(|s| s.shape)
            .unwrap_or([1, INPUT_SIDE, INPUT_SIDE]);

        let mut data = Vec::with_capacity(batch.len() * shape.iter().product::<usize>());
        for sample in batch {
            if sample.shape != shape {
                return Err(Error::ShapeMismatch {
                    expected: shape.to_vec(),
                    actual: sample.shape.to_vec(),
                });
            }
            data.extend(sample.pixels.iter().map(|&p| p as f32 / PIXEL_MAX as f32));
        }

        let [channels, height, width] = shape;
        Ok(Tensor::from_vec(
            data,
            (batch.len(), channels, height, width),
            device,
        )?)
    }
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_idx_images<R: Read>(mut reader: R) -> io::Result<([usize; 3], Vec<u8>)> {
    let magic = read_u32(&mut reader)?;
    if magic != IDX_IMAGES_MAGIC {
        return Err(invalid(format!("bad IDX image magic {:#x}", magic)));
    }
    let count = read_u32(&mut reader)? as usize;
    let rows = read_u32(&mut reader)? as usize;
    let cols = read_u32(&mut reader)? as usize;

    let len = count
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .ok_or_else(|| {
            invalid(format!(
                "IDX image header {}x{}x{} is too large",
                count, rows, cols
            ))
        })?;
    let pixels = read_body(reader, len)?;

    Ok(([1, rows, cols], pixels))
}

fn read_idx_labels<R: Read>(mut reader: R) -> io::Result<Vec<u8>> {
    let magic = read_u32(&mut reader)?;
    if magic != IDX_LABELS_MAGIC {
        return Err(invalid(format!("bad IDX label magic {:#x}", magic)));
    }
    let count = read_u32(&mut reader)? as usize;

    read_body(reader, count)
}

// Reads exactly `len` bytes without trusting `len` for the allocation
fn read_body<R: Read>(reader: R, len: usize) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    reader.take(len as u64).read_to_end(&mut body)?;
    if body.len() != len {
        return Err(invalid(format!(
            "IDX body holds {} bytes, header declares {}",
            body.len(),
            len
        )));
    }
    Ok(body)
}

fn invalid(reason: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason)
}

fn parse_error(path: &Path, e: io::Error) -> Error {
    Error::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digit(fill: u8, label: u8) -> Sample {
        Sample::mnist(vec![fill; INPUT_SIDE * INPUT_SIDE], label).unwrap()
    }

    #[test]
    fn test_quantize_truncates() {
        let sample = Sample::new(vec![0, 127, 128, 254, 255, 51], 3, [1, 2, 3]).unwrap();
        let q = sample.quantize(2);
        assert_eq!(q.shape(), &[1, 2, 3]);
        // 127/255*2 = 0.996, 128/255*2 = 1.004, 51/255*2 = 0.4
        assert_eq!(q.data(), &[0, 0, 1, 1, 2, 0]);
    }

    #[test]
    fn test_new_checks_shape() {
        assert!(Sample::new(vec![0; 5], 0, [1, 2, 3]).is_err());
    }

    #[test]
    fn test_csv_write_read() {
        let samples = Samples::from_vec(vec![digit(0, 7), digit(255, 1)]);
        let mut buf = Vec::new();
        samples.write(&mut buf).unwrap();

        let read = Samples::read(buf.as_slice()).unwrap();
        assert_eq!(read.samples, samples.samples);
    }

    #[test]
    fn test_csv_without_header() {
        let mut line = String::from("4");
        for _ in 0..INPUT_SIDE * INPUT_SIDE {
            line.push_str(",9");
        }
        let read = Samples::read(line.as_bytes()).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read.samples[0].label, 4);
    }

    #[test]
    fn test_csv_rejects_short_rows() {
        let err = Samples::read("label,p0\n3,1,2,3\n".as_bytes()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_read_idx() {
        let mut images = Vec::new();
        images.extend_from_slice(&IDX_IMAGES_MAGIC.to_be_bytes());
        images.extend_from_slice(&2u32.to_be_bytes());
        images.extend_from_slice(&2u32.to_be_bytes());
        images.extend_from_slice(&2u32.to_be_bytes());
        images.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut labels = Vec::new();
        labels.extend_from_slice(&IDX_LABELS_MAGIC.to_be_bytes());
        labels.extend_from_slice(&2u32.to_be_bytes());
        labels.extend_from_slice(&[9, 0]);

        let samples = Samples::read_idx(images.as_slice(), labels.as_slice()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples.samples[1].pixels, vec![5, 6, 7, 8]);
        assert_eq!(samples.samples[1].label, 0);
        assert_eq!(samples.samples[0].shape, [1, 2, 2]);
    }

    #[test]
    fn test_read_idx_rejects_swapped_files() {
        let mut labels = Vec::new();
        labels.extend_from_slice(&IDX_LABELS_MAGIC.to_be_bytes());
        labels.extend_from_slice(&0u32.to_be_bytes());

        assert!(Samples::read_idx(labels.as_slice(), labels.as_slice()).is_err());
    }

    fn idx_header(magic: u32, dims: &[u32]) -> Vec<u8> {
        let mut header = magic.to_be_bytes().to_vec();
        for dim in dims {
            header.extend_from_slice(&dim.to_be_bytes());
        }
        header
    }

    #[test]
    fn test_read_idx_rejects_oversized_header() {
        let labels = idx_header(IDX_LABELS_MAGIC, &[0]);
        let images = idx_header(IDX_IMAGES_MAGIC, &[u32::MAX, u32::MAX, u32::MAX]);

        let err = Samples::read_idx(images.as_slice(), labels.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_read_idx_rejects_truncated_body() {
        let mut images = idx_header(IDX_IMAGES_MAGIC, &[1_000_000, 28, 28]);
        images.extend_from_slice(&[0; 10]);
        let labels = idx_header(IDX_LABELS_MAGIC, &[1_000_000]);

        let err = Samples::read_idx(images.as_slice(), labels.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut images = idx_header(IDX_IMAGES_MAGIC, &[1, 1, 1]);
        images.push(9);
        let labels = idx_header(IDX_LABELS_MAGIC, &[u32::MAX]);
        let err = Samples::read_idx(images.as_slice(), labels.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_batch_tensor_normalizes() {
        let batch = [digit(255, 0), digit(0, 1)];
        let t = Samples::batch_tensor(&batch, &Device::Cpu).unwrap();
        assert_eq!(t.dims(), &[2, 1, INPUT_SIDE, INPUT_SIDE]);

        let values = t.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(values[0], 1.0);
        assert_eq!(values[INPUT_SIDE * INPUT_SIDE], 0.0);
    }
}
